//! # portico-protocol
//!
//! Wire types for the Portico pipeline protocol.
//!
//! A client sends a [`PipelineRequest`] carrying an optional session baton
//! and an ordered list of [`Request`]s; the gateway answers with a
//! [`PipelineResponse`] carrying one [`RequestResult`] per request, in order.
//! Messages are JSON, with enums tagged by a `type` field.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};

pub use portico_adapter::types::{QueryResult, Row, Value};

/// One pipeline exchange from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Session baton from a previous response; `None` starts fresh
    #[serde(default)]
    pub baton: Option<String>,
    /// Requests to run strictly in order
    pub requests: Vec<Request>,
}

/// A single operation inside a pipeline exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Execute one statement
    Execute {
        /// Statement to run
        stmt: Stmt,
    },

    /// Execute a list of steps with optional conditions on prior outcomes
    Batch {
        /// Batch steps, evaluated in order
        steps: Vec<BatchStep>,
    },

    /// Execute a multi-statement SQL script as one logical unit
    Sequence {
        /// Script text; statements separated by `;`
        sql: String,
    },

    /// Classify a statement without executing it
    Describe {
        /// Statement text
        sql: String,
    },

    /// Store SQL text under an id for later reference via `Stmt::sql_id`
    StoreSql {
        /// Identifier for later lookup
        sql_id: String,
        /// Statement text to store
        sql: String,
    },

    /// Report whether the session is in autocommit mode
    GetAutocommit,

    /// Close the session
    Close,
}

/// A statement reference: inline SQL or a previously stored id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stmt {
    /// Inline SQL text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Id of SQL stored earlier in the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_id: Option<String>,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Stmt {
    /// Inline statement without arguments
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: Some(sql.into()),
            ..Default::default()
        }
    }

    /// Inline statement with arguments
    pub fn with_args(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: Some(sql.into()),
            sql_id: None,
            args,
        }
    }

    /// Statement referencing stored SQL
    pub fn from_sql_id(sql_id: impl Into<String>) -> Self {
        Self {
            sql: None,
            sql_id: Some(sql_id.into()),
            args: Vec::new(),
        }
    }
}

/// One step of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStep {
    /// Condition on a prior step's outcome; unconditional when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<BatchCond>,
    /// Statement to run if the condition holds
    pub stmt: Stmt,
}

/// Condition gating a batch step on a prior step's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchCond {
    /// Run only if the referenced step executed and succeeded
    Ok {
        /// Zero-based index of the referenced step
        step: usize,
    },
    /// Run only if the referenced step executed and failed
    Error {
        /// Zero-based index of the referenced step
        step: usize,
    },
}

/// The gateway's answer to a [`PipelineRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    /// Baton for continuing the session; `None` when no session is retained
    #[serde(default)]
    pub baton: Option<String>,
    /// One result per request, in request order
    pub results: Vec<RequestResult>,
}

/// Outcome of a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestResult {
    /// The request ran; its payload follows
    Ok {
        /// Request-specific payload
        response: Response,
    },
    /// The request failed
    Error {
        /// Human-readable failure description
        message: String,
    },
}

impl RequestResult {
    /// Build an error result from any displayable error
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

/// Request-specific response payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Result of an `Execute` request
    Execute {
        /// Full statement result
        result: QueryResult,
    },

    /// Result of a `Batch` request; both vectors are step-indexed and a step
    /// that was skipped has `None` in both
    Batch {
        /// Per-step results; `None` when the step was skipped or failed
        step_results: Vec<Option<QueryResult>>,
        /// Per-step errors; `None` when the step was skipped or succeeded
        step_errors: Vec<Option<String>>,
    },

    /// A `Sequence` script ran to completion
    Sequence,

    /// Classification of a statement from a `Describe` request
    Describe {
        /// Whether the statement is read-only
        is_readonly: bool,
        /// Whether the statement is DDL
        is_ddl: bool,
    },

    /// SQL stored successfully
    StoreSql,

    /// Autocommit status
    GetAutocommit {
        /// `true` iff no transaction is open
        is_autocommit: bool,
    },

    /// Session closed
    Close,
}

impl PipelineRequest {
    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

impl PipelineResponse {
    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}
