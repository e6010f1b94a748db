//! The pipeline request engine.
//!
//! Executes the ordered requests of a [`PipelineRequest`] against a session
//! scope. Every request yields exactly one result and a failing request never
//! aborts the ones after it; transport-level failure is reserved for scope
//! resolution (unknown engine), not for SQL errors.

use portico_adapter::sql::{is_ddl, is_write, split_statements, txn_control, TxnControl};
use portico_adapter::{EngineKind, Error, QueryResult, Result, Value};
use portico_protocol::{
    BatchCond, BatchStep, PipelineRequest, PipelineResponse, Request, RequestResult, Response,
    Stmt,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::registry::Registry;
use crate::session::{SessionManager, SessionState};

/// The (engine, tenant) scope a pipeline call runs under.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Engine selector; `None` means the default engine
    pub engine: Option<EngineKind>,
    /// Tenant id; `None` falls back to the configured default tenant
    pub tenant: Option<String>,
}

/// Session-aware executor for pipeline calls.
pub struct PipelineEngine {
    registry: Arc<Registry>,
    sessions: SessionManager,
}

impl PipelineEngine {
    /// Create an engine over a registry.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            sessions: SessionManager::new(),
        }
    }

    /// The live session table.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run one pipeline call.
    ///
    /// Returns `Err` only when the scope itself cannot be resolved; every
    /// SQL-level failure is a per-request error inside the response. A call
    /// carrying an unknown baton gets an error result per request and no
    /// baton back.
    pub async fn handle(
        &self,
        scope: &Scope,
        request: PipelineRequest,
    ) -> Result<PipelineResponse> {
        match request.baton {
            Some(baton) => {
                let Some(session) = self.sessions.get(&baton) else {
                    let err = Error::unknown_session(&baton);
                    return Ok(PipelineResponse {
                        baton: None,
                        results: request
                            .requests
                            .iter()
                            .map(|_| RequestResult::error(&err))
                            .collect(),
                    });
                };

                let mut state = session.state().lock().await;
                state.last_activity = Instant::now();
                let (results, closed) =
                    run_requests(&mut state, Some(baton.as_str()), request.requests).await;
                state.last_activity = Instant::now();
                let retained = !closed && state.needs_retention();
                drop(state);

                if retained {
                    Ok(PipelineResponse {
                        baton: Some(baton),
                        results,
                    })
                } else {
                    self.sessions.remove(&baton);
                    Ok(PipelineResponse {
                        baton: None,
                        results,
                    })
                }
            }
            None => {
                let adapter = self
                    .registry
                    .get_adapter(scope.engine, scope.tenant.as_deref())
                    .await?;
                let mut state = SessionState::new(adapter);
                let (results, closed) = run_requests(&mut state, None, request.requests).await;

                let baton = if !closed && state.needs_retention() {
                    Some(self.sessions.create(state).baton().to_string())
                } else {
                    None
                };
                Ok(PipelineResponse { baton, results })
            }
        }
    }
}

async fn run_requests(
    state: &mut SessionState,
    baton: Option<&str>,
    requests: Vec<Request>,
) -> (Vec<RequestResult>, bool) {
    let mut results = Vec::with_capacity(requests.len());
    let mut closed = false;
    for request in requests {
        if closed {
            // Requests after a Close get the same answer the next call's
            // stale baton would, not execution against dead session state.
            let result = match baton {
                Some(baton) => RequestResult::error(Error::unknown_session(baton)),
                None => RequestResult::error("session closed"),
            };
            results.push(result);
            continue;
        }
        results.push(run_request(state, request, &mut closed).await);
    }
    (results, closed)
}

async fn run_request(
    state: &mut SessionState,
    request: Request,
    closed: &mut bool,
) -> RequestResult {
    match request {
        Request::Execute { stmt } => match execute_stmt(state, &stmt).await {
            Ok(result) => RequestResult::Ok {
                response: Response::Execute { result },
            },
            Err(e) => RequestResult::error(e),
        },

        Request::Batch { steps } => RequestResult::Ok {
            response: run_batch(state, steps).await,
        },

        Request::Sequence { sql } => match run_sequence(state, &sql).await {
            Ok(()) => RequestResult::Ok {
                response: Response::Sequence,
            },
            Err(e) => RequestResult::error(e),
        },

        Request::Describe { sql } => RequestResult::Ok {
            response: Response::Describe {
                is_readonly: !is_write(&sql),
                is_ddl: is_ddl(&sql),
            },
        },

        Request::StoreSql { sql_id, sql } => {
            state.stored_sql.insert(sql_id, sql);
            RequestResult::Ok {
                response: Response::StoreSql,
            }
        }

        Request::GetAutocommit => RequestResult::Ok {
            response: Response::GetAutocommit {
                is_autocommit: state.tx.is_none(),
            },
        },

        Request::Close => {
            if let Some(tx) = state.tx.take() {
                if let Err(e) = tx.rollback().await {
                    warn!(error = %e, "rollback on session close failed");
                }
            }
            state.stored_sql.clear();
            *closed = true;
            RequestResult::Ok {
                response: Response::Close,
            }
        }
    }
}

/// Resolve a statement's SQL text: inline, or stored under `sql_id`.
fn resolve_sql(state: &SessionState, stmt: &Stmt) -> Result<String> {
    if let Some(sql) = &stmt.sql {
        return Ok(sql.clone());
    }
    if let Some(id) = &stmt.sql_id {
        return state
            .stored_sql
            .get(id)
            .cloned()
            .ok_or_else(|| Error::query(format!("no stored SQL under id '{id}'")));
    }
    Err(Error::query("statement carries neither sql nor sql_id"))
}

async fn execute_stmt(state: &mut SessionState, stmt: &Stmt) -> Result<QueryResult> {
    let sql = resolve_sql(state, stmt)?;
    execute_sql(state, &sql, &stmt.args).await
}

/// Run one statement, routing transaction control into session state.
async fn execute_sql(state: &mut SessionState, sql: &str, args: &[Value]) -> Result<QueryResult> {
    match txn_control(sql) {
        Some(TxnControl::Begin) => {
            if state.tx.is_some() {
                return Err(Error::transaction("transaction already open"));
            }
            state.tx = Some(state.adapter.begin().await?);
            Ok(QueryResult::default())
        }
        Some(TxnControl::Commit) => {
            let tx = state
                .tx
                .take()
                .ok_or_else(|| Error::transaction("no open transaction"))?;
            tx.commit().await?;
            Ok(QueryResult::default())
        }
        Some(TxnControl::Rollback) => {
            let tx = state
                .tx
                .take()
                .ok_or_else(|| Error::transaction("no open transaction"))?;
            tx.rollback().await?;
            Ok(QueryResult::default())
        }
        None => match &state.tx {
            Some(tx) => tx.execute(sql, args).await,
            None => state.adapter.execute(sql, args).await,
        },
    }
}

/// Run batch steps against the per-step outcome ledger.
///
/// A skipped step records `None` in both ledgers; an executed step records
/// exactly one of result or error. The outer request result is `Ok` whenever
/// the batch machinery ran, regardless of individual step failures.
async fn run_batch(state: &mut SessionState, steps: Vec<BatchStep>) -> Response {
    let mut step_results: Vec<Option<QueryResult>> = Vec::with_capacity(steps.len());
    let mut step_errors: Vec<Option<String>> = Vec::with_capacity(steps.len());
    // Some(true)/Some(false) for executed steps, None for skipped ones.
    let mut outcomes: Vec<Option<bool>> = Vec::with_capacity(steps.len());

    for (index, step) in steps.into_iter().enumerate() {
        let run = match &step.condition {
            None => true,
            // Conditions may only reference earlier steps; anything else is
            // unsatisfiable and the step is skipped.
            Some(BatchCond::Ok { step }) => {
                *step < index && outcomes[*step] == Some(true)
            }
            Some(BatchCond::Error { step }) => {
                *step < index && outcomes[*step] == Some(false)
            }
        };

        if !run {
            step_results.push(None);
            step_errors.push(None);
            outcomes.push(None);
            continue;
        }

        match execute_stmt(state, &step.stmt).await {
            Ok(result) => {
                step_results.push(Some(result));
                step_errors.push(None);
                outcomes.push(Some(true));
            }
            Err(e) => {
                step_results.push(None);
                step_errors.push(Some(e.to_string()));
                outcomes.push(Some(false));
            }
        }
    }

    Response::Batch {
        step_results,
        step_errors,
    }
}

/// Run a multi-statement script in order; the first failure aborts the rest.
async fn run_sequence(state: &mut SessionState, script: &str) -> Result<()> {
    for sql in split_statements(script) {
        execute_sql(state, &sql, &[]).await?;
    }
    Ok(())
}
