//! # portico-server
//!
//! The Portico gateway: multi-backend, multi-tenant database access behind
//! one HTTP surface.
//!
//! The crate wires three layers together:
//! - [`registry::Registry`] routes (engine, tenant) scopes to adapters, with
//!   a bounded LRU cache of tenant adapters per engine;
//! - [`pipeline::PipelineEngine`] runs ordered pipeline requests over
//!   baton-addressed sessions;
//! - [`http`] exposes the pipeline plus admin and introspection routes.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod http;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod session;

pub use config::{AdapterConfig, GatewayConfig, TenancyConfig};
pub use pipeline::{PipelineEngine, Scope};
pub use registry::{EngineInfo, Registry};
pub use server::GatewayServer;
