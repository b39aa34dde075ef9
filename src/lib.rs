//! Probe: a session engine for code-exploration agents.
//!
//! A [`service::ProbeService`] runs one request/response exchange per
//! session against a pluggable [`provider::Provider`], folding the
//! provider's streamed progress into a live [`model::ProbeSession`].
//! Providers can run in-process or in another process behind the
//! [`bridge`].
//!
//! # Quick start
//!
//! ```no_run
//! use probe::config::load_config;
//! use probe::provider::{ProviderRegistry, ScriptedProvider};
//! use probe::service::ProbeService;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = load_config(None).unwrap();
//! let registry = Arc::new(ProviderRegistry::new());
//! let provider = ScriptedProvider::from_json(r#"{ "steps": [] }"#).unwrap();
//! registry.register(config.engine.provider.clone(), Arc::new(provider)).unwrap();
//!
//! let service = ProbeService::from_config(registry, &config.engine);
//! let session = service.start_session();
//! let pending = service.initiate(&session, "explain main.rs").unwrap();
//! let outcome = pending.completed().await;
//! println!("{outcome:?}: {:?}", session.view().response);
//! # }
//! ```

pub mod bridge;
pub mod cancellation;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod progress;
pub mod provider;
pub mod runtime;
pub mod service;
#[cfg(test)]
pub mod testsupport;
