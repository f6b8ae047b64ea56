//! HTTP Transport Engine
//!
//! This library is the wire layer of a web-application security scanner: it
//! turns a logical "send this request" call into a pooled, authenticated,
//! cached, interceptor-mangled, possibly-proxied HTTP exchange, and lets many
//! such calls run concurrently under bounded parallelism.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Engine configuration and validation
//! - [`transport`] - Messages, connection pool, auth, mangling, cache, the
//!   request pipeline
//! - [`dispatch`] - Bounded concurrent batch execution
//! - [`engine`] - The public [`ScanEngine`] facade
//!
//! # Example
//!
//! ```no_run
//! use wirescan::{EngineConfig, Request, ScanEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = ScanEngine::new(EngineConfig::default(), vec![])?;
//! let response = engine.send(Request::get("http://target.example/")).await?;
//! println!("{} {}", response.status, response.reason);
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod transport;

// Re-export commonly used types
pub use config::{
    BasicCredentials, CachePolicy, ConfigError, DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RETRIES,
    DEFAULT_TIMEOUT_SECS, EngineConfig, NtlmCredentials, ProxyConfig,
};
pub use dispatch::{
    CancelHandle, DeliveryMode, DispatchError, Dispatcher, MAX_PARALLEL, MIN_PARALLEL,
};
pub use engine::ScanEngine;
pub use transport::{
    Cookie, HeaderMap, MangleError, ManglePlugin, Request, RequestBuilder, Response,
    TransportError, TransportErrorKind, sort_by_priority,
};
