//! The transport layer: message types, wire codec, connection pool,
//! credentials, mangling, caching, cookies, and the pipeline that sequences
//! them for each exchange.

pub mod auth;
pub(crate) mod cache;
pub mod cookies;
pub mod error;
pub(crate) mod limiter;
pub mod mangle;
pub mod message;
pub(crate) mod pipeline;
pub(crate) mod pool;
pub(crate) mod retry;
pub(crate) mod wire;

pub use cookies::Cookie;
pub use error::{MangleError, TransportError, TransportErrorKind};
pub use mangle::{ManglePlugin, sort_by_priority};
pub use message::{HeaderMap, Request, RequestBuilder, Response};
