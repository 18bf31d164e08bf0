//! NeoFS HTTP gateway
//!
//! Serves objects of a content-addressable storage network over plain HTTP:
//! multipart uploads become objects, objects are downloaded by address or by
//! attribute. Requests are spread over weighted storage peers by a
//! health-checked connection pool.

pub mod api;
pub mod client;
pub mod config;
pub mod credentials;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod resolver;
pub mod sampler;
pub mod tls;
pub mod tokens;
pub mod types;
