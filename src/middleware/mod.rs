//! # Middleware
//!
//! Request spans and access logging come from `tracing_actix_web::TracingLogger`,
//! wrapped in `main`. This module adds per-endpoint metrics on top.

pub mod metrics;

pub use metrics::MetricsMiddleware;
