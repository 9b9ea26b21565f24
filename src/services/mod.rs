//! HTTP command/query surface for the switch-machine controller.
//!
//! Requires the `web` feature. Route handlers share one
//! [`TortoiseController`](crate::TortoiseController) through [`ApiState`]
//! wrapped in `Arc`:
//!
//! ```ignore
//! use std::sync::Arc;
//! use rs_tortoise::services::{build_router, ApiState, WebServerConfig};
//!
//! let state = Arc::new(ApiState::new(controller));
//! let router = build_router(state, &WebServerConfig::default());
//! ```

pub mod api;
pub mod web;

pub use api::*;
pub use web::*;
