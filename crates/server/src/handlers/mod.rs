//! # API Route Handlers
//!
//! This module organizes the Axum route handlers for `devotio-server`.

pub mod account;
pub mod general;
pub mod guides;

pub use account::*;
pub use general::*;
pub use guides::*;

use super::{errors::AppError, state::AppState, types::ApiResponse};
