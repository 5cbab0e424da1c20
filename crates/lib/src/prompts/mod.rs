//! # Prompt Templates
//!
//! Templates used to ask a model for a study guide, one module per purpose.

pub mod guide;

pub use guide::{build_prompts, GUIDE_SYSTEM_PROMPT, GUIDE_USER_PROMPT};
