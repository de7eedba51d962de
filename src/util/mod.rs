//! Utility modules: retry, timeout, text truncation.

pub mod retry;
pub mod text;
pub mod timeout;
