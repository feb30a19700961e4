//! Connection resilience helpers.

pub mod retry;
