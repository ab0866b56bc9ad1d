//! Layer ordering and built-in defaults.

pub mod merge_policy;
