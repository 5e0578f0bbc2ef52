//! In-crate test utilities, compiled only for tests.

pub mod test_utils;

pub use test_utils::*;
