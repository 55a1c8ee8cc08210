//! Useful test utilities for the SDK crates. Import them with:
//!
//! ```rust
//! use restate_sdk_test_util::{assert, test, assert_eq, assert_ne};
//! ```
//!
//! Note: You cannot import them with a glob import, as the compiler won't be able to distinguish our imports and the stdlib imports.

// A couple of useful re-exports
pub use assert2::{assert, check, let_assert};
pub use pretty_assertions::{assert_eq, assert_ne};
pub use test_log::test;
