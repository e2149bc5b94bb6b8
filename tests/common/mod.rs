#![allow(dead_code)]

pub mod command;
pub mod file;
pub mod session;

use grove::error::{WcError, WcErrorKind};

/// Typed error kind of a failed operation
pub fn error_kind<T: std::fmt::Debug>(result: anyhow::Result<T>) -> WcErrorKind {
    let error = result.expect_err("operation should have failed");
    WcError::kind(&error).unwrap_or_else(|| panic!("untyped error: {error:#}"))
}
