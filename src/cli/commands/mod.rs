//! Command implementations.

pub mod compile;
pub mod config;
pub mod issues;
pub mod mark;
pub mod poll;
pub mod run;
pub mod stream;
pub mod subscribe;

use crate::error::Result;
use serde::Serialize;

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
