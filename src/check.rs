//! Uniform status checking for substrate calls.
//!
//! Every operation in this crate reaches the substrate through [`invoke`].
//! It is the only place where a failed call is detected: the failure is
//! reported as a single line on standard error and the process is torn down
//! through [`crate::lifecycle::abort`]. There is no recoverable error path.

use crate::substrate::{self, Substrate};
use std::error::Error as StdError;
use std::fmt;
use std::num::NonZeroI32;
use std::panic::Location;

/// A non-zero status code returned by a substrate call. Its meaning is
/// defined by the substrate, which can translate it to text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ErrorCode(NonZeroI32);

impl ErrorCode {
    /// Wraps a status code, returning `None` for the success code `0`.
    pub const fn new(code: i32) -> Option<Self> {
        match NonZeroI32::new(code) {
            Some(code) => Some(Self(code)),
            None => None,
        }
    }

    /// Converts a raw C-style status into a `Result`.
    pub fn check(status: i32) -> Result<(), Self> {
        match Self::new(status) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// The raw status code.
    pub const fn code(self) -> i32 {
        self.0.get()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error code {}", self.code())
    }
}

impl StdError for ErrorCode {}

/// Runs one substrate call. On success the call's value is returned. On
/// failure a diagnostic naming `symbol` is printed and the process aborts.
pub fn invoke<T, F>(location: &Location<'_>, symbol: &str, op: F) -> T
where
    F: FnOnce() -> Result<T, ErrorCode>,
{
    tracing::trace!(%location, symbol, "substrate call");
    match op() {
        Ok(value) => value,
        Err(e) => {
            print_error_at(symbol, e.code(), location);
            crate::lifecycle::abort_at(e.code(), location)
        }
    }
}

/// [`invoke`] against the substrate bound to the calling thread.
pub(crate) fn call<T, F>(location: &Location<'_>, symbol: &str, op: F) -> T
where
    F: FnOnce(&dyn Substrate) -> Result<T, ErrorCode>,
{
    let substrate = substrate::current();
    invoke(location, symbol, || op(&*substrate))
}

/// Writes `<location>: <symbol> returned error <text> (<code>)` to stderr,
/// where the location is the caller's. The text comes from the substrate; it
/// is left empty when the substrate cannot translate the code.
#[track_caller]
pub fn print_error(symbol: &str, code: i32) {
    print_error_at(symbol, code, Location::caller())
}

pub(crate) fn print_error_at(symbol: &str, code: i32, location: &Location<'_>) {
    let text = substrate::with(|s| s.error_string(code)).unwrap_or_default();
    eprintln!("{}", format_error(location, symbol, &text, code));
}

pub(crate) fn format_error(location: &Location<'_>, symbol: &str, text: &str, code: i32) -> String {
    format!("{}: {} returned error {} ({})", location, symbol, text, code)
}
