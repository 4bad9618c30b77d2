//! Initialization, teardown, and process termination.
//!
//! These are the gatekeepers every failure path depends on: [`abort`] has to
//! know whether the substrate is initialized before it can ask the whole
//! group to stop, so the state queries here report their own failures and
//! exit directly instead of going through [`crate::check::invoke`].

use crate::check;
use crate::substrate;
use crate::{Count, Rank};
use std::panic::Location;
use std::process;

/// How much concurrent use of the substrate is safe. Levels are ordered:
/// each one permits everything the previous one does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum ThreadSupport {
    /// Only one thread exists.
    Single = 0,
    /// Only the thread that initialized makes calls.
    Funneled = 1,
    /// Any thread may call, but never two at once.
    Serialized = 2,
    /// Any thread may call at any time.
    Multiple = 3,
}

impl ThreadSupport {
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Single),
            1 => Some(Self::Funneled),
            2 => Some(Self::Serialized),
            3 => Some(Self::Multiple),
            _ => None,
        }
    }
}

/// Whether the substrate has been initialized. Stays `true` after
/// finalization.
#[track_caller]
pub fn initialized() -> bool {
    initialized_at(Location::caller())
}

/// Whether the substrate has been finalized.
#[track_caller]
pub fn finalized() -> bool {
    finalized_at(Location::caller())
}

pub(crate) fn initialized_at(location: &Location<'_>) -> bool {
    match substrate::with(|s| s.initialized()) {
        Ok(flag) => flag,
        Err(e) => exit_with(location, "MPI_Initialized", e.code()),
    }
}

pub(crate) fn finalized_at(location: &Location<'_>) -> bool {
    match substrate::with(|s| s.finalized()) {
        Ok(flag) => flag,
        Err(e) => exit_with(location, "MPI_Finalized", e.code()),
    }
}

fn exit_with(location: &Location<'_>, symbol: &str, code: i32) -> ! {
    eprintln!("{}: {} failed with ({})", location, symbol, code);
    process::exit(1)
}

/// Initializes the substrate requesting `required` thread support, and
/// returns the level granted, which may be lower. If the substrate is already
/// initialized nothing is re-initialized and the level negotiated earlier is
/// returned instead.
#[track_caller]
pub fn init(required: ThreadSupport) -> ThreadSupport {
    init_at(required, Location::caller())
}

pub(crate) fn init_at(required: ThreadSupport, location: &Location<'_>) -> ThreadSupport {
    if initialized_at(location) {
        return check::call(location, "MPI_Query_thread", |s| s.query_thread());
    }
    match substrate::with(|s| s.init_thread(required)) {
        Ok(granted) => {
            tracing::debug!(?required, ?granted, "initialized");
            granted
        }
        Err(e) => exit_with(location, "MPI_Init_thread", e.code()),
    }
}

/// Finalizes the substrate. Does nothing if it was never initialized or has
/// already been finalized.
#[track_caller]
pub fn fini() {
    fini_at(Location::caller())
}

pub(crate) fn fini_at(location: &Location<'_>) {
    if !initialized_at(location) || finalized_at(location) {
        return;
    }
    if let Err(e) = substrate::with(|s| s.finalize()) {
        exit_with(location, "MPI_Finalize", e.code())
    }
    tracing::debug!("finalized");
}

/// Terminates the process with a failure status. With an active substrate
/// the whole group is aborted with `code`; otherwise the code is reported and
/// only this process exits.
#[track_caller]
pub fn abort(code: i32) -> ! {
    abort_at(code, Location::caller())
}

pub(crate) fn abort_at(code: i32, location: &Location<'_>) -> ! {
    if !initialized_at(location) || finalized_at(location) {
        eprintln!("{}: abort called with error code ({})", location, code);
        process::exit(1)
    }
    let e = substrate::with(|s| s.abort(code));
    eprintln!("{}: MPI_Abort failed with error code ({})", location, e);
    process::exit(1)
}

/// This process's rank in the group.
#[track_caller]
pub fn rank() -> Rank {
    check::call(Location::caller(), "MPI_Comm_rank", |s| s.comm_rank())
}

/// The number of ranks in the group.
#[track_caller]
pub fn n_ranks() -> Count {
    check::call(Location::caller(), "MPI_Comm_size", |s| s.comm_size())
}
