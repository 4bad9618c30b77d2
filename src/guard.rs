//! Scoped ownership of the substrate's lifetime.

use crate::lifecycle::{self, ThreadSupport};
use crate::ops;
use crate::request;
use std::panic::Location;

/// Initializes the substrate and returns a guard that finalizes it when
/// dropped. With `barrier_on_exit` every rank first waits at a barrier, so
/// no rank tears down while others still communicate.
#[track_caller]
pub fn enter(required: ThreadSupport, barrier_on_exit: bool) -> Guard {
    let location = Location::caller();
    let thread_support = lifecycle::init_at(required, location);
    Guard {
        barrier_on_exit,
        thread_support,
        location,
    }
}

/// Owns the initialized state of the substrate for a scope. Only one guard
/// should be alive per process: each one finalizes on drop.
#[must_use = "dropping the guard finalizes the substrate immediately"]
#[derive(Debug)]
pub struct Guard {
    barrier_on_exit: bool,
    thread_support: ThreadSupport,
    location: &'static Location<'static>,
}

impl Guard {
    /// The thread support the substrate granted, which may be lower than
    /// requested.
    pub fn thread_support(&self) -> ThreadSupport {
        self.thread_support
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        if self.barrier_on_exit {
            let mut barrier = [ops::barrier_at(self.location)];
            request::wait_at(&mut barrier, self.location);
        }
        tracing::debug!(location = %self.location, barrier = self.barrier_on_exit, "leaving");
        lifecycle::fini_at(self.location);
    }
}
