//! Handles for in-flight operations and the ways to wait on them.
//!
//! A [`Request`] borrows every buffer its operation reads or writes, so the
//! buffers cannot be touched or freed while the operation is in flight.
//! Waiting retires a request; a retired request is inert. A request that is
//! dropped while still pending is waited on by its destructor, so every
//! issued request is retired exactly once on every exit path. [`Pending`]
//! makes that explicit for a fixed set of requests.
//!
//! A request remembers the substrate that issued it and is always waited on
//! there, so it may be moved to and retired on another thread.

use crate::check;
use crate::substrate::{self, RawRequest, Substrate};
use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::Arc;

/// An in-flight operation, issued by one of the operations in
/// [`crate::ops`].
///
/// The buffers stay borrowed while the request lives:
///
/// ```compile_fail
/// use tiny_mpi::{ops, ThreadSupport};
///
/// let _guard = tiny_mpi::enter(ThreadSupport::Single, false);
/// let mut back = [0i32; 2];
/// let recv = ops::recv(&mut back, 0, 0);
/// back[0] = 1;
/// recv.wait();
/// ```
///
/// Leaking a pending request with [`std::mem::forget`] skips its wait and
/// ends the borrow while the substrate may still read or write the buffer.
/// Nothing here can prevent that; a forgotten request must have its buffers
/// kept alive and untouched by other means.
#[must_use = "an issued request has to be waited on"]
pub struct Request<'a> {
    raw: Option<RawRequest>,
    substrate: Arc<dyn Substrate>,
    location: &'static Location<'static>,
    _buffers: PhantomData<&'a ()>,
}

impl<'a> Request<'a> {
    pub(crate) fn new(
        raw: RawRequest,
        substrate: Arc<dyn Substrate>,
        location: &'static Location<'static>,
    ) -> Self {
        Self {
            raw: Some(raw),
            substrate,
            location,
            _buffers: PhantomData,
        }
    }

    /// Whether this request has not been waited on yet.
    pub fn is_pending(&self) -> bool {
        self.raw.is_some()
    }

    /// The substrate token, while the request is pending.
    pub fn raw(&self) -> Option<RawRequest> {
        self.raw
    }

    /// Blocks until this request completes.
    #[track_caller]
    pub fn wait(mut self) {
        wait_at(std::slice::from_mut(&mut self), Location::caller())
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("raw", &self.raw)
            .field("location", &format_args!("{}", self.location))
            .finish()
    }
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        if self.raw.is_some() {
            let location = self.location;
            tracing::warn!(%location, "request dropped while pending, waiting on it");
            wait_at(std::slice::from_mut(self), location)
        }
    }
}

/// Blocks until every request in `requests` has completed. Requests that
/// were already retired are skipped. No ordering is implied among them.
#[track_caller]
pub fn wait(requests: &mut [Request<'_>]) {
    wait_at(requests, Location::caller())
}

/// Waits in one batch per issuing substrate, each bound to the calling
/// thread for the duration so a failure is reported and aborted there.
pub(crate) fn wait_at(requests: &mut [Request<'_>], location: &Location<'_>) {
    let mut pending: Vec<&mut Request<'_>> =
        requests.iter_mut().filter(|r| r.raw.is_some()).collect();
    loop {
        let issuer = match pending.first() {
            Some(request) => request.substrate.clone(),
            None => return,
        };
        let (batch, rest): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|r| Arc::ptr_eq(&r.substrate, &issuer));
        let mut raw: Vec<RawRequest> = batch.iter().filter_map(|r| r.raw).collect();
        substrate::with_substrate(issuer, || {
            check::call(location, "MPI_Waitall", |s| s.waitall(&mut raw))
        });
        for request in batch {
            request.raw = None;
        }
        pending = rest;
    }
}

/// Waits on individually named requests.
///
/// ```
/// use tiny_mpi::{ops, ThreadSupport};
///
/// let _guard = tiny_mpi::enter(ThreadSupport::Single, false);
/// let out = [1.0f64, 2.0];
/// let mut back = [0.0f64; 2];
/// let recv = ops::recv(&mut back, 0, 0);
/// let send = ops::send(&out, 0, 0);
/// tiny_mpi::wait!(send, recv);
/// assert_eq!(back, out);
/// ```
#[macro_export]
macro_rules! wait {
    ($($request:expr),+ $(,)?) => {
        $crate::wait(&mut [$($request),+])
    };
}

/// Owns a fixed set of requests and waits on all of them when dropped,
/// whichever way the owning scope is left.
#[must_use = "dropping the bundle waits on its requests immediately"]
pub struct Pending<'a, const N: usize> {
    requests: [Request<'a>; N],
    location: &'static Location<'static>,
}

impl<'a, const N: usize> Pending<'a, N> {
    #[track_caller]
    pub fn new(requests: [Request<'a>; N]) -> Self {
        Self {
            requests,
            location: Location::caller(),
        }
    }

    pub fn len(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<const N: usize> Drop for Pending<'_, N> {
    fn drop(&mut self) {
        wait_at(&mut self.requests, self.location)
    }
}

impl<const N: usize> fmt::Debug for Pending<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.requests.iter()).finish()
    }
}
