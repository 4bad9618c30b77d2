//! The message-passing runtime underneath this crate.
//!
//! Everything this crate does reaches the runtime through the [`Substrate`]
//! trait. Implementors only translate one call each: status checking,
//! diagnostics and request bookkeeping live above this seam. Two
//! implementations are included: [`local::LocalSubstrate`], a group of ranks
//! living on the threads of one process, and (with the `mpi` feature)
//! [`mpi::MpiSubstrate`], backed by the system MPI library.
//!
//! Operations address "the" substrate, resolved per call: a substrate bound
//! to the calling thread with [`with_substrate`] wins, then one installed
//! process-wide with [`install`], then the default (MPI when the `mpi`
//! feature is enabled, otherwise a single-rank local group).

pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi;

use crate::check::ErrorCode;
use crate::datatype::Datatype;
use crate::lifecycle::ThreadSupport;
use crate::op::Op;
use crate::{Count, Rank, Tag};
use std::cell::RefCell;
use std::sync::{Arc, OnceLock};

pub use local::{LocalGroup, LocalSubstrate};
#[cfg(feature = "mpi")]
pub use self::mpi::MpiSubstrate;

/// Matches a message from any source rank.
pub const ANY_SOURCE: Rank = -1;

/// Matches a message with any tag.
pub const ANY_TAG: Tag = -1;

/// A substrate-owned token for one in-flight operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawRequest(pub i32);

/// The header of a matched message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub source: Rank,
    pub tag: Tag,
    pub bytes: usize,
}

/// One call per method into a message-passing runtime. A returned `Err`
/// carries the runtime's non-zero status code.
pub trait Substrate: Send + Sync {
    fn initialized(&self) -> Result<bool, ErrorCode>;

    fn finalized(&self) -> Result<bool, ErrorCode>;

    /// Initializes the runtime, returning the thread support it granted.
    fn init_thread(&self, required: ThreadSupport) -> Result<ThreadSupport, ErrorCode>;

    fn query_thread(&self) -> Result<ThreadSupport, ErrorCode>;

    fn finalize(&self) -> Result<(), ErrorCode>;

    /// Aborts every rank in the group. Returns only if the abort itself
    /// failed, with the status of that failure.
    fn abort(&self, code: i32) -> i32;

    /// Translates a status code to text, if the runtime knows it.
    fn error_string(&self, code: i32) -> Option<String>;

    fn comm_rank(&self) -> Result<Rank, ErrorCode>;

    fn comm_size(&self) -> Result<Count, ErrorCode>;

    /// Blocks until a message matching `source` and `tag` can be received,
    /// without receiving it.
    fn probe(&self, source: Rank, tag: Tag) -> Result<Status, ErrorCode>;

    /// Number of whole `datatype` elements in a probed message.
    fn get_count(&self, status: &Status, datatype: Datatype) -> Result<usize, ErrorCode>;

    fn type_size(&self, datatype: Datatype) -> Result<usize, ErrorCode>;

    fn type_contiguous(&self, count: Count, base: Datatype) -> Result<Datatype, ErrorCode>;

    /// # Safety
    ///
    /// `buf` must be valid for reads of `count` elements of `datatype` until
    /// the returned request has been waited on.
    unsafe fn isend(
        &self,
        buf: *const u8,
        count: Count,
        datatype: Datatype,
        dest: Rank,
        tag: Tag,
    ) -> Result<RawRequest, ErrorCode>;

    /// # Safety
    ///
    /// `buf` must be valid for writes of `count` elements of `datatype` until
    /// the returned request has been waited on.
    unsafe fn irecv(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
        source: Rank,
        tag: Tag,
    ) -> Result<RawRequest, ErrorCode>;

    /// In-place reduction: `buf` holds the input and, on completion, the
    /// result.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for reads and writes of `count` elements of
    /// `datatype` until the returned request has been waited on.
    unsafe fn iallreduce(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
        op: Op,
    ) -> Result<RawRequest, ErrorCode>;

    /// In-place gather: each rank's `count` elements sit at block `rank` of
    /// `buf`.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for reads and writes of `count * size` elements
    /// of `datatype` until the returned request has been waited on.
    unsafe fn iallgather(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
    ) -> Result<RawRequest, ErrorCode>;

    /// In-place gather where rank `r` contributes `counts[r]` elements at
    /// element offset `offsets[r]` of `buf`.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for reads and writes over the whole layout, and
    /// `counts` and `offsets` must stay unchanged, until the returned request
    /// has been waited on.
    unsafe fn iallgatherv(
        &self,
        buf: *mut u8,
        counts: &[Count],
        offsets: &[Count],
        datatype: Datatype,
    ) -> Result<RawRequest, ErrorCode>;

    fn ibarrier(&self) -> Result<RawRequest, ErrorCode>;

    /// Blocks until every request has completed. Completion statuses are
    /// discarded.
    fn waitall(&self, requests: &mut [RawRequest]) -> Result<(), ErrorCode>;
}

static INSTALLED: OnceLock<Arc<dyn Substrate>> = OnceLock::new();

thread_local! {
    static SCOPED: RefCell<Option<Arc<dyn Substrate>>> = RefCell::new(None);
}

/// Installs the process-wide substrate. Returns `false` if one was already
/// installed or the default was already resolved.
pub fn install(substrate: Arc<dyn Substrate>) -> bool {
    INSTALLED.set(substrate).is_ok()
}

/// Runs `f` with `substrate` bound to the calling thread. The previous
/// binding is restored when `f` returns or unwinds.
///
/// Bindings are per thread. A thread spawned from inside `f` starts unbound;
/// to let it call into the same substrate, hand it [`current`] and bind it
/// there:
///
/// ```
/// use std::thread;
/// use tiny_mpi::substrate::{self, LocalGroup};
/// use tiny_mpi::ThreadSupport;
///
/// let ranks = LocalGroup::new(2)
///     .thread_support(ThreadSupport::Multiple)
///     .run(|_| {
///         let _guard = tiny_mpi::enter(ThreadSupport::Multiple, true);
///         let endpoint = substrate::current();
///         thread::scope(|scope| {
///             scope
///                 .spawn(move || substrate::with_substrate(endpoint, || tiny_mpi::rank()))
///                 .join()
///                 .unwrap()
///         })
///     });
/// assert_eq!(ranks, vec![0, 1]);
/// ```
pub fn with_substrate<R>(substrate: Arc<dyn Substrate>, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Arc<dyn Substrate>>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0.take();
            SCOPED.with(|scoped| *scoped.borrow_mut() = previous);
        }
    }

    let previous = SCOPED.with(|scoped| scoped.replace(Some(substrate)));
    let _restore = Restore(previous);
    f()
}

/// The substrate that operations on this thread address. Requests keep the
/// substrate that issued them, so waiting on one does not consult this.
pub fn current() -> Arc<dyn Substrate> {
    SCOPED
        .with(|scoped| scoped.borrow().clone())
        .unwrap_or_else(|| INSTALLED.get_or_init(default_substrate).clone())
}

pub(crate) fn with<R>(f: impl FnOnce(&dyn Substrate) -> R) -> R {
    f(&*current())
}

#[cfg(feature = "mpi")]
fn default_substrate() -> Arc<dyn Substrate> {
    Arc::new(MpiSubstrate::new())
}

#[cfg(not(feature = "mpi"))]
fn default_substrate() -> Arc<dyn Substrate> {
    Arc::new(LocalSubstrate::single())
}
