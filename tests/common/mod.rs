#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tiny_mpi::substrate::{LocalSubstrate, RawRequest, Status, Substrate};
use tiny_mpi::{Count, Datatype, ErrorCode, Op, Rank, Tag, ThreadSupport};

/// Text reported for an injected failure.
pub const INJECTED: &str = "injected failure";

/// Wraps a local endpoint, counting requests as they are issued and retired,
/// and optionally failing one substrate method with a fixed code.
pub struct Recorder {
    inner: LocalSubstrate,
    fail: Option<(&'static str, i32)>,
    inits: AtomicUsize,
    issued: AtomicUsize,
    retired: AtomicUsize,
    waits: AtomicUsize,
}

impl Recorder {
    pub fn new(inner: LocalSubstrate) -> Self {
        Self {
            inner,
            fail: None,
            inits: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            retired: AtomicUsize::new(0),
            waits: AtomicUsize::new(0),
        }
    }

    /// A recorder over a fresh one-rank group.
    pub fn single() -> Arc<Self> {
        Arc::new(Self::new(LocalSubstrate::single()))
    }

    /// A one-rank recorder whose `method` always fails with `code`.
    pub fn failing(method: &'static str, code: i32) -> Arc<Self> {
        Arc::new(Self {
            fail: Some((method, code)),
            ..Self::new(LocalSubstrate::single())
        })
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn retired(&self) -> usize {
        self.retired.load(Ordering::SeqCst)
    }

    /// Number of `waitall` calls made.
    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.issued() - self.retired()
    }

    fn gate(&self, method: &str) -> Result<(), ErrorCode> {
        match self.fail {
            Some((name, code)) if name == method => Err(ErrorCode::new(code).unwrap()),
            _ => Ok(()),
        }
    }

    fn issue(&self, request: Result<RawRequest, ErrorCode>) -> Result<RawRequest, ErrorCode> {
        if request.is_ok() {
            self.issued.fetch_add(1, Ordering::SeqCst);
        }
        request
    }
}

impl Substrate for Recorder {
    fn initialized(&self) -> Result<bool, ErrorCode> {
        self.gate("initialized")?;
        self.inner.initialized()
    }

    fn finalized(&self) -> Result<bool, ErrorCode> {
        self.gate("finalized")?;
        self.inner.finalized()
    }

    fn init_thread(&self, required: ThreadSupport) -> Result<ThreadSupport, ErrorCode> {
        self.gate("init_thread")?;
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.inner.init_thread(required)
    }

    fn query_thread(&self) -> Result<ThreadSupport, ErrorCode> {
        self.gate("query_thread")?;
        self.inner.query_thread()
    }

    fn finalize(&self) -> Result<(), ErrorCode> {
        self.gate("finalize")?;
        self.inner.finalize()
    }

    fn abort(&self, code: i32) -> i32 {
        self.inner.abort(code)
    }

    fn error_string(&self, code: i32) -> Option<String> {
        match self.fail {
            Some((_, injected)) if injected == code => Some(INJECTED.to_string()),
            _ => self.inner.error_string(code),
        }
    }

    fn comm_rank(&self) -> Result<Rank, ErrorCode> {
        self.gate("comm_rank")?;
        self.inner.comm_rank()
    }

    fn comm_size(&self) -> Result<Count, ErrorCode> {
        self.gate("comm_size")?;
        self.inner.comm_size()
    }

    fn probe(&self, source: Rank, tag: Tag) -> Result<Status, ErrorCode> {
        self.gate("probe")?;
        self.inner.probe(source, tag)
    }

    fn get_count(&self, status: &Status, datatype: Datatype) -> Result<usize, ErrorCode> {
        self.gate("get_count")?;
        self.inner.get_count(status, datatype)
    }

    fn type_size(&self, datatype: Datatype) -> Result<usize, ErrorCode> {
        self.gate("type_size")?;
        self.inner.type_size(datatype)
    }

    fn type_contiguous(&self, count: Count, base: Datatype) -> Result<Datatype, ErrorCode> {
        self.gate("type_contiguous")?;
        self.inner.type_contiguous(count, base)
    }

    unsafe fn isend(
        &self,
        buf: *const u8,
        count: Count,
        datatype: Datatype,
        dest: Rank,
        tag: Tag,
    ) -> Result<RawRequest, ErrorCode> {
        self.gate("isend")?;
        self.issue(self.inner.isend(buf, count, datatype, dest, tag))
    }

    unsafe fn irecv(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
        source: Rank,
        tag: Tag,
    ) -> Result<RawRequest, ErrorCode> {
        self.gate("irecv")?;
        self.issue(self.inner.irecv(buf, count, datatype, source, tag))
    }

    unsafe fn iallreduce(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
        op: Op,
    ) -> Result<RawRequest, ErrorCode> {
        self.gate("iallreduce")?;
        self.issue(self.inner.iallreduce(buf, count, datatype, op))
    }

    unsafe fn iallgather(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
    ) -> Result<RawRequest, ErrorCode> {
        self.gate("iallgather")?;
        self.issue(self.inner.iallgather(buf, count, datatype))
    }

    unsafe fn iallgatherv(
        &self,
        buf: *mut u8,
        counts: &[Count],
        offsets: &[Count],
        datatype: Datatype,
    ) -> Result<RawRequest, ErrorCode> {
        self.gate("iallgatherv")?;
        self.issue(self.inner.iallgatherv(buf, counts, offsets, datatype))
    }

    fn ibarrier(&self) -> Result<RawRequest, ErrorCode> {
        self.gate("ibarrier")?;
        self.issue(self.inner.ibarrier())
    }

    fn waitall(&self, requests: &mut [RawRequest]) -> Result<(), ErrorCode> {
        self.gate("waitall")?;
        self.waits.fetch_add(1, Ordering::SeqCst);
        self.inner.waitall(requests)?;
        self.retired.fetch_add(requests.len(), Ordering::SeqCst);
        Ok(())
    }
}
