//! A substrate whose ranks are threads of the current process.
//!
//! [`LocalGroup::run`] spawns one thread per rank and binds each thread to
//! its own [`LocalSubstrate`] endpoint. Endpoints share a set of inboxes
//! (one channel per rank) and a board where collective contributions meet.
//!
//! Sends are eager: the payload is copied into the destination inbox when the
//! send is issued and the send request is complete at once. Posted receives
//! are matched lazily, when a receive is waited on or a probe runs: pending
//! messages are handed out in arrival order, each to the earliest posted
//! receive it matches, so two receives from the same source and tag get
//! that source's messages in send order. Collectives are numbered per rank in call order; each call
//! deposits its contribution immediately and completes, at wait, once every
//! rank has deposited.

use super::{RawRequest, Status, Substrate, ANY_SOURCE, ANY_TAG};
use crate::check::ErrorCode;
use crate::datatype::Datatype;
use crate::lifecycle::ThreadSupport;
use crate::op::Op;
use crate::{Count, Rank, Tag};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::ops::Range;
use std::os::raw::{c_long, c_ulong};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::{mem, ptr, slice, thread};

const fn code(raw: i32) -> ErrorCode {
    match ErrorCode::new(raw) {
        Some(code) => code,
        None => panic!("zero is not an error code"),
    }
}

pub const ERR_BUFFER: ErrorCode = code(1);
pub const ERR_COUNT: ErrorCode = code(2);
pub const ERR_TYPE: ErrorCode = code(3);
pub const ERR_TAG: ErrorCode = code(4);
pub const ERR_RANK: ErrorCode = code(6);
pub const ERR_OP: ErrorCode = code(9);
pub const ERR_TRUNCATE: ErrorCode = code(14);
pub const ERR_OTHER: ErrorCode = code(15);
pub const ERR_REQUEST: ErrorCode = code(19);
pub const ERR_NOT_ACTIVE: ErrorCode = code(64);

fn describe(code: i32) -> Option<&'static str> {
    let text = match code {
        1 => "invalid buffer pointer",
        2 => "invalid count argument",
        3 => "invalid datatype",
        4 => "invalid tag",
        6 => "invalid rank",
        9 => "invalid reduce operation",
        14 => "message truncated",
        15 => "collective calls do not match across ranks",
        19 => "invalid request",
        64 => "substrate is not initialized or already finalized",
        _ => return None,
    };
    Some(text)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Derived descriptors, shared by every local group in the process so a
/// descriptor built on one rank is valid on all of them.
static DERIVED: Mutex<Vec<(usize, Datatype)>> = Mutex::new(Vec::new());

/// The primitive a descriptor is made of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scalar {
    Byte,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    LongDouble,
}

impl Scalar {
    fn size(self) -> usize {
        match self {
            Scalar::Byte | Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::I64 | Scalar::U64 | Scalar::F64 => 8,
            Scalar::LongDouble => 16,
        }
    }

    fn signed_of_size(size: usize) -> Self {
        if size == 4 {
            Scalar::I32
        } else {
            Scalar::I64
        }
    }

    fn unsigned_of_size(size: usize) -> Self {
        if size == 4 {
            Scalar::U32
        } else {
            Scalar::U64
        }
    }
}

/// Resolves a descriptor to its primitive and the number of primitives per
/// element.
fn layout(datatype: Datatype) -> Result<(Scalar, usize), ErrorCode> {
    let scalar = match datatype {
        Datatype::BYTE => Scalar::Byte,
        Datatype::CHAR => Scalar::I8,
        Datatype::SHORT => Scalar::I16,
        Datatype::INT => Scalar::I32,
        Datatype::LONG => Scalar::signed_of_size(mem::size_of::<c_long>()),
        Datatype::LONG_LONG => Scalar::I64,
        Datatype::UNSIGNED_CHAR => Scalar::U8,
        Datatype::UNSIGNED_SHORT => Scalar::U16,
        Datatype::UNSIGNED => Scalar::U32,
        Datatype::UNSIGNED_LONG => Scalar::unsigned_of_size(mem::size_of::<c_ulong>()),
        Datatype::FLOAT => Scalar::F32,
        Datatype::DOUBLE => Scalar::F64,
        Datatype::LONG_DOUBLE => Scalar::LongDouble,
        derived => {
            let index = derived
                .as_raw()
                .checked_sub(Datatype::FIRST_DERIVED)
                .and_then(|index| usize::try_from(index).ok())
                .ok_or(ERR_TYPE)?;
            let (count, base) = lock(&DERIVED).get(index).copied().ok_or(ERR_TYPE)?;
            let (scalar, per_base) = layout(base)?;
            return Ok((scalar, per_base * count));
        }
    };
    Ok((scalar, 1))
}

fn element_size(datatype: Datatype) -> Result<usize, ErrorCode> {
    layout(datatype).map(|(scalar, count)| scalar.size() * count)
}

fn byte_len(count: Count, datatype: Datatype) -> Result<usize, ErrorCode> {
    let count = usize::try_from(count).map_err(|_| ERR_COUNT)?;
    Ok(count * element_size(datatype)?)
}

fn fold<const N: usize>(acc: &mut [u8], other: &[u8], f: impl Fn([u8; N], [u8; N]) -> [u8; N]) {
    for (a, b) in acc.chunks_exact_mut(N).zip(other.chunks_exact(N)) {
        let mut x = [0; N];
        let mut y = [0; N];
        x.copy_from_slice(a);
        y.copy_from_slice(b);
        a.copy_from_slice(&f(x, y));
    }
}

macro_rules! fold_integers {
    ($t:ty, $op:expr, $acc:expr, $other:expr) => {{
        const N: usize = mem::size_of::<$t>();
        let f: fn($t, $t) -> $t = match $op {
            Op::Sum => |x: $t, y: $t| x.wrapping_add(y),
            Op::Prod => |x: $t, y: $t| x.wrapping_mul(y),
            Op::Min => |x: $t, y: $t| x.min(y),
            Op::Max => |x: $t, y: $t| x.max(y),
            Op::Band => |x: $t, y: $t| x & y,
            Op::Bor => |x: $t, y: $t| x | y,
            Op::Bxor => |x: $t, y: $t| x ^ y,
            Op::Land => |x: $t, y: $t| (x != 0 && y != 0) as $t,
            Op::Lor => |x: $t, y: $t| (x != 0 || y != 0) as $t,
            Op::Lxor => |x: $t, y: $t| ((x != 0) != (y != 0)) as $t,
        };
        fold::<N>($acc, $other, |a, b| {
            f(<$t>::from_ne_bytes(a), <$t>::from_ne_bytes(b)).to_ne_bytes()
        });
    }};
}

macro_rules! fold_floats {
    ($t:ty, $op:expr, $acc:expr, $other:expr) => {{
        const N: usize = mem::size_of::<$t>();
        let f: fn($t, $t) -> $t = match $op {
            Op::Sum => |x: $t, y: $t| x + y,
            Op::Prod => |x: $t, y: $t| x * y,
            Op::Min => |x: $t, y: $t| x.min(y),
            Op::Max => |x: $t, y: $t| x.max(y),
            _ => return Err(ERR_OP),
        };
        fold::<N>($acc, $other, |a, b| {
            f(<$t>::from_ne_bytes(a), <$t>::from_ne_bytes(b)).to_ne_bytes()
        });
    }};
}

/// Combines `other` into `acc` element-wise. Called with empty slices it
/// only checks that `op` applies to `scalar`.
fn reduce(scalar: Scalar, op: Op, acc: &mut [u8], other: &[u8]) -> Result<(), ErrorCode> {
    if acc.len() != other.len() {
        return Err(ERR_COUNT);
    }
    match scalar {
        Scalar::Byte => match op {
            Op::Band | Op::Bor | Op::Bxor => fold_integers!(u8, op, acc, other),
            _ => return Err(ERR_OP),
        },
        Scalar::I8 => fold_integers!(i8, op, acc, other),
        Scalar::I16 => fold_integers!(i16, op, acc, other),
        Scalar::I32 => fold_integers!(i32, op, acc, other),
        Scalar::I64 => fold_integers!(i64, op, acc, other),
        Scalar::U8 => fold_integers!(u8, op, acc, other),
        Scalar::U16 => fold_integers!(u16, op, acc, other),
        Scalar::U32 => fold_integers!(u32, op, acc, other),
        Scalar::U64 => fold_integers!(u64, op, acc, other),
        Scalar::F32 => fold_floats!(f32, op, acc, other),
        Scalar::F64 => fold_floats!(f64, op, acc, other),
        Scalar::LongDouble => return Err(ERR_TYPE),
    }
    Ok(())
}

struct Envelope {
    source: Rank,
    tag: Tag,
    payload: Vec<u8>,
}

impl Envelope {
    fn matches(&self, source: Rank, tag: Tag) -> bool {
        (source == ANY_SOURCE || self.source == source) && (tag == ANY_TAG || self.tag == tag)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Allreduce,
    Allgather,
    Barrier,
}

struct Collective {
    kind: Kind,
    contributions: Vec<Option<Vec<u8>>>,
    retired: usize,
}

struct Shared {
    size: usize,
    ceiling: ThreadSupport,
    inboxes: Vec<Sender<Envelope>>,
    board: Mutex<HashMap<u64, Collective>>,
    arrived: Condvar,
}

/// A caller-owned buffer, kept valid by the caller until its request is
/// waited on.
struct Buffer(*mut u8);

unsafe impl Send for Buffer {}

/// A receive that has been posted but not yet given a message.
struct Posted {
    id: i32,
    buf: Buffer,
    capacity: usize,
    source: Rank,
    tag: Tag,
}

/// Receive matching for one endpoint. Messages are handed out in arrival
/// order, each to the earliest posted receive it matches, so receives
/// complete in posting order whatever order they are waited in.
#[derive(Default)]
struct Mailbox {
    undelivered: Vec<Envelope>,
    posted: Vec<Posted>,
    matched: HashMap<i32, Result<(), ErrorCode>>,
}

impl Mailbox {
    fn deliver(&mut self) {
        let mut index = 0;
        while index < self.undelivered.len() {
            let envelope = &self.undelivered[index];
            let Some(slot) = self
                .posted
                .iter()
                .position(|p| envelope.matches(p.source, p.tag))
            else {
                index += 1;
                continue;
            };
            let envelope = self.undelivered.remove(index);
            let posted = self.posted.remove(slot);
            let result = if envelope.payload.len() > posted.capacity {
                Err(ERR_TRUNCATE)
            } else {
                unsafe { copy_into(posted.buf.0, 0, &envelope.payload) };
                Ok(())
            };
            self.matched.insert(posted.id, result);
        }
    }
}

enum Pending {
    Complete,
    Recv,
    Reduce {
        seq: u64,
        buf: Buffer,
        scalar: Scalar,
        op: Op,
    },
    Gather {
        seq: u64,
        buf: Buffer,
        blocks: Vec<Range<usize>>,
    },
    Barrier {
        seq: u64,
    },
}

#[derive(Clone, Copy, Debug)]
enum Lifecycle {
    Fresh,
    Active(ThreadSupport),
    Finalized(ThreadSupport),
}

/// Builds a group of in-process ranks.
#[derive(Clone, Copy, Debug)]
pub struct LocalGroup {
    size: usize,
    ceiling: ThreadSupport,
}

impl LocalGroup {
    /// A group of `size` ranks. Panics if `size` is zero or does not fit a
    /// rank.
    ///
    /// Thread support is capped at [`ThreadSupport::Funneled`]: each endpoint
    /// is bound to its rank's thread only.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a group needs at least one rank");
        assert!(Rank::try_from(size).is_ok(), "group size {} is too large", size);
        Self {
            size,
            ceiling: ThreadSupport::Funneled,
        }
    }

    /// Sets the highest thread support granted at init. Above `Funneled`,
    /// other threads of a rank must bind its endpoint themselves, see
    /// [`with_substrate`](super::with_substrate).
    pub fn thread_support(mut self, ceiling: ThreadSupport) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// One endpoint per rank, in rank order, all sharing one group.
    pub fn endpoints(&self) -> Vec<LocalSubstrate> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..self.size).map(|_| crossbeam_channel::unbounded()).unzip();
        let shared = Arc::new(Shared {
            size: self.size,
            ceiling: self.ceiling,
            inboxes: senders,
            board: Mutex::new(HashMap::new()),
            arrived: Condvar::new(),
        });
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalSubstrate {
                rank: rank as Rank,
                shared: shared.clone(),
                inbox,
                mailbox: Mutex::new(Mailbox::default()),
                pending: Mutex::new(HashMap::new()),
                next_request: AtomicI32::new(0),
                next_collective: AtomicU64::new(0),
                state: Mutex::new(Lifecycle::Fresh),
            })
            .collect()
    }

    /// Runs `f` once per rank, each on its own thread bound to that rank's
    /// endpoint, and returns the results in rank order. A panic on any rank
    /// is resumed on the calling thread.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(Rank) -> R + Sync,
        R: Send,
    {
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .endpoints()
                .into_iter()
                .map(|endpoint| {
                    let rank = endpoint.rank;
                    thread::Builder::new()
                        .name(format!("rank-{}", rank))
                        .spawn_scoped(scope, move || {
                            super::with_substrate(Arc::new(endpoint), || f(rank))
                        })
                        .unwrap_or_else(|e| panic!("failed to spawn rank {}: {}", rank, e))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

/// One rank of a [`LocalGroup`].
pub struct LocalSubstrate {
    rank: Rank,
    shared: Arc<Shared>,
    inbox: Receiver<Envelope>,
    mailbox: Mutex<Mailbox>,
    pending: Mutex<HashMap<i32, Pending>>,
    next_request: AtomicI32,
    next_collective: AtomicU64,
    state: Mutex<Lifecycle>,
}

impl LocalSubstrate {
    /// The only rank of a one-rank group.
    pub fn single() -> Self {
        let mut endpoints = LocalGroup::new(1).endpoints();
        endpoints.remove(0)
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    fn active(&self) -> Result<(), ErrorCode> {
        match *lock(&self.state) {
            Lifecycle::Active(_) => Ok(()),
            _ => Err(ERR_NOT_ACTIVE),
        }
    }

    fn check_rank(&self, rank: Rank, any: bool) -> Result<(), ErrorCode> {
        let valid = usize::try_from(rank).map_or(false, |r| r < self.shared.size);
        if valid || (any && rank == ANY_SOURCE) {
            Ok(())
        } else {
            Err(ERR_RANK)
        }
    }

    fn check_tag(tag: Tag, any: bool) -> Result<(), ErrorCode> {
        if tag >= 0 || (any && tag == ANY_TAG) {
            Ok(())
        } else {
            Err(ERR_TAG)
        }
    }

    fn register(&self, pending: Pending) -> RawRequest {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        lock(&self.pending).insert(id, pending);
        RawRequest(id)
    }

    /// Blocks until posted receive `id` has been given a message.
    fn receive(&self, id: i32) -> Result<(), ErrorCode> {
        let mut mailbox = lock(&self.mailbox);
        loop {
            mailbox.deliver();
            if let Some(result) = mailbox.matched.remove(&id) {
                return result;
            }
            let envelope = self.inbox.recv().map_err(|_| ERR_OTHER)?;
            mailbox.undelivered.push(envelope);
        }
    }

    fn deposit(&self, kind: Kind, contribution: Vec<u8>) -> Result<u64, ErrorCode> {
        let seq = self.next_collective.fetch_add(1, Ordering::Relaxed);
        let size = self.shared.size;
        let mut board = lock(&self.shared.board);
        let collective = board.entry(seq).or_insert_with(|| Collective {
            kind,
            contributions: vec![None; size],
            retired: 0,
        });
        if collective.kind != kind {
            return Err(ERR_OTHER);
        }
        collective.contributions[self.rank as usize] = Some(contribution);
        self.shared.arrived.notify_all();
        Ok(seq)
    }

    /// Blocks until every rank has deposited into collective `seq`, then
    /// returns the contributions in rank order.
    fn finish(&self, seq: u64) -> Result<Vec<Vec<u8>>, ErrorCode> {
        let size = self.shared.size;
        let mut board = lock(&self.shared.board);
        loop {
            let collective = board.get_mut(&seq).ok_or(ERR_REQUEST)?;
            if collective.contributions.iter().all(Option::is_some) {
                let contributions = collective.contributions.iter().flatten().cloned().collect();
                collective.retired += 1;
                if collective.retired == size {
                    board.remove(&seq);
                }
                return Ok(contributions);
            }
            board = self
                .shared
                .arrived
                .wait(board)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn complete(&self, id: i32, pending: Pending) -> Result<(), ErrorCode> {
        match pending {
            Pending::Complete => Ok(()),
            Pending::Recv => self.receive(id),
            Pending::Reduce {
                seq,
                buf,
                scalar,
                op,
            } => {
                let contributions = self.finish(seq)?;
                let mut rest = contributions.into_iter();
                let mut acc = rest.next().unwrap_or_default();
                for other in rest {
                    reduce(scalar, op, &mut acc, &other)?;
                }
                unsafe { copy_into(buf.0, 0, &acc) };
                Ok(())
            }
            Pending::Gather { seq, buf, blocks } => {
                let contributions = self.finish(seq)?;
                for (block, contribution) in blocks.iter().zip(&contributions) {
                    if block.len() != contribution.len() {
                        return Err(ERR_TRUNCATE);
                    }
                }
                for (block, contribution) in blocks.iter().zip(&contributions) {
                    unsafe { copy_into(buf.0, block.start, contribution) };
                }
                Ok(())
            }
            Pending::Barrier { seq } => self.finish(seq).map(drop),
        }
    }

    unsafe fn gather(
        &self,
        buf: *mut u8,
        blocks: Vec<Range<usize>>,
    ) -> Result<RawRequest, ErrorCode> {
        let own = &blocks[self.rank as usize];
        let contribution = if own.is_empty() {
            Vec::new()
        } else {
            slice::from_raw_parts(buf.add(own.start), own.len()).to_vec()
        };
        let seq = self.deposit(Kind::Allgather, contribution)?;
        Ok(self.register(Pending::Gather {
            seq,
            buf: Buffer(buf),
            blocks,
        }))
    }
}

unsafe fn copy_into(buf: *mut u8, offset: usize, bytes: &[u8]) {
    if !bytes.is_empty() {
        ptr::copy_nonoverlapping(bytes.as_ptr(), buf.add(offset), bytes.len());
    }
}

unsafe fn copy_from(buf: *const u8, len: usize) -> Vec<u8> {
    if len == 0 {
        Vec::new()
    } else {
        slice::from_raw_parts(buf, len).to_vec()
    }
}

impl Substrate for LocalSubstrate {
    fn initialized(&self) -> Result<bool, ErrorCode> {
        Ok(!matches!(*lock(&self.state), Lifecycle::Fresh))
    }

    fn finalized(&self) -> Result<bool, ErrorCode> {
        Ok(matches!(*lock(&self.state), Lifecycle::Finalized(_)))
    }

    fn init_thread(&self, required: ThreadSupport) -> Result<ThreadSupport, ErrorCode> {
        let mut state = lock(&self.state);
        match *state {
            Lifecycle::Fresh => {
                let granted = required.min(self.shared.ceiling);
                *state = Lifecycle::Active(granted);
                Ok(granted)
            }
            _ => Err(ERR_OTHER),
        }
    }

    fn query_thread(&self) -> Result<ThreadSupport, ErrorCode> {
        match *lock(&self.state) {
            Lifecycle::Active(level) | Lifecycle::Finalized(level) => Ok(level),
            Lifecycle::Fresh => Err(ERR_NOT_ACTIVE),
        }
    }

    fn finalize(&self) -> Result<(), ErrorCode> {
        let mut state = lock(&self.state);
        match *state {
            Lifecycle::Active(level) => {
                *state = Lifecycle::Finalized(level);
                Ok(())
            }
            _ => Err(ERR_NOT_ACTIVE),
        }
    }

    fn abort(&self, code: i32) -> i32 {
        let status = if (1..=255).contains(&code) { code } else { 1 };
        std::process::exit(status)
    }

    fn error_string(&self, code: i32) -> Option<String> {
        describe(code).map(String::from)
    }

    fn comm_rank(&self) -> Result<Rank, ErrorCode> {
        self.active()?;
        Ok(self.rank)
    }

    fn comm_size(&self) -> Result<Count, ErrorCode> {
        self.active()?;
        Ok(self.shared.size as Count)
    }

    fn probe(&self, source: Rank, tag: Tag) -> Result<Status, ErrorCode> {
        self.active()?;
        self.check_rank(source, true)?;
        Self::check_tag(tag, true)?;
        let mut mailbox = lock(&self.mailbox);
        loop {
            mailbox.deliver();
            if let Some(envelope) = mailbox.undelivered.iter().find(|e| e.matches(source, tag)) {
                return Ok(Status {
                    source: envelope.source,
                    tag: envelope.tag,
                    bytes: envelope.payload.len(),
                });
            }
            let envelope = self.inbox.recv().map_err(|_| ERR_OTHER)?;
            mailbox.undelivered.push(envelope);
        }
    }

    fn get_count(&self, status: &Status, datatype: Datatype) -> Result<usize, ErrorCode> {
        let size = element_size(datatype)?;
        if size == 0 {
            return Ok(0);
        }
        if status.bytes % size != 0 {
            return Err(ERR_COUNT);
        }
        Ok(status.bytes / size)
    }

    fn type_size(&self, datatype: Datatype) -> Result<usize, ErrorCode> {
        element_size(datatype)
    }

    fn type_contiguous(&self, count: Count, base: Datatype) -> Result<Datatype, ErrorCode> {
        let count = usize::try_from(count).map_err(|_| ERR_COUNT)?;
        layout(base)?;
        let mut derived = lock(&DERIVED);
        let raw = Datatype::FIRST_DERIVED
            .checked_add(derived.len() as i32)
            .ok_or(ERR_TYPE)?;
        derived.push((count, base));
        Ok(Datatype::from_raw(raw))
    }

    unsafe fn isend(
        &self,
        buf: *const u8,
        count: Count,
        datatype: Datatype,
        dest: Rank,
        tag: Tag,
    ) -> Result<RawRequest, ErrorCode> {
        self.active()?;
        self.check_rank(dest, false)?;
        Self::check_tag(tag, false)?;
        let len = byte_len(count, datatype)?;
        if buf.is_null() && len > 0 {
            return Err(ERR_BUFFER);
        }
        let envelope = Envelope {
            source: self.rank,
            tag,
            payload: copy_from(buf, len),
        };
        self.shared.inboxes[dest as usize]
            .send(envelope)
            .map_err(|_| ERR_OTHER)?;
        Ok(self.register(Pending::Complete))
    }

    unsafe fn irecv(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
        source: Rank,
        tag: Tag,
    ) -> Result<RawRequest, ErrorCode> {
        self.active()?;
        self.check_rank(source, true)?;
        Self::check_tag(tag, true)?;
        let capacity = byte_len(count, datatype)?;
        if buf.is_null() && capacity > 0 {
            return Err(ERR_BUFFER);
        }
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        lock(&self.mailbox).posted.push(Posted {
            id,
            buf: Buffer(buf),
            capacity,
            source,
            tag,
        });
        lock(&self.pending).insert(id, Pending::Recv);
        Ok(RawRequest(id))
    }

    unsafe fn iallreduce(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
        op: Op,
    ) -> Result<RawRequest, ErrorCode> {
        self.active()?;
        let (scalar, _) = layout(datatype)?;
        reduce(scalar, op, &mut [], &[])?;
        let len = byte_len(count, datatype)?;
        let seq = self.deposit(Kind::Allreduce, copy_from(buf, len))?;
        Ok(self.register(Pending::Reduce {
            seq,
            buf: Buffer(buf),
            scalar,
            op,
        }))
    }

    unsafe fn iallgather(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
    ) -> Result<RawRequest, ErrorCode> {
        self.active()?;
        let block = byte_len(count, datatype)?;
        let blocks = (0..self.shared.size)
            .map(|rank| rank * block..(rank + 1) * block)
            .collect();
        self.gather(buf, blocks)
    }

    unsafe fn iallgatherv(
        &self,
        buf: *mut u8,
        counts: &[Count],
        offsets: &[Count],
        datatype: Datatype,
    ) -> Result<RawRequest, ErrorCode> {
        self.active()?;
        let size = self.shared.size;
        if counts.len() < size || offsets.len() < size {
            return Err(ERR_COUNT);
        }
        let element = element_size(datatype)?;
        let blocks = counts[..size]
            .iter()
            .zip(&offsets[..size])
            .map(|(&count, &offset)| {
                let start = byte_len(offset, datatype)?;
                let len = usize::try_from(count).map_err(|_| ERR_COUNT)? * element;
                Ok(start..start + len)
            })
            .collect::<Result<Vec<_>, ErrorCode>>()?;
        self.gather(buf, blocks)
    }

    fn ibarrier(&self) -> Result<RawRequest, ErrorCode> {
        self.active()?;
        let seq = self.deposit(Kind::Barrier, Vec::new())?;
        Ok(self.register(Pending::Barrier { seq }))
    }

    fn waitall(&self, requests: &mut [RawRequest]) -> Result<(), ErrorCode> {
        self.active()?;
        for request in requests.iter() {
            let pending = lock(&self.pending)
                .remove(&request.0)
                .ok_or(ERR_REQUEST)?;
            self.complete(request.0, pending)?;
        }
        Ok(())
    }
}
