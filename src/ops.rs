//! Typed operations on the default group.
//!
//! Each operation resolves its descriptors, issues exactly one substrate call
//! through [`crate::check`], and returns a [`Request`] borrowing the buffers
//! involved. Only [`probe`] and the waits in [`crate::request`] block.
//!
//! Element types either have a wire descriptor ([`WireType`]) and are counted
//! in elements, or are plain data (`zerocopy::AsBytes + FromBytes`) and go
//! through the `*_bytes` forms, which move `len * size_of::<T>()` bytes under
//! [`Datatype::BYTE`] and count in bytes.

use crate::check::{self, ErrorCode};
use crate::datatype::{count_of, Datatype, WireType};
use crate::op::Reduction;
use crate::request::Request;
use crate::substrate::{self, RawRequest, Substrate};
use crate::{Count, Rank, Tag};
use std::panic::Location;
use zerocopy::{AsBytes, FromBytes};

/// Blocks until a message from `source` with `tag` can be received and
/// returns how many `T` elements it holds. The message is not consumed.
///
/// A message whose length is not a whole number of `T` elements is a failed
/// `MPI_Get_count` and aborts the process, where MPI itself would report the
/// count as undefined. Use [`probe_bytes`] when the length is not known to
/// be a multiple.
#[track_caller]
pub fn probe<T: WireType>(source: Rank, tag: Tag) -> usize {
    probe_at(Location::caller(), source, tag, T::datatype())
}

/// Like [`probe`], counting bytes. Divide by `size_of::<T>()` to get the
/// element count of a message sent with [`send_bytes`].
#[track_caller]
pub fn probe_bytes(source: Rank, tag: Tag) -> usize {
    probe_at(Location::caller(), source, tag, Datatype::BYTE)
}

/// Like [`probe`], counting elements of an explicit descriptor.
#[track_caller]
pub fn probe_datatype(source: Rank, tag: Tag, datatype: Datatype) -> usize {
    probe_at(Location::caller(), source, tag, datatype)
}

fn probe_at(location: &Location<'_>, source: Rank, tag: Tag, datatype: Datatype) -> usize {
    let status = check::call(location, "MPI_Probe", |s| s.probe(source, tag));
    check::call(location, "MPI_Get_count", |s| s.get_count(&status, datatype))
}

/// Starts sending `buf` to rank `to`.
#[track_caller]
pub fn send<T: WireType>(buf: &[T], to: Rank, tag: Tag) -> Request<'_> {
    let location = Location::caller();
    unsafe { isend_at(location, buf.as_ptr().cast(), buf.len(), T::datatype(), to, tag) }
}

/// Starts sending the bytes of `buf` to rank `to`.
#[track_caller]
pub fn send_bytes<T: AsBytes>(buf: &[T], to: Rank, tag: Tag) -> Request<'_> {
    let location = Location::caller();
    let bytes = buf.as_bytes();
    unsafe { isend_at(location, bytes.as_ptr(), bytes.len(), Datatype::BYTE, to, tag) }
}

/// Starts receiving up to `buf.len()` elements from rank `from` into `buf`.
#[track_caller]
pub fn recv<T: WireType>(buf: &mut [T], from: Rank, tag: Tag) -> Request<'_> {
    let location = Location::caller();
    unsafe { irecv_at(location, buf.as_mut_ptr().cast(), buf.len(), T::datatype(), from, tag) }
}

/// Starts receiving up to `size_of_val(buf)` bytes from rank `from` into
/// `buf`.
#[track_caller]
pub fn recv_bytes<T: AsBytes + FromBytes>(buf: &mut [T], from: Rank, tag: Tag) -> Request<'_> {
    let location = Location::caller();
    let bytes = buf.as_bytes_mut();
    unsafe { irecv_at(location, bytes.as_mut_ptr(), bytes.len(), Datatype::BYTE, from, tag) }
}

unsafe fn isend_at<'a>(
    location: &'static Location<'static>,
    buf: *const u8,
    len: usize,
    datatype: Datatype,
    to: Rank,
    tag: Tag,
) -> Request<'a> {
    let count = count_of(len, location);
    issue(location, "MPI_Isend", |s| s.isend(buf, count, datatype, to, tag))
}

unsafe fn irecv_at<'a>(
    location: &'static Location<'static>,
    buf: *mut u8,
    len: usize,
    datatype: Datatype,
    from: Rank,
    tag: Tag,
) -> Request<'a> {
    let count = count_of(len, location);
    issue(location, "MPI_Irecv", |s| s.irecv(buf, count, datatype, from, tag))
}

/// Starts an in-place reduction of `buf` across all ranks. On completion
/// every rank's `buf` holds the element-wise result.
#[track_caller]
pub fn allreduce<T: WireType, O: Reduction>(buf: &mut [T], op: O) -> Request<'_> {
    let location = Location::caller();
    let count = count_of(buf.len(), location);
    let ptr = buf.as_mut_ptr().cast::<u8>();
    issue(location, "MPI_Iallreduce", |s| unsafe {
        s.iallreduce(ptr, count, T::datatype(), op.wire_op())
    })
}

/// [`allreduce`] of a single value.
#[track_caller]
pub fn allreduce_value<T: WireType, O: Reduction>(value: &mut T, op: O) -> Request<'_> {
    allreduce(std::slice::from_mut(value), op)
}

/// Starts an in-place gather: rank `r` contributes the `count` elements at
/// `values[r * count..(r + 1) * count]`, and on completion every rank holds
/// all contributions.
///
/// Panics if `values` is shorter than `count` times the group size.
#[track_caller]
pub fn allgather<T: WireType>(values: &mut [T], count: usize) -> Request<'_> {
    let location = Location::caller();
    let size = group_size(location);
    assert!(
        count.checked_mul(size).map_or(false, |n| n <= values.len()),
        "{}: allgather of {} elements from {} ranks overruns a buffer of {}",
        location,
        count,
        size,
        values.len()
    );
    let count = count_of(count, location);
    let ptr = values.as_mut_ptr().cast::<u8>();
    issue(location, "MPI_Iallgather", |s| unsafe {
        s.iallgather(ptr, count, T::datatype())
    })
}

/// Starts an in-place gather where rank `r` contributes `counts[r]` elements
/// at element offset `offsets[r]` of `values`. The layout is the caller's to
/// get right; overlaps and gaps are not checked here.
///
/// Panics if `counts` or `offsets` have fewer entries than the group size,
/// hold a negative value, or describe a block past the end of `values`.
#[track_caller]
pub fn allgatherv<'a, T: WireType>(
    values: &'a mut [T],
    counts: &'a [Count],
    offsets: &'a [Count],
) -> Request<'a> {
    let location = Location::caller();
    let size = group_size(location);
    assert!(
        counts.len() >= size && offsets.len() >= size,
        "{}: allgatherv needs a count and an offset for each of {} ranks",
        location,
        size
    );
    for (rank, (&count, &offset)) in counts.iter().zip(offsets).take(size).enumerate() {
        let end = usize::try_from(count)
            .ok()
            .zip(usize::try_from(offset).ok())
            .map(|(count, offset)| count + offset);
        assert!(
            end.map_or(false, |end| end <= values.len()),
            "{}: allgatherv block of rank {} ({} at {}) lies outside a buffer of {}",
            location,
            rank,
            count,
            offset,
            values.len()
        );
    }
    let ptr = values.as_mut_ptr().cast::<u8>();
    issue(location, "MPI_Iallgatherv", |s| unsafe {
        s.iallgatherv(ptr, counts, offsets, T::datatype())
    })
}

fn group_size(location: &Location<'_>) -> usize {
    let size = check::call(location, "MPI_Comm_size", |s| s.comm_size());
    usize::try_from(size).unwrap_or(0)
}

/// Starts a barrier. It is passed only once the returned request has been
/// waited on.
#[track_caller]
pub fn barrier() -> Request<'static> {
    barrier_at(Location::caller())
}

pub(crate) fn barrier_at(location: &'static Location<'static>) -> Request<'static> {
    issue(location, "MPI_Ibarrier", |s| s.ibarrier())
}

/// Issues one request-producing call and ties the request to the substrate
/// that produced it.
fn issue<'a, F>(location: &'static Location<'static>, symbol: &str, op: F) -> Request<'a>
where
    F: FnOnce(&dyn Substrate) -> Result<RawRequest, ErrorCode>,
{
    let issuer = substrate::current();
    let raw = check::invoke(location, symbol, || op(&*issuer));
    Request::new(raw, issuer, location)
}
