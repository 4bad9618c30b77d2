use super::{RawRequest, Status, Substrate};
use crate::check::ErrorCode;
use crate::datatype::Datatype;
use crate::lifecycle::ThreadSupport;
use crate::mpi as ffi;
use crate::op::Op;
use crate::{Count, Rank, Tag};
use libc::{c_char, c_int};
use std::ffi::CStr;

const ERROR_STRING_CAPACITY: usize = 512;

const UNKNOWN_COUNT_ERROR: ErrorCode = match ErrorCode::new(-1) {
    Some(code) => code,
    None => panic!(),
};

/// The process's MPI library, addressed through `MPI_COMM_WORLD`.
///
/// Failures are reported as status codes: after initialization the world
/// communicator's error handler is set to `MPI_ERRORS_RETURN`.
#[derive(Debug, Default)]
pub struct MpiSubstrate {
    _private: (),
}

impl MpiSubstrate {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// `MPI_ERR_COUNT`, for failures detected on this side of the shim.
    fn count_error(&self) -> ErrorCode {
        let code = unsafe { ffi::tm_err_count() };
        ErrorCode::new(code).unwrap_or(UNKNOWN_COUNT_ERROR)
    }
}

fn thread_support(raw: c_int) -> ThreadSupport {
    ThreadSupport::from_raw(raw).unwrap_or(ThreadSupport::Single)
}

fn request(status: c_int, raw: c_int) -> Result<RawRequest, ErrorCode> {
    ErrorCode::check(status).map(|_| RawRequest(raw))
}

impl Substrate for MpiSubstrate {
    fn initialized(&self) -> Result<bool, ErrorCode> {
        let mut flag = 0;
        ErrorCode::check(unsafe { ffi::tm_initialized(&mut flag) })?;
        Ok(flag != 0)
    }

    fn finalized(&self) -> Result<bool, ErrorCode> {
        let mut flag = 0;
        ErrorCode::check(unsafe { ffi::tm_finalized(&mut flag) })?;
        Ok(flag != 0)
    }

    fn init_thread(&self, required: ThreadSupport) -> Result<ThreadSupport, ErrorCode> {
        let mut provided = 0;
        ErrorCode::check(unsafe { ffi::tm_init_thread(required.as_raw(), &mut provided) })?;
        Ok(thread_support(provided))
    }

    fn query_thread(&self) -> Result<ThreadSupport, ErrorCode> {
        let mut provided = 0;
        ErrorCode::check(unsafe { ffi::tm_query_thread(&mut provided) })?;
        Ok(thread_support(provided))
    }

    fn finalize(&self) -> Result<(), ErrorCode> {
        ErrorCode::check(unsafe { ffi::tm_finalize() })
    }

    fn abort(&self, code: i32) -> i32 {
        unsafe { ffi::tm_abort(code) }
    }

    fn error_string(&self, code: i32) -> Option<String> {
        let mut buffer = [0 as c_char; ERROR_STRING_CAPACITY];
        let status = unsafe {
            ffi::tm_error_string(code, buffer.as_mut_ptr(), ERROR_STRING_CAPACITY as c_int)
        };
        if status != 0 {
            return None;
        }
        let text = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        Some(text.to_string_lossy().into_owned())
    }

    fn comm_rank(&self) -> Result<Rank, ErrorCode> {
        let mut rank = 0;
        ErrorCode::check(unsafe { ffi::tm_comm_rank(&mut rank) })?;
        Ok(rank)
    }

    fn comm_size(&self) -> Result<Count, ErrorCode> {
        let mut size = 0;
        ErrorCode::check(unsafe { ffi::tm_comm_size(&mut size) })?;
        Ok(size)
    }

    fn probe(&self, source: Rank, tag: Tag) -> Result<Status, ErrorCode> {
        let (mut out_source, mut out_tag, mut bytes) = (0, 0, 0);
        ErrorCode::check(unsafe {
            ffi::tm_probe(source, tag, &mut out_source, &mut out_tag, &mut bytes)
        })?;
        Ok(Status {
            source: out_source,
            tag: out_tag,
            bytes: usize::try_from(bytes).unwrap_or(0),
        })
    }

    fn get_count(&self, status: &Status, datatype: Datatype) -> Result<usize, ErrorCode> {
        let size = self.type_size(datatype)?;
        if size == 0 {
            return Ok(0);
        }
        if status.bytes % size != 0 {
            return Err(self.count_error());
        }
        Ok(status.bytes / size)
    }

    fn type_size(&self, datatype: Datatype) -> Result<usize, ErrorCode> {
        let mut size = 0;
        ErrorCode::check(unsafe { ffi::tm_type_size(datatype.as_raw(), &mut size) })?;
        Ok(usize::try_from(size).unwrap_or(0))
    }

    fn type_contiguous(&self, count: Count, base: Datatype) -> Result<Datatype, ErrorCode> {
        let mut raw = 0;
        ErrorCode::check(unsafe { ffi::tm_type_contiguous(count, base.as_raw(), &mut raw) })?;
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
        let mut raw = 0;
        let status = ffi::tm_isend(buf.cast(), count, datatype.as_raw(), dest, tag, &mut raw);
        request(status, raw)
    }

    unsafe fn irecv(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
        source: Rank,
        tag: Tag,
    ) -> Result<RawRequest, ErrorCode> {
        let mut raw = 0;
        let status = ffi::tm_irecv(buf.cast(), count, datatype.as_raw(), source, tag, &mut raw);
        request(status, raw)
    }

    unsafe fn iallreduce(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
        op: Op,
    ) -> Result<RawRequest, ErrorCode> {
        let mut raw = 0;
        let status = ffi::tm_iallreduce(buf.cast(), count, datatype.as_raw(), op.as_raw(), &mut raw);
        request(status, raw)
    }

    unsafe fn iallgather(
        &self,
        buf: *mut u8,
        count: Count,
        datatype: Datatype,
    ) -> Result<RawRequest, ErrorCode> {
        let mut raw = 0;
        let status = ffi::tm_iallgather(buf.cast(), count, datatype.as_raw(), &mut raw);
        request(status, raw)
    }

    unsafe fn iallgatherv(
        &self,
        buf: *mut u8,
        counts: &[Count],
        offsets: &[Count],
        datatype: Datatype,
    ) -> Result<RawRequest, ErrorCode> {
        let mut raw = 0;
        let status = ffi::tm_iallgatherv(
            buf.cast(),
            counts.as_ptr(),
            offsets.as_ptr(),
            datatype.as_raw(),
            &mut raw,
        );
        request(status, raw)
    }

    fn ibarrier(&self) -> Result<RawRequest, ErrorCode> {
        let mut raw = 0;
        let status = unsafe { ffi::tm_ibarrier(&mut raw) };
        request(status, raw)
    }

    fn waitall(&self, requests: &mut [RawRequest]) -> Result<(), ErrorCode> {
        let mut raw: Vec<c_int> = requests.iter().map(|r| r.0).collect();
        let count = c_int::try_from(raw.len()).map_err(|_| self.count_error())?;
        let status = unsafe { ffi::tm_waitall(count, raw.as_mut_ptr()) };
        for (request, raw) in requests.iter_mut().zip(raw) {
            request.0 = raw;
        }
        ErrorCode::check(status)
    }
}
