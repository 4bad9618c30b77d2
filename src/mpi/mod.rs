//! Raw bindings to the C shim in `mpi.c`. Every function returns an MPI
//! status code; `0` is success.

use libc::{c_char, c_int, c_longlong, c_void};

extern "C" {
    pub fn tm_initialized(flag: *mut c_int) -> c_int;
    pub fn tm_finalized(flag: *mut c_int) -> c_int;
    pub fn tm_init_thread(required: c_int, provided: *mut c_int) -> c_int;
    pub fn tm_query_thread(provided: *mut c_int) -> c_int;
    pub fn tm_finalize() -> c_int;
    pub fn tm_abort(code: c_int) -> c_int;
    pub fn tm_error_string(code: c_int, buffer: *mut c_char, capacity: c_int) -> c_int;
    pub fn tm_err_count() -> c_int;
    pub fn tm_comm_rank(rank: *mut c_int) -> c_int;
    pub fn tm_comm_size(size: *mut c_int) -> c_int;
    pub fn tm_probe(
        source: c_int,
        tag: c_int,
        out_source: *mut c_int,
        out_tag: *mut c_int,
        bytes: *mut c_longlong,
    ) -> c_int;
    pub fn tm_type_size(datatype: c_int, size: *mut c_int) -> c_int;
    pub fn tm_type_contiguous(count: c_int, base: c_int, out: *mut c_int) -> c_int;
    pub fn tm_isend(
        buf: *const c_void,
        count: c_int,
        datatype: c_int,
        dest: c_int,
        tag: c_int,
        request: *mut c_int,
    ) -> c_int;
    pub fn tm_irecv(
        buf: *mut c_void,
        count: c_int,
        datatype: c_int,
        source: c_int,
        tag: c_int,
        request: *mut c_int,
    ) -> c_int;
    pub fn tm_iallreduce(
        buf: *mut c_void,
        count: c_int,
        datatype: c_int,
        op: c_int,
        request: *mut c_int,
    ) -> c_int;
    pub fn tm_iallgather(buf: *mut c_void, count: c_int, datatype: c_int, request: *mut c_int) -> c_int;
    pub fn tm_iallgatherv(
        buf: *mut c_void,
        counts: *const c_int,
        offsets: *const c_int,
        datatype: c_int,
        request: *mut c_int,
    ) -> c_int;
    pub fn tm_ibarrier(request: *mut c_int) -> c_int;
    pub fn tm_waitall(count: c_int, requests: *mut c_int) -> c_int;
}
