mod common;

use common::Recorder;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tiny_mpi::substrate;
use tiny_mpi::{ops, Pending, Plus, ThreadSupport};

fn on_recorder(f: impl FnOnce(&Recorder)) -> Arc<Recorder> {
    let recorder = Recorder::single();
    substrate::with_substrate(recorder.clone(), || {
        let _guard = tiny_mpi::enter(ThreadSupport::Single, false);
        f(&recorder)
    });
    recorder
}

#[test]
fn bundle_retires_every_request_on_normal_exit() {
    on_recorder(|recorder| {
        let out = [1i32, 2, 3];
        let mut back = [0i32; 3];
        let mut total = 5u32;
        {
            let bundle = Pending::new([
                ops::recv(&mut back, 0, 1),
                ops::send(&out, 0, 1),
                ops::allreduce_value(&mut total, Plus),
            ]);
            assert_eq!(bundle.len(), 3);
            assert_eq!(recorder.outstanding(), 3);
        }
        assert_eq!(recorder.outstanding(), 0);
        assert_eq!(recorder.waits(), 1);
        assert_eq!(back, out);
        assert_eq!(total, 5);
    });
}

fn exchange(out: &[i32], back: &mut [i32], stop: bool) -> Result<(), &'static str> {
    let _bundle = Pending::new([ops::recv(back, 0, 2), ops::send(out, 0, 2)]);
    if stop {
        Err::<(), _>("stopped early")?;
    }
    Ok(())
}

#[test]
fn bundle_retires_every_request_on_early_return() {
    on_recorder(|recorder| {
        let out = [4i32, 5];
        let mut back = [0i32; 2];
        assert_eq!(exchange(&out, &mut back, true), Err("stopped early"));
        assert_eq!(recorder.issued(), 2);
        assert_eq!(recorder.outstanding(), 0);
        assert_eq!(back, out);

        assert_eq!(exchange(&out, &mut back, false), Ok(()));
        assert_eq!(recorder.outstanding(), 0);
    });
}

#[test]
fn bundle_retires_every_request_on_unwind() {
    on_recorder(|recorder| {
        let out = [6i32, 7];
        let mut back = [0i32; 2];
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _bundle = Pending::new([ops::recv(&mut back, 0, 3), ops::send(&out, 0, 3)]);
            panic!("unwinding with requests in flight");
        }));
        assert!(result.is_err());
        assert_eq!(recorder.issued(), 2);
        assert_eq!(recorder.outstanding(), 0);
        assert_eq!(back, out);
    });
}

#[test]
fn wait_macro_retires_named_requests_together() {
    on_recorder(|recorder| {
        let out = [0.5f64; 4];
        let mut back = [0.0f64; 4];
        let recv = ops::recv(&mut back, 0, 4);
        let send = ops::send(&out, 0, 4);
        tiny_mpi::wait!(recv, send);
        assert_eq!(recorder.waits(), 1);
        assert_eq!(recorder.outstanding(), 0);
        assert_eq!(back, out);
    });
}

#[test]
fn dropping_a_pending_request_waits_on_it() {
    on_recorder(|recorder| {
        let out = [9u8; 16];
        let mut back = [0u8; 16];
        {
            let _recv = ops::recv(&mut back, 0, 5);
            ops::send(&out, 0, 5).wait();
            assert_eq!(recorder.outstanding(), 1);
        }
        assert_eq!(recorder.outstanding(), 0);
        assert_eq!(back, out);
    });
}

#[test]
fn retired_requests_are_skipped() {
    on_recorder(|recorder| {
        let out = [1i16];
        let mut requests = [ops::send(&out, 0, 6)];
        tiny_mpi::wait(&mut requests);
        assert!(!requests[0].is_pending());
        assert!(requests[0].raw().is_none());

        tiny_mpi::wait(&mut requests);
        tiny_mpi::wait(&mut []);
        assert_eq!(recorder.waits(), 1);

        let mut back = [0i16];
        ops::recv(&mut back, 0, 6).wait();
        assert_eq!(back, out);
    });
}

#[test]
fn issuing_does_not_block_on_a_missing_peer() {
    on_recorder(|recorder| {
        let out = [3i32];
        let request = ops::send(&out, 0, 8);
        assert!(request.is_pending());
        request.wait();
        assert_eq!(recorder.outstanding(), 0);
        assert_eq!(ops::probe::<i32>(0, 8), 1);
        let mut back = [0i32];
        ops::recv(&mut back, 0, 8).wait();
    });
}
