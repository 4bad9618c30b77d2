//! Failure paths end the process, so each scenario runs in a child copy of
//! this test binary and the parent inspects its exit status and stderr.

mod common;

use common::{Recorder, INJECTED};
use std::env;
use std::process::{Command, Output};
use std::sync::Arc;
use tiny_mpi::substrate::{self, LocalSubstrate};
use tiny_mpi::{ops, Datatype, Plus, ThreadSupport};

const SCENARIO: &str = "TINY_MPI_FATAL_SCENARIO";

/// Runs `body` when this process is the child for `scenario`. In the parent,
/// re-runs the single test `test` in a child process selecting `scenario`
/// and returns its output. A child never spawns children of its own.
fn run_scenario(test: &str, scenario: &str, body: impl FnOnce()) -> Option<Output> {
    match env::var(SCENARIO) {
        Ok(current) if current == scenario => {
            body();
            None
        }
        Ok(_) => None,
        Err(_) => {
            let output = Command::new(env::current_exe().unwrap())
                .args([test, "--exact", "--nocapture", "--test-threads=1"])
                .env(SCENARIO, scenario)
                .output()
                .unwrap();
            Some(output)
        }
    }
}

fn in_child(name: &str, body: impl FnOnce()) -> Option<Output> {
    run_scenario(name, name, body)
}

fn stderr_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(String::from)
        .collect()
}

#[test]
fn failed_call_prints_one_line_and_aborts_the_group() {
    let output = in_child("failed_call_prints_one_line_and_aborts_the_group", || {
        substrate::with_substrate(Recorder::failing("isend", 42), || {
            let _guard = tiny_mpi::enter(ThreadSupport::Single, false);
            let out = [1i32, 2, 3];
            let _request = ops::send(&out, 0, 0);
            unreachable!("the failed send should have ended the process");
        })
    });
    let Some(output) = output else { return };

    assert_eq!(output.status.code(), Some(42));
    let lines = stderr_lines(&output);
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(lines[0].contains("fatal.rs:"), "{}", lines[0]);
    assert!(
        lines[0].ends_with(&format!(": MPI_Isend returned error {} (42)", INJECTED)),
        "{}",
        lines[0]
    );
}

#[test]
fn failed_wait_names_the_wait() {
    let output = in_child("failed_wait_names_the_wait", || {
        substrate::with_substrate(Arc::new(LocalSubstrate::single()), || {
            let _guard = tiny_mpi::enter(ThreadSupport::Single, false);
            let out = [1i32, 2];
            let mut back = [0i32; 1];
            tiny_mpi::wait!(ops::send(&out, 0, 0), ops::recv(&mut back, 0, 0));
            unreachable!("the truncated receive should have ended the process");
        })
    });
    let Some(output) = output else { return };

    assert_eq!(output.status.code(), Some(14));
    let lines = stderr_lines(&output);
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(
        lines[0].ends_with(": MPI_Waitall returned error message truncated (14)"),
        "{}",
        lines[0]
    );
}

#[test]
fn abort_before_init_exits_this_process() {
    let output = in_child("abort_before_init_exits_this_process", || {
        substrate::with_substrate(Arc::new(LocalSubstrate::single()), || {
            tiny_mpi::abort(7);
        })
    });
    let Some(output) = output else { return };

    assert_eq!(output.status.code(), Some(1));
    let lines = stderr_lines(&output);
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(
        lines[0].ends_with(": abort called with error code (7)"),
        "{}",
        lines[0]
    );
}

#[test]
fn abort_after_init_aborts_the_group() {
    let output = in_child("abort_after_init_aborts_the_group", || {
        substrate::with_substrate(Arc::new(LocalSubstrate::single()), || {
            let _guard = tiny_mpi::enter(ThreadSupport::Single, false);
            tiny_mpi::abort(3);
        })
    });
    let Some(output) = output else { return };

    assert_eq!(output.status.code(), Some(3));
    assert!(stderr_lines(&output).is_empty());
}

#[test]
fn abort_after_fini_exits_this_process() {
    let output = in_child("abort_after_fini_exits_this_process", || {
        substrate::with_substrate(Arc::new(LocalSubstrate::single()), || {
            tiny_mpi::init(ThreadSupport::Single);
            tiny_mpi::fini();
            tiny_mpi::abort(5);
        })
    });
    let Some(output) = output else { return };

    assert_eq!(output.status.code(), Some(1));
    let lines = stderr_lines(&output);
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(lines[0].ends_with(": abort called with error code (5)"), "{}", lines[0]);
}

#[test]
fn failed_rank_query_aborts_with_its_code() {
    let output = in_child("failed_rank_query_aborts_with_its_code", || {
        substrate::with_substrate(Recorder::failing("comm_rank", 21), || {
            let _guard = tiny_mpi::enter(ThreadSupport::Single, false);
            let _ = tiny_mpi::rank();
            unreachable!("the failed query should have ended the process");
        })
    });
    let Some(output) = output else { return };

    assert_eq!(output.status.code(), Some(21));
    let lines = stderr_lines(&output);
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(lines[0].contains("MPI_Comm_rank returned error"), "{}", lines[0]);
}

#[test]
fn failed_state_queries_exit_without_aborting() {
    let queries: [(&str, &str, fn() -> bool); 2] = [
        ("initialized", "MPI_Initialized", || tiny_mpi::initialized()),
        ("finalized", "MPI_Finalized", || tiny_mpi::finalized()),
    ];
    for (method, symbol, query) in queries {
        let test = "failed_state_queries_exit_without_aborting";
        let scenario = format!("{}/{}", test, method);
        let output = run_scenario(test, &scenario, || {
            substrate::with_substrate(Recorder::failing(method, 9), || {
                query();
                unreachable!("the failed query should have ended the process");
            })
        });
        let Some(output) = output else { continue };

        assert_eq!(output.status.code(), Some(1), "{}", method);
        let lines = stderr_lines(&output);
        assert_eq!(lines.len(), 1, "{:?}", lines);
        assert!(lines[0].contains("fatal.rs:"), "{}", lines[0]);
        assert!(
            lines[0].ends_with(&format!(": {} failed with (9)", symbol)),
            "{}",
            lines[0]
        );
    }
}

/// Calls the operation that reaches `method` on the substrate.
fn call_reaching(method: &str) {
    let mut values = [1i32, 2];
    match method {
        "irecv" => {
            let _request = ops::recv(&mut values, 0, 0);
        }
        "iallreduce" => {
            let _request = ops::allreduce(&mut values, Plus);
        }
        "iallgather" => {
            let _request = ops::allgather(&mut values, 1);
        }
        "iallgatherv" => {
            let _request = ops::allgatherv(&mut values, &[2], &[0]);
        }
        "ibarrier" => {
            let _request = ops::barrier();
        }
        "probe" | "get_count" => {
            ops::send(&values, 0, 0).wait();
            let _ = ops::probe::<i32>(0, 0);
        }
        "type_contiguous" => {
            let _ = Datatype::contiguous::<i32>(2);
        }
        "type_size" => {
            let _ = Datatype::INT.size();
        }
        "waitall" => ops::barrier().wait(),
        "query_thread" => {
            tiny_mpi::init(ThreadSupport::Single);
        }
        other => panic!("no operation reaches {}", other),
    }
}

#[test]
fn every_failed_call_names_its_symbol() {
    let calls = [
        ("irecv", "MPI_Irecv", 31),
        ("iallreduce", "MPI_Iallreduce", 32),
        ("iallgather", "MPI_Iallgather", 33),
        ("iallgatherv", "MPI_Iallgatherv", 34),
        ("ibarrier", "MPI_Ibarrier", 35),
        ("probe", "MPI_Probe", 36),
        ("get_count", "MPI_Get_count", 37),
        ("type_contiguous", "MPI_Type_contiguous", 38),
        ("type_size", "MPI_Type_size", 39),
        ("waitall", "MPI_Waitall", 40),
        ("query_thread", "MPI_Query_thread", 41),
    ];
    for (method, symbol, code) in calls {
        let test = "every_failed_call_names_its_symbol";
        let scenario = format!("{}/{}", test, method);
        let output = run_scenario(test, &scenario, || {
            substrate::with_substrate(Recorder::failing(method, code), || {
                let _guard = tiny_mpi::enter(ThreadSupport::Single, false);
                call_reaching(method);
                unreachable!("the failed call should have ended the process");
            })
        });
        let Some(output) = output else { continue };

        assert_eq!(output.status.code(), Some(code), "{}", method);
        let lines = stderr_lines(&output);
        assert_eq!(lines.len(), 1, "{}: {:?}", method, lines);
        assert!(lines[0].contains("fatal.rs:"), "{}", lines[0]);
        assert!(
            lines[0].ends_with(&format!(": {} returned error {} ({})", symbol, INJECTED, code)),
            "{}",
            lines[0]
        );
    }
}

#[test]
fn partial_element_message_fails_the_count() {
    let output = in_child("partial_element_message_fails_the_count", || {
        substrate::with_substrate(Arc::new(LocalSubstrate::single()), || {
            let _guard = tiny_mpi::enter(ThreadSupport::Single, false);
            ops::send(&[1u8, 2, 3], 0, 0).wait();
            let _ = ops::probe::<i32>(0, 0);
            unreachable!("a partial element should have ended the process");
        })
    });
    let Some(output) = output else { return };

    assert_eq!(output.status.code(), Some(2));
    let lines = stderr_lines(&output);
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(
        lines[0].ends_with(": MPI_Get_count returned error invalid count argument (2)"),
        "{}",
        lines[0]
    );
}
