use tiny_mpi::{ops, Pending, Plus, ThreadSupport};
use tracing_subscriber::EnvFilter;

fn ring() {
    let guard = tiny_mpi::enter(ThreadSupport::Funneled, true);
    let rank = tiny_mpi::rank();
    let size = tiny_mpi::n_ranks();

    if size == 1 {
        println!("example must be run with >1 processes, e.g. with mpiexec -np 2");
        return;
    }
    let send_buf = vec![rank; 4];
    let mut recv_buf = vec![0; 4];
    let mut total = rank;
    {
        let _pending = Pending::new([
            ops::recv(&mut recv_buf, (rank + size - 1) % size, 0),
            ops::send(&send_buf, (rank + 1) % size, 0),
            ops::allreduce_value(&mut total, Plus),
        ]);
    }
    for i in 0..size {
        if rank == i {
            println!(
                "rank {} received {:?}, sum of ranks is {} ({:?})",
                rank,
                recv_buf,
                total,
                guard.thread_support()
            );
        }
        ops::barrier().wait();
    }
}

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if cfg!(feature = "mpi") {
        ring()
    } else {
        tiny_mpi::LocalGroup::new(4).run(|_| ring());
    }
}
