//! A small typed layer over a rank-based message-passing runtime (MPI).
//!
//! The crate does three things on top of the raw runtime:
//!
//! - maps Rust value types and reduction function objects to wire
//!   descriptors at compile time ([`WireType`], [`Reduction`]);
//! - routes every runtime call through one checker ([`check::invoke`]) that
//!   reports a failure on a single stderr line and aborts the process group;
//! - ties each in-flight operation to the buffers it uses and makes sure it
//!   is waited on ([`Request`], [`Pending`], [`Guard`]).
//!
//! The runtime itself sits behind the [`substrate::Substrate`] trait. With the
//! `mpi` feature the default substrate is the system MPI library; without it
//! the default is a one-rank in-process group, and [`LocalGroup`] runs
//! several ranks as threads.
//!
//! ```
//! use tiny_mpi::{ops, LocalGroup, Plus, ThreadSupport};
//!
//! let sums = LocalGroup::new(4).run(|rank| {
//!     let _guard = tiny_mpi::enter(ThreadSupport::Single, true);
//!     let mut value = rank;
//!     ops::allreduce_value(&mut value, Plus).wait();
//!     value
//! });
//! assert_eq!(sums, vec![6; 4]);
//! ```

pub mod check;
pub mod datatype;
pub mod guard;
pub mod lifecycle;
#[cfg(feature = "mpi")]
pub mod mpi;
pub mod op;
pub mod ops;
pub mod request;
pub mod substrate;

/// A participant's index in the group, in `0..n_ranks()`.
pub type Rank = i32;

/// Application-chosen message discriminator.
pub type Tag = i32;

/// An element count on the wire.
pub type Count = i32;

pub use check::ErrorCode;
pub use datatype::{Datatype, WireType};
pub use guard::{enter, Guard};
pub use lifecycle::{abort, finalized, fini, init, initialized, n_ranks, rank, ThreadSupport};
pub use op::{BitAnd, BitOr, BitXor, LogicalAnd, LogicalOr, Max, Min, Multiplies, Op, Plus, Reduction};
pub use request::{wait, Pending, Request};
pub use substrate::{LocalGroup, ANY_SOURCE, ANY_TAG};
