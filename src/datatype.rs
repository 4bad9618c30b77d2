//! Wire-type descriptors and the registry mapping Rust value types to them.
//!
//! A type takes part in typed operations by implementing [`WireType`]. The
//! arithmetic primitives are covered here, fieldless enums opt in through
//! [`wire_enum!`](crate::wire_enum), and user types implement the trait by
//! hand, usually returning a descriptor built with [`Datatype::contiguous`].
//! A type without a descriptor fails to compile when used with a typed
//! operation.
//!
//! Plain-old-data types that have no descriptor can still travel as bytes
//! through the `*_bytes` operations in [`crate::ops`], which accept any
//! `zerocopy::AsBytes + zerocopy::FromBytes` type and count in bytes.

use crate::check;
use crate::substrate;
use crate::Count;
use std::panic::Location;

/// Opaque descriptor for the binary layout of one element on the wire.
///
/// Built-in descriptors are fixed constants. Derived descriptors are
/// allocated by the substrate and carry raw codes at or above
/// [`Datatype::FIRST_DERIVED`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Datatype(i32);

impl Datatype {
    pub const BYTE: Self = Self(0);
    pub const CHAR: Self = Self(1);
    pub const SHORT: Self = Self(2);
    pub const INT: Self = Self(3);
    pub const LONG: Self = Self(4);
    pub const LONG_LONG: Self = Self(5);
    pub const UNSIGNED_CHAR: Self = Self(6);
    pub const UNSIGNED_SHORT: Self = Self(7);
    pub const UNSIGNED: Self = Self(8);
    pub const UNSIGNED_LONG: Self = Self(9);
    pub const FLOAT: Self = Self(10);
    pub const DOUBLE: Self = Self(11);
    pub const LONG_DOUBLE: Self = Self(12);

    /// Raw codes below this value are reserved for built-in descriptors.
    pub const FIRST_DERIVED: i32 = 1024;

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }

    pub const fn is_builtin(self) -> bool {
        self.0 >= 0 && self.0 <= Self::LONG_DOUBLE.0
    }

    /// The descriptor registered for `T`.
    pub fn of<T: WireType>() -> Self {
        T::datatype()
    }

    /// Builds a derived descriptor for `count` consecutive elements of `T`.
    /// Each call asks the substrate for a new descriptor; a type whose
    /// capability calls this should cache the result itself if it cares.
    #[track_caller]
    pub fn contiguous<T: WireType>(count: usize) -> Self {
        let location = Location::caller();
        let count = count_of(count, location);
        check::call(location, "MPI_Type_contiguous", |s| {
            s.type_contiguous(count, T::datatype())
        })
    }

    /// Size in bytes of one element described by this descriptor.
    #[track_caller]
    pub fn size(self) -> usize {
        check::call(Location::caller(), "MPI_Type_size", |s| s.type_size(self))
    }
}

/// Converts a Rust length into a wire count, panicking if it does not fit.
pub(crate) fn count_of(len: usize, location: &Location<'_>) -> Count {
    match Count::try_from(len) {
        Ok(count) => count,
        Err(_) => panic!("{}: length {} does not fit in a wire count", location, len),
    }
}

/// A value type with a wire-type descriptor.
///
/// # Safety
///
/// `datatype()` must describe exactly the in-memory layout of `Self`, and
/// every value the substrate can write into a `Self` under that descriptor
/// must be a valid `Self`.
pub unsafe trait WireType: Copy {
    fn datatype() -> Datatype;
}

macro_rules! builtin_wire_types {
    ($($t:ty => $datatype:ident),* $(,)?) => {
        $(
            unsafe impl WireType for $t {
                fn datatype() -> Datatype {
                    Datatype::$datatype
                }
            }
        )*
    };
}

builtin_wire_types! {
    i8  => CHAR,
    i16 => SHORT,
    i32 => INT,
    i64 => LONG_LONG,
    u8  => UNSIGNED_CHAR,
    u16 => UNSIGNED_SHORT,
    u32 => UNSIGNED,
    f32 => FLOAT,
    f64 => DOUBLE,
}

/// `u64` resolves to `UNSIGNED_LONG`, the same descriptor used for C
/// `unsigned long`, rather than an `unsigned long long` descriptor. On
/// targets where `unsigned long` is 32 bits wide this narrows the wire
/// width. Kept as is until it is confirmed whether the sharing is intended.
unsafe impl WireType for u64 {
    fn datatype() -> Datatype {
        Datatype::UNSIGNED_LONG
    }
}

/// Implements [`WireType`] for fieldless `Copy` enums by delegating to the
/// descriptor of their integer representation.
///
/// The `unsafe` keyword is part of the invocation: receiving into an enum is
/// only sound if peers never send a value that is not one of its
/// discriminants.
///
/// ```
/// #[derive(Clone, Copy, Debug, PartialEq)]
/// #[repr(u8)]
/// enum Side { Left = 0, Right = 1 }
///
/// tiny_mpi::wire_enum!(unsafe Side as u8);
///
/// assert_eq!(tiny_mpi::Datatype::of::<Side>(), tiny_mpi::Datatype::UNSIGNED_CHAR);
/// ```
#[macro_export]
macro_rules! wire_enum {
    ($(unsafe $t:ty as $repr:ty),+ $(,)?) => {
        $(
            const _: () = assert!(
                ::std::mem::size_of::<$t>() == ::std::mem::size_of::<$repr>()
            );

            unsafe impl $crate::WireType for $t {
                fn datatype() -> $crate::Datatype {
                    <$repr as $crate::WireType>::datatype()
                }
            }
        )+
    };
}
