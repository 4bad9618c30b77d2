//! Reduction-operator descriptors and the function objects that name them.

/// Opaque descriptor of a reduction operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Op {
    Max = 0,
    Min = 1,
    Sum = 2,
    Prod = 3,
    Land = 4,
    Band = 5,
    Lor = 6,
    Bor = 7,
    Lxor = 8,
    Bxor = 9,
}

impl Op {
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}

/// A reduction, resolved to an operator descriptor. Implemented by the
/// function objects below and by [`Op`] itself, so a raw descriptor can
/// always be passed where a reduction is expected.
pub trait Reduction {
    fn wire_op(&self) -> Op;
}

impl Reduction for Op {
    fn wire_op(&self) -> Op {
        *self
    }
}

macro_rules! function_objects {
    ($($(#[$meta:meta])* $name:ident => $op:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
            pub struct $name;

            impl Reduction for $name {
                fn wire_op(&self) -> Op {
                    Op::$op
                }
            }
        )*
    };
}

function_objects! {
    /// `a + b`
    Plus => Sum,
    /// `a * b`
    Multiplies => Prod,
    Min => Min,
    Max => Max,
    /// `a & b`
    BitAnd => Band,
    /// `a | b`
    BitOr => Bor,
    /// `a ^ b`
    BitXor => Bxor,
    /// `a && b`
    LogicalAnd => Land,
    /// `a || b`
    LogicalOr => Lor,
}
