//! Combinatorial shader parameter spaces.
//!
//! A shader declares a set of named integer axes, each either *static*
//! (decided at material load) or *dynamic* (varied at draw time), plus an
//! optional skip expression marking combinations as invalid. This crate owns
//! the arithmetic over that space: the mixed-radix combo index encoding, the
//! skip-expression evaluator over partial assignments, and the descending
//! enumeration of alive combos that the build dispatcher consumes.
//!
//! Combo indices and command numbers are `u64` everywhere; axis bounds are
//! signed and need not start at zero.

#![forbid(unsafe_code)]

mod expr;
mod iter;
mod space;

pub use crate::expr::{ExprError, SkipExpr};
pub use crate::iter::AliveCombos;
pub use crate::space::{
    Axis, AxisKind, ComboError, ComboHandle, EntrySet, ShaderConfig, ShaderEntry,
};
