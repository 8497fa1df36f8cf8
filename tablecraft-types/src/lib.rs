//! Wire value model for tablecraft.
//!
//! This crate defines the representation every other tablecraft crate speaks:
//! - [`AttributeValue`] and [`Item`], the tagged store representation
//! - [`Number`], an arbitrary-precision decimal that never round-trips through
//!   binary floating point
//! - [`Patch`] and [`PatchValue`], the three-state input of a partial update
//! - [`Expression`], an opaque condition/update expression with its
//!   placeholder maps
//! - [`ErrorKind`], the error taxonomy every layer reports through
//!
//! Nothing here talks to a store; these are plain owned values.

mod expression;
mod kind;
mod number;
mod patch;
mod value;

pub use expression::{Expression, name_placeholder};
pub use kind::ErrorKind;
pub use number::Number;
pub use patch::{Patch, PatchValue};
pub use value::{AttributeValue, Item};

/// Result type for value construction.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur when building values.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("invalid number literal: {0:?}")]
    InvalidNumber(String),

    #[error("non-finite float {0} has no decimal representation")]
    NonFinite(f64),
}
