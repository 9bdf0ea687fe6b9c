//! Numeric helpers shared by the surrogate fitting code.

#[macro_use]
mod macros;

mod bounded_value;
mod clip;
mod gradmin;

pub(crate) use bounded_value::*;
pub(crate) use clip::*;
pub(crate) use gradmin::*;
