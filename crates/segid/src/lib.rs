#![doc = include_str!("../README.md")]

mod allocator;
mod error;
mod registry;
mod store;

pub use crate::allocator::*;
pub use crate::error::*;
pub use crate::registry::*;
pub use crate::store::*;
