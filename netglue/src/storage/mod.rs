//! Bookkeeping structures of the reassembly engine.
//!
//! Unlike the processing parts in [`layer`] these know nothing about addresses or protocols, only
//! about byte ranges.
//!
//! [`layer`]: ../layer/index.html
pub mod holes;

pub use self::holes::{Hole, HoleList};
