//! Position and range arithmetic for editor documents.
//!
//! Everything here is purely functional over [`lsp_types::Position`] and
//! [`lsp_types::Range`]: ordering predicates, translation of offsets within a
//! piece of text to document coordinates, and [`RangeDelta`] computation for
//! shifting coordinates across text edits.

pub mod delta;
pub mod position;

pub use delta::*;
pub use lsp_types;
pub use position::*;
