//! Domain types.

pub mod source;

pub use source::SourceTarget;
