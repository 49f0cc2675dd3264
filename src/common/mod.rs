//! Byte-level helpers shared by the container code.

pub mod binary;
pub mod id;
