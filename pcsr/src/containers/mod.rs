//! Storage containers for the packed edge array.

pub mod packed_array;

pub use packed_array::{PackedArray, MIN_CAPACITY};
