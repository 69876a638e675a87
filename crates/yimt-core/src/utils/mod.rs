//! Tensor helpers shared by decoding and the sequence-to-sequence model.

pub mod masks;
pub mod tensor_ops;

pub use masks::*;
pub use tensor_ops::*;
