//! Sequence-to-sequence model assembly.
//!
//! [`SequenceToSequence`] wires a source inputter, an encoder, a decoder and
//! a target [`WordEmbedder`](crate::inputters::WordEmbedder) together. It
//! owns decoding at inference time, the training losses and the formatting
//! of predictions.

mod predictions;
mod sequence_to_sequence;


pub use predictions::{ExamplePrediction, PredictionBatch, Predictions};
pub use sequence_to_sequence::{
    DecoderOutputs, EmbeddingsSharingLevel, LossOutput, ModelOutput, SequenceToSequence,
    align_tokens_from_attention, replace_unknown_target,
};
