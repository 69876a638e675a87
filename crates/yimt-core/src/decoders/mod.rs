//! Decoder contract used by [`crate::models::SequenceToSequence`].

use std::sync::Arc;

use anyhow::Result;
use ndarray::{Array1, Array2, Array3, ArrayD, Axis};

use crate::constants::END_OF_SENTENCE_ID;
use crate::decoding::{self, DecodeOptions, DecodeResult};
use crate::encoders::EncoderState;
use crate::inputters::WordEmbedder;

/// Decoder state carried between steps. Every tensor has the batch on axis 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoderState {
    /// Encoder outputs attended to, `[batch, source_time, depth]`.
    pub memory: Option<Array3<f32>>,
    pub memory_sequence_length: Option<Array1<usize>>,
    /// Decoder specific tensors (recurrent cells, cached keys and values).
    pub tensors: Vec<ArrayD<f32>>,
}

impl DecoderState {
    pub fn batch_size(&self) -> Option<usize> {
        self.memory
            .as_ref()
            .map(|memory| memory.len_of(Axis(0)))
            .or_else(|| self.memory_sequence_length.as_ref().map(Array1::len))
            .or_else(|| self.tensors.first().map(|t| t.len_of(Axis(0))))
    }

    /// Gathers batch rows, used to follow beam parents.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            memory: self.memory.as_ref().map(|m| m.select(Axis(0), indices)),
            memory_sequence_length: self
                .memory_sequence_length
                .as_ref()
                .map(|l| l.select(Axis(0), indices)),
            tensors: self
                .tensors
                .iter()
                .map(|t| t.select(Axis(0), indices))
                .collect(),
        }
    }
}

/// Teacher forced decoding result.
#[derive(Debug, Clone)]
pub struct DecoderOutput {
    /// `[batch, time, vocab]`
    pub logits: Array3<f32>,
    pub state: DecoderState,
    /// `[batch, time, source_time]`, when the decoder attends to memory.
    pub attention: Option<Array3<f32>>,
}

/// Single step decoding result.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// `[batch, vocab]`
    pub logits: Array2<f32>,
    pub state: DecoderState,
    /// `[batch, source_time]`
    pub attention: Option<Array2<f32>>,
}

/// Embeds ids, used by decoders that feed back their own samples.
pub type InputFn<'a> = dyn Fn(&Array2<u32>) -> Result<Array3<f32>> + 'a;

pub trait Decoder: Send + Sync {
    /// Sizes the output layer.
    fn initialize(&mut self, vocab_size: usize) -> Result<()>;

    /// Ties the output projection to a shared target embedding.
    fn reuse_embeddings(&mut self, embedding: Arc<Array2<f32>>) -> Result<()>;

    fn initial_state(
        &self,
        memory: &Array3<f32>,
        memory_sequence_length: &Array1<usize>,
        encoder_state: &EncoderState,
    ) -> Result<DecoderState>;

    /// Teacher forced pass over full target sequences.
    fn forward(
        &self,
        inputs: &Array3<f32>,
        sequence_length: &Array1<usize>,
        initial_state: &DecoderState,
        input_fn: &InputFn<'_>,
        sampling_probability: Option<f32>,
        training: bool,
    ) -> Result<DecoderOutput>;

    /// One step of incremental decoding from `[batch, depth]` inputs.
    fn step(
        &self,
        inputs: &Array2<f32>,
        timestep: usize,
        state: &DecoderState,
        training: bool,
    ) -> Result<StepOutput>;

    /// Decodes from `start_ids` until `</s>` or the iteration limit, feeding
    /// each prediction back through `embedder`.
    fn dynamic_decode(
        &self,
        embedder: &WordEmbedder,
        start_ids: &Array1<u32>,
        initial_state: DecoderState,
        options: &DecodeOptions,
    ) -> Result<DecodeResult> {
        decoding::dynamic_decode(
            |ids, timestep, state| {
                let inputs = embedder.embed_step(ids)?;
                self.step(&inputs, timestep, state, false)
            },
            start_ids,
            END_OF_SENTENCE_ID,
            initial_state,
            options,
        )
    }
}
