//! Inputters turn token batches into embeddings.
//!
//! [`WordEmbedder`] is the only inputter able to serve as a target inputter
//! or to share its embedding matrix. [`ParallelInputter`] groups several
//! source inputters.

mod parallel;
mod word_embedder;


pub use parallel::ParallelInputter;
pub use word_embedder::WordEmbedder;

use std::any::Any;

use anyhow::Result;
use ndarray::{Array1, Array2, Array3};

use crate::tokenizer::Tokenizer;

/// Anything carrying padded ids and their lengths.
pub trait Batch {
    /// Ids fed to the embedding, `[batch, time]`.
    fn ids(&self) -> &Array2<u32>;
    /// Length of each sequence, `[batch]`.
    fn length(&self) -> &Array1<usize>;
}

/// Source side batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    /// `[batch, time]`, including any start/end markers.
    pub ids: Array2<u32>,
    /// `[batch]`, including any start/end markers.
    pub length: Array1<usize>,
    /// Surface tokens without markers, `[batch, source_time]`, padded with
    /// empty strings.
    pub tokens: Option<Array2<String>>,
}

impl Batch for Features {
    fn ids(&self) -> &Array2<u32> {
        &self.ids
    }

    fn length(&self) -> &Array1<usize> {
        &self.length
    }
}

/// Target side batch for teacher forcing.
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
    /// Decoder inputs, starting with `<s>`. `[batch, time]`.
    pub ids: Array2<u32>,
    /// Decoder targets, ending with `</s>`. `[batch, time]`.
    pub ids_out: Array2<u32>,
    /// Number of tokens plus one. `[batch]`.
    pub length: Array1<usize>,
    pub noisy_ids: Option<Array2<u32>>,
    pub noisy_ids_out: Option<Array2<u32>>,
    pub noisy_length: Option<Array1<usize>>,
    /// Per-example loss weight. `[batch]`.
    pub weight: Option<Array1<f32>>,
    /// Gold alignment, `[batch, target_time, source_time]`.
    pub alignment: Option<Array3<f32>>,
}

impl Labels {
    pub fn new(ids: Array2<u32>, ids_out: Array2<u32>, length: Array1<usize>) -> Self {
        Self {
            ids,
            ids_out,
            length,
            noisy_ids: None,
            noisy_ids_out: None,
            noisy_length: None,
            weight: None,
            alignment: None,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.length.len()
    }
}

impl Batch for Labels {
    fn ids(&self) -> &Array2<u32> {
        &self.ids
    }

    fn length(&self) -> &Array1<usize> {
        &self.length
    }
}

pub trait Inputter: Send + Sync {
    /// Sequence lengths, optionally excluding start/end markers.
    fn get_length(&self, batch: &dyn Batch, ignore_special_tokens: bool) -> Array1<usize>;

    /// Embeds a batch into `[batch, time, depth]`.
    fn embed(&self, batch: &dyn Batch, training: bool) -> Result<Array3<f32>>;

    /// Number of ids the inputter can embed, if it has a vocabulary.
    fn vocabulary_size(&self) -> Option<usize> {
        None
    }

    fn tokenizer(&self) -> Option<&dyn Tokenizer> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<'a> dyn Inputter + 'a {
    pub fn as_word_embedder(&self) -> Option<&WordEmbedder> {
        self.as_any().downcast_ref::<WordEmbedder>()
    }

    pub fn as_word_embedder_mut(&mut self) -> Option<&mut WordEmbedder> {
        self.as_any_mut().downcast_mut::<WordEmbedder>()
    }

    pub fn as_parallel(&self) -> Option<&ParallelInputter> {
        self.as_any().downcast_ref::<ParallelInputter>()
    }

    /// The inputter itself, or its branches when it is parallel.
    pub fn branches(&self) -> Vec<&dyn Inputter> {
        match self.as_parallel() {
            Some(parallel) => parallel.inputters().iter().map(|inputter| inputter.as_ref()).collect(),
            None => vec![self],
        }
    }
}
