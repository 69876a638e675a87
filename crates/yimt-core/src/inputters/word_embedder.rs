use std::any::Any;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use ndarray::{Array, Array1, Array2, Array3, Dimension};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::{Batch, Features, Inputter, Labels};
use crate::constants::{END_OF_SENTENCE_ID, PADDING_ID, START_OF_SENTENCE_ID};
use crate::error::{YimtError, YimtResult};
use crate::noise::WordNoiser;
use crate::tokenizer::Tokenizer;
use crate::vocab::LookupTables;

/// Embeds token ids by row lookup in a `[vocab_size, depth]` matrix.
///
/// The matrix sits behind an [`Arc`] so that several embedders, or an
/// embedder and a decoder output layer, can share it.
pub struct WordEmbedder {
    tables: LookupTables,
    embedding: Arc<Array2<f32>>,
    tokenizer: Arc<dyn Tokenizer>,
    mark_start: bool,
    mark_end: bool,
    decoder_mode: bool,
    noiser: Option<WordNoiser>,
}

impl WordEmbedder {
    pub fn new(
        tables: LookupTables,
        embedding: Array2<f32>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> YimtResult<Self> {
        if embedding.nrows() != tables.size() {
            return Err(YimtError::InvalidConfig(format!(
                "embedding has {} rows but the vocabulary defines {} ids",
                embedding.nrows(),
                tables.size()
            )));
        }
        Ok(Self {
            tables,
            embedding: Arc::new(embedding),
            tokenizer,
            mark_start: false,
            mark_end: false,
            decoder_mode: false,
            noiser: None,
        })
    }

    /// Creates an embedder with a uniformly initialized matrix.
    pub fn with_random_embedding(
        tables: LookupTables,
        depth: usize,
        tokenizer: Arc<dyn Tokenizer>,
        seed: u64,
    ) -> YimtResult<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let embedding =
            Array2::from_shape_fn((tables.size(), depth), |_| rng.gen_range(-0.1f32..0.1));
        Self::new(tables, embedding, tokenizer)
    }

    /// Adds `<s>` and/or `</s>` around source sequences.
    pub fn with_sequence_controls(mut self, mark_start: bool, mark_end: bool) -> Self {
        self.mark_start = mark_start;
        self.mark_end = mark_end;
        self
    }

    /// Switches to target mode: inputs start with `<s>` and outputs end with
    /// `</s>`.
    pub fn set_decoder_mode(&mut self) {
        self.decoder_mode = true;
        self.mark_start = false;
        self.mark_end = false;
    }

    pub fn is_decoder(&self) -> bool {
        self.decoder_mode
    }

    pub fn mark_start(&self) -> bool {
        self.mark_start
    }

    pub fn mark_end(&self) -> bool {
        self.mark_end
    }

    pub fn lookup_tables(&self) -> &LookupTables {
        &self.tables
    }

    pub fn embedding(&self) -> &Arc<Array2<f32>> {
        &self.embedding
    }

    pub fn depth(&self) -> usize {
        self.embedding.ncols()
    }

    /// Replaces the matrix with a shared one of the same shape.
    pub fn share_embedding(&mut self, embedding: Arc<Array2<f32>>) -> YimtResult<()> {
        if embedding.dim() != self.embedding.dim() {
            return Err(YimtError::InvalidConfig(format!(
                "cannot share an embedding of shape {:?} with an embedder of shape {:?}",
                embedding.dim(),
                self.embedding.dim()
            )));
        }
        self.embedding = embedding;
        Ok(())
    }

    pub fn text_tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn noiser(&self) -> Option<&WordNoiser> {
        self.noiser.as_ref()
    }

    pub fn set_noiser(&mut self, noiser: WordNoiser) {
        self.noiser = Some(noiser);
    }

    fn row_checked(&self, id: u32) -> Result<usize> {
        let row = id as usize;
        if row >= self.embedding.nrows() {
            return Err(anyhow!(
                "token id {} is out of range for an embedding of {} rows",
                id,
                self.embedding.nrows()
            ));
        }
        Ok(row)
    }

    /// `[batch, time]` ids to `[batch, time, depth]` embeddings.
    pub fn embed_ids(&self, ids: &Array2<u32>) -> Result<Array3<f32>> {
        let (batch, time) = ids.dim();
        let mut out = Array3::zeros((batch, time, self.depth()));
        for ((b, t), &id) in ids.indexed_iter() {
            let row = self.row_checked(id)?;
            out.slice_mut(ndarray::s![b, t, ..])
                .assign(&self.embedding.row(row));
        }
        Ok(out)
    }

    /// `[batch]` ids of a single decoding step to `[batch, depth]`.
    pub fn embed_step(&self, ids: &Array1<u32>) -> Result<Array2<f32>> {
        let mut out = Array2::zeros((ids.len(), self.depth()));
        for (mut out_row, &id) in out.rows_mut().into_iter().zip(ids.iter()) {
            out_row.assign(&self.embedding.row(self.row_checked(id)?));
        }
        Ok(out)
    }

    pub fn ids_to_tokens<D: Dimension>(&self, ids: &Array<u32, D>) -> Array<String, D> {
        self.tables.ids_to_tokens(ids)
    }

    fn pad_ids(sequences: &[Vec<u32>]) -> (Array2<u32>, Array1<usize>) {
        let max_length = sequences.iter().map(Vec::len).max().unwrap_or(0);
        let mut ids = Array2::from_elem((sequences.len(), max_length), PADDING_ID);
        for (b, sequence) in sequences.iter().enumerate() {
            for (t, &id) in sequence.iter().enumerate() {
                ids[[b, t]] = id;
            }
        }
        let length = sequences.iter().map(Vec::len).collect();
        (ids, length)
    }

    /// Builds decoder inputs and outputs from token id sequences.
    fn decoder_arrays(sequences: &[Vec<u32>]) -> (Array2<u32>, Array2<u32>, Array1<usize>) {
        let inputs: Vec<Vec<u32>> = sequences
            .iter()
            .map(|ids| std::iter::once(START_OF_SENTENCE_ID).chain(ids.iter().copied()).collect())
            .collect();
        let outputs: Vec<Vec<u32>> = sequences
            .iter()
            .map(|ids| ids.iter().copied().chain(std::iter::once(END_OF_SENTENCE_ID)).collect())
            .collect();
        let (ids, length) = Self::pad_ids(&inputs);
        let (ids_out, _) = Self::pad_ids(&outputs);
        (ids, ids_out, length)
    }

    /// Tokenizes source sentences into a [`Features`] batch.
    pub fn make_features<S: AsRef<str>>(&self, sentences: &[S]) -> Features {
        let tokens: Vec<Vec<String>> = sentences
            .iter()
            .map(|sentence| self.tokenizer.tokenize(sentence.as_ref()))
            .collect();
        let sequences: Vec<Vec<u32>> = tokens
            .iter()
            .map(|tokens| {
                let mut ids = Vec::with_capacity(tokens.len() + 2);
                if self.mark_start {
                    ids.push(START_OF_SENTENCE_ID);
                }
                ids.extend(self.tables.tokens_to_ids(tokens));
                if self.mark_end {
                    ids.push(END_OF_SENTENCE_ID);
                }
                ids
            })
            .collect();
        let (ids, length) = Self::pad_ids(&sequences);

        let max_tokens = tokens.iter().map(Vec::len).max().unwrap_or(0);
        let mut token_array = Array2::from_elem((tokens.len(), max_tokens), String::new());
        for (b, sentence) in tokens.into_iter().enumerate() {
            for (t, token) in sentence.into_iter().enumerate() {
                token_array[[b, t]] = token;
            }
        }

        Features {
            ids,
            length,
            tokens: Some(token_array),
        }
    }

    /// Tokenizes target sentences into a [`Labels`] batch.
    pub fn make_labels<S: AsRef<str>>(&self, sentences: &[S]) -> Labels {
        let sequences: Vec<Vec<u32>> = sentences
            .iter()
            .map(|sentence| {
                let tokens = self.tokenizer.tokenize(sentence.as_ref());
                self.tables.tokens_to_ids(&tokens)
            })
            .collect();
        let (ids, ids_out, length) = Self::decoder_arrays(&sequences);
        Labels::new(ids, ids_out, length)
    }

    /// Fills the noisy fields of `labels` with a noised copy of the targets.
    pub fn add_noisy_labels<R: Rng + ?Sized>(&self, labels: &mut Labels, rng: &mut R) -> YimtResult<()> {
        let noiser = self.noiser.as_ref().ok_or_else(|| {
            YimtError::Capability("noisy labels require a configured word noiser".to_string())
        })?;
        let sequences: Vec<Vec<u32>> = labels
            .ids_out
            .rows()
            .into_iter()
            .zip(labels.length.iter())
            .map(|(row, &length)| {
                let tokens: Vec<String> = row
                    .iter()
                    .take(length.saturating_sub(1))
                    .map(|&id| self.tables.id_to_token(id).to_string())
                    .collect();
                let noisy = noiser.apply(&tokens, rng);
                self.tables.tokens_to_ids(&noisy)
            })
            .collect();
        let (ids, ids_out, length) = Self::decoder_arrays(&sequences);
        labels.noisy_ids = Some(ids);
        labels.noisy_ids_out = Some(ids_out);
        labels.noisy_length = Some(length);
        Ok(())
    }
}

impl Inputter for WordEmbedder {
    fn get_length(&self, batch: &dyn Batch, ignore_special_tokens: bool) -> Array1<usize> {
        let length = batch.length();
        if !ignore_special_tokens {
            return length.clone();
        }
        // Decoder sequences are shifted by one step.
        let special = if self.decoder_mode {
            1
        } else {
            usize::from(self.mark_start) + usize::from(self.mark_end)
        };
        length.mapv(|l| l.saturating_sub(special))
    }

    fn embed(&self, batch: &dyn Batch, _training: bool) -> Result<Array3<f32>> {
        self.embed_ids(batch.ids())
    }

    fn vocabulary_size(&self) -> Option<usize> {
        Some(self.tables.size())
    }

    fn tokenizer(&self) -> Option<&dyn Tokenizer> {
        Some(self.tokenizer.as_ref())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
