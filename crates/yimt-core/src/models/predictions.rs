use ndarray::{Array1, Array2, Array3, Array4, Axis, s};

/// What the model returns at inference time.
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    /// Lite mode: ids of the best hypothesis of a single example, padded to
    /// the fixed output size.
    Ids(Array1<u32>),
    Batch(PredictionBatch),
}

/// Batched hypotheses, best first along axis 1.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionBatch {
    /// `[batch, hypotheses]`
    pub log_probs: Array2<f32>,
    /// `[batch, hypotheses, time]`, absent when the target tokenizer
    /// detokenizes during decoding.
    pub tokens: Option<Array3<String>>,
    /// `[batch, hypotheses]`
    pub length: Option<Array2<usize>>,
    /// `[batch, hypotheses, time, source_time]`
    pub alignment: Option<Array4<f32>>,
    /// `[batch, hypotheses]`, only with in-graph tokenizers.
    pub text: Option<Array2<String>>,
}

impl PredictionBatch {
    pub fn batch_size(&self) -> usize {
        self.log_probs.nrows()
    }

    pub fn num_hypotheses(&self) -> usize {
        self.log_probs.ncols()
    }

    /// Keeps the first `count` hypotheses of every example.
    pub fn truncate_hypotheses(self, count: usize) -> Self {
        let count = count.min(self.num_hypotheses());
        Self {
            log_probs: self.log_probs.slice(s![.., ..count]).to_owned(),
            tokens: self.tokens.map(|t| t.slice(s![.., ..count, ..]).to_owned()),
            length: self.length.map(|l| l.slice(s![.., ..count]).to_owned()),
            alignment: self
                .alignment
                .map(|a| a.slice(s![.., ..count, .., ..]).to_owned()),
            text: self.text.map(|t| t.slice(s![.., ..count]).to_owned()),
        }
    }

    /// Predictions of a single example.
    pub fn example(&self, index: usize) -> Option<ExamplePrediction> {
        if index >= self.batch_size() {
            return None;
        }
        Some(ExamplePrediction {
            log_probs: self.log_probs.row(index).to_owned(),
            tokens: self
                .tokens
                .as_ref()
                .map(|t| t.index_axis(Axis(0), index).to_owned()),
            length: self.length.as_ref().map(|l| l.row(index).to_owned()),
            alignment: self
                .alignment
                .as_ref()
                .map(|a| a.index_axis(Axis(0), index).to_owned()),
            text: self.text.as_ref().map(|t| t.row(index).to_owned()),
        })
    }

    pub fn examples(&self) -> impl Iterator<Item = ExamplePrediction> + '_ {
        (0..self.batch_size()).filter_map(|index| self.example(index))
    }
}

/// Hypotheses of one example, as consumed by
/// [`SequenceToSequence::format_prediction`](super::SequenceToSequence::format_prediction).
#[derive(Debug, Clone, PartialEq)]
pub struct ExamplePrediction {
    /// `[hypotheses]`
    pub log_probs: Array1<f32>,
    /// `[hypotheses, time]`
    pub tokens: Option<Array2<String>>,
    pub length: Option<Array1<usize>>,
    /// `[hypotheses, time, source_time]`
    pub alignment: Option<Array3<f32>>,
    pub text: Option<Array1<String>>,
}
