//! Encoder contract and a parameter-free mean encoder.

use anyhow::{Result, ensure};
use ndarray::{Array1, Array2, Array3, ArrayD, Axis};

/// Encoder final state: a flat list of optional tensors, batch on axis 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderState(pub Vec<Option<ArrayD<f32>>>);

impl EncoderState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &ArrayD<f32>> {
        self.0.iter().flatten()
    }

    /// Applies `f` to every present tensor, keeping absent entries.
    pub fn map_leaves<F>(&self, mut f: F) -> Self
    where
        F: FnMut(&ArrayD<f32>) -> ArrayD<f32>,
    {
        Self(self.0.iter().map(|leaf| leaf.as_ref().map(&mut f)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// `[batch, source_time, depth]`
    pub outputs: Array3<f32>,
    pub state: EncoderState,
    /// `[batch]`
    pub sequence_length: Array1<usize>,
}

pub trait Encoder: Send + Sync {
    fn encode(
        &self,
        inputs: &Array3<f32>,
        sequence_length: &Array1<usize>,
        training: bool,
    ) -> Result<EncoderOutput>;
}

/// Passes the embeddings through and exposes their masked mean as state.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanEncoder;

impl Encoder for MeanEncoder {
    fn encode(
        &self,
        inputs: &Array3<f32>,
        sequence_length: &Array1<usize>,
        _training: bool,
    ) -> Result<EncoderOutput> {
        let (batch, time, depth) = inputs.dim();
        ensure!(
            sequence_length.len() == batch,
            "got {} lengths for a batch of {}",
            sequence_length.len(),
            batch
        );

        let mut mean = Array2::<f32>::zeros((batch, depth));
        for (b, mut row) in mean.axis_iter_mut(Axis(0)).enumerate() {
            let length = sequence_length[b].min(time);
            if length == 0 {
                continue;
            }
            let valid = inputs.index_axis(Axis(0), b);
            let valid = valid.slice(ndarray::s![..length, ..]);
            row.assign(&valid.sum_axis(Axis(0)));
            row /= length as f32;
        }

        Ok(EncoderOutput {
            outputs: inputs.clone(),
            state: EncoderState(vec![Some(mean.into_dyn())]),
            sequence_length: sequence_length.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_mean_encoder_masks_padding() {
        let inputs = array![[[1.0f32, 2.0], [3.0, 4.0], [100.0, 100.0]]];
        let output = MeanEncoder.encode(&inputs, &array![2usize], false).unwrap();
        let state = output.state.leaves().next().unwrap();
        assert_abs_diff_eq!(state[[0, 0]], 2.0);
        assert_abs_diff_eq!(state[[0, 1]], 3.0);
        assert_eq!(output.outputs, inputs);
    }

    #[test]
    fn test_map_leaves_keeps_absent_entries() {
        let state = EncoderState(vec![None, Some(array![1.0f32, 2.0].into_dyn())]);
        let doubled = state.map_leaves(|leaf| leaf * 2.0);
        assert!(doubled.0[0].is_none());
        assert_eq!(doubled.0[1].as_ref().unwrap()[[1]], 4.0);
    }
}
