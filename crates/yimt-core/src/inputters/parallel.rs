use std::any::Any;

use anyhow::{Result, anyhow};
use ndarray::{Array1, Array3, Axis, concatenate};

use super::{Batch, Inputter};

/// Feeds the same batch to several inputters and concatenates their
/// embeddings on the depth axis.
pub struct ParallelInputter {
    inputters: Vec<Box<dyn Inputter>>,
}

impl ParallelInputter {
    pub fn new(inputters: Vec<Box<dyn Inputter>>) -> Result<Self> {
        if inputters.is_empty() {
            return Err(anyhow!("ParallelInputter needs at least one inputter"));
        }
        Ok(Self { inputters })
    }

    pub fn inputters(&self) -> &[Box<dyn Inputter>] {
        &self.inputters
    }

    pub fn inputters_mut(&mut self) -> &mut [Box<dyn Inputter>] {
        &mut self.inputters
    }
}

impl Inputter for ParallelInputter {
    fn get_length(&self, batch: &dyn Batch, ignore_special_tokens: bool) -> Array1<usize> {
        self.inputters[0].get_length(batch, ignore_special_tokens)
    }

    fn embed(&self, batch: &dyn Batch, training: bool) -> Result<Array3<f32>> {
        let embeddings = self
            .inputters
            .iter()
            .map(|inputter| inputter.embed(batch, training))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = embeddings.iter().map(|e| e.view()).collect();
        Ok(concatenate(Axis(2), &views)?)
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
