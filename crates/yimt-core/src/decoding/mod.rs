//! Dynamic decoding: greedy search, random sampling and beam search.
//!
//! All strategies run the same loop over `batch * beam_size` rows. Each
//! step scores the continuations of every live hypothesis, keeps the best
//! `beam_size` per batch entry and reorders the decoder state to follow
//! the surviving parents. Greedy search is the `beam_size == 1` case.

mod beams;
mod sampling;


pub use beams::BeamHypothesis;
pub use sampling::{
    Sampler, get_top_k_from_log_probs, log_softmax_1d, sample_from_probs, softmax_1d_inplace,
    top_k_filtering,
};

use anyhow::{Result, ensure};
use ndarray::{Array1, Array2, Array3, Array4, s};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::decoders::{DecoderState, StepOutput};
use beams::{Candidate, select_candidates};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodingStrategy {
    Greedy,
    /// Keeps `beam_size` hypotheses, ranked by `score / length^length_penalty`.
    BeamSearch { beam_size: usize, length_penalty: f32 },
}

impl DecodingStrategy {
    pub fn from_params(beam_width: usize, length_penalty: f32) -> Self {
        if beam_width > 1 {
            DecodingStrategy::BeamSearch {
                beam_size: beam_width,
                length_penalty,
            }
        } else {
            DecodingStrategy::Greedy
        }
    }

    pub fn beam_size(&self) -> usize {
        match self {
            DecodingStrategy::Greedy => 1,
            DecodingStrategy::BeamSearch { beam_size, .. } => *beam_size,
        }
    }

    pub fn length_penalty(&self) -> f32 {
        match self {
            DecodingStrategy::Greedy => 0.0,
            DecodingStrategy::BeamSearch { length_penalty, .. } => *length_penalty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    pub strategy: DecodingStrategy,
    pub sampler: Sampler,
    pub maximum_iterations: usize,
    /// `</s>` is masked out before this many steps.
    pub minimum_iterations: usize,
    /// Fixed time dimension of the outputs, for static-shape exports.
    pub output_size: Option<usize>,
    /// Seed of the random sampler. Unseeded decoding draws from entropy.
    pub seed: Option<u64>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            strategy: DecodingStrategy::Greedy,
            sampler: Sampler::Best,
            maximum_iterations: 250,
            minimum_iterations: 0,
            output_size: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodeResult {
    /// `[batch, beam, time]`, padded with the end id.
    pub ids: Array3<u32>,
    /// `[batch, beam]`, excluding `</s>`.
    pub lengths: Array2<usize>,
    /// Cumulative log probability of each hypothesis, `[batch, beam]`.
    pub log_probs: Array2<f32>,
    /// `[batch, beam, time, source_time]` when the decoder returns attention.
    pub attention: Option<Array4<f32>>,
    /// Final decoder state, rows ordered like the hypotheses.
    pub state: DecoderState,
}

/// Runs `step_fn` from `start_ids` until every hypothesis emitted `end_id`
/// or `maximum_iterations` steps were taken.
///
/// `initial_state` must already hold `batch * beam_size` rows, each batch
/// entry repeated `beam_size` times consecutively. Hypotheses of each batch
/// entry are returned best first.
pub fn dynamic_decode<F>(
    mut step_fn: F,
    start_ids: &Array1<u32>,
    end_id: u32,
    initial_state: DecoderState,
    options: &DecodeOptions,
) -> Result<DecodeResult>
where
    F: FnMut(&Array1<u32>, usize, &DecoderState) -> Result<StepOutput>,
{
    let batch_size = start_ids.len();
    let beam_size = options.strategy.beam_size();
    let length_penalty = options.strategy.length_penalty();
    ensure!(beam_size > 0, "beam size must be at least 1");

    let rows = batch_size * beam_size;
    if let Some(state_rows) = initial_state.batch_size() {
        ensure!(
            state_rows == rows,
            "decoder state holds {} rows but {} are decoded ({} x {} beams)",
            state_rows,
            rows,
            batch_size,
            beam_size
        );
    }

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // Only the first beam of each entry is live at the start, so that the
    // first step does not propose the same continuation `beam_size` times.
    let mut beams: Vec<BeamHypothesis> = (0..rows)
        .map(|row| {
            if row % beam_size == 0 {
                BeamHypothesis::new()
            } else {
                BeamHypothesis::dead()
            }
        })
        .collect();
    let mut ids = Array1::from_shape_fn(rows, |row| start_ids[row / beam_size]);
    let mut state = initial_state;

    log::debug!(
        "Decoding {} sequences with {:?} and {:?}",
        batch_size,
        options.strategy,
        options.sampler
    );

    for step in 0..options.maximum_iterations {
        let output = step_fn(&ids, step, &state)?;
        ensure!(
            output.logits.nrows() == rows,
            "decoder returned {} rows of logits, expected {}",
            output.logits.nrows(),
            rows
        );

        let mut next_beams = Vec::with_capacity(rows);
        let mut parents = Vec::with_capacity(rows);
        let mut next_ids = Vec::with_capacity(rows);

        for entry in 0..batch_size {
            let first_row = entry * beam_size;
            let mut candidates = Vec::new();
            for row in first_row..first_row + beam_size {
                let beam = &beams[row];
                if beam.is_dead() {
                    continue;
                }
                if beam.finished {
                    candidates.push(Candidate::carry(row, beam));
                    continue;
                }
                let mut log_probs = log_softmax_1d(&output.logits.row(row).to_owned());
                if step < options.minimum_iterations {
                    if let Some(end_log_prob) = log_probs.get_mut(end_id as usize) {
                        *end_log_prob = f32::NEG_INFINITY;
                    }
                }
                for (token, log_prob) in options.sampler.candidates(&log_probs, beam_size, &mut rng) {
                    candidates.push(Candidate::extend(row, beam, token, log_prob));
                }
            }

            let selected = select_candidates(candidates, beam_size, length_penalty);
            for slot in 0..beam_size {
                match selected.get(slot) {
                    Some(candidate) => {
                        let attention = output
                            .attention
                            .as_ref()
                            .map(|attention| attention.row(candidate.parent));
                        next_beams.push(beams[candidate.parent].advance(candidate, end_id, attention));
                        parents.push(candidate.parent);
                        next_ids.push(candidate.token.unwrap_or(end_id));
                    }
                    None => {
                        next_beams.push(BeamHypothesis::dead());
                        parents.push(first_row);
                        next_ids.push(end_id);
                    }
                }
            }
        }

        let reordered = parents.iter().enumerate().any(|(row, &parent)| row != parent);
        state = if reordered {
            output.state.select(&parents)
        } else {
            output.state
        };
        beams = next_beams;
        ids = Array1::from(next_ids);

        if beams.iter().all(|beam| !beam.is_active()) {
            log::debug!("All hypotheses finished after {} steps", step + 1);
            break;
        }
    }

    Ok(collect_hypotheses(
        beams,
        batch_size,
        beam_size,
        length_penalty,
        end_id,
        options.output_size,
        state,
    ))
}

fn collect_hypotheses(
    beams: Vec<BeamHypothesis>,
    batch_size: usize,
    beam_size: usize,
    length_penalty: f32,
    end_id: u32,
    output_size: Option<usize>,
    state: DecoderState,
) -> DecodeResult {
    let mut order: Vec<usize> = (0..beams.len()).collect();
    for entry in order.chunks_mut(beam_size) {
        entry.sort_by(|&a, &b| {
            beams[b]
                .normalized_score(length_penalty)
                .total_cmp(&beams[a].normalized_score(length_penalty))
        });
    }
    let state = if state.batch_size().is_some() {
        state.select(&order)
    } else {
        state
    };

    let time = output_size
        .unwrap_or_else(|| beams.iter().map(|beam| beam.tokens.len()).max().unwrap_or(0));
    let attention_time = output_size
        .unwrap_or_else(|| beams.iter().map(|beam| beam.attention.len()).max().unwrap_or(0));
    let source_time = beams
        .iter()
        .find_map(|beam| beam.attention.first())
        .map(Array1::len);

    let mut ids = Array3::from_elem((batch_size, beam_size, time), end_id);
    let mut lengths = Array2::zeros((batch_size, beam_size));
    let mut log_probs = Array2::from_elem((batch_size, beam_size), f32::NEG_INFINITY);
    let mut attention =
        source_time.map(|source_time| Array4::zeros((batch_size, beam_size, attention_time, source_time)));

    for (row, &index) in order.iter().enumerate() {
        let beam = &beams[index];
        let (b, k) = (row / beam_size, row % beam_size);
        lengths[[b, k]] = beam.tokens.len().min(time);
        log_probs[[b, k]] = beam.score;
        for (t, &token) in beam.tokens.iter().take(time).enumerate() {
            ids[[b, k, t]] = token;
        }
        if let Some(attention) = attention.as_mut() {
            for (t, vector) in beam.attention.iter().take(attention_time).enumerate() {
                let width = vector.len().min(attention.dim().3);
                attention
                    .slice_mut(s![b, k, t, ..width])
                    .assign(&vector.slice(s![..width]));
            }
        }
    }

    DecodeResult {
        ids,
        lengths,
        log_probs,
        attention,
        state,
    }
}
