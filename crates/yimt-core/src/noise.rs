//! Word-level noise applied to decoded or reference token sequences.
//!
//! Tokens are first grouped into words using the subword marker: in joiner
//! mode a piece attaches to its neighbour when either side carries the
//! joiner, in spacer mode a piece starts a new word when it begins with the
//! spacer. Each noise then works on whole words.

use std::collections::BTreeMap;

use ndarray::{Array2, Array3, Axis};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::constants::{SUBWORD_SPACER, UNKNOWN_TOKEN};
use crate::error::{YimtError, YimtResult};

/// One entry of a `decoding_noise` list: `{ dropout = 0.1 }`,
/// `{ replacement = [0.1, "<unk>"] }` or `{ permutation = 3 }`.
pub type NoiseSpec = BTreeMap<String, NoiseArgs>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoiseArgs {
    Number(f64),
    Replacement(f64, String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Noise {
    /// Drops each word with the given probability.
    Dropout { probability: f64 },
    /// Replaces each word by `filler` with the given probability.
    Replacement { probability: f64, filler: String },
    /// Shuffles words, each moving at most `max_distance` positions.
    Permutation { max_distance: usize },
    /// Removes exactly `count` randomly chosen words.
    Omission { count: usize },
}

impl Noise {
    fn from_spec(name: &str, args: &NoiseArgs) -> YimtResult<Self> {
        let invalid = || {
            YimtError::InvalidConfig(format!("invalid arguments for noise type {name}: {args:?}"))
        };
        let probability = |p: f64| {
            if (0.0..=1.0).contains(&p) {
                Ok(p)
            } else {
                Err(YimtError::InvalidConfig(format!(
                    "noise type {name} expects a probability in [0, 1], got {p}"
                )))
            }
        };
        match (name, args) {
            ("dropout", NoiseArgs::Number(p)) => Ok(Noise::Dropout {
                probability: probability(*p)?,
            }),
            ("replacement", NoiseArgs::Number(p)) => Ok(Noise::Replacement {
                probability: probability(*p)?,
                filler: UNKNOWN_TOKEN.to_string(),
            }),
            ("replacement", NoiseArgs::Replacement(p, filler)) => Ok(Noise::Replacement {
                probability: probability(*p)?,
                filler: filler.clone(),
            }),
            ("permutation", NoiseArgs::Number(k)) if k.is_finite() && *k >= 0.0 => {
                Ok(Noise::Permutation {
                    max_distance: *k as usize,
                })
            }
            ("dropout" | "permutation", _) => Err(invalid()),
            (other, _) => Err(YimtError::InvalidConfig(format!(
                "Invalid noise type: {other}"
            ))),
        }
    }

    fn apply<R: Rng + ?Sized>(&self, words: Vec<Vec<String>>, rng: &mut R) -> Vec<Vec<String>> {
        match self {
            Noise::Dropout { probability } => words
                .into_iter()
                .filter(|_| !rng.gen_bool(probability.clamp(0.0, 1.0)))
                .collect(),
            Noise::Replacement { probability, filler } => words
                .into_iter()
                .map(|word| {
                    if rng.gen_bool(probability.clamp(0.0, 1.0)) {
                        vec![filler.clone()]
                    } else {
                        word
                    }
                })
                .collect(),
            Noise::Permutation { max_distance } => {
                if *max_distance == 0 {
                    return words;
                }
                let mut keyed: Vec<(f64, Vec<String>)> = words
                    .into_iter()
                    .enumerate()
                    .map(|(i, word)| (i as f64 + rng.gen_range(0.0..*max_distance as f64), word))
                    .collect();
                keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
                keyed.into_iter().map(|(_, word)| word).collect()
            }
            Noise::Omission { count } => {
                let count = (*count).min(words.len());
                let mut dropped: Vec<usize> = (0..words.len()).collect();
                dropped.shuffle(rng);
                dropped.truncate(count);
                words
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| !dropped.contains(i))
                    .map(|(_, word)| word)
                    .collect()
            }
        }
    }
}

/// Applies a chain of [`Noise`] to token sequences.
#[derive(Debug, Clone)]
pub struct WordNoiser {
    noises: Vec<Noise>,
    subword_token: String,
    is_spacer: bool,
}

impl WordNoiser {
    /// `is_spacer` defaults to whether `subword_token` is `▁`.
    pub fn new(noises: Vec<Noise>, subword_token: &str, is_spacer: Option<bool>) -> Self {
        Self {
            noises,
            subword_token: subword_token.to_string(),
            is_spacer: is_spacer.unwrap_or(subword_token == SUBWORD_SPACER),
        }
    }

    /// Builds a noiser from `decoding_noise` entries, each holding exactly
    /// one noise type.
    pub fn from_specs(
        specs: &[NoiseSpec],
        subword_token: &str,
        is_spacer: Option<bool>,
    ) -> YimtResult<Self> {
        let mut noises = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut entries = spec.iter();
            let (name, args) = match (entries.next(), entries.next()) {
                (Some(entry), None) => entry,
                _ => {
                    return Err(YimtError::InvalidConfig(format!(
                        "each noise entry must define exactly one noise type, got {} keys",
                        spec.len()
                    )));
                }
            };
            noises.push(Noise::from_spec(&name.to_lowercase(), args)?);
        }
        Ok(Self::new(noises, subword_token, is_spacer))
    }

    pub fn noises(&self) -> &[Noise] {
        &self.noises
    }

    fn group_words(&self, tokens: &[String]) -> Vec<Vec<String>> {
        let mut words: Vec<Vec<String>> = Vec::new();
        for token in tokens {
            let starts_word = match words.last().and_then(|word| word.last()) {
                None => true,
                Some(_) if self.is_spacer => token.starts_with(&self.subword_token),
                Some(previous) => {
                    !previous.ends_with(&self.subword_token) && !token.starts_with(&self.subword_token)
                }
            };
            match words.last_mut() {
                Some(word) if !starts_word => word.push(token.clone()),
                _ => words.push(vec![token.clone()]),
            }
        }
        words
    }

    /// Noises a single token sequence.
    pub fn apply<R: Rng + ?Sized>(&self, tokens: &[String], rng: &mut R) -> Vec<String> {
        let mut words = self.group_words(tokens);
        for noise in &self.noises {
            words = noise.apply(words, rng);
        }
        words.into_iter().flatten().collect()
    }

    /// Noises a `[batch, beam, time]` token batch.
    ///
    /// Returns the noisy tokens, right padded with `padding` to the longest
    /// noisy sequence, and their lengths.
    pub fn apply_batch<R: Rng + ?Sized>(
        &self,
        tokens: &Array3<String>,
        lengths: &Array2<usize>,
        padding: &str,
        rng: &mut R,
    ) -> (Array3<String>, Array2<usize>) {
        let (batch, beam, _) = tokens.dim();
        let mut noisy: Vec<Vec<String>> = Vec::with_capacity(batch * beam);
        for (b, per_beam) in tokens.axis_iter(Axis(0)).enumerate() {
            for (k, sequence) in per_beam.axis_iter(Axis(0)).enumerate() {
                let length = lengths[[b, k]].min(sequence.len());
                let sequence: Vec<String> = sequence.iter().take(length).cloned().collect();
                noisy.push(self.apply(&sequence, rng));
            }
        }

        let max_length = noisy.iter().map(Vec::len).max().unwrap_or(0);
        let mut out = Array3::from_elem((batch, beam, max_length), padding.to_string());
        let mut out_lengths = Array2::zeros((batch, beam));
        for (index, sequence) in noisy.into_iter().enumerate() {
            let (b, k) = (index / beam, index % beam);
            out_lengths[[b, k]] = sequence.len();
            for (t, token) in sequence.into_iter().enumerate() {
                out[[b, k, t]] = token;
            }
        }
        (out, out_lengths)
    }
}
