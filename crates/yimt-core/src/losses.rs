//! Sequence losses.
//!
//! Every loss returns a [`SequenceLoss`]: the summed loss plus the two
//! normalizers a trainer divides by, one per example and one per token.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Array3, ArrayView1, Axis, Zip, s};
use serde::{Deserialize, Serialize};

use crate::decoding::log_softmax_1d;
use crate::error::{YimtError, YimtResult};
use crate::utils::sequence_mask;

/// Multiplier of the standard deviation above which a token loss is an
/// outlier.
const OUTLIER_STDDEV_FACTOR: f32 = 3.0;
const ATTENTION_EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceLoss {
    pub loss: f32,
    pub normalizer: f32,
    pub token_normalizer: f32,
}

impl SequenceLoss {
    /// Loss divided by the token normalizer, what trainers usually report.
    pub fn per_token(&self) -> f32 {
        if self.token_normalizer > 0.0 {
            self.loss / self.token_normalizer
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyOptions<'a> {
    /// Per-example weights, `[batch]`.
    pub sequence_weight: Option<&'a Array1<f32>>,
    pub label_smoothing: f32,
    /// Average each sequence over its tokens before summing over the batch.
    pub average_in_time: bool,
    /// Drop tokens whose loss exceeds mean + 3 std of the batch. Training only.
    pub mask_outliers: bool,
    pub training: bool,
}

fn check_batch_shapes(
    logits: &Array3<f32>,
    labels: &Array2<u32>,
    sequence_length: &Array1<usize>,
) -> YimtResult<()> {
    let (batch, time, _) = logits.dim();
    if labels.dim() != (batch, time) || sequence_length.len() != batch {
        return Err(YimtError::InvalidConfig(format!(
            "logits {:?}, labels {:?} and {} lengths do not describe the same batch",
            logits.dim(),
            labels.dim(),
            sequence_length.len()
        )));
    }
    Ok(())
}

/// Label smoothed cross entropy of every token, `[batch, time]`.
fn token_cross_entropy(
    logits: &Array3<f32>,
    labels: &Array2<u32>,
    label_smoothing: f32,
) -> YimtResult<Array2<f32>> {
    let (batch, time, vocab) = logits.dim();
    if let Some(&bad) = labels.iter().find(|&&label| label as usize >= vocab) {
        return Err(YimtError::InvalidConfig(format!(
            "label {} is out of range for {} logits",
            bad, vocab
        )));
    }
    let flat_logits = logits.view().into_shape_with_order((batch * time, vocab))?;
    let flat_labels = labels.view().into_shape_with_order(batch * time)?;
    let mut losses = Array1::<f32>::zeros(batch * time);

    let smooth = label_smoothing / vocab as f32;
    Zip::from(&mut losses)
        .and(flat_logits.rows())
        .and(&flat_labels)
        .par_for_each(|loss, row, &label| {
            let log_probs = log_softmax_1d(&row.to_owned());
            let gold = log_probs[label as usize];
            *loss = if label_smoothing > 0.0 {
                -(1.0 - label_smoothing) * gold - smooth * log_probs.sum()
            } else {
                -gold
            };
        });

    Ok(losses.into_shape_with_order((batch, time))?)
}

/// Zeroes the weight of tokens whose loss is above mean + 3 std.
fn mask_outlier_tokens(losses: &Array2<f32>, weight: &mut Array2<f32>) {
    let valid: Vec<f32> = Zip::from(losses)
        .and(&*weight)
        .fold(Vec::new(), |mut acc, &loss, &w| {
            if w > 0.0 {
                acc.push(loss);
            }
            acc
        });
    if valid.len() < 2 {
        return;
    }
    let count = valid.len() as f32;
    let mean = valid.iter().sum::<f32>() / count;
    let variance = valid.iter().map(|l| (l - mean).powi(2)).sum::<f32>() / count;
    let threshold = mean + OUTLIER_STDDEV_FACTOR * variance.sqrt();
    let mut masked = 0;
    Zip::from(weight).and(losses).for_each(|w, &loss| {
        if *w > 0.0 && loss > threshold {
            *w = 0.0;
            masked += 1;
        }
    });
    if masked > 0 {
        log::debug!("Masked {} outlier tokens above loss {:.4}", masked, threshold);
    }
}

/// Cross entropy over `[batch, time, vocab]` logits and `[batch, time]`
/// labels, ignoring positions beyond each sequence length.
pub fn cross_entropy_sequence_loss(
    logits: &Array3<f32>,
    labels: &Array2<u32>,
    sequence_length: &Array1<usize>,
    options: &CrossEntropyOptions<'_>,
) -> YimtResult<SequenceLoss> {
    check_batch_shapes(logits, labels, sequence_length)?;
    let (batch, time, _) = logits.dim();
    let losses = token_cross_entropy(logits, labels, options.label_smoothing)?;

    let mut weight = sequence_mask(sequence_length, time);
    if options.training && options.mask_outliers {
        mask_outlier_tokens(&losses, &mut weight);
    }
    let sequence_weight = match options.sequence_weight {
        Some(sequence_weight) if sequence_weight.len() != batch => {
            return Err(YimtError::InvalidConfig(format!(
                "got {} sequence weights for a batch of {}",
                sequence_weight.len(),
                batch
            )));
        }
        Some(sequence_weight) => sequence_weight.clone(),
        None => Array1::ones(batch),
    };

    if options.average_in_time {
        let token_counts = weight.sum_axis(Axis(1));
        let sums = (&losses * &weight).sum_axis(Axis(1));
        let loss = Zip::from(&sums)
            .and(&token_counts)
            .and(&sequence_weight)
            .fold(0.0f32, |acc, &sum, &count, &w| {
                if count > 0.0 { acc + w * sum / count } else { acc }
            });
        return Ok(SequenceLoss {
            loss,
            normalizer: sequence_weight.sum(),
            token_normalizer: weight.sum(),
        });
    }

    let weight = &weight * &sequence_weight.insert_axis(Axis(1));
    let loss = (&losses * &weight).sum();
    let normalizer = weight.sum();
    Ok(SequenceLoss {
        loss,
        normalizer,
        token_normalizer: normalizer,
    })
}

/// Sum of the token cross entropies of each sequence, `[batch]`.
fn sequence_negative_log_likelihood(
    logits: &Array3<f32>,
    labels: &Array2<u32>,
    sequence_length: &Array1<usize>,
) -> YimtResult<Array1<f32>> {
    check_batch_shapes(logits, labels, sequence_length)?;
    let losses = token_cross_entropy(logits, labels, 0.0)?;
    let weight = sequence_mask(sequence_length, logits.len_of(Axis(1)));
    Ok((&losses * &weight).sum_axis(Axis(1)))
}

/// Contrastive loss pushing gold sequences at least `eta` nats above their
/// noisy counterparts: `sum(max(0, eta + nll_gold - nll_noisy))`.
///
/// Both normalizers are the batch size.
#[allow(clippy::too_many_arguments)]
pub fn max_margin_loss(
    true_logits: &Array3<f32>,
    true_labels: &Array2<u32>,
    true_sequence_length: &Array1<usize>,
    negative_logits: &Array3<f32>,
    negative_labels: &Array2<u32>,
    negative_sequence_length: &Array1<usize>,
    eta: f32,
) -> YimtResult<SequenceLoss> {
    let gold = sequence_negative_log_likelihood(true_logits, true_labels, true_sequence_length)?;
    let noisy = sequence_negative_log_likelihood(
        negative_logits,
        negative_labels,
        negative_sequence_length,
    )?;
    if gold.len() != noisy.len() {
        return Err(YimtError::InvalidConfig(format!(
            "{} gold sequences but {} noisy ones",
            gold.len(),
            noisy.len()
        )));
    }
    let loss = Zip::from(&gold)
        .and(&noisy)
        .fold(0.0f32, |acc, &g, &n| acc + (eta + g - n).max(0.0));
    let batch = gold.len() as f32;
    Ok(SequenceLoss {
        loss,
        normalizer: batch,
        token_normalizer: batch,
    })
}

/// Cost comparing decoder attention with a gold alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuidedAlignmentType {
    /// Cross entropy of the attention against the gold distribution.
    Ce,
    /// Mean squared error.
    Mse,
}

impl FromStr for GuidedAlignmentType {
    type Err = YimtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ce" => Ok(GuidedAlignmentType::Ce),
            "mse" => Ok(GuidedAlignmentType::Mse),
            other => Err(YimtError::InvalidConfig(format!(
                "invalid guided_alignment_type: {other}"
            ))),
        }
    }
}

impl fmt::Display for GuidedAlignmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuidedAlignmentType::Ce => write!(f, "ce"),
            GuidedAlignmentType::Mse => write!(f, "mse"),
        }
    }
}

fn alignment_position_cost(
    attention: ArrayView1<'_, f32>,
    gold: ArrayView1<'_, f32>,
    cost_type: GuidedAlignmentType,
) -> f32 {
    match cost_type {
        GuidedAlignmentType::Ce => -Zip::from(&gold).and(&attention).fold(0.0f32, |acc, &g, &a| {
            acc + g * a.clamp(ATTENTION_EPSILON, 1.0).ln()
        }),
        GuidedAlignmentType::Mse => {
            let width = gold.len().max(1) as f32;
            Zip::from(&gold)
                .and(&attention)
                .fold(0.0f32, |acc, &g, &a| acc + (a - g).powi(2))
                / width
        }
    }
}

/// Weighted guided alignment cost, averaged over the target positions
/// within `sequence_length`.
///
/// `attention` and `gold` are `[batch, target_time, source_time]`; when
/// their time dimensions differ only the common prefix is compared.
pub fn guided_alignment_cost(
    attention: &Array3<f32>,
    gold: &Array3<f32>,
    sequence_length: Option<&Array1<usize>>,
    cost_type: GuidedAlignmentType,
    weight: f32,
) -> YimtResult<f32> {
    let (batch, attention_time, attention_source) = attention.dim();
    let (gold_batch, gold_time, gold_source) = gold.dim();
    if batch != gold_batch {
        return Err(YimtError::InvalidConfig(format!(
            "attention batch {} does not match alignment batch {}",
            batch, gold_batch
        )));
    }
    let time = attention_time.min(gold_time);
    let source = attention_source.min(gold_source);
    let attention = attention.slice(s![.., ..time, ..source]);
    let gold = gold.slice(s![.., ..time, ..source]);

    let mut total = 0.0f32;
    let mut positions = 0usize;
    for b in 0..batch {
        let length = sequence_length.map_or(time, |lengths| lengths[b].min(time));
        for t in 0..length {
            total += alignment_position_cost(
                attention.slice(s![b, t, ..]),
                gold.slice(s![b, t, ..]),
                cost_type,
            );
            positions += 1;
        }
    }
    if positions == 0 {
        return Ok(0.0);
    }
    Ok(weight * total / positions as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn uniform_logits(batch: usize, time: usize, vocab: usize) -> Array3<f32> {
        Array3::zeros((batch, time, vocab))
    }

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let logits = uniform_logits(2, 3, 4);
        let labels = array![[0u32, 1, 2], [3, 0, 0]];
        let lengths = array![3usize, 1];
        let loss = cross_entropy_sequence_loss(&logits, &labels, &lengths, &Default::default()).unwrap();

        let per_token = 4.0f32.ln();
        assert_abs_diff_eq!(loss.loss, 4.0 * per_token, epsilon = 1e-4);
        assert_abs_diff_eq!(loss.normalizer, 4.0);
        assert_abs_diff_eq!(loss.token_normalizer, 4.0);
        assert_abs_diff_eq!(loss.per_token(), per_token, epsilon = 1e-5);
    }

    #[test]
    fn test_label_smoothing_is_neutral_on_uniform_logits() {
        let logits = uniform_logits(1, 2, 5);
        let labels = array![[1u32, 2]];
        let lengths = array![2usize];
        let options = CrossEntropyOptions {
            label_smoothing: 0.1,
            ..Default::default()
        };
        let loss = cross_entropy_sequence_loss(&logits, &labels, &lengths, &options).unwrap();
        assert_abs_diff_eq!(loss.loss, 2.0 * 5.0f32.ln(), epsilon = 1e-4);
    }

    #[test]
    fn test_label_smoothing_penalizes_confident_predictions() {
        let mut logits = uniform_logits(1, 1, 3);
        logits[[0, 0, 0]] = 10.0;
        let labels = array![[0u32]];
        let lengths = array![1usize];
        let plain = cross_entropy_sequence_loss(&logits, &labels, &lengths, &Default::default()).unwrap();
        let smoothed = cross_entropy_sequence_loss(
            &logits,
            &labels,
            &lengths,
            &CrossEntropyOptions { label_smoothing: 0.1, ..Default::default() },
        )
        .unwrap();
        assert!(smoothed.loss > plain.loss);
    }

    #[test]
    fn test_sequence_weight_and_average_in_time() {
        let logits = uniform_logits(2, 2, 2);
        let labels = array![[0u32, 1], [1, 0]];
        let lengths = array![2usize, 1];
        let weights = array![1.0f32, 0.5];
        let options = CrossEntropyOptions {
            sequence_weight: Some(&weights),
            average_in_time: true,
            ..Default::default()
        };
        let loss = cross_entropy_sequence_loss(&logits, &labels, &lengths, &options).unwrap();
        let ln2 = 2.0f32.ln();
        assert_abs_diff_eq!(loss.loss, 1.5 * ln2, epsilon = 1e-5);
        assert_abs_diff_eq!(loss.normalizer, 1.5);
        assert_abs_diff_eq!(loss.token_normalizer, 3.0);
    }

    #[test]
    fn test_outlier_masking_only_in_training() {
        let mut logits = uniform_logits(1, 12, 2);
        // Last token confidently wrong.
        logits[[0, 11, 0]] = 20.0;
        let labels = Array2::from_elem((1, 12), 1u32);
        let lengths = array![12usize];
        let mut options = CrossEntropyOptions { mask_outliers: true, ..Default::default() };

        let eval = cross_entropy_sequence_loss(&logits, &labels, &lengths, &options).unwrap();
        assert_abs_diff_eq!(eval.normalizer, 12.0);

        options.training = true;
        let train = cross_entropy_sequence_loss(&logits, &labels, &lengths, &options).unwrap();
        assert_abs_diff_eq!(train.normalizer, 11.0);
        assert!(train.loss < eval.loss);
    }

    #[test]
    fn test_cross_entropy_rejects_mismatched_shapes() {
        let logits = uniform_logits(1, 2, 3);
        let err = cross_entropy_sequence_loss(&logits, &array![[0u32]], &array![1usize], &Default::default());
        assert!(err.is_err());
        let err = cross_entropy_sequence_loss(&logits, &array![[0u32, 9]], &array![2usize], &Default::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_max_margin_loss() {
        let mut good = uniform_logits(1, 1, 2);
        good[[0, 0, 0]] = 5.0;
        let labels = array![[0u32]];
        let lengths = array![1usize];

        // Identical sequences: the loss is exactly the margin.
        let loss = max_margin_loss(&good, &labels, &lengths, &good, &labels, &lengths, 0.1).unwrap();
        assert_abs_diff_eq!(loss.loss, 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(loss.normalizer, 1.0);

        // Noisy sequence far less likely: no loss.
        let noisy_labels = array![[1u32]];
        let loss = max_margin_loss(&good, &labels, &lengths, &good, &noisy_labels, &lengths, 0.1).unwrap();
        assert_abs_diff_eq!(loss.loss, 0.0);
    }

    #[test]
    fn test_guided_alignment_cost() {
        let gold = array![[[1.0f32, 0.0], [0.0, 1.0]]];
        let perfect = gold.clone();
        let mse = guided_alignment_cost(&perfect, &gold, None, GuidedAlignmentType::Mse, 1.0).unwrap();
        assert_abs_diff_eq!(mse, 0.0);

        let uniform = Array3::from_elem((1, 2, 2), 0.5f32);
        let ce = guided_alignment_cost(&uniform, &gold, None, GuidedAlignmentType::Ce, 2.0).unwrap();
        assert_abs_diff_eq!(ce, 2.0 * 2.0f32.ln(), epsilon = 1e-5);

        let masked = guided_alignment_cost(
            &uniform,
            &gold,
            Some(&array![1usize]),
            GuidedAlignmentType::Mse,
            1.0,
        )
        .unwrap();
        assert_abs_diff_eq!(masked, 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_guided_alignment_type_parsing() {
        assert_eq!("CE".parse::<GuidedAlignmentType>().unwrap(), GuidedAlignmentType::Ce);
        assert!("l1".parse::<GuidedAlignmentType>().is_err());
    }
}
