//! Word alignments: Pharaoh parsing and translation output formatting.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{YimtError, YimtResult};
use crate::utils::argmax;

/// How alignments are appended to a formatted translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentType {
    /// `src-tgt` pairs of the most attended source position.
    Hard,
    /// Full attention rows.
    Soft,
}

impl FromStr for AlignmentType {
    type Err = YimtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hard" => Ok(AlignmentType::Hard),
            "soft" => Ok(AlignmentType::Soft),
            other => Err(YimtError::InvalidConfig(format!(
                "Invalid alignment type {other}"
            ))),
        }
    }
}

impl fmt::Display for AlignmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentType::Hard => write!(f, "hard"),
            AlignmentType::Soft => write!(f, "soft"),
        }
    }
}

/// Parses a Pharaoh line (`"0-0 1-2 2-1"`, source index first) into a
/// `[target_length, source_length]` matrix with 1.0 at aligned pairs.
pub fn alignment_matrix_from_pharaoh(
    line: &str,
    source_length: usize,
    target_length: usize,
) -> YimtResult<Array2<f32>> {
    let mut matrix = Array2::zeros((target_length, source_length));
    for pair in line.split_whitespace() {
        let (source, target) = pair
            .split_once('-')
            .ok_or_else(|| YimtError::InvalidAlignment(format!("expected `src-tgt`, got `{pair}`")))?;
        let parse = |index: &str| {
            index
                .parse::<usize>()
                .map_err(|e| YimtError::InvalidAlignment(format!("`{pair}`: {e}")))
        };
        let (source, target) = (parse(source)?, parse(target)?);
        if source >= source_length || target >= target_length {
            return Err(YimtError::InvalidAlignment(format!(
                "pair `{pair}` is outside a {source_length}x{target_length} alignment"
            )));
        }
        matrix[[target, source]] = 1.0;
    }
    Ok(matrix)
}

/// Formats one translation line.
///
/// Produces `"{score:.6} ||| "` before the sentence when a score is given,
/// and ` ||| ` followed by the alignment when `attention`
/// (`[target_time, source_time]`) and an alignment type are given.
pub fn format_translation_output(
    sentence: &str,
    score: Option<f32>,
    attention: Option<ArrayView2<'_, f32>>,
    alignment_type: Option<AlignmentType>,
) -> String {
    let mut line = match score {
        Some(score) => format!("{score:.6} ||| {sentence}"),
        None => sentence.to_string(),
    };
    if let (Some(attention), Some(alignment_type)) = (attention, alignment_type) {
        let alignments = match alignment_type {
            AlignmentType::Hard => attention
                .axis_iter(Axis(0))
                .enumerate()
                .map(|(target, row)| format!("{}-{}", argmax(row), target))
                .collect::<Vec<_>>()
                .join(" "),
            AlignmentType::Soft => attention
                .axis_iter(Axis(0))
                .map(|row| {
                    row.iter()
                        .map(|v| format!("{v:.6}"))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect::<Vec<_>>()
                .join(" ; "),
        };
        line.push_str(" ||| ");
        line.push_str(&alignments);
    }
    line
}
