use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::YimtError;

/// On-disk layout of a vocabulary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VocabFormat {
    /// One token per line.
    #[default]
    Default,
    /// SentencePiece `.vocab` export: `token<TAB>score` per line.
    SentencePiece,
}

impl FromStr for VocabFormat {
    type Err = YimtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(VocabFormat::Default),
            "sentencepiece" => Ok(VocabFormat::SentencePiece),
            other => Err(YimtError::InvalidFormat(other.to_string())),
        }
    }
}

impl fmt::Display for VocabFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VocabFormat::Default => write!(f, "default"),
            VocabFormat::SentencePiece => write!(f, "sentencepiece"),
        }
    }
}
