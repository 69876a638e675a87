use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use yimt_core::VocabFormat;
use yimt_core::constants::{END_OF_SENTENCE_TOKEN, PADDING_TOKEN, START_OF_SENTENCE_TOKEN};
use yimt_core::vocab::Vocab;

use crate::TokenizerArg;

/// Builds, prunes, pads and saves a vocabulary.
#[allow(clippy::too_many_arguments)]
pub fn run(
    files: &[PathBuf],
    save_vocab: &Path,
    size: usize,
    min_frequency: u64,
    size_multiple: Option<usize>,
    from_vocab: Option<&Path>,
    from_format: VocabFormat,
    without_sequence_tokens: bool,
    tokenizer: TokenizerArg,
) -> Result<()> {
    let special_tokens = if without_sequence_tokens {
        vec![PADDING_TOKEN]
    } else {
        vec![PADDING_TOKEN, START_OF_SENTENCE_TOKEN, END_OF_SENTENCE_TOKEN]
    };
    let mut vocab = Vocab::with_special_tokens(special_tokens);

    if let Some(path) = from_vocab {
        let summary = vocab
            .load(path, from_format)
            .with_context(|| format!("Failed to load vocabulary '{}'", path.display()))?;
        if !summary.duplicates.is_empty() {
            log::warn!(
                "Skipped {} duplicate tokens in {}",
                summary.duplicates.len(),
                path.display()
            );
        }
    }

    let tokenizer = tokenizer.build();
    for file in files {
        vocab
            .add_from_text(file, Some(tokenizer.as_ref()))
            .with_context(|| format!("Failed to read '{}'", file.display()))?;
    }

    let mut vocab = vocab.prune(size, min_frequency);
    if let Some(multiple) = size_multiple {
        vocab.pad_to_multiple(multiple, 1)?;
    }
    vocab
        .serialize(save_vocab)
        .with_context(|| format!("Failed to write '{}'", save_vocab.display()))?;

    log::info!("Saved {} tokens to {}", vocab.size(), save_vocab.display());
    println!("{}", vocab.size());
    Ok(())
}
