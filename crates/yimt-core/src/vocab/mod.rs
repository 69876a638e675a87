//! Frequency-counting token vocabularies.
//!
//! A [`Vocab`] maps tokens to dense ids in insertion order and keeps a count
//! for each entry. Special tokens registered at construction get an infinite
//! count so that [`Vocab::prune`] never removes them.

mod format;
mod lookup;

#[cfg(test)]
mod tests;

pub use format::VocabFormat;
pub use lookup::{LookupTables, create_lookup_tables};

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::constants::SENTENCEPIECE_RESERVED;
use crate::error::{YimtError, YimtResult};
use crate::tokenizer::Tokenizer;

const FILLER_TOKEN_PREFIX: &str = "averyunlikelytoken";

/// Key accepted by [`Vocab::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabKey<'a> {
    Token(&'a str),
    Id(i64),
}

impl<'a> From<&'a str> for VocabKey<'a> {
    fn from(token: &'a str) -> Self {
        VocabKey::Token(token)
    }
}

impl<'a> From<&'a String> for VocabKey<'a> {
    fn from(token: &'a String) -> Self {
        VocabKey::Token(token.as_str())
    }
}

impl From<i64> for VocabKey<'_> {
    fn from(id: i64) -> Self {
        VocabKey::Id(id)
    }
}

impl From<usize> for VocabKey<'_> {
    fn from(id: usize) -> Self {
        VocabKey::Id(i64::try_from(id).unwrap_or(i64::MAX))
    }
}

impl From<u32> for VocabKey<'_> {
    fn from(id: u32) -> Self {
        VocabKey::Id(i64::from(id))
    }
}

/// Result of a [`Vocab::lookup`]: tokens resolve to ids and ids to tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabEntry<'a> {
    Id(usize),
    Token(&'a str),
}

impl<'a> VocabEntry<'a> {
    pub fn id(&self) -> Option<usize> {
        match self {
            VocabEntry::Id(id) => Some(*id),
            VocabEntry::Token(_) => None,
        }
    }

    pub fn token(&self) -> Option<&'a str> {
        match self {
            VocabEntry::Token(token) => Some(token),
            VocabEntry::Id(_) => None,
        }
    }
}

/// A token skipped while loading because it was already registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateToken {
    pub token: String,
    /// 1-based line number in the vocabulary file.
    pub line: usize,
}

/// Outcome of [`Vocab::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub added: usize,
    pub duplicates: Vec<DuplicateToken>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vocab {
    token_to_id: HashMap<String, usize>,
    id_to_token: Vec<String>,
    frequency: Vec<f64>,
}

impl Vocab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a vocabulary whose first ids are `special_tokens`, in order.
    ///
    /// Repeated special tokens keep their first id.
    pub fn with_special_tokens<I, S>(special_tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self::new();
        for token in special_tokens {
            let token = token.into();
            if !vocab.contains(&token) {
                vocab.push(token, f64::INFINITY);
            }
        }
        vocab
    }

    pub fn from_file<P: AsRef<Path>>(path: P, format: VocabFormat) -> YimtResult<Self> {
        let mut vocab = Self::new();
        vocab.load(path, format)?;
        Ok(vocab)
    }

    pub fn size(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Tokens ordered by id.
    pub fn words(&self) -> &[String] {
        &self.id_to_token
    }

    pub fn contains(&self, token: &str) -> bool {
        self.token_to_id.contains_key(token)
    }

    pub fn frequency(&self, id: usize) -> Option<f64> {
        self.frequency.get(id).copied()
    }

    fn push(&mut self, token: String, frequency: f64) -> usize {
        let id = self.id_to_token.len();
        self.token_to_id.insert(token.clone(), id);
        self.id_to_token.push(token);
        self.frequency.push(frequency);
        id
    }

    /// Counts one occurrence of `token`, registering it if unseen.
    pub fn add(&mut self, token: impl AsRef<str>) {
        let token = token.as_ref();
        match self.token_to_id.get(token) {
            Some(&id) => self.frequency[id] += 1.0,
            None => {
                self.push(token.to_string(), 1.0);
            }
        }
    }

    /// Counts a raw byte token, decoding it as UTF-8 first.
    pub fn add_bytes(&mut self, token: &[u8]) {
        self.add(String::from_utf8_lossy(token));
    }

    /// Counts every token of a text file, one sentence per line.
    ///
    /// Lines are split on whitespace unless a tokenizer is given.
    pub fn add_from_text<P: AsRef<Path>>(
        &mut self,
        path: P,
        tokenizer: Option<&dyn Tokenizer>,
    ) -> YimtResult<()> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let before = self.size();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            match tokenizer {
                Some(tokenizer) => {
                    for token in tokenizer.tokenize(line) {
                        self.add(token);
                    }
                }
                None => {
                    for token in line.split_whitespace() {
                        self.add(token);
                    }
                }
            }
        }
        log::debug!(
            "Counted tokens of {}: {} new entries",
            path.display(),
            self.size() - before
        );
        Ok(())
    }

    /// Appends the tokens of a vocabulary file.
    ///
    /// Entries already present are skipped, logged, and reported in the
    /// returned summary. SentencePiece files have their reserved tokens
    /// (`<unk>`, `<s>`, `</s>`) dropped.
    pub fn load<P: AsRef<Path>>(&mut self, path: P, format: VocabFormat) -> YimtResult<LoadSummary> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut summary = LoadSummary::default();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            let line_number = index + 1;

            let token = match format {
                VocabFormat::Default => line,
                VocabFormat::SentencePiece => {
                    let (token, _score) = line.split_once('\t').ok_or_else(|| {
                        YimtError::InvalidFormat(format!(
                            "{}:{}: expected `token<TAB>score`",
                            path.display(),
                            line_number
                        ))
                    })?;
                    if SENTENCEPIECE_RESERVED.contains(&token) {
                        continue;
                    }
                    token
                }
            };

            if self.contains(token) {
                log::warn!(
                    "Duplicate token '{}' in vocabulary {} at line {}",
                    token,
                    path.display(),
                    line_number
                );
                summary.duplicates.push(DuplicateToken {
                    token: token.to_string(),
                    line: line_number,
                });
                continue;
            }
            self.push(token.to_string(), 1.0);
            summary.added += 1;
        }

        log::info!(
            "Loaded {} tokens from {} ({} format)",
            summary.added,
            path.display(),
            format
        );
        Ok(summary)
    }

    /// Writes one token per line, in id order.
    pub fn serialize<P: AsRef<Path>>(&self, path: P) -> YimtResult<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        for token in &self.id_to_token {
            writer.write_all(token.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Resolves a token to its id, or an id to its token.
    ///
    /// Negative or out-of-range ids resolve to `None`.
    pub fn lookup<'k>(&self, key: impl Into<VocabKey<'k>>) -> Option<VocabEntry<'_>> {
        match key.into() {
            VocabKey::Token(token) => self.token_to_id.get(token).map(|&id| VocabEntry::Id(id)),
            VocabKey::Id(id) => usize::try_from(id)
                .ok()
                .and_then(|id| self.id_to_token.get(id))
                .map(|token| VocabEntry::Token(token.as_str())),
        }
    }

    /// Like [`Vocab::lookup`], returning `default` on a miss.
    pub fn lookup_or<'a, 'k>(
        &'a self,
        key: impl Into<VocabKey<'k>>,
        default: VocabEntry<'a>,
    ) -> VocabEntry<'a> {
        self.lookup(key).unwrap_or(default)
    }

    pub fn token_to_id(&self, token: &str) -> Option<usize> {
        self.token_to_id.get(token).copied()
    }

    pub fn id_to_token(&self, id: usize) -> Option<&str> {
        self.id_to_token.get(id).map(String::as_str)
    }

    /// Returns a new vocabulary keeping the most frequent entries.
    ///
    /// Entries are ranked by decreasing frequency, ties keeping their id
    /// order. Trailing entries below `min_frequency` are dropped, except the
    /// top-ranked one which is always kept. A non-zero `max_size` then caps
    /// the result. Ids are renumbered densely.
    pub fn prune(&self, max_size: usize, min_frequency: u64) -> Vocab {
        let min_frequency = min_frequency as f64;
        let mut ranked: Vec<usize> = (0..self.size()).collect();
        // sort_by is stable: equal frequencies keep id order.
        ranked.sort_by(|&a, &b| self.frequency[b].total_cmp(&self.frequency[a]));

        let mut new_size = ranked.len();
        for &id in ranked.iter().skip(1).rev() {
            if self.frequency[id] < min_frequency {
                new_size -= 1;
            } else {
                break;
            }
        }
        if max_size > 0 {
            new_size = new_size.min(max_size);
        }

        let mut pruned = Vocab::new();
        for &id in &ranked[..new_size] {
            pruned.push(self.id_to_token[id].clone(), self.frequency[id]);
        }
        log::info!("Pruned vocabulary from {} to {} tokens", self.size(), pruned.size());
        pruned
    }

    /// Appends filler tokens until `size + num_oov_buckets` is a multiple of
    /// `multiple`. Returns the number of fillers added.
    pub fn pad_to_multiple(&mut self, multiple: usize, num_oov_buckets: usize) -> YimtResult<usize> {
        if multiple == 0 {
            return Err(YimtError::InvalidConfig(
                "vocabulary size multiple must be positive".to_string(),
            ));
        }
        let mut added = 0;
        let mut index = 0;
        while (self.size() + num_oov_buckets) % multiple != 0 {
            let token = format!("{FILLER_TOKEN_PREFIX}{index}");
            index += 1;
            if self.contains(&token) {
                continue;
            }
            self.add(token);
            added += 1;
        }
        Ok(added)
    }
}
