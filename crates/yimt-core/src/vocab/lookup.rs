//! Id lookup tables with hashed out-of-vocabulary buckets.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;

use ndarray::{Array, Dimension};

use super::{Vocab, VocabFormat};
use crate::constants::UNKNOWN_TOKEN;
use crate::error::YimtResult;

/// Bidirectional token/id tables derived from a [`Vocab`].
///
/// The id space is `vocab.size() + num_oov_buckets`. Tokens missing from the
/// vocabulary hash into one of the buckets placed after the last real id, or
/// map to id 0 when there are no buckets.
#[derive(Debug, Clone)]
pub struct LookupTables {
    token_to_id: HashMap<String, u32>,
    id_to_token: Vec<String>,
    num_oov_buckets: usize,
    unk_token: String,
}

/// Builds lookup tables for `vocab`.
pub fn create_lookup_tables(
    vocab: &Vocab,
    num_oov_buckets: usize,
    unk_token: Option<&str>,
) -> LookupTables {
    let id_to_token = vocab.words().to_vec();
    let token_to_id = id_to_token
        .iter()
        .enumerate()
        .map(|(id, token)| (token.clone(), id as u32))
        .collect();
    LookupTables {
        token_to_id,
        id_to_token,
        num_oov_buckets,
        unk_token: unk_token.unwrap_or(UNKNOWN_TOKEN).to_string(),
    }
}

impl LookupTables {
    /// Loads a default-format vocabulary file and builds its tables.
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        num_oov_buckets: usize,
        unk_token: Option<&str>,
    ) -> YimtResult<Self> {
        let vocab = Vocab::from_file(path, VocabFormat::Default)?;
        Ok(create_lookup_tables(&vocab, num_oov_buckets, unk_token))
    }

    /// Number of ids, including the out-of-vocabulary buckets.
    pub fn size(&self) -> usize {
        self.id_to_token.len() + self.num_oov_buckets
    }

    /// Number of real vocabulary entries.
    pub fn vocab_size(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn num_oov_buckets(&self) -> usize {
        self.num_oov_buckets
    }

    pub fn unk_token(&self) -> &str {
        &self.unk_token
    }

    pub fn token_to_id(&self, token: &str) -> u32 {
        if let Some(&id) = self.token_to_id.get(token) {
            return id;
        }
        if self.num_oov_buckets == 0 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let bucket = (hasher.finish() % self.num_oov_buckets as u64) as usize;
        (self.id_to_token.len() + bucket) as u32
    }

    pub fn id_to_token(&self, id: u32) -> &str {
        self.id_to_token
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or(&self.unk_token)
    }

    pub fn tokens_to_ids<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<u32> {
        tokens
            .iter()
            .map(|token| self.token_to_id(token.as_ref()))
            .collect()
    }

    /// Maps every id of an array of any rank back to its token.
    pub fn ids_to_tokens<D: Dimension>(&self, ids: &Array<u32, D>) -> Array<String, D> {
        ids.map(|&id| self.id_to_token(id).to_string())
    }
}
