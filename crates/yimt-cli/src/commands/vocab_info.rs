use std::path::Path;

use anyhow::{Context, Result};
use yimt_core::VocabFormat;
use yimt_core::vocab::{Vocab, VocabEntry, VocabKey};

/// Prints the vocabulary size, then one `query<TAB>result` line per lookup.
/// Numeric queries are ids; misses print `-`.
pub fn run(path: &Path, format: VocabFormat, lookups: &[String]) -> Result<()> {
    let vocab = Vocab::from_file(path, format)
        .with_context(|| format!("Failed to load vocabulary '{}'", path.display()))?;

    println!("size: {}", vocab.size());
    for query in lookups {
        println!("{}\t{}", query, describe(&vocab, query));
    }
    Ok(())
}

fn describe(vocab: &Vocab, query: &str) -> String {
    let key = match query.parse::<i64>() {
        Ok(id) => VocabKey::Id(id),
        Err(_) => VocabKey::Token(query),
    };
    match vocab.lookup(key) {
        Some(VocabEntry::Id(id)) => id.to_string(),
        Some(VocabEntry::Token(token)) => token.to_string(),
        None => "-".to_string(),
    }
}
