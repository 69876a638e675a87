use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use super::*;
use crate::constants::sequence_tokens;
use crate::tokenizer::CharacterTokenizer;

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_special_tokens_take_first_ids() {
    let vocab = Vocab::with_special_tokens(sequence_tokens());
    assert_eq!(vocab.size(), 3);
    assert_eq!(vocab.lookup("<blank>"), Some(VocabEntry::Id(0)));
    assert_eq!(vocab.lookup("<s>"), Some(VocabEntry::Id(1)));
    assert_eq!(vocab.lookup("</s>"), Some(VocabEntry::Id(2)));
    assert_eq!(vocab.frequency(0), Some(f64::INFINITY));
}

#[test]
fn test_add_counts_occurrences() {
    let mut vocab = Vocab::new();
    vocab.add("a");
    vocab.add("b");
    vocab.add("a");
    vocab.add_bytes(b"b");
    assert_eq!(vocab.size(), 2);
    assert_eq!(vocab.frequency(0), Some(2.0));
    assert_eq!(vocab.frequency(1), Some(2.0));
}

#[test]
fn test_lookup_both_directions() {
    let mut vocab = Vocab::new();
    vocab.add("hello");
    vocab.add("world");

    assert_eq!(vocab.lookup("world").and_then(|e| e.id()), Some(1));
    assert_eq!(vocab.lookup(0usize).and_then(|e| e.token()), Some("hello"));
    assert_eq!(vocab.lookup(7usize), None);
    assert_eq!(vocab.lookup(-1i64), None);
    assert_eq!(vocab.lookup("missing"), None);
    assert_eq!(
        vocab.lookup_or("missing", VocabEntry::Token("<unk>")),
        VocabEntry::Token("<unk>")
    );
}

#[test]
fn test_prune_keeps_specials_and_drops_rare() {
    let mut vocab = Vocab::with_special_tokens(["<blank>"]);
    for token in ["x", "x", "x", "y", "y", "z"] {
        vocab.add(token);
    }

    let pruned = vocab.prune(0, 2);
    assert_eq!(pruned.words(), &["<blank>", "x", "y"]);
    assert_eq!(pruned.frequency(1), Some(3.0));

    let capped = vocab.prune(2, 0);
    assert_eq!(capped.words(), &["<blank>", "x"]);
}

#[test]
fn test_prune_ties_keep_id_order() {
    let mut vocab = Vocab::new();
    for token in ["c", "b", "a", "b", "c", "a"] {
        vocab.add(token);
    }
    let pruned = vocab.prune(0, 0);
    assert_eq!(pruned.words(), &["c", "b", "a"]);
}

#[test]
fn test_prune_never_drops_top_entry() {
    let mut vocab = Vocab::new();
    vocab.add("only");
    vocab.add("rare");
    let pruned = vocab.prune(0, 100);
    assert_eq!(pruned.words(), &["only"]);
}

#[test]
fn test_pad_to_multiple() {
    let mut vocab = Vocab::new();
    for token in ["a", "b", "c", "d", "e"] {
        vocab.add(token);
    }
    let added = vocab.pad_to_multiple(8, 1).unwrap();
    assert_eq!(added, 2);
    assert_eq!(vocab.size(), 7);
    assert_eq!(vocab.id_to_token(5), Some("averyunlikelytoken0"));
    assert_eq!(vocab.id_to_token(6), Some("averyunlikelytoken1"));

    assert_eq!(vocab.pad_to_multiple(8, 1).unwrap(), 0);
    assert!(matches!(
        vocab.pad_to_multiple(0, 1),
        Err(YimtError::InvalidConfig(_))
    ));
}

#[test]
fn test_pad_to_multiple_skips_existing_fillers() {
    let mut vocab = Vocab::new();
    vocab.add("averyunlikelytoken0");
    vocab.pad_to_multiple(3, 0).unwrap();
    assert_eq!(vocab.words(), &["averyunlikelytoken0", "averyunlikelytoken1", "averyunlikelytoken2"]);
}

#[test]
fn test_load_default_format_reports_duplicates() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "vocab.txt", "a\nb\na\nc\r\n");

    let mut vocab = Vocab::new();
    let summary = vocab.load(&path, VocabFormat::Default).unwrap();
    assert_eq!(vocab.words(), &["a", "b", "c"]);
    assert_eq!(summary.added, 3);
    assert_eq!(
        summary.duplicates,
        vec![DuplicateToken { token: "a".into(), line: 3 }]
    );
}

#[test]
fn test_load_sentencepiece_skips_reserved() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "sp.vocab", "<unk>\t0\n<s>\t0\n</s>\t0\n▁the\t-3.2\n▁cat\t-5.1\n");

    let mut vocab = Vocab::with_special_tokens(sequence_tokens());
    vocab.load(&path, VocabFormat::SentencePiece).unwrap();
    assert_eq!(vocab.words(), &["<blank>", "<s>", "</s>", "▁the", "▁cat"]);
}

#[test]
fn test_load_sentencepiece_requires_tab() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "sp.vocab", "▁the -3.2\n");
    let err = Vocab::from_file(&path, VocabFormat::SentencePiece).unwrap_err();
    assert!(matches!(err, YimtError::InvalidFormat(_)));
}

#[test]
fn test_unknown_format_name() {
    assert_eq!("sentencepiece".parse::<VocabFormat>().unwrap(), VocabFormat::SentencePiece);
    let err = "bpe".parse::<VocabFormat>().unwrap_err();
    assert_eq!(err.to_string(), "Invalid vocabulary format: bpe");
}

#[test]
fn test_serialize_then_load_preserves_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.vocab");

    let mut vocab = Vocab::with_special_tokens(sequence_tokens());
    vocab.add("zebra");
    vocab.add("apple");
    vocab.serialize(&path).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "<blank>\n<s>\n</s>\nzebra\napple\n");
    let loaded = Vocab::from_file(&path, VocabFormat::Default).unwrap();
    assert_eq!(loaded.words(), vocab.words());
}

#[test]
fn test_add_from_text() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "corpus.txt", "the cat\nthe dog\n");

    let mut vocab = Vocab::new();
    vocab.add_from_text(&path, None).unwrap();
    assert_eq!(vocab.words(), &["the", "cat", "dog"]);
    assert_eq!(vocab.frequency(0), Some(2.0));

    let mut chars = Vocab::new();
    chars.add_from_text(&path, Some(&CharacterTokenizer)).unwrap();
    assert!(chars.contains("▁"));
    assert!(chars.contains("t"));
}

#[test]
fn test_lookup_tables_with_buckets() {
    let mut vocab = Vocab::with_special_tokens(sequence_tokens());
    vocab.add("hello");
    let tables = create_lookup_tables(&vocab, 1, None);

    assert_eq!(tables.size(), 5);
    assert_eq!(tables.token_to_id("hello"), 3);
    assert_eq!(tables.token_to_id("never-seen"), 4);
    assert_eq!(tables.id_to_token(3), "hello");
    assert_eq!(tables.id_to_token(4), "<unk>");
    assert_eq!(tables.id_to_token(99), "<unk>");
}

#[test]
fn test_lookup_tables_without_buckets() {
    let mut vocab = Vocab::new();
    vocab.add("a");
    vocab.add("b");
    let tables = create_lookup_tables(&vocab, 0, Some("UNK"));
    assert_eq!(tables.size(), 2);
    assert_eq!(tables.token_to_id("c"), 0);
    assert_eq!(tables.id_to_token(5), "UNK");

    let ids = ndarray::array![[1u32, 0], [7, 1]];
    let tokens = tables.ids_to_tokens(&ids);
    assert_eq!(tokens[[0, 0]], "b");
    assert_eq!(tokens[[1, 0]], "UNK");
}
