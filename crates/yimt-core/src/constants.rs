//! Reserved tokens and their fixed ids.

/// Padding token, always id 0 in vocabularies built with special tokens.
pub const PADDING_TOKEN: &str = "<blank>";
/// Start of sentence token, always id 1.
pub const START_OF_SENTENCE_TOKEN: &str = "<s>";
/// End of sentence token, always id 2.
pub const END_OF_SENTENCE_TOKEN: &str = "</s>";
/// Token returned for ids outside the vocabulary.
pub const UNKNOWN_TOKEN: &str = "<unk>";

pub const PADDING_ID: u32 = 0;
pub const START_OF_SENTENCE_ID: u32 = 1;
pub const END_OF_SENTENCE_ID: u32 = 2;

/// Marker attached to subword pieces that join the previous piece.
pub const SUBWORD_JOINER: &str = "￭";
/// Marker prefixing subword pieces that start a new word.
pub const SUBWORD_SPACER: &str = "▁";

/// Entries of a SentencePiece vocabulary that are never imported.
pub const SENTENCEPIECE_RESERVED: [&str; 3] = [UNKNOWN_TOKEN, START_OF_SENTENCE_TOKEN, END_OF_SENTENCE_TOKEN];

/// Special tokens placed at the start of a target vocabulary.
pub fn sequence_tokens() -> Vec<&'static str> {
    vec![PADDING_TOKEN, START_OF_SENTENCE_TOKEN, END_OF_SENTENCE_TOKEN]
}
