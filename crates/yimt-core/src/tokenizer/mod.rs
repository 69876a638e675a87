//! Tokenizers used to split training text and rebuild predicted sentences.

mod character;
mod space;

pub use character::CharacterTokenizer;
pub use space::SpaceTokenizer;

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;

    fn detokenize(&self, tokens: &[String]) -> String;

    /// Whether detokenization happens inside decoding, producing text
    /// predictions instead of token predictions.
    fn in_graph(&self) -> bool {
        false
    }
}
