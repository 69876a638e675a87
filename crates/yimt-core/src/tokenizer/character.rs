use super::Tokenizer;
use crate::constants::SUBWORD_SPACER;

/// One token per character, spaces encoded as `▁`.
///
/// Detokenization runs during decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterTokenizer;

impl Tokenizer for CharacterTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.chars()
            .map(|c| if c == ' ' { SUBWORD_SPACER.to_string() } else { c.to_string() })
            .collect()
    }

    fn detokenize(&self, tokens: &[String]) -> String {
        tokens.concat().replace(SUBWORD_SPACER, " ")
    }

    fn in_graph(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_tokenizer() {
        let tokens = CharacterTokenizer.tokenize("hi yo");
        assert_eq!(tokens, vec!["h", "i", "▁", "y", "o"]);
        assert_eq!(CharacterTokenizer.detokenize(&tokens), "hi yo");
        assert!(CharacterTokenizer.in_graph());
    }
}
