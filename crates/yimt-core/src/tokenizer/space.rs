use super::Tokenizer;

/// Splits on whitespace and joins with a single space.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpaceTokenizer;

impl Tokenizer for SpaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    fn detokenize(&self, tokens: &[String]) -> String {
        tokens.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_tokenizer() {
        let tokens = SpaceTokenizer.tokenize("  hello   world ");
        assert_eq!(tokens, vec!["hello", "world"]);
        assert_eq!(SpaceTokenizer.detokenize(&tokens), "hello world");
        assert!(!SpaceTokenizer.in_graph());
    }
}
