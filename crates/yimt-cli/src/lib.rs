use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use yimt_core::{CharacterTokenizer, SpaceTokenizer, Tokenizer, VocabFormat};

pub mod commands;

#[derive(Parser)]
#[command(name = "yimt")]
#[command(about = "Yimt: vocabularies and schedules for translation models", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Build a vocabulary from tokenized training files
    BuildVocab {
        /// Training files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Where to write the vocabulary
        #[arg(long)]
        save_vocab: PathBuf,

        /// Maximum vocabulary size (0 keeps every token)
        #[arg(long, default_value_t = 0)]
        size: usize,

        /// Minimum token frequency
        #[arg(long, default_value_t = 1)]
        min_frequency: u64,

        /// Pad so that the size plus one OOV bucket is a multiple of this value
        #[arg(long)]
        size_multiple: Option<usize>,

        /// Existing vocabulary to start from
        #[arg(long)]
        from_vocab: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = FormatArg::Default)]
        from_format: FormatArg,

        /// Only reserve the padding token
        #[arg(long)]
        without_sequence_tokens: bool,

        #[arg(long, value_enum, default_value_t = TokenizerArg::Space)]
        tokenizer: TokenizerArg,
    },

    /// Print the size of a vocabulary and look up tokens or ids
    VocabInfo {
        path: PathBuf,

        #[arg(long, value_enum, default_value_t = FormatArg::Default)]
        format: FormatArg,

        /// Token or id to look up (repeatable)
        #[arg(long)]
        lookup: Vec<String>,
    },

    /// Print the learning rate of the [schedule] section of a config file
    LrSchedule {
        #[arg(short, long)]
        config: PathBuf,

        /// Number of training steps
        #[arg(long)]
        steps: u64,

        /// Print every K steps
        #[arg(long, default_value_t = 1)]
        every: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatArg {
    Default,
    Sentencepiece,
}

impl From<FormatArg> for VocabFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Default => VocabFormat::Default,
            FormatArg::Sentencepiece => VocabFormat::SentencePiece,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenizerArg {
    /// Split on whitespace
    Space,
    /// One token per character
    Char,
}

impl TokenizerArg {
    pub fn build(self) -> Box<dyn Tokenizer> {
        match self {
            TokenizerArg::Space => Box::new(SpaceTokenizer),
            TokenizerArg::Char => Box::new(CharacterTokenizer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_vocab_defaults() {
        let cli = Cli::try_parse_from(["yimt", "build-vocab", "a.txt", "b.txt", "--save-vocab", "v.txt"])
            .unwrap();
        assert_eq!(cli.verbose, 0);
        assert_eq!(
            cli.command,
            Commands::BuildVocab {
                files: vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")],
                save_vocab: PathBuf::from("v.txt"),
                size: 0,
                min_frequency: 1,
                size_multiple: None,
                from_vocab: None,
                from_format: FormatArg::Default,
                without_sequence_tokens: false,
                tokenizer: TokenizerArg::Space,
            }
        );
    }

    #[test]
    fn test_parse_build_vocab_options() {
        let cli = Cli::try_parse_from([
            "yimt",
            "-vv",
            "build-vocab",
            "train.txt",
            "--save-vocab",
            "v.txt",
            "--size",
            "100",
            "--size-multiple",
            "8",
            "--from-vocab",
            "sp.vocab",
            "--from-format",
            "sentencepiece",
            "--tokenizer",
            "char",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::BuildVocab {
                size,
                size_multiple,
                from_format,
                tokenizer,
                ..
            } => {
                assert_eq!(size, 100);
                assert_eq!(size_multiple, Some(8));
                assert_eq!(from_format, FormatArg::Sentencepiece);
                assert_eq!(tokenizer, TokenizerArg::Char);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_build_vocab_requires_files() {
        assert!(Cli::try_parse_from(["yimt", "build-vocab", "--save-vocab", "v.txt"]).is_err());
    }

    #[test]
    fn test_parse_vocab_info_lookups() {
        let cli = Cli::try_parse_from(["yimt", "vocab-info", "v.txt", "--lookup", "a", "--lookup", "3"])
            .unwrap();
        assert_eq!(
            cli.command,
            Commands::VocabInfo {
                path: PathBuf::from("v.txt"),
                format: FormatArg::Default,
                lookup: vec!["a".to_string(), "3".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_lr_schedule() {
        let cli = Cli::try_parse_from(["yimt", "lr-schedule", "-c", "run.toml", "--steps", "10"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::LrSchedule {
                config: PathBuf::from("run.toml"),
                steps: 10,
                every: 1,
            }
        );
    }

    #[test]
    fn test_format_arg_maps_to_vocab_format() {
        assert_eq!(VocabFormat::from(FormatArg::Sentencepiece), VocabFormat::SentencePiece);
        assert!(TokenizerArg::Char.build().in_graph());
        assert!(!TokenizerArg::Space.build().in_graph());
    }
}
