use anyhow::Result;
use clap::Parser;

use yimt_cli::commands;
use yimt_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::BuildVocab {
            files,
            save_vocab,
            size,
            min_frequency,
            size_multiple,
            from_vocab,
            from_format,
            without_sequence_tokens,
            tokenizer,
        } => commands::build_vocab::run(
            &files,
            &save_vocab,
            size,
            min_frequency,
            size_multiple,
            from_vocab.as_deref(),
            from_format.into(),
            without_sequence_tokens,
            tokenizer,
        ),

        Commands::VocabInfo {
            path,
            format,
            lookup,
        } => commands::vocab_info::run(&path, format.into(), &lookup),

        Commands::LrSchedule {
            config,
            steps,
            every,
        } => commands::lr_schedule::run(&config, steps, every),
    }
}
