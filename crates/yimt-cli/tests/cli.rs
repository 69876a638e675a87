use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn yimt() -> Command {
    Command::cargo_bin("yimt").unwrap()
}

#[test]
fn test_cli_help() {
    yimt()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("build-vocab"));
}

#[test]
fn test_cli_version() {
    yimt().arg("--version").assert().success();
}

#[test]
fn test_invalid_command() {
    yimt().arg("not-a-command").assert().failure();
}

#[test]
fn test_build_vocab_orders_by_frequency() {
    let dir = TempDir::new().unwrap();
    let train = dir.path().join("train.txt");
    fs::write(&train, "a b a\nc a b\n").unwrap();
    let vocab = dir.path().join("vocab.txt");

    yimt()
        .arg("build-vocab")
        .arg(&train)
        .arg("--save-vocab")
        .arg(&vocab)
        .assert()
        .success()
        .stdout("6\n");

    let saved = fs::read_to_string(&vocab).unwrap();
    assert_eq!(saved, "<blank>\n<s>\n</s>\na\nb\nc\n");
}

#[test]
fn test_build_vocab_prunes_and_pads() {
    let dir = TempDir::new().unwrap();
    let train = dir.path().join("train.txt");
    fs::write(&train, "a b a\nc a b\n").unwrap();
    let vocab = dir.path().join("vocab.txt");

    yimt()
        .arg("build-vocab")
        .arg(&train)
        .arg("--save-vocab")
        .arg(&vocab)
        .args(["--min-frequency", "2", "--size-multiple", "8", "--without-sequence-tokens"])
        .assert()
        .success()
        .stdout("7\n");

    let saved = fs::read_to_string(&vocab).unwrap();
    let tokens: Vec<&str> = saved.lines().collect();
    // 3 kept tokens and 4 fillers, plus the OOV bucket, make 8.
    assert_eq!(&tokens[..3], &["<blank>", "a", "b"]);
    assert_eq!(tokens.len(), 7);
    assert!(!tokens.contains(&"c"));
}

#[test]
fn test_build_vocab_from_sentencepiece() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("sp.vocab");
    fs::write(&base, "<unk>\t0\n<s>\t0\n</s>\t0\n▁hello\t-1.5\n").unwrap();
    let train = dir.path().join("train.txt");
    fs::write(&train, "world\n").unwrap();
    let vocab = dir.path().join("vocab.txt");

    yimt()
        .arg("build-vocab")
        .arg(&train)
        .arg("--save-vocab")
        .arg(&vocab)
        .arg("--from-vocab")
        .arg(&base)
        .args(["--from-format", "sentencepiece"])
        .assert()
        .success();

    let saved = fs::read_to_string(&vocab).unwrap();
    assert_eq!(saved, "<blank>\n<s>\n</s>\n▁hello\nworld\n");
}

#[test]
fn test_build_vocab_reports_duplicates_through_logger() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("base.txt");
    fs::write(&base, "<s>\nhello\nhello\n").unwrap();
    let train = dir.path().join("train.txt");
    fs::write(&train, "world\n").unwrap();
    let vocab = dir.path().join("vocab.txt");

    let build = |filter: &str| {
        let mut cmd = yimt();
        cmd.env("RUST_LOG", filter)
            .arg("build-vocab")
            .arg(&train)
            .arg("--save-vocab")
            .arg(&vocab)
            .arg("--from-vocab")
            .arg(&base);
        cmd
    };

    build("error").assert().success().stderr("");
    build("warn")
        .assert()
        .success()
        .stderr(predicate::str::contains("duplicate"));

    let saved = fs::read_to_string(&vocab).unwrap();
    assert_eq!(saved, "<blank>\n<s>\n</s>\nhello\nworld\n");
}

#[test]
fn test_build_vocab_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    yimt()
        .arg("build-vocab")
        .arg(dir.path().join("missing.txt"))
        .arg("--save-vocab")
        .arg(dir.path().join("vocab.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.txt"));
}

#[test]
fn test_vocab_info_lookups() {
    let dir = TempDir::new().unwrap();
    let vocab = dir.path().join("vocab.txt");
    fs::write(&vocab, "<blank>\n<s>\n</s>\nhello\n").unwrap();

    yimt()
        .arg("vocab-info")
        .arg(&vocab)
        .args(["--lookup", "hello", "--lookup", "1", "--lookup", "nope"])
        .assert()
        .success()
        .stdout("size: 4\nhello\t3\n1\t<s>\nnope\t-\n");
}

#[test]
fn test_lr_schedule_prints_steps() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("run.toml");
    fs::write(
        &config,
        r#"
[schedule]
type = "PiecewiseConstantDecay"

[schedule.params]
boundaries = [2]
values = [1.0, 0.5]
"#,
    )
    .unwrap();

    yimt()
        .arg("lr-schedule")
        .arg("--config")
        .arg(&config)
        .args(["--steps", "4"])
        .assert()
        .success()
        .stdout("0\t1.00000000\n1\t1.00000000\n2\t1.00000000\n3\t0.50000000\n");
}

#[test]
fn test_lr_schedule_requires_schedule_section() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("run.toml");
    fs::write(&config, "[params]\nbeam_width = 4\n").unwrap();

    yimt()
        .arg("lr-schedule")
        .arg("--config")
        .arg(&config)
        .args(["--steps", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[schedule]"));
}
