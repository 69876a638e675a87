pub mod build_vocab;
pub mod lr_schedule;
pub mod vocab_info;
