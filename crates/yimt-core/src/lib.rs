//! Yimt core: vocabularies and sequence-to-sequence translation models
//!
//! Vocabulary building and pruning, dynamic decoding (greedy, sampling and
//! beam search), sequence losses and learning rate schedules, assembled by
//! [`SequenceToSequence`]. Tensors are `ndarray` arrays with explicit batch
//! and beam dimensions.

pub mod alignment;
pub mod config;
pub mod constants;
pub mod decoders;
pub mod decoding;
pub mod encoders;
pub mod error;
pub mod inputters;
pub mod losses;
pub mod models;
pub mod noise;
pub mod schedules;
pub mod tokenizer;
pub mod utils;
pub mod vocab;

// Re-export commonly used items
pub use crate::{
    alignment::{AlignmentType, alignment_matrix_from_pharaoh, format_translation_output},
    config::{InferParams, RunConfig, Seq2SeqParams},
    decoders::{Decoder, DecoderState},
    decoding::{DecodeOptions, DecodeResult, DecodingStrategy, Sampler},
    encoders::{Encoder, EncoderOutput, EncoderState, MeanEncoder},
    inputters::{Features, Inputter, Labels, ParallelInputter, WordEmbedder},
    losses::{GuidedAlignmentType, SequenceLoss},
    models::{EmbeddingsSharingLevel, Predictions, SequenceToSequence},
    noise::{Noise, WordNoiser},
    schedules::{LearningRateSchedule, ScheduleConfig, ScheduleWrapper},
    tokenizer::{CharacterTokenizer, SpaceTokenizer, Tokenizer},
    vocab::{LookupTables, Vocab, VocabFormat, create_lookup_tables},
};
pub use error::{YimtError, YimtResult, YimtWarning};
