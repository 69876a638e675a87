//! Run configuration: model parameters, inference options and the
//! learning rate schedule, read from TOML.

mod loader;

pub use loader::{CONFIG_FILE_NAME, load_config, load_config_from_path, load_config_with_defaults, merge_config};

use serde::{Deserialize, Serialize};

use crate::alignment::AlignmentType;
use crate::constants::SUBWORD_JOINER;
use crate::losses::GuidedAlignmentType;
use crate::noise::NoiseSpec;
use crate::schedules::ScheduleConfig;

fn default_one() -> usize {
    1
}

fn default_maximum_decoding_length() -> usize {
    250
}

fn default_temperature() -> f32 {
    1.0
}

fn default_subword_token() -> String {
    SUBWORD_JOINER.to_string()
}

fn default_max_margin_eta() -> f32 {
    0.1
}

fn default_guided_alignment_weight() -> f32 {
    1.0
}

fn default_lite_output_size() -> usize {
    250
}

/// `[params]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seq2SeqParams {
    #[serde(default = "default_one")]
    pub beam_width: usize,
    /// Hypotheses returned per example, at most `beam_width`.
    #[serde(default = "default_one")]
    pub num_hypotheses: usize,
    #[serde(default)]
    pub length_penalty: f32,
    /// 1 decodes the best token, 0 samples from the whole vocabulary.
    #[serde(default = "default_one")]
    pub sampling_topk: usize,
    #[serde(default = "default_temperature")]
    pub sampling_temperature: f32,
    #[serde(default = "default_maximum_decoding_length")]
    pub maximum_decoding_length: usize,
    #[serde(default)]
    pub minimum_decoding_length: usize,
    #[serde(default)]
    pub replace_unknown_target: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoding_noise: Option<Vec<NoiseSpec>>,
    #[serde(default = "default_subword_token")]
    pub decoding_subword_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoding_subword_token_is_spacer: Option<bool>,
    #[serde(default)]
    pub contrastive_learning: bool,
    #[serde(default = "default_max_margin_eta")]
    pub max_margin_eta: f32,
    #[serde(default)]
    pub label_smoothing: f32,
    #[serde(default)]
    pub average_loss_in_time: bool,
    #[serde(default)]
    pub mask_loss_outliers: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_alignment_type: Option<GuidedAlignmentType>,
    #[serde(default = "default_guided_alignment_weight")]
    pub guided_alignment_weight: f32,
    /// Fixed output length of static-shape (lite) exports.
    #[serde(default = "default_lite_output_size")]
    pub lite_output_size: usize,
    /// Seed for sampling and decoding noise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for Seq2SeqParams {
    fn default() -> Self {
        Self {
            beam_width: 1,
            num_hypotheses: 1,
            length_penalty: 0.0,
            sampling_topk: 1,
            sampling_temperature: default_temperature(),
            maximum_decoding_length: default_maximum_decoding_length(),
            minimum_decoding_length: 0,
            replace_unknown_target: false,
            decoding_noise: None,
            decoding_subword_token: default_subword_token(),
            decoding_subword_token_is_spacer: None,
            contrastive_learning: false,
            max_margin_eta: default_max_margin_eta(),
            label_smoothing: 0.0,
            average_loss_in_time: false,
            mask_loss_outliers: false,
            guided_alignment_type: None,
            guided_alignment_weight: default_guided_alignment_weight(),
            lite_output_size: default_lite_output_size(),
            seed: None,
        }
    }
}

impl Seq2SeqParams {
    /// Recommended defaults for a translation model, as a config table meant
    /// to sit under user values: beam search with 4 beams.
    pub fn auto_config() -> toml::Table {
        let mut params = toml::Table::new();
        params.insert("beam_width".to_string(), toml::Value::Integer(4));
        let mut config = toml::Table::new();
        config.insert("params".to_string(), toml::Value::Table(params));
        config
    }
}

/// `[infer]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferParams {
    /// Hypotheses printed per example; all returned ones when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_best: Option<usize>,
    #[serde(default)]
    pub with_scores: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_alignments: Option<AlignmentType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub params: Seq2SeqParams,
    #[serde(default)]
    pub infer: InferParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: RunConfig = toml::from_str("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.params.maximum_decoding_length, 250);
        assert_eq!(config.params.decoding_subword_token, "￭");
        assert_eq!(config.params.max_margin_eta, 0.1);
        assert!(config.schedule.is_none());
    }

    #[test]
    fn test_partial_params() {
        let config: RunConfig = toml::from_str(
            r#"
            [params]
            beam_width = 5
            guided_alignment_type = "ce"
            decoding_noise = [{ dropout = 0.1 }, { replacement = [0.1, "<unk>"] }]

            [infer]
            with_scores = true
            with_alignments = "hard"
            "#,
        )
        .unwrap();
        assert_eq!(config.params.beam_width, 5);
        assert_eq!(config.params.num_hypotheses, 1);
        assert_eq!(config.params.guided_alignment_type, Some(GuidedAlignmentType::Ce));
        assert_eq!(config.params.decoding_noise.as_ref().map(Vec::len), Some(2));
        assert_eq!(config.infer.with_alignments, Some(AlignmentType::Hard));
        assert!(config.infer.with_scores);
    }

    #[test]
    fn test_auto_config_sits_under_user_values() {
        let mut merged = Seq2SeqParams::auto_config();
        merge_config(&mut merged, toml::from_str("[params]\nlength_penalty = 0.6").unwrap());
        let config: RunConfig = toml::Value::Table(merged).try_into().unwrap();
        assert_eq!(config.params.beam_width, 4);
        assert_eq!(config.params.length_penalty, 0.6);

        let mut merged = Seq2SeqParams::auto_config();
        merge_config(&mut merged, toml::from_str("[params]\nbeam_width = 2").unwrap());
        let config: RunConfig = toml::Value::Table(merged).try_into().unwrap();
        assert_eq!(config.params.beam_width, 2);
    }

    #[test]
    fn test_serialized_defaults_round_trip() {
        let text = toml::to_string(&RunConfig::default()).unwrap();
        let parsed: RunConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, RunConfig::default());
    }
}
