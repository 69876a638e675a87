use std::io::Write;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, Array4, Axis, Zip, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::predictions::{ExamplePrediction, PredictionBatch, Predictions};
use crate::alignment::format_translation_output;
use crate::config::{InferParams, Seq2SeqParams};
use crate::constants::{END_OF_SENTENCE_TOKEN, START_OF_SENTENCE_ID};
use crate::decoders::Decoder;
use crate::decoding::{DecodeOptions, DecodeResult, DecodingStrategy, Sampler};
use crate::encoders::{Encoder, EncoderOutput};
use crate::error::{YimtError, YimtResult, YimtWarning};
use crate::inputters::{Features, Inputter, Labels, ParallelInputter, WordEmbedder};
use crate::losses::{
    CrossEntropyOptions, SequenceLoss, cross_entropy_sequence_loss, guided_alignment_cost,
    max_margin_loss,
};
use crate::noise::{Noise, WordNoiser};
use crate::utils::{align_in_time, argmax, mask_attention, tile_batch};

/// Which embedding matrices are one shared tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingsSharingLevel {
    #[default]
    None,
    /// Source and target input embeddings.
    SourceTargetInput,
    /// Target input embedding and the decoder output layer.
    Target,
    All,
}

impl EmbeddingsSharingLevel {
    pub fn share_input_embeddings(self) -> bool {
        matches!(self, Self::SourceTargetInput | Self::All)
    }

    pub fn share_target_embeddings(self) -> bool {
        matches!(self, Self::Target | Self::All)
    }
}

/// Teacher forced outputs.
#[derive(Debug, Clone)]
pub struct DecoderOutputs {
    /// `[batch, time, vocab]`
    pub logits: Array3<f32>,
    /// `[batch, time, source_time]`
    pub attention: Option<Array3<f32>>,
    /// Logits of the noisy target, with contrastive learning.
    pub noisy_logits: Option<Array3<f32>>,
}

#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Present when labels were given.
    pub outputs: Option<DecoderOutputs>,
    /// Present outside of training.
    pub predictions: Option<Predictions>,
}

#[derive(Debug, Clone)]
pub struct LossOutput {
    pub loss: SequenceLoss,
    /// Non-fatal problems met while computing the loss.
    pub warnings: Vec<YimtWarning>,
}

/// Encoder-decoder translation model.
pub struct SequenceToSequence {
    features_inputter: Box<dyn Inputter>,
    labels_inputter: WordEmbedder,
    encoder: Box<dyn Encoder>,
    decoder: Box<dyn Decoder>,
    share_embeddings: EmbeddingsSharingLevel,
    params: Seq2SeqParams,
    lite_mode: bool,
}

impl SequenceToSequence {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Assembles a model.
    ///
    /// The target inputter must be a [`WordEmbedder`]. Sharing input
    /// embeddings additionally requires every source inputter, including the
    /// branches of a [`ParallelInputter`], to be one; they then take the
    /// target embedding matrix.
    pub fn new(
        source_inputter: Box<dyn Inputter>,
        target_inputter: Box<dyn Inputter>,
        encoder: Box<dyn Encoder>,
        decoder: Box<dyn Decoder>,
        share_embeddings: EmbeddingsSharingLevel,
    ) -> YimtResult<Self> {
        let mut labels_inputter = *target_inputter
            .into_any()
            .downcast::<WordEmbedder>()
            .map_err(|_| {
                YimtError::TypeConstraint("Target inputter must be a WordEmbedder".to_string())
            })?;
        labels_inputter.set_decoder_mode();

        let mut features_inputter = source_inputter;
        if share_embeddings.share_input_embeddings() {
            let all_embedders = features_inputter
                .branches()
                .iter()
                .all(|branch| branch.as_word_embedder().is_some());
            if !all_embedders {
                return Err(YimtError::TypeConstraint(
                    "Sharing embeddings requires all inputters to be a WordEmbedder".to_string(),
                ));
            }
            share_source_embeddings(features_inputter.as_mut(), labels_inputter.embedding())?;
        }

        Ok(Self {
            features_inputter,
            labels_inputter,
            encoder,
            decoder,
            share_embeddings,
            params: Seq2SeqParams::default(),
            lite_mode: false,
        })
    }

    /// Builds the decoder output layer and applies the parameters.
    pub fn initialize(&mut self, params: Seq2SeqParams) -> YimtResult<()> {
        let vocab_size = self.labels_inputter.lookup_tables().size();
        self.decoder.initialize(vocab_size)?;

        if params.contrastive_learning {
            // Noisy targets miss exactly one word.
            self.labels_inputter.set_noiser(WordNoiser::new(
                vec![Noise::Omission { count: 1 }],
                &params.decoding_subword_token,
                params.decoding_subword_token_is_spacer,
            ));
        }
        if self.share_embeddings.share_target_embeddings() {
            self.decoder
                .reuse_embeddings(Arc::clone(self.labels_inputter.embedding()))?;
        }

        log::info!(
            "Initialized sequence-to-sequence model: {} target ids, beam width {}, sharing {:?}",
            vocab_size,
            params.beam_width,
            self.share_embeddings
        );
        self.params = params;
        Ok(())
    }

    /// Lite mode decodes a single example into fixed-size ids, for
    /// static-shape exports.
    pub fn set_lite_mode(&mut self, enabled: bool) {
        self.lite_mode = enabled;
    }

    pub fn params(&self) -> &Seq2SeqParams {
        &self.params
    }

    pub fn features_inputter(&self) -> &dyn Inputter {
        self.features_inputter.as_ref()
    }

    pub fn labels_inputter(&self) -> &WordEmbedder {
        &self.labels_inputter
    }

    pub fn labels_inputter_mut(&mut self) -> &mut WordEmbedder {
        &mut self.labels_inputter
    }

    // =========================================================================
    // Forward
    // =========================================================================

    /// Encodes `features`, decodes `labels` with teacher forcing when given,
    /// and decodes dynamically when not training.
    pub fn call(
        &self,
        features: &Features,
        labels: Option<&Labels>,
        training: bool,
    ) -> YimtResult<ModelOutput> {
        let inputs = self.features_inputter.embed(features, training)?;
        let encoded = self.encoder.encode(&inputs, &features.length, training)?;

        let outputs = labels
            .map(|labels| self.decode_target(labels, &encoded, training))
            .transpose()?;
        let predictions = if training {
            None
        } else {
            Some(self.dynamic_decode(features, &encoded)?)
        };
        Ok(ModelOutput {
            outputs,
            predictions,
        })
    }

    fn decode_target(
        &self,
        labels: &Labels,
        encoded: &EncoderOutput,
        training: bool,
    ) -> YimtResult<DecoderOutputs> {
        let initial_state = self.decoder.initial_state(
            &encoded.outputs,
            &encoded.sequence_length,
            &encoded.state,
        )?;
        let input_fn = |ids: &Array2<u32>| self.labels_inputter.embed_ids(ids);

        let inputs = self.labels_inputter.embed(labels, training)?;
        let output = self.decoder.forward(
            &inputs,
            &labels.length,
            &initial_state,
            &input_fn,
            None,
            training,
        )?;

        let mut noisy_logits = None;
        if self.params.contrastive_learning {
            if let (Some(noisy_ids), Some(noisy_length)) = (&labels.noisy_ids, &labels.noisy_length) {
                // Same initial state, independent pass.
                let noisy_inputs = self.labels_inputter.embed_ids(noisy_ids)?;
                let noisy = self.decoder.forward(
                    &noisy_inputs,
                    noisy_length,
                    &initial_state,
                    &input_fn,
                    None,
                    training,
                )?;
                noisy_logits = Some(noisy.logits);
            }
        }

        Ok(DecoderOutputs {
            logits: output.logits,
            attention: output.attention,
            noisy_logits,
        })
    }

    fn dynamic_decode(&self, features: &Features, encoded: &EncoderOutput) -> YimtResult<Predictions> {
        let params = &self.params;
        let beam_size = params.beam_width.max(1);
        if params.num_hypotheses > beam_size {
            return Err(YimtError::InvalidConfig(
                "n_best cannot be greater than beam_width".to_string(),
            ));
        }

        let batch_size = encoded.outputs.len_of(Axis(0));
        let initial_state = if beam_size > 1 {
            log::debug!("Tiling {} encoded sequences {} times", batch_size, beam_size);
            let memory = tile_batch(&encoded.outputs, beam_size);
            let memory_length = tile_batch(&encoded.sequence_length, beam_size);
            let state = encoded.state.map_leaves(|leaf| tile_batch(leaf, beam_size));
            self.decoder.initial_state(&memory, &memory_length, &state)?
        } else {
            self.decoder.initial_state(
                &encoded.outputs,
                &encoded.sequence_length,
                &encoded.state,
            )?
        };

        let options = DecodeOptions {
            strategy: DecodingStrategy::from_params(beam_size, params.length_penalty),
            sampler: Sampler::from_params(params.sampling_topk, params.sampling_temperature),
            maximum_iterations: params.maximum_decoding_length,
            minimum_iterations: params.minimum_decoding_length,
            output_size: self.lite_mode.then_some(params.lite_output_size),
            seed: params.seed,
        };
        let start_ids = Array1::from_elem(batch_size, START_OF_SENTENCE_ID);
        let decoded =
            self.decoder
                .dynamic_decode(&self.labels_inputter, &start_ids, initial_state, &options)?;

        if self.lite_mode {
            return self.lite_predictions(features, decoded, beam_size);
        }

        let DecodeResult {
            ids,
            mut lengths,
            log_probs,
            mut attention,
            ..
        } = decoded;
        let mut target_tokens = self.labels_inputter.ids_to_tokens(&ids);

        if params.replace_unknown_target {
            let alignment = attention.as_ref().ok_or_else(missing_alignment_history)?;
            let source = self.features_inputter.as_word_embedder().ok_or_else(|| {
                YimtError::Capability(
                    "replace_unknown_target is only defined when the source inputter is a WordEmbedder"
                        .to_string(),
                )
            })?;
            let source_tokens = features.tokens.as_ref().ok_or_else(|| {
                YimtError::Capability(
                    "replace_unknown_target requires the source tokens in the features".to_string(),
                )
            })?;
            let source_tokens = tile_batch(source_tokens, beam_size);
            let source_length = tile_batch(&source.get_length(features, true), beam_size);

            let (batch, beam, time) = target_tokens.dim();
            let flat_tokens = target_tokens.into_shape_with_order((batch * beam, time))?;
            let flat_attention = align_in_time(&flatten_beams(alignment)?, time);
            let flat_attention = mask_attention(
                &flat_attention,
                &source_length,
                source.mark_start(),
                source.mark_end(),
            );
            let unknown_token = self.labels_inputter.lookup_tables().unk_token().to_string();
            let replaced =
                replace_unknown_target(&flat_tokens, &source_tokens, &flat_attention, &unknown_token)?;
            target_tokens = replaced.into_shape_with_order((batch, beam, time))?;
        }

        if let Some(specs) = &params.decoding_noise {
            let noiser = WordNoiser::from_specs(
                specs,
                &params.decoding_subword_token,
                params.decoding_subword_token_is_spacer,
            )?;
            let mut rng = match params.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let (noisy_tokens, noisy_lengths) =
                noiser.apply_batch(&target_tokens, &lengths, END_OF_SENTENCE_TOKEN, &mut rng);
            target_tokens = noisy_tokens;
            lengths = noisy_lengths;
            // Positions no longer match the attention.
            attention = None;
        }

        let tokenizer = self.labels_inputter.text_tokenizer();
        let batch = if tokenizer.in_graph() {
            let text = Array2::from_shape_fn(lengths.dim(), |(b, k)| {
                let length = lengths[[b, k]].min(target_tokens.len_of(Axis(2)));
                let tokens: Vec<String> =
                    target_tokens.slice(s![b, k, ..length]).iter().cloned().collect();
                tokenizer.detokenize(&tokens)
            });
            // Detokenized text has no time axis to align against.
            PredictionBatch {
                log_probs,
                tokens: None,
                length: None,
                alignment: None,
                text: Some(text),
            }
        } else {
            PredictionBatch {
                log_probs,
                tokens: Some(target_tokens),
                length: Some(lengths),
                alignment: attention,
                text: None,
            }
        };

        let batch = if params.num_hypotheses > 0 {
            batch.truncate_hypotheses(params.num_hypotheses)
        } else {
            batch
        };
        Ok(Predictions::Batch(batch))
    }

    fn lite_predictions(
        &self,
        features: &Features,
        decoded: DecodeResult,
        beam_size: usize,
    ) -> YimtResult<Predictions> {
        let DecodeResult { ids, attention, .. } = decoded;
        let (batch, beam, time) = ids.dim();
        if batch != 1 {
            return Err(YimtError::InvalidConfig(format!(
                "lite mode decodes a single example, got a batch of {batch}"
            )));
        }
        let mut flat_ids = ids.into_shape_with_order((batch * beam, time))?;

        if self.params.replace_unknown_target {
            let alignment = attention.as_ref().ok_or_else(missing_alignment_history)?;
            let source_ids = tile_batch(&features.ids, beam_size);
            let flat_attention = align_in_time(&flatten_beams(alignment)?, time);
            // The last id is the single OOV bucket.
            let unknown_id = self.labels_inputter.lookup_tables().size().saturating_sub(1) as u32;
            flat_ids = replace_unknown_target(&flat_ids, &source_ids, &flat_attention, &unknown_id)?;
        }
        Ok(Predictions::Ids(flat_ids.row(0).to_owned()))
    }

    // =========================================================================
    // Loss
    // =========================================================================

    /// Max-margin loss when contrastive learning produced noisy logits,
    /// label smoothed cross entropy otherwise, plus guided alignment during
    /// training.
    pub fn compute_loss(
        &self,
        outputs: &DecoderOutputs,
        labels: &Labels,
        training: bool,
    ) -> YimtResult<LossOutput> {
        let params = &self.params;
        let mut warnings = Vec::new();

        if params.contrastive_learning {
            if let Some(noisy_logits) = &outputs.noisy_logits {
                let (Some(noisy_ids_out), Some(noisy_length)) =
                    (&labels.noisy_ids_out, &labels.noisy_length)
                else {
                    return Err(YimtError::Capability(
                        "noisy logits were given without noisy labels".to_string(),
                    ));
                };
                let loss = max_margin_loss(
                    &outputs.logits,
                    &labels.ids_out,
                    &labels.length,
                    noisy_logits,
                    noisy_ids_out,
                    noisy_length,
                    params.max_margin_eta,
                )?;
                return Ok(LossOutput { loss, warnings });
            }
        }

        let options = CrossEntropyOptions {
            sequence_weight: labels.weight.as_ref(),
            label_smoothing: params.label_smoothing,
            average_in_time: params.average_loss_in_time,
            mask_outliers: params.mask_loss_outliers,
            training,
        };
        let mut loss =
            cross_entropy_sequence_loss(&outputs.logits, &labels.ids_out, &labels.length, &options)?;

        if training {
            if let (Some(cost_type), Some(gold)) = (params.guided_alignment_type, &labels.alignment) {
                match &outputs.attention {
                    Some(attention) => {
                        // The last step attends after </s>.
                        let steps = attention.len_of(Axis(1)).saturating_sub(1);
                        let attention = attention.slice(s![.., ..steps, ..]).to_owned();
                        let target_length = self.labels_inputter.get_length(labels, true);
                        loss.loss += guided_alignment_cost(
                            &attention,
                            gold,
                            Some(&target_length),
                            cost_type,
                            params.guided_alignment_weight,
                        )?;
                    }
                    None => {
                        warnings.push(
                            YimtWarning::new(
                                "This model did not return attention vectors; guided alignment will not be applied",
                            )
                            .emit(),
                        );
                    }
                }
            }
        }

        Ok(LossOutput { loss, warnings })
    }

    // =========================================================================
    // Output
    // =========================================================================

    /// One line per hypothesis, best first, with the optional score and
    /// alignment annotations.
    pub fn format_prediction(
        &self,
        prediction: &ExamplePrediction,
        params: &InferParams,
    ) -> YimtResult<Vec<String>> {
        if params.with_alignments.is_some() && prediction.alignment.is_none() {
            return Err(YimtError::Capability(
                "with_alignments is set but the model did not return alignment information"
                    .to_string(),
            ));
        }
        let available = prediction.log_probs.len();
        let n_best = params.n_best.unwrap_or(available);
        if n_best > available {
            return Err(YimtError::InvalidConfig(format!(
                "n_best ({n_best}) cannot be greater than the {available} hypotheses returned by the model"
            )));
        }

        let tokenizer = self.labels_inputter.text_tokenizer();
        (0..n_best)
            .map(|i| {
                let (sentence, target_length) =
                    match (&prediction.tokens, &prediction.length, &prediction.text) {
                        (Some(tokens), Some(length), _) => {
                            let length = length[i].min(tokens.ncols());
                            let tokens: Vec<String> =
                                tokens.row(i).iter().take(length).cloned().collect();
                            (tokenizer.detokenize(&tokens), Some(length))
                        }
                        (_, _, Some(text)) => (text[i].clone(), None),
                        _ => {
                            return Err(YimtError::Capability(
                                "prediction holds neither tokens nor text".to_string(),
                            ));
                        }
                    };
                let score = params.with_scores.then(|| prediction.log_probs[i]);
                let attention = prediction.alignment.as_ref().map(|alignment| {
                    let attention = alignment.index_axis(Axis(0), i);
                    let rows = target_length.unwrap_or(attention.nrows()).min(attention.nrows());
                    attention.slice_move(s![..rows, ..])
                });
                Ok(format_translation_output(
                    &sentence,
                    score,
                    attention,
                    params.with_alignments,
                ))
            })
            .collect()
    }

    /// Writes [`Self::format_prediction`] lines to `out`.
    pub fn print_prediction(
        &self,
        prediction: &ExamplePrediction,
        params: &InferParams,
        out: &mut dyn Write,
    ) -> YimtResult<()> {
        for line in self.format_prediction(prediction, params)? {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

fn share_source_embeddings(
    source: &mut dyn Inputter,
    embedding: &Arc<Array2<f32>>,
) -> YimtResult<()> {
    let not_embedder = || {
        YimtError::TypeConstraint(
            "Sharing embeddings requires all inputters to be a WordEmbedder".to_string(),
        )
    };
    if let Some(parallel) = source.as_any_mut().downcast_mut::<ParallelInputter>() {
        for inputter in parallel.inputters_mut() {
            inputter
                .as_word_embedder_mut()
                .ok_or_else(not_embedder)?
                .share_embedding(Arc::clone(embedding))?;
        }
        return Ok(());
    }
    source
        .as_word_embedder_mut()
        .ok_or_else(not_embedder)?
        .share_embedding(Arc::clone(embedding))
}

fn missing_alignment_history() -> YimtError {
    YimtError::Capability(
        "replace_unknown_target is not compatible with decoders that don't return alignment history"
            .to_string(),
    )
}

fn flatten_beams(attention: &Array4<f32>) -> YimtResult<Array3<f32>> {
    let (batch, beam, time, source) = attention.dim();
    Ok(attention
        .to_owned()
        .into_shape_with_order((batch * beam, time, source))?)
}

/// Picks, for every target position, the source token with the highest
/// attention weight.
///
/// `tokens` is `[batch, source_time]` and `attention`
/// `[batch, target_time, source_time]`; the result is
/// `[batch, target_time]`.
pub fn align_tokens_from_attention<T: Clone>(
    tokens: &Array2<T>,
    attention: &Array3<f32>,
) -> YimtResult<Array2<T>> {
    let (batch, time, _) = attention.dim();
    if tokens.nrows() != batch {
        return Err(YimtError::InvalidConfig(format!(
            "{} token rows for an attention batch of {}",
            tokens.nrows(),
            batch
        )));
    }
    let mut aligned = Vec::with_capacity(batch * time);
    for (b, rows) in attention.axis_iter(Axis(0)).enumerate() {
        for row in rows.axis_iter(Axis(0)) {
            let position = argmax(row);
            let token = tokens.get((b, position)).ok_or_else(|| {
                YimtError::InvalidConfig(format!(
                    "attention points at source position {} but the source has {} positions",
                    position,
                    tokens.ncols()
                ))
            })?;
            aligned.push(token.clone());
        }
    }
    Ok(Array2::from_shape_vec((batch, time), aligned)?)
}

/// Replaces every `unknown` target entry with the most attended source
/// entry at that position.
pub fn replace_unknown_target<T: Clone + PartialEq>(
    target: &Array2<T>,
    source: &Array2<T>,
    attention: &Array3<f32>,
    unknown: &T,
) -> YimtResult<Array2<T>> {
    let aligned = align_tokens_from_attention(source, attention)?;
    if aligned.dim() != target.dim() {
        return Err(YimtError::InvalidConfig(format!(
            "attention covers {:?} target positions but the target is {:?}",
            aligned.dim(),
            target.dim()
        )));
    }
    Ok(Zip::from(target)
        .and(&aligned)
        .map_collect(|t, a| if t == unknown { a.clone() } else { t.clone() }))
}
