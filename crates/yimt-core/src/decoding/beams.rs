use ndarray::{Array1, ArrayView1};

/// A partial or finished hypothesis of one decoding row.
#[derive(Clone, Debug, PartialEq)]
pub struct BeamHypothesis {
    /// Generated tokens, without the start and end markers.
    pub tokens: Vec<u32>,
    /// Sum of token log probabilities, including `</s>` once finished.
    pub score: f32,
    pub finished: bool,
    /// Attention vector of every step that produced a token.
    pub attention: Vec<Array1<f32>>,
}

impl BeamHypothesis {
    pub fn new() -> Self {
        Self {
            tokens: Vec::new(),
            score: 0.0,
            finished: false,
            attention: Vec::new(),
        }
    }

    /// A placeholder that never produces candidates.
    pub fn dead() -> Self {
        Self {
            score: f32::NEG_INFINITY,
            ..Self::new()
        }
    }

    pub fn is_dead(&self) -> bool {
        self.score == f32::NEG_INFINITY
    }

    pub fn is_active(&self) -> bool {
        !self.is_dead() && !self.finished
    }

    /// Number of generated steps, counting `</s>`.
    pub fn length(&self) -> usize {
        self.tokens.len() + usize::from(self.finished)
    }

    pub fn normalized_score(&self, length_penalty: f32) -> f32 {
        length_normalize(self.score, self.length(), length_penalty)
    }

    pub(crate) fn advance(
        &self,
        candidate: &Candidate,
        end_id: u32,
        attention: Option<ArrayView1<'_, f32>>,
    ) -> Self {
        let mut next = self.clone();
        if let Some(token) = candidate.token {
            next.score = candidate.score;
            if token == end_id {
                next.finished = true;
            } else {
                next.tokens.push(token);
            }
            if let Some(attention) = attention {
                next.attention.push(attention.to_owned());
            }
        }
        next
    }
}

impl Default for BeamHypothesis {
    fn default() -> Self {
        Self::new()
    }
}

fn length_normalize(score: f32, length: usize, length_penalty: f32) -> f32 {
    if length == 0 || length_penalty == 0.0 {
        return score;
    }
    score / (length as f32).powf(length_penalty)
}

/// A possible continuation of the hypothesis at row `parent`.
///
/// `token` is `None` when a finished hypothesis is carried over unchanged.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Candidate {
    pub parent: usize,
    pub token: Option<u32>,
    pub score: f32,
    pub length: usize,
}

impl Candidate {
    pub fn carry(parent: usize, beam: &BeamHypothesis) -> Self {
        Self {
            parent,
            token: None,
            score: beam.score,
            length: beam.length(),
        }
    }

    pub fn extend(parent: usize, beam: &BeamHypothesis, token: u32, log_prob: f32) -> Self {
        Self {
            parent,
            token: Some(token),
            score: beam.score + log_prob,
            length: beam.tokens.len() + 1,
        }
    }

    fn normalized_score(&self, length_penalty: f32) -> f32 {
        length_normalize(self.score, self.length, length_penalty)
    }
}

/// Keeps the `beam_size` best candidates of one batch entry.
///
/// Ranking uses length normalized scores; equal scores keep their proposal
/// order. Impossible candidates are discarded.
pub(crate) fn select_candidates(
    mut candidates: Vec<Candidate>,
    beam_size: usize,
    length_penalty: f32,
) -> Vec<Candidate> {
    candidates.retain(|candidate| candidate.score > f32::NEG_INFINITY);
    candidates.sort_by(|a, b| {
        b.normalized_score(length_penalty)
            .total_cmp(&a.normalized_score(length_penalty))
    });
    candidates.truncate(beam_size);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_length_penalty_formula() {
        let beam = BeamHypothesis {
            tokens: vec![7; 4],
            score: -5.0,
            finished: true,
            attention: vec![],
        };
        assert_abs_diff_eq!(beam.normalized_score(0.0), -5.0);
        assert_abs_diff_eq!(beam.normalized_score(1.0), -1.0);
        assert_abs_diff_eq!(beam.normalized_score(2.0), -0.2);
    }

    #[test]
    fn test_select_candidates_ranks_and_drops_impossible() {
        let beam = BeamHypothesis::new();
        let candidates = vec![
            Candidate::extend(0, &beam, 3, -2.0),
            Candidate::extend(0, &beam, 4, f32::NEG_INFINITY),
            Candidate::extend(1, &beam, 5, -0.5),
            Candidate::extend(1, &beam, 6, -2.0),
        ];
        let selected = select_candidates(candidates, 2, 0.0);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].token, Some(5));
        assert_eq!(selected[1].token, Some(3));
    }

    #[test]
    fn test_length_penalty_favours_longer_hypotheses() {
        let short = BeamHypothesis { tokens: vec![], score: -1.0, finished: true, attention: vec![] };
        let long = BeamHypothesis { tokens: vec![3, 3, 3], score: -2.0, finished: false, attention: vec![] };
        let candidates = vec![Candidate::carry(0, &short), Candidate::extend(1, &long, 3, -0.5)];

        let raw = select_candidates(candidates.clone(), 1, 0.0);
        assert_eq!(raw[0].parent, 0);
        let normalized = select_candidates(candidates, 1, 1.0);
        assert_eq!(normalized[0].parent, 1);
    }

    #[test]
    fn test_advance_finishes_on_end_token() {
        let beam = BeamHypothesis::new();
        let candidate = Candidate::extend(0, &beam, 2, -0.1);
        let attention = Array1::from(vec![0.25f32, 0.75]);
        let next = beam.advance(&candidate, 2, Some(attention.view()));
        assert!(next.finished);
        assert!(next.tokens.is_empty());
        assert_eq!(next.attention.len(), 1);
        assert_abs_diff_eq!(next.score, -0.1);

        let carried = next.advance(&Candidate::carry(0, &next), 2, Some(attention.view()));
        assert_eq!(carried, next);
    }
}
