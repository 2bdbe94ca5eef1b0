use std::collections::BTreeMap;

use super::rules::{is_numeric_noise, Denylist, NameCleanup};
use crate::config::{ConfigError, EngineConfig, FieldKind, QuestionSpec};
use crate::models::{FieldEvidence, NOT_FOUND};
use crate::pipeline::extraction::Candidate;

/// Final answer per question for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedFields {
    pub fields: BTreeMap<String, String>,
    /// Present only for questions resolved to a real answer.
    pub evidence: BTreeMap<String, FieldEvidence>,
}

/// Field Aggregator: candidates gathered across a document's pages ->
/// one answer per configured question.
///
/// Filters are layered before ranking selection: confidence threshold,
/// denylist, then the numeric-noise rule for contact fields. The first
/// survivor in score order wins; full-name answers are cleaned first and
/// a survivor that cleans to nothing is passed over.
#[derive(Debug, Clone)]
pub struct FieldAggregator {
    questions: Vec<QuestionSpec>,
    threshold: f32,
    denylist: Denylist,
    numeric_noise_max_len: usize,
    name_cleanup: NameCleanup,
}

impl FieldAggregator {
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            questions: config.questions.clone(),
            threshold: config.confidence_threshold,
            denylist: Denylist::new(&config.denylist),
            numeric_noise_max_len: config.numeric_noise_max_len,
            name_cleanup: NameCleanup::new(&config.name_labels)?,
        })
    }

    pub fn questions(&self) -> &[QuestionSpec] {
        &self.questions
    }

    /// Reduce all candidates of one document. Candidates for questions
    /// outside the configured set are ignored; every configured question
    /// gets an entry.
    pub fn aggregate(&self, candidates: &[Candidate]) -> AggregatedFields {
        let mut by_question: BTreeMap<&str, Vec<&Candidate>> = BTreeMap::new();
        for candidate in candidates {
            by_question
                .entry(candidate.question.as_str())
                .or_default()
                .push(candidate);
        }

        let mut result = AggregatedFields::default();
        for spec in &self.questions {
            let pool = by_question.remove(spec.text.as_str()).unwrap_or_default();
            match self.select(spec, pool) {
                Some((answer, evidence)) => {
                    result.fields.insert(spec.text.clone(), answer);
                    result.evidence.insert(spec.text.clone(), evidence);
                }
                None => {
                    result.fields.insert(spec.text.clone(), NOT_FOUND.to_string());
                }
            }
        }
        result
    }

    /// Winner for one question, or `None` for "not found".
    fn select(
        &self,
        spec: &QuestionSpec,
        mut pool: Vec<&Candidate>,
    ) -> Option<(String, FieldEvidence)> {
        // Page order first, then a stable descending sort by score:
        // equal scores keep the lower page first.
        pool.sort_by_key(|c| c.page_index);
        pool.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        pool.into_iter()
            .filter(|c| self.survives(spec, c))
            .find_map(|winner| {
                let answer = if spec.kind == FieldKind::FullName {
                    self.name_cleanup.apply(&winner.answer)
                } else {
                    winner.answer.clone()
                };
                // A name made only of labels cleans to nothing; try the next one.
                if answer.trim().is_empty() {
                    return None;
                }
                Some((
                    answer,
                    FieldEvidence {
                        confidence: winner.confidence,
                        page_index: winner.page_index,
                    },
                ))
            })
    }

    fn survives(&self, spec: &QuestionSpec, candidate: &Candidate) -> bool {
        // NaN never passes.
        if !(candidate.confidence >= self.threshold) {
            return false;
        }
        if self.denylist.contains(&candidate.answer) {
            return false;
        }
        !(spec.kind.rejects_numeric_noise()
            && is_numeric_noise(&candidate.answer, self.numeric_noise_max_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::ExtractionFailure;

    const NAME: &str = "What is the patient's full name?";
    const DOB: &str = "What is the patient's date of birth?";
    const PHONE: &str = "What is the patient's phone number?";
    const COMPLAINT: &str = "What is their primary complaint?";

    fn aggregator() -> FieldAggregator {
        FieldAggregator::new(&EngineConfig::default()).unwrap()
    }

    fn with_threshold(threshold: f32) -> FieldAggregator {
        FieldAggregator::new(&EngineConfig {
            confidence_threshold: threshold,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn every_configured_question_gets_an_entry() {
        let result = aggregator().aggregate(&[]);
        assert_eq!(result.fields.len(), 7);
        assert!(result.fields.values().all(|v| v == NOT_FOUND));
        assert!(result.evidence.is_empty());
    }

    #[test]
    fn single_page_round_trip_is_verbatim() {
        let agg = aggregator();
        let candidates: Vec<Candidate> = agg
            .questions()
            .iter()
            .enumerate()
            .map(|(i, q)| Candidate::new(&q.text, &format!("Answer {} 98765", i), 12.0, 1))
            .collect();

        let result = agg.aggregate(&candidates);
        for (i, q) in agg.questions().iter().enumerate() {
            assert_eq!(result.fields[&q.text], format!("Answer {} 98765", i));
            assert_eq!(result.evidence[&q.text].page_index, 1);
        }
    }

    #[test]
    fn highest_score_wins_across_pages() {
        let result = aggregator().aggregate(&[
            Candidate::new(COMPLAINT, "headache", 2.0, 1),
            Candidate::new(COMPLAINT, "chest pain", 6.0, 3),
            Candidate::new(COMPLAINT, "fatigue", 4.0, 2),
        ]);
        assert_eq!(result.fields[COMPLAINT], "chest pain");
        assert_eq!(result.evidence[COMPLAINT].page_index, 3);
    }

    #[test]
    fn equal_scores_prefer_lower_page() {
        let result = aggregator().aggregate(&[
            Candidate::new(COMPLAINT, "from page three", 5.0, 3),
            Candidate::new(COMPLAINT, "from page one", 5.0, 1),
            Candidate::new(COMPLAINT, "from page two", 5.0, 2),
        ]);
        assert_eq!(result.fields[COMPLAINT], "from page one");
    }

    #[test]
    fn below_threshold_is_not_found() {
        let result = aggregator().aggregate(&[Candidate::new(COMPLAINT, "cough", 0.99, 1)]);
        assert_eq!(result.fields[COMPLAINT], NOT_FOUND);
    }

    #[test]
    fn score_equal_to_threshold_passes() {
        let result = aggregator().aggregate(&[Candidate::new(COMPLAINT, "cough", 1.0, 1)]);
        assert_eq!(result.fields[COMPLAINT], "cough");
    }

    #[test]
    fn nan_score_never_wins() {
        let result = with_threshold(-100.0)
            .aggregate(&[Candidate::new(COMPLAINT, "cough", f32::NAN, 1)]);
        assert_eq!(result.fields[COMPLAINT], NOT_FOUND);
    }

    #[test]
    fn winner_always_meets_threshold() {
        let candidates = vec![
            Candidate::new(COMPLAINT, "a", 0.5, 1),
            Candidate::new(COMPLAINT, "b", 1.5, 2),
            Candidate::new(COMPLAINT, "c", 3.0, 3),
            Candidate::new(COMPLAINT, "d", -2.0, 4),
        ];
        for threshold in [-5.0, 0.0, 0.5, 1.0, 1.5, 2.0, 3.0, 3.5] {
            let result = with_threshold(threshold).aggregate(&candidates);
            if let Some(evidence) = result.evidence.get(COMPLAINT) {
                assert!(evidence.confidence >= threshold);
            }
        }
    }

    #[test]
    fn lowering_threshold_never_loses_an_answer() {
        let candidates = vec![
            Candidate::new(PHONE, "page", 9.0, 1),
            Candidate::new(PHONE, "2", 4.0, 2),
            Candidate::new(PHONE, "555-0100", 1.2, 2),
            Candidate::new(PHONE, "555-0199", 0.3, 3),
        ];
        let thresholds = [10.0, 5.0, 2.0, 1.2, 1.0, 0.3, 0.0, -1.0];
        let mut found_before = false;
        for threshold in thresholds {
            let found = with_threshold(threshold).aggregate(&candidates).fields[PHONE] != NOT_FOUND;
            assert!(found || !found_before, "answer lost when lowering to {threshold}");
            found_before = found;
        }
        assert!(found_before);
    }

    #[test]
    fn denylisted_answer_never_selected_regardless_of_score() {
        let result = aggregator().aggregate(&[
            Candidate::new(NAME, "  PATIENT DETAILS ", 50.0, 1),
            Candidate::new(NAME, "[SEP]", 40.0, 1),
            Candidate::new(NAME, "Dylan Wettlaufer", 2.0, 2),
        ]);
        assert_eq!(result.fields[NAME], "Dylan Wettlaufer");
    }

    #[test]
    fn numeric_noise_dropped_for_contact_fields() {
        let result = aggregator().aggregate(&[
            Candidate::new(DOB, "3", 9.0, 1),
            Candidate::new(DOB, "1990-04-12", 2.0, 1),
            Candidate::new(PHONE, "12", 9.0, 1),
        ]);
        assert_eq!(result.fields[DOB], "1990-04-12");
        assert_eq!(result.fields[PHONE], NOT_FOUND);
    }

    #[test]
    fn numeric_noise_kept_for_free_text() {
        let result = aggregator().aggregate(&[Candidate::new(COMPLAINT, "3", 9.0, 1)]);
        assert_eq!(result.fields[COMPLAINT], "3");
    }

    #[test]
    fn full_name_labels_are_stripped() {
        let result = aggregator().aggregate(&[Candidate::new(
            NAME,
            "PATIENT DETAILS First Name: Dylan Last Name: Wettlaufer",
            8.0,
            1,
        )]);
        assert_eq!(result.fields[NAME], "Dylan Wettlaufer");
    }

    #[test]
    fn name_cleanup_not_applied_to_other_fields() {
        let result = aggregator().aggregate(&[Candidate::new(
            COMPLAINT,
            "PATIENT DETAILS First Name: Dylan",
            8.0,
            1,
        )]);
        assert_eq!(result.fields[COMPLAINT], "PATIENT DETAILS First Name: Dylan");
    }

    #[test]
    fn label_only_name_yields_to_next_survivor() {
        let result = aggregator().aggregate(&[
            Candidate::new(NAME, "PATIENT DETAILS First Name:", 9.0, 1),
            Candidate::new(NAME, "Dylan Wettlaufer", 4.0, 2),
        ]);
        assert_eq!(result.fields[NAME], "Dylan Wettlaufer");
        assert_eq!(result.evidence[NAME].page_index, 2);
        assert_eq!(result.evidence[NAME].confidence, 4.0);
    }

    #[test]
    fn name_of_only_labels_is_not_found() {
        let result = aggregator()
            .aggregate(&[Candidate::new(NAME, "PATIENT DETAILS First Name:", 8.0, 1)]);
        assert_eq!(result.fields[NAME], NOT_FOUND);
        assert!(!result.evidence.contains_key(NAME));
    }

    #[test]
    fn failed_extraction_is_filtered_like_garbage() {
        let failure = Candidate::from_failure(&ExtractionFailure {
            question: COMPLAINT.into(),
            page_index: 1,
            cause: "timed out".into(),
        });
        let result = with_threshold(-10.0).aggregate(&[failure]);
        assert_eq!(result.fields[COMPLAINT], NOT_FOUND);
        assert!(!result.evidence.contains_key(COMPLAINT));
    }

    #[test]
    fn unknown_questions_ignored() {
        let result = aggregator().aggregate(&[Candidate::new("Blood type?", "O+", 9.0, 1)]);
        assert!(!result.fields.contains_key("Blood type?"));
    }
}
