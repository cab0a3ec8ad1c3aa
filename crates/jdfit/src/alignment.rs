//! Coverage alignment of a reference document against a candidate document.
//!
//! Every reference unit is matched to its single most similar candidate unit.
//! The candidate side is always the one indexed: the question answered is
//! "for each requirement, what is the best evidence available?", so the
//! reference unit count is the denominator of the score.

use anyhow::Context;
use std::sync::Arc;

use crate::config::{AlignConfig, MatchingConfig};
use crate::embeddings::{EmbeddingModel, MiniLmConfig, MiniLmEmbeddings};
use crate::error::{AlignError, Result};
use crate::processing::Segmenter;
use crate::search::{first_non_finite, FlatIndex, VectorIndex};
use crate::types::{AlignmentResult, DocumentRole, MatchRecord, TextUnit};

/// Best match only
const NEIGHBORS_PER_UNIT: usize = 1;

/// Scores pre-embedded units. Holds only configuration; every call builds
/// and drops its own index.
#[derive(Debug, Clone, Default)]
pub struct SemanticMatcher {
    config: MatchingConfig,
}

impl SemanticMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> f32 {
        self.config.match_threshold
    }

    pub fn align(
        &self,
        reference_units: &[TextUnit],
        candidate_units: &[TextUnit],
        reference_embeddings: &[Vec<f32>],
        candidate_embeddings: &[Vec<f32>],
    ) -> Result<AlignmentResult> {
        check_correspondence(DocumentRole::Reference, reference_units, reference_embeddings)?;
        check_correspondence(DocumentRole::Candidate, candidate_units, candidate_embeddings)?;
        check_finite(DocumentRole::Reference, reference_embeddings)?;
        check_finite(DocumentRole::Candidate, candidate_embeddings)?;

        if reference_units.is_empty() || candidate_units.is_empty() {
            tracing::debug!(
                reference_units = reference_units.len(),
                candidate_units = candidate_units.len(),
                "Nothing to compare, every reference unit is uncovered"
            );
            return Ok(AlignmentResult {
                weak_areas: reference_units
                    .iter()
                    .cloned()
                    .map(MatchRecord::unmatched)
                    .collect(),
                ..AlignmentResult::empty()
            });
        }

        let index = FlatIndex::build(candidate_embeddings)?;
        let hits = index.search_batch(reference_embeddings, NEIGHBORS_PER_UNIT)?;

        let threshold = self.threshold();
        let mut matches = Vec::new();
        let mut weak = Vec::new();
        let mut total_similarity = 0.0f64;

        for (reference, neighbors) in reference_units.iter().zip(hits) {
            let Some(best) = neighbors.first() else {
                continue;
            };
            let Some(candidate) = candidate_units.get(best.position) else {
                tracing::warn!(
                    reference = reference.index,
                    position = best.position,
                    "Index returned an out-of-range match, skipping unit"
                );
                continue;
            };

            total_similarity += f64::from(best.similarity);

            let record = MatchRecord {
                reference: reference.clone(),
                candidate: Some(candidate.clone()),
                similarity: round_to(best.similarity, self.config.similarity_decimals),
            };

            if best.similarity < threshold {
                weak.push(record);
            } else {
                matches.push(record);
            }
        }

        let average = total_similarity / reference_units.len() as f64;
        let overall_score = round_to((average * 100.0).clamp(0.0, 100.0) as f32, self.config.score_decimals);

        // Stable sorts keep document order among equal similarities
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        weak.sort_by(|a, b| {
            a.similarity
                .partial_cmp(&b.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(self.config.max_top_matches);

        tracing::debug!(
            reference_units = reference_units.len(),
            candidate_units = candidate_units.len(),
            matched = matches.len(),
            weak = weak.len(),
            overall_score,
            "Alignment complete"
        );

        Ok(AlignmentResult {
            overall_score,
            top_matches: matches,
            weak_areas: weak,
        })
    }
}

fn check_correspondence(
    role: DocumentRole,
    units: &[TextUnit],
    embeddings: &[Vec<f32>],
) -> Result<()> {
    if units.len() != embeddings.len() {
        return Err(AlignError::EmbeddingCountMismatch {
            role,
            units: units.len(),
            embeddings: embeddings.len(),
        });
    }
    Ok(())
}

fn check_finite(role: DocumentRole, embeddings: &[Vec<f32>]) -> Result<()> {
    match first_non_finite(embeddings) {
        Some(position) => Err(AlignError::NonFiniteEmbedding { role, position }),
        None => Ok(()),
    }
}

fn round_to(value: f32, decimals: u32) -> f32 {
    let factor = 10f64.powi(decimals as i32);
    ((f64::from(value) * factor).round() / factor) as f32
}

/// Segment, embed and align two raw documents.
pub struct AlignmentEngine {
    embeddings: Arc<dyn EmbeddingModel>,
    segmenter: Segmenter,
    matcher: SemanticMatcher,
}

impl AlignmentEngine {
    pub fn new(config: &AlignConfig, embeddings: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            embeddings,
            segmenter: Segmenter::from_config(&config.segmentation),
            matcher: SemanticMatcher::new(config.matching.clone()),
        }
    }

    /// Build an engine backed by the ONNX sentence embedding model on disk.
    pub fn from_config(config: &AlignConfig) -> anyhow::Result<Self> {
        let model_dir = config.embedding.model_path();
        let minilm_config = MiniLmConfig::from_model_dir(&model_dir, &config.embedding)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No embedding model available. Place an ONNX export and tokenizer.json in: {}",
                    model_dir.display()
                )
            })?;
        let embeddings =
            MiniLmEmbeddings::new(minilm_config).context("Failed to load sentence embeddings")?;
        Ok(Self::new(config, Arc::new(embeddings)))
    }

    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    pub fn matcher(&self) -> &SemanticMatcher {
        &self.matcher
    }

    /// Score how well `candidate_text` covers `reference_text`.
    ///
    /// Input is validated before any embedding work: blank text first, then
    /// documents that segment to nothing (reference side checked first).
    pub fn analyze(&self, reference_text: &str, candidate_text: &str) -> Result<AlignmentResult> {
        if reference_text.trim().is_empty() || candidate_text.trim().is_empty() {
            return Err(AlignError::MissingInput);
        }

        let reference_units = self.segmenter.segment(reference_text);
        if reference_units.is_empty() {
            return Err(AlignError::NoValidContent {
                role: DocumentRole::Reference,
            });
        }
        let candidate_units = self.segmenter.segment(candidate_text);
        if candidate_units.is_empty() {
            return Err(AlignError::NoValidContent {
                role: DocumentRole::Candidate,
            });
        }

        let reference_embeddings = self
            .embed_units(&reference_units)
            .context("Failed to embed reference units")?;
        let candidate_embeddings = self
            .embed_units(&candidate_units)
            .context("Failed to embed candidate units")?;

        self.matcher.align(
            &reference_units,
            &candidate_units,
            &reference_embeddings,
            &candidate_embeddings,
        )
    }

    fn embed_units(&self, units: &[TextUnit]) -> anyhow::Result<Vec<Vec<f32>>> {
        let texts: Vec<&str> = units.iter().map(TextUnit::as_str).collect();
        self.embeddings.embed_documents(&texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn units(texts: &[&str]) -> Vec<TextUnit> {
        texts
            .iter()
            .enumerate()
            .map(|(index, t)| TextUnit {
                index,
                text: t.to_string(),
            })
            .collect()
    }

    /// Looks each unit up in a fixed table; unknown text maps to the zero vector.
    struct TableEmbeddings {
        table: HashMap<String, Vec<f32>>,
        dimension: usize,
    }

    impl TableEmbeddings {
        fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            let dimension = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
            Self {
                table: entries
                    .iter()
                    .map(|(t, v)| (t.to_string(), v.clone()))
                    .collect(),
                dimension,
            }
        }
    }

    impl EmbeddingModel for TableEmbeddings {
        fn embed_document(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self
                .table
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0; self.dimension]))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    struct FailingEmbeddings;

    impl EmbeddingModel for FailingEmbeddings {
        fn embed_document(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Err(anyhow::anyhow!("model offline"))
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    #[test]
    fn test_half_covered_scores_fifty() {
        let reference = units(&["needs rust", "needs go"]);
        let candidate = units(&["knows rust"]);
        let result = SemanticMatcher::default()
            .align(
                &reference,
                &candidate,
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                &[vec![1.0, 0.0]],
            )
            .unwrap();

        assert_eq!(result.overall_score, 50.0);
        assert_eq!(result.top_matches.len(), 1);
        assert_eq!(result.top_matches[0].similarity, 1.0);
        assert_eq!(result.top_matches[0].reference.text, "needs rust");
        assert_eq!(result.weak_areas.len(), 1);
        assert_eq!(result.weak_areas[0].similarity, 0.0);
        assert_eq!(
            result.weak_areas[0].candidate.as_ref().map(|c| c.text.as_str()),
            Some("knows rust")
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // 2/5 = 0.4 exactly after normalization
        let reference = units(&["first requirement", "second requirement"]);
        let candidate = units(&["only evidence"]);
        let result = SemanticMatcher::default()
            .align(
                &reference,
                &candidate,
                &[vec![2.0, 4.0, 2.0, 1.0], vec![2.0, 1.0, 4.0, 2.0]],
                &[vec![1.0, 0.0, 0.0, 0.0]],
            )
            .unwrap();

        assert_eq!(result.top_matches.len(), 2);
        assert!(result.weak_areas.is_empty());
        assert!(result.top_matches.iter().all(|m| m.similarity == 0.4));
        assert_eq!(result.overall_score, 40.0);
    }

    #[test]
    fn test_just_under_threshold_is_weak_but_emitted_rounded() {
        // Classification uses the raw similarity, output the rounded one
        let reference = units(&["needs rust"]);
        let candidate = units(&["knows rust"]);
        let s = 0.39996f32;
        let result = SemanticMatcher::default()
            .align(
                &reference,
                &candidate,
                &[vec![s, (1.0 - s * s).sqrt()]],
                &[vec![1.0, 0.0]],
            )
            .unwrap();

        assert!(result.top_matches.is_empty());
        assert_eq!(result.weak_areas.len(), 1);
        assert_eq!(result.weak_areas[0].similarity, 0.4);
        assert_eq!(result.overall_score, 40.0);
    }

    #[test]
    fn test_tiny_embeddings_score_by_direction() {
        let reference = units(&["needs rust"]);
        let candidate = units(&["knows rust"]);
        let result = SemanticMatcher::default()
            .align(&reference, &candidate, &[vec![1e-13, 0.0]], &[vec![1e-13, 0.0]])
            .unwrap();

        assert_eq!(result.overall_score, 100.0);
        assert_eq!(result.top_matches.len(), 1);
        assert_eq!(result.top_matches[0].similarity, 1.0);
        assert!(result.weak_areas.is_empty());
    }

    #[test]
    fn test_non_finite_embeddings_rejected() {
        let reference = units(&["needs rust", "needs go"]);
        let candidate = units(&["knows rust"]);
        let err = SemanticMatcher::default()
            .align(
                &reference,
                &candidate,
                &[vec![1.0, 0.0], vec![f32::NAN, 0.0]],
                &[vec![1.0, 0.0]],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            AlignError::NonFiniteEmbedding {
                role: DocumentRole::Reference,
                position: 1
            }
        ));

        let err = SemanticMatcher::default()
            .align(
                &reference,
                &candidate,
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                &[vec![f32::NEG_INFINITY, 0.0]],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            AlignError::NonFiniteEmbedding {
                role: DocumentRole::Candidate,
                position: 0
            }
        ));
    }

    #[test]
    fn test_empty_candidate_reports_every_reference_unit() {
        let reference = units(&["needs rust", "needs go", "needs sql"]);
        let result = SemanticMatcher::default()
            .align(
                &reference,
                &[],
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
                &[],
            )
            .unwrap();

        assert_eq!(result.overall_score, 0.0);
        assert!(result.top_matches.is_empty());
        assert_eq!(result.weak_areas.len(), 3);
        assert!(result.weak_areas.iter().all(|w| w.candidate.is_none()));
        assert_eq!(result.weak_areas[2].reference.text, "needs sql");
    }

    #[test]
    fn test_empty_reference_is_empty_result() {
        let candidate = units(&["knows rust"]);
        let result = SemanticMatcher::default()
            .align(&[], &candidate, &[], &[vec![1.0]])
            .unwrap();
        assert_eq!(result, AlignmentResult::empty());
    }

    #[test]
    fn test_orders_and_caps_matches() {
        let reference = units(&["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8"]);
        let candidate = units(&["c0"]);
        // cosine with [1, 0] is the first component of each unit vector
        let sims = [0.5f32, 0.9, 0.7, 0.45, 0.95, 0.6, 0.1, 0.3, -0.2];
        let reference_embeddings: Vec<Vec<f32>> = sims
            .iter()
            .map(|&s| vec![s, (1.0 - s * s).sqrt()])
            .collect();

        let result = SemanticMatcher::default()
            .align(&reference, &candidate, &reference_embeddings, &[vec![1.0, 0.0]])
            .unwrap();

        let top: Vec<&str> = result
            .top_matches
            .iter()
            .map(|m| m.reference.text.as_str())
            .collect();
        assert_eq!(top, vec!["r4", "r1", "r2", "r5", "r0"]);
        assert!(result
            .top_matches
            .windows(2)
            .all(|w| w[0].similarity >= w[1].similarity));

        let weak: Vec<&str> = result
            .weak_areas
            .iter()
            .map(|m| m.reference.text.as_str())
            .collect();
        assert_eq!(weak, vec!["r8", "r6", "r7"]);
        assert!(result.weak_areas.iter().all(|m| m.similarity < 0.4));

        // Mean of all nine similarities, including the one cut from top_matches
        let expected = sims.iter().sum::<f32>() / 9.0 * 100.0;
        assert!((result.overall_score - expected).abs() < 0.01);
    }

    #[test]
    fn test_negative_similarities_clamp_to_zero() {
        let reference = units(&["opposite requirement"]);
        let candidate = units(&["unrelated evidence"]);
        let result = SemanticMatcher::default()
            .align(&reference, &candidate, &[vec![-1.0, 0.0]], &[vec![1.0, 0.0]])
            .unwrap();
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(result.weak_areas[0].similarity, -1.0);
    }

    #[test]
    fn test_similarity_rounded_to_three_places() {
        let reference = units(&["some requirement"]);
        let candidate = units(&["some evidence"]);
        let s = 0.123456f32;
        let result = SemanticMatcher::default()
            .align(
                &reference,
                &candidate,
                &[vec![s, (1.0 - s * s).sqrt()]],
                &[vec![1.0, 0.0]],
            )
            .unwrap();
        assert_eq!(result.weak_areas[0].similarity, 0.123);
        assert_eq!(result.overall_score, 12.35);
    }

    #[test]
    fn test_best_candidate_selected() {
        let reference = units(&["needs kubernetes"]);
        let candidate = units(&["likes cooking", "runs kubernetes clusters", "plays chess"]);
        let result = SemanticMatcher::default()
            .align(
                &reference,
                &candidate,
                &[vec![0.0, 1.0, 0.0]],
                &[vec![1.0, 0.0, 0.0], vec![0.1, 0.9, 0.0], vec![0.0, 0.0, 1.0]],
            )
            .unwrap();
        let top = &result.top_matches[0];
        assert_eq!(
            top.candidate.as_ref().map(|c| c.index),
            Some(1)
        );
    }

    #[test]
    fn test_custom_threshold() {
        let matcher = SemanticMatcher::new(MatchingConfig {
            match_threshold: 0.7,
            ..MatchingConfig::default()
        });
        let reference = units(&["some requirement"]);
        let candidate = units(&["some evidence"]);
        let result = matcher
            .align(&reference, &candidate, &[vec![3.0, 4.0]], &[vec![1.0, 0.0]])
            .unwrap();
        assert!(result.top_matches.is_empty());
        assert_eq!(result.weak_areas[0].similarity, 0.6);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let reference = units(&["needs rust", "needs go"]);
        let candidate = units(&["knows rust"]);
        let err = SemanticMatcher::default()
            .align(&reference, &candidate, &[vec![1.0, 0.0]], &[vec![1.0, 0.0]])
            .unwrap_err();
        assert!(matches!(
            err,
            AlignError::EmbeddingCountMismatch {
                role: DocumentRole::Reference,
                units: 2,
                embeddings: 1
            }
        ));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let reference = units(&["needs rust"]);
        let candidate = units(&["knows rust"]);
        let err = SemanticMatcher::default()
            .align(&reference, &candidate, &[vec![1.0, 0.0, 0.0]], &[vec![1.0, 0.0]])
            .unwrap_err();
        assert!(matches!(err, AlignError::DimensionMismatch { .. }));
    }

    fn engine(entries: &[(&str, Vec<f32>)]) -> AlignmentEngine {
        AlignmentEngine::new(
            &AlignConfig::default(),
            Arc::new(TableEmbeddings::new(entries)),
        )
    }

    #[test]
    fn test_analyze_end_to_end() {
        let engine = engine(&[
            ("Experience with Rust", vec![1.0, 0.0, 0.0]),
            ("Knows distributed systems", vec![0.0, 1.0, 0.0]),
            ("Five years of Rust", vec![0.9, 0.1, 0.0]),
            ("Enjoys hiking", vec![0.0, 0.0, 1.0]),
        ]);

        let result = engine
            .analyze(
                "Experience with Rust\r\nok\r\nKnows distributed systems",
                "Five years of Rust\n\nEnjoys hiking",
            )
            .unwrap();

        assert_eq!(result.top_matches.len(), 1);
        assert_eq!(result.top_matches[0].reference.text, "Experience with Rust");
        assert_eq!(
            result.top_matches[0].candidate.as_ref().map(|c| c.text.as_str()),
            Some("Five years of Rust")
        );
        assert_eq!(result.weak_areas.len(), 1);
        assert_eq!(result.weak_areas[0].reference.text, "Knows distributed systems");
        assert!(result.overall_score > 0.0 && result.overall_score <= 100.0);
    }

    #[test]
    fn test_analyze_is_deterministic() {
        let engine = engine(&[
            ("Experience with Rust", vec![1.0, 0.2]),
            ("Five years of Rust", vec![0.8, 0.3]),
        ]);
        let first = engine.analyze("Experience with Rust", "Five years of Rust").unwrap();
        let second = engine.analyze("Experience with Rust", "Five years of Rust").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_analyze_rejects_blank_input() {
        let engine = engine(&[("anything", vec![1.0])]);
        assert!(matches!(
            engine.analyze("   ", "Five years of Rust"),
            Err(AlignError::MissingInput)
        ));
        assert!(matches!(
            engine.analyze("Experience with Rust", "\n\t"),
            Err(AlignError::MissingInput)
        ));
    }

    #[test]
    fn test_analyze_rejects_documents_without_units() {
        let engine = engine(&[("anything", vec![1.0])]);
        let err = engine.analyze("ok\nhi", "Five years of Rust").unwrap_err();
        assert!(matches!(
            err,
            AlignError::NoValidContent {
                role: DocumentRole::Reference
            }
        ));
        assert!(err.is_input_error());

        let err = engine.analyze("Experience with Rust", "a\nb\nc").unwrap_err();
        assert!(matches!(
            err,
            AlignError::NoValidContent {
                role: DocumentRole::Candidate
            }
        ));
    }

    #[test]
    fn test_analyze_surfaces_embedding_failure() {
        let engine = AlignmentEngine::new(&AlignConfig::default(), Arc::new(FailingEmbeddings));
        let err = engine
            .analyze("Experience with Rust", "Five years of Rust")
            .unwrap_err();
        assert!(matches!(err, AlignError::Embedding(_)));
        assert!(!err.is_input_error());
    }
}
