use serde::{Deserialize, Serialize};
use std::fmt;

/// A cleaned, non-trivial segment of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    /// Position among the units produced from the same document
    pub index: usize,
    pub text: String,
}

impl TextUnit {
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for TextUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Which side of an alignment a document plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentRole {
    /// The requirements side (e.g. a job description)
    Reference,
    /// The evidence side (e.g. a résumé)
    Candidate,
}

impl fmt::Display for DocumentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => f.write_str("reference"),
            Self::Candidate => f.write_str("candidate"),
        }
    }
}

/// Best candidate evidence found for one reference unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub reference: TextUnit,
    /// `None` when there was nothing on the candidate side to compare against
    pub candidate: Option<TextUnit>,
    pub similarity: f32,
}

impl MatchRecord {
    pub(crate) fn unmatched(reference: TextUnit) -> Self {
        Self {
            reference,
            candidate: None,
            similarity: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// Coverage of the reference by the candidate, in [0, 100]
    pub overall_score: f32,
    /// Strongest matches, similarity descending
    pub top_matches: Vec<MatchRecord>,
    /// Weakly covered or missing reference units, similarity ascending
    pub weak_areas: Vec<MatchRecord>,
}

impl AlignmentResult {
    pub fn empty() -> Self {
        Self {
            overall_score: 0.0,
            top_matches: Vec::new(),
            weak_areas: Vec::new(),
        }
    }
}
