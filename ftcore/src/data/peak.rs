use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::chemistry::formula::MolecularFormula;

/// A single observed peak: mass, intensity and optional MS level.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Peak {
    pub mass: f64,
    pub intensity: f64,
    pub ms_level: Option<u8>,
}

impl Peak {
    pub fn new(mass: f64, intensity: f64) -> Self {
        Peak { mass, intensity, ms_level: None }
    }

    pub fn with_ms_level(mass: f64, intensity: f64, ms_level: u8) -> Self {
        Peak { mass, intensity, ms_level: Some(ms_level) }
    }
}

/// A candidate formula for one peak together with its decomposition quality
/// score, the mass deviation likelihood of the candidate against the peak.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct ScoredCandidate {
    pub formula: MolecularFormula,
    pub score: f64,
}

impl ScoredCandidate {
    pub fn new(formula: MolecularFormula, score: f64) -> Self {
        ScoredCandidate { formula, score }
    }
}

/// One peak with its decomposed candidate set, the per peak input of the
/// fragment graph builder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct AnnotatedPeak {
    pub peak: Peak,
    pub candidates: Vec<ScoredCandidate>,
}

impl AnnotatedPeak {
    pub fn new(peak: Peak, candidates: Vec<ScoredCandidate>) -> Self {
        AnnotatedPeak { peak, candidates }
    }
}
