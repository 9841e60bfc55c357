use std::collections::HashMap;

use statrs::distribution::{Continuous, LogNormal, Normal};

use crate::chemistry::formula::MolecularFormula;

/// Log-normal location parameter of the neutral loss size prior.
pub const LOSS_SIZE_LOCATION: f64 = 4.02;
/// Log-normal scale parameter (standard deviation of the ln mass,
/// variance 0.31) of the neutral loss size prior.
pub const LOSS_SIZE_SCALE: f64 = 0.5567764;
/// Penalty for losses consisting of nothing but hydrogen.
pub const HYDROGEN_ONLY_LOSS_PENALTY: f64 = -3.0;
/// Score step between adjacent intensity ranks.
pub const INTENSITY_RANK_STEP: f64 = 0.1;

/// Standard deviation of the mass error model for a given absolute
/// tolerance; three sigma cover the tolerance window.
pub fn mass_deviation_sigma(tolerance: f64) -> f64 {
    tolerance / 3.0
}

/// Log likelihood ratio of an observed mass against a theoretical one under
/// a centered normal error model. A perfect match scores 0, every deviation
/// scores negative.
pub fn mass_deviation_score(observed: f64, theoretical: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    let normal = Normal::new(0.0, sigma).unwrap();
    normal.ln_pdf(observed - theoretical) - normal.ln_pdf(0.0)
}

/// Chemically frequent neutral losses with log scale bonuses. Derived from
/// curated loss lists for small molecule fragmentation.
pub fn common_loss_scores() -> HashMap<MolecularFormula, f64> {
    let entries: [(&str, f64); 33] = [
        ("H2", 1.0),
        ("H2O", 2.7),
        ("CH4", 0.8),
        ("C2H4", 0.7),
        ("C2H2", 0.7),
        ("C4H8", 0.5),
        ("C5H8", 0.5),
        ("C6H6", 0.6),
        ("CH2O", 1.5),
        ("CO", 2.2),
        ("CH2O2", 1.6),
        ("CO2", 2.0),
        ("C2H4O2", 1.4),
        ("C2H2O", 1.2),
        ("C3H6O2", 0.9),
        ("C3H4O4", 0.8),
        ("C3H2O3", 0.8),
        ("C5H8O4", 1.1),
        ("C6H10O5", 1.3),
        ("C6H8O6", 1.0),
        ("NH3", 2.0),
        ("CH5N", 0.7),
        ("CH3N", 0.8),
        ("C3H9N", 0.5),
        ("CHNO", 0.9),
        ("CH4N2O", 0.7),
        ("H3PO3", 0.9),
        ("H3PO4", 1.2),
        ("HPO3", 1.0),
        ("H2S", 0.9),
        ("S", 0.5),
        ("SO2", 0.8),
        ("SO3", 0.7),
    ];
    entries
        .iter()
        .map(|(formula, score)| (MolecularFormula::parse(formula).unwrap(), *score))
        .collect()
}

/// Log-normal prior over the loss mass, normalized to 0 at its mode, so
/// both unusually small and very heavy single losses are penalized.
pub fn loss_size_score(loss_mass: f64) -> f64 {
    if loss_mass <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let prior = LogNormal::new(LOSS_SIZE_LOCATION, LOSS_SIZE_SCALE).unwrap();
    let mode = (LOSS_SIZE_LOCATION - LOSS_SIZE_SCALE * LOSS_SIZE_SCALE).exp();
    prior.ln_pdf(loss_mass) - prior.ln_pdf(mode)
}

/// Plausibility prior of a neutral loss: common loss bonus plus size prior,
/// with a penalty for hydrogen-only losses.
pub fn loss_score(loss: &MolecularFormula) -> f64 {
    let mut score = loss_size_score(loss.monoisotopic_mass());
    if let Some(bonus) = common_loss_scores().get(loss) {
        score += bonus;
    }
    if loss.is_hydrogen_only() {
        score += HYDROGEN_ONLY_LOSS_PENALTY;
    }
    score
}

/// Score contribution of a peak's intensity rank; the most intense peak has
/// rank 0.
pub fn intensity_rank_score(rank: usize) -> f64 {
    -INTENSITY_RANK_STEP * rank as f64
}
