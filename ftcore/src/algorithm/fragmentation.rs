use itertools::Itertools;

use crate::algorithm::scoring::{
    intensity_rank_score, loss_score, mass_deviation_score, mass_deviation_sigma,
};
use crate::chemistry::formula::MolecularFormula;
use crate::data::graph::FGraph;
use crate::data::peak::{AnnotatedPeak, Peak};
use crate::error::FtError;

/// Builds colored fragmentation graphs from decomposed peaks.
///
/// One color per peak, one node per (peak, candidate formula) pair, and a
/// loss edge for every ordered pair of nodes whose formulas are related by a
/// valid non-empty difference. Peaks are processed in descending mass order
/// (ties by intensity, then input order), so colors increase strictly along
/// every edge and the graph is acyclic by construction.
pub struct FragmentGraphBuilder {
    tolerance: f64,
}

impl FragmentGraphBuilder {
    /// `tolerance` is the absolute mass tolerance in Dalton used for the
    /// mass accuracy term of the edge weights.
    pub fn new(tolerance: f64) -> Result<Self, FtError> {
        if tolerance < 0.0 {
            return Err(FtError::InvalidInput(format!("negative tolerance: {}", tolerance)));
        }
        Ok(FragmentGraphBuilder { tolerance })
    }

    /// Builds the fragmentation graph for one precursor candidate.
    ///
    /// Candidates that are not proper sub-formulas of the root cannot be
    /// reached from it through any chain of losses and are excluded up
    /// front, so every node of the returned graph is root-reachable.
    pub fn build(
        &self,
        root_formula: &MolecularFormula,
        root_peak: Peak,
        peaks: &[AnnotatedPeak],
    ) -> Result<FGraph, FtError> {
        if root_formula.is_empty() {
            return Err(FtError::InvalidInput("empty root formula".to_string()));
        }
        let sigma = mass_deviation_sigma(self.tolerance);

        // descending mass defines the color order; intensity ranks feed the
        // vertex scores
        let order: Vec<usize> = (0..peaks.len())
            .sorted_by(|&a, &b| {
                let pa = &peaks[a].peak;
                let pb = &peaks[b].peak;
                pb.mass
                    .partial_cmp(&pa.mass)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(
                        pb.intensity
                            .partial_cmp(&pa.intensity)
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
                    .then(a.cmp(&b))
            })
            .collect();
        let ranks = intensity_ranks(peaks);

        let mut graph = FGraph::new(root_formula.clone(), Some(root_peak));
        for (sorted_position, &peak_index) in order.iter().enumerate() {
            let color = sorted_position + 1;
            let annotated = &peaks[peak_index];
            for candidate in &annotated.candidates {
                if candidate.formula == *root_formula || !root_formula.contains(&candidate.formula)
                {
                    continue;
                }
                let score = candidate.score + intensity_rank_score(ranks[peak_index]);
                graph.add_fragment(candidate.formula.clone(), color, Some(annotated.peak), score);
            }
        }

        // all ordered pairs across colors; the loss subtraction rejects the
        // rest
        for source in 0..graph.num_vertices() {
            for target in source + 1..graph.num_vertices() {
                if graph.fragments[source].color == graph.fragments[target].color {
                    continue;
                }
                let loss = match graph.fragments[source]
                    .formula
                    .checked_sub(&graph.fragments[target].formula)
                {
                    Some(loss) if !loss.is_empty() => loss,
                    _ => continue,
                };
                let observed_loss = peak_mass(&graph, source) - peak_mass(&graph, target);
                let weight = loss_score(&loss)
                    + mass_deviation_score(observed_loss, loss.monoisotopic_mass(), sigma)
                    + graph.fragments[target].score;
                graph.add_loss(source, target, loss, weight);
            }
        }

        debug_assert!(graph.reachable_from_root().iter().all(|&r| r));
        Ok(graph)
    }
}

fn peak_mass(graph: &FGraph, fragment: usize) -> f64 {
    match graph.fragments[fragment].peak {
        Some(peak) => peak.mass,
        None => graph.fragments[fragment].formula.monoisotopic_mass(),
    }
}

/// Rank of every peak in descending intensity order, ties by input order.
fn intensity_ranks(peaks: &[AnnotatedPeak]) -> Vec<usize> {
    let order: Vec<usize> = (0..peaks.len())
        .sorted_by(|&a, &b| {
            peaks[b]
                .peak
                .intensity
                .partial_cmp(&peaks[a].peak.intensity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        })
        .collect();
    let mut ranks = vec![0; peaks.len()];
    for (rank, &peak_index) in order.iter().enumerate() {
        ranks[peak_index] = rank;
    }
    ranks
}
