use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::algorithm::fragmentation::FragmentGraphBuilder;
use crate::chemistry::formula::MolecularFormula;
use crate::data::graph::FGraph;
use crate::data::peak::{AnnotatedPeak, Peak};
use crate::data::tree::{FTree, TreeNode};
use crate::error::FtError;

/// Objective gap below which a recomputed tree score is accepted as equal to
/// the solver's claimed objective.
pub const SCORE_VERIFICATION_TOLERANCE: f64 = 1e-4;

/// Outcome classification of a solver run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnStatus {
    /// The returned tree is a proven optimum.
    Optimal,
    /// The returned tree is a feasible solution without optimality proof.
    Heuristic,
    /// The graph has no root-reachable fragment, only the bare root exists.
    Infeasible,
    /// The caller aborted the search; no tree is returned.
    Canceled,
}

/// Result of one solver invocation: a status and, for every status except
/// `Canceled`, a tree. An infeasible graph yields the root-only tree.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverOutcome {
    pub status: ReturnStatus,
    pub tree: Option<FTree>,
}

impl SolverOutcome {
    pub fn score(&self) -> f64 {
        self.tree.as_ref().map(|t| t.score).unwrap_or(0.0)
    }
}

/// Shared contract of the tree selection strategies: select a colorful
/// rooted arborescence of maximal weight from a fragmentation graph.
pub trait TreeSolver {
    fn solve(&self, graph: &FGraph) -> Result<SolverOutcome, FtError>;
}

/// Builds the tree induced by a set of selected loss edges by walking from
/// the root along selected edges. Edges whose source is not itself reached
/// are ignored, so the input must encode a connected selection.
pub fn tree_from_selection(graph: &FGraph, selected_edges: &[usize]) -> FTree {
    let mut is_selected = vec![false; graph.num_edges()];
    for &edge in selected_edges {
        is_selected[edge] = true;
    }
    let mut tree = root_only_tree(graph);
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)]; // (graph fragment, tree node)
    while let Some((fragment, tree_node)) = stack.pop() {
        for &edge in graph.out_edges(fragment) {
            if !is_selected[edge] {
                continue;
            }
            let loss = &graph.losses[edge];
            let target = &graph.fragments[loss.target];
            let child = tree.add_child(
                tree_node,
                TreeNode {
                    formula: target.formula.clone(),
                    color: target.color,
                    peak: target.peak,
                    score: target.score,
                },
                loss.formula.clone(),
                loss.weight,
            );
            stack.push((loss.target, child));
        }
    }
    tree
}

/// The empty selection: just the root fragment.
pub fn root_only_tree(graph: &FGraph) -> FTree {
    let root = graph.root();
    FTree::new(TreeNode {
        formula: root.formula.clone(),
        color: root.color,
        peak: root.peak,
        score: root.score,
    })
}

/// A graph with exactly one edge short-circuits to the trivial one-edge
/// tree without invoking any search.
pub fn single_edge_shortcut(graph: &FGraph) -> Option<FTree> {
    if graph.num_edges() == 1 && graph.losses[0].weight > 0.0 {
        Some(tree_from_selection(graph, &[0]))
    } else {
        None
    }
}

/// Compares a solver's claimed objective against the score re-derived from
/// the constructed tree.
pub fn verify_solution(claimed_score: f64, tree: &FTree) -> bool {
    (tree.edge_weight_sum() - claimed_score).abs() < SCORE_VERIFICATION_TOLERANCE
}

/// Computes fragmentation trees for several precursor formula candidates
/// over the same peak list, in parallel, and returns them ranked by score
/// descending (ties keep candidate order).
///
/// A canceled solve aborts the whole batch with `FtError::Canceled`.
pub fn compute_ranked_trees<S: TreeSolver + Sync>(
    builder: &FragmentGraphBuilder,
    solver: &S,
    candidates: &[(MolecularFormula, Peak)],
    peaks: &[AnnotatedPeak],
) -> Result<Vec<FTree>, FtError> {
    let outcomes: Vec<SolverOutcome> = candidates
        .par_iter()
        .map(|(formula, peak)| {
            let graph = builder.build(formula, *peak, peaks)?;
            solver.solve(&graph)
        })
        .collect::<Result<Vec<_>, FtError>>()?;

    let mut trees = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome.status {
            ReturnStatus::Canceled => return Err(FtError::Canceled),
            _ => {
                if let Some(tree) = outcome.tree {
                    trees.push(tree);
                }
            }
        }
    }
    trees.sort_by_key(|tree| std::cmp::Reverse(OrderedFloat(tree.score)));
    Ok(trees)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    fn chain_graph() -> FGraph {
        let mut graph = FGraph::new(formula("C6H12O6"), None);
        let a = graph.add_fragment(formula("C6H10O5"), 1, None, 0.0);
        let b = graph.add_fragment(formula("C6H8O4"), 2, None, 0.0);
        graph.add_loss(0, a, formula("H2O"), 5.0);
        graph.add_loss(a, b, formula("H2O"), 3.0);
        graph.add_loss(0, b, formula("H4O2"), 1.0);
        graph
    }

    #[test]
    fn test_tree_from_selection_follows_root() {
        let graph = chain_graph();
        let tree = tree_from_selection(&graph, &[0, 1]);
        assert_eq!(tree.num_vertices(), 3);
        assert!((tree.score - 8.0).abs() < 1e-12);
        assert!(tree.is_colorful());
        assert!(verify_solution(8.0, &tree));
    }

    #[test]
    fn test_single_edge_shortcut() {
        let mut graph = FGraph::new(formula("C2H4O2"), None);
        let a = graph.add_fragment(formula("CH2O"), 1, None, 0.0);
        graph.add_loss(0, a, formula("CH2O"), 2.0);
        let tree = single_edge_shortcut(&graph).unwrap();
        assert_eq!(tree.num_edges(), 1);
        assert!((tree.score - 2.0).abs() < 1e-12);

        // not applicable once there is a choice
        assert!(single_edge_shortcut(&chain_graph()).is_none());
    }

    #[test]
    fn test_root_only_tree() {
        let graph = FGraph::new(formula("C2H4O2"), None);
        let tree = root_only_tree(&graph);
        assert_eq!(tree.num_vertices(), 1);
        assert_eq!(tree.num_edges(), 0);
        assert_eq!(tree.score, 0.0);
    }

    #[test]
    fn test_ranked_trees_over_the_full_pipeline() {
        use crate::algorithm::decompose::MassDecomposer;
        use crate::algorithm::exact::ExactSolver;
        use crate::algorithm::greedy::GreedySolver;
        use crate::chemistry::alphabet::ChemicalAlphabet;

        let tolerance = 0.005;
        let alphabet = ChemicalAlphabet::new(&["C", "H", "N", "O"]).unwrap();
        let decomposer = MassDecomposer::new(&alphabet).unwrap();

        let precursor = Peak::new(180.0634, 1000.0);
        let fragments = vec![Peak::new(162.0528, 500.0), Peak::new(144.0423, 250.0)];
        let annotated = decomposer.annotate_peaks(&fragments, tolerance).unwrap();

        let candidates: Vec<(MolecularFormula, Peak)> = decomposer
            .decompose(precursor.mass, tolerance)
            .unwrap()
            .into_iter()
            .map(|formula| (formula, precursor))
            .collect();
        assert!(!candidates.is_empty());

        let builder = FragmentGraphBuilder::new(tolerance).unwrap();
        let trees =
            compute_ranked_trees(&builder, &ExactSolver::new(), &candidates, &annotated).unwrap();
        assert_eq!(trees.len(), candidates.len());
        for pair in trees.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for tree in &trees {
            assert!(tree.is_colorful());
        }
        // the glucose-like candidate explains both water losses
        assert!(trees[0].score > 0.0);

        // the exact solver never scores below the greedy heuristic
        for (formula, peak) in &candidates {
            let graph = builder.build(formula, *peak, &annotated).unwrap();
            let exact = ExactSolver::new().solve(&graph).unwrap();
            let greedy = GreedySolver::new().solve(&graph).unwrap();
            assert!(exact.score() >= greedy.score() - 1e-9);
        }
    }
}
