use ordered_float::OrderedFloat;

use crate::algorithm::solver::{
    root_only_tree, single_edge_shortcut, tree_from_selection, ReturnStatus, SolverOutcome,
    TreeSolver,
};
use crate::data::graph::FGraph;
use crate::error::FtError;

/// Prim-style greedy approximation of the maximum colorful subtree problem.
///
/// Starting from the root, repeatedly attaches the admissible edge of
/// maximum positive weight, where admissible means: the parent is already in
/// the tree and the child's color is not used yet. Ties are broken by edge
/// insertion order, so runs are deterministic. Terminates when no positive
/// weight admissible edge remains.
///
/// The exact solver reuses this selection as its warm start.
pub struct GreedySolver;

impl GreedySolver {
    pub fn new() -> Self {
        GreedySolver
    }
}

impl Default for GreedySolver {
    fn default() -> Self {
        GreedySolver::new()
    }
}

impl TreeSolver for GreedySolver {
    fn solve(&self, graph: &FGraph) -> Result<SolverOutcome, FtError> {
        if graph.out_edges(0).is_empty() {
            return Ok(SolverOutcome {
                status: ReturnStatus::Infeasible,
                tree: Some(root_only_tree(graph)),
            });
        }
        if let Some(tree) = single_edge_shortcut(graph) {
            return Ok(SolverOutcome { status: ReturnStatus::Heuristic, tree: Some(tree) });
        }
        let selection = greedy_selection(graph);
        let tree = tree_from_selection(graph, &selection);
        Ok(SolverOutcome { status: ReturnStatus::Heuristic, tree: Some(tree) })
    }
}

/// The greedy edge selection underlying `GreedySolver`, as graph edge ids.
pub(crate) fn greedy_selection(graph: &FGraph) -> Vec<usize> {
    let mut in_tree = vec![false; graph.num_vertices()];
    in_tree[0] = true;
    let mut color_used = vec![false; graph.num_colors()];
    color_used[graph.root().color] = true;
    let mut selected = Vec::new();

    loop {
        let mut best: Option<(OrderedFloat<f64>, usize)> = None;
        for (edge_id, loss) in graph.losses.iter().enumerate() {
            if !in_tree[loss.source] || in_tree[loss.target] {
                continue;
            }
            if color_used[graph.fragments[loss.target].color] {
                continue;
            }
            if loss.weight <= 0.0 {
                continue;
            }
            // strict comparison keeps the earliest edge on ties
            if best.map_or(true, |(weight, _)| OrderedFloat(loss.weight) > weight) {
                best = Some((OrderedFloat(loss.weight), edge_id));
            }
        }
        match best {
            Some((_, edge_id)) => {
                let target = graph.losses[edge_id].target;
                in_tree[target] = true;
                color_used[graph.fragments[target].color] = true;
                selected.push(edge_id);
            }
            None => break,
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::formula::MolecularFormula;

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    /// The canonical 3-node scenario: root -> A (5), A -> B (3),
    /// root -> B (1).
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
    fn test_selects_the_heavy_chain() {
        let outcome = GreedySolver::new().solve(&chain_graph()).unwrap();
        assert_eq!(outcome.status, ReturnStatus::Heuristic);
        let tree = outcome.tree.unwrap();
        assert_eq!(tree.num_vertices(), 3);
        assert!((tree.score - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_result_is_colorful_arborescence() {
        // two candidates per color compete; only one may survive per color
        let mut graph = FGraph::new(formula("C6H12O6"), None);
        let a1 = graph.add_fragment(formula("C6H10O5"), 1, None, 0.0);
        let a2 = graph.add_fragment(formula("C5H8O5"), 1, None, 0.0);
        let b1 = graph.add_fragment(formula("C6H8O4"), 2, None, 0.0);
        let b2 = graph.add_fragment(formula("C4H6O4"), 2, None, 0.0);
        graph.add_loss(0, a1, formula("H2O"), 2.0);
        graph.add_loss(0, a2, formula("CH4O"), 2.5);
        graph.add_loss(0, b1, formula("H4O2"), 1.0);
        graph.add_loss(0, b2, formula("C2H6O2"), 0.5);
        graph.add_loss(a1, b1, formula("H2O"), 3.0);
        graph.add_loss(a2, b2, formula("CH2O"), 1.5);

        let tree = GreedySolver::new().solve(&graph).unwrap().tree.unwrap();
        assert!(tree.is_colorful());
        // every non-root node hangs off a path that reaches the root
        for node in 1..tree.num_vertices() {
            assert!(tree.depth(node) >= 1);
            assert!(tree.parent(node).is_some());
        }
        // a2 (2.5) is taken first, then a2 -> b2 (1.5) beats root -> b1 (1.0)
        assert!((tree.score - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_edges_are_never_selected() {
        let mut graph = FGraph::new(formula("C6H12O6"), None);
        let a = graph.add_fragment(formula("C6H10O5"), 1, None, 0.0);
        let b = graph.add_fragment(formula("C6H8O4"), 2, None, 0.0);
        graph.add_loss(0, a, formula("H2O"), 2.0);
        graph.add_loss(a, b, formula("H2O"), -1.0);

        let tree = GreedySolver::new().solve(&graph).unwrap().tree.unwrap();
        assert_eq!(tree.num_vertices(), 2);
        assert!((tree.score - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let mut graph = FGraph::new(formula("C6H12O6"), None);
        let a1 = graph.add_fragment(formula("C6H10O5"), 1, None, 0.0);
        let a2 = graph.add_fragment(formula("C5H8O5"), 1, None, 0.0);
        graph.add_loss(0, a1, formula("H2O"), 2.0);
        graph.add_loss(0, a2, formula("CH4O"), 2.0);

        let tree = GreedySolver::new().solve(&graph).unwrap().tree.unwrap();
        assert_eq!(tree.num_vertices(), 2);
        assert_eq!(tree.nodes[1].formula, formula("C6H10O5"));
    }

    #[test]
    fn test_root_without_edges_is_infeasible() {
        let graph = FGraph::new(formula("C6H12O6"), None);
        let outcome = GreedySolver::new().solve(&graph).unwrap();
        assert_eq!(outcome.status, ReturnStatus::Infeasible);
        assert_eq!(outcome.tree.unwrap().num_vertices(), 1);
    }

    #[test]
    fn test_single_edge_graph_short_circuits() {
        let mut graph = FGraph::new(formula("C2H4O2"), None);
        let a = graph.add_fragment(formula("CH2O"), 1, None, 0.0);
        graph.add_loss(0, a, formula("CH2O"), 1.5);
        let outcome = GreedySolver::new().solve(&graph).unwrap();
        let tree = outcome.tree.unwrap();
        assert_eq!(tree.num_edges(), 1);
        assert!((tree.score - 1.5).abs() < 1e-12);
    }
}
