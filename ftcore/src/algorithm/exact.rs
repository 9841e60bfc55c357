use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::algorithm::greedy::greedy_selection;
use crate::algorithm::solver::{
    root_only_tree, single_edge_shortcut, tree_from_selection, verify_solution, ReturnStatus,
    SolverOutcome, TreeSolver,
};
use crate::data::graph::FGraph;
use crate::error::FtError;

/// Objective values within this gap are treated as equal when comparing
/// bounds, so floating point noise never prunes a true optimum.
pub const OBJECTIVE_EPSILON: f64 = 1e-6;

/// Exact maximum colorful subtree solver.
///
/// The selection problem is materialized as an integer program with one
/// binary variable per loss edge: every non-root fragment takes at most one
/// incoming edge, an outgoing edge may only be selected if the fragment
/// itself is selected (or is the root), and every color class contributes at
/// most one selected fragment. The objective maximizes the summed weight of
/// the selected edges, into which the vertex scores are already folded.
///
/// Because the builder guarantees that edges run from smaller to larger
/// colors, the search decides the colors in ascending order: every potential
/// parent is fixed before any of its children, which makes selected-edge
/// cycles impossible and keeps the connectivity constraints local. Branches
/// are cut with the admissible per-color relaxation bound (the sum of the
/// best positive incoming edge weight of every undecided color). A greedy
/// warm start tightens the incumbent before the first branch.
pub struct ExactSolver {
    use_warm_start: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl ExactSolver {
    pub fn new() -> Self {
        ExactSolver { use_warm_start: true, cancel: None }
    }

    /// Disables the greedy warm start; the search then begins from the
    /// empty incumbent. The optimum is unaffected, only the search order.
    pub fn without_warm_start(mut self) -> Self {
        self.use_warm_start = false;
        self
    }

    /// Installs a cancellation flag. Setting it aborts an in-flight solve
    /// at the next branch, releasing all search state and reporting
    /// `ReturnStatus::Canceled` instead of a tree.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }
}

impl Default for ExactSolver {
    fn default() -> Self {
        ExactSolver::new()
    }
}

impl TreeSolver for ExactSolver {
    fn solve(&self, graph: &FGraph) -> Result<SolverOutcome, FtError> {
        if graph.out_edges(0).is_empty() {
            return Ok(SolverOutcome {
                status: ReturnStatus::Infeasible,
                tree: Some(root_only_tree(graph)),
            });
        }
        if let Some(tree) = single_edge_shortcut(graph) {
            return Ok(SolverOutcome { status: ReturnStatus::Optimal, tree: Some(tree) });
        }

        let formulation = IlpFormulation::new(graph);
        let mut search = BranchAndBound::new(&formulation, self.cancel.clone());

        if self.use_warm_start {
            let warm_start = greedy_selection(graph);
            if !formulation.is_feasible(&warm_start) {
                return Err(FtError::SolverFailure(
                    "warm start violates the formulation constraints".to_string(),
                ));
            }
            search.seed_incumbent(&warm_start);
        }

        if search.run() {
            return Ok(SolverOutcome { status: ReturnStatus::Canceled, tree: None });
        }

        let (best_score, best_selection) = search.into_incumbent();
        let tree = tree_from_selection(graph, &best_selection);
        if !verify_solution(best_score, &tree) {
            return Err(FtError::SolverFailure(format!(
                "objective {} does not match the reconstructed tree score {}",
                best_score,
                tree.edge_weight_sum()
            )));
        }
        Ok(SolverOutcome { status: ReturnStatus::Optimal, tree: Some(tree) })
    }
}

/// The integer program over the loss edges of one graph, with the edge ids
/// grouped by the color they enter. This is the narrow seam between the
/// graph model and the search; a native MIP backend could consume the same
/// formulation.
struct IlpFormulation<'a> {
    graph: &'a FGraph,
    color_edges: Vec<Vec<usize>>,
    suffix_bound: Vec<f64>,
}

impl<'a> IlpFormulation<'a> {
    fn new(graph: &'a FGraph) -> Self {
        let num_colors = graph.num_colors();
        let mut color_edges = vec![Vec::new(); num_colors];
        for (edge_id, loss) in graph.losses.iter().enumerate() {
            color_edges[graph.fragments[loss.target].color].push(edge_id);
        }

        // relaxation bound: each color contributes at most its best
        // positive incoming edge
        let mut suffix_bound = vec![0.0; num_colors + 1];
        for color in (0..num_colors).rev() {
            let best = color_edges[color]
                .iter()
                .map(|&e| graph.losses[e].weight)
                .fold(0.0f64, f64::max);
            suffix_bound[color] = suffix_bound[color + 1] + best;
        }

        IlpFormulation { graph, color_edges, suffix_bound }
    }

    fn objective(&self, selection: &[usize]) -> f64 {
        selection.iter().map(|&e| self.graph.losses[e].weight).sum()
    }

    /// Checks a selection against all constraint families: at most one
    /// incoming edge per color, and every selected edge's source fragment
    /// is the root or itself selected.
    fn is_feasible(&self, selection: &[usize]) -> bool {
        let mut color_used = vec![false; self.graph.num_colors()];
        let mut node_selected = vec![false; self.graph.num_vertices()];
        node_selected[0] = true;

        // colors increase along edges, so processing by target color checks
        // connectivity in one pass
        let mut edges = selection.to_vec();
        edges.sort_by_key(|&e| self.graph.fragments[self.graph.losses[e].target].color);
        for edge in edges {
            let loss = &self.graph.losses[edge];
            let color = self.graph.fragments[loss.target].color;
            if color_used[color] || !node_selected[loss.source] {
                return false;
            }
            color_used[color] = true;
            node_selected[loss.target] = true;
        }
        true
    }
}

/// Depth-first branch-and-bound over the per-color edge choices.
struct BranchAndBound<'a, 'b> {
    formulation: &'b IlpFormulation<'a>,
    cancel: Option<Arc<AtomicBool>>,
    node_selected: Vec<bool>,
    chosen: Vec<usize>,
    current_score: f64,
    best_score: f64,
    best_selection: Vec<usize>,
}

impl<'a, 'b> BranchAndBound<'a, 'b> {
    fn new(formulation: &'b IlpFormulation<'a>, cancel: Option<Arc<AtomicBool>>) -> Self {
        let mut node_selected = vec![false; formulation.graph.num_vertices()];
        node_selected[0] = true;
        BranchAndBound {
            formulation,
            cancel,
            node_selected,
            chosen: Vec::new(),
            current_score: 0.0,
            // the empty tree is always feasible
            best_score: 0.0,
            best_selection: Vec::new(),
        }
    }

    fn seed_incumbent(&mut self, selection: &[usize]) {
        let score = self.formulation.objective(selection);
        if score > self.best_score {
            self.best_score = score;
            self.best_selection = selection.to_vec();
        }
    }

    /// Runs the search; returns true if it was canceled.
    fn run(&mut self) -> bool {
        self.branch(1)
    }

    fn into_incumbent(self) -> (f64, Vec<usize>) {
        (self.best_score, self.best_selection)
    }

    fn is_canceled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    fn branch(&mut self, color: usize) -> bool {
        if self.is_canceled() {
            return true;
        }
        if color >= self.formulation.color_edges.len() {
            if self.current_score > self.best_score + OBJECTIVE_EPSILON {
                self.best_score = self.current_score;
                self.best_selection = self.chosen.clone();
            }
            return false;
        }
        // bound: even the relaxation of the remaining colors cannot beat
        // the incumbent
        if self.current_score + self.formulation.suffix_bound[color]
            <= self.best_score + OBJECTIVE_EPSILON
        {
            return false;
        }

        let candidates = self.formulation.color_edges[color].clone();
        for edge in candidates {
            let loss = &self.formulation.graph.losses[edge];
            if !self.node_selected[loss.source] {
                continue;
            }
            let (source, target, weight) = (loss.source, loss.target, loss.weight);
            debug_assert!(self.node_selected[source]);
            self.node_selected[target] = true;
            self.chosen.push(edge);
            self.current_score += weight;
            if self.branch(color + 1) {
                return true;
            }
            self.current_score -= weight;
            self.chosen.pop();
            self.node_selected[target] = false;
        }
        // leave the color unused
        self.branch(color + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::greedy::GreedySolver;
    use crate::chemistry::formula::MolecularFormula;

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    /// root -> A (5), A -> B (3), root -> B (1): the chain must win.
    fn chain_graph() -> FGraph {
        let mut graph = FGraph::new(formula("C6H12O6"), None);
        let a = graph.add_fragment(formula("C6H10O5"), 1, None, 0.0);
        let b = graph.add_fragment(formula("C6H8O4"), 2, None, 0.0);
        graph.add_loss(0, a, formula("H2O"), 5.0);
        graph.add_loss(a, b, formula("H2O"), 3.0);
        graph.add_loss(0, b, formula("H4O2"), 1.0);
        graph
    }

    /// A graph where the greedy first choice is a trap: two candidates of
    /// the same color, and only the lighter-scored one opens the high
    /// scoring subtree.
    fn greedy_trap_graph() -> FGraph {
        let mut graph = FGraph::new(formula("C6H12O6"), None);
        let a = graph.add_fragment(formula("C6H10O5"), 1, None, 0.0);
        let b = graph.add_fragment(formula("C5H8O5"), 1, None, 0.0);
        let c = graph.add_fragment(formula("C4H6O4"), 2, None, 0.0);
        graph.add_loss(0, a, formula("H2O"), 5.0);
        graph.add_loss(0, b, formula("CH4O"), 4.0);
        graph.add_loss(0, c, formula("C2H6O2"), 0.5);
        graph.add_loss(a, c, formula("C2H4O"), 1.0);
        graph.add_loss(b, c, formula("CH2O"), 10.0);
        graph
    }

    #[test]
    fn test_chain_scenario_is_solved_optimally() {
        let outcome = ExactSolver::new().solve(&chain_graph()).unwrap();
        assert_eq!(outcome.status, ReturnStatus::Optimal);
        let tree = outcome.tree.unwrap();
        assert!((tree.score - 8.0).abs() < 1e-9);
        assert_eq!(tree.num_vertices(), 3);
        assert!(tree.is_colorful());
    }

    #[test]
    fn test_exact_beats_greedy_on_the_trap() {
        let graph = greedy_trap_graph();
        let greedy = GreedySolver::new().solve(&graph).unwrap();
        let exact = ExactSolver::new().solve(&graph).unwrap();
        assert!((greedy.score() - 6.0).abs() < 1e-9);
        assert!((exact.score() - 14.0).abs() < 1e-9);
        assert!(exact.score() >= greedy.score());
    }

    #[test]
    fn test_warm_start_does_not_change_the_optimum() {
        for graph in [chain_graph(), greedy_trap_graph()] {
            let with = ExactSolver::new().solve(&graph).unwrap();
            let without = ExactSolver::new().without_warm_start().solve(&graph).unwrap();
            assert!((with.score() - without.score()).abs() < 1e-9);
            assert_eq!(with.status, ReturnStatus::Optimal);
            assert_eq!(without.status, ReturnStatus::Optimal);
        }
    }

    #[test]
    fn test_negative_bridge_edges_are_considered() {
        // root -> A costs -1 but unlocks A -> B with 10
        let mut graph = FGraph::new(formula("C6H12O6"), None);
        let a = graph.add_fragment(formula("C6H10O5"), 1, None, 0.0);
        let b = graph.add_fragment(formula("C6H8O4"), 2, None, 0.0);
        graph.add_loss(0, a, formula("H2O"), -1.0);
        graph.add_loss(a, b, formula("H2O"), 10.0);
        graph.add_loss(0, b, formula("H4O2"), 1.0);

        let exact = ExactSolver::new().solve(&graph).unwrap();
        assert!((exact.score() - 9.0).abs() < 1e-9);
        // the greedy never walks through a negative edge
        let greedy = GreedySolver::new().solve(&graph).unwrap();
        assert!((greedy.score() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_negative_graph_yields_empty_optimum() {
        let mut graph = FGraph::new(formula("C6H12O6"), None);
        let a = graph.add_fragment(formula("C6H10O5"), 1, None, 0.0);
        graph.add_loss(0, a, formula("H2O"), -2.0);
        let b = graph.add_fragment(formula("C6H8O4"), 2, None, 0.0);
        graph.add_loss(0, b, formula("H4O2"), -3.0);

        let outcome = ExactSolver::new().solve(&graph).unwrap();
        assert_eq!(outcome.status, ReturnStatus::Optimal);
        assert_eq!(outcome.tree.unwrap().num_vertices(), 1);
    }

    #[test]
    fn test_no_root_edges_is_infeasible() {
        let graph = FGraph::new(formula("C6H12O6"), None);
        let outcome = ExactSolver::new().solve(&graph).unwrap();
        assert_eq!(outcome.status, ReturnStatus::Infeasible);
        assert_eq!(outcome.tree.unwrap().num_vertices(), 1);
    }

    #[test]
    fn test_cancellation_is_distinguishable_from_infeasibility() {
        let flag = Arc::new(AtomicBool::new(true));
        let solver = ExactSolver::new().with_cancellation(flag);
        let outcome = solver.solve(&greedy_trap_graph()).unwrap();
        assert_eq!(outcome.status, ReturnStatus::Canceled);
        assert!(outcome.tree.is_none());
    }

    #[test]
    fn test_formulation_feasibility_check() {
        let graph = chain_graph();
        let formulation = IlpFormulation::new(&graph);
        assert!(formulation.is_feasible(&[0, 1]));
        assert!(formulation.is_feasible(&[2]));
        assert!(formulation.is_feasible(&[]));
        // B's incoming edge without its parent A being selected
        assert!(!formulation.is_feasible(&[1]));
        // two edges into the same color
        assert!(!formulation.is_feasible(&[1, 2]));
    }
}
