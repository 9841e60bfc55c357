use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::chemistry::formula::MolecularFormula;
use crate::data::peak::Peak;

/// The reserved color of the synthetic root node. Peak colors start at 1.
pub const ROOT_COLOR: usize = 0;

/// A candidate fragment inside a fragmentation graph: one (peak, formula)
/// pair plus its vertex score. The root represents the intact precursor ion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Fragment {
    pub id: usize,
    pub formula: MolecularFormula,
    pub color: usize,
    pub peak: Option<Peak>,
    pub score: f64,
}

/// A directed loss edge between two fragments. The loss formula is the
/// element-wise difference `parent - child` and is valid by construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Loss {
    pub source: usize,
    pub target: usize,
    pub formula: MolecularFormula,
    pub weight: f64,
}

/// A colored fragmentation graph: a rooted DAG of candidate fragments with
/// neutral loss edges.
///
/// Fragments and losses live in flat arenas and reference each other by
/// index, so the graph is cheap to share across threads for read access.
/// Invariants maintained by the builder:
/// - fragment 0 is the root, has in-degree 0 and the reserved color 0,
/// - every edge runs from a strictly smaller color to a larger color, which
///   makes the graph acyclic by construction,
/// - every non-root fragment is reachable from the root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct FGraph {
    pub fragments: Vec<Fragment>,
    pub losses: Vec<Loss>,
    out_edges: Vec<Vec<usize>>,
    in_edges: Vec<Vec<usize>>,
    num_colors: usize,
}

impl FGraph {
    /// Creates a graph holding only the given root fragment data.
    pub fn new(root_formula: MolecularFormula, root_peak: Option<Peak>) -> Self {
        let root = Fragment {
            id: 0,
            formula: root_formula,
            color: ROOT_COLOR,
            peak: root_peak,
            score: 0.0,
        };
        FGraph {
            fragments: vec![root],
            losses: Vec::new(),
            out_edges: vec![Vec::new()],
            in_edges: vec![Vec::new()],
            num_colors: 1,
        }
    }

    /// Appends a fragment and returns its id. Colors must be added in
    /// non-decreasing order by the builder.
    pub fn add_fragment(
        &mut self,
        formula: MolecularFormula,
        color: usize,
        peak: Option<Peak>,
        score: f64,
    ) -> usize {
        let id = self.fragments.len();
        self.fragments.push(Fragment { id, formula, color, peak, score });
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        self.num_colors = self.num_colors.max(color + 1);
        id
    }

    /// Appends a loss edge and returns its id.
    pub fn add_loss(
        &mut self,
        source: usize,
        target: usize,
        formula: MolecularFormula,
        weight: f64,
    ) -> usize {
        let id = self.losses.len();
        self.losses.push(Loss { source, target, formula, weight });
        self.out_edges[source].push(id);
        self.in_edges[target].push(id);
        id
    }

    pub fn root(&self) -> &Fragment {
        &self.fragments[0]
    }

    pub fn num_vertices(&self) -> usize {
        self.fragments.len()
    }

    pub fn num_edges(&self) -> usize {
        self.losses.len()
    }

    /// Number of colors including the reserved root color.
    pub fn num_colors(&self) -> usize {
        self.num_colors
    }

    /// Loss ids leaving the given fragment.
    pub fn out_edges(&self, fragment: usize) -> &[usize] {
        &self.out_edges[fragment]
    }

    /// Loss ids entering the given fragment.
    pub fn in_edges(&self, fragment: usize) -> &[usize] {
        &self.in_edges[fragment]
    }

    /// Fragment ids per color class. Every fragment belongs to exactly one.
    pub fn color_classes(&self) -> Vec<Vec<usize>> {
        let mut classes = vec![Vec::new(); self.num_colors];
        for fragment in &self.fragments {
            classes[fragment.color].push(fragment.id);
        }
        classes
    }

    /// A topological order over fragments. Since edges always run from a
    /// smaller to a larger color, ordering by color is topological; this
    /// derives it from the edges alone and is used to validate acyclicity.
    pub fn topological_order(&self) -> Option<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.in_edges.iter().map(|e| e.len()).collect();
        let mut queue: Vec<usize> = (0..self.fragments.len()).filter(|&v| in_degree[v] == 0).collect();
        let mut order = Vec::with_capacity(self.fragments.len());
        while let Some(v) = queue.pop() {
            order.push(v);
            for &edge in &self.out_edges[v] {
                let target = self.losses[edge].target;
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    queue.push(target);
                }
            }
        }
        if order.len() == self.fragments.len() {
            Some(order)
        } else {
            None
        }
    }

    /// Fragment ids reachable from the root along loss edges.
    pub fn reachable_from_root(&self) -> Vec<bool> {
        let mut reachable = vec![false; self.fragments.len()];
        reachable[0] = true;
        let mut stack = vec![0];
        while let Some(v) = stack.pop() {
            for &edge in &self.out_edges[v] {
                let target = self.losses[edge].target;
                if !reachable[target] {
                    reachable[target] = true;
                    stack.push(target);
                }
            }
        }
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    #[test]
    fn test_arena_indices_stay_consistent() {
        let mut graph = FGraph::new(formula("C6H12O6"), None);
        let a = graph.add_fragment(formula("C6H10O5"), 1, Some(Peak::new(162.05, 100.0)), 1.0);
        let b = graph.add_fragment(formula("C6H8O4"), 2, Some(Peak::new(144.04, 50.0)), 0.5);
        let e0 = graph.add_loss(0, a, formula("H2O"), 2.0);
        let e1 = graph.add_loss(a, b, formula("H2O"), 1.5);
        assert_eq!(graph.num_vertices(), 3);
        assert_eq!(graph.num_edges(), 2);
        assert_eq!(graph.out_edges(0), &[e0]);
        assert_eq!(graph.in_edges(b), &[e1]);
        assert_eq!(graph.num_colors(), 3);
    }

    #[test]
    fn test_topological_order_exists() {
        let mut graph = FGraph::new(formula("C3H6O3"), None);
        let a = graph.add_fragment(formula("C3H4O2"), 1, None, 0.0);
        let b = graph.add_fragment(formula("CH2O"), 2, None, 0.0);
        graph.add_loss(0, a, formula("H2O"), 1.0);
        graph.add_loss(0, b, formula("C2H4O2"), 1.0);
        graph.add_loss(a, b, formula("C2H2O"), 1.0);
        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), 3);
        let position = |v: usize| order.iter().position(|&x| x == v).unwrap();
        assert!(position(0) < position(a));
        assert!(position(a) < position(b));
    }

    #[test]
    fn test_color_classes_partition() {
        let mut graph = FGraph::new(formula("C2H4O2"), None);
        graph.add_fragment(formula("CH2O"), 1, None, 0.0);
        graph.add_fragment(formula("CO"), 1, None, 0.0);
        let classes = graph.color_classes();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[ROOT_COLOR], vec![0]);
        assert_eq!(classes[1], vec![1, 2]);
    }
}
