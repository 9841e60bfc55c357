use std::collections::HashSet;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::chemistry::formula::MolecularFormula;
use crate::data::peak::Peak;

/// A node of a fragmentation tree: fragment formula, originating color/peak
/// and the vertex score it contributed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct TreeNode {
    pub formula: MolecularFormula,
    pub color: usize,
    pub peak: Option<Peak>,
    pub score: f64,
}

/// A tree edge annotated with its neutral loss and selection weight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct TreeEdge {
    pub parent: usize,
    pub child: usize,
    pub loss: MolecularFormula,
    pub weight: f64,
}

/// A fragmentation tree: a rooted out-tree selected from a fragmentation
/// graph. Node 0 is the root; every other node has exactly one incoming
/// edge and no two nodes share a color.
///
/// Trees are produced by a solver run and treated as immutable afterwards;
/// downstream consumers read, score, serialize or align them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct FTree {
    pub nodes: Vec<TreeNode>,
    pub edges: Vec<TreeEdge>,
    pub score: f64,
    children: Vec<Vec<usize>>,
    parents: Vec<Option<usize>>,
}

impl FTree {
    /// Creates a tree holding only its root.
    pub fn new(root: TreeNode) -> Self {
        FTree {
            nodes: vec![root],
            edges: Vec::new(),
            score: 0.0,
            children: vec![Vec::new()],
            parents: vec![None],
        }
    }

    /// Attaches a new node below `parent` and returns its id. The edge
    /// weight is accumulated into the total tree score.
    pub fn add_child(
        &mut self,
        parent: usize,
        node: TreeNode,
        loss: MolecularFormula,
        weight: f64,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(node);
        self.edges.push(TreeEdge { parent, child: id, loss, weight });
        self.children.push(Vec::new());
        self.children[parent].push(id);
        self.parents.push(Some(parent));
        self.score += weight;
        id
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    pub fn num_vertices(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn children(&self, node: usize) -> &[usize] {
        &self.children[node]
    }

    pub fn parent(&self, node: usize) -> Option<usize> {
        self.parents[node]
    }

    /// The loss edge entering `node`, if it is not the root.
    pub fn incoming_edge(&self, node: usize) -> Option<&TreeEdge> {
        self.parents[node].map(|_| &self.edges[node - 1])
    }

    /// True if no two nodes share a color.
    pub fn is_colorful(&self) -> bool {
        let mut seen = HashSet::new();
        self.nodes.iter().all(|node| seen.insert(node.color))
    }

    /// Re-derives the score from the edge weights; used to verify solver
    /// results against the claimed objective.
    pub fn edge_weight_sum(&self) -> f64 {
        self.edges.iter().map(|e| e.weight).sum()
    }

    /// Number of parent hops from `node` up to the root.
    pub fn depth(&self, node: usize) -> usize {
        let mut depth = 0;
        let mut current = node;
        while let Some(parent) = self.parents[current] {
            current = parent;
            depth += 1;
        }
        depth
    }
}
