use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::chemistry::formula::MolecularFormula;
use crate::data::tree::FTree;
use crate::error::FtError;

/// Largest child count per node supported by the exact forest join.
pub const MAX_ALIGNMENT_DEGREE: usize = 16;

/// Score parameters of the tree alignment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentScoring {
    /// Matching two identical neutral losses.
    pub loss_equality: f64,
    /// Matching two different neutral losses.
    pub loss_mismatch: f64,
    /// Matching two identical root formulas.
    pub vertex_equality: f64,
    /// Matching two different root formulas.
    pub vertex_mismatch: f64,
    /// Deleting a node on either side.
    pub delete: f64,
    /// Extra charge for merging a parent loss into its child.
    pub join_penalty: f64,
}

impl Default for AlignmentScoring {
    fn default() -> Self {
        AlignmentScoring {
            loss_equality: 5.0,
            loss_mismatch: -3.0,
            vertex_equality: 5.0,
            vertex_mismatch: -3.0,
            delete: -2.5,
            join_penalty: -1.0,
        }
    }
}

impl AlignmentScoring {
    fn match_score(&self, left: &MolecularFormula, right: &MolecularFormula) -> f64 {
        if left == right {
            self.loss_equality
        } else {
            self.loss_mismatch
        }
    }

    fn vertex_score(&self, left: &MolecularFormula, right: &MolecularFormula) -> f64 {
        if left == right {
            self.vertex_equality
        } else {
            self.vertex_mismatch
        }
    }

    fn join_score(&self, merged: &MolecularFormula, other: &MolecularFormula) -> f64 {
        self.match_score(merged, other) + self.join_penalty
    }
}

/// One reconstructed alignment operation. Indices refer to node ids of the
/// left and right input tree respectively.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum AlignmentOp {
    /// The two roots are paired before any loss is compared.
    MatchVertices { left: usize, right: usize, score: f64 },
    /// The incoming losses of `left` and `right` are aligned.
    Match { left: usize, right: usize, score: f64 },
    /// `left` is deleted; its children compete for the right node.
    DeleteLeft { left: usize, score: f64 },
    /// `right` is deleted; its children compete for the left node.
    DeleteRight { right: usize, score: f64 },
    /// The loss of `parent` is merged into `child` on the left side.
    InnerJoinLeft { parent: usize, child: usize },
    /// The loss of `parent` is merged into `child` on the right side.
    InnerJoinRight { parent: usize, child: usize },
    /// The merged multi-edge loss is aligned against the other side.
    Join { left: usize, right: usize, score: f64 },
}

/// Result of one alignment: the similarity score and the ordered operation
/// trace recovered from the optimal DP state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct AlignmentResult {
    pub score: f64,
    pub operations: Vec<AlignmentOp>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Op {
    Stop,
    Match,
    DeleteLeft(usize),
    DeleteRight(usize),
    JoinLeft(usize),
    JoinRight(usize),
}

#[derive(Clone, Copy, Debug)]
struct Cell {
    score: f64,
    op: Op,
}

struct CellTable {
    cells: Vec<Cell>,
    num_right: usize,
}

impl CellTable {
    fn get(&self, left: usize, right: usize) -> Cell {
        self.cells[left * self.num_right + right]
    }

    fn set(&mut self, left: usize, right: usize, cell: Cell) {
        self.cells[left * self.num_right + right] = cell;
    }
}

/// Aligns two fragmentation trees by recursive dynamic programming over
/// subtree pairs, comparable to a forest alignment distance.
///
/// Subtrees are compared bottom-up. For a pair of non-root nodes the
/// algorithm considers matching their incoming losses (followed by an
/// optimal join of the two child forests), deleting either node (its child
/// forest then competes for the surviving counterpart), and inner joins
/// that merge a node's loss with one of its children, as when one
/// measurement skipped an intermediate fragment. On equal scores a fixed
/// preference order applies (match, delete left, delete right, join left,
/// join right), so re-runs are bit-identical.
///
/// The score is symmetric and carries no global normalization; callers
/// compare scores for a consistent pair of trees only.
pub struct TreeAligner {
    scoring: AlignmentScoring,
    cancel: Option<Arc<AtomicBool>>,
}

impl TreeAligner {
    pub fn new() -> Self {
        TreeAligner { scoring: AlignmentScoring::default(), cancel: None }
    }

    pub fn with_scoring(mut self, scoring: AlignmentScoring) -> Self {
        self.scoring = scoring;
        self
    }

    /// Installs a cancellation flag checked between DP rows.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Computes the optimal alignment of two trees together with its
    /// backtrace.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ftcore::algorithm::align::TreeAligner;
    /// # use ftcore::chemistry::formula::MolecularFormula;
    /// # use ftcore::data::tree::{FTree, TreeNode};
    /// let node = |f: &str| TreeNode {
    ///     formula: MolecularFormula::parse(f).unwrap(),
    ///     color: 0,
    ///     peak: None,
    ///     score: 0.0,
    /// };
    /// let mut tree = FTree::new(node("C6H12O6"));
    /// tree.add_child(0, node("C6H10O5"), MolecularFormula::parse("H2O").unwrap(), 1.0);
    /// let result = TreeAligner::new().align(&tree, &tree).unwrap();
    /// assert_eq!(result.score, 10.0);
    /// ```
    pub fn align(&self, left: &FTree, right: &FTree) -> Result<AlignmentResult, FtError> {
        check_degree(left)?;
        check_degree(right)?;
        let table = self.compute_table(left, right)?;

        let vertex_score =
            self.scoring.vertex_score(&left.root().formula, &right.root().formula);
        let (forest_score, root_pairs) =
            forest_join(left.children(0), right.children(0), &table);
        let score = vertex_score + forest_score;

        let mut operations =
            vec![AlignmentOp::MatchVertices { left: 0, right: 0, score: vertex_score }];
        let mut queue: VecDeque<(usize, usize)> = root_pairs.into_iter().collect();
        while let Some((a, b)) = queue.pop_front() {
            self.backtrace_pair(left, right, &table, a, b, &mut operations, &mut queue);
        }
        Ok(AlignmentResult { score, operations })
    }

    /// Fills the DP table bottom-up over post-order node pairs.
    fn compute_table(&self, left: &FTree, right: &FTree) -> Result<CellTable, FtError> {
        let mut table = CellTable {
            cells: vec![Cell { score: 0.0, op: Op::Stop }; left.num_vertices() * right.num_vertices()],
            num_right: right.num_vertices(),
        };
        let left_order = post_order(left);
        let right_order = post_order(right);
        for &i in &left_order {
            if i == 0 {
                continue;
            }
            if self.is_canceled() {
                return Err(FtError::Canceled);
            }
            for &j in &right_order {
                if j == 0 {
                    continue;
                }
                let cell = self.compute_cell(left, right, &table, i, j);
                table.set(i, j, cell);
            }
        }
        Ok(table)
    }

    fn compute_cell(
        &self,
        left: &FTree,
        right: &FTree,
        table: &CellTable,
        i: usize,
        j: usize,
    ) -> Cell {
        let loss_i = incoming_loss(left, i);
        let loss_j = incoming_loss(right, j);
        let mut best = Cell { score: 0.0, op: Op::Stop };

        // match the two losses, then join the child forests
        let (forest_score, _) = forest_join(left.children(i), right.children(j), table);
        let match_score = self.scoring.match_score(loss_i, loss_j) + forest_score;
        if match_score > best.score {
            best = Cell { score: match_score, op: Op::Match };
        }

        for &x in left.children(i) {
            let score = self.scoring.delete + table.get(x, j).score;
            if score > best.score {
                best = Cell { score, op: Op::DeleteLeft(x) };
            }
        }
        for &y in right.children(j) {
            let score = self.scoring.delete + table.get(i, y).score;
            if score > best.score {
                best = Cell { score, op: Op::DeleteRight(y) };
            }
        }

        // merge the loss with one child's loss, as if the intermediate
        // fragment had not been observed
        for &x in left.children(i) {
            let merged = loss_i.add(incoming_loss(left, x));
            let (forest_score, _) = forest_join(left.children(x), right.children(j), table);
            let score = self.scoring.join_score(&merged, loss_j) + forest_score;
            if score > best.score {
                best = Cell { score, op: Op::JoinLeft(x) };
            }
        }
        for &y in right.children(j) {
            let merged = loss_j.add(incoming_loss(right, y));
            let (forest_score, _) = forest_join(left.children(i), right.children(y), table);
            let score = self.scoring.join_score(loss_i, &merged) + forest_score;
            if score > best.score {
                best = Cell { score, op: Op::JoinRight(y) };
            }
        }
        best
    }

    fn backtrace_pair(
        &self,
        left: &FTree,
        right: &FTree,
        table: &CellTable,
        a: usize,
        b: usize,
        operations: &mut Vec<AlignmentOp>,
        queue: &mut VecDeque<(usize, usize)>,
    ) {
        match table.get(a, b).op {
            Op::Stop => {}
            Op::Match => {
                let score =
                    self.scoring.match_score(incoming_loss(left, a), incoming_loss(right, b));
                operations.push(AlignmentOp::Match { left: a, right: b, score });
                let (_, pairs) = forest_join(left.children(a), right.children(b), table);
                queue.extend(pairs);
            }
            Op::DeleteLeft(x) => {
                operations.push(AlignmentOp::DeleteLeft { left: a, score: self.scoring.delete });
                queue.push_back((x, b));
            }
            Op::DeleteRight(y) => {
                operations.push(AlignmentOp::DeleteRight { right: b, score: self.scoring.delete });
                queue.push_back((a, y));
            }
            Op::JoinLeft(x) => {
                let merged = incoming_loss(left, a).add(incoming_loss(left, x));
                let score = self.scoring.join_score(&merged, incoming_loss(right, b));
                operations.push(AlignmentOp::InnerJoinLeft { parent: a, child: x });
                operations.push(AlignmentOp::Join { left: x, right: b, score });
                let (_, pairs) = forest_join(left.children(x), right.children(b), table);
                queue.extend(pairs);
            }
            Op::JoinRight(y) => {
                let merged = incoming_loss(right, b).add(incoming_loss(right, y));
                let score = self.scoring.join_score(incoming_loss(left, a), &merged);
                operations.push(AlignmentOp::InnerJoinRight { parent: b, child: y });
                operations.push(AlignmentOp::Join { left: a, right: y, score });
                let (_, pairs) = forest_join(left.children(a), right.children(y), table);
                queue.extend(pairs);
            }
        }
    }

    fn is_canceled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed))
    }
}

impl Default for TreeAligner {
    fn default() -> Self {
        TreeAligner::new()
    }
}

fn incoming_loss(tree: &FTree, node: usize) -> &MolecularFormula {
    // callers only pass non-root nodes
    &tree.incoming_edge(node).unwrap().loss
}

fn check_degree(tree: &FTree) -> Result<(), FtError> {
    for node in 0..tree.num_vertices() {
        if tree.children(node).len() > MAX_ALIGNMENT_DEGREE {
            return Err(FtError::InvalidInput(format!(
                "node with more than {} children cannot be aligned",
                MAX_ALIGNMENT_DEGREE
            )));
        }
    }
    Ok(())
}

fn post_order(tree: &FTree) -> Vec<usize> {
    let mut order = Vec::with_capacity(tree.num_vertices());
    let mut stack = vec![(0usize, false)];
    while let Some((node, processed)) = stack.pop() {
        if processed {
            order.push(node);
            continue;
        }
        stack.push((node, true));
        for &child in tree.children(node) {
            stack.push((child, false));
        }
    }
    order
}

/// Optimal bipartite join of two child forests: every node pairs with at
/// most one counterpart, unpaired subtrees contribute nothing. Solved by a
/// subset DP over the smaller side; pairs are only formed when they improve
/// the score, so the returned pairing is minimal and deterministic.
fn forest_join(
    left_children: &[usize],
    right_children: &[usize],
    table: &CellTable,
) -> (f64, Vec<(usize, usize)>) {
    if left_children.is_empty() || right_children.is_empty() {
        return (0.0, Vec::new());
    }
    let swap = right_children.len() > left_children.len();
    let (walk, masked) = if swap {
        (right_children, left_children)
    } else {
        (left_children, right_children)
    };
    let pair_score = |walk_node: usize, masked_node: usize| -> f64 {
        if swap {
            table.get(masked_node, walk_node).score
        } else {
            table.get(walk_node, masked_node).score
        }
    };

    let n = walk.len();
    let full = 1usize << masked.len();
    // scores[i * full + mask]: best join of walk[i..] against the masked set
    let mut scores = vec![0.0f64; (n + 1) * full];
    for i in (0..n).rev() {
        for mask in 0..full {
            let mut best = scores[(i + 1) * full + mask];
            let mut bits = mask;
            while bits != 0 {
                let s = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                let candidate =
                    pair_score(walk[i], masked[s]) + scores[(i + 1) * full + (mask & !(1 << s))];
                if candidate > best {
                    best = candidate;
                }
            }
            scores[i * full + mask] = best;
        }
    }

    // walk the table again to extract the chosen pairs
    let mut pairs = Vec::new();
    let mut mask = full - 1;
    let mut i = 0;
    while i < n && mask != 0 {
        let current = scores[i * full + mask];
        if current == scores[(i + 1) * full + mask] {
            i += 1;
            continue;
        }
        let mut bits = mask;
        while bits != 0 {
            let s = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            let candidate =
                pair_score(walk[i], masked[s]) + scores[(i + 1) * full + (mask & !(1 << s))];
            if candidate == current {
                let pair = if swap {
                    (masked[s], walk[i])
                } else {
                    (walk[i], masked[s])
                };
                pairs.push(pair);
                mask &= !(1 << s);
                break;
            }
        }
        i += 1;
    }
    (scores[full - 1], pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tree::TreeNode;

    fn node(formula: &str) -> TreeNode {
        TreeNode {
            formula: MolecularFormula::parse(formula).unwrap(),
            color: 0,
            peak: None,
            score: 0.0,
        }
    }

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    /// root -> C6H10O5 (H2O) -> C6H8O4 (H2O), root -> C5H8O5 (CH4O)
    fn reference_tree() -> FTree {
        let mut tree = FTree::new(node("C6H12O6"));
        let a = tree.add_child(0, node("C6H10O5"), formula("H2O"), 2.0);
        tree.add_child(a, node("C6H8O4"), formula("H2O"), 1.5);
        tree.add_child(0, node("C5H8O5"), formula("CH4O"), 1.0);
        tree
    }

    #[test]
    fn test_self_alignment_is_match_only() {
        let tree = reference_tree();
        let result = TreeAligner::new().align(&tree, &tree).unwrap();
        // root vertex match plus one loss match per edge
        assert_eq!(result.score, 5.0 + 3.0 * 5.0);
        for op in &result.operations {
            assert!(!matches!(op, AlignmentOp::DeleteLeft { .. }));
            assert!(!matches!(op, AlignmentOp::DeleteRight { .. }));
        }
        let matches = result
            .operations
            .iter()
            .filter(|op| matches!(op, AlignmentOp::Match { .. }))
            .count();
        assert_eq!(matches, 3);
    }

    #[test]
    fn test_score_is_symmetric() {
        let left = reference_tree();
        let mut right = FTree::new(node("C6H12O6"));
        let a = right.add_child(0, node("C6H10O5"), formula("H2O"), 2.0);
        right.add_child(a, node("C6H8O3"), formula("H2O2"), 1.0);

        let aligner = TreeAligner::new();
        let forward = aligner.align(&left, &right).unwrap();
        let backward = aligner.align(&right, &left).unwrap();
        assert_eq!(forward.score, backward.score);
    }

    #[test]
    fn test_deletion_bridges_a_skipped_node() {
        // left: root -> A (H2O) -> B (CO2); right: root -> C (CO2)
        let mut left = FTree::new(node("C7H12O8"));
        let a = left.add_child(0, node("C7H10O7"), formula("H2O"), 1.0);
        left.add_child(a, node("C6H10O5"), formula("CO2"), 1.0);
        let mut right = FTree::new(node("C7H12O8"));
        right.add_child(0, node("C6H12O6"), formula("CO2"), 1.0);

        let result = TreeAligner::new().align(&left, &right).unwrap();
        // vertex match (5) + delete A (-2.5) + match CO2 losses (5)
        assert_eq!(result.score, 7.5);
        assert!(result
            .operations
            .iter()
            .any(|op| matches!(op, AlignmentOp::DeleteLeft { left: 1, .. })));
        assert!(result
            .operations
            .iter()
            .any(|op| matches!(op, AlignmentOp::Match { left: 2, right: 1, .. })));
    }

    #[test]
    fn test_inner_join_merges_consecutive_losses() {
        // left observed the intermediate fragment, right skipped it
        let mut left = FTree::new(node("C7H12O8"));
        let x = left.add_child(0, node("C7H10O7"), formula("H2O"), 1.0);
        left.add_child(x, node("C6H10O5"), formula("CO2"), 1.0);
        let mut right = FTree::new(node("C7H12O8"));
        right.add_child(0, node("C6H10O5"), formula("CH2O3"), 1.0);

        let result = TreeAligner::new().align(&left, &right).unwrap();
        // vertex match (5) + joined loss equality (5) + join penalty (-1)
        assert_eq!(result.score, 9.0);
        assert!(result
            .operations
            .iter()
            .any(|op| matches!(op, AlignmentOp::InnerJoinLeft { parent: 1, child: 2 })));
        assert!(result
            .operations
            .iter()
            .any(|op| matches!(op, AlignmentOp::Join { left: 2, right: 1, .. })));

        // the mirrored alignment uses the right-sided join at equal score
        let mirrored = TreeAligner::new().align(&right, &left).unwrap();
        assert_eq!(mirrored.score, 9.0);
        assert!(mirrored
            .operations
            .iter()
            .any(|op| matches!(op, AlignmentOp::InnerJoinRight { parent: 1, child: 2 })));
    }

    #[test]
    fn test_backtrace_is_deterministic() {
        let left = reference_tree();
        let mut right = FTree::new(node("C6H12O6"));
        let a = right.add_child(0, node("C6H10O5"), formula("H2O"), 2.0);
        right.add_child(a, node("C6H8O4"), formula("H2O"), 1.5);

        let aligner = TreeAligner::new();
        let first = aligner.align(&left, &right).unwrap();
        let second = aligner.align(&left, &right).unwrap();
        assert_eq!(first, second);
        assert!(matches!(first.operations[0], AlignmentOp::MatchVertices { .. }));
    }

    #[test]
    fn test_cancellation() {
        let flag = Arc::new(AtomicBool::new(true));
        let aligner = TreeAligner::new().with_cancellation(flag);
        let tree = reference_tree();
        assert_eq!(aligner.align(&tree, &tree), Err(FtError::Canceled));
    }
}
