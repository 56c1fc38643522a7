use bit_set::BitSet;
use fxhash::FxHashMap;

use super::box_controller::BoxController;
use super::error::PartitionError;
use super::extent::Extent;
use super::md_box::{BoxContent, MDBox};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind<const ND: usize> {
    Leaf { owner: usize },
    Grid { split_into: [usize; ND] },
}

/// One box of the shared plan. Children of a grid node follow it directly in the node
/// list (pre-order), dimension 0 varying fastest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutNode<const ND: usize> {
    pub id: u64,
    pub depth: usize,
    pub extents: [Extent; ND],
    pub kind: LayoutKind<ND>,
}

/// Header counts used to check a plan after it has crossed the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayoutSummary {
    pub n_boxes: usize,
    pub n_leaves: usize,
    pub id_sum: u64,
}

impl LayoutSummary {
    fn add(&mut self, id: u64, is_leaf: bool) {
        self.n_boxes += 1;
        if is_leaf {
            self.n_leaves += 1;
        }
        self.id_sum = self.id_sum.wrapping_add(id);
    }

    /// Summarize an existing box structure
    pub fn of_tree<const ND: usize>(root: &MDBox<ND>) -> Self {
        let mut summary = Self::default();
        root.visit(&mut |b| summary.add(b.id(), b.is_leaf()));
        summary
    }

    /// Summarize a node list
    pub fn of_nodes<const ND: usize>(nodes: &[LayoutNode<ND>]) -> Self {
        let mut summary = Self::default();
        for node in nodes {
            summary.add(node.id, matches!(node.kind, LayoutKind::Leaf { .. }));
        }
        summary
    }
}

/// The box layout agreed on by all workers before the event exchange: the shape of the
/// preliminary box structure plus the rank owning each leaf.
///
/// Ownership rule: leaves are taken in pre-order and weighted by their sampled event
/// count plus one. Each rank gets one contiguous run of leaves holding a near equal share
/// of the total weight, so ranks own compact regions and nobody is left with nothing but
/// empty space when the sample is small.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxLayout<const ND: usize> {
    n_ranks: usize,
    nodes: Vec<LayoutNode<ND>>,
    summary: LayoutSummary,
}

impl<const ND: usize> BoxLayout<ND> {
    /// Capture the shape of a (preliminary) box structure and partition its leaves over
    /// `n_ranks` workers
    pub fn capture(root: &MDBox<ND>, n_ranks: usize) -> Self {
        let n_ranks = n_ranks.max(1);
        let weights: Vec<u128> = root
            .leaves()
            .iter()
            .map(|leaf| leaf.event_count() as u128 + 1)
            .collect();
        let total_weight: u128 = weights.iter().sum();
        let mut cumulative: u128 = 0;
        let owners: Vec<usize> = weights
            .iter()
            .map(|weight| {
                let owner = ((cumulative * n_ranks as u128) / total_weight) as usize;
                cumulative += weight;
                owner.min(n_ranks - 1)
            })
            .collect();

        let mut nodes = Vec::new();
        let mut leaf_ordinal = 0;
        root.visit(&mut |b| {
            let kind = match b.content() {
                BoxContent::Leaf(_) => {
                    let owner = owners[leaf_ordinal];
                    leaf_ordinal += 1;
                    LayoutKind::Leaf { owner }
                }
                BoxContent::Grid { split_into, .. } => LayoutKind::Grid {
                    split_into: *split_into,
                },
            };
            nodes.push(LayoutNode {
                id: b.id(),
                depth: b.depth(),
                extents: *b.extents(),
                kind,
            });
        });
        let summary = LayoutSummary::of_nodes(&nodes);
        Self {
            n_ranks,
            nodes,
            summary,
        }
    }

    /// Assemble a layout from decoded parts. `summary` is the header as sent, which is
    /// checked against the nodes by `verify`.
    pub fn from_parts(n_ranks: usize, nodes: Vec<LayoutNode<ND>>, summary: LayoutSummary) -> Self {
        Self {
            n_ranks,
            nodes,
            summary,
        }
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    pub fn nodes(&self) -> &[LayoutNode<ND>] {
        &self.nodes
    }

    pub fn summary(&self) -> LayoutSummary {
        self.summary
    }

    pub fn n_leaves(&self) -> usize {
        self.summary.n_leaves
    }

    /// Owning rank of every leaf, by box id
    pub fn owners(&self) -> FxHashMap<u64, usize> {
        self.nodes
            .iter()
            .filter_map(|node| match node.kind {
                LayoutKind::Leaf { owner } => Some((node.id, owner)),
                LayoutKind::Grid { .. } => None,
            })
            .collect()
    }

    /// Ids of the leaves owned by `rank`
    pub fn owned_by(&self, rank: usize) -> BitSet {
        let mut owned = BitSet::new();
        for node in self.nodes.iter() {
            if node.kind == (LayoutKind::Leaf { owner: rank }) {
                owned.insert(node.id as usize);
            }
        }
        owned
    }

    /// Number of leaves owned by each rank
    pub fn leaves_per_rank(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_ranks];
        for node in self.nodes.iter() {
            if let LayoutKind::Leaf { owner } = node.kind {
                if let Some(count) = counts.get_mut(owner) {
                    *count += 1;
                }
            }
        }
        counts
    }

    /// Build an empty box structure with the shape of this layout.
    ///
    /// The controller's box counts are reset to match the new structure and its id
    /// counter is moved past every id in the layout.
    pub fn rebuild(&self, controller: &mut BoxController) -> Result<MDBox<ND>, PartitionError> {
        controller.reset_box_counts();
        let mut cursor = 0;
        let root = self.rebuild_node(&mut cursor, controller)?;
        if let Some(node) = self.nodes.get(cursor) {
            return Err(PartitionError::StructureMismatch(node.id));
        }
        if let Some(max_id) = self.nodes.iter().map(|node| node.id).max() {
            controller.reserve_ids_through(max_id);
        }
        Ok(root)
    }

    fn rebuild_node(
        &self,
        cursor: &mut usize,
        controller: &mut BoxController,
    ) -> Result<MDBox<ND>, PartitionError> {
        let node = match self.nodes.get(*cursor) {
            Some(node) => node,
            None => return Err(self.count_mismatch(*cursor)),
        };
        *cursor += 1;
        match node.kind {
            LayoutKind::Leaf { owner } => {
                if owner >= self.n_ranks {
                    return Err(PartitionError::StructureMismatch(node.id));
                }
                controller.track_leaf(node.depth);
                Ok(MDBox::new_leaf(node.id, node.depth, node.extents))
            }
            LayoutKind::Grid { split_into } => {
                let n_children: usize = split_into.iter().product();
                if n_children == 0 {
                    return Err(PartitionError::StructureMismatch(node.id));
                }
                controller.track_grid(node.depth);
                let mut children = Vec::with_capacity(n_children);
                for _ in 0..n_children {
                    let child = self.rebuild_node(cursor, controller)?;
                    if child.depth() != node.depth + 1 {
                        return Err(PartitionError::StructureMismatch(child.id()));
                    }
                    children.push(child);
                }
                Ok(MDBox::new_grid(
                    node.id,
                    node.depth,
                    node.extents,
                    split_into,
                    children,
                ))
            }
        }
    }

    fn count_mismatch(&self, found: usize) -> PartitionError {
        PartitionError::BoxCountMismatch {
            expected: self.summary.n_boxes,
            expected_leaves: self.summary.n_leaves,
            found,
            found_leaves: LayoutSummary::of_nodes(&self.nodes).n_leaves,
        }
    }

    /// Check that a locally built box structure is exactly the shape this layout
    /// describes, and that the layout agrees with its own header.
    pub fn verify(&self, root: &MDBox<ND>) -> Result<(), PartitionError> {
        let from_nodes = LayoutSummary::of_nodes(&self.nodes);
        let from_tree = LayoutSummary::of_tree(root);
        for found in [from_nodes, from_tree] {
            if found.n_boxes != self.summary.n_boxes || found.n_leaves != self.summary.n_leaves
            {
                return Err(PartitionError::BoxCountMismatch {
                    expected: self.summary.n_boxes,
                    expected_leaves: self.summary.n_leaves,
                    found: found.n_boxes,
                    found_leaves: found.n_leaves,
                });
            }
            if found.id_sum != self.summary.id_sum {
                return Err(PartitionError::StructureMismatch(root.id()));
            }
        }

        let mut mismatch = None;
        let mut nodes = self.nodes.iter();
        root.visit(&mut |b| {
            if mismatch.is_some() {
                return;
            }
            let matches = match nodes.next() {
                Some(node) => {
                    node.id == b.id()
                        && node.depth == b.depth()
                        && node.extents == *b.extents()
                        && matches!(node.kind, LayoutKind::Leaf { .. }) == b.is_leaf()
                }
                None => false,
            };
            if !matches {
                mismatch = Some(b.id());
            }
        });
        match mismatch {
            Some(id) => Err(PartitionError::StructureMismatch(id)),
            None => Ok(()),
        }
    }
}
