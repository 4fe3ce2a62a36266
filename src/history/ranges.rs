//! Interval set over history node ids, used to plan branch deletion.
//!
//! Deleting a branch may free ancestor nodes, but only those no surviving branch of the
//! same tree still reads. The plan is the deleted branch's ranges minus the union of
//! every survivor's ranges, computed per branch id.

use std::collections::BTreeMap;

use super::BranchToken;

/// Half-open node interval `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeRange {
    pub begin: i64,
    pub end: i64,
}

impl NodeRange {
    pub fn new(begin: i64, end: i64) -> Self {
        Self { begin, end }
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn contains(&self, node_id: i64) -> bool {
        self.begin <= node_id && node_id < self.end
    }
}

/// Disjoint, sorted, non-adjacent intervals per branch id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRangeSet {
    branches: BTreeMap<String, Vec<NodeRange>>,
}

impl NodeRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every range the branch reads, its own open-ended range included.
    pub fn from_branch(token: &BranchToken) -> Self {
        let mut set = Self::new();
        for segment in token.segments() {
            set.insert(&segment.branch_id, NodeRange::new(segment.begin_node_id, segment.end_node_id));
        }
        set
    }

    pub fn insert(&mut self, branch_id: &str, range: NodeRange) {
        if range.is_empty() {
            return;
        }
        let ranges = self.branches.entry(branch_id.to_string()).or_default();
        let mut merged = range;
        let mut out = Vec::with_capacity(ranges.len() + 1);
        let mut placed = false;
        for r in ranges.drain(..) {
            if r.end < merged.begin {
                out.push(r);
            } else if merged.end < r.begin {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push(r);
            } else {
                merged = NodeRange::new(merged.begin.min(r.begin), merged.end.max(r.end));
            }
        }
        if !placed {
            out.push(merged);
        }
        *ranges = out;
    }

    pub fn remove(&mut self, branch_id: &str, range: NodeRange) {
        if range.is_empty() {
            return;
        }
        let Some(ranges) = self.branches.get_mut(branch_id) else {
            return;
        };
        let mut out = Vec::with_capacity(ranges.len() + 1);
        for r in ranges.drain(..) {
            if r.end <= range.begin || range.end <= r.begin {
                out.push(r);
                continue;
            }
            let left = NodeRange::new(r.begin, range.begin);
            let right = NodeRange::new(range.end, r.end);
            if !left.is_empty() {
                out.push(left);
            }
            if !right.is_empty() {
                out.push(right);
            }
        }
        if out.is_empty() {
            self.branches.remove(branch_id);
        } else {
            *ranges = out;
        }
    }

    pub fn difference(&self, other: &NodeRangeSet) -> NodeRangeSet {
        let mut result = self.clone();
        for (branch_id, ranges) in &other.branches {
            for r in ranges {
                result.remove(branch_id, *r);
            }
        }
        result
    }

    pub fn union_with(&mut self, other: &NodeRangeSet) {
        for (branch_id, ranges) in &other.branches {
            for r in ranges {
                self.insert(branch_id, *r);
            }
        }
    }

    pub fn contains(&self, branch_id: &str, node_id: i64) -> bool {
        self.branches
            .get(branch_id)
            .is_some_and(|ranges| ranges.iter().any(|r| r.contains(node_id)))
    }

    pub fn ranges(&self, branch_id: &str) -> &[NodeRange] {
        self.branches.get(branch_id).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeRange)> + '_ {
        self.branches
            .iter()
            .flat_map(|(branch, ranges)| ranges.iter().map(move |r| (branch.as_str(), *r)))
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

/// Node ranges that become unreachable once `target` is deleted.
///
/// `survivors` may include `target` itself; it is skipped.
pub fn deletion_plan<'a>(target: &BranchToken, survivors: impl IntoIterator<Item = &'a BranchToken>) -> NodeRangeSet {
    let mut referenced = NodeRangeSet::new();
    for branch in survivors {
        if branch.branch_id == target.branch_id {
            continue;
        }
        referenced.union_with(&NodeRangeSet::from_branch(branch));
    }
    NodeRangeSet::from_branch(target).difference(&referenced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::BranchRange;

    fn token(branch: &str, ancestors: &[(&str, i64, i64)]) -> BranchToken {
        BranchToken {
            tree_id: "t".into(),
            branch_id: branch.into(),
            ancestors: ancestors
                .iter()
                .map(|(b, begin, end)| BranchRange {
                    branch_id: (*b).into(),
                    begin_node_id: *begin,
                    end_node_id: *end,
                })
                .collect(),
        }
    }

    #[test]
    fn insert_merges_overlapping_and_adjacent() {
        let mut set = NodeRangeSet::new();
        set.insert("a", NodeRange::new(10, 20));
        set.insert("a", NodeRange::new(1, 5));
        set.insert("a", NodeRange::new(5, 10));
        assert_eq!(set.ranges("a"), &[NodeRange::new(1, 20)]);

        set.insert("a", NodeRange::new(30, 40));
        set.insert("a", NodeRange::new(25, 26));
        assert_eq!(
            set.ranges("a"),
            &[NodeRange::new(1, 20), NodeRange::new(25, 26), NodeRange::new(30, 40)]
        );
    }

    #[test]
    fn remove_splits_ranges() {
        let mut set = NodeRangeSet::new();
        set.insert("a", NodeRange::new(1, 20));
        set.remove("a", NodeRange::new(5, 8));
        assert_eq!(set.ranges("a"), &[NodeRange::new(1, 5), NodeRange::new(8, 20)]);
        set.remove("a", NodeRange::new(0, 100));
        assert!(set.is_empty());
    }

    #[test]
    fn deleting_leaf_keeps_shared_prefix() {
        let root = token("a", &[]);
        let child = token("b", &[("a", 1, 5)]);
        let plan = deletion_plan(&child, [&root, &child]);
        assert!(!plan.contains("a", 1));
        assert!(!plan.contains("a", 4));
        assert!(plan.contains("b", 5));
        assert!(plan.contains("b", 1_000));
    }

    #[test]
    fn deleting_root_keeps_nodes_children_read() {
        let root = token("a", &[]);
        let child = token("b", &[("a", 1, 5)]);
        let plan = deletion_plan(&root, [&root, &child]);
        assert_eq!(plan.ranges("a"), &[NodeRange::new(5, i64::MAX)]);
        assert!(plan.ranges("b").is_empty());
    }

    #[test]
    fn deleting_last_branch_frees_everything() {
        let child = token("b", &[("a", 1, 5)]);
        let plan = deletion_plan(&child, [&child]);
        assert_eq!(plan.ranges("a"), &[NodeRange::new(1, 5)]);
        assert_eq!(plan.ranges("b"), &[NodeRange::new(5, i64::MAX)]);
    }

    #[test]
    fn sibling_keeps_shorter_prefix_alive() {
        // root a is already gone; b forked at 5, c forked at 3
        let b = token("b", &[("a", 1, 5)]);
        let c = token("c", &[("a", 1, 3)]);
        let plan = deletion_plan(&b, [&b, &c]);
        assert_eq!(plan.ranges("a"), &[NodeRange::new(3, 5)]);
    }
}
