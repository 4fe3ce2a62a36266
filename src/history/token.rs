use serde::{Deserialize, Serialize};

use crate::providers::PersistenceError;

/// Node id of the first batch of every history.
pub const FIRST_NODE_ID: i64 = 1;

/// Nodes `[begin_node_id, end_node_id)` of `branch_id` that a descendant branch inherits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchRange {
    pub branch_id: String,
    pub begin_node_id: i64,
    pub end_node_id: i64,
}

/// Position in the history tree: a branch and its inherited ancestry, root first.
///
/// Tokens are handed to callers as opaque bytes; [`BranchToken::encode`] and
/// [`BranchToken::decode`] are the only codec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchToken {
    pub tree_id: String,
    pub branch_id: String,
    pub ancestors: Vec<BranchRange>,
}

impl BranchToken {
    /// Root branch of a new tree, with a fresh branch id.
    pub fn new_root(tree_id: impl Into<String>) -> Self {
        Self {
            tree_id: tree_id.into(),
            branch_id: uuid::Uuid::new_v4().to_string(),
            ancestors: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec(self).map_err(|e| PersistenceError::invalid(format!("branch token not encodable: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PersistenceError> {
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::invalid(format!("malformed branch token: {e}")))
    }

    /// First node id owned by this branch itself.
    pub fn own_begin_node_id(&self) -> i64 {
        self.ancestors.last().map_or(FIRST_NODE_ID, |a| a.end_node_id)
    }

    /// Every range this branch reads, root first, ending with its own open-ended range.
    pub fn segments(&self) -> Vec<BranchRange> {
        let mut segments = self.ancestors.clone();
        segments.push(BranchRange {
            branch_id: self.branch_id.clone(),
            begin_node_id: self.own_begin_node_id(),
            end_node_id: i64::MAX,
        });
        segments
    }

    /// Ancestry of a branch forked from this one at `fork_node_id`.
    ///
    /// When the fork point lies beyond the inherited ranges, the new branch inherits
    /// this branch's own nodes up to the fork point. Otherwise the inherited chain is
    /// cut at the ancestor containing the fork point.
    pub fn fork(&self, fork_node_id: i64, new_branch_id: impl Into<String>) -> Result<BranchToken, PersistenceError> {
        if fork_node_id <= FIRST_NODE_ID {
            return Err(PersistenceError::invalid(format!(
                "fork node id must be greater than {FIRST_NODE_ID}, got {fork_node_id}"
            )));
        }

        let own_begin = self.own_begin_node_id();
        let ancestors = if fork_node_id > own_begin {
            let mut ancestors = self.ancestors.clone();
            ancestors.push(BranchRange {
                branch_id: self.branch_id.clone(),
                begin_node_id: own_begin,
                end_node_id: fork_node_id,
            });
            ancestors
        } else {
            let mut ancestors = Vec::with_capacity(self.ancestors.len());
            for ancestor in &self.ancestors {
                if ancestor.end_node_id >= fork_node_id {
                    ancestors.push(BranchRange {
                        end_node_id: fork_node_id,
                        ..ancestor.clone()
                    });
                    break;
                }
                ancestors.push(ancestor.clone());
            }
            ancestors
        };

        Ok(BranchToken {
            tree_id: self.tree_id.clone(),
            branch_id: new_branch_id.into(),
            ancestors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(branch: &str, begin: i64, end: i64) -> BranchRange {
        BranchRange {
            branch_id: branch.into(),
            begin_node_id: begin,
            end_node_id: end,
        }
    }

    fn token(branch: &str, ancestors: Vec<BranchRange>) -> BranchToken {
        BranchToken {
            tree_id: "tree".into(),
            branch_id: branch.into(),
            ancestors,
        }
    }

    #[test]
    fn root_fork_inherits_prefix() {
        let root = token("a", vec![]);
        let child = root.fork(5, "b").unwrap();
        assert_eq!(child.ancestors, vec![range("a", 1, 5)]);
        assert_eq!(child.own_begin_node_id(), 5);
        assert_eq!(child.tree_id, "tree");
    }

    #[test]
    fn fork_beyond_ancestors_appends_own_range() {
        let b = token("b", vec![range("a", 1, 5)]);
        let c = b.fork(9, "c").unwrap();
        assert_eq!(c.ancestors, vec![range("a", 1, 5), range("b", 5, 9)]);
    }

    #[test]
    fn fork_inside_ancestors_truncates() {
        let c = token("c", vec![range("a", 1, 5), range("b", 5, 9)]);
        assert_eq!(c.fork(3, "d").unwrap().ancestors, vec![range("a", 1, 3)]);
        assert_eq!(c.fork(5, "e").unwrap().ancestors, vec![range("a", 1, 5)]);
        assert_eq!(c.fork(7, "f").unwrap().ancestors, vec![range("a", 1, 5), range("b", 5, 7)]);
        assert_eq!(c.fork(9, "g").unwrap().ancestors, vec![range("a", 1, 5), range("b", 5, 9)]);
    }

    #[test]
    fn fork_at_root_is_rejected() {
        let root = token("a", vec![]);
        assert!(matches!(root.fork(1, "b"), Err(PersistenceError::InvalidRequest(_))));
        assert!(root.fork(0, "b").is_err());
    }

    #[test]
    fn segments_end_with_own_open_range() {
        let b = token("b", vec![range("a", 1, 5)]);
        assert_eq!(b.segments(), vec![range("a", 1, 5), range("b", 5, i64::MAX)]);
    }

    #[test]
    fn codec_rejects_garbage() {
        let t = BranchToken::new_root("tree-1");
        assert_eq!(BranchToken::decode(&t.encode().unwrap()).unwrap(), t);
        assert!(BranchToken::decode(b"\x00\x01").is_err());
    }
}
