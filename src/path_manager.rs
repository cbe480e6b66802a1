//! Arena for materialized property-path chains.
//!
//! A path-search visited entry links to its predecessor in the same
//! search; since the predecessor and its successors are mutually
//! reachable through the search (a classic cyclic-reference shape), this
//! is modeled as a `Vec`-backed arena with stable `usize` indices rather
//! than owned back-pointers. A path object-id (`Kind::Path`) carries an
//! arena index; reconstructing the walk means following `predecessor`
//! links until reaching an entry with no predecessor.

use crate::ids::ObjectId;

#[derive(Debug, Clone, Copy)]
pub struct PathStep {
    pub node: ObjectId,
    pub predecessor: Option<PathRef>,
    /// Edge type traversed to reach `node` from the predecessor; `None` at
    /// the root entry.
    pub edge_type: Option<ObjectId>,
    pub inverse: bool,
}

pub type PathRef = usize;

/// Owns every step of every path produced by one query's path-search
/// operators. Dropped when the query's result set is disposed.
#[derive(Debug, Default)]
pub struct PathManager {
    steps: Vec<PathStep>,
}

impl PathManager {
    pub fn new() -> Self {
        PathManager { steps: Vec::new() }
    }

    pub fn push_root(&mut self, node: ObjectId) -> PathRef {
        self.steps.push(PathStep { node, predecessor: None, edge_type: None, inverse: false });
        self.steps.len() - 1
    }

    pub fn push_step(&mut self, node: ObjectId, predecessor: PathRef, edge_type: ObjectId, inverse: bool) -> PathRef {
        self.steps.push(PathStep { node, predecessor: Some(predecessor), edge_type: Some(edge_type), inverse });
        self.steps.len() - 1
    }

    pub fn step(&self, r: PathRef) -> PathStep {
        self.steps[r]
    }

    /// Reconstruct the full walk as `(node, edge_type, inverse)` from root
    /// to `r`, the edge fields on the root entry being meaningless.
    pub fn reconstruct(&self, r: PathRef) -> Vec<PathStep> {
        let mut chain = Vec::new();
        let mut cur = Some(r);
        while let Some(idx) = cur {
            let step = self.steps[idx];
            chain.push(step);
            cur = step.predecessor;
        }
        chain.reverse();
        chain
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Value;

    #[test]
    fn reconstructs_root_to_leaf_chain() {
        let mut mgr = PathManager::new();
        let a = ObjectId::pack(&Value::Anonymous(1)).unwrap();
        let b = ObjectId::pack(&Value::Anonymous(2)).unwrap();
        let c = ObjectId::pack(&Value::Anonymous(3)).unwrap();
        let ty = ObjectId::pack(&Value::Anonymous(99)).unwrap();

        let root = mgr.push_root(a);
        let mid = mgr.push_step(b, root, ty, false);
        let leaf = mgr.push_step(c, mid, ty, false);

        let chain = mgr.reconstruct(leaf);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].node, a);
        assert_eq!(chain[1].node, b);
        assert_eq!(chain[2].node, c);
        assert!(chain[0].predecessor.is_none());
    }

    #[test]
    fn two_branches_share_a_common_prefix() {
        let mut mgr = PathManager::new();
        let a = ObjectId::pack(&Value::Anonymous(1)).unwrap();
        let b = ObjectId::pack(&Value::Anonymous(2)).unwrap();
        let c = ObjectId::pack(&Value::Anonymous(3)).unwrap();
        let d = ObjectId::pack(&Value::Anonymous(4)).unwrap();
        let ty = ObjectId::pack(&Value::Anonymous(0)).unwrap();

        let root = mgr.push_root(a);
        let via_b = mgr.push_step(b, root, ty, false);
        let leaf1 = mgr.push_step(c, via_b, ty, false);
        let leaf2 = mgr.push_step(d, via_b, ty, true);

        assert_eq!(mgr.reconstruct(leaf1)[1].node, b);
        assert_eq!(mgr.reconstruct(leaf2)[1].node, b);
        assert_ne!(mgr.reconstruct(leaf1)[2].node, mgr.reconstruct(leaf2)[2].node);
    }
}
