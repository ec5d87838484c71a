//! Arena of organization units keyed by id.
//!
//! Nodes only hold their `parent_id`; children are resolved through an index
//! built on demand, so the forest never holds back-references.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use orgsync_types::{UnitId, Validity};

use crate::error::{TreeError, TreeResult};

/// One organization unit as seen by one system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: UnitId,
    pub parent_id: Option<UnitId>,
    pub name: String,
    /// Org unit level tag; decides whether the unit is managed by the sync.
    #[serde(default)]
    pub level: Option<String>,
    pub validity: Validity,
}

impl TreeNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A forest of units, keyed by id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Forest {
    nodes: BTreeMap<UnitId, TreeNode>,
}

impl Forest {
    /// Create an empty forest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a forest, rejecting nodes listed with conflicting parents and
    /// parent chains that loop.
    ///
    /// A node listed twice with the same parent keeps its first occurrence.
    pub fn from_nodes(nodes: impl IntoIterator<Item = TreeNode>) -> TreeResult<Self> {
        let mut map: BTreeMap<UnitId, TreeNode> = BTreeMap::new();
        for node in nodes {
            if let Some(existing) = map.get(&node.id) {
                if existing.parent_id != node.parent_id {
                    return Err(TreeError::ConflictingParent {
                        unit: node.id,
                        first: existing.parent_id,
                        second: node.parent_id,
                    });
                }
                continue;
            }
            map.insert(node.id, node);
        }

        let forest = Self { nodes: map };
        for id in forest.nodes.keys() {
            forest.ancestors(*id)?;
        }
        Ok(forest)
    }

    pub fn get(&self, id: UnitId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.nodes.keys().copied()
    }

    /// Nodes without a parent.
    pub fn roots(&self) -> Vec<&TreeNode> {
        self.nodes.values().filter(|n| n.is_root()).collect()
    }

    /// Parent id → child ids, children in id order.
    pub fn children_index(&self) -> HashMap<UnitId, Vec<UnitId>> {
        let mut index: HashMap<UnitId, Vec<UnitId>> = HashMap::new();
        for node in self.nodes.values() {
            if let Some(parent) = node.parent_id {
                index.entry(parent).or_default().push(node.id);
            }
        }
        index
    }

    /// Ancestors of `id`, nearest first.
    ///
    /// The chain stops at a root or at a parent outside this forest (a
    /// partial fetch). A chain that revisits a node is an error.
    pub fn ancestors(&self, id: UnitId) -> TreeResult<Vec<UnitId>> {
        let node = self.get(id).ok_or(TreeError::UnknownNode(id))?;
        let mut seen = HashSet::from([id]);
        let mut chain = Vec::new();
        let mut next = node.parent_id;
        while let Some(parent) = next {
            if !seen.insert(parent) {
                return Err(TreeError::Cycle(id));
            }
            chain.push(parent);
            next = self.get(parent).and_then(|p| p.parent_id);
        }
        Ok(chain)
    }

    /// Number of ancestors of `id`.
    pub fn depth(&self, id: UnitId) -> TreeResult<usize> {
        Ok(self.ancestors(id)?.len())
    }

    /// Returns `true` if any ancestor of `id` is one of `targets`.
    pub fn has_ancestor_in(&self, id: UnitId, targets: &HashSet<UnitId>) -> TreeResult<bool> {
        Ok(self.ancestors(id)?.iter().any(|a| targets.contains(a)))
    }

    /// All ids in the subtree rooted at `id`, the root included.
    pub fn subtree(&self, id: UnitId) -> TreeResult<Vec<UnitId>> {
        if !self.contains(id) {
            return Err(TreeError::UnknownNode(id));
        }
        let children = self.children_index();
        let mut out = Vec::new();
        let mut stack = vec![id];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            out.push(current);
            if let Some(kids) = children.get(&current) {
                stack.extend(kids.iter().rev());
            }
        }
        Ok(out)
    }
}

impl Serialize for Forest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.nodes.values())
    }
}

impl<'de> Deserialize<'de> for Forest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let nodes = Vec::<TreeNode>::deserialize(deserializer)?;
        Forest::from_nodes(nodes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use orgsync_types::Instant;

    pub(crate) fn uid(n: u128) -> UnitId {
        UnitId::from_uuid(uuid_from(n))
    }

    fn uuid_from(n: u128) -> uuid::Uuid {
        uuid::Uuid::from_u128(n)
    }

    pub(crate) fn node(id: u128, parent: Option<u128>, name: &str, level: Option<&str>) -> TreeNode {
        let from = Instant::from_date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        TreeNode {
            id: uid(id),
            parent_id: parent.map(uid),
            name: name.to_string(),
            level: level.map(str::to_string),
            validity: Validity::starting(from).unwrap(),
        }
    }

    #[test]
    fn builds_children_index_and_roots() {
        let forest = Forest::from_nodes([
            node(1, None, "A", None),
            node(2, Some(1), "B", None),
            node(3, Some(1), "C", None),
            node(4, Some(2), "D", None),
        ])
        .unwrap();

        assert_eq!(forest.roots().len(), 1);
        let index = forest.children_index();
        assert_eq!(index[&uid(1)], vec![uid(2), uid(3)]);
        assert_eq!(index[&uid(2)], vec![uid(4)]);
        assert!(!index.contains_key(&uid(4)));
    }

    #[test]
    fn ancestors_nearest_first() {
        let forest = Forest::from_nodes([
            node(1, None, "A", None),
            node(2, Some(1), "B", None),
            node(4, Some(2), "D", None),
        ])
        .unwrap();
        assert_eq!(forest.ancestors(uid(4)).unwrap(), vec![uid(2), uid(1)]);
        assert_eq!(forest.depth(uid(1)).unwrap(), 0);
        assert!(forest.has_ancestor_in(uid(4), &HashSet::from([uid(1)])).unwrap());
        assert!(!forest.has_ancestor_in(uid(1), &HashSet::from([uid(1)])).unwrap());
    }

    #[test]
    fn conflicting_parents_rejected() {
        let err = Forest::from_nodes([
            node(1, None, "A", None),
            node(2, Some(1), "B", None),
            node(3, None, "C", None),
            node(2, Some(3), "B", None),
        ])
        .unwrap_err();
        assert!(matches!(err, TreeError::ConflictingParent { unit, .. } if unit == uid(2)));
    }

    #[test]
    fn duplicate_with_same_parent_is_kept_once() {
        let forest = Forest::from_nodes([
            node(1, None, "A", None),
            node(2, Some(1), "B", None),
            node(2, Some(1), "B", None),
        ])
        .unwrap();
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn cycle_rejected() {
        let err = Forest::from_nodes([node(1, Some(2), "A", None), node(2, Some(1), "B", None)])
            .unwrap_err();
        assert!(matches!(err, TreeError::Cycle(_)));
    }

    #[test]
    fn partial_forest_stops_at_unknown_parent() {
        let forest = Forest::from_nodes([node(5, Some(99), "E", None)]).unwrap();
        assert_eq!(forest.ancestors(uid(5)).unwrap(), vec![uid(99)]);
    }

    #[test]
    fn subtree_lists_descendants() {
        let forest = Forest::from_nodes([
            node(1, None, "A", None),
            node(2, Some(1), "B", None),
            node(3, Some(2), "C", None),
            node(4, None, "X", None),
        ])
        .unwrap();
        assert_eq!(forest.subtree(uid(2)).unwrap(), vec![uid(2), uid(3)]);
        assert_eq!(forest.subtree(uid(1)).unwrap().len(), 3);
        assert!(forest.subtree(uid(42)).is_err());
    }

    #[test]
    fn serde_roundtrip_validates() {
        let forest = Forest::from_nodes([node(1, None, "A", Some("Afdeling"))]).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let back: Forest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, forest);
    }
}
