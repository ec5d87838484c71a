//! Live-engagement protection for destination subtrees.

use std::collections::{HashMap, HashSet};

use orgsync_types::UnitId;

use crate::node::Forest;

/// Answers "does any unit in this destination subtree hold a current or
/// future engagement", memoized per unit id.
///
/// A unit may be reached through several candidate roots; each subtree is
/// evaluated once.
pub struct SubtreeEngagementCheck<'a> {
    children: HashMap<UnitId, Vec<UnitId>>,
    live: &'a HashSet<UnitId>,
    memo: HashMap<UnitId, bool>,
}

impl<'a> SubtreeEngagementCheck<'a> {
    /// `live` holds the units with at least one current or future engagement.
    pub fn new(forest: &Forest, live: &'a HashSet<UnitId>) -> Self {
        Self {
            children: forest.children_index(),
            live,
            memo: HashMap::new(),
        }
    }

    /// Number of units evaluated so far.
    pub fn evaluated(&self) -> usize {
        self.memo.len()
    }

    /// Returns `true` if `root` or any descendant holds a live engagement.
    pub fn subtree_has_live_engagement(&mut self, root: UnitId) -> bool {
        if let Some(&known) = self.memo.get(&root) {
            return known;
        }

        // Iterative post-order: a node is decided once all children are.
        let mut stack = vec![(root, false)];
        let mut visited = HashSet::new();
        while let Some((id, expanded)) = stack.pop() {
            if self.memo.contains_key(&id) {
                continue;
            }
            let kids = self.children.get(&id).map(Vec::as_slice).unwrap_or(&[]);
            if expanded {
                let live = self.live.contains(&id)
                    || kids.iter().any(|k| self.memo.get(k).copied().unwrap_or(false));
                self.memo.insert(id, live);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            for kid in kids {
                if !self.memo.contains_key(kid) && !visited.contains(kid) {
                    stack.push((*kid, false));
                }
            }
        }

        self.memo.get(&root).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::{node, uid};

    fn forest() -> Forest {
        Forest::from_nodes([
            node(1, None, "Root", None),
            node(2, Some(1), "Left", None),
            node(3, Some(2), "Left leaf", None),
            node(4, Some(1), "Right", None),
            node(5, Some(4), "Right leaf", None),
        ])
        .unwrap()
    }

    #[test]
    fn finds_engagement_deep_in_subtree() {
        let forest = forest();
        let live = HashSet::from([uid(5)]);
        let mut check = SubtreeEngagementCheck::new(&forest, &live);
        assert!(check.subtree_has_live_engagement(uid(1)));
        assert!(check.subtree_has_live_engagement(uid(4)));
        assert!(!check.subtree_has_live_engagement(uid(2)));
        assert!(!check.subtree_has_live_engagement(uid(3)));
    }

    #[test]
    fn empty_subtree_without_engagements() {
        let forest = forest();
        let live = HashSet::new();
        let mut check = SubtreeEngagementCheck::new(&forest, &live);
        assert!(!check.subtree_has_live_engagement(uid(1)));
    }

    #[test]
    fn subtrees_are_evaluated_once() {
        let forest = forest();
        let live = HashSet::from([uid(3)]);
        let mut check = SubtreeEngagementCheck::new(&forest, &live);
        assert!(check.subtree_has_live_engagement(uid(1)));
        assert_eq!(check.evaluated(), 5);
        // Already memoized through the first call.
        assert!(check.subtree_has_live_engagement(uid(2)));
        assert_eq!(check.evaluated(), 5);
    }

    #[test]
    fn unknown_unit_checks_only_itself() {
        let forest = forest();
        let live = HashSet::from([uid(77)]);
        let mut check = SubtreeEngagementCheck::new(&forest, &live);
        assert!(check.subtree_has_live_engagement(uid(77)));
        assert!(!check.subtree_has_live_engagement(uid(78)));
    }
}
