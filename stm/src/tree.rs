//! The ordered tree of accepted sentences.
//!
//! Sentences live in an arena indexed by [`SentenceId`]; parent/child links
//! are arena ids, so removal never has to chase owning references. The tree
//! also owns the state-id index: every live sentence, root included, is
//! reachable through [`SentenceTree::by_state_id`], and entries are removed
//! exactly when their sentence leaves the arena.

use crate::protocol::StateId;
use crate::sentence::{Sentence, SentenceId};
use lsp_types::{Position, Range};
use rustc_hash::{FxHashMap, FxHashSet};
use std::time::Instant;

/// Arena-backed sentence tree rooted at the backend's initial state.
#[derive(Debug)]
pub struct SentenceTree {
    /// Slot per id; freed slots stay `None` (ids are never reused).
    nodes: Vec<Option<Sentence>>,
    index: FxHashMap<StateId, SentenceId>,
    root: SentenceId,
}

impl SentenceTree {
    /// Build a tree containing only the root sentence: no text, zero range.
    pub fn new_root(state_id: StateId) -> Self {
        let root = SentenceId(0);
        let zero = Position::new(0, 0);
        let mut index = FxHashMap::default();
        index.insert(state_id, root);

        Self {
            nodes: vec![Some(Sentence::new(
                state_id,
                String::new(),
                Range::new(zero, zero),
                Instant::now(),
                None,
            ))],
            index,
            root,
        }
    }

    pub fn root(&self) -> SentenceId {
        self.root
    }

    pub fn get(&self, id: SentenceId) -> Option<&Sentence> {
        self.nodes.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: SentenceId) -> Option<&mut Sentence> {
        self.nodes.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Look a live sentence up by its backend state id.
    pub fn by_state_id(&self, state_id: StateId) -> Option<SentenceId> {
        self.index.get(&state_id).copied()
    }

    /// Number of live sentences, root included (never zero).
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Append a child sentence under `parent`.
    ///
    /// Returns `None` when `parent` is no longer live.
    pub fn add(
        &mut self,
        parent: SentenceId,
        text: String,
        state_id: StateId,
        range: Range,
        started_at: Instant,
    ) -> Option<SentenceId> {
        self.get(parent)?;

        let id = SentenceId(self.nodes.len());
        self.nodes.push(Some(Sentence::new(
            state_id,
            text,
            range,
            started_at,
            Some(parent),
        )));
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        self.index.insert(state_id, id);
        Some(id)
    }

    /// Pre-order walk of the descendants of `of`, excluding `of` itself.
    pub fn descendants(&self, of: SentenceId) -> impl Iterator<Item = SentenceId> + '_ {
        let mut stack: Vec<SentenceId> = self
            .get(of)
            .map(|s| s.children.iter().rev().copied().collect())
            .unwrap_or_default();

        std::iter::from_fn(move || {
            let id = stack.pop()?;
            if let Some(node) = self.get(id) {
                stack.extend(node.children.iter().rev().copied());
            }
            Some(id)
        })
    }

    /// Walk from `from` up through its parents to the root, inclusive.
    pub fn ancestors(&self, from: SentenceId) -> impl Iterator<Item = SentenceId> + '_ {
        let mut next = self.get(from).map(|_| from);
        std::iter::from_fn(move || {
            let id = next?;
            next = self.get(id).and_then(|s| s.parent);
            Some(id)
        })
    }

    /// Pre-order descendants of `of`, stopping at but not including `end`.
    pub fn descendants_until(
        &self,
        of: SentenceId,
        end: SentenceId,
    ) -> impl Iterator<Item = SentenceId> + '_ {
        self.descendants(of).take_while(move |&id| id != end)
    }

    /// Remove every descendant of `start` that is not `end` or inside `end`'s
    /// subtree, then splice `end` directly under `start`.
    ///
    /// This is the in-proof edit-at shape: the open sentences between the new
    /// focus and its closing stack disappear, the stack survives. Removed
    /// sentences are returned for decoration cleanup.
    pub fn remove_descendants_between(
        &mut self,
        start: SentenceId,
        end: SentenceId,
    ) -> Vec<Sentence> {
        let mut kept: FxHashSet<SentenceId> = self.descendants(end).collect();
        kept.insert(end);

        let doomed: Vec<SentenceId> = self
            .descendants(start)
            .filter(|id| !kept.contains(id))
            .collect();

        let removed = doomed
            .into_iter()
            .filter_map(|id| self.remove_slot(id))
            .collect();

        if let Some(s) = self.get_mut(start) {
            s.children = vec![end];
        }
        if let Some(e) = self.get_mut(end) {
            e.parent = Some(start);
        }

        removed
    }

    /// Remove all descendants of `of`, returning them for cleanup.
    pub fn truncate(&mut self, of: SentenceId) -> Vec<Sentence> {
        let doomed: Vec<SentenceId> = self.descendants(of).collect();
        let removed = doomed
            .into_iter()
            .filter_map(|id| self.remove_slot(id))
            .collect();

        if let Some(s) = self.get_mut(of) {
            s.children.clear();
        }

        removed
    }

    /// Free one arena slot and drop its index entry.
    ///
    /// Links of other nodes are the caller's responsibility.
    fn remove_slot(&mut self, id: SentenceId) -> Option<Sentence> {
        let sentence = self.nodes.get_mut(id.0)?.take()?;
        if self.index.get(&sentence.state_id) == Some(&id) {
            self.index.remove(&sentence.state_id);
        }
        Some(sentence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use text_util::position_is_before_or_equal;

    fn range(sc: u32, ec: u32) -> Range {
        Range::new(Position::new(0, sc), Position::new(0, ec))
    }

    fn chain(tree: &mut SentenceTree, specs: &[(StateId, u32, u32)]) -> Vec<SentenceId> {
        let mut parent = tree.root();
        let mut ids = Vec::new();
        for &(state_id, sc, ec) in specs {
            parent = tree
                .add(
                    parent,
                    format!("s{state_id}."),
                    state_id,
                    range(sc, ec),
                    Instant::now(),
                )
                .expect("parent is live");
            ids.push(parent);
        }
        ids
    }

    #[test]
    fn add_links_parent_and_child() {
        let mut tree = SentenceTree::new_root(1);
        let ids = chain(&mut tree, &[(2, 0, 2), (3, 2, 4)]);

        let first = tree.get(ids[0]).unwrap();
        assert_eq!(first.parent, Some(tree.root()));
        assert_eq!(first.children, vec![ids[1]]);
        assert_eq!(tree.get(ids[1]).unwrap().parent, Some(ids[0]));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn ranges_never_precede_parent_end() {
        let mut tree = SentenceTree::new_root(1);
        let ids = chain(&mut tree, &[(2, 0, 2), (3, 2, 4), (4, 5, 9)]);

        for id in ids {
            let sent = tree.get(id).unwrap();
            let parent = tree.get(sent.parent.unwrap()).unwrap();
            assert!(position_is_before_or_equal(
                parent.range.end,
                sent.range.start
            ));
        }
    }

    #[test]
    fn descendants_are_preorder() {
        let mut tree = SentenceTree::new_root(1);
        let ids = chain(&mut tree, &[(2, 0, 2), (3, 2, 4), (4, 4, 6)]);

        let walked: Vec<SentenceId> = tree.descendants(tree.root()).collect();
        assert_eq!(walked, ids);

        let from_middle: Vec<SentenceId> = tree.descendants(ids[0]).collect();
        assert_eq!(from_middle, vec![ids[1], ids[2]]);
    }

    #[test]
    fn ancestors_reach_root() {
        let mut tree = SentenceTree::new_root(1);
        let ids = chain(&mut tree, &[(2, 0, 2), (3, 2, 4)]);

        let walked: Vec<SentenceId> = tree.ancestors(ids[1]).collect();
        assert_eq!(walked, vec![ids[1], ids[0], tree.root()]);
    }

    #[test]
    fn descendants_until_excludes_end() {
        let mut tree = SentenceTree::new_root(1);
        let ids = chain(&mut tree, &[(2, 0, 2), (3, 2, 4), (4, 4, 6)]);

        let walked: Vec<SentenceId> = tree.descendants_until(tree.root(), ids[2]).collect();
        assert_eq!(walked, vec![ids[0], ids[1]]);
    }

    #[test]
    fn truncate_drops_descendants_and_index_entries() {
        let mut tree = SentenceTree::new_root(1);
        let ids = chain(&mut tree, &[(2, 0, 2), (3, 2, 4), (4, 4, 6)]);

        let removed = tree.truncate(ids[0]);
        let removed_states: Vec<StateId> = removed.iter().map(|s| s.state_id).collect();
        assert_eq!(removed_states, vec![3, 4]);

        assert_eq!(tree.len(), 2);
        assert!(tree.by_state_id(3).is_none());
        assert!(tree.by_state_id(4).is_none());
        assert!(tree.get(ids[0]).unwrap().children.is_empty());
    }

    #[test]
    fn remove_between_keeps_closing_stack() {
        // 1 -> 2 -> 3 -> 4: dropping (2, 4) exclusive leaves 2 and 4 linked.
        let mut tree = SentenceTree::new_root(1);
        let ids = chain(&mut tree, &[(2, 0, 2), (3, 2, 4), (4, 4, 6)]);

        let removed = tree.remove_descendants_between(ids[0], ids[2]);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].state_id, 3);

        assert_eq!(tree.get(ids[0]).unwrap().children, vec![ids[2]]);
        assert_eq!(tree.get(ids[2]).unwrap().parent, Some(ids[0]));
        assert!(tree.by_state_id(3).is_none());
        assert_eq!(tree.by_state_id(4), Some(ids[2]));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn index_matches_tree_membership_after_mutations() {
        let mut tree = SentenceTree::new_root(1);
        let ids = chain(&mut tree, &[(2, 0, 2), (3, 2, 4), (4, 4, 6), (5, 6, 8)]);

        tree.remove_descendants_between(ids[0], ids[3]);
        tree.truncate(ids[0]);

        let live: Vec<SentenceId> = std::iter::once(tree.root())
            .chain(tree.descendants(tree.root()))
            .collect();
        assert_eq!(live.len(), tree.len());
        for id in live {
            let state_id = tree.get(id).unwrap().state_id;
            assert_eq!(tree.by_state_id(state_id), Some(id));
        }
    }
}
