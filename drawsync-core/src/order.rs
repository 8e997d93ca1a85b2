//! Ordering reconciler for lists of ids.
//!
//! Every ordered collection (pages of a document, cells of a page) is a
//! list of unique ids. Patches describe positions by anchor: "after id X"
//! or "at the front". This module owns the rules for turning a batch of
//! anchors into list positions:
//!
//! ```text
//! batch: X→E, Y→X, Z→Y             resolve_anchors
//!        │                          ┌────────────────────────────┐
//!        ▼                          │ X: root E, depth 0         │
//! walk each previous chain  ──────► │ Y: root E, depth 1         │
//! through the batch                 │ Z: root E, depth 2         │
//!                                   └─────────────┬──────────────┘
//!                                                 ▼ plan_inserts
//!                         sort by (root position ↑, depth ↓, submission ↓)
//!                                                 ▼
//!                    insert each directly after its root: Z, then Y, then X
//!                                                 ▼
//!                                      [… E, X, Y, Z …]
//! ```
//!
//! A chain that loops back on itself, or a root that is no longer in the
//! list, falls back to the front of the list. Neither is an error: peers
//! routinely race a delete against a reference to the deleted id.
//!
//! All list mutation goes through [`insert_after_unique`], which relocates
//! an id that is already present instead of duplicating it, so replaying a
//! patch is harmless.

use crate::patch::Anchor;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A mutable ordered list of ids.
///
/// Implemented for `Vec<String>` here and for replicated arrays in the
/// collaboration layer.
pub trait OrderedIds {
    fn len(&self) -> usize;
    fn id_at(&self, index: usize) -> Option<String>;
    fn insert_at(&mut self, index: usize, id: &str);
    fn remove_at(&mut self, index: usize);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ids in order.
    fn ids(&self) -> Vec<String> {
        (0..self.len()).filter_map(|i| self.id_at(i)).collect()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.ids().iter().position(|candidate| candidate == id)
    }
}

impl OrderedIds for Vec<String> {
    fn len(&self) -> usize {
        <[String]>::len(self)
    }

    fn id_at(&self, index: usize) -> Option<String> {
        self.get(index).cloned()
    }

    fn insert_at(&mut self, index: usize, id: &str) {
        self.insert(index.min(<[String]>::len(self)), id.to_string());
    }

    fn remove_at(&mut self, index: usize) {
        if index < <[String]>::len(self) {
            self.remove(index);
        }
    }

    fn ids(&self) -> Vec<String> {
        self.clone()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.iter().position(|candidate| candidate == id)
    }
}

/// A placement that could not be honoured exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downgrade {
    /// The anchor is not in the list; the id went to the front.
    MissingAnchor { id: String, anchor: String },
    /// The anchor chain loops; the id went to the front.
    Cycle { id: String },
}

impl fmt::Display for Downgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Downgrade::MissingAnchor { id, anchor } => {
                write!(f, "'{id}': anchor '{anchor}' not found, placed at front")
            }
            Downgrade::Cycle { id } => write!(f, "'{id}': anchor chain loops, placed at front"),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Primitives
// ───────────────────────────────────────────────────────────────────

/// Drop repeated ids, keeping the first occurrence. Returns how many were dropped.
pub fn dedup<L: OrderedIds + ?Sized>(list: &mut L) -> usize {
    let ids = list.ids();
    let mut seen = HashSet::new();
    let duplicates: Vec<usize> = ids
        .iter()
        .enumerate()
        .filter(|(_, id)| !seen.insert(id.as_str()))
        .map(|(index, _)| index)
        .collect();

    for index in duplicates.iter().rev() {
        list.remove_at(*index);
    }
    if !duplicates.is_empty() {
        log::warn!("dropped {} duplicate ids from order list", duplicates.len());
    }
    duplicates.len()
}

/// Place `id` directly after `anchor`, removing any earlier occurrence first.
pub fn insert_after_unique<L: OrderedIds + ?Sized>(
    list: &mut L,
    id: &str,
    anchor: &Anchor,
) -> Option<Downgrade> {
    if let Some(existing) = list.position(id) {
        list.remove_at(existing);
    }

    match anchor {
        Anchor::Front => {
            list.insert_at(0, id);
            None
        }
        Anchor::After(previous) => match list.position(previous) {
            Some(index) => {
                list.insert_at(index + 1, id);
                None
            }
            None => {
                log::warn!("'{id}': anchor '{previous}' not found, placing at front");
                list.insert_at(0, id);
                Some(Downgrade::MissingAnchor {
                    id: id.to_string(),
                    anchor: previous.clone(),
                })
            }
        },
    }
}

// ───────────────────────────────────────────────────────────────────
// Batch insertion
// ───────────────────────────────────────────────────────────────────

/// Where a batch item's anchor chain ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAnchor {
    /// First id in the chain outside the batch, or `None` for the front.
    pub root: Option<String>,
    /// Number of batch items walked through to reach `root`.
    pub depth: usize,
    pub cycle: bool,
}

/// Walk each item's `previous` chain through the batch.
///
/// `items` are `(id, previous)` pairs in submission order.
pub fn resolve_anchors(items: &[(String, Anchor)]) -> Vec<ResolvedAnchor> {
    let batch: HashMap<&str, &Anchor> = items
        .iter()
        .map(|(id, anchor)| (id.as_str(), anchor))
        .collect();

    items
        .iter()
        .map(|(id, anchor)| {
            let mut seen: HashSet<&str> = HashSet::from([id.as_str()]);
            let mut depth = 0;
            let mut current = anchor;
            loop {
                match current {
                    Anchor::Front => {
                        return ResolvedAnchor { root: None, depth, cycle: false };
                    }
                    Anchor::After(previous) => match batch.get(previous.as_str()) {
                        Some(next) => {
                            if !seen.insert(previous.as_str()) {
                                return ResolvedAnchor { root: None, depth: 1, cycle: true };
                            }
                            depth += 1;
                            current = next;
                        }
                        None => {
                            return ResolvedAnchor {
                                root: Some(previous.clone()),
                                depth,
                                cycle: false,
                            };
                        }
                    },
                }
            }
        })
        .collect()
}

/// One step of an insertion plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInsert {
    pub id: String,
    /// Where to place the id at the time it is inserted.
    pub anchor: Anchor,
    pub depth: usize,
    /// Index of the item in the submitted batch.
    pub submission: usize,
    pub cycle: bool,
}

/// Order a batch of inserts so that placing each one directly after its
/// chain root reproduces the intended reading order.
pub fn plan_inserts<L: OrderedIds + ?Sized>(
    list: &L,
    items: &[(String, Anchor)],
) -> Vec<PlannedInsert> {
    let current = list.ids();
    let positions: HashMap<&str, usize> = current
        .iter()
        .enumerate()
        .map(|(index, id)| (id.as_str(), index))
        .collect();

    let mut plan: Vec<(Option<usize>, PlannedInsert)> = resolve_anchors(items)
        .into_iter()
        .zip(items)
        .enumerate()
        .map(|(submission, (resolved, (id, _)))| {
            let position = resolved
                .root
                .as_deref()
                .and_then(|root| positions.get(root).copied());
            let anchor = match resolved.root {
                Some(root) => Anchor::After(root),
                None => Anchor::Front,
            };
            let step = PlannedInsert {
                id: id.clone(),
                anchor,
                depth: resolved.depth,
                submission,
                cycle: resolved.cycle,
            };
            (position, step)
        })
        .collect();

    // Front and unresolvable anchors sort first (None < Some).
    plan.sort_by(|(pos_a, a), (pos_b, b)| {
        pos_a
            .cmp(pos_b)
            .then(b.depth.cmp(&a.depth))
            .then(b.submission.cmp(&a.submission))
    });
    plan.into_iter().map(|(_, step)| step).collect()
}

/// Execute an insertion plan against `list`. Content is the caller's concern.
pub fn place_inserts<L: OrderedIds + ?Sized>(
    list: &mut L,
    items: &[(String, Anchor)],
) -> Vec<Downgrade> {
    let mut downgrades = Vec::new();
    for step in plan_inserts(list, items) {
        if step.cycle {
            log::warn!("'{}': anchor chain loops, placing at front", step.id);
            downgrades.push(Downgrade::Cycle { id: step.id.clone() });
        }
        log::trace!("insert '{}' after {:?}", step.id, step.anchor);
        downgrades.extend(insert_after_unique(list, &step.id, &step.anchor));
    }
    downgrades
}

// ───────────────────────────────────────────────────────────────────
// Order diff
// ───────────────────────────────────────────────────────────────────

/// Structural difference between two orderings of ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderDiff {
    /// Ids only in the previous order, in previous order.
    pub removed: Vec<String>,
    /// Ids only in the current order, each with its current predecessor.
    pub inserted: Vec<(String, Anchor)>,
    /// Ids that must be relocated after removals and inserts are applied,
    /// in the order the relocations must run.
    pub moved: Vec<(String, Anchor)>,
}

impl OrderDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.inserted.is_empty() && self.moved.is_empty()
    }
}

/// Compute the removals, inserts and relocations that turn `previous`
/// into `current` when applied in that order by [`place_inserts`] and
/// [`insert_after_unique`].
///
/// The relocations are found by replaying the removals and the insertion
/// plan on a copy of `previous`, then walking `current` front to back and
/// relocating every id that does not already follow its predecessor. An
/// id whose predecessor was removed is only relocated if the replay did
/// not already put it in place.
pub fn diff_order(previous: &[String], current: &[String]) -> OrderDiff {
    let mut previous = previous.to_vec();
    dedup(&mut previous);
    let mut current = current.to_vec();
    dedup(&mut current);

    let previous_set: HashSet<&str> = previous.iter().map(String::as_str).collect();
    let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();

    let removed: Vec<String> = previous
        .iter()
        .filter(|id| !current_set.contains(id.as_str()))
        .cloned()
        .collect();

    let inserted: Vec<(String, Anchor)> = current
        .iter()
        .enumerate()
        .filter(|(_, id)| !previous_set.contains(id.as_str()))
        .map(|(index, id)| (id.clone(), predecessor(&current, index)))
        .collect();

    let mut replay: Vec<String> = previous
        .iter()
        .filter(|id| current_set.contains(id.as_str()))
        .cloned()
        .collect();
    place_inserts(&mut replay, &inserted);

    let mut moved = Vec::new();
    for (index, id) in current.iter().enumerate() {
        let wanted = predecessor(&current, index);
        let placed = match &wanted {
            Anchor::Front => replay.first() == Some(id),
            Anchor::After(before) => {
                replay.position(before).and_then(|p| replay.get(p + 1)) == Some(id)
            }
        };
        if !placed {
            insert_after_unique(&mut replay, id, &wanted);
            moved.push((id.clone(), wanted));
        }
    }

    OrderDiff { removed, inserted, moved }
}

fn predecessor(order: &[String], index: usize) -> Anchor {
    match index.checked_sub(1).and_then(|i| order.get(i)) {
        Some(id) => Anchor::After(id.clone()),
        None => Anchor::Front,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn batch(items: &[(&str, &str)]) -> Vec<(String, Anchor)> {
        items
            .iter()
            .map(|(id, previous)| (id.to_string(), Anchor::from_previous(previous)))
            .collect()
    }

    /// Apply a diff the way the patch applier does.
    fn replay(previous: &[String], diff: &OrderDiff) -> Vec<String> {
        let mut list = previous.to_vec();
        for id in &diff.removed {
            if let Some(index) = list.position(id) {
                list.remove_at(index);
            }
        }
        place_inserts(&mut list, &diff.inserted);
        for (id, anchor) in &diff.moved {
            insert_after_unique(&mut list, id, anchor);
        }
        list
    }

    #[test]
    fn test_insert_after_unique_relocates() {
        let mut list = ids(&["a", "b", "c"]);
        assert_eq!(insert_after_unique(&mut list, "a", &Anchor::after("c")), None);
        assert_eq!(list, ids(&["b", "c", "a"]));

        insert_after_unique(&mut list, "a", &Anchor::after("c"));
        assert_eq!(list, ids(&["b", "c", "a"]));

        insert_after_unique(&mut list, "c", &Anchor::Front);
        assert_eq!(list, ids(&["c", "b", "a"]));
    }

    #[test]
    fn test_insert_after_missing_anchor_prepends() {
        let mut list = ids(&["a", "b"]);
        let downgrade = insert_after_unique(&mut list, "x", &Anchor::after("gone"));
        assert_eq!(list, ids(&["x", "a", "b"]));
        assert_eq!(
            downgrade,
            Some(Downgrade::MissingAnchor { id: "x".into(), anchor: "gone".into() })
        );
    }

    #[test]
    fn test_dedup_keeps_first() {
        let mut list = ids(&["a", "b", "a", "c", "b"]);
        assert_eq!(dedup(&mut list), 2);
        assert_eq!(list, ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_resolve_chain() {
        let resolved = resolve_anchors(&batch(&[("y", "x"), ("z", "y"), ("x", "e")]));
        assert_eq!(resolved[0], ResolvedAnchor { root: Some("e".into()), depth: 1, cycle: false });
        assert_eq!(resolved[1], ResolvedAnchor { root: Some("e".into()), depth: 2, cycle: false });
        assert_eq!(resolved[2], ResolvedAnchor { root: Some("e".into()), depth: 0, cycle: false });
    }

    #[test]
    fn test_resolve_cycle_falls_back_to_front() {
        let resolved = resolve_anchors(&batch(&[("a", "b"), ("b", "a"), ("c", "a")]));
        for r in &resolved {
            assert_eq!(r, &ResolvedAnchor { root: None, depth: 1, cycle: true });
        }

        let mut list = ids(&["e"]);
        let downgrades = place_inserts(&mut list, &batch(&[("a", "b"), ("b", "a")]));
        assert_eq!(list.len(), 3);
        assert_eq!(list.last().map(String::as_str), Some("e"));
        assert_eq!(downgrades.len(), 2);
    }

    #[test]
    fn test_chain_insert_reads_in_order() {
        let mut list = ids(&["a", "e", "f"]);
        place_inserts(&mut list, &batch(&[("x", "e"), ("y", "x"), ("z", "y")]));
        assert_eq!(list, ids(&["a", "e", "x", "y", "z", "f"]));

        // Submission order does not matter for a chain.
        let mut list = ids(&["a", "e", "f"]);
        place_inserts(&mut list, &batch(&[("z", "y"), ("y", "x"), ("x", "e")]));
        assert_eq!(list, ids(&["a", "e", "x", "y", "z", "f"]));
    }

    #[test]
    fn test_siblings_keep_submission_order() {
        let mut list = ids(&["e"]);
        place_inserts(&mut list, &batch(&[("x", "e"), ("y", "e")]));
        assert_eq!(list, ids(&["e", "x", "y"]));
    }

    #[test]
    fn test_replayed_batch_is_idempotent() {
        let items = batch(&[("x", "e"), ("y", "x"), ("z", "")]);
        let mut list = ids(&["e", "f"]);
        place_inserts(&mut list, &items);
        let once = list.clone();
        place_inserts(&mut list, &items);
        assert_eq!(list, once);
        assert_eq!(list, ids(&["z", "e", "x", "y", "f"]));
    }

    #[test]
    fn test_anchor_position_is_reresolved() {
        // "b" moves right as items land before it.
        let mut list = ids(&["a", "b"]);
        place_inserts(&mut list, &batch(&[("x", "a"), ("y", "b")]));
        assert_eq!(list, ids(&["a", "x", "b", "y"]));
    }

    #[test]
    fn test_diff_order_basic() {
        let prev = ids(&["a", "b", "c"]);
        let curr = ids(&["a", "x", "c"]);
        let diff = diff_order(&prev, &curr);
        assert_eq!(diff.removed, ids(&["b"]));
        assert_eq!(diff.inserted, vec![("x".to_string(), Anchor::after("a"))]);
        assert!(diff.moved.is_empty());
        assert_eq!(replay(&prev, &diff), curr);
    }

    #[test]
    fn test_diff_order_removed_predecessor_needs_no_move() {
        let prev = ids(&["a", "b", "c"]);
        let curr = ids(&["a", "c"]);
        let diff = diff_order(&prev, &curr);
        assert!(diff.moved.is_empty());
        assert_eq!(replay(&prev, &diff), curr);
    }

    #[test]
    fn test_diff_order_block_rotation() {
        let prev = ids(&["a", "b", "c", "d"]);
        let curr = ids(&["c", "d", "a", "b"]);
        let diff = diff_order(&prev, &curr);
        assert_eq!(replay(&prev, &diff), curr);
        assert!(diff.moved.len() <= 2);
    }

    #[test]
    fn test_diff_order_move_to_front() {
        let prev = ids(&["a", "b", "c"]);
        let curr = ids(&["c", "a", "b"]);
        let diff = diff_order(&prev, &curr);
        assert_eq!(diff.moved, vec![("c".to_string(), Anchor::Front)]);
        assert_eq!(replay(&prev, &diff), curr);
    }

    #[test]
    fn test_diff_order_inverse_on_mixed_edits() {
        let cases: &[(&[&str], &[&str])] = &[
            (&["a", "b", "c", "d", "e"], &["e", "x", "b", "y", "a"]),
            (&[], &["a", "b"]),
            (&["a", "b"], &[]),
            (&["a", "b", "c"], &["c", "b", "a"]),
            (&["a", "b", "c"], &["x", "c", "y", "a", "z"]),
            (&["a", "b", "c", "d"], &["b", "new", "d", "a"]),
        ];
        for (prev, curr) in cases {
            let prev = ids(prev);
            let curr = ids(curr);
            let diff = diff_order(&prev, &curr);
            assert_eq!(replay(&prev, &diff), curr, "{prev:?} -> {curr:?}");
        }
    }

    #[test]
    fn test_diff_order_unchanged_is_empty() {
        let order = ids(&["a", "b"]);
        assert!(diff_order(&order, &order).is_empty());
    }
}
