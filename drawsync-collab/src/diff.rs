//! Patch generation from the replicated document.
//!
//! Structure (inserts, removals, moves) is found by diffing the live
//! orders against the [`Snapshot`]. Attribute and name changes are found
//! from the mutation events of the transaction, read back from the live
//! document.
//!
//! ```text
//!  Snapshot { order, nested }      live pageOrder / cellOrder
//!              └──────── diff_order ────────┘
//!                           │
//!            removed / inserted (payload) / moved
//!                           │
//!    events: [pid] name, [pid, cells, cid] attrs, replaced maps
//!                           ▼
//!                       FilePatch
//! ```

use crate::error::CollabError;
use crate::events::{EventTarget, MutationEvent};
use crate::schema::{ReplicatedDocument, CELLS_KEY, ID_KEY, NAME_KEY};
use crate::snapshot::Snapshot;
use drawsync_core::{diff_order, encode_page, CellInsert, FilePatch, PageInsert, PatchBuilder};
use std::collections::{HashMap, HashSet};
use yrs::{ReadTxn, Transact};

/// Generate the patch describing what changed since `snapshot`, then
/// advance the snapshot to the current state.
///
/// The first call on an unprimed snapshot carries no structure: it
/// renames every page and sets every cell attribute to its current value.
pub fn generate_patch(
    replica: &ReplicatedDocument,
    snapshot: &mut Snapshot,
    events: &[MutationEvent],
) -> Result<FilePatch, CollabError> {
    let txn = replica.doc().transact();
    let order = replica.live_page_order(&txn);
    let nested: HashMap<String, Vec<String>> = order
        .iter()
        .map(|id| (id.clone(), replica.live_cell_order(&txn, id)))
        .collect();

    let mut builder = PatchBuilder::new();
    match snapshot.order.as_deref() {
        None => refresh(replica, &txn, &order, &nested, &mut builder),
        Some(previous) => {
            let mut changes = Changes::default();
            structure(replica, &txn, snapshot, previous, &order, &nested, events, &mut builder, &mut changes)?;
            attributes(replica, &txn, &nested, events, &mut builder, &changes);
        }
    }

    snapshot.order = Some(order);
    snapshot.nested = nested;
    Ok(builder.build())
}

/// Ids the attribute pass must leave alone because a full payload or an
/// insert already carries their content.
#[derive(Default)]
struct Changes {
    pages: HashSet<String>,
    cells: HashSet<(String, String)>,
}

fn refresh<T: ReadTxn>(
    replica: &ReplicatedDocument,
    txn: &T,
    order: &[String],
    nested: &HashMap<String, Vec<String>>,
    builder: &mut PatchBuilder,
) {
    for page_id in order {
        if let Some(name) = replica.read_page_name(txn, page_id) {
            builder.rename_page(page_id, name);
        }
        let Some(cells) = nested.get(page_id) else {
            continue;
        };
        for cell_id in cells {
            let Some(attributes) = replica.read_cell(txn, page_id, cell_id) else {
                continue;
            };
            for (key, value) in attributes {
                builder.cells(page_id).set_attribute(cell_id, key, Some(value));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn structure<T: ReadTxn>(
    replica: &ReplicatedDocument,
    txn: &T,
    snapshot: &Snapshot,
    previous: &[String],
    order: &[String],
    nested: &HashMap<String, Vec<String>>,
    events: &[MutationEvent],
    builder: &mut PatchBuilder,
    changes: &mut Changes,
) -> Result<(), CollabError> {
    // A page map written over a live page replaces its whole content, so
    // the page is diffed as removed and inserted again.
    let replaced = replaced_ids(events, &[], previous, order);
    let pages = diff_order(&without(previous, &replaced), order);
    for id in pages.removed {
        builder.remove_page(id);
    }

    for (id, anchor) in pages.inserted {
        if !changes.pages.insert(id.clone()) {
            continue;
        }
        let Some(page) = replica.read_page(txn, &id) else {
            continue;
        };
        builder.insert_page(PageInsert {
            data: encode_page(&page)?,
            id,
            previous: anchor,
        });
    }

    for (id, anchor) in pages.moved {
        builder.move_page(&id, anchor);
    }

    for page_id in order {
        if changes.pages.contains(page_id) {
            continue;
        }
        let current = nested.get(page_id).map(Vec::as_slice).unwrap_or(&[]);
        let before = snapshot.cells(page_id);
        let replaced = replaced_ids(events, &[page_id.as_str(), CELLS_KEY], before, current);
        let cells = diff_order(&without(before, &replaced), current);
        if cells.is_empty() {
            continue;
        }

        let target = builder.cells(page_id);
        for id in cells.removed {
            target.remove(id);
        }
        for (id, anchor) in cells.inserted {
            if !changes.cells.insert((page_id.clone(), id.clone())) {
                continue;
            }
            let Some(attributes) = replica.read_cell(txn, page_id, &id) else {
                continue;
            };
            target.insert(CellInsert {
                id,
                previous: anchor,
                attributes,
            });
        }
        for (id, anchor) in cells.moved {
            target.move_cell(&id, anchor);
        }
    }
    Ok(())
}

fn attributes<T: ReadTxn>(
    replica: &ReplicatedDocument,
    txn: &T,
    nested: &HashMap<String, Vec<String>>,
    events: &[MutationEvent],
    builder: &mut PatchBuilder,
    changes: &Changes,
) {
    for event in events {
        if event.target != EventTarget::Pages {
            continue;
        }
        match event.path.as_slice() {
            [page_id] => {
                if changes.pages.contains(page_id) || !nested.contains_key(page_id) {
                    continue;
                }
                if event.keys.iter().any(|key| key == NAME_KEY) {
                    if let Some(name) = replica.read_page_name(txn, page_id) {
                        builder.rename_page(page_id, name);
                    }
                }
            }
            [page_id, cells, cell_id] if cells == CELLS_KEY => {
                if changes.pages.contains(page_id)
                    || changes.cells.contains(&(page_id.clone(), cell_id.clone()))
                {
                    continue;
                }
                let live = nested
                    .get(page_id)
                    .is_some_and(|order| order.contains(cell_id));
                if !live {
                    continue;
                }
                let Some(current) = replica.read_cell(txn, page_id, cell_id) else {
                    continue;
                };
                for key in event.keys.iter().filter(|key| *key != ID_KEY) {
                    builder
                        .cells(page_id)
                        .set_attribute(cell_id, key.clone(), current.get(key).cloned());
                }
            }
            _ => {}
        }
    }
}

/// Keys changed directly in the map at `path`.
fn touched_keys<'a>(
    events: &'a [MutationEvent],
    path: &'a [&'a str],
) -> impl Iterator<Item = String> + 'a {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(move |event| {
            event.target == EventTarget::Pages
                && event.path.len() == path.len()
                && event.path.iter().zip(path).all(|(a, b)| a == b)
        })
        .flat_map(|event| event.keys.iter().cloned())
        .filter(move |key| seen.insert(key.clone()))
}

/// Ids whose map was written over while live both before and after.
fn replaced_ids(
    events: &[MutationEvent],
    path: &[&str],
    before: &[String],
    current: &[String],
) -> HashSet<String> {
    touched_keys(events, path)
        .filter(|id| before.contains(id) && current.contains(id))
        .collect()
}

fn without(order: &[String], excluded: &HashSet<String>) -> Vec<String> {
    order
        .iter()
        .filter(|id| !excluded.contains(id.as_str()))
        .cloned()
        .collect()
}
