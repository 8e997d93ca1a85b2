//! Tree diff: the patch between two page-list snapshots.
//!
//! Used by hosts that can clone their pages but do not produce patches of
//! their own. The result applies cleanly with [`crate::apply_patch`]:
//! applying `diff_pages(a, b)` to `a` yields `b`.

use crate::codec::encode_page;
use crate::error::CodecError;
use crate::model::Page;
use crate::order::diff_order;
use crate::patch::{CellInsert, CellsBuilder, FilePatch, PageInsert, PatchBuilder};
use std::collections::{HashMap, HashSet};

/// Compute the patch that turns `previous` into `current`.
pub fn diff_pages(previous: &[Page], current: &[Page]) -> Result<FilePatch, CodecError> {
    let before: HashMap<&str, &Page> = previous.iter().map(|p| (p.id.as_str(), p)).collect();
    let after: HashMap<&str, &Page> = current.iter().map(|p| (p.id.as_str(), p)).collect();

    let order = diff_order(
        &previous.iter().map(|p| p.id.clone()).collect::<Vec<_>>(),
        &current.iter().map(|p| p.id.clone()).collect::<Vec<_>>(),
    );
    let mut builder = PatchBuilder::new();

    for id in &order.removed {
        builder.remove_page(id.clone());
    }

    let mut inserted = HashSet::new();
    for (id, anchor) in &order.inserted {
        let Some(page) = after.get(id.as_str()) else {
            continue;
        };
        builder.insert_page(PageInsert {
            id: id.clone(),
            previous: anchor.clone(),
            data: encode_page(page)?,
        });
        inserted.insert(id.as_str());
    }

    for (id, anchor) in order.moved {
        builder.move_page(&id, anchor);
    }

    for page in current {
        if inserted.contains(page.id.as_str()) {
            continue;
        }
        let Some(old) = before.get(page.id.as_str()) else {
            continue;
        };
        if old.name != page.name {
            builder.rename_page(&page.id, page.name.clone());
        }
        diff_cells(old, page, builder.cells(&page.id));
    }

    Ok(builder.build())
}

fn diff_cells(old: &Page, new: &Page, cells: &mut CellsBuilder) {
    let order = diff_order(&old.shape_ids(), &new.shape_ids());

    for id in order.removed {
        cells.remove(id);
    }

    let mut inserted = HashSet::new();
    for (id, anchor) in order.inserted {
        let Some(shape) = new.shape(&id) else {
            continue;
        };
        cells.insert(CellInsert {
            id: id.clone(),
            previous: anchor,
            attributes: shape.attributes.clone(),
        });
        inserted.insert(id);
    }

    for (id, anchor) in order.moved {
        cells.move_cell(&id, anchor);
    }

    for shape in &new.shapes {
        if inserted.contains(&shape.id) {
            continue;
        }
        let Some(before) = old.shape(&shape.id) else {
            continue;
        };
        for (key, value) in &shape.attributes {
            if before.attributes.get(key) != Some(value) {
                cells.set_attribute(&shape.id, key.clone(), Some(value.clone()));
            }
        }
        for key in before.attributes.keys() {
            if !shape.attributes.contains_key(key) {
                cells.set_attribute(&shape.id, key.clone(), None);
            }
        }
    }
}
