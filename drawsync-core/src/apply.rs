//! Patch applier.
//!
//! [`apply_patch`] runs a [`FilePatch`] against anything implementing
//! [`PatchTarget`]: a content store plus one ordered id list per scope.
//! The replicated document and the in-memory [`LiveModel`] share this
//! code path, so both see identical ordering decisions.
//!
//! Steps, per collection:
//!
//! 1. decode every insert payload (a failure here commits nothing)
//! 2. drop duplicate ids from the order list
//! 3. removals, deleting order entries from the highest index down
//! 4. inserts, placed by [`place_inserts`]
//! 5. updates in patch order, recursing into a page's cells
//!
//! Updates and removals aimed at ids that are not live are skipped and
//! reported rather than failing the whole patch.

use crate::codec::decode_page;
use crate::error::PatchError;
use crate::model::{Attributes, Page, Shape};
use crate::order::{dedup, insert_after_unique, place_inserts, Downgrade, OrderedIds};
use crate::patch::{Anchor, CellOp, FilePatch, PageOp, PageUpdate};
use std::collections::HashMap;
use std::fmt;

/// Which ordered collection an operation addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Pages,
    Cells(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Pages => write!(f, "pages"),
            Scope::Cells(page) => write!(f, "cells of '{page}'"),
        }
    }
}

/// Storage a patch can be applied to.
///
/// Content and order are separate: an id is live only while it is in its
/// scope's order list *and* has content.
pub trait PatchTarget {
    /// Run `f` against the order list of `scope`.
    fn with_order<R>(&mut self, scope: &Scope, f: impl FnOnce(&mut dyn OrderedIds) -> R) -> R;

    fn has_page(&self, id: &str) -> bool;
    fn has_cell(&self, page_id: &str, id: &str) -> bool;

    /// Store a page's content, including its cells and their order.
    fn put_page(&mut self, page: &Page);
    fn delete_page(&mut self, id: &str);
    fn set_page_name(&mut self, id: &str, name: &str);

    fn put_cell(&mut self, page_id: &str, id: &str, attributes: &Attributes);
    fn delete_cell(&mut self, page_id: &str, id: &str);
    fn set_cell_attribute(&mut self, page_id: &str, id: &str, key: &str, value: Option<&str>);
}

/// An operation that was dropped because its target is not live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub scope: Scope,
    pub id: String,
    pub op: SkippedOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkippedOp {
    Remove,
    Update,
}

/// What an application actually did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplyReport {
    pub removed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub duplicates_dropped: usize,
    pub skipped: Vec<Skipped>,
    pub downgrades: Vec<Downgrade>,
}

impl ApplyReport {
    /// True when every operation landed exactly as described.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.downgrades.is_empty()
    }

    fn skip(&mut self, scope: &Scope, id: &str, op: SkippedOp) {
        log::warn!("{scope}: {op:?} target '{id}' not found, skipping");
        self.skipped.push(Skipped {
            scope: scope.clone(),
            id: id.to_string(),
            op,
        });
    }
}

/// Apply `patch` to `target`.
pub fn apply_patch<T: PatchTarget>(
    target: &mut T,
    patch: &FilePatch,
) -> Result<ApplyReport, PatchError> {
    let mut removals = Vec::new();
    let mut inserts = Vec::new();
    let mut updates = Vec::new();

    for op in &patch.pages {
        match op {
            PageOp::Remove { id } => removals.push(id.as_str()),
            PageOp::Insert(insert) => {
                let mut page = decode_page(&insert.data)?;
                if page.id != insert.id {
                    log::debug!("insert '{}' carries page id '{}'", insert.id, page.id);
                    page.id = insert.id.clone();
                }
                inserts.push((page, insert.previous.clone()));
            }
            PageOp::Update { id, update } => updates.push((id.as_str(), update)),
        }
    }

    let mut report = ApplyReport::default();
    let scope = Scope::Pages;

    report.duplicates_dropped += target.with_order(&scope, |list| dedup(list));
    remove_ids(target, &scope, &removals, &mut report);

    for (page, _) in &inserts {
        target.put_page(page);
    }
    let placements: Vec<(String, Anchor)> = inserts
        .into_iter()
        .map(|(page, anchor)| (page.id, anchor))
        .collect();
    report.inserted += placements.len();
    report
        .downgrades
        .extend(target.with_order(&scope, |list| place_inserts(list, &placements)));

    for (id, update) in updates {
        apply_page_update(target, id, update, &mut report);
    }

    log::debug!(
        "applied patch: {} removed, {} inserted, {} updated, {} skipped",
        report.removed,
        report.inserted,
        report.updated,
        report.skipped.len()
    );
    Ok(report)
}

fn apply_page_update<T: PatchTarget>(
    target: &mut T,
    id: &str,
    update: &PageUpdate,
    report: &mut ApplyReport,
) {
    let scope = Scope::Pages;
    if !is_live(target, &scope, id) {
        report.skip(&scope, id, SkippedOp::Update);
        return;
    }

    if let Some(name) = &update.name {
        target.set_page_name(id, name);
    }
    if let Some(anchor) = &update.previous {
        report
            .downgrades
            .extend(target.with_order(&scope, |list| insert_after_unique(list, id, anchor)));
    }
    if !update.cells.is_empty() {
        apply_cells(target, id, &update.cells, report);
    }
    report.updated += 1;
}

fn apply_cells<T: PatchTarget>(
    target: &mut T,
    page_id: &str,
    ops: &[CellOp],
    report: &mut ApplyReport,
) {
    let scope = Scope::Cells(page_id.to_string());
    report.duplicates_dropped += target.with_order(&scope, |list| dedup(list));

    let removals: Vec<&str> = ops
        .iter()
        .filter_map(|op| match op {
            CellOp::Remove { id } => Some(id.as_str()),
            _ => None,
        })
        .collect();
    remove_ids(target, &scope, &removals, report);

    let mut placements = Vec::new();
    for op in ops {
        if let CellOp::Insert(insert) = op {
            target.put_cell(page_id, &insert.id, &insert.attributes);
            placements.push((insert.id.clone(), insert.previous.clone()));
        }
    }
    report.inserted += placements.len();
    report
        .downgrades
        .extend(target.with_order(&scope, |list| place_inserts(list, &placements)));

    for op in ops {
        let CellOp::Update { id, update } = op else {
            continue;
        };
        if !is_live(target, &scope, id) {
            report.skip(&scope, id, SkippedOp::Update);
            continue;
        }
        for (key, value) in &update.attributes {
            if key != "id" {
                target.set_cell_attribute(page_id, id, key, value.as_deref());
            }
        }
        if let Some(anchor) = &update.previous {
            report
                .downgrades
                .extend(target.with_order(&scope, |list| insert_after_unique(list, id, anchor)));
        }
        report.updated += 1;
    }
}

fn remove_ids<T: PatchTarget>(
    target: &mut T,
    scope: &Scope,
    ids: &[&str],
    report: &mut ApplyReport,
) {
    if ids.is_empty() {
        return;
    }
    let order = target.with_order(scope, |list| list.ids());
    let mut indices = Vec::new();

    for id in ids {
        let index = order.iter().position(|candidate| candidate == *id);
        if index.is_none() && !has_content(target, scope, id) {
            report.skip(scope, id, SkippedOp::Remove);
            continue;
        }
        indices.extend(index);
        report.removed += 1;
    }

    indices.sort_unstable();
    indices.dedup();
    target.with_order(scope, |list| {
        for index in indices.iter().rev() {
            list.remove_at(*index);
        }
    });

    for id in ids {
        match scope {
            Scope::Pages => target.delete_page(id),
            Scope::Cells(page_id) => target.delete_cell(page_id, id),
        }
    }
}

fn has_content<T: PatchTarget>(target: &T, scope: &Scope, id: &str) -> bool {
    match scope {
        Scope::Pages => target.has_page(id),
        Scope::Cells(page_id) => target.has_cell(page_id, id),
    }
}

fn is_live<T: PatchTarget>(target: &mut T, scope: &Scope, id: &str) -> bool {
    has_content(target, scope, id) && target.with_order(scope, |list| list.position(id).is_some())
}

// ───────────────────────────────────────────────────────────────────
// In-memory target
// ───────────────────────────────────────────────────────────────────

/// Plain in-memory page model with the same content/order split as the
/// replicated document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveModel {
    order: Vec<String>,
    pages: HashMap<String, LivePage>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct LivePage {
    name: String,
    model: Attributes,
    order: Vec<String>,
    cells: HashMap<String, Attributes>,
}

impl LivePage {
    fn from_page(page: &Page) -> Self {
        Self {
            name: page.name.clone(),
            model: page.model.clone(),
            order: page.shape_ids(),
            cells: page
                .shapes
                .iter()
                .map(|s| (s.id.clone(), s.attributes.clone()))
                .collect(),
        }
    }
}

impl LiveModel {
    pub fn from_pages(pages: &[Page]) -> Self {
        Self {
            order: pages.iter().map(|p| p.id.clone()).collect(),
            pages: pages
                .iter()
                .map(|p| (p.id.clone(), LivePage::from_page(p)))
                .collect(),
        }
    }

    /// Live pages in order. Ids without content are left out.
    pub fn to_pages(&self) -> Vec<Page> {
        self.order
            .iter()
            .filter_map(|id| {
                let live = self.pages.get(id)?;
                Some(Page {
                    id: id.clone(),
                    name: live.name.clone(),
                    model: live.model.clone(),
                    shapes: live
                        .order
                        .iter()
                        .filter_map(|cell_id| {
                            live.cells.get(cell_id).map(|attributes| Shape {
                                id: cell_id.clone(),
                                attributes: attributes.clone(),
                            })
                        })
                        .collect(),
                })
            })
            .collect()
    }

    pub fn page_order(&self) -> &[String] {
        &self.order
    }

    pub fn apply(&mut self, patch: &FilePatch) -> Result<ApplyReport, PatchError> {
        apply_patch(self, patch)
    }
}

/// Apply `patch` to a page list in place.
pub fn apply_to_pages(pages: &mut Vec<Page>, patch: &FilePatch) -> Result<ApplyReport, PatchError> {
    let mut model = LiveModel::from_pages(pages);
    let report = model.apply(patch)?;
    *pages = model.to_pages();
    Ok(report)
}

impl PatchTarget for LiveModel {
    fn with_order<R>(&mut self, scope: &Scope, f: impl FnOnce(&mut dyn OrderedIds) -> R) -> R {
        match scope {
            Scope::Pages => f(&mut self.order),
            Scope::Cells(page_id) => match self.pages.get_mut(page_id) {
                Some(page) => f(&mut page.order),
                None => {
                    let mut empty: Vec<String> = Vec::new();
                    f(&mut empty)
                }
            },
        }
    }

    fn has_page(&self, id: &str) -> bool {
        self.pages.contains_key(id)
    }

    fn has_cell(&self, page_id: &str, id: &str) -> bool {
        self.pages
            .get(page_id)
            .is_some_and(|page| page.cells.contains_key(id))
    }

    fn put_page(&mut self, page: &Page) {
        self.pages.insert(page.id.clone(), LivePage::from_page(page));
    }

    fn delete_page(&mut self, id: &str) {
        self.pages.remove(id);
    }

    fn set_page_name(&mut self, id: &str, name: &str) {
        if let Some(page) = self.pages.get_mut(id) {
            page.name = name.to_string();
        }
    }

    fn put_cell(&mut self, page_id: &str, id: &str, attributes: &Attributes) {
        if let Some(page) = self.pages.get_mut(page_id) {
            page.cells.insert(id.to_string(), attributes.clone());
        }
    }

    fn delete_cell(&mut self, page_id: &str, id: &str) {
        if let Some(page) = self.pages.get_mut(page_id) {
            page.cells.remove(id);
        }
    }

    fn set_cell_attribute(&mut self, page_id: &str, id: &str, key: &str, value: Option<&str>) {
        let Some(cell) = self
            .pages
            .get_mut(page_id)
            .and_then(|page| page.cells.get_mut(id))
        else {
            return;
        };
        match value {
            Some(value) => {
                cell.insert(key.to_string(), value.to_string());
            }
            None => {
                cell.remove(key);
            }
        }
    }
}
