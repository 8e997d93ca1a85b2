//! Replicated schema: how pages and cells are laid out in the shared doc.
//!
//! ```text
//! Doc
//!  ├── "file"      Map<String, String>          file-level attributes
//!  ├── "pageOrder" Array<pageId>                page order
//!  └── "pages"     Map<pageId, Map>             page content
//!                     ├── "id"        String
//!                     ├── "name"      String
//!                     ├── "model"     Map<String, String>
//!                     ├── "cellOrder" Array<cellId>
//!                     └── "cells"     Map<cellId, Map<String, String>>   (includes "id")
//! ```
//!
//! All three are root types so that peers that create them independently
//! still merge into one. An id is live only while it is both in its order
//! array and in its content map; concurrent moves can leave duplicates in
//! an order array, which readers skip and the next local apply removes.

use crate::error::CollabError;
use crate::origin::INIT_ORIGIN;
use drawsync_core::order::{insert_after_unique, OrderedIds};
use drawsync_core::{apply_patch, Anchor, ApplyReport, Attributes, FileDocument, FilePatch, Page, PatchTarget, Scope, Shape};
use std::collections::HashSet;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, Map, MapPrelim, MapRef, Out, ReadTxn, StateVector,
    Transact, TransactionMut, Update,
};

pub const FILE_KEY: &str = "file";
pub const PAGES_KEY: &str = "pages";
pub const PAGE_ORDER_KEY: &str = "pageOrder";

pub const ID_KEY: &str = "id";
pub const NAME_KEY: &str = "name";
pub const MODEL_KEY: &str = "model";
pub const CELLS_KEY: &str = "cells";
pub const CELL_ORDER_KEY: &str = "cellOrder";

/// A paged document stored in a replicated doc.
pub struct ReplicatedDocument {
    doc: Doc,
    file: MapRef,
    pages: MapRef,
    page_order: ArrayRef,
}

impl Default for ReplicatedDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatedDocument {
    pub fn new() -> Self {
        Self::from_doc(Doc::new())
    }

    /// Create with a fixed client id (deterministic tie-breaking in tests).
    pub fn with_client_id(client_id: u64) -> Self {
        Self::from_doc(Doc::with_client_id(client_id))
    }

    pub fn from_doc(doc: Doc) -> Self {
        let file = doc.get_or_insert_map(FILE_KEY);
        let pages = doc.get_or_insert_map(PAGES_KEY);
        let page_order = doc.get_or_insert_array(PAGE_ORDER_KEY);
        Self {
            doc,
            file,
            pages,
            page_order,
        }
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    pub(crate) fn file_map(&self) -> &MapRef {
        &self.file
    }

    pub(crate) fn pages_map(&self) -> &MapRef {
        &self.pages
    }

    pub(crate) fn page_order_array(&self) -> &ArrayRef {
        &self.page_order
    }

    // ── Writing ──────────────────────────────────────────────────

    /// Write a whole document in one transaction tagged `origin`.
    /// Pages already present are overwritten in place.
    pub fn load(&self, document: &FileDocument, origin: &str) {
        let mut txn = self.doc.transact_mut_with(origin);
        for (key, value) in &document.attributes {
            self.file.insert(&mut txn, key.as_str(), value.clone());
        }

        let mut writer = ReplicaWriter::new(self, &mut txn);
        let mut anchor = Anchor::Front;
        for page in &document.pages {
            writer.put_page(page);
            writer.with_order(&Scope::Pages, |list| insert_after_unique(list, &page.id, &anchor));
            anchor = Anchor::After(page.id.clone());
        }
        log::debug!("loaded {} pages", document.pages.len());
    }

    /// Seed from a host document with the init origin.
    pub fn load_initial(&self, document: &FileDocument) {
        self.load(document, INIT_ORIGIN);
    }

    /// Apply a patch in a single transaction tagged `origin`.
    pub fn apply_patch(&self, patch: &FilePatch, origin: &str) -> Result<ApplyReport, CollabError> {
        let mut txn = self.doc.transact_mut_with(origin);
        let mut writer = ReplicaWriter::new(self, &mut txn);
        Ok(apply_patch(&mut writer, patch)?)
    }

    /// Integrate an update produced by another replica.
    pub fn apply_update(&self, update: &[u8], origin: &str) -> Result<(), CollabError> {
        let update = Update::decode_v1(update)?;
        let mut txn = self.doc.transact_mut_with(origin);
        txn.apply_update(update)
            .map_err(|e| CollabError::Update(e.to_string()))
    }

    // ── Sync helpers ─────────────────────────────────────────────

    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Full state as a single update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// Everything the holder of `state_vector` is missing.
    pub fn encode_update_since(&self, state_vector: &[u8]) -> Result<Vec<u8>, CollabError> {
        let state_vector = StateVector::decode_v1(state_vector)?;
        Ok(self.doc.transact().encode_diff_v1(&state_vector))
    }

    // ── Reading ──────────────────────────────────────────────────

    /// Raw page order, duplicates included.
    pub fn page_order(&self) -> Vec<String> {
        read_ids(&self.page_order, &self.doc.transact())
    }

    /// Raw cell order of a page.
    pub fn cell_order(&self, page_id: &str) -> Option<Vec<String>> {
        let txn = self.doc.transact();
        let page = self.page_map(&txn, page_id)?;
        child_array(&page, &txn, CELL_ORDER_KEY).map(|order| read_ids(&order, &txn))
    }

    pub fn page(&self, id: &str) -> Option<Page> {
        self.read_page(&self.doc.transact(), id)
    }

    /// Live pages in order.
    pub fn pages(&self) -> Vec<Page> {
        let txn = self.doc.transact();
        self.live_page_order(&txn)
            .iter()
            .filter_map(|id| self.read_page(&txn, id))
            .collect()
    }

    pub fn to_document(&self) -> FileDocument {
        let txn = self.doc.transact();
        let attributes = read_attributes(&self.file, &txn, false);
        drop(txn);
        FileDocument {
            attributes,
            pages: self.pages(),
            ..FileDocument::default()
        }
    }

    pub(crate) fn page_map<T: ReadTxn>(&self, txn: &T, id: &str) -> Option<MapRef> {
        match self.pages.get(txn, id) {
            Some(Out::YMap(map)) => Some(map),
            _ => None,
        }
    }

    /// Page order without duplicates and without ids lacking content.
    pub(crate) fn live_page_order<T: ReadTxn>(&self, txn: &T) -> Vec<String> {
        let mut seen = HashSet::new();
        read_ids(&self.page_order, txn)
            .into_iter()
            .filter(|id| seen.insert(id.clone()) && self.page_map(txn, id).is_some())
            .collect()
    }

    /// Cell order of a page without duplicates and without ids lacking content.
    pub(crate) fn live_cell_order<T: ReadTxn>(&self, txn: &T, page_id: &str) -> Vec<String> {
        let Some(page) = self.page_map(txn, page_id) else {
            return Vec::new();
        };
        let (Some(order), Some(cells)) = (
            child_array(&page, txn, CELL_ORDER_KEY),
            child_map(&page, txn, CELLS_KEY),
        ) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        read_ids(&order, txn)
            .into_iter()
            .filter(|id| seen.insert(id.clone()) && cells.contains_key(txn, id))
            .collect()
    }

    pub(crate) fn read_page_name<T: ReadTxn>(&self, txn: &T, id: &str) -> Option<String> {
        self.page_map(txn, id)
            .and_then(|page| page.get(txn, NAME_KEY))
            .and_then(out_to_string)
    }

    /// A cell's attributes, without `id`.
    pub(crate) fn read_cell<T: ReadTxn>(&self, txn: &T, page_id: &str, cell_id: &str) -> Option<Attributes> {
        let page = self.page_map(txn, page_id)?;
        let cells = child_map(&page, txn, CELLS_KEY)?;
        let cell = child_map(&cells, txn, cell_id)?;
        Some(read_attributes(&cell, txn, true))
    }

    pub(crate) fn read_page<T: ReadTxn>(&self, txn: &T, id: &str) -> Option<Page> {
        let page = self.page_map(txn, id)?;
        let mut result = Page::new(id, self.read_page_name(txn, id).unwrap_or_default());
        if let Some(model) = child_map(&page, txn, MODEL_KEY) {
            result.model = read_attributes(&model, txn, false);
        }
        for cell_id in self.live_cell_order(txn, id) {
            if let Some(attributes) = self.read_cell(txn, id, &cell_id) {
                result.shapes.push(Shape {
                    id: cell_id,
                    attributes,
                });
            }
        }
        Some(result)
    }
}

// ───────────────────────────────────────────────────────────────────
// Patch target over a live transaction
// ───────────────────────────────────────────────────────────────────

/// Writes a patch into the replicated doc inside one transaction.
pub(crate) struct ReplicaWriter<'t, 'doc> {
    pages: MapRef,
    page_order: ArrayRef,
    txn: &'t mut TransactionMut<'doc>,
}

impl<'t, 'doc> ReplicaWriter<'t, 'doc> {
    pub(crate) fn new(replica: &ReplicatedDocument, txn: &'t mut TransactionMut<'doc>) -> Self {
        Self {
            pages: replica.pages.clone(),
            page_order: replica.page_order.clone(),
            txn,
        }
    }

    fn page_map(&self, id: &str) -> Option<MapRef> {
        match self.pages.get(&*self.txn, id) {
            Some(Out::YMap(map)) => Some(map),
            _ => None,
        }
    }

    fn cell_map(&self, page_id: &str, id: &str) -> Option<MapRef> {
        let page = self.page_map(page_id)?;
        let cells = child_map(&page, &*self.txn, CELLS_KEY)?;
        child_map(&cells, &*self.txn, id)
    }

    fn write_cell(&mut self, cells: &MapRef, id: &str, attributes: &Attributes) {
        let txn = &mut *self.txn;
        let cell: MapRef = cells.insert(txn, id, MapPrelim::default());
        cell.insert(txn, ID_KEY, id.to_string());
        for (key, value) in attributes {
            if key != ID_KEY {
                cell.insert(txn, key.as_str(), value.clone());
            }
        }
    }
}

impl PatchTarget for ReplicaWriter<'_, '_> {
    fn with_order<R>(&mut self, scope: &Scope, f: impl FnOnce(&mut dyn OrderedIds) -> R) -> R {
        let array = match scope {
            Scope::Pages => Some(self.page_order.clone()),
            Scope::Cells(page_id) => self
                .page_map(page_id)
                .and_then(|page| child_array(&page, &*self.txn, CELL_ORDER_KEY)),
        };
        match array {
            Some(array) => {
                let mut list = ReplicaList {
                    array,
                    txn: &mut *self.txn,
                };
                f(&mut list)
            }
            None => {
                let mut empty: Vec<String> = Vec::new();
                f(&mut empty)
            }
        }
    }

    fn has_page(&self, id: &str) -> bool {
        self.page_map(id).is_some()
    }

    fn has_cell(&self, page_id: &str, id: &str) -> bool {
        self.cell_map(page_id, id).is_some()
    }

    fn put_page(&mut self, page: &Page) {
        let txn = &mut *self.txn;
        let map: MapRef = self.pages.insert(txn, page.id.as_str(), MapPrelim::default());
        map.insert(txn, ID_KEY, page.id.clone());
        map.insert(txn, NAME_KEY, page.name.clone());

        let model: MapRef = map.insert(txn, MODEL_KEY, MapPrelim::default());
        for (key, value) in &page.model {
            model.insert(txn, key.as_str(), value.clone());
        }

        let cells: MapRef = map.insert(txn, CELLS_KEY, MapPrelim::default());
        let order: ArrayRef = map.insert(txn, CELL_ORDER_KEY, ArrayPrelim::default());
        for shape in &page.shapes {
            self.write_cell(&cells, &shape.id, &shape.attributes);
            let txn = &mut *self.txn;
            let len = order.len(txn);
            order.insert(txn, len, shape.id.clone());
        }
    }

    fn delete_page(&mut self, id: &str) {
        self.pages.remove(&mut *self.txn, id);
    }

    fn set_page_name(&mut self, id: &str, name: &str) {
        if let Some(page) = self.page_map(id) {
            page.insert(&mut *self.txn, NAME_KEY, name.to_string());
        }
    }

    fn put_cell(&mut self, page_id: &str, id: &str, attributes: &Attributes) {
        let cells = self
            .page_map(page_id)
            .and_then(|page| child_map(&page, &*self.txn, CELLS_KEY));
        if let Some(cells) = cells {
            self.write_cell(&cells, id, attributes);
        }
    }

    fn delete_cell(&mut self, page_id: &str, id: &str) {
        let cells = self
            .page_map(page_id)
            .and_then(|page| child_map(&page, &*self.txn, CELLS_KEY));
        if let Some(cells) = cells {
            cells.remove(&mut *self.txn, id);
        }
    }

    fn set_cell_attribute(&mut self, page_id: &str, id: &str, key: &str, value: Option<&str>) {
        let Some(cell) = self.cell_map(page_id, id) else {
            return;
        };
        match value {
            Some(value) => {
                cell.insert(&mut *self.txn, key, value.to_string());
            }
            None => {
                cell.remove(&mut *self.txn, key);
            }
        }
    }
}

/// A replicated id array viewed as an [`OrderedIds`] list.
struct ReplicaList<'t, 'doc> {
    array: ArrayRef,
    txn: &'t mut TransactionMut<'doc>,
}

impl OrderedIds for ReplicaList<'_, '_> {
    fn len(&self) -> usize {
        self.array.len(&*self.txn) as usize
    }

    fn id_at(&self, index: usize) -> Option<String> {
        self.array
            .get(&*self.txn, index as u32)
            .and_then(out_to_string)
    }

    fn insert_at(&mut self, index: usize, id: &str) {
        let index = index.min(self.len()) as u32;
        self.array.insert(&mut *self.txn, index, id.to_string());
    }

    fn remove_at(&mut self, index: usize) {
        if index < self.len() {
            self.array.remove(&mut *self.txn, index as u32);
        }
    }

    fn ids(&self) -> Vec<String> {
        read_ids(&self.array, &*self.txn)
    }
}

// ───────────────────────────────────────────────────────────────────
// Helpers
// ───────────────────────────────────────────────────────────────────

pub(crate) fn out_to_string(value: Out) -> Option<String> {
    match value {
        Out::Any(Any::String(s)) => Some(s.to_string()),
        Out::Any(Any::Number(n)) => Some(n.to_string()),
        Out::Any(Any::BigInt(n)) => Some(n.to_string()),
        Out::Any(Any::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn read_ids<T: ReadTxn>(array: &ArrayRef, txn: &T) -> Vec<String> {
    array.iter(txn).filter_map(out_to_string).collect()
}

fn read_attributes<T: ReadTxn>(map: &MapRef, txn: &T, skip_id: bool) -> Attributes {
    map.iter(txn)
        .filter(|(key, _)| !(skip_id && *key == ID_KEY))
        .filter_map(|(key, value)| out_to_string(value).map(|v| (key.to_string(), v)))
        .collect()
}

fn child_map<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<MapRef> {
    match map.get(txn, key) {
        Some(Out::YMap(child)) => Some(child),
        _ => None,
    }
}

fn child_array<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<ArrayRef> {
    match map.get(txn, key) {
        Some(Out::YArray(child)) => Some(child),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::{LOCAL_ORIGIN, REMOTE_ORIGIN};
    use drawsync_core::{CellInsert, PatchBuilder};

    fn sample() -> FileDocument {
        let mut doc = FileDocument::new(vec![
            Page::new("a", "A")
                .with_shape(Shape::new("0"))
                .with_shape(Shape::new("1").with("parent", "0")),
            Page::new("b", "B").with_shape(Shape::new("0")),
        ]);
        doc.attributes.insert("host".into(), "tests".into());
        doc.pages[0].model.insert("gridSize".into(), "10".into());
        doc
    }

    #[test]
    fn test_load_and_read_back() {
        let replica = ReplicatedDocument::with_client_id(1);
        replica.load_initial(&sample());

        assert_eq!(replica.page_order(), vec!["a", "b"]);
        assert_eq!(replica.cell_order("a"), Some(vec!["0".to_string(), "1".to_string()]));
        assert_eq!(replica.to_document(), sample());
    }

    #[test]
    fn test_cell_map_stores_id() {
        let replica = ReplicatedDocument::with_client_id(1);
        replica.load_initial(&sample());

        let txn = replica.doc().transact();
        let page = replica.page_map(&txn, "a").unwrap();
        let cells = child_map(&page, &txn, CELLS_KEY).unwrap();
        let cell = child_map(&cells, &txn, "1").unwrap();
        assert_eq!(cell.get(&txn, ID_KEY).and_then(out_to_string), Some("1".to_string()));
        assert_eq!(
            replica.read_cell(&txn, "a", "1").unwrap().get(ID_KEY),
            None
        );
    }

    #[test]
    fn test_apply_patch_is_one_transaction() {
        let replica = ReplicatedDocument::with_client_id(1);
        replica.load_initial(&sample());

        let mut builder = PatchBuilder::new();
        builder.remove_page("b");
        builder.cells("a").insert(CellInsert {
            id: "2".into(),
            previous: Anchor::after("1"),
            attributes: [("vertex".to_string(), "1".to_string())].into(),
        });
        builder.rename_page("a", "Renamed");
        let report = replica.apply_patch(&builder.build(), LOCAL_ORIGIN).unwrap();

        assert!(report.is_clean());
        let pages = replica.pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].name, "Renamed");
        assert_eq!(pages[0].shape_ids(), vec!["0", "1", "2"]);
    }

    #[test]
    fn test_sync_between_replicas() {
        let a = ReplicatedDocument::with_client_id(1);
        a.load_initial(&sample());

        let b = ReplicatedDocument::with_client_id(2);
        b.apply_update(&a.encode_state_as_update(), REMOTE_ORIGIN).unwrap();
        assert_eq!(b.to_document(), a.to_document());

        let mut builder = PatchBuilder::new();
        builder.rename_page("b", "Bee");
        a.apply_patch(&builder.build(), LOCAL_ORIGIN).unwrap();

        let missing = a.encode_update_since(&b.encode_state_vector()).unwrap();
        b.apply_update(&missing, REMOTE_ORIGIN).unwrap();
        assert_eq!(b.page("b").map(|p| p.name), Some("Bee".to_string()));
    }

    #[test]
    fn test_garbage_update_is_rejected() {
        let replica = ReplicatedDocument::new();
        assert!(matches!(
            replica.apply_update(&[0xff, 0xff, 0xff], REMOTE_ORIGIN),
            Err(CollabError::Decode(_)) | Err(CollabError::Update(_))
        ));
        assert!(replica.encode_update_since(&[0xff, 0xff]).is_err());
    }

    #[test]
    fn test_tombstoned_order_entry_is_not_live() {
        let replica = ReplicatedDocument::with_client_id(1);
        replica.load_initial(&sample());
        {
            let mut txn = replica.doc().transact_mut();
            replica.pages_map().remove(&mut txn, "b");
        }
        assert_eq!(replica.page_order(), vec!["a", "b"]);
        assert_eq!(replica.pages().len(), 1);
    }
}
