//! Typed patches exchanged between the host tree and the replicated document.
//!
//! A patch is a list of page operations; a page update may carry a nested
//! list of cell operations. Both levels use the same three variants:
//!
//! ```text
//! FilePatch
//!   └── PageOp::Remove { id }
//!   └── PageOp::Insert(PageInsert { id, previous: Anchor, data })
//!   └── PageOp::Update { id, update: PageUpdate {
//!           name:     Option<String>,
//!           previous: Option<Anchor>,        None = stay in place
//!           cells:    [CellOp::Remove | CellOp::Insert | CellOp::Update] } }
//! ```
//!
//! ## Wire form
//!
//! ```text
//! { "r": [id…],
//!   "i": [{ "id", "previous", "data" }…],
//!   "u": { id: { "name"?, "previous"?, "cells"?: { "r", "i": [{id, previous, attr…}], "u": { id: {attr…} } } } } }
//! ```
//!
//! `previous` is an id or `""`. On inserts `""` means front of the list.
//! On updates an absent or `""` previous means "do not move"; moving an
//! existing entity to the front is written as `"previous": null`. A `null`
//! cell attribute value removes the attribute.

use crate::error::PatchError;
use crate::model::Attributes;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Where an entity goes in its ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Anchor {
    /// First position.
    Front,
    /// Immediately after the entity with this id.
    After(String),
}

impl Anchor {
    /// Interpret an insert's `previous` value; empty means front.
    pub fn from_previous(previous: &str) -> Self {
        if previous.is_empty() {
            Anchor::Front
        } else {
            Anchor::After(previous.to_string())
        }
    }

    /// The wire form of this anchor; front is the empty string.
    pub fn as_previous(&self) -> &str {
        match self {
            Anchor::Front => "",
            Anchor::After(id) => id,
        }
    }

    pub fn after(id: impl Into<String>) -> Self {
        Anchor::After(id.into())
    }
}

// ───────────────────────────────────────────────────────────────────
// Page level
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PageOp {
    Remove { id: String },
    Insert(PageInsert),
    Update { id: String, update: PageUpdate },
}

impl PageOp {
    pub fn id(&self) -> &str {
        match self {
            PageOp::Remove { id } | PageOp::Update { id, .. } => id,
            PageOp::Insert(insert) => &insert.id,
        }
    }
}

/// A new page; `data` is the fully serialized page (see [`crate::codec::encode_page`]).
#[derive(Debug, Clone, PartialEq)]
pub struct PageInsert {
    pub id: String,
    pub previous: Anchor,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageUpdate {
    pub name: Option<String>,
    pub previous: Option<Anchor>,
    pub cells: Vec<CellOp>,
}

impl PageUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.previous.is_none() && self.cells.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────────
// Cell level
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CellOp {
    Remove { id: String },
    Insert(CellInsert),
    Update { id: String, update: CellUpdate },
}

impl CellOp {
    pub fn id(&self) -> &str {
        match self {
            CellOp::Remove { id } | CellOp::Update { id, .. } => id,
            CellOp::Insert(insert) => &insert.id,
        }
    }
}

/// A new cell with its full attribute map (without `id`).
#[derive(Debug, Clone, PartialEq)]
pub struct CellInsert {
    pub id: String,
    pub previous: Anchor,
    pub attributes: Attributes,
}

/// Changed attributes of a cell. `None` removes the attribute.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellUpdate {
    pub attributes: BTreeMap<String, Option<String>>,
    pub previous: Option<Anchor>,
}

impl CellUpdate {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.previous.is_none()
    }
}

/// A complete patch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilePatch {
    pub pages: Vec<PageOp>,
}

impl FilePatch {
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Serialize to the JSON wire form.
    pub fn to_wire(&self) -> Value {
        let mut removed = Vec::new();
        let mut inserted = Vec::new();
        let mut updated = Map::new();

        for op in &self.pages {
            match op {
                PageOp::Remove { id } => removed.push(Value::from(id.as_str())),
                PageOp::Insert(insert) => {
                    let mut entry = Map::new();
                    entry.insert("id".into(), insert.id.as_str().into());
                    entry.insert("previous".into(), insert.previous.as_previous().into());
                    entry.insert("data".into(), insert.data.as_str().into());
                    inserted.push(Value::Object(entry));
                }
                PageOp::Update { id, update } => {
                    let slot = updated
                        .entry(id.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(entry) = slot {
                        write_page_update(entry, update);
                    }
                }
            }
        }

        let mut wire = Map::new();
        if !removed.is_empty() {
            wire.insert("r".into(), Value::Array(removed));
        }
        if !inserted.is_empty() {
            wire.insert("i".into(), Value::Array(inserted));
        }
        if !updated.is_empty() {
            wire.insert("u".into(), Value::Object(updated));
        }
        Value::Object(wire)
    }

    /// Parse the JSON wire form.
    pub fn from_wire(value: &Value) -> Result<Self, PatchError> {
        let wire = as_object(value, "patch")?;
        let mut pages = Vec::new();

        for id in id_list(wire.get("r"), "r")? {
            pages.push(PageOp::Remove { id });
        }

        for entry in array(wire.get("i"), "i")? {
            let entry = as_object(entry, "page insert")?;
            pages.push(PageOp::Insert(PageInsert {
                id: required_str(entry, "id")?,
                previous: Anchor::from_previous(optional_str(entry, "previous")?.unwrap_or("")),
                data: required_str(entry, "data")?,
            }));
        }

        if let Some(updates) = wire.get("u") {
            for (id, entry) in as_object(updates, "u")? {
                let entry = as_object(entry, "page update")?;
                let update = PageUpdate {
                    name: optional_str(entry, "name")?.map(str::to_string),
                    previous: update_previous(entry)?,
                    cells: match entry.get("cells") {
                        Some(cells) => cells_from_wire(cells)?,
                        None => Vec::new(),
                    },
                };
                pages.push(PageOp::Update {
                    id: id.clone(),
                    update,
                });
            }
        }

        Ok(FilePatch { pages })
    }

    pub fn to_json(&self) -> String {
        self.to_wire().to_string()
    }

    pub fn from_json(text: &str) -> Result<Self, PatchError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_wire(&value)
    }
}

fn write_page_update(entry: &mut Map<String, Value>, update: &PageUpdate) {
    if let Some(name) = &update.name {
        entry.insert("name".into(), name.as_str().into());
    }
    if let Some(previous) = &update.previous {
        entry.insert("previous".into(), update_previous_value(previous));
    }
    if !update.cells.is_empty() {
        entry.insert("cells".into(), cells_to_wire(&update.cells));
    }
}

fn update_previous_value(anchor: &Anchor) -> Value {
    match anchor {
        Anchor::Front => Value::Null,
        Anchor::After(id) => id.as_str().into(),
    }
}

fn update_previous(entry: &Map<String, Value>) -> Result<Option<Anchor>, PatchError> {
    match entry.get("previous") {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(Anchor::Front)),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(Anchor::After(s.clone()))),
        Some(other) => Err(PatchError::Wire(format!("previous must be a string, got {other}"))),
    }
}

fn cells_to_wire(cells: &[CellOp]) -> Value {
    let mut removed = Vec::new();
    let mut inserted = Vec::new();
    let mut updated = Map::new();

    for op in cells {
        match op {
            CellOp::Remove { id } => removed.push(Value::from(id.as_str())),
            CellOp::Insert(insert) => {
                let mut entry = Map::new();
                entry.insert("id".into(), insert.id.as_str().into());
                entry.insert("previous".into(), insert.previous.as_previous().into());
                for (key, value) in &insert.attributes {
                    entry.insert(key.clone(), value.as_str().into());
                }
                inserted.push(Value::Object(entry));
            }
            CellOp::Update { id, update } => {
                let slot = updated
                    .entry(id.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(entry) = slot {
                    for (key, value) in &update.attributes {
                        let value = value.as_deref().map_or(Value::Null, Value::from);
                        entry.insert(key.clone(), value);
                    }
                    if let Some(previous) = &update.previous {
                        entry.insert("previous".into(), update_previous_value(previous));
                    }
                }
            }
        }
    }

    let mut wire = Map::new();
    if !removed.is_empty() {
        wire.insert("r".into(), Value::Array(removed));
    }
    if !inserted.is_empty() {
        wire.insert("i".into(), Value::Array(inserted));
    }
    if !updated.is_empty() {
        wire.insert("u".into(), Value::Object(updated));
    }
    Value::Object(wire)
}

fn cells_from_wire(value: &Value) -> Result<Vec<CellOp>, PatchError> {
    let wire = as_object(value, "cells")?;
    let mut cells = Vec::new();

    for id in id_list(wire.get("r"), "cells.r")? {
        cells.push(CellOp::Remove { id });
    }

    for entry in array(wire.get("i"), "cells.i")? {
        let entry = as_object(entry, "cell insert")?;
        let mut attributes = Attributes::new();
        for (key, value) in entry {
            if key == "id" || key == "previous" {
                continue;
            }
            attributes.insert(key.clone(), scalar_string(value, key)?);
        }
        cells.push(CellOp::Insert(CellInsert {
            id: required_str(entry, "id")?,
            previous: Anchor::from_previous(optional_str(entry, "previous")?.unwrap_or("")),
            attributes,
        }));
    }

    if let Some(updates) = wire.get("u") {
        for (id, entry) in as_object(updates, "cells.u")? {
            let entry = as_object(entry, "cell update")?;
            let mut update = CellUpdate {
                previous: update_previous(entry)?,
                ..CellUpdate::default()
            };
            for (key, value) in entry {
                if key == "previous" {
                    continue;
                }
                let value = match value {
                    Value::Null => None,
                    other => Some(scalar_string(other, key)?),
                };
                update.attributes.insert(key.clone(), value);
            }
            cells.push(CellOp::Update {
                id: id.clone(),
                update,
            });
        }
    }

    Ok(cells)
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, PatchError> {
    value
        .as_object()
        .ok_or_else(|| PatchError::Wire(format!("{what} must be an object")))
}

fn array<'a>(value: Option<&'a Value>, what: &str) -> Result<&'a [Value], PatchError> {
    match value {
        None => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(PatchError::Wire(format!("{what} must be an array"))),
    }
}

fn id_list(value: Option<&Value>, what: &str) -> Result<Vec<String>, PatchError> {
    array(value, what)?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| PatchError::Wire(format!("{what} must hold string ids")))
        })
        .collect()
}

fn required_str(entry: &Map<String, Value>, key: &str) -> Result<String, PatchError> {
    optional_str(entry, key)?
        .map(str::to_string)
        .ok_or_else(|| PatchError::Wire(format!("missing '{key}'")))
}

fn optional_str<'a>(entry: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, PatchError> {
    match entry.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(PatchError::Wire(format!("'{key}' must be a string"))),
    }
}

// Hosts sometimes send numbers or booleans for attribute values.
fn scalar_string(value: &Value, key: &str) -> Result<String, PatchError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(PatchError::Wire(format!("attribute '{key}' must be a scalar"))),
    }
}

// ───────────────────────────────────────────────────────────────────
// Builder
// ───────────────────────────────────────────────────────────────────

/// Accumulates operations from several diff passes into one patch.
///
/// Updates for the same id are merged and keep the position of their
/// first mention, so reorders recorded first are applied first.
#[derive(Debug, Default)]
pub struct PatchBuilder {
    removed: Vec<String>,
    inserted: Vec<PageInsert>,
    updates: IndexMap<String, PageDraft>,
}

#[derive(Debug, Default)]
struct PageDraft {
    name: Option<String>,
    previous: Option<Anchor>,
    cells: CellsBuilder,
}

impl PatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_page(&mut self, id: impl Into<String>) {
        self.removed.push(id.into());
    }

    pub fn insert_page(&mut self, insert: PageInsert) {
        self.inserted.push(insert);
    }

    pub fn move_page(&mut self, id: &str, anchor: Anchor) {
        self.draft(id).previous = Some(anchor);
    }

    pub fn rename_page(&mut self, id: &str, name: impl Into<String>) {
        self.draft(id).name = Some(name.into());
    }

    /// Cell operations nested under the update of page `id`.
    pub fn cells(&mut self, id: &str) -> &mut CellsBuilder {
        &mut self.draft(id).cells
    }

    fn draft(&mut self, id: &str) -> &mut PageDraft {
        self.updates.entry(id.to_string()).or_default()
    }

    pub fn build(self) -> FilePatch {
        let mut pages: Vec<PageOp> = self
            .removed
            .into_iter()
            .map(|id| PageOp::Remove { id })
            .collect();
        pages.extend(self.inserted.into_iter().map(PageOp::Insert));

        for (id, draft) in self.updates {
            let update = PageUpdate {
                name: draft.name,
                previous: draft.previous,
                cells: draft.cells.build(),
            };
            if !update.is_empty() {
                pages.push(PageOp::Update { id, update });
            }
        }
        FilePatch { pages }
    }
}

/// Accumulates cell operations for one page.
#[derive(Debug, Default)]
pub struct CellsBuilder {
    removed: Vec<String>,
    inserted: Vec<CellInsert>,
    updates: IndexMap<String, CellUpdate>,
}

impl CellsBuilder {
    pub fn remove(&mut self, id: impl Into<String>) {
        self.removed.push(id.into());
    }

    pub fn insert(&mut self, insert: CellInsert) {
        self.inserted.push(insert);
    }

    pub fn move_cell(&mut self, id: &str, anchor: Anchor) {
        self.update(id).previous = Some(anchor);
    }

    pub fn set_attribute(&mut self, id: &str, key: impl Into<String>, value: Option<String>) {
        self.update(id).attributes.insert(key.into(), value);
    }

    fn update(&mut self, id: &str) -> &mut CellUpdate {
        self.updates.entry(id.to_string()).or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.inserted.is_empty()
            && self.updates.values().all(CellUpdate::is_empty)
    }

    pub fn build(self) -> Vec<CellOp> {
        let mut cells: Vec<CellOp> = self
            .removed
            .into_iter()
            .map(|id| CellOp::Remove { id })
            .collect();
        cells.extend(self.inserted.into_iter().map(CellOp::Insert));
        cells.extend(
            self.updates
                .into_iter()
                .filter(|(_, update)| !update.is_empty())
                .map(|(id, update)| CellOp::Update { id, update }),
        );
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_anchor_previous() {
        assert_eq!(Anchor::from_previous(""), Anchor::Front);
        assert_eq!(Anchor::from_previous("a"), Anchor::after("a"));
        assert_eq!(Anchor::Front.as_previous(), "");
    }

    #[test]
    fn test_wire_key_order() {
        let mut builder = PatchBuilder::new();
        builder.rename_page("b", "Renamed");
        builder.remove_page("a");
        builder.insert_page(PageInsert {
            id: "c".into(),
            previous: Anchor::Front,
            data: "<diagram/>".into(),
        });
        let text = builder.build().to_json();
        assert_eq!(
            text,
            r#"{"r":["a"],"i":[{"id":"c","previous":"","data":"<diagram/>"}],"u":{"b":{"name":"Renamed"}}}"#
        );
    }

    #[test]
    fn test_update_previous_sentinels() {
        let patch = FilePatch::from_wire(&json!({
            "u": {
                "a": { "previous": "" },
                "b": { "previous": "a" },
                "c": { "previous": null },
                "d": { "name": "D" }
            }
        }))
        .unwrap();

        let previous: Vec<_> = patch
            .pages
            .iter()
            .map(|op| match op {
                PageOp::Update { update, .. } => update.previous.clone(),
                _ => panic!("expected update"),
            })
            .collect();
        assert_eq!(
            previous,
            vec![None, Some(Anchor::after("a")), Some(Anchor::Front), None]
        );
    }

    #[test]
    fn test_cells_wire() {
        let value = json!({
            "u": {
                "p1": {
                    "cells": {
                        "r": ["old"],
                        "i": [{ "id": "n", "previous": "2", "value": "hi", "vertex": 1 }],
                        "u": { "2": { "style": null, "value": "x", "previous": "" } }
                    }
                }
            }
        });
        let patch = FilePatch::from_wire(&value).unwrap();
        let PageOp::Update { id, update } = &patch.pages[0] else {
            panic!("expected update");
        };
        assert_eq!(id, "p1");
        assert_eq!(update.cells.len(), 3);
        assert_eq!(update.cells[0], CellOp::Remove { id: "old".into() });

        let CellOp::Insert(insert) = &update.cells[1] else {
            panic!("expected insert");
        };
        assert_eq!(insert.previous, Anchor::after("2"));
        assert_eq!(insert.attributes.get("vertex").map(String::as_str), Some("1"));
        assert!(!insert.attributes.contains_key("id"));

        let CellOp::Update { update: cell, .. } = &update.cells[2] else {
            panic!("expected update");
        };
        assert_eq!(cell.previous, None);
        assert_eq!(cell.attributes.get("style"), Some(&None));
        assert_eq!(cell.attributes.get("value"), Some(&Some("x".to_string())));

        assert_eq!(FilePatch::from_wire(&patch.to_wire()).unwrap(), patch);
    }

    #[test]
    fn test_malformed_wire() {
        assert!(FilePatch::from_json("[]").is_err());
        assert!(FilePatch::from_json(r#"{"r": "a"}"#).is_err());
        assert!(FilePatch::from_json(r#"{"i": [{"previous": ""}]}"#).is_err());
        assert!(FilePatch::from_json("{").is_err());
    }

    #[test]
    fn test_builder_merges_updates() {
        let mut builder = PatchBuilder::new();
        builder.move_page("a", Anchor::after("b"));
        builder.cells("c").set_attribute("1", "value", Some("v".into()));
        builder.rename_page("a", "A");
        builder.cells("empty");

        let patch = builder.build();
        assert_eq!(patch.len(), 2);
        assert_eq!(patch.pages[0].id(), "a");
        let PageOp::Update { update, .. } = &patch.pages[0] else {
            panic!("expected update");
        };
        assert_eq!(update.name.as_deref(), Some("A"));
        assert_eq!(update.previous, Some(Anchor::after("b")));
    }
}
