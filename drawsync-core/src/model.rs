//! External document tree: pages of ordered shapes with flat attributes.
//!
//! ```text
//! FileDocument
//!   ├── attributes            (file-level, e.g. host / modified)
//!   └── pages: [Page]         (ordered)
//!         ├── id, name
//!         ├── model           (graph-model attributes, e.g. gridSize)
//!         └── shapes: [Shape] (ordered)
//!               ├── id
//!               └── attributes (flat; "mxGeometry" holds the geometry blob)
//! ```
//!
//! The host owns the live copy of this tree. Everything here is a plain
//! value type so snapshots are just clones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved shape attribute holding the serialized geometry sub-document.
pub const GEOMETRY_KEY: &str = "mxGeometry";

/// Page id assigned when a bare graph model (no page wrapper) is decoded.
pub const DEFAULT_PAGE_ID: &str = "page-1";

/// Page name assigned when a bare graph model is decoded.
pub const DEFAULT_PAGE_NAME: &str = "Page-1";

/// Flat string attributes. Sorted so encoded output is stable.
pub type Attributes = BTreeMap<String, String>;

/// Which root element the document was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RootKind {
    /// Multi-page file root.
    #[default]
    File,
    /// Bare single-page graph model.
    GraphModel,
}

/// A whole document as the host sees it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileDocument {
    pub kind: RootKind,
    pub attributes: Attributes,
    pub pages: Vec<Page>,
}

impl FileDocument {
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            kind: RootKind::File,
            attributes: Attributes::new(),
            pages,
        }
    }

    pub fn page(&self, id: &str) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == id)
    }

    /// Page ids in document order.
    pub fn page_ids(&self) -> Vec<String> {
        self.pages.iter().map(|p| p.id.clone()).collect()
    }
}

/// One page (diagram) of the document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub name: String,
    /// Attributes of the page's graph model element.
    pub model: Attributes,
    pub shapes: Vec<Shape>,
}

impl Page {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: Attributes::new(),
            shapes: Vec::new(),
        }
    }

    /// Builder-style shape append.
    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shapes.push(shape);
        self
    }

    pub fn shape(&self, id: &str) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.id == id)
    }

    pub fn shape_mut(&mut self, id: &str) -> Option<&mut Shape> {
        self.shapes.iter_mut().find(|s| s.id == id)
    }

    pub fn shape_ids(&self) -> Vec<String> {
        self.shapes.iter().map(|s| s.id.clone()).collect()
    }
}

/// A single cell on a page. `attributes` never contains `id`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Shape {
    pub id: String,
    pub attributes: Attributes,
}

impl Shape {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// The serialized geometry blob, if the shape has one.
    pub fn geometry(&self) -> Option<&str> {
        self.get(GEOMETRY_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_builder() {
        let page = Page::new("p1", "Page 1")
            .with_shape(Shape::new("0"))
            .with_shape(Shape::new("1").with("parent", "0"));

        assert_eq!(page.shape_ids(), vec!["0", "1"]);
        assert_eq!(page.shape("1").and_then(|s| s.get("parent")), Some("0"));
        assert!(page.shape("2").is_none());
    }

    #[test]
    fn test_document_lookup() {
        let doc = FileDocument::new(vec![Page::new("a", "A"), Page::new("b", "B")]);
        assert_eq!(doc.page_ids(), vec!["a", "b"]);
        assert_eq!(doc.page("b").map(|p| p.name.as_str()), Some("B"));
        assert_eq!(doc.kind, RootKind::File);
    }

    #[test]
    fn test_geometry_accessor() {
        let shape = Shape::new("2").with(GEOMETRY_KEY, "<mxGeometry as=\"geometry\"/>");
        assert_eq!(shape.geometry(), Some("<mxGeometry as=\"geometry\"/>"));
    }
}
