//! Structural codec between the diagram markup and [`FileDocument`].
//!
//! ```text
//! <mxfile host="…">                         FileDocument { kind: File, attributes }
//!   <diagram id="p1" name="Page 1">   ──►     Page { id, name }
//!     <mxGraphModel gridSize="10">              model { gridSize }
//!       <root>
//!         <mxCell id="2" vertex="1">            Shape { id: "2", attributes: {
//!           <mxGeometry x="10" as="…"/>   ──►     vertex: "1",
//!         </mxCell>                               mxGeometry: "<mxGeometry x=\"10\" …/>" } }
//!       </root>
//!     </mxGraphModel>
//!   </diagram>
//! </mxfile>
//! ```
//!
//! The markup is first parsed into a generic [`Element`] tree in which every
//! container holds a list of children, so a page with one cell and a page
//! with many cells take the same path. The geometry child of a cell is
//! serialized back to text and stored as a single flat attribute; it is
//! opaque everywhere else.
//!
//! A bare `<mxGraphModel>` root is accepted as a one-page document.

use crate::error::CodecError;
use crate::model::{
    Attributes, FileDocument, Page, RootKind, Shape, DEFAULT_PAGE_ID, DEFAULT_PAGE_NAME,
    GEOMETRY_KEY,
};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

const FILE_TAG: &str = "mxfile";
const DIAGRAM_TAG: &str = "diagram";
const MODEL_TAG: &str = "mxGraphModel";
const ROOT_TAG: &str = "root";
const CELL_TAG: &str = "mxCell";

// ───────────────────────────────────────────────────────────────────
// Generic element tree
// ───────────────────────────────────────────────────────────────────

/// A parsed markup element. Attribute order is kept as written.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, CodecError> {
        let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
        for attr in start.attributes() {
            let attr = attr.map_err(|e| CodecError::Format(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| CodecError::Format(e.to_string()))?
                .into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }
}

/// Parse markup into a single root element.
pub fn parse(text: &str) -> Result<Element, CodecError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Element::from_start(&e)?),
            Ok(Event::Empty(e)) => {
                let element = Element::from_start(&e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| CodecError::Format("unbalanced closing tag".into()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                let content = t.unescape().map_err(|e| CodecError::Format(e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&content);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            // Declarations, comments, processing instructions, doctype.
            Ok(_) => {}
            Err(e) => {
                return Err(CodecError::Format(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(CodecError::Format(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| CodecError::Format("empty document".into()))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), CodecError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(CodecError::Format(format!(
                "second root element <{}>",
                element.name
            )))
        }
    }
    Ok(())
}

/// Serialize an element tree back to markup.
pub fn write(element: &Element) -> Result<String, CodecError> {
    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, element)?;
    String::from_utf8(writer.into_inner()).map_err(|e| CodecError::Write(e.to_string()))
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), CodecError> {
    check_name(&element.name)?;
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        check_name(key)?;
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() && element.text.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| CodecError::Write(e.to_string()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| CodecError::Write(e.to_string()))?;
    if !element.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(&element.text)))
            .map_err(|e| CodecError::Write(e.to_string()))?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(|e| CodecError::Write(e.to_string()))
}

// ───────────────────────────────────────────────────────────────────
// Decode
// ───────────────────────────────────────────────────────────────────

/// Decode a whole document.
pub fn decode(text: &str) -> Result<FileDocument, CodecError> {
    let root = parse(text)?;
    match root.name.as_str() {
        FILE_TAG => {
            let pages = root
                .children
                .iter()
                .filter(|c| c.name == DIAGRAM_TAG)
                .map(page_from_diagram)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FileDocument {
                kind: RootKind::File,
                attributes: root.attributes.iter().cloned().collect(),
                pages,
            })
        }
        MODEL_TAG => {
            let mut page = Page::new(DEFAULT_PAGE_ID, DEFAULT_PAGE_NAME);
            fill_from_model(&mut page, &root)?;
            Ok(FileDocument {
                kind: RootKind::GraphModel,
                attributes: Attributes::new(),
                pages: vec![page],
            })
        }
        other => Err(CodecError::UnsupportedFormat(other.to_string())),
    }
}

/// Decode the payload of a page insert: a `<diagram>` element, or a file
/// wrapping exactly one.
pub fn decode_page(text: &str) -> Result<Page, CodecError> {
    let root = parse(text)?;
    match root.name.as_str() {
        DIAGRAM_TAG => page_from_diagram(&root),
        FILE_TAG => {
            let diagram = root
                .child(DIAGRAM_TAG)
                .ok_or_else(|| CodecError::Format("file payload without a diagram".into()))?;
            page_from_diagram(diagram)
        }
        other => Err(CodecError::UnsupportedFormat(other.to_string())),
    }
}

fn page_from_diagram(diagram: &Element) -> Result<Page, CodecError> {
    let id = diagram
        .attribute("id")
        .ok_or_else(|| CodecError::Format("diagram without id".into()))?;
    let mut page = Page::new(id, diagram.attribute("name").unwrap_or_default());

    match diagram.child(MODEL_TAG) {
        Some(model) => fill_from_model(&mut page, model)?,
        None if !diagram.text.trim().is_empty() => {
            return Err(CodecError::UnsupportedElement(format!(
                "compressed diagram '{}'",
                page.id
            )))
        }
        None => {}
    }
    Ok(page)
}

fn fill_from_model(page: &mut Page, model: &Element) -> Result<(), CodecError> {
    page.model = model.attributes.iter().cloned().collect();
    let Some(root) = model.child(ROOT_TAG) else {
        return Ok(());
    };

    for child in &root.children {
        if child.name != CELL_TAG {
            return Err(CodecError::UnsupportedElement(format!(
                "<{}> in page '{}'",
                child.name, page.id
            )));
        }
        page.shapes.push(shape_from_cell(child)?);
    }
    Ok(())
}

fn shape_from_cell(cell: &Element) -> Result<Shape, CodecError> {
    let mut shape = Shape::new(
        cell.attribute("id")
            .ok_or_else(|| CodecError::Format("cell without id".into()))?,
    );
    for (key, value) in &cell.attributes {
        if key != "id" {
            shape.attributes.insert(key.clone(), value.clone());
        }
    }
    for child in &cell.children {
        if child.name == GEOMETRY_KEY {
            shape
                .attributes
                .insert(GEOMETRY_KEY.to_string(), write(child)?);
        } else {
            log::debug!("cell '{}': dropping child <{}>", shape.id, child.name);
        }
    }
    Ok(shape)
}

// ───────────────────────────────────────────────────────────────────
// Encode
// ───────────────────────────────────────────────────────────────────

/// Encode a whole document, reproducing the root kind it was decoded from.
pub fn encode(document: &FileDocument) -> Result<String, CodecError> {
    let root = match (document.kind, document.pages.as_slice()) {
        (RootKind::GraphModel, [page]) => model_element(page),
        _ => {
            let mut file = Element::new(FILE_TAG);
            file.attributes = sorted(&document.attributes);
            file.children = document.pages.iter().map(diagram_element).collect();
            file
        }
    };
    write(&root)
}

/// Encode a page as the payload of a page insert.
pub fn encode_page(page: &Page) -> Result<String, CodecError> {
    write(&diagram_element(page))
}

fn diagram_element(page: &Page) -> Element {
    let mut diagram = Element::new(DIAGRAM_TAG);
    diagram.attributes = vec![
        ("id".to_string(), page.id.clone()),
        ("name".to_string(), page.name.clone()),
    ];
    diagram.children.push(model_element(page));
    diagram
}

fn model_element(page: &Page) -> Element {
    let mut root = Element::new(ROOT_TAG);
    root.children = page.shapes.iter().map(cell_element).collect();

    let mut model = Element::new(MODEL_TAG);
    model.attributes = sorted(&page.model);
    model.children.push(root);
    model
}

fn cell_element(shape: &Shape) -> Element {
    let mut cell = Element::new(CELL_TAG);
    cell.attributes.push(("id".to_string(), shape.id.clone()));
    for (key, value) in &shape.attributes {
        if key != GEOMETRY_KEY && key != "id" {
            cell.attributes.push((key.clone(), value.clone()));
        }
    }
    if let Some(geometry) = shape.geometry() {
        match parse(geometry) {
            Ok(element) => cell.children.push(element),
            Err(e) => log::warn!("cell '{}': dropping unreadable geometry: {e}", shape.id),
        }
    }
    cell
}

fn sorted(attributes: &Attributes) -> Vec<(String, String)> {
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Element and attribute names must read back as the same name.
fn check_name(name: &str) -> Result<(), CodecError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CodecError::Write(format!("'{name}' is not a valid XML name")))
    }
}
