//! Layout template JSON for the PDF SDK, built from Textract layout detections.
//!
//! Detections arrive with bounding boxes normalized to the rendered page
//! image (0..1, origin top-left). The template wants PDF user-space
//! rectangles (origin bottom-left) written as `[left, bottom, right, top]`
//! strings.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

/// Pixels added around top-level regions so glyph edges stay inside.
const REGION_PADDING: f64 = 2.0;

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("zoom must be positive, got {0}")]
    BadZoom(f64),

    #[error("page {page} has an invalid size {width}x{height}")]
    BadPageSize { page: u32, width: f64, height: f64 },

    #[error("page {page}: table region has no table data")]
    MissingTable { page: u32 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutDocument {
    pub pages: Vec<LayoutPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutPage {
    pub page_number: u32,
    /// Page size in PDF points.
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub regions: Vec<LayoutRegion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutRegion {
    pub layout_type: LayoutType,
    pub bbox: NormBox,
    pub confidence: f64,
    /// List items for `LAYOUT_LIST`.
    #[serde(default)]
    pub children: Vec<LayoutRegion>,
    #[serde(default)]
    pub table: Option<TableData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct NormBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableData {
    pub row_count: u32,
    pub column_count: u32,
    #[serde(default)]
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableCell {
    pub row_index: u32,
    pub col_index: u32,
    #[serde(default = "one")]
    pub row_span: u32,
    #[serde(default = "one")]
    pub col_span: u32,
    #[serde(default)]
    pub is_column_header: bool,
    pub confidence: f64,
    pub bbox: NormBox,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum LayoutType {
    Text,
    Title,
    Header,
    Footer,
    SectionHeader,
    PageNumber,
    List,
    Figure,
    Table,
    KeyValue,
    Other(String),
}

impl From<String> for LayoutType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "LAYOUT_TEXT" => LayoutType::Text,
            "LAYOUT_TITLE" => LayoutType::Title,
            "LAYOUT_HEADER" => LayoutType::Header,
            "LAYOUT_FOOTER" => LayoutType::Footer,
            "LAYOUT_SECTION_HEADER" => LayoutType::SectionHeader,
            "LAYOUT_PAGE_NUMBER" => LayoutType::PageNumber,
            "LAYOUT_LIST" => LayoutType::List,
            "LAYOUT_FIGURE" => LayoutType::Figure,
            "LAYOUT_TABLE" => LayoutType::Table,
            "LAYOUT_KEY_VALUE" => LayoutType::KeyValue,
            _ => LayoutType::Other(s),
        }
    }
}

impl LayoutType {
    /// Lower-case label used in element comments, e.g. `section header` -> `header`.
    fn label(&self) -> String {
        let raw = match self {
            LayoutType::Text => "LAYOUT_TEXT",
            LayoutType::Title => "LAYOUT_TITLE",
            LayoutType::Header => "LAYOUT_HEADER",
            LayoutType::Footer => "LAYOUT_FOOTER",
            LayoutType::SectionHeader => "LAYOUT_SECTION_HEADER",
            LayoutType::PageNumber => "LAYOUT_PAGE_NUMBER",
            LayoutType::List => "LAYOUT_LIST",
            LayoutType::Figure => "LAYOUT_FIGURE",
            LayoutType::Table => "LAYOUT_TABLE",
            LayoutType::KeyValue => "LAYOUT_KEY_VALUE",
            LayoutType::Other(s) => s,
        };
        raw.rsplit('_').next().unwrap_or(raw).to_lowercase()
    }
}

/// Rectangle in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRect {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl PageRect {
    fn to_json(self) -> Value {
        json!([
            fmt_coord(self.left),
            fmt_coord(self.bottom),
            fmt_coord(self.right),
            fmt_coord(self.top)
        ])
    }
}

/// Shortest round-trip form with a `.0` on whole numbers, e.g. `"9.0"`, `"40.5"`.
fn fmt_coord(v: f64) -> String {
    format!("{:?}", v)
}

/// An unrotated page rendered at `zoom`.
#[derive(Debug, Clone, Copy)]
pub struct PageView {
    pub width: f64,
    pub height: f64,
    pub zoom: f64,
}

impl PageView {
    pub fn device_width(&self) -> f64 {
        self.width * self.zoom
    }

    pub fn device_height(&self) -> f64 {
        self.height * self.zoom
    }

    /// Normalized box -> device pixels (truncated like the renderer does) -> page space.
    pub fn to_page(&self, b: &NormBox, padding: f64) -> PageRect {
        let (dw, dh) = (self.device_width(), self.device_height());
        let left = (b.x * dw - padding).trunc();
        let top = (b.y * dh - padding).trunc();
        let right = ((b.x + b.width) * dw + padding).trunc();
        let bottom = ((b.y + b.height) * dh + padding).trunc();

        PageRect {
            left: left / self.zoom,
            right: right / self.zoom,
            top: self.height - top / self.zoom,
            bottom: self.height - bottom / self.zoom,
        }
    }
}

/// Whole percent, halves rounded to even (`0.125` -> `12`).
fn percent(confidence: f64) -> i64 {
    (confidence * 100.0).round_ties_even() as i64
}

fn header_or_footer(view: &PageView, rect: &PageRect) -> &'static str {
    if rect.top < view.height / 2.0 {
        "footer"
    } else {
        "header"
    }
}

fn list_items(view: &PageView, list: &LayoutRegion) -> Vec<Value> {
    list.children
        .iter()
        .map(|item| {
            let rect = view.to_page(&item.bbox, 0.0);
            json!({
                "bbox": rect.to_json(),
                "comment": format!("List Item {}%", percent(item.confidence)),
                "type": "pde_text",
            })
        })
        .collect()
}

fn table_cells(view: &PageView, table: &TableData) -> Vec<Value> {
    let mut cells: Vec<Value> = table
        .cells
        .iter()
        .map(|cell| {
            let rect = view.to_page(&cell.bbox, 0.0);
            json!({
                "bbox": rect.to_json(),
                "cell_column": (cell.col_index + 1).to_string(),
                "cell_column_span": cell.col_span.to_string(),
                "cell_row": (cell.row_index + 1).to_string(),
                "cell_row_span": cell.row_span.to_string(),
                "cell_header": cell.is_column_header,
                "comment": format!(
                    "Cell Pos: [{}, {}] Span: [{}, {}] Confidence: {}%",
                    cell.row_index + 1,
                    cell.col_index + 1,
                    cell.row_span,
                    cell.col_span,
                    percent(cell.confidence)
                ),
                "type": "pde_cell",
            })
        })
        .collect();

    // Grid positions with no detected cell still need an entry.
    for row in 0..table.row_count {
        for col in 0..table.column_count {
            let covered = table
                .cells
                .iter()
                .any(|c| c.row_index == row && c.col_index == col);
            if !covered {
                cells.push(json!({
                    "bbox": ["0", "0", "0", "0"],
                    "cell_column": (col + 1).to_string(),
                    "cell_column_span": "0",
                    "cell_row": (row + 1).to_string(),
                    "cell_row_span": "0",
                    "cell_header": "false",
                    "comment": format!("Cell Pos: [{}, {}] Span: [0, 0] Added by processing", row + 1, col + 1),
                    "type": "pde_cell",
                }));
            }
        }
    }
    cells
}

fn element(view: &PageView, page: u32, region: &LayoutRegion) -> Result<(PageRect, Value), LayoutError> {
    let rect = view.to_page(&region.bbox, REGION_PADDING);
    let mut el = Map::new();
    el.insert("bbox".to_string(), rect.to_json());
    el.insert(
        "comment".to_string(),
        Value::String(format!("{} {}%", region.layout_type.label(), percent(region.confidence))),
    );

    let mut set = |k: &str, v: Value| {
        el.insert(k.to_string(), v);
    };
    match &region.layout_type {
        LayoutType::Figure => set("type", json!("pde_image")),
        LayoutType::Footer => {
            set("flag", json!("footer|artifact"));
            set("type", json!("pde_text"));
        }
        LayoutType::Header => {
            set("flag", json!("header|artifact"));
            set("type", json!("pde_text"));
        }
        LayoutType::List => {
            set(
                "element_template",
                json!({
                    "template": {
                        "element_create": [{ "elements": list_items(view, region), "statement": "$if" }],
                    },
                }),
            );
            set("type", json!("pde_list"));
        }
        LayoutType::PageNumber => {
            set("flag", json!(format!("{}|artifact", header_or_footer(view, &rect))));
            set("type", json!("pde_text"));
        }
        LayoutType::SectionHeader => {
            set("heading", json!("h1"));
            set("type", json!("pde_text"));
        }
        LayoutType::Table => {
            let table = region.table.as_ref().ok_or(LayoutError::MissingTable { page })?;
            set(
                "element_template",
                json!({
                    "template": {
                        "element_create": [{
                            "elements": table_cells(view, table),
                            "query": {},
                            "statement": "$if",
                        }],
                    },
                }),
            );
            set("row_num", json!(table.row_count));
            set("col_num", json!(table.column_count));
            set("type", json!("pde_table"));
        }
        LayoutType::Title => {
            set("tag", json!("Title"));
            set("type", json!("pde_text"));
        }
        LayoutType::Text | LayoutType::KeyValue | LayoutType::Other(_) => set("type", json!("pde_text")),
    }

    Ok((rect, Value::Object(el)))
}

/// Template elements for one page, top to bottom then left to right.
pub fn page_elements(page: &LayoutPage, zoom: f64) -> Result<Vec<Value>, LayoutError> {
    if !(page.width > 0.0 && page.height > 0.0) {
        return Err(LayoutError::BadPageSize {
            page: page.page_number,
            width: page.width,
            height: page.height,
        });
    }
    let view = PageView {
        width: page.width,
        height: page.height,
        zoom,
    };

    let mut elements = page
        .regions
        .iter()
        .map(|r| element(&view, page.page_number, r))
        .collect::<Result<Vec<_>, _>>()?;

    elements.sort_by(|(a, _), (b, _)| {
        b.top
            .partial_cmp(&a.top)
            .unwrap_or(Ordering::Equal)
            .then(a.left.partial_cmp(&b.left).unwrap_or(Ordering::Equal))
    });
    Ok(elements.into_iter().map(|(_, v)| v).collect())
}

#[derive(Debug, Clone)]
pub struct TemplateMeta {
    /// Version of the action, taken from the shipped descriptor.
    pub tool_version: String,
    pub sdk_version: Option<String>,
    pub created: NaiveDate,
}

/// Whole-document template JSON.
pub fn build_template(doc: &LayoutDocument, zoom: f64, meta: &TemplateMeta) -> Result<Value, LayoutError> {
    if !(zoom > 0.0) {
        return Err(LayoutError::BadZoom(zoom));
    }

    let mut pages = Vec::with_capacity(doc.pages.len());
    for page in &doc.pages {
        pages.push(json!({
            "comment": format!("Page {}", page.page_number),
            "elements": page_elements(page, zoom)?,
            "query": { "$and": [{ "$page_num": page.page_number }] },
            "statement": "$if",
        }));
    }

    let date = meta.created.format("%Y-%m-%d").to_string();
    let mut metadata = json!({
        "author": format!("AutoTag (Textract) {}", meta.tool_version),
        "created": date,
        "modified": date,
        "notes": format!("Created using Amazon Textract and PDFix zoom: {:?}", zoom),
    });
    if let Some(sdk) = &meta.sdk_version {
        metadata["sdk_version"] = json!(sdk);
    }
    metadata["version"] = json!("1");

    Ok(json!({
        "metadata": metadata,
        "template": {
            "element_create": pages,
            "pagemap": [{ "graphic_table_detect": "0", "statement": "$if", "text_table_detect": "0" }],
        },
    }))
}
