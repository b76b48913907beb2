//! Layout markup and A4 pagination.
//!
//! Markup is line oriented. Each non-blank line is one directive, cells separated by `|`:
//!
//! ```text
//! @brand  <brand mark>                 @title  <document type label>
//! @banner <not-final notice>           @section <heading>
//! @field  <label> | <value>            @text   <paragraph>
//! @table  <header> | <header> | ...    @row    <cell> | <cell> | ...
//! @total  <label> | <value>            @footer <notice printed on every page>
//! @rule
//! ```
//!
//! Lines that do not start with `@` are treated as `@text`.

use crate::DocumentError;

pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;
pub const MARGIN: f32 = 48.0;

const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const CONTENT_TOP: f32 = PAGE_HEIGHT - MARGIN - 56.0;
const CONTENT_BOTTOM: f32 = MARGIN + 34.0;

const BODY_SIZE: f32 = 10.0;
const TABLE_SIZE: f32 = 8.5;
const ROW_HEIGHT: f32 = 18.0;
const CELL_PADDING: f32 = 4.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgb(pub f32, pub f32, pub f32);

/// #E60000
pub const BRAND_RED: Rgb = Rgb(0.902, 0.0, 0.0);
/// #FFF5F5
pub const ROW_TINT: Rgb = Rgb(1.0, 0.961, 0.961);
pub const INK: Rgb = Rgb(0.13, 0.13, 0.13);
pub const MUTED: Rgb = Rgb(0.42, 0.42, 0.42);
pub const HAIRLINE: Rgb = Rgb(0.8, 0.8, 0.8);
pub const WHITE: Rgb = Rgb(1.0, 1.0, 1.0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawOp {
    Text { x: f32, y: f32, size: f32, font: Font, color: Rgb, text: String },
    Rect { x: f32, y: f32, width: f32, height: f32, color: Rgb },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub ops: Vec<DrawOp>,
}

impl Page {
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            DrawOp::Rect { .. } => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Brand(String),
    Title(String),
    Banner(String),
    Section(String),
    Field { label: String, value: String },
    Table { header: Vec<String>, rows: Vec<Vec<String>> },
    Total { label: String, value: String },
    Text(String),
    Footer(String),
    Rule,
}

/// Parses markup into blocks. A row whose cell count differs from its table header
/// fails the whole parse.
pub fn parse_markup(markup: &str) -> Result<Vec<Block>, DocumentError> {
    let mut blocks = Vec::new();
    let mut rows_seen = 0usize;

    for (index, raw) in markup.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let Some(directive) = line.strip_prefix('@') else {
            blocks.push(Block::Text(line.to_string()));
            continue;
        };
        let (keyword, payload) = directive.split_once(char::is_whitespace).unwrap_or((directive, ""));
        let payload = payload.trim();

        let block = match keyword {
            "brand" => Block::Brand(payload.to_string()),
            "title" => Block::Title(payload.to_string()),
            "banner" => Block::Banner(payload.to_string()),
            "section" => Block::Section(payload.to_string()),
            "text" => Block::Text(payload.to_string()),
            "footer" => Block::Footer(payload.to_string()),
            "rule" => Block::Rule,
            "field" | "total" => {
                let (label, value) = payload.split_once('|').ok_or_else(|| DocumentError::Markup {
                    line: line_number,
                    message: format!("`@{keyword}` needs `label | value`"),
                })?;
                let (label, value) = (label.trim().to_string(), value.trim().to_string());
                if keyword == "field" {
                    Block::Field { label, value }
                } else {
                    Block::Total { label, value }
                }
            }
            "table" => Block::Table { header: split_cells(payload), rows: Vec::new() },
            "row" => {
                rows_seen += 1;
                let cells = split_cells(payload);
                match blocks.last_mut() {
                    Some(Block::Table { header, rows }) => {
                        if cells.len() != header.len() {
                            return Err(DocumentError::LineItem {
                                row: rows_seen,
                                expected: header.len(),
                                found: cells.len(),
                            });
                        }
                        rows.push(cells);
                        continue;
                    }
                    _ => {
                        return Err(DocumentError::Markup {
                            line: line_number,
                            message: "`@row` outside of a table".to_string(),
                        })
                    }
                }
            }
            other => {
                return Err(DocumentError::Markup {
                    line: line_number,
                    message: format!("unknown directive `@{other}`"),
                })
            }
        };
        blocks.push(block);
    }

    Ok(blocks)
}

fn split_cells(payload: &str) -> Vec<String> {
    payload.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// Approximate Helvetica advance width in points.
pub fn text_width(text: &str, size: f32, font: Font) -> f32 {
    let units: u32 = text.chars().map(|ch| glyph_units(ch, font)).sum();
    units as f32 * size / 1000.0
}

fn glyph_units(ch: char, font: Font) -> u32 {
    let regular = match ch {
        ' ' | '.' | ',' | ':' | ';' | '!' | '|' | '\'' => 278,
        'i' | 'j' | 'l' => 222,
        'f' | 't' | 'I' | '/' | '(' | ')' | '[' | ']' | '-' => 333,
        'r' => 333,
        'm' | 'M' => 833,
        'w' => 722,
        'W' => 944,
        '%' => 889,
        '0'..='9' | 'a'..='z' | '$' | '?' | '_' => 556,
        'A'..='Z' => 667,
        '@' => 1015,
        _ => 600,
    };
    match font {
        Font::Regular => regular,
        Font::Bold => regular + regular / 18,
    }
}

/// Shortens `text` with an ellipsis so it fits `width`.
fn fit(text: &str, width: f32, size: f32, font: Font) -> String {
    if text_width(text, size, font) <= width {
        return text.to_string();
    }
    let budget = width - text_width("...", size, font);
    let mut kept = String::new();
    for ch in text.chars() {
        let mut candidate = kept.clone();
        candidate.push(ch);
        if text_width(&candidate, size, font) > budget {
            break;
        }
        kept = candidate;
    }
    format!("{}...", kept.trim_end())
}

fn wrap(text: &str, width: f32, size: f32, font: Font) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() { word.to_string() } else { format!("{current} {word}") };
        if text_width(&candidate, size, font) <= width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

struct Chrome {
    brand: String,
    title: String,
    footer: String,
}

struct Cursor<'a> {
    chrome: &'a Chrome,
    pages: Vec<Page>,
    y: f32,
}

impl<'a> Cursor<'a> {
    fn new(chrome: &'a Chrome) -> Self {
        let mut cursor = Self { chrome, pages: Vec::new(), y: CONTENT_TOP };
        cursor.new_page();
        cursor
    }

    fn new_page(&mut self) {
        let mut page = Page::default();
        let baseline = PAGE_HEIGHT - MARGIN - 18.0;
        page.ops.push(text(MARGIN, baseline, 18.0, Font::Bold, BRAND_RED, &self.chrome.brand));
        let title_width = text_width(&self.chrome.title, 11.0, Font::Regular);
        page.ops.push(text(
            PAGE_WIDTH - MARGIN - title_width,
            baseline,
            11.0,
            Font::Regular,
            MUTED,
            &self.chrome.title,
        ));
        page.ops.push(rect(MARGIN, baseline - 14.0, CONTENT_WIDTH, 3.0, BRAND_RED));
        self.pages.push(page);
        self.y = CONTENT_TOP;
    }

    fn ensure(&mut self, height: f32) {
        if self.y - height < CONTENT_BOTTOM {
            self.new_page();
        }
    }

    fn push(&mut self, op: DrawOp) {
        if let Some(page) = self.pages.last_mut() {
            page.ops.push(op);
        }
    }

    fn banner(&mut self, message: &str) {
        self.ensure(30.0);
        self.push(rect(MARGIN, self.y - 20.0, CONTENT_WIDTH, 22.0, BRAND_RED));
        self.push(text(MARGIN + 8.0, self.y - 13.0, 10.0, Font::Bold, WHITE, message));
        self.y -= 32.0;
    }

    fn section(&mut self, heading: &str) {
        // Keep the heading with at least one following line.
        self.ensure(44.0);
        self.y -= 8.0;
        self.push(text(MARGIN, self.y - 12.0, 12.0, Font::Bold, INK, heading));
        self.push(rect(MARGIN, self.y - 17.0, CONTENT_WIDTH, 0.75, BRAND_RED));
        self.y -= 26.0;
    }

    fn field(&mut self, label: &str, value: &str) {
        self.ensure(15.0);
        self.push(text(MARGIN, self.y - 10.0, 9.0, Font::Regular, MUTED, label));
        let value_x = MARGIN + 120.0;
        let value = fit(value, PAGE_WIDTH - MARGIN - value_x, BODY_SIZE, Font::Regular);
        self.push(text(value_x, self.y - 10.0, BODY_SIZE, Font::Regular, INK, &value));
        self.y -= 15.0;
    }

    fn paragraph(&mut self, body: &str) {
        for line in wrap(body, CONTENT_WIDTH, BODY_SIZE, Font::Regular) {
            self.ensure(14.0);
            self.push(text(MARGIN, self.y - 10.0, BODY_SIZE, Font::Regular, INK, &line));
            self.y -= 14.0;
        }
        self.y -= 4.0;
    }

    fn rule(&mut self) {
        self.ensure(10.0);
        self.push(rect(MARGIN, self.y - 5.0, CONTENT_WIDTH, 0.5, HAIRLINE));
        self.y -= 10.0;
    }

    fn table(&mut self, header: &[String], rows: &[Vec<String>]) {
        let columns = TableColumns::measure(header, rows);
        // Header plus first row stay together.
        self.ensure(2.0 * ROW_HEIGHT);
        self.table_header(header, &columns);

        for (index, row) in rows.iter().enumerate() {
            if self.y - ROW_HEIGHT < CONTENT_BOTTOM {
                self.new_page();
                self.table_header(header, &columns);
            }
            if index % 2 == 1 {
                self.push(rect(MARGIN, self.y - ROW_HEIGHT, CONTENT_WIDTH, ROW_HEIGHT, ROW_TINT));
            }
            self.table_cells(row, &columns, Font::Regular, INK);
            self.y -= ROW_HEIGHT;
        }
        self.push(rect(MARGIN, self.y, CONTENT_WIDTH, 0.5, HAIRLINE));
        self.y -= 6.0;
    }

    fn table_header(&mut self, header: &[String], columns: &TableColumns) {
        self.push(rect(MARGIN, self.y - ROW_HEIGHT, CONTENT_WIDTH, ROW_HEIGHT, BRAND_RED));
        self.table_cells(header, columns, Font::Bold, WHITE);
        self.y -= ROW_HEIGHT;
    }

    fn table_cells(&mut self, cells: &[String], columns: &TableColumns, font: Font, color: Rgb) {
        let baseline = self.y - ROW_HEIGHT + 6.0;
        let mut x = MARGIN;
        for ((cell, width), numeric) in cells.iter().zip(&columns.widths).zip(&columns.numeric) {
            let inner = width - 2.0 * CELL_PADDING;
            let shown = fit(cell, inner, TABLE_SIZE, font);
            let offset = if *numeric {
                width - CELL_PADDING - text_width(&shown, TABLE_SIZE, font)
            } else {
                CELL_PADDING
            };
            self.push(text(x + offset, baseline, TABLE_SIZE, font, color, &shown));
            x += width;
        }
    }

    fn total(&mut self, label: &str, value: &str) {
        self.ensure(28.0);
        self.y -= 6.0;
        let right = PAGE_WIDTH - MARGIN;
        let value_width = text_width(value, 12.0, Font::Bold);
        let label_width = text_width(label, 11.0, Font::Bold);
        let block_width = (value_width + label_width + 24.0).max(180.0);
        self.push(rect(right - block_width, self.y - 22.0, block_width, 22.0, ROW_TINT));
        self.push(text(right - block_width + 8.0, self.y - 15.0, 11.0, Font::Bold, INK, label));
        self.push(text(right - 8.0 - value_width, self.y - 15.0, 12.0, Font::Bold, BRAND_RED, value));
        self.y -= 30.0;
    }

    fn finish(mut self) -> Vec<Page> {
        let total = self.pages.len();
        for (index, page) in self.pages.iter_mut().enumerate() {
            page.ops.push(rect(MARGIN, MARGIN + 16.0, CONTENT_WIDTH, 0.5, HAIRLINE));
            let notice = fit(&self.chrome.footer, CONTENT_WIDTH - 80.0, 7.5, Font::Regular);
            page.ops.push(text(MARGIN, MARGIN + 4.0, 7.5, Font::Regular, MUTED, &notice));
            let numbering = format!("Page {} of {}", index + 1, total);
            let width = text_width(&numbering, 7.5, Font::Regular);
            page.ops.push(text(
                PAGE_WIDTH - MARGIN - width,
                MARGIN + 4.0,
                7.5,
                Font::Regular,
                MUTED,
                &numbering,
            ));
        }
        self.pages
    }
}

struct TableColumns {
    widths: Vec<f32>,
    numeric: Vec<bool>,
}

impl TableColumns {
    /// Widths proportional to the longest cell of each column, clamped so one long
    /// product name cannot starve the numeric columns.
    fn measure(header: &[String], rows: &[Vec<String>]) -> Self {
        let weights: Vec<f32> = (0..header.len())
            .map(|column| {
                let longest = std::iter::once(&header[column])
                    .chain(rows.iter().filter_map(|row| row.get(column)))
                    .map(|cell| cell.chars().count())
                    .max()
                    .unwrap_or(1);
                longest.clamp(4, 28) as f32
            })
            .collect();
        let sum: f32 = weights.iter().sum::<f32>().max(1.0);
        let widths = weights.iter().map(|weight| CONTENT_WIDTH * weight / sum).collect();

        let numeric = (0..header.len())
            .map(|column| {
                !rows.is_empty()
                    && rows.iter().all(|row| {
                        row.get(column)
                            .and_then(|cell| cell.chars().next())
                            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-')
                    })
            })
            .collect();

        Self { widths, numeric }
    }
}

fn text(x: f32, y: f32, size: f32, font: Font, color: Rgb, value: &str) -> DrawOp {
    DrawOp::Text { x, y, size, font, color, text: value.to_string() }
}

fn rect(x: f32, y: f32, width: f32, height: f32, color: Rgb) -> DrawOp {
    DrawOp::Rect { x, y, width, height, color }
}

/// Lays blocks out on A4 pages. Brand, title and footer repeat on every page;
/// footers carry `Page X of Y`.
pub fn paginate(blocks: &[Block]) -> Vec<Page> {
    let mut chrome = Chrome { brand: String::new(), title: String::new(), footer: String::new() };
    for block in blocks {
        match block {
            Block::Brand(value) => chrome.brand = value.clone(),
            Block::Title(value) => chrome.title = value.clone(),
            Block::Footer(value) => chrome.footer = value.clone(),
            _ => {}
        }
    }

    let mut cursor = Cursor::new(&chrome);
    for block in blocks {
        match block {
            Block::Brand(_) | Block::Title(_) | Block::Footer(_) => {}
            Block::Banner(message) => cursor.banner(message),
            Block::Section(heading) => cursor.section(heading),
            Block::Field { label, value } => cursor.field(label, value),
            Block::Table { header, rows } => cursor.table(header, rows),
            Block::Total { label, value } => cursor.total(label, value),
            Block::Text(body) => cursor.paragraph(body),
            Block::Rule => cursor.rule(),
        }
    }
    cursor.finish()
}
