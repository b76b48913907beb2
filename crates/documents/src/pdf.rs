//! Serializes laid-out pages with lopdf.
//!
//! Output uses the base-14 Helvetica faces with WinAnsiEncoding and uncompressed
//! content streams, and carries no timestamps or document ids, so identical input
//! yields identical bytes.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};

use crate::layout::{DrawOp, Font, Page, Rgb, PAGE_HEIGHT, PAGE_WIDTH};
use crate::DocumentError;

const REGULAR_FONT: &str = "F1";
const BOLD_FONT: &str = "F2";
const WATERMARK_STATE: &str = "GSWatermark";
const WATERMARK_SIZE: f32 = 110.0;
const WATERMARK_GRAY: f32 = 0.55;
const WATERMARK_OPACITY: f32 = 0.18;

pub fn write_pdf(pages: &[Page], watermark: Option<&str>) -> Result<Vec<u8>, DocumentError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(font_dictionary("Helvetica"));
    let bold_id = doc.add_object(font_dictionary("Helvetica-Bold"));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            REGULAR_FONT => regular_id,
            BOLD_FONT => bold_id,
        },
        "ExtGState" => dictionary! {
            WATERMARK_STATE => dictionary! {
                "Type" => "ExtGState",
                "ca" => Object::Real(WATERMARK_OPACITY),
                "CA" => Object::Real(WATERMARK_OPACITY),
            },
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let mut operations = page_operations(page);
        if let Some(label) = watermark {
            operations.extend(watermark_operations(label));
        }
        let content = Content { operations }
            .encode()
            .map_err(|error| DocumentError::Pdf(error.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(PAGE_WIDTH),
                Object::Real(PAGE_HEIGHT),
            ],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|error| DocumentError::Pdf(error.to_string()))?;
    Ok(bytes)
}

fn font_dictionary(base_font: &str) -> lopdf::Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
        "Encoding" => "WinAnsiEncoding",
    }
}

fn page_operations(page: &Page) -> Vec<Operation> {
    let mut operations = Vec::with_capacity(page.ops.len() * 6);
    for op in &page.ops {
        match op {
            DrawOp::Rect { x, y, width, height, color } => {
                operations.push(fill(*color));
                operations.push(Operation::new(
                    "re",
                    vec![real(*x), real(*y), real(*width), real(*height)],
                ));
                operations.push(Operation::new("f", vec![]));
            }
            DrawOp::Text { x, y, size, font, color, text } => {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec![font_name(*font), real(*size)]));
                operations.push(fill(*color));
                operations.push(Operation::new("Td", vec![real(*x), real(*y)]));
                operations.push(Operation::new("Tj", vec![literal(text)]));
                operations.push(Operation::new("ET", vec![]));
            }
        }
    }
    operations
}

/// Large translucent label drawn diagonally across the page, above the content.
fn watermark_operations(label: &str) -> Vec<Operation> {
    let (cos, sin) = (std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2);
    let half_width = crate::layout::text_width(label, WATERMARK_SIZE, Font::Bold) / 2.0;
    // Start point chosen so the rotated label is centred on the page.
    let x = PAGE_WIDTH / 2.0 - half_width * cos + (WATERMARK_SIZE / 3.0) * sin;
    let y = PAGE_HEIGHT / 2.0 - half_width * sin - (WATERMARK_SIZE / 3.0) * cos;

    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(WATERMARK_STATE.as_bytes().to_vec())]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![font_name(Font::Bold), real(WATERMARK_SIZE)]),
        Operation::new(
            "rg",
            vec![real(WATERMARK_GRAY), real(WATERMARK_GRAY), real(WATERMARK_GRAY)],
        ),
        Operation::new("Tm", vec![real(cos), real(sin), real(-sin), real(cos), real(x), real(y)]),
        Operation::new("Tj", vec![literal(label)]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]
}

fn fill(color: Rgb) -> Operation {
    Operation::new("rg", vec![real(color.0), real(color.1), real(color.2)])
}

fn font_name(font: Font) -> Object {
    let name = match font {
        Font::Regular => REGULAR_FONT,
        Font::Bold => BOLD_FONT,
    };
    Object::Name(name.as_bytes().to_vec())
}

fn real(value: f32) -> Object {
    Object::Real(value)
}

fn literal(text: &str) -> Object {
    Object::String(encode_win_ansi(text), StringFormat::Literal)
}

/// Maps text onto WinAnsiEncoding. Characters the encoding lacks become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch {
            '\u{20}'..='\u{7e}' => ch as u8,
            '\u{a0}'..='\u{ff}' => ch as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            _ => b'?',
        })
        .collect()
}
