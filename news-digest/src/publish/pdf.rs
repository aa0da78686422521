use super::markup::{Block, Emphasis, Span};
use super::{ArticleSection, Edition, Renderer};
use crate::types::{DigestError, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::path::Path;
use tracing::{debug, warn};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 40.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const IMAGE_MAX_WIDTH: f32 = 400.0;
const BODY_SIZE: f32 = 11.0;
const BULLET_INDENT: f32 = 16.0;

const BLACK: [f32; 3] = [0.0, 0.0, 0.0];
const GREY: [f32; 3] = [0.4, 0.4, 0.4];
const LINK_BLUE: [f32; 3] = [0.05, 0.25, 0.6];

pub const DETAILED_NEWS: &str = "Detailed News";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
    Italic,
}

impl Font {
    const ALL: [Font; 3] = [Font::Regular, Font::Bold, Font::Italic];

    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Italic => "F3",
        }
    }

    fn base_font(self) -> &'static str {
        match self {
            Font::Regular => "Helvetica",
            Font::Bold => "Helvetica-Bold",
            Font::Italic => "Helvetica-Oblique",
        }
    }

    fn for_emphasis(self, emphasis: Emphasis) -> Font {
        match (self, emphasis) {
            (Font::Bold, _) => Font::Bold,
            (_, Emphasis::Bold) => Font::Bold,
            (_, Emphasis::Italic) => Font::Italic,
            (base, Emphasis::Plain) => base,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TextStyle {
    size: f32,
    font: Font,
    indent: f32,
    color: [f32; 3],
}

impl TextStyle {
    fn body() -> Self {
        Self {
            size: BODY_SIZE,
            font: Font::Regular,
            indent: 0.0,
            color: BLACK,
        }
    }

    fn heading(size: f32) -> Self {
        Self {
            size,
            font: Font::Bold,
            ..Self::body()
        }
    }
}

/// Approximate advance width of `c` in Helvetica, in ems.
fn char_width(c: char) -> f32 {
    match c {
        'i' | 'j' | 'l' | '.' | ',' | '\'' | '!' | '|' | ':' | ';' => 0.25,
        ' ' | 'f' | 't' | 'r' | 'I' | '(' | ')' | '-' | '[' | ']' => 0.33,
        'm' | 'w' | 'M' | 'W' | '@' => 0.85,
        'A'..='Z' => 0.68,
        '0'..='9' => 0.56,
        _ => 0.53,
    }
}

fn text_width(text: &str, font: Font, size: f32) -> f32 {
    let factor = if font == Font::Bold { 1.06 } else { 1.0 };
    text.chars().map(char_width).sum::<f32>() * size * factor
}

/// Encodes text for the standard fonts' WinAnsiEncoding. Characters outside
/// the code page become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    let mut replaced = 0;
    let bytes: Vec<u8> = text
        .chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            '\t' => b' ',
            _ => {
                replaced += 1;
                b'?'
            }
        })
        .collect();
    if replaced > 0 {
        debug!("{} characters outside WinAnsiEncoding replaced in {:?}", replaced, text);
    }
    bytes
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn real(value: f32) -> Object {
    Object::Real(value.into())
}

#[derive(Default)]
struct PageDraft {
    ops: Vec<Operation>,
    images: Vec<(String, ObjectId)>,
    links: Vec<([f32; 4], String)>,
}

struct Word {
    text: String,
    font: Font,
    link: Option<String>,
}

struct OutlineMark {
    title: String,
    page: usize,
    top: f32,
}

/// Lays out content top to bottom, breaking pages as needed.
struct Layout<'a> {
    doc: &'a mut Document,
    finished: Vec<PageDraft>,
    current: PageDraft,
    y: f32,
    image_count: usize,
}

impl<'a> Layout<'a> {
    fn new(doc: &'a mut Document) -> Self {
        Self {
            doc,
            finished: Vec::new(),
            current: PageDraft::default(),
            y: PAGE_HEIGHT - MARGIN,
            image_count: 0,
        }
    }

    fn page_index(&self) -> usize {
        self.finished.len()
    }

    fn page_break(&mut self) {
        self.finished.push(std::mem::take(&mut self.current));
        self.y = PAGE_HEIGHT - MARGIN;
    }

    fn ensure_space(&mut self, height: f32) {
        if self.y - height < MARGIN && self.y < PAGE_HEIGHT - MARGIN {
            self.page_break();
        }
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }

    fn into_pages(mut self) -> Vec<PageDraft> {
        self.finished.push(self.current);
        self.finished
    }

    fn write_spans(&mut self, spans: &[Span], style: TextStyle, link: Option<&str>, marker: Option<&str>) {
        let words: Vec<Word> = spans
            .iter()
            .flat_map(|span| {
                let font = style.font.for_emphasis(span.emphasis);
                let link = span.link.as_deref().or(link).map(str::to_string);
                span.text.split_whitespace().map(move |w| Word {
                    text: w.to_string(),
                    font,
                    link: link.clone(),
                })
            })
            .collect();

        let lines = wrap(words, style.size, CONTENT_WIDTH - style.indent);
        for (i, line) in lines.iter().enumerate() {
            let marker = if i == 0 { marker } else { None };
            self.draw_line(line, style, marker);
        }
    }

    fn write_text(&mut self, text: &str, style: TextStyle, link: Option<&str>) {
        self.write_spans(&[Span::plain(text)], style, link, None);
    }

    fn draw_line(&mut self, line: &[Word], style: TextStyle, marker: Option<&str>) {
        let line_height = style.size * 1.4;
        self.ensure_space(line_height);
        let baseline = self.y - style.size;
        let start_x = MARGIN + style.indent;

        let [r, g, b] = style.color;
        self.current
            .ops
            .push(Operation::new("rg", vec![real(r), real(g), real(b)]));

        if let Some(marker) = marker {
            let marker_x = (start_x - text_width(marker, Font::Regular, style.size) - 4.0).max(MARGIN);
            self.push_text(marker, Font::Regular, style.size, marker_x, baseline);
        }

        // Runs of words sharing a font and link are drawn together.
        let mut x = start_x;
        let mut i = 0;
        while i < line.len() {
            let font = line[i].font;
            let link = line[i].link.as_deref();
            let mut run = String::new();
            while i < line.len() && line[i].font == font && line[i].link.as_deref() == link {
                if !run.is_empty() {
                    run.push(' ');
                }
                run.push_str(&line[i].text);
                i += 1;
            }
            if i < line.len() {
                run.push(' ');
            }
            self.push_text(&run, font, style.size, x, baseline);
            let width = text_width(&run, font, style.size);
            if let Some(url) = link {
                self.current
                    .links
                    .push(([x, baseline - 3.0, x + width, baseline + style.size], url.to_string()));
            }
            x += width;
        }
        self.y -= line_height;
    }

    fn push_text(&mut self, text: &str, font: Font, size: f32, x: f32, y: f32) {
        let ops = &mut self.current.ops;
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new("Tf", vec![font.resource().into(), real(size)]));
        ops.push(Operation::new("Td", vec![real(x), real(y)]));
        ops.push(Operation::new("Tj", vec![Object::string_literal(win_ansi(text))]));
        ops.push(Operation::new("ET", vec![]));
    }

    fn draw_block(&mut self, block: &Block) {
        match block {
            Block::Heading { level, spans } => {
                let size = match level {
                    1 => 18.0,
                    2 => 15.0,
                    _ => 13.0,
                };
                self.gap(6.0);
                self.write_spans(spans, TextStyle::heading(size), None, None);
                self.gap(2.0);
            }
            Block::Paragraph(spans) => {
                self.write_spans(spans, TextStyle::body(), None, None);
                self.gap(6.0);
            }
            Block::Bullet(spans) => {
                let style = TextStyle {
                    indent: BULLET_INDENT,
                    ..TextStyle::body()
                };
                self.write_spans(spans, style, None, Some("•"));
                self.gap(2.0);
            }
            Block::Numbered { number, spans } => {
                let style = TextStyle {
                    indent: BULLET_INDENT,
                    ..TextStyle::body()
                };
                let marker = format!("{number}.");
                self.write_spans(spans, style, None, Some(marker.as_str()));
                self.gap(2.0);
            }
            Block::Image { path, .. } => self.draw_image(path),
        }
    }

    /// Embeds the image scaled to at most `IMAGE_MAX_WIDTH`, keeping its
    /// aspect ratio. Undecodable images are skipped.
    fn draw_image(&mut self, path: &Path) {
        let decoded = match image::open(path) {
            Ok(decoded) => decoded.to_rgb8(),
            Err(e) => {
                warn!("Skipping image {} in PDF: {}", path.display(), e);
                return;
            }
        };
        let (width_px, height_px) = decoded.dimensions();
        if width_px == 0 || height_px == 0 {
            return;
        }

        let mut width = (width_px as f32).min(IMAGE_MAX_WIDTH);
        let mut height = width * height_px as f32 / width_px as f32;
        let max_height = PAGE_HEIGHT - 2.0 * MARGIN;
        if height > max_height {
            width *= max_height / height;
            height = max_height;
        }

        self.ensure_space(height + 8.0);

        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(width_px as i64),
                "Height" => Object::Integer(height_px as i64),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
            },
            decoded.into_raw(),
        );
        let image_id = self.doc.add_object(stream);
        self.image_count += 1;
        let name = format!("Im{}", self.image_count);

        let x = MARGIN + (CONTENT_WIDTH - width) / 2.0;
        let bottom = self.y - height;
        let ops = &mut self.current.ops;
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![real(width), real(0.0), real(0.0), real(height), real(x), real(bottom)],
        ));
        ops.push(Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]));
        ops.push(Operation::new("Q", vec![]));
        self.current.images.push((name, image_id));

        self.y = bottom - 8.0;
    }

    fn draw_divider(&mut self) {
        let style = TextStyle {
            color: GREY,
            size: 9.0,
            ..TextStyle::body()
        };
        let count = (CONTENT_WIDTH / text_width("_", Font::Regular, style.size)) as usize;
        self.gap(4.0);
        self.write_text(&"_".repeat(count), style, None);
        self.gap(10.0);
    }

    fn draw_article(&mut self, article: &ArticleSection) -> OutlineMark {
        self.ensure_space(60.0);
        let mark = OutlineMark {
            title: article.title.clone(),
            page: self.page_index(),
            top: self.y,
        };

        let title_style = TextStyle {
            color: LINK_BLUE,
            ..TextStyle::heading(15.0)
        };
        self.write_text(&article.title, title_style, Some(&article.url));

        let meta_style = TextStyle {
            size: 9.0,
            font: Font::Italic,
            color: GREY,
            ..TextStyle::body()
        };
        self.write_text(&article.meta_line(), meta_style, None);
        self.gap(6.0);

        for block in &article.blocks {
            self.draw_block(block);
        }

        self.draw_divider();
        mark
    }
}

fn wrap(words: Vec<Word>, size: f32, width: f32) -> Vec<Vec<Word>> {
    let space = text_width(" ", Font::Regular, size);
    let mut lines = Vec::new();
    let mut line: Vec<Word> = Vec::new();
    let mut line_width = 0.0;

    for word in words.into_iter().flat_map(|w| split_overlong(w, size, width)) {
        let word_width = text_width(&word.text, word.font, size);
        let needed = if line.is_empty() {
            word_width
        } else {
            line_width + space + word_width
        };
        if needed > width && !line.is_empty() {
            lines.push(std::mem::take(&mut line));
            line_width = word_width;
        } else {
            line_width = needed;
        }
        line.push(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Cuts a word wider than `width` (a long URL, say) into pieces that fit.
fn split_overlong(word: Word, size: f32, width: f32) -> Vec<Word> {
    if text_width(&word.text, word.font, size) <= width {
        return vec![word];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for c in word.text.chars() {
        current.push(c);
        if current.chars().count() > 1 && text_width(&current, word.font, size) > width {
            current.pop();
            pieces.push(Word {
                text: std::mem::take(&mut current),
                font: word.font,
                link: word.link.clone(),
            });
            current.push(c);
        }
    }
    if !current.is_empty() {
        pieces.push(Word { text: current, ..word });
    }
    pieces
}

/// A4 PDF with the briefing first, then one linked, bookmarked section per
/// article under a "Detailed News" outline root.
#[derive(Debug, Default)]
pub struct PdfRenderer;

impl PdfRenderer {
    pub fn new() -> Self {
        Self
    }

    fn build(&self, edition: &Edition) -> Result<Document> {
        let mut doc = Document::with_version("1.5");

        let (pages, detailed_mark, marks) = {
            let mut layout = Layout::new(&mut doc);

            layout.write_text("News Digest", TextStyle::heading(22.0), None);
            layout.write_text(
                &format!("Edition of {}", edition.date.format("%d/%m/%Y")),
                TextStyle {
                    font: Font::Italic,
                    color: GREY,
                    ..TextStyle::body()
                },
                None,
            );
            layout.gap(12.0);

            for block in &edition.briefing {
                layout.draw_block(block);
            }

            layout.page_break();
            let detailed_mark = OutlineMark {
                title: DETAILED_NEWS.to_string(),
                page: layout.page_index(),
                top: layout.y,
            };
            layout.write_text(DETAILED_NEWS, TextStyle::heading(20.0), None);
            layout.gap(10.0);

            let marks: Vec<OutlineMark> = edition
                .articles
                .iter()
                .map(|article| layout.draw_article(article))
                .collect();

            (layout.into_pages(), detailed_mark, marks)
        };

        let mut fonts = Dictionary::new();
        for font in Font::ALL {
            let font_id = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => font.base_font(),
                "Encoding" => "WinAnsiEncoding",
            });
            fonts.set(font.resource(), font_id);
        }

        let pages_id = doc.new_object_id();
        let mut page_ids = Vec::with_capacity(pages.len());
        for draft in pages {
            let content = Content { operations: draft.ops };
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));

            let mut xobjects = Dictionary::new();
            for (name, id) in &draft.images {
                xobjects.set(name.as_str(), *id);
            }

            let mut annotations = Vec::with_capacity(draft.links.len());
            for ([x1, y1, x2, y2], url) in &draft.links {
                let annotation = doc.add_object(dictionary! {
                    "Type" => "Annot",
                    "Subtype" => "Link",
                    "Rect" => vec![real(*x1), real(*y1), real(*x2), real(*y2)],
                    "Border" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(0)],
                    "A" => dictionary! {
                        "S" => "URI",
                        "URI" => Object::string_literal(url.as_str()),
                    },
                });
                annotations.push(Object::Reference(annotation));
            }

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![real(0.0), real(0.0), real(PAGE_WIDTH), real(PAGE_HEIGHT)],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => fonts.clone(),
                    "XObject" => xobjects,
                },
                "Annots" => annotations,
            });
            page_ids.push(page_id);
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
                "Count" => Object::Integer(page_ids.len() as i64),
            }),
        );

        let outlines_id = write_outline(&mut doc, &page_ids, &detailed_mark, &marks)?;

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "Outlines" => outlines_id,
            "PageMode" => "UseOutlines",
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => text_string(&edition.title),
            "Creator" => Object::string_literal("news-digest"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        doc.compress();
        Ok(doc)
    }
}

fn destination(page_ids: &[ObjectId], mark: &OutlineMark) -> Result<Object> {
    let page_id = page_ids
        .get(mark.page)
        .copied()
        .ok_or_else(|| DigestError::General(format!("outline target page {} missing", mark.page)))?;
    Ok(Object::Array(vec![
        Object::Reference(page_id),
        "XYZ".into(),
        Object::Null,
        real(mark.top),
        Object::Null,
    ]))
}

/// Outline tree: a single "Detailed News" root with one child per article.
fn write_outline(
    doc: &mut Document,
    page_ids: &[ObjectId],
    root: &OutlineMark,
    children: &[OutlineMark],
) -> Result<ObjectId> {
    let outlines_id = doc.new_object_id();
    let root_id = doc.new_object_id();
    let child_ids: Vec<ObjectId> = children.iter().map(|_| doc.new_object_id()).collect();

    for (i, mark) in children.iter().enumerate() {
        let mut item = dictionary! {
            "Title" => text_string(&mark.title),
            "Parent" => root_id,
            "Dest" => destination(page_ids, mark)?,
        };
        if i > 0 {
            item.set("Prev", child_ids[i - 1]);
        }
        if let Some(next) = child_ids.get(i + 1) {
            item.set("Next", *next);
        }
        doc.objects.insert(child_ids[i], Object::Dictionary(item));
    }

    let mut root_item = dictionary! {
        "Title" => text_string(&root.title),
        "Parent" => outlines_id,
        "Dest" => destination(page_ids, root)?,
        "Count" => Object::Integer(child_ids.len() as i64),
    };
    if let (Some(first), Some(last)) = (child_ids.first(), child_ids.last()) {
        root_item.set("First", *first);
        root_item.set("Last", *last);
    }
    doc.objects.insert(root_id, Object::Dictionary(root_item));

    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => root_id,
            "Last" => root_id,
            "Count" => Object::Integer(child_ids.len() as i64 + 1),
        }),
    );
    Ok(outlines_id)
}

impl Renderer for PdfRenderer {
    fn extension(&self) -> &'static str {
        "pdf"
    }

    fn render(&self, edition: &Edition, path: &Path) -> Result<()> {
        let mut doc = self.build(edition)?;
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)
            .map_err(|e| DigestError::General(format!("PDF serialization failed: {}", e)))?;
        std::fs::write(path, &buffer)?;
        debug!("PDF written to {} ({} bytes)", path.display(), buffer.len());
        Ok(())
    }
}
