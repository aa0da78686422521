//! Block model shared by both renderers, built from the Markdown the
//! reasoning service writes: headings, paragraphs, bullet and numbered
//! items, bold/italic emphasis and links.

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emphasis {
    Plain,
    Bold,
    Italic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub emphasis: Emphasis,
    pub link: Option<String>,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emphasis: Emphasis::Plain,
            link: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, spans: Vec<Span> },
    Paragraph(Vec<Span>),
    Bullet(Vec<Span>),
    Numbered { number: u64, spans: Vec<Span> },
    Image { path: PathBuf, alt: String },
}

/// Converts Markdown into blocks. Headings deeper than `###` are treated as
/// level 3; inline HTML is kept as text and HTML blocks are dropped.
pub fn parse_markup(text: &str) -> Vec<Block> {
    let mut builder = BlockBuilder::default();
    for event in Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH) {
        builder.handle(event);
    }
    builder.flush();
    builder.blocks
}

#[derive(Clone, Copy)]
enum ItemMarker {
    Bullet,
    Number(u64),
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    spans: Vec<Span>,
    heading: Option<u8>,
    /// Next number of each open list; `None` for bullet lists.
    lists: Vec<Option<u64>>,
    item: Option<ItemMarker>,
    bold: usize,
    italic: usize,
    links: Vec<String>,
}

impl BlockBuilder {
    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                self.flush();
                self.heading = Some(heading_level(level));
            }
            Event::End(TagEnd::Heading(_)) => {
                self.flush();
                self.heading = None;
            }
            Event::Start(Tag::List(start)) => {
                self.flush();
                self.lists.push(start);
            }
            Event::End(TagEnd::List(_)) => {
                self.flush();
                self.lists.pop();
            }
            Event::Start(Tag::Item) => {
                self.flush();
                self.item = Some(match self.lists.last_mut() {
                    Some(Some(next)) => {
                        let number = *next;
                        *next += 1;
                        ItemMarker::Number(number)
                    }
                    _ => ItemMarker::Bullet,
                });
            }
            Event::End(TagEnd::Item) => {
                self.flush();
                self.item = None;
            }
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::BlockQuote(_))
            | Event::End(TagEnd::CodeBlock)
            | Event::Start(Tag::BlockQuote(_))
            | Event::Start(Tag::CodeBlock(_))
            | Event::Rule => self.flush(),
            Event::Start(Tag::Strong) => self.bold += 1,
            Event::End(TagEnd::Strong) => self.bold = self.bold.saturating_sub(1),
            Event::Start(Tag::Emphasis) => self.italic += 1,
            Event::End(TagEnd::Emphasis) => self.italic = self.italic.saturating_sub(1),
            Event::Start(Tag::Link { dest_url, .. }) => self.links.push(dest_url.to_string()),
            Event::End(TagEnd::Link) => {
                self.links.pop();
            }
            Event::Text(text) | Event::Code(text) | Event::InlineHtml(text) => self.push(&text),
            Event::SoftBreak | Event::HardBreak => self.push(" "),
            _ => {}
        }
    }

    fn emphasis(&self) -> Emphasis {
        if self.bold > 0 {
            Emphasis::Bold
        } else if self.italic > 0 {
            Emphasis::Italic
        } else {
            Emphasis::Plain
        }
    }

    /// Appends text, merging it into the previous span when the styling
    /// matches.
    fn push(&mut self, text: &str) {
        let emphasis = self.emphasis();
        let link = self.links.last().cloned();
        match self.spans.last_mut() {
            Some(last) if last.emphasis == emphasis && last.link == link => last.text.push_str(text),
            _ => self.spans.push(Span {
                text: text.to_string(),
                emphasis,
                link,
            }),
        }
    }

    /// Turns the collected spans into one block of the current kind.
    fn flush(&mut self) {
        let mut spans = std::mem::take(&mut self.spans);
        if let Some(first) = spans.first_mut() {
            first.text = first.text.trim_start().to_string();
        }
        if let Some(last) = spans.last_mut() {
            last.text = last.text.trim_end().to_string();
        }
        spans.retain(|span| !span.text.is_empty());
        if spans.is_empty() {
            return;
        }

        let block = if let Some(level) = self.heading {
            Block::Heading { level, spans }
        } else {
            match self.item.take() {
                Some(ItemMarker::Bullet) => Block::Bullet(spans),
                Some(ItemMarker::Number(number)) => Block::Numbered { number, spans },
                None => Block::Paragraph(spans),
            }
        };
        self.blocks.push(block);
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        _ => 3,
    }
}
