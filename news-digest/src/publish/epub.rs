use super::markup::{Block, Emphasis, Span};
use super::{xml_escape, ArticleSection, Edition, Renderer};
use crate::types::Result;
use chrono::Utc;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const STYLESHEET: &str = r#"body { font-family: serif; line-height: 1.5; margin: 0 4%; }
h1 { font-size: 1.6em; margin: 0.6em 0 0.3em; }
h2 { font-size: 1.3em; margin: 0.8em 0 0.3em; }
h3 { font-size: 1.1em; margin: 0.8em 0 0.3em; }
p.meta { color: #555555; font-size: 0.85em; font-style: italic; }
div.image { text-align: center; margin: 1em 0; }
div.image img { max-width: 100%; }
hr.divider { border: 0; border-top: 1px solid #999999; margin: 1.5em 0; }
p.link, p.headline { font-size: 0.9em; }
"#;

struct Chapter {
    id: String,
    file: String,
    title: String,
    body: String,
}

struct EmbeddedImage {
    id: String,
    href: String,
    media_type: &'static str,
    bytes: Vec<u8>,
}

/// Writes an EPUB 3 package (with an NCX for older readers).
#[derive(Debug, Default)]
pub struct EpubRenderer;

impl EpubRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for EpubRenderer {
    fn extension(&self) -> &'static str {
        "epub"
    }

    fn render(&self, edition: &Edition, path: &Path) -> Result<()> {
        let mut images = Vec::new();
        let mut chapters = vec![Chapter {
            id: "briefing".to_string(),
            file: "briefing.xhtml".to_string(),
            title: "Executive briefing".to_string(),
            body: blocks_to_xhtml(&edition.briefing, &mut images),
        }];

        for (i, article) in edition.articles.iter().enumerate() {
            chapters.push(Chapter {
                id: format!("article_{}", i + 1),
                file: format!("article_{}.xhtml", i + 1),
                title: article.title.clone(),
                body: article_xhtml(article, &mut images),
            });
        }

        let extra = if edition.other_headlines.is_empty() {
            None
        } else {
            let mut body = String::from("<h1>Other Headlines</h1>\n");
            for headline in &edition.other_headlines {
                body.push_str(&format!(
                    "<p class=\"headline\"><a href=\"{}\">[{}] {}</a></p>\n",
                    xml_escape(&headline.url),
                    xml_escape(&headline.source),
                    xml_escape(&headline.title)
                ));
            }
            Some(Chapter {
                id: "extra".to_string(),
                file: "extra.xhtml".to_string(),
                title: "Other Headlines".to_string(),
                body,
            })
        };

        let book_id = Uuid::new_v4();
        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

        // Readers sniff the first entry; it must be uncompressed.
        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(CONTAINER_XML.as_bytes())?;

        let news: Vec<&Chapter> = chapters[1..].iter().chain(extra.iter()).collect();

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(package_opf(edition, book_id, &chapters, extra.as_ref(), &images).as_bytes())?;

        zip.start_file("OEBPS/nav.xhtml", deflated)?;
        zip.write_all(nav_xhtml(edition, &chapters[0], &news).as_bytes())?;

        zip.start_file("OEBPS/toc.ncx", deflated)?;
        zip.write_all(toc_ncx(edition, book_id, &chapters[0], &news).as_bytes())?;

        zip.start_file("OEBPS/style/nav.css", deflated)?;
        zip.write_all(STYLESHEET.as_bytes())?;

        for chapter in chapters.iter().chain(extra.iter()) {
            zip.start_file(format!("OEBPS/{}", chapter.file), deflated)?;
            zip.write_all(xhtml_page(&edition.language, &chapter.title, &chapter.body).as_bytes())?;
        }

        for image in &images {
            zip.start_file(format!("OEBPS/{}", image.href), stored)?;
            zip.write_all(&image.bytes)?;
        }

        zip.finish()?;
        debug!(
            "EPUB written to {} ({} chapters, {} images)",
            path.display(),
            chapters.len() + extra.iter().count(),
            images.len()
        );
        Ok(())
    }
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

fn article_xhtml(article: &ArticleSection, images: &mut Vec<EmbeddedImage>) -> String {
    format!(
        "<h1>{}</h1>\n<p class=\"meta\">{}</p>\n{}<hr class=\"divider\"/>\n\
         <p class=\"link\"><a href=\"{}\">Read the full article</a></p>\n",
        xml_escape(&article.title),
        xml_escape(&article.meta_line()),
        blocks_to_xhtml(&article.blocks, images),
        xml_escape(&article.url)
    )
}

fn blocks_to_xhtml(blocks: &[Block], images: &mut Vec<EmbeddedImage>) -> String {
    let mut html = String::new();
    let mut open_list: Option<&str> = None;

    for block in blocks {
        let wanted = match block {
            Block::Bullet(_) => Some("ul"),
            Block::Numbered { .. } => Some("ol"),
            _ => None,
        };
        if open_list.is_some() && open_list != wanted {
            if let Some(tag) = open_list.take() {
                html.push_str(&format!("</{tag}>\n"));
            }
        }

        match block {
            Block::Heading { level, spans } => {
                html.push_str(&format!("<h{level}>{}</h{level}>\n", spans_to_xhtml(spans)));
            }
            Block::Paragraph(spans) => {
                html.push_str(&format!("<p>{}</p>\n", spans_to_xhtml(spans)));
            }
            Block::Bullet(spans) => {
                if open_list.is_none() {
                    html.push_str("<ul>\n");
                    open_list = Some("ul");
                }
                html.push_str(&format!("<li>{}</li>\n", spans_to_xhtml(spans)));
            }
            Block::Numbered { number, spans } => {
                if open_list.is_none() {
                    if *number == 1 {
                        html.push_str("<ol>\n");
                    } else {
                        html.push_str(&format!("<ol start=\"{number}\">\n"));
                    }
                    open_list = Some("ol");
                }
                html.push_str(&format!("<li>{}</li>\n", spans_to_xhtml(spans)));
            }
            Block::Image { path, alt } => {
                if let Some(href) = embed_image(path, images) {
                    html.push_str(&format!(
                        "<div class=\"image\"><img src=\"{}\" alt=\"{}\"/></div>\n",
                        href,
                        xml_escape(alt)
                    ));
                }
            }
        }
    }

    if let Some(tag) = open_list {
        html.push_str(&format!("</{tag}>\n"));
    }
    html
}

fn spans_to_xhtml(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|span| {
            let text = match span.emphasis {
                Emphasis::Plain => xml_escape(&span.text),
                Emphasis::Bold => format!("<strong>{}</strong>", xml_escape(&span.text)),
                Emphasis::Italic => format!("<em>{}</em>", xml_escape(&span.text)),
            };
            match &span.link {
                Some(url) => format!("<a href=\"{}\">{}</a>", xml_escape(url), text),
                None => text,
            }
        })
        .collect()
}

/// Reads the image and queues it for the package. Unreadable or
/// unrecognised files are left out.
fn embed_image(path: &Path, images: &mut Vec<EmbeddedImage>) -> Option<String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Skipping image {}: {}", path.display(), e);
            return None;
        }
    };
    let format = match image::guess_format(&bytes) {
        Ok(format) => format,
        Err(e) => {
            warn!("Skipping image {}: {}", path.display(), e);
            return None;
        }
    };

    let n = images.len() + 1;
    let extension = format.extensions_str().first().copied().unwrap_or("img");
    let href = format!("images/img_{}.{}", n, extension);
    images.push(EmbeddedImage {
        id: format!("img_{}", n),
        href: href.clone(),
        media_type: format.to_mime_type(),
        bytes,
    });
    Some(href)
}

fn xhtml_page(language: &str, title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
<title>{title}</title>
<link rel="stylesheet" type="text/css" href="style/nav.css"/>
</head>
<body>
{body}</body>
</html>
"#,
        lang = xml_escape(language),
        title = xml_escape(title),
        body = body
    )
}

fn package_opf(
    edition: &Edition,
    book_id: Uuid,
    chapters: &[Chapter],
    extra: Option<&Chapter>,
    images: &[EmbeddedImage],
) -> String {
    let mut manifest = String::from(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n\
         \x20   <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n\
         \x20   <item id=\"style_nav\" href=\"style/nav.css\" media-type=\"text/css\"/>\n",
    );
    let mut spine = String::from("    <itemref idref=\"nav\"/>\n");

    for chapter in chapters.iter().chain(extra) {
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            chapter.id, chapter.file
        ));
        spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", chapter.id));
    }
    for image in images {
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            image.id, image.href, image.media_type
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">urn:uuid:{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:language>{lang}</dc:language>
    <dc:creator>News Digest</dc:creator>
    <dc:date>{date}</dc:date>
    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
        id = book_id,
        title = xml_escape(&edition.title),
        lang = xml_escape(&edition.language),
        date = edition.date.format("%Y-%m-%d"),
        modified = Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
    )
}

fn nav_xhtml(edition: &Edition, briefing: &Chapter, news: &[&Chapter]) -> String {
    let mut items = format!(
        "<li><span>Highlights</span>\n<ol>\n<li><a href=\"{}\">{}</a></li>\n</ol>\n</li>\n",
        briefing.file,
        xml_escape(&briefing.title)
    );
    if !news.is_empty() {
        items.push_str("<li><span>News</span>\n<ol>\n");
        for chapter in news {
            items.push_str(&format!(
                "<li><a href=\"{}\">{}</a></li>\n",
                chapter.file,
                xml_escape(&chapter.title)
            ));
        }
        items.push_str("</ol>\n</li>\n");
    }

    let body = format!(
        "<nav epub:type=\"toc\" id=\"toc\">\n<h1>{}</h1>\n<ol>\n{}</ol>\n</nav>\n",
        xml_escape(&edition.title),
        items
    );
    xhtml_page(&edition.language, "Contents", &body)
}

fn toc_ncx(edition: &Edition, book_id: Uuid, briefing: &Chapter, news: &[&Chapter]) -> String {
    // A group point opens its first child, so both share one play order.
    let briefing_point = nav_point("np_1", 1, &briefing.title, &briefing.file, "");
    let mut nav_map = nav_point("np_highlights", 1, "Highlights", &briefing.file, &briefing_point);

    if let Some(first) = news.first() {
        let children: String = news
            .iter()
            .enumerate()
            .map(|(i, chapter)| nav_point(&format!("np_{}", i + 2), i + 2, &chapter.title, &chapter.file, ""))
            .collect();
        nav_map.push_str(&nav_point("np_news", 2, "News", &first.file, &children));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="urn:uuid:{id}"/>
    <meta name="dtb:depth" content="2"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
{nav_map}  </navMap>
</ncx>
"#,
        id = book_id,
        title = xml_escape(&edition.title),
    )
}

fn nav_point(id: &str, order: usize, label: &str, src: &str, children: &str) -> String {
    format!(
        "<navPoint id=\"{id}\" playOrder=\"{order}\"><navLabel><text>{}</text></navLabel><content src=\"{}\"/>{}</navPoint>\n",
        xml_escape(label),
        src,
        children
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::markup::parse_markup;

    #[test]
    fn bullets_are_grouped_into_lists() {
        let mut images = Vec::new();
        let html = blocks_to_xhtml(&parse_markup("## Key\n- **one**\n- two\n\nAfter & more"), &mut images);
        assert_eq!(
            html,
            "<h2>Key</h2>\n<ul>\n<li><strong>one</strong></li>\n<li>two</li>\n</ul>\n<p>After &amp; more</p>\n"
        );
    }

    #[test]
    fn numbered_items_and_links_render_as_markup() {
        let mut images = Vec::new();
        let html = blocks_to_xhtml(
            &parse_markup("1. [Rates](https://wire.test/r?a=1&b=2)\n2. Bonds\n\n- aside"),
            &mut images,
        );
        assert_eq!(
            html,
            "<ol>\n<li><a href=\"https://wire.test/r?a=1&amp;b=2\">Rates</a></li>\n<li>Bonds</li>\n</ol>\n\
             <ul>\n<li>aside</li>\n</ul>\n"
        );
    }

    #[test]
    fn ncx_group_points_share_their_first_child_play_order() {
        let chapter = |file: &str, title: &str| Chapter {
            id: file.trim_end_matches(".xhtml").to_string(),
            file: file.to_string(),
            title: title.to_string(),
            body: String::new(),
        };
        let briefing = chapter("briefing.xhtml", "Executive briefing");
        let first = chapter("article_1.xhtml", "One");
        let second = chapter("article_2.xhtml", "Two");
        let edition = Edition {
            title: "News Digest - 06/01/2025".to_string(),
            language: "en".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2025, 1, 6).expect("valid date"),
            briefing: Vec::new(),
            articles: Vec::new(),
            other_headlines: Vec::new(),
        };

        let ncx = toc_ncx(&edition, Uuid::new_v4(), &briefing, &[&first, &second]);

        let orders: Vec<(String, String)> = ncx
            .split("<navPoint ")
            .skip(1)
            .map(|point| {
                let order = point.split("playOrder=\"").nth(1).and_then(|rest| rest.split('"').next());
                let src = point.split("src=\"").nth(1).and_then(|rest| rest.split('"').next());
                (src.unwrap_or_default().to_string(), order.unwrap_or_default().to_string())
            })
            .collect();
        assert_eq!(orders.len(), 5);
        for (src, order) in &orders {
            assert!(
                orders.iter().all(|(other_src, other_order)| (other_src == src) == (other_order == order)),
                "{src} has conflicting play orders in {orders:?}"
            );
        }
        assert!(ncx.contains("id=\"np_highlights\""));
        assert!(ncx.contains("id=\"np_news\""));
    }

    #[test]
    fn missing_images_are_skipped() {
        let mut images = Vec::new();
        let blocks = vec![Block::Image {
            path: "/definitely/not/here.png".into(),
            alt: "x".into(),
        }];
        assert_eq!(blocks_to_xhtml(&blocks, &mut images), "");
        assert!(images.is_empty());
    }
}
