//! Chapter HTML normalization.
//!
//! Site adapters hand the element holding a chapter's text to [`clean_content`],
//! which strips everything an ebook has no use for and serializes what is
//! left as well-formed XHTML. The same serializer is reused later by
//! [`rewrite_images`] to point image sources at packaged files.

use crate::utils::{clean_title, resolve_url};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::LazyLock;

/// Elements removed with their whole subtree.
const ELEMENT_BLACKLIST: &str = "noscript, form, fieldset, video, script, head, meta, select, \
     textarea, audio, canvas, iframe, style, button, input, ins, object, embed, svg";

/// Elements dropped when they end up with no text and no child elements.
const BLANK_CANDIDATES: &str = "div, h1, h2, h3, h4, h5, h6, p, span";

const VOID_ELEMENTS: &[&str] = &[
    "area", "br", "col", "embed", "hr", "img", "input", "source", "track", "wbr",
];

const DEFAULT_ATTRIBUTES: &[&str] = &["style", "id", "title", "dir", "lang", "translate"];

static BLACKLIST: LazyLock<Selector> = LazyLock::new(|| Selector::parse(ELEMENT_BLACKLIST).unwrap());
static BLANKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse(BLANK_CANDIDATES).unwrap());
static STYLED: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[style]").unwrap());
static PARAGRAPHS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());

static DISPLAY_NONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)display\s*:\s*none").unwrap());

/// Boilerplate paragraphs injected into chapter text by aggregators.
static CONTENT_WARNINGS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^\s*Read\s*the\s*webtoon\s*on\s*http").unwrap(),
        Regex::new(r"(?i)^\s*Join\s*our\s*discord").unwrap(),
    ]
});

static TITLE_ISH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:Chapter|Side Story|SS|Ch\.?)\s*\d+").unwrap()
});

/// What to do with an `<img>` while serializing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRewrite {
    /// Keep the image with this `src`.
    Src(String),
    /// Replace the image with plain text.
    Text(String),
    /// Remove the image.
    Drop,
}

/// Site-specific additions to the default filters.
#[derive(Debug, Default)]
pub struct ContentFilter {
    /// Extra elements to remove.
    pub remove: Vec<Selector>,
    /// Direct children of the content whose text matches are removed (ad banners).
    pub banners: Vec<Regex>,
    /// Image URLs rendered as text instead (broken emoji images).
    pub image_text: &'static [(&'static str, &'static str)],
    /// Lift a leading "Chapter N ..." heading out of the content as the title.
    pub leading_title: bool,
}

impl ContentFilter {
    /// Builds a filter removing the given selectors; panics on an invalid selector.
    pub fn removing(selectors: &[&str]) -> Self {
        Self {
            remove: selectors
                .iter()
                .map(|s| Selector::parse(s).unwrap())
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_banners(mut self, patterns: &[&str]) -> Self {
        self.banners = patterns.iter().map(|p| Regex::new(p).unwrap()).collect();
        self
    }

    pub fn with_image_text(mut self, map: &'static [(&'static str, &'static str)]) -> Self {
        self.image_text = map;
        self
    }

    pub fn with_leading_title(mut self) -> Self {
        self.leading_title = true;
        self
    }
}

/// Normalized chapter content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanedContent {
    /// XHTML fragment.
    pub html: String,
    /// Absolute image URLs in document order, without duplicates.
    pub image_urls: Vec<String>,
    /// Heading lifted from the top of the content, already cleaned.
    pub title: Option<String>,
}

/// Normalizes the children of `container`, resolving images against `base_url`.
pub fn clean_content(container: ElementRef, base_url: &str, filter: &ContentFilter) -> CleanedContent {
    let mut fragment = Html::parse_fragment(&container.inner_html());

    strip_unwanted(&mut fragment, filter);
    remove_blank_elements(&mut fragment);
    let title = if filter.leading_title {
        take_leading_title(&mut fragment)
    } else {
        None
    };

    let mut image_urls: Vec<String> = Vec::new();
    let mut on_image = |src: &str| {
        if let Some((_, text)) = filter.image_text.iter().find(|(url, _)| *url == src) {
            return ImageRewrite::Text((*text).to_string());
        }
        match resolve_url(base_url, src) {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                if !image_urls.contains(&url) {
                    image_urls.push(url.clone());
                }
                ImageRewrite::Src(url)
            }
            _ => ImageRewrite::Drop,
        }
    };

    let mut html = String::new();
    write_children(fragment.root_element(), &mut html, &mut on_image);

    CleanedContent {
        html: html.trim().to_string(),
        image_urls,
        title,
    }
}

/// Re-serializes an XHTML fragment, passing every image `src` through `rewrite`.
pub fn rewrite_images(xhtml: &str, rewrite: &mut dyn FnMut(&str) -> ImageRewrite) -> String {
    let fragment = Html::parse_fragment(xhtml);
    let mut out = String::with_capacity(xhtml.len());
    write_children(fragment.root_element(), &mut out, rewrite);
    out
}

/// Removes the images whose source is in `urls`.
pub fn drop_images(xhtml: &str, urls: &[String]) -> String {
    rewrite_images(xhtml, &mut |src| {
        if urls.iter().any(|u| u == src) {
            ImageRewrite::Drop
        } else {
            ImageRewrite::Src(src.to_string())
        }
    })
}

/// Collapses runs of whitespace in an element's text.
pub fn element_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escapes text for use in XML content or attribute values.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c if is_xml_char(c) => out.push(c),
            _ => {}
        }
    }
    out
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}')
}

fn strip_unwanted(fragment: &mut Html, filter: &ContentFilter) {
    let root = fragment.root_element();
    let mut doomed = Vec::new();

    doomed.extend(root.select(&BLACKLIST).map(|e| e.id()));
    for selector in &filter.remove {
        doomed.extend(root.select(selector).map(|e| e.id()));
    }

    doomed.extend(
        root.select(&STYLED)
            .filter(|e| e.value().attr("style").is_some_and(|s| DISPLAY_NONE.is_match(s)))
            .map(|e| e.id()),
    );

    doomed.extend(
        root.descendants()
            .filter(|node| node.value().is_comment())
            .map(|node| node.id()),
    );

    doomed.extend(
        root.select(&PARAGRAPHS)
            .filter(|p| {
                let text = p.text().collect::<String>();
                CONTENT_WARNINGS.iter().any(|re| re.is_match(&text))
            })
            .map(|e| e.id()),
    );

    if !filter.banners.is_empty() {
        doomed.extend(
            root.children()
                .filter_map(ElementRef::wrap)
                .filter(|e| {
                    let text = element_text(*e);
                    filter.banners.iter().any(|re| re.is_match(&text))
                })
                .map(|e| e.id()),
        );
    }

    for id in doomed {
        if let Some(mut node) = fragment.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn is_blank(element: ElementRef) -> bool {
    element.children().all(|child| match child.value() {
        Node::Text(text) => text.trim().is_empty(),
        Node::Comment(_) => true,
        _ => false,
    })
}

fn remove_blank_elements(fragment: &mut Html) {
    loop {
        let blanks: Vec<_> = fragment
            .root_element()
            .select(&BLANKS)
            .filter(|e| is_blank(*e))
            .map(|e| e.id())
            .collect();

        if blanks.is_empty() {
            return;
        }

        for id in blanks {
            if let Some(mut node) = fragment.tree.get_mut(id) {
                node.detach();
            }
        }
    }
}

fn take_leading_title(fragment: &mut Html) -> Option<String> {
    let root = fragment.root_element();
    let first = root.children().find_map(|child| match child.value() {
        Node::Text(text) if text.trim().is_empty() => None,
        Node::Element(_) => Some(ElementRef::wrap(child)),
        _ => Some(None),
    })??;

    // Only short heading-like blocks; a paragraph of prose that happens to
    // start with "Chapter 3" stays.
    let text = element_text(first);
    if !TITLE_ISH.is_match(&text) || text.chars().count() > 150 {
        return None;
    }

    let id = first.id();
    if let Some(mut node) = fragment.tree.get_mut(id) {
        node.detach();
    }
    Some(clean_title(&text))
}

fn allowed_attributes(tag: &str) -> &'static [&'static str] {
    match tag {
        "img" => &["alt", "width", "height"],
        "a" => &["href", "hreflang", "rel", "type", "media"],
        "th" | "td" => &["colspan", "headers", "rowspan", "scope", "abbr"],
        "colgroup" | "col" => &["span"],
        "time" => &["datetime"],
        _ => &[],
    }
}

fn write_children(
    element: ElementRef,
    out: &mut String,
    on_image: &mut dyn FnMut(&str) -> ImageRewrite,
) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&escape_xml(text)),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, out, on_image);
                }
            }
            _ => {}
        }
    }
}

fn write_element(
    element: ElementRef,
    out: &mut String,
    on_image: &mut dyn FnMut(&str) -> ImageRewrite,
) {
    let name = element.value().name().to_ascii_lowercase();

    let mut attributes: Vec<(&str, String)> = Vec::new();
    if name == "img" {
        let source = ["data-src", "data-lazy-src", "src"]
            .iter()
            .find_map(|attr| element.value().attr(attr))
            .map(str::trim)
            .filter(|src| !src.is_empty());

        let Some(source) = source else {
            return;
        };
        match on_image(source) {
            ImageRewrite::Src(src) => attributes.push(("src", src)),
            ImageRewrite::Text(text) => {
                out.push_str(&escape_xml(&text));
                return;
            }
            ImageRewrite::Drop => return,
        }
    }

    for attr in DEFAULT_ATTRIBUTES.iter().chain(allowed_attributes(&name)) {
        if let Some(value) = element.value().attr(attr) {
            attributes.push((*attr, value.to_string()));
        }
    }
    if name == "img" && !attributes.iter().any(|(a, _)| *a == "alt") {
        attributes.push(("alt", String::new()));
    }

    out.push('<');
    out.push_str(&name);
    for (attr, value) in &attributes {
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        out.push_str(&escape_xml(value));
        out.push('"');
    }

    if VOID_ELEMENTS.contains(&name.as_str()) {
        out.push_str("/>");
        return;
    }

    out.push('>');
    write_children(element, out, on_image);
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
}
