//! Utility functions for common operations.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// "Book 6, 161" style titles used by some translators.
static BOOK_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Book\s+(\d+)\s*,\s*(.+)$").unwrap());

/// A chapter label and number followed by whatever the site put after it.
static CHAPTER_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<label>(?:Chapter\s+)?(?:Side Story|SS|Chapter))\s*(?:Ch\.?\s*)?(?P<num>\d+(?:\.\d+)?)(?P<rest>.*)$",
    )
    .unwrap()
});

/// Characters replaced in output file names.
static UNSAFE_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[/?:@#!$%^\\*"<>|\x00-\x1f]+"#).unwrap());

fn is_title_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, ':' | '.' | '-' | '\u{2013}' | '\u{2014}')
}

/// Strips `prefix` from `text` unless it is immediately followed by another digit.
fn strip_number_prefix<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(prefix)?;
    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        None
    } else {
        Some(rest)
    }
}

/// Normalizes a chapter title to `"<Label> <N>: <Name>"`.
///
/// Sites are inconsistent: some repeat the number ("Chapter 761: Chapter 761
/// No Openings"), some glue the name to it ("Chapter 100The Black Dragon"),
/// some leave empty separators ("Chapter 620:  : Gone?!"). Titles that do not
/// start with a chapter label are only trimmed.
pub fn clean_title(title: &str) -> String {
    let title = title.trim();

    if let Some(caps) = BOOK_TITLE.captures(title) {
        return format!("Book {}: Chapter {}", &caps[1], caps[2].trim());
    }

    let Some(caps) = CHAPTER_TITLE.captures(title) else {
        return title.to_string();
    };

    let label = caps["label"].split_whitespace().collect::<Vec<_>>().join(" ");
    let num = &caps["num"];
    let labelled = format!("{} {}", label, num);

    let mut rest = &caps["rest"];
    loop {
        let trimmed = rest.trim_start_matches(is_title_separator);
        let stripped = strip_number_prefix(trimmed, &labelled)
            .or_else(|| strip_number_prefix(trimmed, num))
            .unwrap_or(trimmed);

        if stripped.len() == rest.len() {
            break;
        }
        rest = stripped;
    }

    let rest = rest.trim_end();
    if rest.is_empty() {
        labelled
    } else {
        format!("{}: {}", labelled, rest)
    }
}

/// Replaces characters that are unsafe in file names with `_`.
pub fn clean_filename(name: &str) -> String {
    let cleaned = UNSAFE_FILENAME.replace_all(name.trim(), "_");
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Resolves `href` against `base`, returning an absolute URL.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if let Ok(absolute) = url::Url::parse(href) {
        return Some(absolute.into());
    }
    url::Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(String::from)
}

/// Formats a timestamp as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn utc_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
