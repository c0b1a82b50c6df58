//! Flat text encoding for checklists and templates.
//!
//! This is the interchange format for the remote store, file export, and
//! clipboard/paste import:
//!
//! ```text
//! ::TITLE:: Groceries
//! ::ITEM::
//! Milk || 3 || false
//! ::ITEM::
//! Eggs || 5 || true
//! ```
//!
//! Decoding is tolerant. Blocks with empty text are skipped, a missing or
//! unparseable priority becomes `3`, and a missing or unrecognized done flag
//! becomes `false`. Several concatenated documents decode as one list; the
//! last title seen wins.

use crate::model::{Item, Priority};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

pub const TITLE_MARKER: &str = "::TITLE::";
pub const ITEM_MARKER: &str = "::ITEM::";
const FIELD_SEPARATOR: &str = "||";

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("valid regex"));

/// Result of decoding encoded text.
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    /// Title from the last non-empty `::TITLE::` line, if any.
    pub title: Option<String>,
    /// Items in document order, with freshly generated ids.
    pub items: Vec<Item>,
    /// Number of blocks dropped because they had no usable text.
    pub skipped: usize,
}

/// Encode a title and its items.
pub fn encode(title: &str, items: &[Item]) -> String {
    let mut out = format!("{} {}\n", TITLE_MARKER, title);
    for item in items {
        out.push_str(ITEM_MARKER);
        out.push('\n');
        out.push_str(&format!(
            "{} {} {} {} {}\n",
            item.text, FIELD_SEPARATOR, item.priority, FIELD_SEPARATOR, item.done
        ));
    }
    out
}

/// Make user-entered text safe to embed in an encoded document.
///
/// Line breaks collapse into single spaces and marker tokens lose their
/// outer colons (`::ITEM::` becomes `:ITEM:`), so a title or item text
/// decodes back to exactly what is stored.
pub fn clean_text(text: &str) -> String {
    let mut cleaned = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    while let Some(marker) = [TITLE_MARKER, ITEM_MARKER]
        .into_iter()
        .find(|marker| cleaned.contains(marker))
    {
        cleaned = cleaned.replacen(marker, &marker[1..marker.len() - 1], 1);
    }
    cleaned
}

/// Whether text should be routed to import instead of becoming a single item.
pub fn looks_encoded(text: &str) -> bool {
    text.contains(ITEM_MARKER) || text.contains(TITLE_MARKER)
}

/// Decode text produced by [`encode`] (or written by hand).
pub fn decode(text: &str) -> Decoded {
    let mut decoded = Decoded::default();

    let mut markers: Vec<(usize, &str)> = text
        .match_indices(TITLE_MARKER)
        .chain(text.match_indices(ITEM_MARKER))
        .collect();
    markers.sort_by_key(|(pos, _)| *pos);

    // Text before the first marker is treated as an item block
    let preamble_end = markers.first().map(|(pos, _)| *pos).unwrap_or(text.len());
    let preamble = text[..preamble_end].trim();
    if !preamble.is_empty() {
        push_item(&mut decoded, preamble);
    }

    for (index, (pos, marker)) in markers.iter().enumerate() {
        let body_start = pos + marker.len();
        let body_end = markers
            .get(index + 1)
            .map(|(next, _)| *next)
            .unwrap_or(text.len());
        let body = text[body_start..body_end].trim();

        if *marker == TITLE_MARKER {
            let mut lines = body.lines();
            let title = lines.next().unwrap_or_default().trim();
            if !title.is_empty() {
                decoded.title = Some(title.to_string());
            }
            if lines.any(|line| !line.trim().is_empty()) {
                decoded.skipped += 1;
            }
        } else {
            push_item(&mut decoded, body);
        }
    }

    decoded
}

fn push_item(decoded: &mut Decoded, block: &str) {
    match parse_item(block) {
        Some(item) => decoded.items.push(item),
        None => decoded.skipped += 1,
    }
}

/// Parse `text || priority || done`.
///
/// Extra separators belong to the text, so only the last two fields are
/// read as priority and done when more than three are present.
fn parse_item(block: &str) -> Option<Item> {
    let fields: Vec<&str> = block.split(FIELD_SEPARATOR).collect();
    let (text, priority, done) = match fields.len() {
        0 => return None,
        1 => (fields[0].to_string(), None, None),
        2 => (fields[0].to_string(), Some(fields[1]), None),
        n => (
            fields[..n - 2].join(FIELD_SEPARATOR),
            Some(fields[n - 2]),
            Some(fields[n - 1]),
        ),
    };

    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let priority = priority
        .and_then(|p| p.trim().parse::<i64>().ok())
        .map(Priority::clamped)
        .unwrap_or_default();
    let done = done.map(|d| d.trim() == "true").unwrap_or(false);

    Some(Item::new(text, priority, done))
}

/// File name for an exported list: sanitized title plus a UTC timestamp.
pub fn export_file_name(title: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}.txt",
        NON_WORD.replace_all(title, "_"),
        at.format("%Y-%m-%dT%H:%M:%S")
    )
}
