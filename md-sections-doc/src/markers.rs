//! Inline identity markers for flat-text surfaces.
//!
//! A marker is an HTML comment on its own line directly above the text of the
//! block it names, e.g. `<!-- @block:tmp-3 -->`. Renderers hide comments, and
//! anything leaving the surface (clipboard, export) goes through
//! [`strip_markers`].

use md_sections_core::{Block, BlockId, BlockRef, TempId};
use std::fmt;
use uuid::Uuid;

pub const MARKER_OPEN: &str = "<!-- @block:";
pub const MARKER_CLOSE: &str = "-->";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Marker {
    Block(BlockId),
    Temp(TempId),
    /// Well-formed marker whose id means nothing to us, e.g. pasted from
    /// another project.
    Unrecognized(String),
}

impl Marker {
    pub fn parse_line(line: &str) -> Option<Marker> {
        let inner = line
            .trim()
            .strip_prefix(MARKER_OPEN)?
            .strip_suffix(MARKER_CLOSE)?
            .trim();
        if let Ok(id) = Uuid::parse_str(inner) {
            return Some(Marker::Block(id));
        }
        if let Ok(temp) = inner.parse::<TempId>() {
            return Some(Marker::Temp(temp));
        }
        Some(Marker::Unrecognized(inner.to_string()))
    }
}

impl From<BlockRef> for Marker {
    fn from(reference: BlockRef) -> Self {
        match reference {
            BlockRef::Permanent(id) => Marker::Block(id),
            BlockRef::Temp(temp) => Marker::Temp(temp),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Block(id) => write!(f, "{MARKER_OPEN}{id} {MARKER_CLOSE}"),
            Marker::Temp(temp) => write!(f, "{MARKER_OPEN}{temp} {MARKER_CLOSE}"),
            Marker::Unrecognized(raw) => write!(f, "{MARKER_OPEN}{raw} {MARKER_CLOSE}"),
        }
    }
}

pub fn is_marker_line(line: &str) -> bool {
    Marker::parse_line(line).is_some()
}

/// Marker-annotated text for `(marker, markdown)` units in document order.
pub fn annotate<'a>(units: impl IntoIterator<Item = (Marker, &'a str)>) -> String {
    units
        .into_iter()
        .filter(|(_, markdown)| !markdown.trim().is_empty())
        .map(|(marker, markdown)| format!("{marker}\n{markdown}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Annotates the top-level blocks of `blocks` (document order).
pub fn annotate_blocks(blocks: &[Block]) -> String {
    annotate(
        blocks
            .iter()
            .filter(|block| block.is_top_level())
            .map(|block| (Marker::Block(block.id), block.markdown.as_str())),
    )
}

/// Text with every marker line removed.
pub fn strip_markers(text: &str) -> String {
    text.lines()
        .filter(|line| !is_marker_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// `None` for text before the first marker.
    pub marker: Option<Marker>,
    pub text: String,
}

/// Marker-to-text pairs in document order.
///
/// A marker whose text was erased still yields a segment, with empty text.
pub fn extract_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut marker: Option<Marker> = None;
    let mut body: Vec<&str> = Vec::new();
    for line in text.lines() {
        if let Some(next) = Marker::parse_line(line) {
            push_segment(&mut segments, marker.take(), &body);
            body.clear();
            marker = Some(next);
        } else {
            body.push(line);
        }
    }
    push_segment(&mut segments, marker, &body);
    segments
}

fn push_segment(segments: &mut Vec<Segment>, marker: Option<Marker>, body: &[&str]) {
    let start = body
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(body.len());
    let end = body
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(start, |last| last + 1);
    let text = body[start..end.max(start)].join("\n");
    if marker.is_some() || !text.is_empty() {
        segments.push(Segment { marker, text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_forms() {
        let id = Uuid::new_v4();
        let line = Marker::Block(id).to_string();
        assert_eq!(Marker::parse_line(&line), Some(Marker::Block(id)));
        assert_eq!(
            Marker::parse_line("  <!-- @block:tmp-7 -->"),
            Some(Marker::Temp(TempId(7)))
        );
        assert_eq!(
            Marker::parse_line("<!-- @block:elsewhere -->"),
            Some(Marker::Unrecognized("elsewhere".into()))
        );
        assert_eq!(Marker::parse_line("<!-- a comment -->"), None);
    }

    #[test]
    fn segments_follow_markers() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let text = format!(
            "intro\n\n<!-- @block:{a} -->\n# A\n\n<!-- @block:{b} -->\n\n<!-- @block:tmp-1 -->\nnew"
        );
        let segments = extract_segments(&text);
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].marker, None);
        assert_eq!(segments[0].text, "intro");
        assert_eq!(segments[1].text, "# A");
        assert_eq!(segments[2].marker, Some(Marker::Block(b)));
        assert_eq!(segments[2].text, "");
        assert_eq!(segments[3].marker, Some(Marker::Temp(TempId(1))));
    }

    #[test]
    fn annotate_then_strip_is_plain_text() {
        let units = vec![
            (Marker::Temp(TempId(1)), "# One"),
            (Marker::Temp(TempId(2)), "body"),
        ];
        let annotated = annotate(units);
        assert_eq!(
            annotated,
            "<!-- @block:tmp-1 -->\n# One\n\n<!-- @block:tmp-2 -->\nbody"
        );
        assert_eq!(strip_markers(&annotated), "# One\n\nbody");
    }
}
