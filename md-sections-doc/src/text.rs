use crate::{BIBLIOGRAPHY_MARKER, list_marker, markers, parse_heading};
use md_sections_core::BlockType;

/// Plain-text projection of a fragment, used for titles, search and word counts.
pub(crate) fn plain_text(block_type: BlockType, markdown: &str) -> String {
    let lines = markdown.lines().filter(|line| !markers::is_marker_line(line));
    let projected: Vec<String> = match block_type {
        BlockType::SectionBreak | BlockType::HorizontalRule => Vec::new(),
        BlockType::Heading => lines
            .take(1)
            .filter_map(|line| parse_heading(line.trim()))
            .map(|(_, title)| strip_inline(title))
            .collect(),
        BlockType::CodeBlock => lines
            .filter(|line| !line.trim_start().starts_with("```"))
            .map(str::to_string)
            .collect(),
        BlockType::Blockquote => lines
            .map(|line| strip_inline(line.trim().trim_start_matches('>').trim()))
            .collect(),
        BlockType::BulletList | BlockType::OrderedList | BlockType::ListItem => lines
            .map(|line| strip_inline(strip_list_marker(line.trim())))
            .collect(),
        BlockType::Table => lines
            .filter(|line| !is_table_rule(line))
            .map(|line| {
                line.split('|')
                    .map(str::trim)
                    .filter(|cell| !cell.is_empty())
                    .map(strip_inline)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect(),
        BlockType::Bibliography => lines
            .filter(|line| line.trim() != BIBLIOGRAPHY_MARKER)
            .map(|line| strip_inline(line.trim()))
            .collect(),
        BlockType::Image | BlockType::Paragraph => {
            lines.map(|line| strip_inline(line.trim())).collect()
        }
    };
    projected
        .into_iter()
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_list_marker(trimmed: &str) -> &str {
    if list_marker(trimmed).is_none() {
        return trimmed;
    }
    match trimmed.find(' ') {
        Some(space) => trimmed[space..].trim_start(),
        None => trimmed,
    }
}

fn is_table_rule(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Byte span `(text_start, text_end, after)` of a `[text](target)` link at `open`.
fn link_at(text: &str, open: usize) -> Option<(usize, usize, usize)> {
    let rest = text.get(open..)?;
    if !rest.starts_with('[') {
        return None;
    }
    let close = open + rest.find(']')?;
    let after_close = text.get(close + 1..)?;
    if !after_close.starts_with('(') {
        return None;
    }
    let end = close + 1 + after_close.find(')')?;
    Some((open + 1, close, end + 1))
}

/// Removes inline markdown syntax: emphasis, code spans and link or image
/// wrappers (keeping their text).
pub fn strip_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut previous: Option<char> = None;
    while let Some((index, c)) = chars.next() {
        match c {
            '!' | '[' => {
                let open = if c == '!' { index + 1 } else { index };
                if let Some((start, end, after)) = link_at(text, open) {
                    out.push_str(&strip_inline(&text[start..end]));
                    while chars.peek().is_some_and(|(next, _)| *next < after) {
                        chars.next();
                    }
                    previous = Some(')');
                    continue;
                }
                out.push(c);
            }
            '*' | '`' | '~' => {}
            '_' => {
                let inside_word = previous.is_some_and(char::is_alphanumeric)
                    && chars.peek().is_some_and(|(_, next)| next.is_alphanumeric());
                if inside_word {
                    out.push(c);
                }
            }
            '\\' => {
                if let Some((_, escaped)) = chars.next_if(|(_, next)| next.is_ascii_punctuation()) {
                    out.push(escaped);
                    previous = Some(escaped);
                    continue;
                }
                out.push(c);
            }
            _ => out.push(c),
        }
        previous = Some(c);
    }
    out
}
