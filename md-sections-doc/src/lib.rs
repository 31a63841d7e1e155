//! Markdown/block translator.
//!
//! [`Parser::parse`] turns a markdown string into ordered [`Fragment`]s and
//! [`assemble`] turns them back. The inverse is exact for unedited content:
//! every fragment keeps the markdown it was cut from, and assembly joins
//! top-level fragments with a single blank line.

use md_sections_core::{
    Block, BlockId, BlockType, MAX_HEADING_LEVEL, ProjectId, Region, RegionTracker, SortOrder,
};

pub mod identity;
pub mod markers;
mod text;
pub mod view;

pub use identity::{CarriedIdentity, IdentityHints};
pub use markers::{Marker, Segment, annotate, annotate_blocks, extract_segments, strip_markers};
pub use text::strip_inline;
pub use view::DocumentView;

pub const BREAK_MARKER: &str = "<!-- ::break:: -->";
pub const BIBLIOGRAPHY_MARKER: &str = "<!-- ::bibliography:: -->";

/// One parsed block before it has an identity or an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub block_type: BlockType,
    pub heading_level: Option<u8>,
    pub markdown: String,
    pub text_content: String,
    pub is_pseudo_section: bool,
    pub is_notes: bool,
    pub is_bibliography: bool,
    /// List items of a list fragment. Never assembled on their own.
    pub children: Vec<Fragment>,
}

impl Fragment {
    fn new(block_type: BlockType, markdown: String) -> Self {
        let text_content = text::plain_text(block_type, &markdown);
        Self {
            block_type,
            heading_level: None,
            markdown,
            text_content,
            is_pseudo_section: block_type == BlockType::SectionBreak,
            is_notes: false,
            is_bibliography: block_type == BlockType::Bibliography,
            children: Vec::new(),
        }
    }

    /// Falls back to a plain paragraph for text nothing else recognises.
    fn opaque(markdown: &str) -> Self {
        Self::new(BlockType::Paragraph, markdown.trim().to_string())
    }

    pub fn is_section_boundary(&self) -> bool {
        self.block_type == BlockType::Heading || self.is_pseudo_section
    }

    /// Key used to carry identity across a re-parse.
    pub fn title(&self) -> Option<&str> {
        match self.block_type {
            BlockType::Heading => Some(self.text_content.as_str()),
            _ if self.is_pseudo_section => Some(""),
            _ => None,
        }
    }

    /// A fresh block for this fragment. Children are not included.
    pub fn to_block(&self, project_id: ProjectId, sort_order: SortOrder) -> Block {
        let mut block = Block::new(
            project_id,
            self.block_type,
            self.markdown.clone(),
            sort_order,
        );
        block.heading_level = self.heading_level;
        block.text_content = self.text_content.clone();
        block.is_pseudo_section = self.is_pseudo_section;
        block.is_notes = self.is_notes;
        block.is_bibliography = self.is_bibliography;
        block
    }
}

pub struct Parser;

impl Parser {
    pub fn parse(text: &str) -> Vec<Fragment> {
        let lines: Vec<&str> = text.lines().collect();
        let mut fragments = Vec::new();
        parse_blocks(&lines, &mut fragments);
        resolve_context(&mut fragments);
        fragments
    }

    /// Parses the text of a single editor unit. Text that is not blank never
    /// parses to nothing: it is kept as an opaque paragraph instead.
    pub fn parse_unit(text: &str) -> Vec<Fragment> {
        let fragments = Self::parse(text);
        if fragments.is_empty() && !strip_markers(text).trim().is_empty() {
            return vec![Fragment::opaque(&strip_markers(text))];
        }
        fragments
    }
}

/// Fills in pseudo-section levels and notes/bibliography regions, which
/// depend on the blocks that come before.
pub fn resolve_context(fragments: &mut [Fragment]) {
    let mut regions = RegionTracker::default();
    let mut last_level = 1u8;
    for fragment in fragments {
        let region = if fragment.block_type == BlockType::Heading {
            let level = fragment.heading_level.unwrap_or(1);
            last_level = level;
            regions.enter_heading(level, &fragment.text_content)
        } else {
            if fragment.is_pseudo_section {
                fragment.heading_level = Some(last_level);
            }
            regions.current()
        };
        let notes = region == Some(Region::Notes);
        let bibliography =
            region == Some(Region::Bibliography) || fragment.block_type == BlockType::Bibliography;
        fragment.is_notes = notes;
        fragment.is_bibliography = bibliography;
        for child in &mut fragment.children {
            child.is_notes = notes;
            child.is_bibliography = bibliography;
        }
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty() || markers::is_marker_line(line)
}

fn parse_heading(trimmed: &str) -> Option<(u8, &str)> {
    let hashes = trimmed.bytes().take_while(|byte| *byte == b'#').count();
    if hashes == 0 || hashes > MAX_HEADING_LEVEL as usize {
        return None;
    }
    let rest = &trimmed[hashes..];
    if rest.is_empty() {
        Some((hashes as u8, ""))
    } else if rest.starts_with([' ', '\t']) {
        Some((hashes as u8, rest.trim()))
    } else {
        None
    }
}

fn is_rule(trimmed: &str) -> bool {
    let compact: Vec<char> = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && ['-', '*', '_']
            .iter()
            .any(|rule| compact.iter().all(|c| c == rule))
}

fn is_image(trimmed: &str) -> bool {
    trimmed.starts_with("![") && trimmed.ends_with(')') && trimmed.contains("](")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Bullet,
    Ordered,
}

fn list_marker(trimmed: &str) -> Option<ListKind> {
    if trimmed.starts_with("- ") || trimmed.starts_with("* ") || trimmed.starts_with("+ ") {
        return Some(ListKind::Bullet);
    }
    let digits = trimmed.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || digits > 9 {
        return None;
    }
    let rest = &trimmed[digits..];
    if rest.starts_with(". ") || rest.starts_with(") ") {
        Some(ListKind::Ordered)
    } else {
        None
    }
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Lines that end a paragraph or list and start a block of their own.
fn interrupts(trimmed: &str) -> bool {
    trimmed.starts_with("```")
        || parse_heading(trimmed).is_some()
        || trimmed == BREAK_MARKER
        || trimmed == BIBLIOGRAPHY_MARKER
}

fn parse_blocks(lines: &[&str], out: &mut Vec<Fragment>) {
    let mut index = 0;
    while index < lines.len() {
        let line = lines[index];
        let trimmed = line.trim();
        if is_blank(line) {
            index += 1;
            continue;
        }

        if trimmed.starts_with("```") {
            let fence: String = trimmed.chars().take_while(|c| *c == '`').collect();
            let mut end_index = index + 1;
            while end_index < lines.len() && lines[end_index].trim() != fence {
                end_index += 1;
            }
            let markdown = if end_index < lines.len() {
                lines[index..=end_index].join("\n")
            } else {
                // Unclosed fences are closed so the fragment cannot swallow
                // whatever is assembled after it.
                let mut body = &lines[index..];
                while body.len() > 1 && body.last().is_some_and(|last| last.trim().is_empty()) {
                    body = &body[..body.len() - 1];
                }
                format!("{}\n{fence}", body.join("\n"))
            };
            out.push(Fragment::new(BlockType::CodeBlock, markdown));
            index = (end_index + 1).min(lines.len());
            continue;
        }

        if let Some((level, _)) = parse_heading(trimmed) {
            let mut fragment = Fragment::new(BlockType::Heading, line.to_string());
            fragment.heading_level = Some(level);
            out.push(fragment);
            index += 1;
            continue;
        }

        if trimmed == BREAK_MARKER {
            out.push(Fragment::new(BlockType::SectionBreak, line.to_string()));
            index += 1;
            continue;
        }

        if trimmed == BIBLIOGRAPHY_MARKER {
            let end_index = run_until(lines, index + 1, |current| {
                !is_blank(current) && !interrupts(current.trim())
            });
            out.push(Fragment::new(
                BlockType::Bibliography,
                lines[index..end_index].join("\n"),
            ));
            index = end_index;
            continue;
        }

        if is_rule(trimmed) {
            out.push(Fragment::new(BlockType::HorizontalRule, line.to_string()));
            index += 1;
            continue;
        }

        if trimmed.starts_with('|') {
            let end_index = run_until(lines, index, |current| current.trim().starts_with('|'));
            out.push(Fragment::new(BlockType::Table, lines[index..end_index].join("\n")));
            index = end_index;
            continue;
        }

        if trimmed.starts_with('>') {
            let end_index = run_until(lines, index, |current| current.trim().starts_with('>'));
            out.push(Fragment::new(
                BlockType::Blockquote,
                lines[index..end_index].join("\n"),
            ));
            index = end_index;
            continue;
        }

        if let Some(kind) = list_marker(trimmed) {
            let end_index = run_until(lines, index, |current| {
                !is_blank(current) && !interrupts(current.trim())
            });
            out.push(parse_list(kind, &lines[index..end_index]));
            index = end_index;
            continue;
        }

        let end_index = run_until(lines, index, |current| {
            let current_trimmed = current.trim();
            !is_blank(current) && !interrupts(current_trimmed) && !current_trimmed.starts_with('>')
        });
        let end_index = end_index.max(index + 1);
        // An image counts as its own block only when nothing else shares its paragraph.
        let block_type = if end_index == index + 1 && is_image(trimmed) {
            BlockType::Image
        } else {
            BlockType::Paragraph
        };
        out.push(Fragment::new(block_type, lines[index..end_index].join("\n")));
        index = end_index;
    }
}

/// First index at or after `start` whose line fails `keep`.
fn run_until(lines: &[&str], start: usize, keep: impl Fn(&str) -> bool) -> usize {
    let mut end_index = start;
    while end_index < lines.len() && keep(lines[end_index]) {
        end_index += 1;
    }
    end_index
}

fn parse_list(kind: ListKind, lines: &[&str]) -> Fragment {
    let block_type = match kind {
        ListKind::Bullet => BlockType::BulletList,
        ListKind::Ordered => BlockType::OrderedList,
    };
    let mut fragment = Fragment::new(block_type, lines.join("\n"));

    let item_indent = lines.first().map(|line| indent(line)).unwrap_or(0);
    let mut item: Vec<&str> = Vec::new();
    for line in lines {
        let starts_item = indent(line) <= item_indent && list_marker(line.trim()).is_some();
        if starts_item && !item.is_empty() {
            fragment
                .children
                .push(Fragment::new(BlockType::ListItem, item.join("\n")));
            item.clear();
        }
        item.push(line);
    }
    if !item.is_empty() {
        fragment
            .children
            .push(Fragment::new(BlockType::ListItem, item.join("\n")));
    }
    fragment
}

/// Rewrites the level of a heading's markdown, leaving anything else untouched.
pub fn set_heading_level(markdown: &str, level: u8) -> String {
    let level = level.clamp(1, MAX_HEADING_LEVEL) as usize;
    let leading = indent(markdown);
    let (prefix, rest) = markdown.split_at(leading);
    let hashes = rest.bytes().take_while(|byte| *byte == b'#').count();
    if parse_heading(rest.lines().next().unwrap_or_default().trim()).is_none() {
        return markdown.to_string();
    }
    format!("{prefix}{}{}", "#".repeat(level), &rest[hashes..])
}

fn join_parts<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn assemble(fragments: &[Fragment]) -> String {
    join_parts(fragments.iter().map(|fragment| fragment.markdown.as_str()))
}

/// Assembles top-level blocks (already in document order).
pub fn assemble_blocks(blocks: &[Block]) -> String {
    assemble_with_ids(blocks).0
}

/// Assembled markdown plus the id of every assembled unit, by position.
pub fn assemble_with_ids(blocks: &[Block]) -> (String, Vec<BlockId>) {
    let units: Vec<&Block> = blocks
        .iter()
        .filter(|block| block.is_top_level() && !block.markdown.trim().is_empty())
        .collect();
    let markdown = join_parts(units.iter().map(|block| block.markdown.as_str()));
    (markdown, units.iter().map(|block| block.id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<BlockType> {
        Parser::parse(text)
            .iter()
            .map(|fragment| fragment.block_type)
            .collect()
    }

    #[test]
    fn recognises_every_block_type() {
        let input = "# Title\n\nPlain text\n\n- a\n- b\n\n1. one\n2. two\n\n> quoted\n\n```rust\nfn main() {}\n```\n\n---\n\n<!-- ::break:: -->\n\n| a | b |\n|---|---|\n\n![alt](img.png)\n\n<!-- ::bibliography:: -->\nSmith 2020";
        assert_eq!(
            kinds(input),
            vec![
                BlockType::Heading,
                BlockType::Paragraph,
                BlockType::BulletList,
                BlockType::OrderedList,
                BlockType::Blockquote,
                BlockType::CodeBlock,
                BlockType::HorizontalRule,
                BlockType::SectionBreak,
                BlockType::Table,
                BlockType::Image,
                BlockType::Bibliography,
            ]
        );
    }

    #[test]
    fn heading_level_and_title() {
        let fragments = Parser::parse("### Deep *title*");
        assert_eq!(fragments[0].heading_level, Some(3));
        assert_eq!(fragments[0].title(), Some("Deep title"));
        assert_eq!(kinds("#hashtag"), vec![BlockType::Paragraph]);
        assert_eq!(kinds("####### seven"), vec![BlockType::Paragraph]);
    }

    #[test]
    fn code_fence_keeps_blank_lines() {
        let input = "```\nline one\n\nline two\n```";
        let fragments = Parser::parse(input);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].markdown, input);
    }

    #[test]
    fn unclosed_fence_is_closed() {
        let fragments = Parser::parse("```\ncode\n\n");
        assert_eq!(fragments[0].markdown, "```\ncode\n```");
        let again = Parser::parse(&assemble(&fragments));
        assert_eq!(again, fragments);
    }

    #[test]
    fn list_items_become_children() {
        let fragments = Parser::parse("- first\n  continued\n- second\n  - nested");
        assert_eq!(fragments.len(), 1);
        let children = &fragments[0].children;
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].markdown, "- first\n  continued");
        assert_eq!(children[1].text_content, "second\nnested");
    }

    #[test]
    fn paragraph_stops_at_heading() {
        assert_eq!(
            kinds("text\n# Heading\nmore"),
            vec![BlockType::Paragraph, BlockType::Heading, BlockType::Paragraph]
        );
    }

    #[test]
    fn pseudo_section_inherits_level() {
        let fragments = Parser::parse("## Two\n\n<!-- ::break:: -->\n\nbody");
        assert!(fragments[1].is_pseudo_section);
        assert_eq!(fragments[1].heading_level, Some(2));
        assert_eq!(fragments[1].title(), Some(""));
    }

    #[test]
    fn notes_region_marks_following_blocks() {
        let fragments = Parser::parse("# Body\n\ntext\n\n# Notes\n\nnote one\n\n## Sub\n\nnote two\n\n# After\n\nx");
        let notes: Vec<bool> = fragments.iter().map(|fragment| fragment.is_notes).collect();
        assert_eq!(notes, vec![false, false, true, true, true, true, false, false]);
    }

    #[test]
    fn references_heading_is_bibliography() {
        let fragments = Parser::parse("# References\n\nSmith 2020");
        assert!(fragments.iter().all(|fragment| fragment.is_bibliography));
    }

    #[test]
    fn marker_lines_are_not_content() {
        let id = uuid::Uuid::new_v4();
        let annotated = format!("<!-- @block:{id} -->\n# Title\n\n<!-- @block:tmp-1 -->\nBody");
        assert_eq!(Parser::parse(&annotated), Parser::parse("# Title\n\nBody"));
    }

    #[test]
    fn parse_unit_never_drops_text() {
        assert!(Parser::parse_unit("").is_empty());
        assert!(Parser::parse_unit("  \n ").is_empty());
        assert_eq!(Parser::parse_unit("word").len(), 1);
    }

    #[test]
    fn set_heading_level_rewrites_hashes() {
        assert_eq!(set_heading_level("#### Title", 2), "## Title");
        assert_eq!(set_heading_level("  # Title", 3), "  ### Title");
        assert_eq!(set_heading_level("not a heading", 2), "not a heading");
    }

    #[test]
    fn assembly_skips_children_and_empty_blocks() {
        let project = uuid::Uuid::nil();
        let fragments = Parser::parse("- a\n- b\n\ntext");
        let mut blocks = Vec::new();
        for (index, fragment) in fragments.iter().enumerate() {
            let parent = fragment.to_block(project, SortOrder::ZERO.step(index * 2));
            for child in &fragment.children {
                let mut child_block = child.to_block(project, parent.sort_order.offset(0.5));
                child_block.parent_id = Some(parent.id);
                blocks.push(child_block);
            }
            blocks.push(parent);
        }
        md_sections_core::sort_blocks(&mut blocks);
        let (markdown, ids) = assemble_with_ids(&blocks);
        assert_eq!(markdown, "- a\n- b\n\ntext");
        assert_eq!(ids.len(), 2);
    }
}
