//! Heading-level rule: the first section boundary is level 1 and no boundary
//! may sit more than one level below the one before it.

use crate::{Block, BlockId, MAX_HEADING_LEVEL};

/// Corrects a sequence of levels in document order.
///
/// Each level is compared against the *corrected* previous level, so a
/// demotion cascades to the headings that follow it.
pub fn correct_levels(levels: &[u8]) -> Vec<u8> {
    let mut previous = 0u8;
    levels
        .iter()
        .map(|&level| {
            let level = level.clamp(1, MAX_HEADING_LEVEL).min(previous + 1);
            previous = level;
            level
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelFix {
    pub id: BlockId,
    pub from: u8,
    pub to: u8,
}

/// Plans the level changes needed for `blocks` (document order).
///
/// Notes and bibliography regions are outside the rule. Pseudo-sections take
/// the level of the heading they follow rather than being demoted.
pub fn plan_level_fixes(blocks: &[Block]) -> Vec<LevelFix> {
    let mut fixes = Vec::new();
    let mut previous = 0u8;
    for block in blocks {
        if !block.is_top_level() || block.is_excluded() {
            continue;
        }
        let Some(current) = block.level() else {
            continue;
        };
        let stored = block.heading_level.unwrap_or(0);
        let target = if block.is_pseudo_section {
            previous.max(1)
        } else {
            current.min(previous + 1)
        };
        if stored != target {
            fixes.push(LevelFix {
                id: block.id,
                from: stored,
                to: target,
            });
        }
        previous = target;
    }
    fixes
}
