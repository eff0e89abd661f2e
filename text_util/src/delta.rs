//! Shifting document coordinates across text edits.
//!
//! Replacing the text of a range moves every position at or after the
//! range's end. [`RangeDelta`] captures that movement so it can be applied
//! to stored ranges without re-reading the document: a whole-line shift plus
//! a character shift that only affects positions on the edit's final line.

use crate::position::{position_at_relative, position_is_before};
use lsp_types::{Position, Range};

/// How positions at or after an edited range's end move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeDelta {
    /// The replaced range, in pre-edit coordinates.
    pub range: Range,
    /// Lines added minus lines removed.
    pub line_delta: i64,
    /// Character shift for positions that sat on `range.end`'s line.
    pub end_character_delta: i64,
}

/// Compute the delta produced by replacing `range` with `new_text`.
pub fn range_delta(range: Range, new_text: &str) -> RangeDelta {
    let new_end = position_at_relative(range.start, new_text, new_text.chars().count());
    RangeDelta {
        range,
        line_delta: i64::from(new_end.line) - i64::from(range.end.line),
        end_character_delta: i64::from(new_end.character) - i64::from(range.end.character),
    }
}

/// Shift `pos` by `delta`.
///
/// Positions strictly before the edit's end are unaffected. The character
/// shift applies only when `pos` sat on the same line as the edit's end.
pub fn apply_delta_to_position(delta: &RangeDelta, pos: Position) -> Position {
    if position_is_before(pos, delta.range.end) {
        return pos;
    }

    let line = (i64::from(pos.line) + delta.line_delta) as u32;
    let character = if pos.line == delta.range.end.line {
        (i64::from(pos.character) + delta.end_character_delta) as u32
    } else {
        pos.character
    };
    Position::new(line, character)
}

/// Shift both endpoints of `range` by `delta`.
pub fn apply_delta_to_range(delta: &RangeDelta, range: Range) -> Range {
    Range::new(
        apply_delta_to_position(delta, range.start),
        apply_delta_to_position(delta, range.end),
    )
}
