//! Position ordering and offset translation.
//!
//! Positions are ordered lexicographically by `(line, character)`. Character
//! offsets into command text are translated to document coordinates by
//! walking the text character by character, the same walk used for UTF
//! column conversion elsewhere in the editor stack.

use lsp_types::{Position, Range};

/// `a` is strictly before `b` in document order.
pub fn position_is_before(a: Position, b: Position) -> bool {
    a.line < b.line || (a.line == b.line && a.character < b.character)
}

/// `a` is before or at `b`.
pub fn position_is_before_or_equal(a: Position, b: Position) -> bool {
    a.line < b.line || (a.line == b.line && a.character <= b.character)
}

/// `a` is strictly after `b`.
pub fn position_is_after(a: Position, b: Position) -> bool {
    position_is_before(b, a)
}

/// `a` is at or after `b`.
pub fn position_is_after_or_equal(a: Position, b: Position) -> bool {
    position_is_before_or_equal(b, a)
}

/// `a` and `b` name the same position.
pub fn position_is_equal(a: Position, b: Position) -> bool {
    a.line == b.line && a.character == b.character
}

/// Half-open containment: `range.start <= pos < range.end`.
pub fn range_contains(range: Range, pos: Position) -> bool {
    position_is_before_or_equal(range.start, pos) && position_is_before(pos, range.end)
}

/// The interiors of two ranges intersect.
///
/// Ranges that merely touch at a boundary (one's end equals the other's
/// start) do not intersect under this predicate.
pub fn ranges_intersect(a: Range, b: Range) -> bool {
    position_is_before(a.start, b.end) && position_is_before(b.start, a.end)
}

/// Position reached after consuming `offset` characters of `text` from the
/// start of `text`, as a zero-based relative coordinate.
///
/// Offsets beyond the end of `text` are clamped to its end.
pub fn position_at(text: &str, offset: usize) -> Position {
    let mut line = 0u32;
    let mut character = 0u32;

    for ch in text.chars().take(offset) {
        if ch == '\n' {
            line += 1;
            character = 0;
        } else {
            character += 1;
        }
    }

    Position { line, character }
}

/// Position reached after consuming `offset` characters of `text` starting
/// from `anchor`.
///
/// Used to translate backend-reported character offsets within a submitted
/// command to document coordinates. Offsets beyond the end of `text` are
/// clamped.
pub fn position_at_relative(anchor: Position, text: &str, offset: usize) -> Position {
    let rel = position_at(text, offset);
    if rel.line == 0 {
        Position::new(anchor.line, anchor.character + rel.character)
    } else {
        Position::new(anchor.line + rel.line, rel.character)
    }
}
