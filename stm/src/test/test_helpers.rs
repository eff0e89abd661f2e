//! Test helper utilities.
//!
//! Range notation parsing and a scripted command source.

use crate::editor::{CommandSource, CommandToken};
use anyhow::{Context, Result};
use lsp_types::{Position, Range};
use text_util::{position_is_after_or_equal, position_is_before_or_equal};

/// Parse range notation "line:col-line:col" into a [`Range`].
///
/// Line and column numbers are 0-indexed; the start must not be after the
/// end.
///
/// # Examples
///
/// ```ignore
/// let range = parse_range_notation("0:2-0:4")?;
/// assert_eq!(range.start.character, 2);
/// ```
pub fn parse_range_notation(notation: &str) -> Result<Range> {
    let parts: Vec<&str> = notation.split('-').collect();
    if parts.len() != 2 {
        anyhow::bail!("Invalid range notation '{notation}': expected 'line:col-line:col'");
    }

    let start = parse_position(parts[0])?;
    let end = parse_position(parts[1])?;

    if start.line > end.line || (start.line == end.line && start.character > end.character) {
        anyhow::bail!("Invalid range: start {start:?} is after end {end:?}");
    }

    Ok(Range { start, end })
}

/// Parse a position "line:col" into a [`Position`].
pub fn parse_position(s: &str) -> Result<Position> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        anyhow::bail!("Invalid position '{s}': expected 'line:col'");
    }

    let line = parts[0]
        .parse::<u32>()
        .with_context(|| format!("Invalid line number '{}'", parts[0]))?;

    let character = parts[1]
        .parse::<u32>()
        .with_context(|| format!("Invalid column number '{}'", parts[1]))?;

    Ok(Position { line, character })
}

/// Build a [`CommandToken`] from text and range notation.
pub fn token(text: &str, notation: &str) -> CommandToken {
    CommandToken {
        text: text.to_string(),
        range: parse_range_notation(notation).expect("valid range notation"),
    }
}

/// Command source backed by a fixed script of tokens.
///
/// `commands(start, end)` replays the tokens at or after `start`, stopping
/// past `end`, imitating a parser restarted from a new anchor.
pub struct ScriptedCommands {
    tokens: Vec<CommandToken>,
}

impl ScriptedCommands {
    pub fn new(tokens: Vec<CommandToken>) -> Self {
        Self { tokens }
    }

    /// Build a script from `(text, "line:col-line:col")` pairs.
    pub fn parse(specs: &[(&str, &str)]) -> Self {
        Self::new(
            specs
                .iter()
                .map(|(text, notation)| token(text, notation))
                .collect(),
        )
    }
}

impl CommandSource for ScriptedCommands {
    fn commands(
        &self,
        start: Position,
        end: Option<Position>,
    ) -> Box<dyn Iterator<Item = CommandToken> + Send + '_> {
        Box::new(
            self.tokens
                .iter()
                .filter(move |t| position_is_after_or_equal(t.range.start, start))
                .filter(move |t| end.map_or(true, |e| position_is_before_or_equal(t.range.start, e)))
                .cloned(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_range() {
        let range = parse_range_notation("0:2-0:4").expect("Failed to parse");
        assert_eq!(range.start, Position::new(0, 2));
        assert_eq!(range.end, Position::new(0, 4));
    }

    #[test]
    fn parse_multiline_range() {
        let range = parse_range_notation("0:0-2:1").expect("Failed to parse");
        assert_eq!(range.start, Position::new(0, 0));
        assert_eq!(range.end, Position::new(2, 1));
    }

    #[test]
    fn reject_invalid_range_format() {
        assert!(parse_range_notation("0:0").is_err());
        assert!(parse_range_notation("0:0-1:0-2:0").is_err());
    }

    #[test]
    fn reject_start_after_end() {
        assert!(parse_range_notation("0:10-0:5").is_err());
    }

    #[test]
    fn scripted_commands_restart_from_anchor() {
        let script = ScriptedCommands::parse(&[("A.", "0:0-0:2"), ("B.", "0:2-0:4")]);

        let from_start: Vec<_> = script.commands(Position::new(0, 0), None).collect();
        assert_eq!(from_start.len(), 2);

        let from_middle: Vec<_> = script.commands(Position::new(0, 2), None).collect();
        assert_eq!(from_middle.len(), 1);
        assert_eq!(from_middle[0].text, "B.");
    }
}
