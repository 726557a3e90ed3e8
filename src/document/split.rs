//! Document splitting.
//!
//! Decomposes document text into ordered content units sized for one model
//! call. Eager splitting computes every unit up front; lazy splitting is a
//! cooperative pull model — the next unit is computed only when the caller
//! asks for it, so early units can satisfy an extraction without reading the
//! whole document.
//!
//! Boundary rules: units break at paragraph boundaries, a markdown table is
//! never split mid-block, and an oversize block falls back to a sentence
//! boundary cut with a configurable overlap window so entities straddling a
//! cut are not lost.

use serde::{Deserialize, Serialize};

/// An ordered slice of a document sized for one model call.
#[derive(Debug, Clone, Serialize)]
pub struct ContentUnit {
    pub index: usize,
    pub text: String,
    /// Byte offsets into the source text. Adjacent spans overlap only after
    /// a budget-driven cut, by at most the configured window.
    pub start: usize,
    pub end: usize,
    pub token_estimate: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Compute the full unit sequence before any model call.
    Eager,
    /// Compute one unit per pull.
    Lazy,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SplitConfig {
    /// Token budget per unit.
    pub max_unit_tokens: usize,
    /// Overlap carried backward across budget-driven cuts, in tokens.
    pub overlap_tokens: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            max_unit_tokens: 2048,
            overlap_tokens: 50,
        }
    }
}

impl SplitConfig {
    /// Character budget that keeps the unit's token estimate within budget.
    fn max_chars(&self) -> usize {
        (self.max_unit_tokens * 7 / 2).max(16)
    }

    fn overlap_chars(&self) -> usize {
        self.overlap_tokens * 4
    }
}

/// Estimate token cost from text length: ~4 characters per token for prose,
/// plus 10% headroom for special tokens.
pub fn estimate_tokens(text: &str) -> usize {
    let base = text.len().div_ceil(4);
    base + base / 10
}

/// Pick a splitting strategy for a document against a context window:
/// eager when the window comfortably exceeds the document, lazy otherwise.
pub fn choose_strategy(text: &str, context_window_tokens: usize) -> SplitStrategy {
    if estimate_tokens(text) * 2 <= context_window_tokens {
        SplitStrategy::Eager
    } else {
        SplitStrategy::Lazy
    }
}

pub struct Splitter {
    config: SplitConfig,
}

impl Splitter {
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    /// Full ordered unit sequence, computed up front.
    pub fn split_eager(&self, text: &str) -> Vec<ContentUnit> {
        let mut cursor = self.cursor(text);
        let mut units = Vec::new();
        while let Some(unit) = cursor.next_unit() {
            units.push(unit);
        }
        units
    }

    /// Pull-based cursor over the same unit sequence.
    pub fn cursor<'a>(&self, text: &'a str) -> UnitCursor<'a> {
        UnitCursor {
            text,
            pos: 0,
            index: 0,
            config: self.config,
        }
    }
}

impl Default for Splitter {
    fn default() -> Self {
        Self::new(SplitConfig::default())
    }
}

/// Lazy unit producer. Each `next_unit` call computes exactly one unit.
pub struct UnitCursor<'a> {
    text: &'a str,
    pos: usize,
    index: usize,
    config: SplitConfig,
}

impl<'a> UnitCursor<'a> {
    pub fn next_unit(&mut self) -> Option<ContentUnit> {
        if self.pos >= self.text.len() {
            return None;
        }

        let start = self.pos;
        let max_chars = self.config.max_chars();
        let first_block = block_end(self.text, start);

        let (end, next_pos) = if first_block - start > max_chars {
            // Oversize block: cut at a sentence boundary within budget and
            // step back by the overlap window so a split entity survives.
            let cut = sentence_cut(self.text, start, start + max_chars);
            let overlap = self.config.overlap_chars();
            let back = cut.saturating_sub(overlap).max(start + 1);
            let mut next = floor_char_boundary(self.text, back);
            if next <= start {
                next = cut;
            }
            (cut, next)
        } else {
            // Greedily add whole blocks while they fit the budget.
            let mut end = first_block;
            loop {
                if end >= self.text.len() {
                    break;
                }
                let next = block_end(self.text, end);
                if next - start > max_chars {
                    break;
                }
                end = next;
            }
            (end, end)
        };

        let slice = &self.text[start..end];
        let unit = ContentUnit {
            index: self.index,
            text: slice.to_string(),
            start,
            end,
            token_estimate: estimate_tokens(slice),
        };
        self.index += 1;
        self.pos = next_pos;
        Some(unit)
    }
}

/// End of the block starting at `pos`: leading blank lines, then one
/// paragraph (or one contiguous markdown table), then trailing blank lines.
/// Blocks tile the text exactly.
fn block_end(text: &str, pos: usize) -> usize {
    let len = text.len();
    let mut i = pos;

    // Leading blank lines belong to this block
    while i < len {
        let (line_end, blank) = line_info(text, i);
        if blank {
            i = line_end;
        } else {
            break;
        }
    }
    if i >= len {
        return len;
    }

    let in_table = text[i..].starts_with('|');

    // Content lines: a table block groups consecutive '|' lines; a paragraph
    // runs until a blank line or the start of a table.
    while i < len {
        let (line_end, blank) = line_info(text, i);
        if blank {
            break;
        }
        let is_table_line = text[i..].starts_with('|');
        if is_table_line != in_table {
            break;
        }
        i = line_end;
    }

    // Trailing blank lines
    while i < len {
        let (line_end, blank) = line_info(text, i);
        if !blank {
            break;
        }
        i = line_end;
    }

    i
}

/// (end index just past the newline, line is blank)
fn line_info(text: &str, pos: usize) -> (usize, bool) {
    let rest = &text[pos..];
    let end = match rest.find('\n') {
        Some(n) => pos + n + 1,
        None => text.len(),
    };
    let blank = text[pos..end].trim().is_empty();
    (end, blank)
}

/// Cut position for an oversize block: prefer a ". " boundary in the last
/// 20% of the budget window, else a hard cut at the character boundary.
fn sentence_cut(text: &str, start: usize, limit: usize) -> usize {
    let limit = floor_char_boundary(text, limit.min(text.len()));
    let search_start = floor_char_boundary(text, start + (limit - start) * 4 / 5);

    match text[search_start..limit].rfind(". ") {
        Some(rel) => search_start + rel + 2,
        None => limit,
    }
}

fn floor_char_boundary(text: &str, mut i: usize) -> usize {
    if i >= text.len() {
        return text.len();
    }
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}
