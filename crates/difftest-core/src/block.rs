//! Block Extractor (C1): parses one source file into an ordered sequence of
//! named blocks with line ranges and normalized text.
//!
//! A block is a function definition, `async def`, or class definition
//! (including nested ones, addressed by dotted path from the module root),
//! plus one synthetic `<module>` block aggregating every module-scope
//! statement that is not itself part of a named block.

use rustpython_parser::ast::{self, Ranged};
use rustpython_parser::Parse;

/// The name of the synthetic block covering module-level statements.
pub const MODULE_BLOCK: &str = "<module>";

/// The name of the pseudo-block emitted when a file fails to parse.
pub const PARSE_ERROR_BLOCK: &str = "<parse_error>";

/// A named, contiguous region of one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    /// Dotted path from the module root, e.g. `ClassA.method_b`.
    pub name: String,
    /// First line of the block, 1-based, inclusive. Includes the first
    /// decorator's line when the block has decorators.
    pub start_line: usize,
    /// Last line of the block, 1-based, inclusive. Trailing blank lines are
    /// excluded.
    pub end_line: usize,
    /// Normalized text used as checksum input.
    pub normalized_text: String,
    /// True for `async def`.
    pub is_async: bool,
    /// Nesting depth (0 for a top-level `def`/`class`, 1 for a method of a
    /// top-level class, etc.). Not used by the checksum; exposed for
    /// diagnostics.
    pub depth: usize,
}

impl Block {
    /// The block's 32-bit CRC checksum over its normalized text.
    pub fn checksum(&self) -> i32 {
        crate::checksum::block_checksum(&self.normalized_text)
    }
}

/// Parse `source` (the contents of `filename`, used only for parser
/// diagnostics) into its ordered block list.
///
/// On a parse error, returns the single `<parse_error>` pseudo-block spanning
/// the whole file, checksummed over the raw bytes — any mutation of an
/// unparseable file then invalidates every test that touched it.
pub fn extract_blocks(source: &str, filename: &str) -> Vec<Block> {
    match ast::Suite::parse(source, filename) {
        Ok(suite) => extract_from_suite(&suite, source),
        Err(_) => vec![parse_error_block(source)],
    }
}

fn parse_error_block(source: &str) -> Block {
    let total_lines = source.lines().count().max(1);
    Block {
        name: PARSE_ERROR_BLOCK.to_string(),
        start_line: 1,
        end_line: total_lines,
        normalized_text: source.to_string(),
        is_async: false,
        depth: 0,
    }
}

fn extract_from_suite(suite: &[ast::Stmt], source: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut covered = LineCoverage::default();
    walk_statements(suite, source, &[], 0, &mut blocks, &mut covered);
    blocks.push(module_block(source, &covered));
    blocks
}

/// Tracks, at the top level only, which line ranges are owned by a named
/// block — used to build the `<module>` synthetic block's text.
#[derive(Default)]
struct LineCoverage {
    ranges: Vec<(usize, usize)>,
}

impl LineCoverage {
    fn mark(&mut self, start: usize, end: usize) {
        self.ranges.push((start, end));
    }

    fn is_covered(&self, line: usize) -> bool {
        self.ranges.iter().any(|(s, e)| line >= *s && line <= *e)
    }
}

fn walk_statements(
    stmts: &[ast::Stmt],
    source: &str,
    prefix: &[String],
    depth: usize,
    blocks: &mut Vec<Block>,
    covered: &mut LineCoverage,
) {
    for stmt in stmts {
        match stmt {
            ast::Stmt::FunctionDef(f) => {
                record_block(
                    &f.name,
                    false,
                    usize::from(f.range().start()),
                    usize::from(f.range().end()),
                    &f.decorator_list,
                    &f.body,
                    source,
                    prefix,
                    depth,
                    blocks,
                    covered,
                );
            }
            ast::Stmt::AsyncFunctionDef(f) => {
                record_block(
                    &f.name,
                    true,
                    usize::from(f.range().start()),
                    usize::from(f.range().end()),
                    &f.decorator_list,
                    &f.body,
                    source,
                    prefix,
                    depth,
                    blocks,
                    covered,
                );
            }
            ast::Stmt::ClassDef(c) => {
                record_block(
                    &c.name,
                    false,
                    usize::from(c.range().start()),
                    usize::from(c.range().end()),
                    &c.decorator_list,
                    &c.body,
                    source,
                    prefix,
                    depth,
                    blocks,
                    covered,
                );
            }
            _ => {
                // Any other module/class-scope statement contributes to the
                // enclosing `<module>` block implicitly: its lines are simply
                // never marked "covered" by a named block.
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn record_block(
    name: &ast::Identifier,
    is_async: bool,
    own_start_offset: usize,
    own_end_offset: usize,
    decorator_list: &[ast::Expr],
    body: &[ast::Stmt],
    source: &str,
    prefix: &[String],
    depth: usize,
    blocks: &mut Vec<Block>,
    covered: &mut LineCoverage,
) {
    let mut start_offset = own_start_offset;
    if let Some(first_decorator) = decorator_list.first() {
        start_offset = start_offset.min(usize::from(first_decorator.range().start()));
    }
    let end_offset = own_end_offset;

    let start_line = byte_offset_to_line(source, start_offset);
    let raw_end_line = byte_offset_to_line(source, end_offset.saturating_sub(1).max(start_offset));
    let end_line = trim_trailing_blank_lines(source, start_line, raw_end_line);

    let dotted_name = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix.join("."), name)
    };

    let normalized_text = normalize_lines(source, start_line, end_line);

    if depth == 0 {
        covered.mark(start_line, end_line);
    }

    blocks.push(Block {
        name: dotted_name.clone(),
        start_line,
        end_line,
        normalized_text,
        is_async,
        depth,
    });

    let mut nested_prefix = prefix.to_vec();
    nested_prefix.push(name.to_string());
    walk_statements(body, source, &nested_prefix, depth + 1, blocks, covered);
}

fn module_block(source: &str, covered: &LineCoverage) -> Block {
    let lines: Vec<&str> = source.lines().collect();
    let mut text_lines = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        if !covered.is_covered(line_no) {
            text_lines.push(*line);
        }
    }
    let raw_text = text_lines.join("\n");
    Block {
        name: MODULE_BLOCK.to_string(),
        start_line: 1,
        end_line: lines.len().max(1),
        normalized_text: normalize_text(&raw_text),
        is_async: false,
        depth: 0,
    }
}

/// 1-based line number containing byte offset `offset` in `source`.
fn byte_offset_to_line(source: &str, offset: usize) -> usize {
    let clamped = offset.min(source.len());
    source.as_bytes()[..clamped].iter().filter(|b| **b == b'\n').count() + 1
}

/// Shrinks `[start_line, end_line]` so it excludes any fully blank trailing
/// lines (after trailing-whitespace stripping), never shrinking past
/// `start_line`.
fn trim_trailing_blank_lines(source: &str, start_line: usize, end_line: usize) -> usize {
    let lines: Vec<&str> = source.lines().collect();
    let mut end = end_line.min(lines.len().max(1));
    while end > start_line {
        let text = lines.get(end.saturating_sub(1)).copied().unwrap_or("");
        if text.trim_end().is_empty() {
            end -= 1;
        } else {
            break;
        }
    }
    end
}

/// Normalize a line range `[start_line, end_line]` (1-based, inclusive) of
/// `source` for checksum input: trailing whitespace stripped per line,
/// `\n` line endings, and blank leading/trailing lines removed.
fn normalize_lines(source: &str, start_line: usize, end_line: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let start_idx = start_line.saturating_sub(1).min(lines.len());
    let end_idx = end_line.min(lines.len());
    let slice = if start_idx < end_idx {
        &lines[start_idx..end_idx]
    } else {
        &[]
    };
    normalize_text(&slice.join("\n"))
}

/// Apply the normalization rules in §4.1 to an already-assembled text blob:
/// strip trailing whitespace per line, reassemble with `\n`, strip fully
/// blank leading/trailing lines.
pub(crate) fn normalize_text(text: &str) -> String {
    let stripped: Vec<&str> = text.lines().map(|l| l.trim_end()).collect();
    let first_non_blank = stripped.iter().position(|l| !l.is_empty());
    let last_non_blank = stripped.iter().rposition(|l| !l.is_empty());
    match (first_non_blank, last_non_blank) {
        (Some(first), Some(last)) => stripped[first..=last].join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(blocks: &[Block]) -> Vec<&str> {
        blocks.iter().map(|b| b.name.as_str()).collect()
    }

    #[test]
    fn empty_file_has_single_module_block() {
        let blocks = extract_blocks("", "m.py");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, MODULE_BLOCK);
        assert_eq!(blocks[0].normalized_text, "");
    }

    #[test]
    fn top_level_function_and_module_block() {
        let src = "def f():\n    return 1\n";
        let blocks = extract_blocks(src, "m.py");
        assert_eq!(names(&blocks), vec!["f", MODULE_BLOCK]);
        assert!(blocks[0].normalized_text.contains("return 1"));
    }

    #[test]
    fn nested_method_gets_dotted_name() {
        let src = "class Outer:\n    class Inner:\n        def method(self):\n            pass\n";
        let blocks = extract_blocks(src, "m.py");
        assert_eq!(
            names(&blocks),
            vec!["Outer", "Outer.Inner", "Outer.Inner.method", MODULE_BLOCK]
        );
    }

    #[test]
    fn async_def_is_marked() {
        let src = "async def f():\n    return 1\n";
        let blocks = extract_blocks(src, "m.py");
        assert!(blocks[0].is_async);
    }

    #[test]
    fn decorator_line_is_part_of_block_not_module() {
        let src = "@decorator\ndef f():\n    return 1\n";
        let blocks = extract_blocks(src, "m.py");
        let f = &blocks[0];
        assert_eq!(f.start_line, 1);
        let module = blocks.last().unwrap();
        assert!(!module.normalized_text.contains("decorator"));
    }

    #[test]
    fn comment_above_function_is_retained_in_module_block() {
        let src = "# a comment\ndef f():\n    return 1\n";
        let blocks = extract_blocks(src, "m.py");
        let module = blocks.last().unwrap();
        assert!(module.normalized_text.contains("a comment"));
    }

    #[test]
    fn unparseable_file_yields_single_parse_error_block() {
        let src = "def f(:\n    pass\n";
        let blocks = extract_blocks(src, "m.py");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, PARSE_ERROR_BLOCK);
    }

    #[test]
    fn nested_function_body_counts_toward_outer_checksum() {
        let src_a = "def outer():\n    def inner():\n        return 1\n    return inner()\n";
        let src_b = "def outer():\n    def inner():\n        return 2\n    return inner()\n";
        let blocks_a = extract_blocks(src_a, "m.py");
        let blocks_b = extract_blocks(src_b, "m.py");
        let outer_a = blocks_a.iter().find(|b| b.name == "outer").unwrap();
        let outer_b = blocks_b.iter().find(|b| b.name == "outer").unwrap();
        assert_ne!(outer_a.checksum(), outer_b.checksum());
    }

    #[test]
    fn parsing_twice_is_deterministic() {
        let src = "class A:\n    def m(self):\n        return 1\n";
        let b1 = extract_blocks(src, "m.py");
        let b2 = extract_blocks(src, "m.py");
        let sums1: Vec<i32> = b1.iter().map(Block::checksum).collect();
        let sums2: Vec<i32> = b2.iter().map(Block::checksum).collect();
        assert_eq!(sums1, sums2);
    }

    #[test]
    fn editing_one_block_does_not_change_sibling_checksum() {
        let src_a = "def f():\n    return 1\n\n\ndef g():\n    return 2\n";
        let src_b = "def f():\n    return 999\n\n\ndef g():\n    return 2\n";
        let blocks_a = extract_blocks(src_a, "m.py");
        let blocks_b = extract_blocks(src_b, "m.py");
        let g_a = blocks_a.iter().find(|b| b.name == "g").unwrap();
        let g_b = blocks_b.iter().find(|b| b.name == "g").unwrap();
        assert_eq!(g_a.checksum(), g_b.checksum());
    }
}
