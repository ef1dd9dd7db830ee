//! Tree-sitter parsing helpers for Python sources.

use std::cell::RefCell;

use tree_sitter::{Node, Parser, Tree};

use crate::errors::CfgError;

// Parsers are reused per thread; building one per file is wasteful and
// blocking tasks may run on any worker thread.
thread_local! {
    static PYTHON_PARSER: RefCell<Option<Parser>> = const { RefCell::new(None) };
}

fn new_parser() -> Result<Parser, CfgError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| CfgError::Grammar(e.to_string()))?;
    Ok(parser)
}

/// Parse Python source with the thread-local parser.
pub fn parse_python(source: &str, path: &str) -> Result<Tree, CfgError> {
    PYTHON_PARSER.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(new_parser()?);
        }
        let parser = slot.as_mut().ok_or_else(|| CfgError::ParseAborted {
            path: path.to_string(),
        })?;
        parser.parse(source, None).ok_or_else(|| CfgError::ParseAborted {
            path: path.to_string(),
        })
    })
}

/// True when the snippet does not parse cleanly as Python.
pub fn has_syntax_errors(source: &str) -> bool {
    match parse_python(source, "<snippet>") {
        Ok(tree) => tree.root_node().has_error(),
        Err(_) => true,
    }
}

/// 1-indexed lines of every ERROR or MISSING node below `node`.
pub fn error_lines(node: Node<'_>) -> Vec<usize> {
    let mut lines = Vec::new();
    collect_error_lines(node, &mut lines);
    lines.sort_unstable();
    lines.dedup();
    lines
}

fn collect_error_lines(node: Node<'_>, out: &mut Vec<usize>) {
    if !node.has_error() {
        return;
    }
    if node.is_error() || node.is_missing() {
        out.push(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_error_lines(child, out);
    }
}

/// Source text of a node, empty if the range is not valid UTF-8.
pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// 1-indexed start line of a node.
pub fn line_of(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_source() {
        let tree = parse_python("def f(x):\n    return x\n", "a.py").unwrap();
        assert!(!tree.root_node().has_error());
        assert_eq!(tree.root_node().kind(), "module");
    }

    #[test]
    fn test_has_syntax_errors() {
        assert!(!has_syntax_errors("result = f(1)\nassert result == 2\n"));
        assert!(has_syntax_errors("def broken(:\n    pass\n"));
    }

    #[test]
    fn test_error_lines_point_at_broken_statement() {
        let source = "x = 1\ny = (\n";
        let tree = parse_python(source, "a.py").unwrap();
        let lines = error_lines(tree.root_node());
        assert!(!lines.is_empty());
    }
}
