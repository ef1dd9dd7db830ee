//! Statement-level control-flow graph construction.
//!
//! Each callable unit (top-level function, class method, or the remaining
//! module-level statements) becomes one [`FunctionGraph`]. ENTRY and EXIT are
//! synthesized first, then the body is walked depth-first with a single
//! "current" pointer that compound statements fork and re-join explicitly.
//!
//! A unit whose syntax tree contains errors is emitted with an empty body
//! (ENTRY directly to EXIT) so one malformed definition never blocks the
//! rest of the file.

use std::path::Path;

use tree_sitter::Node as SyntaxNode;

use super::parse::{error_lines, line_of, node_text, parse_python};
use super::types::{Edge, EdgeKind, EdgeLabel, FileGraph, FunctionGraph, Node, NodeKind, NodeMetadata};
use crate::errors::CfgError;

/// Name of the unit holding top-level statements.
pub const MODULE_UNIT: &str = "<module>";

/// Build the graphs for every unit in one file.
pub fn build_file_graph(file_path: &str, source: &str) -> Result<FileGraph, CfgError> {
    let tree = parse_python(source, file_path)?;
    let root = tree.root_node();
    let stem = module_stem(file_path);

    let mut units: Vec<(String, SyntaxNode<'_>)> = Vec::new();
    let mut module_statements: Vec<SyntaxNode<'_>> = Vec::new();

    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match definition_of(child) {
            Some(def) if def.kind() == "function_definition" => {
                units.push((definition_name(def, source), def));
            }
            Some(def) if def.kind() == "class_definition" => {
                let class_name = definition_name(def, source);
                collect_methods(def, &class_name, source, &mut units);
            }
            _ if child.kind() == "comment" => {}
            _ => module_statements.push(child),
        }
    }

    let mut functions = Vec::with_capacity(units.len() + 1);
    for (name, def) in units {
        let mut builder = GraphBuilder::new(source, &stem, &name);
        match def.child_by_field_name("body") {
            Some(body) if !def.has_error() => builder.visit_block(body),
            _ => {
                tracing::debug!(file = file_path, unit = %name, "unit has parse errors, emptying body");
                builder.mark_failed();
            }
        }
        functions.push(builder.finish());
    }

    // Every file gets a module unit, even one with no top-level statements.
    let mut builder = GraphBuilder::new(source, &stem, MODULE_UNIT);
    if module_statements.iter().any(|s| s.has_error()) {
        builder.mark_failed();
    } else {
        for statement in module_statements {
            builder.visit_statement(statement);
        }
    }
    functions.push(builder.finish());

    Ok(FileGraph {
        file_path: file_path.to_string(),
        functions,
        parse_errors: error_lines(root),
    })
}

/// File name without directories or extension, used as the node id prefix.
pub fn module_stem(file_path: &str) -> String {
    Path::new(file_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_path.to_string())
}

/// Unwraps `decorated_definition` to the definition it decorates.
fn definition_of(node: SyntaxNode<'_>) -> Option<SyntaxNode<'_>> {
    match node.kind() {
        "function_definition" | "class_definition" => Some(node),
        "decorated_definition" => node.child_by_field_name("definition"),
        _ => None,
    }
}

fn definition_name(def: SyntaxNode<'_>, source: &str) -> String {
    def.child_by_field_name("name")
        .map(|n| node_text(n, source).to_string())
        .unwrap_or_else(|| format!("<anonymous@{}>", line_of(def)))
}

fn collect_methods<'t>(
    class: SyntaxNode<'t>,
    class_name: &str,
    source: &str,
    units: &mut Vec<(String, SyntaxNode<'t>)>,
) {
    let Some(body) = class.child_by_field_name("body") else {
        return;
    };
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        if let Some(def) = definition_of(child)
            && def.kind() == "function_definition"
        {
            let method = definition_name(def, source);
            units.push((format!("{class_name}.{method}"), def));
        }
    }
}

/// Where the next appended node attaches, and the label its edge carries.
struct Cursor {
    node: String,
    label: Option<EdgeLabel>,
}

impl Cursor {
    fn at(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            label: None,
        }
    }
}

struct GraphBuilder<'s> {
    source: &'s str,
    name: String,
    prefix: String,
    counter: usize,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    entry: String,
    exit: String,
    current: Option<Cursor>,
    failed: bool,
}

impl<'s> GraphBuilder<'s> {
    fn new(source: &'s str, stem: &str, unit: &str) -> Self {
        let mut builder = Self {
            source,
            name: unit.to_string(),
            prefix: format!("{stem}.{unit}"),
            counter: 0,
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: String::new(),
            exit: String::new(),
            current: None,
            failed: false,
        };
        builder.entry = builder.add_node(NodeKind::Entry, "ENTRY", None, NodeMetadata::default());
        // EXIT's id is reserved now; the node itself is appended by `finish`.
        builder.exit = builder.next_id(NodeKind::Exit);
        builder.current = Some(Cursor::at(builder.entry.clone()));
        builder
    }

    fn mark_failed(&mut self) {
        self.failed = true;
    }

    fn next_id(&mut self, kind: NodeKind) -> String {
        self.counter += 1;
        format!("{}.{}_{}", self.prefix, kind.as_str(), self.counter)
    }

    fn add_node(
        &mut self,
        kind: NodeKind,
        text: impl Into<String>,
        line: Option<usize>,
        metadata: NodeMetadata,
    ) -> String {
        let id = self.next_id(kind);
        self.nodes.push(Node {
            id: id.clone(),
            kind,
            text: text.into(),
            line,
            metadata,
        });
        id
    }

    fn link(&mut self, from: &str, to: &str, kind: EdgeKind, label: Option<EdgeLabel>) {
        self.edges.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
            kind,
            label,
        });
    }

    /// Add a node linked from the current pointer and make it current.
    fn append(
        &mut self,
        kind: NodeKind,
        text: impl Into<String>,
        line: usize,
        metadata: NodeMetadata,
    ) -> String {
        let id = self.add_node(kind, text, Some(line), metadata);
        if let Some(cursor) = self.current.take() {
            self.link(&cursor.node, &id, EdgeKind::Control, cursor.label);
        }
        self.current = Some(Cursor::at(id.clone()));
        id
    }

    fn text(&self, node: SyntaxNode<'_>) -> &'s str {
        node_text(node, self.source)
    }

    /// First source line of a compound statement, for node text.
    fn header_text(&self, node: SyntaxNode<'_>) -> String {
        self.text(node).lines().next().unwrap_or("").trim_end().to_string()
    }

    fn visit_block(&mut self, block: SyntaxNode<'_>) {
        let mut cursor = block.walk();
        let statements: Vec<SyntaxNode<'_>> = block.named_children(&mut cursor).collect();
        for statement in statements {
            self.visit_statement(statement);
        }
    }

    fn visit_statement(&mut self, stmt: SyntaxNode<'_>) {
        let line = line_of(stmt);
        match stmt.kind() {
            "expression_statement" => {
                self.emit_calls(stmt);
                let kind = match stmt.named_child(0).map(|c| c.kind()) {
                    Some("assignment") | Some("augmented_assignment") => NodeKind::Assign,
                    _ => NodeKind::Expr,
                };
                self.append(kind, self.text(stmt).trim(), line, NodeMetadata::default());
            }
            "return_statement" => {
                self.emit_calls(stmt);
                let metadata = NodeMetadata {
                    returns_value: Some(stmt.named_child_count() > 0),
                    ..Default::default()
                };
                let id = self.append(NodeKind::Return, self.text(stmt).trim(), line, metadata);
                let exit = self.exit.clone();
                self.link(&id, &exit, EdgeKind::Return, None);
                self.current = None;
            }
            "if_statement" => {
                let mut cursor = stmt.walk();
                let alternatives: Vec<SyntaxNode<'_>> = stmt
                    .children_by_field_name("alternative", &mut cursor)
                    .collect();
                if let (Some(condition), Some(consequence)) = (
                    stmt.child_by_field_name("condition"),
                    stmt.child_by_field_name("consequence"),
                ) {
                    self.visit_if(line, condition, consequence, &alternatives);
                }
            }
            "for_statement" => self.visit_for(stmt),
            "while_statement" => self.visit_while(stmt),
            "try_statement" => self.visit_try(stmt),
            "with_statement" => self.visit_with(stmt),
            "break_statement" => {
                self.append(NodeKind::Break, "break", line, NodeMetadata::default());
            }
            "continue_statement" => {
                self.append(NodeKind::Continue, "continue", line, NodeMetadata::default());
            }
            "pass_statement"
            | "import_statement"
            | "import_from_statement"
            | "future_import_statement"
            | "global_statement"
            | "nonlocal_statement"
            | "comment"
            | "function_definition"
            | "class_definition"
            | "decorated_definition" => {}
            _ => {
                // raise, assert, del, match and anything newer: one linear node.
                self.emit_calls(stmt);
                let text = self.header_text(stmt);
                self.append(NodeKind::Expr, text, line, NodeMetadata::default());
            }
        }
    }

    /// Emit one CALL node per call expression below `node`, outermost first.
    fn emit_calls(&mut self, node: SyntaxNode<'_>) {
        let mut calls = Vec::new();
        collect_calls(node, &mut calls);
        for call in calls {
            let metadata = NodeMetadata {
                called_function: self.callee_name(call),
                ..Default::default()
            };
            self.append(NodeKind::Call, self.text(call).trim(), line_of(call), metadata);
        }
    }

    fn callee_name(&self, call: SyntaxNode<'_>) -> Option<String> {
        let function = call.child_by_field_name("function")?;
        match function.kind() {
            "identifier" => Some(self.text(function).to_string()),
            "attribute" => Some(
                self.text(function)
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect(),
            ),
            _ => None,
        }
    }

    fn visit_if(
        &mut self,
        line: usize,
        condition: SyntaxNode<'_>,
        consequence: SyntaxNode<'_>,
        alternatives: &[SyntaxNode<'_>],
    ) {
        self.emit_calls(condition);
        let condition_text = self.text(condition).to_string();
        let if_id = self.append(
            NodeKind::If,
            format!("if {condition_text}:"),
            line,
            NodeMetadata {
                condition: Some(condition_text),
                ..Default::default()
            },
        );

        let body_tail = self.walk_arm(&if_id, EdgeLabel::TrueBranch, |b| b.visit_block(consequence));
        let orelse_tail = self.walk_arm(&if_id, EdgeLabel::FalseBranch, |b| {
            match alternatives.split_first() {
                None => {}
                Some((elif, rest)) if elif.kind() == "elif_clause" => {
                    if let (Some(condition), Some(consequence)) = (
                        elif.child_by_field_name("condition"),
                        elif.child_by_field_name("consequence"),
                    ) {
                        b.visit_if(line_of(*elif), condition, consequence, rest);
                    }
                }
                Some((else_clause, _)) => {
                    if let Some(body) = else_clause.child_by_field_name("body") {
                        b.visit_block(body);
                    }
                }
            }
        });

        let join = self.add_node(
            NodeKind::Join,
            format!("join_after_if_line_{line}"),
            Some(line),
            NodeMetadata::default(),
        );
        if let Some(Some(tail)) = body_tail {
            self.link(&tail, &join, EdgeKind::Control, Some(EdgeLabel::BodyToJoin));
        }
        if let Some(Some(tail)) = orelse_tail {
            self.link(&tail, &join, EdgeKind::Control, Some(EdgeLabel::OrelseToJoin));
        }
        self.current = Some(Cursor::at(join));
    }

    /// Walk one branch arm starting at `header`.
    ///
    /// Returns `None` when the arm produced no nodes (the header is linked to
    /// EXIT with `label` instead), otherwise the arm's tail, which is itself
    /// `None` when every path through the arm returned.
    fn walk_arm(
        &mut self,
        header: &str,
        label: EdgeLabel,
        walk: impl FnOnce(&mut Self),
    ) -> Option<Option<String>> {
        let before = self.nodes.len();
        self.current = Some(Cursor {
            node: header.to_string(),
            label: Some(label),
        });
        walk(self);
        if self.nodes.len() == before {
            self.current = None;
            let exit = self.exit.clone();
            self.link(header, &exit, EdgeKind::Control, Some(label));
            return None;
        }
        Some(self.current.take().map(|c| c.node))
    }

    fn visit_for(&mut self, stmt: SyntaxNode<'_>) {
        let line = line_of(stmt);
        let left = stmt.child_by_field_name("left").map(|n| self.text(n)).unwrap_or("");
        let right_node = stmt.child_by_field_name("right");
        let right = right_node.map(|n| self.text(n)).unwrap_or("");
        if let Some(right_node) = right_node {
            self.emit_calls(right_node);
        }
        let header = self.append(
            NodeKind::For,
            format!("for {left} in {right}:"),
            line,
            NodeMetadata {
                iterator: Some(right.to_string()),
                ..Default::default()
            },
        );
        self.walk_loop(stmt, header, "for", line);
    }

    fn visit_while(&mut self, stmt: SyntaxNode<'_>) {
        let line = line_of(stmt);
        let condition_node = stmt.child_by_field_name("condition");
        let condition = condition_node.map(|n| self.text(n)).unwrap_or("").to_string();
        if let Some(condition_node) = condition_node {
            self.emit_calls(condition_node);
        }
        let header = self.append(
            NodeKind::While,
            format!("while {condition}:"),
            line,
            NodeMetadata {
                condition: Some(condition),
                ..Default::default()
            },
        );
        self.walk_loop(stmt, header, "while", line);
    }

    fn walk_loop(&mut self, stmt: SyntaxNode<'_>, header: String, keyword: &str, line: usize) {
        let before = self.nodes.len();
        self.current = Some(Cursor::at(header.clone()));
        if let Some(body) = stmt.child_by_field_name("body") {
            self.visit_block(body);
        }
        if self.nodes.len() > before
            && let Some(tail) = self.current.take()
        {
            self.link(&tail.node, &header, EdgeKind::Control, Some(EdgeLabel::LoopContinue));
        }

        let loop_exit = self.add_node(
            NodeKind::LoopExit,
            format!("exit_{keyword}_line_{line}"),
            Some(line),
            NodeMetadata::default(),
        );
        self.link(&header, &loop_exit, EdgeKind::Control, Some(EdgeLabel::LoopExit));
        self.current = Some(Cursor::at(loop_exit));

        if let Some(body) = stmt
            .child_by_field_name("alternative")
            .and_then(|alt| alt.child_by_field_name("body"))
        {
            self.visit_block(body);
        }
    }

    fn visit_try(&mut self, stmt: SyntaxNode<'_>) {
        let line = line_of(stmt);
        let try_id = self.append(NodeKind::Try, "try:", line, NodeMetadata::default());

        if let Some(body) = stmt.child_by_field_name("body") {
            self.visit_block(body);
        }

        let mut cursor = stmt.walk();
        let clauses: Vec<SyntaxNode<'_>> = stmt.named_children(&mut cursor).collect();

        // `else` runs only when the protected body completed.
        for clause in clauses.iter().filter(|c| c.kind() == "else_clause") {
            if let Some(body) = clause.child_by_field_name("body") {
                self.visit_block(body);
            }
        }
        let body_tail = self.current.take().map(|c| c.node);

        let mut handler_tails = Vec::new();
        for handler in clauses
            .iter()
            .filter(|c| matches!(c.kind(), "except_clause" | "except_group_clause"))
        {
            let exception_type = self.exception_type(*handler);
            let except_id = self.add_node(
                NodeKind::Except,
                format!("except {exception_type}:"),
                Some(line_of(*handler)),
                NodeMetadata {
                    exception_type: Some(exception_type),
                    ..Default::default()
                },
            );
            self.link(&try_id, &except_id, EdgeKind::Exception, None);
            self.current = Some(Cursor::at(except_id));
            if let Some(block) = last_block(*handler) {
                self.visit_block(block);
            }
            handler_tails.push(self.current.take().map(|c| c.node));
        }

        let join = self.add_node(
            NodeKind::Join,
            format!("join_after_try_line_{line}"),
            Some(line),
            NodeMetadata::default(),
        );
        if let Some(tail) = body_tail {
            self.link(&tail, &join, EdgeKind::Control, Some(EdgeLabel::TryToJoin));
        }
        for tail in handler_tails.into_iter().flatten() {
            self.link(&tail, &join, EdgeKind::Control, Some(EdgeLabel::ExceptToJoin));
        }
        self.current = Some(Cursor::at(join));

        for clause in clauses.iter().filter(|c| c.kind() == "finally_clause") {
            if let Some(block) = last_block(*clause) {
                self.visit_block(block);
            }
        }
    }

    fn exception_type(&self, handler: SyntaxNode<'_>) -> String {
        let value = match handler.kind() {
            "except_clause" => handler.child_by_field_name("value"),
            _ => {
                let mut cursor = handler.walk();
                handler
                    .named_children(&mut cursor)
                    .find(|c| c.kind() != "block")
            }
        };
        // `except E as err` parses as an as_pattern; the label is just `E`.
        let value = value.map(|v| match v.kind() {
            "as_pattern" => v.named_child(0).unwrap_or(v),
            _ => v,
        });
        value
            .map(|v| self.text(v).to_string())
            .unwrap_or_else(|| "Exception".to_string())
    }

    fn visit_with(&mut self, stmt: SyntaxNode<'_>) {
        let line = line_of(stmt);
        let mut cursor = stmt.walk();
        let clause = stmt
            .named_children(&mut cursor)
            .find(|c| c.kind() == "with_clause");
        let clause_text = clause.map(|c| self.text(c)).unwrap_or("");
        if let Some(clause) = clause {
            self.emit_calls(clause);
        }
        self.append(
            NodeKind::Expr,
            format!("with {clause_text}:"),
            line,
            NodeMetadata::default(),
        );
        if let Some(body) = stmt.child_by_field_name("body") {
            self.visit_block(body);
        }
    }

    fn finish(mut self) -> FunctionGraph {
        if self.failed {
            self.nodes.truncate(1);
            self.edges.clear();
            self.current = Some(Cursor::at(self.entry.clone()));
        }
        self.nodes.push(Node {
            id: self.exit.clone(),
            kind: NodeKind::Exit,
            text: "EXIT".to_string(),
            line: None,
            metadata: NodeMetadata::default(),
        });
        if let Some(cursor) = self.current.take() {
            let exit = self.exit.clone();
            self.link(&cursor.node, &exit, EdgeKind::Control, cursor.label);
        }
        FunctionGraph {
            name: self.name,
            entry_node: self.entry,
            exit_node: self.exit,
            nodes: self.nodes,
            edges: self.edges,
            parse_failed: self.failed,
        }
    }
}

fn collect_calls<'t>(node: SyntaxNode<'t>, out: &mut Vec<SyntaxNode<'t>>) {
    if node.kind() == "call" {
        out.push(node);
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_calls(child, out);
    }
}

fn last_block(node: SyntaxNode<'_>) -> Option<SyntaxNode<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| c.kind() == "block")
        .last()
}
