//! Graph data model shared by the builder, cross-reference resolution and
//! block derivation.

use serde::{Deserialize, Serialize};

/// Kind of a statement-level graph vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Entry,
    Exit,
    Assign,
    Expr,
    Return,
    If,
    For,
    While,
    Try,
    Except,
    Call,
    Break,
    Continue,
    Join,
    LoopExit,
}

impl NodeKind {
    /// Lowercase name used inside node ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Entry => "entry",
            NodeKind::Exit => "exit",
            NodeKind::Assign => "assign",
            NodeKind::Expr => "expr",
            NodeKind::Return => "return",
            NodeKind::If => "if",
            NodeKind::For => "for",
            NodeKind::While => "while",
            NodeKind::Try => "try",
            NodeKind::Except => "except",
            NodeKind::Call => "call",
            NodeKind::Break => "break",
            NodeKind::Continue => "continue",
            NodeKind::Join => "join",
            NodeKind::LoopExit => "loop_exit",
        }
    }

    /// Nodes that open more than one successor path.
    pub fn is_branch_header(&self) -> bool {
        matches!(
            self,
            NodeKind::If | NodeKind::For | NodeKind::While | NodeKind::Try | NodeKind::Except
        )
    }

    /// Nodes after which straight-line flow does not continue.
    pub fn is_terminator(&self) -> bool {
        matches!(self, NodeKind::Return | NodeKind::Break | NodeKind::Continue)
    }

    /// Nodes the builder synthesizes rather than reading from source.
    pub fn is_synthetic(&self) -> bool {
        matches!(
            self,
            NodeKind::Entry | NodeKind::Exit | NodeKind::Join | NodeKind::LoopExit
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns_value: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub text: String,
    /// 1-indexed source line; `None` for ENTRY and EXIT.
    pub line: Option<usize>,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Control,
    Exception,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    TrueBranch,
    FalseBranch,
    LoopContinue,
    LoopExit,
    TryToJoin,
    ExceptToJoin,
    BodyToJoin,
    OrelseToJoin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<EdgeLabel>,
}

/// Statement graph for one callable unit (function, method or module body).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionGraph {
    pub name: String,
    pub entry_node: String,
    pub exit_node: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Set when the unit contained a parse error and was emptied.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_failed: bool,
}

impl FunctionGraph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.to == id)
    }
}

/// All unit graphs of one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileGraph {
    pub file_path: String,
    pub functions: Vec<FunctionGraph>,
    /// Lines (1-indexed) where the parser reported errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_errors: Vec<usize>,
}

impl FileGraph {
    pub fn function(&self, name: &str) -> Option<&FunctionGraph> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossRefKind {
    Call,
    CallUnresolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReference {
    pub source_file: String,
    pub source_function: String,
    pub source_node: String,
    pub target_file: Option<String>,
    pub target_function: String,
    pub target_node: Option<String>,
    #[serde(rename = "type")]
    pub kind: CrossRefKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectCfg {
    pub files: Vec<FileGraph>,
    pub cross_references: Vec<CrossReference>,
}

impl ProjectCfg {
    pub fn file(&self, path: &str) -> Option<&FileGraph> {
        self.files.iter().find(|f| f.file_path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&NodeKind::LoopExit).unwrap();
        assert_eq!(json, "\"LOOP_EXIT\"");
        assert_eq!(NodeKind::LoopExit.as_str(), "loop_exit");
    }

    #[test]
    fn test_edge_label_serializes_snake_case() {
        let edge = Edge {
            from: "a".into(),
            to: "b".into(),
            kind: EdgeKind::Control,
            label: Some(EdgeLabel::TrueBranch),
        };
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["type"], "control");
        assert_eq!(json["label"], "true_branch");
    }

    #[test]
    fn test_unlabeled_edge_omits_label() {
        let edge = Edge {
            from: "a".into(),
            to: "b".into(),
            kind: EdgeKind::Return,
            label: None,
        };
        let json = serde_json::to_value(&edge).unwrap();
        assert!(json.get("label").is_none());
    }

    #[test]
    fn test_kind_classification() {
        assert!(NodeKind::If.is_branch_header());
        assert!(NodeKind::Except.is_branch_header());
        assert!(!NodeKind::Assign.is_branch_header());
        assert!(NodeKind::Return.is_terminator());
        assert!(NodeKind::Join.is_synthetic());
        assert!(!NodeKind::Call.is_synthetic());
    }
}
