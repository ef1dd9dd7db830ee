//! Cross-file call linkage.
//!
//! Callees are matched by bare name against every defined unit. This is not
//! scope-aware: two functions with the same name in unrelated files are
//! conflated, and the definition seen last wins. Consumers should treat a
//! `call` reference as a best-effort hint.

use std::collections::HashMap;

use super::builder::MODULE_UNIT;
use super::types::{CrossRefKind, CrossReference, FileGraph, NodeKind};

struct Definition<'a> {
    file: &'a str,
    function: &'a str,
    entry: &'a str,
}

/// Resolve every CALL node in `files` against the global name map.
pub fn resolve_cross_references(files: &[FileGraph]) -> Vec<CrossReference> {
    let mut definitions: HashMap<&str, Definition<'_>> = HashMap::new();
    for file in files {
        for function in &file.functions {
            if function.name == MODULE_UNIT {
                continue;
            }
            // Methods are registered under their bare name.
            let key = function
                .name
                .rsplit_once('.')
                .map(|(_, method)| method)
                .unwrap_or(&function.name);
            definitions.insert(
                key,
                Definition {
                    file: &file.file_path,
                    function: &function.name,
                    entry: &function.entry_node,
                },
            );
        }
    }

    let mut references = Vec::new();
    for file in files {
        for function in &file.functions {
            for node in function.nodes_of_kind(NodeKind::Call) {
                let Some(callee) = node.metadata.called_function.as_deref() else {
                    continue;
                };
                let bare = callee.rsplit('.').next().unwrap_or(callee);
                let reference = match definitions.get(bare) {
                    Some(def) => CrossReference {
                        source_file: file.file_path.clone(),
                        source_function: function.name.clone(),
                        source_node: node.id.clone(),
                        target_file: Some(def.file.to_string()),
                        target_function: def.function.to_string(),
                        target_node: Some(def.entry.to_string()),
                        kind: CrossRefKind::Call,
                    },
                    None => CrossReference {
                        source_file: file.file_path.clone(),
                        source_function: function.name.clone(),
                        source_node: node.id.clone(),
                        target_file: None,
                        target_function: callee.to_string(),
                        target_node: None,
                        kind: CrossRefKind::CallUnresolved,
                    },
                };
                references.push(reference);
            }
        }
    }
    references
}
