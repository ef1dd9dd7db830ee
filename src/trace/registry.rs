use std::collections::HashMap;

use super::BasicBlock;

/// Lookup from `(file, exit line)` to block id.
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    by_file: HashMap<String, HashMap<usize, String>>,
    len: usize,
}

impl BlockRegistry {
    /// Index `blocks` by exit position. On a collision the first block keeps
    /// the position.
    pub fn build(blocks: &[BasicBlock]) -> Self {
        let mut registry = Self::default();
        for block in blocks {
            let lines = registry.by_file.entry(block.file_path.clone()).or_default();
            if let Some(existing) = lines.get(&block.end_line) {
                tracing::warn!(
                    file = %block.file_path,
                    line = block.end_line,
                    kept = %existing,
                    dropped = %block.block_id,
                    "two blocks share an exit position"
                );
                continue;
            }
            lines.insert(block.end_line, block.block_id.clone());
            registry.len += 1;
        }
        registry
    }

    pub fn lookup(&self, file_path: &str, line: usize) -> Option<&str> {
        self.by_file
            .get(file_path)
            .and_then(|lines| lines.get(&line))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
