//! Source files as they travel through the pipeline.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::errors::CfgError;

/// One source file: the path it is known by and its full text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub file_path: String,
    pub code: String,
}

impl SourceFile {
    pub fn new(file_path: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            code: code.into(),
        }
    }
}

/// Read the given files, walking directories for `.py` files.
///
/// Paths are recorded relative to `base` when possible so that module names
/// derived from them stay short.
pub fn collect_sources(paths: &[PathBuf], base: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    for path in paths {
        let path = if path.is_absolute() {
            path.clone()
        } else {
            base.join(path)
        };
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(&path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "py"))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path);
        }
    }

    files
        .into_iter()
        .map(|path| {
            let code = std::fs::read_to_string(&path).map_err(|source| CfgError::SourceReadFailed {
                path: path.clone(),
                source,
            })?;
            let display = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            Ok(SourceFile::new(display, code))
        })
        .collect()
}
