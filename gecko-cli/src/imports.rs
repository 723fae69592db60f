//! Loads token-tree files and the files their `import` entries name.
//!
//! An import name like `std.io` is looked up, in order, relative to the
//! working directory, relative to the importing file's directory, and in
//! each library root. Each location is tried as `std/io.json` and then as
//! `std/io/index.json`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use gecko_core::File;
use tracing::debug;
use walkdir::WalkDir;

const EXTENSION: &str = "json";
const INDEX: &str = "index";

/// Token-tree files found under the library roots, keyed by import name.
#[derive(Debug, Default)]
pub struct LibraryIndex {
    modules: HashMap<String, PathBuf>,
}

impl LibraryIndex {
    /// Walks every root; earlier roots win when two define the same name.
    pub fn scan(roots: &[PathBuf]) -> Result<Self> {
        let mut modules = HashMap::new();
        for root in roots {
            if !root.is_dir() {
                bail!("library root {} is not a directory", root.display());
            }
            for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
                let path = entry.path();
                if !path.is_file() || !path.extension().is_some_and(|ext| ext == EXTENSION) {
                    continue;
                }
                let relative = path.strip_prefix(root).unwrap_or(path);
                if let Some(name) = module_name(relative) {
                    debug!("library module {name} at {}", path.display());
                    modules.entry(name).or_insert_with(|| path.to_path_buf());
                }
            }
        }
        Ok(LibraryIndex { modules })
    }

    /// Finds the file for `name`, searching next to `importer_dir` before
    /// the library roots.
    pub fn resolve(&self, name: &str, importer_dir: Option<&Path>) -> Option<PathBuf> {
        let relative: PathBuf = name.split('.').collect();
        let mut bases = vec![PathBuf::from(".")];
        bases.extend(importer_dir.map(Path::to_path_buf));
        for base in bases {
            let direct = base.join(&relative).with_extension(EXTENSION);
            if direct.is_file() {
                return Some(direct);
            }
            let index = base.join(&relative).join(INDEX).with_extension(EXTENSION);
            if index.is_file() {
                return Some(index);
            }
        }
        self.modules.get(name).cloned()
    }
}

/// `a/b.json` -> `a.b`; `a/b/index.json` -> `a.b`.
fn module_name(relative: &Path) -> Option<String> {
    let stem = relative.with_extension("");
    let mut segments: Vec<String> = stem
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.len() > 1 && segments.last().is_some_and(|s| s == INDEX) {
        segments.pop();
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("."))
    }
}

pub fn ensure_token_tree(path: &Path) -> Result<()> {
    if path.extension().is_some_and(|ext| ext == EXTENSION) {
        Ok(())
    } else {
        bail!("{}: expected a .json token tree", path.display())
    }
}

/// Reads `path` and, recursively, every file it imports.
pub fn load_tree(path: &Path, index: &LibraryIndex) -> Result<File> {
    let mut stack = Vec::new();
    load(path, index, &mut stack)
}

fn load(path: &Path, index: &LibraryIndex, stack: &mut Vec<PathBuf>) -> Result<File> {
    ensure_token_tree(path)?;
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if stack.contains(&key) {
        bail!("import cycle through {}", path.display());
    }

    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read token tree {}", path.display()))?;
    let mut file: File = serde_json::from_str(&text)
        .with_context(|| format!("invalid token tree in {}", path.display()))?;

    stack.push(key);
    let names: Vec<String> = file.import_names().map(str::to_string).collect();
    for name in names {
        if file.imports.iter().any(|import| import.package == name) {
            continue;
        }
        let found = index
            .resolve(&name, path.parent())
            .ok_or_else(|| anyhow!("cannot resolve import '{name}' from {}", path.display()))?;
        debug!("import {name} -> {}", found.display());
        file.imports.push(load(&found, index, stack)?);
    }
    stack.pop();

    Ok(file)
}
