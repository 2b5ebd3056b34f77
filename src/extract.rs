//! File discovery and text extraction for `ragchat ingest`.
//!
//! PDFs go through `pdf-extract`; every other matched file is read as
//! UTF-8 text. Directories are walked recursively and filtered by glob
//! patterns relative to the directory root.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

/// Files picked up from a directory when no `--glob` is given.
pub const DEFAULT_INGEST_GLOBS: &[&str] = &["**/*.pdf", "**/*.txt", "**/*.md"];

/// Extract the text of one file. Fails on unreadable files, invalid
/// UTF-8, and PDFs that `pdf-extract` cannot parse.
pub fn extract_file(path: &Path) -> Result<String> {
    if is_pdf(path) {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        return pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| anyhow::anyhow!("PDF extraction failed for {}: {}", path.display(), e));
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))
}

/// Every file under `root` whose relative path matches one of `patterns`,
/// sorted by path.
pub fn collect_files(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    if patterns.is_empty() {
        bail!("at least one glob pattern is required");
    }
    let include = build_globset(patterns)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if include.is_match(relative) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
