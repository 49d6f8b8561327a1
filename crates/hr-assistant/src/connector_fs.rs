use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::ingest::SourceDocument;

/// Walk `[documents] root` and read every file matching the include globs.
///
/// Paths are matched relative to the root. Files larger than
/// `max_file_bytes` or unreadable are skipped with a warning. Results are
/// sorted by path for deterministic ingestion order.
pub fn scan_documents(config: &DocumentsConfig) -> Result<Vec<SourceDocument>> {
    let root = config
        .root
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("documents.root is not configured"))?;
    if !root.exists() {
        bail!("Documents root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > config.max_file_bytes {
            warn!(
                path = %path.display(),
                size,
                limit = config.max_file_bytes,
                "skipping file over size limit"
            );
            continue;
        }

        match std::fs::read(path) {
            Ok(bytes) => docs.push(SourceDocument {
                path: path.to_string_lossy().to_string(),
                bytes,
            }),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }

    docs.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(root = %root.display(), found = docs.len(), "scanned documents");
    Ok(docs)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
