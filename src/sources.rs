use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::SourceDirConfig;
use crate::extract;
use crate::models::SourceDoc;

/// Scan a configured source directory for ingestable documents.
///
/// Results are sorted by relative path for deterministic ordering; files
/// whose extension maps to no supported content type are skipped.
pub fn scan_sources(config: &SourceDirConfig) -> Result<Vec<SourceDoc>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Source root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut docs = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some(content_type) = extract::content_type_for(&extension) else {
            continue;
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| rel_str.clone());

        docs.push(SourceDoc {
            name,
            rel_path: rel_str,
            path: path.to_path_buf(),
            content_type: content_type.to_string(),
        });
    }

    docs.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    Ok(docs)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn dir_config(root: &std::path::Path) -> SourceDirConfig {
        SourceDirConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: vec!["**/drafts/**".to_string()],
            follow_symlinks: false,
        }
    }

    #[test]
    fn scan_finds_included_files_in_sorted_order() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.txt"), "beta").unwrap();
        fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        fs::write(tmp.path().join("c.docx"), "skipped").unwrap();

        let docs = scan_sources(&dir_config(tmp.path())).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.txt"]);
        assert_eq!(docs[0].content_type, "text/markdown");
    }

    #[test]
    fn excluded_directories_are_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("drafts/wip.md"), "draft").unwrap();
        fs::write(tmp.path().join("final.md"), "done").unwrap();

        let docs = scan_sources(&dir_config(tmp.path())).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "final.md");
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let gone = tmp.path().join("nope");
        assert!(scan_sources(&dir_config(&gone)).is_err());
    }
}
