// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! File operations: the
//! runner's side of the three commands that let the UI browse and edit a
//! project's files directly, without going through the build executor.
//!
//! Every path is resolved relative to the project's root under the
//! runner's workspace and checked against it the same way
//! [`crate::build::BuildTransformer::path_safety_check`] warns on an
//! escaping tool-call path — except here an escape is refused outright
//! rather than merely warned about, since these commands write to disk on
//! the UI's direct instruction rather than an agent's.

use std::path::{Path, PathBuf};

use rb_core::id::ProjectId;

use crate::error::FileOpError;

/// Resolve `project_id`'s root directory under `workspace_root`: one
/// directory per project, same layout `start-dev-server`'s `cwd` points
/// into.
pub fn project_root(workspace_root: &Path, project_id: ProjectId) -> PathBuf {
    workspace_root.join(project_id.as_str())
}

/// Join `relative` onto `root` and refuse anything that escapes it, after
/// lexical normalization (the file may not exist yet, so `canonicalize`
/// can't be used for a write target).
fn resolve_within(root: &Path, relative: &Path) -> Result<PathBuf, FileOpError> {
    let joined = if relative.is_absolute() { relative.to_path_buf() } else { root.join(relative) };
    let normalized = normalize(&joined);
    if !normalized.starts_with(root) {
        return Err(FileOpError::PathEscape(relative.display().to_string()));
    }
    Ok(normalized)
}

/// Lexically collapse `.`/`..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `read-file`: returns the file's full content as UTF-8.
pub async fn read_file(root: &Path, relative: &Path) -> Result<String, FileOpError> {
    let target = resolve_within(root, relative)?;
    Ok(tokio::fs::read_to_string(target).await?)
}

/// `write-file`: creates parent directories as needed, then
/// writes (overwriting) the file.
pub async fn write_file(root: &Path, relative: &Path, content: &str) -> Result<(), FileOpError> {
    let target = resolve_within(root, relative)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, content).await?;
    Ok(())
}

/// `list-files`: one entry per directory child, non-recursive.
/// Directories are suffixed with `/` so the UI can tell them apart without
/// a second round trip.
pub async fn list_files(root: &Path, relative: &Path) -> Result<Vec<String>, FileOpError> {
    let target = resolve_within(root, relative)?;
    let mut entries = tokio::fs::read_dir(target).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if file_type.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_resolves_under_root() {
        let root = PathBuf::from("/workspace/prj-abc");
        let resolved = resolve_within(&root, Path::new("src/main.rs")).expect("resolve");
        assert_eq!(resolved, PathBuf::from("/workspace/prj-abc/src/main.rs"));
    }

    #[test]
    fn parent_dir_traversal_is_rejected() {
        let root = PathBuf::from("/workspace/prj-abc");
        let err = resolve_within(&root, Path::new("../../etc/passwd")).unwrap_err();
        assert!(matches!(err, FileOpError::PathEscape(_)));
    }

    #[test]
    fn absolute_path_outside_root_is_rejected() {
        let root = PathBuf::from("/workspace/prj-abc");
        let err = resolve_within(&root, Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, FileOpError::PathEscape(_)));
    }

    #[test]
    fn absolute_path_inside_root_is_accepted() {
        let root = PathBuf::from("/workspace/prj-abc");
        let resolved = resolve_within(&root, Path::new("/workspace/prj-abc/README.md")).expect("resolve");
        assert_eq!(resolved, PathBuf::from("/workspace/prj-abc/README.md"));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("prj-abc");
        tokio::fs::create_dir_all(&root).await.expect("mkdir");

        write_file(&root, Path::new("notes/todo.md"), "buy milk").await.expect("write");
        let content = read_file(&root, Path::new("notes/todo.md")).await.expect("read");
        assert_eq!(content, "buy milk");
    }

    #[tokio::test]
    async fn list_files_marks_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("prj-abc");
        tokio::fs::create_dir_all(root.join("src")).await.expect("mkdir");
        tokio::fs::write(root.join("Cargo.toml"), "").await.expect("write");

        let entries = list_files(&root, Path::new(".")).await.expect("list");
        assert_eq!(entries, vec!["Cargo.toml".to_string(), "src/".to_string()]);
    }
}
