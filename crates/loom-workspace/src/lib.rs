// SPDX-License-Identifier: Apache-2.0
//! Workspace-bounded path validation and atomic file I/O.
//!
//! This is the sole security boundary for every file-touching tool: no I/O
//! happens before [`validate`] succeeds.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("directory traversal: {requested} escapes base {base}")]
    DirectoryTraversal { base: String, requested: String },
    #[error("symlink escape: {0} resolves outside the workspace")]
    SymlinkEscape(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// A validated, absolute path known to live inside some workspace base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafePath(PathBuf);

impl SafePath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for SafePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Resolve, canonicalize, and bound `requested` inside `base`.
///
/// - Fails with [`WorkspaceError::InvalidPath`] if either side cannot be
///   canonicalized at all (e.g. contains NUL bytes).
/// - Fails with [`WorkspaceError::DirectoryTraversal`] if the canonical
///   requested path is not a prefix-match of the canonical base.
/// - If the target exists, symlinks are followed and re-checked; escaping
///   targets fail with [`WorkspaceError::SymlinkEscape`].
/// - If `require_exists` is true and the target is absent, fails with
///   [`WorkspaceError::FileNotFound`].
pub fn validate(base: &Path, requested: &Path, require_exists: bool) -> Result<SafePath> {
    let base_abs = absolutize(base)?;
    let canonical_base = fs::canonicalize(&base_abs)
        .map_err(|_| WorkspaceError::InvalidPath(base_abs.display().to_string()))?;

    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        base_abs.join(requested)
    };
    let lexical = lexical_normalize(&joined);

    if !lexical.starts_with(&canonical_base) {
        return Err(WorkspaceError::DirectoryTraversal {
            base: canonical_base.display().to_string(),
            requested: lexical.display().to_string(),
        });
    }

    match fs::canonicalize(&lexical) {
        Ok(resolved) => {
            if !resolved.starts_with(&canonical_base) {
                return Err(WorkspaceError::SymlinkEscape(lexical.display().to_string()));
            }
            Ok(SafePath(resolved))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if require_exists {
                return Err(WorkspaceError::FileNotFound(lexical.display().to_string()));
            }
            // Parent must still resolve inside the base (catches traversal
            // through a not-yet-existing path component).
            if let Some(parent) = lexical.parent() {
                if let Ok(resolved_parent) = fs::canonicalize(parent) {
                    if !resolved_parent.starts_with(&canonical_base) {
                        return Err(WorkspaceError::SymlinkEscape(lexical.display().to_string()));
                    }
                }
            }
            Ok(SafePath(lexical))
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            Err(WorkspaceError::PermissionDenied(lexical.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Process-wide workspace root, set once by `AgentBuilder::build` from the
/// detected/overridden project root. Every file-touching tool validates
/// against it instead of threading a base path through its own struct.
static WORKSPACE_ROOT: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Set the workspace root for the lifetime of the process. Only the first
/// call takes effect; later calls are no-ops, matching the one-agent-per-
/// process shape every binary in this workspace has today.
pub fn set_workspace_root(root: Option<PathBuf>) {
    let _ = WORKSPACE_ROOT.set(root);
}

/// The configured workspace root, if [`set_workspace_root`] has run.
pub fn workspace_root() -> Option<PathBuf> {
    WORKSPACE_ROOT.get().cloned().flatten()
}

/// Validate `requested` against the process-wide workspace root.
///
/// With no root configured (tests, library embeddings that bypass
/// `AgentBuilder`), every path is accepted unchanged — this function is
/// additive safety, not the only way to construct a valid path.
pub fn validate_against_root(requested: &Path, require_exists: bool) -> Result<PathBuf> {
    match workspace_root() {
        Some(root) => validate(&root, requested, require_exists).map(|p| p.as_path().to_path_buf()),
        None => Ok(requested.to_path_buf()),
    }
}

fn absolutize(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        Ok(p.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(p))
    }
}

/// Normalize `.`/`..` components lexically without touching the filesystem
/// (used for paths that may not exist yet).
fn lexical_normalize(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Write `bytes` to `path` atomically: write to a sibling temp file, fsync,
/// rename over the target. On any failure the original file is untouched and
/// the temp file is always cleaned up.
pub fn atomic_write(path: &SafePath, bytes: &[u8]) -> Result<()> {
    let target = path.as_path();
    let dir = target.parent().ok_or_else(|| {
        WorkspaceError::InvalidPath(target.display().to_string())
    })?;
    let tmp_name = format!(
        ".{}.loom-tmp-{}",
        target.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    );
    let tmp_path = dir.join(tmp_name);

    let write_result = (|| -> Result<()> {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        Ok(())
    })();

    match write_result {
        Ok(()) => match fs::rename(&tmp_path, target) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(e.into())
            }
        },
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

/// Result of a windowed file read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangedRead {
    pub content: String,
    pub total_lines: usize,
    pub returned_lines: usize,
    pub start_line: usize,
}

/// Read `path`, optionally windowed to `[offset_1based, offset+limit)`.
///
/// When both are absent the whole file is returned. When present, the
/// requested window is streamed line-by-line without loading the rest of the
/// file into memory; `total_lines` still reflects the file's full length.
pub fn read_with_range(
    path: &SafePath,
    offset_1based: Option<usize>,
    limit: Option<usize>,
) -> Result<RangedRead> {
    let file = File::open(path.as_path())?;
    let reader = BufReader::new(file);

    let start_line = offset_1based.unwrap_or(1).max(1);
    let end_line = limit.map(|l| start_line + l - 1);

    let mut collected: Vec<String> = Vec::new();
    let mut total_lines = 0usize;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let lineno = idx + 1;
        total_lines = lineno;
        let in_range = lineno >= start_line && end_line.map(|e| lineno <= e).unwrap_or(true);
        if offset_1based.is_none() && limit.is_none() {
            collected.push(line);
        } else if in_range {
            collected.push(line);
        }
    }

    let returned_lines = collected.len();
    let effective_start = if offset_1based.is_none() && limit.is_none() {
        1
    } else {
        start_line
    };

    Ok(RangedRead {
        content: collected.join("\n"),
        total_lines,
        returned_lines,
        start_line: effective_start,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn validate_allows_path_inside_base() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "hi").unwrap();
        let result = validate(tmp.path(), Path::new("a.txt"), true);
        assert!(result.is_ok());
    }

    #[test]
    fn validate_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let result = validate(tmp.path(), Path::new("../etc/passwd"), false);
        assert!(matches!(result, Err(WorkspaceError::DirectoryTraversal { .. })));
    }

    #[test]
    fn validate_rejects_absolute_traversal() {
        let tmp = TempDir::new().unwrap();
        let result = validate(tmp.path(), Path::new("/etc/passwd"), false);
        assert!(matches!(result, Err(WorkspaceError::DirectoryTraversal { .. })));
    }

    #[test]
    fn validate_require_exists_fails_on_missing() {
        let tmp = TempDir::new().unwrap();
        let result = validate(tmp.path(), Path::new("missing.txt"), true);
        assert!(matches!(result, Err(WorkspaceError::FileNotFound(_))));
    }

    #[test]
    fn validate_allows_missing_when_not_required() {
        let tmp = TempDir::new().unwrap();
        let result = validate(tmp.path(), Path::new("new.txt"), false);
        assert!(result.is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn validate_detects_symlink_escape() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            tmp.path().join("link.txt"),
        )
        .unwrap();
        let result = validate(tmp.path(), Path::new("link.txt"), true);
        assert!(matches!(result, Err(WorkspaceError::SymlinkEscape(_))));
    }

    #[test]
    fn atomic_write_creates_file_with_content() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.txt");
        fs::write(&target, "old").unwrap();
        let safe = validate(tmp.path(), Path::new("out.txt"), true).unwrap();
        atomic_write(&safe, b"new content").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new content");
    }

    #[test]
    fn atomic_write_leaves_no_temp_file_behind() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.txt");
        fs::write(&target, "old").unwrap();
        let safe = validate(tmp.path(), Path::new("out.txt"), true).unwrap();
        atomic_write(&safe, b"new").unwrap();
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("loom-tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn read_with_range_whole_file_when_absent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        fs::write(&path, "a\nb\nc\n").unwrap();
        let safe = validate(tmp.path(), Path::new("f.txt"), true).unwrap();
        let r = read_with_range(&safe, None, None).unwrap();
        assert_eq!(r.content, "a\nb\nc");
        assert_eq!(r.total_lines, 3);
        assert_eq!(r.returned_lines, 3);
        assert_eq!(r.start_line, 1);
    }

    #[test]
    fn read_with_range_windowed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        fs::write(&path, "1\n2\n3\n4\n5\n").unwrap();
        let safe = validate(tmp.path(), Path::new("f.txt"), true).unwrap();
        let r = read_with_range(&safe, Some(2), Some(2)).unwrap();
        assert_eq!(r.content, "2\n3");
        assert_eq!(r.total_lines, 5);
        assert_eq!(r.returned_lines, 2);
        assert_eq!(r.start_line, 2);
    }

    #[test]
    fn validate_against_root_passes_through_when_unset() {
        // WORKSPACE_ROOT is process-global and may already be set by another
        // test in this binary; only assert the no-root behavior when it is
        // genuinely unset, to keep this test order-independent.
        if workspace_root().is_none() {
            let r = validate_against_root(Path::new("/anything/at/all"), false);
            assert_eq!(r.unwrap(), PathBuf::from("/anything/at/all"));
        }
    }

    #[test]
    fn read_with_range_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        fs::write(&path, "1\n2\n3\n4\n5\n").unwrap();
        let safe = validate(tmp.path(), Path::new("f.txt"), true).unwrap();
        let a = read_with_range(&safe, Some(1), Some(3)).unwrap();
        let b = read_with_range(&safe, Some(1), Some(3)).unwrap();
        assert_eq!(a, b);
    }
}
