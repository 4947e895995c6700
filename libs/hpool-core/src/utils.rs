use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub fn load_json_from_file(path: &Path) -> Result<Value> {
    let content = std::fs::read(path)?;
    serde_json::from_slice(&content).map_err(|source| CoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_json_to_file(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut s = serde_json::to_string_pretty(value).map_err(|source| CoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    s.push('\n');
    std::fs::write(path, s)?;
    Ok(())
}

/// Path of `path` relative to `base`, with forward slashes so index rows are
/// the same on every platform.
pub fn get_path_rel(base: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .map_err(|_| CoreError::NotInBasePath {
            path: path.to_path_buf(),
            base: base.to_path_buf(),
        })?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return Err(CoreError::NotInBasePath {
            path: path.to_path_buf(),
            base: base.to_path_buf(),
        });
    }
    Ok(parts.join("/"))
}

/// Join a forward-slash relative filename from the index onto a base path.
pub fn join_rel(base: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|s| !s.is_empty())
        .fold(base.to_path_buf(), |acc, part| acc.join(part))
}

/// Lexical normalization; resolves `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, canonical where possible. Falls back to lexical normalization
/// for paths that do not exist (yet).
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if let Ok(p) = path.canonicalize() {
        return Ok(p);
    }
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(normalize_path(&abs))
}

pub fn mtime_of(path: &Path) -> Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified).timestamp())
}

pub fn files_equal(a: &Path, b: &Path) -> Result<bool> {
    let (ma, mb) = (std::fs::metadata(a)?, std::fs::metadata(b)?);
    if ma.len() != mb.len() {
        return Ok(false);
    }

    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let n = ra.read(&mut buf_a)?;
        if n == 0 {
            return Ok(rb.read(&mut buf_b[..1])? == 0);
        }
        rb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

/// All regular files below `base`, as forward-slash paths relative to it,
/// in sorted order.
pub fn find_files(base: &Path) -> Vec<String> {
    WalkDir::new(base)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| get_path_rel(base, e.path()).ok())
        .collect()
}

pub fn is_json_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "json")
        .unwrap_or(false)
}
