//! Slash-normalized path helpers.
//!
//! Every path stored in a record or key is normalized through
//! [`normalize_path`] so that lookups and prefix scans compare like with like.

use std::ffi::OsString;
use std::io;
use std::path::Path;

/// Normalize a path to forward slashes without duplicate or trailing separators.
pub fn normalize_path(path: impl AsRef<Path>) -> String {
    normalize_str(&path.as_ref().to_string_lossy())
}

/// String form of [`normalize_path`].
pub fn normalize_str(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_slash = false;
    for c in raw.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        out.push(c);
    }
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Absolute, symlink-free, normalized form of `path`.
///
/// The path need not exist. Its nearest existing ancestor is canonicalized
/// and the missing tail appended, so a file deleted from disk resolves to
/// the same string it was indexed under. Relative paths are taken from the
/// current directory.
pub fn resolve_path(path: impl AsRef<Path>) -> io::Result<String> {
    let path = path.as_ref();
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(mut resolved) => {
                for part in missing.iter().rev() {
                    resolved.push(part);
                }
                return Ok(normalize_path(resolved));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Ok(normalize_path(&absolute)),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Final component of a normalized path.
pub fn file_name_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) if idx + 1 < path.len() => &path[idx + 1..],
        Some(_) => "",
        None => path,
    }
}

/// Parent directory of a normalized path (`/` for top-level entries).
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Whether `path` equals `prefix` or lies beneath it.
pub fn is_under(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Whether `dir` is a strict ancestor of `path`.
pub fn is_ancestor_of(dir: &str, path: &str) -> bool {
    dir != path && is_under(path, dir)
}
