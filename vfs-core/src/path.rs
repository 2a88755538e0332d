//! Path normalization (§4.5)
//!
//! Applied once at every public API entry and again when a path is
//! relativized to a mount.

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::MAX_PATH_LEN;
use crate::error::VfsError;

/// Normalizes `path` per the rules below, applied left to right:
/// 1. Non-absolute paths are prefixed with `/`.
/// 2. Repeated slashes collapse to one.
/// 3. `/./` segments are removed.
/// 4. `/x/../` segments are removed.
/// 5. A trailing `/` is removed unless the whole path is `/`.
///
/// Fails `InvalidArg` if the normalized result exceeds [`MAX_PATH_LEN`].
pub fn normalize(path: &str) -> Result<String, VfsError> {
    let mut components: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                components.pop();
            }
            other => components.push(other),
        }
    }

    let mut out = String::with_capacity(path.len() + 1);
    if components.is_empty() {
        out.push('/');
    } else {
        for c in &components {
            out.push('/');
            out.push_str(c);
        }
    }

    if out.len() > MAX_PATH_LEN {
        return Err(VfsError::InvalidArg);
    }
    Ok(out)
}

/// Splits a normalized absolute path into its `/`-separated components.
/// `/` itself yields an empty iterator.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Returns `(parent, name)` for a normalized absolute path. Fails
/// `InvalidArg` for the root path, which has no parent.
pub fn split_parent(path: &str) -> Result<(String, &str), VfsError> {
    let idx = path.rfind('/').ok_or(VfsError::InvalidArg)?;
    let name = &path[idx + 1..];
    if name.is_empty() {
        return Err(VfsError::InvalidArg);
    }
    let parent = if idx == 0 {
        String::from("/")
    } else {
        String::from(&path[..idx])
    };
    Ok((parent, name))
}

/// True if `mount_path` is a prefix of `path` per §4.1's prefix rule:
/// either exact equality, or the character of `path` immediately after
/// `mount_path` is `/`.
pub fn is_mount_prefix(mount_path: &str, path: &str) -> bool {
    if mount_path == "/" {
        return true;
    }
    if !path.starts_with(mount_path) {
        return false;
    }
    match path.as_bytes().get(mount_path.len()) {
        None => true,
        Some(b'/') => true,
        _ => false,
    }
}

/// Joins a relative-to-mount directory path with a single child name.
/// `dir` is assumed already normalized; `name` is taken verbatim (it
/// comes from a directory entry, never from user input).
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        let mut out = String::with_capacity(name.len() + 1);
        out.push('/');
        out.push_str(name);
        out
    } else {
        let mut out = String::with_capacity(dir.len() + name.len() + 1);
        out.push_str(dir);
        out.push('/');
        out.push_str(name);
        out
    }
}

/// Computes the path relative to `mount_path`, itself re-normalized to an
/// absolute path rooted at the mount (`/` for an exact match).
pub fn relativize(mount_path: &str, path: &str) -> String {
    if mount_path == "/" {
        return String::from(path);
    }
    let rest = &path[mount_path.len()..];
    if rest.is_empty() {
        String::from("/")
    } else {
        String::from(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn collapses_and_resolves_dots() {
        assert_eq!(normalize("a/b").unwrap(), "/a/b");
        assert_eq!(normalize("/a//b/./c").unwrap(), "/a/b/c");
        assert_eq!(normalize("/a/b/../c").unwrap(), "/a/c");
        assert_eq!(normalize("/a/b/").unwrap(), "/a/b");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("/../..").unwrap(), "/");
    }

    #[test]
    fn idempotent() {
        let inputs = ["/a//b/./c/../d", "/", "x/y/z/"];
        for p in inputs {
            let once = normalize(p).unwrap();
            let twice = normalize(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn rejects_overlong_paths() {
        let long = "/".to_string() + &"a".repeat(MAX_PATH_LEN);
        assert_eq!(normalize(&long), Err(VfsError::InvalidArg));
    }

    #[test]
    fn mount_prefix_matching() {
        assert!(is_mount_prefix("/", "/mnt/x"));
        assert!(is_mount_prefix("/mnt", "/mnt/x"));
        assert!(is_mount_prefix("/mnt", "/mnt"));
        assert!(!is_mount_prefix("/mnt", "/mntx"));
    }

    #[test]
    fn split_parent_basic() {
        assert_eq!(split_parent("/a/b").unwrap(), ("/a".to_string(), "b"));
        assert_eq!(split_parent("/a").unwrap(), ("/".to_string(), "a"));
        assert!(split_parent("/").is_err());
    }

    #[test]
    fn join_handles_root_and_nested_dirs() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a/b", "c"), "/a/b/c");
    }
}
