use std::path::Path;

/// Normalize a path into the canonical form used as a map key.
///
/// Separators become `/`, repeated separators collapse, `.` components are
/// dropped and `..` is resolved lexically. The result never ends in `/`
/// unless it is the filesystem root.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');

    let mut parts: Vec<&str> = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                // `..` above the root of an absolute path stays at the root
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Normalize a filesystem path; non UTF-8 segments are replaced lossily.
pub fn normalize_fs_path(path: &Path) -> String {
    normalize_path(&path.to_string_lossy())
}

/// Join a normalized directory and a child name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        normalize_path(&format!("/{}", name))
    } else {
        normalize_path(&format!("{}/{}", dir, name))
    }
}

/// Parent directory of a normalized path, if it has one.
pub fn parent_path(norm_path: &str) -> Option<&str> {
    match norm_path.rfind('/') {
        Some(0) if norm_path.len() > 1 => Some("/"),
        Some(0) => None,
        Some(idx) => Some(&norm_path[..idx]),
        None => None,
    }
}

/// Final component of a normalized path.
pub fn file_name(norm_path: &str) -> &str {
    norm_path
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(norm_path)
}

/// Extension including the leading dot (`.rs`); dotfiles have none.
pub fn extension(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(idx) if idx > 0 => Some(&name[idx..]),
        _ => None,
    }
}

/// True when `path` equals `ancestor` or lies underneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path.starts_with('/');
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}
