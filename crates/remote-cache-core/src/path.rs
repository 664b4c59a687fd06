//! Remote path helpers
//!
//! Remote paths are always POSIX-style regardless of the host OS. Local
//! paths are normalized to forward slashes before they are joined onto a
//! remote path.

/// Replace native separators with `/`
pub fn to_posix(path: &str) -> String {
    path.replace('\\', "/")
}

/// Join `name` onto the remote directory `root` with `/`
pub fn join(root: &str, name: &str) -> String {
    let root = to_posix(root);
    let name = to_posix(name);
    let name = name.trim_start_matches('/');

    if root.is_empty() {
        return name.to_string();
    }

    let trimmed = root.trim_end_matches('/');
    if trimmed.is_empty() {
        // root was "/" (or several slashes)
        format!("/{}", name)
    } else {
        format!("{}/{}", trimmed, name)
    }
}

/// Every directory from the top of `path` down to `path` itself.
///
/// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`; relative paths stay relative.
pub fn ancestors(path: &str) -> Vec<String> {
    let path = to_posix(path);
    let absolute = path.starts_with('/');
    let mut current = String::new();
    let mut out = Vec::new();

    for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if current.is_empty() {
            current = if absolute {
                format!("/{}", part)
            } else {
                part.to_string()
            };
        } else {
            current.push('/');
            current.push_str(part);
        }
        out.push(current.clone());
    }

    out
}
