//! Mapping between project-relative paths and absolute sandbox paths.

/// Normalize an agent-supplied path to a forward-slash relative path.
///
/// Absolute paths under `workdir` are made relative. Empty paths, paths
/// escaping the project (`..`) and absolute paths outside `workdir` are
/// rejected.
pub fn normalize(workdir: &str, raw: &str) -> Result<String, String> {
    let cleaned = raw.trim().replace('\\', "/");
    let workdir = workdir.trim_end_matches('/');

    let relative = if let Some(rest) = cleaned.strip_prefix(workdir) {
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(format!("Path is outside the project: {raw}"));
        }
        rest.trim_start_matches('/').to_string()
    } else if cleaned.starts_with('/') {
        return Err(format!("Path is outside the project: {raw}"));
    } else {
        cleaned
    };

    let mut parts = Vec::new();
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(format!("Path may not contain '..': {raw}")),
            p => parts.push(p),
        }
    }

    if parts.is_empty() {
        return Err(format!("Path is empty: {raw:?}"));
    }
    Ok(parts.join("/"))
}

pub fn to_sandbox(workdir: &str, relative: &str) -> String {
    format!("{}/{relative}", workdir.trim_end_matches('/'))
}

/// Strip `workdir` from an absolute sandbox path.
pub fn to_relative(workdir: &str, absolute: &str) -> Option<String> {
    absolute
        .strip_prefix(workdir.trim_end_matches('/'))
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}
