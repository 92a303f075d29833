//! Segment-level path helpers.

/// Marker segment for a wildcard node.
pub const WILDCARD: &str = "-";

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `"/"` for no segments, `"/a/b"` otherwise.
pub fn join(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}

/// Normalize a tree key: `"a/b/"` → `"/a/b"`, `""` → `"/"`.
pub fn normalize(path: &str) -> String {
    join(&segments(path))
}

/// Resolve `target` against a directory made of `base` segments.
///
/// Absolute targets start over from the root. `None` when `..` climbs
/// above the root.
pub fn resolve(base: &[String], target: &str) -> Option<Vec<String>> {
    let mut resolved = if target.starts_with('/') {
        Vec::new()
    } else {
        base.to_vec()
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                resolved.pop()?;
            }
            other => resolved.push(other.to_string()),
        }
    }
    Some(resolved)
}

pub fn common_prefix_len(a: &[String], b: &[String]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
