//! Namespace creation and teardown for the route root path.

use tracing::debug;

use crate::CoordinationSession;
use crate::StoreError;

/// Non-empty path segments of a tree path.
pub(crate) fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// All ancestor prefixes of `path` including itself, shortest first:
/// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
pub(crate) fn path_prefixes(path: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = String::new();
    for seg in path_segments(path) {
        current.push('/');
        current.push_str(seg);
        prefixes.push(current.clone());
    }
    prefixes
}

/// mkdir -p over tree nodes: walk from the store root and create each
/// missing intermediate node as a persistent, empty node. Idempotent; a
/// concurrent creator winning the race is treated as success.
///
/// Returns whether any node had to be created, so the caller can tell a
/// fresh namespace from a pre-existing one.
pub(crate) async fn ensure_namespace(
    session: &dyn CoordinationSession,
    root: &str,
) -> std::result::Result<bool, StoreError> {
    if path_segments(root).is_empty() {
        return Err(StoreError::BadPath(root.to_string()));
    }
    let mut created = false;
    for prefix in path_prefixes(root) {
        if session.exists(&prefix).await? {
            continue;
        }
        match session.create(&prefix, Vec::new()).await {
            Ok(()) => {
                debug!("[namespace] created {prefix}");
                created = true;
            }
            Err(e) if e.is_node_exists() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(created)
}

/// Remove the route root and every node created to reach it, walking from
/// the full path toward the store root by level: at each level, delete all
/// direct children of the prefix, then the prefix node itself.
///
/// Nodes that vanish mid-walk are tolerated; the walk is restartable.
pub(crate) async fn tear_down_namespace(
    session: &dyn CoordinationSession,
    root: &str,
) -> std::result::Result<(), StoreError> {
    for prefix in path_prefixes(root).iter().rev() {
        let children = match session.get_children(prefix).await {
            Ok(children) => children,
            Err(e) if e.is_no_node() => continue,
            Err(e) => return Err(e),
        };
        for child in children {
            let child_path = format!("{prefix}/{child}");
            match session.delete(&child_path).await {
                Ok(()) => {}
                Err(e) if e.is_no_node() => {}
                Err(e) => return Err(e),
            }
        }
        match session.delete(prefix).await {
            Ok(()) => debug!("[namespace] removed {prefix}"),
            Err(e) if e.is_no_node() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
