use std::path::{Path, PathBuf};

use crate::config::CONFIG_DIR;

/// Resolve the project state root (`.ntm/`) for a working directory.
///
/// Walks upward for an existing `.ntm/` so commands run from a subdirectory
/// share the project's logs and handoffs. When none exists, returns
/// `<start>/.ntm` so a new project gets one next to where it was started.
pub fn resolve_state_root(start: &Path) -> PathBuf {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_DIR);
        if candidate.is_dir() {
            return candidate;
        }
        if !dir.pop() {
            return start.join(CONFIG_DIR);
        }
    }
}

pub fn events_log(root: &Path) -> PathBuf {
    root.join("logs").join("events.jsonl")
}

pub fn handoff_dir(root: &Path, session: &str) -> PathBuf {
    root.join("handoffs").join(session)
}

/// Small JSON state files kept between invocations (`snapshot`, `activity`).
pub fn state_file(root: &Path, name: &str) -> PathBuf {
    root.join("state").join(format!("{name}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_state_root_in_ancestor() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".ntm")).unwrap();
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(resolve_state_root(&nested), tmp.path().join(".ntm"));
    }

    #[test]
    fn returns_local_root_when_none_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("x");
        std::fs::create_dir_all(&nested).unwrap();
        // A stray .ntm higher up the real filesystem would be found first, so
        // only assert the shape of the answer.
        let root = resolve_state_root(&nested);
        assert!(root.ends_with(".ntm"));
    }

    #[test]
    fn layout_under_root() {
        let root = Path::new("/p/.ntm");
        assert_eq!(events_log(root), Path::new("/p/.ntm/logs/events.jsonl"));
        assert_eq!(handoff_dir(root, "proj"), Path::new("/p/.ntm/handoffs/proj"));
        assert_eq!(state_file(root, "snapshot"), Path::new("/p/.ntm/state/snapshot.json"));
    }
}
