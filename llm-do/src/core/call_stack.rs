//! Delegation call stack with a depth guard.

use crate::error::{Error, Result};

pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Chain of worker names from the top-level worker to the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<String>,
    max_depth: usize,
}

impl CallStack {
    /// Stack holding only the top-level worker.
    pub fn root(worker: &str, max_depth: usize) -> Self {
        Self {
            frames: vec![worker.to_string()],
            max_depth,
        }
    }

    /// Stack for a delegated call to `worker`.
    ///
    /// Fails with `PermissionDenied` once the chain would exceed `max_depth`
    /// delegations below the top-level worker.
    pub fn push(&self, worker: &str) -> Result<CallStack> {
        if self.depth() >= self.max_depth {
            return Err(Error::PermissionDenied(format!(
                "delegation depth limit {} reached ({} -> {})",
                self.max_depth,
                self.path(),
                worker
            )));
        }
        let mut frames = self.frames.clone();
        frames.push(worker.to_string());
        Ok(CallStack {
            frames,
            max_depth: self.max_depth,
        })
    }

    /// Number of delegations below the top-level worker.
    pub fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    pub fn current(&self) -> &str {
        self.frames.last().map(String::as_str).unwrap_or_default()
    }

    pub fn path(&self) -> String {
        self.frames.join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_tracks_depth_and_path() {
        let stack = CallStack::root("orchestrator", 3);
        let nested = stack.push("planner").expect("push");
        assert_eq!(stack.depth(), 0);
        assert_eq!(nested.depth(), 1);
        assert_eq!(nested.current(), "planner");
        assert_eq!(nested.path(), "orchestrator -> planner");
    }

    #[test]
    fn push_beyond_limit_is_denied() {
        let stack = CallStack::root("a", 2).push("b").expect("b").push("c").expect("c");
        let err = stack.push("d").unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(err.to_string().contains("a -> b -> c -> d"));
    }

    #[test]
    fn zero_depth_forbids_delegation() {
        let err = CallStack::root("solo", 0).push("other").unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }
}
