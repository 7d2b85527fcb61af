use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffKind {
    Create,
    Delete,
    /// In the feed and materialized, but the feed's SEQUENCE moved on.
    Stale,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffKind::Create => write!(f, "+"),
            DiffKind::Delete => write!(f, "-"),
            DiffKind::Stale => write!(f, "~"),
        }
    }
}
