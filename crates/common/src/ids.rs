use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    IssueId,
    "Typed wrapper for issue identifiers from the dependency graph."
);
define_id!(WorkerId, "Typed wrapper for worker identifiers.");
define_id!(OrderId, "Typed wrapper for work order identifiers.");

impl WorkerId {
    /// Worker identities are stable across restarts: `worker-1..worker-N`.
    pub fn numbered(n: u32) -> Self {
        Self(format!("worker-{}", n))
    }

    /// The numeric suffix, used for lowest-numbered-idle selection.
    pub fn index(&self) -> Option<u32> {
        self.0.rsplit('-').next().and_then(|s| s.parse().ok())
    }
}

impl OrderId {
    /// Work order ids come from a monotonic counter: `WO-001`, `WO-002`, ...
    pub fn numbered(n: u64) -> Self {
        Self(format!("WO-{:03}", n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_index() {
        assert_eq!(WorkerId::numbered(3).as_str(), "worker-3");
        assert_eq!(WorkerId::numbered(12).index(), Some(12));
        assert_eq!(WorkerId::new("not-a-number-x").index(), None);
    }

    #[test]
    fn test_order_id_format() {
        assert_eq!(OrderId::numbered(1).as_str(), "WO-001");
        assert_eq!(OrderId::numbered(42).as_str(), "WO-042");
        assert_eq!(OrderId::numbered(1234).as_str(), "WO-1234");
    }
}
