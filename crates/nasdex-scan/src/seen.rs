//! Files reached by the current scan run.

use dashmap::DashSet;
use nasdex_core::IdentityKey;

/// Identity triplets walked during one scan.
///
/// Filled by the walk and consulted by the scoped cleanup afterwards.
#[derive(Debug, Default)]
pub struct SeenSet {
    seen: DashSet<IdentityKey>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `identity`; `false` when the walk already reached this file
    /// by another path, e.g. through a bind mount.
    pub fn first_visit(&self, identity: IdentityKey) -> bool {
        self.seen.insert(identity)
    }

    pub fn contains(&self, identity: &IdentityKey) -> bool {
        self.seen.contains(identity)
    }
}
