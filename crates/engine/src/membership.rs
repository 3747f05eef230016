use std::collections::BTreeSet;

use portcullis_core::PublicId;

/// How a membership request combines with the current set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOp {
    /// Union with the current members.
    Add,
    /// Replace the current members.
    Set,
    /// Difference; absent ids are ignored.
    Remove,
}

impl MembershipOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Set => "set",
            Self::Remove => "remove",
        }
    }

    pub fn apply(
        &self,
        current: &BTreeSet<PublicId>,
        ids: &BTreeSet<PublicId>,
    ) -> BTreeSet<PublicId> {
        match self {
            Self::Add => current.union(ids).cloned().collect(),
            Self::Set => ids.clone(),
            Self::Remove => current.difference(ids).cloned().collect(),
        }
    }

    /// Whether every named id must exist as a host set.
    pub(crate) fn requires_existing(&self) -> bool {
        !matches!(self, Self::Remove)
    }
}
