use std::fmt;
use std::num::NonZeroU32;

/// How a mutation names the resource version it was computed against.
///
/// Versions start at 1, so an explicit version is never zero; "no version" is
/// its own variant rather than a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSpec {
    Explicit(NonZeroU32),
    /// Read the current version and use it for the conditional write.
    Auto,
}

impl VersionSpec {
    /// `None` when `version` is zero.
    pub fn explicit(version: u32) -> Option<Self> {
        NonZeroU32::new(version).map(Self::Explicit)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(v) => write!(f, "{v}"),
            Self::Auto => f.write_str("auto"),
        }
    }
}
