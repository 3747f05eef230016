use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Length of the random suffix appended to every public id.
pub const ID_SUFFIX_LEN: usize = 10;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

// Largest multiple of 62 below 256; bytes at or above it are rejected to keep
// every symbol equally likely.
const REJECT_AT: u8 = 248;

/// Random string of `len` symbols drawn uniformly from `[0-9A-Za-z]`.
pub fn random_token(len: usize) -> Result<String, CoreError> {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 32];
    while out.len() < len {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| CoreError::Entropy(e.to_string()))?;
        for b in buf {
            if b >= REJECT_AT {
                continue;
            }
            out.push(ALPHABET[(b % 62) as usize] as char);
            if out.len() == len {
                break;
            }
        }
    }
    Ok(out)
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(PublicId);
string_id!(ScopeId);

impl PublicId {
    /// Mint a new id of the form `<prefix>_<suffix>`.
    pub fn generate(prefix: &str) -> Result<Self, CoreError> {
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(CoreError::InvalidId(format!("bad id prefix {prefix:?}")));
        }
        let suffix = random_token(ID_SUFFIX_LEN)?;
        Ok(Self(format!("{prefix}_{suffix}")))
    }

    /// Accept an id supplied by a caller. Only the shape is checked.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.split_once('_') {
            Some((prefix, suffix)) if !prefix.is_empty() && !suffix.is_empty() => {
                Ok(Self(s.to_string()))
            }
            _ => Err(CoreError::InvalidId(format!("malformed id {s:?}"))),
        }
    }

    pub fn prefix(&self) -> &str {
        self.0.split_once('_').map_or("", |(p, _)| p)
    }
}

const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Org,
    Project,
}

impl ScopeId {
    pub fn global() -> Self {
        Self(GLOBAL_SCOPE.to_string())
    }

    pub fn new_org() -> Result<Self, CoreError> {
        Ok(Self(format!("o_{}", random_token(ID_SUFFIX_LEN)?)))
    }

    pub fn new_project() -> Result<Self, CoreError> {
        Ok(Self(format!("p_{}", random_token(ID_SUFFIX_LEN)?)))
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let scope = Self(s.to_string());
        match scope.kind() {
            Some(_) => Ok(scope),
            None => Err(CoreError::InvalidId(format!("malformed scope id {s:?}"))),
        }
    }

    pub fn kind(&self) -> Option<ScopeKind> {
        if self.0 == GLOBAL_SCOPE {
            return Some(ScopeKind::Global);
        }
        match self.0.split_once('_') {
            Some(("o", rest)) if !rest.is_empty() => Some(ScopeKind::Org),
            Some(("p", rest)) if !rest.is_empty() => Some(ScopeKind::Project),
            _ => None,
        }
    }
}
