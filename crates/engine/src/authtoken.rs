//! Auth tokens.
//!
//! The bearer value is generated here, sealed under the scope's `tokens` key
//! and never stored in the clear. Only [`Controller::create_auth_token`]
//! ever returns the plaintext; reads and validation return a redacted view.

use std::fmt;
use std::time::Duration;

use portcullis_core::ids::random_token;
use portcullis_core::time::physical_now;
use portcullis_core::{
    CoreError, FieldErrors, FieldMask, FieldSpec, FieldValue, OpContext, PublicId, Schema, ScopeId,
    ValueKind, VersionSpec,
};
use portcullis_storage::{ResourceRecord, ResourceType, StoredDelta};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::EngineError;
use crate::kms::{KeyProvider, KeyPurpose};
use crate::occ::VersionGate;
use crate::Controller;

pub const ID_PREFIX: &str = "at";

const AUTH_ACCOUNT_ID: &str = "auth_account_id";
const TOKEN: &str = "token";
const STATUS: &str = "status";
const EXPIRATION_TIME: &str = "expiration_time";
const LAST_ACCESS_TIME: &str = "approximate_last_access_time";

pub const AUTH_TOKEN_FIELDS: &[FieldSpec] = &[
    FieldSpec::identity("id"),
    FieldSpec::identity("scope_id"),
    FieldSpec::immutable(AUTH_ACCOUNT_ID, AUTH_ACCOUNT_ID, ValueKind::Text),
    FieldSpec::output(TOKEN, ValueKind::Text),
    FieldSpec::required(STATUS, STATUS, ValueKind::Text),
    FieldSpec::required(EXPIRATION_TIME, EXPIRATION_TIME, ValueKind::Timestamp),
    FieldSpec::mutable(LAST_ACCESS_TIME, LAST_ACCESS_TIME, ValueKind::Timestamp),
    FieldSpec::output("version", ValueKind::Integer),
    FieldSpec::output("created_time", ValueKind::Timestamp),
    FieldSpec::output("updated_time", ValueKind::Timestamp),
];

pub fn schema() -> Result<Schema, CoreError> {
    Schema::new(AUTH_TOKEN_FIELDS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTokenStatus {
    Pending,
    Issued,
    Failed,
    SystemError,
}

impl AuthTokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "auth token pending",
            Self::Issued => "token issued",
            Self::Failed => "authentication failed",
            Self::SystemError => "system error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auth token pending" => Some(Self::Pending),
            "token issued" => Some(Self::Issued),
            "authentication failed" => Some(Self::Failed),
            "system error" => Some(Self::SystemError),
            _ => None,
        }
    }
}

/// Extra checks on an update mask for an auth token.
pub(crate) fn check_mask(mask: &FieldMask) -> Result<(), EngineError> {
    let mut errors = FieldErrors::new();
    for (path, value) in mask.values() {
        if path.as_str() == STATUS && value.as_text().and_then(AuthTokenStatus::parse).is_none() {
            errors.insert(STATUS.into(), "Unknown auth token status.".into());
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument {
            message: "invalid fields in request".into(),
            fields: errors,
        })
    }
}

#[derive(Clone)]
pub struct AuthToken {
    pub id: PublicId,
    pub scope_id: ScopeId,
    pub auth_account_id: PublicId,
    pub status: AuthTokenStatus,
    pub version: u32,
    pub created_time: i64,
    pub updated_time: i64,
    pub expiration_time: i64,
    pub approximate_last_access_time: Option<i64>,
    /// Key version the stored token is sealed under.
    pub key_version: u32,
    token: Option<Zeroizing<String>>,
}

impl AuthToken {
    /// The plaintext value; present only on the value returned at creation.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().map(String::as_str)
    }

    fn from_record(record: &ResourceRecord) -> Result<Self, EngineError> {
        if record.resource_type != ResourceType::AuthToken {
            return Err(EngineError::not_found(&record.id));
        }
        let corrupt = |what: &str| {
            EngineError::Internal(format!("auth token {} has no valid {what}", record.id))
        };

        let auth_account_id = record
            .field(AUTH_ACCOUNT_ID)
            .and_then(FieldValue::as_text)
            .ok_or_else(|| corrupt(AUTH_ACCOUNT_ID))
            .and_then(|s| PublicId::parse(s).map_err(|_| corrupt(AUTH_ACCOUNT_ID)))?;
        let status = record
            .field(STATUS)
            .and_then(FieldValue::as_text)
            .and_then(AuthTokenStatus::parse)
            .ok_or_else(|| corrupt(STATUS))?;
        let expiration_time = record
            .field(EXPIRATION_TIME)
            .and_then(FieldValue::as_timestamp)
            .ok_or_else(|| corrupt(EXPIRATION_TIME))?;
        let key_version = record
            .sealed
            .get(TOKEN)
            .map(|s| s.key_version)
            .ok_or_else(|| corrupt(TOKEN))?;

        Ok(Self {
            id: record.id.clone(),
            scope_id: record.scope_id.clone(),
            auth_account_id,
            status,
            version: record.version,
            created_time: record.created_time,
            updated_time: record.updated_time,
            expiration_time,
            approximate_last_access_time: record
                .field(LAST_ACCESS_TIME)
                .and_then(FieldValue::as_timestamp),
            key_version,
            token: None,
        })
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("id", &self.id)
            .field("scope_id", &self.scope_id)
            .field("auth_account_id", &self.auth_account_id)
            .field("status", &self.status)
            .field("version", &self.version)
            .field("expiration_time", &self.expiration_time)
            .field("approximate_last_access_time", &self.approximate_last_access_time)
            .field("key_version", &self.key_version)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Controller {
    /// Issue a token for `auth_account_id`. The returned value is the only
    /// place the plaintext token is ever exposed.
    pub fn create_auth_token(
        &self,
        ctx: &OpContext,
        scope_id: &ScopeId,
        auth_account_id: &PublicId,
    ) -> Result<AuthToken, EngineError> {
        ctx.check()?;
        let token = Zeroizing::new(random_token(self.config.token_length)?);
        let sealed = self.codec.encrypt(ctx, token.as_bytes(), scope_id, KeyPurpose::Tokens)?;

        let now = physical_now()?;
        let ttl = Duration::from_secs(self.config.token_time_to_live_secs);
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let id = PublicId::generate(ID_PREFIX)?;
        let mut record = ResourceRecord::new(id, scope_id.clone(), ResourceType::AuthToken, None);
        let expires = now.saturating_add(ttl_millis);
        record.fields.insert(
            AUTH_ACCOUNT_ID.into(),
            FieldValue::from(auth_account_id.as_str()),
        );
        record.fields.insert(
            STATUS.into(),
            FieldValue::from(AuthTokenStatus::Issued.as_str()),
        );
        record
            .fields
            .insert(EXPIRATION_TIME.into(), FieldValue::Timestamp(expires));
        record
            .fields
            .insert(LAST_ACCESS_TIME.into(), FieldValue::Timestamp(now));
        record.sealed.insert(TOKEN.into(), sealed);

        ctx.check()?;
        let created = self.storage.create(&record)?;
        info!(
            id = %created.id,
            scope_id = %scope_id,
            auth_account_id = %auth_account_id,
            "issued auth token"
        );

        let mut out = AuthToken::from_record(&created)?;
        out.token = Some(token);
        Ok(out)
    }

    pub fn lookup_auth_token(
        &self,
        ctx: &OpContext,
        id: &PublicId,
    ) -> Result<AuthToken, EngineError> {
        ctx.check()?;
        let record = self
            .storage
            .read(id)?
            .ok_or_else(|| EngineError::not_found(id))?;
        AuthToken::from_record(&record)
    }

    /// Check a presented token value. `Ok(None)` means the token is not
    /// usable: wrong value, expired, or not in the issued state. A match
    /// refreshes the last access time.
    pub fn validate_auth_token(
        &self,
        ctx: &OpContext,
        id: &PublicId,
        presented: &str,
    ) -> Result<Option<AuthToken>, EngineError> {
        let gate = VersionGate::new(self.storage.as_ref(), true);
        let (record, expected) = gate.begin(ctx, id, VersionSpec::Auto)?;
        let current = AuthToken::from_record(&record)?;

        if current.status != AuthTokenStatus::Issued {
            debug!(id = %id, status = current.status.as_str(), "auth token not issued");
            return Ok(None);
        }
        let now = physical_now()?;
        if current.expiration_time <= now {
            debug!(id = %id, "auth token expired");
            return Ok(None);
        }

        let sealed = record.sealed.get(TOKEN).ok_or_else(|| {
            EngineError::Internal(format!("auth token {id} has no sealed value"))
        })?;
        let stored = self.codec.decrypt(ctx, sealed)?;
        // blake3::Hash equality is constant time.
        if blake3::hash(&stored) != blake3::hash(presented.as_bytes()) {
            debug!(id = %id, "auth token mismatch");
            return Ok(None);
        }

        let delta = StoredDelta {
            set: vec![(LAST_ACCESS_TIME.into(), FieldValue::Timestamp(now))],
            ..Default::default()
        };
        let updated = gate.commit(ctx, id, expected, &delta)?;
        AuthToken::from_record(&updated).map(Some)
    }

    /// Re-seal every token in the scope that is not yet under the newest
    /// `tokens` key. Each token is rewritten through its own conditional
    /// write; a concurrent change to any token aborts with `VersionConflict`.
    pub fn rewrap_auth_tokens(
        &self,
        ctx: &OpContext,
        scope_id: &ScopeId,
    ) -> Result<usize, EngineError> {
        let newest = self
            .keys
            .resolve_wrapper(ctx, scope_id, KeyPurpose::Tokens, None)?
            .version();
        let gate = VersionGate::new(self.storage.as_ref(), true);
        let mut rewrapped = 0;

        for id in self.storage.list_ids(scope_id, ResourceType::AuthToken)? {
            let (record, expected) = match gate.begin(ctx, &id, VersionSpec::Auto) {
                Ok(found) => found,
                Err(EngineError::NotFound { .. }) => continue,
                Err(err) => return Err(err),
            };
            let Some(sealed) = record.sealed.get(TOKEN) else {
                continue;
            };
            if sealed.key_version >= newest {
                continue;
            }

            let plaintext = self.codec.decrypt(ctx, sealed)?;
            let resealed = self
                .codec
                .encrypt(ctx, &plaintext, scope_id, KeyPurpose::Tokens)?;
            let delta = StoredDelta {
                seal: vec![(TOKEN.into(), resealed)],
                ..Default::default()
            };
            gate.commit(ctx, &id, expected, &delta)?;
            rewrapped += 1;
        }

        info!(scope_id = %scope_id, key_version = newest, rewrapped, "rewrapped auth tokens");
        Ok(rewrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_core::FieldDelta;
    use portcullis_core::mask::{MaskOp, compute_mask};

    #[test]
    fn statuses_round_trip() {
        for status in [
            AuthTokenStatus::Pending,
            AuthTokenStatus::Issued,
            AuthTokenStatus::Failed,
            AuthTokenStatus::SystemError,
        ] {
            assert_eq!(AuthTokenStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AuthTokenStatus::parse("issued"), None);
    }

    #[test]
    fn unknown_status_rejected() {
        let schema = schema().unwrap();
        let delta = FieldDelta::new().set(STATUS, "revoked");
        let mask = compute_mask(&schema, &delta, MaskOp::Update, None).unwrap();
        let err = check_mask(&mask).unwrap_err();
        assert!(err.field_errors().unwrap().contains_key(STATUS));

        let delta = FieldDelta::new().set(STATUS, "token issued");
        let mask = compute_mask(&schema, &delta, MaskOp::Update, None).unwrap();
        assert!(check_mask(&mask).is_ok());
    }

    #[test]
    fn token_and_account_are_not_updatable() {
        let schema = schema().unwrap();
        let delta = FieldDelta::new().set(TOKEN, "forged").set(AUTH_ACCOUNT_ID, "acct_0123456789");
        let err = compute_mask(&schema, &delta, MaskOp::Update, None).unwrap_err();
        let portcullis_core::mask::MaskError::Fields(fields) = err else {
            panic!("expected field errors");
        };
        assert!(fields.contains_key(TOKEN));
        assert!(fields.contains_key(AUTH_ACCOUNT_ID));
    }
}
