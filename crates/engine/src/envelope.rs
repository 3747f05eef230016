use std::sync::Arc;

use portcullis_core::{OpContext, ScopeId};
use portcullis_storage::SealedField;
use tracing::warn;
use zeroize::Zeroizing;

use crate::error::EngineError;
use crate::kms::{KeyProvider, KeyPurpose};

/// Seals values under the newest key of a scope and opens them with the
/// exact version recorded alongside the ciphertext.
pub struct EnvelopeCodec {
    keys: Arc<dyn KeyProvider>,
}

impl EnvelopeCodec {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    pub fn encrypt(
        &self,
        ctx: &OpContext,
        plaintext: &[u8],
        scope_id: &ScopeId,
        purpose: KeyPurpose,
    ) -> Result<SealedField, EngineError> {
        let wrapper = self.keys.resolve_wrapper(ctx, scope_id, purpose, None)?;
        let ciphertext = wrapper.seal(plaintext)?;
        Ok(SealedField {
            ciphertext,
            scope_id: scope_id.clone(),
            purpose: purpose.as_str().to_string(),
            key_version: wrapper.version(),
        })
    }

    /// Fails closed: an unknown key or a ciphertext that does not
    /// authenticate is `DecryptionFailed`, never partial plaintext.
    pub fn decrypt(
        &self,
        ctx: &OpContext,
        field: &SealedField,
    ) -> Result<Zeroizing<Vec<u8>>, EngineError> {
        let purpose = KeyPurpose::parse(&field.purpose).ok_or_else(|| {
            EngineError::DecryptionFailed(format!("unknown key purpose {:?}", field.purpose))
        })?;

        let resolved =
            self.keys
                .resolve_wrapper(ctx, &field.scope_id, purpose, Some(field.key_version));
        let wrapper = match resolved {
            Ok(wrapper) => wrapper,
            Err(err @ EngineError::KeyNotFound { .. }) => {
                warn!(
                    scope_id = %field.scope_id,
                    purpose = %purpose,
                    version = field.key_version,
                    "no key for sealed value"
                );
                return Err(EngineError::DecryptionFailed(err.to_string()));
            }
            Err(err) => return Err(err),
        };

        wrapper.open(&field.ciphertext).map(Zeroizing::new).map_err(|_| {
            warn!(
                scope_id = %field.scope_id,
                purpose = %purpose,
                version = field.key_version,
                "sealed value failed authentication"
            );
            EngineError::DecryptionFailed("ciphertext failed authentication".into())
        })
    }
}
