use ed25519_dalek::SigningKey;

use crate::crypto;
use crate::ProtocolError;

/// The client's signing identity.
///
/// Keypair management lives outside the client core; anything that can sign
/// on behalf of the client and report its public key can be plugged in.
pub trait Identity: Send + Sync {
    /// Client ID stamped into every write marker.
    fn client_id(&self) -> String;

    /// Hex-encoded public key used to verify markers this client signed.
    fn public_key(&self) -> String;

    /// Sign `payload`, returning a hex-encoded signature.
    fn sign(&self, payload: &[u8]) -> Result<String, ProtocolError>;
}

/// In-process Ed25519 identity.
pub struct Ed25519Identity {
    signing_key: SigningKey,
    client_id: String,
}

impl Ed25519Identity {
    pub fn new(signing_key: SigningKey) -> Self {
        let client_id = crypto::derive_client_id(&signing_key.verifying_key());
        Self {
            signing_key,
            client_id,
        }
    }

    /// Create an identity backed by a freshly generated keypair.
    pub fn generate() -> Self {
        Self::new(crypto::generate_keypair())
    }

    /// Restore an identity from a hex-encoded 32-byte secret key.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, ProtocolError> {
        let bytes: [u8; 32] = crypto::hex_decode(secret_hex)?
            .try_into()
            .map_err(|_| ProtocolError::Crypto("secret key must be 32 bytes".into()))?;
        Ok(Self::new(SigningKey::from_bytes(&bytes)))
    }
}

impl Identity for Ed25519Identity {
    fn client_id(&self) -> String {
        self.client_id.clone()
    }

    fn public_key(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    fn sign(&self, payload: &[u8]) -> Result<String, ProtocolError> {
        Ok(crypto::sign_message(&self.signing_key, payload))
    }
}

impl std::fmt::Debug for Ed25519Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Identity")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
