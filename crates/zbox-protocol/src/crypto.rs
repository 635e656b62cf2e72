use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::ProtocolError;

/// Generate a new Ed25519 keypair.
pub fn generate_keypair() -> SigningKey {
    let mut rng = rand::thread_rng();
    SigningKey::generate(&mut rng)
}

/// Derive the client ID from a public key: hex(sha256(pub_key)).
pub fn derive_client_id(verifying_key: &VerifyingKey) -> String {
    hash(verifying_key.as_bytes())
}

/// SHA-256 of `data` as a lowercase hex string.
///
/// Used for content hashes, reference-tree hashes, allocation roots and
/// listing identity keys alike.
pub fn hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Sign a payload and return the hex-encoded signature.
pub fn sign_message(signing_key: &SigningKey, payload: &[u8]) -> String {
    hex::encode(signing_key.sign(payload).to_bytes())
}

/// Verify a hex-encoded signature against a hex-encoded public key.
pub fn verify_signature(
    public_key_hex: &str,
    payload: &[u8],
    signature_hex: &str,
) -> Result<(), ProtocolError> {
    let key_bytes: [u8; 32] = hex_decode(public_key_hex)?
        .try_into()
        .map_err(|_| ProtocolError::Crypto("public key must be 32 bytes".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| ProtocolError::Crypto(format!("invalid public key: {}", e)))?;

    let sig_bytes: [u8; 64] = hex_decode(signature_hex)?
        .try_into()
        .map_err(|_| ProtocolError::InvalidSignature("signature must be 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(payload, &signature)
        .map_err(|e| ProtocolError::InvalidSignature(e.to_string()))
}

/// Hex-decode a string into bytes.
pub fn hex_decode(s: &str) -> Result<Vec<u8>, ProtocolError> {
    hex::decode(s).map_err(|e| ProtocolError::Crypto(format!("invalid hex: {}", e)))
}
