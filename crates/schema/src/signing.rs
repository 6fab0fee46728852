//! Ed25519 envelope signing and verification over the canonical form
//! (spec §6).

use crate::canonical::canonical_bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("failed to canonicalize envelope: {0}")]
    Canonicalize(#[from] serde_json::Error),
    #[error("signature is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
    #[error("malformed signature bytes")]
    MalformedSignature,
    #[error("malformed public key bytes")]
    MalformedKey,
    #[error("signature does not verify against the recomputed canonical bytes")]
    VerificationFailed,
}

/// Sign an envelope-shaped value, returning the lowercase-hex signature.
/// The caller is responsible for stashing this into the envelope's `sig`
/// field before transmission — it is not mutated in place here, mirroring
/// the teacher's preference for pure functions over in-place sealing.
pub fn sign<T: Serialize>(key: &SigningKey, envelope: &T) -> Result<String, SigningError> {
    let bytes = canonical_bytes(envelope)?;
    let sig: Signature = key.sign(&bytes);
    Ok(hex::encode(sig.to_bytes()))
}

/// Verify that `sig_hex` is a valid Ed25519 signature by `verifying_key`
/// over the canonical bytes of `envelope` (with any `sig` field ignored, as
/// the canonical form always strips it).
pub fn verify<T: Serialize>(
    verifying_key: &VerifyingKey,
    envelope: &T,
    sig_hex: &str,
) -> Result<(), SigningError> {
    let bytes = canonical_bytes(envelope)?;
    let sig_bytes = hex::decode(sig_hex)?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| SigningError::MalformedSignature)?;
    let signature = Signature::from_bytes(&sig_array);
    verifying_key
        .verify(&bytes, &signature)
        .map_err(|_| SigningError::VerificationFailed)
}

/// Decode a base64-encoded Ed25519 private key as provided by
/// `SIGNING_PRIVATE_KEY_B64` (spec §6).
pub fn signing_key_from_b64(b64: &str) -> Result<SigningKey, SigningError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let bytes = STANDARD.decode(b64.trim()).map_err(|_| SigningError::MalformedKey)?;
    let array: [u8; 32] = bytes.try_into().map_err(|_| SigningError::MalformedKey)?;
    Ok(SigningKey::from_bytes(&array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use serde_json::json;

    #[test]
    fn sign_then_verify_round_trips() {
        let mut csprng = OsRng;
        let key = SigningKey::generate(&mut csprng);
        let envelope = json!({"ts": "2026-01-01T00:00:00Z", "topic": "telemetry", "payload": {"a": 1}});

        let sig = sign(&key, &envelope).unwrap();
        assert!(verify(&key.verifying_key(), &envelope, &sig).is_ok());
    }

    #[test]
    fn verification_fails_with_wrong_key() {
        let mut csprng = OsRng;
        let key = SigningKey::generate(&mut csprng);
        let other = SigningKey::generate(&mut csprng);
        let envelope = json!({"ts": "2026-01-01T00:00:00Z", "topic": "telemetry", "payload": {"a": 1}});

        let sig = sign(&key, &envelope).unwrap();
        assert!(verify(&other.verifying_key(), &envelope, &sig).is_err());
    }

    #[test]
    fn verification_fails_if_payload_tampered_after_signing() {
        let mut csprng = OsRng;
        let key = SigningKey::generate(&mut csprng);
        let envelope = json!({"ts": "2026-01-01T00:00:00Z", "topic": "telemetry", "payload": {"a": 1}});
        let sig = sign(&key, &envelope).unwrap();

        let tampered = json!({"ts": "2026-01-01T00:00:00Z", "topic": "telemetry", "payload": {"a": 2}});
        assert!(verify(&key.verifying_key(), &tampered, &sig).is_err());
    }
}
