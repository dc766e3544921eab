use std::time::Duration;

use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifierSetupError {
    #[error("public key is not valid hex: {0}")]
    Hex(String),
    #[error("public key must be 32 bytes, got {0}")]
    Length(usize),
    #[error("public key is not a valid ed25519 point")]
    InvalidPoint,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("missing `{0}` header")]
    MissingHeader(&'static str),
    #[error("signature header is not 64 bytes of hex")]
    MalformedSignature,
    #[error("signature does not match request body")]
    BadSignature,
    #[error("request timestamp is outside the accepted window")]
    StaleTimestamp,
}

/// Header values lifted off the inbound request before the body is parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
}

pub trait RequestVerifier: Send + Sync {
    fn verify(&self, headers: &SignatureHeaders, body: &[u8]) -> Result<(), AuthenticationError>;
}

/// Ed25519 check over `timestamp || body`, exactly as received on the wire.
#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    key: VerifyingKey,
    max_skew: Option<Duration>,
}

impl SignatureVerifier {
    pub fn from_hex(public_key_hex: &str) -> Result<Self, VerifierSetupError> {
        let bytes = hex::decode(public_key_hex.trim())
            .map_err(|error| VerifierSetupError::Hex(error.to_string()))?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] =
            bytes.as_slice().try_into().map_err(|_| VerifierSetupError::Length(bytes.len()))?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|_| VerifierSetupError::InvalidPoint)?;
        Ok(Self { key, max_skew: None })
    }

    pub fn with_max_skew(mut self, max_skew: Option<Duration>) -> Self {
        self.max_skew = max_skew;
        self
    }

    pub fn verify_at(
        &self,
        headers: &SignatureHeaders,
        body: &[u8],
        now_unix: i64,
    ) -> Result<(), AuthenticationError> {
        let signature_hex =
            headers.signature.as_deref().ok_or(AuthenticationError::MissingHeader(SIGNATURE_HEADER))?;
        let timestamp =
            headers.timestamp.as_deref().ok_or(AuthenticationError::MissingHeader(TIMESTAMP_HEADER))?;

        let signature = decode_signature(signature_hex)?;

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);
        self.key.verify_strict(&message, &signature).map_err(|_| AuthenticationError::BadSignature)?;

        if let Some(max_skew) = self.max_skew {
            let sent_at =
                timestamp.trim().parse::<i64>().map_err(|_| AuthenticationError::StaleTimestamp)?;
            let skew = now_unix.abs_diff(sent_at);
            if skew > max_skew.as_secs() {
                return Err(AuthenticationError::StaleTimestamp);
            }
        }

        Ok(())
    }
}

impl RequestVerifier for SignatureVerifier {
    fn verify(&self, headers: &SignatureHeaders, body: &[u8]) -> Result<(), AuthenticationError> {
        self.verify_at(headers, body, chrono::Utc::now().timestamp())
    }
}

fn decode_signature(signature_hex: &str) -> Result<Signature, AuthenticationError> {
    let bytes = hex::decode(signature_hex.trim()).map_err(|_| AuthenticationError::MalformedSignature)?;
    let bytes: [u8; SIGNATURE_LENGTH] =
        bytes.as_slice().try_into().map_err(|_| AuthenticationError::MalformedSignature)?;
    Ok(Signature::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ed25519_dalek::{Signer, SigningKey};

    use super::{
        AuthenticationError, RequestVerifier, SignatureHeaders, SignatureVerifier,
        VerifierSetupError, SIGNATURE_HEADER,
    };

    const NOW: i64 = 1_760_000_000;
    const BODY: &[u8] = br#"{"type":1,"id":"1","token":"t"}"#;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7_u8; 32])
    }

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::from_hex(&hex::encode(signing_key().verifying_key().to_bytes()))
            .expect("test key should decode")
    }

    fn signed(timestamp: &str, body: &[u8]) -> SignatureHeaders {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        SignatureHeaders {
            signature: Some(hex::encode(signing_key().sign(&message).to_bytes())),
            timestamp: Some(timestamp.to_owned()),
        }
    }

    #[test]
    fn accepts_signature_over_timestamp_and_raw_body() {
        let headers = signed(&NOW.to_string(), BODY);
        assert_eq!(verifier().verify_at(&headers, BODY, NOW), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let headers = signed(&NOW.to_string(), BODY);
        let tampered = br#"{"type":2,"id":"1","token":"t"}"#;
        assert_eq!(
            verifier().verify_at(&headers, tampered, NOW),
            Err(AuthenticationError::BadSignature)
        );
    }

    #[test]
    fn rejects_reserialized_body_with_same_meaning() {
        let headers = signed(&NOW.to_string(), BODY);
        let reformatted = br#"{"type": 1, "id": "1", "token": "t"}"#;
        assert_eq!(
            verifier().verify_at(&headers, reformatted, NOW),
            Err(AuthenticationError::BadSignature)
        );
    }

    #[test]
    fn rejects_signature_for_other_timestamp() {
        let mut headers = signed(&NOW.to_string(), BODY);
        headers.timestamp = Some((NOW + 1).to_string());
        assert_eq!(verifier().verify_at(&headers, BODY, NOW), Err(AuthenticationError::BadSignature));
    }

    #[test]
    fn rejects_missing_and_malformed_headers() {
        let missing = SignatureHeaders { signature: None, timestamp: Some(NOW.to_string()) };
        assert_eq!(
            verifier().verify_at(&missing, BODY, NOW),
            Err(AuthenticationError::MissingHeader(SIGNATURE_HEADER))
        );

        let malformed =
            SignatureHeaders { signature: Some("zz".to_owned()), timestamp: Some(NOW.to_string()) };
        assert_eq!(
            verifier().verify_at(&malformed, BODY, NOW),
            Err(AuthenticationError::MalformedSignature)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected_only_when_window_configured() {
        let old = (NOW - 3_600).to_string();
        let headers = signed(&old, BODY);

        assert_eq!(verifier().verify_at(&headers, BODY, NOW), Ok(()));
        assert_eq!(
            verifier().with_max_skew(Some(Duration::from_secs(300))).verify_at(&headers, BODY, NOW),
            Err(AuthenticationError::StaleTimestamp)
        );
    }

    #[test]
    fn trait_entry_point_uses_wall_clock() {
        let now = chrono::Utc::now().timestamp().to_string();
        let headers = signed(&now, BODY);
        let verifier = verifier().with_max_skew(Some(Duration::from_secs(60)));
        assert_eq!(RequestVerifier::verify(&verifier, &headers, BODY), Ok(()));
    }

    #[test]
    fn setup_rejects_bad_keys() {
        assert!(matches!(SignatureVerifier::from_hex("xyz"), Err(VerifierSetupError::Hex(_))));
        assert_eq!(
            SignatureVerifier::from_hex("abcd").err(),
            Some(VerifierSetupError::Length(2))
        );
    }
}
