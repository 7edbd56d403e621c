//! JSON Web Token helper, HS256 only.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &[u8] = br#"{"alg":"HS256","typ":"JWT"}"#;

/// Signs and verifies `header.payload.signature` tokens with a fixed key.
/// No padding is emitted and none is required on decode.
pub struct JsonWebToken {
    key: Vec<u8>,
}

impl JsonWebToken {
    pub fn new(key: &[u8]) -> Self {
        JsonWebToken { key: key.to_vec() }
    }

    /// Emits `base64url(header).base64url(payload).base64url(HMAC)`.
    pub fn encode(&self, payload: &[u8]) -> String {
        let mut token = base64url(HEADER);
        token.push('.');
        token.push_str(&base64url(payload));

        let mut mac = self.mac();
        mac.update(token.as_bytes());
        let signature = mac.finalize().into_bytes();

        token.push('.');
        token.push_str(&base64url(&signature));
        token
    }

    /// Verifies the signature and returns the payload bytes, or `None` on
    /// any structural or signature defect. The comparison is constant-time.
    pub fn decode(&self, token: &str) -> Option<Vec<u8>> {
        let mut parts = token.split('.');
        let header = parts.next()?;
        let payload = parts.next()?;
        let signature = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let signature = base64::decode_config(signature, base64::URL_SAFE_NO_PAD).ok()?;
        let mut mac = self.mac();
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;

        base64::decode_config(payload, base64::URL_SAFE_NO_PAD).ok()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length; qed")
    }
}

fn base64url(data: &[u8]) -> String {
    base64::encode_config(data, base64::URL_SAFE_NO_PAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let token = JsonWebToken::new(b"super-secret");
        let payload = br#"{"sub":"framewire","admin":true}"#;
        let encoded = token.encode(payload);

        assert_eq!(encoded.split('.').count(), 3);
        assert!(!encoded.contains('='));
        assert_eq!(token.decode(&encoded).as_deref(), Some(&payload[..]));
    }

    #[test]
    fn tampering_is_rejected() {
        let token = JsonWebToken::new(b"super-secret");
        let encoded = token.encode(br#"{"sub":"framewire"}"#);

        // altered payload
        let mut parts: Vec<&str> = encoded.split('.').collect();
        let forged_payload = base64::encode_config(br#"{"sub":"intruder"}"#, base64::URL_SAFE_NO_PAD);
        parts[1] = &forged_payload;
        assert_eq!(token.decode(&parts.join(".")), None);

        // wrong key
        assert_eq!(JsonWebToken::new(b"other-key").decode(&encoded), None);

        // structural defects
        assert_eq!(token.decode("only.two"), None);
        assert_eq!(token.decode(""), None);
    }
}
