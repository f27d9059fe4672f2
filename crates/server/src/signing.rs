use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-enrolla-signature";
const SIGNATURE_SCHEME: &str = "sha256=";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureError {
    Missing,
    Malformed,
    Mismatch,
}

impl SignatureError {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing signature",
            Self::Malformed => "malformed signature",
            Self::Mismatch => "signature mismatch",
        }
    }
}

/// Header value for `body` signed with `secret`: `sha256=<hex hmac>`.
#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(body);
    format!("{SIGNATURE_SCHEME}{}", hex::encode(mac.finalize().into_bytes()))
}

pub fn verify(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
    let header = header.map(str::trim).filter(|value| !value.is_empty());
    let encoded = header
        .ok_or(SignatureError::Missing)?
        .strip_prefix(SIGNATURE_SCHEME)
        .ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(encoded).map_err(|_| SignatureError::Malformed)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::{sign, verify, SignatureError};

    const SECRET: &str = "whsec-test-secret-0001";

    #[test]
    fn signed_bodies_verify_and_tampered_ones_do_not() {
        let body = br#"{"order_id":"ord-1","provider_ref":"pi_1","status":"succeeded"}"#;
        let header = sign(SECRET, body);
        assert!(header.starts_with("sha256="));
        assert_eq!(verify(SECRET, body, Some(&header)), Ok(()));

        let tampered = br#"{"order_id":"ord-2","provider_ref":"pi_1","status":"succeeded"}"#;
        assert_eq!(verify(SECRET, tampered, Some(&header)), Err(SignatureError::Mismatch));
        let rotated = verify("another-secret-0002", body, Some(&header));
        assert_eq!(rotated, Err(SignatureError::Mismatch));
    }

    #[test]
    fn missing_and_malformed_headers_are_distinguished() {
        assert_eq!(verify(SECRET, b"{}", None), Err(SignatureError::Missing));
        assert_eq!(verify(SECRET, b"{}", Some("  ")), Err(SignatureError::Missing));
        assert_eq!(verify(SECRET, b"{}", Some("md5=abcd")), Err(SignatureError::Malformed));
        assert_eq!(verify(SECRET, b"{}", Some("sha256=not-hex")), Err(SignatureError::Malformed));
    }
}
