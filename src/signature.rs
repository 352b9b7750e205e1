//! Webhook signature verification
//!
//! Hosting providers sign the raw request body with a shared secret and send
//! the result as `algorithm=hexdigest`.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use tracing::debug;

use crate::error::{DeployError, Result};

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";
pub const SIGNATURE_256_HEADER: &str = "X-Hub-Signature-256";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    pub fn try_from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(DeployError::Authentication(format!(
                "Hash algorithm '{}' is not supported.",
                name
            ))),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

fn new_mac<M: Mac + KeyInit>(secret: &str, payload: &[u8]) -> Result<M> {
    let mut mac = <M as KeyInit>::new_from_slice(secret.as_bytes())
        .map_err(|e| DeployError::Authentication(format!("Invalid hook secret: {}", e)))?;
    mac.update(payload);
    Ok(mac)
}

fn verify_with<M: Mac + KeyInit>(secret: &str, payload: &[u8], expected: &[u8]) -> Result<()> {
    // verify_slice compares in constant time
    new_mac::<M>(secret, payload)?
        .verify_slice(expected)
        .map_err(|_| DeployError::Authentication("Hook secret does not match.".to_string()))
}

fn compute_with<M: Mac + KeyInit>(secret: &str, payload: &[u8]) -> Result<String> {
    Ok(hex::encode(new_mac::<M>(secret, payload)?.finalize().into_bytes()))
}

/// Builds a signature header value (`algorithm=hexdigest`) for `payload`.
pub fn sign(algorithm: SignatureAlgorithm, secret: &str, payload: &[u8]) -> Result<String> {
    let digest = match algorithm {
        SignatureAlgorithm::Sha1 => compute_with::<Hmac<Sha1>>(secret, payload)?,
        SignatureAlgorithm::Sha224 => compute_with::<Hmac<Sha224>>(secret, payload)?,
        SignatureAlgorithm::Sha256 => compute_with::<Hmac<Sha256>>(secret, payload)?,
        SignatureAlgorithm::Sha384 => compute_with::<Hmac<Sha384>>(secret, payload)?,
        SignatureAlgorithm::Sha512 => compute_with::<Hmac<Sha512>>(secret, payload)?,
    };
    Ok(format!("{}={}", algorithm.as_str(), digest))
}

/// Verifies a signature header value of the form `algorithm=hexdigest`
/// against the raw request body.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    signature_header: Option<&str>,
) -> Result<()> {
    let Some(signature_header) = signature_header else {
        return Err(DeployError::Authentication(format!(
            "HTTP header '{}' is missing.",
            SIGNATURE_HEADER
        )));
    };

    let (algorithm, digest) = signature_header.split_once('=').unwrap_or((signature_header, ""));
    let algorithm = SignatureAlgorithm::try_from_str(algorithm)?;
    let expected = hex::decode(digest.trim()).map_err(|e| {
        debug!("Signature digest is not valid hex: {}", e);
        DeployError::Authentication("Hook secret does not match.".to_string())
    })?;

    match algorithm {
        SignatureAlgorithm::Sha1 => verify_with::<Hmac<Sha1>>(secret, payload, &expected),
        SignatureAlgorithm::Sha224 => verify_with::<Hmac<Sha224>>(secret, payload, &expected),
        SignatureAlgorithm::Sha256 => verify_with::<Hmac<Sha256>>(secret, payload, &expected),
        SignatureAlgorithm::Sha384 => verify_with::<Hmac<Sha384>>(secret, payload, &expected),
        SignatureAlgorithm::Sha512 => verify_with::<Hmac<Sha512>>(secret, payload, &expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "It's a Secret to Everybody";
    const BODY: &[u8] = b"Hello, World!";

    #[test]
    fn test_known_sha256_digest() {
        // Sample from GitHub's webhook validation documentation
        assert_eq!(
            sign(SignatureAlgorithm::Sha256, SECRET, BODY).unwrap(),
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
    }

    #[test]
    fn test_valid_signatures_for_every_algorithm() {
        for algorithm in [
            SignatureAlgorithm::Sha1,
            SignatureAlgorithm::Sha224,
            SignatureAlgorithm::Sha256,
            SignatureAlgorithm::Sha384,
            SignatureAlgorithm::Sha512,
        ] {
            let header = sign(algorithm, SECRET, BODY).unwrap();
            verify_signature(SECRET, BODY, Some(&header)).unwrap();
        }
    }

    #[test]
    fn test_single_bit_mutation_of_body_fails() {
        let header = sign(SignatureAlgorithm::Sha1, SECRET, BODY).unwrap();
        let mut body = BODY.to_vec();
        body[0] ^= 0x01;

        let err = verify_signature(SECRET, &body, Some(&header)).unwrap_err();
        assert_eq!(err.to_string(), "Hook secret does not match.");
    }

    #[test]
    fn test_single_bit_mutation_of_secret_fails() {
        let header = sign(SignatureAlgorithm::Sha256, SECRET, BODY).unwrap();
        let mut secret = SECRET.as_bytes().to_vec();
        secret[3] ^= 0x01;
        let secret = String::from_utf8(secret).unwrap();

        assert!(verify_signature(&secret, BODY, Some(&header)).is_err());
    }

    #[test]
    fn test_missing_header() {
        let err = verify_signature(SECRET, BODY, None).unwrap_err();
        assert!(matches!(err, DeployError::Authentication(_)));
        assert_eq!(err.to_string(), "HTTP header 'X-Hub-Signature' is missing.");
    }

    #[test]
    fn test_unsupported_algorithm() {
        let err = verify_signature(SECRET, BODY, Some("md5=abcdef")).unwrap_err();
        assert_eq!(err.to_string(), "Hash algorithm 'md5' is not supported.");

        let err = verify_signature(SECRET, BODY, Some("garbage")).unwrap_err();
        assert_eq!(err.to_string(), "Hash algorithm 'garbage' is not supported.");
    }

    #[test]
    fn test_invalid_hex_digest() {
        let err = verify_signature(SECRET, BODY, Some("sha1=not-hex")).unwrap_err();
        assert!(matches!(err, DeployError::Authentication(_)));
    }
}
