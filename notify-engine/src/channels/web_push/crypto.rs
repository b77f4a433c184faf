//! Web Push message encryption (RFC 8291, `aes128gcm`) and VAPID (RFC 8292).

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit};
use base64::Engine as _;
use chrono::Utc;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::SigningKey;
use p256::ecdsa::signature::Signer;
use p256::elliptic_curve::rand_core::{OsRng, RngCore};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Serialize;
use sha2::Sha256;

use crate::error::DeliveryError;
use crate::{Error, Result};

pub(super) const PUBLIC_KEY_LEN: usize = 65;
pub(super) const AUTH_SECRET_LEN: usize = 16;
const SALT_LEN: usize = 16;
const RECORD_SIZE: u32 = 4096;
const LAST_RECORD_DELIMITER: u8 = 0x02;

const KEY_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";
const IKM_INFO_PREFIX: &[u8] = b"WebPush: info\0";

pub(super) fn decode_b64url(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(input.trim().trim_end_matches('='))
}

pub(super) fn encode_b64url(input: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(input)
}

/// Application server VAPID key pair.
#[derive(Clone)]
pub(super) struct VapidKeys {
    public_b64: String,
    signing_key: SigningKey,
}

impl std::fmt::Debug for VapidKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidKeys")
            .field("public_b64", &self.public_b64)
            .finish_non_exhaustive()
    }
}

impl VapidKeys {
    /// Parse base64url keys: a 65-byte uncompressed public key and a 32-byte
    /// private scalar.
    pub(super) fn parse(public_b64: &str, private_b64: &str) -> Result<Self> {
        let public_raw = decode_b64url(public_b64)
            .map_err(|e| Error::config(format!("Invalid VAPID public key: {}", e)))?;
        if public_raw.len() != PUBLIC_KEY_LEN {
            return Err(Error::config(format!(
                "VAPID public key must decode to {} bytes",
                PUBLIC_KEY_LEN
            )));
        }

        let private_raw = decode_b64url(private_b64)
            .map_err(|e| Error::config(format!("Invalid VAPID private key: {}", e)))?;
        let private_raw: [u8; 32] = private_raw
            .try_into()
            .map_err(|_| Error::config("VAPID private key must decode to 32 bytes"))?;
        let signing_key = SigningKey::from_bytes((&private_raw).into())
            .map_err(|_| Error::config("VAPID private key is not a valid P-256 scalar"))?;

        let derived = signing_key.verifying_key().to_encoded_point(false);
        if derived.as_bytes() != public_raw.as_slice() {
            return Err(Error::config("VAPID public key does not match private key"));
        }

        Ok(Self {
            public_b64: encode_b64url(&public_raw),
            signing_key,
        })
    }

    pub(super) fn public_b64(&self) -> &str {
        &self.public_b64
    }

    /// Sign a VAPID JWT for `audience`, returning it with its expiry (unix secs).
    pub(super) fn sign_jwt(
        &self,
        audience: &str,
        subject: &str,
        lifetime_secs: i64,
    ) -> std::result::Result<(String, i64), DeliveryError> {
        #[derive(Serialize)]
        struct Claims<'a> {
            aud: &'a str,
            exp: i64,
            sub: &'a str,
        }

        let exp = Utc::now().timestamp() + lifetime_secs;
        let header = encode_b64url(br#"{"typ":"JWT","alg":"ES256"}"#);
        let claims = serde_json::to_vec(&Claims {
            aud: audience,
            exp,
            sub: subject,
        })
        .map_err(|e| DeliveryError::not_supported(format!("VAPID claims: {}", e)))?;

        let signing_input = format!("{}.{}", header, encode_b64url(&claims));
        let signature: p256::ecdsa::Signature = self.signing_key.sign(signing_input.as_bytes());
        Ok((
            format!("{}.{}", signing_input, encode_b64url(&signature.to_bytes())),
            exp,
        ))
    }
}

fn hkdf_expand<const N: usize>(
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
) -> std::result::Result<[u8; N], DeliveryError> {
    let mut okm = [0u8; N];
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, &mut okm)
        .map_err(|_| DeliveryError::not_supported("HKDF output length rejected"))?;
    Ok(okm)
}

/// Encrypt `plaintext` for a subscription as a single `aes128gcm` record.
///
/// The returned body starts with the content-coding header
/// (`salt | rs | idlen | keyid`) followed by the ciphertext.
pub(super) fn encrypt_payload(
    plaintext: &[u8],
    ua_public: &[u8; PUBLIC_KEY_LEN],
    auth_secret: &[u8; AUTH_SECRET_LEN],
) -> std::result::Result<Vec<u8>, DeliveryError> {
    if plaintext.is_empty() {
        return Err(DeliveryError::not_supported("web push payload is empty"));
    }

    let ua_key = p256::PublicKey::from_sec1_bytes(ua_public)
        .map_err(|_| DeliveryError::permission_denied("subscription key is not a P-256 point"))?;

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let as_secret = EphemeralSecret::random(&mut OsRng);
    let as_public = as_secret.public_key().to_encoded_point(false);
    let as_public = as_public.as_bytes();
    let shared = as_secret.diffie_hellman(&ua_key);

    let mut key_info = Vec::with_capacity(IKM_INFO_PREFIX.len() + PUBLIC_KEY_LEN * 2);
    key_info.extend_from_slice(IKM_INFO_PREFIX);
    key_info.extend_from_slice(ua_public);
    key_info.extend_from_slice(as_public);

    let ikm: [u8; 32] = hkdf_expand(auth_secret, shared.raw_secret_bytes(), &key_info)?;
    let cek: [u8; 16] = hkdf_expand(&salt, &ikm, KEY_INFO)?;
    let nonce: [u8; 12] = hkdf_expand(&salt, &ikm, NONCE_INFO)?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD_DELIMITER);

    // Single record: sequence number 0, so the nonce is used as-is.
    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|_| DeliveryError::not_supported("invalid content encryption key"))?;
    let ciphertext = cipher
        .encrypt((&nonce).into(), record.as_slice())
        .map_err(|_| DeliveryError::not_supported("AES-GCM encryption failed"))?;

    let mut body = Vec::with_capacity(SALT_LEN + 5 + as_public.len() + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(as_public.len() as u8);
    body.extend_from_slice(as_public);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::SecretKey;
    use p256::ecdsa::VerifyingKey;
    use p256::ecdsa::signature::Verifier;

    fn generate_vapid() -> (String, String) {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key().to_encoded_point(false);
        (
            encode_b64url(public.as_bytes()),
            encode_b64url(&secret.to_bytes()),
        )
    }

    /// Receiver-side decryption, used to check what a browser would see.
    fn decrypt(body: &[u8], ua_secret: &SecretKey, auth_secret: &[u8; 16]) -> Vec<u8> {
        let salt = &body[0..16];
        let rs = u32::from_be_bytes(body[16..20].try_into().unwrap());
        assert_eq!(rs, RECORD_SIZE);
        let idlen = body[20] as usize;
        let as_public = &body[21..21 + idlen];
        let ciphertext = &body[21 + idlen..];

        let as_key = p256::PublicKey::from_sec1_bytes(as_public).unwrap();
        let shared = p256::ecdh::diffie_hellman(ua_secret.to_nonzero_scalar(), as_key.as_affine());
        let ua_public = ua_secret.public_key().to_encoded_point(false);

        let mut key_info = IKM_INFO_PREFIX.to_vec();
        key_info.extend_from_slice(ua_public.as_bytes());
        key_info.extend_from_slice(as_public);

        let ikm: [u8; 32] = hkdf_expand(auth_secret, shared.raw_secret_bytes(), &key_info).unwrap();
        let cek: [u8; 16] = hkdf_expand(salt, &ikm, KEY_INFO).unwrap();
        let nonce: [u8; 12] = hkdf_expand(salt, &ikm, NONCE_INFO).unwrap();

        let mut plain = Aes128Gcm::new_from_slice(&cek)
            .unwrap()
            .decrypt((&nonce).into(), ciphertext)
            .unwrap();
        assert_eq!(plain.pop(), Some(LAST_RECORD_DELIMITER));
        plain
    }

    #[test]
    fn test_encrypted_payload_is_readable_by_subscriber() {
        let ua_secret = SecretKey::random(&mut OsRng);
        let ua_public: [u8; 65] = ua_secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .try_into()
            .unwrap();
        let mut auth = [0u8; 16];
        OsRng.fill_bytes(&mut auth);

        let body = encrypt_payload(b"{\"title\":\"Pool Closed\"}", &ua_public, &auth).unwrap();
        assert_eq!(body[20] as usize, PUBLIC_KEY_LEN);
        assert_eq!(
            decrypt(&body, &ua_secret, &auth),
            b"{\"title\":\"Pool Closed\"}".to_vec()
        );
    }

    #[test]
    fn test_empty_payload_rejected() {
        let ua_secret = SecretKey::random(&mut OsRng);
        let ua_public: [u8; 65] = ua_secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .try_into()
            .unwrap();
        assert!(encrypt_payload(b"", &ua_public, &[0u8; 16]).is_err());
    }

    #[test]
    fn test_vapid_jwt_signature_verifies() {
        let (public_b64, private_b64) = generate_vapid();
        let keys = VapidKeys::parse(&public_b64, &private_b64).unwrap();

        let (jwt, exp) = keys
            .sign_jwt("https://push.example.net", "mailto:ops@example.org", 3600)
            .unwrap();
        assert!(exp > Utc::now().timestamp());

        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);

        let claims: serde_json::Value =
            serde_json::from_slice(&decode_b64url(parts[1]).unwrap()).unwrap();
        assert_eq!(claims["aud"], "https://push.example.net");
        assert_eq!(claims["sub"], "mailto:ops@example.org");

        let public_raw = decode_b64url(&public_b64).unwrap();
        let verifying = VerifyingKey::from_sec1_bytes(&public_raw).unwrap();
        let signature =
            p256::ecdsa::Signature::from_slice(&decode_b64url(parts[2]).unwrap()).unwrap();
        let signing_input = format!("{}.{}", parts[0], parts[1]);
        assert!(verifying.verify(signing_input.as_bytes(), &signature).is_ok());
    }

    #[test]
    fn test_mismatched_vapid_keys_rejected() {
        let (public_b64, _) = generate_vapid();
        let (_, other_private) = generate_vapid();
        assert!(VapidKeys::parse(&public_b64, &other_private).is_err());
        assert!(VapidKeys::parse("not-base64!", &other_private).is_err());
    }
}
