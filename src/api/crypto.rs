//! Primitives of the encrypted-body gateway scheme: a random per-request
//! AES key, wrapped with the gateway's RSA public key.

use crate::api::Error;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const SESSION_KEY_LEN: usize = 16;
const ZERO_IV: [u8; 16] = [0; 16];

fn crypto_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Crypto(format!("{}: {}", context, e))
}

/// Fresh alphanumeric AES-128 key.
pub fn session_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Parse the gateway public key. Accepts PEM (SPKI or PKCS#1) or bare
/// base64 DER in either alphabet, padded or not.
pub fn parse_public_key(text: &str) -> Result<RsaPublicKey, Error> {
    let text = text.trim();

    if text.contains("-----BEGIN RSA PUBLIC KEY-----") {
        return RsaPublicKey::from_pkcs1_pem(text).map_err(|e| crypto_err("PKCS#1 key", e));
    }
    if text.contains("-----BEGIN") {
        return RsaPublicKey::from_public_key_pem(text).map_err(|e| crypto_err("public key", e));
    }

    let normalized: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    let der = STANDARD_NO_PAD
        .decode(normalized)
        .map_err(|e| crypto_err("public key encoding", e))?;

    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| crypto_err("public key", e))
}

/// RSA/PKCS#1 v1.5 encrypt `key`, base64 encoded.
pub fn wrap_key(public_key: &RsaPublicKey, key: &str) -> Result<String, Error> {
    public_key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, key.as_bytes())
        .map(|bytes| STANDARD.encode(bytes))
        .map_err(|e| crypto_err("key wrap", e))
}

/// AES-128-CBC, zero IV, PKCS#7 padding, base64 encoded.
pub fn encrypt(key: &str, plain: &[u8]) -> Result<String, Error> {
    let cipher =
        Aes128CbcEnc::new_from_slices(key.as_bytes(), &ZERO_IV).map_err(|e| crypto_err("key", e))?;
    Ok(STANDARD.encode(cipher.encrypt_padded_vec_mut::<Pkcs7>(plain)))
}

pub fn decrypt(key: &str, encoded: &str) -> Result<String, Error> {
    let sealed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| crypto_err("response encoding", e))?;
    let cipher =
        Aes128CbcDec::new_from_slices(key.as_bytes(), &ZERO_IV).map_err(|e| crypto_err("key", e))?;
    let plain = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&sealed)
        .map_err(|e| crypto_err("response", e))?;

    String::from_utf8(plain).map_err(|e| crypto_err("response", e))
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::RsaPrivateKey;

    pub(crate) fn keypair() -> (RsaPrivateKey, String) {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        (private, pem)
    }

    #[test]
    fn session_keys_are_fresh() {
        let a = session_key();
        let b = session_key();

        assert_eq!(SESSION_KEY_LEN, a.len());
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn aes_round_trip() {
        let key = "0123456789abcdef";
        let sealed = encrypt(key, b"{\"appkey\":\"x\"}").unwrap();

        assert_ne!("{\"appkey\":\"x\"}", sealed);
        assert_eq!("{\"appkey\":\"x\"}", decrypt(key, &sealed).unwrap());
        assert!(decrypt("fedcba9876543210", &sealed).is_err());
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(encrypt("short", b"x"), Err(Error::Crypto(_))));
    }

    #[test]
    fn wrapped_key_opens_with_private_key() {
        let (private, pem) = keypair();
        let public = parse_public_key(&pem).unwrap();

        let wrapped = wrap_key(&public, "0123456789abcdef").unwrap();
        let opened = private
            .decrypt(Pkcs1v15Encrypt, &STANDARD.decode(wrapped).unwrap())
            .unwrap();
        assert_eq!(b"0123456789abcdef".to_vec(), opened);
    }

    #[test]
    fn public_key_as_bare_base64() {
        let (private, _) = keypair();
        let der = RsaPublicKey::from(&private).to_public_key_der().unwrap();
        let url_safe = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(der.as_bytes());

        assert!(parse_public_key(&url_safe).is_ok());
        assert!(parse_public_key("not a key").is_err());
    }
}
