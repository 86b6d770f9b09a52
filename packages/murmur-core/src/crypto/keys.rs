//! RSA keypairs and session-secret wrapping.
//!
//! Each client process generates a fresh RSA-2048 keypair on startup and
//! sends the public half (PKCS#1 PEM) to the server. The server wraps the
//! connection's session secret under that key with OAEP-SHA-256; only the
//! holder of the private key can recover it. The private key never leaves
//! the process and is never serialized.

use rand::rngs::OsRng;
use rsa::{
    pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey, LineEnding},
    Oaep, RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::crypto::encryption::{SessionSecret, KEY_SIZE};
use crate::error::{Error, Result};

/// RSA modulus size in bits.
pub const RSA_KEY_BITS: usize = 2048;

/// A client's asymmetric keypair for session-secret transport.
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a fresh 2048-bit keypair from the OS CSPRNG.
    pub fn generate() -> Result<Self> {
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| Error::KeyGenerationFailed(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Export the public key as PKCS#1 PEM for transmission.
    pub fn public_key_pem(&self) -> Result<String> {
        self.public
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }

    /// Unwrap a session secret that was wrapped under our public key.
    ///
    /// Fails closed on any padding or length mismatch; a failed unwrap is
    /// connection-fatal for the caller.
    pub fn unwrap_secret(&self, wrapped: &[u8]) -> Result<SessionSecret> {
        let mut bytes = self
            .private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|e| Error::KeyExchangeFailed(e.to_string()))?;

        let secret = <[u8; KEY_SIZE]>::try_from(bytes.as_slice())
            .map(SessionSecret::from_bytes)
            .map_err(|_| Error::KeyExchangeFailed("unwrapped secret has wrong length".into()));
        bytes.zeroize();
        secret
    }
}

/// Wrap a session secret under a peer's PEM-encoded public key.
pub fn wrap_secret(public_key_pem: &str, secret: &SessionSecret) -> Result<Vec<u8>> {
    let public = RsaPublicKey::from_pkcs1_pem(public_key_pem)
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    let mut rng = OsRng;
    public
        .encrypt(&mut rng, Oaep::new::<Sha256>(), secret.as_bytes())
        .map_err(|e| Error::KeyExchangeFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let keys = RsaKeyPair::generate().unwrap();
        let secret = SessionSecret::generate();

        let wrapped = wrap_secret(&keys.public_key_pem().unwrap(), &secret).unwrap();
        let unwrapped = keys.unwrap_secret(&wrapped).unwrap();

        assert_eq!(unwrapped.as_bytes(), secret.as_bytes());
        // The wrapped form must not leak the raw secret.
        assert_ne!(&wrapped[..KEY_SIZE], secret.as_bytes());
    }

    #[test]
    fn test_unwrap_with_wrong_key_fails() {
        let alice = RsaKeyPair::generate().unwrap();
        let mallory = RsaKeyPair::generate().unwrap();
        let secret = SessionSecret::generate();

        let wrapped = wrap_secret(&alice.public_key_pem().unwrap(), &secret).unwrap();
        assert!(mallory.unwrap_secret(&wrapped).is_err());
    }

    #[test]
    fn test_wrap_rejects_garbage_pem() {
        let secret = SessionSecret::generate();
        assert!(wrap_secret("-----BEGIN RSA PUBLIC KEY-----\ngarbage\n", &secret).is_err());
    }
}
