//! ECIES over Ristretto255, used to carry partial key backups between guardians.
//!
//! A fresh ephemeral key is generated for every message. The shared point and
//! the ephemeral public key are fed through HKDF-SHA256 to derive an AES-256-GCM
//! key. The ciphertext is `ephemeral_pk || nonce || aes_gcm_ciphertext`.

use crate::*;
use aes_gcm::aead::{generic_array::GenericArray, Aead, NewAead};
use aes_gcm::Aes256Gcm;
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;

const AES_IV_LENGTH: usize = 12;
const PUBLIC_KEY_LENGTH: usize = 32;

type AesKey = [u8; 32];

/// A public key meant only for ECIES
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct EciesPublicKey(pub GroupElement);

/// The matching secret key
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EciesSecretKey(pub GroupScalar);

impl EciesPublicKey {
    pub fn from_secret(sk: &EciesSecretKey) -> Self {
        EciesPublicKey(GroupElement::from_exponent(&sk.0))
    }
}

/// Generate a keypair, ready for use in ECIES
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (EciesSecretKey, EciesPublicKey) {
    let secret = EciesSecretKey(GroupScalar::random(rng));
    let public = EciesPublicKey::from_secret(&secret);
    (secret, public)
}

/// Encrypt a message; only the holder of the receiver's secret key can decrypt it.
pub fn encrypt<R: RngCore + CryptoRng>(
    receiver_pub: &EciesPublicKey,
    msg: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, CryptoError> {
    let (ephemeral_sk, ephemeral_pk) = generate_keypair(rng);

    let aes_key = derive_key(&ephemeral_pk, &(receiver_pub.0 * ephemeral_sk.0))?;

    let mut nonce = [0u8; AES_IV_LENGTH];
    rng.fill_bytes(&mut nonce);
    let encrypted = aes_encrypt(&aes_key, &nonce, msg)?;

    let mut cipher_text = Vec::with_capacity(PUBLIC_KEY_LENGTH + AES_IV_LENGTH + encrypted.len());
    cipher_text.extend_from_slice(&ephemeral_pk.0.to_bytes());
    cipher_text.extend_from_slice(&nonce);
    cipher_text.extend(encrypted);

    Ok(cipher_text)
}

/// Decrypt an ECIES ciphertext with the receiver's secret key.
pub fn decrypt(receiver_sec: &EciesSecretKey, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if msg.len() < PUBLIC_KEY_LENGTH + AES_IV_LENGTH {
        return Err(CryptoError::DecryptionFailed);
    }

    let ephemeral_pk = EciesPublicKey(GroupElement::from_bytes(&msg[..PUBLIC_KEY_LENGTH])?);
    let nonce = &msg[PUBLIC_KEY_LENGTH..PUBLIC_KEY_LENGTH + AES_IV_LENGTH];
    let encrypted = &msg[PUBLIC_KEY_LENGTH + AES_IV_LENGTH..];

    let aes_key = derive_key(&ephemeral_pk, &(ephemeral_pk.0 * receiver_sec.0))?;
    aes_decrypt(&aes_key, nonce, encrypted)
}

fn derive_key(ephemeral_pk: &EciesPublicKey, shared: &GroupElement) -> Result<AesKey, CryptoError> {
    let mut master = Vec::with_capacity(PUBLIC_KEY_LENGTH * 2);
    master.extend_from_slice(&ephemeral_pk.0.to_bytes());
    master.extend_from_slice(&shared.to_bytes());

    let h = Hkdf::<Sha256>::new(None, &master);
    let mut out = [0u8; 32];
    h.expand(b"ballotguard_ecies", &mut out)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(out)
}

fn aes_encrypt(key: &AesKey, nonce: &[u8], msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let aead = Aes256Gcm::new(GenericArray::from_slice(key));
    aead.encrypt(GenericArray::from_slice(nonce), msg)
        .map_err(|_| CryptoError::EncryptionFailed)
}

fn aes_decrypt(key: &AesKey, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let aead = Aes256Gcm::new(GenericArray::from_slice(key));
    aead.decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn shared_point_agrees() {
        let (ephemeral_sk, ephemeral_pk) = generate_keypair(&mut OsRng);
        let (peer_sk, peer_pk) = generate_keypair(&mut OsRng);

        assert_eq!(peer_pk.0 * ephemeral_sk.0, ephemeral_pk.0 * peer_sk.0);
    }

    #[test]
    fn ecies_roundtrip_and_wrong_key() {
        let (peer_sk, peer_pk) = generate_keypair(&mut OsRng);

        let plaintext = b"partial key backup";
        let encrypted = encrypt(&peer_pk, plaintext, &mut OsRng).unwrap();
        let decrypted = decrypt(&peer_sk, &encrypted).unwrap();
        assert_eq!(plaintext, decrypted.as_slice());

        let (bad_sk, _) = generate_keypair(&mut OsRng);
        assert!(decrypt(&bad_sk, &encrypted).is_err());
    }

    #[test]
    fn truncated_ciphertext_is_an_error() {
        let (sk, _) = generate_keypair(&mut OsRng);
        assert!(matches!(
            decrypt(&sk, &[0u8; 10]),
            Err(CryptoError::DecryptionFailed)
        ));
    }
}
