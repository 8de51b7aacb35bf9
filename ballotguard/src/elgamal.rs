use crate::*;
use rand::{CryptoRng, RngCore};

/// An exponential ElGamal key pair
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ElGamalKeyPair {
    pub secret_key: GroupScalar,
    pub public_key: GroupElement,
}

impl ElGamalKeyPair {
    pub fn from_secret(secret_key: GroupScalar) -> Self {
        ElGamalKeyPair {
            secret_key,
            public_key: GroupElement::from_exponent(&secret_key),
        }
    }
}

/// An exponential ElGamal ciphertext `(g^r, g^m * K^r)`.
///
/// Ciphertexts under the same key add homomorphically, which is how tallies
/// are accumulated.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElGamalCiphertext {
    pub pad: GroupElement,
    pub data: GroupElement,
}

impl ElGamalCiphertext {
    /// The encryption of zero with a zero nonce, the neutral element for `add`
    pub fn zero() -> Self {
        ElGamalCiphertext {
            pad: GroupElement::identity(),
            data: GroupElement::identity(),
        }
    }

    pub fn encrypt_with_nonce(message: u64, nonce: &GroupScalar, public_key: &GroupElement) -> Self {
        ElGamalCiphertext {
            pad: GroupElement::from_exponent(nonce),
            data: GroupElement::from_exponent(&GroupScalar::from_u64(message))
                + *public_key * *nonce,
        }
    }

    pub fn encrypt<R: RngCore + CryptoRng>(
        message: u64,
        public_key: &GroupElement,
        rng: &mut R,
    ) -> Self {
        let nonce = GroupScalar::random(rng);
        Self::encrypt_with_nonce(message, &nonce, public_key)
    }

    pub fn add(&self, other: &ElGamalCiphertext) -> Self {
        ElGamalCiphertext {
            pad: self.pad + other.pad,
            data: self.data + other.data,
        }
    }

    /// `pad^s`, one guardian's contribution to decrypting this ciphertext
    pub fn partial_decrypt(&self, secret_key: &GroupScalar) -> GroupElement {
        self.pad * *secret_key
    }

    /// Recover the message given the product of every guardian's partial decryption
    pub fn decrypt_with_product(&self, product: &GroupElement, max: u64) -> Option<u64> {
        discrete_log(&(self.data - *product), max)
    }
}

/// Sum a sequence of ciphertexts
pub fn elgamal_sum<'a, I: IntoIterator<Item = &'a ElGamalCiphertext>>(items: I) -> ElGamalCiphertext {
    items
        .into_iter()
        .fold(ElGamalCiphertext::zero(), |acc, c| acc.add(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn homomorphic_sum_decrypts() {
        let keys = ElGamalKeyPair::from_secret(GroupScalar::random(&mut OsRng));
        let votes = [1u64, 0, 1, 1, 0];
        let ciphertexts: Vec<_> = votes
            .iter()
            .map(|v| ElGamalCiphertext::encrypt(*v, &keys.public_key, &mut OsRng))
            .collect();

        let sum = elgamal_sum(&ciphertexts);
        let product = sum.partial_decrypt(&keys.secret_key);
        assert_eq!(sum.decrypt_with_product(&product, 5), Some(3));
    }

    #[test]
    fn zero_is_neutral() {
        let keys = ElGamalKeyPair::from_secret(GroupScalar::random(&mut OsRng));
        let c = ElGamalCiphertext::encrypt(1, &keys.public_key, &mut OsRng);
        assert_eq!(c.add(&ElGamalCiphertext::zero()), c);
    }
}
