use crate::*;
use rand::{CryptoRng, RngCore};

/// Non-interactive proof of knowledge of the discrete log of a public value
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SchnorrProof {
    pub commitment: GroupElement,
    pub challenge: GroupScalar,
    pub response: GroupScalar,
}

impl SchnorrProof {
    /// Prove knowledge of `secret` where `public = g^secret`
    pub fn prove<R: RngCore + CryptoRng>(
        secret: &GroupScalar,
        public: &GroupElement,
        rng: &mut R,
    ) -> Self {
        let u = GroupScalar::random(rng);
        let commitment = GroupElement::from_exponent(&u);
        let challenge = Self::challenge(public, &commitment);
        SchnorrProof {
            commitment,
            challenge,
            response: u + challenge * *secret,
        }
    }

    pub fn verify(&self, public: &GroupElement) -> bool {
        if public.is_identity() {
            return false;
        }
        self.challenge == Self::challenge(public, &self.commitment)
            && GroupElement::from_exponent(&self.response)
                == self.commitment + *public * self.challenge
    }

    fn challenge(public: &GroupElement, commitment: &GroupElement) -> GroupScalar {
        HashBuilder::new("ballotguard_schnorr")
            .element(public)
            .element(commitment)
            .finish()
    }
}

/// Proof that a partial decryption `M = pad^s` uses the same secret as the
/// guardian's public key `K = g^s`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChaumPedersenProof {
    pub pad_commitment: GroupElement,
    pub data_commitment: GroupElement,
    pub challenge: GroupScalar,
    pub response: GroupScalar,
}

impl ChaumPedersenProof {
    pub fn prove<R: RngCore + CryptoRng>(
        ciphertext: &ElGamalCiphertext,
        secret: &GroupScalar,
        partial_decryption: &GroupElement,
        extended_base_hash: &GroupScalar,
        rng: &mut R,
    ) -> Self {
        let public = GroupElement::from_exponent(secret);
        let u = GroupScalar::random(rng);
        let pad_commitment = GroupElement::from_exponent(&u);
        let data_commitment = ciphertext.pad * u;
        let challenge = Self::challenge(
            extended_base_hash,
            &public,
            ciphertext,
            partial_decryption,
            &pad_commitment,
            &data_commitment,
        );
        ChaumPedersenProof {
            pad_commitment,
            data_commitment,
            challenge,
            response: u + challenge * *secret,
        }
    }

    pub fn verify(
        &self,
        ciphertext: &ElGamalCiphertext,
        public_key: &GroupElement,
        partial_decryption: &GroupElement,
        extended_base_hash: &GroupScalar,
    ) -> bool {
        let expected = Self::challenge(
            extended_base_hash,
            public_key,
            ciphertext,
            partial_decryption,
            &self.pad_commitment,
            &self.data_commitment,
        );

        expected == self.challenge
            && GroupElement::from_exponent(&self.response)
                == self.pad_commitment + *public_key * self.challenge
            && ciphertext.pad * self.response
                == self.data_commitment + *partial_decryption * self.challenge
    }

    fn challenge(
        extended_base_hash: &GroupScalar,
        public_key: &GroupElement,
        ciphertext: &ElGamalCiphertext,
        partial_decryption: &GroupElement,
        pad_commitment: &GroupElement,
        data_commitment: &GroupElement,
    ) -> GroupScalar {
        HashBuilder::new("ballotguard_chaum_pedersen")
            .scalar(extended_base_hash)
            .element(public_key)
            .element(&ciphertext.pad)
            .element(&ciphertext.data)
            .element(partial_decryption)
            .element(pad_commitment)
            .element(data_commitment)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn schnorr_proves_knowledge() {
        let secret = GroupScalar::random(&mut OsRng);
        let public = GroupElement::from_exponent(&secret);
        let proof = SchnorrProof::prove(&secret, &public, &mut OsRng);
        assert!(proof.verify(&public));

        let other = GroupElement::from_exponent(&GroupScalar::random(&mut OsRng));
        assert!(!proof.verify(&other));
    }

    #[test]
    fn chaum_pedersen_binds_key_ciphertext_and_hash() {
        let keys = ElGamalKeyPair::from_secret(GroupScalar::random(&mut OsRng));
        let ciphertext = ElGamalCiphertext::encrypt(1, &keys.public_key, &mut OsRng);
        let partial = ciphertext.partial_decrypt(&keys.secret_key);
        let hash = GroupScalar::random(&mut OsRng);

        let proof = ChaumPedersenProof::prove(&ciphertext, &keys.secret_key, &partial, &hash, &mut OsRng);
        assert!(proof.verify(&ciphertext, &keys.public_key, &partial, &hash));

        // Wrong extended base hash
        assert!(!proof.verify(&ciphertext, &keys.public_key, &partial, &GroupScalar::one()));

        // Wrong partial decryption
        let forged = partial + GroupElement::generator();
        assert!(!proof.verify(&ciphertext, &keys.public_key, &forged, &hash));

        // Wrong guardian key
        let other = GroupElement::from_exponent(&GroupScalar::random(&mut OsRng));
        assert!(!proof.verify(&ciphertext, &other, &partial, &hash));
    }
}
