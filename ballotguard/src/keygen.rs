use crate::*;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::Sha256;

pub type GuardianId = String;

/// A guardian's secret polynomial of degree `quorum - 1`.
///
/// The constant term is the guardian's election secret key. Every coefficient
/// has a public commitment `g^a_j` and a Schnorr proof of knowledge.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ElectionPolynomial {
    pub coefficients: Vec<GroupScalar>,
    pub commitments: Vec<GroupElement>,
    pub proofs: Vec<SchnorrProof>,
}

impl ElectionPolynomial {
    pub fn generate<R: RngCore + CryptoRng>(quorum: usize, rng: &mut R) -> Result<Self, CryptoError> {
        if quorum == 0 {
            return Err(CryptoError::InvalidQuorum);
        }

        let mut coefficients = Vec::with_capacity(quorum);
        let mut commitments = Vec::with_capacity(quorum);
        let mut proofs = Vec::with_capacity(quorum);
        for _ in 0..quorum {
            let coefficient = GroupScalar::random(rng);
            let commitment = GroupElement::from_exponent(&coefficient);
            proofs.push(SchnorrProof::prove(&coefficient, &commitment, rng));
            coefficients.push(coefficient);
            commitments.push(commitment);
        }

        Ok(ElectionPolynomial {
            coefficients,
            commitments,
            proofs,
        })
    }

    /// Evaluate the polynomial at `x`
    pub fn evaluate(&self, x: u64) -> GroupScalar {
        let x = GroupScalar::from_u64(x);
        self.coefficients
            .iter()
            .rev()
            .fold(GroupScalar::zero(), |acc, c| acc * x + *c)
    }
}

/// Check that `g^value` matches the committed polynomial evaluated at `x`
pub fn verify_polynomial_value(commitments: &[GroupElement], x: u64, value: &GroupScalar) -> bool {
    let x = GroupScalar::from_u64(x);
    let expected = commitments
        .iter()
        .rev()
        .fold(GroupElement::identity(), |acc, c| acc * x + *c);
    GroupElement::from_exponent(value) == expected
}

/// A guardian's election key pair together with the polynomial that produced it
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ElectionKeyPair {
    pub owner_id: GuardianId,
    pub sequence_order: u64,
    pub key_pair: ElGamalKeyPair,
    pub polynomial: ElectionPolynomial,
}

impl ElectionKeyPair {
    pub fn share(&self) -> ElectionPublicKey {
        ElectionPublicKey {
            owner_id: self.owner_id.clone(),
            sequence_order: self.sequence_order,
            key: self.key_pair.public_key,
            coefficient_commitments: self.polynomial.commitments.clone(),
            coefficient_proofs: self.polynomial.proofs.clone(),
        }
    }
}

/// The public half of an `ElectionKeyPair`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ElectionPublicKey {
    pub owner_id: GuardianId,
    pub sequence_order: u64,
    pub key: GroupElement,
    pub coefficient_commitments: Vec<GroupElement>,
    pub coefficient_proofs: Vec<SchnorrProof>,
}

impl ElectionPublicKey {
    /// Every commitment is proven and the key is the constant-term commitment
    pub fn is_valid(&self) -> bool {
        !self.coefficient_commitments.is_empty()
            && self.coefficient_commitments.len() == self.coefficient_proofs.len()
            && self.coefficient_commitments[0] == self.key
            && self
                .coefficient_commitments
                .iter()
                .zip(self.coefficient_proofs.iter())
                .all(|(commitment, proof)| proof.verify(commitment))
    }
}

/// Key pair used to encrypt partial key backups addressed to a guardian
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AuxiliaryKeyPair {
    pub owner_id: GuardianId,
    pub sequence_order: u64,
    pub secret_key: EciesSecretKey,
    pub public_key: EciesPublicKey,
}

impl AuxiliaryKeyPair {
    pub fn share(&self) -> AuxiliaryPublicKey {
        AuxiliaryPublicKey {
            owner_id: self.owner_id.clone(),
            sequence_order: self.sequence_order,
            key: self.public_key,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AuxiliaryPublicKey {
    pub owner_id: GuardianId,
    pub sequence_order: u64,
    pub key: EciesPublicKey,
}

/// Everything a guardian announces during the first round of the ceremony
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PublicKeySet {
    pub election: ElectionPublicKey,
    pub auxiliary: AuxiliaryPublicKey,
}

impl PublicKeySet {
    pub fn owner_id(&self) -> &str {
        &self.election.owner_id
    }

    pub fn sequence_order(&self) -> u64 {
        self.election.sequence_order
    }

    /// Both halves belong to the same guardian and the election key is proven
    pub fn validate(&self) -> bool {
        self.election.owner_id == self.auxiliary.owner_id
            && self.election.sequence_order == self.auxiliary.sequence_order
            && self.election.is_valid()
    }
}

/// One guardian's polynomial evaluated at another guardian's sequence order,
/// encrypted to the recipient's auxiliary key
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ElectionPartialKeyBackup {
    pub owner_id: GuardianId,
    pub designated_id: GuardianId,
    pub designated_sequence_order: u64,
    #[serde(with = "crate::serde_hex::hex_bytes")]
    pub encrypted_value: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ElectionPartialKeyVerification {
    pub owner_id: GuardianId,
    pub designated_id: GuardianId,
    pub verifier_id: GuardianId,
    pub verified: bool,
}

/// A backup value published in the clear so a third party can check it
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ElectionPartialKeyChallenge {
    pub owner_id: GuardianId,
    pub designated_id: GuardianId,
    pub designated_sequence_order: u64,
    pub value: GroupScalar,
    pub coefficient_commitments: Vec<GroupElement>,
    pub coefficient_proofs: Vec<SchnorrProof>,
}

// Derive a deterministic RNG from a caller-provided seed
fn seeded_rng(seed: &[u8]) -> Result<ChaCha20Rng, CryptoError> {
    let h = Hkdf::<Sha256>::new(None, seed);
    let mut out = [0u8; 32];
    h.expand(b"ballotguard_election_polynomial", &mut out)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(ChaCha20Rng::from_seed(out))
}

/// Generate a guardian's election key pair.
///
/// With a seed the result is deterministic, which lets a guardian regenerate
/// its keys instead of storing them.
pub fn generate_election_key_pair(
    guardian_id: &str,
    sequence_order: u64,
    quorum: usize,
    seed: Option<&[u8]>,
) -> Result<ElectionKeyPair, CryptoError> {
    let polynomial = match seed {
        Some(seed) => ElectionPolynomial::generate(quorum, &mut seeded_rng(seed)?)?,
        None => ElectionPolynomial::generate(quorum, &mut OsRng)?,
    };

    Ok(ElectionKeyPair {
        owner_id: guardian_id.to_owned(),
        sequence_order,
        key_pair: ElGamalKeyPair::from_secret(polynomial.coefficients[0]),
        polynomial,
    })
}

pub fn generate_auxiliary_key_pair(guardian_id: &str, sequence_order: u64) -> AuxiliaryKeyPair {
    let (secret_key, public_key) = ecies::generate_keypair(&mut OsRng);
    AuxiliaryKeyPair {
        owner_id: guardian_id.to_owned(),
        sequence_order,
        secret_key,
        public_key,
    }
}

/// Build the backup `owner` sends to `recipient`
pub fn generate_partial_key_backup(
    owner: &ElectionKeyPair,
    recipient: &AuxiliaryPublicKey,
) -> Result<ElectionPartialKeyBackup, CryptoError> {
    let value = owner.polynomial.evaluate(recipient.sequence_order);
    let encrypted_value = ecies::encrypt(&recipient.key, &value.to_bytes(), &mut OsRng)?;

    Ok(ElectionPartialKeyBackup {
        owner_id: owner.owner_id.clone(),
        designated_id: recipient.owner_id.clone(),
        designated_sequence_order: recipient.sequence_order,
        encrypted_value,
    })
}

/// Decrypt a backup addressed to `auxiliary` and check it against the owner's
/// announced commitments. Any failure yields `verified: false`.
pub fn verify_partial_key_backup(
    verifier_id: &str,
    backup: &ElectionPartialKeyBackup,
    owner_public_key: &ElectionPublicKey,
    auxiliary: &AuxiliaryKeyPair,
) -> ElectionPartialKeyVerification {
    let verified = backup.owner_id == owner_public_key.owner_id
        && backup.designated_id == auxiliary.owner_id
        && backup.designated_sequence_order == auxiliary.sequence_order
        && ecies::decrypt(&auxiliary.secret_key, &backup.encrypted_value)
            .and_then(|bytes| GroupScalar::from_bytes(&bytes))
            .map(|value| {
                verify_polynomial_value(
                    &owner_public_key.coefficient_commitments,
                    backup.designated_sequence_order,
                    &value,
                )
            })
            .unwrap_or(false);

    ElectionPartialKeyVerification {
        owner_id: backup.owner_id.clone(),
        designated_id: backup.designated_id.clone(),
        verifier_id: verifier_id.to_owned(),
        verified,
    }
}

/// Publish the value behind a disputed backup
pub fn generate_partial_key_challenge(
    backup: &ElectionPartialKeyBackup,
    polynomial: &ElectionPolynomial,
) -> ElectionPartialKeyChallenge {
    ElectionPartialKeyChallenge {
        owner_id: backup.owner_id.clone(),
        designated_id: backup.designated_id.clone(),
        designated_sequence_order: backup.designated_sequence_order,
        value: polynomial.evaluate(backup.designated_sequence_order),
        coefficient_commitments: polynomial.commitments.clone(),
        coefficient_proofs: polynomial.proofs.clone(),
    }
}

/// Third-party check of a challenge
pub fn verify_partial_key_challenge(
    verifier_id: &str,
    challenge: &ElectionPartialKeyChallenge,
) -> ElectionPartialKeyVerification {
    let proofs_hold = challenge.coefficient_commitments.len() == challenge.coefficient_proofs.len()
        && challenge
            .coefficient_commitments
            .iter()
            .zip(challenge.coefficient_proofs.iter())
            .all(|(commitment, proof)| proof.verify(commitment));

    ElectionPartialKeyVerification {
        owner_id: challenge.owner_id.clone(),
        designated_id: challenge.designated_id.clone(),
        verifier_id: verifier_id.to_owned(),
        verified: proofs_hold
            && verify_polynomial_value(
                &challenge.coefficient_commitments,
                challenge.designated_sequence_order,
                &challenge.value,
            ),
    }
}

/// The joint election public key: the product of every guardian's key
pub fn combine_public_keys(keys: &[ElectionPublicKey]) -> GroupElement {
    keys.iter()
        .fold(GroupElement::identity(), |acc, k| acc + k.key)
}

/// Hash of every guardian's coefficient commitments, in the given order
pub fn hash_commitments(keys: &[ElectionPublicKey]) -> GroupScalar {
    keys.iter()
        .flat_map(|k| k.coefficient_commitments.iter())
        .fold(HashBuilder::new("ballotguard_commitments"), |h, c| h.element(c))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guardians(n: u64, quorum: usize) -> Vec<(ElectionKeyPair, AuxiliaryKeyPair)> {
        (1..=n)
            .map(|i| {
                let id = format!("g{}", i);
                (
                    generate_election_key_pair(&id, i, quorum, None).unwrap(),
                    generate_auxiliary_key_pair(&id, i),
                )
            })
            .collect()
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        let a = generate_election_key_pair("g1", 1, 2, Some(b"seed")).unwrap();
        let b = generate_election_key_pair("g1", 1, 2, Some(b"seed")).unwrap();
        let c = generate_election_key_pair("g1", 1, 2, Some(b"other")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.key_pair.public_key, c.key_pair.public_key);
        assert_eq!(a.polynomial.coefficients.len(), 2);
    }

    #[test]
    fn zero_quorum_is_rejected() {
        assert!(matches!(
            generate_election_key_pair("g1", 1, 0, None),
            Err(CryptoError::InvalidQuorum)
        ));
    }

    #[test]
    fn public_key_set_validation() {
        let key = generate_election_key_pair("g1", 1, 3, None).unwrap();
        let aux = generate_auxiliary_key_pair("g1", 1);
        let set = PublicKeySet {
            election: key.share(),
            auxiliary: aux.share(),
        };
        assert!(set.validate());

        let mut mismatched = set.clone();
        mismatched.auxiliary.owner_id = "g2".into();
        assert!(!mismatched.validate());

        let mut tampered = set.clone();
        tampered.election.key = GroupElement::generator();
        assert!(!tampered.validate());

        let mut unproven = set;
        unproven.election.coefficient_proofs.pop();
        assert!(!unproven.validate());
    }

    #[test]
    fn backups_verify_for_their_recipient() {
        let g = guardians(3, 2);
        let (owner, _) = &g[0];
        let (_, recipient_aux) = &g[1];
        let (_, other_aux) = &g[2];

        let backup = generate_partial_key_backup(owner, &recipient_aux.share()).unwrap();
        let verification = verify_partial_key_backup("g2", &backup, &owner.share(), recipient_aux);
        assert!(verification.verified);
        assert_eq!(verification.owner_id, "g1");
        assert_eq!(verification.designated_id, "g2");

        // The wrong auxiliary key cannot open it
        let wrong = verify_partial_key_backup("g3", &backup, &owner.share(), other_aux);
        assert!(!wrong.verified);

        // Checked against someone else's commitments it fails
        let (impostor, _) = &g[2];
        let forged = verify_partial_key_backup("g2", &backup, &impostor.share(), recipient_aux);
        assert!(!forged.verified);
    }

    #[test]
    fn challenges_are_verifiable_by_third_parties() {
        let g = guardians(3, 2);
        let (owner, _) = &g[0];
        let (_, recipient_aux) = &g[1];

        let backup = generate_partial_key_backup(owner, &recipient_aux.share()).unwrap();
        let challenge = generate_partial_key_challenge(&backup, &owner.polynomial);
        assert!(verify_partial_key_challenge("mediator", &challenge).verified);

        let mut bad = challenge;
        bad.value = bad.value + GroupScalar::one();
        assert!(!verify_partial_key_challenge("mediator", &bad).verified);
    }

    #[test]
    fn shares_interpolate_to_joint_secret() {
        // With quorum 1 every polynomial is constant and the joint secret is the sum
        let g = guardians(3, 1);
        let public: Vec<_> = g.iter().map(|(k, _)| k.share()).collect();
        let joint = combine_public_keys(&public);
        let secret = g
            .iter()
            .fold(GroupScalar::zero(), |acc, (k, _)| acc + k.key_pair.secret_key);
        assert_eq!(joint, GroupElement::from_exponent(&secret));
    }

    #[test]
    fn commitment_hash_depends_on_order() {
        let g = guardians(2, 2);
        let mut public: Vec<_> = g.iter().map(|(k, _)| k.share()).collect();
        let h1 = hash_commitments(&public);
        assert_eq!(h1, hash_commitments(&public));
        public.reverse();
        assert_ne!(h1, hash_commitments(&public));
    }
}
