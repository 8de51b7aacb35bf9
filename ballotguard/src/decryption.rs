use crate::*;
use indexmap::IndexMap;
use rand::{CryptoRng, RngCore};

/// One guardian's partial decryption of one selection, with its proof
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SelectionShare {
    pub selection_id: String,
    pub share: GroupElement,
    pub proof: ChaumPedersenProof,
}

impl SelectionShare {
    /// Check the proof against the selection's ciphertext, the guardian's
    /// election public key and the election's extended base hash
    pub fn is_valid(
        &self,
        ciphertext: &ElGamalCiphertext,
        public_key: &GroupElement,
        extended_base_hash: &GroupScalar,
    ) -> bool {
        self.proof
            .verify(ciphertext, public_key, &self.share, extended_base_hash)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ContestShare {
    pub contest_id: String,
    pub selections: IndexMap<String, SelectionShare>,
}

type Selections = IndexMap<String, ElGamalCiphertext>;
type ContestShares = IndexMap<String, ContestShare>;

fn find_selection<'a>(
    contests: &'a ContestShares,
    contest_id: &str,
    selection_id: &str,
) -> Option<&'a SelectionShare> {
    contests
        .get(contest_id)
        .and_then(|c| c.selections.get(selection_id))
}

// Partially decrypt every selection and prove each one
fn share_contests<'a, I, R>(
    contests: I,
    secret: &GroupScalar,
    extended_base_hash: &GroupScalar,
    rng: &mut R,
) -> ContestShares
where
    I: Iterator<Item = (&'a String, &'a Selections)>,
    R: RngCore + CryptoRng,
{
    contests
        .map(|(contest_id, selections)| {
            let selections = selections
                .iter()
                .map(|(selection_id, ciphertext)| {
                    let share = ciphertext.partial_decrypt(secret);
                    let proof =
                        ChaumPedersenProof::prove(ciphertext, secret, &share, extended_base_hash, rng);
                    let selection = SelectionShare {
                        selection_id: selection_id.clone(),
                        share,
                        proof,
                    };
                    (selection_id.clone(), selection)
                })
                .collect();
            let contest = ContestShare {
                contest_id: contest_id.clone(),
                selections,
            };
            (contest_id.clone(), contest)
        })
        .collect()
}

// The first missing or invalid selection rejects the whole share
fn validate_contests<'a, I>(
    shares: &ContestShares,
    contests: I,
    public_key: &GroupElement,
    extended_base_hash: &GroupScalar,
) -> Result<(), Error>
where
    I: Iterator<Item = (&'a String, &'a Selections)>,
{
    for (contest_id, selections) in contests {
        for (selection_id, ciphertext) in selections {
            let valid = find_selection(shares, contest_id, selection_id)
                .map(|s| s.is_valid(ciphertext, public_key, extended_base_hash))
                .unwrap_or(false);
            if !valid {
                return Err(Error::InvalidShare {
                    contest_id: contest_id.clone(),
                    selection_id: selection_id.clone(),
                });
            }
        }
    }
    Ok(())
}

// Combine one share per guardian into counts of at most `max`
fn combine_contests<'a, I>(
    contests: I,
    shares: &[(&GuardianId, &ContestShares)],
    max: u64,
) -> Result<IndexMap<String, PlaintextTallyContest>, CryptoError>
where
    I: Iterator<Item = (&'a String, &'a Selections)>,
{
    if shares.is_empty() {
        return Err(CryptoError::NoShares);
    }

    let mut plaintext = IndexMap::new();
    for (contest_id, selections) in contests {
        let mut counts = IndexMap::new();
        for (selection_id, ciphertext) in selections {
            let mut product = GroupElement::identity();
            for (guardian_id, contest_shares) in shares {
                let selection = find_selection(contest_shares, contest_id, selection_id)
                    .ok_or_else(|| CryptoError::MissingShare {
                        guardian_id: (*guardian_id).clone(),
                        contest_id: contest_id.clone(),
                        selection_id: selection_id.clone(),
                    })?;
                product = product + selection.share;
            }

            let count = ciphertext
                .decrypt_with_product(&product, max)
                .ok_or_else(|| CryptoError::DiscreteLogOutOfRange(selection_id.clone(), max))?;
            counts.insert(
                selection_id.clone(),
                PlaintextTallySelection {
                    selection_id: selection_id.clone(),
                    tally: count,
                },
            );
        }
        plaintext.insert(
            contest_id.clone(),
            PlaintextTallyContest {
                contest_id: contest_id.clone(),
                selections: counts,
            },
        );
    }
    Ok(plaintext)
}

fn tally_contests<'a>(tally: &'a CiphertextTally) -> impl Iterator<Item = (&'a String, &'a Selections)> {
    tally.contests.iter().map(|(id, contest)| (id, &contest.selections))
}

/// A guardian's partial decryption of a whole tally
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DecryptionShare {
    pub election_id: String,
    pub tally_name: String,
    pub guardian_id: GuardianId,
    pub contests: IndexMap<String, ContestShare>,
}

impl DecryptionShare {
    /// Validate every selection of `tally`; the first missing or invalid one
    /// rejects the whole share
    pub fn validate(
        &self,
        tally: &CiphertextTally,
        public_key: &GroupElement,
        extended_base_hash: &GroupScalar,
    ) -> Result<(), Error> {
        validate_contests(&self.contests, tally_contests(tally), public_key, extended_base_hash)
    }
}

impl Record for DecryptionShare {
    const COLLECTION: Collection = Collection::DecryptionShare;

    fn key(&self) -> String {
        compound_key(&[&self.election_id, &self.tally_name, &self.guardian_id])
    }
}

/// Compute a guardian's decryption share for a tally
pub fn compute_decryption_share<R: RngCore + CryptoRng>(
    key_pair: &ElectionKeyPair,
    tally: &CiphertextTally,
    context: &ElectionContext,
    rng: &mut R,
) -> DecryptionShare {
    DecryptionShare {
        election_id: tally.election_id.clone(),
        tally_name: tally.tally_name.clone(),
        guardian_id: key_pair.owner_id.clone(),
        contests: share_contests(
            tally_contests(tally),
            &key_pair.key_pair.secret_key,
            &context.crypto_extended_base_hash,
            rng,
        ),
    }
}

/// Combine every guardian's share into plaintext counts.
///
/// Counts are bounded by the number of cast ballots folded into the tally.
pub fn decrypt_tally(
    tally: &CiphertextTally,
    shares: &[DecryptionShare],
) -> Result<IndexMap<String, PlaintextTallyContest>, CryptoError> {
    let shares: Vec<_> = shares.iter().map(|s| (&s.guardian_id, &s.contests)).collect();
    combine_contests(
        tally_contests(tally),
        &shares,
        tally.cast_ballot_ids.len() as u64,
    )
}

/// A guardian's partial decryption of one spoiled ballot
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BallotDecryptionShare {
    pub election_id: String,
    pub ballot_id: String,
    pub guardian_id: GuardianId,
    pub contests: IndexMap<String, ContestShare>,
}

impl BallotDecryptionShare {
    pub fn validate(
        &self,
        ballot: &SubmittedBallot,
        public_key: &GroupElement,
        extended_base_hash: &GroupScalar,
    ) -> Result<(), Error> {
        validate_contests(&self.contests, ballot.contests.iter(), public_key, extended_base_hash)
    }
}

impl Record for BallotDecryptionShare {
    const COLLECTION: Collection = Collection::BallotDecryptionShare;

    fn key(&self) -> String {
        compound_key(&[&self.election_id, &self.ballot_id, &self.guardian_id])
    }
}

/// The selections of a decrypted spoiled ballot
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlaintextBallot {
    pub election_id: String,
    pub ballot_id: String,
    pub contests: IndexMap<String, PlaintextTallyContest>,
}

/// Only spoiled ballots are ever decrypted one by one
pub fn require_spoiled(ballot: &SubmittedBallot) -> Result<(), Error> {
    match ballot.state {
        BallotBoxState::Spoiled => Ok(()),
        BallotBoxState::Cast => Err(Error::InvalidArgument(format!(
            "Ballot {} must be spoiled",
            ballot.ballot_id
        ))),
    }
}

/// Compute a guardian's decryption share for a spoiled ballot.
/// Cast ballots are only ever decrypted as part of a tally.
pub fn compute_ballot_decryption_share<R: RngCore + CryptoRng>(
    key_pair: &ElectionKeyPair,
    ballot: &SubmittedBallot,
    context: &ElectionContext,
    rng: &mut R,
) -> Result<BallotDecryptionShare, Error> {
    require_spoiled(ballot)?;
    Ok(BallotDecryptionShare {
        election_id: ballot.election_id.clone(),
        ballot_id: ballot.ballot_id.clone(),
        guardian_id: key_pair.owner_id.clone(),
        contests: share_contests(
            ballot.contests.iter(),
            &key_pair.key_pair.secret_key,
            &context.crypto_extended_base_hash,
            rng,
        ),
    })
}

/// Combine every guardian's share of a ballot into its selections
pub fn decrypt_ballot(
    ballot: &SubmittedBallot,
    shares: &[BallotDecryptionShare],
) -> Result<PlaintextBallot, CryptoError> {
    let shares: Vec<_> = shares.iter().map(|s| (&s.guardian_id, &s.contests)).collect();
    let contests = combine_contests(ballot.contests.iter(), &shares, 1)?;
    Ok(PlaintextBallot {
        election_id: ballot.election_id.clone(),
        ballot_id: ballot.ballot_id.clone(),
        contests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    struct Fixture {
        keys: Vec<ElectionKeyPair>,
        context: ElectionContext,
        tally: CiphertextTally,
    }

    // Three guardians, two cast ballots for "yes"
    fn fixture() -> Fixture {
        let keys: Vec<_> = (1..=3u64)
            .map(|i| generate_election_key_pair(&format!("g{}", i), i, 2, None).unwrap())
            .collect();
        let public: Vec<_> = keys.iter().map(|k| k.share()).collect();
        let manifest = Manifest {
            election_scope_id: "scope".into(),
            contests: vec![ContestDescription {
                contest_id: "question".into(),
                selection_ids: vec!["yes".into(), "no".into()],
            }],
        };
        let context = ElectionContext::new(
            3,
            2,
            combine_public_keys(&public),
            hash_commitments(&public),
            &manifest,
        );

        let mut tally = CiphertextTally::new("e1", "t1", &manifest);
        for ballot_id in &["b1", "b2"] {
            let mut choices = IndexMap::new();
            choices.insert("question".to_string(), "yes".to_string());
            let ballot = encrypt_ballot(ballot_id, &manifest, &context, &choices, &mut OsRng).unwrap();
            tally
                .fold(&SubmittedBallot {
                    election_id: "e1".into(),
                    ballot_id: ballot.ballot_id,
                    state: BallotBoxState::Cast,
                    contests: ballot.contests,
                    submitted_at: chrono::Utc::now(),
                })
                .unwrap();
        }

        Fixture {
            keys,
            context,
            tally,
        }
    }

    #[test]
    fn shares_validate_and_combine() {
        let f = fixture();
        let shares: Vec<_> = f
            .keys
            .iter()
            .map(|k| compute_decryption_share(k, &f.tally, &f.context, &mut OsRng))
            .collect();

        for (share, key) in shares.iter().zip(f.keys.iter()) {
            share
                .validate(&f.tally, &key.key_pair.public_key, &f.context.crypto_extended_base_hash)
                .unwrap();
        }

        let result = decrypt_tally(&f.tally, &shares).unwrap();
        let question = &result["question"];
        assert_eq!(question.selections["yes"].tally, 2);
        assert_eq!(question.selections["no"].tally, 0);
    }

    #[test]
    fn share_checked_against_wrong_key_names_the_selection() {
        let f = fixture();
        let share = compute_decryption_share(&f.keys[0], &f.tally, &f.context, &mut OsRng);
        let err = share
            .validate(
                &f.tally,
                &f.keys[1].key_pair.public_key,
                &f.context.crypto_extended_base_hash,
            )
            .unwrap_err();
        match err {
            Error::InvalidShare {
                contest_id,
                selection_id,
            } => {
                assert_eq!(contest_id, "question");
                assert_eq!(selection_id, "yes");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn incomplete_share_is_invalid() {
        let f = fixture();
        let mut share = compute_decryption_share(&f.keys[0], &f.tally, &f.context, &mut OsRng);
        share.contests["question"].selections.shift_remove("no");
        let err = share
            .validate(
                &f.tally,
                &f.keys[0].key_pair.public_key,
                &f.context.crypto_extended_base_hash,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidShare { ref selection_id, .. } if selection_id == "no"));
    }

    #[test]
    fn missing_guardian_share_cannot_decrypt() {
        let f = fixture();
        let shares: Vec<_> = f.keys[..2]
            .iter()
            .map(|k| compute_decryption_share(k, &f.tally, &f.context, &mut OsRng))
            .collect();
        // Two of three guardians leave the third key's mask on every count
        assert!(decrypt_tally(&f.tally, &shares).is_err());
        assert!(matches!(decrypt_tally(&f.tally, &[]), Err(CryptoError::NoShares)));
    }

    fn spoiled(f: &Fixture, ballot_id: &str, choice: &str) -> SubmittedBallot {
        let manifest = Manifest {
            election_scope_id: "scope".into(),
            contests: vec![ContestDescription {
                contest_id: "question".into(),
                selection_ids: vec!["yes".into(), "no".into()],
            }],
        };
        let mut choices = IndexMap::new();
        choices.insert("question".to_string(), choice.to_string());
        let ballot = encrypt_ballot(ballot_id, &manifest, &f.context, &choices, &mut OsRng).unwrap();
        SubmittedBallot {
            election_id: "e1".into(),
            ballot_id: ballot.ballot_id,
            state: BallotBoxState::Spoiled,
            contests: ballot.contests,
            submitted_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn spoiled_ballot_decrypts_with_every_share() {
        let f = fixture();
        let ballot = spoiled(&f, "s1", "no");
        let shares: Vec<_> = f
            .keys
            .iter()
            .map(|k| compute_ballot_decryption_share(k, &ballot, &f.context, &mut OsRng).unwrap())
            .collect();
        for (share, key) in shares.iter().zip(f.keys.iter()) {
            share
                .validate(&ballot, &key.key_pair.public_key, &f.context.crypto_extended_base_hash)
                .unwrap();
        }

        let plaintext = decrypt_ballot(&ballot, &shares).unwrap();
        assert_eq!(plaintext.ballot_id, "s1");
        let question = &plaintext.contests["question"];
        assert_eq!(question.selections["yes"].tally, 0);
        assert_eq!(question.selections["no"].tally, 1);
    }

    #[test]
    fn ballot_share_is_bound_to_its_ballot() {
        let f = fixture();
        let first = spoiled(&f, "s1", "yes");
        let second = spoiled(&f, "s2", "yes");
        let share = compute_ballot_decryption_share(&f.keys[0], &first, &f.context, &mut OsRng).unwrap();
        let err = share
            .validate(
                &second,
                &f.keys[0].key_pair.public_key,
                &f.context.crypto_extended_base_hash,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidShare { .. }));
    }

    #[test]
    fn cast_ballots_are_not_decrypted_one_by_one() {
        let f = fixture();
        let mut ballot = spoiled(&f, "c1", "yes");
        ballot.state = BallotBoxState::Cast;
        let err = compute_ballot_decryption_share(&f.keys[0], &ballot, &f.context, &mut OsRng).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(ref msg) if msg == "Ballot c1 must be spoiled"));
    }
}
