use crate::*;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeSet;
use std::fmt;

/// Encrypted selections keyed by contest id, then selection id
pub type BallotContests = IndexMap<String, IndexMap<String, ElGamalCiphertext>>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BallotBoxState {
    Cast,
    Spoiled,
}

impl fmt::Display for BallotBoxState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BallotBoxState::Cast => f.write_str("cast"),
            BallotBoxState::Spoiled => f.write_str("spoiled"),
        }
    }
}

/// An encrypted ballot as produced by a voting device
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CiphertextBallot {
    pub ballot_id: String,
    pub contests: BallotContests,
}

impl CiphertextBallot {
    /// Every contest and selection must exist in the manifest
    pub fn validate(&self, manifest: &Manifest) -> Result<(), Error> {
        if self.ballot_id.is_empty() {
            return Err(Error::InvalidArgument("ballot id is empty".into()));
        }
        for (contest_id, selections) in &self.contests {
            let contest = manifest.contest(contest_id).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "ballot {} has unknown contest {}",
                    self.ballot_id, contest_id
                ))
            })?;
            if let Some(selection_id) = selections
                .keys()
                .find(|id| !contest.selection_ids.contains(id))
            {
                return Err(Error::InvalidArgument(format!(
                    "ballot {} has unknown selection {} in contest {}",
                    self.ballot_id, selection_id, contest_id
                )));
            }
        }
        Ok(())
    }
}

/// A ballot accepted into an election's ballot box
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SubmittedBallot {
    pub election_id: String,
    pub ballot_id: String,
    pub state: BallotBoxState,
    pub contests: BallotContests,
    pub submitted_at: DateTime<Utc>,
}

impl Record for SubmittedBallot {
    const COLLECTION: Collection = Collection::SubmittedBallot;

    fn key(&self) -> String {
        compound_key(&[&self.election_id, &self.ballot_id])
    }
}

/// The ids of every ballot an election has received
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BallotInventory {
    pub election_id: String,
    pub cast_ballot_ids: BTreeSet<String>,
    pub spoiled_ballot_ids: BTreeSet<String>,
}

impl BallotInventory {
    pub fn new(election_id: &str) -> Self {
        BallotInventory {
            election_id: election_id.to_owned(),
            cast_ballot_ids: BTreeSet::new(),
            spoiled_ballot_ids: BTreeSet::new(),
        }
    }

    pub fn contains(&self, ballot_id: &str) -> bool {
        self.cast_ballot_ids.contains(ballot_id) || self.spoiled_ballot_ids.contains(ballot_id)
    }

    pub fn record(&mut self, ballot_id: &str, state: BallotBoxState) {
        match state {
            BallotBoxState::Cast => self.cast_ballot_ids.insert(ballot_id.to_owned()),
            BallotBoxState::Spoiled => self.spoiled_ballot_ids.insert(ballot_id.to_owned()),
        };
    }

    pub fn cast_count(&self) -> usize {
        self.cast_ballot_ids.len()
    }

    pub fn spoiled_count(&self) -> usize {
        self.spoiled_ballot_ids.len()
    }
}

impl Record for BallotInventory {
    const COLLECTION: Collection = Collection::BallotInventory;

    fn key(&self) -> String {
        self.election_id.clone()
    }
}

/// Encrypt a single 0/1 selection under the joint key
pub fn encrypt_selection<R: RngCore + CryptoRng>(
    selected: bool,
    context: &ElectionContext,
    rng: &mut R,
) -> ElGamalCiphertext {
    ElGamalCiphertext::encrypt(selected as u64, &context.elgamal_public_key, rng)
}

/// Encrypt a plaintext ballot. `choices` maps contest id to the chosen
/// selection id; every selection of every manifest contest is encrypted.
pub fn encrypt_ballot<R: RngCore + CryptoRng>(
    ballot_id: &str,
    manifest: &Manifest,
    context: &ElectionContext,
    choices: &IndexMap<String, String>,
    rng: &mut R,
) -> Result<CiphertextBallot, Error> {
    for (contest_id, selection_id) in choices {
        let known = manifest
            .contest(contest_id)
            .map(|c| c.selection_ids.contains(selection_id))
            .unwrap_or(false);
        if !known {
            return Err(Error::InvalidArgument(format!(
                "unknown choice {} in contest {}",
                selection_id, contest_id
            )));
        }
    }

    let mut contests = BallotContests::new();
    for contest in &manifest.contests {
        let chosen = choices.get(&contest.contest_id);
        let selections = contest
            .selection_ids
            .iter()
            .map(|selection_id| {
                let selected = chosen == Some(selection_id);
                (selection_id.clone(), encrypt_selection(selected, context, rng))
            })
            .collect();
        contests.insert(contest.contest_id.clone(), selections);
    }

    Ok(CiphertextBallot {
        ballot_id: ballot_id.to_owned(),
        contests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn manifest() -> Manifest {
        Manifest {
            election_scope_id: "scope".into(),
            contests: vec![ContestDescription {
                contest_id: "mayor".into(),
                selection_ids: vec!["alice".into(), "bob".into()],
            }],
        }
    }

    fn context(keys: &ElGamalKeyPair) -> ElectionContext {
        ElectionContext::new(1, 1, keys.public_key, GroupScalar::one(), &manifest())
    }

    #[test]
    fn encrypts_every_selection() {
        let keys = ElGamalKeyPair::from_secret(GroupScalar::random(&mut OsRng));
        let mut choices = IndexMap::new();
        choices.insert("mayor".to_string(), "bob".to_string());

        let ballot = encrypt_ballot("b1", &manifest(), &context(&keys), &choices, &mut OsRng).unwrap();
        let mayor = &ballot.contests["mayor"];
        assert_eq!(mayor.len(), 2);

        let decrypt = |c: &ElGamalCiphertext| {
            c.decrypt_with_product(&c.partial_decrypt(&keys.secret_key), 1)
        };
        assert_eq!(decrypt(&mayor["alice"]), Some(0));
        assert_eq!(decrypt(&mayor["bob"]), Some(1));
        assert!(ballot.validate(&manifest()).is_ok());
    }

    #[test]
    fn unknown_choices_are_rejected() {
        let keys = ElGamalKeyPair::from_secret(GroupScalar::random(&mut OsRng));
        let mut choices = IndexMap::new();
        choices.insert("mayor".to_string(), "carol".to_string());
        let err = encrypt_ballot("b1", &manifest(), &context(&keys), &choices, &mut OsRng).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn foreign_contests_fail_validation() {
        let mut contests = BallotContests::new();
        contests.insert("dogcatcher".into(), IndexMap::new());
        let ballot = CiphertextBallot {
            ballot_id: "b1".into(),
            contests,
        };
        assert!(matches!(
            ballot.validate(&manifest()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn inventory_tracks_both_boxes() {
        let mut inventory = BallotInventory::new("e1");
        inventory.record("b1", BallotBoxState::Cast);
        inventory.record("b2", BallotBoxState::Spoiled);
        assert!(inventory.contains("b1") && inventory.contains("b2"));
        assert_eq!((inventory.cast_count(), inventory.spoiled_count()), (1, 1));
    }
}
