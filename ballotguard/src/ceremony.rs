use crate::*;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Verifier id recorded on challenge verifications performed by the coordinator
pub const MEDIATOR_VERIFIER_ID: &str = "mediator";

/// Lifecycle of a key ceremony.
///
/// `Open` is the only state in which guardians may submit anything.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyCeremonyState {
    Created,
    Open,
    Closed,
    Challenged,
    Cancelled,
}

impl KeyCeremonyState {
    pub fn accepts_submissions(&self) -> bool {
        match self {
            KeyCeremonyState::Open => true,
            KeyCeremonyState::Created
            | KeyCeremonyState::Closed
            | KeyCeremonyState::Challenged
            | KeyCeremonyState::Cancelled => false,
        }
    }
}

impl fmt::Display for KeyCeremonyState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            KeyCeremonyState::Created => "CREATED",
            KeyCeremonyState::Open => "OPEN",
            KeyCeremonyState::Closed => "CLOSED",
            KeyCeremonyState::Challenged => "CHALLENGED",
            KeyCeremonyState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Administrative transitions. They apply from any state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CeremonyTransition {
    Open,
    Close,
    Challenge,
    Cancel,
}

impl CeremonyTransition {
    pub fn target(&self) -> KeyCeremonyState {
        match self {
            CeremonyTransition::Open => KeyCeremonyState::Open,
            CeremonyTransition::Close => KeyCeremonyState::Closed,
            CeremonyTransition::Challenge => KeyCeremonyState::Challenged,
            CeremonyTransition::Cancel => KeyCeremonyState::Cancelled,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardianStatus {
    Incomplete,
    Complete,
    Error,
}

/// Per-guardian progress through the rounds of a ceremony
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardianRoundStatus {
    pub public_key_shared: GuardianStatus,
    pub backups_shared: GuardianStatus,
    pub backups_verified: GuardianStatus,
}

impl Default for GuardianRoundStatus {
    fn default() -> Self {
        GuardianRoundStatus {
            public_key_shared: GuardianStatus::Incomplete,
            backups_shared: GuardianStatus::Incomplete,
            backups_verified: GuardianStatus::Incomplete,
        }
    }
}

impl GuardianRoundStatus {
    pub fn is_complete(&self) -> bool {
        self.public_key_shared == GuardianStatus::Complete
            && self.backups_shared == GuardianStatus::Complete
            && self.backups_verified == GuardianStatus::Complete
    }
}

/// The published result of a ceremony
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ElectionJointKey {
    pub joint_public_key: GroupElement,
    pub commitment_hash: GroupScalar,
}

/// One key ceremony. `guardian_status` always has exactly the keys of `guardian_ids`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KeyCeremony {
    pub key_name: String,
    pub state: KeyCeremonyState,
    pub number_of_guardians: usize,
    pub quorum: usize,
    pub guardian_ids: Vec<GuardianId>,
    pub guardian_status: IndexMap<GuardianId, GuardianRoundStatus>,
    pub elgamal_public_key: Option<GroupElement>,
    pub commitment_hash: Option<GroupScalar>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KeyCeremony {
    pub fn has_guardian(&self, guardian_id: &str) -> bool {
        self.guardian_status.contains_key(guardian_id)
    }

    pub fn joint_key(&self) -> Option<ElectionJointKey> {
        match (self.elgamal_public_key, self.commitment_hash) {
            (Some(joint_public_key), Some(commitment_hash)) => Some(ElectionJointKey {
                joint_public_key,
                commitment_hash,
            }),
            _ => None,
        }
    }

    /// Guardians that still block publication, in ceremony order
    pub fn incomplete_guardians(&self) -> Vec<&str> {
        self.guardian_status
            .iter()
            .filter(|(_, status)| !status.is_complete())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    fn status_mut(&mut self, guardian_id: &str) -> Result<&mut GuardianRoundStatus, Error> {
        let key_name = &self.key_name;
        self.guardian_status.get_mut(guardian_id).ok_or_else(|| {
            Error::Forbidden(format!("{} is not a guardian of {}", guardian_id, key_name))
        })
    }
}

impl Record for KeyCeremony {
    const COLLECTION: Collection = Collection::KeyCeremony;

    fn key(&self) -> String {
        self.key_name.clone()
    }
}

/// The state and guardian status of a ceremony without its key material
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KeyCeremonyStateSummary {
    pub key_name: String,
    pub state: KeyCeremonyState,
    pub guardian_status: IndexMap<GuardianId, GuardianRoundStatus>,
}

/// Everything one guardian has submitted to a ceremony
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KeyCeremonyGuardian {
    pub key_name: String,
    pub guardian_id: GuardianId,
    pub sequence_order: u64,
    pub number_of_guardians: usize,
    pub quorum: usize,
    pub public_keys: Option<PublicKeySet>,
    pub backups: Vec<ElectionPartialKeyBackup>,
    pub verifications: Vec<ElectionPartialKeyVerification>,
    pub challenges: Vec<ElectionPartialKeyChallenge>,
}

impl Record for KeyCeremonyGuardian {
    const COLLECTION: Collection = Collection::KeyGuardian;

    fn key(&self) -> String {
        compound_key(&[&self.key_name, &self.guardian_id])
    }
}

/// Drives the key ceremony state machine and its round gates
#[derive(Clone)]
pub struct KeyCeremonyCoordinator {
    ceremonies: CeremonyStore,
    guardians: GuardianStatusStore,
}

impl KeyCeremonyCoordinator {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        KeyCeremonyCoordinator {
            ceremonies: TypedStore::new(repo.clone()),
            guardians: TypedStore::new(repo),
        }
    }

    /// Create a ceremony in state `Created` and one empty record per guardian.
    ///
    /// Guardian sequence orders follow the order of `guardian_ids`, starting at 1.
    pub fn create_ceremony(
        &self,
        tenant: &Tenant,
        key_name: &str,
        number_of_guardians: usize,
        quorum: usize,
        guardian_ids: Vec<GuardianId>,
    ) -> Result<KeyCeremony, Error> {
        if key_name.is_empty() {
            return Err(Error::InvalidArgument("key name is empty".into()));
        }
        if quorum < 1 || quorum > number_of_guardians {
            return Err(Error::InvalidArgument(format!(
                "quorum {} must be between 1 and {}",
                quorum, number_of_guardians
            )));
        }
        let distinct: BTreeSet<&GuardianId> = guardian_ids.iter().collect();
        if guardian_ids.len() != number_of_guardians
            || distinct.len() != guardian_ids.len()
            || guardian_ids.iter().any(|id| id.is_empty())
        {
            return Err(Error::InvalidArgument(format!(
                "expected {} distinct guardian ids, got {:?}",
                number_of_guardians, guardian_ids
            )));
        }

        let now = Utc::now();
        let ceremony = KeyCeremony {
            key_name: key_name.to_owned(),
            state: KeyCeremonyState::Created,
            number_of_guardians,
            quorum,
            guardian_status: guardian_ids
                .iter()
                .map(|id| (id.clone(), GuardianRoundStatus::default()))
                .collect(),
            guardian_ids,
            elgamal_public_key: None,
            commitment_hash: None,
            created_at: now,
            updated_at: now,
        };

        // A CREATED ceremony rejects submissions, so the guardian records may
        // follow the ceremony itself
        self.ceremonies.create(tenant, &ceremony)?;
        for (i, guardian_id) in ceremony.guardian_ids.iter().enumerate() {
            let guardian = KeyCeremonyGuardian {
                key_name: key_name.to_owned(),
                guardian_id: guardian_id.clone(),
                sequence_order: i as u64 + 1,
                number_of_guardians,
                quorum,
                public_keys: None,
                backups: vec![],
                verifications: vec![],
                challenges: vec![],
            };
            self.guardians.put(tenant, &guardian)?;
        }

        log::info!(
            "{}: created key ceremony {} ({} of {} guardians)",
            tenant,
            key_name,
            quorum,
            number_of_guardians
        );
        Ok(ceremony)
    }

    pub fn open_ceremony(&self, tenant: &Tenant, key_name: &str) -> Result<KeyCeremony, Error> {
        self.transition(tenant, key_name, CeremonyTransition::Open)
    }

    pub fn close_ceremony(&self, tenant: &Tenant, key_name: &str) -> Result<KeyCeremony, Error> {
        self.transition(tenant, key_name, CeremonyTransition::Close)
    }

    pub fn challenge_ceremony(&self, tenant: &Tenant, key_name: &str) -> Result<KeyCeremony, Error> {
        self.transition(tenant, key_name, CeremonyTransition::Challenge)
    }

    pub fn cancel_ceremony(&self, tenant: &Tenant, key_name: &str) -> Result<KeyCeremony, Error> {
        self.transition(tenant, key_name, CeremonyTransition::Cancel)
    }

    /// Apply an administrative transition. Re-applying one is a no-op.
    pub fn transition(
        &self,
        tenant: &Tenant,
        key_name: &str,
        transition: CeremonyTransition,
    ) -> Result<KeyCeremony, Error> {
        let target = transition.target();
        let mut previous = None;
        let ceremony = self.ceremonies.modify(tenant, key_name, |ceremony| {
            previous = Some(ceremony.state);
            if ceremony.state != target {
                ceremony.state = target;
                ceremony.updated_at = Utc::now();
            }
            Ok(())
        })?;

        match previous {
            Some(previous) if previous != target => {
                log::info!("{}: key ceremony {} {} -> {}", tenant, key_name, previous, target)
            }
            _ => log::debug!("{}: key ceremony {} already {}", tenant, key_name, target),
        }
        Ok(ceremony)
    }

    /// Round 1: record a guardian's public key set
    pub fn announce_public_keys(
        &self,
        tenant: &Tenant,
        key_name: &str,
        guardian_id: &str,
        public_keys: PublicKeySet,
    ) -> Result<KeyCeremonyGuardian, Error> {
        let guardian = self.participation_gate(tenant, key_name, guardian_id)?;

        if public_keys.owner_id() != guardian_id
            || public_keys.sequence_order() != guardian.sequence_order
            || !public_keys.validate()
        {
            log::warn!(
                "{}: key ceremony {} rejected public keys from {}",
                tenant,
                key_name,
                guardian_id
            );
            return Err(Error::InvalidPublicKeys(guardian_id.to_owned()));
        }

        self.submit(
            tenant,
            key_name,
            guardian_id,
            "announced public keys",
            |guardian| guardian.public_keys = Some(public_keys.clone()),
            |status| status.public_key_shared = GuardianStatus::Complete,
        )
    }

    /// Round 2: record the backups a guardian produced for the others
    pub fn share_backups(
        &self,
        tenant: &Tenant,
        key_name: &str,
        guardian_id: &str,
        backups: Vec<ElectionPartialKeyBackup>,
    ) -> Result<KeyCeremonyGuardian, Error> {
        self.participation_gate(tenant, key_name, guardian_id)?;
        if let Some(foreign) = backups.iter().find(|b| b.owner_id != guardian_id) {
            return Err(Error::InvalidBackup {
                owner_id: foreign.owner_id.clone(),
                reason: format!("submitted by {}", guardian_id),
            });
        }

        self.submit(
            tenant,
            key_name,
            guardian_id,
            "shared backups",
            |guardian| guardian.backups = backups.clone(),
            |status| status.backups_shared = GuardianStatus::Complete,
        )
    }

    /// Round 3: record the outcome of checking the backups a guardian received.
    ///
    /// The guardian is verified only if every verification in the batch succeeded.
    pub fn submit_verifications(
        &self,
        tenant: &Tenant,
        key_name: &str,
        guardian_id: &str,
        verifications: Vec<ElectionPartialKeyVerification>,
    ) -> Result<KeyCeremonyGuardian, Error> {
        self.participation_gate(tenant, key_name, guardian_id)?;

        let outcome = if verifications.iter().all(|v| v.verified) {
            GuardianStatus::Complete
        } else {
            GuardianStatus::Error
        };
        if outcome == GuardianStatus::Error {
            for v in verifications.iter().filter(|v| !v.verified) {
                log::warn!(
                    "{}: key ceremony {}: {} failed to verify backup from {}",
                    tenant,
                    key_name,
                    v.verifier_id,
                    v.owner_id
                );
            }
        }

        self.submit(
            tenant,
            key_name,
            guardian_id,
            "submitted verifications",
            |guardian| guardian.verifications = verifications.clone(),
            |status| status.backups_verified = outcome,
        )
    }

    /// Record challenges; the guardian's verification round becomes disputed
    pub fn submit_challenges(
        &self,
        tenant: &Tenant,
        key_name: &str,
        guardian_id: &str,
        challenges: Vec<ElectionPartialKeyChallenge>,
    ) -> Result<KeyCeremonyGuardian, Error> {
        self.participation_gate(tenant, key_name, guardian_id)?;

        self.submit(
            tenant,
            key_name,
            guardian_id,
            "submitted challenges",
            |guardian| guardian.challenges = challenges.clone(),
            |status| status.backups_verified = GuardianStatus::Error,
        )
    }

    /// Check that the ceremony accepts submissions from `guardian_id`
    fn participation_gate(
        &self,
        tenant: &Tenant,
        key_name: &str,
        guardian_id: &str,
    ) -> Result<KeyCeremonyGuardian, Error> {
        let ceremony = self.ceremonies.require(tenant, key_name)?;
        check_participation(&ceremony, guardian_id)?;
        self.guardians
            .require(tenant, &compound_key(&[key_name, guardian_id]))
    }

    // The guardian record is written before the status so that a COMPLETE status
    // always has its material behind it. The gate is checked again right before
    // each write, and the guardian record is put back if the status write is
    // refused.
    fn submit<G, S>(
        &self,
        tenant: &Tenant,
        key_name: &str,
        guardian_id: &str,
        what: &str,
        mut update_guardian: G,
        update_status: S,
    ) -> Result<KeyCeremonyGuardian, Error>
    where
        G: FnMut(&mut KeyCeremonyGuardian),
        S: Fn(&mut GuardianRoundStatus),
    {
        let guardian_key = compound_key(&[key_name, guardian_id]);
        let mut previous = None;
        let guardian = self.guardians.modify(tenant, &guardian_key, |guardian| {
            let ceremony = self.ceremonies.require(tenant, key_name)?;
            check_participation(&ceremony, guardian_id)?;
            previous = Some(guardian.clone());
            update_guardian(guardian);
            Ok(())
        })?;

        let status = self.ceremonies.modify(tenant, key_name, |ceremony| {
            check_participation(ceremony, guardian_id)?;
            let status = ceremony.status_mut(guardian_id)?;
            let before = *status;
            update_status(status);
            if *status != before {
                ceremony.updated_at = Utc::now();
            }
            Ok(())
        });

        if let Err(e) = status {
            if let Some(previous) = previous {
                log::warn!(
                    "{}: key ceremony {}: {} {} refused, reverting: {}",
                    tenant,
                    key_name,
                    guardian_id,
                    what,
                    e
                );
                // Unless somebody has written over it since
                self.guardians.modify(tenant, &guardian_key, |current| {
                    if *current == guardian {
                        *current = previous.clone();
                    }
                    Ok(())
                })?;
            }
            return Err(e);
        }

        log::info!("{}: key ceremony {}: {} {}", tenant, key_name, guardian_id, what);
        Ok(guardian)
    }

    /// Combine the announced keys once every guardian has completed every round.
    ///
    /// Publishing again with unchanged keys returns the same joint key without
    /// writing.
    pub fn publish_joint_key(&self, tenant: &Tenant, key_name: &str) -> Result<ElectionJointKey, Error> {
        let ceremony = self.ceremonies.modify(tenant, key_name, |ceremony| {
            let incomplete = ceremony.incomplete_guardians();
            if !incomplete.is_empty() {
                return Err(Error::PreconditionFailed(format!(
                    "Publish constraint not satisfied for {}",
                    incomplete.join(", ")
                )));
            }

            let public_keys = self.ordered_public_keys(tenant, ceremony)?;
            let joint = ElectionJointKey {
                joint_public_key: combine_public_keys(&public_keys),
                commitment_hash: hash_commitments(&public_keys),
            };

            match ceremony.joint_key() {
                Some(existing) if existing == joint => Ok(()),
                Some(_) => Err(Error::PreconditionFailed(format!(
                    "joint key for {} was already published from different guardian keys",
                    key_name
                ))),
                None => {
                    ceremony.elgamal_public_key = Some(joint.joint_public_key);
                    ceremony.commitment_hash = Some(joint.commitment_hash);
                    ceremony.updated_at = Utc::now();
                    Ok(())
                }
            }
        })?;

        let joint = ceremony
            .joint_key()
            .ok_or_else(|| Error::Internal(format!("joint key for {} missing after publish", key_name)))?;
        log::info!(
            "{}: key ceremony {} published joint key {}",
            tenant,
            key_name,
            joint.joint_public_key
        );
        Ok(joint)
    }

    // Every guardian's election public key, in ceremony order
    fn ordered_public_keys(
        &self,
        tenant: &Tenant,
        ceremony: &KeyCeremony,
    ) -> Result<Vec<ElectionPublicKey>, Error> {
        ceremony
            .guardian_ids
            .iter()
            .map(|guardian_id| {
                let guardian = self
                    .guardians
                    .require(tenant, &compound_key(&[&ceremony.key_name, guardian_id]))?;
                guardian
                    .public_keys
                    .map(|set| set.election)
                    .ok_or_else(|| {
                        log::error!(
                            "{}: key ceremony {}: {} is complete but has no public keys",
                            tenant,
                            ceremony.key_name,
                            guardian_id
                        );
                        Error::Internal(format!("missing public keys for {}", guardian_id))
                    })
            })
            .collect()
    }

    pub fn get_ceremony(&self, tenant: &Tenant, key_name: &str) -> Result<KeyCeremony, Error> {
        self.ceremonies.require(tenant, key_name)
    }

    pub fn get_ceremony_state(
        &self,
        tenant: &Tenant,
        key_name: &str,
    ) -> Result<KeyCeremonyStateSummary, Error> {
        let ceremony = self.ceremonies.require(tenant, key_name)?;
        Ok(KeyCeremonyStateSummary {
            key_name: ceremony.key_name,
            state: ceremony.state,
            guardian_status: ceremony.guardian_status,
        })
    }

    pub fn find_ceremonies(
        &self,
        tenant: &Tenant,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<KeyCeremony>, Error> {
        self.ceremonies.find(tenant, filter, skip, limit)
    }

    pub fn get_joint_key(&self, tenant: &Tenant, key_name: &str) -> Result<ElectionJointKey, Error> {
        self.ceremonies
            .require(tenant, key_name)?
            .joint_key()
            .ok_or_else(|| {
                Error::PreconditionFailed(format!("joint key for {} has not been published", key_name))
            })
    }

    pub fn get_guardian(
        &self,
        tenant: &Tenant,
        key_name: &str,
        guardian_id: &str,
    ) -> Result<KeyCeremonyGuardian, Error> {
        self.guardians
            .require(tenant, &compound_key(&[key_name, guardian_id]))
    }

    pub fn find_guardians(
        &self,
        tenant: &Tenant,
        key_name: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<KeyCeremonyGuardian>, Error> {
        let filter = Filter::new().eq("key_name", key_name);
        self.guardians.find(tenant, &filter, skip, limit)
    }

    /// Re-verify, as a third party, every challenge raised by a guardian whose
    /// verification round is in error. Empty when there is nothing to verify.
    pub fn verify_ceremony_challenges(
        &self,
        tenant: &Tenant,
        key_name: &str,
    ) -> Result<Vec<ElectionPartialKeyVerification>, Error> {
        let ceremony = self.ceremonies.require(tenant, key_name)?;
        let disputed: Vec<&GuardianId> = ceremony
            .guardian_status
            .iter()
            .filter(|(_, status)| status.backups_verified == GuardianStatus::Error)
            .map(|(id, _)| id)
            .collect();

        if disputed.is_empty() {
            log::info!("{}: key ceremony {}: no challenges exist", tenant, key_name);
            return Ok(vec![]);
        }

        let mut verifications = Vec::new();
        for guardian_id in disputed {
            let guardian = self
                .guardians
                .require(tenant, &compound_key(&[key_name, guardian_id]))?;
            for challenge in &guardian.challenges {
                let mut verification =
                    verify_partial_key_challenge(MEDIATOR_VERIFIER_ID, challenge);

                // The revealed polynomial must be the one the owner announced
                if verification.verified {
                    let owner = self
                        .guardians
                        .get(tenant, &compound_key(&[key_name, &challenge.owner_id]))?;
                    let announced = owner
                        .and_then(|o| o.public_keys)
                        .map(|set| set.election.coefficient_commitments);
                    verification.verified =
                        announced.as_ref() == Some(&challenge.coefficient_commitments);
                }

                if !verification.verified {
                    log::warn!(
                        "{}: key ceremony {}: challenge of backup from {} to {} failed",
                        tenant,
                        key_name,
                        challenge.owner_id,
                        challenge.designated_id
                    );
                }
                verifications.push(verification);
            }
        }
        Ok(verifications)
    }
}

fn check_participation(ceremony: &KeyCeremony, guardian_id: &str) -> Result<(), Error> {
    if !ceremony.state.accepts_submissions() {
        return Err(Error::Forbidden(format!(
            "key ceremony {} is {}, not OPEN",
            ceremony.key_name, ceremony.state
        )));
    }
    if !ceremony.has_guardian(guardian_id) {
        return Err(Error::Forbidden(format!(
            "{} is not a guardian of {}",
            guardian_id, ceremony.key_name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coordinator() -> (KeyCeremonyCoordinator, Tenant) {
        (
            KeyCeremonyCoordinator::new(Arc::new(MemRepository::new())),
            Tenant::new("test").unwrap(),
        )
    }

    fn ids(ids: &[&str]) -> Vec<GuardianId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn key_set(guardian_id: &str, sequence_order: u64, quorum: usize) -> PublicKeySet {
        let election = generate_election_key_pair(guardian_id, sequence_order, quorum, None).unwrap();
        let auxiliary = generate_auxiliary_key_pair(guardian_id, sequence_order);
        PublicKeySet {
            election: election.share(),
            auxiliary: auxiliary.share(),
        }
    }

    #[test]
    fn create_rejects_duplicates_and_bad_arguments() {
        let (c, t) = coordinator();
        c.create_ceremony(&t, "k1", 2, 1, ids(&["g1", "g2"])).unwrap();

        let err = c.create_ceremony(&t, "k1", 2, 1, ids(&["g1", "g2"])).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        for (n, k, g) in vec![
            (2, 3, ids(&["g1", "g2"])),
            (2, 0, ids(&["g1", "g2"])),
            (2, 1, ids(&["g1", "g1"])),
            (3, 1, ids(&["g1", "g2"])),
        ] {
            let err = c.create_ceremony(&t, "k2", n, k, g).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
    }

    #[test]
    fn transitions_are_unconditional_and_idempotent() {
        let (c, t) = coordinator();
        assert!(matches!(c.open_ceremony(&t, "nope"), Err(Error::NotFound(_))));

        c.create_ceremony(&t, "k1", 1, 1, ids(&["g1"])).unwrap();
        assert_eq!(c.cancel_ceremony(&t, "k1").unwrap().state, KeyCeremonyState::Cancelled);
        assert_eq!(c.open_ceremony(&t, "k1").unwrap().state, KeyCeremonyState::Open);
        assert_eq!(c.open_ceremony(&t, "k1").unwrap().state, KeyCeremonyState::Open);
        assert_eq!(c.challenge_ceremony(&t, "k1").unwrap().state, KeyCeremonyState::Challenged);
        assert_eq!(c.close_ceremony(&t, "k1").unwrap().state, KeyCeremonyState::Closed);
    }

    #[test]
    fn submissions_outside_open_are_forbidden() {
        let (c, t) = coordinator();
        c.create_ceremony(&t, "k1", 1, 1, ids(&["g1"])).unwrap();

        for transition in &[
            None,
            Some(CeremonyTransition::Close),
            Some(CeremonyTransition::Challenge),
            Some(CeremonyTransition::Cancel),
        ] {
            if let Some(transition) = transition {
                c.transition(&t, "k1", *transition).unwrap();
            }
            assert!(matches!(
                c.announce_public_keys(&t, "k1", "g1", key_set("g1", 1, 1)),
                Err(Error::Forbidden(_))
            ));
            assert!(matches!(c.share_backups(&t, "k1", "g1", vec![]), Err(Error::Forbidden(_))));
            assert!(matches!(
                c.submit_verifications(&t, "k1", "g1", vec![]),
                Err(Error::Forbidden(_))
            ));
            assert!(matches!(c.submit_challenges(&t, "k1", "g1", vec![]), Err(Error::Forbidden(_))));
        }

        // Nothing leaked into the status map
        let ceremony = c.get_ceremony(&t, "k1").unwrap();
        assert_eq!(ceremony.guardian_status["g1"], GuardianRoundStatus::default());
    }

    #[test]
    fn closing_before_the_write_leaves_the_guardian_untouched() {
        let (c, t) = coordinator();
        c.create_ceremony(&t, "k1", 1, 1, ids(&["g1"])).unwrap();
        c.open_ceremony(&t, "k1").unwrap();
        let gate = c.participation_gate(&t, "k1", "g1").unwrap();

        // The ceremony closes after the gate passed but before the write
        c.close_ceremony(&t, "k1").unwrap();
        let set = key_set("g1", 1, 1);
        let err = c
            .submit(
                &t,
                "k1",
                "g1",
                "announced public keys",
                |guardian| guardian.public_keys = Some(set.clone()),
                |status| status.public_key_shared = GuardianStatus::Complete,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        assert_eq!(c.get_guardian(&t, "k1", "g1").unwrap(), gate);
        let status = c.get_ceremony_state(&t, "k1").unwrap().guardian_status["g1"];
        assert_eq!(status, GuardianRoundStatus::default());
    }

    #[test]
    fn invalid_key_sets_are_rejected() {
        let (c, t) = coordinator();
        c.create_ceremony(&t, "k1", 2, 1, ids(&["g1", "g2"])).unwrap();
        c.open_ceremony(&t, "k1").unwrap();

        // Wrong sequence order for g1
        let err = c
            .announce_public_keys(&t, "k1", "g1", key_set("g1", 2, 1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPublicKeys(_)));

        // Keys belonging to somebody else
        let err = c
            .announce_public_keys(&t, "k1", "g1", key_set("g2", 1, 1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPublicKeys(_)));

        let status = c.get_ceremony_state(&t, "k1").unwrap();
        assert_eq!(status.guardian_status["g1"].public_key_shared, GuardianStatus::Incomplete);
    }

    #[test]
    fn failed_verification_marks_error() {
        let (c, t) = coordinator();
        c.create_ceremony(&t, "k1", 2, 1, ids(&["g1", "g2"])).unwrap();
        c.open_ceremony(&t, "k1").unwrap();

        let verification = |verified| ElectionPartialKeyVerification {
            owner_id: "g2".into(),
            designated_id: "g1".into(),
            verifier_id: "g1".into(),
            verified,
        };

        c.submit_verifications(&t, "k1", "g1", vec![verification(true), verification(false)])
            .unwrap();
        let status = c.get_ceremony_state(&t, "k1").unwrap().guardian_status["g1"];
        assert_eq!(status.backups_verified, GuardianStatus::Error);

        c.submit_verifications(&t, "k1", "g1", vec![verification(true)]).unwrap();
        let status = c.get_ceremony_state(&t, "k1").unwrap().guardian_status["g1"];
        assert_eq!(status.backups_verified, GuardianStatus::Complete);

        // A challenge always puts the round back in error
        c.submit_challenges(&t, "k1", "g1", vec![]).unwrap();
        let status = c.get_ceremony_state(&t, "k1").unwrap().guardian_status["g1"];
        assert_eq!(status.backups_verified, GuardianStatus::Error);
    }

    #[test]
    fn backups_from_someone_else_are_invalid() {
        let (c, t) = coordinator();
        c.create_ceremony(&t, "k1", 2, 1, ids(&["g1", "g2"])).unwrap();
        c.open_ceremony(&t, "k1").unwrap();

        let backup = ElectionPartialKeyBackup {
            owner_id: "g2".into(),
            designated_id: "g1".into(),
            designated_sequence_order: 1,
            encrypted_value: vec![],
        };
        let err = c.share_backups(&t, "k1", "g1", vec![backup]).unwrap_err();
        assert!(matches!(err, Error::InvalidBackup { .. }));
    }

    #[test]
    fn publish_names_the_blocking_guardians() {
        let (c, t) = coordinator();
        c.create_ceremony(&t, "k1", 2, 1, ids(&["g1", "g2"])).unwrap();
        c.open_ceremony(&t, "k1").unwrap();
        c.announce_public_keys(&t, "k1", "g1", key_set("g1", 1, 1)).unwrap();

        let err = c.publish_joint_key(&t, "k1").unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));
        assert!(err.to_string().contains("g1, g2"));
        assert!(matches!(c.get_joint_key(&t, "k1"), Err(Error::PreconditionFailed(_))));
    }

    #[test]
    fn single_guardian_ceremony_publishes() {
        let (c, t) = coordinator();
        c.create_ceremony(&t, "solo", 1, 1, ids(&["g1"])).unwrap();
        c.open_ceremony(&t, "solo").unwrap();

        let set = key_set("g1", 1, 1);
        let expected = set.election.key;
        c.announce_public_keys(&t, "solo", "g1", set).unwrap();
        c.share_backups(&t, "solo", "g1", vec![]).unwrap();
        c.submit_verifications(&t, "solo", "g1", vec![]).unwrap();

        let joint = c.publish_joint_key(&t, "solo").unwrap();
        assert_eq!(joint.joint_public_key, expected);
        assert_eq!(c.get_joint_key(&t, "solo").unwrap(), joint);
    }

    #[test]
    fn guardian_records_are_created_with_the_ceremony() {
        let (c, t) = coordinator();
        c.create_ceremony(&t, "k1", 3, 2, ids(&["g1", "g2", "g3"])).unwrap();

        let g3 = c.get_guardian(&t, "k1", "g3").unwrap();
        assert_eq!(g3.sequence_order, 3);
        assert!(g3.public_keys.is_none());
        assert_eq!(c.find_guardians(&t, "k1", 0, 10).unwrap().len(), 3);
        assert!(matches!(c.get_guardian(&t, "k1", "g4"), Err(Error::NotFound(_))));
    }

    #[test]
    fn verify_challenges_without_disputes_is_empty() {
        let (c, t) = coordinator();
        c.create_ceremony(&t, "k1", 1, 1, ids(&["g1"])).unwrap();
        assert!(c.verify_ceremony_challenges(&t, "k1").unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn creation_initializes_every_guardian(n in 1usize..8, k_seed in 0usize..8) {
            let quorum = k_seed % n + 1;
            let guardian_ids: Vec<GuardianId> = (1..=n).map(|i| format!("guardian-{}", i)).collect();
            let (c, t) = coordinator();

            let ceremony = c.create_ceremony(&t, "k", n, quorum, guardian_ids.clone()).unwrap();
            prop_assert_eq!(ceremony.state, KeyCeremonyState::Created);

            let keys: Vec<GuardianId> = ceremony.guardian_status.keys().cloned().collect();
            prop_assert_eq!(keys, guardian_ids);
            prop_assert!(ceremony
                .guardian_status
                .values()
                .all(|s| *s == GuardianRoundStatus::default()));
        }
    }
}
