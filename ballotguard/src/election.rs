use crate::*;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A contest and the selections a voter may make in it
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ContestDescription {
    pub contest_id: String,
    pub selection_ids: Vec<String>,
}

/// The shape of an election's ballots
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Manifest {
    pub election_scope_id: String,
    pub contests: Vec<ContestDescription>,
}

impl Manifest {
    /// Ids must be non-empty and unique within their scope
    pub fn validate(&self) -> Result<(), Error> {
        if self.election_scope_id.is_empty() {
            return Err(Error::InvalidArgument("manifest has no election scope id".into()));
        }
        if self.contests.is_empty() {
            return Err(Error::InvalidArgument("manifest has no contests".into()));
        }

        let mut contest_ids = BTreeSet::new();
        for contest in &self.contests {
            if contest.contest_id.is_empty() || !contest_ids.insert(&contest.contest_id) {
                return Err(Error::InvalidArgument(format!(
                    "invalid or duplicate contest id '{}'",
                    contest.contest_id
                )));
            }
            if contest.selection_ids.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "contest {} has no selections",
                    contest.contest_id
                )));
            }
            let mut selection_ids = BTreeSet::new();
            for selection_id in &contest.selection_ids {
                if selection_id.is_empty() || !selection_ids.insert(selection_id) {
                    return Err(Error::InvalidArgument(format!(
                        "invalid or duplicate selection id '{}' in contest {}",
                        selection_id, contest.contest_id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn contest(&self, contest_id: &str) -> Option<&ContestDescription> {
        self.contests.iter().find(|c| c.contest_id == contest_id)
    }

    pub fn crypto_hash(&self) -> GroupScalar {
        let mut h = HashBuilder::new("ballotguard_manifest")
            .bytes(self.election_scope_id.as_bytes())
            .number(self.contests.len() as u64);
        for contest in &self.contests {
            h = h
                .bytes(contest.contest_id.as_bytes())
                .number(contest.selection_ids.len() as u64);
            for selection_id in &contest.selection_ids {
                h = h.bytes(selection_id.as_bytes());
            }
        }
        h.finish()
    }
}

/// A manifest in the registry, stored under its hash
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredManifest {
    pub manifest_hash: GroupScalar,
    pub manifest: Manifest,
    pub created_at: DateTime<Utc>,
}

impl Record for StoredManifest {
    const COLLECTION: Collection = Collection::Manifest;

    fn key(&self) -> String {
        self.manifest_hash.to_hex()
    }
}

/// Parse a hex manifest hash as handed out by `submit_manifest`
pub fn parse_manifest_hash(manifest_hash: &str) -> Result<GroupScalar, Error> {
    hex::decode(manifest_hash)
        .ok()
        .and_then(|bytes| GroupScalar::from_bytes(&bytes).ok())
        .ok_or_else(|| Error::InvalidArgument(format!("manifest hash {} not valid", manifest_hash)))
}

/// The public parameters every encryption and decryption in an election is bound to
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ElectionContext {
    pub number_of_guardians: usize,
    pub quorum: usize,
    pub elgamal_public_key: GroupElement,
    pub commitment_hash: GroupScalar,
    pub manifest_hash: GroupScalar,
    pub crypto_base_hash: GroupScalar,
    pub crypto_extended_base_hash: GroupScalar,
}

impl ElectionContext {
    pub fn new(
        number_of_guardians: usize,
        quorum: usize,
        elgamal_public_key: GroupElement,
        commitment_hash: GroupScalar,
        manifest: &Manifest,
    ) -> Self {
        let manifest_hash = manifest.crypto_hash();
        let crypto_base_hash = HashBuilder::new("ballotguard_base_hash")
            .number(number_of_guardians as u64)
            .number(quorum as u64)
            .scalar(&manifest_hash)
            .finish();
        let crypto_extended_base_hash = HashBuilder::new("ballotguard_extended_base_hash")
            .scalar(&crypto_base_hash)
            .scalar(&commitment_hash)
            .finish();

        ElectionContext {
            number_of_guardians,
            quorum,
            elgamal_public_key,
            commitment_hash,
            manifest_hash,
            crypto_base_hash,
            crypto_extended_base_hash,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Election {
    pub election_id: String,
    pub key_name: String,
    pub manifest: Manifest,
    pub context: ElectionContext,
    pub created_at: DateTime<Utc>,
}

impl Record for Election {
    const COLLECTION: Collection = Collection::Election;

    fn key(&self) -> String {
        self.election_id.clone()
    }
}

/// Manifests, elections and their ballot boxes
#[derive(Clone)]
pub struct ElectionRegistry {
    manifests: ManifestStore,
    elections: ElectionStore,
    ceremonies: CeremonyStore,
    ballots: BallotStore,
    inventories: BallotInventoryStore,
}

impl ElectionRegistry {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        ElectionRegistry {
            manifests: TypedStore::new(repo.clone()),
            elections: TypedStore::new(repo.clone()),
            ceremonies: TypedStore::new(repo.clone()),
            ballots: TypedStore::new(repo.clone()),
            inventories: TypedStore::new(repo),
        }
    }

    /// Check a manifest and return the hash it would be stored under
    pub fn validate_manifest(&self, manifest: &Manifest) -> Result<GroupScalar, Error> {
        manifest.validate()?;
        Ok(manifest.crypto_hash())
    }

    /// Store a manifest under its hash. Submitting the same manifest again
    /// returns the stored copy.
    pub fn submit_manifest(&self, tenant: &Tenant, manifest: Manifest) -> Result<StoredManifest, Error> {
        let manifest_hash = self.validate_manifest(&manifest)?;
        let key = manifest_hash.to_hex();
        if let Some(stored) = self.manifests.get(tenant, &key)? {
            return Ok(stored);
        }

        let stored = StoredManifest {
            manifest_hash,
            manifest,
            created_at: Utc::now(),
        };
        match self.manifests.create(tenant, &stored) {
            Ok(()) => {
                log::info!("{}: stored manifest {}", tenant, key);
                Ok(stored)
            }
            Err(Error::AlreadyExists(_)) => self.manifests.require(tenant, &key),
            Err(e) => Err(e),
        }
    }

    pub fn get_manifest(&self, tenant: &Tenant, manifest_hash: &str) -> Result<StoredManifest, Error> {
        let manifest_hash = parse_manifest_hash(manifest_hash)?;
        self.manifests.require(tenant, &manifest_hash.to_hex())
    }

    pub fn find_manifests(
        &self,
        tenant: &Tenant,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<StoredManifest>, Error> {
        self.manifests.find(tenant, filter, skip, limit)
    }

    /// Create an election from a stored manifest, keyed by a published ceremony
    pub fn create_election(
        &self,
        tenant: &Tenant,
        election_id: &str,
        key_name: &str,
        manifest_hash: &str,
    ) -> Result<Election, Error> {
        if election_id.is_empty() {
            return Err(Error::InvalidArgument("election id is empty".into()));
        }
        let manifest = self.get_manifest(tenant, manifest_hash)?.manifest;

        let ceremony = self.ceremonies.require(tenant, key_name)?;
        let joint_key = ceremony.joint_key().ok_or_else(|| {
            Error::PreconditionFailed(format!("joint key for {} has not been published", key_name))
        })?;

        let context = ElectionContext::new(
            ceremony.number_of_guardians,
            ceremony.quorum,
            joint_key.joint_public_key,
            joint_key.commitment_hash,
            &manifest,
        );
        let election = Election {
            election_id: election_id.to_owned(),
            key_name: key_name.to_owned(),
            manifest,
            context,
            created_at: Utc::now(),
        };

        self.elections.create(tenant, &election)?;
        self.inventories
            .put(tenant, &BallotInventory::new(election_id))?;

        log::info!("{}: created election {} on key {}", tenant, election_id, key_name);
        Ok(election)
    }

    pub fn get_election(&self, tenant: &Tenant, election_id: &str) -> Result<Election, Error> {
        self.elections.require(tenant, election_id)
    }

    pub fn find_elections(
        &self,
        tenant: &Tenant,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Election>, Error> {
        self.elections.find(tenant, filter, skip, limit)
    }

    /// Record a batch of cast or spoiled ballots.
    ///
    /// The whole batch is validated before anything is written. A ballot id can
    /// only ever be submitted once per election.
    pub fn submit_ballots(
        &self,
        tenant: &Tenant,
        election_id: &str,
        ballots: Vec<CiphertextBallot>,
        state: BallotBoxState,
    ) -> Result<BallotInventory, Error> {
        let election = self.elections.require(tenant, election_id)?;
        let inventory = self.get_ballot_inventory(tenant, election_id)?;

        let mut batch_ids = BTreeSet::new();
        for ballot in &ballots {
            ballot.validate(&election.manifest)?;
            if inventory.contains(&ballot.ballot_id) || !batch_ids.insert(&ballot.ballot_id) {
                return Err(Error::AlreadyExists(format!(
                    "ballot {} in election {}",
                    ballot.ballot_id, election_id
                )));
            }
        }

        let now = Utc::now();
        let mut submitted = Vec::with_capacity(ballots.len());
        for ballot in ballots {
            let record = SubmittedBallot {
                election_id: election_id.to_owned(),
                ballot_id: ballot.ballot_id,
                state,
                contests: ballot.contests,
                submitted_at: now,
            };
            self.ballots.create(tenant, &record)?;
            submitted.push(record.ballot_id);
        }

        let inventory = self.inventories.modify(tenant, election_id, |inventory| {
            for ballot_id in &submitted {
                inventory.record(ballot_id, state);
            }
            Ok(())
        })?;

        log::info!(
            "{}: election {} received {} {} ballot(s)",
            tenant,
            election_id,
            submitted.len(),
            state
        );
        Ok(inventory)
    }

    pub fn get_ballot(
        &self,
        tenant: &Tenant,
        election_id: &str,
        ballot_id: &str,
    ) -> Result<SubmittedBallot, Error> {
        self.ballots
            .require(tenant, &compound_key(&[election_id, ballot_id]))
    }

    pub fn find_ballots(
        &self,
        tenant: &Tenant,
        election_id: &str,
        state: Option<BallotBoxState>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<SubmittedBallot>, Error> {
        let mut filter = Filter::new().eq("election_id", election_id);
        if let Some(state) = state {
            filter = filter.eq("state", serde_json::to_value(state)?);
        }
        self.ballots.find(tenant, &filter, skip, limit)
    }

    pub fn get_ballot_inventory(
        &self,
        tenant: &Tenant,
        election_id: &str,
    ) -> Result<BallotInventory, Error> {
        self.inventories.require(tenant, election_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn manifest() -> Manifest {
        Manifest {
            election_scope_id: "scope".into(),
            contests: vec![ContestDescription {
                contest_id: "mayor".into(),
                selection_ids: vec!["alice".into(), "bob".into()],
            }],
        }
    }

    #[test]
    fn manifest_validation() {
        assert!(manifest().validate().is_ok());

        let mut dup = manifest();
        dup.contests[0].selection_ids.push("bob".into());
        assert!(matches!(dup.validate(), Err(Error::InvalidArgument(_))));

        let mut empty = manifest();
        empty.contests.clear();
        assert!(matches!(empty.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn context_binds_commitments() {
        let key = GroupElement::generator();
        let a = ElectionContext::new(3, 2, key, GroupScalar::one(), &manifest());
        let b = ElectionContext::new(3, 2, key, GroupScalar::zero(), &manifest());
        assert_eq!(a.crypto_base_hash, b.crypto_base_hash);
        assert_ne!(a.crypto_extended_base_hash, b.crypto_extended_base_hash);
    }

    #[test]
    fn election_requires_published_key() {
        let repo: Arc<dyn Repository> = Arc::new(MemRepository::new());
        let tenant = Tenant::new("t").unwrap();
        let ceremonies = KeyCeremonyCoordinator::new(repo.clone());
        ceremonies
            .create_ceremony(&tenant, "k1", 1, 1, vec!["g1".into()])
            .unwrap();

        let registry = ElectionRegistry::new(repo);
        let hash = registry.submit_manifest(&tenant, manifest()).unwrap().manifest_hash.to_hex();
        let err = registry
            .create_election(&tenant, "e1", "k1", &hash)
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));

        let err = registry
            .create_election(&tenant, "e1", "nope", &hash)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn manifests_are_stored_by_hash() {
        let registry = ElectionRegistry::new(Arc::new(MemRepository::new()));
        let tenant = Tenant::new("t").unwrap();

        let hash = registry.validate_manifest(&manifest()).unwrap();
        let stored = registry.submit_manifest(&tenant, manifest()).unwrap();
        assert_eq!(stored.manifest_hash, hash);

        // Same content, same record
        let again = registry.submit_manifest(&tenant, manifest()).unwrap();
        assert_eq!(again, stored);

        let fetched = registry.get_manifest(&tenant, &hash.to_hex()).unwrap();
        assert_eq!(fetched.manifest, manifest());

        let mut other = manifest();
        other.election_scope_id = "other".into();
        registry.submit_manifest(&tenant, other).unwrap();
        assert_eq!(registry.find_manifests(&tenant, &Filter::new(), 0, 10).unwrap().len(), 2);

        let filter = Filter::new().eq("manifest_hash", hash.to_hex());
        let found = registry.find_manifests(&tenant, &filter, 0, 10).unwrap();
        assert_eq!(found, vec![stored]);
    }

    #[test]
    fn unknown_or_malformed_manifests() {
        let registry = ElectionRegistry::new(Arc::new(MemRepository::new()));
        let tenant = Tenant::new("t").unwrap();

        let unknown = GroupScalar::from_u64(7).to_hex();
        assert!(matches!(registry.get_manifest(&tenant, &unknown), Err(Error::NotFound(_))));
        assert!(matches!(
            registry.create_election(&tenant, "e1", "k1", &unknown),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.get_manifest(&tenant, "not-hex"),
            Err(Error::InvalidArgument(_))
        ));

        let mut empty = manifest();
        empty.contests.clear();
        assert!(matches!(registry.validate_manifest(&empty), Err(Error::InvalidArgument(_))));
        assert!(matches!(registry.submit_manifest(&tenant, empty), Err(Error::InvalidArgument(_))));
        assert!(registry.find_manifests(&tenant, &Filter::new(), 0, 10).unwrap().is_empty());
    }
}
