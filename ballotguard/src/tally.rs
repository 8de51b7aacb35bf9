use crate::*;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Upper bound on the shares read for a single tally or ballot
const MAX_SHARES: usize = 10_000;

/// A PROCESSING record owned by another process may be restarted once it has
/// not been touched for this long
const ABANDONED_AFTER_MINUTES: i64 = 10;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CiphertextTallyContest {
    pub contest_id: String,
    pub selections: IndexMap<String, ElGamalCiphertext>,
}

/// Encrypted per-selection totals of an election's cast ballots
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CiphertextTally {
    pub election_id: String,
    pub tally_name: String,
    pub contests: IndexMap<String, CiphertextTallyContest>,
    pub cast_ballot_ids: BTreeSet<String>,
    pub spoiled_ballot_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CiphertextTally {
    /// An empty tally shaped like the manifest
    pub fn new(election_id: &str, tally_name: &str, manifest: &Manifest) -> Self {
        let contests = manifest
            .contests
            .iter()
            .map(|contest| {
                let selections = contest
                    .selection_ids
                    .iter()
                    .map(|id| (id.clone(), ElGamalCiphertext::zero()))
                    .collect();
                let tally_contest = CiphertextTallyContest {
                    contest_id: contest.contest_id.clone(),
                    selections,
                };
                (contest.contest_id.clone(), tally_contest)
            })
            .collect();

        let now = Utc::now();
        CiphertextTally {
            election_id: election_id.to_owned(),
            tally_name: tally_name.to_owned(),
            contests,
            cast_ballot_ids: BTreeSet::new(),
            spoiled_ballot_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn contains(&self, ballot_id: &str) -> bool {
        self.cast_ballot_ids.contains(ballot_id) || self.spoiled_ballot_ids.contains(ballot_id)
    }

    /// Fold a ballot into the tally. Cast ballots are added to the totals,
    /// spoiled ballots are only recorded. Returns false if the ballot was
    /// already folded.
    pub fn fold(&mut self, ballot: &SubmittedBallot) -> Result<bool, Error> {
        if self.contains(&ballot.ballot_id) {
            return Ok(false);
        }

        match ballot.state {
            BallotBoxState::Spoiled => {
                self.spoiled_ballot_ids.insert(ballot.ballot_id.clone());
            }
            BallotBoxState::Cast => {
                // Check the whole ballot before touching any accumulator
                for (contest_id, selections) in &ballot.contests {
                    let contest = self.contests.get(contest_id);
                    let fits = contest
                        .map(|c| selections.keys().all(|s| c.selections.contains_key(s)))
                        .unwrap_or(false);
                    if !fits {
                        return Err(Error::Internal(format!(
                            "ballot {} does not match tally {} in contest {}",
                            ballot.ballot_id, self.tally_name, contest_id
                        )));
                    }
                }

                for (contest_id, selections) in &ballot.contests {
                    if let Some(contest) = self.contests.get_mut(contest_id) {
                        for (selection_id, ciphertext) in selections {
                            if let Some(total) = contest.selections.get_mut(selection_id) {
                                *total = total.add(ciphertext);
                            }
                        }
                    }
                }
                self.cast_ballot_ids.insert(ballot.ballot_id.clone());
            }
        }
        self.updated_at = Utc::now();
        Ok(true)
    }
}

impl Record for CiphertextTally {
    const COLLECTION: Collection = Collection::CiphertextTally;

    fn key(&self) -> String {
        compound_key(&[&self.election_id, &self.tally_name])
    }
}

/// Lifecycle of a tally decryption
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaintextTallyState {
    Created,
    Processing,
    Complete,
    Error,
}

impl PlaintextTallyState {
    /// The only forward moves are CREATED -> PROCESSING -> {COMPLETE, ERROR}
    pub fn can_advance_to(&self, next: PlaintextTallyState) -> bool {
        use PlaintextTallyState::*;
        match (self, next) {
            (Created, Processing) => true,
            (Processing, Complete) | (Processing, Error) => true,
            (Created, _) | (Processing, _) | (Complete, _) | (Error, _) => false,
        }
    }
}

impl fmt::Display for PlaintextTallyState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            PlaintextTallyState::Created => "CREATED",
            PlaintextTallyState::Processing => "PROCESSING",
            PlaintextTallyState::Complete => "COMPLETE",
            PlaintextTallyState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlaintextTallySelection {
    pub selection_id: String,
    pub tally: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlaintextTallyContest {
    pub contest_id: String,
    pub selections: IndexMap<String, PlaintextTallySelection>,
}

/// The decrypted result of a tally. `contests` is only present once COMPLETE.
///
/// `attempt` names the scheduler attempt running the combination while the
/// record is PROCESSING.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlaintextTally {
    pub election_id: String,
    pub tally_name: String,
    pub state: PlaintextTallyState,
    pub contests: Option<IndexMap<String, PlaintextTallyContest>>,
    pub message: Option<String>,
    #[serde(default)]
    pub attempt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlaintextTally {
    pub fn new(election_id: &str, tally_name: &str) -> Self {
        let now = Utc::now();
        PlaintextTally {
            election_id: election_id.to_owned(),
            tally_name: tally_name.to_owned(),
            state: PlaintextTallyState::Created,
            contests: None,
            message: None,
            attempt: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn advance(&mut self, next: PlaintextTallyState) -> Result<(), Error> {
        if !self.state.can_advance_to(next) {
            return Err(Error::PreconditionFailed(format!(
                "tally {} cannot move from {} to {}",
                self.tally_name, self.state, next
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// PROCESSING, but the combination can no longer finish: the attempt
    /// belongs to `scheduler` and is not running there, or it belongs to some
    /// other process and the record has been idle too long.
    pub fn is_abandoned(&self, scheduler: &Scheduler, now: DateTime<Utc>) -> bool {
        if self.state != PlaintextTallyState::Processing {
            return false;
        }
        match &self.attempt {
            Some(attempt) if scheduler.owns(attempt) => !scheduler.is_active(attempt),
            _ => {
                now.signed_duration_since(self.updated_at)
                    > chrono::Duration::minutes(ABANDONED_AFTER_MINUTES)
            }
        }
    }

    // Start over from CREATED; a running decryption cannot be restarted
    fn reset(&mut self, abandoned: bool) -> Result<(), Error> {
        if self.state == PlaintextTallyState::Processing && !abandoned {
            return Err(Error::PreconditionFailed(format!(
                "tally {} is being decrypted and cannot be restarted",
                self.tally_name
            )));
        }
        self.state = PlaintextTallyState::Created;
        self.contests = None;
        self.message = None;
        self.attempt = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn complete(&mut self, contests: IndexMap<String, PlaintextTallyContest>) -> Result<(), Error> {
        self.advance(PlaintextTallyState::Complete)?;
        self.contests = Some(contests);
        Ok(())
    }

    fn fail(&mut self, message: &str) -> Result<(), Error> {
        self.advance(PlaintextTallyState::Error)?;
        self.message = Some(message.to_owned());
        Ok(())
    }
}

impl Record for PlaintextTally {
    const COLLECTION: Collection = Collection::PlaintextTally;

    fn key(&self) -> String {
        compound_key(&[&self.election_id, &self.tally_name])
    }
}

/// What `decrypt_tally` hands back to its caller
pub enum DecryptionTicket {
    /// A stored result; no work was started
    Ready(PlaintextTally),

    /// Combination is running. `tally` is the PROCESSING record.
    Processing {
        tally: PlaintextTally,
        task: TaskHandle<PlaintextTally>,
    },
}

impl DecryptionTicket {
    pub fn tally(&self) -> &PlaintextTally {
        match self {
            DecryptionTicket::Ready(tally) => tally,
            DecryptionTicket::Processing { tally, .. } => tally,
        }
    }

    /// Wait for the final record. A combination failure is returned as an error.
    pub fn wait(self) -> Result<PlaintextTally, Error> {
        match self {
            DecryptionTicket::Ready(tally) => Ok(tally),
            DecryptionTicket::Processing { task, .. } => task.wait(),
        }
    }
}

/// Builds ciphertext tallies, accepts decryption shares and combines them
#[derive(Clone)]
pub struct TallyDecryptionCoordinator {
    elections: ElectionStore,
    guardians: GuardianStatusStore,
    ceremonies: CeremonyStore,
    ballots: BallotStore,
    inventories: BallotInventoryStore,
    tallies: TallyStore,
    results: PlaintextTallyStore,
    shares: DecryptionShareStore,
    ballot_shares: BallotShareStore,
    scheduler: Arc<Scheduler>,
}

impl TallyDecryptionCoordinator {
    pub fn new(repo: Arc<dyn Repository>, scheduler: Arc<Scheduler>) -> Self {
        TallyDecryptionCoordinator {
            elections: TypedStore::new(repo.clone()),
            guardians: TypedStore::new(repo.clone()),
            ceremonies: TypedStore::new(repo.clone()),
            ballots: TypedStore::new(repo.clone()),
            inventories: TypedStore::new(repo.clone()),
            tallies: TypedStore::new(repo.clone()),
            results: TypedStore::new(repo.clone()),
            shares: TypedStore::new(repo.clone()),
            ballot_shares: TypedStore::new(repo),
            scheduler,
        }
    }

    /// Build and store a tally of every ballot the election has received so far
    pub fn start_tally(
        &self,
        tenant: &Tenant,
        election_id: &str,
        tally_name: &str,
    ) -> Result<CiphertextTally, Error> {
        if tally_name.is_empty() {
            return Err(Error::InvalidArgument("tally name is empty".into()));
        }
        let election = self.elections.require(tenant, election_id)?;
        let key = compound_key(&[election_id, tally_name]);
        if self.tallies.get(tenant, &key)?.is_some() {
            return Err(Error::AlreadyExists(format!("tally {} of {}", tally_name, election_id)));
        }

        let mut tally = CiphertextTally::new(election_id, tally_name, &election.manifest);
        self.fold_new_ballots(tenant, &mut tally)?;
        self.tallies.create(tenant, &tally)?;

        log::info!(
            "{}: started tally {} of {} with {} cast and {} spoiled ballot(s)",
            tenant,
            tally_name,
            election_id,
            tally.cast_ballot_ids.len(),
            tally.spoiled_ballot_ids.len()
        );
        Ok(tally)
    }

    /// Fold ballots received since the tally was started or last appended
    pub fn append_tally(
        &self,
        tenant: &Tenant,
        election_id: &str,
        tally_name: &str,
    ) -> Result<CiphertextTally, Error> {
        let key = compound_key(&[election_id, tally_name]);
        let mut folded = 0;
        let tally = self.tallies.modify(tenant, &key, |tally| {
            folded = self.fold_new_ballots(tenant, tally)?;
            Ok(())
        })?;

        log::info!(
            "{}: appended {} ballot(s) to tally {} of {}",
            tenant,
            folded,
            tally_name,
            election_id
        );
        if folded > 0 {
            log::info!(
                "{}: decryption shares for tally {} of {} must be computed again",
                tenant,
                tally_name,
                election_id
            );
        }
        Ok(tally)
    }

    fn fold_new_ballots(&self, tenant: &Tenant, tally: &mut CiphertextTally) -> Result<usize, Error> {
        let inventory = self.inventories.require(tenant, &tally.election_id)?;
        let mut folded = 0;
        for ballot_id in inventory
            .cast_ballot_ids
            .iter()
            .chain(inventory.spoiled_ballot_ids.iter())
        {
            if tally.contains(ballot_id) {
                continue;
            }
            let ballot = self
                .ballots
                .require(tenant, &compound_key(&[&tally.election_id, ballot_id]))?;
            if tally.fold(&ballot)? {
                folded += 1;
            }
        }
        Ok(folded)
    }

    pub fn get_ciphertext_tally(
        &self,
        tenant: &Tenant,
        election_id: &str,
        tally_name: &str,
    ) -> Result<CiphertextTally, Error> {
        self.tallies
            .require(tenant, &compound_key(&[election_id, tally_name]))
    }

    pub fn find_ciphertext_tallies(
        &self,
        tenant: &Tenant,
        election_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<CiphertextTally>, Error> {
        let filter = Filter::new().eq("election_id", election_id);
        self.tallies.find(tenant, &filter, skip, limit)
    }

    /// Validate and store a guardian's decryption share.
    ///
    /// Every selection proof is checked against the guardian's announced
    /// election key; one bad proof rejects the whole share. A guardian
    /// re-submitting replaces its earlier share.
    pub fn submit_decryption_share(
        &self,
        tenant: &Tenant,
        share: DecryptionShare,
    ) -> Result<DecryptionShare, Error> {
        let election = self.elections.require(tenant, &share.election_id)?;
        let tally = self.get_ciphertext_tally(tenant, &share.election_id, &share.tally_name)?;
        let public_key = self.guardian_public_key(tenant, &election.key_name, &share.guardian_id)?;

        if let Err(e) = share.validate(
            &tally,
            &public_key,
            &election.context.crypto_extended_base_hash,
        ) {
            log::warn!(
                "{}: rejected decryption share from {} for tally {}: {}",
                tenant,
                share.guardian_id,
                share.tally_name,
                e
            );
            return Err(e);
        }

        self.shares.put(tenant, &share)?;
        log::info!(
            "{}: accepted decryption share from {} for tally {} of {}",
            tenant,
            share.guardian_id,
            share.tally_name,
            share.election_id
        );
        Ok(share)
    }

    // The election key a ceremony member announced; Forbidden for anybody else
    fn guardian_public_key(
        &self,
        tenant: &Tenant,
        key_name: &str,
        guardian_id: &str,
    ) -> Result<GroupElement, Error> {
        let ceremony = self.ceremonies.require(tenant, key_name)?;
        if !ceremony.has_guardian(guardian_id) {
            return Err(Error::Forbidden(format!(
                "{} is not a guardian of {}",
                guardian_id, key_name
            )));
        }

        self.guardians
            .require(tenant, &compound_key(&[key_name, guardian_id]))?
            .public_keys
            .map(|set| set.election.key)
            .ok_or_else(|| {
                Error::PreconditionFailed(format!(
                    "{} has not announced an election public key",
                    guardian_id
                ))
            })
    }

    pub fn get_decryption_share(
        &self,
        tenant: &Tenant,
        election_id: &str,
        tally_name: &str,
        guardian_id: &str,
    ) -> Result<DecryptionShare, Error> {
        self.shares
            .require(tenant, &compound_key(&[election_id, tally_name, guardian_id]))
    }

    pub fn find_decryption_shares(
        &self,
        tenant: &Tenant,
        election_id: &str,
        tally_name: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<DecryptionShare>, Error> {
        let filter = Filter::new()
            .eq("election_id", election_id)
            .eq("tally_name", tally_name);
        self.shares.find(tenant, &filter, skip, limit)
    }

    /// Decrypt a tally once every guardian has submitted a share.
    ///
    /// A stored result is returned as is unless `restart` is set. Otherwise the
    /// record is moved to PROCESSING, the share count is checked, and the
    /// combination is handed to the worker pool.
    pub fn decrypt_tally(
        &self,
        tenant: &Tenant,
        election_id: &str,
        tally_name: &str,
        restart: bool,
    ) -> Result<DecryptionTicket, Error> {
        let key = compound_key(&[election_id, tally_name]);
        let existing = self.results.get(tenant, &key)?;
        if let (Some(result), false) = (&existing, restart) {
            log::debug!("{}: tally {} already decrypted ({})", tenant, tally_name, result.state);
            return Ok(DecryptionTicket::Ready(result.clone()));
        }

        let election = self.elections.require(tenant, election_id)?;
        let tally = self.get_ciphertext_tally(tenant, election_id, tally_name)?;
        let ceremony = self.ceremonies.require(tenant, &election.key_name)?;

        if existing.is_some() {
            let now = Utc::now();
            let scheduler = &self.scheduler;
            let mut abandoned = false;
            self.results.modify(tenant, &key, |result| {
                abandoned = result.is_abandoned(scheduler, now);
                result.reset(abandoned)
            })?;
            if abandoned {
                log::warn!(
                    "{}: restarting abandoned decryption of tally {} of {}",
                    tenant,
                    tally_name,
                    election_id
                );
            }
        } else if let Err(e) = self
            .results
            .create(tenant, &PlaintextTally::new(election_id, tally_name))
        {
            return match e {
                // Somebody else started first
                Error::AlreadyExists(_) => Ok(DecryptionTicket::Ready(self.results.require(tenant, &key)?)),
                e => Err(e),
            };
        }

        // Active until the combination finishes or this call bails out
        let attempt = self.scheduler.begin_attempt();
        let processing = self.results.modify(tenant, &key, |result| {
            result.advance(PlaintextTallyState::Processing)?;
            result.attempt = Some(attempt.id().to_owned());
            Ok(())
        })?;
        log::info!("{}: decrypting tally {} of {}", tenant, tally_name, election_id);

        // Threshold: every guardian of the ceremony, with a share that matches
        // the tally as it is now
        let shares = self.current_shares(tenant, &election, &ceremony, &tally)?;
        let submitted: BTreeSet<&str> = shares.iter().map(|s| s.guardian_id.as_str()).collect();
        if submitted.len() != ceremony.number_of_guardians {
            let message = format!(
                "{} of {} guardians have submitted shares",
                submitted.len(),
                ceremony.number_of_guardians
            );
            log::warn!("{}: cannot decrypt tally {}: {}", tenant, tally_name, message);
            self.results.modify(tenant, &key, |result| result.fail(&message))?;
            return Err(Error::PreconditionFailed(message));
        }

        let results = self.results.clone();
        let task_tenant = tenant.clone();
        let task = self.scheduler.spawn_blocking(move || {
            let _attempt = attempt;
            combine(&results, &task_tenant, &key, &tally, &shares)
        });
        match task {
            Ok(task) => Ok(DecryptionTicket::Processing {
                tally: processing,
                task,
            }),
            Err(e) => {
                let key = compound_key(&[election_id, tally_name]);
                let message = e.to_string();
                self.results.modify(tenant, &key, |result| result.fail(&message))?;
                Err(e)
            }
        }
    }

    // Stored shares that still validate against `tally`. Appending ballots
    // changes the accumulators, so shares computed before it are dropped.
    fn current_shares(
        &self,
        tenant: &Tenant,
        election: &Election,
        ceremony: &KeyCeremony,
        tally: &CiphertextTally,
    ) -> Result<Vec<DecryptionShare>, Error> {
        let mut current = Vec::new();
        let stored =
            self.find_decryption_shares(tenant, &tally.election_id, &tally.tally_name, 0, MAX_SHARES)?;
        for share in stored {
            if !ceremony.has_guardian(&share.guardian_id) {
                continue;
            }
            let public_key = self
                .guardians
                .get(tenant, &compound_key(&[&election.key_name, &share.guardian_id]))?
                .and_then(|guardian| guardian.public_keys)
                .map(|set| set.election.key);
            let valid = public_key
                .map(|key| {
                    share
                        .validate(tally, &key, &election.context.crypto_extended_base_hash)
                        .is_ok()
                })
                .unwrap_or(false);

            if valid {
                current.push(share);
            } else {
                log::warn!(
                    "{}: decryption share from {} no longer matches tally {} of {}",
                    tenant,
                    share.guardian_id,
                    tally.tally_name,
                    tally.election_id
                );
            }
        }
        Ok(current)
    }

    pub fn get_plaintext_tally(
        &self,
        tenant: &Tenant,
        election_id: &str,
        tally_name: &str,
    ) -> Result<PlaintextTally, Error> {
        self.results
            .require(tenant, &compound_key(&[election_id, tally_name]))
    }

    pub fn find_plaintext_tallies(
        &self,
        tenant: &Tenant,
        election_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<PlaintextTally>, Error> {
        let filter = Filter::new().eq("election_id", election_id);
        self.results.find(tenant, &filter, skip, limit)
    }

    /// Validate and store a guardian's share of a spoiled ballot. A guardian
    /// re-submitting replaces its earlier share.
    pub fn submit_ballot_decryption_share(
        &self,
        tenant: &Tenant,
        share: BallotDecryptionShare,
    ) -> Result<BallotDecryptionShare, Error> {
        let election = self.elections.require(tenant, &share.election_id)?;
        let ballot = self
            .ballots
            .require(tenant, &compound_key(&[&share.election_id, &share.ballot_id]))?;
        require_spoiled(&ballot)?;
        let public_key = self.guardian_public_key(tenant, &election.key_name, &share.guardian_id)?;

        if let Err(e) = share.validate(
            &ballot,
            &public_key,
            &election.context.crypto_extended_base_hash,
        ) {
            log::warn!(
                "{}: rejected share of ballot {} from {}: {}",
                tenant,
                share.ballot_id,
                share.guardian_id,
                e
            );
            return Err(e);
        }

        self.ballot_shares.put(tenant, &share)?;
        log::info!(
            "{}: accepted share of ballot {} from {}",
            tenant,
            share.ballot_id,
            share.guardian_id
        );
        Ok(share)
    }

    pub fn find_ballot_decryption_shares(
        &self,
        tenant: &Tenant,
        election_id: &str,
        ballot_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<BallotDecryptionShare>, Error> {
        let filter = Filter::new()
            .eq("election_id", election_id)
            .eq("ballot_id", ballot_id);
        self.ballot_shares.find(tenant, &filter, skip, limit)
    }

    /// Decrypt spoiled ballots once every guardian has shared each of them.
    ///
    /// Every ballot is checked before any is decrypted; a cast ballot is
    /// `InvalidArgument`.
    pub fn decrypt_spoiled_ballots(
        &self,
        tenant: &Tenant,
        election_id: &str,
        ballot_ids: &[String],
    ) -> Result<IndexMap<String, PlaintextBallot>, Error> {
        let election = self.elections.require(tenant, election_id)?;
        let ceremony = self.ceremonies.require(tenant, &election.key_name)?;

        let mut ready = Vec::with_capacity(ballot_ids.len());
        for ballot_id in ballot_ids {
            let ballot = self
                .ballots
                .require(tenant, &compound_key(&[election_id, ballot_id]))?;
            require_spoiled(&ballot)?;

            let shares: Vec<BallotDecryptionShare> = self
                .find_ballot_decryption_shares(tenant, election_id, ballot_id, 0, MAX_SHARES)?
                .into_iter()
                .filter(|s| ceremony.has_guardian(&s.guardian_id))
                .collect();
            if shares.len() != ceremony.number_of_guardians {
                return Err(Error::PreconditionFailed(format!(
                    "{} of {} guardians have submitted shares for ballot {}",
                    shares.len(),
                    ceremony.number_of_guardians,
                    ballot_id
                )));
            }
            ready.push((ballot, shares));
        }

        let mut plaintext = IndexMap::new();
        for (ballot, shares) in ready {
            let decrypted = decrypt_ballot(&ballot, &shares)?;
            plaintext.insert(ballot.ballot_id, decrypted);
        }
        log::info!(
            "{}: decrypted {} spoiled ballot(s) of {}",
            tenant,
            plaintext.len(),
            election_id
        );
        Ok(plaintext)
    }
}

// Runs on the worker pool: combine the shares and persist the outcome
fn combine(
    results: &PlaintextTallyStore,
    tenant: &Tenant,
    key: &str,
    tally: &CiphertextTally,
    shares: &[DecryptionShare],
) -> Result<PlaintextTally, Error> {
    match decrypt_tally(tally, shares) {
        Ok(contests) => {
            let result = results.modify(tenant, key, |result| result.complete(contests.clone()))?;
            log::info!(
                "{}: tally {} of {} decrypted",
                tenant,
                tally.tally_name,
                tally.election_id
            );
            Ok(result)
        }
        Err(e) => {
            log::error!(
                "{}: decryption of tally {} of {} failed: {}",
                tenant,
                tally.tally_name,
                tally.election_id,
                e
            );
            let message = e.to_string();
            results.modify(tenant, key, |result| result.fail(&message))?;
            Err(e.into())
        }
    }
}
