use super::{print_json, Context};
use anyhow::Context as _;
use ballotguard::*;
use indexmap::IndexMap;
use rand::rngs::OsRng;
use rand::Rng;

pub fn command_demo(matches: &clap::ArgMatches, ctx: &Context) -> anyhow::Result<()> {
    // Unwraps are OK, both these args have defaults
    let num_guardians: usize = matches
        .value_of("guardians")
        .unwrap()
        .parse()
        .context("invalid number of guardians")?;
    let num_ballots: usize = matches
        .value_of("ballots")
        .unwrap()
        .parse()
        .context("invalid number of ballots")?;

    let tenant = &ctx.tenant;
    let ceremonies = KeyCeremonyCoordinator::new(ctx.repo.clone());
    let registry = ElectionRegistry::new(ctx.repo.clone());
    let tallies = TallyDecryptionCoordinator::new(ctx.repo.clone(), ctx.scheduler.clone());

    // Key ceremony
    // ----------------
    let guardian_ids: Vec<GuardianId> = (1..=num_guardians).map(|i| format!("guardian-{}", i)).collect();
    ceremonies.create_ceremony(tenant, "demo-key", num_guardians, num_guardians, guardian_ids.clone())?;
    ceremonies.open_ceremony(tenant, "demo-key")?;

    let mut election_keys = Vec::with_capacity(num_guardians);
    let mut auxiliary_keys = Vec::with_capacity(num_guardians);
    for (i, id) in guardian_ids.iter().enumerate() {
        let election = generate_election_key_pair(id, i as u64 + 1, num_guardians, None)?;
        let auxiliary = generate_auxiliary_key_pair(id, i as u64 + 1);
        let keys = PublicKeySet {
            election: election.share(),
            auxiliary: auxiliary.share(),
        };
        ceremonies.announce_public_keys(tenant, "demo-key", id, keys)?;
        election_keys.push(election);
        auxiliary_keys.push(auxiliary);
    }

    for owner in &election_keys {
        let backups = auxiliary_keys
            .iter()
            .filter(|aux| aux.owner_id != owner.owner_id)
            .map(|aux| generate_partial_key_backup(owner, &aux.share()))
            .collect::<Result<Vec<_>, _>>()?;
        ceremonies.share_backups(tenant, "demo-key", &owner.owner_id, backups)?;
    }

    for verifier in &auxiliary_keys {
        let mut verifications = Vec::new();
        for owner in election_keys.iter().filter(|k| k.owner_id != verifier.owner_id) {
            let guardian = ceremonies.get_guardian(tenant, "demo-key", &owner.owner_id)?;
            if let Some(backup) = guardian.backups.iter().find(|b| b.designated_id == verifier.owner_id) {
                verifications.push(verify_partial_key_backup(
                    &verifier.owner_id,
                    backup,
                    &owner.share(),
                    verifier,
                ));
            }
        }
        ceremonies.submit_verifications(tenant, "demo-key", &verifier.owner_id, verifications)?;
    }

    let joint_key = ceremonies.publish_joint_key(tenant, "demo-key")?;
    println!("> Joint key {}", joint_key.joint_public_key);

    // Voting
    // ----------------
    let manifest = Manifest {
        election_scope_id: "demo".into(),
        contests: vec![ContestDescription {
            contest_id: "favorite-color".into(),
            selection_ids: vec!["red".into(), "green".into(), "blue".into()],
        }],
    };
    let stored = registry.submit_manifest(tenant, manifest)?;
    let manifest_hash = stored.manifest_hash.to_hex();
    let election = registry.create_election(tenant, "demo-election", "demo-key", &manifest_hash)?;

    let mut rng = OsRng;
    let mut expected: IndexMap<String, u64> = IndexMap::new();
    let mut ballots = Vec::with_capacity(num_ballots);
    for i in 0..num_ballots {
        let colors = &election.manifest.contests[0].selection_ids;
        let color = colors[rng.gen_range(0, colors.len())].clone();
        *expected.entry(color.clone()).or_insert(0) += 1;

        let mut choices = IndexMap::new();
        choices.insert("favorite-color".to_string(), color);
        ballots.push(encrypt_ballot(
            &format!("ballot-{}", i),
            &election.manifest,
            &election.context,
            &choices,
            &mut rng,
        )?);
    }
    registry.submit_ballots(tenant, "demo-election", ballots, BallotBoxState::Cast)?;
    println!("> Cast {} ballots", num_ballots);

    let mut choices = IndexMap::new();
    choices.insert("favorite-color".to_string(), "blue".to_string());
    let spoiled = encrypt_ballot("spoiled-0", &election.manifest, &election.context, &choices, &mut rng)?;
    registry.submit_ballots(tenant, "demo-election", vec![spoiled], BallotBoxState::Spoiled)?;

    // Voting is over
    // ----------------
    let tally = tallies.start_tally(tenant, "demo-election", "final")?;
    for key in &election_keys {
        let share = compute_decryption_share(key, &tally, &election.context, &mut rng);
        tallies.submit_decryption_share(tenant, share)?;
    }

    let result = tallies
        .decrypt_tally(tenant, "demo-election", "final", false)?
        .wait()?;
    print_json(&result)?;

    let contest = result
        .contests
        .as_ref()
        .and_then(|contests| contests.get("favorite-color"))
        .context("decrypted tally has no contests")?;
    for (color, selection) in &contest.selections {
        let want = expected.get(color).copied().unwrap_or(0);
        if selection.tally != want {
            anyhow::bail!("{} decrypted to {}, expected {}", color, selection.tally, want);
        }
    }

    // The spoiled ballot comes back as it was marked
    let ballot = registry.get_ballot(tenant, "demo-election", "spoiled-0")?;
    for key in &election_keys {
        let share = compute_ballot_decryption_share(key, &ballot, &election.context, &mut rng)?;
        tallies.submit_ballot_decryption_share(tenant, share)?;
    }
    let decrypted = tallies.decrypt_spoiled_ballots(tenant, "demo-election", &["spoiled-0".to_string()])?;
    let blue = decrypted
        .get("spoiled-0")
        .and_then(|ballot| ballot.contests.get("favorite-color"))
        .and_then(|contest| contest.selections.get("blue"))
        .map(|selection| selection.tally);
    if blue != Some(1) {
        anyhow::bail!("spoiled ballot decrypted to {:?}, expected a vote for blue", blue);
    }

    println!("> Election verified OK");
    Ok(())
}
