use super::{expand, print_json, Context};
use anyhow::{anyhow, Context as _};
use ballotguard::*;
use std::fs;

/// Ceremonies never have more guardians than this
const MAX_GUARDIANS: usize = 1000;

/// Everything a guardian keeps to itself
#[derive(serde::Serialize, serde::Deserialize)]
pub struct GuardianSecret {
    pub key_name: String,
    pub election: ElectionKeyPair,
    pub auxiliary: AuxiliaryKeyPair,
}

impl GuardianSecret {
    pub fn guardian_id(&self) -> &str {
        &self.election.owner_id
    }
}

pub fn read_secret(location: &str) -> anyhow::Result<GuardianSecret> {
    let location = expand(location);
    let contents =
        fs::read_to_string(&location).with_context(|| format!("unable to read {}", location))?;
    serde_json::from_str(&contents).with_context(|| format!("unable to parse {}", location))
}

pub fn command_guardian(matches: &clap::ArgMatches, ctx: &Context) -> anyhow::Result<()> {
    let coordinator = KeyCeremonyCoordinator::new(ctx.repo.clone());

    if let ("generate", Some(matches)) = matches.subcommand() {
        return command_guardian_generate(matches, ctx, &coordinator);
    }

    let (name, matches) = match matches.subcommand() {
        (name, Some(matches)) => (name, matches),
        _ => return Ok(()),
    };

    // Unwraps are OK, both these args are required
    let key_name = matches.value_of("KEY-NAME").unwrap();
    let secret = read_secret(matches.value_of("SECRET-FILE").unwrap())?;
    if secret.key_name != key_name {
        return Err(anyhow!(
            "secret file belongs to ceremony {}, not {}",
            secret.key_name,
            key_name
        ));
    }

    let guardian = match name {
        "announce" => {
            let keys = PublicKeySet {
                election: secret.election.share(),
                auxiliary: secret.auxiliary.share(),
            };
            coordinator.announce_public_keys(&ctx.tenant, key_name, secret.guardian_id(), keys)?
        }
        "backup" => command_guardian_backup(ctx, &coordinator, &secret)?,
        "verify" => command_guardian_verify(ctx, &coordinator, &secret)?,
        "challenge" => command_guardian_challenge(ctx, &coordinator, &secret)?,
        other => return Err(anyhow!("unknown guardian command {}", other)),
    };

    let ceremony = coordinator.get_ceremony_state(&ctx.tenant, key_name)?;
    if let Some(status) = ceremony.guardian_status.get(&guardian.guardian_id) {
        print_json(status)?;
    }
    Ok(())
}

fn command_guardian_generate(
    matches: &clap::ArgMatches,
    ctx: &Context,
    coordinator: &KeyCeremonyCoordinator,
) -> anyhow::Result<()> {
    let key_name = matches.value_of("KEY-NAME").unwrap();
    let guardian_id = matches.value_of("GUARDIAN-ID").unwrap();
    let location = expand(matches.value_of("secret").unwrap());

    // Sequence order and quorum come from the ceremony
    let guardian = coordinator.get_guardian(&ctx.tenant, key_name, guardian_id)?;
    let seed = matches.value_of("seed").map(|s| s.as_bytes());
    let secret = GuardianSecret {
        key_name: key_name.to_owned(),
        election: generate_election_key_pair(
            guardian_id,
            guardian.sequence_order,
            guardian.quorum,
            seed,
        )?,
        auxiliary: generate_auxiliary_key_pair(guardian_id, guardian.sequence_order),
    };

    let contents = serde_json::to_string_pretty(&secret)?;
    fs::write(&location, contents).with_context(|| format!("cannot create file {}", location))?;

    print_json(&PublicKeySet {
        election: secret.election.share(),
        auxiliary: secret.auxiliary.share(),
    })
}

fn command_guardian_backup(
    ctx: &Context,
    coordinator: &KeyCeremonyCoordinator,
    secret: &GuardianSecret,
) -> anyhow::Result<KeyCeremonyGuardian> {
    let others = coordinator.find_guardians(&ctx.tenant, &secret.key_name, 0, MAX_GUARDIANS)?;

    let mut backups = Vec::new();
    for other in others.iter().filter(|g| g.guardian_id != secret.guardian_id()) {
        let keys = other
            .public_keys
            .as_ref()
            .ok_or_else(|| anyhow!("{} has not announced its keys yet", other.guardian_id))?;
        backups.push(generate_partial_key_backup(&secret.election, &keys.auxiliary)?);
    }

    Ok(coordinator.share_backups(&ctx.tenant, &secret.key_name, secret.guardian_id(), backups)?)
}

fn command_guardian_verify(
    ctx: &Context,
    coordinator: &KeyCeremonyCoordinator,
    secret: &GuardianSecret,
) -> anyhow::Result<KeyCeremonyGuardian> {
    let guardian_id = secret.guardian_id();
    let others = coordinator.find_guardians(&ctx.tenant, &secret.key_name, 0, MAX_GUARDIANS)?;

    let mut verifications = Vec::new();
    for owner in others.iter().filter(|g| g.guardian_id != guardian_id) {
        let owner_key = match &owner.public_keys {
            Some(keys) => &keys.election,
            None => return Err(anyhow!("{} has not announced its keys yet", owner.guardian_id)),
        };
        let backup = owner
            .backups
            .iter()
            .find(|b| b.designated_id == guardian_id)
            .ok_or_else(|| anyhow!("{} has not shared a backup with {}", owner.guardian_id, guardian_id))?;

        let verification = verify_partial_key_backup(guardian_id, backup, owner_key, &secret.auxiliary);
        if !verification.verified {
            log::warn!("backup from {} failed verification", owner.guardian_id);
        }
        verifications.push(verification);
    }

    Ok(coordinator.submit_verifications(&ctx.tenant, &secret.key_name, guardian_id, verifications)?)
}

// Reveal the values behind every backup of ours that someone failed to verify
fn command_guardian_challenge(
    ctx: &Context,
    coordinator: &KeyCeremonyCoordinator,
    secret: &GuardianSecret,
) -> anyhow::Result<KeyCeremonyGuardian> {
    let guardian_id = secret.guardian_id();
    let guardians = coordinator.find_guardians(&ctx.tenant, &secret.key_name, 0, MAX_GUARDIANS)?;
    let mine = guardians
        .iter()
        .find(|g| g.guardian_id == guardian_id)
        .ok_or_else(|| anyhow!("{} is not a guardian of {}", guardian_id, secret.key_name))?;

    let challenges: Vec<ElectionPartialKeyChallenge> = guardians
        .iter()
        .flat_map(|g| g.verifications.iter())
        .filter(|v| v.owner_id == guardian_id && !v.verified)
        .filter_map(|v| mine.backups.iter().find(|b| b.designated_id == v.designated_id))
        .map(|backup| generate_partial_key_challenge(backup, &secret.election.polynomial))
        .collect();

    if challenges.is_empty() {
        println!("No disputed backups from {}", guardian_id);
        return Ok(mine.clone());
    }
    Ok(coordinator.submit_challenges(&ctx.tenant, &secret.key_name, guardian_id, challenges)?)
}
