use super::command_guardian::read_secret;
use super::{expand, print_json, Context};
use anyhow::{anyhow, Context as _};
use ballotguard::*;
use indexmap::IndexMap;
use rand::rngs::OsRng;

pub fn command_election(matches: &clap::ArgMatches, ctx: &Context) -> anyhow::Result<()> {
    let registry = ElectionRegistry::new(ctx.repo.clone());

    match matches.subcommand() {
        ("manifest", Some(matches)) => {
            // Unwraps are OK, all args are required
            let location = expand(matches.value_of("MANIFEST").unwrap());
            let manifest = std::fs::read_to_string(&location)
                .with_context(|| format!("unable to read {}", location))?;
            let manifest: Manifest = serde_json::from_str(&manifest)
                .with_context(|| format!("unable to parse manifest {}", location))?;

            let stored = registry.submit_manifest(&ctx.tenant, manifest)?;
            println!("{}", stored.manifest_hash.to_hex());
            Ok(())
        }
        ("create", Some(matches)) => {
            let election_id = matches.value_of("ELECTION-ID").unwrap();
            let key_name = matches.value_of("KEY-NAME").unwrap();
            let manifest_hash = matches.value_of("MANIFEST-HASH").unwrap();

            let election = registry.create_election(&ctx.tenant, election_id, key_name, manifest_hash)?;
            print_json(&election)
        }
        ("cast", Some(matches)) => command_election_cast(matches, ctx, &registry),
        ("inventory", Some(matches)) => {
            let election_id = matches.value_of("ELECTION-ID").unwrap();
            print_json(&registry.get_ballot_inventory(&ctx.tenant, election_id)?)
        }
        ("spoiled-share", Some(matches)) => {
            let election_id = matches.value_of("ELECTION-ID").unwrap();
            let ballot_id = matches.value_of("BALLOT-ID").unwrap();
            let secret = read_secret(matches.value_of("SECRET-FILE").unwrap())?;

            let election = registry.get_election(&ctx.tenant, election_id)?;
            let ballot = registry.get_ballot(&ctx.tenant, election_id, ballot_id)?;
            let share =
                compute_ballot_decryption_share(&secret.election, &ballot, &election.context, &mut OsRng)?;

            let tallies = TallyDecryptionCoordinator::new(ctx.repo.clone(), ctx.scheduler.clone());
            let share = tallies.submit_ballot_decryption_share(&ctx.tenant, share)?;
            println!("accepted share of ballot {} from {}", ballot_id, share.guardian_id);
            Ok(())
        }
        ("decrypt-spoiled", Some(matches)) => {
            let election_id = matches.value_of("ELECTION-ID").unwrap();
            let ballot_ids: Vec<String> = matches
                .values_of("BALLOT-ID")
                .into_iter()
                .flatten()
                .map(str::to_owned)
                .collect();

            let tallies = TallyDecryptionCoordinator::new(ctx.repo.clone(), ctx.scheduler.clone());
            print_json(&tallies.decrypt_spoiled_ballots(&ctx.tenant, election_id, &ballot_ids)?)
        }
        (other, _) => Err(anyhow!("unknown election command {}", other)),
    }
}

fn command_election_cast(
    matches: &clap::ArgMatches,
    ctx: &Context,
    registry: &ElectionRegistry,
) -> anyhow::Result<()> {
    let election_id = matches.value_of("ELECTION-ID").unwrap();
    let election = registry.get_election(&ctx.tenant, election_id)?;

    let mut choices = IndexMap::new();
    for choice in matches.values_of("choice").into_iter().flatten() {
        let mut parts = choice.splitn(2, '=');
        match (parts.next(), parts.next()) {
            (Some(contest), Some(selection)) => {
                choices.insert(contest.to_owned(), selection.to_owned());
            }
            _ => return Err(anyhow!("invalid choice {}, expected contest=selection", choice)),
        }
    }

    let ballot_id = matches
        .value_of("ballot-id")
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let state = if matches.is_present("spoil") {
        BallotBoxState::Spoiled
    } else {
        BallotBoxState::Cast
    };

    let ballot = encrypt_ballot(&ballot_id, &election.manifest, &election.context, &choices, &mut OsRng)?;
    let inventory = registry.submit_ballots(&ctx.tenant, election_id, vec![ballot], state)?;

    println!(
        "{} ballot {} ({} cast, {} spoiled)",
        state,
        ballot_id,
        inventory.cast_count(),
        inventory.spoiled_count()
    );
    Ok(())
}
