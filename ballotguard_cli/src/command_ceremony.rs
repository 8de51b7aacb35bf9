use super::{print_json, Context};
use anyhow::{anyhow, Context as _};
use ballotguard::*;

pub fn command_ceremony(matches: &clap::ArgMatches, ctx: &Context) -> anyhow::Result<()> {
    let coordinator = KeyCeremonyCoordinator::new(ctx.repo.clone());

    match matches.subcommand() {
        ("create", Some(matches)) => command_ceremony_create(matches, ctx, &coordinator),
        ("state", Some(matches)) => {
            // Unwraps are OK, KEY-NAME is required
            let key_name = matches.value_of("KEY-NAME").unwrap();
            print_json(&coordinator.get_ceremony_state(&ctx.tenant, key_name)?)
        }
        ("publish", Some(matches)) => {
            let key_name = matches.value_of("KEY-NAME").unwrap();
            print_json(&coordinator.publish_joint_key(&ctx.tenant, key_name)?)
        }
        ("verify-challenges", Some(matches)) => {
            let key_name = matches.value_of("KEY-NAME").unwrap();
            let verifications = coordinator.verify_ceremony_challenges(&ctx.tenant, key_name)?;
            if verifications.is_empty() {
                println!("No challenges exist for {}", key_name);
                return Ok(());
            }
            print_json(&verifications)
        }
        (name, Some(matches)) => {
            let transition = match name {
                "open" => CeremonyTransition::Open,
                "close" => CeremonyTransition::Close,
                "challenge" => CeremonyTransition::Challenge,
                "cancel" => CeremonyTransition::Cancel,
                other => return Err(anyhow!("unknown ceremony command {}", other)),
            };
            let key_name = matches.value_of("KEY-NAME").unwrap();
            let ceremony = coordinator.transition(&ctx.tenant, key_name, transition)?;
            println!("{} is {}", key_name, ceremony.state);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn command_ceremony_create(
    matches: &clap::ArgMatches,
    ctx: &Context,
    coordinator: &KeyCeremonyCoordinator,
) -> anyhow::Result<()> {
    let key_name = matches.value_of("KEY-NAME").unwrap();
    let guardian_ids: Vec<GuardianId> = matches
        .value_of("guardians")
        .unwrap()
        .split(',')
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty())
        .collect();

    let quorum = match matches.value_of("quorum") {
        Some(quorum) => quorum
            .parse()
            .with_context(|| format!("invalid quorum {}", quorum))?,
        None => guardian_ids.len(),
    };

    let ceremony =
        coordinator.create_ceremony(&ctx.tenant, key_name, guardian_ids.len(), quorum, guardian_ids)?;
    print_json(&ceremony)
}
