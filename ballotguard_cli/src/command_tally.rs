use super::command_guardian::read_secret;
use super::{print_json, Context};
use anyhow::anyhow;
use ballotguard::*;
use rand::rngs::OsRng;

pub fn command_tally(matches: &clap::ArgMatches, ctx: &Context) -> anyhow::Result<()> {
    let coordinator = TallyDecryptionCoordinator::new(ctx.repo.clone(), ctx.scheduler.clone());

    let (name, matches) = match matches.subcommand() {
        (name, Some(matches)) => (name, matches),
        _ => return Ok(()),
    };

    // Unwraps are OK, both these args are required
    let election_id = matches.value_of("ELECTION-ID").unwrap();
    let tally_name = matches.value_of("TALLY-NAME").unwrap();

    match name {
        "start" => {
            let tally = coordinator.start_tally(&ctx.tenant, election_id, tally_name)?;
            print_summary(&tally);
            Ok(())
        }
        "append" => {
            let tally = coordinator.append_tally(&ctx.tenant, election_id, tally_name)?;
            print_summary(&tally);
            Ok(())
        }
        "share" => {
            let secret = read_secret(matches.value_of("SECRET-FILE").unwrap())?;
            let registry = ElectionRegistry::new(ctx.repo.clone());
            let election = registry.get_election(&ctx.tenant, election_id)?;
            if election.key_name != secret.key_name {
                return Err(anyhow!(
                    "election {} uses key {}, not {}",
                    election_id,
                    election.key_name,
                    secret.key_name
                ));
            }

            let tally = coordinator.get_ciphertext_tally(&ctx.tenant, election_id, tally_name)?;
            let share = compute_decryption_share(&secret.election, &tally, &election.context, &mut OsRng);
            let share = coordinator.submit_decryption_share(&ctx.tenant, share)?;
            println!("accepted decryption share from {}", share.guardian_id);
            Ok(())
        }
        "decrypt" => {
            let restart = matches.is_present("restart");
            let ticket = coordinator.decrypt_tally(&ctx.tenant, election_id, tally_name, restart)?;
            print_json(&ticket.wait()?)
        }
        "show" => print_json(&coordinator.get_plaintext_tally(&ctx.tenant, election_id, tally_name)?),
        other => Err(anyhow!("unknown tally command {}", other)),
    }
}

fn print_summary(tally: &CiphertextTally) {
    println!(
        "tally {} of {}: {} cast, {} spoiled",
        tally.tally_name,
        tally.election_id,
        tally.cast_ballot_ids.len(),
        tally.spoiled_ballot_ids.len()
    );
}
