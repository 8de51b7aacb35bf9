use ballotguard::{Repository, Scheduler, Settings, StorageMode, Tenant};
use clap::{App, AppSettings, Arg, SubCommand};
use std::sync::Arc;

mod command_ceremony;
mod command_demo;
mod command_election;
mod command_guardian;
mod command_tally;

use command_ceremony::command_ceremony;
use command_demo::command_demo;
use command_election::command_election;
use command_guardian::command_guardian;
use command_tally::command_tally;

/// What every command runs against
pub struct Context {
    pub tenant: Tenant,
    pub repo: Arc<dyn Repository>,
    pub scheduler: Arc<Scheduler>,
}

fn main() {
    let key_name = || Arg::with_name("KEY-NAME").index(1).required(true);
    let election_id = || Arg::with_name("ELECTION-ID").index(1).required(true);
    let tally_name = || Arg::with_name("TALLY-NAME").index(2).required(true);
    let secret = || {
        Arg::with_name("SECRET-FILE")
            .index(2)
            .required(true)
            .help("Guardian secret file written by `guardian generate`")
    };

    let matches = App::new("BallotGuard CLI")
        .version("0.1")
        .author("Patrick Hayes <patrick.d.hayes@gmail.com>")
        .about("Runs key ceremonies and tally decryptions")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .arg(
            Arg::with_name("tenant")
                .long("tenant")
                .takes_value(true)
                .help("Tenant to act for - can also be set with BALLOTGUARD_TENANT"),
        )
        .subcommand(
            SubCommand::with_name("ceremony")
                .about("Manage key ceremonies")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("create")
                        .about("Create a key ceremony")
                        .arg(key_name())
                        .arg(
                            Arg::with_name("guardians")
                                .long("guardians")
                                .takes_value(true)
                                .required(true)
                                .help("Comma separated guardian ids, in sequence order"),
                        )
                        .arg(
                            Arg::with_name("quorum")
                                .long("quorum")
                                .takes_value(true)
                                .help("Guardians needed to decrypt, defaults to all"),
                        ),
                )
                .subcommand(SubCommand::with_name("open").arg(key_name()))
                .subcommand(SubCommand::with_name("close").arg(key_name()))
                .subcommand(SubCommand::with_name("challenge").arg(key_name()))
                .subcommand(SubCommand::with_name("cancel").arg(key_name()))
                .subcommand(
                    SubCommand::with_name("state")
                        .about("Show every guardian's progress")
                        .arg(key_name()),
                )
                .subcommand(
                    SubCommand::with_name("publish")
                        .about("Publish the joint election key")
                        .arg(key_name()),
                )
                .subcommand(
                    SubCommand::with_name("verify-challenges")
                        .about("Re-verify disputed backups as a third party")
                        .arg(key_name()),
                ),
        )
        .subcommand(
            SubCommand::with_name("guardian")
                .about("Act as a guardian in a key ceremony")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("generate")
                        .about("Generate a guardian's election and auxiliary keys")
                        .arg(key_name())
                        .arg(Arg::with_name("GUARDIAN-ID").index(2).required(true))
                        .arg(
                            Arg::with_name("secret")
                                .long("secret")
                                .takes_value(true)
                                .required(true)
                                .help("Where to write the guardian secret file"),
                        )
                        .arg(
                            Arg::with_name("seed")
                                .long("seed")
                                .takes_value(true)
                                .help("Seed for a reproducible polynomial"),
                        ),
                )
                .subcommand(SubCommand::with_name("announce").arg(key_name()).arg(secret()))
                .subcommand(SubCommand::with_name("backup").arg(key_name()).arg(secret()))
                .subcommand(SubCommand::with_name("verify").arg(key_name()).arg(secret()))
                .subcommand(SubCommand::with_name("challenge").arg(key_name()).arg(secret())),
        )
        .subcommand(
            SubCommand::with_name("election")
                .about("Manage elections and their ballot boxes")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("manifest")
                        .about("Validate and store a manifest, printing its hash")
                        .arg(
                            Arg::with_name("MANIFEST")
                                .index(1)
                                .required(true)
                                .help("Manifest file in JSON format"),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("create")
                        .arg(election_id())
                        .arg(Arg::with_name("KEY-NAME").index(2).required(true))
                        .arg(
                            Arg::with_name("MANIFEST-HASH")
                                .index(3)
                                .required(true)
                                .help("Hash printed by `election manifest`"),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("cast")
                        .about("Encrypt and submit a ballot")
                        .arg(election_id())
                        .arg(
                            Arg::with_name("choice")
                                .long("choice")
                                .takes_value(true)
                                .multiple(true)
                                .number_of_values(1)
                                .help("contest=selection"),
                        )
                        .arg(
                            Arg::with_name("ballot-id")
                                .long("ballot-id")
                                .takes_value(true),
                        )
                        .arg(
                            Arg::with_name("spoil")
                                .long("spoil")
                                .help("Spoil the ballot instead of casting it"),
                        ),
                )
                .subcommand(SubCommand::with_name("inventory").arg(election_id()))
                .subcommand(
                    SubCommand::with_name("spoiled-share")
                        .about("Compute and submit a guardian's share of a spoiled ballot")
                        .arg(election_id())
                        .arg(Arg::with_name("BALLOT-ID").index(2).required(true))
                        .arg(Arg::with_name("SECRET-FILE").index(3).required(true)),
                )
                .subcommand(
                    SubCommand::with_name("decrypt-spoiled")
                        .about("Decrypt spoiled ballots once every guardian has shared them")
                        .arg(election_id())
                        .arg(
                            Arg::with_name("BALLOT-ID")
                                .index(2)
                                .required(true)
                                .multiple(true),
                        ),
                ),
        )
        .subcommand(
            SubCommand::with_name("tally")
                .about("Tally and decrypt elections")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("start").arg(election_id()).arg(tally_name()))
                .subcommand(SubCommand::with_name("append").arg(election_id()).arg(tally_name()))
                .subcommand(
                    SubCommand::with_name("share")
                        .about("Compute and submit a guardian's decryption share")
                        .arg(election_id())
                        .arg(tally_name())
                        .arg(
                            Arg::with_name("SECRET-FILE")
                                .index(3)
                                .required(true),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("decrypt")
                        .arg(election_id())
                        .arg(tally_name())
                        .arg(
                            Arg::with_name("restart")
                                .long("restart")
                                .help("Decrypt again even if a result is stored"),
                        ),
                )
                .subcommand(SubCommand::with_name("show").arg(election_id()).arg(tally_name())),
        )
        .subcommand(
            SubCommand::with_name("demo")
                .about("Run a whole ceremony and election in memory")
                .arg(
                    Arg::with_name("guardians")
                        .long("guardians")
                        .takes_value(true)
                        .default_value("3"),
                )
                .arg(
                    Arg::with_name("ballots")
                        .long("ballots")
                        .takes_value(true)
                        .default_value("10"),
                ),
        )
        .get_matches();

    init_logger(matches.occurrences_of("v"));

    let mut settings = Settings::from_env().unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });
    if let Some(tenant) = matches.value_of("tenant") {
        settings.tenant = tenant.to_owned();
    }
    if matches.subcommand_matches("demo").is_some() {
        settings.storage_mode = StorageMode::Memory;
    }

    let ctx = context(&settings).unwrap_or_else(|e| {
        eprintln!("{:#}", e);
        std::process::exit(1);
    });

    let result = match matches.subcommand() {
        ("ceremony", Some(matches)) => command_ceremony(matches, &ctx),
        ("guardian", Some(matches)) => command_guardian(matches, &ctx),
        ("election", Some(matches)) => command_election(matches, &ctx),
        ("tally", Some(matches)) => command_tally(matches, &ctx),
        ("demo", Some(matches)) => command_demo(matches, &ctx),
        _ => Ok(()),
    };

    ctx.scheduler.shutdown();
    if let Err(e) = result {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn context(settings: &Settings) -> anyhow::Result<Context> {
    Ok(Context {
        tenant: settings.tenant()?,
        repo: settings.repository()?,
        scheduler: settings.scheduler()?,
    })
}

fn init_logger(verbosity: u64) {
    let filter = match verbosity {
        0 => "ballotguard=warn",
        1 => "ballotguard=info",
        2 => "ballotguard=debug",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}

pub fn expand(input: &str) -> String {
    shellexpand::tilde(input).into_owned()
}

/// Print a value as pretty JSON
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
