//! A CLI tool for checking an election's tally counters against its vote
//! ledger. Dry run by default; `--apply` rewrites the counters that disagree.

use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches, Command};

use chapter_ballot::{
    model::{
        api::vote::{CounterScope, ReconciliationReport},
        audit::AuditContext,
        link::TokenCodec,
        mongodb::Id,
    },
    notify::{Broadcaster, LogMailer},
    service::Voting,
    store::MongoStore,
};

const PROGRAM_NAME: &str = "tally-cli";

const ABOUT_TEXT: &str = "Reconcile the tally counters of an election with its vote ledger.

EXIT CODES:
     0: Counters match the ledger, or were rewritten with --apply.
   255: Ran successfully, but counters disagree with the ledger.
 Other: Error.";

const ELECTION_ID: &str = "ELECTION_ID";
const DB_URI: &str = "db-uri";
const DB_NAME: &str = "db-name";
const ACTOR: &str = "actor";
const APPLY: &str = "apply";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(ELECTION_ID)
                .help("The election to reconcile")
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(DB_URI)
                .long(DB_URI)
                .env("ROCKET_DB_URI")
                .help("MongoDB connection string; must point at a replica set")
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(DB_NAME)
                .long(DB_NAME)
                .env("ROCKET_DB_NAME")
                .help("Database name")
                .action(ArgAction::Set)
                .default_value("chapter_ballot"),
        )
        .arg(
            Arg::new(ACTOR)
                .long(ACTOR)
                .help("Member ID recorded in the audit log as running the reconciliation")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new(APPLY)
                .long(APPLY)
                .help("Rewrite counters that disagree with the ledger")
                .action(ArgAction::SetTrue),
        )
}

fn parse_id(args: &ArgMatches, name: &str) -> Result<Option<Id>, String> {
    args.get_one::<String>(name)
        .map(|s| s.parse::<Id>().map_err(|e| format!("Invalid {name} \"{s}\": {e}")))
        .transpose()
}

fn print_report(report: &ReconciliationReport) {
    println!(
        "Election {}: {} counted vote{}",
        report.election_id,
        report.counted_votes,
        if report.counted_votes != 1 { "s" } else { "" }
    );
    for discrepancy in &report.discrepancies {
        let scope = match discrepancy.scope {
            CounterScope::Candidate => "candidate",
            CounterScope::Position => "position",
            CounterScope::Election => "election",
        };
        println!(
            "  {scope} {}: counter {} != ledger {}",
            discrepancy.id, discrepancy.counter, discrepancy.ledger
        );
    }
}

/// Run the reconciliation, report the result, and return the exit code.
async fn run(args: &ArgMatches) -> Result<u8, String> {
    let election_id = parse_id(args, ELECTION_ID)?.ok_or("Missing election ID")?;
    let actor = parse_id(args, ACTOR)?;
    let apply = args.get_flag(APPLY);
    let db_uri = args.get_one::<String>(DB_URI).ok_or("Missing database URI")?;
    let db_name = args.get_one::<String>(DB_NAME).ok_or("Missing database name")?;

    let store = MongoStore::connect(db_uri, db_name)
        .await
        .map_err(|e| format!("Could not connect to database: {e}"))?;
    // Links are never issued from here, so their secret and URL do not matter.
    let voting = Voting::new(
        Arc::new(store),
        TokenCodec::new(b""),
        Arc::new(LogMailer),
        Broadcaster::default(),
        String::new(),
    );

    let ctx = AuditContext {
        actor_id: actor,
        user_agent: Some(PROGRAM_NAME.to_string()),
        ..Default::default()
    };
    let report = voting
        .reconcile_tally(election_id, apply, &ctx)
        .await
        .map_err(|e| e.to_string())?;

    print_report(&report);
    if report.is_consistent() {
        println!("Counters match the ledger.");
        Ok(0)
    } else if report.applied {
        println!("Counters rewritten to match the ledger.");
        Ok(0)
    } else {
        println!("Counters disagree with the ledger; rerun with --apply to fix.");
        Ok(255)
    }
}

#[rocket::main]
async fn main() {
    let args = cli().get_matches();
    let exit_code = match run(&args).await {
        Ok(code) => code,
        Err(msg) => {
            println!("Error: {msg}");
            1
        }
    };
    std::process::exit(exit_code.into())
}
