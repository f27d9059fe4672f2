pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "enrolla",
    about = "Enrolla operator CLI",
    long_about = "Operate the Enrolla commerce store: migrations, demo data, config inspection, \
                  waitlist sweeps and manual payment fulfillment.",
    after_help = "Examples:\n  enrolla migrate\n  enrolla doctor --json\n  \
                  enrolla expire-offers\n  \
                  enrolla fulfill --order-id ord-123 --provider-ref bank-transfer-881"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo catalog (organizer, period, tracks, rules)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, payment webhook readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Expire waitlist offers whose deadline has passed")]
    ExpireOffers,
    #[command(about = "Mark an order paid after a payment confirmed outside the webhook")]
    Fulfill {
        #[arg(long, help = "Order to fulfill")]
        order_id: String,
        #[arg(long, help = "Payment provider reference, e.g. a bank transfer id")]
        provider_ref: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    commands::init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::ExpireOffers => commands::expire_offers::run(),
        Command::Fulfill { order_id, provider_ref } => {
            commands::fulfill::run(&order_id, &provider_ref)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
