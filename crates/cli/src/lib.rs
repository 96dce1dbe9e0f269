pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bridgeway",
    about = "Bridgeway operator CLI",
    long_about = "Operate the Bridgeway gateway: migrations, config inspection, readiness \
                  checks, and API key management.",
    after_help = "Examples:\n  bridgeway doctor --json\n  \
                  bridgeway keys create --name ci --role power_user\n  \
                  bridgeway keys revoke kid_abc"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, webhook secrets, scope mode, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Create, list, and revoke API keys")]
    Keys(KeysCommand),
}

#[derive(Debug, Subcommand)]
enum KeysCommand {
    #[command(about = "Create a key and print its secret once")]
    Create {
        #[arg(long)]
        name: String,
        #[arg(long = "scope", help = "Scope to grant; repeatable")]
        scopes: Vec<String>,
        #[arg(long, help = "Grant a role's scope set: user, power_user, or admin")]
        role: Option<String>,
        #[arg(long = "quota")]
        quota_per_hour: Option<u32>,
        #[arg(long)]
        expires_in_days: Option<u32>,
    },
    #[command(about = "List key metadata (never secrets)")]
    List,
    #[command(about = "Deactivate a key by its key_id")]
    Revoke { key_id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Keys(KeysCommand::Create {
            name,
            scopes,
            role,
            quota_per_hour,
            expires_in_days,
        }) => {
            commands::keys::create(commands::keys::CreateArgs {
                name,
                scopes,
                role,
                quota_per_hour,
                expires_in_days,
            })
        }
        Command::Keys(KeysCommand::List) => commands::keys::list(),
        Command::Keys(KeysCommand::Revoke { key_id }) => commands::keys::revoke(&key_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
