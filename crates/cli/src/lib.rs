pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "changegate",
    about = "Changegate approval workflow CLI",
    long_about = "Submit change requests into sequential approval workflows, record decisions and delegations, and inspect workflow progress.",
    after_help = "Examples:\n  changegate seed\n  changegate decide --step wf-demo-001-s2 --decision approved --actor user-2\n  changegate summary --workflow wf-demo-001\n  changegate doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic three-step demo workflow")]
    Seed,
    #[command(about = "Submit a change request described by a JSON file")]
    Submit {
        #[arg(long, help = "Path to the submission JSON document")]
        file: PathBuf,
    },
    #[command(about = "Record an approver decision on an active step")]
    Decide {
        #[arg(long = "step", help = "Step id to decide")]
        step_id: String,
        #[arg(long, help = "approved | rejected | request_info | delegated")]
        decision: String,
        #[arg(long = "actor", help = "Acting user id")]
        actor_id: String,
        #[arg(long, help = "Decision comments (required for rejections)")]
        comments: Option<String>,
        #[arg(long, help = "Conditions attached to an approval")]
        conditions: Option<String>,
        #[arg(long = "delegate-to", help = "Delegate target for `delegated` decisions")]
        delegate_to: Option<String>,
    },
    #[command(about = "Delegate an active step to another user")]
    Delegate {
        #[arg(long = "step", help = "Step id to delegate")]
        step_id: String,
        #[arg(long = "actor", help = "Acting user id")]
        actor_id: String,
        #[arg(long = "to", help = "User who may decide in the approver's place")]
        delegate_to: String,
    },
    #[command(about = "Print progress, status and overdue steps of a workflow")]
    Summary {
        #[arg(long = "workflow", help = "Workflow id")]
        workflow_id: String,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, database connectivity and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let result = dispatch(cli);

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn dispatch(cli: Cli) -> commands::CommandResult {
    match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Submit { file } => commands::submit::run(file),
        Command::Decide { step_id, decision, actor_id, comments, conditions, delegate_to } => {
            commands::decide::run(commands::decide::DecideArgs {
                step_id,
                decision,
                actor_id,
                comments,
                conditions,
                delegate_to,
            })
        }
        Command::Delegate { step_id, actor_id, delegate_to } => {
            commands::delegate::run(step_id, actor_id, delegate_to)
        }
        Command::Summary { workflow_id } => commands::summary::run(workflow_id),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
    }
}
