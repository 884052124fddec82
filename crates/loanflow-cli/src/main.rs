mod commands;
mod opts;
mod output;
mod util;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::fill::FillArgs;
use commands::submit::SubmitArgs;
use commands::verify::VerifyArgs;
use opts::FlowOpts;

#[derive(Parser, Debug)]
#[command(name = "loanflow", version, about = "Loan application flow client")]
struct Cli {
    #[command(flatten)]
    opts: FlowOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current session and owner
    Session,

    /// Show application progress as the service sees it
    Status,

    /// Submit the current step's fields
    Submit(SubmitArgs),

    /// Submit every remaining step from a directory of JSON files
    Fill(FillArgs),

    /// Bind a verified phone number to the application
    Verify(VerifyArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    util::load_env_file(Path::new("."))?;
    util::setup_logging();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let opts = &cli.opts;
    match cli.command {
        Command::Session => commands::session::cmd_session(opts).await,
        Command::Status => commands::status::cmd_status(opts).await,
        Command::Submit(args) => commands::submit::cmd_submit(opts, &args).await,
        Command::Fill(args) => commands::fill::cmd_fill(opts, &args).await,
        Command::Verify(args) => commands::verify::cmd_verify(opts, &args).await,
    }
}
