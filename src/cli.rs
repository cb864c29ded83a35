use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

#[derive(Parser)]
#[command(name = "rmeter", version, about = "HTTP load-generation engine driven by declarative test plans")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test plan headless and print the summary
    Run(RunArgs),
    /// Parse and validate a plan file without running it
    Validate(ValidateArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to the plan file (.rmeter JSON)
    pub plan: PathBuf,

    /// Write the summary JSON to a file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the summary as JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Suppress live progress lines
    #[arg(short, long)]
    pub quiet: bool,

    /// Safety cap: request a cooperative stop after this long (e.g. 90s, 5m)
    #[arg(long, value_parser = parse_duration)]
    pub duration_cap: Option<Duration>,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Path to the plan file (.rmeter JSON)
    pub plan: PathBuf,
}
