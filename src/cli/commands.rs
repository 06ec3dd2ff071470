use clap::{Parser, Subcommand, Args};

#[derive(Parser)]
#[command(name = "sinkhound", version, about = "Taint-driven vulnerability discovery for npm packages")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the analysis pipeline against one package
    Analyze(AnalyzeArgs),
    /// Show a stored run record
    Show(ShowArgs),
    /// List stored runs
    List(ListArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

#[derive(Args, Clone)]
pub struct AnalyzeArgs {
    /// Package name on the npm registry
    pub package: String,

    /// Package version (defaults to latest)
    #[arg(long)]
    pub version: Option<String>,

    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Output directory for results
    #[arg(short, long)]
    pub output: Option<String>,

    /// SQLite database path
    #[arg(long, default_value = "./data/sinkhound.db")]
    pub db: String,

    /// Custom run identifier
    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(Args, Clone)]
pub struct ShowArgs {
    /// Run ID to show
    pub run_id: String,

    /// SQLite database path
    #[arg(long, default_value = "./data/sinkhound.db")]
    pub db: String,
}

#[derive(Args, Clone)]
pub struct ListArgs {
    /// SQLite database path
    #[arg(long, default_value = "./data/sinkhound.db")]
    pub db: String,

    /// Number of runs to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Number of runs to skip
    #[arg(long, default_value = "0")]
    pub offset: usize,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Config file to validate
    pub config: String,
}
