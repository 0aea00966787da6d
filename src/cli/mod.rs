use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "damage-review",
    about = "Review AI-detected vehicle damages part by part"
)]
pub struct Cli {
    /// Report to review. Shorthand for `review <report>`.
    pub report: Option<String>,

    /// Show progress summary instead of launching TUI.
    #[arg(short, long)]
    pub status: bool,

    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (default: <config dir>/damage-review/config.json).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding the config.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Reviewer id stamped on every decision, overriding the config.
    #[arg(long, global = true)]
    pub reviewer: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open the interactive review TUI (default) or show status.
    Review(ReviewArgs),
    /// Print per-section and per-part progress.
    Status(ReportArgs),
    /// Exit 0 if every damage of the report is reviewed, 1 otherwise.
    Check(ReportArgs),
    /// Load an upstream detection file.
    Import(ImportArgs),
    /// Validate every pending damage of a part.
    ValidatePart(PartArgs),
    /// Mark every damage of a part as a false positive.
    DismissPart(DismissArgs),
    /// Set the status of one damage, or of its whole damage group.
    SetStatus(SetStatusArgs),
    /// Print the recap of validated damages.
    Recap(RecapArgs),
}

#[derive(Args, Debug)]
pub struct ReviewArgs {
    /// Report id. Defaults to the only stored report, if there is exactly one.
    pub report: Option<String>,

    /// Show progress summary instead of launching TUI.
    #[arg(short, long)]
    pub status: bool,
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Report id. Defaults to the only stored report, if there is exactly one.
    pub report: Option<String>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Detection JSON file.
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct PartArgs {
    pub report: String,
    pub section: String,
    pub part: String,
}

#[derive(Args, Debug)]
pub struct DismissArgs {
    #[command(flatten)]
    pub part: PartArgs,

    /// Confirm the dismissal; it overrides earlier decisions on the part.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct SetStatusArgs {
    /// Damage id.
    pub damage_id: String,

    /// pending, validated, non_billable or false_positive.
    pub status: String,

    /// Reviewer note stored with the decision.
    #[arg(short, long)]
    pub notes: Option<String>,

    /// Apply to every damage sharing this damage's group.
    #[arg(short, long)]
    pub group: bool,
}

#[derive(Args, Debug)]
pub struct RecapArgs {
    pub report: String,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
