use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod app;
mod commands;
mod config;

#[derive(Parser)]
#[command(name = "studyloop", about = "Adaptive study mode recommendations")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: app::GlobalArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend the next teaching mode
    Recommend(commands::policy::RecommendArgs),
    /// Record feedback for a mode
    Feedback(commands::policy::FeedbackArgs),
    /// Record the onboarding survey preference
    Survey(commands::policy::SurveyArgs),
    /// Reset learned preferences to the prior
    Reset(commands::policy::OutputArgs),
    /// Mark a study session as completed
    EndSession(commands::policy::EndSessionArgs),
    /// Show stored policy state
    State(commands::policy::OutputArgs),
    /// Extract a document and generate study material in one session
    Study(commands::study::StudyArgs),
    /// Dispatch JSON-lines commands from a file or stdin
    Run(commands::run::RunArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Recommend(args) => commands::policy::recommend(&cli.global, args).await,
        Commands::Feedback(args) => commands::policy::feedback(&cli.global, args).await,
        Commands::Survey(args) => commands::policy::survey(&cli.global, args).await,
        Commands::Reset(args) => commands::policy::reset(&cli.global, args).await,
        Commands::EndSession(args) => commands::policy::end_session(&cli.global, args).await,
        Commands::State(args) => commands::policy::state(&cli.global, args).await,
        Commands::Study(args) => commands::study::run(&cli.global, args).await,
        Commands::Run(args) => commands::run::run(&cli.global, args).await,
        Commands::Config(args) => commands::config::run(&cli.global, args),
    }
}
