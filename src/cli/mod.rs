// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap, validates the pipeline configuration once, and routes to
// the matching use case. This layer only routes and prints —
// all business logic is in Layer 2.

// Declare the commands and console adapter submodules
pub mod commands;
pub mod console;

use anyhow::Result;
use clap::Parser;
use commands::{CloneArgs, Commands, DemoArgs, ServeArgs, TrainArgs};

use crate::application::config::PipelineConfig;

#[derive(Parser, Debug)]
#[command(
    name = "mimic",
    version = "0.1.0",
    about = "Clone one person's chat style into a personalized conversational model."
)]
pub struct Cli {
    /// The mode to run (clone, train, demo, bot, web)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the mode and dispatch. Configuration is validated
    /// here, once, before any stage runs.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Clone(args) => run_clone(args),
            Commands::Train(args) => run_train(args).await,
            Commands::Demo(args) => run_demo(args).await,
            Commands::Bot(args) => run_serve(args, "bot").await,
            Commands::Web(args) => run_serve(args, "web").await,
        }
    }
}

fn config_from(args: &commands::ConfigArgs) -> Result<PipelineConfig> {
    let config: PipelineConfig = args.into();
    config.validate()?;
    Ok(config)
}

fn run_clone(args: CloneArgs) -> Result<()> {
    use crate::application::clone_use_case::CloneUseCase;

    let config = config_from(&args.config)?;
    tracing::info!("Cloning style for '{}' from '{}'", args.user, args.export_path);

    let outcome = CloneUseCase::new(config).execute(
        &args.export_path,
        &args.user,
        args.sender.as_deref(),
    )?;

    println!(
        "Corpus ready: {} utterances ({} authored), {} messages rejected.",
        outcome.total_utterances, outcome.authored_utterances, outcome.rejected_messages,
    );
    for feature in &outcome.profile.features {
        println!("  {:<20} {:.3}", feature.name, feature.value);
    }
    Ok(())
}

async fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let config = config_from(&args.config)?;
    tracing::info!("Training personalized model for '{}'", args.user);

    let artifact = TrainUseCase::new(config).execute(&args.user).await?;

    println!(
        "Training complete. Artifact v{} ({}) stored.",
        artifact.version,
        artifact.short_hash(),
    );
    Ok(())
}

async fn run_demo(args: DemoArgs) -> Result<()> {
    use crate::application::chat_use_case::ChatUseCase;

    let config = config_from(&args.config)?;
    let reply = ChatUseCase::new(config).demo(&args.user, &args.message).await?;

    println!("reply> {}", reply.text);
    println!(
        "       (style similarity {:.2}{})",
        reply.style_similarity,
        if reply.drift_warning { ", drift warning" } else { "" },
    );
    Ok(())
}

async fn run_serve(args: ServeArgs, surface: &str) -> Result<()> {
    use crate::application::chat_use_case::ChatUseCase;
    use crate::cli::console::ConsoleAdapter;

    let config = config_from(&args.config)?;
    println!("Serving '{}' on the {} surface. Empty line or /quit ends.", args.user, surface);

    let mut adapter = ConsoleAdapter::new(surface);
    ChatUseCase::new(config).serve(&args.user, &mut adapter).await
}
