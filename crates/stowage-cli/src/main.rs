mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stowage",
    about = "Build minimal, non-root container images for Python web services"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add stowage.toml and .dockerignore to an existing project
    Init,
    /// Validate config, manifest, and build plan without building
    Check,
    /// Print the generated Dockerfile
    Render,
    /// Print build stages and their instructions
    Plan,
    /// Print the cache key of every instruction for the current sources
    Layers {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Eject Dockerfile for manual customization
    Eject,
    /// Build the image and verify it
    Build {
        /// Image tag (default: <name>:latest)
        #[arg(long, short = 't')]
        tag: Option<String>,
        /// Allow building with uncommitted changes
        #[arg(long)]
        allow_dirty: bool,
        /// Skip post-build image verification
        #[arg(long)]
        no_verify: bool,
    },
    /// Verify a built image against the project's health, port, and user contract
    Verify {
        /// Image tag (default: <name>:latest)
        tag: Option<String>,
    },
    /// Show the health status of a running container
    Status {
        /// Container name or id
        container: String,
    },
    /// Probe a running service until it turns unhealthy
    Watch {
        /// Health endpoint (default: derived from stowage.toml)
        #[arg(long)]
        url: Option<String>,
    },
    /// Start the web server from the environment prefix and supervise it
    Run {
        /// Environment prefix to run from (default: [build] env_dir)
        #[arg(long)]
        prefix: Option<PathBuf>,
    },
    /// Check Docker setup and project readiness
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init_project().await?,
        Commands::Check => commands::check().await?,
        Commands::Render => commands::render().await?,
        Commands::Plan => commands::plan().await?,
        Commands::Layers { json } => commands::layers(json).await?,
        Commands::Eject => commands::eject().await?,
        Commands::Build {
            tag,
            allow_dirty,
            no_verify,
        } => commands::build(tag, allow_dirty, no_verify).await?,
        Commands::Verify { tag } => commands::verify(tag).await?,
        Commands::Status { container } => commands::status(&container).await?,
        Commands::Watch { url } => commands::watch(url).await?,
        Commands::Run { prefix } => {
            let code = commands::run(prefix).await?;
            std::process::exit(code);
        }
        Commands::Doctor => commands::doctor().await?,
    }

    Ok(())
}
