//! dcsandbox - disposable development sandboxes with MCP endpoints

mod commands;

use clap::{Parser, Subcommand};
use dcsandbox_config::GlobalConfig;
use dcsandbox_core::SandboxEngine;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "dcsandbox")]
#[command(author, version, about = "Disposable development sandboxes with MCP endpoints", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a sandbox and serve its MCP endpoint
    Create {
        /// Repository to clone into the workspace
        #[arg(long)]
        git: Option<String>,
        /// Branch for --git
        #[arg(long, default_value = "main")]
        branch: String,
        /// Sandbox name (derived from the repository when omitted)
        #[arg(long)]
        name: Option<String>,
        /// Template name (auto-detected or `base` when omitted)
        #[arg(long)]
        template: Option<String>,
        /// Memory limit, e.g. 2G
        #[arg(long)]
        memory: Option<String>,
        /// CPU cores, fractional allowed
        #[arg(long)]
        cpu: Option<f64>,
        /// Lifetime in minutes
        #[arg(long)]
        timeout: Option<u64>,
        /// Never reap this sandbox
        #[arg(long)]
        persist: bool,
        /// Detect the template from the cloned tree
        #[arg(long)]
        auto_detect: bool,
        /// Exit immediately instead of serving the MCP endpoint
        #[arg(long)]
        detach: bool,
    },

    /// List sandboxes
    List,

    /// Show one sandbox with live container details
    Info {
        /// Sandbox name or id
        sandbox: String,
    },

    /// Start a stopped sandbox
    Start {
        /// Sandbox name or id
        sandbox: String,
    },

    /// Stop a running sandbox
    Stop {
        /// Sandbox name or id
        sandbox: String,
    },

    /// Remove a sandbox
    Remove {
        /// Sandbox name or id
        sandbox: String,
        /// Ignore errors and missing sandboxes
        #[arg(long)]
        force: bool,
    },

    /// Remove stopped and errored sandboxes
    Cleanup {
        /// Remove running sandboxes too
        #[arg(long)]
        all: bool,
        /// Also remove explicitly named sandboxes
        #[arg(long)]
        force: bool,
    },

    /// Show container logs
    Logs {
        /// Sandbox name or id
        sandbox: String,
        /// Keep streaming
        #[arg(short = 'f', long)]
        follow: bool,
        /// Lines from the end
        #[arg(long, default_value_t = 100)]
        tail: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = GlobalConfig::load()?;
    let runtime: Arc<dyn dcsandbox_runtime::RuntimeDriver> =
        dcsandbox_runtime::create_driver(&config).await?.into();
    let engine = Arc::new(SandboxEngine::new(runtime, config).await?);

    match cli.command {
        Commands::Create {
            git,
            branch,
            name,
            template,
            memory,
            cpu,
            timeout,
            persist,
            auto_detect,
            detach,
        } => {
            let request = dcsandbox_core::CreateRequest {
                name,
                template,
                git_url: git,
                git_branch: branch,
                memory,
                cpu,
                timeout_minutes: timeout,
                persist,
                auto_detect,
                mcp_enabled: true,
            };
            commands::create(&engine, request, detach).await
        }
        Commands::List => commands::list(&engine).await,
        Commands::Info { sandbox } => commands::info(&engine, &sandbox).await,
        Commands::Start { sandbox } => commands::start(&engine, &sandbox).await,
        Commands::Stop { sandbox } => commands::stop(&engine, &sandbox).await,
        Commands::Remove { sandbox, force } => commands::remove(&engine, &sandbox, force).await,
        Commands::Cleanup { all, force } => commands::cleanup(&engine, all, force).await,
        Commands::Logs {
            sandbox,
            follow,
            tail,
        } => commands::logs(&engine, &sandbox, follow, tail).await,
    }
}
