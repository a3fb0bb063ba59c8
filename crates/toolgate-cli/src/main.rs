//! Toolgate CLI — command-line interface for the capability broker.
//!
//! Reuses the same core domain logic (toolgate-core) and server bootstrap
//! (toolgate-server) that power embedded deployments.

mod commands;

use clap::{Parser, Subcommand};

/// Toolgate CLI — capability broker for tool-server workflows
#[derive(Parser)]
#[command(name = "toolgate", version, about = "Toolgate CLI — capability broker for tool-server workflows")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "TOOLGATE_DB_PATH", default_value = "toolgate.db")]
    db: String,

    /// Path to the broker configuration file (providers, limits)
    #[arg(long, env = "TOOLGATE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Toolgate HTTP backend server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3710)]
        port: u16,
    },

    /// Run a workflow from a YAML file
    Run {
        /// Path to the workflow YAML file
        file: String,
        /// Owner on whose behalf the workflow runs
        #[arg(long)]
        owner: Option<String>,
        /// Skip the auth gate pre-flight
        #[arg(long)]
        skip_auth_check: bool,
    },

    /// Manage capability providers
    Providers {
        #[command(subcommand)]
        action: ProviderAction,
    },

    /// Manage auth verifications
    Verify {
        #[command(subcommand)]
        action: VerifyAction,
    },

    /// Manage tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum ProviderAction {
    /// List registered providers
    List,
    /// List a provider's capabilities (connects on demand)
    Capabilities {
        /// Provider name
        name: String,
        /// Owner the connection is scoped to
        #[arg(long, default_value = "default")]
        owner: String,
    },
}

#[derive(Subcommand)]
enum VerifyAction {
    /// List verified providers for an owner
    List {
        #[arg(long, default_value = "default")]
        owner: String,
    },
    /// Mark a provider's credentials as confirmed for an owner
    Grant {
        /// Provider name
        provider: String,
        #[arg(long, default_value = "default")]
        owner: String,
    },
    /// Revoke a verification
    Revoke {
        /// Provider name
        provider: String,
        #[arg(long, default_value = "default")]
        owner: String,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// List tasks for an owner
    List {
        #[arg(long, default_value = "default")]
        owner: String,
    },
    /// Show a task with its persisted step results
    Get {
        /// Task ID
        id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "toolgate_core=warn,toolgate_server=warn,toolgate_cli=info".into()
            }),
        )
        .init();

    let result = match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(host, port, cli.db, cli.config).await
        }

        Commands::Run {
            file,
            owner,
            skip_auth_check,
        } => {
            let state = commands::init_state(&cli.db, cli.config.as_deref()).await;
            commands::run::run(&state, &file, owner.as_deref(), skip_auth_check).await
        }

        Commands::Providers { action } => {
            let state = commands::init_state(&cli.db, cli.config.as_deref()).await;
            match action {
                ProviderAction::List => commands::providers::list(&state),
                ProviderAction::Capabilities { name, owner } => {
                    commands::providers::capabilities(&state, &name, &owner).await
                }
            }
        }

        Commands::Verify { action } => {
            let state = commands::init_state(&cli.db, cli.config.as_deref()).await;
            match action {
                VerifyAction::List { owner } => commands::verify::list(&state, &owner).await,
                VerifyAction::Grant { provider, owner } => {
                    commands::verify::grant(&state, &owner, &provider).await
                }
                VerifyAction::Revoke { provider, owner } => {
                    commands::verify::revoke(&state, &owner, &provider).await
                }
            }
        }

        Commands::Task { action } => {
            let state = commands::init_state(&cli.db, cli.config.as_deref()).await;
            match action {
                TaskAction::List { owner } => commands::task::list(&state, &owner).await,
                TaskAction::Get { id } => commands::task::get(&state, &id).await,
            }
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
