use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use verba::config::{connect, load_settings};
use verba::error::VerbaError;
use verba::registry::{resolve_config, Env, Registry};
use verba::server::{serve, AppState};
use verba::store;

/// Exit codes: 0 clean shutdown, 1 startup failure, 2 store
/// unreachable, 3 invalid configuration.
const EXIT_STARTUP: i32 = 1;
const EXIT_STORE: i32 = 2;
const EXIT_CONFIG: i32 = 3;

#[derive(Parser)]
#[command(name = "verba", version, about = "RAG orchestration service")]
struct Cli {
    /// Path to a settings file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the API server.
    Start,
    /// Clear persisted state and exit.
    Reset {
        /// What to clear: `config` or `all`.
        #[arg(long, default_value = "config")]
        mode: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("verba=info")),
        )
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(%err, "invalid settings");
            return EXIT_CONFIG;
        }
    };

    let store = match connect(&settings) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(%err, "cannot open the store");
            return EXIT_STORE;
        }
    };
    if !store.is_live().await {
        tracing::error!("store did not answer the liveness probe");
        return EXIT_STORE;
    }

    match cli.command {
        Command::Start => {
            let registry = Arc::new(Registry::with_builtins());
            let env = Env::from_process();

            if let Err(err) = startup(store.as_ref(), &registry, &env).await {
                tracing::error!(%err, "startup failed");
                return match err {
                    VerbaError::Config(_) => EXIT_CONFIG,
                    VerbaError::Store(_) => EXIT_STORE,
                    _ => EXIT_STARTUP,
                };
            }

            let state = Arc::new(AppState {
                store,
                registry,
                env,
                settings,
            });
            if let Err(err) = serve(state).await {
                tracing::error!(%err, "server failed");
                return EXIT_STARTUP;
            }
            0
        }
        Command::Reset { mode } => {
            let outcome = match mode.as_str() {
                "config" => store::delete_config(store.as_ref()).await,
                "all" => store::reset_all(store.as_ref()).await,
                other => Err(VerbaError::Config(format!(
                    "unknown reset mode '{other}' (expected 'config' or 'all')"
                ))),
            };
            match outcome {
                Ok(()) => {
                    tracing::info!(mode, "reset complete");
                    0
                }
                Err(err) => {
                    tracing::error!(%err, "reset failed");
                    EXIT_STARTUP
                }
            }
        }
    }
}

/// Prepare the store: base collections, one chunk collection per
/// reachable embedding model, and a reconciled RAG config.
async fn startup(
    store: &dyn store::VectorStore,
    registry: &Registry,
    env: &Env,
) -> verba::error::Result<()> {
    store::verify_base_collections(store).await?;
    let models = registry.reachable_models(env);
    store::verify_embedding_collections(store, &models).await?;
    resolve_config(store, registry, env).await?;
    Ok(())
}
