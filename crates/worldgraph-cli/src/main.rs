//! `worldgraph`: drive the data plane from the command line.
//!
//! Results are printed as JSON on stdout; logs go to stderr and are filtered
//! by `WORLDGRAPH_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use worldgraph_core::{Actor, WorldgraphConfig};
use worldgraph_dataplane::{features, DataPlane};
use worldgraph_index::SearchOptions;

#[derive(Parser)]
#[command(name = "worldgraph")]
#[command(author, version, about = "Worldgraph: per-tenant graph worlds with hybrid search")]
struct Cli {
    /// Configuration file (JSON). Missing file means defaults.
    #[arg(long, env = "WORLDGRAPH_CONFIG", default_value = "worldgraph.json")]
    config: PathBuf,

    #[command(flatten)]
    actor: ActorArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ActorArgs {
    /// Calling actor id.
    #[arg(long, env = "WORLDGRAPH_ACTOR", default_value = "local")]
    actor: String,

    /// Tenant the actor acts for. When it differs from `--actor`, the actor is
    /// a service account of that tenant.
    #[arg(long, env = "WORLDGRAPH_TENANT")]
    tenant: Option<String>,
}

impl ActorArgs {
    fn actor(&self) -> Actor {
        match &self.tenant {
            Some(tenant) if tenant != &self.actor => Actor::service_account(&self.actor, tenant),
            _ => Actor::tenant(&self.actor),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create, inspect and delete worlds.
    World {
        #[command(subcommand)]
        command: WorldCommands,
    },

    /// Apply a SPARQL update (`INSERT DATA` / `DELETE DATA`) to a world.
    Update {
        world: String,
        /// Update text. Use `--file` to read it from disk instead.
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Run a SPARQL query against a world.
    Query { world: String, text: String },

    /// Hybrid search over one world or every world of the tenant.
    Search {
        text: String,
        #[arg(long, conflicts_with = "all_worlds", required_unless_present = "all_worlds")]
        world: Option<String>,
        #[arg(long)]
        all_worlds: bool,
        #[arg(long)]
        limit: Option<usize>,
        /// Only facts with exactly this subject IRI.
        #[arg(long)]
        subject: Option<String>,
        /// Only facts with exactly this predicate IRI.
        #[arg(long)]
        predicate: Option<String>,
    },

    /// Usage totals and current rate-limit state for the calling actor.
    Usage {
        /// Look-back window.
        #[arg(long, default_value_t = 24)]
        since_hours: i64,
    },
}

#[derive(Subcommand)]
enum WorldCommands {
    Create {
        id: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Get {
        id: String,
    },
    List,
    Delete {
        id: String,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("WORLDGRAPH_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct UsageReport {
    actor_id: String,
    since: chrono::DateTime<chrono::Utc>,
    totals: std::collections::BTreeMap<String, u64>,
    rate_limits: std::collections::BTreeMap<String, worldgraph_core::Admission>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = WorldgraphConfig::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    let plane = DataPlane::from_config(&config).context("failed to start data plane")?;
    let actor = cli.actor.actor();

    let result = run(&plane, &actor, cli.command).await;
    plane.shutdown().await;
    result
}

async fn run(plane: &DataPlane, actor: &Actor, command: Commands) -> Result<()> {
    match command {
        Commands::World { command } => match command {
            WorldCommands::Create {
                id,
                label,
                description,
            } => {
                let label = label.unwrap_or_else(|| id.clone());
                let created = plane
                    .create_world(actor, &id, &label, description.as_deref())
                    .await
                    .with_context(|| format!("failed to create world {id}"))?;
                print_json(&created)?;
            }
            WorldCommands::Get { id } => print_json(&plane.get_world(actor, &id)?)?,
            WorldCommands::List => print_json(&plane.list_worlds(actor)?)?,
            WorldCommands::Delete { id } => {
                let report = plane
                    .delete_world(actor, &id)
                    .await
                    .with_context(|| format!("failed to delete world {id}"))?;
                print_json(&report)?;
            }
        },
        Commands::Update { world, text, file } => {
            let text = match (text, file) {
                (Some(text), None) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                _ => bail!("pass the update text or --file, not both"),
            };
            let outcome = plane.update(actor, &world, &text).await?;
            if let Some(reason) = &outcome.degraded {
                tracing::warn!(world_id = %world, reason = %reason, "update committed with a degraded index");
            }
            print_json(&outcome)?;
        }
        Commands::Query { world, text } => print_json(&plane.query(actor, &world, &text).await?)?,
        Commands::Search {
            text,
            world,
            all_worlds,
            limit,
            subject,
            predicate,
        } => {
            let options = SearchOptions {
                limit,
                subject,
                predicate,
            };
            let hits = match world {
                Some(world) if !all_worlds => plane.search(actor, &world, &text, &options).await?,
                _ => plane.search_tenant(actor, &text, &options).await?,
            };
            print_json(&hits)?;
        }
        Commands::Usage { since_hours } => {
            let Some(since) = chrono::Duration::try_hours(since_hours.max(0))
                .and_then(|window| chrono::Utc::now().checked_sub_signed(window))
            else {
                bail!("--since-hours {since_hours} is out of range");
            };
            let totals = plane.usage(actor, since).await?;
            let mut rate_limits = std::collections::BTreeMap::new();
            for feature in features::ALL {
                if let Some(admission) = plane.peek_admission(actor, feature)? {
                    rate_limits.insert(feature.to_string(), admission);
                }
            }
            print_json(&UsageReport {
                actor_id: actor.id.clone(),
                since,
                totals,
                rate_limits,
            })?;
        }
    }
    Ok(())
}
