use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use flowsync::flows::Graph;
use flowsync::flows::reconciler::{SaveOutcome, SaveRequest};
use flowsync::flows::registry::ListingScope;
use flowsync::{Config, FlowSession};

#[derive(Parser)]
#[command(name = "flowsync", about = "Load and save pentest checklist flows")]
enum Cli {
    /// List system flows and a user's own flows
    Flows {
        #[arg(long)]
        user: String,
        /// Include the user's unshared flows
        #[arg(long)]
        authored: bool,
    },
    /// Print a flow and its graph
    Show { flow_id: String },
    /// Create an empty flow
    New {
        #[arg(long)]
        user: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Save a draft graph from a JSON file
    Save {
        #[arg(long)]
        user: String,
        #[arg(long)]
        file: PathBuf,
        /// Existing flow to save into; a new flow is created when omitted
        #[arg(long)]
        flow: Option<String>,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowsync=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_writer(std::io::stderr)
                .with_targets(true)
                .with_bracketed_fields(false),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let session = FlowSession::connect(&config).context("failed to connect to record store")?;

    let output = match cli {
        Cli::Flows { user, authored } => {
            let scope = if authored {
                ListingScope::Authored
            } else {
                ListingScope::Visible
            };
            let listing = session
                .registry
                .list_flows(&user, scope)
                .await
                .with_context(|| format!("failed to list flows for {user}"))?;
            serde_json::to_value(listing)?
        }
        Cli::Show { flow_id } => {
            let doc = session
                .loader
                .load(&flow_id)
                .await
                .with_context(|| format!("failed to load flow {flow_id}"))?;
            serde_json::to_value(doc)?
        }
        Cli::New {
            user,
            title,
            description,
        } => {
            let flow = session
                .registry
                .create_flow(&user, &title, &description)
                .await
                .context("failed to create flow")?;
            serde_json::to_value(flow)?
        }
        Cli::Save {
            user,
            file,
            flow,
            title,
            description,
        } => {
            let graph = read_draft(&file)?;
            let flow_id = flow.or_else(|| graph.flow_id.clone());
            let outcome = session
                .engine
                .save(SaveRequest {
                    flow_id,
                    title,
                    description,
                    owner_id: user,
                    graph,
                })
                .await
                .context("failed to save flow")?;
            outcome_json(&outcome)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_draft(path: &Path) -> Result<Graph> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read draft {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid draft graph in {}", path.display()))
}

fn outcome_json(outcome: &SaveOutcome) -> Result<serde_json::Value> {
    let warnings: Vec<String> = outcome.warnings.iter().map(ToString::to_string).collect();
    Ok(json!({
        "flow_id": outcome.flow_id,
        "node_ids": outcome.node_ids,
        "edge_ids": outcome.edge_ids,
        "warnings": warnings,
        "stats": {
            "created": outcome.stats.created,
            "updated": outcome.stats.updated,
            "deleted": outcome.stats.deleted,
        },
        "graph": serde_json::to_value(&outcome.graph)?,
    }))
}
