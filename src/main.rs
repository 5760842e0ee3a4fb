//! Developer CLI: create projects and drive tools by hand.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;
use vibeforge::store::ProjectStore;
use vibeforge::stream::{ChannelEmitter, ProgressEmitter};
use vibeforge::{Config, ToolExecutor, ToolServices, TOOL_CATALOG_VERSION};

#[derive(Parser, Debug)]
#[command(name = "vibeforge", version, about = "Agent tools and sandbox file sync")]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// List the tool catalog
    Tools {
        /// Print full specs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call one tool for a project and print the call record
    Call {
        project: String,
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    /// Create an empty project
    Create {
        name: String,
        /// Project ID (default: random)
        #[arg(long)]
        id: Option<String>,
    },
    /// Show a project record without file contents
    Show { id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the config JSON Schema
    Schema,
    /// Print the effective config
    Show,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Schema => print_json(&Config::json_schema()),
            ConfigAction::Show => {
                let mut shown = config.clone();
                if shown.sandbox.e2b_api_key.is_some() {
                    shown.sandbox.e2b_api_key = Some("***".to_string());
                }
                println!("{}", toml::to_string_pretty(&shown)?);
                Ok(())
            }
        },

        Commands::Project { action } => {
            let services = ToolServices::from_config(config)?;
            match action {
                ProjectAction::Create { name, id } => {
                    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    let project = services.store.create_project(&id, &name).await?;
                    print_json(&project)
                }
                ProjectAction::Show { id } => {
                    let project = services
                        .store
                        .get_project(&id)
                        .await?
                        .with_context(|| format!("Project not found: {id}"))?;
                    let paths: Vec<&String> = project.files.keys().collect();
                    print_json(&serde_json::json!({
                        "id": project.id,
                        "name": project.name,
                        "sandboxId": project.sandbox_id,
                        "version": project.version,
                        "generationStatus": project.generation_status,
                        "files": paths,
                        "updatedAt": project.updated_at,
                    }))
                }
            }
        }

        Commands::Tools { json } => {
            let services = Arc::new(ToolServices::from_config(config)?);
            let executor = ToolExecutor::new(services, "", None);
            if json {
                print_json(&serde_json::json!({
                    "version": TOOL_CATALOG_VERSION,
                    "tools": executor.specs(),
                }))
            } else {
                println!("Tool catalog v{TOOL_CATALOG_VERSION}");
                for spec in executor.specs() {
                    println!("  {:<24} {}", spec.name, spec.description);
                }
                Ok(())
            }
        }

        Commands::Call {
            project,
            tool,
            args,
        } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let services = Arc::new(ToolServices::from_config(config)?);

            let (channel, mut events) = ChannelEmitter::new();
            let printer = tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if let Ok(line) = serde_json::to_string(&event) {
                        eprintln!("{line}");
                    }
                }
            });

            let observer: Arc<dyn ProgressEmitter> = Arc::new(channel);
            let executor = ToolExecutor::new(services, project, Some(observer));
            let record = executor.call(&tool, args).await;
            drop(executor);
            let _ = printer.await;

            let record = record?;
            print_json(&record)?;
            if !record.result.success {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
