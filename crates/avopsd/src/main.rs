//! AVOps Copilot daemon and admin CLI

mod cli;

use anyhow::{Context, Result};
use avops_common::{CopilotDb, KnowledgeIndex, NewTelemetrySample};
use avopsd::config::Config;
use avopsd::orchestrator::retrieve;
use avopsd::routes::CopilotRunResponse;
use avopsd::server::{self, AppState};
use clap::Parser;
use cli::{Cli, Commands, ConfigCommands, KbCommands, TelemetryCommands};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Config {
        action: ConfigCommands::Init { path },
    } = &cli.command
    {
        return Config::save_default(path);
    }

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            info!("AVOps Copilot v{} starting", env!("CARGO_PKG_VERSION"));
            let bind_addr = config.server.bind_addr.clone();
            let state = AppState::from_config(&config).await?;
            server::run(state, &bind_addr).await
        }

        Commands::Run { task, user } => {
            let state = AppState::from_config(&config).await?;
            let user_id = user.unwrap_or(config.server.default_user_id);
            let run = state.engine.run(user_id, &task).await?;
            print_json(&CopilotRunResponse::from(run))
        }

        Commands::Runs { user, limit, offset } => {
            let db = open_db(&config).await?;
            let user_id = user.unwrap_or(config.server.default_user_id);
            let runs = db.list_runs(user_id, limit, offset).await?;
            let items: Vec<CopilotRunResponse> =
                runs.into_iter().map(CopilotRunResponse::from).collect();
            print_json(&items)
        }

        Commands::Kb { action } => {
            let index = KnowledgeIndex::open_with_path(&config.storage.database_path).await?;
            match action {
                KbCommands::Seed => {
                    let inserted = index.seed_defaults().await?;
                    println!("Seeded {} article(s)", inserted);
                }
                KbCommands::Add { title, source, file } => {
                    let body = tokio::fs::read_to_string(&file)
                        .await
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    let id = index.add_document(&title, source.as_deref(), &body).await?;
                    println!("Indexed article {}", id);
                }
                KbCommands::Show { id } => {
                    let doc = index
                        .get_document(id)
                        .await?
                        .with_context(|| format!("No article with id {}", id))?;
                    print_json(&doc)?;
                }
                KbCommands::Search { query, limit } => {
                    let hits = retrieve(&index, &query, limit).await;
                    print_json(&hits)?;
                }
            }
            Ok(())
        }

        Commands::Telemetry {
            action:
                TelemetryCommands::Record {
                    device,
                    temperature,
                    packet_loss,
                    audio_dropouts,
                    error_code,
                },
        } => {
            let db = open_db(&config).await?;
            let sample = db
                .insert_telemetry(NewTelemetrySample {
                    device_id: device,
                    temperature,
                    packet_loss,
                    audio_dropouts,
                    error_code,
                })
                .await?;
            print_json(&sample)
        }

        Commands::Config { action } => match action {
            ConfigCommands::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigCommands::Init { .. } => Ok(()),
        },
    }
}

async fn open_db(config: &Config) -> Result<CopilotDb> {
    CopilotDb::open_with_path(&config.storage.database_path).await
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
