use clap::{Parser, Subcommand};
use quorum_core::{ChunkKind, EngineConfig, RunEvent};
use quorum_engine::Run;
use quorum_llm::LlmConfigMap;
use quorum_profile::{default_profiles, ProfileStore, RawProfile};
use quorum_tools::default_registry;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quorum", about = "quorum — multi-agent research runtime")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "quorum.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a research task to completion and print the final report
    Run {
        /// The task to research
        prompt: String,
        /// Stream assistant text to stderr while running
        #[arg(long)]
        stream: bool,
    },
    /// List resolvable agent profiles
    Profiles,
}

#[derive(serde::Deserialize, Default)]
struct QuorumConfig {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    profiles_dir: Option<PathBuf>,
    #[serde(default)]
    llm_configs: HashMap<String, quorum_llm::LlmConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    let profiles = Arc::new(build_profile_store(&config)?);

    match cli.command {
        Commands::Profiles => {
            for name in profiles.names() {
                match profiles.resolve(&name) {
                    Ok(profile) => println!(
                        "  {} ({:?}) — {}",
                        name,
                        profile.profile_type,
                        profile.description_for_human.as_deref().unwrap_or("-")
                    ),
                    Err(e) => println!("  {name} — unresolvable: {e}"),
                }
            }
        }
        Commands::Run { prompt, stream } => {
            if !config.llm_configs.contains_key("default") {
                anyhow::bail!(
                    "no [llm_configs.default] in '{}' — the engine needs at least one endpoint",
                    cli.config.display()
                );
            }
            let engine_config = config.engine.clone().with_env_overrides();
            let llm_configs: LlmConfigMap = config.llm_configs.clone();
            let run = Run::new(
                engine_config,
                profiles,
                Arc::new(default_registry()),
                Arc::new(llm_configs),
            );

            let mut events = run.events().subscribe(4096);
            let printer = tokio::spawn(async move {
                while let Some(envelope) = events.recv().await {
                    match envelope.event {
                        RunEvent::LlmChunk { kind, content, .. } => {
                            if stream && kind == ChunkKind::Content {
                                let mut err = std::io::stderr();
                                let _ = err.write_all(content.as_bytes());
                                let _ = err.flush();
                            }
                        }
                        RunEvent::FlowEnd {
                            agent_id, outcome, ..
                        } => info!(agent_id = %agent_id, outcome = ?outcome, "flow ended"),
                        RunEvent::RunEnd { .. } => break,
                        _ => {}
                    }
                }
            });

            info!(run_id = %run.run_id(), "starting run");
            let result = run.execute(&prompt).await;
            let _ = printer.await;

            match result.final_report {
                Some(report) => println!("{report}"),
                None => println!(
                    "(no report produced; outcome: {:?}{})",
                    result.outcome,
                    result
                        .error
                        .map(|e| format!(", error: {e}"))
                        .unwrap_or_default()
                ),
            }
        }
    }

    Ok(())
}

async fn load_config(path: &PathBuf) -> anyhow::Result<QuorumConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("bad config '{}': {}", path.display(), e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QuorumConfig::default()),
        Err(e) => Err(anyhow::anyhow!("cannot read '{}': {}", path.display(), e)),
    }
}

/// Shipped defaults, overridden by any profiles found on disk.
fn build_profile_store(config: &QuorumConfig) -> anyhow::Result<ProfileStore> {
    let mut raw: HashMap<String, RawProfile> = default_profiles()
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect();
    if let Some(dir) = &config.profiles_dir {
        for (name, profile) in quorum_profile::loader::load_all(dir)? {
            raw.insert(name, profile);
        }
    }
    Ok(ProfileStore::from_raw(raw.into_values()))
}
