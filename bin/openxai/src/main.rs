//! openxai is a CLI tool to deploy the OpenxAI contracts in a few idempotent steps.

mod cli;

use std::path::Path;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use cli::{Cli, Command, OutputFormat, apply_overrides};
use openxai_deploy::{
    ArtifactStore, CONFIG_FILENAME, Config, DeploymentRecord, FileRecordStore, NetworkContext,
    Orchestrator, Pipeline, Plan, RecordStore, RpcBackend,
};

/// Configuration keys that can be set from `OPENXAI_*` environment variables.
const ENV_KEYS: &[&str] = &["rpc_url", "deployments", "artifacts", "defaults_file", "from"];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::InitConfig { path, force } => init_config(&path, force)?,

        Command::Deploy {
            pipeline,
            redeploy,
            dry_run,
            set,
            format,
        } => {
            let config = load_config(&cli.config, cli.rpc_url.as_deref())?;
            let pipeline = find_pipeline(&config, &pipeline)?;
            let overrides = apply_overrides(config.overrides_for(&pipeline.name), &set);
            let backend = RpcBackend::new(
                config.rpc_url()?,
                ArtifactStore::new(&config.artifacts),
            )?;

            let network = if dry_run {
                match cli.chain_id {
                    Some(chain_id) => NetworkContext {
                        chain_id,
                        deployer: config.from.unwrap_or(Address::ZERO),
                    },
                    None => backend.network_context(config.from).await?,
                }
            } else {
                let network = backend.network_context(config.from).await?;
                if let Some(expected) = cli.chain_id {
                    if expected != network.chain_id {
                        anyhow::bail!(
                            "Node at {} reports chain id {}, expected {}",
                            config.rpc_url,
                            network.chain_id,
                            expected
                        );
                    }
                }
                network
            };

            tracing::info!(
                pipeline = %pipeline.name,
                chain_id = network.chain_id,
                deployer = %network.deployer,
                rpc_url = %config.rpc_url,
                "Loaded network"
            );

            let store = config.record_store(network.chain_id);
            let orchestrator =
                Orchestrator::new(backend, store, network, config.network_defaults()?);

            if dry_run {
                let plan = orchestrator.plan(&pipeline, &overrides).await?;
                print_plan(&plan, format)?;
                return Ok(());
            }

            let record = orchestrator.deploy(&pipeline, &overrides, redeploy).await?;
            print_record(&record, format)?;
        }

        Command::List => {
            let config = load_config(&cli.config, cli.rpc_url.as_deref())?;
            let mut table = Table::new();
            table.set_header(vec!["Pipeline", "Record", "Units", "Actions", "Source"]);
            for pipeline in config.pipelines() {
                table.add_row(vec![
                    pipeline.name.clone(),
                    pipeline.record.clone(),
                    join(pipeline.units.iter().map(|u| u.id.as_str())),
                    join(pipeline.actions.iter().map(|a| a.id.as_str())),
                    if config.is_custom(&pipeline.name) {
                        "custom".to_string()
                    } else {
                        "built-in".to_string()
                    },
                ]);
            }
            println!("{table}");
        }

        Command::Show { pipeline, format } => {
            let config = load_config(&cli.config, cli.rpc_url.as_deref())?;
            let pipeline = find_pipeline(&config, &pipeline)?;
            let chain_id = match cli.chain_id {
                Some(chain_id) => chain_id,
                None => {
                    RpcBackend::new(config.rpc_url()?, ArtifactStore::new(&config.artifacts))?
                        .chain_id()
                        .await
                        .context("Failed to query chain id; pass --chain-id to skip the node")?
                }
            };

            let store: FileRecordStore = config.record_store(chain_id);
            match store.load(&pipeline.record).await? {
                Some(record) => print_record(&record, format)?,
                None => {
                    tracing::warn!(
                        pipeline = %pipeline.name,
                        chain_id,
                        path = %store.root().join(&pipeline.record).display(),
                        "Pipeline has not been deployed on this chain"
                    );
                }
            }
        }
    }

    Ok(())
}

/// Load the configuration: defaults, then the TOML file if present, then `OPENXAI_*`
/// variables, then `--rpc-url`.
fn load_config(path: &Path, rpc_url: Option<&str>) -> Result<Config> {
    let path = if path.is_dir() {
        path.join(CONFIG_FILENAME)
    } else {
        path.to_path_buf()
    };

    if path.exists() {
        tracing::debug!(path = %path.display(), "Loading configuration file");
    } else {
        tracing::debug!(path = %path.display(), "No configuration file, using defaults");
    }

    let mut config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("OPENXAI_").only(ENV_KEYS))
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    if let Some(rpc_url) = rpc_url {
        config.rpc_url = rpc_url.to_string();
    }
    Ok(config)
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save_to_file(path)
}

fn find_pipeline(config: &Config, name: &str) -> Result<Pipeline> {
    config.pipeline(name).with_context(|| {
        let known: Vec<String> = config.pipelines().into_iter().map(|p| p.name).collect();
        format!("Unknown pipeline '{}' (available: {})", name, known.join(", "))
    })
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let items: Vec<&str> = items.collect();
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn print_record(record: &DeploymentRecord, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(record).context("Failed to serialize record")?
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_header(vec!["Key", "Address"]);
            for (key, address) in record.iter() {
                table.add_row(vec![key.to_string(), address.to_checksum(None)]);
            }
            println!("{table}");
        }
    }
    Ok(())
}

fn print_plan(plan: &Plan, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let scopes: serde_json::Map<String, serde_json::Value> = plan
                .scopes
                .iter()
                .map(|scope| {
                    let values = scope
                        .preview
                        .iter()
                        .map(|(name, value)| (name.to_string(), value.to_raw()))
                        .collect::<serde_json::Map<_, _>>();
                    (scope.id.clone(), serde_json::Value::Object(values))
                })
                .collect();
            let plan = serde_json::json!({
                "pipeline": plan.pipeline,
                "chainId": plan.chain_id,
                "scopes": scopes,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_header(vec!["Scope", "Parameter", "Value"]);
            for scope in &plan.scopes {
                for (name, value) in scope.preview.iter() {
                    let shown = match scope.pending_output(name) {
                        Some((unit, output)) => format!("<{unit}.{output}>"),
                        None => value.to_raw().to_string(),
                    };
                    table.add_row(vec![scope.id.clone(), name.to_string(), shown]);
                }
            }
            println!("Plan for `{}` on chain {}", plan.pipeline, plan.chain_id);
            println!("{table}");
        }
    }
    Ok(())
}
