use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use openxai_deploy::{CONFIG_FILENAME, PipelineOverrides};
use tracing::level_filters::LevelFilter;

/// How records and plans are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// A single `scope.param=value` override given on the command line.
///
/// The value is read as JSON when it parses as such (numbers, arrays, quoted strings),
/// and as a bare string otherwise, so addresses need no quoting.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOverride {
    pub scope: String,
    pub param: String,
    pub value: serde_json::Value,
}

impl FromStr for SetOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected scope.param=value, got '{s}'"))?;
        let (scope, param) = key
            .rsplit_once('.')
            .ok_or_else(|| format!("expected scope.param before '=', got '{key}'"))?;
        if scope.is_empty() || param.is_empty() {
            return Err(format!("empty scope or parameter in '{key}'"));
        }

        // Integers past u64 would degrade to f64; keep their digits for the uint parser.
        let value = match serde_json::from_str::<serde_json::Value>(value) {
            Ok(serde_json::Value::Number(n)) if n.as_u64().is_none() => {
                serde_json::Value::String(value.to_string())
            }
            Ok(parsed) => parsed,
            Err(_) => serde_json::Value::String(value.to_string()),
        };

        Ok(Self {
            scope: scope.to_string(),
            param: param.to_string(),
            value,
        })
    }
}

/// Layer command-line overrides on top of the ones from the configuration file.
pub fn apply_overrides(mut overrides: PipelineOverrides, set: &[SetOverride]) -> PipelineOverrides {
    for item in set {
        overrides
            .entry(item.scope.clone())
            .or_default()
            .insert(item.param.clone(), item.value.clone());
    }
    overrides
}

#[derive(Parser)]
#[command(name = "openxai")]
#[command(
    author,
    version,
    about = "Deploy the OpenxAI contracts as idempotent, recorded pipelines"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(
        short,
        long,
        global = true,
        env = "OPENXAI_VERBOSITY",
        default_value_t = LevelFilter::INFO
    )]
    pub verbosity: LevelFilter,

    /// Path to the configuration file (or a directory containing openxai.toml).
    ///
    /// A missing file is not an error: built-in defaults are used.
    #[arg(
        short,
        long,
        global = true,
        alias = "conf",
        env = "OPENXAI_CONFIG",
        default_value = CONFIG_FILENAME
    )]
    pub config: PathBuf,

    /// The URL of the JSON-RPC endpoint. Overrides `rpc_url` from the configuration.
    #[arg(long, global = true, alias = "rpc")]
    pub rpc_url: Option<String>,

    /// Chain id to use instead of asking the node.
    ///
    /// Lets `--dry-run` and `show` work without a reachable node. A real deployment
    /// checks it against the node's chain id.
    #[arg(long, global = true, env = "OPENXAI_CHAIN_ID")]
    pub chain_id: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy a pipeline, unless its record already exists.
    Deploy {
        /// Name of a built-in or custom pipeline.
        pipeline: String,

        /// Redeploy even if a record exists, replacing it.
        #[arg(long, env = "OPENXAI_REDEPLOY", default_value_t = false)]
        redeploy: bool,

        /// Resolve and print every setting without sending any transaction.
        #[arg(long)]
        dry_run: bool,

        /// Override a setting, e.g. `--set claimer.spendingPeriod=86400`.
        #[arg(long = "set", value_name = "SCOPE.PARAM=VALUE")]
        set: Vec<SetOverride>,

        /// Output format of the record or plan.
        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// List the available pipelines.
    List,

    /// Print the stored record of a pipeline.
    Show {
        pipeline: String,

        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Write a configuration file with default values.
    InitConfig {
        /// Where to write the file.
        #[arg(default_value = CONFIG_FILENAME)]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}
