use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use jsonmaker_api::{JsonMakerApi, StorageLayout};
use jsonmaker_core::{SaveGraphRequest, SaveTopicsRequest};
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "jm")]
#[command(about = "JsonMaker data and backup CLI")]
struct Cli {
    #[arg(long, env = "JSONMAKER_DATA_DIR", default_value = "./json_data")]
    data_dir: PathBuf,

    #[arg(long, env = "JSONMAKER_BACKUPS_DIR", default_value = "./backups")]
    backups_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Save topics from a JSON file shaped like the `/sync` request body.
    Sync(InputArgs),
    /// Print the restored topic dataset.
    Restore,
    Graph {
        #[command(subcommand)]
        command: GraphCommand,
    },
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
}

#[derive(Debug, Subcommand)]
enum GraphCommand {
    Sync(InputArgs),
    Show,
}

#[derive(Debug, Subcommand)]
enum BackupCommand {
    Create,
    List,
}

#[derive(Debug, Args)]
struct InputArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn read_input<T: serde::de::DeserializeOwned>(args: &InputArgs) -> Result<T> {
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read input file {}", args.input.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse input file {}", args.input.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = JsonMakerApi::new(&StorageLayout::new(cli.data_dir, cli.backups_dir));
    match cli.command {
        Command::Sync(args) => {
            let request: SaveTopicsRequest = read_input(&args)?;
            emit_json(serde_json::to_value(api.save_topics(&request)?)?)
        }
        Command::Restore => emit_json(serde_json::to_value(api.restore_topics()?)?),
        Command::Graph { command } => run_graph(command, &api),
        Command::Backup { command } => run_backup(command, &api),
    }
}

fn run_graph(command: GraphCommand, api: &JsonMakerApi) -> Result<()> {
    match command {
        GraphCommand::Sync(args) => {
            let request: SaveGraphRequest = read_input(&args)?;
            emit_json(serde_json::to_value(api.save_graph(request)?)?)
        }
        GraphCommand::Show => emit_json(serde_json::to_value(api.restore_graph()?)?),
    }
}

fn run_backup(command: BackupCommand, api: &JsonMakerApi) -> Result<()> {
    match command {
        BackupCommand::Create => emit_json(serde_json::to_value(api.create_backup()?)?),
        BackupCommand::List => emit_json(serde_json::to_value(api.list_backups())?),
    }
}
