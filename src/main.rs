//! Merge buffer admin CLI
//!
//! Inspects and manipulates a merge buffer living in Redis. Each command
//! prints one JSON line on stdout; logs go to stderr.
//!
//! ```text
//! merge-buffer [--config FILE] <command> [group]
//!
//!   groups          list active merge groups
//!   size GROUP      number of queued messages
//!   time GROUP      scheduled flush time
//!   peek GROUP      queued messages, newest first
//!   drain GROUP     take and clear the queued messages
//!   cancel GROUP    discard the group and its lock
//!   purge           delete every key in the namespace
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | MERGE_BUFFER_CONFIG | - | TOML config file (overridden by --config) |
//! | MERGE_BUFFER_* | - | see `merge_buffer::config` |
//! | MERGE_BUFFER_LOG_FORMAT | text | `text` or `json` |

use merge_buffer::observability::{init_logging, LogFormat};
use merge_buffer::{
    InMemoryStore, MergeBuffer, MergeBufferConfig, MergeError, MergeStore, RedisStore, StoreKind,
};
use serde_json::{json, Value};
use tracing::{info, warn};

const USAGE: &str = "usage: merge-buffer [--config FILE] <groups|size|time|peek|drain|cancel|purge> [GROUP]";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Groups,
    Size(String),
    Time(String),
    Peek(String),
    Drain(String),
    Cancel(String),
    Purge,
}

#[derive(Debug)]
struct Args {
    config_path: Option<String>,
    command: Command,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut config_path = std::env::var("MERGE_BUFFER_CONFIG").ok();
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config_path = Some(args.next().ok_or("--config needs a file")?);
            }
            "--help" | "-h" => return Err(USAGE.to_string()),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let name = positional.next().ok_or_else(|| USAGE.to_string())?;
    let mut group = || {
        positional
            .next()
            .ok_or_else(|| format!("'{}' needs a group key\n{}", name, USAGE))
    };

    let command = match name.as_str() {
        "groups" => Command::Groups,
        "size" => Command::Size(group()?),
        "time" => Command::Time(group()?),
        "peek" => Command::Peek(group()?),
        "drain" => Command::Drain(group()?),
        "cancel" => Command::Cancel(group()?),
        "purge" => Command::Purge,
        other => return Err(format!("unknown command '{}'\n{}", other, USAGE)),
    };

    Ok(Args {
        config_path,
        command,
    })
}

async fn run<S: MergeStore>(buffer: &MergeBuffer<S>, command: Command) -> Result<Value, MergeError> {
    Ok(match command {
        Command::Groups => json!({ "groups": buffer.active_groups().await? }),
        Command::Size(group) => {
            let size = buffer.size(&group).await?;
            json!({ "group": group, "size": size })
        }
        Command::Time(group) => {
            let time = buffer.scheduled_time(&group).await?;
            json!({ "group": group, "scheduled_time": time })
        }
        Command::Peek(group) => {
            let messages: Vec<Value> = buffer.peek(&group).await?;
            json!({ "group": group, "messages": messages })
        }
        Command::Drain(group) => {
            let messages: Vec<Value> = buffer.drain(&group).await?;
            json!({ "group": group, "messages": messages })
        }
        Command::Cancel(group) => {
            buffer.cancel(&group).await?;
            json!({ "group": group, "canceled": true })
        }
        Command::Purge => json!({ "deleted": buffer.purge().await? }),
    })
}

fn load_config(path: Option<&str>) -> Result<MergeBufferConfig, Box<dyn std::error::Error>> {
    let base = match path {
        Some(path) => MergeBufferConfig::from_file(path)?,
        None => MergeBufferConfig::default(),
    };
    Ok(base.with_overrides(|name| std::env::var(name).ok())?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::from_env());

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(2);
        }
    };
    let config = load_config(args.config_path.as_deref())?;
    info!(namespace = %config.namespace, store = ?config.store.kind, "merge-buffer admin");

    let output = match config.store.kind {
        StoreKind::Redis => {
            let store = RedisStore::connect(&config.store.redis_url).await?;
            run(&MergeBuffer::new(store, &config)?, args.command).await?
        }
        StoreKind::Memory => {
            warn!("memory store is process-local; nothing is shared with other processes");
            run(&MergeBuffer::new(InMemoryStore::new(), &config)?, args.command).await?
        }
    };

    println!("{}", output);
    Ok(())
}
