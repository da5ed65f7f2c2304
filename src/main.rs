//! Pentastore CLI
//!
//! Runs one datastore operation against a JSON-file backed table and prints
//! the outcome as JSON on stdout. Logs go to stderr.
//!
//! ```text
//! pentastore add '[1,"X","K","K",1]' '"a"'
//! pentastore get '[1]'
//! pentastore --ctrl '{"trap_l4":true}' drop-multi '{"1":{"X":"*"}}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{debug, Level as LogLevel};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pentastore::error::{Error, Result};
use pentastore::{Ctrl, Datastore, DatastoreConfig, FileStore, Level};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pentastore - five-level keyed datastore
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "PENTASTORE_CONFIG")]
    config: Option<PathBuf>,

    /// JSON document holding the table
    #[arg(long, env = "PENTASTORE_DATA", default_value = "pentastore.json")]
    data: PathBuf,

    /// Control map applied to the operation, e.g. '{"mode":"matrix"}'
    #[arg(long, global = true)]
    ctrl: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch subtrees (request keyed from L5) or one node (--path)
    Get {
        /// Request tree or set of L5 keys
        #[arg(required_unless_present = "path")]
        request: Option<String>,
        /// Key path from L5, e.g. '[1,"X"]'
        #[arg(long, conflicts_with = "request")]
        path: Option<String>,
    },
    /// Insert one new leaf
    Add {
        /// Full key, e.g. '[1,"X","K","K",1]'
        key: String,
        /// Payload
        payload: String,
    },
    /// Insert new leaves below a prefix
    AddMulti {
        #[arg(value_parser = parse_level)]
        level: Level,
        prefix: String,
        children: String,
    },
    /// Insert or overwrite leaves below a prefix
    SetMulti {
        #[arg(value_parser = parse_level)]
        level: Level,
        prefix: String,
        children: String,
    },
    /// Remove one node
    Drop {
        #[arg(value_parser = parse_level)]
        level: Level,
        path: String,
    },
    /// Remove every node named by a drop request
    DropMulti { targets: String },
    /// Replace everything below a prefix
    Replace {
        #[arg(value_parser = parse_level)]
        level: Level,
        prefix: String,
        children: String,
    },
    /// List the children of a node
    Children {
        #[arg(default_value = "[]")]
        path: String,
    },
    /// Remove every row
    Truncate,
    /// Print cache metrics for this invocation (Prometheus text format)
    Stats,
}

fn parse_level(s: &str) -> std::result::Result<Level, String> {
    s.parse::<Level>().map_err(|e| e.to_string())
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => DatastoreConfig::load(path)?,
        None => DatastoreConfig::default(),
    };
    debug!(?config, data = %args.data.display(), "Configuration loaded");

    let store = Arc::new(FileStore::open(&args.data)?);
    let mut datastore = Datastore::from_config(&config, store)?;
    let ctrl = match &args.ctrl {
        Some(text) => Ctrl::from_value(&parse_json(text)?)?,
        None => Ctrl::default(),
    };

    let output = run(&mut datastore, args.command, &ctrl)?;
    println!("{}", output);
    Ok(())
}

fn run(datastore: &mut Datastore, command: Command, ctrl: &Ctrl) -> Result<String> {
    let value = match command {
        Command::Get { request: Some(request), .. } => {
            let (result, valid) = datastore.get_multi(&parse_json(&request)?, ctrl)?;
            json!({ "result": result, "valid": valid })
        }
        Command::Get { path, .. } => {
            let path = parse_keys(path.as_deref().unwrap_or("[]"))?;
            datastore.get(&path, ctrl)?.ok_or_else(|| Error::NotFound {
                path: Value::Array(path.clone()).to_string(),
            })?
        }
        Command::Add { key, payload } => {
            let written = datastore.add(&parse_keys(&key)?, parse_json(&payload)?, ctrl)?;
            json!({ "written": written })
        }
        Command::AddMulti { level, prefix, children } => {
            let (prefix, children) = (parse_keys(&prefix)?, parse_json(&children)?);
            let written = datastore.add_multi(level, &prefix, &children, ctrl)?;
            json!({ "written": written })
        }
        Command::SetMulti { level, prefix, children } => {
            let (prefix, children) = (parse_keys(&prefix)?, parse_json(&children)?);
            let written = datastore.set_multi(level, &prefix, &children, ctrl)?;
            json!({ "written": written })
        }
        Command::Drop { level, path } => {
            let deleted = datastore.drop(level, &parse_keys(&path)?, ctrl)?;
            json!({ "deleted": deleted })
        }
        Command::DropMulti { targets } => {
            let deleted = datastore.drop_multi(&parse_json(&targets)?, ctrl)?;
            json!({ "deleted": deleted })
        }
        Command::Replace { level, prefix, children } => {
            let (prefix, children) = (parse_keys(&prefix)?, parse_json(&children)?);
            let affected = datastore.replace_multi(level, &prefix, &children, ctrl)?;
            json!({ "affected": affected })
        }
        Command::Children { path } => {
            Value::Array(datastore.children(&parse_keys(&path)?, ctrl)?)
        }
        Command::Truncate => {
            let flushed = datastore.truncate()?;
            json!({ "truncated": true, "cache_flushed": flushed })
        }
        Command::Stats => return datastore.metrics().to_prometheus(),
    };
    Ok(serde_json::to_string_pretty(&value)?)
}

fn parse_json(text: &str) -> Result<Value> {
    Ok(serde_json::from_str(text)?)
}

fn parse_keys(text: &str) -> Result<Vec<Value>> {
    match parse_json(text)? {
        Value::Array(keys) => Ok(keys),
        other => Err(Error::invalid_key(format!(
            "expected a JSON array of keys, got {}",
            other
        ))),
    }
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => LogLevel::TRACE,
        "debug" => LogLevel::DEBUG,
        "info" => LogLevel::INFO,
        "warn" => LogLevel::WARN,
        "error" => LogLevel::ERROR,
        _ => LogLevel::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "pentastore",
            "--data",
            "t.json",
            "add-multi",
            "l2",
            r#"[1,"X","K"]"#,
            r#"{"K":{"1":"a"}}"#,
        ])
        .unwrap();
        assert_matches::assert_matches!(args.command, Command::AddMulti { level: Level::L2, .. });
    }

    #[test]
    fn test_get_needs_request_or_path() {
        assert!(Args::try_parse_from(["pentastore", "get"]).is_err());
        assert!(Args::try_parse_from(["pentastore", "get", "--path", "[1]"]).is_ok());
    }

    #[test]
    fn test_run_round() {
        let mut datastore = Datastore::in_memory();
        let ctrl = Ctrl::default();
        let added = run(
            &mut datastore,
            Command::Add {
                key: r#"[1,"X","K","K",1]"#.into(),
                payload: r#""a""#.into(),
            },
            &ctrl,
        )
        .unwrap();
        assert!(added.contains("\"written\": 1"));

        let missing = run(
            &mut datastore,
            Command::Get {
                request: None,
                path: Some(r#"[1,"Q"]"#.into()),
            },
            &ctrl,
        );
        assert!(matches!(missing, Err(Error::NotFound { .. })));

        let empty_page = run(
            &mut datastore,
            Command::Get {
                request: None,
                path: Some("[9]".into()),
            },
            &ctrl,
        );
        assert!(matches!(empty_page, Err(Error::NotFound { .. })));

        let stats = run(&mut datastore, Command::Stats, &ctrl).unwrap();
        assert!(stats.contains("pentastore_storage_writes_total 1"));
    }

    #[test]
    fn test_parse_keys_requires_array() {
        assert!(parse_keys("[1]").is_ok());
        assert!(parse_keys("1").is_err());
        assert!(parse_keys("[1").is_err());
    }
}
