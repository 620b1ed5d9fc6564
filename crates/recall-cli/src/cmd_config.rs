use std::path::Path;

use clap::Subcommand;
use recall_store::{RecallConfig, RecallPaths};

// ── CLI Schema ──

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Set a config value
    Set {
        /// Config key (e.g. decay_after_days)
        key: String,
        /// Config value (true/false/number/string)
        value: String,
    },
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },
    /// List config values, including defaults
    List,
    /// Remove a key, restoring its default
    Unset {
        /// Config key
        key: String,
    },
}

// ── Dispatch ──

pub fn run(cmd: ConfigCmd, paths: &RecallPaths) -> anyhow::Result<()> {
    match cmd {
        ConfigCmd::Set { key, value } => set(&paths.config_json, &key, &value),
        ConfigCmd::Get { key } => get(&paths.config_json, &key),
        ConfigCmd::List => list(&paths.config_json),
        ConfigCmd::Unset { key } => unset(&paths.config_json, &key),
    }
}

// ── Command Implementations ──

/// Read `config.json` as a raw map. Returns an empty map if the file doesn't exist.
fn read_config(path: &Path) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    if !path.exists() {
        return Ok(serde_json::Map::new());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }
    let val: serde_json::Value = serde_json::from_str(&content)?;
    match val {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}

/// Validate against [`RecallConfig`], then write atomically.
fn write_config(
    path: &Path,
    config: &serde_json::Map<String, serde_json::Value>,
) -> anyhow::Result<()> {
    serde_json::from_value::<RecallConfig>(serde_json::Value::Object(config.clone()))
        .map_err(|e| anyhow::anyhow!("invalid config value: {e}"))?;
    let json = serde_json::to_string_pretty(&config)?;
    recall_store::write_atomic(path, json.as_bytes())
}

/// Keys `RecallConfig` understands.
fn known_keys() -> anyhow::Result<Vec<String>> {
    match serde_json::to_value(RecallConfig::default())? {
        serde_json::Value::Object(map) => Ok(map.keys().cloned().collect()),
        _ => Ok(Vec::new()),
    }
}

/// Parse a string value into an appropriate JSON value (bool/number/string).
fn parse_value(s: &str) -> serde_json::Value {
    match s {
        "true" => serde_json::Value::Bool(true),
        "false" => serde_json::Value::Bool(false),
        "null" => serde_json::Value::Null,
        _ => {
            if let Ok(n) = s.parse::<u64>() {
                serde_json::Value::Number(n.into())
            } else if let Ok(n) = s.parse::<i64>() {
                serde_json::Value::Number(n.into())
            } else {
                serde_json::Value::String(s.to_string())
            }
        }
    }
}

/// `recall config set <key> <value>`
pub fn set(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    if !known_keys()?.iter().any(|k| k == key) {
        anyhow::bail!("unknown config key: {key}");
    }
    let mut config = read_config(path)?;
    config.insert(key.to_string(), parse_value(value));
    write_config(path, &config)?;
    println!("{key} = {value}");
    Ok(())
}

/// `recall config get <key>`
pub fn get(path: &Path, key: &str) -> anyhow::Result<()> {
    let config = read_config(path)?;
    match config.get(key) {
        Some(val) => println!("{val}"),
        None => match effective(path)?.get(key) {
            Some(val) => println!("{val} (default)"),
            None => println!("(not set)"),
        },
    }
    Ok(())
}

/// `recall config list`
pub fn list(path: &Path) -> anyhow::Result<()> {
    let file = read_config(path)?;
    for (k, v) in effective(path)? {
        let marker = if file.contains_key(&k) { "" } else { "  (default)" };
        println!("{k} = {v}{marker}");
    }
    Ok(())
}

/// `recall config unset <key>`
pub fn unset(path: &Path, key: &str) -> anyhow::Result<()> {
    let mut config = read_config(path)?;
    if config.remove(key).is_none() {
        println!("{key} was not set");
        return Ok(());
    }
    write_config(path, &config)?;
    println!("{key} unset");
    Ok(())
}

/// The configuration in effect (file merged over defaults, env overrides
/// applied), as a JSON map.
fn effective(path: &Path) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let config = RecallConfig::load_with_env(path)?;
    match serde_json::to_value(config)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}
