//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use dc_core::config::{self, Settings};

/// Print the config file path
pub fn config_path(path: &Path) -> Result<()> {
    println!("{}", path.display());
    Ok(())
}

/// Get a config value by key
pub fn config_get(path: &Path, key: &str) -> Result<()> {
    if !path.exists() {
        print_error(&format!("Config file not found: {:?}", path));
        print_info("Run 'devconnect config init' to create one");
        return Ok(());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let table: toml::Table =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    let value = match table.get(key) {
        Some(v) => v,
        None => {
            print_error(&format!("Key not found: {}", key));
            return Ok(());
        }
    };

    match value {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Integer(i) => println!("{}", i),
        toml::Value::Float(f) => println!("{}", f),
        toml::Value::Boolean(b) => println!("{}", b),
        other => println!("{}", other),
    }

    Ok(())
}

/// Set a config value by key
///
/// The result has to deserialize as [`Settings`] before it is written.
pub fn config_set(path: &Path, key: &str, value: &str) -> Result<()> {
    if !path.exists() {
        print_info("Creating default configuration...");
        config_init(path, false)?;
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut table: toml::Table =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    let toml_value = if value == "true" {
        toml::Value::Boolean(true)
    } else if value == "false" {
        toml::Value::Boolean(false)
    } else if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else {
        toml::Value::String(value.to_string())
    };
    table.insert(key.to_string(), toml_value);

    let new_content = toml::to_string_pretty(&table)?;
    let settings: Settings = toml::from_str(&new_content)
        .with_context(|| format!("Invalid value for {}: {}", key, value))?;
    if let Err(e) = settings.validate() {
        print_warning(&format!("Settings will not pass validation: {}", e));
    }

    std::fs::write(path, new_content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Show current configuration
pub fn config_show(path: &Path) -> Result<()> {
    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'devconnect config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    println!("{}", content);

    Ok(())
}

/// Write the default configuration
pub fn config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(path, &Settings::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Created configuration file: {:?}", path));
    print_info("The ssh configuration needs a 'Host devcloud' entry with your user name");

    Ok(())
}
