//! Configuration file handling.
//!
//! Adapted from the teacher's `config.rs`: same `~/.config/<name>/config.toml`
//! layout and `serde`+`toml`+`dirs` stack, generalized to the
//! `[ignore]`/`[defaults]`/`[limits]` schema SPEC_FULL.md §B.3 defines (the
//! teacher's tar/symlink-specific `format`/`dereference`/`preserve_owner`
//! fields are dropped; extraction's safety caps live here as `[limits]`).

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file structure.
///
/// Located at `~/.config/zipcraft/config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ignore: IgnoreConfig,
    pub defaults: DefaultsConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Patterns to always exclude, regardless of `.zipignore` files.
    pub always_exclude: Vec<String>,

    /// Patterns to always include (force include).
    pub always_include: Vec<String>,
}

/// Default exclusions that almost nobody wants in an archive.
const DEFAULT_ALWAYS_EXCLUDE: &[&str] = &[".git/**", ".hg/**", ".svn/**"];

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            always_exclude: DEFAULT_ALWAYS_EXCLUDE
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            always_include: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Compression level, 0 (store) through 9 (best).
    pub compression_level: i64,
    /// Worker count for Phase B; 0 means auto (`hw_parallelism`, capped 16).
    pub workers: usize,
    /// Zero out timestamps for bit-identical archives across runs.
    pub reproducible: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            compression_level: 6,
            workers: 0,
            reproducible: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_extract_entries: u64,
    pub max_extract_bytes: u64,
    pub max_compression_ratio: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let defaults = crate::extract::ExtractLimits::default();
        Self {
            max_extract_entries: defaults.max_entries,
            max_extract_bytes: defaults.max_total_bytes,
            max_compression_ratio: defaults.max_compression_ratio,
        }
    }
}

impl LimitsConfig {
    #[must_use]
    pub const fn to_extract_limits(&self) -> crate::extract::ExtractLimits {
        crate::extract::ExtractLimits {
            max_entries: self.max_extract_entries,
            max_total_bytes: self.max_extract_bytes,
            max_compression_ratio: self.max_compression_ratio,
        }
    }
}

/// Returns the path to the config file.
/// Always uses ~/.config/zipcraft/config.toml for consistency across platforms.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|d| d.join(".config").join("zipcraft").join("config.toml"))
}

/// Check if config file exists.
pub fn config_exists() -> bool {
    config_path().is_some_and(|p| p.exists())
}

/// Loads the config file, returning defaults if not found.
pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };

    if !path.exists() {
        return Config::default();
    }

    fs::read_to_string(&path).map_or_else(
        |_| Config::default(),
        |contents| toml::from_str(&contents).unwrap_or_default(),
    )
}

/// Creates a default config file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_path().context("Could not determine config directory")?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let default_config = r#"# zipcraft configuration
# Location: ~/.config/zipcraft/config.toml

[ignore]
# Patterns to ALWAYS exclude, regardless of .zipignore files.
# Uses gitignore syntax. Use ** to match directory contents.
always_exclude = [
    ".git/**",
    ".hg/**",
    ".svn/**",
    ".idea/**",
    ".vscode/**",
    "*.swp",
    ".DS_Store",
    "Thumbs.db",
]

# Patterns to ALWAYS include (force include), overriding always_exclude.
# always_include = ["important.log"]

[defaults]
# 0 = store only, 9 = best compression
compression_level = 6

# 0 = auto (hardware parallelism, capped at 16)
workers = 0

# Zero out timestamps so identical inputs produce byte-identical archives
reproducible = false

[limits]
max_extract_entries = 100000
max_extract_bytes = 17179869184   # 16 GiB
max_compression_ratio = 1000
"#;

    fs::write(&path, default_config)?;
    Ok(path)
}

/// Opens config file in $EDITOR, creating it first if needed.
pub fn edit_config() -> Result<PathBuf> {
    let path = config_path().context("Could not determine config directory")?;

    if !path.exists() {
        init_config()?;
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| "vi".to_string());

    std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("Failed to open editor: {editor}"))?;

    Ok(path)
}

/// Shows current config.
pub fn show_config(config: &Config) {
    let path = config_path();

    println!("{}", "zipcraft configuration".bold());
    println!();

    if let Some(ref p) = path {
        if p.exists() {
            println!("Config file: {}", p.display().to_string().green());
        } else {
            println!("Config file: {} {}", p.display(), "(not created)".dimmed());
            println!("  Run {} to create and edit", "zipcraft --edit-config".cyan());
        }
    } else {
        println!("Config file: {}", "not available".yellow());
    }

    println!();
    println!("{}", "Current settings:".bold());

    if config.ignore.always_exclude.is_empty() {
        println!(
            "  ignore.always_exclude: {} (no extra exclusions)",
            "[]".dimmed()
        );
    } else {
        println!(
            "  ignore.always_exclude: {} patterns",
            config.ignore.always_exclude.len()
        );
        for pattern in &config.ignore.always_exclude {
            println!("    {}", pattern.dimmed());
        }
    }

    if config.ignore.always_include.is_empty() {
        println!(
            "  ignore.always_include: {} (no force-includes)",
            "[]".dimmed()
        );
    } else {
        println!(
            "  ignore.always_include: {} patterns",
            config.ignore.always_include.len()
        );
        for pattern in &config.ignore.always_include {
            println!("    {}", pattern.dimmed());
        }
    }

    println!(
        "  defaults.compression_level: {}",
        config.defaults.compression_level
    );
    println!("  defaults.workers: {} (0 = auto)", config.defaults.workers);
    println!("  defaults.reproducible: {}", config.defaults.reproducible);

    println!(
        "  limits.max_extract_entries: {}",
        config.limits.max_extract_entries
    );
    println!(
        "  limits.max_extract_bytes: {}",
        config.limits.max_extract_bytes
    );
    println!(
        "  limits.max_compression_ratio: {}",
        config.limits.max_compression_ratio
    );

    println!();
    println!("{}", "Usage:".bold());
    println!(
        "  Edit {} and add patterns under [ignore] to always",
        "always_exclude"
    );
    println!("  exclude or force-include, regardless of any .zipignore file:");
    println!("    zipcraft --edit-config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_standard_exclusions() {
        let config = Config::default();
        assert!(config
            .ignore
            .always_exclude
            .iter()
            .any(|p| p == ".git/**"));
        assert_eq!(config.defaults.compression_level, 6);
        assert_eq!(config.limits.max_extract_entries, 100_000);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
[defaults]
compression_level = 0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.defaults.compression_level, 0);
        assert_eq!(config.defaults.workers, 0);
        // [ignore] table omitted entirely, so it falls back to its own
        // Default impl (the standard VCS exclusions), not an empty list.
        assert!(config.ignore.always_exclude.contains(&".git/**".to_string()));
    }
}
