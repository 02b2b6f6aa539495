//! CLI surface and command dispatch.
//!
//! Argument parsing, help/version banners, and the progress bar are
//! explicitly out of scope for the CORE per spec.md §1 ("external
//! collaborators") — this module is the thin layer gluing clap's parsed
//! arguments onto the CORE modules, in the teacher's `main.rs` style
//! (combined short flags, a single dispatch match, `anyhow` at the
//! boundary).

use crate::collector::{self, CollectSummary, FileEntry};
use crate::config::{self, Config};
use crate::diagnostics::Diagnostics;
use crate::diff;
use crate::error::Error;
use crate::extract::{self, ExtractLimits, ExtractOptions};
use crate::ignore::IgnoreContext;
use crate::pipeline::{self, PipelineOptions};
use anyhow::{bail, Context, Result};
use bytesize::ByteSize;
use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};

/// A ZIP archiver with hierarchical `.zipignore` rules, parallel
/// pre-compression, and diff-based incremental update.
#[derive(Parser, Debug)]
#[command(name = "zipcraft", version, about)]
pub struct Cli {
    /// Recurse into directories (default on; present for zip-flag parity).
    #[arg(short = 'r', action = clap::ArgAction::SetTrue)]
    pub recurse: bool,

    /// Verbose output. Mutually exclusive with -q; last flag on the command
    /// line wins (checked against raw argv, since clap doesn't preserve
    /// occurrence order across distinct flags).
    #[arg(short = 'v', action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// Quiet output.
    #[arg(short = 'q', action = clap::ArgAction::SetTrue)]
    pub quiet: bool,

    /// Force: overwrite on extract, bypass ZIP-bomb guards.
    #[arg(short = 'f', action = clap::ArgAction::SetTrue)]
    pub force: bool,

    /// Junk directory names: store/extract files by basename only.
    #[arg(short = 'j', action = clap::ArgAction::SetTrue)]
    pub junk_paths: bool,

    /// Store only (compression level 0).
    #[arg(short = '0', action = clap::ArgAction::SetTrue)]
    pub store_only: bool,

    /// Best compression (compression level 9).
    #[arg(short = '9', action = clap::ArgAction::SetTrue)]
    pub best_compression: bool,

    /// Extract operation.
    #[arg(short = 'x', action = clap::ArgAction::SetTrue)]
    pub extract: bool,

    /// List operation.
    #[arg(short = 'l', action = clap::ArgAction::SetTrue)]
    pub list: bool,

    /// Test archive integrity.
    #[arg(short = 't', action = clap::ArgAction::SetTrue)]
    pub test: bool,

    /// Output directory for extraction.
    #[arg(short = 'd', value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Update mode: add-or-replace.
    #[arg(short = 'u', action = clap::ArgAction::SetTrue)]
    pub update: bool,

    /// Diff (incremental update) mode.
    #[arg(short = 'D', action = clap::ArgAction::SetTrue)]
    pub diff: bool,

    /// Explicit ignore file; disables hierarchical `.zipignore` loading.
    #[arg(short = 'I', value_name = "FILE")]
    pub ignore_file: Option<PathBuf>,

    /// Write a template `.zipignore` in the current directory.
    #[arg(short = 'Z', action = clap::ArgAction::SetTrue)]
    pub write_template: bool,

    /// Emit structured (JSON) logs instead of colored plain text.
    #[arg(long = "json-logs", action = clap::ArgAction::SetTrue)]
    pub json_logs: bool,

    /// Override the extraction entry-count cap.
    #[arg(long = "max-entries")]
    pub max_entries: Option<u64>,

    /// Override the extraction total-size cap, in bytes.
    #[arg(long = "max-size")]
    pub max_size: Option<u64>,

    /// Override the extraction per-entry compression-ratio cap.
    #[arg(long = "max-ratio")]
    pub max_ratio: Option<u64>,

    /// Number of Phase B workers; 0 means auto.
    #[arg(long = "workers")]
    pub workers: Option<usize>,

    /// Create the config file with defaults.
    #[arg(long = "init-config", action = clap::ArgAction::SetTrue)]
    pub init_config: bool,

    /// Open the config file in $EDITOR.
    #[arg(long = "edit-config", action = clap::ArgAction::SetTrue)]
    pub edit_config: bool,

    /// Print the current configuration.
    #[arg(long = "show-config", action = clap::ArgAction::SetTrue)]
    pub show_config: bool,

    /// Archive path, followed by input files/directories (or, with `-x`, an
    /// optional extraction directory if `-d` was not given).
    #[arg(trailing_var_arg = true)]
    pub paths: Vec<PathBuf>,
}

impl Cli {
    /// Resolves verbose/quiet last-flag-wins by scanning raw argv, since
    /// clap's derive parser collapses repeated/conflicting flags without
    /// recording which occurred last.
    fn resolve_verbosity(&mut self, argv: &[String]) {
        let mut last: Option<bool> = None;
        for arg in argv {
            if arg.starts_with("--") || !arg.starts_with('-') || arg.len() < 2 {
                continue;
            }
            for ch in arg.chars().skip(1) {
                match ch {
                    'v' => last = Some(true),
                    'q' => last = Some(false),
                    _ => {}
                }
            }
        }

        match last {
            Some(true) => {
                self.verbose = true;
                self.quiet = false;
            }
            Some(false) => {
                self.verbose = false;
                self.quiet = true;
            }
            None => {}
        }
    }

    fn compression_level(&self, config: &Config) -> i64 {
        if self.store_only {
            0
        } else if self.best_compression {
            9
        } else {
            config.defaults.compression_level
        }
    }

    fn extract_limits(&self, config: &Config) -> ExtractLimits {
        let mut limits = config.limits.to_extract_limits();
        if let Some(v) = self.max_entries {
            limits.max_entries = v;
        }
        if let Some(v) = self.max_size {
            limits.max_total_bytes = v;
        }
        if let Some(v) = self.max_ratio {
            limits.max_compression_ratio = v;
        }
        limits
    }
}

/// Runs the CLI end to end, returning the process exit code.
pub fn run() -> i32 {
    let argv: Vec<String> = std::env::args().collect();
    let mut cli = Cli::parse();
    cli.resolve_verbosity(&argv);

    if let Err(err) = Diagnostics::install(cli.json_logs, cli.verbose) {
        eprintln!("Error: failed to initialize logging: {err}");
        return 1;
    }

    match dispatch(&cli) {
        Ok(()) => 0,
        Err(err) => {
            if let Some(zipcraft_err) = err.downcast_ref::<Error>() {
                log::error!("{zipcraft_err}");
                zipcraft_err.exit_code()
            } else {
                log::error!("{err}");
                1
            }
        }
    }
}

fn dispatch(cli: &Cli) -> Result<()> {
    if cli.init_config {
        let path = config::init_config()?;
        println!("Created config file: {}", path.display().to_string().green());
        return Ok(());
    }
    if cli.edit_config {
        config::edit_config()?;
        return Ok(());
    }
    if cli.show_config {
        config::show_config(&config::load_config());
        return Ok(());
    }
    if cli.write_template {
        return write_template_ignore();
    }

    let config = config::load_config();

    let Some(archive_path) = cli.paths.first().cloned() else {
        bail!(Error::InvalidArgs(
            "an archive path is required".to_string()
        ));
    };
    let rest: Vec<PathBuf> = cli.paths.iter().skip(1).cloned().collect();

    if cli.list {
        return run_list(&archive_path);
    }
    if cli.test {
        return run_test(&archive_path);
    }
    if cli.extract {
        return run_extract(cli, &archive_path, &rest, &config);
    }
    if cli.diff || cli.update {
        return run_diff(cli, &archive_path, &rest, &config, cli.update && !cli.diff);
    }

    run_create(cli, &archive_path, &rest, &config)
}

fn build_ignore_context(cli: &Cli, base_dir: &Path, config: &Config) -> IgnoreContext {
    let mut ctx = IgnoreContext::new(base_dir);
    ctx.load_initial(cli.ignore_file.as_deref(), crate::platform::home_dir().as_deref());
    ctx.add_config_rules(&config.ignore.always_exclude, &config.ignore.always_include);
    ctx
}

fn pipeline_options(cli: &Cli, config: &Config) -> PipelineOptions {
    PipelineOptions {
        compression_level: cli.compression_level(config),
        workers: cli.workers.unwrap_or(config.defaults.workers),
        reproducible: config.defaults.reproducible,
        quiet: cli.quiet,
        verbose: cli.verbose,
    }
}

fn run_create(
    cli: &Cli,
    archive_path: &Path,
    inputs: &[PathBuf],
    config: &Config,
) -> Result<()> {
    if inputs.is_empty() {
        bail!(Error::InvalidArgs(
            "at least one input file or directory is required".to_string()
        ));
    }

    let base_dir = common_base(inputs);
    let mut ignore_ctx = build_ignore_context(cli, &base_dir, config);

    let (mut entries, summary) =
        collector::collect(inputs, &base_dir, &mut ignore_ctx, Some(archive_path));

    if cli.verbose {
        print_collection_summary(&summary);
    }

    let opts = pipeline_options(cli, config);
    pipeline::precompress(&mut entries, &summary, &opts);

    if cli.junk_paths {
        junk_archive_paths(&mut entries);
    }

    pipeline::assemble(archive_path, &entries, &opts).context("failed to create archive")?;

    if !cli.quiet {
        println!(
            "{} {} entries into {}",
            "Wrote".green(),
            entries.len(),
            archive_path.display()
        );
    }

    Ok(())
}

fn run_diff(
    cli: &Cli,
    archive_path: &Path,
    inputs: &[PathBuf],
    config: &Config,
    keep_missing: bool,
) -> Result<()> {
    if !archive_path.exists() {
        return run_create(cli, archive_path, inputs, config);
    }

    let base_dir = if inputs.is_empty() {
        std::env::current_dir().context("could not determine current directory")?
    } else {
        common_base(inputs)
    };
    let roots = if inputs.is_empty() {
        vec![base_dir.clone()]
    } else {
        inputs.to_vec()
    };

    let mut ignore_ctx = build_ignore_context(cli, &base_dir, config);
    let (current, _summary) =
        collector::collect(&roots, &base_dir, &mut ignore_ctx, Some(archive_path));

    let archive_index = diff::read_index(archive_path)?;
    let change_set = diff::diff(&archive_index, &current);

    if cli.verbose {
        print_change_set(&change_set);
    }

    let opts = pipeline_options(cli, config);
    diff::apply(archive_path, &current, &change_set, &opts, keep_missing)
        .context("failed to apply diff")?;

    if !cli.quiet {
        println!(
            "{} {} changes applied to {}",
            "Updated".green(),
            change_set.changes.len(),
            archive_path.display()
        );
    }

    Ok(())
}

fn run_list(archive_path: &Path) -> Result<()> {
    let entries = extract::list(archive_path)?;
    let mut total_size = 0u64;
    let count = entries.len();
    for entry in &entries {
        if entry.is_directory {
            println!("{}", entry.name);
        } else {
            total_size += entry.size;
            println!("{:>10} {}", ByteSize(entry.size).to_string(), entry.name);
        }
    }
    println!(
        "{} {count} entries, {} total",
        "Summary:".bold(),
        ByteSize(total_size)
    );
    Ok(())
}

fn run_test(archive_path: &Path) -> Result<()> {
    extract::test_integrity(archive_path)?;
    println!("{} {}", "OK:".green(), archive_path.display());
    Ok(())
}

fn run_extract(
    cli: &Cli,
    archive_path: &Path,
    rest: &[PathBuf],
    config: &Config,
) -> Result<()> {
    let dest_dir = cli
        .output_dir
        .clone()
        .or_else(|| rest.first().cloned())
        .unwrap_or_else(|| PathBuf::from("."));

    let opts = ExtractOptions {
        force: cli.force,
        junk_paths: cli.junk_paths,
        quiet: cli.quiet,
        limits: cli.extract_limits(config),
    };

    extract::extract(archive_path, &dest_dir, &opts).context("extraction failed")?;

    if !cli.quiet {
        println!(
            "{} into {}",
            "Extracted".green(),
            dest_dir.display()
        );
    }

    Ok(())
}

fn write_template_ignore() -> Result<()> {
    let path = PathBuf::from(".zipignore");
    if path.exists() {
        bail!(Error::InvalidArgs(
            ".zipignore already exists in the current directory".to_string()
        ));
    }

    let template = "# zipcraft ignore rules (gitignore syntax)\n\
.git/**\n\
.hg/**\n\
.svn/**\n\
*.swp\n\
.DS_Store\n";
    std::fs::write(&path, template).context("failed to write .zipignore template")?;
    println!("{} {}", "Created".green(), path.display());
    Ok(())
}

fn junk_archive_paths(entries: &mut [FileEntry]) {
    for entry in entries.iter_mut().filter(|e| !e.is_directory) {
        if let Some(basename) = entry.archive_path.rsplit('/').next() {
            entry.archive_path = basename.to_string();
        }
    }
}

/// The common ancestor directory of a set of collection roots, used as the
/// archive-path base when the user passes several inputs.
fn common_base(inputs: &[PathBuf]) -> PathBuf {
    let absolute: Vec<PathBuf> = inputs
        .iter()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();

    let Some(first) = absolute.first() else {
        return PathBuf::from(".");
    };

    let first_dir = if first.is_dir() {
        first.clone()
    } else {
        first.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    };

    absolute
        .iter()
        .skip(1)
        .fold(first_dir, |acc, path| common_ancestor(&acc, path))
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    let a_components: Vec<_> = a.components().collect();
    let b_components: Vec<_> = b.components().collect();
    let mut out = PathBuf::new();
    for (ca, cb) in a_components.iter().zip(b_components.iter()) {
        if ca == cb {
            out.push(ca);
        } else {
            break;
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from("/")
    } else {
        out
    }
}

fn print_collection_summary(summary: &CollectSummary) {
    eprintln!(
        "{} {} files, {} ({} large files, {} large)",
        "Collected:".dimmed(),
        summary.total_files,
        ByteSize(summary.total_bytes),
        summary.large_file_count,
        ByteSize(summary.large_file_bytes)
    );
}

fn print_change_set(change_set: &diff::ChangeSet) {
    for change in &change_set.changes {
        let label = match change.kind {
            diff::ChangeKind::Added => "Added".green(),
            diff::ChangeKind::Modified => "Modified".yellow(),
            diff::ChangeKind::Deleted => "Deleted".red(),
        };
        eprintln!("  {label} {}", change.archive_path);
    }
}
