//! KGMerge CLI
//!
//! Merges the shards of a sharded knowledge graph into one core graph:
//! - unifies the per-shard inverted indices into `rid2sids_full.bin`
//! - aggregates relation sense frequencies across every shard database
//! - drops rare, over-frequent and dangling relations
//! - writes the merged `KG.db` and the core index `rid2sids_core.bin`

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use kgmerge_core::layout::LOG_FILE;
use kgmerge_core::{run_merge, CacheOutcome, CoreIndexOutcome, MergeConfig, MergeReport};
use kgmerge_store::Backend;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "kgmerge")]
#[command(
    author,
    version,
    about = "Merge knowledge-graph shards into a filtered core graph"
)]
struct Cli {
    /// Directory holding the shard indices (`rid2sids*.bin`) and databases (`KG*.db`)
    #[arg(long = "kg-path", alias = "kg_path")]
    kg_path: Option<PathBuf>,

    /// Output directory; must already contain `eid2sids_core.bin`
    #[arg(long = "merged-kg-path", alias = "merged_kg_path")]
    merged_kg_path: Option<PathBuf>,

    /// Storage backend for the relation tables
    #[arg(long = "db", value_name = "BACKEND")]
    db: Option<Backend>,

    /// Tag sentence locations with their `<dataset>/parsed_para/` prefix
    #[arg(long = "fix-prefix", alias = "fix_prefix")]
    fix_prefix: bool,

    /// Ignore a full index cached by an earlier run
    #[arg(long = "rebuild-index")]
    rebuild_index: bool,

    /// Drop relations whose total frequency is below this count
    #[arg(
        long = "relation-frequency-lower-cnt-threshold",
        alias = "relation_frequency_lower_cnt_threshold"
    )]
    lower_threshold: Option<f64>,

    /// Drop relations above this fraction of the total frequency mass
    #[arg(
        long = "relation-frequency-upper-percent-threshold",
        alias = "relation_frequency_upper_percent_threshold"
    )]
    upper_threshold: Option<f64>,

    /// JSON file with `MergeConfig` fields; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn merge_config(&self) -> Result<MergeConfig> {
        let mut config = match &self.config {
            Some(path) => MergeConfig::from_json_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => MergeConfig::default(),
        };
        if let Some(path) = &self.kg_path {
            config.kg_path = path.clone();
        }
        if let Some(path) = &self.merged_kg_path {
            config.merged_kg_path = path.clone();
        }
        if let Some(backend) = self.db {
            config.backend = backend.to_string();
        }
        if self.fix_prefix {
            config.fix_prefix = true;
        }
        if self.rebuild_index {
            config.rebuild_index = true;
        }
        if let Some(lower) = self.lower_threshold {
            config.relation_frequency_lower_cnt_threshold = lower;
        }
        if let Some(upper) = self.upper_threshold {
            config.relation_frequency_upper_percent_threshold = upper;
        }
        config.validate()?;
        Ok(config)
    }

    fn default_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Log to stderr and to `<merged>/merge_kg.log`.
fn init_logging(merged_dir: &Path, default_level: &str) -> Result<()> {
    fs::create_dir_all(merged_dir)
        .with_context(|| format!("creating {}", merged_dir.display()))?;
    let log_path = merged_dir.join(LOG_FILE);
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .try_init()?;
    Ok(())
}

fn describe_full(outcome: CacheOutcome) -> &'static str {
    match outcome {
        CacheOutcome::AdoptedExternal => "adopted from shard dir",
        CacheOutcome::Reused => "reused",
        CacheOutcome::Built => "built",
    }
}

fn print_summary(config: &MergeConfig, report: &MergeReport) {
    let filter = &report.filter;
    println!(
        "{} {} relations ({} unique) extracted from {} shard database(s)",
        "merged".green().bold(),
        filter.total_mass,
        filter.total_unique,
        report.shards_scanned
    );
    println!(
        "  full index: {} relations ({})",
        report.full_relations,
        describe_full(report.full_index)
    );
    match report.core_index {
        CoreIndexOutcome::Aliased => println!("  core index: alias of full index"),
        CoreIndexOutcome::Restricted { relations } => {
            println!("  core index: {relations} relations")
        }
    }
    println!(
        "  dropped: {} below lower, {} above upper, {} dangling",
        filter.below_lower, filter.above_upper, filter.dangling
    );
    println!(
        "{} {} relations ({} unique) in {}",
        "kept".green().bold(),
        filter.kept_mass,
        filter.kept_unique,
        config.merged_kg_path.display().to_string().bold()
    );
    if report.relations.removed > 0 {
        println!(
            "{} removed {} previously merged relation(s)",
            "info:".yellow().bold(),
            report.relations.removed
        );
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.merge_config()?;
    init_logging(&config.merged_kg_path, cli.default_level())?;
    tracing::info!(
        kg_path = %config.kg_path.display(),
        merged_kg_path = %config.merged_kg_path.display(),
        backend = %config.backend,
        fix_prefix = config.fix_prefix,
        lower = config.relation_frequency_lower_cnt_threshold,
        upper = config.relation_frequency_upper_percent_threshold,
        "starting merge"
    );

    let report = run_merge(&config)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&config, &report);
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
}
