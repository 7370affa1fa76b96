//! areal: batch permutation tests for areal clustering of phonemes.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use areal_core::{
    candidate_features, load_inventory, prepare_variants, AnalysisConfig, BatchRunner,
    EnrichmentResult, GeographyTable, ResultCache, Sample, SegmentFilter,
};

#[derive(Parser, Debug)]
#[command(name = "areal", version)]
#[command(about = "Family-stratified permutation tests for areal clustering of phonemes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (overrides LOG_LEVEL)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every configured test and write results to the output directory
    Run(RunArgs),

    /// List features frequent enough to be tested
    Features(FeaturesArgs),

    /// Show the neighbour index of one variant
    Neighbours(NeighboursArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Inventory table: JSON array of (sample, language, family, phoneme) rows
    #[arg(long)]
    inventory: PathBuf,

    /// Geography table: JSON object with macro_areas and family_names maps
    #[arg(long)]
    geography: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Directory for the summary table, null distributions and checkpoints
    #[arg(long, default_value = "areal-results")]
    out: PathBuf,

    #[arg(long)]
    k: Option<usize>,

    #[arg(long)]
    iterations: Option<usize>,

    #[arg(long)]
    min_languages: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Comma-separated feature symbols; omit to test every frequent vowel
    #[arg(long, value_delimiter = ',')]
    features: Vec<String>,

    /// Re-run every test and fail on any difference in the null distribution
    #[arg(long)]
    verify: bool,
}

#[derive(Args, Debug)]
struct FeaturesArgs {
    #[command(flatten)]
    input: InputArgs,

    #[arg(long)]
    min_languages: Option<usize>,

    /// Consider consonants and other segments as well as vowels
    #[arg(long)]
    all_segments: bool,
}

#[derive(Args, Debug)]
struct NeighboursArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Variant name from the configuration
    #[arg(long, default_value = "cross_family")]
    variant: String,

    /// Print only languages whose neighbourhood was padded
    #[arg(long)]
    insufficient_only: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialise logging")?;

    let config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {path:?}"))?,
        None => AnalysisConfig::default(),
    };

    match cli.command {
        Commands::Run(args) => run(config, args),
        Commands::Features(args) => features(config, args),
        Commands::Neighbours(args) => neighbours(config, args),
    }
}

fn load_sample(input: &InputArgs) -> Result<(Sample, GeographyTable)> {
    let geography = match &input.geography {
        Some(path) => GeographyTable::load(path)?,
        None => GeographyTable::default(),
    };
    let rows = load_inventory(&input.inventory)?;
    info!(rows = rows.len(), path = %input.inventory.display(), "loaded inventory");
    let sample = Sample::from_rows(rows, &geography)?;
    Ok((sample, geography))
}

fn run(mut config: AnalysisConfig, args: RunArgs) -> Result<()> {
    if let Some(k) = args.k {
        config.k = k;
    }
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    if let Some(min_languages) = args.min_languages {
        config.min_languages = min_languages;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if !args.features.is_empty() {
        config.features = args.features;
    }
    config.verify_reproducibility |= args.verify;

    let (sample, _) = load_sample(&args.input)?;
    let cache = ResultCache::open(&args.out)?;
    let report = BatchRunner::new(config)?.with_cache(cache).run(&sample)?;

    print_results(&report.results);
    info!(
        tested = report.tested().count(),
        rows = report.results.len(),
        out = %args.out.display(),
        "batch complete"
    );
    Ok(())
}

fn print_results(results: &[EnrichmentResult]) {
    let format = |value: Option<f64>, width: usize| match value {
        Some(v) => format!("{v:>width$.4}"),
        None => format!("{:>width$}", "-"),
    };

    println!(
        "{:<16} {:<14} {:>8} {:>10} {:>10} {:>10}  status",
        "feature", "variant", "present", "observed", "quantile", "logit"
    );
    for r in results {
        println!(
            "{:<16} {:<14} {:>8} {} {} {}  {:?}",
            r.feature,
            r.variant,
            r.languages_present,
            format(r.observed_statistic, 10),
            format(r.empirical_quantile, 10),
            format(r.logit_quantile, 10),
            r.status
        );
    }
}

fn features(config: AnalysisConfig, args: FeaturesArgs) -> Result<()> {
    let (sample, _) = load_sample(&args.input)?;
    let filter = if args.all_segments {
        SegmentFilter::All
    } else {
        config.segments
    };
    let min_languages = args.min_languages.unwrap_or(config.min_languages);

    for (spec, count) in candidate_features(&sample, filter, min_languages) {
        println!("{}\t{}", spec.id, count);
    }
    Ok(())
}

fn neighbours(config: AnalysisConfig, args: NeighboursArgs) -> Result<()> {
    let Some(spec) = config.variant(&args.variant) else {
        let known: Vec<&str> = config.variants.iter().map(|v| v.name.as_str()).collect();
        bail!(
            "Unknown variant '{}' (configured: {})",
            args.variant,
            known.join(", ")
        );
    };

    let (sample, geography) = load_sample(&args.input)?;
    let prepared = prepare_variants(&sample, std::slice::from_ref(spec), config.k)?;
    let variant = &prepared[0];
    let ids = variant.index.ids();

    for (i, record) in variant.sample.records().iter().enumerate() {
        let insufficient = variant.index.is_insufficient(i);
        if args.insufficient_only && !insufficient {
            continue;
        }
        let neighbours: Vec<&str> = variant
            .index
            .neighbours(i)
            .iter()
            .map(|&j| ids[j].as_str())
            .collect();
        println!(
            "{}\t{}\t{}\t{}",
            record.sample_id,
            geography.family_name(&record.family),
            neighbours.join(","),
            if insufficient { "insufficient" } else { "ok" }
        );
    }

    info!(
        variant = %variant.name(),
        languages = variant.sample.len(),
        padded = variant.index.insufficient_neighbours().len(),
        "neighbour index"
    );
    Ok(())
}

