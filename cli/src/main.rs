use std::path::PathBuf;

use blueprint_schema_core::{ProfileActivation, RawTree, profiles};
use blueprint_schema_loader::{ParserConfig, parse_file};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// CLI-specific output format enum with clap argument parsing support.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliOutputFormat {
    Json,
    Yaml,
}

#[derive(Debug, Parser)]
#[command(name = "blueprint-parse", version)]
#[command(about = "Parse and validate infrastructure blueprints against profile schemas")]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse one blueprint and print its plan.
    Parse(ParseArgs),
    /// Validate blueprints in parallel against one shared schema.
    Validate(ValidateArgs),
    /// Print the effective schema of a profile activation.
    Schema(SchemaArgs),
    /// List the built-in profiles.
    Profiles,
}

#[derive(Debug, Args)]
struct ProfileArgs {
    /// Path to a parser configuration YAML file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Built-in profile to activate (overrides the configuration's profile).
    #[arg(long)]
    profile: Option<String>,
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Main blueprint document (JSON or YAML).
    input: PathBuf,
    #[command(flatten)]
    profile: ProfileArgs,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: CliOutputFormat,
    /// Print only the plan's SHA-256 digest.
    #[arg(long)]
    digest: bool,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    /// Blueprint documents to validate.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[command(flatten)]
    profile: ProfileArgs,
    /// Number of parallel jobs (default: number of CPUs).
    #[arg(long)]
    jobs: Option<usize>,
}

#[derive(Debug, Args)]
struct SchemaArgs {
    #[command(flatten)]
    profile: ProfileArgs,
    /// Output format.
    #[arg(long, default_value = "yaml")]
    format: CliOutputFormat,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Parse(args) => run_parse(args),
        Command::Validate(args) => run_validate(args),
        Command::Schema(args) => run_schema(args),
        Command::Profiles => run_profiles(),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_activation(args: &ProfileArgs) -> Result<ProfileActivation, String> {
    let mut config = match &args.config {
        Some(path) => ParserConfig::load(path)
            .map_err(|err| format!("Failed to load config '{}': {err}", path.display()))?,
        None => ParserConfig::default(),
    };
    if let Some(name) = &args.profile {
        config = config.with_profile(name.clone());
    }
    let activation = config.activate().map_err(|err| err.to_string())?;
    debug!(
        profile = ?config.profile,
        definitions = activation.registry.len(),
        "Schema ready"
    );
    Ok(activation)
}

fn render(value: &RawTree, format: CliOutputFormat) -> Result<String, String> {
    match format {
        CliOutputFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|err| format!("Failed to serialize JSON: {err}")),
        CliOutputFormat::Yaml => {
            serde_yaml::to_string(value).map_err(|err| format!("Failed to serialize YAML: {err}"))
        }
    }
}

fn run_parse(args: ParseArgs) -> Result<(), String> {
    let activation = load_activation(&args.profile)?;
    let plan = parse_file(&args.input, &activation)
        .map_err(|err| format!("{}: {err}", args.input.display()))?;

    if args.digest {
        println!("{}", plan.digest());
        return Ok(());
    }

    let output = render(&plan.to_tree(), args.format)?;
    println!("{}", output.trim_end());
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<(), String> {
    use rayon::prelude::*;

    let activation = load_activation(&args.profile)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs.unwrap_or(0))
        .build()
        .map_err(|e| format!("Failed to create thread pool: {e}"))?;

    let outcomes: Vec<Result<(), String>> = pool.install(|| {
        args.inputs
            .par_iter()
            .map(|path| {
                parse_file(path, &activation)
                    .map(|_| ())
                    .map_err(|err| err.to_string())
            })
            .collect()
    });

    let mut failed = 0usize;
    for (path, outcome) in args.inputs.iter().zip(&outcomes) {
        match outcome {
            Ok(()) => println!("{}: ok", path.display()),
            Err(err) => {
                failed += 1;
                println!("{}: error: {err}", path.display());
            }
        }
    }

    if failed > 0 {
        return Err(format!(
            "{failed} of {} blueprint(s) failed validation",
            args.inputs.len()
        ));
    }
    println!("Validated {} blueprint(s).", args.inputs.len());
    Ok(())
}

fn run_schema(args: SchemaArgs) -> Result<(), String> {
    let activation = load_activation(&args.profile)?;
    let registry = &activation.registry;

    let definitions: Vec<_> = registry.definitions().collect();
    let mut schema = serde_json::Map::new();
    schema.insert(
        "root".to_string(),
        RawTree::String(registry.root_name().to_string()),
    );
    schema.insert(
        "definitions".to_string(),
        serde_json::to_value(definitions)
            .map_err(|err| format!("Failed to serialize schema: {err}"))?,
    );
    schema.insert(
        "merge_policies".to_string(),
        serde_json::to_value(&activation.policies)
            .map_err(|err| format!("Failed to serialize merge policies: {err}"))?,
    );

    let output = render(&RawTree::Object(schema), args.format)?;
    println!("{}", output.trim_end());
    Ok(())
}

fn run_profiles() -> Result<(), String> {
    for name in profiles::BUILTIN_PROFILES {
        match profiles::builtin(name) {
            Some(profile) if !profile.description.is_empty() => {
                println!("{name}\t{}", profile.description)
            }
            _ => println!("{name}"),
        }
    }
    Ok(())
}
