//! OpenRPC Shapes CLI
//!
//! Command-line interface for resolving OpenRPC schemas and projecting them
//! into type shapes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use openrpc_shapes::{
    generate_modules, load_document, resolve_and_project, resolve_target, Dereferencer, Document,
    DocumentStore, Primitive, Profile, ProjectOptions, ResolveError, Target,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "openrpc-shapes")]
#[command(about = "Resolve OpenRPC schemas and synthesize type shapes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical schema of a named schema or method
    Resolve {
        /// OpenRPC document
        document: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Collapse anyOf unions instead of preserving them
        #[arg(long)]
        collapse_unions: bool,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Project a named schema or method into a type shape
    Project {
        /// OpenRPC document
        document: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        projection: ProjectionArgs,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Generate declarations and methods for whole modules
    Generate {
        /// OpenRPC documents, one module each
        #[arg(required = true)]
        documents: Vec<PathBuf>,

        #[command(flatten)]
        projection: ProjectionArgs,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Copy schemas referenced from bundles into the document's components
    Localize {
        /// OpenRPC document
        document: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct TargetArgs {
    /// Named schema to resolve (key or title)
    #[arg(long)]
    schema: Option<String>,

    /// Method to resolve
    #[arg(long)]
    method: Option<String>,
}

#[derive(Args)]
struct ProjectionArgs {
    /// Language profile (JSON); TypeScript if not specified
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Render homogeneous tuples as arrays
    #[arg(long)]
    tuples_as_arrays: bool,

    /// Render heterogeneous tuples as arrays of any when the profile has no tuples
    #[arg(long)]
    degrade_tuples: bool,

    /// Project every method result in event context
    #[arg(long)]
    event: bool,

    /// Render enums as their primitive type instead of a literal union
    #[arg(long)]
    no_expand_enums: bool,

    /// Expand named schemas at use sites instead of referencing them
    #[arg(long)]
    inline_named: bool,

    /// Proxy type for a primitive in event context, e.g. boolean=BooleanEvent (repeatable)
    #[arg(long = "proxy", value_name = "PRIMITIVE=NAME", value_parser = parse_proxy)]
    proxies: Vec<(Primitive, String)>,
}

#[derive(Args)]
struct CommonArgs {
    /// Shared schema bundle (repeatable)
    #[arg(long = "bundle", value_name = "FILE")]
    bundles: Vec<PathBuf>,

    /// Output file (stdout if not specified)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Resolve {
            document,
            target,
            collapse_unions,
            common,
        } => run_resolve(&document, target, collapse_unions, &common),

        Commands::Project {
            document,
            target,
            projection,
            common,
        } => run_project(&document, target, &projection, &common),

        Commands::Generate {
            documents,
            projection,
            common,
        } => run_generate(&documents, &projection, &common),

        Commands::Localize { document, common } => run_localize(&document, &common),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run_resolve(
    path: &Path,
    target: TargetArgs,
    collapse_unions: bool,
    common: &CommonArgs,
) -> Result<(), u8> {
    let store = load_store(&common.bundles).map_err(fail)?;
    let document = load_document(path).map_err(fail)?;

    let resolved =
        resolve_target(&document, &store, &target.into(), !collapse_unions).map_err(fail)?;
    write_output(&resolved, common)
}

fn run_project(
    path: &Path,
    target: TargetArgs,
    projection: &ProjectionArgs,
    common: &CommonArgs,
) -> Result<(), u8> {
    let store = load_store(&common.bundles).map_err(fail)?;
    let document = load_document(path).map_err(fail)?;
    let profile = load_profile(projection.profile.as_deref()).map_err(fail)?;
    let options = projection.options();

    let projected = resolve_and_project(&document, &store, &target.into(), &profile, &options)
        .map_err(fail)?;
    write_output(&projected, common)
}

fn run_generate(
    paths: &[PathBuf],
    projection: &ProjectionArgs,
    common: &CommonArgs,
) -> Result<(), u8> {
    let store = load_store(&common.bundles).map_err(fail)?;
    let documents = paths
        .iter()
        .map(|p| load_document(p))
        .collect::<Result<Vec<Document>, _>>()
        .map_err(fail)?;
    let profile = load_profile(projection.profile.as_deref()).map_err(fail)?;
    let options = projection.options();

    let outputs = generate_modules(&documents, &store, &profile, &options);
    write_output(&outputs, common)?;

    let mut failed = false;
    for output in &outputs {
        for error in &output.errors {
            eprintln!("Error: {}", error);
            failed = true;
        }
    }
    if failed {
        Err(1)
    } else {
        Ok(())
    }
}

fn run_localize(path: &Path, common: &CommonArgs) -> Result<(), u8> {
    let store = load_store(&common.bundles).map_err(fail)?;
    let document = load_document(path).map_err(fail)?;

    let localized = Dereferencer::new(&store).localize(&document).map_err(fail)?;
    write_output(&localized, common)
}

impl From<TargetArgs> for Target {
    fn from(args: TargetArgs) -> Self {
        match (args.schema, args.method) {
            (Some(name), _) => Target::Schema(name),
            (None, Some(name)) => Target::Method(name),
            // clap requires exactly one of the two
            (None, None) => Target::Schema(String::new()),
        }
    }
}

impl ProjectionArgs {
    fn options(&self) -> ProjectOptions {
        let mut options = ProjectOptions::new()
            .tuples_as_arrays(self.tuples_as_arrays)
            .degrade_tuples(self.degrade_tuples)
            .event_context(self.event)
            .expand_enums(!self.no_expand_enums)
            .inline_named(self.inline_named);
        for (primitive, name) in &self.proxies {
            options = options.primitive_proxy(*primitive, name.clone());
        }
        options
    }
}

fn parse_proxy(s: &str) -> Result<(Primitive, String), String> {
    let (primitive, name) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PRIMITIVE=NAME, got \"{}\"", s))?;
    let primitive =
        Primitive::parse(primitive).ok_or_else(|| format!("unknown primitive \"{}\"", primitive))?;
    Ok((primitive, name.to_string()))
}

/// Load bundles, each registered under its `$id` (or its title).
fn load_store(bundles: &[PathBuf]) -> Result<DocumentStore, ResolveError> {
    let mut store = DocumentStore::new();
    for path in bundles {
        let bundle = load_document(path)?;
        let id = bundle.id().unwrap_or(bundle.title()).to_string();
        store.register(id, bundle);
    }
    Ok(store)
}

fn load_profile(path: Option<&Path>) -> Result<Profile, ResolveError> {
    match path {
        Some(path) => Profile::load(path),
        None => Ok(Profile::typescript()),
    }
}

fn fail(e: ResolveError) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

fn write_output<T: Serialize>(value: &T, common: &CommonArgs) -> Result<(), u8> {
    let json_output = if common.pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match &common.output {
        Some(path) => {
            std::fs::write(path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}
