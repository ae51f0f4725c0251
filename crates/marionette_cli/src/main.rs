//! MARIONETTE CLI
//!
//! Parse manifests and compile node catalogs from the command line.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use console::style;
use marionette_compiler::{ClassRequest, Compiler, CompilerConfig, Node, Source, Value};
use marionette_core::{Diagnostic, SourceFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "marionette")]
#[command(about = "MARIONETTE - declarative configuration catalog compiler", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that manifests parse
    Parse {
        /// Manifest files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Compile the catalog for a node
    Compile {
        /// Site manifest
        manifest: PathBuf,
        /// Node description (JSON)
        #[arg(short, long)]
        node: Option<PathBuf>,
        /// Node name when no node file is given
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Compiler configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Additional class, optionally `name={"param": value}`
        #[arg(long = "class")]
        classes: Vec<String>,
        /// Module directory, may repeat
        #[arg(short = 'M', long = "module-dir")]
        module_dirs: Vec<PathBuf>,
        /// Environment name
        #[arg(short, long)]
        environment: Option<String>,
        /// Unknown variables are errors
        #[arg(long)]
        strict_variables: bool,
        /// Write the catalog here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Parse { files } => {
            for file in &files {
                parse_file(file)?;
            }
            Ok(())
        }
        Commands::Compile {
            manifest,
            node,
            host,
            config,
            classes,
            module_dirs,
            environment,
            strict_variables,
            output,
        } => {
            let mut config = match config {
                Some(path) => CompilerConfig::from_file(&path)?,
                None => CompilerConfig::default(),
            };
            for dir in module_dirs {
                config = config.with_module_dir(dir);
            }
            if let Some(environment) = environment {
                config = config.with_environment(environment);
            }
            if strict_variables {
                config = config.with_strict_variables(true);
            }
            if config.manifest_dir.is_none() {
                if let Some(dir) = manifest.parent() {
                    config = config.with_manifest_dir(dir);
                }
            }

            let node = match node {
                Some(path) => load_node(&path)?,
                None => Node::new(host),
            };
            let requests = classes
                .iter()
                .map(String::as_str)
                .map(class_request)
                .collect::<Result<Vec<_>>>()?;

            let compiler = Compiler::new(config);
            let compiled = compiler
                .compile(&node, &requests, &Source::Manifest(manifest.clone()))
                .wrap_err_with(|| format!("failed to compile catalog for {}", node.name))?;
            for warning in &compiled.warnings {
                report_warning(warning);
            }

            let json = serde_json::to_string_pretty(&compiled.catalog)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .wrap_err_with(|| format!("could not write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "wrote catalog");
                }
                None => println!("{}", json),
            }
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("marionette=info,marionette_compiler=warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_file(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("could not read {}", path.display()))?;
    let source = Arc::new(SourceFile::new(path, text));
    let ast = marionette_syntax::parse(source)?;
    for warning in ast.warnings() {
        report_warning(warning);
    }
    println!(
        "{} {} ({} statements)",
        style("ok").green().bold(),
        path.display(),
        ast.statements().len()
    );
    Ok(())
}

fn load_node(path: &Path) -> Result<Node> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("could not read {}", path.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("invalid node description in {}", path.display()))
}

/// `name` or `name={"param": value}`
fn class_request(spec: &str) -> Result<ClassRequest> {
    let Some((name, params)) = spec.split_once('=') else {
        return Ok(ClassRequest::new(spec));
    };
    let params: serde_json::Value =
        serde_json::from_str(params).wrap_err_with(|| format!("invalid parameters for class {}", name))?;
    let serde_json::Value::Object(params) = params else {
        return Err(eyre!("parameters for class {} must be a JSON object", name));
    };
    Ok(params
        .iter()
        .fold(ClassRequest::new(name), |request, (key, value)| {
            request.with_parameter(key.clone(), Value::from_json(value))
        }))
}

fn report_warning(warning: &Diagnostic) {
    eprintln!("{}: {}", style("warning").yellow().bold(), warning);
}
