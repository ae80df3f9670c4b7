//! Command-line front end for template expressions
//!
//! Evaluates, validates or completes a template against a JSON context file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flowexpr::diagnostics::{DiagnosticFormatter, Format};
use flowexpr::{EngineConfig, ExpressionContext, ExpressionEngine};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;
use std::process;

#[derive(Parser)]
#[command(name = "flowexpr")]
#[command(about = "Evaluate sandboxed workflow template expressions")]
#[command(version)]
#[command(author = "OctoFHIR Team <funyloony@gmail.com>")]
struct Cli {
    /// JSON engine configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a template against a context
    Evaluate {
        /// Template text, e.g. "Hello {{ $json.name }}"
        template: String,
        /// JSON file with the context (`json`, `nodes`, `env`, ...)
        #[arg(short = 'x', long)]
        context: Option<String>,
        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },
    /// Run the validation layers over a template
    Validate {
        /// Template text
        template: String,
        /// JSON file with the context used for node checks
        #[arg(short = 'x', long)]
        context: Option<String>,
        /// Diagnostic output format
        #[arg(short, long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// List completions at a cursor offset
    Complete {
        /// Template text
        template: String,
        /// Byte offset of the cursor
        #[arg(long)]
        cursor: usize,
        /// JSON file with the context used for property suggestions
        #[arg(short = 'x', long)]
        context: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
    Compact,
}

impl From<FormatArg> for Format {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => Format::Text,
            FormatArg::Json => Format::Json,
            FormatArg::Compact => Format::Compact,
        }
    }
}

fn main() {
    human_panic::setup_panic!();
    env_logger::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(2);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => {
            let text = read_file(path)?;
            serde_json::from_str::<EngineConfig>(&text)
                .with_context(|| format!("invalid configuration in '{path}'"))?
        }
        None => EngineConfig::default(),
    };
    let engine = ExpressionEngine::new(config).context("configuration rejected")?;

    match cli.command {
        Commands::Evaluate {
            template,
            context,
            pretty,
        } => {
            let ctx = load_context(context.as_deref())?;
            let result = engine.evaluate(&template, &ctx);
            let output = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{output}");
            Ok(if result.is_success() { 0 } else { 1 })
        }
        Commands::Validate {
            template,
            context,
            format,
        } => {
            let ctx = context.as_deref().map(|path| load_context(Some(path))).transpose()?;
            let result = engine.validate(&template, ctx.as_ref());
            let formatter = DiagnosticFormatter::new(format.into());
            match format {
                FormatArg::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                _ if result.issues().next().is_none() => println!("valid"),
                _ => println!("{}", formatter.format_all(result.issues(), &template)),
            }
            Ok(if result.is_valid { 0 } else { 1 })
        }
        Commands::Complete {
            template,
            cursor,
            context,
        } => {
            let items = match context {
                Some(path) => {
                    let ctx = load_context(Some(&path))?;
                    engine.complete_in_context(&template, cursor, &ctx)
                }
                None => engine.complete(&template, cursor),
            };
            println!("{}", serde_json::to_string_pretty(&items)?);
            Ok(0)
        }
    }
}

fn read_file(path: &str) -> Result<String> {
    fs::read_to_string(Path::new(path)).with_context(|| format!("cannot read '{path}'"))
}

fn load_context(path: Option<&str>) -> Result<ExpressionContext> {
    let Some(path) = path else {
        return Ok(ExpressionContext::default());
    };
    let data: JsonValue = serde_json::from_str(&read_file(path)?)
        .with_context(|| format!("'{path}' is not valid JSON"))?;
    ExpressionContext::from_json(data).with_context(|| format!("'{path}' is not a valid context"))
}
