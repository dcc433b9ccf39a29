mod artifacts;
mod config;
mod labels;
mod model;
mod scaler;
mod server;
mod service;
mod vector_ops;

#[cfg(test)]
mod fixtures;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifacts::{parse_feature_names, ModelArtifacts};
use crate::config::{Number, State};
use crate::scaler::ScalerParams;
use crate::service::{parse_single, ServiceContext};

#[derive(Parser)]
#[command(name = "socio-cluster")]
#[command(version)]
#[command(about = "Socioeconomic clustering service for Honduran departments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the model artifacts and serve the HTTP API
    Serve,
    /// Classify one JSON object per stdin line
    Predict,
    /// Write the loaded scaler parameters to a file and verify the reload
    ExportScaler {
        #[arg(short, long, default_value = "models/scaler_params.json")]
        output: PathBuf,
    },
    /// Print the resolved configuration
    Config,
}

fn load_context(state: &State) -> Result<ServiceContext> {
    let artifacts = ModelArtifacts::fetch(&state.source)?;
    ServiceContext::from_artifacts(&artifacts, state.model_format, state.source.label())
        .context("Model artifacts are inconsistent")
}

fn serve_command(state: &State) -> Result<()> {
    let context = Arc::new(load_context(state)?);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(server::serve(context, &state.host, state.port))
}

fn predict_command(state: &State) -> Result<()> {
    let context = load_context(state)?;

    let stdin = io::stdin();
    let mut items = Vec::new();
    for (line_no, line) in stdin.lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let data = parse_single(line.as_bytes()).with_context(|| format!("Line {}", line_no + 1))?;
        items.push(data);
    }
    if items.is_empty() {
        tracing::warn!("no input rows on stdin");
        return Ok(());
    }

    let assignments = context.predict_assignments(&items)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for assignment in &assignments {
        writeln!(out, "{}", serde_json::to_string(assignment)?)?;
    }
    Ok(())
}

fn export_scaler_command(state: &State, output: &Path) -> Result<()> {
    let artifacts = ModelArtifacts::fetch(&state.source)?;
    let feature_names = parse_feature_names(&artifacts.features.bytes)?;
    let mut params = ScalerParams::from_json_bytes(&artifacts.scaler.bytes)?;
    params.validate(&feature_names)?;
    params.n_features_in = Some(params.n_features());
    if params.feature_names.is_none() {
        params.feature_names = Some(feature_names);
    }

    params.save(output)?;
    println!("Exported scaler parameters to {}", output.display());
    println!("  mean: {} values", params.mean.len());
    println!("  scale: {} values", params.scale.len());

    let reloaded = ScalerParams::load(output)?;
    let sample: Vec<f64> = params.mean.iter().zip(&params.scale).map(|(m, s)| m + 0.5 * s).collect();
    let expected = params.transform(&sample)?;
    let actual = reloaded.transform(&sample)?;
    let matches = expected
        .iter()
        .zip(&actual)
        .all(|(a, b)| (a - b).abs() <= Number::EPSILON * a.abs().max(1.0));
    if !matches {
        anyhow::bail!("Reloaded scaler differs: expected {:?}, got {:?}", expected, actual);
    }
    println!("Reloaded parameters reproduce the in-memory scaling");
    Ok(())
}

fn config_command(state: &State) -> Result<()> {
    state.print_config();
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let state = State::new()?;
    config::init_tracing(state.verbose);

    match &args.command {
        Commands::Serve => serve_command(&state)?,
        Commands::Predict => predict_command(&state)?,
        Commands::ExportScaler { output } => export_scaler_command(&state, output)?,
        Commands::Config => config_command(&state)?,
    }
    Ok(())
}
