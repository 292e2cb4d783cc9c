// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! `fleet_engine` runs one fleet process: a controller, a worker, or a
//! query generator, selected by the `type` field of the configuration
//! file.

use clap::Parser;
use gpufleet_config::{EngineConfig, EngineKind};
use gpufleet_controller::Controller;
use gpufleet_generator::QueryGenerator;
use gpufleet_worker::{SyntheticExecutor, WorkerEngine};
use miette::IntoDiagnostic;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "fleet_engine", about = "Runs one engine of the inference fleet")]
struct Cli {
    /// Path of the engine configuration file (JSON).
    #[arg(short, long)]
    config: PathBuf,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_file(&cli.config)?;
    info!(kind = %config.kind, id = config.id, "starting engine");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    runtime.block_on(async {
        match config.kind {
            EngineKind::Controller => {
                let controller = Controller::new(&config)?;
                controller.run().await?;
            }
            EngineKind::WorkerEngine => {
                let executor = Arc::new(SyntheticExecutor::default());
                let engine = Arc::new(WorkerEngine::new(&config, executor)?);
                engine.run().await?;
            }
            EngineKind::PoissonZipfQueryGenerator => {
                let generator = QueryGenerator::new(&config)?;
                generator.run().await?;
            }
        }
        Ok::<(), miette::Report>(())
    })
}
