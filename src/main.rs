use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mpileupr::{
    Config, RegionDriver,
    config::OutputFormat,
    output::{JsonLinesSink, PileupSink, TextFormatter},
    reference::FastaReference,
    storage::BamStore,
};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing; stdout carries the pileup, so logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if let Err(e) = run(&config) {
        tracing::error!("{} ({})", e, e.category());
        return Err(e.into());
    }

    Ok(())
}

fn run(config: &Config) -> mpileupr::Result<()> {
    let options = config.pileup_options()?;
    let files = config.input_files()?;
    let regions = config.region_specs()?;

    let mut driver = RegionDriver::new(BamStore::new(), files, options)?;
    if let Some(path) = &config.fasta_ref {
        tracing::info!("Reference: {:?}", path);
        driver = driver.with_reference(Box::new(FastaReference::from_path(path)?));
    }
    if let Some(targets) = config.targets()? {
        driver = driver.with_targets(targets);
    }

    let writer: Box<dyn Write> = match &config.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let mut sink: Box<dyn PileupSink> = match config.output_format {
        OutputFormat::Text => Box::new(TextFormatter::new(writer, config.text_options())),
        OutputFormat::Json => Box::new(JsonLinesSink::new(writer)),
    };

    let stats = driver.run(&regions, sink.as_mut())?;
    sink.finish()?;

    let cache = driver.close();
    tracing::info!(
        "{} regions, {} sites; {} files opened, {} indices loaded, {} cache hits",
        stats.regions,
        stats.positions_emitted,
        cache.files_opened,
        cache.indices_loaded,
        cache.hits
    );

    Ok(())
}
