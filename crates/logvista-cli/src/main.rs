use anyhow::{Context, Result};
use clap::Parser;
use logvista_aggregate::{Aggregator, AggregatorOptions};
use logvista_core::Config;
use logvista_output::{OutputFormat, StdoutWriter};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const SUBSCRIBER_ID: &str = "stdout";

/// logvista - follow the system journal and log files as one stream
#[derive(Parser, Debug)]
#[command(name = "logvista")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML) [default: ~/.config/logvista/config.toml];
    /// defaults are used when it is missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format: pretty, json, or raw
    #[arg(short, long, default_value = "pretty")]
    format: String,

    /// Enable debug logging (overrides the configured level)
    #[arg(short, long)]
    verbose: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn log_level(args: &Args, config: &Config) -> Level {
    if args.verbose {
        return Level::DEBUG;
    }
    match config.general.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    }
}

/// Load the given file, or the default location when none is given
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match Config::default_path() {
            Ok(path) => path,
            Err(_) => return Ok(Config::default()),
        },
    };
    Config::load_or_default(&path).with_context(|| format!("loading {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::default().to_toml()?);
        return Ok(());
    }

    let config = load_config(args.config.as_deref())?;
    config.validate()?;

    FmtSubscriber::builder()
        .with_max_level(log_level(&args, &config))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format: OutputFormat = args.format.parse()?;
    let mut writer = StdoutWriter::with_format(format);

    let aggregator = Aggregator::with_options(AggregatorOptions::from(&config.general));
    let mut subscription = aggregator.subscribe(SUBSCRIBER_ID)?;
    aggregator.start()?;

    let mut started = 0;
    for descriptor in config.enabled_sources() {
        let name = descriptor.name.clone();
        match aggregator.add_source(descriptor) {
            Ok(()) => started += 1,
            Err(e) => warn!(source = %name, error = %e, "Skipping source"),
        }
    }

    if started == 0 {
        eprintln!("Warning: no sources could be started. Check the [[sources]] entries in your config.");
        aggregator.stop();
        return Ok(());
    }
    info!(sources = ?aggregator.sources(), "Ingestion started");

    let mut streamed: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = subscription.recv() => match event {
                Some(event) => {
                    if let Err(e) = writer.write(&event).await {
                        error!(error = %e, "Output error");
                    }
                    streamed += 1;
                }
                None => break,
            },
        }
    }

    let health = aggregator.source_health();
    let entries = aggregator.entry_count();
    aggregator.unsubscribe(SUBSCRIBER_ID);
    aggregator.stop();
    aggregator.join().await;

    for (source, healthy) in &health {
        info!(source = %source, healthy, "Source health at shutdown");
    }
    info!(streamed, entries, "Processing complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use logvista_core::SourceDescriptor;

    #[test]
    fn test_args_without_config_use_default_location() {
        let args = Args::try_parse_from(["logvista", "--format", "json"]).unwrap();
        assert!(args.config.is_none());
        assert!(!args.verbose);
    }

    #[test]
    fn test_history_flag_is_rejected() {
        assert!(Args::try_parse_from(["logvista", "--history", "5"]).is_err());
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("logvista.toml");

        let mut config = Config::default();
        config.add_source(SourceDescriptor::file("app", "/var/log/app.log"));
        config.save_to(&path).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.sources, config.sources);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loaded.sources.len(), 1);
        assert_eq!(loaded.sources[0].name, "System Journal");
    }

    #[test]
    fn test_load_config_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[general\nmax_buffer = ").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
