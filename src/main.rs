//! selkies-mirror - Main entry point
//!
//! Mirrors the root window of an X11 screen into a shared sink buffer,
//! keeping the screen at the sink's native resolution.

mod args;

use args::Args;
use clap::Parser;
use log::{error, info, warn};

use selkies_mirror::config::Config;
use selkies_mirror::cursor::XFixesCursor;
use selkies_mirror::error::MirrorError;
use selkies_mirror::mirror::Mirror;
use selkies_mirror::sink::MappedSink;
use selkies_mirror::source::X11Source;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let (mut config, load_error) = match args.load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("SELKIES_LOG").unwrap_or(log_level))
        .init();

    info!("selkies-mirror v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!("Loaded configuration from {:?}", args.config),
        Some(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    args.apply(&mut config);
    config.validate()?;

    if let Err(e) = run(&config) {
        error!("Fatal: {}", e);
        return Err(e.into());
    }
    Ok(())
}

fn run(config: &Config) -> Result<(), MirrorError> {
    let source = X11Source::connect(config.source.display.as_deref(), config.source.screen)?;
    let sink = MappedSink::open(
        &config.sink.path,
        config.sink.create,
        config.sink.native_override(),
    )?;

    let cursor = &config.cursor;
    let mut mirror = Mirror::start(source, sink, config.mirror_options(), |source, _sink| {
        if !cursor.enabled {
            info!("Cursor tracking disabled");
            return Ok(None);
        }
        Ok(Some(XFixesCursor::init(source, cursor.cache_capacity)?))
    })?;

    mirror.run()
}
