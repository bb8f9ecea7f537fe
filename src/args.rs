use clap::Parser;
use std::path::PathBuf;

use selkies_mirror::config::Config;

#[derive(Parser, Debug)]
#[command(name = "selkies-mirror")]
#[command(author = "Selkies Team")]
#[command(version)]
#[command(about = "Mirror an X11 screen into a shared sink buffer", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/selkies-mirror.toml")]
    pub config: PathBuf,

    /// Source X display (defaults to $DISPLAY)
    #[arg(short, long)]
    pub display: Option<String>,

    /// Source screen number
    #[arg(long)]
    pub screen: Option<usize>,

    /// Sink file path
    #[arg(short, long)]
    pub sink: Option<PathBuf>,

    /// Override the sink's native width
    #[arg(long, requires = "native_height")]
    pub native_width: Option<u32>,

    /// Override the sink's native height
    #[arg(long, requires = "native_width")]
    pub native_height: Option<u32>,

    /// Do not change the source resolution
    #[arg(long, action)]
    pub no_sync: bool,

    /// Screen change notifications to wait through for a mode switch
    #[arg(long)]
    pub confirm_attempts: Option<u32>,

    /// Disable cursor tracking
    #[arg(long, action)]
    pub no_cursor: bool,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        Config::load(&self.config)
    }

    /// Apply command line overrides on top of the file configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref display) = self.display {
            config.source.display = Some(display.clone());
        }
        if self.screen.is_some() {
            config.source.screen = self.screen;
        }
        if let Some(ref sink) = self.sink {
            config.sink.path = sink.clone();
        }
        if self.native_width.is_some() || self.native_height.is_some() {
            config.sink.native_width = self.native_width;
            config.sink.native_height = self.native_height;
        }
        if self.no_sync {
            config.sync.enabled = false;
        }
        if let Some(attempts) = self.confirm_attempts {
            config.sync.confirm_attempts = attempts;
        }
        if self.no_cursor {
            config.cursor.enabled = false;
        }
    }
}
