//! Command-line interface for EchoHeart
//!
//! Handles argument parsing and logging configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use echo_core::EngineConfig;
use echo_platform::ListenMode;
use tracing_subscriber::EnvFilter;

/// EchoHeart - live microphone pass-through to headphones
#[derive(Parser, Debug)]
#[command(name = "echoheart")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file (defaults to the platform config directory)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Listen mode to switch to at launch (ambient, conversation)
    #[arg(long)]
    pub mode: Option<ListenMode>,

    /// Buffer size preset
    #[arg(long, value_enum, default_value_t = Latency::Default)]
    pub latency: Latency,

    /// Log filter when RUST_LOG is unset (e.g. info, debug, echo_core=trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print audio devices and exit
    ///
    /// Headphones are detected from the device name. Generic outputs such as
    /// `default` or `pipewire` are not recognized as headphones, so make a
    /// named headphone output the system default before starting.
    #[arg(long)]
    pub list_devices: bool,

    /// Start pass-through right away
    #[arg(long)]
    pub start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Latency {
    Low,
    Default,
    Stable,
}

impl Args {
    pub fn engine_config(&self) -> EngineConfig {
        match self.latency {
            Latency::Low => EngineConfig::low_latency(),
            Latency::Default => EngineConfig::default(),
            Latency::Stable => EngineConfig::stable(),
        }
    }
}

/// Initialize tracing; logs go to stderr so stdout carries only events
pub fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_args() {
        let args = Args::parse_from(["echoheart", "--mode", "conversation", "--latency", "low"]);
        assert_eq!(args.mode, Some(ListenMode::Conversation));
        assert_eq!(args.engine_config().stream.buffer_size, 128);
        assert!(!args.list_devices);
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["echoheart"]);
        assert_eq!(args.latency, Latency::Default);
        assert_eq!(args.log_level, "info");
        assert!(args.settings.is_none());
    }

    #[test]
    fn test_list_devices_help_explains_generic_outputs() {
        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("`default`"));
        assert!(help.contains("not recognized as headphones"));
    }
}
