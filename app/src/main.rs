//! EchoHeart - live listening from the command line
//!
//! Composition root: builds the desktop collaborators, hands them to the
//! session controller, prints events as JSON lines on stdout and reads
//! commands from stdin.

mod cli;

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use echo_core::{
    AudioDevice, Collaborators, Command, CpalDriver, Event, JsonFileSettings, LogNowPlaying,
    ModeChange, SessionController, NUM_BANDS,
};
use tracing::{error, info, warn};

use cli::{init_logging, Args};

const HELP: &str = "\
commands:
  start | stop
  gain <low|mid|high> <db>     EQ band gain, -24 to 24
  master <gain>                master gain, 0 to 10
  mode <ambient|conversation>
  status                       print a state snapshot
  meter                        print level and spectrum
  help | quit";

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    if args.list_devices {
        return list_devices();
    }

    let config = args.engine_config();
    config.validate()?;
    info!("Starting EchoHeart ({:?} latency)", args.latency);

    let settings = match &args.settings {
        Some(path) => JsonFileSettings::open(path),
        None => JsonFileSettings::open_default()?,
    };
    info!("Settings file: {}", settings.path().display());

    let session = echo_platform::get_session(config.route_poll_interval())
        .context("audio session unavailable")?;
    let driver = CpalDriver::new(config.stream, config.ring_buffers);

    let controller = SessionController::new(
        config,
        Collaborators {
            driver: Box::new(driver),
            session,
            settings: Arc::new(settings),
            now_playing: Arc::new(LogNowPlaying),
        },
    )?;

    spawn_event_printer(&controller)?;

    if let Some(mode) = args.mode {
        if let ModeChange::Restarting(handle) = controller.set_listen_mode(mode)? {
            handle.detach();
        }
    }
    if args.start {
        controller.dispatch(Command::Start)?;
    }

    eprintln!("{}", HELP);
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            "help" => eprintln!("{}", HELP),
            "meter" => print_meter(&controller)?,
            _ => match line.parse::<Command>() {
                Ok(command) => {
                    if let Err(e) = controller.dispatch(command) {
                        warn!("{}", e);
                    }
                }
                Err(e) => eprintln!("{}", e),
            },
        }
    }

    controller.stop();
    info!("EchoHeart exiting");
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    let devices = AudioDevice::enumerate_all()?;
    for device in devices {
        println!(
            "{:<6} {:<1} {:<40} {:?}{}",
            format!("{:?}", device.device_type),
            if device.is_default { "*" } else { " " },
            device.name,
            device.port_type,
            if device.is_headphone_class() { " (headphones)" } else { "" },
        );
    }
    Ok(())
}

/// Print every event as one JSON line until the controller goes away
fn spawn_event_printer(controller: &SessionController) -> anyhow::Result<()> {
    let events = controller.events();
    thread::Builder::new()
        .name("echo-events".into())
        .spawn(move || {
            let stdout = io::stdout();
            for event in events.iter() {
                if let Event::Error { message } = &event {
                    error!("{}", message);
                }
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        let mut out = stdout.lock();
                        if writeln!(out, "{}", json).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to encode event: {}", e),
                }
            }
        })
        .context("spawning event printer")?;
    Ok(())
}

fn print_meter(controller: &SessionController) -> anyhow::Result<()> {
    const WIDTH: usize = 20;
    let level = controller.level();
    let spectrum = controller.spectrum();

    let mut out = io::stdout().lock();
    writeln!(out, "level {:>5.2} |{}", level, bar(level, WIDTH * 2))?;
    for (i, value) in spectrum.iter().enumerate().take(NUM_BANDS) {
        writeln!(out, "band {:>2} {:>5.2} |{}", i, value, bar(*value, WIDTH))?;
    }
    Ok(())
}

fn bar(value: f32, width: usize) -> String {
    let filled = (value.clamp(0.0, 1.0) * width as f32).round() as usize;
    format!("{}{}", "#".repeat(filled), " ".repeat(width - filled))
}
