use crate::config::{RelayConfig, app_name, version};
use crate::pipeline::{ErrorKind, RelayBuilder, RelayError};
use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use log::{error, info};
use std::time::Duration;
use std::{panic, process};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub mod assets;
pub mod capture;
pub mod config;
pub mod pipeline;
pub mod transform;
pub mod transmit;
pub mod utils;
pub mod workers;

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file; command line options override it."),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Destination host of the transmit pipeline."),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(value_parser!(u16).range(1..))
                .help("Destination UDP port of the transmit pipeline."),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Capture pixel format: RGB, BGR, RGBA, BGRA or GRAY8."),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .value_name("RATE")
                .help("Capture frame rate, either N or N/D."),
        )
        .arg(
            Arg::new("transform")
                .short('t')
                .long("transform")
                .value_name("KIND")
                .help("Frame transform: none, edges or square."),
        )
        .arg(
            Arg::new("no-transmit")
                .long("no-transmit")
                .action(ArgAction::SetTrue)
                .help("Capture and transform only; frames are dropped after the transform."),
        )
        .arg(
            Arg::new("num-buffers")
                .short('n')
                .long("num-buffers")
                .value_name("COUNT")
                .value_parser(value_parser!(u64).range(1..))
                .help("Stop with end of stream after this many captured frames."),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Bring both pipelines up to Ready, then tear down without relaying."),
        )
}

/// Patch `config` with whatever was given on the command line
fn apply_overrides(config: &mut RelayConfig, matches: &ArgMatches) -> Result<(), RelayError> {
    if let Some(format) = matches.get_one::<String>("format") {
        config.caps.format = format.parse()?;
    }
    if let Some(width) = matches.get_one::<u32>("width") {
        config.caps.width = *width;
    }
    if let Some(height) = matches.get_one::<u32>("height") {
        config.caps.height = *height;
    }
    if let Some(fps) = matches.get_one::<String>("fps") {
        config.caps.framerate = fps.parse()?;
    }
    if let Some(kind) = matches.get_one::<String>("transform") {
        config.transform.kind = kind.parse()?;
    }
    if let Some(n) = matches.get_one::<u64>("num-buffers") {
        config.capture.num_buffers = Some(*n);
    }
    if let Some(host) = matches.get_one::<String>("host") {
        config.transmit.get_or_insert_with(Default::default).host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.transmit.get_or_insert_with(Default::default).port = *port;
    }
    if matches.get_flag("no-transmit") {
        config.transmit = None;
    }
    Ok(())
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<RelayConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            RelayConfig::load(path).with_context(|| format!("Failed to load configuration from {}", path))?
        }
        None => RelayConfig::default(),
    };
    apply_overrides(&mut config, matches).context("Invalid command line option")?;
    config.validate()?;
    Ok(config)
}

async fn run(config: RelayConfig, cancel: CancellationToken, check: bool) -> i32 {
    let relay = match RelayBuilder::from_config(&config) {
        Ok(builder) => builder.with_cancel(cancel).build(),
        Err(e) => {
            error!("{}", e);
            return e.kind().exit_code();
        }
    };

    if check {
        return match relay.check().await {
            Ok(negotiated) => {
                info!("Check passed, capture caps {}", negotiated.capture);
                0
            }
            Err(e) => e.kind().exit_code(),
        };
    }

    match relay.run().await {
        Ok(report) => {
            info!("Relay finished: {}", report.reason);
            report.exit_code()
        }
        Err(e) => {
            error!("Relay ended with {}: {}", e.kind(), e);
            e.kind().exit_code()
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = cli().get_matches();
    info!("{} v{} ({})", app_name(), version(), assets::TARGET_OS);

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            process::exit(ErrorKind::Config.exit_code());
        }
    };

    let cancel = CancellationToken::new();
    if let Err(e) = workers::install_stop_handler(cancel.clone()) {
        error!("Error setting Ctrl-C handler: {}", e);
    }
    #[cfg(feature = "hotkeys")]
    workers::spawn_stop_listener(cancel.clone());

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start the async runtime: {}", e);
            process::exit(ErrorKind::Io.exit_code());
        }
    };

    let code = runtime.block_on(run(config, cancel, matches.get_flag("check")));
    runtime.shutdown_timeout(Duration::from_secs(1));
    process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformKind;
    use crate::pipeline::PixelFormat;

    fn parse(args: &[&str]) -> ArgMatches {
        cli()
            .try_get_matches_from(std::iter::once("framerelay").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_overrides() {
        let matches = parse(&[
            "--format", "rgb", "--width", "320", "--height", "240", "--fps", "15", "--transform",
            "square", "--num-buffers", "10", "--host", "10.0.0.2", "--port", "6000",
        ]);
        let mut config = RelayConfig::default();
        apply_overrides(&mut config, &matches).unwrap();

        assert_eq!(config.caps.format, PixelFormat::Rgb8);
        assert_eq!((config.caps.width, config.caps.height), (320, 240));
        assert_eq!(config.caps.framerate.to_string(), "15/1");
        assert_eq!(config.transform.kind, TransformKind::Square);
        assert_eq!(config.capture.num_buffers, Some(10));
        let transmit = config.transmit.unwrap();
        assert_eq!((transmit.host.as_str(), transmit.port), ("10.0.0.2", 6000));
    }

    #[test]
    fn test_no_transmit_wins() {
        let matches = parse(&["--port", "6000", "--no-transmit"]);
        let mut config = RelayConfig::default();
        apply_overrides(&mut config, &matches).unwrap();
        assert!(config.transmit.is_none());
    }

    #[test]
    fn test_bad_values() {
        let mut config = RelayConfig::default();
        let err = apply_overrides(&mut config, &parse(&["--format", "yuv"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        assert!(
            cli()
                .try_get_matches_from(["framerelay", "--port", "0"])
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_check_exit_code() {
        let config = RelayConfig {
            transmit: None,
            ..RelayConfig::default()
        };
        assert_eq!(run(config, CancellationToken::new(), true).await, 0);
    }
}
