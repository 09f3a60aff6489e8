//! # Trigno Monitor
//!
//! Lê a telemetria do firmware Trigno pela serial e mostra cada registro
//! no console.
//!
//! ## Uso
//! ```bash
//! trig_monitor                          # detecta a porta (Arduino / CH340)
//! trig_monitor --port /dev/ttyACM0      # porta fixa
//! trig_monitor --replay captura.txt     # reproduz um log gravado
//! trig_monitor --config outro.toml
//! ```
//!
//! Digite `q` + Enter para desconectar.

mod console;
mod input_thread;

use console::ConsoleView;
use crossbeam_channel::RecvTimeoutError;
use input_thread::Command;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use trig_telemetry::config::AppConfig;
use trig_telemetry::discovery::discover_device_port;
use trig_telemetry::{
    BAUD_RATE, ConnectError, ConnectionState, LatestRecordStore, ReplayLink, TelemetryReader,
};

const USAGE: &str = "Uso: trig_monitor [--config CAMINHO] [--port PORTA] [--replay ARQUIVO]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    port: Option<String>,
    replay: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| format!("{flag} requer um valor\n{USAGE}"))
        };
        match arg.as_str() {
            "--config" => parsed.config = Some(value("--config")?.into()),
            "--port" => parsed.port = Some(value("--port")?),
            "--replay" => parsed.replay = Some(value("--replay")?.into()),
            "-h" | "--help" => return Err(USAGE.into()),
            other => return Err(format!("Argumento desconhecido: {other}\n{USAGE}")),
        }
    }
    Ok(parsed)
}

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };

    // ── Config ──
    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }
    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    // ── Leitor ──
    let mut settings = config.link.reader_settings();
    if args.replay.is_some() {
        settings.settle_delay = Duration::ZERO;
    }
    let store = Arc::new(LatestRecordStore::new());
    let mut reader = TelemetryReader::new(Arc::clone(&store), settings);

    if let Err(e) = connect(&mut reader, &args, &config) {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   📐 TRIGNO MONITOR");
    println!("══════════════════════════════════════════════");
    println!("  Baud rate: {BAUD_RATE}");
    println!("  Layout:    {:?}", reader.settings().layout);
    println!("  Digite q + Enter para desconectar");
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop de exibição ──
    let commands = input_thread::spawn_input_thread();
    let refresh = Duration::from_millis(config.monitor.refresh_interval_ms.max(1));
    let mut view = ConsoleView::new();
    let mut stdin_open = true;

    loop {
        if stdin_open {
            match commands.recv_timeout(refresh) {
                Ok(Command::Disconnect) => reader.disconnect(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => stdin_open = false,
            }
        } else {
            std::thread::sleep(refresh);
        }

        view.refresh(&store.snapshot());
        if !reader.is_running() {
            break;
        }
    }
    // O leitor pode ter publicado o último registro depois do snapshot acima
    view.refresh(&store.snapshot());

    let stats = reader.stats();
    info!(
        "Sessão encerrada: {} bytes, {} linhas, {} registros, {} descartados",
        stats.bytes_read(),
        stats.lines_framed(),
        stats.records_decoded(),
        stats.decode_errors()
    );

    match store.state() {
        ConnectionState::Failed(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

fn connect(reader: &mut TelemetryReader, args: &Args, config: &AppConfig) -> Result<(), ConnectError> {
    if let Some(path) = args.replay.clone() {
        let chunk_size = config.monitor.replay_chunk_size;
        let pacing = Duration::from_millis(config.monitor.replay_pacing_ms);
        info!("Reproduzindo {}", path.display());
        return reader.connect_with(move || {
            let name = path.display().to_string();
            let file = File::open(&path).map_err(|e| ConnectError::IoFailure {
                port: name.clone(),
                reason: e.to_string(),
            })?;
            Ok(ReplayLink::new(name, BufReader::new(file), chunk_size, pacing))
        });
    }

    let configured = Some(config.link.port.clone()).filter(|p| !p.is_empty());
    let port = match args.port.clone().or(configured) {
        Some(port) => port,
        None => discover_device_port(&config.link.device_tokens)?,
    };

    info!("Conectando em {port}");
    reader.connect_port(&port)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, String> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_all_flags() {
        let args = parse(&["--port", "COM3", "--config", "x.toml", "--replay", "log.txt"]).unwrap();
        assert_eq!(args.port.as_deref(), Some("COM3"));
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));
        assert_eq!(args.replay, Some(PathBuf::from("log.txt")));
    }

    #[test]
    fn no_flags_means_auto_detect() {
        let args = parse(&[]).unwrap();
        assert!(args.port.is_none() && args.replay.is_none() && args.config.is_none());
    }

    #[test]
    fn rejects_missing_value_and_unknown_flag() {
        let err = parse(&["--port"]).unwrap_err();
        assert!(err.starts_with("--port requer um valor"));
        assert!(parse(&["--replay"]).unwrap_err().contains("--replay requer um valor"));
        assert!(parse(&["--baud", "115200"]).is_err());
    }
}
