//! Thread de leitura: link → framer → decoder → store.
//!
//! Máquina de estados:
//!
//! ```text
//! Idle ──connect──▶ Connecting ──settle──▶ Streaming ──▶ Stopped
//!                       │                                  ▲
//!                       └──────── falha ao abrir ──────────┘
//! ```
//!
//! O leitor nunca fala com a apresentação; só publica no
//! [`LatestRecordStore`]. O pedido de desconexão é um flag verificado a cada
//! volta do loop, então a latência máxima é um timeout de leitura.

use crate::link::{BAUD_RATE, ConnectError, LinkError, SerialLink, SerialPortLink};
use crate::protocol::{LineFramer, RecordDecoder, RecordLayout};
use crate::store::LatestRecordStore;
use crate::types::{ConnectionState, ReaderPhase};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Fatia do settle: o stop é observado na mesma cadência das leituras.
fn settle_slice(read_timeout: Duration) -> Duration {
    read_timeout.max(Duration::from_millis(1))
}

/// Parâmetros de uma sessão de leitura.
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    /// Espera máxima de cada leitura no link
    pub read_timeout: Duration,
    /// Espera após abrir o link antes de considerar os dados válidos
    pub settle_delay: Duration,
    pub layout: RecordLayout,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            layout: RecordLayout::default(),
        }
    }
}

// ──────────────────────────────────────────────
// Estatísticas
// ──────────────────────────────────────────────

/// Contadores atualizados pela thread do leitor.
#[derive(Debug, Default)]
pub struct ReaderStats {
    bytes_read: AtomicU64,
    lines_framed: AtomicU64,
    records_decoded: AtomicU64,
    decode_errors: AtomicU64,
}

impl ReaderStats {
    fn record_bytes(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn record_line(&self) {
        self.lines_framed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_decoded(&self) {
        self.records_decoded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn lines_framed(&self) -> u64 {
        self.lines_framed.load(Ordering::Relaxed)
    }

    pub fn records_decoded(&self) -> u64 {
        self.records_decoded.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }
}

// ──────────────────────────────────────────────
// Leitor
// ──────────────────────────────────────────────

/// Dono do link e da thread de leitura.
pub struct TelemetryReader {
    store: Arc<LatestRecordStore>,
    settings: ReaderSettings,
    phase: Arc<RwLock<ReaderPhase>>,
    stop_flag: Arc<AtomicBool>,
    stats: Arc<ReaderStats>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryReader {
    pub fn new(store: Arc<LatestRecordStore>, settings: ReaderSettings) -> Self {
        Self {
            store,
            settings,
            phase: Arc::new(RwLock::new(ReaderPhase::Idle)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ReaderStats::default()),
            handle: None,
        }
    }

    pub fn phase(&self) -> ReaderPhase {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// `true` entre a abertura do link e a parada da thread.
    pub fn is_running(&self) -> bool {
        matches!(self.phase(), ReaderPhase::Connecting | ReaderPhase::Streaming)
    }

    pub fn stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Abre a porta serial indicada no baud rate do firmware.
    pub fn connect_port(&mut self, port: &str) -> Result<(), ConnectError> {
        let port = port.to_string();
        let timeout = self.settings.read_timeout;
        self.connect_with(move || SerialPortLink::open(&port, BAUD_RATE, timeout))
    }

    /// Abre um link com `open` e inicia a thread de leitura.
    ///
    /// A falha ao abrir volta para quem chamou e também fica registrada no
    /// store como `Failed`. Uma sessão anterior ainda ativa é encerrada antes.
    pub fn connect_with<L, F>(&mut self, open: F) -> Result<(), ConnectError>
    where
        L: SerialLink + 'static,
        F: FnOnce() -> Result<L, ConnectError>,
    {
        if self.handle.is_some() {
            self.disconnect();
        }

        set_phase(&self.phase, ReaderPhase::Connecting);
        self.store.set_state(ConnectionState::Connecting);

        let link = match open() {
            Ok(link) => link,
            Err(e) => {
                error!("Falha na conexão: {e}");
                self.store.set_state(ConnectionState::Failed(e.to_string()));
                set_phase(&self.phase, ReaderPhase::Stopped);
                return Err(e);
            }
        };

        let port_name = link.name().to_string();
        self.stop_flag.store(false, Ordering::SeqCst);

        let session = Session {
            store: Arc::clone(&self.store),
            phase: Arc::clone(&self.phase),
            stop_flag: Arc::clone(&self.stop_flag),
            stats: Arc::clone(&self.stats),
            settings: self.settings.clone(),
        };

        let spawned = std::thread::Builder::new()
            .name("serial-reader".into())
            .spawn(move || session.run(link));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                let err = ConnectError::IoFailure {
                    port: port_name,
                    reason: format!("falha ao criar thread: {e}"),
                };
                self.store.set_state(ConnectionState::Failed(err.to_string()));
                set_phase(&self.phase, ReaderPhase::Stopped);
                Err(err)
            }
        }
    }

    /// Pede a parada da thread e espera ela terminar. Idempotente.
    ///
    /// O registro do store é limpo e o estado vira `Disconnected`.
    pub fn disconnect(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        info!("Desconexão solicitada");
        self.stop_flag.store(true, Ordering::SeqCst);

        if handle.join().is_err() {
            error!("Thread do leitor terminou com panic");
            set_phase(&self.phase, ReaderPhase::Stopped);
        }

        self.store.clear();
        self.store.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for TelemetryReader {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn set_phase(phase: &RwLock<ReaderPhase>, next: ReaderPhase) {
    let mut guard = phase.write().unwrap_or_else(PoisonError::into_inner);
    debug!("Leitor: {:?} → {:?}", *guard, next);
    *guard = next;
}

// ──────────────────────────────────────────────
// Thread
// ──────────────────────────────────────────────

/// Motivo do fim do streaming.
enum StreamEnd {
    Requested,
    EndOfStream,
    Failed(String),
}

/// Estado compartilhado levado para dentro da thread.
struct Session {
    store: Arc<LatestRecordStore>,
    phase: Arc<RwLock<ReaderPhase>>,
    stop_flag: Arc<AtomicBool>,
    stats: Arc<ReaderStats>,
    settings: ReaderSettings,
}

impl Session {
    fn run<L: SerialLink>(self, mut link: L) {
        let end = if self.settle() {
            self.stream(&mut link)
        } else {
            StreamEnd::Requested
        };

        link.close();

        let state = match end {
            StreamEnd::Requested => {
                info!("Leitura de {} encerrada", link.name());
                ConnectionState::Disconnected
            }
            StreamEnd::EndOfStream => {
                info!("Fluxo de {} terminou", link.name());
                ConnectionState::Disconnected
            }
            StreamEnd::Failed(reason) => ConnectionState::Failed(reason),
        };

        set_phase(&self.phase, ReaderPhase::Stopped);
        self.store.set_state(state);
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Espera o firmware estabilizar. Retorna `false` se o stop chegou antes.
    fn settle(&self) -> bool {
        let deadline = Instant::now() + self.settings.settle_delay;
        let slice = settle_slice(self.settings.read_timeout);
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(slice));
        }
    }

    fn stream<L: SerialLink>(&self, link: &mut L) -> StreamEnd {
        let mut framer = LineFramer::new();
        let mut decoder = RecordDecoder::new(self.settings.layout);

        set_phase(&self.phase, ReaderPhase::Streaming);
        self.store.set_state(ConnectionState::Connected);
        info!("Recebendo telemetria de {}", link.name());

        let end = loop {
            if self.stop_requested() {
                break StreamEnd::Requested;
            }

            let bytes = match link.read_available() {
                Ok(bytes) => bytes,
                Err(LinkError::EndOfStream) => break StreamEnd::EndOfStream,
                Err(LinkError::Io(e)) => {
                    error!("Erro de leitura em {}: {e}", link.name());
                    break StreamEnd::Failed(e.to_string());
                }
            };
            if bytes.is_empty() {
                continue;
            }
            self.stats.record_bytes(bytes.len());

            for line in framer.feed(&bytes) {
                self.stats.record_line();
                match decoder.push_line(&line) {
                    Some(Ok(record)) => {
                        self.stats.record_decoded();
                        debug!("Registro: {record}");
                        self.store.publish(record);
                    }
                    Some(Err(e)) => {
                        self.stats.record_decode_error();
                        warn!("Registro descartado: {e}");
                    }
                    None => {}
                }
            }
        };

        if framer.pending_len() > 0 {
            debug!("{} bytes sem terminador descartados", framer.pending_len());
        }
        if let Err(e) = decoder.finish() {
            self.stats.record_decode_error();
            warn!("{e}");
        }

        end
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ReplayLink;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    const RECORD_TEXT: &str = "Base (Adj.): 3.0 cm\r\nHypo: 5.0 cm\r\nHeight: 4.0 cm\r\n\
                               Angle: 53.1 deg\r\nsin:0.800\r\ntan:1.333\r\n";

    /// Link em memória: entrega os itens roteirizados e depois fica ocioso.
    struct ScriptedLink {
        script: VecDeque<Result<Vec<u8>, LinkError>>,
        idle: Duration,
        closes: Arc<AtomicUsize>,
        open: bool,
    }

    impl ScriptedLink {
        fn new(script: Vec<Result<Vec<u8>, LinkError>>) -> (Self, Arc<AtomicUsize>) {
            let closes = Arc::new(AtomicUsize::new(0));
            let link = Self {
                script: script.into(),
                idle: Duration::from_millis(20),
                closes: Arc::clone(&closes),
                open: true,
            };
            (link, closes)
        }
    }

    impl SerialLink for ScriptedLink {
        fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
            match self.script.pop_front() {
                Some(item) => item,
                None => {
                    std::thread::sleep(self.idle);
                    Ok(Vec::new())
                }
            }
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn test_settings() -> ReaderSettings {
        ReaderSettings {
            read_timeout: Duration::from_millis(20),
            settle_delay: Duration::ZERO,
            layout: RecordLayout::SixLine,
        }
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timeout esperando: {what}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn chunked(text: &str, size: usize) -> Vec<Result<Vec<u8>, LinkError>> {
        text.as_bytes().chunks(size).map(|c| Ok(c.to_vec())).collect()
    }

    #[test]
    fn publishes_decoded_record() {
        let store = Arc::new(LatestRecordStore::new());
        let mut reader = TelemetryReader::new(Arc::clone(&store), test_settings());
        let (link, closes) = ScriptedLink::new(chunked(RECORD_TEXT, 5));

        assert_eq!(reader.phase(), ReaderPhase::Idle);
        reader.connect_with(move || Ok(link)).unwrap();
        wait_until("registro publicado", || store.version() == 1);

        let record = store.read().unwrap();
        assert_eq!(record.base, 3.0);
        assert_eq!(record.hypotenuse, 5.0);
        assert_eq!(record.height, 4.0);
        assert_eq!(record.angle_degrees, 53.1);
        assert_eq!(record.sine, 0.800);
        assert_eq!(record.tangent, 1.333);
        assert_eq!(store.state(), ConnectionState::Connected);
        assert!(reader.is_running());

        let stats = reader.stats();
        assert_eq!(stats.records_decoded(), 1);
        assert_eq!(stats.lines_framed(), 6);
        assert_eq!(stats.bytes_read(), RECORD_TEXT.len() as u64);

        reader.disconnect();
        assert_eq!(reader.phase(), ReaderPhase::Stopped);
        assert_eq!(store.read(), None);
        assert_eq!(store.state(), ConnectionState::Disconnected);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_mid_stream_is_bounded_and_closes_once() {
        let store = Arc::new(LatestRecordStore::new());
        let mut reader = TelemetryReader::new(Arc::clone(&store), test_settings());
        // Metade de um registro e depois silêncio
        let (link, closes) = ScriptedLink::new(chunked(&RECORD_TEXT[..40], 40));

        reader.connect_with(move || Ok(link)).unwrap();
        let stats = reader.stats();
        wait_until("duas linhas", || stats.lines_framed() == 2);
        assert_eq!(reader.phase(), ReaderPhase::Streaming);

        let started = Instant::now();
        reader.disconnect();
        let elapsed = started.elapsed();

        // Um timeout de leitura (20 ms) com folga para o escalonador
        assert!(elapsed < Duration::from_millis(500), "demorou {elapsed:?}");
        assert_eq!(reader.phase(), ReaderPhase::Stopped);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        // Registro incompleto contado como erro
        assert_eq!(reader.stats().decode_errors(), 1);

        reader.disconnect();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn io_failure_stops_reader_and_keeps_stale_record() {
        let store = Arc::new(LatestRecordStore::new());
        let mut reader = TelemetryReader::new(Arc::clone(&store), test_settings());
        let mut script = chunked(RECORD_TEXT, 64);
        script.push(Err(LinkError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "cabo removido",
        ))));
        let (link, closes) = ScriptedLink::new(script);

        reader.connect_with(move || Ok(link)).unwrap();
        wait_until("parada", || reader.phase() == ReaderPhase::Stopped);

        match store.state() {
            ConnectionState::Failed(reason) => assert!(reason.contains("cabo removido")),
            other => panic!("estado inesperado: {other:?}"),
        }
        assert_eq!(store.read().map(|r| r.base), Some(3.0));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!reader.is_running());
    }

    #[test]
    fn connect_failure_is_returned_and_recorded() {
        let store = Arc::new(LatestRecordStore::new());
        let mut reader = TelemetryReader::new(Arc::clone(&store), test_settings());

        let result = reader.connect_with(|| -> Result<ScriptedLink, ConnectError> {
            Err(ConnectError::NotFound("COM9".into()))
        });

        assert!(matches!(result, Err(ConnectError::NotFound(_))));
        assert_eq!(reader.phase(), ReaderPhase::Stopped);
        assert!(matches!(store.state(), ConnectionState::Failed(_)));
        // Sem thread: desconectar não faz nada
        reader.disconnect();
        assert!(matches!(store.state(), ConnectionState::Failed(_)));
    }

    #[test]
    fn malformed_lines_are_recovered() {
        let store = Arc::new(LatestRecordStore::new());
        let mut reader = TelemetryReader::new(Arc::clone(&store), test_settings());
        let text = format!("Base (Adj.): ?? cm\nlixo\n{RECORD_TEXT}");
        let (link, _closes) = ScriptedLink::new(chunked(&text, 16));

        reader.connect_with(move || Ok(link)).unwrap();
        wait_until("registro publicado", || store.version() == 1);

        assert_eq!(reader.stats().decode_errors(), 1);
        assert_eq!(store.read().map(|r| r.tangent), Some(1.333));
        reader.disconnect();
    }

    #[test]
    fn replay_runs_until_end_of_stream() {
        let store = Arc::new(LatestRecordStore::new());
        let mut reader = TelemetryReader::new(Arc::clone(&store), test_settings());
        let second = RECORD_TEXT.replace("tan:1.333", "tan:∞");
        let text = format!("{RECORD_TEXT}{second}Base (Adj.): 1.0 cm\nHypo: 2.0 cm\n");
        let link = ReplayLink::new("replay", Cursor::new(text.into_bytes()), 11, Duration::ZERO);

        reader.connect_with(move || Ok(link)).unwrap();
        wait_until("fim do replay", || reader.phase() == ReaderPhase::Stopped);

        let stats = reader.stats();
        assert_eq!(stats.records_decoded(), 2);
        assert_eq!(stats.decode_errors(), 1);
        assert_eq!(store.state(), ConnectionState::Disconnected);
        assert_eq!(store.read().map(|r| r.tangent), Some(f64::INFINITY));
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn disconnect_during_settle_delay() {
        let store = Arc::new(LatestRecordStore::new());
        let settings = ReaderSettings {
            settle_delay: Duration::from_secs(30),
            ..test_settings()
        };
        let mut reader = TelemetryReader::new(Arc::clone(&store), settings);
        let (link, closes) = ScriptedLink::new(chunked(RECORD_TEXT, 8));

        reader.connect_with(move || Ok(link)).unwrap();
        assert_eq!(reader.phase(), ReaderPhase::Connecting);
        assert_eq!(store.state(), ConnectionState::Connecting);

        let started = Instant::now();
        reader.disconnect();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(reader.phase(), ReaderPhase::Stopped);
        assert_eq!(store.version(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn settle_sleeps_in_read_timeout_slices() {
        assert_eq!(settle_slice(Duration::from_millis(250)), Duration::from_millis(250));
        assert_eq!(settle_slice(Duration::ZERO), Duration::from_millis(1));

        let store = Arc::new(LatestRecordStore::new());
        let settings = ReaderSettings {
            read_timeout: Duration::from_millis(150),
            settle_delay: Duration::from_secs(30),
            ..test_settings()
        };
        let mut reader = TelemetryReader::new(Arc::clone(&store), settings);
        let (link, closes) = ScriptedLink::new(Vec::new());

        reader.connect_with(move || Ok(link)).unwrap();
        let started = Instant::now();
        reader.disconnect();
        // No máximo uma fatia de 150 ms até o stop ser visto
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reconnect_replaces_previous_session() {
        let store = Arc::new(LatestRecordStore::new());
        let mut reader = TelemetryReader::new(Arc::clone(&store), test_settings());
        let (first, first_closes) = ScriptedLink::new(Vec::new());
        let (second, second_closes) = ScriptedLink::new(chunked(RECORD_TEXT, 32));

        reader.connect_with(move || Ok(first)).unwrap();
        reader.connect_with(move || Ok(second)).unwrap();
        assert_eq!(first_closes.load(Ordering::SeqCst), 1);

        wait_until("registro publicado", || store.version() == 1);
        drop(reader);
        assert_eq!(second_closes.load(Ordering::SeqCst), 1);
    }
}
