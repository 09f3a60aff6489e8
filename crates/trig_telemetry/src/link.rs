//! Conexão com o dispositivo.
//!
//! [`SerialLink`] é o único ponto de I/O do pipeline; o leitor é dono
//! exclusivo do link durante toda a sessão.

use serialport::SerialPort;
use std::io::{ErrorKind, Read};
use std::time::Duration;
use tracing::{debug, info};

/// Baud rate fixo do firmware.
pub const BAUD_RATE: u32 = 9600;

/// Tamanho do buffer de leitura por chamada.
const READ_CHUNK: usize = 256;

/// Falha ao abrir uma conexão.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Dispositivo não encontrado: {0}")]
    NotFound(String),

    #[error("Falha ao abrir {port}: {reason}")]
    IoFailure { port: String, reason: String },
}

/// Falha durante a leitura; encerra o streaming.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fim do fluxo")]
    EndOfStream,
}

/// Fonte de bytes do pipeline.
pub trait SerialLink: Send {
    /// Lê o que estiver disponível, esperando no máximo o timeout do link.
    ///
    /// Timeout não é erro: retorna um vetor vazio.
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError>;

    /// Fecha o link. Chamadas repetidas não têm efeito.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn name(&self) -> &str;
}

// ──────────────────────────────────────────────
// Porta serial
// ──────────────────────────────────────────────

/// Link sobre uma porta serial real (crate `serialport`).
pub struct SerialPortLink {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortLink {
    /// Abre `port_name` em 8N1 com o timeout de leitura indicado.
    pub fn open(port_name: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, ConnectError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => ConnectError::NotFound(port_name.to_string()),
                serialport::ErrorKind::Io(ErrorKind::NotFound) => {
                    ConnectError::NotFound(port_name.to_string())
                }
                _ => ConnectError::IoFailure {
                    port: port_name.to_string(),
                    reason: e.to_string(),
                },
            })?;

        info!("Porta {port_name} aberta a {baud_rate} baud");
        Ok(Self {
            port_name: port_name.to_string(),
            port: Some(port),
        })
    }
}

impl SerialLink for SerialPortLink {
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        let Some(port) = self.port.as_mut() else {
            return Err(LinkError::Io(std::io::Error::new(
                ErrorKind::NotConnected,
                "porta fechada",
            )));
        };

        let mut buf = [0u8; READ_CHUNK];
        match port.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(Vec::new())
            }
            Err(e) => Err(LinkError::Io(e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Porta {} fechada", self.port_name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

// ──────────────────────────────────────────────
// Replay
// ──────────────────────────────────────────────

/// Reproduz um log capturado como se viesse da serial.
///
/// Entrega `chunk_size` bytes por leitura, dormindo `pacing` entre elas.
pub struct ReplayLink<R> {
    name: String,
    source: Option<R>,
    chunk_size: usize,
    pacing: Duration,
}

impl<R: Read + Send> ReplayLink<R> {
    pub fn new(name: impl Into<String>, source: R, chunk_size: usize, pacing: Duration) -> Self {
        Self {
            name: name.into(),
            source: Some(source),
            chunk_size: chunk_size.max(1),
            pacing,
        }
    }
}

impl<R: Read + Send> SerialLink for ReplayLink<R> {
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        let Some(source) = self.source.as_mut() else {
            return Err(LinkError::EndOfStream);
        };

        if !self.pacing.is_zero() {
            std::thread::sleep(self.pacing);
        }

        let mut buf = vec![0u8; self.chunk_size];
        let n = source.read(&mut buf)?;
        if n == 0 {
            debug!("Replay {} chegou ao fim", self.name);
            return Err(LinkError::EndOfStream);
        }
        buf.truncate(n);
        Ok(buf)
    }

    fn close(&mut self) {
        self.source = None;
    }

    fn is_open(&self) -> bool {
        self.source.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn replay_delivers_chunks_then_end_of_stream() {
        let mut link = ReplayLink::new("log", Cursor::new(b"abcdefg".to_vec()), 3, Duration::ZERO);
        assert_eq!(link.read_available().unwrap(), b"abc");
        assert_eq!(link.read_available().unwrap(), b"def");
        assert_eq!(link.read_available().unwrap(), b"g");
        assert!(matches!(link.read_available(), Err(LinkError::EndOfStream)));
    }

    #[test]
    fn replay_close_is_idempotent() {
        let mut link = ReplayLink::new("log", Cursor::new(Vec::new()), 8, Duration::ZERO);
        assert!(link.is_open());
        link.close();
        link.close();
        assert!(!link.is_open());
        assert!(matches!(link.read_available(), Err(LinkError::EndOfStream)));
    }

    #[test]
    fn opening_missing_port_is_not_found() {
        let result = SerialPortLink::open(
            "/dev/trig-telemetry-inexistente",
            BAUD_RATE,
            Duration::from_millis(10),
        );
        assert!(matches!(
            result,
            Err(ConnectError::NotFound(ref port)) if port == "/dev/trig-telemetry-inexistente"
        ));
    }

    #[test]
    fn connect_error_messages() {
        let err = ConnectError::NotFound("COM7".into());
        assert_eq!(err.to_string(), "Dispositivo não encontrado: COM7");
        let err = ConnectError::IoFailure {
            port: "COM7".into(),
            reason: "acesso negado".into(),
        };
        assert_eq!(err.to_string(), "Falha ao abrir COM7: acesso negado");
    }
}
