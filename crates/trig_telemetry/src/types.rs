//! Tipos compartilhados entre o leitor serial e o consumidor.
//!
//! Um [`Record`] corresponde a um bloco completo emitido pelo firmware:
//! as medidas do triângulo retângulo e os valores trigonométricos derivados.

use serde::{Deserialize, Serialize};
use std::fmt;

// ──────────────────────────────────────────────
// Record
// ──────────────────────────────────────────────

/// Amostra de telemetria totalmente decodificada.
///
/// Só é construída com todos os campos preenchidos; cada ciclo de
/// decodificação gera um valor novo.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Cateto adjacente (cm)
    pub base: f64,
    /// Cateto oposto (cm)
    pub height: f64,
    /// Hipotenusa (cm)
    pub hypotenuse: f64,
    /// Ângulo da base (graus, esperado 0–90)
    pub angle_degrees: f64,
    pub sine: f64,
    pub cosine: f64,
    /// `f64::INFINITY` quando a tangente é indefinida (ângulo de 90°)
    pub tangent: f64,
}

impl Record {
    /// Tangente vertical (firmware enviou `∞`).
    pub fn has_vertical_tangent(&self) -> bool {
        self.tangent == f64::INFINITY
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "base={} height={} hypo={} angle={}° sin={} cos={} tan={}",
            self.base,
            self.height,
            self.hypotenuse,
            self.angle_degrees,
            self.sine,
            self.cosine,
            self.tangent
        )
    }
}

// ──────────────────────────────────────────────
// Estado da conexão
// ──────────────────────────────────────────────

/// Estado da conexão visível ao consumidor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("Disconnected"),
            ConnectionState::Connecting => f.write_str("Connecting"),
            ConnectionState::Connected => f.write_str("Connected"),
            ConnectionState::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// Fase da máquina de estados do leitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReaderPhase {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Stopped,
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
