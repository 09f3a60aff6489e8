//! # Trig Telemetry
//!
//! Ingestão da telemetria serial do firmware Trigno: medidas de um
//! triângulo retângulo e os valores trigonométricos derivados.
//!
//! ## Módulos
//! - [`link`] – Conexão serial (e replay de logs) atrás do trait [`SerialLink`]
//! - [`protocol`] – Framing de linhas e decoder âncora → campos
//! - [`reader`] – Thread de leitura e máquina de estados da conexão
//! - [`store`] – Slot único com o último registro
//! - [`discovery`] – Escolha da porta pelo nome do dispositivo
//! - [`config`] – Configuração via TOML
//! - [`types`] – [`Record`] e estados

pub mod config;
pub mod discovery;
pub mod link;
pub mod protocol;
pub mod reader;
pub mod store;
pub mod types;

// Re-exports convenientes
pub use config::AppConfig;
pub use link::{BAUD_RATE, ConnectError, LinkError, ReplayLink, SerialLink, SerialPortLink};
pub use protocol::{DecodeError, LineFramer, RecordDecoder, RecordLayout};
pub use reader::{ReaderSettings, ReaderStats, TelemetryReader};
pub use store::LatestRecordStore;
pub use types::{ConnectionState, ReaderPhase, Record};
