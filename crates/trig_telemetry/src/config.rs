//! Configuração via `config.toml`.
//!
//! O baud rate não aparece aqui: é fixo no firmware ([`crate::link::BAUD_RATE`]).

use crate::discovery::DEFAULT_DEVICE_TOKENS;
use crate::protocol::RecordLayout;
use crate::reader::ReaderSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Erros ao persistir a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao serializar configuração: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro ao escrever {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Conexão com o dispositivo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Porta fixa (vazio = detectar pelos tokens)
    pub port: String,
    /// Tokens procurados na descrição da porta
    pub device_tokens: Vec<String>,
    /// Timeout de cada leitura (ms)
    pub read_timeout_ms: u64,
    /// Espera após abrir a porta (ms)
    pub settle_delay_ms: u64,
    /// "six_line" ou "seven_line"
    pub layout: RecordLayout,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            device_tokens: DEFAULT_DEVICE_TOKENS.iter().map(|t| t.to_string()).collect(),
            read_timeout_ms: 1000,
            settle_delay_ms: 2000,
            layout: RecordLayout::SixLine,
        }
    }
}

impl LinkConfig {
    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            layout: self.layout,
        }
    }
}

/// Consumidor de console.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Intervalo de atualização da tela (ms)
    pub refresh_interval_ms: u64,
    /// Bytes por leitura no modo replay
    pub replay_chunk_size: usize,
    /// Pausa entre leituras no modo replay (ms)
    pub replay_pacing_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 250,
            replay_chunk_size: 64,
            replay_pacing_ms: 20,
        }
    }
}

/// Configuração raiz.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Carrega de um arquivo TOML; em qualquer erro usa os padrões.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// `config.toml` ao lado do executável.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.link.port.is_empty() && self.link.device_tokens.iter().all(|t| t.is_empty()) {
            errors.push("Sem porta fixa e sem tokens de detecção".into());
        }
        if self.link.read_timeout_ms == 0 || self.link.read_timeout_ms > 10_000 {
            errors.push(format!(
                "Timeout de leitura inválido: {} ms (1–10000)",
                self.link.read_timeout_ms
            ));
        }
        if self.link.settle_delay_ms > 30_000 {
            errors.push(format!(
                "Espera de estabilização muito longa: {} ms (máx. 30000)",
                self.link.settle_delay_ms
            ));
        }
        if self.monitor.refresh_interval_ms == 0 {
            errors.push("Intervalo de atualização não pode ser 0".into());
        }
        if self.monitor.replay_chunk_size == 0 {
            errors.push("Tamanho do bloco de replay não pode ser 0".into());
        }

        errors
    }
}
