//! Slot único com o último registro publicado.
//!
//! Escrito apenas pela thread do leitor, lido pelo consumidor quando quiser.
//! A troca do valor é atômica: quem lê vê o registro anterior ou o novo,
//! nunca uma mistura dos dois.

use crate::types::{ConnectionState, Record};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Leitura consistente de registro, estado e versão.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub record: Option<Record>,
    pub state: ConnectionState,
    pub version: u64,
}

#[derive(Debug, Default)]
struct Slot {
    record: Option<Record>,
    state: ConnectionState,
}

#[derive(Debug, Default)]
pub struct LatestRecordStore {
    slot: RwLock<Slot>,
    /// Incrementada a cada `publish`
    version: AtomicU64,
}

impl LatestRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitui o registro atual.
    pub fn publish(&self, record: Record) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.record = Some(record);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Último registro publicado, se houver.
    pub fn read(&self) -> Option<Record> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).record
    }

    /// Remove o registro, mantendo o estado da conexão.
    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.record = None;
    }

    pub fn set_state(&self, state: ConnectionState) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.state = state;
    }

    pub fn state(&self) -> ConnectionState {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    /// Quantidade de publicações desde a criação.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        StoreSnapshot {
            record: slot.record,
            state: slot.state.clone(),
            version: self.version(),
        }
    }
}
