//! Consumidor de console: consulta o store a cada tick e imprime o que mudou.

use trig_telemetry::store::StoreSnapshot;
use trig_telemetry::{ConnectionState, Record};

/// Lembra o que já foi mostrado para imprimir só as mudanças.
#[derive(Debug, Default)]
pub struct ConsoleView {
    shown_version: u64,
    shown_state: Option<ConnectionState>,
}

impl ConsoleView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linhas novas para o snapshot atual.
    pub fn updates(&mut self, snapshot: &StoreSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if self.shown_state.as_ref() != Some(&snapshot.state) {
            lines.push(status_line(&snapshot.state));
            self.shown_state = Some(snapshot.state.clone());
        }

        if snapshot.version != self.shown_version {
            self.shown_version = snapshot.version;
            if let Some(record) = &snapshot.record {
                lines.push(format_record(record));
            }
        }

        lines
    }

    pub fn refresh(&mut self, snapshot: &StoreSnapshot) {
        for line in self.updates(snapshot) {
            println!("{line}");
        }
    }
}

pub fn status_line(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "Status: Disconnected".into(),
        ConnectionState::Connecting => "Status: Connecting...".into(),
        ConnectionState::Connected => "Status: Connected".into(),
        ConnectionState::Failed(reason) => format!("Status: Error ({reason})"),
    }
}

pub fn format_record(r: &Record) -> String {
    let tan = if r.has_vertical_tangent() {
        "∞".to_string()
    } else {
        format!("{:.3}", r.tangent)
    };
    format!(
        "Angle: {:.1}° | Base: {:.1} cm   Height: {:.1} cm   Hypo: {:.1} cm | sin: {:.3}   cos: {:.3}   tan: {tan}",
        r.angle_degrees, r.base, r.height, r.hypotenuse, r.sine, r.cosine
    )
}
