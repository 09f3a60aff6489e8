//! Descoberta da porta do dispositivo.

use crate::link::ConnectError;
use serialport::SerialPortType;
use tracing::debug;

/// Tokens padrão procurados na descrição da porta.
pub const DEFAULT_DEVICE_TOKENS: [&str; 2] = ["Arduino", "CH340"];

/// Porta serial com a descrição usada no casamento.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: String,
    pub description: String,
}

/// Retorna a primeira porta cuja descrição contém algum dos tokens.
pub fn find_device_port(ports: &[PortDescriptor], tokens: &[String]) -> Option<String> {
    ports
        .iter()
        .find(|port| {
            tokens
                .iter()
                .any(|token| !token.is_empty() && port.description.contains(token.as_str()))
        })
        .map(|port| port.name.clone())
}

/// Lista as portas do sistema.
pub fn available_ports() -> Result<Vec<PortDescriptor>, ConnectError> {
    let ports = serialport::available_ports().map_err(|e| ConnectError::IoFailure {
        port: "*".into(),
        reason: format!("Falha ao enumerar portas: {e}"),
    })?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                SerialPortType::UsbPort(info) => [info.product, info.manufacturer]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" "),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            };
            debug!("Porta {}: {description}", p.port_name);
            PortDescriptor {
                name: p.port_name,
                description,
            }
        })
        .collect())
}

/// Enumera as portas e escolhe a do dispositivo.
pub fn discover_device_port(tokens: &[String]) -> Result<String, ConnectError> {
    let ports = available_ports()?;
    find_device_port(&ports, tokens)
        .ok_or_else(|| ConnectError::NotFound(format!("nenhuma porta com {tokens:?}")))
}
