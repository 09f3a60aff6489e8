//! Thread que lê comandos do stdin e envia para o loop principal via channel.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::io::BufRead;
use tracing::{debug, info};

/// Comando digitado pelo usuário.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Disconnect,
}

/// Inicia a thread de entrada. Retorna o receiver do channel.
pub fn spawn_input_thread() -> Receiver<Command> {
    let (tx, rx) = bounded::<Command>(4);

    std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || input_loop(&tx))
        .expect("Falha ao criar thread de entrada");

    rx
}

fn input_loop(tx: &Sender<Command>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!("stdin indisponível: {e}");
                return;
            }
        };

        match parse_command(&line) {
            Some(cmd) => {
                info!("Comando: {cmd:?}");
                if tx.send(cmd).is_err() {
                    return;
                }
            }
            None if line.trim().is_empty() => {}
            None => debug!("Comando desconhecido: {line:?}"),
        }
    }
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_lowercase().as_str() {
        "q" | "quit" | "d" | "disconnect" => Some(Command::Disconnect),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_disconnect_aliases() {
        for input in ["q", "Q\n", "  quit ", "d", "DISCONNECT"] {
            assert_eq!(parse_command(input), Some(Command::Disconnect), "{input:?}");
        }
    }

    #[test]
    fn ignores_other_input() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("connect"), None);
    }
}
