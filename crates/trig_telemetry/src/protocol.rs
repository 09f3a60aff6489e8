//! Protocolo de texto do firmware.
//!
//! O firmware emite um registro como um bloco de linhas terminadas em `\n`,
//! sempre na mesma ordem:
//!
//! ```text
//! Base (Adj.): 3.0 cm      ← âncora
//! Hypo: 5.0 cm
//! Height: 4.0 cm
//! Angle: 53.1 deg
//! sin:0.800
//! tan:1.333                ← ou `tan:∞`
//! ```
//!
//! - [`LineFramer`] transforma bytes soltos em linhas completas
//! - [`RecordDecoder`] ancora na linha `Base (Adj.):` e consome as seguintes
//!   sem revalidar os rótulos
//! - [`encode_record`] faz o caminho inverso (replays e testes)

use crate::types::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefixo que identifica o início de um registro.
pub const ANCHOR_PREFIX: &str = "Base (Adj.):";

/// Glifo usado pelo firmware para tangente indefinida (U+221E).
pub const INFINITY_GLYPH: &str = "∞";

/// Maior quantidade de linhas por registro entre os layouts suportados.
const MAX_FIELDS: usize = 7;

// ──────────────────────────────────────────────
// Framing
// ──────────────────────────────────────────────

/// Acumula bytes da serial e entrega linhas completas.
///
/// Bytes após o último `\n` ficam guardados até a próxima chamada de
/// [`LineFramer::feed`]. Uma linha sem terminador nunca é entregue.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    /// Início dos bytes ainda não consumidos em `buffer`
    cursor: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adiciona `data` ao buffer e retorna as linhas completas disponíveis.
    ///
    /// O iterador é preguiçoso: linhas não consumidas continuam no buffer e
    /// aparecem na próxima chamada.
    pub fn feed(&mut self, data: &[u8]) -> FramedLines<'_> {
        self.buffer.extend_from_slice(data);
        FramedLines { framer: self }
    }

    /// Bytes aguardando terminador (ou linhas ainda não consumidas).
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Descarta tudo que está no buffer.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }

    fn next_line(&mut self) -> Option<String> {
        let rest = &self.buffer[self.cursor..];
        let end = rest.iter().position(|&b| b == b'\n')?;

        let mut raw = &rest[..end];
        if let Some(stripped) = raw.strip_suffix(b"\r") {
            raw = stripped;
        }
        let line = decode_permissive(raw);

        self.cursor += end + 1;
        Some(line)
    }

    fn compact(&mut self) {
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
    }
}

/// Iterador de linhas retornado por [`LineFramer::feed`].
pub struct FramedLines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for FramedLines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_line()
    }
}

impl Drop for FramedLines<'_> {
    fn drop(&mut self) {
        self.framer.compact();
    }
}

/// UTF-8 permissivo: sequências inválidas são descartadas, o resto da linha fica.
fn decode_permissive(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

// ──────────────────────────────────────────────
// Campos e layouts
// ──────────────────────────────────────────────

/// Campo de um registro, na posição em que aparece no fluxo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Base,
    Hypotenuse,
    Height,
    Angle,
    Sine,
    Cosine,
    Tangent,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Base => "base",
            Field::Hypotenuse => "hypotenuse",
            Field::Height => "height",
            Field::Angle => "angle",
            Field::Sine => "sine",
            Field::Cosine => "cosine",
            Field::Tangent => "tangent",
        };
        f.write_str(name)
    }
}

/// Quantas linhas seguem a âncora.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordLayout {
    /// Âncora + 5 linhas; o cosseno não trafega e é derivado das medidas.
    #[default]
    SixLine,
    /// Âncora + 6 linhas, com `cos:` entre `sin:` e `tan:`.
    SevenLine,
}

const SIX_LINE_FIELDS: [Field; 6] = [
    Field::Base,
    Field::Hypotenuse,
    Field::Height,
    Field::Angle,
    Field::Sine,
    Field::Tangent,
];

const SEVEN_LINE_FIELDS: [Field; 7] = [
    Field::Base,
    Field::Hypotenuse,
    Field::Height,
    Field::Angle,
    Field::Sine,
    Field::Cosine,
    Field::Tangent,
];

impl RecordLayout {
    /// Campos na ordem de emissão do firmware.
    pub fn fields(self) -> &'static [Field] {
        match self {
            RecordLayout::SixLine => &SIX_LINE_FIELDS,
            RecordLayout::SevenLine => &SEVEN_LINE_FIELDS,
        }
    }

    /// Total de linhas por registro, incluindo a âncora.
    pub fn line_count(self) -> usize {
        self.fields().len()
    }

    fn assemble(self, v: &[f64; MAX_FIELDS]) -> Record {
        match self {
            RecordLayout::SixLine => Record {
                base: v[0],
                hypotenuse: v[1],
                height: v[2],
                angle_degrees: v[3],
                sine: v[4],
                cosine: derive_cosine(v[0], v[1], v[3]),
                tangent: v[5],
            },
            RecordLayout::SevenLine => Record {
                base: v[0],
                hypotenuse: v[1],
                height: v[2],
                angle_degrees: v[3],
                sine: v[4],
                cosine: v[5],
                tangent: v[6],
            },
        }
    }
}

/// Cateto adjacente / hipotenusa; com hipotenusa nula usa o ângulo.
fn derive_cosine(base: f64, hypotenuse: f64, angle_degrees: f64) -> f64 {
    if hypotenuse > 0.0 {
        base / hypotenuse
    } else {
        angle_degrees.to_radians().cos()
    }
}

// ──────────────────────────────────────────────
// Decodificação
// ──────────────────────────────────────────────

/// Erros de decodificação. Sempre recuperáveis: o decoder volta a procurar
/// a âncora.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Valor inválido no campo {field}: {text:?}")]
    MalformedNumber { field: Field, text: String },

    #[error("Fluxo terminou no meio de um registro ({received}/{expected} linhas)")]
    UnexpectedEnd { received: usize, expected: usize },
}

/// Extrai o valor numérico de uma linha conforme o campo.
fn parse_field(field: Field, line: &str) -> Result<f64, DecodeError> {
    let malformed = || DecodeError::MalformedNumber {
        field,
        text: line.to_string(),
    };

    let (_, rest) = line.split_once(':').ok_or_else(malformed)?;

    let parsed = match field {
        // Token termina no próximo `:` ou espaço (`Hypo: 5.0:x cm` → `5.0`)
        Field::Base | Field::Hypotenuse | Field::Height | Field::Angle => rest
            .split(':')
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .next()
            .ok_or_else(malformed)?
            .parse::<f64>(),
        Field::Sine | Field::Cosine => rest.trim().parse::<f64>(),
        Field::Tangent => {
            let text = rest.trim();
            if text == INFINITY_GLYPH {
                return Ok(f64::INFINITY);
            }
            text.parse::<f64>()
        }
    };

    parsed.map_err(|_| malformed())
}

fn is_anchor(line: &str) -> bool {
    line.trim_start().starts_with(ANCHOR_PREFIX)
}

#[derive(Debug, Clone, PartialEq)]
enum DecoderState {
    SeekingAnchor,
    Collecting {
        next: usize,
        values: [f64; MAX_FIELDS],
    },
}

/// Máquina de estados âncora → campos.
///
/// Depois da âncora, as linhas seguintes são consumidas sem olhar o rótulo.
/// Uma linha perdida no meio do registro desloca os campos; só um erro de
/// parsing faz o decoder voltar a procurar a âncora.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    layout: RecordLayout,
    state: DecoderState,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new(RecordLayout::default())
    }
}

impl RecordDecoder {
    pub fn new(layout: RecordLayout) -> Self {
        Self {
            layout,
            state: DecoderState::SeekingAnchor,
        }
    }

    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// `true` entre a âncora e o último campo.
    pub fn is_collecting(&self) -> bool {
        matches!(self.state, DecoderState::Collecting { .. })
    }

    /// Processa uma linha.
    ///
    /// Retorna `None` enquanto procura a âncora ou coleta campos,
    /// `Some(Ok(record))` quando o último campo chega e `Some(Err(_))` quando
    /// um campo não é numérico (o registro parcial é descartado).
    pub fn push_line(&mut self, line: &str) -> Option<Result<Record, DecodeError>> {
        let fields = self.layout.fields();

        match &mut self.state {
            DecoderState::SeekingAnchor => {
                if !is_anchor(line) {
                    return None;
                }
                match parse_field(Field::Base, line) {
                    Ok(base) => {
                        let mut values = [0.0; MAX_FIELDS];
                        values[0] = base;
                        self.state = DecoderState::Collecting { next: 1, values };
                        None
                    }
                    Err(e) => Some(Err(e)),
                }
            }
            DecoderState::Collecting { next, values } => {
                let index = *next;
                match parse_field(fields[index], line) {
                    Ok(value) => {
                        values[index] = value;
                        if index + 1 < fields.len() {
                            *next = index + 1;
                            return None;
                        }
                        let values = *values;
                        self.state = DecoderState::SeekingAnchor;
                        Some(Ok(self.layout.assemble(&values)))
                    }
                    Err(e) => {
                        // A busca pela âncora recomeça na próxima linha
                        self.state = DecoderState::SeekingAnchor;
                        Some(Err(e))
                    }
                }
            }
        }
    }

    /// Fim do fluxo. Reporta um registro incompleto e volta ao estado inicial.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        let state = std::mem::replace(&mut self.state, DecoderState::SeekingAnchor);
        match state {
            DecoderState::SeekingAnchor => Ok(()),
            DecoderState::Collecting { next, .. } => Err(DecodeError::UnexpectedEnd {
                received: next,
                expected: self.layout.line_count(),
            }),
        }
    }
}

// ──────────────────────────────────────────────
// Codificação
// ──────────────────────────────────────────────

/// Formata um [`Record`] nas linhas que o firmware emitiria (sem `\n`).
pub fn encode_record(record: &Record, layout: RecordLayout) -> Vec<String> {
    layout
        .fields()
        .iter()
        .map(|field| match field {
            Field::Base => format!("{ANCHOR_PREFIX} {} cm", record.base),
            Field::Hypotenuse => format!("Hypo: {} cm", record.hypotenuse),
            Field::Height => format!("Height: {} cm", record.height),
            Field::Angle => format!("Angle: {} deg", record.angle_degrees),
            Field::Sine => format!("sin:{}", record.sine),
            Field::Cosine => format!("cos:{}", record.cosine),
            Field::Tangent if record.has_vertical_tangent() => format!("tan:{INFINITY_GLYPH}"),
            Field::Tangent => format!("tan:{}", record.tangent),
        })
        .collect()
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
