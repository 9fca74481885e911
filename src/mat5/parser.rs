//! Token stream over the element stream.
//!
//! The parser owns a stack of lexers: the outermost on the raw input, one
//! more per open matrix. Pulling a token either decodes a primitive
//! element in full, opens a matrix (pushing a lexer bound to its frame),
//! or closes one (popping the lexer and returning its source to the level
//! below).

use std::io::Read;

use log::debug;

use super::error::Result;
use super::lexer::{DataElement, Lexer};
use super::models::{DataType, Numbers, Payload, Scalar};
use super::stream::Frame;
use super::utils::{self, WireScalar};

/// One parsed token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// End of the top-level stream.
    Null,
    /// A fully decoded primitive element.
    Value(Payload),
    BeginMatrix,
    EndMatrix,
    /// A malformed element; the payload is the diagnostic.
    Error(String),
}

/// Turns data elements into [`Token`]s.
pub struct Parser<'a> {
    stack: Vec<Lexer<'a>>,
    peeked: Option<Token>,
    limit: u16,
}

impl std::fmt::Debug for Parser<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("stack", &self.stack)
            .field("peeked", &self.peeked)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<'a> Parser<'a> {
    /// Attach to an input stream. `expect_header` validates the 128-byte
    /// file header; disable it only for streams that carry bare elements.
    pub fn new<R: Read + 'a>(input: R, expect_header: bool) -> Result<Self> {
        let root = Lexer::from_reader(Box::new(input), expect_header)?;
        Ok(Parser {
            stack: vec![root],
            peeked: None,
            limit: 0,
        })
    }

    pub fn needs_byte_swap(&self) -> bool {
        self.stack[0].needs_byte_swap()
    }

    /// Per-array element cap applied while decoding primitive payloads.
    /// Zero means unlimited.
    pub fn limit(&self) -> u16 {
        self.limit
    }

    pub fn set_limit(&mut self, limit: u16) {
        self.limit = limit;
    }

    /// Pull the next token.
    pub fn next_token(&mut self) -> Token {
        if let Some(t) = self.peeked.take() {
            return t;
        }

        let swap = self.needs_byte_swap();
        let limit = self.limit;
        let top = self.stack.last_mut().expect("parser has no lexer");
        match top.next_element() {
            DataElement::End => {
                if self.stack.len() > 1 {
                    let child = self.stack.pop().expect("nested lexer");
                    if let Some(frame) = child.into_frame() {
                        self.stack
                            .last_mut()
                            .expect("parent lexer")
                            .restore(frame);
                    }
                    Token::EndMatrix
                } else {
                    Token::Null
                }
            }
            DataElement::Error => Token::Error("Lexer Error".to_string()),
            DataElement::Element { ty, frame } => {
                if ty == DataType::Matrix as u8 {
                    if let Some(len) = frame.remaining() {
                        debug!("matrix at depth {}, {} bytes", self.stack.len(), len);
                    }
                    self.stack.push(Lexer::from_frame(frame, swap));
                    Token::BeginMatrix
                } else {
                    // the lexer unwraps compressed elements; one surviving
                    // to this layer is corrupt framing
                    let (token, frame) = if ty == DataType::Compressed as u8 {
                        (Token::Error("miCOMPRESSED".to_string()), frame)
                    } else {
                        read_value(frame, ty, swap, limit)
                    };
                    self.stack
                        .last_mut()
                        .expect("parser has no lexer")
                        .restore(frame);
                    token
                }
            }
        }
    }

    /// Buffer and return the next token without consuming it.
    pub fn peek_token(&mut self) -> &Token {
        if self.peeked.is_none() {
            let t = self.next_token();
            self.peeked = Some(t);
        }
        self.peeked.as_ref().expect("peeked token")
    }

    /// Discard the rest of the current matrix level. Used when a consumer
    /// truncates a nested sequence at the limit.
    pub fn skip_level(&mut self) {
        if self.stack.len() > 1 {
            self.stack.last_mut().expect("nested lexer").read_all();
        }
    }
}

/// Decode one primitive element in full.
fn read_value<'a>(mut frame: Frame<'a>, ty: u8, swap: bool, limit: u16) -> (Token, Frame<'a>) {
    let ty = match DataType::try_from(ty) {
        Ok(t) => t,
        Err(_) => return (Token::Error("Invalid type".to_string()), frame),
    };
    let token = match ty {
        // array names travel as miINT8; the bytes are kept verbatim and
        // never limited here
        DataType::Int8 => {
            let mut bytes = Vec::new();
            match frame.read_to_end(&mut bytes) {
                Ok(_) => Token::Value(Payload::Bytes(bytes)),
                Err(_) => Token::Error("miINT8".to_string()),
            }
        }
        DataType::Uint8 => decode_seq(&mut frame, swap, limit, "miUINT8", Numbers::U8),
        DataType::Int16 => decode_seq(&mut frame, swap, limit, "miINT16", Numbers::I16),
        DataType::Uint16 => decode_seq(&mut frame, swap, limit, "miUINT16", Numbers::U16),
        DataType::Int32 => decode_seq(&mut frame, swap, limit, "miINT32", Numbers::I32),
        DataType::Uint32 => decode_seq(&mut frame, swap, limit, "miUINT32", Numbers::U32),
        DataType::Single => decode_seq(&mut frame, swap, limit, "miSINGLE", Numbers::F32),
        DataType::Double => decode_seq(&mut frame, swap, limit, "miDOUBLE", Numbers::F64),
        DataType::Int64 => decode_seq(&mut frame, swap, limit, "miINT64", Numbers::I64),
        DataType::Uint64 => decode_seq(&mut frame, swap, limit, "miUINT64", Numbers::U64),
        // strings are never limited
        DataType::Utf8 => {
            let mut bytes = Vec::new();
            match frame.read_to_end(&mut bytes) {
                Ok(_) => Token::Value(Payload::Text(
                    String::from_utf8_lossy(&bytes).into_owned(),
                )),
                Err(_) => Token::Error("miUTF8".to_string()),
            }
        }
        DataType::Utf16 => match read_units::<u16>(&mut frame, swap) {
            Ok(units) => Token::Value(Payload::Text(String::from_utf16_lossy(&units))),
            Err(_) => Token::Error("miUTF16".to_string()),
        },
        DataType::Utf32 => match read_units::<u32>(&mut frame, swap) {
            Ok(units) => Token::Value(Payload::Text(
                units
                    .iter()
                    .map(|&u| char::from_u32(u).unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect(),
            )),
            Err(_) => Token::Error("miUTF32".to_string()),
        },
        DataType::Matrix | DataType::Compressed => Token::Error("Invalid type".to_string()),
    };
    (token, frame)
}

/// Read scalars of one type until the sub-stream ends, honoring the limit;
/// a single element collapses to a scalar token value.
fn decode_seq<T: WireScalar>(
    frame: &mut Frame<'_>,
    swap: bool,
    limit: u16,
    name: &str,
    wrap: fn(Vec<T>) -> Numbers,
) -> Token {
    let mut out = Vec::new();
    loop {
        if limit != 0 && out.len() >= limit as usize {
            drain_frame(frame);
            break;
        }
        match utils::read_scalar::<T>(frame, swap) {
            Ok(Some(v)) => out.push(v),
            Ok(None) => break,
            Err(_) => return Token::Error(name.to_string()),
        }
    }
    let numbers = wrap(out);
    if numbers.len() == 1 {
        Token::Value(Payload::Scalar(numbers.get(0).expect("single element")))
    } else {
        Token::Value(Payload::Sequence(numbers))
    }
}

fn read_units<T: WireScalar>(frame: &mut Frame<'_>, swap: bool) -> Result<Vec<T>> {
    let mut out = Vec::new();
    while let Some(v) = utils::read_scalar::<T>(frame, swap)? {
        out.push(v);
    }
    Ok(out)
}

fn drain_frame(frame: &mut Frame<'_>) {
    let mut sink = [0u8; 4096];
    while matches!(frame.read(&mut sink), Ok(n) if n > 0) {}
}

impl Token {
    /// The payload if this is a `Value` token.
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Token::Value(p) => Some(p),
            _ => None,
        }
    }

    /// The payload as a lone `i32`, the shape struct field-name lengths
    /// arrive in.
    pub fn as_i32_scalar(&self) -> Option<i32> {
        match self {
            Token::Value(Payload::Scalar(Scalar::I32(v))) => Some(*v),
            _ => None,
        }
    }
}
