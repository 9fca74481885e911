//! Matrix assembly from the token stream.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{info, warn};

use super::error::{Mat5Error, Result};
use super::models::{
    CellArray, CharArray, ClassCode, NumericArray, Numbers, Payload, SparseArray, Structure,
    Undocumented, Value,
};
use super::parser::{Parser, Token};

/// The main reader for Level-5 MAT files.
///
/// Each call to [`next_element`](MatReader::next_element) consumes exactly
/// one top-level element and returns its semantic value. At end of stream
/// the terminal [`Value::Empty`] is returned. A structural error aborts
/// the current element only; the reader stays usable and subsequent calls
/// resume at whatever the stream yields next.
pub struct MatReader<'a> {
    parser: Parser<'a>,
}

impl std::fmt::Debug for MatReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatReader")
            .field("parser", &self.parser)
            .finish()
    }
}

impl MatReader<'static> {
    /// Open and validate a MAT file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening MAT-file: {}", path.display());
        let file = File::open(path)?;
        MatReader::from_reader(BufReader::new(file), true)
    }
}

impl<'a> MatReader<'a> {
    /// Attach to any sequential byte source. The source may be owned or a
    /// `&mut` borrow; with `expect_header` the file header is validated
    /// and the byte order negotiated before the first element.
    pub fn from_reader<R: Read + 'a>(input: R, expect_header: bool) -> Result<Self> {
        Ok(MatReader {
            parser: Parser::new(input, expect_header)?,
        })
    }

    pub fn needs_byte_swap(&self) -> bool {
        self.parser.needs_byte_swap()
    }

    /// Decoded-element cap per primitive array; zero means unlimited.
    pub fn limit(&self) -> u16 {
        self.parser.limit()
    }

    pub fn set_limit(&mut self, limit: u16) {
        self.parser.set_limit(limit)
    }

    /// Read the next top-level element.
    pub fn next_element(&mut self) -> Result<Value> {
        match self.parser.next_token() {
            Token::Value(p) => Ok(Value::Primitive(p)),
            Token::BeginMatrix => {
                let v = self.read_matrix()?;
                match self.parser.next_token() {
                    Token::EndMatrix => Ok(v),
                    _ => fail("Invalid matrix end"),
                }
            }
            Token::EndMatrix => fail("Invalid matrix end"),
            Token::Error(msg) => Err(Mat5Error::Read(msg)),
            Token::Null => Ok(Value::Empty),
        }
    }

    /// Assemble one matrix body: array flags, dimensions, name, then the
    /// class-specific payload.
    fn read_matrix(&mut self) -> Result<Value> {
        let limit = self.parser.limit();

        // a matrix element with no sub-elements at all is observed in the
        // wild and stands for an empty value
        if matches!(self.parser.peek_token(), Token::EndMatrix) {
            return Ok(Value::Empty);
        }

        let t = self.parser.next_token();
        let flags = match t.payload() {
            Some(p) => p.to_u32s(),
            None => Vec::new(),
        };
        if flags.len() != 2 {
            return fail("Invalid array flags");
        }
        let f = flags[0];
        let logical = f & 0x200 != 0;
        let global = f & 0x400 != 0;
        let complex = f & 0x800 != 0;
        let class = (f & 0xff) as u8;
        let _nzmax = flags[1];

        let t = self.parser.next_token();
        let dims: Vec<i32> = match t.payload() {
            Some(p) => p.to_i32s(),
            None => Vec::new(),
        };
        // the undocumented classes get away with scalar or absent dims
        if class <= 15 && dims.is_empty() {
            return fail("Invalid array dimensions");
        }
        let total = total_count(&dims);

        let t = self.parser.next_token();
        let name = match t {
            Token::Value(Payload::Bytes(b)) => b,
            _ => return fail("Invalid array name"),
        };

        let code = match ClassCode::try_from(class) {
            Ok(c) => c,
            Err(_) => {
                warn!("invalid array type {}", class);
                return fail("Invalid array type");
            }
        };

        match code {
            ClassCode::Double
            | ClassCode::Single
            | ClassCode::Int8
            | ClassCode::Uint8
            | ClassCode::Int16
            | ClassCode::Uint16
            | ClassCode::Int32
            | ClassCode::Uint32
            | ClassCode::Int64
            | ClassCode::Uint64 => {
                if dims.len() < 2 {
                    return fail("At least two dimensions required");
                }
                let real =
                    self.read_numbers(code, limit, total, "Invalid array real part")?;
                let imag = if complex {
                    Some(self.read_numbers(code, limit, total, "Invalid array complex part")?)
                } else {
                    None
                };
                Ok(Value::Numeric(NumericArray {
                    name,
                    logical,
                    global,
                    dims,
                    real,
                    imag,
                }))
            }
            ClassCode::Sparse => {
                if dims.len() > 2 {
                    return fail("Invalid sparse array dimensions");
                }
                // row indices (ir), column indices (jc), real part (pr),
                // imaginary part (pi) -- consumed, not kept
                let _ = self.parser.next_token();
                let _ = self.parser.next_token();
                let _ = self.parser.next_token();
                if complex {
                    let _ = self.parser.next_token();
                }
                warn!("sparse arrays not supported; payload skipped");
                Ok(Value::Sparse(SparseArray {
                    name,
                    logical,
                    global,
                }))
            }
            ClassCode::Cell => {
                if dims.len() < 2 {
                    return fail("At least two dimensions required");
                }
                let mut cells = Vec::new();
                if matches!(self.parser.peek_token(), Token::BeginMatrix) {
                    let mut i: u32 = 0;
                    loop {
                        let _ = self.parser.next_token(); // eat BeginMatrix
                        cells.push(self.read_matrix()?);
                        if !matches!(self.parser.next_token(), Token::EndMatrix) {
                            return fail("Invalid cell end");
                        }
                        i += 1;
                        if limit != 0 && i >= limit as u32 {
                            self.parser.skip_level();
                            break;
                        }
                        if !matches!(self.parser.peek_token(), Token::BeginMatrix) {
                            break;
                        }
                    }
                }
                Ok(Value::Cell(CellArray {
                    name,
                    logical,
                    global,
                    dims,
                    cells,
                }))
            }
            ClassCode::Char => {
                // char arrays are never limited
                let t = self.parser.next_token();
                let text = match t {
                    Token::Value(p) => p.into_text_lossy().unwrap_or_default(),
                    _ => return fail("Invalid char array"),
                };
                if text.chars().count() as i64 != total {
                    return fail("Invalid char array");
                }
                Ok(Value::Chars(CharArray {
                    name,
                    logical,
                    global,
                    text,
                }))
            }
            ClassCode::Struct => {
                let name_len = match self.parser.next_token().as_i32_scalar() {
                    Some(n) if n > 0 => n as usize,
                    _ => return fail("Invalid struct format"),
                };
                let table = match self.parser.next_token() {
                    Token::Value(Payload::Bytes(b)) => b,
                    _ => return fail("Invalid struct format"),
                };
                let names = split_names(&table, name_len);
                let mut s = Structure {
                    name,
                    logical,
                    global,
                    class_name: Vec::new(),
                    fields: BTreeMap::new(),
                };
                self.read_fields(&mut s, &names)?;
                Ok(Value::Struct(s))
            }
            ClassCode::Object => {
                let class_name = match self.parser.next_token() {
                    Token::Value(Payload::Bytes(b)) => b,
                    _ => return fail("Invalid class format"),
                };
                let name_len = match self.parser.next_token().as_i32_scalar() {
                    Some(n) if n > 0 => n as usize,
                    _ => return fail("Invalid class format"),
                };
                let table = match self.parser.next_token() {
                    Token::Value(Payload::Bytes(b)) => b,
                    _ => return fail("Invalid class format"),
                };
                let names = split_names(&table, name_len);
                let mut s = Structure {
                    name,
                    logical,
                    global,
                    class_name,
                    fields: BTreeMap::new(),
                };
                self.read_fields(&mut s, &names)?;
                Ok(Value::Struct(s))
            }
            ClassCode::Undoc16 | ClassCode::Undoc17 => {
                // empirical layout, derived from .fig files
                let value = if code == ClassCode::Undoc17 {
                    match self.parser.next_token() {
                        Token::Value(p) => Some(p),
                        _ => return fail("Invalid type 17 format"),
                    }
                } else {
                    None
                };
                if !matches!(self.parser.next_token(), Token::BeginMatrix) {
                    return fail("Invalid type 17 start");
                }
                let sub = self.read_matrix()?;
                if !matches!(self.parser.next_token(), Token::EndMatrix) {
                    return fail("Invalid type 17 end");
                }
                Ok(Value::Undocumented(Undocumented {
                    name,
                    logical,
                    global,
                    value,
                    sub: Box::new(sub),
                }))
            }
        }
    }

    /// Normalize a numeric payload token to a typed sequence. Payloads
    /// arrive as a byte string (miINT8 sharing), a lone scalar, or a
    /// sequence; without an active limit the length must equal the dims
    /// product.
    fn read_numbers(
        &mut self,
        class: ClassCode,
        limit: u16,
        total: i64,
        msg: &str,
    ) -> Result<Numbers> {
        let t = self.parser.next_token();
        let numbers = match t {
            Token::Value(Payload::Bytes(b)) => {
                let capped = if limit != 0 && b.len() > limit as usize {
                    &b[..limit as usize]
                } else {
                    &b[..]
                };
                if class == ClassCode::Uint8 {
                    Numbers::U8(capped.to_vec())
                } else {
                    // shared miINT8 payloads are sign-interpreted for every
                    // class but uint8
                    Numbers::I8(capped.iter().map(|&x| x as i8).collect())
                }
            }
            Token::Value(Payload::Sequence(n)) => n,
            Token::Value(Payload::Scalar(s)) => Numbers::from_scalar(s),
            _ => return fail(msg),
        };
        if limit == 0 && numbers.len() as i64 != total {
            return fail(msg);
        }
        Ok(numbers)
    }

    /// Read the repeated field matrices of a structure or object. Values
    /// cycle through the field names in order; the total count must come
    /// out as whole rows.
    fn read_fields(&mut self, s: &mut Structure, names: &[Vec<u8>]) -> Result<()> {
        if names.is_empty() {
            if matches!(self.parser.peek_token(), Token::BeginMatrix) {
                return fail("Fields and names not consistent");
            }
            return Ok(());
        }
        // each field gets at most `limit` values
        let limit_total = self.parser.limit() as u32 * names.len() as u32;
        let mut n: u32 = 0;
        if matches!(self.parser.peek_token(), Token::BeginMatrix) {
            loop {
                let _ = self.parser.next_token(); // eat BeginMatrix
                let v = self.read_matrix()?;
                s.fields
                    .entry(names[n as usize % names.len()].clone())
                    .or_default()
                    .push(v);
                if !matches!(self.parser.next_token(), Token::EndMatrix) {
                    return fail("Invalid field end");
                }
                n += 1;
                if limit_total != 0 && n >= limit_total {
                    self.parser.skip_level();
                    break;
                }
                if !matches!(self.parser.peek_token(), Token::BeginMatrix) {
                    break;
                }
            }
        }
        if n as usize != names.len() && n as usize % names.len() != 0 {
            return fail("Fields and names not consistent");
        }
        Ok(())
    }
}

fn fail<T>(msg: &str) -> Result<T> {
    Err(Mat5Error::Read(msg.to_string()))
}

fn total_count(dims: &[i32]) -> i64 {
    dims.iter().fold(1i64, |acc, &d| acc * d as i64)
}

/// Split the concatenated fixed-width field-name table into names,
/// trimming each slot at its first null byte.
fn split_names(bytes: &[u8], chunk: usize) -> Vec<Vec<u8>> {
    bytes
        .chunks(chunk)
        .map(|c| {
            let end = c.iter().position(|&b| b == 0).unwrap_or(c.len());
            c[..end].to_vec()
        })
        .collect()
}
