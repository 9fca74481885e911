//! Element frame construction and encoding.
//!
//! The writer keeps a stack of output levels. Level zero writes straight
//! to the target sink; every open matrix adds a scratch level -- an
//! in-memory buffer, or a temp file when the caller expects a large body.
//! Closing a matrix splices the finished scratch into the level below
//! under a MATRIX tag, optionally running the whole framed element
//! through zlib under a COMPRESSED tag instead.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{NativeEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::warn;

use super::error::Result;
use super::lexer::{ENDIAN_MARKER, FORMAT_VERSION, HEADER_SUBSYS_LEN, HEADER_TEXT_LEN};
use super::models::{ClassCode, DataType, Scalar, ScalarKind, WriteValue};
use super::utils::padding_for;

/// Field names longer than this are truncated; the name slot width in the
/// field table is the longest kept name plus its terminator.
const MAX_FIELD_NAME: usize = 31;

/// The wire type, array class and per-element byte width for one scalar
/// kind. Total over the enumeration; there is no runtime registry.
fn wire_info(kind: ScalarKind) -> (DataType, ClassCode, u32) {
    match kind {
        ScalarKind::U8 => (DataType::Uint8, ClassCode::Uint8, 1),
        ScalarKind::I8 => (DataType::Int8, ClassCode::Int8, 1),
        ScalarKind::I16 => (DataType::Int16, ClassCode::Int16, 2),
        ScalarKind::U16 => (DataType::Uint16, ClassCode::Uint16, 2),
        ScalarKind::I32 => (DataType::Int32, ClassCode::Int32, 4),
        ScalarKind::U32 => (DataType::Uint32, ClassCode::Uint32, 4),
        ScalarKind::I64 => (DataType::Int64, ClassCode::Int64, 8),
        ScalarKind::U64 => (DataType::Uint64, ClassCode::Uint64, 8),
        ScalarKind::F32 => (DataType::Single, ClassCode::Single, 4),
        ScalarKind::F64 => (DataType::Double, ClassCode::Double, 8),
    }
}

/// One output sink: the caller's target at level zero, scratch above it.
enum Sink<W: Write> {
    Target(W),
    Buffer(Cursor<Vec<u8>>),
    Temp(File),
}

impl<W: Write> Sink<W> {
    fn position(&mut self) -> io::Result<u64> {
        match self {
            Sink::Target(_) => Err(unsupported()),
            Sink::Buffer(c) => Ok(c.position()),
            Sink::Temp(f) => f.stream_position(),
        }
    }

    fn rewind(&mut self) -> io::Result<()> {
        match self {
            Sink::Target(_) => Err(unsupported()),
            Sink::Buffer(c) => {
                c.set_position(0);
                Ok(())
            }
            Sink::Temp(f) => f.seek(SeekFrom::Start(0)).map(|_| ()),
        }
    }
}

fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "target sink is write-only")
}

impl<W: Write> Write for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Target(w) => w.write(buf),
            Sink::Buffer(c) => c.write(buf),
            Sink::Temp(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Target(w) => w.flush(),
            Sink::Buffer(c) => c.flush(),
            Sink::Temp(f) => f.flush(),
        }
    }
}

impl<W: Write> Read for Sink<W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Sink::Target(_) => Err(unsupported()),
            Sink::Buffer(c) => c.read(buf),
            Sink::Temp(f) => f.read(buf),
        }
    }
}

/// Bookkeeping for the matrix currently open at a level.
enum LevelKind {
    Root,
    /// A matrix written in one shot, no element accounting.
    Plain,
    Struct {
        cols: usize,
        rows_left: i64,
    },
    NumArray {
        class: ClassCode,
        data_len: u32,
        elems_left: i64,
    },
}

struct Level<W: Write> {
    out: Sink<W>,
    large: bool,
    kind: LevelKind,
}

/// Writes Level-5 MAT files.
///
/// Matrices are built through begin/add/end call triples; nested values in
/// structure rows are dispatched by their runtime [`WriteValue`] kind.
/// Cell arrays, objects and sparse arrays are not produced.
pub struct MatWriter<W: Write> {
    levels: Vec<Level<W>>,
}

impl<W: Write> MatWriter<W> {
    /// Wrap a target sink. With `write_header` the 128-byte file header is
    /// emitted immediately, in host byte order.
    pub fn new(target: W, write_header: bool) -> Result<Self> {
        let mut writer = MatWriter {
            levels: vec![Level {
                out: Sink::Target(target),
                large: false,
                kind: LevelKind::Root,
            }],
        };
        if write_header {
            writer.write_header()?;
        }
        Ok(writer)
    }

    /// Flush and recover the target sink. Matrices still open are
    /// discarded with a diagnostic; nothing half-framed reaches the
    /// target.
    pub fn finish(mut self) -> Result<W> {
        if self.levels.len() > 1 {
            warn!(
                "finishing writer with {} open matrices; their data is dropped",
                self.levels.len() - 1
            );
            self.levels.truncate(1);
        }
        let root = self.levels.pop().expect("writer has a root level");
        match root.out {
            Sink::Target(mut w) => {
                w.flush()?;
                Ok(w)
            }
            _ => unreachable!("root level is the target sink"),
        }
    }

    fn write_header(&mut self) -> Result<()> {
        let banner = format!(
            "MATLAB 5.0 MAT-file, Platform: {} {}",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        let mut text = banner.into_bytes();
        text.truncate(HEADER_TEXT_LEN);
        text.resize(HEADER_TEXT_LEN, 0);
        let out = self.out();
        out.write_all(&text)?;
        out.write_all(&[0u8; HEADER_SUBSYS_LEN])?;
        out.write_u16::<NativeEndian>(FORMAT_VERSION)?;
        out.write_u16::<NativeEndian>(ENDIAN_MARKER)?;
        Ok(())
    }

    fn out(&mut self) -> &mut Sink<W> {
        &mut self.levels.last_mut().expect("writer has a level").out
    }

    /// Open a scratch level for a nested matrix.
    fn begin_matrix(&mut self, large: bool) -> Result<()> {
        let out = if large {
            Sink::<W>::Temp(tempfile::tempfile()?)
        } else {
            Sink::Buffer(Cursor::new(Vec::new()))
        };
        self.levels.push(Level {
            out,
            large,
            kind: LevelKind::Plain,
        });
        Ok(())
    }

    /// Close the current matrix and splice its scratch into the parent.
    fn end_matrix(&mut self, compress: bool) -> Result<()> {
        if self.levels.len() < 2 {
            warn!("end_matrix without an open matrix");
            return Ok(());
        }
        let mut level = self.levels.pop().expect("scratch level");
        let len = level.out.position()? as u32;
        level.out.rewind()?;

        if compress {
            // the whole framed element, tag and pad included, goes through
            // zlib; the compressed element itself gets no trailing padding
            let mut scratch = if level.large {
                Sink::<W>::Temp(tempfile::tempfile()?)
            } else {
                Sink::Buffer(Cursor::new(Vec::new()))
            };
            {
                let mut enc = ZlibEncoder::new(&mut scratch, Compression::default());
                write_tag(&mut enc, DataType::Matrix, len)?;
                io::copy(&mut level.out, &mut enc)?;
                write_padding(&mut enc, len)?;
                enc.finish()?;
            }
            let comp_len = scratch.position()? as u32;
            scratch.rewind()?;
            let parent = self.out();
            write_tag(parent, DataType::Compressed, comp_len)?;
            io::copy(&mut scratch, parent)?;
        } else {
            let parent = self.out();
            write_tag(parent, DataType::Matrix, len)?;
            io::copy(&mut level.out, parent)?;
            write_padding(parent, len)?;
        }
        Ok(())
    }

    /// Start a structure matrix of `rows` rows, one column per field name.
    /// Rows are supplied through [`add_structure_row`](Self::add_structure_row).
    pub fn begin_structure(
        &mut self,
        field_names: &[&[u8]],
        rows: usize,
        large: bool,
        name: &[u8],
    ) -> Result<()> {
        if field_names.is_empty() || rows == 0 {
            warn!("structure needs at least one field and one row");
            return Ok(());
        }
        self.begin_matrix(large)?;
        let level = self.levels.last_mut().expect("scratch level");
        level.kind = LevelKind::Struct {
            cols: field_names.len(),
            rows_left: rows as i64,
        };
        write_array_flags(&mut level.out, ClassCode::Struct)?;
        write_array_dims(&mut level.out, &[rows as i32, 1])?;
        write_array_name(&mut level.out, name)?;

        // fixed-width name table: longest kept name plus terminator
        let mut slot = 0usize;
        for n in field_names {
            slot = slot.max(n.len().min(MAX_FIELD_NAME));
        }
        let slot = slot + 1;
        write_tag(&mut level.out, DataType::Int32, 4)?;
        level.out.write_i32::<NativeEndian>(slot as i32)?;
        let mut table = Vec::with_capacity(slot * field_names.len());
        for n in field_names {
            let cut = &n[..n.len().min(MAX_FIELD_NAME)];
            table.extend_from_slice(cut);
            table.resize(table.len() + (slot - cut.len()), 0);
        }
        write_data_element(&mut level.out, DataType::Int8, &table)?;
        Ok(())
    }

    /// Write one structure row; the values are dispatched by kind and
    /// written as nested matrices, one per field.
    pub fn add_structure_row(&mut self, row: &[WriteValue]) -> Result<()> {
        let (cols, rows_left) = match self.levels.last().map(|l| &l.kind) {
            Some(LevelKind::Struct { cols, rows_left }) => (*cols, *rows_left),
            _ => {
                warn!("structure row written without begin_structure");
                return Ok(());
            }
        };
        if row.len() != cols {
            warn!("structure row has {} values, expected {}", row.len(), cols);
            return Ok(());
        }
        if rows_left <= 0 {
            warn!("too many structure rows");
            return Ok(());
        }
        for value in row {
            self.write_cell(value, &[])?;
        }
        if let Some(Level {
            kind: LevelKind::Struct { rows_left, .. },
            ..
        }) = self.levels.last_mut()
        {
            *rows_left -= 1;
        }
        Ok(())
    }

    pub fn end_structure(&mut self, compress: bool) -> Result<()> {
        match self.levels.last().map(|l| &l.kind) {
            Some(LevelKind::Struct { rows_left, .. }) => {
                if *rows_left > 0 {
                    warn!("ending structure with {} rows missing", rows_left);
                    return Ok(());
                }
            }
            _ => {
                warn!("end_structure without a structure");
                return Ok(());
            }
        }
        self.end_matrix(compress)
    }

    /// Start a numeric array matrix. Elements follow through
    /// [`add_num_array_element`](Self::add_num_array_element) and must
    /// cover the dims product exactly.
    pub fn begin_num_array(
        &mut self,
        dims: &[i32],
        kind: ScalarKind,
        large: bool,
        name: &[u8],
    ) -> Result<()> {
        let (wire, class, width) = wire_info(kind);
        let count = write_count(dims);
        let data_len = count as u32 * width;
        self.begin_matrix(large)?;
        let level = self.levels.last_mut().expect("scratch level");
        level.kind = LevelKind::NumArray {
            class,
            data_len,
            elems_left: count,
        };
        write_array_flags(&mut level.out, class)?;
        write_array_dims(&mut level.out, dims)?;
        write_array_name(&mut level.out, name)?;
        write_tag(&mut level.out, wire, data_len)?;
        Ok(())
    }

    /// Append payload data: a lone scalar, a scalar sequence, or a raw
    /// byte string for uint8 arrays. Mismatched kinds are refused with a
    /// diagnostic.
    pub fn add_num_array_element(&mut self, value: &WriteValue) -> Result<()> {
        let Level { out, kind, .. } = self.levels.last_mut().expect("writer has a level");
        let (class, elems_left) = match kind {
            LevelKind::NumArray {
                class, elems_left, ..
            } => (*class, elems_left),
            _ => {
                warn!("numeric element written outside a numeric array");
                return Ok(());
            }
        };
        match value {
            WriteValue::Scalar(s) => {
                if wire_info(s.kind()).1 != class {
                    warn!("incompatible element type {:?}", s.kind());
                    return Ok(());
                }
                write_scalar(out, *s)?;
                *elems_left -= 1;
            }
            WriteValue::List(items) => {
                if items
                    .iter()
                    .any(|s| wire_info(s.kind()).1 != class)
                {
                    warn!("incompatible element type in sequence");
                    return Ok(());
                }
                for s in items {
                    write_scalar(out, *s)?;
                }
                *elems_left -= items.len() as i64;
            }
            WriteValue::Bytes(b) => {
                if class != ClassCode::Uint8 {
                    warn!("byte data only fits uint8 arrays, not {:?}", class);
                    return Ok(());
                }
                out.write_all(b)?;
                *elems_left -= b.len() as i64;
            }
            WriteValue::Text(_) => {
                warn!("char data is not a numeric element");
            }
        }
        Ok(())
    }

    pub fn end_num_array(&mut self, compress: bool) -> Result<()> {
        let data_len = match self.levels.last().map(|l| &l.kind) {
            Some(LevelKind::NumArray {
                data_len,
                elems_left,
                ..
            }) => {
                if *elems_left > 0 {
                    warn!("ending numeric array with {} elements missing", elems_left);
                    return Ok(());
                }
                *data_len
            }
            _ => {
                warn!("end_num_array without a numeric array");
                return Ok(());
            }
        };
        write_padding(self.out(), data_len)?;
        self.end_matrix(compress)
    }

    /// Write a complete `1 x n` char array matrix in one call, UTF-8
    /// encoded; `n` counts Unicode scalar values.
    pub fn add_char_array(&mut self, text: &str, name: &[u8]) -> Result<()> {
        self.begin_matrix(false)?;
        let out = self.out();
        write_array_flags(out, ClassCode::Char)?;
        write_array_dims(out, &[1, text.chars().count() as i32])?;
        write_array_name(out, name)?;
        write_data_element(out, DataType::Utf8, text.as_bytes())?;
        self.end_matrix(false)
    }

    /// Write one value as a nested matrix, picking the representation
    /// from its runtime kind.
    fn write_cell(&mut self, value: &WriteValue, name: &[u8]) -> Result<()> {
        match value {
            WriteValue::Text(s) => self.add_char_array(s, name),
            WriteValue::Scalar(s) => {
                self.begin_num_array(&[1, 1], s.kind(), false, name)?;
                self.add_num_array_element(value)?;
                self.end_num_array(false)
            }
            WriteValue::Bytes(b) => {
                self.begin_num_array(&[1, b.len() as i32], ScalarKind::U8, false, name)?;
                self.add_num_array_element(value)?;
                self.end_num_array(false)
            }
            WriteValue::List(items) => {
                if items.is_empty() {
                    warn!("empty lists not supported");
                    return Ok(());
                }
                let kind = items[0].kind();
                if items.iter().any(|s| s.kind() != kind) {
                    warn!("heterogeneous lists not supported");
                    return Ok(());
                }
                self.begin_num_array(&[items.len() as i32, 1], kind, false, name)?;
                self.add_num_array_element(value)?;
                self.end_num_array(false)
            }
        }
    }
}

/// Emit a tag, choosing the small form when the payload fits four bytes.
fn write_tag(out: &mut impl Write, ty: DataType, len: u32) -> Result<()> {
    if len <= 4 {
        out.write_u32::<NativeEndian>(ty as u32 | (len << 16))?;
    } else {
        out.write_u32::<NativeEndian>(ty as u32)?;
        out.write_u32::<NativeEndian>(len)?;
    }
    Ok(())
}

/// Pad a payload of `len` bytes out to its tag form's boundary.
fn write_padding(out: &mut impl Write, len: u32) -> Result<()> {
    const ZEROS: [u8; 8] = [0; 8];
    let pad = if len <= 4 {
        4 - len as usize
    } else {
        padding_for(len, 8) as usize
    };
    out.write_all(&ZEROS[..pad])?;
    Ok(())
}

fn write_data_element(out: &mut impl Write, ty: DataType, data: &[u8]) -> Result<()> {
    write_tag(out, ty, data.len() as u32)?;
    out.write_all(data)?;
    write_padding(out, data.len() as u32)
}

fn write_array_flags(out: &mut impl Write, class: ClassCode) -> Result<()> {
    write_tag(out, DataType::Uint32, 8)?;
    out.write_u32::<NativeEndian>(class as u32)?;
    out.write_u32::<NativeEndian>(0)?; // nzmax, sparse only
    Ok(())
}

fn write_array_dims(out: &mut impl Write, dims: &[i32]) -> Result<()> {
    let len = 4 * dims.len() as u32;
    write_tag(out, DataType::Int32, len)?;
    for d in dims {
        out.write_i32::<NativeEndian>(*d)?;
    }
    write_padding(out, len)
}

fn write_array_name(out: &mut impl Write, name: &[u8]) -> Result<()> {
    write_data_element(out, DataType::Int8, name)
}

fn write_scalar(out: &mut impl Write, s: Scalar) -> Result<()> {
    match s {
        Scalar::U8(v) => out.write_u8(v)?,
        Scalar::I8(v) => out.write_i8(v)?,
        Scalar::I16(v) => out.write_i16::<NativeEndian>(v)?,
        Scalar::U16(v) => out.write_u16::<NativeEndian>(v)?,
        Scalar::I32(v) => out.write_i32::<NativeEndian>(v)?,
        Scalar::U32(v) => out.write_u32::<NativeEndian>(v)?,
        Scalar::I64(v) => out.write_i64::<NativeEndian>(v)?,
        Scalar::U64(v) => out.write_u64::<NativeEndian>(v)?,
        Scalar::F32(v) => out.write_f32::<NativeEndian>(v)?,
        Scalar::F64(v) => out.write_f64::<NativeEndian>(v)?,
    }
    Ok(())
}

/// Dims product for payload accounting; an empty dims list writes nothing.
fn write_count(dims: &[i32]) -> i64 {
    if dims.is_empty() {
        return 0;
    }
    dims.iter().fold(1i64, |acc, &d| acc * d as i64)
}
