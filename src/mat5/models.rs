//! Wire-level type codes and the semantic data model.

use std::collections::BTreeMap;

use super::error::Mat5Error;

/// Element type codes from the tag stream.
///
/// Codes 8, 10 and 11 are unassigned in the Level-5 format and are rejected
/// at conversion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Single = 7,
    Double = 9,
    Int64 = 12,
    Uint64 = 13,
    /// Structural sentinel: the payload is itself a sequence of elements.
    Matrix = 14,
    /// Framing sentinel: the payload is a zlib stream holding one element.
    Compressed = 15,
    Utf8 = 16,
    Utf16 = 17,
    Utf32 = 18,
}

impl TryFrom<u8> for DataType {
    type Error = Mat5Error;
    fn try_from(value: u8) -> Result<Self, Mat5Error> {
        match value {
            1 => Ok(Self::Int8),
            2 => Ok(Self::Uint8),
            3 => Ok(Self::Int16),
            4 => Ok(Self::Uint16),
            5 => Ok(Self::Int32),
            6 => Ok(Self::Uint32),
            7 => Ok(Self::Single),
            9 => Ok(Self::Double),
            12 => Ok(Self::Int64),
            13 => Ok(Self::Uint64),
            14 => Ok(Self::Matrix),
            15 => Ok(Self::Compressed),
            16 => Ok(Self::Utf8),
            17 => Ok(Self::Utf16),
            18 => Ok(Self::Utf32),
            _ => Err(Mat5Error::Read("Invalid type".to_string())),
        }
    }
}

/// MATLAB array class codes, the low byte of the array-flags word.
///
/// Distinct from [`DataType`]: the class is the semantic type of a matrix,
/// the data type is the wire encoding of one payload element. Codes 16 and
/// 17 are undocumented; they appear in `.fig` files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClassCode {
    Cell = 1,
    Struct = 2,
    Object = 3,
    Char = 4,
    Sparse = 5,
    Double = 6,
    Single = 7,
    Int8 = 8,
    Uint8 = 9,
    Int16 = 10,
    Uint16 = 11,
    Int32 = 12,
    Uint32 = 13,
    Int64 = 14,
    Uint64 = 15,
    Undoc16 = 16,
    Undoc17 = 17,
}

impl TryFrom<u8> for ClassCode {
    type Error = Mat5Error;
    fn try_from(value: u8) -> Result<Self, Mat5Error> {
        match value {
            1 => Ok(Self::Cell),
            2 => Ok(Self::Struct),
            3 => Ok(Self::Object),
            4 => Ok(Self::Char),
            5 => Ok(Self::Sparse),
            6 => Ok(Self::Double),
            7 => Ok(Self::Single),
            8 => Ok(Self::Int8),
            9 => Ok(Self::Uint8),
            10 => Ok(Self::Int16),
            11 => Ok(Self::Uint16),
            12 => Ok(Self::Int32),
            13 => Ok(Self::Uint32),
            14 => Ok(Self::Int64),
            15 => Ok(Self::Uint64),
            16 => Ok(Self::Undoc16),
            17 => Ok(Self::Undoc17),
            _ => Err(Mat5Error::Read("Invalid array type".to_string())),
        }
    }
}

/// One decoded primitive value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    U8(u8),
    I8(i8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

/// The primitive kind of a [`Scalar`], without its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::U8(_) => ScalarKind::U8,
            Scalar::I8(_) => ScalarKind::I8,
            Scalar::I16(_) => ScalarKind::I16,
            Scalar::U16(_) => ScalarKind::U16,
            Scalar::I32(_) => ScalarKind::I32,
            Scalar::U32(_) => ScalarKind::U32,
            Scalar::I64(_) => ScalarKind::I64,
            Scalar::U64(_) => ScalarKind::U64,
            Scalar::F32(_) => ScalarKind::F32,
            Scalar::F64(_) => ScalarKind::F64,
        }
    }

    /// Truncating cast to `i32`.
    pub fn as_i32(&self) -> i32 {
        match *self {
            Scalar::U8(v) => v as i32,
            Scalar::I8(v) => v as i32,
            Scalar::I16(v) => v as i32,
            Scalar::U16(v) => v as i32,
            Scalar::I32(v) => v,
            Scalar::U32(v) => v as i32,
            Scalar::I64(v) => v as i32,
            Scalar::U64(v) => v as i32,
            Scalar::F32(v) => v as i32,
            Scalar::F64(v) => v as i32,
        }
    }

    /// Truncating cast to `u32`.
    pub fn as_u32(&self) -> u32 {
        match *self {
            Scalar::U8(v) => v as u32,
            Scalar::I8(v) => v as u32,
            Scalar::I16(v) => v as u32,
            Scalar::U16(v) => v as u32,
            Scalar::I32(v) => v as u32,
            Scalar::U32(v) => v,
            Scalar::I64(v) => v as u32,
            Scalar::U64(v) => v as u32,
            Scalar::F32(v) => v as u32,
            Scalar::F64(v) => v as u32,
        }
    }

    /// Widening cast to `f64`.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Scalar::U8(v) => v as f64,
            Scalar::I8(v) => v as f64,
            Scalar::I16(v) => v as f64,
            Scalar::U16(v) => v as f64,
            Scalar::I32(v) => v as f64,
            Scalar::U32(v) => v as f64,
            Scalar::I64(v) => v as f64,
            Scalar::U64(v) => v as f64,
            Scalar::F32(v) => v as f64,
            Scalar::F64(v) => v,
        }
    }
}

/// A typed sequence of primitive values, one variant per element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Numbers {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Numbers {
    pub fn len(&self) -> usize {
        match self {
            Numbers::I8(v) => v.len(),
            Numbers::U8(v) => v.len(),
            Numbers::I16(v) => v.len(),
            Numbers::U16(v) => v.len(),
            Numbers::I32(v) => v.len(),
            Numbers::U32(v) => v.len(),
            Numbers::I64(v) => v.len(),
            Numbers::U64(v) => v.len(),
            Numbers::F32(v) => v.len(),
            Numbers::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<Scalar> {
        match self {
            Numbers::I8(v) => v.get(i).map(|&x| Scalar::I8(x)),
            Numbers::U8(v) => v.get(i).map(|&x| Scalar::U8(x)),
            Numbers::I16(v) => v.get(i).map(|&x| Scalar::I16(x)),
            Numbers::U16(v) => v.get(i).map(|&x| Scalar::U16(x)),
            Numbers::I32(v) => v.get(i).map(|&x| Scalar::I32(x)),
            Numbers::U32(v) => v.get(i).map(|&x| Scalar::U32(x)),
            Numbers::I64(v) => v.get(i).map(|&x| Scalar::I64(x)),
            Numbers::U64(v) => v.get(i).map(|&x| Scalar::U64(x)),
            Numbers::F32(v) => v.get(i).map(|&x| Scalar::F32(x)),
            Numbers::F64(v) => v.get(i).map(|&x| Scalar::F64(x)),
        }
    }

    pub fn from_scalar(s: Scalar) -> Numbers {
        match s {
            Scalar::U8(v) => Numbers::U8(vec![v]),
            Scalar::I8(v) => Numbers::I8(vec![v]),
            Scalar::I16(v) => Numbers::I16(vec![v]),
            Scalar::U16(v) => Numbers::U16(vec![v]),
            Scalar::I32(v) => Numbers::I32(vec![v]),
            Scalar::U32(v) => Numbers::U32(vec![v]),
            Scalar::I64(v) => Numbers::I64(vec![v]),
            Scalar::U64(v) => Numbers::U64(vec![v]),
            Scalar::F32(v) => Numbers::F32(vec![v]),
            Scalar::F64(v) => Numbers::F64(vec![v]),
        }
    }

    /// Lowercase class label of the element type, for display.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Numbers::I8(_) => "int8",
            Numbers::U8(_) => "uint8",
            Numbers::I16(_) => "int16",
            Numbers::U16(_) => "uint16",
            Numbers::I32(_) => "int32",
            Numbers::U32(_) => "uint32",
            Numbers::I64(_) => "int64",
            Numbers::U64(_) => "uint64",
            Numbers::F32(_) => "single",
            Numbers::F64(_) => "double",
        }
    }

    fn to_scalars(&self) -> Vec<Scalar> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }
}

/// The payload of a `Value` token.
///
/// `Bytes` preserves miINT8 payloads verbatim because array names and small
/// integer arrays share that wire type; the sign interpretation is only
/// known once the enclosing matrix class is.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Scalar(Scalar),
    Sequence(Numbers),
    Text(String),
}

impl Payload {
    /// View as an integer list. Non-sequence payloads yield an empty list,
    /// which the reader treats as a shape error where a list is required.
    pub fn to_i32s(&self) -> Vec<i32> {
        match self {
            Payload::Sequence(n) => n.to_scalars().iter().map(Scalar::as_i32).collect(),
            _ => Vec::new(),
        }
    }

    /// View as an unsigned list, with the same empty-on-mismatch rule.
    pub fn to_u32s(&self) -> Vec<u32> {
        match self {
            Payload::Sequence(n) => n.to_scalars().iter().map(Scalar::as_u32).collect(),
            _ => Vec::new(),
        }
    }

    /// Take the payload as text, if it has a textual reading.
    pub fn into_text_lossy(self) -> Option<String> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Bytes(b) => Some(String::from_utf8_lossy(&b).into_owned()),
            _ => None,
        }
    }
}

/// A numeric array: dims, real part and optional imaginary part.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    pub name: Vec<u8>,
    pub logical: bool,
    pub global: bool,
    pub dims: Vec<i32>,
    pub real: Numbers,
    pub imag: Option<Numbers>,
}

impl NumericArray {
    pub fn real_at(&self, i: usize) -> Option<Scalar> {
        self.real.get(i)
    }

    /// Column-major 2-D access.
    pub fn real_at2(&self, row: usize, col: usize) -> Option<Scalar> {
        if self.dims.len() != 2 {
            return None;
        }
        self.real_at(row + col * self.dims[0] as usize)
    }

    /// Column-major 3-D access; a 2-D array answers plane zero only.
    pub fn real_at3(&self, row: usize, col: usize, z: usize) -> Option<Scalar> {
        if self.dims.len() == 2 {
            if z == 0 {
                return self.real_at2(row, col);
            }
            log::warn!("accessing 2-D array with 3-D indices");
            return None;
        }
        if self.dims.len() != 3 {
            return None;
        }
        let (r, c) = (self.dims[0] as usize, self.dims[1] as usize);
        self.real_at(r * c * z + col * r + row)
    }
}

/// A character array.
#[derive(Debug, Clone, PartialEq)]
pub struct CharArray {
    pub name: Vec<u8>,
    pub logical: bool,
    pub global: bool,
    pub text: String,
}

/// A structure: an ordered field table. Structures are implicitly tabular;
/// every field holds one value per element of the dims product.
///
/// Objects are structures with a non-empty `class_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub name: Vec<u8>,
    pub logical: bool,
    pub global: bool,
    pub class_name: Vec<u8>,
    pub fields: BTreeMap<Vec<u8>, Vec<Value>>,
}

impl Structure {
    pub fn is_object(&self) -> bool {
        !self.class_name.is_empty()
    }

    /// First value of a field, if present.
    pub fn value(&self, field: &[u8]) -> Option<&Value> {
        self.fields.get(field).and_then(|l| l.first())
    }

    /// First value of a field rendered as text; empty when absent or
    /// non-textual.
    pub fn string(&self, field: &[u8]) -> String {
        match self.value(field) {
            Some(Value::Chars(c)) => c.text.clone(),
            _ => String::new(),
        }
    }

    pub fn structure(&self, field: &[u8]) -> Option<&Structure> {
        match self.value(field) {
            Some(Value::Struct(s)) => Some(s),
            _ => None,
        }
    }

    pub fn array(&self, field: &[u8]) -> Option<&NumericArray> {
        match self.value(field) {
            Some(Value::Numeric(a)) => Some(a),
            _ => None,
        }
    }

    /// Element `i` of the field's numeric array, if the field holds one.
    pub fn array_value(&self, field: &[u8], i: usize) -> Option<Scalar> {
        self.array(field).and_then(|a| a.real_at(i))
    }

    pub fn array_len(&self, field: &[u8]) -> usize {
        self.array(field).map(|a| a.real.len()).unwrap_or(0)
    }
}

/// A cell array: dims plus one value per cell, column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct CellArray {
    pub name: Vec<u8>,
    pub logical: bool,
    pub global: bool,
    pub dims: Vec<i32>,
    pub cells: Vec<Value>,
}

impl CellArray {
    pub fn value(&self, i: usize) -> Option<&Value> {
        self.cells.get(i)
    }

    pub fn value_at(&self, row: usize, col: usize) -> Option<&Value> {
        if self.dims.len() != 2 {
            return None;
        }
        self.value(row + col * self.dims[0] as usize)
    }

    pub fn structure_at(&self, row: usize, col: usize) -> Option<&Structure> {
        match self.value_at(row, col) {
            Some(Value::Struct(s)) => Some(s),
            _ => None,
        }
    }

    pub fn string(&self, i: usize) -> String {
        match self.value(i) {
            Some(Value::Chars(c)) => c.text.clone(),
            _ => String::new(),
        }
    }

    pub fn string_at(&self, row: usize, col: usize) -> String {
        if self.dims.len() != 2 {
            return String::new();
        }
        self.string(row + col * self.dims[0] as usize)
    }
}

/// A sparse array. Only the envelope is kept; the payload is skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseArray {
    pub name: Vec<u8>,
    pub logical: bool,
    pub global: bool,
}

/// Class codes 16 and 17, as produced by MATLAB `.fig` files. The layout
/// is empirical: class 17 carries one leading primitive value, and both
/// wrap exactly one nested matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Undocumented {
    pub name: Vec<u8>,
    pub logical: bool,
    pub global: bool,
    pub value: Option<Payload>,
    pub sub: Box<Value>,
}

/// One decoded top-level or nested value.
///
/// `Empty` doubles as the terminal value at end of stream and as the body
/// of a matrix element that carried no sub-elements.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Primitive(Payload),
    Numeric(NumericArray),
    Chars(CharArray),
    Struct(Structure),
    Cell(CellArray),
    Sparse(SparseArray),
    Undocumented(Undocumented),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// The array name, where the value carries one.
    pub fn name(&self) -> Option<&[u8]> {
        match self {
            Value::Numeric(a) => Some(&a.name),
            Value::Chars(c) => Some(&c.name),
            Value::Struct(s) => Some(&s.name),
            Value::Cell(c) => Some(&c.name),
            Value::Sparse(s) => Some(&s.name),
            Value::Undocumented(u) => Some(&u.name),
            Value::Empty | Value::Primitive(_) => None,
        }
    }
}

/// A value the writer can place into a matrix cell or structure field.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Scalar(Scalar),
    Text(String),
    /// An unsigned byte array, written as a `1 x n` uint8 matrix.
    Bytes(Vec<u8>),
    /// A homogeneous numeric sequence, written as an `n x 1` matrix.
    List(Vec<Scalar>),
}
