//! Lexer and parser behavior against hand-built wire images.

use std::io::{Cursor, Read, Write};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use mat5_reader::{Mat5Error, MatReader, Numbers, Parser, Payload, Scalar, Token, Value};

// element type codes
const MI_INT8: u32 = 1;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_DOUBLE: u32 = 9;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

// array class codes
const MX_CELL: u32 = 1;
const MX_STRUCT: u32 = 2;
const MX_SPARSE: u32 = 5;
const MX_DOUBLE: u32 = 6;

/// Builds wire images in host byte order, or fully byte-swapped.
struct Image {
    buf: Vec<u8>,
    swap: bool,
}

impl Image {
    fn with_header(swap: bool) -> Self {
        let mut img = Image::raw(swap);
        img.buf.extend_from_slice(b"MATLAB 5.0 MAT-file");
        img.buf.resize(116, b' ');
        img.buf.extend_from_slice(&[0u8; 8]);
        img.u16(0x0100);
        img.u16(0x4d49);
        img
    }

    fn raw(swap: bool) -> Self {
        Image {
            buf: Vec::new(),
            swap,
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        if self.swap {
            self.buf.extend(bytes.iter().rev());
        } else {
            self.buf.extend_from_slice(bytes);
        }
    }

    fn u16(&mut self, v: u16) {
        self.put(&v.to_ne_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_ne_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.put(&v.to_ne_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.put(&v.to_bits().to_ne_bytes());
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    /// Tag in whichever form the payload length calls for.
    fn tag(&mut self, ty: u32, len: u32) {
        if len <= 4 {
            self.u32(ty | (len << 16));
        } else {
            self.u32(ty);
            self.u32(len);
        }
    }

    /// Tag forced into the two-word form, as needed for empty matrices.
    fn tag_normal(&mut self, ty: u32, len: u32) {
        self.u32(ty);
        self.u32(len);
    }

    fn pad(&mut self, len: u32) {
        let pad = if len <= 4 {
            (4 - len) as usize
        } else {
            ((8 - len % 8) % 8) as usize
        };
        self.buf.extend(std::iter::repeat(0u8).take(pad));
    }

    fn element(&mut self, ty: u32, payload: &[u8]) {
        self.tag(ty, payload.len() as u32);
        self.bytes(payload);
        self.pad(payload.len() as u32);
    }
}

/// Matrix prologue shared by every class: flags, dims, name.
fn matrix_prologue(img: &mut Image, class: u32, dims: &[i32], name: &[u8]) {
    img.tag(MI_UINT32, 8);
    img.u32(class);
    img.u32(0);
    img.tag(MI_INT32, 4 * dims.len() as u32);
    for d in dims {
        img.i32(*d);
    }
    img.pad(4 * dims.len() as u32);
    img.element(MI_INT8, name);
}

fn double_matrix_body(swap: bool, dims: &[i32], name: &[u8], data: &[f64]) -> Vec<u8> {
    let mut img = Image::raw(swap);
    matrix_prologue(&mut img, MX_DOUBLE, dims, name);
    img.tag(MI_DOUBLE, 8 * data.len() as u32);
    for v in data {
        img.f64(*v);
    }
    img.pad(8 * data.len() as u32);
    img.buf
}

fn wrap_matrix(img: &mut Image, body: &[u8]) {
    img.tag(MI_MATRIX, body.len() as u32);
    img.bytes(body);
    img.pad(body.len() as u32);
}

fn read_values(bytes: Vec<u8>) -> Vec<Value> {
    let mut reader = MatReader::from_reader(Cursor::new(bytes), true).expect("open image");
    let mut out = Vec::new();
    loop {
        match reader.next_element().expect("element") {
            Value::Empty => break,
            v => out.push(v),
        }
    }
    out
}

/// Serves one byte per read call, to prove chunking independence.
struct OneByte<R>(R);

impl<R: Read> Read for OneByte<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.0.read(&mut buf[..1])
    }
}

#[test]
fn header_negotiates_native_order() {
    let img = Image::with_header(false);
    let mut reader = MatReader::from_reader(Cursor::new(img.buf), true).expect("open");
    assert!(!reader.needs_byte_swap());
    assert_eq!(reader.next_element().expect("terminal"), Value::Empty);
    // the terminal value is stable across repeated calls
    assert_eq!(reader.next_element().expect("terminal"), Value::Empty);
}

#[test]
fn header_negotiates_byte_swap() {
    let img = Image::with_header(true);
    let mut reader = MatReader::from_reader(Cursor::new(img.buf), true).expect("open");
    assert!(reader.needs_byte_swap());
    assert_eq!(reader.next_element().expect("terminal"), Value::Empty);
}

#[test]
fn empty_file_fails_header() {
    let err = MatReader::from_reader(Cursor::new(Vec::new()), true).unwrap_err();
    assert!(matches!(err, Mat5Error::InvalidHeader(_)));
}

#[test]
fn wrong_banner_fails_header() {
    let mut bytes = b"MATLAB 4.0 MAT-file".to_vec();
    bytes.resize(128, b' ');
    let err = MatReader::from_reader(Cursor::new(bytes), true).unwrap_err();
    assert!(matches!(err, Mat5Error::InvalidHeader(_)));
}

#[test]
fn bad_endian_marker_fails_header() {
    let mut img = Image::with_header(false);
    let at = img.buf.len();
    img.buf[at - 2] = b'X';
    let err = MatReader::from_reader(Cursor::new(img.buf), true).unwrap_err();
    assert!(matches!(err, Mat5Error::InvalidHeader(_)));
}

#[test]
fn wrong_version_fails_header() {
    let mut img = Image::raw(false);
    img.buf.extend_from_slice(b"MATLAB 5.0 MAT-file");
    img.buf.resize(116, b' ');
    img.buf.extend_from_slice(&[0u8; 8]);
    img.u16(0x0200);
    img.u16(0x4d49);
    let err = MatReader::from_reader(Cursor::new(img.buf), true).unwrap_err();
    assert!(matches!(err, Mat5Error::UnsupportedVersion(0x0200)));
}

#[test]
fn small_tag_length_over_four_is_rejected() {
    let mut img = Image::with_header(false);
    img.u32(MI_INT8 | (5 << 16));
    img.bytes(b"hello");
    let mut reader = MatReader::from_reader(Cursor::new(img.buf), true).expect("open");
    match reader.next_element() {
        Err(Mat5Error::Read(msg)) => assert_eq!(msg, "Lexer Error"),
        other => panic!("expected lexer error, got {:?}", other),
    }
}

#[test]
fn small_tag_int32_scalar_token() {
    let mut img = Image::with_header(false);
    img.tag(MI_INT32, 4);
    img.i32(42);
    let mut parser = Parser::new(Cursor::new(img.buf), true).expect("open");
    assert_eq!(
        parser.next_token(),
        Token::Value(Payload::Scalar(Scalar::I32(42)))
    );
    assert_eq!(parser.next_token(), Token::Null);
}

#[test]
fn double_matrix_decodes() {
    let mut img = Image::with_header(false);
    let body = double_matrix_body(false, &[2, 2], b"", &[1.0, 2.0, 3.0, 4.0]);
    wrap_matrix(&mut img, &body);

    let values = read_values(img.buf);
    assert_eq!(values.len(), 1);
    match &values[0] {
        Value::Numeric(a) => {
            assert!(a.name.is_empty());
            assert_eq!(a.dims, vec![2, 2]);
            assert_eq!(a.real, Numbers::F64(vec![1.0, 2.0, 3.0, 4.0]));
            assert!(a.imag.is_none());
            assert!(!a.logical && !a.global);
            // column-major access
            assert_eq!(a.real_at2(1, 0), Some(Scalar::F64(2.0)));
            assert_eq!(a.real_at2(0, 1), Some(Scalar::F64(3.0)));
        }
        other => panic!("expected numeric array, got {:?}", other),
    }
}

#[test]
fn struct_single_field_decodes() {
    let mut img = Image::with_header(false);
    let mut body = Image::raw(false);
    matrix_prologue(&mut body, MX_STRUCT, &[1, 1], b"");
    // field-name slot width, then the name table
    body.tag(MI_INT32, 4);
    body.i32(2);
    body.element(MI_INT8, b"x\0");
    let nested = double_matrix_body(false, &[1, 1], b"", &[7.5]);
    wrap_matrix(&mut body, &nested);
    wrap_matrix(&mut img, &body.buf);

    let values = read_values(img.buf);
    assert_eq!(values.len(), 1);
    match &values[0] {
        Value::Struct(s) => {
            assert!(!s.is_object());
            assert_eq!(s.fields.len(), 1);
            let field = s.fields.get(b"x".as_slice()).expect("field x");
            assert_eq!(field.len(), 1);
            assert_eq!(s.array_value(b"x", 0), Some(Scalar::F64(7.5)));
        }
        other => panic!("expected structure, got {:?}", other),
    }
}

#[test]
fn byte_swapped_image_decodes_identically() {
    let mut native = Image::with_header(false);
    let body = double_matrix_body(false, &[2, 3], b"m", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    wrap_matrix(&mut native, &body);

    let mut swapped = Image::with_header(true);
    let body = double_matrix_body(true, &[2, 3], b"m", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    wrap_matrix(&mut swapped, &body);

    let mut reader = MatReader::from_reader(Cursor::new(swapped.buf), true).expect("open");
    assert!(reader.needs_byte_swap());
    let from_swapped = reader.next_element().expect("element");
    assert_eq!(read_values(native.buf), vec![from_swapped]);
}

#[test]
fn one_byte_chunking_is_equivalent() {
    let mut img = Image::with_header(false);
    let body = double_matrix_body(false, &[2, 2], b"q", &[9.0, 8.0, 7.0, 6.0]);
    wrap_matrix(&mut img, &body);

    let whole = read_values(img.buf.clone());
    let mut reader =
        MatReader::from_reader(OneByte(Cursor::new(img.buf)), true).expect("open chunked");
    let mut chunked = Vec::new();
    loop {
        match reader.next_element().expect("element") {
            Value::Empty => break,
            v => chunked.push(v),
        }
    }
    assert_eq!(whole, chunked);
}

#[test]
fn compressed_matrix_is_equivalent() {
    let body = double_matrix_body(false, &[2, 2], b"z", &[4.0, 3.0, 2.0, 1.0]);

    let mut plain = Image::with_header(false);
    wrap_matrix(&mut plain, &body);
    let expected = read_values(plain.buf);

    // the compressed payload is the whole framed element, pad included
    let mut element = Image::raw(false);
    wrap_matrix(&mut element, &body);
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&element.buf).expect("deflate");
    let deflated = enc.finish().expect("finish");

    let mut img = Image::with_header(false);
    img.tag_normal(MI_COMPRESSED, deflated.len() as u32);
    img.bytes(&deflated);
    // no trailing padding after a compressed element

    assert_eq!(read_values(img.buf), expected);
}

#[test]
fn empty_matrix_yields_empty_value() {
    let mut img = Image::with_header(false);
    img.tag_normal(MI_MATRIX, 0);
    let mut reader = MatReader::from_reader(Cursor::new(img.buf), true).expect("open");
    assert_eq!(reader.next_element().expect("empty matrix"), Value::Empty);
}

#[test]
fn cell_array_decodes_and_limit_truncates() {
    let build = || {
        let mut img = Image::with_header(false);
        let mut body = Image::raw(false);
        matrix_prologue(&mut body, MX_CELL, &[1, 3], b"c");
        for v in [1.0, 2.0, 3.0] {
            let nested = double_matrix_body(false, &[1, 1], b"", &[v]);
            wrap_matrix(&mut body, &nested);
        }
        wrap_matrix(&mut img, &body.buf);
        img.buf
    };

    let values = read_values(build());
    match &values[0] {
        Value::Cell(c) => {
            assert_eq!(c.dims, vec![1, 3]);
            assert_eq!(c.cells.len(), 3);
            match c.value(2) {
                Some(Value::Numeric(a)) => assert_eq!(a.real, Numbers::F64(vec![3.0])),
                other => panic!("expected numeric cell, got {:?}", other),
            }
        }
        other => panic!("expected cell array, got {:?}", other),
    }

    let mut reader = MatReader::from_reader(Cursor::new(build()), true).expect("open");
    reader.set_limit(2);
    match reader.next_element().expect("element") {
        Value::Cell(c) => assert_eq!(c.cells.len(), 2),
        other => panic!("expected cell array, got {:?}", other),
    }
    // the truncated tail was drained; the stream ends cleanly
    assert_eq!(reader.next_element().expect("terminal"), Value::Empty);
}

#[test]
fn sparse_envelope_is_kept_and_stream_continues() {
    let mut img = Image::with_header(false);
    let mut body = Image::raw(false);
    matrix_prologue(&mut body, MX_SPARSE, &[2, 2], b"sp");
    // row indices, column indices, real part; discarded by the reader
    body.element(MI_INT32, &[1, 0, 0, 0]);
    body.element(MI_INT32, &[0, 0, 0, 0]);
    body.tag(MI_DOUBLE, 8);
    body.f64(5.0);
    wrap_matrix(&mut img, &body.buf);
    let after = double_matrix_body(false, &[1, 1], b"after", &[1.5]);
    wrap_matrix(&mut img, &after);

    let values = read_values(img.buf);
    assert_eq!(values.len(), 2);
    match &values[0] {
        Value::Sparse(s) => assert_eq!(s.name, b"sp".to_vec()),
        other => panic!("expected sparse array, got {:?}", other),
    }
    match &values[1] {
        Value::Numeric(a) => assert_eq!(a.name, b"after".to_vec()),
        other => panic!("expected numeric array, got {:?}", other),
    }
}

#[test]
fn unknown_class_code_is_an_error() {
    let mut img = Image::with_header(false);
    let mut body = Image::raw(false);
    matrix_prologue(&mut body, 20, &[1, 1], b"");
    wrap_matrix(&mut img, &body.buf);
    let mut reader = MatReader::from_reader(Cursor::new(img.buf), true).expect("open");
    match reader.next_element() {
        Err(Mat5Error::Read(msg)) => assert_eq!(msg, "Invalid array type"),
        other => panic!("expected class error, got {:?}", other),
    }
}

#[test]
fn struct_field_count_mismatch_is_an_error() {
    let mut img = Image::with_header(false);
    let mut body = Image::raw(false);
    matrix_prologue(&mut body, MX_STRUCT, &[1, 1], b"");
    body.tag(MI_INT32, 4);
    body.i32(2);
    body.element(MI_INT8, b"a\0b\0");
    // three field matrices for two fields: not a whole row
    for v in [1.0, 2.0, 3.0] {
        let nested = double_matrix_body(false, &[1, 1], b"", &[v]);
        wrap_matrix(&mut body, &nested);
    }
    wrap_matrix(&mut img, &body.buf);
    let mut reader = MatReader::from_reader(Cursor::new(img.buf), true).expect("open");
    match reader.next_element() {
        Err(Mat5Error::Read(msg)) => assert_eq!(msg, "Fields and names not consistent"),
        other => panic!("expected consistency error, got {:?}", other),
    }
}

#[test]
fn dims_product_mismatch_is_an_error() {
    let mut img = Image::with_header(false);
    let body = double_matrix_body(false, &[2, 2], b"", &[1.0, 2.0, 3.0]);
    wrap_matrix(&mut img, &body);
    let mut reader = MatReader::from_reader(Cursor::new(img.buf), true).expect("open");
    match reader.next_element() {
        Err(Mat5Error::Read(msg)) => assert_eq!(msg, "Invalid array real part"),
        other => panic!("expected length error, got {:?}", other),
    }
}

#[test]
fn one_dimensional_numeric_is_rejected() {
    // a single dims entry collapses to a scalar token, which does not pass
    // for a dimension list
    let mut img = Image::with_header(false);
    let body = double_matrix_body(false, &[4], b"", &[1.0, 2.0, 3.0, 4.0]);
    wrap_matrix(&mut img, &body);
    let mut reader = MatReader::from_reader(Cursor::new(img.buf), true).expect("open");
    match reader.next_element() {
        Err(Mat5Error::Read(msg)) => assert_eq!(msg, "Invalid array dimensions"),
        other => panic!("expected dims error, got {:?}", other),
    }
}
