//! Reader and writer for MATLAB Level-5 MAT files.
//!
//! A MAT file is a binary container of named, typed, possibly nested
//! arrays: numeric matrices, character arrays, cell arrays, structures,
//! objects and sparse arrays. This crate decodes and re-encodes the
//! container: both tag layouts (normal and small data element), byte-order
//! negotiation from the header, and zlib-compressed element framing.
//!
//! Decoding is pull-based and streaming -- no seeking, one pass:
//!
//! ```no_run
//! use mat5_reader::{MatReader, Value};
//!
//! # fn main() -> mat5_reader::Result<()> {
//! let mut reader = MatReader::open("results.mat")?;
//! loop {
//!     match reader.next_element()? {
//!         Value::Empty => break,
//!         value => println!("{:?}", value.name()),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Encoding builds each matrix in a scratch sink and splices it into the
//! enclosing element on close, optionally zlib-compressed:
//!
//! ```
//! use mat5_reader::{MatWriter, Scalar, ScalarKind, WriteValue};
//!
//! # fn main() -> mat5_reader::Result<()> {
//! let mut writer = MatWriter::new(Vec::new(), true)?;
//! writer.begin_num_array(&[2, 2], ScalarKind::F64, false, b"m")?;
//! writer.add_num_array_element(&WriteValue::List(
//!     [1.0, 2.0, 3.0, 4.0].map(Scalar::F64).to_vec(),
//! ))?;
//! writer.end_num_array(false)?;
//! let bytes = writer.finish()?;
//! assert_eq!(&bytes[..19], &b"MATLAB 5.0 MAT-file"[..]);
//! # Ok(())
//! # }
//! ```
//!
//! Sparse array payloads are skipped on read and not produced on write;
//! the writer also does not create cell arrays or objects.

pub mod mat5;

pub use mat5::{
    CellArray, CharArray, ClassCode, DataType, Mat5Error, MatReader, MatWriter, NumericArray,
    Numbers, Parser, Payload, Result, Scalar, ScalarKind, SparseArray, Structure, Token,
    Undocumented, Value, WriteValue,
};
