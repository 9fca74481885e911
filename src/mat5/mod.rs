//! Core MAT-file codec module.
//!
//! Layered leaves-first: framed sub-streams feed the lexer, the lexer
//! feeds the token parser, and the reader assembles semantic values from
//! tokens. The writer is the symmetric encode path with per-matrix
//! scratch buffering.

pub mod error;
pub mod models;
pub mod parser;
pub mod reader;
pub mod writer;

mod lexer;
mod stream;
mod utils;

pub use error::{Mat5Error, Result};
pub use models::{
    CellArray, CharArray, ClassCode, DataType, NumericArray, Numbers, Payload, Scalar,
    ScalarKind, SparseArray, Structure, Undocumented, Value, WriteValue,
};
pub use parser::{Parser, Token};
pub use reader::MatReader;
pub use writer::MatWriter;
