use std::env;
use std::process::ExitCode;

use mat5_reader::{MatReader, Value};

fn main() -> ExitCode {
    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: mat5-reader <file.mat>");
        return ExitCode::FAILURE;
    };

    let mut reader = match MatReader::open(&path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };
    if reader.needs_byte_swap() {
        println!("byte order: swapped");
    }

    loop {
        match reader.next_element() {
            Ok(Value::Empty) => break,
            Ok(value) => println!("{}", describe(&value)),
            Err(e) => {
                eprintln!("{}: {}", path, e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn describe(value: &Value) -> String {
    let name = value
        .name()
        .filter(|n| !n.is_empty())
        .map(|n| String::from_utf8_lossy(n).into_owned())
        .unwrap_or_else(|| "<unnamed>".to_string());
    match value {
        Value::Empty => "<empty>".to_string(),
        Value::Primitive(p) => format!("{}: primitive {:?}", name, p),
        Value::Numeric(a) => format!(
            "{}: {} array, dims {:?}, {} elements{}",
            name,
            a.real.kind_name(),
            a.dims,
            a.real.len(),
            if a.imag.is_some() { ", complex" } else { "" }
        ),
        Value::Chars(c) => format!("{}: char array, {} chars", name, c.text.chars().count()),
        Value::Struct(s) if s.is_object() => format!(
            "{}: object {}, {} fields",
            name,
            String::from_utf8_lossy(&s.class_name),
            s.fields.len()
        ),
        Value::Struct(s) => format!("{}: struct, {} fields", name, s.fields.len()),
        Value::Cell(c) => format!("{}: cell array, dims {:?}, {} cells", name, c.dims, c.cells.len()),
        Value::Sparse(_) => format!("{}: sparse array (payload skipped)", name),
        Value::Undocumented(_) => format!("{}: undocumented class", name),
    }
}
