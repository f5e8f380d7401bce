//! Minimal NumPy `.npy` (format 1.0) reader and writer.
//!
//! Only the three dtypes the pipeline produces are supported: `<f4` matrices
//! for features, `<U{n}` vectors for class labels and `<i8` vectors for
//! binary labels. Arrays are always C-ordered.

use std::io::{Read, Write};

use ndarray::Array2;
use thiserror::Error;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;
const MAX_HEADER_LEN: usize = 1 << 20;
/// Upper bound on up-front allocation; shapes come from the file and are untrusted.
const PREALLOC_LIMIT: usize = 1 << 16;

#[derive(Debug, Error)]
pub enum NpyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not an npy file (bad magic)")]
    BadMagic,
    #[error("unsupported npy format version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("invalid npy header: {0}")]
    BadHeader(String),
    #[error("unsupported dtype {found} (expected {expected})")]
    UnsupportedDtype { found: String, expected: &'static str },
    #[error("fortran-ordered arrays are not supported")]
    FortranOrder,
    #[error("expected a {expected}-d array, found shape {found:?}")]
    Dimensions { expected: usize, found: Vec<usize> },
    #[error("array data is truncated")]
    Truncated,
    #[error("label is not valid unicode: {0:#x}")]
    BadCodePoint(u32),
}

/// Write a row-major `f32` matrix as `<f4`.
pub fn write_f32_matrix<W: Write>(writer: &mut W, matrix: &Array2<f32>) -> Result<(), NpyError> {
    let (rows, cols) = matrix.dim();
    write_header(writer, "<f4", &[rows, cols])?;
    for value in matrix.iter() {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Write integers as a `<i8` vector.
pub fn write_i64_vector<W: Write>(writer: &mut W, values: &[i64]) -> Result<(), NpyError> {
    write_header(writer, "<i8", &[values.len()])?;
    for value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Write strings as a fixed-width `<U{n}` vector, `n` being the longest label.
pub fn write_str_vector<W: Write>(writer: &mut W, values: &[String]) -> Result<(), NpyError> {
    let width = values
        .iter()
        .map(|value| value.chars().count())
        .max()
        .unwrap_or(0)
        .max(1);
    write_header(writer, &format!("<U{width}"), &[values.len()])?;
    for value in values {
        let mut written = 0usize;
        for ch in value.chars() {
            writer.write_all(&u32::from(ch).to_le_bytes())?;
            written += 1;
        }
        for _ in written..width {
            writer.write_all(&0u32.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read a `<f4` matrix.
pub fn read_f32_matrix<R: Read>(reader: &mut R) -> Result<Array2<f32>, NpyError> {
    let header = read_header(reader)?;
    if header.descr != "<f4" {
        return Err(NpyError::UnsupportedDtype {
            found: header.descr,
            expected: "<f4",
        });
    }
    let (rows, cols) = match header.shape.as_slice() {
        [rows, cols] => (*rows, *cols),
        _ => {
            return Err(NpyError::Dimensions {
                expected: 2,
                found: header.shape,
            });
        }
    };
    let count = rows.checked_mul(cols).ok_or(NpyError::Truncated)?;
    let mut values = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    let mut buf = [0u8; 4];
    for _ in 0..count {
        read_exact(reader, &mut buf)?;
        values.push(f32::from_le_bytes(buf));
    }
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|err| NpyError::BadHeader(format!("shape does not match data: {err}")))
}

/// Read a label vector stored as `<U{n}` or `<i8`; integers become their decimal text.
pub fn read_labels<R: Read>(reader: &mut R) -> Result<Vec<String>, NpyError> {
    let header = read_header(reader)?;
    let len = match header.shape.as_slice() {
        [len] => *len,
        _ => {
            return Err(NpyError::Dimensions {
                expected: 1,
                found: header.shape,
            });
        }
    };
    if header.descr == "<i8" {
        let mut labels = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        let mut buf = [0u8; 8];
        for _ in 0..len {
            read_exact(reader, &mut buf)?;
            labels.push(i64::from_le_bytes(buf).to_string());
        }
        return Ok(labels);
    }
    let width = header
        .descr
        .strip_prefix("<U")
        .and_then(|width| width.parse::<usize>().ok())
        .ok_or_else(|| NpyError::UnsupportedDtype {
            found: header.descr.clone(),
            expected: "<U{n} or <i8",
        })?;
    let mut labels = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    let mut buf = [0u8; 4];
    for _ in 0..len {
        let mut label = String::with_capacity(width.min(PREALLOC_LIMIT));
        for _ in 0..width {
            read_exact(reader, &mut buf)?;
            let code = u32::from_le_bytes(buf);
            if code == 0 {
                continue;
            }
            label.push(char::from_u32(code).ok_or(NpyError::BadCodePoint(code))?);
        }
        labels.push(label);
    }
    Ok(labels)
}

fn write_header<W: Write>(writer: &mut W, descr: &str, shape: &[usize]) -> Result<(), NpyError> {
    let mut header = format!(
        "{{'descr': '{descr}', 'fortran_order': False, 'shape': {}, }}",
        shape_literal(shape)
    );
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');
    let header_len = u16::try_from(header.len())
        .map_err(|_| NpyError::BadHeader("header longer than 65535 bytes".to_string()))?;
    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    Ok(())
}

fn shape_literal(shape: &[usize]) -> String {
    match shape {
        [single] => format!("({single},)"),
        dims => {
            let parts: Vec<String> = dims.iter().map(usize::to_string).collect();
            format!("({})", parts.join(", "))
        }
    }
}

struct Header {
    descr: String,
    shape: Vec<usize>,
}

fn read_header<R: Read>(reader: &mut R) -> Result<Header, NpyError> {
    let mut magic = [0u8; 6];
    read_exact(reader, &mut magic)?;
    if &magic != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let mut version = [0u8; 2];
    read_exact(reader, &mut version)?;
    let header_len = match version {
        [1, 0] => {
            let mut len = [0u8; 2];
            read_exact(reader, &mut len)?;
            u16::from_le_bytes(len) as usize
        }
        [2, 0] | [3, 0] => {
            let mut len = [0u8; 4];
            read_exact(reader, &mut len)?;
            u32::from_le_bytes(len) as usize
        }
        [major, minor] => return Err(NpyError::UnsupportedVersion(major, minor)),
    };
    if header_len > MAX_HEADER_LEN {
        return Err(NpyError::BadHeader(format!(
            "header length {header_len} exceeds {MAX_HEADER_LEN} bytes"
        )));
    }
    let mut raw = vec![0u8; header_len];
    read_exact(reader, &mut raw)?;
    let text = String::from_utf8(raw)
        .map_err(|_| NpyError::BadHeader("header is not utf-8".to_string()))?;
    parse_header(&text)
}

fn parse_header(text: &str) -> Result<Header, NpyError> {
    let descr = quoted_value(text, "descr")
        .ok_or_else(|| NpyError::BadHeader("missing descr".to_string()))?;
    let fortran = raw_value(text, "fortran_order")
        .ok_or_else(|| NpyError::BadHeader("missing fortran_order".to_string()))?;
    if fortran.starts_with("True") {
        return Err(NpyError::FortranOrder);
    }
    let shape_text = raw_value(text, "shape")
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.split_once(')'))
        .map(|(inner, _)| inner)
        .ok_or_else(|| NpyError::BadHeader("missing shape".to_string()))?;
    let shape = shape_text
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<usize>()
                .map_err(|_| NpyError::BadHeader(format!("bad shape entry `{part}`")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Header { descr, shape })
}

fn raw_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{key}':");
    let start = text.find(&pattern)? + pattern.len();
    Some(text[start..].trim_start())
}

fn quoted_value(text: &str, key: &str) -> Option<String> {
    let rest = raw_value(text, key)?.strip_prefix('\'')?;
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), NpyError> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        std::io::ErrorKind::UnexpectedEof => NpyError::Truncated,
        _ => NpyError::Io(err),
    })
}
