//! Minimal NPY (v1.0) support for `f32` arrays.
//!
//! Slices and feature arrays are stored as little-endian `<f4`, C order, so they
//! load directly with `numpy.load`. Only what the pipeline writes is read back.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Read, Write};
use thiserror::Error;

const NPY_MAGIC_STRING: &[u8] = b"\x93NUMPY";

#[derive(Debug, Error)]
pub enum NpyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid npy header: {0}")]
    Header(String),

    #[error("Shape {shape:?} does not match {len} values")]
    ShapeMismatch { shape: Vec<usize>, len: usize },
}

pub type NpyResult<T> = Result<T, NpyError>;

/// A dense `f32` array with its shape
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NpyArray {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> NpyResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(NpyError::ShapeMismatch {
                shape,
                len: data.len(),
            });
        }
        Ok(NpyArray { shape, data })
    }

    pub fn vector(data: Vec<f32>) -> Self {
        NpyArray {
            shape: vec![data.len()],
            data,
        }
    }
}

fn header_string(shape: &[usize]) -> String {
    let mut dims = shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if shape.len() == 1 {
        dims.push(',');
    }
    format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({}), }}", dims)
}

pub fn write_npy<W: Write>(writer: &mut W, array: &NpyArray) -> NpyResult<()> {
    let mut header = header_string(&array.shape);
    // magic + version + u16 length + header + '\n' must be a multiple of 64
    let unpadded = NPY_MAGIC_STRING.len() + 2 + 2 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    writer.write_all(NPY_MAGIC_STRING)?;
    writer.write_all(&[1u8, 0u8])?;
    writer.write_u16::<LittleEndian>(header.len() as u16)?;
    writer.write_all(header.as_bytes())?;
    for &value in &array.data {
        writer.write_f32::<LittleEndian>(value)?;
    }
    Ok(())
}

pub fn to_npy_bytes(array: &NpyArray) -> NpyResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(128 + array.data.len() * 4);
    write_npy(&mut bytes, array)?;
    Ok(bytes)
}

fn read_header<R: Read>(reader: &mut R) -> NpyResult<String> {
    let mut magic_string = vec![0u8; NPY_MAGIC_STRING.len()];
    reader.read_exact(&mut magic_string)?;
    if magic_string != NPY_MAGIC_STRING {
        return Err(NpyError::Header("magic string mismatch".to_string()));
    }
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let header_len = match version[0] {
        1 => reader.read_u16::<LittleEndian>()? as usize,
        2 | 3 => reader.read_u32::<LittleEndian>()? as usize,
        otherwise => return Err(NpyError::Header(format!("unsupported version {otherwise}"))),
    };
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    Ok(String::from_utf8_lossy(&header).to_string())
}

// Hacky parser for the npy header, a typical example would be:
// {'descr': '<f4', 'fortran_order': False, 'shape': (128,), }
fn parse_header(header: &str) -> NpyResult<Vec<usize>> {
    let header =
        header.trim_matches(|c: char| c == '{' || c == '}' || c == ',' || c.is_whitespace());

    let mut parts: Vec<&str> = vec![];
    let mut start_index = 0usize;
    let mut depth = 0i64;
    for (index, c) in header.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&header[start_index..index]);
                start_index = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start_index..]);

    let mut fields: HashMap<&str, &str> = HashMap::new();
    for part in parts.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        match part.split_once(':') {
            Some((key, value)) => {
                let key = key.trim_matches(|c: char| c == '\'' || c.is_whitespace());
                let value = value.trim_matches(|c: char| c == '\'' || c.is_whitespace());
                fields.insert(key, value);
            }
            None => return Err(NpyError::Header(format!("unable to parse header {header}"))),
        }
    }

    match fields.get("descr") {
        Some(&"<f4") | Some(&"f4") | Some(&"<f") => {}
        Some(other) => return Err(NpyError::Header(format!("unsupported descr {other}"))),
        None => return Err(NpyError::Header("no descr in header".to_string())),
    }
    if fields.get("fortran_order") == Some(&"True") {
        return Err(NpyError::Header("fortran order not supported".to_string()));
    }

    let shape = fields
        .get("shape")
        .ok_or_else(|| NpyError::Header("no shape in header".to_string()))?
        .trim_matches(|c: char| c == '(' || c == ')' || c == ',');
    if shape.is_empty() {
        return Ok(vec![]);
    }
    shape
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<usize>()
                .map_err(|e| NpyError::Header(format!("bad dimension '{}': {}", v, e)))
        })
        .collect()
}

pub fn read_npy<R: Read>(reader: &mut R) -> NpyResult<NpyArray> {
    let header = read_header(reader)?;
    let shape = parse_header(&header)?;
    let len: usize = shape.iter().product();
    let mut data = vec![0f32; len];
    reader.read_f32_into::<LittleEndian>(&mut data)?;
    NpyArray::new(shape, data)
}
