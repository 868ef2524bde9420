//! Minimal NumPy `.npy` codec for dense little-endian `f64` arrays.
//!
//! Writes format version 1.0 with C-order layout; reads versions 1.x and
//! 2.x as long as the dtype is `<f8` and the array is not Fortran-ordered.

use std::io::{Read, Write};
use thiserror::Error;

use crate::value::NdArray;

const MAGIC: &[u8; 6] = b"\x93NUMPY";

#[derive(Debug, Error)]
pub enum NpyError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("not an npy file (bad magic)")]
    BadMagic,

    #[error("unsupported npy format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("unsupported dtype or layout: {0}")]
    Unsupported(String),

    #[error("malformed npy header: {0}")]
    BadHeader(String),

    #[error("data length {actual} does not match shape element count {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Serialize an array as npy v1.0.
pub fn write_npy<W: Write>(mut writer: W, array: &NdArray) -> Result<(), NpyError> {
    let shape = match array.shape.as_slice() {
        [single] => format!("({single},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': {shape}, }}");
    // pad so magic + version + length field + header is a multiple of 64
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.extend(std::iter::repeat_n(' ', padding));
    header.push('\n');

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    let header_len = u16::try_from(header.len())
        .map_err(|_| NpyError::BadHeader("header exceeds v1.0 length limit".into()))?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    for value in &array.data {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Deserialize an npy file into an array.
pub fn read_npy<R: Read>(mut reader: R) -> Result<NdArray, NpyError> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let header_len = match version[0] {
        1 => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            usize::from(u16::from_le_bytes(len))
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        major => {
            return Err(NpyError::UnsupportedVersion {
                major,
                minor: version[1],
            })
        }
    };

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8(header)
        .map_err(|_| NpyError::BadHeader("header is not valid UTF-8".into()))?;

    if !header.contains("'descr': '<f8'") {
        return Err(NpyError::Unsupported(
            "only little-endian f64 (<f8) is supported".into(),
        ));
    }
    if !header.contains("'fortran_order': False") {
        return Err(NpyError::Unsupported("fortran-ordered data".into()));
    }
    let shape = parse_shape(&header)?;

    let expected: usize = shape.iter().product();
    let mut data = Vec::with_capacity(expected);
    let mut buf = [0u8; 8];
    for _ in 0..expected {
        reader.read_exact(&mut buf)?;
        data.push(f64::from_le_bytes(buf));
    }

    NdArray::new(shape, data).map_err(|e| NpyError::LengthMismatch {
        expected: e.expected,
        actual: e.actual,
    })
}

fn parse_shape(header: &str) -> Result<Vec<usize>, NpyError> {
    let start = header
        .find("'shape':")
        .ok_or_else(|| NpyError::BadHeader("missing shape".into()))?;
    let rest = &header[start..];
    let open = rest
        .find('(')
        .ok_or_else(|| NpyError::BadHeader("missing shape tuple".into()))?;
    let close = rest
        .find(')')
        .ok_or_else(|| NpyError::BadHeader("unterminated shape tuple".into()))?;
    rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<usize>()
                .map_err(|_| NpyError::BadHeader(format!("bad shape dimension `{part}`")))
        })
        .collect()
}
