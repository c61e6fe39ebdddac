//! Reader for MATLAB Level 5 `.mat` files.
//!
//! Only what the dataset validator needs is decoded: the name, dimensions,
//! element class and values of each top-level array. Character, cell, struct
//! and object arrays are recorded with opaque values.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use thiserror::Error;

use crate::dataset::{RawArray, RawLayout, RawPayload, RawValues, SourceKind};

const HEADER_LEN: usize = 128;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MI_UTF8: u32 = 16;

const MX_CELL: u32 = 1;
const MX_STRUCT: u32 = 2;
const MX_OBJECT: u32 = 3;
const MX_CHAR: u32 = 4;
const MX_SPARSE: u32 = 5;
const MX_DOUBLE: u32 = 6;
const MX_SINGLE: u32 = 7;
const MX_INT8: u32 = 8;
const MX_UINT8: u32 = 9;
const MX_INT16: u32 = 10;
const MX_UINT16: u32 = 11;
const MX_INT32: u32 = 12;
const MX_UINT32: u32 = 13;
const MX_INT64: u32 = 14;
const MX_UINT64: u32 = 15;

const FLAG_COMPLEX: u32 = 0x08;
const FLAG_LOGICAL: u32 = 0x02;

#[derive(Debug, Error)]
pub enum MatError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("file is {0} bytes, shorter than the 128-byte MAT header")]
    TruncatedHeader(usize),

    #[error("unknown endian indicator {0:?}")]
    Endian(String),

    #[error("MAT v7.3 files are HDF5 containers and are not supported; save with -v7")]
    Hdf5,

    #[error("unsupported MAT version {0:#06x}")]
    Version(u16),

    #[error("data element truncated at offset {offset} (needs {needed} bytes)")]
    Truncated { offset: usize, needed: usize },

    #[error("failed to inflate compressed element: {0}")]
    Inflate(#[source] io::Error),

    #[error("malformed array {name:?}: {reason}")]
    Malformed { name: String, reason: String },
}

fn malformed(name: &str, reason: impl Into<String>) -> MatError {
    MatError::Malformed {
        name: name.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        }
    }

    fn u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        }
    }

    fn u64(self, bytes: [u8; 8]) -> u64 {
        match self {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        }
    }
}

fn array<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(chunk);
    out
}

struct Element<'a> {
    data_type: u32,
    data: &'a [u8],
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], endian: Endian) -> Self {
        Self {
            data,
            pos: 0,
            endian,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], MatError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(MatError::Truncated {
                offset: self.pos,
                needed: len,
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, MatError> {
        let bytes = self.take(4)?;
        Ok(self.endian.u32(array(bytes)))
    }

    fn align8(&mut self) {
        self.pos = ((self.pos + 7) & !7).min(self.data.len());
    }

    fn next_element(&mut self) -> Result<Option<Element<'a>>, MatError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let first = self.u32()?;
        let small_len = (first >> 16) as usize;
        if small_len != 0 {
            // Small data element: type and length share one word, data fits in the next.
            let data_type = first & 0xffff;
            let packed = self.take(4)?;
            if small_len > 4 {
                return Err(malformed("", format!("small element claims {small_len} bytes")));
            }
            return Ok(Some(Element {
                data_type,
                data: &packed[..small_len],
            }));
        }
        let len = self.u32()? as usize;
        let data = self.take(len)?;
        if first != MI_COMPRESSED {
            self.align8();
        }
        Ok(Some(Element {
            data_type: first,
            data,
        }))
    }

    fn expect_element(&mut self, name: &str, what: &str) -> Result<Element<'a>, MatError> {
        self.next_element()?
            .ok_or_else(|| malformed(name, format!("missing {what}")))
    }
}

/// Element values as stored, before conversion to the array's class.
enum Stored {
    Float(Vec<f64>),
    Signed(Vec<i64>),
    Unsigned(Vec<u64>),
}

impl Stored {
    fn decode(element: &Element<'_>, endian: Endian, name: &str) -> Result<Self, MatError> {
        let data = element.data;
        let stored = match element.data_type {
            MI_INT8 => Stored::Signed(data.iter().map(|&b| b as i8 as i64).collect()),
            MI_UINT8 | MI_UTF8 => Stored::Unsigned(data.iter().map(|&b| b as u64).collect()),
            MI_INT16 => Stored::Signed(
                chunks::<2>(data, name)?
                    .map(|c| endian.u16(c) as i16 as i64)
                    .collect(),
            ),
            MI_UINT16 => Stored::Unsigned(
                chunks::<2>(data, name)?
                    .map(|c| endian.u16(c) as u64)
                    .collect(),
            ),
            MI_INT32 => Stored::Signed(
                chunks::<4>(data, name)?
                    .map(|c| endian.u32(c) as i32 as i64)
                    .collect(),
            ),
            MI_UINT32 => Stored::Unsigned(
                chunks::<4>(data, name)?
                    .map(|c| endian.u32(c) as u64)
                    .collect(),
            ),
            MI_INT64 => Stored::Signed(
                chunks::<8>(data, name)?
                    .map(|c| endian.u64(c) as i64)
                    .collect(),
            ),
            MI_UINT64 => Stored::Unsigned(chunks::<8>(data, name)?.map(|c| endian.u64(c)).collect()),
            MI_SINGLE => Stored::Float(
                chunks::<4>(data, name)?
                    .map(|c| f32::from_bits(endian.u32(c)) as f64)
                    .collect(),
            ),
            MI_DOUBLE => Stored::Float(
                chunks::<8>(data, name)?
                    .map(|c| f64::from_bits(endian.u64(c)))
                    .collect(),
            ),
            other => return Err(malformed(name, format!("unexpected numeric data type {other}"))),
        };
        Ok(stored)
    }

    fn into_indices(self, name: &str, what: &str) -> Result<Vec<usize>, MatError> {
        let bad = || malformed(name, format!("negative or oversized {what}"));
        match self {
            Stored::Signed(values) => values
                .into_iter()
                .map(|v| usize::try_from(v).map_err(|_| bad()))
                .collect(),
            Stored::Unsigned(values) => values
                .into_iter()
                .map(|v| usize::try_from(v).map_err(|_| bad()))
                .collect(),
            Stored::Float(_) => Err(malformed(name, format!("{what} stored as floating point"))),
        }
    }

    fn len(&self) -> usize {
        match self {
            Stored::Float(values) => values.len(),
            Stored::Signed(values) => values.len(),
            Stored::Unsigned(values) => values.len(),
        }
    }

    fn truncate(&mut self, len: usize) {
        match self {
            Stored::Float(values) => values.truncate(len),
            Stored::Signed(values) => values.truncate(len),
            Stored::Unsigned(values) => values.truncate(len),
        }
    }

    fn into_floats(self) -> Vec<f64> {
        match self {
            Stored::Float(values) => values,
            Stored::Signed(values) => values.into_iter().map(|v| v as f64).collect(),
            Stored::Unsigned(values) => values.into_iter().map(|v| v as f64).collect(),
        }
    }

    fn into_signed(self, name: &str) -> Result<Vec<i64>, MatError> {
        match self {
            Stored::Signed(values) => Ok(values),
            Stored::Unsigned(values) => values
                .into_iter()
                .map(|v| i64::try_from(v).map_err(|_| malformed(name, "value exceeds int64")))
                .collect(),
            Stored::Float(values) => Ok(values.into_iter().map(|v| v as i64).collect()),
        }
    }

    fn into_unsigned(self, name: &str) -> Result<Vec<u64>, MatError> {
        match self {
            Stored::Unsigned(values) => Ok(values),
            Stored::Signed(values) => values
                .into_iter()
                .map(|v| u64::try_from(v).map_err(|_| malformed(name, "negative unsigned value")))
                .collect(),
            Stored::Float(values) => Ok(values.into_iter().map(|v| v as u64).collect()),
        }
    }
}

fn chunks<'a, const N: usize>(
    data: &'a [u8],
    name: &str,
) -> Result<impl Iterator<Item = [u8; N]> + use<'a, N>, MatError> {
    if data.len() % N != 0 {
        return Err(malformed(
            name,
            format!("{} bytes is not a multiple of the {N}-byte element size", data.len()),
        ));
    }
    Ok(data.chunks_exact(N).map(array::<N>))
}

/// Values are stored in the smallest type that holds them; MATLAB may write a
/// double array as `miUINT8`. The array class decides the result domain.
fn convert(
    class: u32,
    real: Stored,
    imag: Option<Stored>,
    name: &str,
) -> Result<RawValues, MatError> {
    let values = match class {
        MX_DOUBLE | MX_SINGLE | MX_SPARSE => RawValues::Float {
            real: real.into_floats(),
            imag: imag.map(Stored::into_floats),
        },
        MX_INT8 | MX_INT16 | MX_INT32 | MX_INT64 => RawValues::Signed {
            real: real.into_signed(name)?,
            imag: imag.map(|part| part.into_signed(name)).transpose()?,
        },
        MX_UINT8 | MX_UINT16 | MX_UINT32 | MX_UINT64 => RawValues::Unsigned {
            real: real.into_unsigned(name)?,
            imag: imag.map(|part| part.into_unsigned(name)).transpose()?,
        },
        _ => RawValues::Opaque,
    };
    Ok(values)
}

fn source_kind(class: u32, logical: bool) -> SourceKind {
    if logical {
        return SourceKind::Logical;
    }
    match class {
        MX_DOUBLE | MX_SPARSE => SourceKind::Double,
        MX_SINGLE => SourceKind::Single,
        MX_INT8 => SourceKind::Int8,
        MX_UINT8 => SourceKind::UInt8,
        MX_INT16 => SourceKind::Int16,
        MX_UINT16 => SourceKind::UInt16,
        MX_INT32 => SourceKind::Int32,
        MX_UINT32 => SourceKind::UInt32,
        MX_INT64 => SourceKind::Int64,
        MX_UINT64 => SourceKind::UInt64,
        MX_CHAR => SourceKind::Char,
        MX_CELL => SourceKind::Cell,
        MX_STRUCT => SourceKind::Struct,
        MX_OBJECT => SourceKind::Object,
        _ => SourceKind::Other,
    }
}

fn read_matrix(data: &[u8], endian: Endian) -> Result<Option<(String, RawArray)>, MatError> {
    if data.is_empty() {
        return Ok(None);
    }
    let mut cursor = Cursor::new(data, endian);

    let flags = cursor.expect_element("", "array flags")?;
    if flags.data.len() < 8 {
        return Err(malformed("", "array flags shorter than 8 bytes"));
    }
    let word = endian.u32(array(&flags.data[..4]));
    let class = word & 0xff;
    let flag_bits = (word >> 8) & 0xff;
    let complex = flag_bits & FLAG_COMPLEX != 0;
    let logical = flag_bits & FLAG_LOGICAL != 0;

    let dims_element = cursor.expect_element("", "dimensions")?;
    let dims = Stored::decode(&dims_element, endian, "")?.into_indices("", "dimension")?;
    let name_element = cursor.expect_element("", "array name")?;
    let name = String::from_utf8_lossy(name_element.data).into_owned();

    let kind = source_kind(class, logical);

    let layout = match class {
        MX_SPARSE => {
            let &[_, cols] = dims.as_slice() else {
                return Err(malformed(&name, format!("sparse array with dims {dims:?}")));
            };
            let row_element = cursor.expect_element(&name, "row indices")?;
            let mut row_indices =
                Stored::decode(&row_element, endian, &name)?.into_indices(&name, "row index")?;
            let col_element = cursor.expect_element(&name, "column pointers")?;
            let col_ptr =
                Stored::decode(&col_element, endian, &name)?.into_indices(&name, "column pointer")?;
            if cols.checked_add(1) != Some(col_ptr.len()) {
                return Err(malformed(
                    &name,
                    format!("{} column pointers for {cols} columns", col_ptr.len()),
                ));
            }
            let nnz = col_ptr[cols];
            let mut real = read_stored(&mut cursor, endian, &name, "real part")?;
            let mut imag = complex
                .then(|| read_stored(&mut cursor, endian, &name, "imaginary part"))
                .transpose()?;
            // ir and pr may be allocated beyond the used non-zeros.
            if row_indices.len() < nnz || real.len() < nnz {
                return Err(malformed(&name, format!("fewer than {nnz} stored non-zeros")));
            }
            row_indices.truncate(nnz);
            real.truncate(nnz);
            if let Some(part) = imag.as_mut() {
                part.truncate(nnz);
            }
            let values = if logical {
                RawValues::Opaque
            } else {
                convert(class, real, imag, &name)?
            };
            RawLayout::Sparse {
                col_ptr,
                row_indices,
                values,
            }
        }
        MX_DOUBLE | MX_SINGLE | MX_INT8 | MX_UINT8 | MX_INT16 | MX_UINT16 | MX_INT32
        | MX_UINT32 | MX_INT64 | MX_UINT64 => {
            let real = read_stored(&mut cursor, endian, &name, "real part")?;
            let imag = complex
                .then(|| read_stored(&mut cursor, endian, &name, "imaginary part"))
                .transpose()?;
            if logical {
                RawLayout::Dense(RawValues::Opaque)
            } else {
                RawLayout::Dense(convert(class, real, imag, &name)?)
            }
        }
        _ => RawLayout::Dense(RawValues::Opaque),
    };

    Ok(Some((name, RawArray { dims, kind, layout })))
}

fn read_stored(
    cursor: &mut Cursor<'_>,
    endian: Endian,
    name: &str,
    what: &str,
) -> Result<Stored, MatError> {
    let element = cursor.expect_element(name, what)?;
    Stored::decode(&element, endian, name)
}

fn collect(element: Element<'_>, endian: Endian, payload: &mut RawPayload) -> Result<(), MatError> {
    match element.data_type {
        MI_COMPRESSED => {
            let mut inflated = Vec::new();
            ZlibDecoder::new(element.data)
                .read_to_end(&mut inflated)
                .map_err(MatError::Inflate)?;
            let mut inner = Cursor::new(&inflated, endian);
            while let Some(nested) = inner.next_element()? {
                collect(nested, endian, payload)?;
            }
        }
        MI_MATRIX => {
            if let Some((name, array)) = read_matrix(element.data, endian)? {
                if name.is_empty() {
                    tracing::debug!("skipping unnamed top-level array");
                } else {
                    payload.insert(name, array);
                }
            }
        }
        other => tracing::debug!(data_type = other, "skipping non-matrix element"),
    }
    Ok(())
}

/// Decodes the bytes of a Level 5 MAT file into named arrays.
pub fn parse_mat(bytes: &[u8]) -> Result<RawPayload, MatError> {
    if bytes.len() < HEADER_LEN {
        return Err(MatError::TruncatedHeader(bytes.len()));
    }
    let endian = match &bytes[126..128] {
        b"IM" => Endian::Little,
        b"MI" => Endian::Big,
        other => return Err(MatError::Endian(String::from_utf8_lossy(other).into_owned())),
    };
    match endian.u16(array(&bytes[124..126])) {
        0x0100 => {}
        0x0200 => return Err(MatError::Hdf5),
        version => return Err(MatError::Version(version)),
    }

    let mut payload = RawPayload::new();
    let mut cursor = Cursor::new(&bytes[HEADER_LEN..], endian);
    while let Some(element) = cursor.next_element()? {
        collect(element, endian, &mut payload)?;
    }
    Ok(payload)
}

pub fn read_mat_file(path: &Path) -> Result<RawPayload, MatError> {
    let bytes = fs::read(path).map_err(|source| MatError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_mat(&bytes)
}
