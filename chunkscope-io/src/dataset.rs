//! The "get dataset slice" primitive the remote clients are built on.

use bytes::Bytes;
use chunkscope_core::{Canceler, Error, Result};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::ops::Range;

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    U8,
    U16,
    I16,
    U32,
    I32,
    I64,
    U64,
    F32,
    F64,
}

impl Dtype {
    /// Parse a numpy-style dtype string (`"<f8"`, `"float64"`, `"|u1"`).
    ///
    /// # Errors
    /// Returns [`Error::InvalidData`] for unsupported types.
    pub fn parse(s: &str) -> Result<Self> {
        let t = s.trim_start_matches(['<', '|', '=']);
        let dtype = match t {
            "u1" | "uint8" => Self::U8,
            "u2" | "uint16" => Self::U16,
            "i2" | "int16" => Self::I16,
            "u4" | "uint32" => Self::U32,
            "i4" | "int32" => Self::I32,
            "i8" | "int64" => Self::I64,
            "u8" | "uint64" => Self::U64,
            "f4" | "float32" => Self::F32,
            "f8" | "float64" => Self::F64,
            _ => return Err(Error::InvalidData(format!("unsupported dtype {s}"))),
        };
        Ok(dtype)
    }

    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "<u1",
            Self::U16 => "<u2",
            Self::I16 => "<i2",
            Self::U32 => "<u4",
            Self::I32 => "<i4",
            Self::I64 => "<i8",
            Self::U64 => "<u8",
            Self::F32 => "<f4",
            Self::F64 => "<f8",
        }
    }

    /// Decode little-endian values into `f64`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidData`] if the buffer is not a whole number of
    /// elements.
    #[allow(clippy::cast_precision_loss)]
    pub fn decode_le(self, buf: &[u8]) -> Result<Vec<f64>> {
        let size = self.size();
        if buf.len() % size != 0 {
            return Err(Error::InvalidData(format!(
                "{} bytes is not a multiple of {size} ({})",
                buf.len(),
                self.name()
            )));
        }
        let chunks = buf.chunks_exact(size);
        let values = match self {
            Self::U8 => buf.iter().map(|&b| f64::from(b)).collect(),
            Self::U16 => chunks
                .map(|c| f64::from(u16::from_le_bytes([c[0], c[1]])))
                .collect(),
            Self::I16 => chunks
                .map(|c| f64::from(i16::from_le_bytes([c[0], c[1]])))
                .collect(),
            Self::U32 => chunks.map(|c| f64::from(u32::from_le_bytes(arr4(c)))).collect(),
            Self::I32 => chunks.map(|c| f64::from(i32::from_le_bytes(arr4(c)))).collect(),
            Self::F32 => chunks.map(|c| f64::from(f32::from_le_bytes(arr4(c)))).collect(),
            Self::I64 => chunks.map(|c| i64::from_le_bytes(arr8(c)) as f64).collect(),
            Self::U64 => chunks.map(|c| u64::from_le_bytes(arr8(c)) as f64).collect(),
            Self::F64 => chunks.map(|c| f64::from_le_bytes(arr8(c))).collect(),
        };
        Ok(values)
    }
}

fn arr4(c: &[u8]) -> [u8; 4] {
    [c[0], c[1], c[2], c[3]]
}

fn arr8(c: &[u8]) -> [u8; 8] {
    [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]
}

/// Shape, type and attributes of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub shape: Vec<usize>,
    pub dtype: Dtype,
    pub attrs: Map<String, Value>,
}

impl DatasetInfo {
    /// Length of the first dimension (1 for scalars).
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric attribute, if present and finite.
    #[must_use]
    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        attr_f64(&self.attrs, name)
    }
}

/// Child names and attributes of a group.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupInfo {
    pub subgroups: Vec<String>,
    pub datasets: Vec<String>,
    pub attrs: Map<String, Value>,
}

impl GroupInfo {
    #[must_use]
    pub fn has_dataset(&self, name: &str) -> bool {
        self.datasets.iter().any(|d| d == name)
    }

    #[must_use]
    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        attr_f64(&self.attrs, name)
    }
}

fn attr_f64(attrs: &Map<String, Value>, name: &str) -> Option<f64> {
    attrs
        .get(name)
        .and_then(|v| match v {
            Value::Array(items) => items.first().and_then(Value::as_f64),
            other => other.as_f64(),
        })
        .filter(|v| v.is_finite())
}

/// Row-major numeric block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrayData {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl ArrayData {
    #[must_use]
    pub fn new(shape: Vec<usize>, values: Vec<f64>) -> Self {
        Self { shape, values }
    }

    /// Elements per first-dimension row.
    #[must_use]
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }
}

/// Options for [`DatasetReader::dataset_data`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Per-dimension ranges; `None` reads everything. Missing trailing
    /// dimensions are read whole.
    pub slice: Option<Vec<Range<usize>>>,
    pub canceler: Option<Canceler>,
}

impl ReadOptions {
    #[must_use]
    pub fn rows(range: Range<usize>) -> Self {
        Self {
            slice: Some(vec![range]),
            canceler: None,
        }
    }

    #[must_use]
    pub fn with_canceler(mut self, canceler: Canceler) -> Self {
        self.canceler = Some(canceler);
        self
    }

    /// Resolve the slice against a dataset shape, clipping each range.
    #[must_use]
    pub fn resolve(&self, shape: &[usize]) -> Vec<Range<usize>> {
        shape
            .iter()
            .enumerate()
            .map(|(dim, &len)| {
                match self.slice.as_ref().and_then(|s| s.get(dim)) {
                    Some(r) => {
                        let end = r.end.min(len);
                        r.start.min(end)..end
                    }
                    None => 0..len,
                }
            })
            .collect()
    }

    /// # Errors
    /// Returns [`Error::Canceled`] if the attached canceler fired.
    pub fn check_canceled(&self) -> Result<()> {
        self.canceler.as_ref().map_or(Ok(()), Canceler::check)
    }
}

/// Access to datasets inside a hierarchical container file.
pub trait DatasetReader: Send + Sync {
    /// Shape, dtype and attributes of the dataset at `path`.
    fn dataset_info<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<DatasetInfo>>;

    /// Read a block of the dataset at `path` as `f64`.
    fn dataset_data<'a>(
        &'a self,
        path: &'a str,
        options: ReadOptions,
    ) -> BoxFuture<'a, Result<ArrayData>>;

    /// Children and attributes of the group at `path`.
    fn group_info<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<GroupInfo>>;
}

/// Decode a raw little-endian block into [`ArrayData`].
///
/// # Errors
/// Returns an error if the buffer does not match `shape`.
pub fn decode_block(dtype: Dtype, shape: Vec<usize>, buf: &Bytes) -> Result<ArrayData> {
    let values = dtype.decode_le(buf)?;
    let expected: usize = shape.iter().product();
    if values.len() != expected {
        return Err(Error::InvalidData(format!(
            "expected {expected} values for shape {shape:?}, got {}",
            values.len()
        )));
    }
    Ok(ArrayData { shape, values })
}

/// Join a group path and a child name.
#[must_use]
pub fn join_path(group: &str, name: &str) -> String {
    let group = group.trim_end_matches('/');
    if group.is_empty() {
        format!("/{name}")
    } else {
        format!("{group}/{name}")
    }
}
