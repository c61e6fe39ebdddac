//! Dataset variants and the schema validator.
//!
//! A retrieved payload is a mapping of named arrays. [`validate`] walks
//! [`RULES`] in order and builds the first variant whose required fields are
//! all present; other fields are dropped. Every required field is normalized
//! to `f64`, `Complex64` or `i64` elements.

use std::collections::BTreeMap;
use std::fmt;

use num_complex::Complex64;
use serde::Serialize;

use crate::error::MorbError;

/// Element class of an array as stored in the source container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Double,
    Single,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Logical,
    Char,
    Cell,
    Struct,
    Object,
    Other,
}

impl SourceKind {
    fn is_float(self) -> bool {
        matches!(self, SourceKind::Double | SourceKind::Single)
    }

    fn is_integer(self) -> bool {
        matches!(
            self,
            SourceKind::Int8
                | SourceKind::UInt8
                | SourceKind::Int16
                | SourceKind::UInt16
                | SourceKind::Int32
                | SourceKind::UInt32
                | SourceKind::Int64
                | SourceKind::UInt64
        )
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Double => "double",
            SourceKind::Single => "single",
            SourceKind::Int8 => "int8",
            SourceKind::UInt8 => "uint8",
            SourceKind::Int16 => "int16",
            SourceKind::UInt16 => "uint16",
            SourceKind::Int32 => "int32",
            SourceKind::UInt32 => "uint32",
            SourceKind::Int64 => "int64",
            SourceKind::UInt64 => "uint64",
            SourceKind::Logical => "logical",
            SourceKind::Char => "char",
            SourceKind::Cell => "cell",
            SourceKind::Struct => "struct",
            SourceKind::Object => "object",
            SourceKind::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// Source values, widened but not yet normalized. `imag` is set for complex data.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValues {
    Float { real: Vec<f64>, imag: Option<Vec<f64>> },
    Signed { real: Vec<i64>, imag: Option<Vec<i64>> },
    Unsigned { real: Vec<u64>, imag: Option<Vec<u64>> },
    Opaque,
}

impl RawValues {
    fn len(&self) -> Option<usize> {
        match self {
            RawValues::Float { real, .. } => Some(real.len()),
            RawValues::Signed { real, .. } => Some(real.len()),
            RawValues::Unsigned { real, .. } => Some(real.len()),
            RawValues::Opaque => None,
        }
    }

    fn is_complex(&self) -> bool {
        match self {
            RawValues::Float { imag, .. } => imag.is_some(),
            RawValues::Signed { imag, .. } => imag.is_some(),
            RawValues::Unsigned { imag, .. } => imag.is_some(),
            RawValues::Opaque => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawLayout {
    /// Column-major values.
    Dense(RawValues),
    /// Compressed sparse column.
    Sparse {
        col_ptr: Vec<usize>,
        row_indices: Vec<usize>,
        values: RawValues,
    },
}

/// One named array exactly as the container described it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArray {
    pub dims: Vec<usize>,
    pub kind: SourceKind,
    pub layout: RawLayout,
}

impl RawArray {
    pub fn dense(rows: usize, cols: usize, kind: SourceKind, values: RawValues) -> Self {
        Self {
            dims: vec![rows, cols],
            kind,
            layout: RawLayout::Dense(values),
        }
    }

    pub fn sparse(
        rows: usize,
        cols: usize,
        kind: SourceKind,
        col_ptr: Vec<usize>,
        row_indices: Vec<usize>,
        values: RawValues,
    ) -> Self {
        Self {
            dims: vec![rows, cols],
            kind,
            layout: RawLayout::Sparse {
                col_ptr,
                row_indices,
                values,
            },
        }
    }

    pub fn is_complex(&self) -> bool {
        match &self.layout {
            RawLayout::Dense(values) => values.is_complex(),
            RawLayout::Sparse { values, .. } => values.is_complex(),
        }
    }

    /// Human-readable element kind, e.g. `double`, `complex single`, `logical`.
    pub fn describe_kind(&self) -> String {
        if self.is_complex() {
            format!("complex {}", self.kind)
        } else {
            self.kind.to_string()
        }
    }
}

pub type RawPayload = BTreeMap<String, RawArray>;

/// Normalized element kinds of a dataset matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Float64,
    Complex128,
    Int64,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Float64 => write!(f, "float64"),
            ElementKind::Complex128 => write!(f, "complex128"),
            ElementKind::Int64 => write!(f, "int64"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Elements {
    Float64(Vec<f64>),
    Complex128(Vec<Complex64>),
    Int64(Vec<i64>),
}

impl Elements {
    pub fn kind(&self) -> ElementKind {
        match self {
            Elements::Float64(_) => ElementKind::Float64,
            Elements::Complex128(_) => ElementKind::Complex128,
            Elements::Int64(_) => ElementKind::Int64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Elements::Float64(values) => values.len(),
            Elements::Complex128(values) => values.len(),
            Elements::Int64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    Dense(Elements),
    Sparse {
        col_ptr: Vec<usize>,
        row_indices: Vec<usize>,
        values: Elements,
    },
}

/// A two-dimensional matrix with normalized elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    storage: Storage,
}

impl Matrix {
    pub fn dense(rows: usize, cols: usize, values: Elements) -> Self {
        Self {
            rows,
            cols,
            storage: Storage::Dense(values),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn element_kind(&self) -> ElementKind {
        self.elements().kind()
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, Storage::Sparse { .. })
    }

    /// Stored values: every entry for dense matrices, the non-zeros for sparse ones.
    pub fn elements(&self) -> &Elements {
        match &self.storage {
            Storage::Dense(values) => values,
            Storage::Sparse { values, .. } => values,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn nnz(&self) -> usize {
        self.elements().len()
    }
}

fn unsupported(field: &str, array: &RawArray) -> MorbError {
    MorbError::UnsupportedElementKind {
        field: field.to_string(),
        kind: array.describe_kind(),
    }
}

fn normalize_values(
    field: &str,
    array: &RawArray,
    values: &RawValues,
) -> Result<Elements, MorbError> {
    let kind = array.kind;
    if !(kind.is_float() || kind.is_integer()) {
        return Err(unsupported(field, array));
    }

    let elements = match values {
        RawValues::Opaque => return Err(unsupported(field, array)),
        RawValues::Float { real, imag: None } if kind.is_float() => {
            Elements::Float64(real.clone())
        }
        RawValues::Signed { real, imag: None } if kind.is_integer() => {
            Elements::Int64(real.clone())
        }
        RawValues::Unsigned { real, imag: None } if kind.is_integer() => Elements::Int64(
            real.iter()
                .map(|&value| i64::try_from(value))
                .collect::<Result<_, _>>()
                .map_err(|_| MorbError::UnsupportedElementKind {
                    field: field.to_string(),
                    kind: format!("{kind} (value exceeds int64 range)"),
                })?,
        ),
        // Complex integer data is widened to complex128.
        RawValues::Float {
            real,
            imag: Some(imag),
        } => complex(field, real.iter().copied(), imag.iter().copied(), real.len(), imag.len())?,
        RawValues::Signed {
            real,
            imag: Some(imag),
        } => complex(
            field,
            real.iter().map(|&v| v as f64),
            imag.iter().map(|&v| v as f64),
            real.len(),
            imag.len(),
        )?,
        RawValues::Unsigned {
            real,
            imag: Some(imag),
        } => complex(
            field,
            real.iter().map(|&v| v as f64),
            imag.iter().map(|&v| v as f64),
            real.len(),
            imag.len(),
        )?,
        // Stored type disagrees with the declared class.
        _ => return Err(unsupported(field, array)),
    };
    Ok(elements)
}

fn complex(
    field: &str,
    real: impl Iterator<Item = f64>,
    imag: impl Iterator<Item = f64>,
    real_len: usize,
    imag_len: usize,
) -> Result<Elements, MorbError> {
    if real_len != imag_len {
        return Err(MorbError::UnsupportedElementKind {
            field: field.to_string(),
            kind: format!("complex with {real_len} real and {imag_len} imaginary parts"),
        });
    }
    Ok(Elements::Complex128(
        real.zip(imag).map(|(re, im)| Complex64::new(re, im)).collect(),
    ))
}

/// Normalizes one raw array into a [`Matrix`].
pub fn normalize(field: &str, array: &RawArray) -> Result<Matrix, MorbError> {
    let (rows, cols) = match array.dims.as_slice() {
        [rows, cols] => (*rows, *cols),
        dims => {
            return Err(MorbError::UnsupportedShape {
                field: field.to_string(),
                dims: dims.to_vec(),
            });
        }
    };
    let bad_layout = |what: &str| MorbError::UnsupportedShape {
        field: format!("{field} ({what})"),
        dims: array.dims.clone(),
    };

    let storage = match &array.layout {
        RawLayout::Dense(values) => {
            let elements = normalize_values(field, array, values)?;
            let expected = rows.checked_mul(cols);
            if expected.is_none() || values.len() != expected {
                return Err(bad_layout("element count does not match dims"));
            }
            Storage::Dense(elements)
        }
        RawLayout::Sparse {
            col_ptr,
            row_indices,
            values,
        } => {
            let elements = normalize_values(field, array, values)?;
            let nnz = col_ptr.last().copied().unwrap_or(0);
            let consistent = cols.checked_add(1) == Some(col_ptr.len())
                && col_ptr.windows(2).all(|pair| pair[0] <= pair[1])
                && row_indices.len() == nnz
                && elements.len() == nnz
                && row_indices.iter().all(|&row| row < rows);
            if !consistent {
                return Err(bad_layout("inconsistent sparse structure"));
            }
            Storage::Sparse {
                col_ptr: col_ptr.clone(),
                row_indices: row_indices.clone(),
                values: elements,
            }
        }
    };
    Ok(Matrix {
        rows,
        cols,
        storage,
    })
}

fn take(payload: &RawPayload, field: &str) -> Result<Matrix, MorbError> {
    let array = payload.get(field).ok_or_else(|| MorbError::SchemaMismatch {
        present: present_fields(payload),
    })?;
    normalize(field, array)
}

fn present_fields(payload: &RawPayload) -> String {
    if payload.is_empty() {
        return "none".to_string();
    }
    payload.keys().cloned().collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatasetKind {
    #[serde(rename = "ABC")]
    Abc,
    #[serde(rename = "ABCDE")]
    Abcde,
    #[serde(rename = "ABCE")]
    Abce,
    #[serde(rename = "BCKM")]
    Bckm,
    #[serde(rename = "BCEKM")]
    Bcekm,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatasetKind::Abc => "ABC",
            DatasetKind::Abcde => "ABCDE",
            DatasetKind::Abce => "ABCE",
            DatasetKind::Bckm => "BCKM",
            DatasetKind::Bcekm => "BCEKM",
        };
        write!(f, "{name}")
    }
}

/// First-order system `E x' = A x + B u`, `y = C x`.
#[derive(Debug, Clone, PartialEq)]
pub struct Abc {
    pub a: Matrix,
    pub b: Matrix,
    pub c: Matrix,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Abcde {
    pub a: Matrix,
    pub b: Matrix,
    pub c: Matrix,
    pub d: Matrix,
    pub e: Matrix,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Abce {
    pub a: Matrix,
    pub b: Matrix,
    pub c: Matrix,
    pub e: Matrix,
}

/// Second-order system `M x'' + K x = B u`, `y = C x`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bckm {
    pub b: Matrix,
    pub c: Matrix,
    pub k: Matrix,
    pub m: Matrix,
}

/// Second-order system with damping `E`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bcekm {
    pub b: Matrix,
    pub c: Matrix,
    pub e: Matrix,
    pub k: Matrix,
    pub m: Matrix,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    Abc(Abc),
    Abcde(Abcde),
    Abce(Abce),
    Bckm(Bckm),
    Bcekm(Bcekm),
}

impl Dataset {
    pub fn kind(&self) -> DatasetKind {
        match self {
            Dataset::Abc(_) => DatasetKind::Abc,
            Dataset::Abcde(_) => DatasetKind::Abcde,
            Dataset::Abce(_) => DatasetKind::Abce,
            Dataset::Bckm(_) => DatasetKind::Bckm,
            Dataset::Bcekm(_) => DatasetKind::Bcekm,
        }
    }

    /// Named matrices in canonical (alphabetical) order.
    pub fn fields(&self) -> Vec<(&'static str, &Matrix)> {
        match self {
            Dataset::Abc(d) => vec![("A", &d.a), ("B", &d.b), ("C", &d.c)],
            Dataset::Abcde(d) => vec![
                ("A", &d.a),
                ("B", &d.b),
                ("C", &d.c),
                ("D", &d.d),
                ("E", &d.e),
            ],
            Dataset::Abce(d) => vec![("A", &d.a), ("B", &d.b), ("C", &d.c), ("E", &d.e)],
            Dataset::Bckm(d) => vec![("B", &d.b), ("C", &d.c), ("K", &d.k), ("M", &d.m)],
            Dataset::Bcekm(d) => vec![
                ("B", &d.b),
                ("C", &d.c),
                ("E", &d.e),
                ("K", &d.k),
                ("M", &d.m),
            ],
        }
    }

    pub fn field(&self, name: &str) -> Option<&Matrix> {
        self.fields()
            .into_iter()
            .find(|(field, _)| *field == name)
            .map(|(_, matrix)| matrix)
    }
}

pub struct Rule {
    pub kind: DatasetKind,
    pub fields: &'static [&'static str],
    build: fn(&RawPayload) -> Result<Dataset, MorbError>,
}

/// Classification order: more required fields first, across both families.
/// Supersets come before their subsets, and when a first-order and a
/// second-order variant are both complete the larger one wins, so
/// `{A,B,C,E,K,M}` is `BCEKM`. On equal counts the first-order variant is
/// listed first.
pub const RULES: &[Rule] = &[
    Rule {
        kind: DatasetKind::Abcde,
        fields: &["A", "B", "C", "D", "E"],
        build: |p| {
            Ok(Dataset::Abcde(Abcde {
                a: take(p, "A")?,
                b: take(p, "B")?,
                c: take(p, "C")?,
                d: take(p, "D")?,
                e: take(p, "E")?,
            }))
        },
    },
    Rule {
        kind: DatasetKind::Bcekm,
        fields: &["B", "C", "E", "K", "M"],
        build: |p| {
            Ok(Dataset::Bcekm(Bcekm {
                b: take(p, "B")?,
                c: take(p, "C")?,
                e: take(p, "E")?,
                k: take(p, "K")?,
                m: take(p, "M")?,
            }))
        },
    },
    Rule {
        kind: DatasetKind::Abce,
        fields: &["A", "B", "C", "E"],
        build: |p| {
            Ok(Dataset::Abce(Abce {
                a: take(p, "A")?,
                b: take(p, "B")?,
                c: take(p, "C")?,
                e: take(p, "E")?,
            }))
        },
    },
    Rule {
        kind: DatasetKind::Bckm,
        fields: &["B", "C", "K", "M"],
        build: |p| {
            Ok(Dataset::Bckm(Bckm {
                b: take(p, "B")?,
                c: take(p, "C")?,
                k: take(p, "K")?,
                m: take(p, "M")?,
            }))
        },
    },
    Rule {
        kind: DatasetKind::Abc,
        fields: &["A", "B", "C"],
        build: |p| {
            Ok(Dataset::Abc(Abc {
                a: take(p, "A")?,
                b: take(p, "B")?,
                c: take(p, "C")?,
            }))
        },
    },
];

/// Classifies `payload` into the first matching variant of [`RULES`].
pub fn validate(payload: &RawPayload) -> Result<Dataset, MorbError> {
    let rule = RULES
        .iter()
        .find(|rule| rule.fields.iter().all(|field| payload.contains_key(*field)))
        .ok_or_else(|| MorbError::SchemaMismatch {
            present: present_fields(payload),
        })?;
    tracing::debug!(kind = %rule.kind, "payload matched dataset variant");
    (rule.build)(payload)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn double(rows: usize, cols: usize) -> RawArray {
        RawArray::dense(
            rows,
            cols,
            SourceKind::Double,
            RawValues::Float {
                real: (0..rows * cols).map(|i| i as f64).collect(),
                imag: None,
            },
        )
    }

    fn payload(names: &[&str]) -> RawPayload {
        names
            .iter()
            .map(|name| (name.to_string(), double(2, 2)))
            .collect()
    }

    #[test]
    fn rules_put_supersets_first() {
        for (i, earlier) in RULES.iter().enumerate() {
            for later in &RULES[i + 1..] {
                let later_is_superset = earlier.fields.iter().all(|f| later.fields.contains(f))
                    && later.fields.len() > earlier.fields.len();
                assert!(
                    !later_is_superset,
                    "{} would be masked by {}",
                    later.kind, earlier.kind
                );
            }
        }
    }

    #[test]
    fn classifies_each_variant() {
        let cases = [
            (&["A", "B", "C"][..], DatasetKind::Abc),
            (&["A", "B", "C", "D", "E"][..], DatasetKind::Abcde),
            (&["A", "B", "C", "E"][..], DatasetKind::Abce),
            (&["B", "C", "K", "M"][..], DatasetKind::Bckm),
            (&["B", "C", "E", "K", "M"][..], DatasetKind::Bcekm),
        ];
        for (names, kind) in cases {
            let dataset = validate(&payload(names)).unwrap();
            assert_eq!(dataset.kind(), kind, "fields {names:?}");
            let fields: Vec<_> = dataset.fields().into_iter().map(|(n, _)| n).collect();
            assert_eq!(fields, names);
        }
    }

    #[test]
    fn larger_variant_wins_across_families() {
        let cases = [
            (&["A", "B", "C", "E", "K", "M"][..], DatasetKind::Bcekm),
            (&["A", "B", "C", "K", "M"][..], DatasetKind::Bckm),
            (&["A", "B", "C", "D", "E", "K", "M"][..], DatasetKind::Abcde),
        ];
        for (names, kind) in cases {
            assert_eq!(validate(&payload(names)).unwrap().kind(), kind, "fields {names:?}");
        }
    }

    #[test]
    fn rules_are_ordered_by_field_count() {
        assert!(RULES.windows(2).all(|pair| pair[0].fields.len() >= pair[1].fields.len()));
    }

    #[test]
    fn extra_fields_are_dropped() {
        let dataset = validate(&payload(&["A", "B", "C", "D", "x0", "description"])).unwrap();
        assert_eq!(dataset.kind(), DatasetKind::Abc);
        assert!(dataset.field("D").is_none());
        assert!(dataset.field("x0").is_none());
    }

    #[test]
    fn incomplete_payload_is_a_schema_mismatch() {
        let err = validate(&payload(&["A", "B", "K"])).unwrap_err();
        assert_matches!(err, MorbError::SchemaMismatch { present } if present == "A, B, K");
        let err = validate(&RawPayload::new()).unwrap_err();
        assert_matches!(err, MorbError::SchemaMismatch { .. });
    }

    #[test]
    fn element_kinds_are_normalized() {
        let mut p = payload(&["B", "C"]);
        p.insert(
            "K".to_string(),
            RawArray::dense(
                1,
                2,
                SourceKind::UInt8,
                RawValues::Unsigned {
                    real: vec![1, 2],
                    imag: None,
                },
            ),
        );
        p.insert(
            "M".to_string(),
            RawArray::dense(
                1,
                1,
                SourceKind::Single,
                RawValues::Float {
                    real: vec![1.5],
                    imag: Some(vec![-0.5]),
                },
            ),
        );
        let dataset = validate(&p).unwrap();
        let k = dataset.field("K").unwrap();
        assert_eq!(k.elements(), &Elements::Int64(vec![1, 2]));
        let m = dataset.field("M").unwrap();
        assert_eq!(
            m.elements(),
            &Elements::Complex128(vec![Complex64::new(1.5, -0.5)])
        );
        assert_eq!(dataset.field("B").unwrap().element_kind(), ElementKind::Float64);
    }

    #[test]
    fn unsupported_kinds_are_rejected() {
        for kind in [SourceKind::Logical, SourceKind::Char, SourceKind::Cell] {
            let mut p = payload(&["B", "C", "K"]);
            p.insert(
                "M".to_string(),
                RawArray::dense(1, 1, kind, RawValues::Opaque),
            );
            let err = validate(&p).unwrap_err();
            assert_matches!(err, MorbError::UnsupportedElementKind { field, .. } if field == "M");
        }
    }

    #[test]
    fn unsupported_kind_in_ignored_field_is_fine() {
        let mut p = payload(&["A", "B", "C"]);
        p.insert(
            "name".to_string(),
            RawArray::dense(1, 5, SourceKind::Char, RawValues::Opaque),
        );
        assert_eq!(validate(&p).unwrap().kind(), DatasetKind::Abc);
    }

    #[test]
    fn sparse_matrices_keep_structure() {
        let mut p = payload(&["A", "B"]);
        p.insert(
            "C".to_string(),
            RawArray::sparse(
                3,
                2,
                SourceKind::Double,
                vec![0, 1, 3],
                vec![2, 0, 1],
                RawValues::Float {
                    real: vec![1.0, 2.0, 3.0],
                    imag: None,
                },
            ),
        );
        let dataset = validate(&p).unwrap();
        let c = dataset.field("C").unwrap();
        assert!(c.is_sparse());
        assert_eq!(c.shape(), (3, 2));
        assert_eq!(c.nnz(), 3);
    }

    #[test]
    fn malformed_layouts_are_rejected() {
        let mut p = payload(&["A", "B"]);
        p.insert("C".to_string(), RawArray {
            dims: vec![2, 2, 2],
            kind: SourceKind::Double,
            layout: RawLayout::Dense(RawValues::Float {
                real: vec![0.0; 8],
                imag: None,
            }),
        });
        assert_matches!(validate(&p), Err(MorbError::UnsupportedShape { .. }));

        p.insert(
            "C".to_string(),
            RawArray::dense(
                2,
                2,
                SourceKind::Double,
                RawValues::Float {
                    real: vec![0.0; 3],
                    imag: None,
                },
            ),
        );
        assert_matches!(validate(&p), Err(MorbError::UnsupportedShape { .. }));
    }

    #[test]
    fn oversized_dims_do_not_overflow() {
        let huge = usize::MAX / 2;
        let mut p = payload(&["B", "C"]);
        p.insert(
            "A".to_string(),
            RawArray::dense(
                huge,
                huge,
                SourceKind::Double,
                RawValues::Float {
                    real: vec![1.0],
                    imag: None,
                },
            ),
        );
        assert_matches!(validate(&p), Err(MorbError::UnsupportedShape { field, .. }) if field.starts_with('A'));

        p.insert(
            "A".to_string(),
            RawArray::sparse(
                2,
                usize::MAX,
                SourceKind::Double,
                vec![0, 1],
                vec![0],
                RawValues::Float {
                    real: vec![1.0],
                    imag: None,
                },
            ),
        );
        assert_matches!(validate(&p), Err(MorbError::UnsupportedShape { .. }));
    }

    #[test]
    fn higher_rank_extra_field_is_ignored() {
        let mut p = payload(&["A", "B", "C"]);
        p.insert("x0".to_string(), RawArray {
            dims: vec![1, 1, 2],
            kind: SourceKind::Double,
            layout: RawLayout::Dense(RawValues::Float {
                real: vec![0.0, 1.0],
                imag: None,
            }),
        });
        assert_eq!(validate(&p).unwrap().kind(), DatasetKind::Abc);
    }
}
