//! In-memory vector sets and their plain-text file format.
//!
//! The file layout is:
//!
//! ```text
//! <count>
//! <dimension>
//! v00 v01 ... v0d
//! ...
//! ```
//!
//! The reader only cares about whitespace-separated tokens, so rows may be
//! split or joined freely. The writer emits one tab-separated row per vector.

use crate::error::{Result, SomGpuError};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// A set of `count` vectors of `dimension` components each, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDataset {
    count: usize,
    dimension: usize,
    data: Vec<f32>,
}

impl VectorDataset {
    /// Creates a dataset from flattened row-major data.
    pub fn new(count: usize, dimension: usize, data: Vec<f32>) -> Result<Self> {
        let expected = count.checked_mul(dimension).ok_or_else(|| {
            SomGpuError::Config(format!("{} x {} vectors overflow", count, dimension))
        })?;
        if data.len() != expected {
            return Err(SomGpuError::DimensionMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            count,
            dimension,
            data,
        })
    }

    /// Creates a dataset from individual rows.
    ///
    /// All rows must share the length of the first one.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let dimension = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * dimension);
        for row in rows {
            let row = row.as_ref();
            if row.len() != dimension {
                return Err(SomGpuError::DimensionMismatch {
                    expected: dimension,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            count: rows.len(),
            dimension,
            data,
        })
    }

    /// Number of vectors.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of components per vector.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns true if the dataset holds no vectors.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Flattened row-major components.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Consumes the dataset, returning the flattened data.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Returns vector `index`.
    pub fn vector(&self, index: usize) -> Option<&[f32]> {
        if index >= self.count {
            return None;
        }
        let start = index * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    /// Iterates over the vectors in order.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> + '_ {
        // chunks_exact panics on a zero chunk size
        let dimension = self.dimension.max(1);
        let rows = if self.dimension == 0 { 0 } else { self.count };
        self.data
            .chunks_exact(dimension)
            .take(rows)
            .chain(std::iter::repeat::<&[f32]>(&[]).take(self.count - rows))
    }

    /// Loads a dataset from a text file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_from(BufReader::new(file))
    }

    /// Writes the dataset to a text file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Parses a dataset from any reader.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        Self::parse(&content)
    }

    /// Parses a dataset from text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut tokens = content.split_whitespace().enumerate();

        let count = next_header(&mut tokens, "count")?;
        let dimension = next_header(&mut tokens, "dimension")?;

        let expected = count.checked_mul(dimension).ok_or_else(|| SomGpuError::Format {
            token: 2,
            message: format!("{} x {} values overflow", count, dimension),
        })?;

        // Every value takes at least two bytes, so the header alone cannot size the buffer
        let mut data = Vec::with_capacity(expected.min(content.len() / 2 + 1));
        for _ in 0..expected {
            let (pos, token) = tokens.next().ok_or_else(|| SomGpuError::Format {
                token: data.len() + 3,
                message: format!(
                    "expected {} values, file ends after {}",
                    expected,
                    data.len()
                ),
            })?;
            let value = token.parse::<f32>().map_err(|e| SomGpuError::Format {
                token: pos + 1,
                message: format!("invalid value {:?}: {}", token, e),
            })?;
            data.push(value);
        }

        let trailing = tokens.count();
        if trailing > 0 {
            log::debug!("ignoring {} trailing tokens after {} vectors", trailing, count);
        }

        Ok(Self {
            count,
            dimension,
            data,
        })
    }

    /// Writes the dataset in the text format.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(writer, "{}", self.count)?;
        writeln!(writer, "{}", self.dimension)?;
        for row in self.iter() {
            let mut first = true;
            for value in row {
                if !first {
                    writer.write_all(b"\t")?;
                }
                write!(writer, "{}", value)?;
                first = false;
            }
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

fn next_header<'a, I>(tokens: &mut I, name: &str) -> Result<usize>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let (pos, token) = tokens.next().ok_or_else(|| SomGpuError::Format {
        token: 1,
        message: format!("missing {} header", name),
    })?;
    token.parse::<usize>().map_err(|_| SomGpuError::Format {
        token: pos + 1,
        message: format!("{} must be a non-negative integer, got {:?}", name, token),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_basic() {
        let ds = VectorDataset::parse("2\n3\n1 2 3\n4.5 -5 6e1\n").unwrap();
        assert_eq!(ds.count(), 2);
        assert_eq!(ds.dimension(), 3);
        assert_eq!(ds.vector(0).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(ds.vector(1).unwrap(), &[4.5, -5.0, 60.0]);
        assert!(ds.vector(2).is_none());
    }

    #[test]
    fn test_parse_ignores_line_layout() {
        let ds = VectorDataset::parse("2 2 0 0\n3\n\n4").unwrap();
        assert_eq!(ds.as_slice(), &[0.0, 0.0, 3.0, 4.0]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            VectorDataset::parse(""),
            Err(SomGpuError::Format { token: 1, .. })
        ));
        assert!(matches!(
            VectorDataset::parse("-1\n2\n"),
            Err(SomGpuError::Format { token: 1, .. })
        ));
        assert!(matches!(
            VectorDataset::parse("2\n2\n1 2 3"),
            Err(SomGpuError::Format { token: 6, .. })
        ));
        assert!(matches!(
            VectorDataset::parse("1\n2\n1 abc"),
            Err(SomGpuError::Format { token: 4, .. })
        ));
    }

    #[test]
    fn test_parse_huge_header_without_values() {
        assert!(matches!(
            VectorDataset::parse("4000000000\n4000000000\n1 2 3\n"),
            Err(SomGpuError::Format { token: 6, .. })
        ));
        assert!(matches!(
            VectorDataset::parse(&format!("{}\n1\n", usize::MAX)),
            Err(SomGpuError::Format { token: 3, .. })
        ));
    }

    #[test]
    fn test_from_rows_mismatch() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(
            VectorDataset::from_rows(&rows),
            Err(SomGpuError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_new_validates_length() {
        assert!(VectorDataset::new(2, 2, vec![1.0; 4]).is_ok());
        assert!(VectorDataset::new(2, 2, vec![1.0; 3]).is_err());
    }

    #[test]
    fn test_iter_zero_dimension() {
        let ds = VectorDataset::new(3, 0, Vec::new()).unwrap();
        let rows: Vec<&[f32]> = ds.iter().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_write_layout() {
        let ds = VectorDataset::from_rows(&[[1.0f32, 2.5], [0.0, -3.0]]).unwrap();
        let mut out = Vec::new();
        ds.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "2\n2\n1\t2.5\n0\t-3\n");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.txt");

        let ds = VectorDataset::from_rows(&[
            [0.1f32, 1.0 / 3.0, -7.25],
            [1e-7, 123456.78, f32::MIN_POSITIVE],
        ])
        .unwrap();
        ds.save(&path).unwrap();

        let loaded = VectorDataset::load(&path).unwrap();
        assert_eq!(loaded, ds);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = VectorDataset::load(&dir.path().join("nope.txt"));
        assert!(matches!(result, Err(SomGpuError::Io(_))));
    }
}
