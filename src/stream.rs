//! Typed little-endian binary streams.
//!
//! `StreamWriter` / `StreamReader` wrap any `Write` / `Read` and move scalars,
//! length-prefixed vectors and `(rows, cols)`-prefixed row-major matrices.
//! Length prefixes are `u64`.

use std::io::{self, Read, Write};

use crate::{Error, Result};

/// Upper bound on a single decoded element count; larger prefixes are treated as corrupt.
pub const MAX_ELEMENTS: u64 = 1 << 32;

pub struct StreamWriter<W: Write> {
    inner: W,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Bit-exact: the value's IEEE-754 representation is written as is.
    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_vector(&mut self, values: &[f64]) -> Result<()> {
        self.write_u64(values.len() as u64)?;
        values.iter().try_for_each(|&v| self.write_f64(v))
    }

    /// Panics if `values.len() != rows * cols`.
    pub fn write_matrix(&mut self, rows: usize, cols: usize, values: &[f64]) -> Result<()> {
        assert_eq!(
            values.len(),
            rows * cols,
            "matrix len {} does not match rows * cols ({rows} * {cols})",
            values.len()
        );
        self.write_u64(rows as u64)?;
        self.write_u64(cols as u64)?;
        values.iter().try_for_each(|&v| self.write_f64(v))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

pub struct StreamReader<R: Read> {
    inner: R,
}

impl<R: Read> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Fill `buf` exactly. Hitting end-of-stream is a [`Error::Format`] (truncated data).
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                Error::Format(format!("unexpected end of stream reading {} bytes", buf.len()))
            }
            _ => Error::Io(e),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(f64::from_le_bytes(b))
    }

    pub fn read_vector(&mut self) -> Result<Vec<f64>> {
        let len = self.read_u64()?;
        let len = checked_count(len)?;
        self.read_values(len)
    }

    /// Returns `(rows, cols, values)`.
    pub fn read_matrix(&mut self) -> Result<(usize, usize, Vec<f64>)> {
        let rows = checked_count(self.read_u64()?)?;
        let cols = checked_count(self.read_u64()?)?;
        let count = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::Format(format!("matrix shape {rows}x{cols} overflows")))?;
        let count = checked_count(count as u64)?;
        Ok((rows, cols, self.read_values(count)?))
    }

    fn read_values(&mut self, count: usize) -> Result<Vec<f64>> {
        let mut values = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            values.push(self.read_f64()?);
        }
        Ok(values)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn checked_count(n: u64) -> Result<usize> {
    if n > MAX_ELEMENTS {
        return Err(Error::Format(format!(
            "element count {n} exceeds limit {MAX_ELEMENTS}"
        )));
    }
    usize::try_from(n).map_err(|_| Error::Format(format!("element count {n} does not fit in usize")))
}
