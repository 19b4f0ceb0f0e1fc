//! IDX (MNIST) file loader.
//!
//! Image files start with magic `2051`, then count, rows and cols (big-endian `u32`),
//! followed by one unsigned byte per pixel. Label files start with magic `2049` and
//! a count, followed by one byte per label. Pixels are scaled to `[0, 1]`.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use log::debug;

use crate::{Dataset, Error, Result};

pub const IMAGES_MAGIC: u32 = 2051;
pub const LABELS_MAGIC: u32 = 2049;

/// Decoded image file: `count` row-major `(rows * cols)` images, flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct Images {
    pub count: usize,
    pub rows: usize,
    pub cols: usize,
    pub pixels: Vec<f64>,
}

impl Images {
    #[inline]
    pub fn pixels_per_image(&self) -> usize {
        self.rows * self.cols
    }
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Format(format!("truncated idx {what}")),
        _ => Error::Io(e),
    })
}

fn read_u32_be<R: Read>(r: &mut R, what: &str) -> Result<u32> {
    let mut b = [0u8; 4];
    read_exact(r, &mut b, what)?;
    Ok(u32::from_be_bytes(b))
}

fn expect_magic<R: Read>(r: &mut R, magic: u32, what: &str) -> Result<()> {
    let found = read_u32_be(r, what)?;
    if found != magic {
        return Err(Error::Format(format!(
            "bad idx {what} magic {found}; expected {magic}"
        )));
    }
    Ok(())
}

pub fn read_images<R: Read>(mut r: R) -> Result<Images> {
    expect_magic(&mut r, IMAGES_MAGIC, "images header")?;
    let count = read_u32_be(&mut r, "images header")? as usize;
    let rows = read_u32_be(&mut r, "images header")? as usize;
    let cols = read_u32_be(&mut r, "images header")? as usize;

    let total = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| Error::Format(format!("idx image shape {count}x{rows}x{cols} overflows")))?;

    let mut bytes = Vec::new();
    r.take(total as u64).read_to_end(&mut bytes)?;
    if bytes.len() != total {
        return Err(Error::Format(format!(
            "truncated idx images: expected {total} pixels, got {}",
            bytes.len()
        )));
    }

    Ok(Images {
        count,
        rows,
        cols,
        pixels: bytes.into_iter().map(|b| f64::from(b) / 255.0).collect(),
    })
}

pub fn read_labels<R: Read>(mut r: R) -> Result<Vec<usize>> {
    expect_magic(&mut r, LABELS_MAGIC, "labels header")?;
    let count = read_u32_be(&mut r, "labels header")? as usize;

    let mut bytes = Vec::new();
    r.take(count as u64).read_to_end(&mut bytes)?;
    if bytes.len() != count {
        return Err(Error::Format(format!(
            "truncated idx labels: expected {count}, got {}",
            bytes.len()
        )));
    }
    Ok(bytes.into_iter().map(usize::from).collect())
}

pub fn load_images<P: AsRef<Path>>(path: P) -> Result<Images> {
    let path = path.as_ref();
    let images = read_images(BufReader::new(File::open(path)?))?;
    debug!(
        "read {} images of {}x{} from {}",
        images.count,
        images.rows,
        images.cols,
        path.display()
    );
    Ok(images)
}

pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<usize>> {
    let path = path.as_ref();
    let labels = read_labels(BufReader::new(File::open(path)?))?;
    debug!("read {} labels from {}", labels.len(), path.display());
    Ok(labels)
}

/// Pair an images file with a labels file, one-hot encoding labels over `classes`.
pub fn load_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    images: P,
    labels: Q,
    classes: usize,
) -> Result<Dataset> {
    to_dataset(load_images(images)?, &load_labels(labels)?, classes)
}

pub(crate) fn to_dataset(images: Images, labels: &[usize], classes: usize) -> Result<Dataset> {
    if images.count != labels.len() {
        return Err(Error::Format(format!(
            "idx image count {} does not match label count {}",
            images.count,
            labels.len()
        )));
    }
    if images.count == 0 || images.pixels_per_image() == 0 {
        return Err(Error::Format("idx files contain no samples".to_owned()));
    }
    let dim = images.pixels_per_image();
    Dataset::from_labels(images.pixels, dim, labels, classes).map_err(|e| match e {
        Error::InvalidArgument(msg) => Error::Format(msg),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images_file(count: u32, rows: u32, cols: u32, pixels: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        for v in [IMAGES_MAGIC, count, rows, cols] {
            b.extend_from_slice(&v.to_be_bytes());
        }
        b.extend_from_slice(pixels);
        b
    }

    fn labels_file(labels: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&LABELS_MAGIC.to_be_bytes());
        b.extend_from_slice(&(labels.len() as u32).to_be_bytes());
        b.extend_from_slice(labels);
        b
    }

    #[test]
    fn reads_and_scales_pixels() {
        let images = read_images(images_file(2, 1, 2, &[0, 255, 51, 102]).as_slice()).unwrap();
        assert_eq!((images.count, images.rows, images.cols), (2, 1, 2));
        assert_eq!(images.pixels, vec![0.0, 1.0, 0.2, 0.4]);

        let labels = read_labels(labels_file(&[3, 7]).as_slice()).unwrap();
        assert_eq!(labels, vec![3, 7]);

        let ds = to_dataset(images, &labels, 10).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.input_dim(), 2);
        assert_eq!(ds.target(1)[7], 1.0);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let mut bad = images_file(1, 1, 1, &[0]);
        bad[3] = 0;
        assert!(matches!(read_images(bad.as_slice()), Err(Error::Format(_))));

        let short = images_file(2, 2, 2, &[1, 2, 3]);
        assert!(matches!(read_images(short.as_slice()), Err(Error::Format(_))));

        let mut labels = labels_file(&[1, 2, 3]);
        labels.pop();
        assert!(matches!(read_labels(labels.as_slice()), Err(Error::Format(_))));
    }

    #[test]
    fn count_mismatch_is_a_format_error() {
        let images = read_images(images_file(2, 1, 1, &[0, 0]).as_slice()).unwrap();
        assert!(matches!(to_dataset(images.clone(), &[1], 2), Err(Error::Format(_))));
        assert!(matches!(to_dataset(images, &[1, 5], 2), Err(Error::Format(_))));
    }
}
