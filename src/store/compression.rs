//! Lossless payload compression
//!
//! Classes flagged `compress` run their serialized payload through gzip
//! before hitting the medium. Whether a stored payload is compressed is
//! recorded as an explicit flag on the entry envelope, never inferred
//! from the bytes.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{CacheError, Result};

pub fn compress(payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload)
        .map_err(|e| CacheError::Serialization(format!("Compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| CacheError::Serialization(format!("Compression failed: {}", e)))
}

pub fn decompress(payload: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(payload);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Serialization(format!("Decompression failed: {}", e)))?;
    Ok(out)
}
