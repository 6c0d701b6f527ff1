//! Pixel payload codecs.
//!
//! The detector transmits each image as a single compressed message part.
//! Three encodings are in use: `none` (raw little-endian pixels), `lz4`
//! (one LZ4 block), and `bslz4` (bitshuffle + LZ4, see [`mod@self`] docs in
//! [`bitshuffle`]).
//!
//! All decode functions write into a caller-sized destination whose length
//! *is* the declared decompressed size. Callers must size the destination
//! from trusted metadata before decoding.

mod bitshuffle;

pub use bitshuffle::{bslz4_bound, bslz4_decode, bslz4_encode};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The compression algorithm applied to image payloads, as named by the
/// `compression` field of the detector configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
    None,
    Lz4,
    Bslz4,
}

impl Compressor {
    /// Canonical wire name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Compressor::None => "none",
            Compressor::Lz4 => "lz4",
            Compressor::Bslz4 => "bslz4",
        }
    }
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compressor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Compressor::None),
            "lz4" => Ok(Compressor::Lz4),
            "bslz4" => Ok(Compressor::Bslz4),
            other => Err(Error::Protocol(format!(
                "compression={other:?}; supported values are \"none\", \"lz4\", and \"bslz4\""
            ))),
        }
    }
}

/// Decompress a single LZ4 block into `dst`.
///
/// `dst` must be sized to exactly the expected decoded length.
///
/// # Errors
/// [`Error::Decode`] if the block is malformed or the decoded length is not
/// exactly `dst.len()`.
pub fn lz4_decode(src: &[u8], dst: &mut [u8]) -> Result<()> {
    let n = lz4_flex::block::decompress_into(src, dst)
        .map_err(|err| Error::Decode(format!("lz4: {err}")))?;
    if n != dst.len() {
        return Err(Error::Decode(format!(
            "lz4: decompressed {n} bytes, expected {}",
            dst.len()
        )));
    }
    Ok(())
}

/// Compress `src` as a single LZ4 block into `dst`, returning the compressed
/// length.
///
/// `dst` must hold at least [`lz4_bound`]`(src.len())` bytes.
///
/// # Errors
/// [`Error::Encode`] if `dst` is too small.
pub fn lz4_encode(src: &[u8], dst: &mut [u8]) -> Result<usize> {
    lz4_flex::block::compress_into(src, dst).map_err(|err| Error::Encode(format!("lz4: {err}")))
}

/// Worst-case LZ4 block output size for `src_len` input bytes.
#[must_use]
pub fn lz4_bound(src_len: usize) -> usize {
    lz4_flex::block::get_maximum_output_size(src_len)
}
