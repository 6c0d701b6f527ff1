//! Bitshuffle + LZ4 (`bslz4`) stream codec.
//!
//! The detector's `bslz4` payloads are produced by the bitshuffle scheme:
//! the pixel array is cut into blocks of a fixed element count, each block is
//! bit-transposed so that equal-significance bits of neighboring elements
//! become adjacent bytes, and the transposed block is LZ4-compressed. Each
//! compressed block is framed by a big-endian `u32` length. Elements past the
//! last multiple of 8 are appended uncompressed.
//!
//! The bit transform operates on runs of 8 elements: for element bytes
//! `e[0..8]` at byte position `j` within the element, output bit-plane
//! `(j, k)` collects bit `k` of each of the 8 bytes. The transform is its own
//! inverse at the 8x8 granularity, so encode and decode share the transpose
//! core.

use crate::{Error, Result};

// Block sizing must stay stable across versions or previously written
// streams become undecodable.
const TARGET_BLOCK_BYTES: usize = 8192;
const BLOCK_MULTIPLE: usize = 8;
const MIN_BLOCK_ELEMENTS: usize = 128;

/// Framing overhead: big-endian u32 compressed length before each block.
const BLOCK_HEADER_LEN: usize = 4;

/// Number of elements per compression block for the given element width.
fn block_elements(element_size: usize) -> usize {
    let n = (TARGET_BLOCK_BYTES / element_size) / BLOCK_MULTIPLE * BLOCK_MULTIPLE;
    n.max(MIN_BLOCK_ELEMENTS)
}

/// Transpose the 8x8 bit matrix packed into `x`, byte `r` bit `c` -> byte `c`
/// bit `r`.
fn transpose_bits_8x8(mut x: u64) -> u64 {
    let mut t = (x ^ (x >> 7)) & 0x00aa_00aa_00aa_00aa;
    x ^= t ^ (t << 7);
    t = (x ^ (x >> 14)) & 0x0000_cccc_0000_cccc;
    x ^= t ^ (t << 14);
    t = (x ^ (x >> 28)) & 0x0000_0000_f0f0_f0f0;
    x ^= t ^ (t << 28);
    x
}

/// Bit-transpose a block of elements into bit-plane order.
///
/// `src.len()` must be a multiple of `8 * element_size`.
fn shuffle_block(src: &[u8], dst: &mut [u8], element_size: usize) {
    let lanes = src.len() / element_size / 8;
    for j in 0..element_size {
        for i in 0..lanes {
            let mut x = 0u64;
            for b in 0..8 {
                x |= u64::from(src[(8 * i + b) * element_size + j]) << (8 * b);
            }
            let x = transpose_bits_8x8(x);
            for k in 0..8 {
                dst[(j * 8 + k) * lanes + i] = (x >> (8 * k)) as u8;
            }
        }
    }
}

/// Inverse of [`shuffle_block`]: scatter bit-planes back into elements.
fn unshuffle_block(src: &[u8], dst: &mut [u8], element_size: usize) {
    let lanes = src.len() / element_size / 8;
    for j in 0..element_size {
        for i in 0..lanes {
            let mut x = 0u64;
            for k in 0..8 {
                x |= u64::from(src[(j * 8 + k) * lanes + i]) << (8 * k);
            }
            let x = transpose_bits_8x8(x);
            for b in 0..8 {
                dst[(8 * i + b) * element_size + j] = (x >> (8 * b)) as u8;
            }
        }
    }
}

/// Worst-case `bslz4` output size for `src_len` input bytes of
/// `element_size`-byte elements.
///
/// Returns 0 when the input is malformed (`element_size` of zero, or a length
/// that is not a whole number of elements); encoders treat a 0 bound as an
/// error.
#[must_use]
pub fn bslz4_bound(src_len: usize, element_size: usize) -> usize {
    if element_size == 0 || src_len % element_size != 0 {
        return 0;
    }
    let count = src_len / element_size;
    let block = block_elements(element_size);

    let mut bound =
        (super::lz4_bound(block * element_size) + BLOCK_HEADER_LEN) * (count / block);
    let trailing = count % block / BLOCK_MULTIPLE * BLOCK_MULTIPLE;
    bound += super::lz4_bound(trailing * element_size) + BLOCK_HEADER_LEN;
    bound += count % BLOCK_MULTIPLE * element_size;
    bound
}

/// Compress `src` into `dst` with bitshuffle + LZ4, returning the number of
/// bytes written.
///
/// `dst` must hold at least [`bslz4_bound`]`(src.len(), element_size)` bytes.
///
/// # Errors
/// [`Error::Encode`] on malformed input (zero bound) or when `dst` cannot
/// hold a compressed block.
pub fn bslz4_encode(src: &[u8], dst: &mut [u8], element_size: usize) -> Result<usize> {
    let bound = bslz4_bound(src.len(), element_size);
    if bound == 0 {
        return Err(Error::Encode(format!(
            "bslz4: input of {} bytes is not a whole number of {element_size}-byte elements",
            src.len()
        )));
    }
    if dst.len() < bound {
        return Err(Error::Encode(format!(
            "bslz4: destination holds {} bytes, worst case is {bound}",
            dst.len()
        )));
    }

    let count = src.len() / element_size;
    let block = block_elements(element_size);
    let mut shuffled = vec![0u8; block * element_size];

    let mut read = 0;
    let mut written = 0;
    let mut remaining = count;
    while remaining >= BLOCK_MULTIPLE {
        let n = remaining.min(block) / BLOCK_MULTIPLE * BLOCK_MULTIPLE;
        let raw = &src[read..read + n * element_size];
        shuffle_block(raw, &mut shuffled[..raw.len()], element_size);

        let compressed = super::lz4_encode(
            &shuffled[..raw.len()],
            &mut dst[written + BLOCK_HEADER_LEN..],
        )?;
        let header = u32::try_from(compressed)
            .map_err(|_| Error::Encode("bslz4: block too large for framing".into()))?;
        dst[written..written + BLOCK_HEADER_LEN].copy_from_slice(&header.to_be_bytes());

        read += raw.len();
        written += BLOCK_HEADER_LEN + compressed;
        remaining -= n;
    }

    // Trailing elements that do not fill a transpose run are stored raw.
    let leftover = remaining * element_size;
    dst[written..written + leftover].copy_from_slice(&src[read..]);
    written += leftover;

    Ok(written)
}

/// Decompress a `bslz4` stream into `dst`.
///
/// `dst` must be sized to exactly the expected decoded length; the element
/// count is derived from it.
///
/// # Errors
/// [`Error::Decode`] if any block is malformed, a block decodes to the wrong
/// length, or the stream does not consume exactly `src.len()` bytes.
pub fn bslz4_decode(src: &[u8], dst: &mut [u8], element_size: usize) -> Result<()> {
    if element_size == 0 || dst.len() % element_size != 0 {
        return Err(Error::Decode(format!(
            "bslz4: destination of {} bytes is not a whole number of {element_size}-byte elements",
            dst.len()
        )));
    }

    let count = dst.len() / element_size;
    let block = block_elements(element_size);
    let mut shuffled = vec![0u8; block * element_size];

    let mut consumed = 0;
    let mut written = 0;
    let mut remaining = count;
    while remaining >= BLOCK_MULTIPLE {
        let n = remaining.min(block) / BLOCK_MULTIPLE * BLOCK_MULTIPLE;
        let raw_len = n * element_size;

        if src.len() < consumed + BLOCK_HEADER_LEN {
            return Err(Error::Decode("bslz4: truncated block header".into()));
        }
        let header: [u8; BLOCK_HEADER_LEN] =
            src[consumed..consumed + BLOCK_HEADER_LEN].try_into().unwrap();
        let compressed = u32::from_be_bytes(header) as usize;
        consumed += BLOCK_HEADER_LEN;
        if src.len() < consumed + compressed {
            return Err(Error::Decode(format!(
                "bslz4: block claims {compressed} bytes, {} remain",
                src.len() - consumed
            )));
        }

        super::lz4_decode(
            &src[consumed..consumed + compressed],
            &mut shuffled[..raw_len],
        )?;
        unshuffle_block(
            &shuffled[..raw_len],
            &mut dst[written..written + raw_len],
            element_size,
        );

        consumed += compressed;
        written += raw_len;
        remaining -= n;
    }

    let leftover = remaining * element_size;
    if src.len() < consumed + leftover {
        return Err(Error::Decode("bslz4: truncated trailing elements".into()));
    }
    dst[written..].copy_from_slice(&src[consumed..consumed + leftover]);
    consumed += leftover;

    if consumed != src.len() {
        return Err(Error::Decode(format!(
            "bslz4: processed {consumed} out of {} input bytes",
            src.len()
        )));
    }
    Ok(())
}
