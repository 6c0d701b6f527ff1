//! Owning byte buffer for decoded image payloads.

use crate::codec::{self, Compressor};
use crate::Result;

/// An owning, resizable byte region used to hold one decoded image frame.
///
/// The buffer is sized once per series to the exact decoded image size and
/// reused for every frame. [`Buffer::resize`] releases and reallocates rather
/// than preserving contents; after a resize the bytes are zeroed.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    #[must_use]
    pub fn new() -> Self {
        Buffer::default()
    }

    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Buffer {
            data: vec![0u8; len],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Size the buffer to `len` bytes.
    ///
    /// A no-op when the length is unchanged; otherwise the old storage is
    /// dropped and a fresh zeroed region is allocated.
    pub fn resize(&mut self, len: usize) {
        if len == self.data.len() {
            return;
        }
        self.data = vec![0u8; len];
    }

    /// Decode `src` into this buffer with the given codec.
    ///
    /// The buffer length must already equal the exact decompressed size;
    /// after success the full buffer holds the decoded payload.
    ///
    /// # Errors
    /// [`crate::Error::Decode`] from the codec, including any disagreement
    /// between the decoded byte count and the buffer length.
    pub fn decode(&mut self, codec: Compressor, src: &[u8], element_size: usize) -> Result<()> {
        match codec {
            Compressor::None => {
                if src.len() != self.data.len() {
                    return Err(crate::Error::Decode(format!(
                        "raw payload is {} bytes, expected {}",
                        src.len(),
                        self.data.len()
                    )));
                }
                self.data.copy_from_slice(src);
                Ok(())
            }
            Compressor::Lz4 => codec::lz4_decode(src, &mut self.data),
            Compressor::Bslz4 => codec::bslz4_decode(src, &mut self.data, element_size),
        }
    }

    /// Encode `src` into this buffer, growing it to the codec's upper bound
    /// first when needed, and return the encoded byte count.
    ///
    /// # Errors
    /// [`crate::Error::Encode`] from the codec.
    pub fn encode(&mut self, codec: Compressor, src: &[u8], element_size: usize) -> Result<usize> {
        match codec {
            Compressor::None => {
                if self.data.len() < src.len() {
                    self.resize(src.len());
                }
                self.data[..src.len()].copy_from_slice(src);
                Ok(src.len())
            }
            Compressor::Lz4 => {
                let bound = codec::lz4_bound(src.len());
                if self.data.len() < bound {
                    self.resize(bound);
                }
                codec::lz4_encode(src, &mut self.data)
            }
            Compressor::Bslz4 => {
                let bound = codec::bslz4_bound(src.len(), element_size);
                if bound == 0 {
                    return Err(crate::Error::Encode(format!(
                        "input of {} bytes is not a whole number of {element_size}-byte elements",
                        src.len()
                    )));
                }
                if self.data.len() < bound {
                    self.resize(bound);
                }
                codec::bslz4_encode(src, &mut self.data, element_size)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_semantics() {
        let mut buf = Buffer::new();
        assert!(buf.is_empty());

        buf.resize(64);
        assert_eq!(buf.len(), 64);
        buf.resize(64);
        assert_eq!(buf.len(), 64);
        buf.resize(0);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_none_is_copy() {
        let src = [9u8; 16];
        let mut buf = Buffer::with_len(16);
        buf.decode(Compressor::None, &src, 4).unwrap();
        assert_eq!(buf.as_slice(), &src);
    }

    #[test]
    fn decode_none_length_mismatch() {
        let src = [9u8; 15];
        let mut buf = Buffer::with_len(16);
        let zult = buf.decode(Compressor::None, &src, 4);
        assert!(matches!(zult, Err(crate::Error::Decode(_))), "got {zult:?}");
    }

    #[test]
    fn encode_then_decode_per_codec() {
        let original: Vec<u8> = (0u32..64).flat_map(|x| (x * 7).to_le_bytes()).collect();
        for codec in [Compressor::None, Compressor::Lz4, Compressor::Bslz4] {
            let mut scratch = Buffer::new();
            let n = scratch.encode(codec, &original, 4).unwrap();

            let mut decoded = Buffer::with_len(original.len());
            decoded
                .decode(codec, &scratch.as_slice()[..n], 4)
                .unwrap();
            assert_eq!(decoded.as_slice(), &original[..], "codec {codec}");
        }
    }
}
