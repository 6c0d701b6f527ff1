//! Per-series detector metadata records.

use serde::{Deserialize, Serialize};

use crate::codec::Compressor;
use crate::{Error, Result};

/// The `header_detail` mode announced in part 1 of the global header,
/// governing how many metadata parts follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderDetail {
    /// No metadata parts at all. Unusable: the converter cannot build image
    /// files without the detector configuration.
    None,
    /// Parts 1-2 only.
    Basic,
    /// Parts 1-8 including the calibration mask blobs.
    All,
}

/// The detector configuration transmitted as part 2 of the global header.
///
/// Every field is mandatory; a part-2 payload missing any of them fails
/// deserialization and aborts the series. Field names match the wire JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Beam center, in pixels.
    pub beam_center_x: f64,
    pub beam_center_y: f64,
    /// Bits per pixel of the image payloads. Only 32 is supported.
    pub bit_depth_image: i64,
    pub compression: Compressor,
    /// Exposure time per image, seconds.
    pub count_time: f64,
    pub countrate_correction_count_cutoff: i64,
    pub description: String,
    /// Sample-to-detector distance, meters.
    pub detector_distance: f64,
    pub detector_number: String,
    /// Exposure period (time between frame starts), seconds.
    pub frame_time: f64,
    /// Images per trigger; the series holds `nimages * ntrigger` frames.
    pub nimages: i64,
    pub ntrigger: i64,
    /// Rotation start angle and per-frame increment, degrees.
    pub omega_start: f64,
    pub omega_increment: f64,
    /// Sensor thickness, meters.
    pub sensor_thickness: f64,
    pub software_version: String,
    /// Wavelength, angstroms.
    pub wavelength: f64,
    /// Pixel pitch, meters.
    pub x_pixel_size: f64,
    pub x_pixels_in_detector: i64,
    pub y_pixel_size: f64,
    pub y_pixels_in_detector: i64,
}

impl DetectorConfig {
    /// Parse a part-2 payload and check the values this crate depends on.
    ///
    /// # Errors
    /// [`Error::Protocol`] on malformed JSON or a missing field;
    /// [`Error::Config`] when `bit_depth_image` is unsupported.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let config: DetectorConfig = serde_json::from_slice(payload).map_err(|err| {
            Error::Protocol(format!("invalid detector configuration: {err}"))
        })?;
        if config.bit_depth_image != 32 {
            return Err(Error::Config(format!(
                "bit_depth_image={}; only 32-bit depth images are supported",
                config.bit_depth_image
            )));
        }
        Ok(config)
    }

    /// Decoded size of one image frame in bytes.
    #[must_use]
    pub fn image_size(&self) -> usize {
        self.element_size() * self.x_pixels_in_detector as usize * self.y_pixels_in_detector as usize
    }

    /// Bytes per pixel.
    #[must_use]
    pub fn element_size(&self) -> usize {
        (self.bit_depth_image / 8) as usize
    }
}

/// An element type a calibration mask can carry.
pub trait MaskElement: Copy + Default {
    fn from_le(chunk: &[u8]) -> Self;
}

impl MaskElement for f32 {
    fn from_le(chunk: &[u8]) -> Self {
        f32::from_le_bytes(chunk.try_into().expect("chunk size checked by caller"))
    }
}

impl MaskElement for u32 {
    fn from_le(chunk: &[u8]) -> Self {
        u32::from_le_bytes(chunk.try_into().expect("chunk size checked by caller"))
    }
}

/// A 2D calibration array (flatfield, pixel mask, or countrate table)
/// transmitted with `header_detail="all"`.
///
/// The core carries these through without applying them.
#[derive(Debug, Clone)]
pub struct Mask<T> {
    width: usize,
    height: usize,
    elements: Vec<T>,
}

impl<T: MaskElement> Mask<T> {
    /// Allocate a zeroed mask from the shape announced in the metadata part.
    #[must_use]
    pub fn with_shape(width: usize, height: usize) -> Self {
        Mask {
            width,
            height,
            elements: vec![T::default(); width * height],
        }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn elements(&self) -> &[T] {
        &self.elements
    }

    /// Expected blob size in bytes.
    #[must_use]
    pub fn n_bytes(&self) -> usize {
        self.width * self.height * std::mem::size_of::<T>()
    }

    /// Fill from the raw blob part that follows the metadata part.
    ///
    /// # Errors
    /// [`Error::Protocol`] when the blob length disagrees with the announced
    /// shape.
    pub fn fill_from_bytes(&mut self, kind: &str, blob: &[u8]) -> Result<()> {
        if blob.len() != self.n_bytes() {
            return Err(Error::Protocol(format!(
                "expected {kind} size (bytes): {}, actual: {}",
                self.n_bytes(),
                blob.len()
            )));
        }
        let elem = std::mem::size_of::<T>();
        for (dst, chunk) in self.elements.iter_mut().zip(blob.chunks_exact(elem)) {
            *dst = T::from_le(chunk);
        }
        Ok(())
    }
}

/// A complete part-2 payload with the values of the vendor manual's worked
/// example, for use by this crate's unit tests.
#[cfg(test)]
pub(crate) fn sample_config_json() -> serde_json::Value {
    serde_json::json!({
        "beam_center_x": 2110.0,
        "beam_center_y": 2200.0,
        "bit_depth_image": 32,
        "compression": "lz4",
        "count_time": 0.2,
        "countrate_correction_count_cutoff": 765063,
        "description": "MATTERHORN 2X 65536M",
        "detector_distance": 0.125,
        "detector_number": "M-32-0128",
        "frame_time": 0.2,
        "nimages": 1,
        "ntrigger": 1,
        "omega_start": 0.0,
        "omega_increment": 90.0,
        "sensor_thickness": 4.5e-4,
        "software_version": "1.8.0",
        "wavelength": 1.670046,
        "x_pixel_size": 7.5e-5,
        "x_pixels_in_detector": 4150,
        "y_pixel_size": 7.5e-5,
        "y_pixels_in_detector": 4371,
    })
}
