//! Series-to-miniCBF conversion.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, info};

use super::detector::DetectorConfig;
use super::global::{GlobalHeaderParser, SeriesRecord};
use super::{ParseOutcome, StreamParser};
use crate::buffer::Buffer;
use crate::minicbf::{BinaryCompression, ByteOrder, Cbf, WriteOptions};
use crate::{Error, Result};

const HTYPE_IMAGE_DATA: &str = "dimage_d-1.0";
const HTYPE_IMAGE_TIMES: &str = "dconfig-1.0";

/// First part of a frame, or the series-end record; distinguished by htype.
#[derive(Deserialize)]
#[serde(tag = "htype")]
enum FrameOpening {
    #[serde(rename = "dimage-1.0")]
    Image { series: i64, frame: i64 },
    #[serde(rename = "dseries_end-1.0")]
    SeriesEnd { series: i64 },
}

#[derive(Deserialize)]
struct HtypeOnly {
    htype: String,
}

fn validate_htype(msg: &[u8], expected: &str) -> Result<()> {
    let part: HtypeOnly = serde_json::from_slice(msg)
        .map_err(|err| Error::Protocol(format!("invalid {expected:?} message: {err}")))?;
    if part.htype != expected {
        return Err(Error::Protocol(format!(
            "expected htype {expected:?}, received {:?}",
            part.htype
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    GlobalHeader,
    NewFrame,
    MidframePart2,
    MidframePart3,
    MidframePart4,
    MidframeAppendix,
}

/// Converts one detector stream into a sequence of miniCBF files, one image
/// per file, named `<series>-<frame>.cbf` in the output directory.
///
/// Top-level state machine over the whole stream: the global header is
/// delegated to a [`GlobalHeaderParser`]; each frame then arrives as four
/// parts (metadata, shape, compressed pixels, exposure times) plus an
/// optional appendix, and is written out as soon as its last part has been
/// parsed.
#[derive(Debug)]
pub struct CbfConverter {
    state: State,
    global: GlobalHeaderParser,
    series: Option<SeriesRecord>,
    buffer: Buffer,
    cbf: Cbf,
    frame_id: i64,
    image_appendix: Option<String>,
    using_image_appendix: bool,
    output_dir: PathBuf,
}

impl CbfConverter {
    #[must_use]
    pub fn new(using_header_appendix: bool, using_image_appendix: bool) -> Self {
        CbfConverter {
            state: State::GlobalHeader,
            global: GlobalHeaderParser::new(using_header_appendix),
            series: None,
            buffer: Buffer::new(),
            cbf: Cbf::new(),
            frame_id: -1,
            image_appendix: None,
            using_image_appendix,
            output_dir: PathBuf::from("."),
        }
    }

    /// Write image files under `dir` instead of the process working
    /// directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// The series currently being converted, if a global header has been
    /// parsed.
    #[must_use]
    pub fn current_series(&self) -> Option<&SeriesRecord> {
        self.series.as_ref()
    }

    /// Decoded image buffer length, sized per series.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// The most recent per-frame appendix, if the deployment sends them.
    ///
    /// Not interpreted here; facility-specific wrappers may use it to pick
    /// landing directories or file naming conventions.
    #[must_use]
    pub fn image_appendix(&self) -> Option<&str> {
        self.image_appendix.as_deref()
    }

    fn series(&self) -> Result<&SeriesRecord> {
        self.series
            .as_ref()
            .ok_or_else(|| Error::Protocol("no active series".into()))
    }

    /// Dispatch a part-1 message: `Ok(true)` for a series end, `Ok(false)`
    /// for the start of a frame.
    fn parse_opening(&mut self, msg: &[u8]) -> Result<bool> {
        let opening: FrameOpening = serde_json::from_slice(msg).map_err(|err| {
            Error::Protocol(format!(
                "expected either a \"dimage-1.0\" (frame part 1) or \"dseries_end-1.0\" \
                 (end of series) message: {err}"
            ))
        })?;
        let expected = self.series()?.series_id;
        match opening {
            FrameOpening::SeriesEnd { series } => {
                if series != expected {
                    return Err(Error::Protocol(format!(
                        "invalid series end message, expected series id: {expected}, \
                         received {series}"
                    )));
                }
                info!("series end record - {}", String::from_utf8_lossy(msg));
                Ok(true)
            }
            FrameOpening::Image { series, frame } => {
                if series != expected {
                    return Err(Error::Protocol(format!(
                        "invalid frame part 1 message, expected series id: {expected}, \
                         received {series}"
                    )));
                }
                self.frame_id = frame;
                Ok(false)
            }
        }
    }

    fn build_header(cbf: &mut Cbf, config: &DetectorConfig, frame_id: i64) -> Result<()> {
        let start_angle = config.omega_start + (frame_id - 1) as f64 * config.omega_increment;
        let contents = format!(
            "\n\
             # Detector: {}, S/N {}\n\
             # Pixel_size {}e-6 m x {}e-6 m\n\
             # Silicon sensor, thickness {:.6} m\n\
             # Exposure_time {:.6} s\n\
             # Exposure_period {:.6} s\n\
             # Count_cutoff {} counts\n\
             # Wavelength {:.6} A\n\
             # Detector_distance {:.6} m\n\
             # Beam_xy ({}, {}) pixels\n\
             # Start_angle {:.6} deg.\n\
             # Angle_increment {:.6} deg.\n",
            config.description,
            config.detector_number,
            (config.x_pixel_size * 1e6).round() as i64,
            (config.y_pixel_size * 1e6).round() as i64,
            config.sensor_thickness,
            config.count_time,
            config.frame_time,
            config.countrate_correction_count_cutoff,
            config.wavelength,
            config.detector_distance,
            config.beam_center_x.round() as i64,
            config.beam_center_y.round() as i64,
            start_angle,
            config.omega_increment,
        );

        cbf.new_datablock("image_1");
        cbf.new_category("array_data")?;
        cbf.new_column("header_convention")?;
        cbf.set_value("SLS_1.0")?;
        cbf.new_column("header_contents")?;
        cbf.set_value(&contents)?;
        Ok(())
    }

    fn build_data(cbf: &mut Cbf, config: &DetectorConfig, pixels: &[u8]) -> Result<()> {
        let x = config.x_pixels_in_detector as usize;
        let y = config.y_pixels_in_detector as usize;
        cbf.new_category("array_data")?;
        cbf.new_column("data")?;
        cbf.set_integer_array(
            BinaryCompression::ByteOffset,
            1,
            pixels,
            config.element_size(),
            true,
            x * y,
            ByteOrder::LittleEndian,
            x,
            y,
            0,
            0,
        )
    }
}

impl StreamParser for CbfConverter {
    fn parse(&mut self, msg: &[u8]) -> Result<ParseOutcome> {
        match self.state {
            State::GlobalHeader => {
                if self.global.parse(msg)? {
                    let record = self.global.take_record()?;
                    self.buffer.resize(record.config.image_size());
                    debug!(
                        series = record.series_id,
                        buffer_len = self.buffer.len(),
                        "global header complete"
                    );
                    self.series = Some(record);
                    self.state = State::NewFrame;
                }
            }
            State::NewFrame => {
                if self.parse_opening(msg)? {
                    self.reset();
                    return Ok(ParseOutcome::SeriesComplete);
                }
                self.cbf = Cbf::new();
                let series = self.series.as_ref().expect("checked by parse_opening");
                Self::build_header(&mut self.cbf, &series.config, self.frame_id)?;
                self.state = State::MidframePart2;
            }
            State::MidframePart2 => {
                // The shape and encoding here are redundant with the
                // detector configuration; only the htype is checked.
                validate_htype(msg, HTYPE_IMAGE_DATA)?;
                self.state = State::MidframePart3;
            }
            State::MidframePart3 => {
                let (codec, element_size) = {
                    let config = &self.series()?.config;
                    (config.compression, config.element_size())
                };
                self.buffer.decode(codec, msg, element_size)?;
                let series = self.series.as_ref().expect("decoded for active series");
                Self::build_data(&mut self.cbf, &series.config, self.buffer.as_slice())?;
                self.state = State::MidframePart4;
            }
            State::MidframePart4 => {
                // Measured exposure times; the configured times from the
                // global header are used instead.
                validate_htype(msg, HTYPE_IMAGE_TIMES)?;
                if self.using_image_appendix {
                    self.state = State::MidframeAppendix;
                } else {
                    self.flush()?;
                    self.state = State::NewFrame;
                }
            }
            State::MidframeAppendix => {
                self.image_appendix = Some(String::from_utf8_lossy(msg).into_owned());
                self.flush()?;
                self.state = State::NewFrame;
            }
        }
        Ok(ParseOutcome::InProgress)
    }

    fn flush(&mut self) -> Result<()> {
        let series_id = self.series()?.series_id;
        let path = self
            .output_dir
            .join(format!("{series_id}-{}.cbf", self.frame_id));
        let file = File::create(&path)
            .map_err(|err| Error::Emit(format!("{}: {err}", path.display())))?;
        self.cbf
            .write_file(BufWriter::new(file), &WriteOptions::default())
            .map_err(|err| Error::Emit(format!("{}: {err}", path.display())))?;
        debug!(series = series_id, frame = self.frame_id, "image frame committed");
        Ok(())
    }

    fn reset(&mut self) {
        self.state = State::GlobalHeader;
        self.global.reset();
        self.series = None;
        self.buffer.resize(0);
        self.cbf = Cbf::new();
        self.frame_id = -1;
        self.image_appendix = None;
    }
}
