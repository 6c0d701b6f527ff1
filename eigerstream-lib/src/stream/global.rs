//! Global (per-series) header parsing.

use serde::Deserialize;
use tracing::debug;

use super::detector::{DetectorConfig, HeaderDetail, Mask};
use crate::{Error, Result};

const HTYPE_HEADER: &str = "dheader-1.0";
const HTYPE_FLATFIELD: &str = "dflatfield-1.0";
const HTYPE_PIXELMASK: &str = "dpixelmask-1.0";
const HTYPE_COUNTRATE: &str = "dcountrate_table-1.0";

#[derive(Deserialize)]
struct HeaderPart1 {
    htype: String,
    series: i64,
    header_detail: HeaderDetail,
}

/// The metadata part announcing shape and type of a calibration blob
/// (parts 3, 5, and 7).
#[derive(Deserialize)]
struct MaskHeader {
    htype: String,
    shape: Vec<i64>,
}

impl MaskHeader {
    fn parse(payload: &[u8], expected_htype: &str, kind: &str) -> Result<(usize, usize)> {
        let header: MaskHeader = serde_json::from_slice(payload)
            .map_err(|err| Error::Protocol(format!("invalid {kind} header: {err}")))?;
        if header.htype != expected_htype {
            return Err(Error::Protocol(format!(
                "expected htype {expected_htype:?} for the {kind} header, received {:?}",
                header.htype
            )));
        }
        if header.shape.len() < 2 || header.shape[0] <= 0 || header.shape[1] <= 0 {
            return Err(Error::Protocol(format!(
                "invalid {kind} shape {:?}",
                header.shape
            )));
        }
        Ok((header.shape[0] as usize, header.shape[1] as usize))
    }
}

/// Everything parsed from one series' global header.
#[derive(Debug, Clone)]
pub struct SeriesRecord {
    pub series_id: i64,
    pub config: DetectorConfig,
    /// Calibration arrays, present only with `header_detail="all"`.
    pub flatfield: Option<Mask<f32>>,
    pub pixelmask: Option<Mask<u32>>,
    pub countrate_table: Option<Mask<f32>>,
    /// Facility-specific trailer, captured uninterpreted.
    pub header_appendix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Part1,
    Part2,
    Part3,
    Part4,
    Part5,
    Part6,
    Part7,
    Part8,
    Appendix,
    Done,
}

/// State machine over the 2- or 8-part global header plus optional appendix.
///
/// Feed parts in transport order with [`parse`](Self::parse); once it returns
/// `true`, read the result out with [`take_record`](Self::take_record), which
/// also resets the parser for the next series.
///
/// Whether an appendix part follows the header is a deployment property, not
/// discoverable from the stream itself, so it is latched at construction.
#[derive(Debug)]
pub struct GlobalHeaderParser {
    state: State,
    expect_appendix: bool,
    series_id: i64,
    header_detail: Option<HeaderDetail>,
    config: Option<DetectorConfig>,
    flatfield: Option<Mask<f32>>,
    pixelmask: Option<Mask<u32>>,
    countrate_table: Option<Mask<f32>>,
    header_appendix: Option<String>,
}

impl GlobalHeaderParser {
    #[must_use]
    pub fn new(expect_appendix: bool) -> Self {
        GlobalHeaderParser {
            state: State::Part1,
            expect_appendix,
            series_id: -1,
            header_detail: None,
            config: None,
            flatfield: None,
            pixelmask: None,
            countrate_table: None,
            header_appendix: None,
        }
    }

    /// Series id from part 1, or -1 before one has been parsed.
    #[must_use]
    pub fn series_id(&self) -> i64 {
        self.series_id
    }

    #[must_use]
    pub fn expecting_appendix(&self) -> bool {
        self.expect_appendix
    }

    /// Absorb one global header part, returning `true` when the header is
    /// complete.
    ///
    /// # Errors
    /// [`Error::Protocol`] on malformed or out-of-sequence parts,
    /// [`Error::Config`] on `header_detail="none"`. Any error is fatal for
    /// the series; call [`reset`](Self::reset) before continuing.
    pub fn parse(&mut self, msg: &[u8]) -> Result<bool> {
        match self.state {
            State::Part1 => {
                self.parse_part1(msg)?;
                self.state = State::Part2;
            }
            State::Part2 => {
                self.config = Some(DetectorConfig::from_json(msg)?);
                debug!(
                    series = self.series_id,
                    "series configuration: {}",
                    String::from_utf8_lossy(msg)
                );
                self.state = match self.header_detail {
                    Some(HeaderDetail::All) => State::Part3,
                    _ => self.appendix_or_done(),
                };
            }
            State::Part3 => {
                let (w, h) = MaskHeader::parse(msg, HTYPE_FLATFIELD, "flatfield")?;
                self.flatfield = Some(Mask::with_shape(w, h));
                self.state = State::Part4;
            }
            State::Part4 => {
                self.flatfield
                    .as_mut()
                    .expect("allocated by part 3")
                    .fill_from_bytes("flatfield", msg)?;
                self.state = State::Part5;
            }
            State::Part5 => {
                let (w, h) = MaskHeader::parse(msg, HTYPE_PIXELMASK, "pixel mask")?;
                self.pixelmask = Some(Mask::with_shape(w, h));
                self.state = State::Part6;
            }
            State::Part6 => {
                self.pixelmask
                    .as_mut()
                    .expect("allocated by part 5")
                    .fill_from_bytes("pixel mask", msg)?;
                self.state = State::Part7;
            }
            State::Part7 => {
                let (w, h) = MaskHeader::parse(msg, HTYPE_COUNTRATE, "countrate table")?;
                self.countrate_table = Some(Mask::with_shape(w, h));
                self.state = State::Part8;
            }
            State::Part8 => {
                self.countrate_table
                    .as_mut()
                    .expect("allocated by part 7")
                    .fill_from_bytes("countrate table", msg)?;
                self.state = self.appendix_or_done();
            }
            State::Appendix => {
                let appendix = String::from_utf8_lossy(msg).into_owned();
                debug!(series = self.series_id, "header appendix: {appendix}");
                self.header_appendix = Some(appendix);
                self.state = State::Done;
            }
            State::Done => {
                return Err(Error::Protocol(
                    "global header already complete; the series record must be \
                     taken before further parts arrive"
                        .into(),
                ));
            }
        }
        Ok(self.state == State::Done)
    }

    /// Take the completed series record and reset for the next series.
    ///
    /// # Errors
    /// [`Error::Protocol`] when the header is not complete.
    pub fn take_record(&mut self) -> Result<SeriesRecord> {
        if self.state != State::Done {
            return Err(Error::Protocol(
                "global header is not complete; cannot take series record".into(),
            ));
        }
        let record = SeriesRecord {
            series_id: self.series_id,
            config: self.config.take().expect("populated by part 2"),
            flatfield: self.flatfield.take(),
            pixelmask: self.pixelmask.take(),
            countrate_table: self.countrate_table.take(),
            header_appendix: self.header_appendix.take(),
        };
        self.reset();
        Ok(record)
    }

    /// Drop any partial header and return to the part-1 state.
    ///
    /// Idempotent. The appendix expectation is deployment config and
    /// survives resets.
    pub fn reset(&mut self) {
        self.state = State::Part1;
        self.series_id = -1;
        self.header_detail = None;
        self.config = None;
        self.flatfield = None;
        self.pixelmask = None;
        self.countrate_table = None;
        self.header_appendix = None;
    }

    fn parse_part1(&mut self, msg: &[u8]) -> Result<()> {
        let part: HeaderPart1 = serde_json::from_slice(msg)
            .map_err(|err| Error::Protocol(format!("invalid global header part 1: {err}")))?;
        if part.htype != HTYPE_HEADER {
            return Err(Error::Protocol(format!(
                "expected htype {HTYPE_HEADER:?} to open a series, received {:?}",
                part.htype
            )));
        }
        if part.header_detail == HeaderDetail::None {
            return Err(Error::Config(
                "header detail is \"none\"; cannot obtain the metadata needed to \
                 process image frames. Set header_detail to \"all\""
                    .into(),
            ));
        }
        self.series_id = part.series;
        self.header_detail = Some(part.header_detail);
        Ok(())
    }

    fn appendix_or_done(&self) -> State {
        if self.expect_appendix {
            State::Appendix
        } else {
            State::Done
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::detector::sample_config_json;

    fn part1(series: i64, detail: &str) -> Vec<u8> {
        serde_json::json!({
            "htype": "dheader-1.0",
            "series": series,
            "header_detail": detail,
        })
        .to_string()
        .into_bytes()
    }

    fn mask_header(htype: &str, w: i64, h: i64, dtype: &str) -> Vec<u8> {
        serde_json::json!({
            "htype": htype,
            "shape": [w, h],
            "type": dtype,
        })
        .to_string()
        .into_bytes()
    }

    fn feed_basic(parser: &mut GlobalHeaderParser, series: i64) {
        assert!(!parser.parse(&part1(series, "basic")).unwrap());
        let config = sample_config_json().to_string();
        let done = parser.parse(config.as_bytes()).unwrap();
        assert!(done || parser.expecting_appendix());
    }

    #[test]
    fn basic_header_completes_in_two_parts() {
        let mut parser = GlobalHeaderParser::new(false);
        feed_basic(&mut parser, 7);

        let record = parser.take_record().unwrap();
        assert_eq!(record.series_id, 7);
        assert_eq!(record.config.x_pixels_in_detector, 4150);
        assert!(record.flatfield.is_none());
        assert!(record.header_appendix.is_none());
    }

    #[test]
    fn all_header_completes_in_eight_parts() {
        let mut parser = GlobalHeaderParser::new(false);
        assert!(!parser.parse(&part1(3, "all")).unwrap());
        let config = sample_config_json().to_string();
        assert!(!parser.parse(config.as_bytes()).unwrap());

        let shapes = [
            ("dflatfield-1.0", "float32"),
            ("dpixelmask-1.0", "uint32"),
            ("dcountrate_table-1.0", "float32"),
        ];
        for (i, (htype, dtype)) in shapes.iter().enumerate() {
            assert!(!parser.parse(&mask_header(htype, 4, 4, dtype)).unwrap());
            let done = parser.parse(&[0u8; 64]).unwrap();
            assert_eq!(done, i == 2, "part {}", 4 + 2 * i);
        }

        let record = parser.take_record().unwrap();
        assert_eq!(record.series_id, 3);
        assert_eq!(record.flatfield.unwrap().n_bytes(), 64);
        assert_eq!(record.pixelmask.unwrap().n_bytes(), 64);
        assert_eq!(record.countrate_table.unwrap().n_bytes(), 64);
    }

    #[test]
    fn appendix_is_captured_verbatim() {
        let mut parser = GlobalHeaderParser::new(true);
        feed_basic(&mut parser, 1);
        assert!(parser.parse(br#"{"esaf":"PER-SERIES STUFF"}"#).unwrap());

        let record = parser.take_record().unwrap();
        assert_eq!(
            record.header_appendix.as_deref(),
            Some(r#"{"esaf":"PER-SERIES STUFF"}"#)
        );
    }

    #[test]
    fn header_detail_none_is_config_error() {
        let mut parser = GlobalHeaderParser::new(false);
        let zult = parser.parse(&part1(1, "none"));
        assert!(matches!(zult, Err(Error::Config(_))), "got {zult:?}");
    }

    #[test]
    fn unknown_header_detail_is_protocol_error() {
        let mut parser = GlobalHeaderParser::new(false);
        let zult = parser.parse(&part1(1, "everything"));
        assert!(matches!(zult, Err(Error::Protocol(_))), "got {zult:?}");
    }

    #[test]
    fn wrong_part1_htype_is_protocol_error() {
        let mut parser = GlobalHeaderParser::new(false);
        let msg = serde_json::json!({
            "htype": "dimage-1.0",
            "series": 1,
            "header_detail": "basic",
        })
        .to_string();
        let zult = parser.parse(msg.as_bytes());
        assert!(matches!(zult, Err(Error::Protocol(_))), "got {zult:?}");
    }

    #[test]
    fn wrong_mask_htype_is_protocol_error() {
        let mut parser = GlobalHeaderParser::new(false);
        assert!(!parser.parse(&part1(1, "all")).unwrap());
        let config = sample_config_json().to_string();
        assert!(!parser.parse(config.as_bytes()).unwrap());

        // Pixel mask header where the flatfield header belongs.
        let zult = parser.parse(&mask_header("dpixelmask-1.0", 4, 4, "uint32"));
        assert!(matches!(zult, Err(Error::Protocol(_))), "got {zult:?}");
    }

    #[test]
    fn blob_length_mismatch_is_protocol_error() {
        let mut parser = GlobalHeaderParser::new(false);
        assert!(!parser.parse(&part1(1, "all")).unwrap());
        let config = sample_config_json().to_string();
        assert!(!parser.parse(config.as_bytes()).unwrap());
        assert!(!parser
            .parse(&mask_header("dflatfield-1.0", 4, 4, "float32"))
            .unwrap());

        let zult = parser.parse(&[0u8; 63]);
        assert!(matches!(zult, Err(Error::Protocol(_))), "got {zult:?}");
    }

    #[test]
    fn parse_after_done_is_protocol_error() {
        let mut parser = GlobalHeaderParser::new(false);
        feed_basic(&mut parser, 1);
        let zult = parser.parse(&part1(2, "basic"));
        assert!(matches!(zult, Err(Error::Protocol(_))), "got {zult:?}");
    }

    #[test]
    fn reset_is_idempotent() {
        let mut parser = GlobalHeaderParser::new(false);
        assert!(!parser.parse(&part1(9, "basic")).unwrap());
        parser.reset();
        parser.reset();
        assert_eq!(parser.series_id(), -1);

        // A fresh series parses identically after the double reset.
        feed_basic(&mut parser, 10);
        assert_eq!(parser.take_record().unwrap().series_id, 10);
    }
}
