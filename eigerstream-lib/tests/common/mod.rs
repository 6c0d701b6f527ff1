//! Wire-format message generators and output-file helpers shared by the
//! integration tests.
#![allow(dead_code)] // not every test binary uses every helper

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use eigerstream::codec::Compressor;
use eigerstream::stream::DetectorConfig;
use eigerstream::Buffer;

/// Per-scenario knobs, defaulting to a small 4x4 32-bit detector so the
/// payloads stay readable in failure output.
pub struct TestParams {
    pub config: DetectorConfig,
    pub header_detail: &'static str,
    pub header_appendix: Option<String>,
    pub image_appendix: Option<String>,
}

impl Default for TestParams {
    fn default() -> Self {
        TestParams {
            config: DetectorConfig {
                beam_center_x: 2.0,
                beam_center_y: 2.0,
                bit_depth_image: 32,
                compression: Compressor::None,
                count_time: 0.2,
                countrate_correction_count_cutoff: 765_063,
                description: "MATTERHORN 2X 65536M".to_string(),
                detector_distance: 0.125,
                detector_number: "M-32-0128".to_string(),
                frame_time: 0.2,
                nimages: 1,
                ntrigger: 1,
                omega_start: 0.0,
                omega_increment: 90.0,
                sensor_thickness: 4.5e-4,
                software_version: "1.8.0".to_string(),
                wavelength: 1.670046,
                x_pixel_size: 7.5e-5,
                x_pixels_in_detector: 4,
                y_pixel_size: 7.5e-5,
                y_pixels_in_detector: 4,
            },
            header_detail: "basic",
            header_appendix: None,
            image_appendix: None,
        }
    }
}

impl TestParams {
    pub fn n_pixels(&self) -> usize {
        (self.config.x_pixels_in_detector * self.config.y_pixels_in_detector) as usize
    }
}

/// Deterministic pixel values for one frame.
pub fn pixel_values(params: &TestParams, frame: i64) -> Vec<i32> {
    (0..params.n_pixels() as i32)
        .map(|i| i * 3 + frame as i32)
        .collect()
}

pub fn pixel_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Compress one frame's pixels the way the detector would.
pub fn compressed_image(params: &TestParams, frame: i64) -> Vec<u8> {
    let raw = pixel_bytes(&pixel_values(params, frame));
    let mut scratch = Buffer::new();
    let n = scratch
        .encode(params.config.compression, &raw, 4)
        .expect("test payload encodes");
    scratch.as_slice()[..n].to_vec()
}

pub fn global_part1(params: &TestParams, series: i64) -> Vec<u8> {
    serde_json::json!({
        "htype": "dheader-1.0",
        "series": series,
        "header_detail": params.header_detail,
    })
    .to_string()
    .into_bytes()
}

pub fn global_part2(params: &TestParams) -> Vec<u8> {
    serde_json::to_vec(&params.config).expect("config serializes")
}

pub fn mask_header(htype: &str, w: i64, h: i64, dtype: &str) -> Vec<u8> {
    serde_json::json!({
        "htype": htype,
        "shape": [w, h],
        "type": dtype,
    })
    .to_string()
    .into_bytes()
}

pub fn frame_part1(series: i64, frame: i64) -> Vec<u8> {
    serde_json::json!({
        "htype": "dimage-1.0",
        "series": series,
        "frame": frame,
        "hash": "fc67f000d08fe6b380ea9434b8362d22",
    })
    .to_string()
    .into_bytes()
}

pub fn frame_part2(params: &TestParams, compressed_size: usize) -> Vec<u8> {
    serde_json::json!({
        "htype": "dimage_d-1.0",
        "shape": [params.config.x_pixels_in_detector, params.config.y_pixels_in_detector],
        "type": "uint32",
        "encoding": params.config.compression.to_string(),
        "size": compressed_size,
    })
    .to_string()
    .into_bytes()
}

pub fn frame_part4(params: &TestParams, frame: i64) -> Vec<u8> {
    let real_time = (params.config.frame_time * 1e9) as i64;
    serde_json::json!({
        "htype": "dconfig-1.0",
        "start_time": real_time * (frame - 1),
        "stop_time": real_time * frame,
        "real_time": real_time,
    })
    .to_string()
    .into_bytes()
}

pub fn series_end(series: i64) -> Vec<u8> {
    serde_json::json!({
        "htype": "dseries_end-1.0",
        "series": series,
    })
    .to_string()
    .into_bytes()
}

/// All message parts of one complete series, frames numbered 1..=n_frames.
pub fn series_messages(params: &TestParams, series: i64, n_frames: i64) -> Vec<Vec<u8>> {
    let mut messages = vec![global_part1(params, series), global_part2(params)];
    if params.header_detail == "all" {
        let (w, h) = (
            params.config.x_pixels_in_detector,
            params.config.y_pixels_in_detector,
        );
        messages.push(mask_header("dflatfield-1.0", w, h, "float32"));
        messages.push(vec![b'a'; (w * h * 4) as usize]);
        messages.push(mask_header("dpixelmask-1.0", w, h, "uint32"));
        messages.push(vec![b'b'; (w * h * 4) as usize]);
        messages.push(mask_header("dcountrate_table-1.0", w, h, "float32"));
        messages.push(vec![b'c'; (w * h * 4) as usize]);
    }
    if let Some(appendix) = &params.header_appendix {
        messages.push(appendix.clone().into_bytes());
    }
    for frame in 1..=n_frames {
        let image = compressed_image(params, frame);
        messages.push(frame_part1(series, frame));
        messages.push(frame_part2(params, image.len()));
        messages.push(image);
        messages.push(frame_part4(params, frame));
        if let Some(appendix) = &params.image_appendix {
            messages.push(appendix.clone().into_bytes());
        }
    }
    messages.push(series_end(series));
    messages
}

/// Decode the byte-offset stream written by the emitter.
pub fn byte_offset_decode(mut data: &[u8]) -> Vec<i32> {
    let mut out = Vec::new();
    let mut last: i64 = 0;
    while !data.is_empty() {
        let first = data[0] as i8;
        data = &data[1..];
        let delta: i64 = if first != i8::MIN {
            i64::from(first)
        } else {
            let short = i16::from_le_bytes([data[0], data[1]]);
            data = &data[2..];
            if short != i16::MIN {
                i64::from(short)
            } else {
                let wide = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                data = &data[4..];
                if wide != i32::MIN {
                    i64::from(wide)
                } else {
                    let long = i64::from_le_bytes(data[..8].try_into().unwrap());
                    data = &data[8..];
                    long
                }
            }
        };
        last += delta;
        out.push(i32::try_from(last).expect("pixel value fits i32"));
    }
    out
}

/// Read an emitted file and decode the pixel array from its binary section.
pub fn read_cbf_pixels(path: &Path) -> Vec<i32> {
    let text = std::fs::read_to_string(path).expect("output file readable");
    let boundary = "--CIF-BINARY-FORMAT-SECTION--";
    let section = &text[text.find(boundary).expect("binary section present")..];
    let encoded: String = section
        .lines()
        .skip(1)
        .skip_while(|l| !l.is_empty())
        .take_while(|l| !l.starts_with(boundary))
        .map(str::trim)
        .collect();
    let raw = BASE64.decode(encoded).expect("valid base64 payload");
    byte_offset_decode(&raw)
}

/// Read an emitted file's miniCBF header text block.
pub fn read_cbf_header(path: &Path) -> String {
    let text = std::fs::read_to_string(path).expect("output file readable");
    let start = text
        .find("_array_data.header_contents")
        .expect("header column present");
    let block = &text[start..];
    let open = block.find(';').expect("text field opens");
    let close = block[open + 1..].find("\n;").expect("text field closes");
    block[open + 1..open + 1 + close].to_string()
}
