//! CBF byte-offset compression.
//!
//! Each element is stored as the delta from its predecessor (the implicit
//! predecessor of the first element is 0). A delta within ±127 takes one
//! signed byte; wider deltas escalate through little-endian 16-, 32- and
//! 64-bit encodings behind sentinel markers (`0x80`, `0x8000`, `0x80000000`).

/// Encode `values` with the byte-offset scheme.
#[must_use]
pub fn encode(values: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len());
    let mut last: i64 = 0;
    for &value in values {
        let delta = i64::from(value) - last;
        last = i64::from(value);

        if (-127..=127).contains(&delta) {
            out.push(delta as u8);
        } else if (-32767..=32767).contains(&delta) {
            out.push(0x80);
            out.extend_from_slice(&(delta as i16).to_le_bytes());
        } else if (-2_147_483_647..=2_147_483_647).contains(&delta) {
            out.push(0x80);
            out.extend_from_slice(&i16::MIN.to_le_bytes());
            out.extend_from_slice(&(delta as i32).to_le_bytes());
        } else {
            out.push(0x80);
            out.extend_from_slice(&i16::MIN.to_le_bytes());
            out.extend_from_slice(&i32::MIN.to_le_bytes());
            out.extend_from_slice(&delta.to_le_bytes());
        }
    }
    out
}

#[cfg(test)]
pub(crate) fn decode(mut data: &[u8]) -> Vec<i32> {
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
        out.push(i32::try_from(last).expect("decoded element exceeds i32"));
    }
    out
}
