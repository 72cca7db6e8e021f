//! Wire-Format Line Parsers
//!
//! Two formats, both line-terminated ASCII with whitespace-separated tokens:
//!
//! - force: `ASC2 <u32> <i32> <float> <float> <float>`, the 5th token being
//!   the calibrated reading;
//! - displacement: free-form, containing `SPC_VAL`, `usSenderId=0x????`,
//!   `ulMicros=<u32>` and `Val=<float>`.
//!
//! Malformed lines yield `None`; parse failures never propagate.

/// A decoded displacement line.
#[derive(Debug, Clone, PartialEq)]
pub struct DispReading {
    /// Wire-level sender id, e.g. `0x2E01`. Disambiguates which transducer
    /// emitted the line.
    pub sender_id: String,
    /// Device-side microsecond counter, when present.
    pub micros: Option<u32>,
    pub value: f64,
}

/// What a probed line looks like, for port classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Force,
    Disp { sender_id: String },
}

/// Parse a force line, returning the calibrated reading.
///
/// The line must start with the `ASC2` token and carry at least five tokens
/// in total; token index 4 is the value.
pub fn parse_force_line(line: &str) -> Option<f64> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 || parts[0] != "ASC2" {
        return None;
    }
    parts[4].parse().ok()
}

/// Parse a displacement line. Requires the `SPC_VAL` marker plus sender id
/// and value tokens anywhere in the line.
pub fn parse_disp_line(line: &str) -> Option<DispReading> {
    if !line.split_whitespace().any(|tok| tok == "SPC_VAL") {
        return None;
    }

    let mut sender_id = None;
    let mut micros = None;
    let mut value = None;
    for tok in line.split_whitespace() {
        if let Some(rest) = tok.strip_prefix("usSenderId=") {
            sender_id = Some(rest.to_string());
        } else if let Some(rest) = tok.strip_prefix("ulMicros=") {
            micros = rest.parse().ok();
        } else if let Some(rest) = tok.strip_prefix("Val=") {
            value = rest.parse().ok();
        }
    }

    Some(DispReading {
        sender_id: sender_id?,
        micros,
        value: value?,
    })
}

/// Classify a line for port probing.
pub fn classify_line(line: &str) -> Option<LineKind> {
    if parse_force_line(line).is_some() {
        return Some(LineKind::Force);
    }
    parse_disp_line(line).map(|reading| LineKind::Disp {
        sender_id: reading.sender_id,
    })
}
