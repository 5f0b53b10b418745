//! Formatting and text helpers for broadcast applications.
//!
//! Small utilities the rotation engine, the UECP listener and the CLI all
//! need.

/// Format a frequency in kHz as an FM dial string.
///
/// # Example
///
/// ```
/// use picast_core::format_freq_mhz;
///
/// assert_eq!(format_freq_mhz(98_700), "98.70 MHz");
/// assert_eq!(format_freq_mhz(104_050), "104.05 MHz");
/// ```
pub fn format_freq_mhz(freq_khz: u32) -> String {
    let mhz = f64::from(freq_khz) / 1_000.0;
    format!("{mhz:.2} MHz")
}

/// Center `s` in a field of `width` characters, truncating when too long.
///
/// Odd padding puts the extra space on the left.
///
/// # Example
///
/// ```
/// use picast_core::center_fixed;
///
/// assert_eq!(center_fixed("NEWS", 8), "  NEWS  ");
/// assert_eq!(center_fixed("ROCK", 7), "  ROCK ");
/// assert_eq!(center_fixed("TOOLONGNAME", 8), "TOOLONGN");
/// ```
pub fn center_fixed(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        return s.chars().take(width).collect();
    }
    let pad = width - len;
    let left = pad.div_ceil(2);
    let right = pad - left;
    format!("{}{}{}", " ".repeat(left), s, " ".repeat(right))
}

/// Left-align `s` in a field of `width` characters, truncating when too long.
pub fn pad_fixed(s: &str, width: usize) -> String {
    let mut out: String = s.chars().take(width).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat_n(' ', width - len));
    out
}

/// Encode text as Latin-1 bytes for the RDS buffers.
///
/// Characters outside Latin-1 become `?`.
pub fn to_latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Decode Latin-1 bytes received over UECP.
pub fn from_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
