// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Log line normalization.
//!
//! Every line leaving a log producer passes through [`format_log_line`]:
//! trailing whitespace is trimmed, ANSI SGR color codes are stripped, and the
//! engine's nanosecond timestamp prefix is compressed to whole seconds with a
//! tab separating it from the message. The function is idempotent on its own
//! output, so re-formatting an already formatted line is harmless.

/// Normalize one raw log line. Returns `None` for lines that reduce to
/// nothing and should be dropped.
pub fn format_log_line(raw: &str) -> Option<String> {
    let stripped = strip_ansi_sgr(raw);
    let trimmed = stripped.trim_end();
    if trimmed.is_empty() {
        return None;
    }
    Some(compress_timestamp(trimmed))
}

/// Remove ANSI SGR sequences (`ESC [ ... m`). Other escape sequences are
/// left alone; game servers only emit color codes in practice.
pub fn strip_ansi_sgr(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x1b && i + 1 < bytes.len() && bytes[i + 1] == b'[' {
            // Scan for the terminating 'm'; bail out if the sequence never
            // terminates and keep the bytes verbatim.
            let mut j = i + 2;
            while j < bytes.len() && (bytes[j].is_ascii_digit() || bytes[j] == b';') {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'm' {
                i = j + 1;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Compress a leading `YYYY-MM-DDTHH:MM:SS.fracZ ` prefix to
/// `YYYY-MM-DDTHH:MM:SSZ\t`. Lines without the prefix pass through.
fn compress_timestamp(line: &str) -> String {
    let bytes = line.as_bytes();
    // Seconds part: "YYYY-MM-DDTHH:MM:SS" is 19 bytes.
    if bytes.len() < 19 || !is_timestamp_prefix(bytes) {
        return line.to_string();
    }

    let mut pos = 19;
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        let frac_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == frac_start {
            return line.to_string();
        }
    }
    if pos >= bytes.len() || bytes[pos] != b'Z' {
        return line.to_string();
    }
    pos += 1;
    if pos >= bytes.len() || bytes[pos] != b' ' {
        return line.to_string();
    }

    format!("{}Z\t{}", &line[..19], &line[pos + 1..])
}

fn is_timestamp_prefix(bytes: &[u8]) -> bool {
    const DIGITS: [usize; 14] = [0, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18];
    DIGITS.iter().all(|&i| bytes[i].is_ascii_digit())
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[10] == b'T'
        && bytes[13] == b':'
        && bytes[16] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_passthrough() {
        assert_eq!(
            format_log_line("Server started").as_deref(),
            Some("Server started")
        );
    }

    #[test]
    fn test_trailing_whitespace_trimmed() {
        assert_eq!(format_log_line("done  \r").as_deref(), Some("done"));
    }

    #[test]
    fn test_empty_and_whitespace_dropped() {
        assert!(format_log_line("").is_none());
        assert!(format_log_line("   \t ").is_none());
    }

    #[test]
    fn test_timestamp_compressed() {
        let raw = "2025-06-01T10:30:45.123456789Z [INFO] ready";
        assert_eq!(
            format_log_line(raw).as_deref(),
            Some("2025-06-01T10:30:45Z\t[INFO] ready")
        );
    }

    #[test]
    fn test_timestamp_without_fraction_compressed() {
        let raw = "2025-06-01T10:30:45Z ready";
        assert_eq!(
            format_log_line(raw).as_deref(),
            Some("2025-06-01T10:30:45Z\tready")
        );
    }

    #[test]
    fn test_non_timestamp_prefix_untouched() {
        let raw = "2025-06-01 server did a thing";
        assert_eq!(format_log_line(raw).as_deref(), Some(raw));
    }

    #[test]
    fn test_ansi_sgr_stripped() {
        let raw = "\x1b[32mINFO\x1b[0m ready";
        assert_eq!(format_log_line(raw).as_deref(), Some("INFO ready"));
    }

    #[test]
    fn test_unterminated_escape_kept() {
        let raw = "odd \x1b[32";
        assert_eq!(format_log_line(raw).as_deref(), Some("odd \x1b[32"));
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let inputs = [
            "2025-06-01T10:30:45.999Z \x1b[31mERROR\x1b[0m boom  ",
            "2025-06-01T10:30:45Z plain",
            "no timestamp at all",
        ];
        for input in inputs {
            let once = format_log_line(input).unwrap();
            let twice = format_log_line(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }
}
