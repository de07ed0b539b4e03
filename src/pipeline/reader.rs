//! Tolerant loading of a single delimited export.
//!
//! A file that cannot be used yields `None` plus a `warn!` naming the file and
//! the reason; nothing is raised past this boundary.

use crate::models::RecordSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Files smaller than this are treated as empty exports.
pub const MIN_FILE_BYTES: u64 = 10;

const ZERO_WIDTH: [char; 5] = ['\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}', '\u{feff}'];

/// Why a file produced no data.
#[derive(Debug, Error)]
pub enum ReadFailure {
    #[error("file is {0} bytes, below the {MIN_FILE_BYTES} byte minimum")]
    TooSmall(u64),

    #[error("cannot read file: {0}")]
    Unreadable(String),

    #[error("no encoding produced a parsable table")]
    Undecodable,

    #[error("parsed zero data rows")]
    NoRows,
}

/// Text encodings tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8, with or without a byte-order mark
    Utf8,
    /// UTF-16 with a byte-order mark, or BOM-less little-endian ASCII-range text
    Utf16,
    /// Windows-1252 single-byte fallback; every byte maps to a char and the
    /// five bytes cp1252 leaves undefined keep their Latin-1 code point
    Windows1252,
}

const CP1252_HIGH: [char; 32] = [
    '\u{20ac}', '\u{81}', '\u{201a}', '\u{192}', '\u{201e}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{2c6}', '\u{2030}', '\u{160}', '\u{2039}', '\u{152}', '\u{8d}', '\u{17d}', '\u{8f}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201c}', '\u{201d}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{2dc}', '\u{2122}', '\u{161}', '\u{203a}', '\u{153}', '\u{9d}', '\u{17e}', '\u{178}',
];

fn cp1252_char(byte: u8) -> char {
    match byte {
        0x80..=0x9F => CP1252_HIGH[(byte - 0x80) as usize],
        _ => byte as char,
    }
}

impl TextEncoding {
    pub const FALLBACK_ORDER: [TextEncoding; 3] =
        [TextEncoding::Utf8, TextEncoding::Utf16, TextEncoding::Windows1252];

    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => {
                let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
                // NUL bytes mean UTF-16 without a BOM, not text
                if body.contains(&0) {
                    return None;
                }
                std::str::from_utf8(body).ok().map(str::to_string)
            }
            TextEncoding::Utf16 => decode_utf16(bytes),
            TextEncoding::Windows1252 => Some(bytes.iter().map(|&b| cp1252_char(b)).collect()),
        }
    }
}

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    let (body, little_endian) = if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        (rest, true)
    } else if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        (rest, false)
    } else if bytes.len() >= 4 && bytes[1] == 0 && bytes[3] == 0 {
        (bytes, true)
    } else {
        return None;
    };

    if body.len() % 2 != 0 {
        return None;
    }

    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();

    String::from_utf16(&units).ok()
}

/// Strip surrounding whitespace and zero-width characters from a header.
pub fn sanitize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Sanitize all headers and suffix repeats with `.1`, `.2`, ...
pub fn sanitize_headers<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = Vec::new();
    for header in raw {
        let base = sanitize_header(header);
        let mut name = base.clone();
        let mut n = 0;
        while out.contains(&name) {
            n += 1;
            name = format!("{}.{}", base, n);
        }
        out.push(name);
    }
    out
}

/// Parse decoded text as a comma-delimited table with a header row.
///
/// Rows with more fields than the header are skipped; short rows are padded
/// with empty cells.
pub fn parse_table(text: &str, source: &Path) -> Option<RecordSet> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers = match reader.headers() {
        Ok(h) => sanitize_headers(h.iter()),
        Err(e) => {
            debug!("Header parse failed for {}: {}", source.display(), e);
            return None;
        }
    };
    if headers.iter().all(|h| h.is_empty()) {
        return None;
    }

    let width = headers.len();
    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        if record.len() > width {
            skipped += 1;
            continue;
        }
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(width, String::new());
        rows.push(row);
    }

    if skipped > 0 {
        debug!("Skipped {} malformed lines in {}", skipped, source.display());
    }

    Some(RecordSet::new(source, headers, rows))
}

/// Read a file, reporting why it could not be used.
pub fn try_read_records(path: &Path) -> std::result::Result<RecordSet, ReadFailure> {
    let size = std::fs::metadata(path)
        .map_err(|e| ReadFailure::Unreadable(e.to_string()))?
        .len();
    if size < MIN_FILE_BYTES {
        return Err(ReadFailure::TooSmall(size));
    }

    let bytes = std::fs::read(path).map_err(|e| ReadFailure::Unreadable(e.to_string()))?;

    for encoding in TextEncoding::FALLBACK_ORDER {
        let Some(text) = encoding.decode(&bytes) else {
            continue;
        };
        if let Some(set) = parse_table(&text, path) {
            if set.is_empty() {
                return Err(ReadFailure::NoRows);
            }
            if encoding != TextEncoding::Utf8 {
                debug!("Read {} as {:?}", path.display(), encoding);
            }
            return Ok(set);
        }
    }

    Err(ReadFailure::Undecodable)
}

/// Read a file or return the "no data" signal, logging the reason.
pub fn read_records(path: &Path) -> Option<RecordSet> {
    match try_read_records(path) {
        Ok(set) => Some(set),
        Err(reason) => {
            warn!("Skipping {}: {}", path.display(), reason);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn strips_whitespace_and_zero_width_from_headers() {
        assert_eq!(sanitize_header(" \u{200b}Basis\u{feff} "), "Basis");
        assert_eq!(
            sanitize_headers(["Mid", " Mid", "Type", "Mid\u{200b}"]),
            vec!["Mid", "Mid.1", "Type", "Mid.2"]
        );
    }

    #[test]
    fn reads_utf8_with_bom_and_skips_long_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let body = "\u{feff} Basis ,Type,Curve_Date,Mid\n\
                    NYMEX,ATM,2024-01-02,0.4\n\
                    NYMEX,ATM,2024-01-03,0.4,extra,cells\n\
                    NYMEX,ATM,2024-01-04\n";
        fs::write(&path, body).unwrap();

        let set = read_records(&path).unwrap();
        assert_eq!(set.headers, vec!["Basis", "Type", "Curve_Date", "Mid"]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.rows[1], vec!["NYMEX", "ATM", "2024-01-04", ""]);
    }

    #[test]
    fn falls_back_to_utf16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utf16.csv");
        let text = "Basis,Type,Curve_Date,Mid\nHSC,HIST,2024-02-01,0.5\n";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        fs::write(&path, bytes).unwrap();

        let set = read_records(&path).unwrap();
        assert_eq!(set.headers[0], "Basis");
        assert_eq!(set.rows[0][0], "HSC");
    }

    #[test]
    fn bomless_utf16_is_not_taken_for_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utf16_nobom.csv");
        let text = "Basis,Type,Curve_Date,Mid\nHSC,HIST,2024-02-01,0.5\n";
        let bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert!(TextEncoding::Utf8.decode(&bytes).is_none());
        fs::write(&path, bytes).unwrap();

        let set = read_records(&path).unwrap();
        assert_eq!(set.headers, vec!["Basis", "Type", "Curve_Date", "Mid"]);
        assert_eq!(set.rows[0][0], "HSC");
        assert_eq!(set.rows[0][3], "0.5");
    }

    #[test]
    fn single_byte_fallback_uses_windows_1252() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp1252.csv");
        let mut bytes = b"Basis,Type,Curve_Date,Mid\n".to_vec();
        bytes.extend_from_slice(b"TRANSCO Z6 \x96 NY,ATM,2024-02-01,0.5\n");
        bytes.extend_from_slice(b"PG&E \x92CG\x92,ATM,2024-02-01,0.6\n");
        fs::write(&path, bytes).unwrap();

        let set = read_records(&path).unwrap();
        assert_eq!(set.rows[0][0], "TRANSCO Z6 \u{2013} NY");
        assert_eq!(set.rows[1][0], "PG&E \u{2019}CG\u{2019}");
        assert_eq!(
            TextEncoding::Windows1252.decode(&[0x80, 0x81, 0x9F, 0xE9]).unwrap(),
            "\u{20ac}\u{81}\u{178}\u{e9}"
        );
    }

    #[test]
    fn falls_back_to_single_byte_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.csv");
        let mut bytes = b"Basis,Type,Curve_Date,Mid\nPG&E CITYGATE,ATM,2024-02-01,0.5\n".to_vec();
        bytes.extend_from_slice(b"SOCAL \xe9,ATM,2024-02-01,0.6\n");
        fs::write(&path, bytes).unwrap();

        let set = read_records(&path).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.rows[1][0], "SOCAL \u{e9}");
    }

    #[test]
    fn tiny_and_header_only_files_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let tiny = dir.path().join("tiny.csv");
        fs::write(&tiny, "a,b\n").unwrap();
        assert!(matches!(try_read_records(&tiny), Err(ReadFailure::TooSmall(4))));
        assert!(read_records(&tiny).is_none());

        let header_only = dir.path().join("header.csv");
        fs::write(&header_only, "Basis,Type,Curve_Date,Mid\n").unwrap();
        assert!(matches!(try_read_records(&header_only), Err(ReadFailure::NoRows)));

        let missing = dir.path().join("missing.csv");
        assert!(matches!(try_read_records(&missing), Err(ReadFailure::Unreadable(_))));
    }
}
