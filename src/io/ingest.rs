//! Spectrum file ingest and normalization.
//!
//! Turns a delimited text table (first column wavelength or energy, one
//! absorption column per dataset) into a [`Spectrum`] on an eV axis.
//!
//! Design goals:
//! - **Tolerant preamble**: instrument headers, blank lines and `#` comments
//!   before the data are skipped
//! - **Strict body**: once data starts, every row must be numeric and the same
//!   width, and violations name the offending line (exit code 2)
//! - **Separation of concerns**: no fitting logic here

use std::fs;
use std::path::Path;

use crate::domain::{AxisUnit, Orientation, Spectrum, wavelength_to_energy};
use crate::error::AppError;

/// Column separator of the input table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    /// Any run of spaces/tabs.
    Whitespace,
}

impl Delimiter {
    /// Comma for `.csv` files (any case), whitespace otherwise.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Delimiter::Comma,
            _ => Delimiter::Whitespace,
        }
    }
}

/// Text encodings tried, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8Bom,
    Utf8,
    EucKr,
    Latin1,
}

impl TextEncoding {
    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8Bom => "utf-8-sig",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::EucKr => "cp949",
            TextEncoding::Latin1 => "latin-1",
        }
    }
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decode raw file bytes with the first encoding that accepts them.
///
/// Latin-1 maps every byte, so decoding itself never fails.
pub fn decode_bytes(bytes: &[u8]) -> (String, TextEncoding) {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        if let Ok(text) = std::str::from_utf8(rest) {
            return (text.to_string(), TextEncoding::Utf8Bom);
        }
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), TextEncoding::Utf8);
    }
    if let Some(text) = encoding_rs::EUC_KR.decode_without_bom_handling_and_without_replacement(bytes) {
        return (text.into_owned(), TextEncoding::EucKr);
    }
    (bytes.iter().map(|&b| b as char).collect(), TextEncoding::Latin1)
}

/// Read, decode and parse a spectrum file.
pub fn load_spectrum(path: &Path) -> Result<Spectrum, AppError> {
    let bytes = fs::read(path)
        .map_err(|e| AppError::ingest(format!("Failed to read '{}': {e}", path.display())))?;

    let (text, encoding) = decode_bytes(&bytes);
    log::debug!("decoded '{}' as {}", path.display(), encoding.label());

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "spectrum".to_string());

    let spectrum = parse_spectrum_text(&text, &name, Delimiter::for_path(path))
        .map_err(|e| AppError::ingest(format!("{}: {e}", path.display())))?;

    log::info!(
        "loaded '{}': {} points, {} dataset(s), axis in {} ({})",
        spectrum.name,
        spectrum.len(),
        spectrum.dataset_count(),
        spectrum.unit.label(),
        spectrum.orientation.label()
    );
    Ok(spectrum)
}

/// Parse an in-memory table.
pub fn parse_spectrum_text(text: &str, name: &str, delimiter: Delimiter) -> Result<Spectrum, AppError> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut width = 0usize;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tokens = split_tokens(trimmed, delimiter);

        if rows.is_empty() {
            // Still in the preamble until the first two tokens are numbers.
            let numeric_start = tokens.len() >= 2
                && tokens[0].parse::<f64>().is_ok()
                && tokens[1].parse::<f64>().is_ok();
            if !numeric_start {
                continue;
            }
        }

        let values = tokens
            .iter()
            .map(|t| {
                t.parse::<f64>()
                    .map_err(|_| AppError::ingest(format!("line {line_no}: invalid number '{t}'")))
            })
            .collect::<Result<Vec<f64>, AppError>>()?;

        if rows.is_empty() {
            width = values.len();
        } else if values.len() != width {
            return Err(AppError::ingest(format!(
                "line {line_no}: expected {width} columns, found {}",
                values.len()
            )));
        }
        rows.push(values);
    }

    if rows.is_empty() {
        return Err(AppError::ingest("no numeric data row found"));
    }

    let axis_raw: Vec<f64> = rows.iter().map(|r| r[0]).collect();
    let columns: Vec<Vec<f64>> = (1..width)
        .map(|c| rows.iter().map(|r| r[c]).collect())
        .collect();

    let unit = AxisUnit::detect(&axis_raw);
    let energy: Vec<f64> = match unit {
        AxisUnit::Nanometer => axis_raw.iter().map(|&nm| wavelength_to_energy(nm)).collect(),
        AxisUnit::ElectronVolt => axis_raw.clone(),
    };
    let orientation = Orientation::detect(&energy);

    Ok(Spectrum {
        name: name.to_string(),
        axis_raw,
        energy,
        unit,
        orientation,
        columns,
    })
}

fn split_tokens(line: &str, delimiter: Delimiter) -> Vec<&str> {
    match delimiter {
        Delimiter::Whitespace => line.split_whitespace().collect(),
        Delimiter::Comma => {
            let mut tokens: Vec<&str> = line.split(',').map(str::trim).collect();
            // Spreadsheet exports often end rows with a separator.
            if tokens.len() > 1 && tokens.last().is_some_and(|t| t.is_empty()) {
                tokens.pop();
            }
            tokens
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HC_EV_NM;

    #[test]
    fn delimiter_from_extension() {
        assert_eq!(Delimiter::for_path(Path::new("a/b.csv")), Delimiter::Comma);
        assert_eq!(Delimiter::for_path(Path::new("b.CSV")), Delimiter::Comma);
        assert_eq!(Delimiter::for_path(Path::new("b.txt")), Delimiter::Whitespace);
        assert_eq!(Delimiter::for_path(Path::new("noext")), Delimiter::Whitespace);
    }

    #[test]
    fn skips_preamble_and_comments() {
        let text = "Instrument: UV-3600\nWavelength\tAbs\n\n# comment\n2.3\t0.1\t0.2\n# mid comment\n2.4 0.3 0.4\n\n2.5\t0.5\t0.6\n";
        let s = parse_spectrum_text(text, "sample", Delimiter::Whitespace).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.dataset_count(), 2);
        assert_eq!(s.dataset(2), Some(&[0.2, 0.4, 0.6][..]));
        assert_eq!(s.unit, AxisUnit::ElectronVolt);
        assert_eq!(s.orientation, Orientation::Ascending);
        assert_eq!(s.name, "sample");
    }

    #[test]
    fn wavelength_axis_is_converted() {
        let text = "nm,A\n600,0.1\n500,0.2\n400,0.3\n";
        let s = parse_spectrum_text(text, "nm", Delimiter::Comma).unwrap();
        assert_eq!(s.unit, AxisUnit::Nanometer);
        assert_eq!(s.axis_raw, vec![600.0, 500.0, 400.0]);
        assert!((s.energy[0] - HC_EV_NM / 600.0).abs() < 1e-12);
        assert_eq!(s.orientation, Orientation::Ascending);
    }

    #[test]
    fn descending_energy_detected() {
        let text = "2.9 1\n2.8 2\n2.7 3\n";
        let s = parse_spectrum_text(text, "d", Delimiter::Whitespace).unwrap();
        assert_eq!(s.orientation, Orientation::Descending);
    }

    #[test]
    fn trailing_comma_is_ignored() {
        let text = "E,A,\n2.3,0.1,\n2.4,0.2,\n";
        let s = parse_spectrum_text(text, "t", Delimiter::Comma).unwrap();
        assert_eq!(s.dataset_count(), 1);
        assert_eq!(s.columns[0], vec![0.1, 0.2]);
    }

    #[test]
    fn malformed_row_names_line() {
        let text = "2.3 0.1\n2.4 abc\n";
        let err = parse_spectrum_text(text, "x", Delimiter::Whitespace).unwrap_err();
        assert!(matches!(err, AppError::Ingest(_)));
        assert!(err.to_string().contains("line 2"), "{err}");

        let text = "2.3 0.1 0.2\n2.4 0.3\n";
        let err = parse_spectrum_text(text, "x", Delimiter::Whitespace).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn no_numeric_rows_is_an_ingest_error() {
        for text in ["", "header only\n# c\n", "1.0\n2.0\n"] {
            let err = parse_spectrum_text(text, "x", Delimiter::Whitespace).unwrap_err();
            assert!(matches!(err, AppError::Ingest(_)));
        }
    }

    #[test]
    fn decodes_bom_utf8_euckr_and_latin1() {
        let (text, enc) = decode_bytes(b"\xEF\xBB\xBF2.3 0.1\n");
        assert_eq!(enc, TextEncoding::Utf8Bom);
        assert!(text.starts_with("2.3"));

        let (_, enc) = decode_bytes("파장 2.3 0.1\n".as_bytes());
        assert_eq!(enc, TextEncoding::Utf8);

        // Hangul header in EUC-KR.
        let (text, enc) = decode_bytes(b"\xC6\xC4\xC0\xE5\n2.3 0.1\n");
        assert_eq!(enc, TextEncoding::EucKr);
        assert!(text.ends_with("2.3 0.1\n"));

        // 0xFF is not a valid EUC-KR lead byte here.
        let (text, enc) = decode_bytes(b"\xFF\n2.3 0.1\n");
        assert_eq!(enc, TextEncoding::Latin1);
        assert!(text.starts_with('\u{ff}'));
    }

    #[test]
    fn load_reads_file_and_uses_stem() {
        let dir = std::env::temp_dir().join(format!("exciton-fit-ingest-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("film_A.csv");
        fs::write(&path, "Energy,Abs\n2.3,0.1\n2.4,0.2\n").unwrap();

        let s = load_spectrum(&path).unwrap();
        assert_eq!(s.name, "film_A");
        assert_eq!(s.len(), 2);

        let missing = load_spectrum(&dir.join("missing.txt")).unwrap_err();
        assert!(matches!(missing, AppError::Ingest(_)));
        fs::remove_dir_all(&dir).ok();
    }
}
