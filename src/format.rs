use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;

use crate::config::{ColumnSource, FormatConfig};
use crate::schema::SCHEMA_FIELDS;

/// The three archive kinds the raw input file may arrive as. Detected by
/// magic number rather than `libmagic`, since the latter is a poor fit for
/// a statically-linked binary and these are the only three cases the
/// original tool's own fallback paths ever hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Gzip,
    Zip,
    Plain,
}

pub fn sniff_archive_kind(path: &Path) -> Result<ArchiveKind> {
    let mut f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut magic = [0u8; 4];
    let n = f.read(&mut magic)?;
    if n == 0 {
        bail!("input file is empty: {}", path.display());
    }
    if n >= 2 && magic[0] == 0x1f && magic[1] == 0x8b {
        Ok(ArchiveKind::Gzip)
    } else if n >= 4 && &magic == b"PK\x03\x04" {
        Ok(ArchiveKind::Zip)
    } else {
        Ok(ArchiveKind::Plain)
    }
}

/// Opens the raw input file as a line reader, transparently unpacking gzip.
/// Zip archives are out of scope for this in-process reader (the original
/// tool shells out to unzip the largest member; callers that need that
/// should pre-extract) — we still classify them via `sniff_archive_kind` so
/// callers get a clear error instead of parsing the archive bytes as TSV.
pub fn open_text_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    match sniff_archive_kind(path)? {
        ArchiveKind::Gzip => {
            let f = File::open(path)?;
            Ok(Box::new(BufReader::new(MultiGzDecoder::new(f))))
        }
        ArchiveKind::Zip => bail!(
            "{} is a zip archive; extract it before passing it to the formatter",
            path.display()
        ),
        ArchiveKind::Plain => {
            let f = File::open(path)?;
            Ok(Box::new(BufReader::new(f)))
        }
    }
}

/// Projects one raw row (already split on tabs) onto the Standard Schema
/// order, applying the per-field transforms from the spec: stripped `chr`
/// prefix, upcased alleles, coerced BP, weighted-mean EAF.
pub fn project_row(raw: &[&str], config: &FormatConfig) -> Vec<String> {
    let mut out = Vec::with_capacity(SCHEMA_FIELDS.len() + config.other.len());

    for field in SCHEMA_FIELDS {
        let cell = match config.columns.get(field) {
            Some(ColumnSource::Index(idx)) => raw.get(*idx).copied().unwrap_or(""),
            Some(ColumnSource::WeightedIndices(_)) if field != "EAF" => "",
            _ => "",
        };
        let transformed = match field {
            "Chr" => crate::schema::strip_chr_prefix(cell.trim_end_matches('\r')).to_string(),
            "BP" => coerce_bp(cell.trim_end_matches('\r')),
            "EA" | "OA" => cell.trim_end_matches('\r').to_ascii_uppercase(),
            _ => cell.trim_end_matches('\r').to_string(),
        };
        out.push(transformed);
    }

    if let Some(ColumnSource::WeightedIndices(weights)) = config.columns.get("EAF") {
        out[crate::schema::EAF] = weighted_eaf(raw, weights);
    }

    for &idx in &config.other {
        out.push(raw.get(idx).copied().unwrap_or("").trim_end_matches('\r').to_string());
    }

    out
}

/// Coerces a numeric cell (possibly scientific notation) to a plain
/// integer string; non-numeric input is left untouched so the validator
/// can flag it as invalid.
fn coerce_bp(cell: &str) -> String {
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() => format!("{}", v.trunc() as i64),
        _ => cell.to_string(),
    }
}

/// `Σ wᵢ·xᵢ / Σ wᵢ`; any non-numeric source cell invalidates the whole
/// average (sentinel `.`).
fn weighted_eaf(raw: &[&str], weights: &HashMap<String, f64>) -> String {
    let mut num = 0.0;
    let mut den = 0.0;
    for (idx_str, w) in weights {
        let idx: usize = match idx_str.parse() {
            Ok(i) => i,
            Err(_) => return ".".to_string(),
        };
        let cell = match raw.get(idx) {
            Some(c) => *c,
            None => return ".".to_string(),
        };
        let x: f64 = match cell.trim().parse() {
            Ok(x) => x,
            Err(_) => return ".".to_string(),
        };
        num += w * x;
        den += w;
    }
    if den == 0.0 {
        return ".".to_string();
    }
    format!("{}", num / den)
}

/// Runs the Formatter end to end: reads `input` (auto-detecting gzip),
/// projects every row onto the Standard Schema order using `config`, and
/// streams the result to `output` with a header that carries each
/// passthrough column's own source-file label through when it has one,
/// synthesizing `col_<index>` only for headerless columns.
pub fn format_file(input: &Path, config: &FormatConfig, output: &Path) -> Result<usize> {
    let reader = open_text_reader(input)?;
    let mut writer = std::io::BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );

    let mut lines = reader.lines();
    let raw_header = lines.next().transpose()?.unwrap_or_default();
    let raw_header: Vec<&str> = raw_header.split('\t').collect();

    let mut header_fields: Vec<String> = SCHEMA_FIELDS
        .iter()
        .map(|f| {
            if config.columns.contains_key(*f) {
                f.to_string()
            } else {
                format!("{f}_rehab")
            }
        })
        .collect();
    for &idx in &config.other {
        // Carry the source file's own header cell through unmodified when
        // it has one; only headerless columns get a synthesized label.
        let label = raw_header
            .get(idx)
            .filter(|cell| !cell.is_empty())
            .map(|cell| cell.to_string())
            .unwrap_or_else(|| format!("col_{idx}"));
        header_fields.push(label);
    }
    writeln!(writer, "{}", header_fields.join("\t"))?;

    let mut n = 0usize;
    for line in lines {
        let line = line?;
        let raw: Vec<&str> = line.split('\t').collect();
        let projected = project_row(&raw, config);
        writeln!(writer, "{}", projected.join("\t"))?;
        n += 1;
    }
    writer.flush()?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(columns: &[(&str, usize)]) -> FormatConfig {
        let mut map = HashMap::new();
        for (k, v) in columns {
            map.insert(k.to_string(), ColumnSource::Index(*v));
        }
        FormatConfig {
            build: "hg38".to_string(),
            columns: map,
            other: vec![],
        }
    }

    #[test]
    fn chr_prefix_is_stripped_and_alleles_upcased() {
        let config = cfg(&[("Chr", 0), ("EA", 1), ("OA", 2)]);
        let raw = vec!["chr7", "a", "g"];
        let row = project_row(&raw, &config);
        assert_eq!(row[crate::schema::CHR], "7");
        assert_eq!(row[crate::schema::EA], "A");
        assert_eq!(row[crate::schema::OA], "G");
    }

    #[test]
    fn missing_field_is_empty() {
        let config = cfg(&[("Chr", 0)]);
        let raw = vec!["1"];
        let row = project_row(&raw, &config);
        assert_eq!(row[crate::schema::RSID], "");
    }

    #[test]
    fn weighted_eaf_average() {
        let mut columns = HashMap::new();
        let mut weights = HashMap::new();
        weights.insert("0".to_string(), 1.0);
        weights.insert("1".to_string(), 3.0);
        columns.insert("EAF".to_string(), ColumnSource::WeightedIndices(weights));
        let config = FormatConfig {
            build: "hg38".to_string(),
            columns,
            other: vec![],
        };
        let raw = vec!["0.1", "0.5"];
        let row = project_row(&raw, &config);
        let eaf: f64 = row[crate::schema::EAF].parse().unwrap();
        assert!((eaf - (0.1 * 1.0 + 0.5 * 3.0) / 4.0).abs() < 1e-9);
    }

    #[test]
    fn passthrough_header_carries_source_label_through() {
        let mut config = cfg(&[("Chr", 0)]);
        config.other = vec![1, 2];

        let input = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(input.path(), "chrom\tcohort\t\nchr1\tUKBB\tx\n").unwrap();
        let output = tempfile::NamedTempFile::new().unwrap();

        format_file(input.path(), &config, output.path()).unwrap();
        let written = std::fs::read_to_string(output.path()).unwrap();
        let header = written.lines().next().unwrap();
        let fields: Vec<&str> = header.split('\t').collect();

        assert_eq!(fields[fields.len() - 2], "cohort");
        assert_eq!(fields[fields.len() - 1], "col_2");
    }
}
