/// The Standard Schema: the fixed, ordered column set every internal stage
/// reads and writes. Order matters — it is also the on-disk TSV column order.
pub const SCHEMA_FIELDS: [&str; 12] = [
    "rsID", "Chr", "BP", "EA", "OA", "EAF", "OR", "beta", "SE", "pval", "N", "INFO",
];

pub const RSID: usize = 0;
pub const CHR: usize = 1;
pub const BP: usize = 2;
pub const EA: usize = 3;
pub const OA: usize = 4;
pub const EAF: usize = 5;
pub const OR: usize = 6;
pub const BETA: usize = 7;
pub const SE: usize = 8;
pub const PVAL: usize = 9;
pub const N: usize = 10;
pub const INFO: usize = 11;

pub const NUM_SCHEMA_FIELDS: usize = SCHEMA_FIELDS.len();

/// One data row: the twelve Standard Schema cells plus any passthrough
/// columns carried along verbatim from the raw input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub cells: [String; NUM_SCHEMA_FIELDS],
    pub passthrough: Vec<String>,
}

impl Row {
    pub fn new(cells: [String; NUM_SCHEMA_FIELDS], passthrough: Vec<String>) -> Self {
        Self { cells, passthrough }
    }

    /// Builds a row from tab-split fields. A row short on one or more
    /// Standard Schema columns is never a stage-level failure (spec §7:
    /// row defects are counted, not fatal) — missing cells are padded
    /// empty, which the Validator then flags as invalid for whichever
    /// fields were actually absent.
    pub fn from_fields(fields: &[&str]) -> Self {
        let mut cells: [String; NUM_SCHEMA_FIELDS] = Default::default();
        for (i, cell) in cells.iter_mut().enumerate() {
            *cell = fields.get(i).copied().unwrap_or("").to_string();
        }
        let passthrough = fields
            .get(NUM_SCHEMA_FIELDS..)
            .unwrap_or(&[])
            .iter()
            .map(|s| s.to_string())
            .collect();
        Row::new(cells, passthrough)
    }

    pub fn to_tsv_line(&self) -> String {
        let mut parts: Vec<&str> = self.cells.iter().map(|s| s.as_str()).collect();
        parts.extend(self.passthrough.iter().map(|s| s.as_str()));
        parts.join("\t")
    }

    pub fn rsid(&self) -> &str {
        &self.cells[RSID]
    }
    pub fn chr(&self) -> &str {
        &self.cells[CHR]
    }
    pub fn bp(&self) -> &str {
        &self.cells[BP]
    }
}

/// Sentinel tokens treated as null on input: empty, whitespace, `.`, `-`,
/// `na`, `nan` (case-insensitive).
pub fn is_null(val: &str) -> bool {
    let trimmed = val.trim();
    trimmed.is_empty()
        || matches!(
            trimmed.to_ascii_lowercase().as_str(),
            "." | "-" | "na" | "nan"
        )
}

pub const SENTINEL: &str = ".";

/// Total order key over chromosome tokens: known tokens (`1`..`23`, `X`,
/// `Y`, `M`, case-insensitive, leading zeros tolerated) sort before any
/// unrecognized token, which sorts lexicographically among themselves.
///
/// `Known` must be declared before `Unknown` so the derived `Ord` puts
/// every known chromosome ahead of every unknown one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChrKey {
    Known(u8),
    Unknown(String),
}

pub fn chr_key(token: &str) -> ChrKey {
    let stripped = strip_chr_prefix(token);
    let normalized = stripped.trim_start_matches('0');
    let canonical = if normalized.is_empty() { "0" } else { normalized };

    if let Ok(n) = canonical.parse::<u8>() {
        if (1..=23).contains(&n) {
            return ChrKey::Known(n);
        }
    }
    match stripped.to_ascii_uppercase().as_str() {
        "X" => ChrKey::Known(24),
        "Y" => ChrKey::Known(25),
        "M" => ChrKey::Known(26),
        _ => ChrKey::Unknown(stripped.to_ascii_lowercase()),
    }
}

/// Strips a leading `chr`/`Chr`/`CHR` prefix, if present.
pub fn strip_chr_prefix(token: &str) -> &str {
    if token.len() > 3 && token[..3].eq_ignore_ascii_case("chr") {
        &token[3..]
    } else {
        token
    }
}

pub fn is_valid_chr(token: &str) -> bool {
    if is_null(token) {
        return false;
    }
    matches!(chr_key(token), ChrKey::Known(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chromosomes_order_before_unknown() {
        assert!(chr_key("22") < chr_key("X"));
        assert!(chr_key("X") < chr_key("Y"));
        assert!(chr_key("Y") < chr_key("M"));
        assert!(chr_key("M") < chr_key("GL000220.1"));
    }

    #[test]
    fn leading_zero_and_chr_prefix_are_equivalent() {
        assert_eq!(chr_key("1"), chr_key("01"));
        assert_eq!(chr_key("chr1"), chr_key("1"));
        assert_eq!(chr_key("x"), chr_key("X"));
    }

    #[test]
    fn chromosome_order_is_total() {
        let tokens = ["1", "2", "22", "23", "X", "Y", "M", "GL1", "GL2"];
        for a in tokens {
            for b in tokens {
                let (ka, kb) = (chr_key(a), chr_key(b));
                let lt = ka < kb;
                let gt = ka > kb;
                let eq = ka == kb;
                assert_eq!([lt, gt, eq].iter().filter(|x| **x).count(), 1);
            }
        }
    }

    #[test]
    fn is_null_recognizes_all_sentinel_forms() {
        for tok in ["", " ", ".", "-", "na", "NA", "nan", "NaN"] {
            assert!(is_null(tok), "{tok:?} should be null");
        }
        assert!(!is_null("rs12"));
    }

    #[test]
    fn from_fields_pads_a_short_row_instead_of_failing() {
        let row = Row::from_fields(&["rs1", "1", "100"]);
        assert_eq!(row.cells[RSID], "rs1");
        assert_eq!(row.cells[CHR], "1");
        assert_eq!(row.cells[BP], "100");
        assert_eq!(row.cells[EA], "");
        assert_eq!(row.cells[INFO], "");
        assert!(row.passthrough.is_empty());
    }
}
