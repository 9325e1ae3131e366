use std::collections::HashMap;

use rayon::prelude::*;

use crate::schema::{is_null, is_valid_chr, SCHEMA_FIELDS};

/// Default p-value bucket boundaries, carried over from the original tool's
/// diagnostic histogram (bucket 0 is reserved for missing/invalid pval and
/// is not one of these intervals).
pub const PVAL_TICKS: [f64; 7] = [0.0, 1e-8, 1e-5, 1e-3, 0.03, 0.3, 1.0];
pub const PVAL_TICK_LABELS: [&str; 7] = ["0", "1e-8", "1e-5", "1e-3", ".03", ".3", "1"];

/// Per-field invalid-entry counts plus the row count they were computed
/// over. Field names are Standard Schema names; `total_entries` excludes
/// the header line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub invalid_counts: HashMap<String, u64>,
    pub total_entries: u64,
}

impl Report {
    pub fn invalid(&self, field: &str) -> u64 {
        *self.invalid_counts.get(field).unwrap_or(&0)
    }

    /// True when every row failed validation for `field` — signals a
    /// different restoration policy to the orchestrator's planner.
    pub fn entirely_invalid(&self, field: &str) -> bool {
        self.total_entries > 0 && self.invalid(field) == self.total_entries
    }

    pub fn has_any_invalid(&self, field: &str) -> bool {
        self.invalid(field) > 0
    }
}

/// `pval`-bucket histogram: bucket 0 is "missing/invalid", buckets 1..N are
/// the half-open intervals `(ticks[i-1], ticks[i]]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PvalHistogram {
    pub counts: Vec<u64>,
}

impl PvalHistogram {
    pub fn new() -> Self {
        Self {
            counts: vec![0; PVAL_TICKS.len()],
        }
    }

    fn record(&mut self, pval: Option<f64>) {
        match pval {
            None => self.counts[0] += 1,
            Some(p) => {
                for i in 1..PVAL_TICKS.len() {
                    if p > PVAL_TICKS[i - 1] && p <= PVAL_TICKS[i] {
                        self.counts[i] += 1;
                        return;
                    }
                }
                self.counts[0] += 1;
            }
        }
    }
}

pub fn is_valid_rsid(s: &str) -> bool {
    if is_null(s) {
        return false;
    }
    let s = s.as_bytes();
    s.len() > 2 && s[0] == b'r' && s[1] == b's' && s[2..].iter().all(u8::is_ascii_digit)
}

pub fn is_valid_bp(s: &str) -> bool {
    if is_null(s) {
        return false;
    }
    // The formatter coerces scientific notation to plain integer form;
    // downstream validation still tolerates it defensively (`int(float(x))`
    // in the original), matching Design Note (c)'s deliberate asymmetry.
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => true,
        _ => false,
    }
}

/// Effect/other allele validity: sentinel `.` is itself a valid value here
/// (it means "deletion / no nucleotide"), unlike the generic null check.
pub fn is_valid_allele(s: &str) -> bool {
    if s == "." {
        return true;
    }
    !s.is_empty() && s.bytes().all(|b| matches!(b.to_ascii_uppercase(), b'A' | b'T' | b'C' | b'G'))
}

pub fn is_valid_eaf(s: &str) -> bool {
    if is_null(s) {
        return false;
    }
    matches!(s.parse::<f64>(), Ok(v) if (0.0..=1.0).contains(&v))
}

pub fn is_valid_finite_float(s: &str) -> bool {
    if is_null(s) {
        return false;
    }
    matches!(s.parse::<f64>(), Ok(v) if v.is_finite())
}

pub fn is_valid_pval(s: &str) -> bool {
    if is_null(s) {
        return false;
    }
    matches!(s.parse::<f64>(), Ok(v) if v.is_finite() && (0.0..=1.0).contains(&v))
}

/// Validates one data row (schema cells only; passthroughs are untouched),
/// returning which Standard Schema fields failed and the parsed pval, if
/// any, for bucket stratification.
pub fn validate_row(cells: &[String]) -> ([bool; 12], Option<f64>) {
    let mut invalid = [false; 12];
    invalid[crate::schema::RSID] = !is_valid_rsid(&cells[crate::schema::RSID]);
    invalid[crate::schema::CHR] = !is_valid_chr(&cells[crate::schema::CHR]);
    invalid[crate::schema::BP] = !is_valid_bp(&cells[crate::schema::BP]);
    invalid[crate::schema::EA] = !is_valid_allele(&cells[crate::schema::EA]);
    invalid[crate::schema::OA] = !is_valid_allele(&cells[crate::schema::OA]);
    invalid[crate::schema::EAF] = !is_valid_eaf(&cells[crate::schema::EAF]);
    invalid[crate::schema::OR] = !is_valid_finite_float(&cells[crate::schema::OR]);
    invalid[crate::schema::BETA] = !is_valid_finite_float(&cells[crate::schema::BETA]);
    invalid[crate::schema::SE] = !is_valid_finite_float(&cells[crate::schema::SE]);
    invalid[crate::schema::PVAL] = !is_valid_pval(&cells[crate::schema::PVAL]);
    invalid[crate::schema::N] = !is_valid_finite_float(&cells[crate::schema::N]);
    invalid[crate::schema::INFO] = !is_valid_finite_float(&cells[crate::schema::INFO]);

    let pval = cells[crate::schema::PVAL].parse::<f64>().ok();
    (invalid, pval)
}

/// Validates every data row of a standardized TSV (already read into
/// memory as schema-cell rows), producing the field-level report and the
/// pval histogram. Row-level validation has no cross-row dependency, so
/// rows are checked in parallel and the per-field counts reduced
/// afterwards — the same row-parallel-then-merge shape the binary already
/// uses for its Nirvana-variant filtering pass.
pub fn validate_rows(rows: &[[String; 12]]) -> (Report, PvalHistogram) {
    let per_row: Vec<([bool; 12], Option<f64>)> = rows.par_iter().map(|r| validate_row(r)).collect();

    let mut invalid_counts: HashMap<String, u64> = HashMap::new();
    let mut histogram = PvalHistogram::new();

    for (invalid, pval) in &per_row {
        for (i, field) in SCHEMA_FIELDS.iter().enumerate() {
            if invalid[i] {
                *invalid_counts.entry((*field).to_string()).or_insert(0) += 1;
            }
        }
        histogram.record(*pval);
    }

    let report = Report {
        invalid_counts,
        total_entries: rows.len() as u64,
    };
    (report, histogram)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsid_requires_rs_prefix_and_digits() {
        assert!(is_valid_rsid("rs12345"));
        assert!(!is_valid_rsid("rs"));
        assert!(!is_valid_rsid("RS12"));
        assert!(!is_valid_rsid("."));
    }

    #[test]
    fn allele_sentinel_is_valid_but_not_null() {
        assert!(is_valid_allele("."));
        assert!(is_valid_allele("A"));
        assert!(is_valid_allele("ATG"));
        assert!(!is_valid_allele(""));
        assert!(!is_valid_allele("N"));
    }

    #[test]
    fn eaf_and_pval_ranges() {
        assert!(is_valid_eaf("0.5"));
        assert!(!is_valid_eaf("1.5"));
        assert!(is_valid_pval("1"));
        assert!(!is_valid_pval("-0.1"));
    }

    #[test]
    fn report_orthogonality_never_exceeds_total() {
        let rows: Vec<[String; 12]> = vec![
            [
                "rs1".into(), "1".into(), "100".into(), "A".into(), "G".into(), ".".into(),
                ".".into(), "0.1".into(), "0.05".into(), "0.01".into(), "100".into(), "0.9".into(),
            ],
            [
                ".".into(), ".".into(), "abc".into(), "A".into(), "G".into(), "0.2".into(),
                ".".into(), "0.1".into(), "0.05".into(), "0.01".into(), "100".into(), "0.9".into(),
            ],
        ];
        let (report, _) = validate_rows(&rows);
        for field in SCHEMA_FIELDS {
            assert!(report.invalid(field) <= report.total_entries);
        }
        assert_eq!(report.invalid("rsID"), 1);
        assert_eq!(report.invalid("Chr"), 1);
        assert_eq!(report.invalid("BP"), 1);
    }
}
