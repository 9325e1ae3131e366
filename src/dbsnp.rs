use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;

use crate::schema::{chr_key, ChrKey};

/// One row of a dbSNP side-table: `(Chr, BP, rsID, REF, ALT, FREQ)`. `ALT`
/// is kept as the raw comma-separated string; `FREQ` as the raw
/// `freq=DB1:f0,f1,...|DB2:f0,f1,...` string, parsed lazily.
#[derive(Debug, Clone, PartialEq)]
pub struct DbRow {
    pub chr: String,
    pub bp: i64,
    pub rsid: String,
    pub r#ref: String,
    pub alt: String,
    pub freq: String,
}

impl DbRow {
    fn parse(line: &str, rsid_first: bool) -> Option<Self> {
        let mut f = line.split('\t');
        if rsid_first {
            let rsid = f.next()?.to_string();
            let chr = f.next()?.to_string();
            let bp = f.next()?.parse().ok()?;
            let r#ref = f.next()?.to_string();
            let alt = f.next()?.to_string();
            let freq = f.next().unwrap_or(".").to_string();
            Some(DbRow { chr, bp, rsid, r#ref, alt, freq })
        } else {
            let chr = f.next()?.to_string();
            let bp = f.next()?.parse().ok()?;
            let rsid = f.next()?.to_string();
            let r#ref = f.next()?.to_string();
            let alt = f.next()?.to_string();
            let freq = f.next().unwrap_or(".").to_string();
            Some(DbRow { chr, bp, rsid, r#ref, alt, freq })
        }
    }

    pub fn chrbp_key(&self) -> (ChrKey, i64) {
        (chr_key(&self.chr), self.bp)
    }

    /// All alleles in `REF, ALT...` order, matching the frequency list's
    /// indexing convention.
    pub fn alleles(&self) -> Vec<&str> {
        std::iter::once(self.r#ref.as_str())
            .chain(self.alt.split(','))
            .collect()
    }
}

/// A forward-only cursor over a gzipped dbSNP side-table, used by the
/// merge-join resolvers. `DB1` is sorted by `(Chr,BP)`; `DB2` by `rsID`.
pub struct DbCursor {
    lines: Box<dyn Iterator<Item = std::io::Result<String>>>,
    rsid_first: bool,
    peeked: Option<Option<DbRow>>,
}

impl DbCursor {
    pub fn open(path: &Path, rsid_first: bool) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("opening dbSNP side-table {}", path.display()))?;
        let reader = BufReader::new(MultiGzDecoder::new(f));
        Ok(Self {
            lines: Box::new(reader.lines()),
            rsid_first,
            peeked: None,
        })
    }

    /// Returns the current row without advancing, reading one line of
    /// lookahead on first access.
    pub fn peek(&mut self) -> Option<&DbRow> {
        if self.peeked.is_none() {
            let next = self.advance_raw();
            self.peeked = Some(next);
        }
        self.peeked.as_ref().unwrap().as_ref()
    }

    /// Consumes and returns the current row, advancing the cursor.
    pub fn next(&mut self) -> Option<DbRow> {
        match self.peeked.take() {
            Some(v) => v,
            None => self.advance_raw(),
        }
    }

    fn advance_raw(&mut self) -> Option<DbRow> {
        loop {
            let line = self.lines.next()?.ok()?;
            if line.is_empty() {
                continue;
            }
            if let Some(row) = DbRow::parse(&line, self.rsid_first) {
                return Some(row);
            }
        }
    }
}

/// Parses a `FREQ` cell of the form `freq=DB1:f0,f1,...|DB2:f0,f1,...`
/// into a map from database slug to its frequency list.
pub fn parse_freq(freq: &str) -> HashMap<String, Vec<String>> {
    let mut out = HashMap::new();
    let body = freq.strip_prefix("freq=").unwrap_or(freq);
    for entry in body.split('|') {
        if let Some((slug, values)) = entry.split_once(':') {
            out.insert(
                slug.to_string(),
                values.split(',').map(|s| s.to_string()).collect(),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_freq_cell() {
        let freq = "freq=dbGaP_PopFreq:0.8,0.2|gnomAD:0.75,0.25";
        let parsed = parse_freq(freq);
        assert_eq!(parsed["dbGaP_PopFreq"], vec!["0.8", "0.2"]);
        assert_eq!(parsed["gnomAD"], vec!["0.75", "0.25"]);
    }

    #[test]
    fn alleles_orders_ref_before_alt() {
        let row = DbRow {
            chr: "1".into(),
            bp: 100,
            rsid: "rs1".into(),
            r#ref: "A".into(),
            alt: "G,T".into(),
            freq: ".".into(),
        };
        assert_eq!(row.alleles(), vec!["A", "G", "T"]);
    }
}
