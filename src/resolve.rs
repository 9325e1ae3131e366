use std::path::Path;

use anyhow::Result;

use crate::dbsnp::{parse_freq, DbCursor, DbRow};
use crate::liftover::ChainMap;
use crate::schema::{chr_key, is_null, Row, BP, CHR, EA, EAF, OA, RSID, SENTINEL};
use crate::stats;
use crate::validate::{is_valid_allele, is_valid_bp, is_valid_chr, is_valid_eaf, is_valid_finite_float, is_valid_pval};

/// Which per-field restorations are permitted this pass. Defaults match
/// the spec: every resolver on except the unsigned `beta` back-fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivatedResolvers {
    pub chrbp: bool,
    pub rsid: bool,
    pub oa: bool,
    pub ea: bool,
    pub eaf: bool,
    pub beta: bool,
    pub se: bool,
    pub pval: bool,
}

impl Default for ActivatedResolvers {
    fn default() -> Self {
        Self {
            chrbp: true,
            rsid: true,
            oa: true,
            ea: true,
            eaf: true,
            beta: false,
            se: true,
            pval: true,
        }
    }
}

impl ActivatedResolvers {
    pub fn apply_overrides(&mut self, restore: &[String], do_not_restore: &[String]) {
        for name in restore {
            self.set(name, true);
        }
        // do-not-restore takes priority over restore, per the original CLI contract.
        for name in do_not_restore {
            self.set(name, false);
        }
    }

    fn set(&mut self, name: &str, value: bool) {
        match name {
            "ChrBP" => self.chrbp = value,
            "rsID" => self.rsid = value,
            "OA" => self.oa = value,
            "EA" => self.ea = value,
            "EAF" => self.eaf = value,
            "beta" => self.beta = value,
            "SE" => self.se = value,
            "pval" => self.pval = value,
            _ => {}
        }
    }
}

/// `allele-complete`: runs when exactly one of `{EA, OA}` is valid, and
/// only when the field that is actually missing has its own resolver
/// activated — `--do-not-restore OA` must not be bypassed just because
/// `EA`'s flag is on.
pub fn allele_complete(row: &mut Row, r#ref: &str, alt: &str, activated: &ActivatedResolvers) {
    let ea_valid = is_valid_allele(&row.cells[EA]) && !is_null(&row.cells[EA]);
    let oa_valid = is_valid_allele(&row.cells[OA]) && !is_null(&row.cells[OA]);
    if ea_valid == oa_valid {
        return; // both or neither valid: nothing to complete
    }
    let (present_idx, missing_idx, missing_activated) = if ea_valid {
        (EA, OA, activated.oa)
    } else {
        (OA, EA, activated.ea)
    };
    if !missing_activated {
        return;
    }
    let present = row.cells[present_idx].to_ascii_uppercase();
    let alt_tokens: Vec<&str> = alt.split(',').collect();

    if present == r#ref.to_ascii_uppercase() {
        if let Some(first) = alt_tokens.first() {
            row.cells[missing_idx] = first.to_string();
        }
    } else if alt_tokens.iter().any(|t| t.eq_ignore_ascii_case(&present)) {
        row.cells[missing_idx] = r#ref.to_string();
    }
    // else: structural mismatch, leave as-is
}

/// `EAF-from-FREQ`: runs when `EAF` is invalid and `EA` is valid.
pub fn eaf_from_freq(row: &mut Row, db: &DbRow, slug: &str) {
    if is_valid_eaf(&row.cells[EAF]) || !is_valid_allele(&row.cells[EA]) || row.cells[EA] == SENTINEL {
        return;
    }
    let parsed = parse_freq(&db.freq);
    let alleles = db.alleles();
    let result = (|| {
        let freqs = parsed.get(slug)?;
        let idx = alleles
            .iter()
            .position(|a| a.eq_ignore_ascii_case(&row.cells[EA]))?;
        freqs.get(idx).cloned()
    })();
    row.cells[EAF] = result.unwrap_or_else(|| SENTINEL.to_string());
}

/// Statistical back-fill: `resolve-SE`, `resolve-beta` (unsigned),
/// `resolve-pval`. Each only fires when its own field is invalid and the
/// other two are valid; degenerate results are left as sentinel.
pub fn resolve_statistical(row: &mut Row, activated: &ActivatedResolvers) {
    let beta_valid = is_valid_finite_float(&row.cells[crate::schema::BETA]);
    let se_valid = is_valid_finite_float(&row.cells[crate::schema::SE]);
    let pval_valid = is_valid_pval(&row.cells[crate::schema::PVAL]);

    if activated.se && !se_valid && beta_valid && pval_valid {
        let beta: f64 = row.cells[crate::schema::BETA].parse().unwrap();
        let pval: f64 = row.cells[crate::schema::PVAL].parse().unwrap();
        let se = stats::resolve_se(beta, pval);
        row.cells[crate::schema::SE] = finite_or_sentinel(se);
    }
    if activated.beta && !beta_valid && se_valid && pval_valid {
        let se: f64 = row.cells[crate::schema::SE].parse().unwrap();
        let pval: f64 = row.cells[crate::schema::PVAL].parse().unwrap();
        let beta = stats::resolve_beta_unsigned(se, pval);
        row.cells[crate::schema::BETA] = finite_or_sentinel(beta);
    }
    if activated.pval && !pval_valid && beta_valid && se_valid {
        let beta: f64 = row.cells[crate::schema::BETA].parse().unwrap();
        let se: f64 = row.cells[crate::schema::SE].parse().unwrap();
        let pval = stats::resolve_pval(beta, se);
        row.cells[crate::schema::PVAL] = finite_or_sentinel(pval);
    }
}

fn finite_or_sentinel(v: f64) -> String {
    if v.is_finite() {
        format!("{v}")
    } else {
        SENTINEL.to_string()
    }
}

/// `liftover`: translates `(Chr,BP)` via the chain file; both fields
/// become sentinel on lookup failure.
pub fn liftover_row(row: &mut Row, chain: &ChainMap) {
    if !is_valid_chr(&row.cells[CHR]) || !is_valid_bp(&row.cells[BP]) {
        return;
    }
    let pos: u64 = match row.cells[BP].parse::<f64>() {
        Ok(v) if v >= 0.0 => v as u64,
        _ => return,
    };
    match chain.lift(&row.cells[CHR], pos) {
        Some((new_chr, new_bp)) => {
            row.cells[CHR] = new_chr;
            row.cells[BP] = new_bp.to_string();
        }
        None => {
            row.cells[CHR] = SENTINEL.to_string();
            row.cells[BP] = SENTINEL.to_string();
        }
    }
}

/// Outcome of one merge-join pass: per-field restored counts, used for the
/// orchestrator's post-pass tally.
#[derive(Debug, Clone, Default)]
pub struct MergeJoinStats {
    pub rsid_restored: u64,
    pub chrbp_restored: u64,
    pub allele_restored: u64,
    pub eaf_restored: u64,
}

/// Drives the two-pointer merge-join against DB1 `(Chr,BP)`-sorted side
/// table. `rows` must already be sorted by `(Chr,BP)` in the domain order.
/// Streams row-by-row: the GWAS rows and the single DB1 cursor are both
/// consumed by this one function, satisfying the "single logical actor"
/// ordering requirement.
pub fn merge_join_db1(
    rows: &mut [Row],
    db1_path: &Path,
    activated: &ActivatedResolvers,
    freq_slug: &str,
) -> Result<MergeJoinStats> {
    let mut cursor = DbCursor::open(db1_path, false)?;
    let mut stats = MergeJoinStats::default();

    for row in rows.iter_mut() {
        if !is_valid_chr(&row.cells[CHR]) || !is_valid_bp(&row.cells[BP]) {
            continue;
        }
        let g_key = (chr_key(&row.cells[CHR]), row.cells[BP].parse::<f64>().unwrap_or(0.0) as i64);

        loop {
            let Some(db_row) = cursor.peek() else { break };
            if db_row.chrbp_key() < g_key {
                cursor.next();
                continue;
            }
            break;
        }

        let Some(db_row) = cursor.peek() else { continue };
        if db_row.chrbp_key() != g_key {
            continue; // DB1 strictly greater (or exhausted for this key): leave row as-is
        }

        let db_row = db_row.clone();
        if activated.rsid && !crate::validate::is_valid_rsid(&row.cells[RSID]) {
            row.cells[RSID] = db_row.rsid.clone();
            stats.rsid_restored += 1;
        }
        if activated.ea || activated.oa {
            let before = row.cells[EA].clone() + &row.cells[OA];
            allele_complete(row, &db_row.r#ref, &db_row.alt, activated);
            if before != row.cells[EA].clone() + &row.cells[OA] {
                stats.allele_restored += 1;
            }
        }
        if activated.eaf {
            let before_valid = is_valid_eaf(&row.cells[EAF]);
            eaf_from_freq(row, &db_row, freq_slug);
            if !before_valid && is_valid_eaf(&row.cells[EAF]) {
                stats.eaf_restored += 1;
            }
        }
    }

    Ok(stats)
}

/// Merge-join against DB2 (`rsID`-sorted). `rows` must already be sorted
/// by `rsID` bytewise.
pub fn merge_join_db2(
    rows: &mut [Row],
    db2_path: &Path,
    activated: &ActivatedResolvers,
    freq_slug: &str,
) -> Result<MergeJoinStats> {
    let mut cursor = DbCursor::open(db2_path, true)?;
    let mut stats = MergeJoinStats::default();

    for row in rows.iter_mut() {
        if !crate::validate::is_valid_rsid(&row.cells[RSID]) {
            continue;
        }
        let g_rsid = row.cells[RSID].clone();

        loop {
            let Some(db_row) = cursor.peek() else { break };
            if db_row.rsid.as_str() < g_rsid.as_str() {
                cursor.next();
                continue;
            }
            break;
        }

        let Some(db_row) = cursor.peek() else { continue };
        if db_row.rsid != g_rsid {
            continue;
        }

        let db_row = db_row.clone();
        if activated.chrbp && (!is_valid_chr(&row.cells[CHR]) || !is_valid_bp(&row.cells[BP])) {
            row.cells[CHR] = db_row.chr.clone();
            row.cells[BP] = db_row.bp.to_string();
            stats.chrbp_restored += 1;
        }
        if activated.ea || activated.oa {
            let before = row.cells[EA].clone() + &row.cells[OA];
            allele_complete(row, &db_row.r#ref, &db_row.alt, activated);
            if before != row.cells[EA].clone() + &row.cells[OA] {
                stats.allele_restored += 1;
            }
        }
        if activated.eaf {
            let before_valid = is_valid_eaf(&row.cells[EAF]);
            eaf_from_freq(row, &db_row, freq_slug);
            if !before_valid && is_valid_eaf(&row.cells[EAF]) {
                stats.eaf_restored += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: [&str; 12]) -> Row {
        let mut arr: [String; 12] = Default::default();
        for (i, c) in cells.iter().enumerate() {
            arr[i] = c.to_string();
        }
        Row::new(arr, vec![])
    }

    #[test]
    fn allele_complete_picks_alt_when_present_equals_ref() {
        let mut r = row(["rs1", "1", "100", "A", ".", ".", ".", ".", ".", ".", ".", "."]);
        allele_complete(&mut r, "A", "G", &ActivatedResolvers::default());
        assert_eq!(r.cells[OA], "G");
    }

    #[test]
    fn allele_complete_picks_ref_when_present_is_an_alt_token() {
        let mut r = row(["rs1", "1", "100", "T", ".", ".", ".", ".", ".", ".", ".", "."]);
        allele_complete(&mut r, "G", "C,T", &ActivatedResolvers::default());
        assert_eq!(r.cells[OA], "G");
    }

    #[test]
    fn allele_complete_leaves_structural_mismatch_alone() {
        let mut r = row(["rs1", "1", "100", "C", ".", ".", ".", ".", ".", ".", ".", "."]);
        allele_complete(&mut r, "G", "A", &ActivatedResolvers::default());
        assert_eq!(r.cells[OA], ".");
    }

    #[test]
    fn allele_complete_respects_do_not_restore_on_missing_field() {
        let mut r = row(["rs1", "1", "100", "A", ".", ".", ".", ".", ".", ".", ".", "."]);
        let mut activated = ActivatedResolvers::default();
        activated.oa = false;
        allele_complete(&mut r, "A", "G", &activated);
        assert_eq!(r.cells[OA], ".", "OA is the missing field and its resolver is off");
    }

    #[test]
    fn eaf_from_freq_uses_configured_slug() {
        let mut r = row(["rs1", "1", "100", "A", "G", ".", ".", ".", ".", ".", ".", "."]);
        let db = DbRow {
            chr: "1".into(),
            bp: 100,
            rsid: "rs1".into(),
            r#ref: "A".into(),
            alt: "G".into(),
            freq: "freq=dbGaP_PopFreq:0.8,0.2".into(),
        };
        eaf_from_freq(&mut r, &db, "dbGaP_PopFreq");
        assert_eq!(r.cells[EAF], "0.8");
    }

    #[test]
    fn statistical_backfill_restores_se() {
        let mut r = row(["rs1", "1", "100", "A", "G", ".", ".", "0.1", ".", "0.05", ".", "."]);
        resolve_statistical(&mut r, &ActivatedResolvers::default());
        let se: f64 = r.cells[crate::schema::SE].parse().unwrap();
        assert!(se > 0.0);
    }

    #[test]
    fn statistical_backfill_does_not_touch_unsigned_beta_by_default() {
        let mut r = row(["rs1", "1", "100", "A", "G", ".", ".", ".", "0.05", "0.05", ".", "."]);
        resolve_statistical(&mut r, &ActivatedResolvers::default());
        assert_eq!(r.cells[crate::schema::BETA], ".");
    }
}
