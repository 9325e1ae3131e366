use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{Build, FormatConfig};
use crate::errors::StageError;
use crate::format;
use crate::liftover::ChainMap;
use crate::report;
use crate::resolve::{self, ActivatedResolvers};
use crate::schema::{Row, CHR};
use crate::sort::{self, SortKey};
use crate::validate::{self, Report};

/// The nine fields the orchestrator's planning and termination checks
/// reason about; `OR`, `N`, `INFO` are validated but never restored by the
/// core, so they play no part in planning (matching the original tool's
/// `issues` dict, which never carried them either).
const RESOLVABLE_FIELDS: [&str; 9] =
    ["rsID", "Chr", "BP", "EA", "OA", "EAF", "SE", "beta", "pval"];

/// All inputs to one `fix` invocation, mirroring the CLI surface of §6.
pub struct FixOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub dbsnp1: Option<PathBuf>,
    pub dbsnp2: Option<PathBuf>,
    pub chain_file: Option<PathBuf>,
    pub freq_db: String,
    pub restore: Vec<String>,
    pub do_not_restore: Vec<String>,
    pub verbose: bool,
}

/// Strips the last `.`-delimited extension and appends `suffix`, matching
/// the original tool's `remove_last_ext(filename) + suffix` intermediate
/// file naming convention.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.to_string_lossy().into_owned();
    if let Some(pos) = s.rfind('.') {
        s.truncate(pos);
    }
    s.push_str(suffix);
    PathBuf::from(s)
}

fn read_rows(path: &Path) -> Result<(String, Vec<Row>)> {
    let reader = BufReader::new(
        File::open(path).with_context(|| format!("opening {}", path.display()))?,
    );
    let mut lines = reader.lines();
    let header = lines
        .next()
        .with_context(|| format!("{} has no header line", path.display()))??;
    let mut rows = Vec::new();
    for line in lines {
        let line = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        rows.push(Row::from_fields(&fields));
    }
    Ok((header, rows))
}

fn write_rows(path: &Path, header: &str, rows: &[Row]) -> Result<()> {
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );
    writeln!(writer, "{header}")?;
    for row in rows {
        writeln!(writer, "{}", row.to_tsv_line())?;
    }
    writer.flush()?;
    Ok(())
}

fn validate_rows(rows: &[Row]) -> (Report, validate::PvalHistogram) {
    let cells: Vec<[String; 12]> = rows.iter().map(|r| r.cells.clone()).collect();
    validate::validate_rows(&cells)
}

fn pct(count: u64, total: u64) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    let frac = count as f64 / total as f64;
    if frac < 0.0001 {
        "<0.01%".to_string()
    } else {
        format!("{:.2}%", frac * 100.0)
    }
}

/// Whether `field` will actually be attempted this run: it must have an
/// invalid entry, its resolver must be activated, and the dbSNP side-table
/// its restoration depends on (if any) must have been supplied. Mirrors
/// `gonna_resolve` in the original orchestrator.
fn gonna_resolve(field: &str, report: &Report, opts: &FixOptions, activated: &ActivatedResolvers) -> bool {
    let has_issue = report.has_any_invalid(field);
    if !has_issue {
        return false;
    }
    match field {
        // Chr/BP are restored together, from DB2 (rsID-sorted side table).
        "Chr" | "BP" => opts.dbsnp2.is_some() && activated.chrbp,
        // rsID is restored from DB1 (Chr,BP-sorted side table).
        "rsID" => opts.dbsnp1.is_some() && activated.rsid,
        "OA" => (opts.dbsnp1.is_some() || opts.dbsnp2.is_some()) && activated.oa,
        "EA" => (opts.dbsnp1.is_some() || opts.dbsnp2.is_some()) && activated.ea,
        "EAF" => (opts.dbsnp1.is_some() || opts.dbsnp2.is_some()) && activated.eaf,
        "SE" => activated.se,
        "beta" => activated.beta,
        "pval" => activated.pval,
        _ => false,
    }
}

fn any_issues_to_resolve(report: &Report, opts: &FixOptions, activated: &ActivatedResolvers) -> bool {
    RESOLVABLE_FIELDS
        .iter()
        .any(|f| gonna_resolve(f, report, opts, activated))
}

fn has_any_issues(report: &Report) -> bool {
    RESOLVABLE_FIELDS.iter().any(|f| report.has_any_invalid(f))
}

/// Narrows the statistical-backfill activation flags to the ones whose
/// pass-wide precondition actually holds: `resolve-SE` is pointless to run
/// over every row if `beta` or `pval` are entirely invalid, since it could
/// never succeed. Mirrors the original's resolver-list assembly step.
fn activatable_for_stats(report: &Report, activated: &ActivatedResolvers) -> ActivatedResolvers {
    let mut a = *activated;
    a.se = a.se
        && report.has_any_invalid("SE")
        && !report.entirely_invalid("beta")
        && !report.entirely_invalid("pval");
    a.beta = a.beta
        && report.has_any_invalid("beta")
        && !report.entirely_invalid("SE")
        && !report.entirely_invalid("pval");
    a.pval = a.pval
        && report.has_any_invalid("pval")
        && !report.entirely_invalid("beta")
        && !report.entirely_invalid("SE");
    a
}

fn log_missing(report: &Report, fields: &[&str]) {
    for field in fields {
        let n = report.invalid(field);
        if n > 0 {
            log::info!("{}/{} entries are missing {}", n, report.total_entries, field);
        }
    }
}

/// Logs the per-field restored/lost tally between two reports, matching
/// the original's post-pass console summary.
fn log_deltas(before: &Report, after: &Report) {
    let total = after.total_entries;
    for field in RESOLVABLE_FIELDS {
        let prev = before.invalid(field);
        let now = after.invalid(field);
        if prev == now {
            continue;
        }
        if now < prev {
            let restored = prev - now;
            log::info!("restored {} ({}) \"{}\" fields", restored, pct(restored, total), field);
        } else {
            let lost = now - prev;
            log::info!("lost {} ({}) \"{}\" fields", lost, pct(lost, total), field);
        }
    }
}

fn cleanup(intermediate_files: &[PathBuf], verbose: bool) {
    if verbose {
        return;
    }
    for path in intermediate_files {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_dir_all(path);
    }
}

/// Runs one merge-join + statistical-backfill pass over `rows` in place,
/// using `sort_key` to decide which dbSNP side-table (if any) pairs with
/// the current sort order. This is the single-threaded, single-logical-
/// actor Resolvers stage of §4.4.
fn run_fix_pass(
    rows: &mut [Row],
    sort_key: Option<SortKey>,
    opts: &FixOptions,
    activated: &ActivatedResolvers,
    report: &Report,
) -> Result<()> {
    match sort_key {
        Some(SortKey::ChrBp) => {
            if let Some(db1) = &opts.dbsnp1 {
                resolve::merge_join_db1(rows, db1, activated, &opts.freq_db)?;
            }
        }
        Some(SortKey::RsId) => {
            if let Some(db2) = &opts.dbsnp2 {
                resolve::merge_join_db2(rows, db2, activated, &opts.freq_db)?;
            }
        }
        None => {}
    }

    let gated = activatable_for_stats(report, activated);
    let pb = progress_bar(rows.len() as u64, "resolving statistical fields");
    for row in rows.iter_mut() {
        resolve::resolve_statistical(row, &gated);
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(())
}

/// A row-count progress bar matching the teacher's `indicatif` style;
/// ticks once per row for the row-by-row stages (the merge-join resolvers
/// stream against their side-table cursor and don't get one, since their
/// cost is dominated by I/O rather than by row count alone).
fn progress_bar(len: u64, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(message);
    pb
}

/// Drives the full `FORMAT -> DIAGNOSE0 -> PLAN -> [LIFTOVER?] -> [SORT?]
/// -> FIX1 -> DIAGNOSE1 -> PLAN2 -> [SORT?] -> FIX2 -> DIAGNOSE2 -> DONE`
/// state machine of §4.5, returning the path of the final output file.
pub fn run_fix(opts: &FixOptions) -> Result<PathBuf, StageError> {
    let mut activated = ActivatedResolvers::default();
    activated.apply_overrides(&opts.restore, &opts.do_not_restore);
    if activated.beta {
        log::warn!(
            "if standard error field is provided without a sign, then restored beta will be unsigned."
        );
    }

    let mut intermediate_files: Vec<PathBuf> = Vec::new();

    // STATE: FORMAT
    let config_path = FormatConfig::sibling_path(&opts.input);
    let config = FormatConfig::load(&config_path).map_err(StageError::Format)?;
    let mut build = config.build().map_err(StageError::Format)?;
    build = crate::config::resolve_build(build).map_err(StageError::Format)?;
    log::info!("input build: {build:?}");

    let standard_path = with_suffix(&opts.input, "_standard.tsv");
    format::format_file(&opts.input, &config, &standard_path).map_err(StageError::Format)?;

    // STATE: DIAGNOSE0
    let (header, mut rows) = read_rows(&standard_path).map_err(StageError::Diagnose)?;
    let (report0, _hist0) = validate_rows(&rows);

    // STATE: PLAN (liftover decision)
    let mut prepared_path = standard_path.clone();
    let mut chrbp_lost = 0u64;
    if !build.is_hg38() {
        if let Some(chain_path) = &opts.chain_file {
            let can_liftover = !report0.entirely_invalid("BP") && !report0.entirely_invalid("Chr");
            if can_liftover {
                let chain = ChainMap::load(chain_path).map_err(StageError::Plan)?;
                let before_valid = rows.iter().filter(|r| crate::schema::is_valid_chr(&r.cells[CHR])).count();
                for row in rows.iter_mut() {
                    resolve::liftover_row(row, &chain);
                }
                let after_valid = rows.iter().filter(|r| crate::schema::is_valid_chr(&r.cells[CHR])).count();
                chrbp_lost = before_valid.saturating_sub(after_valid) as u64;
                build = Build::Hg38;
                log::info!("finished liftover to hg38");
                if chrbp_lost > 0 {
                    log::info!(
                        "lost {} ({}) \"Chr\"/\"BP\" fields after liftover",
                        chrbp_lost,
                        pct(chrbp_lost, report0.total_entries)
                    );
                }
                let lifted_path = with_suffix(&opts.input, "_standard_lifted.tsv");
                write_rows(&lifted_path, &header, &rows).map_err(StageError::Plan)?;
                intermediate_files.push(standard_path.clone());
                prepared_path = lifted_path;
            } else if opts.dbsnp2.is_some() {
                build = Build::Hg38;
                log::info!(
                    "There's no need for liftover since all Chr and BP will be attempted to be restored in the target build"
                );
            } else {
                log::warn!(
                    "Impossible to perform liftover. Liftover requires at least 1 entry with both valid Chr and BP. dbSNP2 wasn't passed, so Chr and BP will not be restored."
                );
            }
        }
    }

    // STATE: PLAN (sort-key decision)
    let mut sort_key: Option<SortKey> = None;
    if (gonna_resolve("BP", &report0, opts, &activated)
        || gonna_resolve("Chr", &report0, opts, &activated)
        || gonna_resolve("EAF", &report0, opts, &activated))
        && !report0.entirely_invalid("rsID")
    {
        sort_key = Some(SortKey::RsId);
        log_missing(&report0, &["Chr", "BP"]);
        log::info!("Going to sort the GWAS SS file by rsID");
        let sorted_path = with_suffix(&opts.input, "_standard_sorted.tsv");
        sort::sort_file(&prepared_path, &sorted_path, SortKey::RsId).map_err(StageError::Plan)?;
        intermediate_files.push(prepared_path.clone());
        prepared_path = sorted_path;
    } else if (gonna_resolve("rsID", &report0, opts, &activated)
        || gonna_resolve("OA", &report0, opts, &activated)
        || gonna_resolve("EA", &report0, opts, &activated)
        || gonna_resolve("EAF", &report0, opts, &activated))
        && !report0.entirely_invalid("Chr")
        && !report0.entirely_invalid("BP")
    {
        sort_key = Some(SortKey::ChrBp);
        log_missing(&report0, &["rsID", "OA", "EA"]);
        log::info!("Going to sort the GWAS SS file by Chr and BP");
        let sorted_path = with_suffix(&opts.input, "_standard_sorted.tsv");
        sort::sort_file(&prepared_path, &sorted_path, SortKey::ChrBp).map_err(StageError::Plan)?;
        intermediate_files.push(prepared_path.clone());
        prepared_path = sorted_path;
    }

    // Early termination: nothing to do.
    if !has_any_issues(&report0) && chrbp_lost == 0 {
        log::info!("The input summary statistics file doesn't seem to have any issues!");
        log::info!("all {} SNPs are good", report0.total_entries);
        return finalize(&prepared_path, &intermediate_files, opts);
    }
    if !has_any_issues(&report0) && chrbp_lost > 0 {
        log::info!("The input file has nothing to resolve");
        return finalize(&prepared_path, &intermediate_files, opts);
    }
    if !any_issues_to_resolve(&report0, opts, &activated) {
        log::info!("The input file has nothing to resolve");
        return finalize(&prepared_path, &intermediate_files, opts);
    }

    // STATE: FIX1
    let (_, mut rows) = read_rows(&prepared_path).map_err(StageError::FixPass1)?;
    run_fix_pass(&mut rows, sort_key, opts, &activated, &report0).map_err(StageError::FixPass1)?;
    let rehab1_path = PathBuf::from(format!("{}.rehabed.tsv", opts.output.display()));
    write_rows(&rehab1_path, &header, &rows).map_err(StageError::FixPass1)?;
    intermediate_files.push(prepared_path.clone());

    // STATE: DIAGNOSE1
    let (report1, _hist1) = validate_rows(&rows);
    log_deltas(&report0, &report1);

    if !has_any_issues(&report1) {
        log::info!("All issues with all data points have been resolved!");
        log::info!("all {} SNP entries are good", report1.total_entries);
        return finalize(&rehab1_path, &intermediate_files, opts);
    }

    // STATE: PLAN2
    let needs_second_pass = sort_key != Some(SortKey::ChrBp)
        && (gonna_resolve("rsID", &report1, opts, &activated)
            || gonna_resolve("OA", &report1, opts, &activated)
            || gonna_resolve("EA", &report1, opts, &activated)
            || gonna_resolve("EAF", &report1, opts, &activated))
        && !report0.entirely_invalid("Chr")
        && !report0.entirely_invalid("BP");

    if !needs_second_pass {
        log::info!("Those issues which were possible to resolve have been resolved");
        return finalize(&rehab1_path, &intermediate_files, opts);
    }

    log_missing(&report1, &["rsID", "OA", "EA"]);
    log::info!("Going to sort the GWAS SS file by Chr and BP");
    let sorted2_path = with_suffix(&opts.input, "_standard_sorted2.tsv");
    sort::sort_file(&rehab1_path, &sorted2_path, SortKey::ChrBp).map_err(StageError::Plan2)?;

    // STATE: FIX2
    let (_, mut rows) = read_rows(&sorted2_path).map_err(StageError::FixPass2)?;
    run_fix_pass(&mut rows, Some(SortKey::ChrBp), opts, &activated, &report1).map_err(StageError::FixPass2)?;
    let rehab2_path = PathBuf::from(format!("{}.rehabed-twice.tsv", opts.output.display()));
    write_rows(&rehab2_path, &header, &rows).map_err(StageError::FixPass2)?;
    intermediate_files.push(sorted2_path);
    intermediate_files.push(rehab1_path.clone());

    // STATE: DIAGNOSE2
    let (report2, _hist2) = validate_rows(&rows);
    log_deltas(&report1, &report2);

    if !has_any_issues(&report2) {
        log::info!("All issues with all data points have been resolved!");
        log::info!("all {} SNP entries are good", report2.total_entries);
    } else {
        log::info!("Those issues which were possible to resolve have been resolved");
    }

    finalize(&rehab2_path, &intermediate_files, opts)
}

/// Moves `result_file` to `opts.output` and deletes intermediates, unless
/// `--verbose` was passed (in which case every intermediate stays on
/// disk and the result file itself is left where it is).
fn finalize(result_file: &Path, intermediate_files: &[PathBuf], opts: &FixOptions) -> Result<PathBuf, StageError> {
    if opts.verbose {
        log::info!("see fixed file at: \"{}\"", result_file.display());
        return Ok(result_file.to_path_buf());
    }
    cleanup(intermediate_files, opts.verbose);
    std::fs::rename(result_file, &opts.output)
        .or_else(|_| std::fs::copy(result_file, &opts.output).map(|_| ()).and_then(|_| std::fs::remove_file(result_file)))
        .map_err(|e| StageError::Finalize(anyhow::Error::new(e)))?;
    log::info!("see fixed file at: \"{}\"", opts.output.display());
    Ok(opts.output.clone())
}

/// Runs the `diagnose` subcommand: formats the input if it has a sibling
/// config (otherwise assumes it is already standardized), validates every
/// row, prints the pval-bucket histogram, and optionally persists the
/// report directory.
pub fn run_diagnose(input: &Path, report_dir: Option<&Path>) -> Result<()> {
    let config_path = FormatConfig::sibling_path(input);
    let working_path;
    let mut standard_tmp = None;
    if config_path.is_file() {
        let config = FormatConfig::load(&config_path)?;
        let standard_path = with_suffix(input, "_standard.tsv");
        format::format_file(input, &config, &standard_path)?;
        standard_tmp = Some(standard_path.clone());
        working_path = standard_path;
    } else {
        log::info!("there's no corresponding .json file, so the Standard Schema column order is assumed");
        working_path = input.to_path_buf();
    }

    let (_header, rows) = read_rows(&working_path)?;
    let (rep, hist) = validate_rows(&rows);

    if has_any_issues(&rep) {
        log::info!("found issues:");
        for field in RESOLVABLE_FIELDS {
            let n = rep.invalid(field);
            if n > 0 {
                log::info!("    {}: {}/{} ({})", field, n, rep.total_entries, pct(n, rep.total_entries));
            }
        }
    } else {
        log::info!("The input summary statistics file doesn't seem to have any issues!");
    }

    log::info!("pval bucket histogram:");
    for (label, count) in validate::PVAL_TICK_LABELS.iter().zip(hist.counts.iter()) {
        log::info!("    <= {}: {}", label, count);
    }

    if let Some(dir) = report_dir {
        report::write_report_to_dir(&rep, dir)?;
    }

    if let Some(tmp) = standard_tmp {
        let _ = std::fs::remove_file(tmp);
    }

    Ok(())
}

/// Runs the `sort` subcommand: formats the input first if it has a
/// sibling config, then sorts by the requested key.
pub fn run_sort(input: &Path, output: &Path, by: SortKey) -> Result<()> {
    let config_path = FormatConfig::sibling_path(input);
    if config_path.is_file() {
        let config = FormatConfig::load(&config_path)?;
        let unsorted_path = PathBuf::from(format!("{}.unsorted.tsv", output.display()));
        format::format_file(input, &config, &unsorted_path)?;
        sort::sort_file(&unsorted_path, output, by)?;
        let _ = std::fs::remove_file(unsorted_path);
    } else {
        log::info!("there's no corresponding .json file, so the Standard Schema column order is assumed");
        sort::sort_file(input, output, by)?;
    }
    Ok(())
}

/// Runs the `prepare_dbSNPs` subcommand: a thin wrapper shelling out to
/// `bcftools` (VCF query) and `gz-sort` (external-memory sort), producing
/// `DB1` (`(Chr,BP)`-sorted) and `DB2` (`rsID`-sorted) side-tables, exactly
/// like the original tool's shell pipeline.
pub fn run_prepare_dbsnps(
    dbsnp: &Path,
    output_base: &Path,
    gz_sort: &Path,
    bcftools: &Path,
    buffer: &str,
) -> Result<()> {
    let db1_path = format!("{}.1.tsv.gz", output_base.display());
    let db2_unsorted = format!("{}.2.unsorted.tsv.gz", output_base.display());
    let db2_path = format!("{}.2.tsv.gz", output_base.display());

    log::info!("=== Preparing DB1 ===");
    let query = format!(
        "\"{}\" query -f '%CHROM\t%POS\t%ID\t%REF\t%ALT\tfreq=%FREQ\n' \"{}\" | awk -F $'\\t' '{{if ($0 ~ /^chr/) {{print substr($0,4)}} else {{print $0}} }}' | gzip > \"{}\"",
        bcftools.display(),
        dbsnp.display(),
        db1_path,
    );
    run_bash(&query)?;

    log::info!("=== Preparing DB2 ===");
    let paste = format!(
        "paste -d$'\\t' <(gunzip -c \"{db1_path}\" | cut -d$'\\t' -f3) <(gunzip -c \"{db1_path}\" | cut -d$'\\t' -f1-2,4-6) | gzip > \"{db2_unsorted}\""
    );
    run_bash(&paste)?;
    let sort = format!(
        "\"{}\" -S {} \"{}\" \"{}\"",
        gz_sort.display(),
        buffer,
        db2_unsorted,
        db2_path,
    );
    run_bash(&sort)?;
    let _ = std::fs::remove_file(&db2_unsorted);

    Ok(())
}

fn run_bash(script: &str) -> Result<()> {
    let status = std::process::Command::new("bash")
        .arg("-c")
        .arg(script)
        .status()
        .context("spawning bash for dbSNP preprocessing")?;
    if !status.success() {
        bail!("command failed with exit code {:?}: {script}", status.code());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(pairs: &[(&str, u64)], total: u64) -> Report {
        let mut r = Report { total_entries: total, ..Default::default() };
        for (f, c) in pairs {
            r.invalid_counts.insert((*f).to_string(), *c);
        }
        r
    }

    fn base_opts() -> FixOptions {
        FixOptions {
            input: PathBuf::from("/tmp/in.tsv"),
            output: PathBuf::from("/tmp/out.tsv"),
            dbsnp1: Some(PathBuf::from("/tmp/db1.tsv.gz")),
            dbsnp2: Some(PathBuf::from("/tmp/db2.tsv.gz")),
            chain_file: None,
            freq_db: "dbGaP_PopFreq".to_string(),
            restore: vec![],
            do_not_restore: vec![],
            verbose: false,
        }
    }

    #[test]
    fn gonna_resolve_requires_matching_dbsnp_table() {
        let opts = FixOptions { dbsnp1: None, ..base_opts() };
        let report = report_with(&[("rsID", 5)], 10);
        let activated = ActivatedResolvers::default();
        assert!(!gonna_resolve("rsID", &report, &opts, &activated));
    }

    #[test]
    fn gonna_resolve_true_when_table_present_and_activated() {
        let opts = base_opts();
        let report = report_with(&[("rsID", 5)], 10);
        let activated = ActivatedResolvers::default();
        assert!(gonna_resolve("rsID", &report, &opts, &activated));
    }

    #[test]
    fn with_suffix_strips_rightmost_extension_only() {
        assert_eq!(
            with_suffix(Path::new("/data/input.tsv"), "_standard.tsv"),
            PathBuf::from("/data/input_standard.tsv")
        );
        assert_eq!(
            with_suffix(Path::new("/data/input.tsv.gz"), "_standard.tsv"),
            PathBuf::from("/data/input.tsv_standard.tsv")
        );
    }

    #[test]
    fn activatable_for_stats_disables_se_when_beta_entirely_invalid() {
        let report = report_with(&[("SE", 5), ("beta", 10)], 10);
        let activated = ActivatedResolvers::default();
        let gated = activatable_for_stats(&report, &activated);
        assert!(!gated.se);
    }
}
