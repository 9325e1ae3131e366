use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Genome assembly build. `hg38`/`grch38`/`38` and friends are all accepted,
/// case-insensitively, matching the original tool's environment-variable
/// contract (`build_num`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Build {
    Hg18,
    Hg19,
    Hg38,
}

impl Build {
    pub fn parse(token: &str) -> Result<Self> {
        match token.to_ascii_lowercase().as_str() {
            "hg38" | "grch38" | "38" => Ok(Build::Hg38),
            "hg19" | "grch37" | "37" => Ok(Build::Hg19),
            "hg18" | "ncbi36" | "36" => Ok(Build::Hg18),
            other => bail!("got unknown GWAS SS build: \"{other}\""),
        }
    }

    pub fn is_hg38(self) -> bool {
        matches!(self, Build::Hg38)
    }
}

/// The environment variable that may override the build read from the
/// column-mapping config.
pub const BUILD_ENV_VAR: &str = "build_num";

/// Reads `build_num` from the environment, if present, falling back to
/// `default` otherwise. A malformed override is a fatal usage error, not a
/// row-level one.
pub fn resolve_build(default: Build) -> Result<Build> {
    match std::env::var(BUILD_ENV_VAR) {
        Err(_) => Ok(default),
        Ok(val) => Build::parse(&val).context("invalid build_num environment variable"),
    }
}

/// How a Standard Schema field is populated by the Formatter: a single raw
/// column index, or — for `EAF` only — a weighted average over several
/// indices.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColumnSource {
    Index(usize),
    WeightedIndices(HashMap<String, f64>),
}

/// The per-input JSON column-mapping config (`<input>.json`). Field names
/// match the Standard Schema names; any absent field is left empty with a
/// synthesized `<field>_rehab` header.
#[derive(Debug, Clone, Deserialize)]
pub struct FormatConfig {
    pub build: String,
    #[serde(flatten)]
    pub columns: HashMap<String, ColumnSource>,
    #[serde(default)]
    pub other: Vec<usize>,
}

impl FormatConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading column-mapping config {}", path.display()))?;
        // Hand-edited configs are exactly the kind of slightly malformed
        // JSON (trailing commas, comments) this parser tolerates.
        let config: FormatConfig = serde_json_lenient::from_str(&text)
            .with_context(|| format!("parsing column-mapping config {}", path.display()))?;
        Ok(config)
    }

    pub fn build(&self) -> Result<Build> {
        Build::parse(&self.build)
    }

    /// Path convention: a GWAS SS file's config sits alongside it, named
    /// `<input>.json`.
    pub fn sibling_path(input: &Path) -> std::path::PathBuf {
        let mut name = input.as_os_str().to_os_string();
        name.push(".json");
        std::path::PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_accepts_all_known_aliases() {
        for tok in ["hg38", "GRCh38", "38", "hg19", "grch37", "37", "hg18", "ncbi36", "36"] {
            assert!(Build::parse(tok).is_ok(), "{tok} should parse");
        }
        assert!(Build::parse("hg99").is_err());
    }

    #[test]
    fn sibling_path_appends_json() {
        let p = FormatConfig::sibling_path(Path::new("/data/ss.tsv"));
        assert_eq!(p, std::path::PathBuf::from("/data/ss.tsv.json"));
    }
}
