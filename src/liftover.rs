use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

use crate::schema::strip_chr_prefix;

/// One contiguous aligned block of a UCSC chain: `t_start..t_start+size`
/// in the source (`t`) assembly maps to `q_start..q_start+size` in the
/// target (`q`) assembly, same strand (reverse-strand chains are not
/// needed for the hg18/hg19 → hg38 liftovers this tool targets and are
/// rejected at load time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    t_start: u64,
    size: u64,
    q_start: u64,
}

/// A parsed chain file: per source-chromosome, a list of blocks sorted by
/// `t_start`, binary-searched per lookup. This is the one random-access
/// structure the spec's streaming model explicitly allows.
pub struct ChainMap {
    target_chrom: HashMap<String, String>,
    blocks: HashMap<String, Vec<Block>>,
}

impl ChainMap {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path).with_context(|| format!("opening chain file {}", path.display()))?);
        let mut target_chrom: HashMap<String, String> = HashMap::new();
        let mut blocks: HashMap<String, Vec<Block>> = HashMap::new();

        let mut cur_t_name: Option<String> = None;
        let mut cur_q_name: Option<String> = None;
        let mut cur_t_cursor: u64 = 0;
        let mut cur_q_cursor: u64 = 0;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                cur_t_name = None;
                continue;
            }
            if let Some(rest) = line.strip_prefix("chain ") {
                let fields: Vec<&str> = rest.split_whitespace().collect();
                // score tName tSize tStrand tStart tEnd qName qSize qStrand qStart qEnd id
                if fields.len() < 11 {
                    continue;
                }
                let t_name = fields[1].to_string();
                let t_strand = fields[3];
                let t_start: u64 = fields[4].parse().unwrap_or(0);
                let q_name = fields[6].to_string();
                let q_strand = fields[8];
                let q_start: u64 = fields[9].parse().unwrap_or(0);
                if t_strand != "+" || q_strand != "+" {
                    // Reverse-strand chains aren't needed for the
                    // assembly pairs this tool lifts between; skip.
                    cur_t_name = None;
                    continue;
                }
                target_chrom
                    .entry(strip_chr_prefix(&t_name).to_string())
                    .or_insert_with(|| strip_chr_prefix(&q_name).to_string());
                cur_t_name = Some(t_name);
                cur_q_name = Some(q_name);
                cur_t_cursor = t_start;
                cur_q_cursor = q_start;
                continue;
            }
            let Some(t_name) = &cur_t_name else { continue };
            let parts: Vec<&str> = line.split_whitespace().collect();
            let size: u64 = parts[0].parse().unwrap_or(0);
            blocks.entry(t_name.clone()).or_default().push(Block {
                t_start: cur_t_cursor,
                size,
                q_start: cur_q_cursor,
            });
            if parts.len() >= 3 {
                let dt: u64 = parts[1].parse().unwrap_or(0);
                let dq: u64 = parts[2].parse().unwrap_or(0);
                cur_t_cursor += size + dt;
                cur_q_cursor += size + dq;
            }
            let _ = &cur_q_name;
        }

        for v in blocks.values_mut() {
            v.sort_by_key(|b| b.t_start);
        }

        Ok(Self { target_chrom, blocks })
    }

    /// Looks up the first mapping for `(chr, pos)`, 1-based position,
    /// under whichever source-chromosome key the chain file used (with or
    /// without a `chr` prefix).
    pub fn lift(&self, chr: &str, pos: u64) -> Option<(String, u64)> {
        let bare = strip_chr_prefix(chr);
        let candidates = [chr.to_string(), bare.to_string(), format!("chr{bare}")];
        let (key, blocks) = candidates
            .iter()
            .find_map(|c| self.blocks.get(c).map(|b| (c.clone(), b)))?;

        let t_pos = pos.saturating_sub(1);
        let idx = blocks.partition_point(|b| b.t_start + b.size <= t_pos);
        let block = blocks.get(idx)?;
        if t_pos < block.t_start || t_pos >= block.t_start + block.size {
            return None;
        }
        let offset = t_pos - block.t_start;
        let new_chr = strip_chr_prefix(self.target_chrom.get(&key)?).to_string();
        Some((new_chr, block.q_start + offset + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_chain() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "chain 1000 chr1 249250621 + 99999 200000 chr1 248956422 + 164999 265000 1"
        )
        .unwrap();
        writeln!(f, "100000").unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn lifts_position_within_block() {
        let chain = ChainMap::load(sample_chain().path()).unwrap();
        let (chr, bp) = chain.lift("1", 100_000).unwrap();
        assert_eq!(chr, "1");
        assert_eq!(bp, 165_000);
    }

    #[test]
    fn unmapped_position_returns_none() {
        let chain = ChainMap::load(sample_chain().path()).unwrap();
        assert!(chain.lift("1", 10_000_000).is_none());
        assert!(chain.lift("GL000220.1", 1).is_none());
    }
}
