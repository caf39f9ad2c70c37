//! # Bref4 Writer
//!
//! Writes phased, non-missing genotypes to a bref4 file. Records
//! accumulate in an in-progress block until the sequence coder rejects a
//! record or the chromosome changes; the block is then handed to a single
//! serializer thread, which builds the hierarchical map chains and appends
//! the framed block bytes and its index record. Serialization order equals
//! input order, so the byte offsets recorded in the index are exact.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::debug;

use crate::data::bref_rec::BrefRec;
use crate::data::ints::IndexArray;
use crate::data::rec::RefGTRec;
use crate::data::{ChromIdx, ChromIds};
use crate::error::{Bref4Error, Result};
use crate::io::bits::{
    write_i32, write_packed_array, write_restricted_int, write_u32, write_utf, SENTINEL_BYTE,
};
use crate::io::header::Bref4Header;
use crate::io::index;
use crate::model::seq_coder::{SeqCoder, MAX_N_ALLELES};

/// Number of queued blocks after which record ingestion blocks on the
/// serializer.
const SERIALIZER_QUEUE_LEN: usize = 16;

/// A block may hold at most `i32::MAX` records (its record count is a
/// 4-byte field).
const MAX_BLOCK_RECS: usize = i32::MAX as usize;

/// Tunable encoding parameters
#[derive(Clone, Debug)]
pub struct EncodingParams {
    /// Each coder level has `2^bits_per_level` times the capacity of the
    /// level below it.
    pub bits_per_level: u32,
    /// Records with at most this many non-major allele carriers are stored
    /// sparsely. `None` derives the threshold from the haplotype count.
    pub max_nonmajor: Option<u32>,
}

impl Default for EncodingParams {
    fn default() -> Self {
        Self {
            bits_per_level: 2,
            max_nonmajor: None,
        }
    }
}

/// Capacities of the coder levels, level 0 largest.
///
/// Capacities start at 16 and grow by `2^bits_per_level` while they do not
/// exceed half the haplotype count (the sample count).
fn level_caps(n_haps: usize, bits_per_level: u32) -> Vec<u32> {
    let half = (n_haps / 2) as u64;
    let mut caps = Vec::new();
    let mut cap: u64 = 16;
    while cap <= half {
        caps.push(cap as u32);
        cap <<= bits_per_level;
    }
    caps.reverse();
    caps
}

/// Default sparse-storage threshold: `max(4, 4 * (floor(log2(n_haps)) - 11))`.
fn default_max_nonmajor(n_haps: usize) -> usize {
    let floor_log2 = (usize::BITS - 1 - n_haps.leading_zeros()) as i64;
    4.max(4 * (floor_log2 - 11)) as usize
}

/// Resolved per-file encoding policy
#[derive(Clone, Debug)]
struct EncodingPolicy {
    level_caps: Vec<u32>,
    max_maps: usize,
    top_cap: usize,
    max_nonmajor: usize,
    max_map_rec_n_alleles: usize,
}

impl EncodingPolicy {
    fn new(n_haps: usize, params: &EncodingParams) -> Result<Self> {
        if params.bits_per_level < 1 {
            return Err(Bref4Error::arguments(
                "bits-per-level must be at least 1".to_string(),
            ));
        }
        let level_caps = level_caps(n_haps, params.bits_per_level);
        let max_maps = level_caps.len() + 1;
        if max_maps > u8::MAX as usize {
            return Err(Bref4Error::arguments(format!(
                "{} coder levels exceed the format limit of 254; increase bits-per-level",
                level_caps.len()
            )));
        }
        let top_cap = level_caps.first().copied().unwrap_or(n_haps as u32) as usize;
        let smallest_cap = level_caps.last().copied().unwrap_or(n_haps as u32) as usize;
        let max_nonmajor = match params.max_nonmajor {
            Some(v) => v as usize,
            None => default_max_nonmajor(n_haps),
        };
        Ok(Self {
            level_caps,
            max_maps,
            top_cap,
            max_nonmajor,
            max_map_rec_n_alleles: smallest_cap.min(MAX_N_ALLELES),
        })
    }

    /// Whether a record is stored via the map chain rather than as sparse
    /// allele lists.
    fn store_as_hap_coded(&self, rec: &RefGTRec) -> bool {
        rec.non_null_count() > self.max_nonmajor
            && rec.marker().n_alleles() <= self.max_map_rec_n_alleles
    }
}

/// One flushed block, in input order
struct BlockTask {
    recs: Vec<RefGTRec>,
    /// One map-chain bucket per map-coded record; bucket 0 is pre-seeded
    /// with the top-level hap-to-seq map when coder levels exist.
    buckets: Vec<Vec<IndexArray>>,
    /// The map-coded records, already mapped through the top-level map
    /// when coder levels exist.
    mapped: Vec<BrefRec>,
}

/// State owned by the serializer thread
struct Serializer {
    out: Box<dyn Write + Send>,
    index_buf: Vec<u8>,
    bytes_written: Arc<AtomicU64>,
    policy: EncodingPolicy,
    chrom_ids: Arc<ChromIds>,
}

/// Stream state handed back when the serializer finishes
struct SerializerFinish {
    out: Box<dyn Write + Send>,
    index_buf: Vec<u8>,
}

impl Serializer {
    fn run(mut self, rx: Receiver<BlockTask>) -> Result<SerializerFinish> {
        for task in rx {
            let BlockTask {
                recs,
                mut buckets,
                mapped,
            } = task;
            self.store_maps(0, &mut buckets, mapped)?;
            self.write_block(&recs, &buckets)?;
        }
        Ok(SerializerFinish {
            out: self.out,
            index_buf: self.index_buf,
        })
    }

    /// Recursively extend each record's map chain with the maps of the
    /// next coder level.
    ///
    /// A fresh coder with the next level's capacity consumes the mapped
    /// records in order. Whenever it rejects a record, the coder's map is
    /// appended to the first bucket of the range it covered, the recursion
    /// handles that range in the shrunken sequence domain, and the coder
    /// restarts at the rejected record. The final level appends each
    /// record's own sequence-to-allele map, completing the chain.
    fn store_maps(
        &self,
        level: usize,
        buckets: &mut [Vec<IndexArray>],
        recs: Vec<BrefRec>,
    ) -> Result<()> {
        let level = level + 1;
        if level < self.policy.level_caps.len() && !buckets.is_empty() {
            let n_recs = recs.len();
            let mut sub = SeqCoder::new(recs[0].size(), self.policy.level_caps[level] as usize);
            let mut last_start = 0usize;
            for (j, rec) in recs.into_iter().enumerate() {
                if let Err(rec) = sub.try_add(rec) {
                    let hap_to_seq = sub.hap_to_seq();
                    let mapped = sub.mapped_recs(&hap_to_seq);
                    buckets[last_start].push(hap_to_seq);
                    self.store_maps(level, &mut buckets[last_start..j], mapped)?;
                    sub.clear();
                    last_start = j;
                    if sub.try_add(rec).is_err() {
                        return Err(Bref4Error::invalid_data(
                            "record rejected by an empty sequence coder",
                        ));
                    }
                }
            }
            let hap_to_seq = sub.hap_to_seq();
            let mapped = sub.mapped_recs(&hap_to_seq);
            buckets[last_start].push(hap_to_seq);
            self.store_maps(level, &mut buckets[last_start..n_recs], mapped)?;
        } else {
            for (bucket, rec) in buckets.iter_mut().zip(recs.iter()) {
                bucket.push(rec.hap_to_allele());
            }
        }
        Ok(())
    }

    fn write_block(&mut self, recs: &[RefGTRec], buckets: &[Vec<IndexArray>]) -> Result<()> {
        if recs.is_empty() {
            return Ok(());
        }
        let first_marker = recs[0].marker();
        let chrom = self.chrom_ids.name(first_marker.chrom);
        let first_pos = first_marker.pos;
        let last_pos = recs[recs.len() - 1].marker().pos;

        let mut buf: Vec<u8> = Vec::with_capacity(1 << 16);
        write_i32(&mut buf, recs.len() as i32)?;
        write_i32(&mut buf, last_pos as i32)?;
        buf.push(buckets.first().map(|b| b.len()).unwrap_or(0) as u8);
        write_utf(&mut buf, &chrom)?;

        let mut prev_pos = 0u32;
        let mut map_index = 0usize;
        for rec in recs {
            let marker = rec.marker();
            if marker.pos < prev_pos {
                return Err(Bref4Error::invalid_data(format!(
                    "records not sorted by position on chromosome {}: {} after {}",
                    chrom, marker.pos, prev_pos
                )));
            }
            write_restricted_int(&mut buf, (marker.pos - prev_pos) as i32)?;
            prev_pos = marker.pos;
            marker.write_non_pos_fields(&mut buf)?;
            if self.policy.store_as_hap_coded(rec) {
                let chain = &buckets[map_index];
                map_index += 1;
                buf.push((self.policy.max_maps - chain.len()) as u8);
                for map in chain {
                    write_packed_array(&mut buf, map)?;
                }
            } else {
                buf.push(SENTINEL_BYTE);
                write_allele_rows(&mut buf, rec)?;
            }
        }
        debug_assert_eq!(map_index, buckets.len());

        let offset = self.bytes_written.load(Ordering::Acquire);
        write_i32(&mut self.out, buf.len() as i32)?;
        self.out.write_all(&buf)?;
        self.bytes_written
            .store(offset + 4 + buf.len() as u64, Ordering::Release);
        index::append_entry(&mut self.index_buf, offset, &chrom, first_pos, last_pos)?;
        debug!(
            chrom = %chrom,
            n_recs = recs.len(),
            n_bytes = buf.len(),
            "wrote block"
        );
        Ok(())
    }
}

fn write_allele_rows<W: Write>(out: &mut W, rec: &RefGTRec) -> Result<()> {
    for row in rec.allele_to_haps() {
        match row {
            None => write_restricted_int(out, -1)?,
            Some(list) => {
                write_restricted_int(out, list.len() as i32)?;
                for hap in list {
                    write_i32(out, hap as i32)?;
                }
            }
        }
    }
    Ok(())
}

/// Writes records to a bref4 output stream.
///
/// Records must arrive sorted by position within each chromosome, and each
/// chromosome must form a single contiguous run.
pub struct Bref4Writer {
    policy: EncodingPolicy,
    n_haps: usize,
    coder: SeqCoder,
    recs: Vec<RefGTRec>,
    last_chrom: Option<ChromIdx>,
    seen_chroms: HashSet<ChromIdx>,
    chrom_ids: Arc<ChromIds>,
    tx: Option<SyncSender<BlockTask>>,
    serializer: Option<JoinHandle<Result<SerializerFinish>>>,
    bytes_written: Arc<AtomicU64>,
}

impl Bref4Writer {
    /// Create a writer for the given output file.
    pub fn create(
        path: &Path,
        header: &Bref4Header,
        command: &str,
        params: &EncodingParams,
        chrom_ids: Arc<ChromIds>,
    ) -> Result<Self> {
        let out: Box<dyn Write + Send> = Box::new(BufWriter::new(File::create(path)?));
        Self::from_writer(out, header, command, params, chrom_ids)
    }

    /// Create a writer over an arbitrary output stream.
    pub fn from_writer(
        mut out: Box<dyn Write + Send>,
        header: &Bref4Header,
        command: &str,
        params: &EncodingParams,
        chrom_ids: Arc<ChromIds>,
    ) -> Result<Self> {
        let n_haps = header.n_haps();
        if n_haps == 0 {
            return Err(Bref4Error::vcf("input has no samples"));
        }
        let policy = EncodingPolicy::new(n_haps, params)?;

        let mut header_bytes = Vec::with_capacity(1 << 16);
        header.write(command, &mut header_bytes)?;
        out.write_all(&header_bytes)?;
        let bytes_written = Arc::new(AtomicU64::new(header_bytes.len() as u64));

        let (tx, rx) = sync_channel(SERIALIZER_QUEUE_LEN);
        let serializer = Serializer {
            out,
            index_buf: Vec::with_capacity(1 << 10),
            bytes_written: Arc::clone(&bytes_written),
            policy: policy.clone(),
            chrom_ids: Arc::clone(&chrom_ids),
        };
        let handle = std::thread::Builder::new()
            .name("bref4-serializer".to_string())
            .spawn(move || serializer.run(rx))?;

        let coder = SeqCoder::new(n_haps, policy.top_cap);
        Ok(Self {
            policy,
            n_haps,
            coder,
            recs: Vec::new(),
            last_chrom: None,
            seen_chroms: HashSet::new(),
            chrom_ids,
            tx: Some(tx),
            serializer: Some(handle),
            bytes_written,
        })
    }

    /// Append one record.
    pub fn write(&mut self, rec: RefGTRec) -> Result<()> {
        if rec.size() != self.n_haps {
            return Err(Bref4Error::invalid_data(format!(
                "record at position {} has {} haplotypes, expected {}",
                rec.marker().pos,
                rec.size(),
                self.n_haps
            )));
        }
        let chrom = rec.marker().chrom;
        match self.last_chrom {
            None => {
                self.last_chrom = Some(chrom);
                self.check_contiguity(chrom)?;
            }
            Some(last) if last != chrom => {
                self.flush_block()?;
                self.last_chrom = Some(chrom);
                self.check_contiguity(chrom)?;
            }
            _ => {}
        }
        if self.recs.len() == MAX_BLOCK_RECS {
            self.flush_block()?;
        }
        if self.policy.store_as_hap_coded(&rec) {
            let bref_rec = BrefRec::from_ref_rec(&rec);
            if let Err(bref_rec) = self.coder.try_add(bref_rec) {
                self.flush_block()?;
                if self.coder.try_add(bref_rec).is_err() {
                    return Err(Bref4Error::invalid_data(
                        "record rejected by an empty sequence coder",
                    ));
                }
            }
        }
        self.recs.push(rec);
        Ok(())
    }

    fn check_contiguity(&mut self, chrom: ChromIdx) -> Result<()> {
        if !self.seen_chroms.insert(chrom) {
            return Err(Bref4Error::NonContiguousChromosome {
                chrom: self.chrom_ids.name(chrom).to_string(),
            });
        }
        Ok(())
    }

    /// Snapshot the in-progress block and hand it to the serializer.
    fn flush_block(&mut self) -> Result<()> {
        let recs = std::mem::take(&mut self.recs);
        let n_coded = self.coder.n_recs();
        let mut buckets: Vec<Vec<IndexArray>> = vec![Vec::new(); n_coded];
        let mapped = if !self.policy.level_caps.is_empty() && n_coded > 0 {
            let hap_to_seq = self.coder.hap_to_seq();
            let mapped = self.coder.mapped_recs(&hap_to_seq);
            buckets[0].push(hap_to_seq);
            mapped
        } else {
            self.coder.take_recs()
        };
        self.coder.clear();
        if recs.is_empty() {
            return Ok(());
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Bref4Error::invalid_data("writer already closed"))?;
        tx.send(BlockTask {
            recs,
            buckets,
            mapped,
        })
        .map_err(|_| Bref4Error::invalid_data("block serializer terminated early"))?;
        Ok(())
    }

    /// Flush the final block, await the serializer, and append the
    /// end-of-blocks sentinel and the tail index.
    pub fn close(mut self) -> Result<()> {
        if !self.recs.is_empty() {
            self.flush_block()?;
        }
        drop(self.tx.take());
        let handle = self
            .serializer
            .take()
            .ok_or_else(|| Bref4Error::invalid_data("writer already closed"))?;
        let finish = handle
            .join()
            .map_err(|_| Bref4Error::invalid_data("block serializer panicked"))??;
        let SerializerFinish { mut out, index_buf } = finish;
        write_u32(&mut out, 0)?;
        let index_offset = self.bytes_written.load(Ordering::Acquire) + 4;
        index::write_tail(&index_buf, index_offset, &mut out)?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_caps() {
        // 64 haplotypes: half is 32, so a single level of capacity 16
        assert_eq!(level_caps(64, 2), vec![16]);
        // 2000 haplotypes: 16, 64, 256 reversed
        assert_eq!(level_caps(2000, 2), vec![256, 64, 16]);
        // bits-per-level 1 doubles each level
        assert_eq!(level_caps(64, 1), vec![32, 16]);
        // cohorts below 32 haplotypes have no levels
        assert!(level_caps(30, 2).is_empty());
    }

    #[test]
    fn test_default_max_nonmajor() {
        assert_eq!(default_max_nonmajor(1 << 13), 8);
        assert_eq!(default_max_nonmajor(1 << 16), 20);
        // small cohorts floor at 4
        assert_eq!(default_max_nonmajor(64), 4);
    }

    #[test]
    fn test_policy_rejects_excess_levels() {
        // bits-per-level 0 is rejected outright
        let params = EncodingParams {
            bits_per_level: 0,
            max_nonmajor: None,
        };
        assert!(EncodingPolicy::new(1 << 20, &params).is_err());
    }

    #[test]
    fn test_policy_eligibility_bounds() {
        let params = EncodingParams {
            bits_per_level: 2,
            max_nonmajor: Some(4),
        };
        let policy = EncodingPolicy::new(64, &params).unwrap();
        assert_eq!(policy.top_cap, 16);
        assert_eq!(policy.max_maps, 2);
        assert_eq!(policy.max_map_rec_n_alleles, 16);
    }
}
