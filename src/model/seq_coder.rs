//! # Sequence Coder
//!
//! Maintains an online partition of haplotypes into equivalence classes
//! ("sequences"): two haplotypes share a class iff they carry the same
//! allele on every record added since the last clear. Each added record
//! refines the partition; a record that would push the class count past
//! the coder's capacity is rejected and the caller flushes.
//!
//! Refinement reuses each existing sequence id at most once, either for
//! the class members that carry the implicit allele or, if there are
//! none, for the first non-implicit allele observed in that class. Every
//! later claimant of the class receives a fresh id. This greedy rule
//! minimizes the number of ids a single record can create.

use rayon::prelude::*;

use crate::data::bref_rec::BrefRec;
use crate::data::ints::IndexArray;

/// The maximum number of alleles in a record passed to [`SeqCoder::try_add`].
pub const MAX_N_ALLELES: usize = 256;

const NOT_ASSIGNED: i32 = -1;
const ASSIGNED: i32 = i32::MAX;

/// Online haplotype-to-sequence partition
pub struct SeqCoder {
    n_haps: usize,
    max_n_seq: usize,
    hap_to_seq: Vec<u32>,
    seq_to_cnt: Vec<u32>,
    n_seq: usize,
    update_map_size: usize,
    update_map: Vec<Vec<i32>>,
    recs: Vec<BrefRec>,
}

impl SeqCoder {
    /// Create a coder over `n_haps` haplotypes with at most `max_n_seq`
    /// distinct sequences. All haplotypes start in one class.
    pub fn new(n_haps: usize, max_n_seq: usize) -> Self {
        assert!(n_haps >= 1, "n_haps must be positive");
        assert!(max_n_seq >= 1, "max_n_seq must be positive");
        let mut seq_to_cnt = vec![0u32; max_n_seq];
        seq_to_cnt[0] = n_haps as u32;
        let update_map_size = 8;
        let mut update_map = vec![Vec::new(); MAX_N_ALLELES];
        for row in update_map.iter_mut().take(update_map_size) {
            *row = vec![0i32; max_n_seq];
        }
        Self {
            n_haps,
            max_n_seq,
            hap_to_seq: vec![0; n_haps],
            seq_to_cnt,
            n_seq: 1,
            update_map_size,
            update_map,
            recs: Vec::new(),
        }
    }

    /// Attempt to refine the partition with `rec`.
    ///
    /// On success the record is buffered and `Ok(())` is returned. On
    /// admission failure the partition is left unchanged and the record
    /// is handed back; the caller should flush, [`SeqCoder::clear`], and
    /// retry.
    pub fn try_add(&mut self, rec: BrefRec) -> Result<(), BrefRec> {
        assert_eq!(rec.size(), self.n_haps, "record size mismatch");
        let n_alleles = rec.n_alleles();
        assert!(n_alleles <= MAX_N_ALLELES, "too many alleles for coder");
        if n_alleles > self.update_map_size {
            self.grow_update_map(n_alleles);
        }
        let success = {
            let rows = rec.rows();
            if self.set_update_map(&rows, rec.null_row()) {
                self.update_hap_to_seq(&rows);
                true
            } else {
                false
            }
        };
        if success {
            self.recs.push(rec);
            Ok(())
        } else {
            Err(rec)
        }
    }

    fn grow_update_map(&mut self, n_alleles: usize) {
        for row in self.update_map[self.update_map_size..n_alleles].iter_mut() {
            *row = vec![0i32; self.max_n_seq];
        }
        self.update_map_size = n_alleles;
    }

    fn set_update_map(&mut self, rows: &[Option<&[u32]>], null_row: usize) -> bool {
        let n_seq_at_start = self.n_seq;
        self.reset_update_map(rows, null_row);
        for (allele, row) in rows.iter().enumerate() {
            if allele == null_row {
                continue;
            }
            let Some(list) = row else { continue };
            for &hap in *list {
                let seq = self.hap_to_seq[hap as usize] as usize;
                if self.update_map[allele][seq] == NOT_ASSIGNED {
                    if self.update_map[null_row][seq] == NOT_ASSIGNED {
                        // the class has no implicit-allele remainder: reuse its id
                        self.update_map[null_row][seq] = ASSIGNED;
                        self.update_map[allele][seq] = seq as i32;
                    } else {
                        self.update_map[allele][seq] = self.n_seq as i32;
                        self.n_seq += 1;
                    }
                }
            }
        }
        if self.n_seq > self.max_n_seq {
            self.n_seq = n_seq_at_start;
            false
        } else {
            for cnt in self.seq_to_cnt[n_seq_at_start..self.n_seq].iter_mut() {
                *cnt = 0;
            }
            true
        }
    }

    fn reset_update_map(&mut self, rows: &[Option<&[u32]>], null_row: usize) {
        let null_cnt = self.seq_to_null_cnt(rows);
        let n_seq = self.n_seq;
        for row in self.update_map[..rows.len()].iter_mut() {
            for entry in row[..n_seq].iter_mut() {
                *entry = NOT_ASSIGNED;
            }
        }
        for (seq, &cnt) in null_cnt.iter().enumerate() {
            if cnt > 0 {
                self.update_map[null_row][seq] = seq as i32;
            }
        }
    }

    /// For each sequence, the number of its haplotypes not covered by any
    /// explicit carrier list. Positive counts mark classes that keep an
    /// implicit-allele remainder.
    fn seq_to_null_cnt(&self, rows: &[Option<&[u32]>]) -> Vec<i64> {
        let mut cnt: Vec<i64> = self.seq_to_cnt[..self.n_seq]
            .iter()
            .map(|&c| c as i64)
            .collect();
        for list in rows.iter().flatten() {
            for &hap in *list {
                cnt[self.hap_to_seq[hap as usize] as usize] -= 1;
            }
        }
        cnt
    }

    fn update_hap_to_seq(&mut self, rows: &[Option<&[u32]>]) {
        for (allele, row) in rows.iter().enumerate() {
            let Some(list) = row else { continue };
            for &hap in *list {
                let old_seq = self.hap_to_seq[hap as usize];
                let new_seq = self.update_map[allele][old_seq as usize];
                debug_assert!(new_seq >= 0 && new_seq != ASSIGNED);
                if new_seq as u32 != old_seq {
                    self.hap_to_seq[hap as usize] = new_seq as u32;
                    self.seq_to_cnt[old_seq as usize] -= 1;
                    self.seq_to_cnt[new_seq as usize] += 1;
                }
            }
        }
    }

    /// Current number of sequences
    pub fn n_seq(&self) -> usize {
        self.n_seq
    }

    /// Number of haplotypes
    pub fn n_haps(&self) -> usize {
        self.n_haps
    }

    /// Maximum permitted number of sequences
    pub fn max_n_seq(&self) -> usize {
        self.max_n_seq
    }

    /// Number of buffered records
    pub fn n_recs(&self) -> usize {
        self.recs.len()
    }

    /// The current map from haplotype to sequence
    pub fn hap_to_seq(&self) -> IndexArray {
        IndexArray::from_values(&self.hap_to_seq, self.n_seq as u32)
    }

    /// Apply `map` to every buffered record. `map` must be this coder's
    /// own [`SeqCoder::hap_to_seq`] (or a composition consistent with its
    /// partition) for the results to be lossless.
    pub fn mapped_recs(&self, map: &IndexArray) -> Vec<BrefRec> {
        assert_eq!(map.size(), self.n_haps, "map size mismatch");
        self.recs.par_iter().map(|rec| rec.apply_map(map)).collect()
    }

    /// Remove and return the buffered records unchanged.
    pub fn take_recs(&mut self) -> Vec<BrefRec> {
        std::mem::take(&mut self.recs)
    }

    /// Reset to a single class covering all haplotypes.
    pub fn clear(&mut self) {
        self.hap_to_seq.fill(0);
        self.n_seq = 1;
        self.seq_to_cnt[0] = self.n_haps as u32;
        self.recs.clear();
    }
}
