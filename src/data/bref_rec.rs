//! # Sequence-Coder Record Views
//!
//! A `BrefRec` is a record specialized for the sequence coder: the same
//! allele-to-carrier shape as a [`RefGTRec`](crate::data::rec::RefGTRec),
//! but over a domain that shrinks from haplotypes to sequence indices as
//! maps are applied. Di-allelic records dominate real data and store only
//! the single non-implicit carrier list.

use crate::data::ints::IndexArray;
use crate::data::rec::RefGTRec;

/// A record in the (possibly mapped) sequence domain
#[derive(Clone, Debug)]
pub enum BrefRec {
    /// Two alleles: only the non-implicit carrier list is stored
    Diallelic(DiallelicRec),
    /// Three or more alleles: full carrier lists with one implicit row
    Multiallelic(MultiallelicRec),
}

#[derive(Clone, Debug)]
pub struct DiallelicRec {
    size: usize,
    null_allele: usize,
    indices: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct MultiallelicRec {
    size: usize,
    null_row: usize,
    allele_to_seqs: Vec<Option<Vec<u32>>>,
}

impl BrefRec {
    /// Build the coder view of a reference record.
    pub fn from_ref_rec(rec: &RefGTRec) -> Self {
        let size = rec.size();
        let lists = rec.allele_to_haps();
        if lists.len() == 2 {
            let null_allele = if lists[0].is_none() { 0 } else { 1 };
            let indices = lists
                .into_iter()
                .flatten()
                .next()
                .unwrap_or_default();
            Self::Diallelic(DiallelicRec {
                size,
                null_allele,
                indices,
            })
        } else {
            let null_row = lists.iter().position(|l| l.is_none()).unwrap_or(0);
            Self::Multiallelic(MultiallelicRec {
                size,
                null_row,
                allele_to_seqs: lists,
            })
        }
    }

    /// Domain size: haplotype count, or the value size of the last
    /// applied map.
    pub fn size(&self) -> usize {
        match self {
            Self::Diallelic(r) => r.size,
            Self::Multiallelic(r) => r.size,
        }
    }

    /// Number of alleles
    pub fn n_alleles(&self) -> usize {
        match self {
            Self::Diallelic(_) => 2,
            Self::Multiallelic(r) => r.allele_to_seqs.len(),
        }
    }

    /// Index of the implicit row
    pub fn null_row(&self) -> usize {
        match self {
            Self::Diallelic(r) => r.null_allele,
            Self::Multiallelic(r) => r.null_row,
        }
    }

    /// Allele carried by sequence index `seq`
    pub fn get(&self, seq: usize) -> u32 {
        match self {
            Self::Diallelic(r) => {
                if r.indices.binary_search(&(seq as u32)).is_ok() {
                    (1 - r.null_allele) as u32
                } else {
                    r.null_allele as u32
                }
            }
            Self::Multiallelic(r) => {
                for (allele, list) in r.allele_to_seqs.iter().enumerate() {
                    if let Some(list) = list {
                        if list.binary_search(&(seq as u32)).is_ok() {
                            return allele as u32;
                        }
                    }
                }
                r.null_row as u32
            }
        }
    }

    /// Borrowed carrier lists per allele; the implicit row is `None`.
    pub fn rows(&self) -> Vec<Option<&[u32]>> {
        match self {
            Self::Diallelic(r) => {
                let mut rows: Vec<Option<&[u32]>> = vec![None, None];
                rows[1 - r.null_allele] = Some(&r.indices);
                rows
            }
            Self::Multiallelic(r) => r
                .allele_to_seqs
                .iter()
                .map(|l| l.as_deref())
                .collect(),
        }
    }

    /// The record's own sequence-to-allele map, with value size equal to
    /// the allele count.
    pub fn hap_to_allele(&self) -> IndexArray {
        let n_alleles = self.n_alleles() as u32;
        let mut values = vec![self.null_row() as u32; self.size()];
        for (allele, list) in self.rows().into_iter().enumerate() {
            if let Some(list) = list {
                for &seq in list {
                    values[seq as usize] = allele as u32;
                }
            }
        }
        IndexArray::from_values(&values, n_alleles)
    }

    /// Apply a map to the sequence domain.
    ///
    /// Each carrier list becomes the sorted, deduplicated image of its
    /// indices under `map`; the new domain size is `map.value_size()`.
    /// The result only preserves the record's content when the map never
    /// merges two indices that carry different alleles.
    pub fn apply_map(&self, map: &IndexArray) -> Self {
        debug_assert_eq!(self.size(), map.size());
        match self {
            Self::Diallelic(r) => Self::Diallelic(DiallelicRec {
                size: map.value_size() as usize,
                null_allele: r.null_allele,
                indices: map_indices(&r.indices, map),
            }),
            Self::Multiallelic(r) => Self::Multiallelic(MultiallelicRec {
                size: map.value_size() as usize,
                null_row: r.null_row,
                allele_to_seqs: r
                    .allele_to_seqs
                    .iter()
                    .map(|list| list.as_ref().map(|l| map_indices(l, map)))
                    .collect(),
            }),
        }
    }
}

fn map_indices(indices: &[u32], map: &IndexArray) -> Vec<u32> {
    let mut mapped: Vec<u32> = indices.iter().map(|&i| map.get(i as usize)).collect();
    mapped.sort_unstable();
    mapped.dedup();
    mapped
}
