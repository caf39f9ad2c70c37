//! # Reference Genotype Records
//!
//! A `RefGTRec` holds one marker and the phased allele of every haplotype.
//! Three storage shapes exist, chosen by where the record came from:
//! sparse allele lists (VCF parsing and sparse block records), a single
//! packed array (flat one-map block records), and a composed map pair
//! (hierarchically coded block records). A single enum replaces a class
//! hierarchy; dispatch is static.

use std::sync::Arc;

use crate::data::ints::IndexArray;
use crate::data::marker::Marker;
use crate::error::{Bref4Error, Result};

/// A phased, non-missing reference genotype record
#[derive(Clone, Debug)]
pub enum RefGTRec {
    /// Sparse allele-coded: haplotype lists per allele, one implicit row
    Allele(AlleleRec),
    /// One packed allele per haplotype
    IntArray(IntArrayRec),
    /// Composed `hap -> seq` and `seq -> allele` maps
    Map(MapRec),
}

impl RefGTRec {
    pub fn marker(&self) -> &Marker {
        match self {
            Self::Allele(r) => &r.marker,
            Self::IntArray(r) => &r.marker,
            Self::Map(r) => &r.marker,
        }
    }

    /// Number of haplotypes
    pub fn size(&self) -> usize {
        match self {
            Self::Allele(r) => r.size,
            Self::IntArray(r) => r.alleles.size(),
            Self::Map(r) => r.hap_to_seq.size(),
        }
    }

    /// Allele carried by haplotype `hap`
    pub fn get(&self, hap: usize) -> u32 {
        match self {
            Self::Allele(r) => r.get(hap),
            Self::IntArray(r) => r.alleles.get(hap),
            Self::Map(r) => r.seq_to_allele.get(r.hap_to_seq.get(hap) as usize),
        }
    }

    /// Haplotype lists per allele with exactly one `None` entry marking
    /// the implicit (major) allele. Lists are strictly increasing and
    /// disjoint, and together with the implicit carriers cover `[0, size)`.
    pub fn allele_to_haps(&self) -> Vec<Option<Vec<u32>>> {
        match self {
            Self::Allele(r) => r.allele_to_haps.clone(),
            _ => {
                let (lists, _) = lists_from_alleles(self.size(), self.marker().n_alleles(), |h| {
                    self.get(h)
                });
                lists
            }
        }
    }

    /// Index of the implicit (`None`) row of [`RefGTRec::allele_to_haps`]
    pub fn null_row(&self) -> usize {
        match self {
            Self::Allele(r) => r.null_row,
            _ => {
                let (_, null_row) =
                    lists_from_alleles(self.size(), self.marker().n_alleles(), |h| self.get(h));
                null_row
            }
        }
    }

    /// Number of haplotypes that do not carry the implicit allele
    pub fn non_null_count(&self) -> usize {
        match self {
            Self::Allele(r) => r
                .allele_to_haps
                .iter()
                .flatten()
                .map(|list| list.len())
                .sum(),
            _ => {
                let size = self.size();
                let (lists, _) =
                    lists_from_alleles(size, self.marker().n_alleles(), |h| self.get(h));
                lists.iter().flatten().map(|list| list.len()).sum()
            }
        }
    }
}

/// Build per-allele haplotype lists from an allele accessor and mark the
/// most frequent allele as the implicit row (lowest index wins ties).
fn lists_from_alleles<F: Fn(usize) -> u32>(
    size: usize,
    n_alleles: usize,
    get: F,
) -> (Vec<Option<Vec<u32>>>, usize) {
    let mut lists: Vec<Vec<u32>> = vec![Vec::new(); n_alleles];
    for h in 0..size {
        lists[get(h) as usize].push(h as u32);
    }
    let null_row = lists
        .iter()
        .enumerate()
        .max_by(|(i, a), (j, b)| a.len().cmp(&b.len()).then(j.cmp(i)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let lists = lists
        .into_iter()
        .enumerate()
        .map(|(i, list)| if i == null_row { None } else { Some(list) })
        .collect();
    (lists, null_row)
}

/// Sparse allele-coded record
#[derive(Clone, Debug)]
pub struct AlleleRec {
    marker: Marker,
    size: usize,
    allele_to_haps: Vec<Option<Vec<u32>>>,
    null_row: usize,
}

impl AlleleRec {
    /// Build from one allele per haplotype, as parsed from a VCF record.
    pub fn from_hap_alleles(marker: Marker, hap_alleles: &[u32]) -> Result<RefGTRec> {
        let n_alleles = marker.n_alleles();
        for &a in hap_alleles {
            if a as usize >= n_alleles {
                return Err(Bref4Error::vcf(format!(
                    "allele index {} out of range at position {}",
                    a, marker.pos
                )));
            }
        }
        let (allele_to_haps, null_row) =
            lists_from_alleles(hap_alleles.len(), n_alleles, |h| hap_alleles[h]);
        Ok(RefGTRec::Allele(Self {
            marker,
            size: hap_alleles.len(),
            allele_to_haps,
            null_row,
        }))
    }

    /// Build from decoded per-allele haplotype lists.
    ///
    /// Exactly one list must be `None`; the others must be strictly
    /// increasing with in-range indices.
    pub fn from_lists(
        marker: Marker,
        size: usize,
        allele_to_haps: Vec<Option<Vec<u32>>>,
    ) -> Result<RefGTRec> {
        let null_rows: Vec<usize> = allele_to_haps
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_none())
            .map(|(i, _)| i)
            .collect();
        if null_rows.len() != 1 {
            return Err(Bref4Error::corrupt(format!(
                "allele record at position {} has {} implicit rows",
                marker.pos,
                null_rows.len()
            )));
        }
        for list in allele_to_haps.iter().flatten() {
            for pair in list.windows(2) {
                if pair[0] >= pair[1] {
                    return Err(Bref4Error::corrupt(format!(
                        "haplotype list not strictly increasing at position {}",
                        marker.pos
                    )));
                }
            }
            if let Some(&last) = list.last() {
                if last as usize >= size {
                    return Err(Bref4Error::corrupt(format!(
                        "haplotype index {} out of range [0, {})",
                        last, size
                    )));
                }
            }
        }
        Ok(RefGTRec::Allele(Self {
            marker,
            size,
            null_row: null_rows[0],
            allele_to_haps,
        }))
    }

    fn get(&self, hap: usize) -> u32 {
        debug_assert!(hap < self.size);
        for (allele, list) in self.allele_to_haps.iter().enumerate() {
            if let Some(list) = list {
                if list.binary_search(&(hap as u32)).is_ok() {
                    return allele as u32;
                }
            }
        }
        self.null_row as u32
    }
}

/// Record backed by one packed allele array
#[derive(Clone, Debug)]
pub struct IntArrayRec {
    marker: Marker,
    alleles: IndexArray,
}

impl IntArrayRec {
    pub fn new(marker: Marker, alleles: IndexArray) -> RefGTRec {
        RefGTRec::IntArray(Self { marker, alleles })
    }
}

/// Record backed by a composed map chain. The `hap -> seq` map is shared
/// among the records of one block.
#[derive(Clone, Debug)]
pub struct MapRec {
    marker: Marker,
    hap_to_seq: Arc<IndexArray>,
    seq_to_allele: IndexArray,
}

impl MapRec {
    pub fn new(
        marker: Marker,
        hap_to_seq: Arc<IndexArray>,
        seq_to_allele: IndexArray,
    ) -> Result<RefGTRec> {
        if hap_to_seq.value_size() as usize > seq_to_allele.size() {
            return Err(Bref4Error::corrupt(format!(
                "map chain mismatch at position {}: {} sequences, {} allele entries",
                marker.pos,
                hap_to_seq.value_size(),
                seq_to_allele.size()
            )));
        }
        Ok(RefGTRec::Map(Self {
            marker,
            hap_to_seq,
            seq_to_allele,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::marker::Allele;
    use crate::data::ChromIdx;

    fn test_marker(n_alts: usize) -> Marker {
        let bases = [1u8, 2, 3];
        Marker::new(
            ChromIdx(0),
            100,
            None,
            Allele::Base(0),
            (0..n_alts).map(|i| Allele::Base(bases[i])).collect(),
            ".".into(),
            "PASS".into(),
            ".".into(),
        )
        .unwrap()
    }

    #[test]
    fn test_allele_rec_invariants() {
        // haps 1 and 3 carry the alt allele out of 6
        let rec = AlleleRec::from_hap_alleles(test_marker(1), &[0, 1, 0, 1, 0, 0]).unwrap();
        assert_eq!(rec.size(), 6);
        assert_eq!(rec.null_row(), 0);
        assert_eq!(rec.non_null_count(), 2);
        let lists = rec.allele_to_haps();
        assert!(lists[0].is_none());
        assert_eq!(lists[1].as_deref(), Some(&[1u32, 3][..]));
        let alleles: Vec<u32> = (0..6).map(|h| rec.get(h)).collect();
        assert_eq!(alleles, vec![0, 1, 0, 1, 0, 0]);
    }

    #[test]
    fn test_major_allele_is_implicit() {
        // alt allele 1 is the majority; it becomes the implicit row
        let rec = AlleleRec::from_hap_alleles(test_marker(1), &[1, 1, 1, 0]).unwrap();
        assert_eq!(rec.null_row(), 1);
        assert_eq!(rec.non_null_count(), 1);
    }

    #[test]
    fn test_tie_prefers_lowest_allele() {
        let rec = AlleleRec::from_hap_alleles(test_marker(1), &[0, 1, 0, 1]).unwrap();
        assert_eq!(rec.null_row(), 0);
    }

    #[test]
    fn test_map_rec_composition() {
        let marker = test_marker(1);
        let hap_to_seq = Arc::new(IndexArray::from_values(&[0, 1, 1, 2], 3));
        let seq_to_allele = IndexArray::from_values(&[0, 1, 0], 2);
        let rec = MapRec::new(marker, hap_to_seq, seq_to_allele).unwrap();
        let alleles: Vec<u32> = (0..4).map(|h| rec.get(h)).collect();
        assert_eq!(alleles, vec![0, 1, 1, 0]);
        assert_eq!(rec.non_null_count(), 2);
    }

    #[test]
    fn test_from_lists_validation() {
        let marker = test_marker(1);
        // two implicit rows
        let err = AlleleRec::from_lists(marker.clone(), 4, vec![None, None]);
        assert!(err.is_err());
        // non-increasing list
        let err = AlleleRec::from_lists(marker, 4, vec![None, Some(vec![2, 1])]);
        assert!(err.is_err());
    }
}
