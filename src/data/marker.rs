//! # Marker Definitions
//!
//! Genomic marker (variant site) representation and its compact binary
//! codec. The marker position is never written here: block writers store
//! positions as deltas, so only the non-position fields are serialized.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::data::ChromIdx;
use crate::error::{Bref4Error, Result};
use crate::io::bits::{read_string_array, read_u8, read_utf, write_string_array, write_utf};

/// All 24 permutations of the SNV bases (A, C, G, T), used to encode an
/// SNV allele list as a single byte: `(perm_index << 2) | (n_alleles - 1)`.
static SNV_PERMS: [[u8; 4]; 24] = [
    [0, 1, 2, 3],
    [0, 1, 3, 2],
    [0, 2, 1, 3],
    [0, 2, 3, 1],
    [0, 3, 1, 2],
    [0, 3, 2, 1],
    [1, 0, 2, 3],
    [1, 0, 3, 2],
    [1, 2, 0, 3],
    [1, 2, 3, 0],
    [1, 3, 0, 2],
    [1, 3, 2, 0],
    [2, 0, 1, 3],
    [2, 0, 3, 1],
    [2, 1, 0, 3],
    [2, 1, 3, 0],
    [2, 3, 0, 1],
    [2, 3, 1, 0],
    [3, 0, 1, 2],
    [3, 0, 2, 1],
    [3, 1, 0, 2],
    [3, 1, 2, 0],
    [3, 2, 0, 1],
    [3, 2, 1, 0],
];

const BASES: [char; 4] = ['A', 'C', 'G', 'T'];

/// Allele representation
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Allele {
    /// Single nucleotide (A=0, C=1, G=2, T=3)
    Base(u8),
    /// Insertion/deletion, symbolic, or other multi-character allele
    Seq(Arc<str>),
}

impl Allele {
    /// Create an allele from its VCF string
    pub fn from_vcf(s: &str) -> Self {
        if s.len() == 1 {
            match s.as_bytes()[0] {
                b'A' => return Self::Base(0),
                b'C' => return Self::Base(1),
                b'G' => return Self::Base(2),
                b'T' => return Self::Base(3),
                _ => {}
            }
        }
        Self::Seq(s.into())
    }

    /// Base index if this is a single A/C/G/T nucleotide
    pub fn base_index(&self) -> Option<u8> {
        match self {
            Self::Base(b) => Some(*b),
            Self::Seq(_) => None,
        }
    }
}

impl std::fmt::Display for Allele {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base(b) => write!(f, "{}", BASES[*b as usize]),
            Self::Seq(s) => write!(f, "{}", s),
        }
    }
}

/// A genomic marker (variant site)
///
/// The QUAL, FILTER, and INFO columns are carried verbatim so that VCF
/// output reproduces the input fields exactly.
#[derive(Clone, Debug)]
pub struct Marker {
    /// Chromosome index (interned)
    pub chrom: ChromIdx,
    /// 1-based genomic position
    pub pos: u32,
    /// Variant ID, None if missing
    pub id: Option<Arc<str>>,
    /// Reference allele
    pub ref_allele: Allele,
    /// Alternate allele(s), at least one
    pub alt_alleles: Vec<Allele>,
    /// QUAL column, verbatim
    pub qual: Arc<str>,
    /// FILTER column, verbatim
    pub filter: Arc<str>,
    /// INFO column, verbatim
    pub info: Arc<str>,
}

impl Marker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chrom: ChromIdx,
        pos: u32,
        id: Option<Arc<str>>,
        ref_allele: Allele,
        alt_alleles: Vec<Allele>,
        qual: Arc<str>,
        filter: Arc<str>,
        info: Arc<str>,
    ) -> Result<Self> {
        if alt_alleles.is_empty() {
            return Err(Bref4Error::vcf(format!(
                "marker at position {} has no alternate allele",
                pos
            )));
        }
        Ok(Self {
            chrom,
            pos,
            id,
            ref_allele,
            alt_alleles,
            qual,
            filter,
            info,
        })
    }

    /// Total number of alleles (ref + alts)
    pub fn n_alleles(&self) -> usize {
        1 + self.alt_alleles.len()
    }

    /// Get allele by index (0 = ref, 1+ = alt)
    pub fn allele(&self, idx: usize) -> Option<&Allele> {
        if idx == 0 {
            Some(&self.ref_allele)
        } else {
            self.alt_alleles.get(idx - 1)
        }
    }

    /// Byte code for an SNV allele list, if one applies.
    ///
    /// The allele list must consist of distinct A/C/G/T bases and match a
    /// prefix of one of the 24 base permutations. The first matching
    /// permutation is chosen, which keeps the encoding deterministic.
    fn snv_allele_code(&self) -> Option<u8> {
        let n = self.n_alleles();
        if n > 4 {
            return None;
        }
        let mut bases = [0u8; 4];
        for j in 0..n {
            bases[j] = self.allele(j)?.base_index()?;
        }
        let perm_index = SNV_PERMS
            .iter()
            .position(|perm| perm[..n] == bases[..n])?;
        Some(((perm_index as u8) << 2) | (n as u8 - 1))
    }

    /// Write the non-position fields: identifier, allele list, QUAL,
    /// FILTER, and INFO.
    ///
    /// SNV allele lists collapse to one byte via the permutation code; any
    /// other list is written as `0xFF` followed by a string array.
    pub fn write_non_pos_fields<W: Write>(&self, out: &mut W) -> Result<()> {
        write_utf(out, self.id.as_deref().unwrap_or("."))?;
        match self.snv_allele_code() {
            Some(code) => out.write_all(&[code])?,
            None => {
                out.write_all(&[0xff])?;
                let strings: Vec<String> = (0..self.n_alleles())
                    .map(|j| self.allele(j).map(|a| a.to_string()).unwrap_or_default())
                    .collect();
                write_string_array(out, &strings)?;
            }
        }
        write_utf(out, &self.qual)?;
        write_utf(out, &self.filter)?;
        write_utf(out, &self.info)?;
        Ok(())
    }

    /// Read the fields written by [`Marker::write_non_pos_fields`].
    pub fn read_non_pos_fields<R: Read>(
        chrom: ChromIdx,
        pos: u32,
        input: &mut R,
    ) -> Result<Self> {
        let id = read_utf(input)?;
        let id: Option<Arc<str>> = if id == "." { None } else { Some(id.into()) };
        let code = read_u8(input)?;
        let (ref_allele, alt_alleles) = if code == 0xff {
            let strings = read_string_array(input)?;
            if strings.len() < 2 {
                return Err(Bref4Error::corrupt(format!(
                    "marker at position {} has {} alleles",
                    pos,
                    strings.len()
                )));
            }
            let mut alleles = strings.iter().map(|s| Allele::from_vcf(s));
            let ref_allele = alleles.next().unwrap_or(Allele::Base(0));
            (ref_allele, alleles.collect())
        } else {
            let n_alleles = (code & 0b11) as usize + 1;
            let perm_index = (code >> 2) as usize;
            if n_alleles < 2 || perm_index >= SNV_PERMS.len() {
                return Err(Bref4Error::corrupt(format!(
                    "invalid allele code {} at position {}",
                    code, pos
                )));
            }
            let perm = &SNV_PERMS[perm_index];
            let alts = perm[1..n_alleles].iter().map(|&b| Allele::Base(b)).collect();
            (Allele::Base(perm[0]), alts)
        };
        let qual: Arc<str> = read_utf(input)?.into();
        let filter: Arc<str> = read_utf(input)?.into();
        let info: Arc<str> = read_utf(input)?.into();
        Ok(Self {
            chrom,
            pos,
            id,
            ref_allele,
            alt_alleles,
            qual,
            filter,
            info,
        })
    }
}

impl PartialEq for Marker {
    fn eq(&self, other: &Self) -> bool {
        self.chrom == other.chrom && self.pos == other.pos
    }
}

impl Eq for Marker {}
