//! # Data Module
//!
//! In-memory representations of genomic data.
//!
//! ## Design Philosophy
//! - **Zero-cost newtypes:** `ChromIdx`, `HapIdx`, `SampleIdx` prevent index
//!   bugs at compile time with no runtime overhead.
//! - **Enum-based polymorphism:** `RefGTRec` and `BrefRec` variants replace a
//!   class hierarchy with stack-allocated enums and static dispatch.
//!
//! ## Sub-modules
//! - `marker`: Genomic position and allele definitions
//! - `haplotype`: Index types for samples and haplotypes
//! - `ints`: Bit-packed integer arrays
//! - `rec`: Reference genotype record variants
//! - `bref_rec`: Sequence-coder record views

pub mod bref_rec;
pub mod haplotype;
pub mod ints;
pub mod marker;
pub mod rec;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub use haplotype::{HapIdx, SampleIdx, Samples};
pub use ints::IndexArray;
pub use marker::{Allele, Marker};
pub use rec::RefGTRec;

/// Zero-cost newtype for chromosome indices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChromIdx(pub u16);

impl ChromIdx {
    pub fn new(idx: u16) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Chromosome-name interner shared by the encoder and decoder of one
/// program invocation.
///
/// Indices are assigned in first-seen order, which is also the order in
/// which chromosomes must appear in a valid record stream.
#[derive(Debug, Default)]
pub struct ChromIds {
    inner: RwLock<ChromIdsInner>,
}

#[derive(Debug, Default)]
struct ChromIdsInner {
    names: Vec<Arc<str>>,
    index: HashMap<Arc<str>, ChromIdx>,
}

impl ChromIds {
    /// Create an empty interner
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index for a chromosome name, assigning a new index on
    /// first sight.
    pub fn intern(&self, name: &str) -> ChromIdx {
        {
            let inner = self.inner.read().expect("chromosome interner poisoned");
            if let Some(&idx) = inner.index.get(name) {
                return idx;
            }
        }
        let mut inner = self.inner.write().expect("chromosome interner poisoned");
        // a racing writer may have inserted the name first
        if let Some(&idx) = inner.index.get(name) {
            return idx;
        }
        let name: Arc<str> = name.into();
        let idx = ChromIdx::new(inner.names.len() as u16);
        inner.names.push(name.clone());
        inner.index.insert(name, idx);
        idx
    }

    /// Return the name for a previously interned index.
    pub fn name(&self, idx: ChromIdx) -> Arc<str> {
        let inner = self.inner.read().expect("chromosome interner poisoned");
        inner.names[idx.as_usize()].clone()
    }

    /// Number of interned chromosomes
    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("chromosome interner poisoned");
        inner.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
