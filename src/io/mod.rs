//! # I/O Module
//!
//! File reading and writing: the bit-level wire codec, the bref4
//! container (header, blocks, tail index), and VCF text.

pub mod bits;
pub mod header;
pub mod index;
pub mod inflater;
pub mod reader;
pub mod vcf;
pub mod writer;

pub use header::Bref4Header;
pub use index::Bref4Index;
pub use inflater::BlockInflater;
pub use reader::{Bref4Reader, Bref4RecIt};
pub use vcf::{VcfReader, VcfWriter};
pub use writer::{Bref4Writer, EncodingParams};
