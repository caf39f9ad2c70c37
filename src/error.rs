//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.

use thiserror::Error;

/// Main error type for bref4 operations
#[derive(Error, Debug)]
pub enum Bref4Error {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Command-line argument errors
    #[error("{message}")]
    Arguments { message: String },

    /// VCF parsing errors (unphased, missing, non-diploid genotypes)
    #[error("Malformed VCF record: {message}")]
    Vcf { message: String },

    /// Chromosome records are interleaved with another chromosome
    #[error("VCF records for chromosome {chrom} are not contiguous")]
    NonContiguousChromosome { chrom: String },

    /// Sample count exceeds what the format can address
    #[error("Too many samples: {n_samples} (maximum is {max})")]
    TooManySamples { n_samples: usize, max: usize },

    /// Structural errors in bref4 data (bad magic, bad sentinel, out-of-range
    /// packed values, framing violations)
    #[error("Corrupt bref4 data: {message}")]
    CorruptBlock { message: String },

    /// A value outside the encodable range was passed to the bit codec
    #[error("Value cannot be encoded: {value}")]
    BadEncoding { value: i64 },

    /// Invalid in-memory data (record size mismatch, broken invariants)
    #[error("Invalid data: {message}")]
    InvalidData { message: String },
}

/// Type alias for Results using Bref4Error
pub type Result<T> = std::result::Result<T, Bref4Error>;

impl Bref4Error {
    /// Create an arguments error with a message
    pub fn arguments(message: impl Into<String>) -> Self {
        Self::Arguments {
            message: message.into(),
        }
    }

    /// Create a VCF error with a message
    pub fn vcf(message: impl Into<String>) -> Self {
        Self::Vcf {
            message: message.into(),
        }
    }

    /// Create a VCF error tagged with the 1-based data line number
    pub fn vcf_line(line: u64, message: impl Into<String>) -> Self {
        Self::Vcf {
            message: format!("line {}: {}", line, message.into()),
        }
    }

    /// Create a corrupt-block error
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptBlock {
            message: message.into(),
        }
    }

    /// Create an invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }
}
