//! # Bref4 File Header
//!
//! The header holds the VCF meta-information lines and the sample
//! identifiers, preceded by the format magic number and the byte length of
//! the header payload.

use std::io::{Read, Write};

use crate::data::haplotype::Samples;
use crate::error::{Bref4Error, Result};
use crate::io::bits::{read_string_array, read_u32, write_string_array, write_u32};

/// The initial integer in a bref4 file.
pub const MAGIC_NUMBER: u32 = 25_597_034;

/// Immutable header of a bref4 file
#[derive(Clone, Debug)]
pub struct Bref4Header {
    meta_info_lines: Vec<String>,
    samples: Samples,
}

impl Bref4Header {
    /// Construct a header from meta-information lines and sample ids.
    pub fn new(meta_info_lines: Vec<String>, samples: Samples) -> Self {
        Self {
            meta_info_lines,
            samples,
        }
    }

    /// VCF meta-information lines ("##..." lines, without line terminators)
    pub fn meta_info_lines(&self) -> &[String] {
        &self.meta_info_lines
    }

    /// The samples, in VCF column order
    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Number of haplotypes
    pub fn n_haps(&self) -> usize {
        self.samples.n_haps()
    }

    /// Write the magic number, payload length, meta-information lines, and
    /// sample ids. A `bref4Command` meta line describing this invocation is
    /// appended to the stored meta lines.
    pub fn write<W: Write>(&self, command: &str, out: &mut W) -> Result<()> {
        let mut payload = Vec::with_capacity(1 << 16);
        let mut lines = self.meta_info_lines.clone();
        lines.push(format!("##bref4Command=\"{}\"", command));
        write_string_array(&mut payload, &lines)?;
        let ids: Vec<&str> = self.samples.ids().iter().map(|s| s.as_ref()).collect();
        write_string_array(&mut payload, &ids)?;

        write_u32(out, MAGIC_NUMBER)?;
        write_u32(out, payload.len() as u32)?;
        out.write_all(&payload)?;
        Ok(())
    }

    /// Read a header written with [`Bref4Header::write`].
    pub fn read<R: Read>(input: &mut R) -> Result<Self> {
        let magic = read_u32(input)?;
        if magic != MAGIC_NUMBER {
            return Err(Bref4Error::corrupt(format!(
                "unrecognized magic number {:#010x}; was the input created by a different bref version?",
                magic
            )));
        }
        let _payload_len = read_u32(input)?;
        let meta_info_lines = read_string_array(input)?;
        let sample_ids = read_string_array(input)?;
        let samples = Samples::from_ids(sample_ids)?;
        Ok(Self {
            meta_info_lines,
            samples,
        })
    }
}
