//! # VCF Reading and Writing
//!
//! Parses VCF text into reference genotype records and renders records
//! back to VCF text. Input may be plain, gzip-compressed, or
//! BGZF-compressed; output is BGZF-compressed when the filename asks for
//! it. Only the GT FORMAT field is read; all genotypes must be phased,
//! non-missing, and diploid.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use noodles::bgzf::Writer as BgzfWriter;
use rayon::prelude::*;
use tracing::info_span;

use crate::data::haplotype::Samples;
use crate::data::marker::{Allele, Marker};
use crate::data::rec::{AlleleRec, RefGTRec};
use crate::data::ChromIds;
use crate::error::{Bref4Error, Result};
use crate::io::header::Bref4Header;

/// Lines parsed per batch, scaled by the worker count
const BATCH_LINES_PER_THREAD: usize = 512;

fn is_compressed_name(name: &str) -> bool {
    name.ends_with(".gz") || name.ends_with(".bgz")
}

/// VCF file reader with batched, parallel record parsing
pub struct VcfReader {
    input: Box<dyn BufRead + Send>,
    header: Bref4Header,
    chrom_ids: Arc<ChromIds>,
    batch_size: usize,
    line_no: u64,
    line_buf: String,
}

impl VcfReader {
    /// Open a VCF file, decompressing by filename suffix.
    pub fn open(path: &Path, chrom_ids: Arc<ChromIds>) -> Result<Self> {
        let file = File::open(path)?;
        let name = path.to_string_lossy();
        let input: Box<dyn BufRead + Send> = if is_compressed_name(&name) {
            // BGZF is valid multi-member gzip, so one decoder covers both
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Self::from_reader(input, chrom_ids)
    }

    /// Read the header from an arbitrary stream.
    pub fn from_reader(
        mut input: Box<dyn BufRead + Send>,
        chrom_ids: Arc<ChromIds>,
    ) -> Result<Self> {
        info_span!("vcf_read_header").in_scope(|| {
            let mut meta_info_lines = Vec::new();
            let mut line_no = 0u64;
            let mut line = String::new();
            loop {
                line.clear();
                if input.read_line(&mut line)? == 0 {
                    return Err(Bref4Error::vcf("missing #CHROM header line"));
                }
                line_no += 1;
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if let Some(rest) = trimmed.strip_prefix("##") {
                    meta_info_lines.push(format!("##{}", rest));
                } else if trimmed.starts_with("#CHROM") {
                    let samples = parse_sample_ids(trimmed)?;
                    let header = Bref4Header::new(meta_info_lines, samples);
                    let batch_size = rayon::current_num_threads() * BATCH_LINES_PER_THREAD;
                    return Ok(Self {
                        input,
                        header,
                        chrom_ids,
                        batch_size,
                        line_no,
                        line_buf: String::new(),
                    });
                } else {
                    return Err(Bref4Error::vcf_line(
                        line_no,
                        "expected meta-information or #CHROM line",
                    ));
                }
            }
        })
    }

    /// The meta-information lines and samples
    pub fn header(&self) -> &Bref4Header {
        &self.header
    }

    /// Parse the next batch of records, or `None` at end of input.
    ///
    /// Lines are parsed on parallel threads; record order matches line
    /// order.
    pub fn next_batch(&mut self) -> Result<Option<Vec<RefGTRec>>> {
        let mut lines = Vec::with_capacity(self.batch_size);
        let first_line_no = self.line_no + 1;
        while lines.len() < self.batch_size {
            self.line_buf.clear();
            if self.input.read_line(&mut self.line_buf)? == 0 {
                break;
            }
            self.line_no += 1;
            let trimmed = self.line_buf.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            lines.push(trimmed.to_string());
        }
        if lines.is_empty() {
            return Ok(None);
        }
        let n_samples = self.header.samples().len();
        let chrom_ids = &self.chrom_ids;
        let records: Result<Vec<RefGTRec>> = lines
            .par_iter()
            .enumerate()
            .map(|(i, line)| parse_record(line, first_line_no + i as u64, n_samples, chrom_ids))
            .collect();
        Ok(Some(records?))
    }
}

fn parse_sample_ids(header_line: &str) -> Result<Samples> {
    let fields: Vec<&str> = header_line.split('\t').collect();
    if fields.len() < 10 {
        return Err(Bref4Error::vcf("header line has no sample columns"));
    }
    let ids: Vec<String> = fields[9..].iter().map(|s| s.to_string()).collect();
    Samples::from_ids(ids)
}

/// Parse one VCF data line into a sparse allele-coded record.
fn parse_record(
    line: &str,
    line_no: u64,
    n_samples: usize,
    chrom_ids: &Arc<ChromIds>,
) -> Result<RefGTRec> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 9 + n_samples {
        return Err(Bref4Error::vcf_line(
            line_no,
            format!("expected {} fields, found {}", 9 + n_samples, fields.len()),
        ));
    }
    let chrom = chrom_ids.intern(fields[0]);
    let pos: u32 = fields[1]
        .parse()
        .map_err(|_| Bref4Error::vcf_line(line_no, format!("invalid POS: {}", fields[1])))?;
    let id: Option<Arc<str>> = if fields[2] == "." {
        None
    } else {
        Some(fields[2].into())
    };
    let ref_allele = Allele::from_vcf(fields[3]);
    let alt_alleles: Vec<Allele> = fields[4].split(',').map(Allele::from_vcf).collect();
    let marker = Marker::new(
        chrom,
        pos,
        id,
        ref_allele,
        alt_alleles,
        fields[5].into(),
        fields[6].into(),
        fields[7].into(),
    )
    .map_err(|e| Bref4Error::vcf_line(line_no, e.to_string()))?;

    let gt_index = fields[8]
        .split(':')
        .position(|f| f == "GT")
        .ok_or_else(|| Bref4Error::vcf_line(line_no, "FORMAT has no GT field"))?;

    let mut hap_alleles = Vec::with_capacity(2 * n_samples);
    for sample_field in &fields[9..] {
        let gt = sample_field
            .split(':')
            .nth(gt_index)
            .ok_or_else(|| Bref4Error::vcf_line(line_no, "sample is missing the GT field"))?;
        let (a1, a2) = parse_gt(gt).map_err(|msg| {
            Bref4Error::vcf_line(line_no, format!("genotype \"{}\": {}", gt, msg))
        })?;
        hap_alleles.push(a1);
        hap_alleles.push(a2);
    }
    AlleleRec::from_hap_alleles(marker, &hap_alleles)
        .map_err(|e| Bref4Error::vcf_line(line_no, e.to_string()))
}

/// Parse a phased diploid GT value such as `0|1`.
fn parse_gt(gt: &str) -> std::result::Result<(u32, u32), &'static str> {
    let (a1, a2) = match gt.split_once('|') {
        Some(pair) => pair,
        None => {
            if gt.contains('/') {
                return Err("unphased genotype");
            }
            return Err("not a diploid genotype");
        }
    };
    if a2.contains('|') {
        return Err("not a diploid genotype");
    }
    if a1 == "." || a2 == "." {
        return Err("missing allele");
    }
    let a1: u32 = a1.parse().map_err(|_| "invalid allele index")?;
    let a2: u32 = a2.parse().map_err(|_| "invalid allele index")?;
    Ok((a1, a2))
}

/// VCF file writer with parallel record rendering
pub struct VcfWriter {
    out: Box<dyn Write + Send>,
}

impl VcfWriter {
    /// Create a VCF writer, BGZF-compressing when the filename ends in
    /// `.gz` or `.bgz`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let name = path.to_string_lossy();
        let out: Box<dyn Write + Send> = if is_compressed_name(&name) {
            Box::new(BgzfWriter::new(file))
        } else {
            Box::new(BufWriter::new(file))
        };
        Ok(Self { out })
    }

    /// Write to an arbitrary stream.
    pub fn from_writer(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    /// Write the meta-information lines, a `bref4Command` line describing
    /// this invocation, and the header line.
    pub fn write_header(&mut self, header: &Bref4Header, command: &str) -> Result<()> {
        for line in header.meta_info_lines() {
            writeln!(self.out, "{}", line)?;
        }
        writeln!(self.out, "##bref4Command=\"{}\"", command)?;
        write!(self.out, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT")?;
        for id in header.samples().ids() {
            write!(self.out, "\t{}", id)?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    /// Render and write a batch of records; rendering runs on parallel
    /// threads, writes stay in record order.
    pub fn write_records(&mut self, recs: &[RefGTRec], chrom_ids: &ChromIds) -> Result<()> {
        if recs.is_empty() {
            return Ok(());
        }
        let chunk_len = recs
            .len()
            .div_ceil(rayon::current_num_threads().max(1) * 4)
            .max(1);
        let rendered: Vec<String> = recs
            .par_chunks(chunk_len)
            .map(|chunk| {
                let mut text = String::with_capacity(chunk.len() * 64);
                for rec in chunk {
                    render_record(&mut text, rec, chrom_ids);
                }
                text
            })
            .collect();
        for text in rendered {
            self.out.write_all(text.as_bytes())?;
        }
        Ok(())
    }

    /// Flush buffered output.
    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

fn render_record(out: &mut String, rec: &RefGTRec, chrom_ids: &ChromIds) {
    use std::fmt::Write as _;

    let marker = rec.marker();
    let _ = write!(
        out,
        "{}\t{}\t{}\t{}\t",
        chrom_ids.name(marker.chrom),
        marker.pos,
        marker.id.as_deref().unwrap_or("."),
        marker.ref_allele,
    );
    for (i, alt) in marker.alt_alleles.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}", alt);
    }
    let _ = write!(
        out,
        "\t{}\t{}\t{}\tGT",
        marker.qual, marker.filter, marker.info
    );
    let n_haps = rec.size();
    let mut h = 0;
    while h < n_haps {
        let _ = write!(out, "\t{}|{}", rec.get(h), rec.get(h + 1));
        h += 2;
    }
    out.push('\n');
}
