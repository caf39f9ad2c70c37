//! End-to-end conversion tests: VCF through bref4 and back, block
//! boundary behavior, the hierarchical coder's spill path, sparse
//! records, and re-emission stability.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use bref4::config::Config;
use bref4::data::rec::RefGTRec;
use bref4::data::ChromIds;
use bref4::error::Bref4Error;
use bref4::io::index::Bref4Index;
use bref4::io::reader::{Bref4Reader, Bref4RecIt};
use bref4::pipelines::convert;

const HEADER_PREFIX: &str = "##fileformat=VCFv4.2\n##contig=<ID=chr1>\n";

fn vcf_header(sample_ids: &[String]) -> String {
    let mut text = String::from(HEADER_PREFIX);
    text.push_str("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT");
    for id in sample_ids {
        text.push('\t');
        text.push_str(id);
    }
    text.push('\n');
    text
}

fn sample_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("S{}", i)).collect()
}

fn run(args: &[String]) -> bref4::Result<()> {
    let config = Config::from_args(args)?;
    convert::run(&config)
}

fn convert_files(input: &Path, output: &Path) -> bref4::Result<()> {
    run(&[
        format!("in={}", input.display()),
        format!("out={}", output.display()),
    ])
}

fn read_all_records(path: &Path) -> Vec<RefGTRec> {
    let chrom_ids = Arc::new(ChromIds::new());
    let reader = Bref4Reader::open(path).unwrap();
    let mut it = Bref4RecIt::new(reader, chrom_ids, 2);
    let mut records = Vec::new();
    while let Some(mut recs) = it.next_records().unwrap() {
        records.append(&mut recs);
    }
    records
}

fn genotypes(rec: &RefGTRec) -> Vec<u32> {
    (0..rec.size()).map(|h| rec.get(h)).collect()
}

fn data_lines(vcf_text: &str) -> Vec<&str> {
    vcf_text.lines().filter(|l| !l.starts_with('#')).collect()
}

struct Workspace {
    _dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        Self { _dir: dir, root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn write_vcf(&self, name: &str, text: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, text).unwrap();
        path
    }
}

#[test]
fn minimal_diallelic_single_sample() {
    let ws = Workspace::new();
    let mut text = vcf_header(&sample_ids(1));
    text.push_str("chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0|1\n");
    let vcf = ws.write_vcf("in.vcf", &text);
    let bref = ws.path("out.bref4");
    convert_files(&vcf, &bref).unwrap();

    let records = read_all_records(&bref);
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert!(matches!(rec, RefGTRec::Allele(_)));
    assert_eq!(rec.size(), 2);
    let lists = rec.allele_to_haps();
    assert!(lists[0].is_none());
    assert_eq!(lists[1].as_deref(), Some(&[1u32][..]));

    let chrom_ids = Arc::new(ChromIds::new());
    let index = Bref4Index::read(&bref, &chrom_ids).unwrap();
    assert_eq!(index.n_blocks(), 1);
    let chr1 = chrom_ids.intern("chr1");
    assert_eq!(index.start_pos(chr1, 0), 100);
    assert_eq!(index.end_pos(chr1, 0), 100);
}

#[test]
fn chromosome_boundary_forces_flush() {
    let ws = Workspace::new();
    let mut text = vcf_header(&sample_ids(2));
    text.push_str("chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0|1\t0|0\n");
    text.push_str("chr1\t150\t.\tT\tC\t.\tPASS\t.\tGT\t1|1\t0|1\n");
    text.push_str("chr2\t10\t.\tG\tA\t.\tPASS\t.\tGT\t0|0\t1|0\n");
    let vcf = ws.write_vcf("in.vcf", &text);
    let bref = ws.path("out.bref4");
    convert_files(&vcf, &bref).unwrap();

    let chrom_ids = Arc::new(ChromIds::new());
    let index = Bref4Index::read(&bref, &chrom_ids).unwrap();
    assert_eq!(index.n_blocks(), 2);
    assert_eq!(index.n_chrom_blocks(chrom_ids.intern("chr1")), 1);
    assert_eq!(index.n_chrom_blocks(chrom_ids.intern("chr2")), 1);

    let records = read_all_records(&bref);
    assert_eq!(records.len(), 3);
    assert_eq!(genotypes(&records[0]), vec![0, 1, 0, 0]);
    assert_eq!(genotypes(&records[1]), vec![1, 1, 0, 1]);
    assert_eq!(genotypes(&records[2]), vec![0, 0, 1, 0]);
    assert_eq!(records[2].marker().pos, 10);

    let out_vcf = ws.path("out.vcf");
    convert_files(&bref, &out_vcf).unwrap();
    let out_text = fs::read_to_string(&out_vcf).unwrap();
    assert_eq!(data_lines(&out_text), data_lines(&text));
}

/// 32 rotating-carrier markers over 64 haplotypes: every marker refines
/// the top-level partition, so the capacity-16 coder spills and the file
/// ends up with multiple hierarchically coded blocks.
fn rotating_carrier_vcf(n_markers: usize, n_samples: usize) -> String {
    let n_haps = 2 * n_samples;
    let mut text = vcf_header(&sample_ids(n_samples));
    for j in 0..n_markers {
        let carried: Vec<bool> = (0..n_haps).map(|h| (h + j) % n_haps < 29).collect();
        text.push_str(&format!("chr1\t{}\t.\tA\tG\t.\tPASS\t.\tGT", 1000 + j));
        for s in 0..n_samples {
            text.push_str(&format!(
                "\t{}|{}",
                carried[2 * s] as u8,
                carried[2 * s + 1] as u8
            ));
        }
        text.push('\n');
    }
    text
}

#[test]
fn admission_failure_triggers_spill() {
    let ws = Workspace::new();
    let text = rotating_carrier_vcf(32, 32);
    let vcf = ws.write_vcf("in.vcf", &text);
    let bref = ws.path("out.bref4");
    convert_files(&vcf, &bref).unwrap();

    let chrom_ids = Arc::new(ChromIds::new());
    let index = Bref4Index::read(&bref, &chrom_ids).unwrap();
    assert!(
        index.n_blocks() >= 2,
        "expected the coder to spill into multiple blocks, found {}",
        index.n_blocks()
    );

    let records = read_all_records(&bref);
    assert_eq!(records.len(), 32);
    assert!(records.iter().any(|r| matches!(r, RefGTRec::Map(_))));
    let n_haps = 64;
    for (j, rec) in records.iter().enumerate() {
        let expected: Vec<u32> = (0..n_haps).map(|h| ((h + j) % n_haps < 29) as u32).collect();
        assert_eq!(genotypes(rec), expected, "record {}", j);
    }

    let out_vcf = ws.path("out.vcf");
    convert_files(&bref, &out_vcf).unwrap();
    let out_text = fs::read_to_string(&out_vcf).unwrap();
    assert_eq!(data_lines(&out_text), data_lines(&text));
}

#[test]
fn deeper_level_chain_round_trips() {
    let ws = Workspace::new();
    let text = rotating_carrier_vcf(32, 32);
    let vcf = ws.write_vcf("in.vcf", &text);
    let bref = ws.path("out.bref4");
    // two coder levels: capacities 32 and 16
    run(&[
        format!("in={}", vcf.display()),
        format!("out={}", bref.display()),
        "bits-per-level=1".to_string(),
    ])
    .unwrap();

    let records = read_all_records(&bref);
    assert_eq!(records.len(), 32);
    let n_haps = 64;
    for (j, rec) in records.iter().enumerate() {
        let expected: Vec<u32> = (0..n_haps).map(|h| ((h + j) % n_haps < 29) as u32).collect();
        assert_eq!(genotypes(rec), expected, "record {}", j);
    }
}

#[test]
fn flat_one_map_chain_for_small_cohorts() {
    // 16 haplotypes leave no room for coder levels, so an eligible record
    // is stored as a single packed map and decodes to the flat variant
    let ws = Workspace::new();
    let mut text = vcf_header(&sample_ids(8));
    text.push_str("chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0|1\t1|0\t0|1\t1|0\t0|1\t1|0\t0|0\t0|0\n");
    text.push_str("chr1\t200\t.\tC\tT\t.\tPASS\t.\tGT\t1|1\t1|1\t1|0\t0|0\t0|0\t0|0\t0|1\t0|0\n");
    let vcf = ws.write_vcf("in.vcf", &text);
    let bref = ws.path("out.bref4");
    convert_files(&vcf, &bref).unwrap();

    let records = read_all_records(&bref);
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| matches!(r, RefGTRec::IntArray(_))));
    assert_eq!(
        genotypes(&records[0]),
        vec![0, 1, 1, 0, 0, 1, 1, 0, 0, 1, 1, 0, 0, 0, 0, 0]
    );
    assert_eq!(
        genotypes(&records[1]),
        vec![1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0]
    );

    let out_vcf = ws.path("out.vcf");
    convert_files(&bref, &out_vcf).unwrap();
    let out_text = fs::read_to_string(&out_vcf).unwrap();
    assert_eq!(data_lines(&out_text), data_lines(&text));
}

#[test]
fn singleton_record_takes_sparse_path() {
    let ws = Workspace::new();
    let n_samples = 10_000;
    let mut text = vcf_header(&sample_ids(n_samples));
    // exactly one of 20,000 haplotypes carries the alternate allele
    text.push_str("chr1\t500\trs9\tC\tT\t.\tPASS\t.\tGT");
    for s in 0..n_samples {
        text.push_str(if s == 3 { "\t0|1" } else { "\t0|0" });
    }
    text.push('\n');
    let vcf = ws.write_vcf("in.vcf", &text);
    let bref = ws.path("out.bref4");
    convert_files(&vcf, &bref).unwrap();

    let records = read_all_records(&bref);
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert!(matches!(rec, RefGTRec::Allele(_)));
    assert_eq!(rec.size(), 20_000);
    assert_eq!(rec.non_null_count(), 1);
    let lists = rec.allele_to_haps();
    assert_eq!(lists[1].as_deref(), Some(&[7u32][..]));

    let out_vcf = ws.path("out.vcf");
    convert_files(&bref, &out_vcf).unwrap();
    let out_text = fs::read_to_string(&out_vcf).unwrap();
    assert_eq!(data_lines(&out_text), data_lines(&text));
}

#[test]
fn non_contiguous_chromosome_rejected() {
    let ws = Workspace::new();
    let mut text = vcf_header(&sample_ids(1));
    text.push_str("chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0|1\n");
    text.push_str("chr2\t10\t.\tT\tC\t.\tPASS\t.\tGT\t1|0\n");
    text.push_str("chr1\t200\t.\tG\tA\t.\tPASS\t.\tGT\t0|1\n");
    let vcf = ws.write_vcf("in.vcf", &text);

    let err = convert_files(&vcf, &ws.path("out.bref4")).unwrap_err();
    assert!(matches!(
        err,
        Bref4Error::NonContiguousChromosome { ref chrom } if chrom == "chr1"
    ));

    // the same stream is also rejected on the VCF output path
    let err = convert_files(&vcf, &ws.path("out2.vcf")).unwrap_err();
    assert!(matches!(err, Bref4Error::NonContiguousChromosome { .. }));
}

/// A mixed file: multiallelic sites, indels, sparse and dense records,
/// and two chromosomes.
fn mixed_vcf() -> String {
    let n_samples = 24;
    let mut text = vcf_header(&sample_ids(n_samples));
    for j in 0..40 {
        let pos = 1_000 + 17 * j;
        let (ref_a, alt, n_alleles) = match j % 4 {
            0 => ("A", "G", 2),
            1 => ("T", "C,G", 3),
            2 => ("AT", "A", 2),
            _ => ("C", "T", 2),
        };
        text.push_str(&format!(
            "chr1\t{}\trs{}\t{}\t{}\t{}\tPASS\tAC={}\tGT",
            pos,
            j,
            ref_a,
            alt,
            if j % 3 == 0 { "99" } else { "." },
            j
        ));
        for s in 0..n_samples {
            let a1 = (s + j) % n_alleles;
            let a2 = (s * 3 + j * 7) % n_alleles;
            text.push_str(&format!("\t{}|{}", a1, a2));
        }
        text.push('\n');
    }
    for j in 0..10 {
        text.push_str(&format!("chr2\t{}\t.\tG\tA\t.\tPASS\t.\tGT", 50 + j));
        for s in 0..n_samples {
            // record 9 carries the alternate allele on every haplotype, so
            // its reference carrier list is empty
            let gt = if j == 9 {
                "\t1|1"
            } else if (s + j) % 5 == 0 {
                "\t1|0"
            } else {
                "\t0|0"
            };
            text.push_str(gt);
        }
        text.push('\n');
    }
    text
}

#[test]
fn vcf_round_trip_preserves_genotype_matrix() {
    let ws = Workspace::new();
    let text = mixed_vcf();
    let vcf = ws.write_vcf("in.vcf", &text);
    let bref = ws.path("mid.bref4");
    let out_vcf = ws.path("out.vcf");
    convert_files(&vcf, &bref).unwrap();
    convert_files(&bref, &out_vcf).unwrap();

    let out_text = fs::read_to_string(&out_vcf).unwrap();
    assert_eq!(data_lines(&out_text), data_lines(&text));

    // meta-information lines are preserved, plus the inserted command line
    let meta: Vec<&str> = out_text
        .lines()
        .filter(|l| l.starts_with("##"))
        .collect();
    assert!(meta.contains(&"##fileformat=VCFv4.2"));
    assert!(meta.contains(&"##contig=<ID=chr1>"));
    assert!(meta.iter().any(|l| l.starts_with("##bref4Command=")));
}

#[test]
fn reemission_is_block_stable() {
    let ws = Workspace::new();
    let text = mixed_vcf();
    let vcf = ws.write_vcf("in.vcf", &text);
    let first = ws.path("first.bref4");
    let second = ws.path("second.bref4");
    convert_files(&vcf, &first).unwrap();
    convert_files(&first, &second).unwrap();

    // blocks are copied byte-for-byte
    let mut r1 = Bref4Reader::open(&first).unwrap();
    let mut r2 = Bref4Reader::open(&second).unwrap();
    loop {
        let b1 = r1.read_block().unwrap();
        let b2 = r2.read_block().unwrap();
        assert_eq!(b1, b2);
        if b1.is_none() {
            break;
        }
    }

    // the re-derived index covers the same intervals
    let ids1 = Arc::new(ChromIds::new());
    let ids2 = Arc::new(ChromIds::new());
    let i1 = Bref4Index::read(&first, &ids1).unwrap();
    let i2 = Bref4Index::read(&second, &ids2).unwrap();
    assert_eq!(i1.n_blocks(), i2.n_blocks());
    for chrom in ["chr1", "chr2"] {
        let c1 = ids1.intern(chrom);
        let c2 = ids2.intern(chrom);
        assert_eq!(i1.n_chrom_blocks(c1), i2.n_chrom_blocks(c2));
        for b in 0..i1.n_chrom_blocks(c1) {
            assert_eq!(i1.start_pos(c1, b), i2.start_pos(c2, b));
            assert_eq!(i1.end_pos(c1, b), i2.end_pos(c2, b));
        }
    }

    // a third pass decodes to the same records as the first
    let recs1 = read_all_records(&first);
    let recs2 = read_all_records(&second);
    assert_eq!(recs1.len(), recs2.len());
    for (a, b) in recs1.iter().zip(&recs2) {
        assert_eq!(a.marker().pos, b.marker().pos);
        assert_eq!(genotypes(a), genotypes(b));
    }
}

#[test]
fn gzip_input_is_accepted() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write as _;

    let ws = Workspace::new();
    let mut text = vcf_header(&sample_ids(2));
    text.push_str("chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0|1\t1|1\n");
    let gz_path = ws.path("in.vcf.gz");
    let mut encoder = GzEncoder::new(fs::File::create(&gz_path).unwrap(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap();

    let bref = ws.path("out.bref4");
    convert_files(&gz_path, &bref).unwrap();
    let records = read_all_records(&bref);
    assert_eq!(records.len(), 1);
    assert_eq!(genotypes(&records[0]), vec![0, 1, 1, 1]);
}
