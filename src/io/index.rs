//! # Bref4 Tail Index
//!
//! Every block contributes one index record `(file offset, chromosome,
//! first position, last position)`. The records are buffered in memory
//! during writing and appended after the end-of-blocks sentinel, followed
//! by an end-of-index marker and the absolute offset of the index body, so
//! a reader can locate the index with a single seek from the end of the
//! file.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use crate::data::{ChromIdx, ChromIds};
use crate::error::{Bref4Error, Result};
use crate::io::bits::{
    read_i32, read_i64, read_restricted_int, read_u8, read_utf, write_i32, write_i64, write_utf,
};

/// End-of-index marker
const END_OF_INDEX: i64 = -1;

/// Append one block's index record to the in-memory index buffer.
pub fn append_entry(
    index_buf: &mut Vec<u8>,
    offset: u64,
    chrom: &str,
    start_pos: u32,
    end_pos: u32,
) -> Result<()> {
    write_i64(index_buf, offset as i64)?;
    write_utf(index_buf, chrom)?;
    write_i32(index_buf, start_pos as i32)?;
    write_i32(index_buf, end_pos as i32)?;
    Ok(())
}

/// Derive an index record from a block's leading fields and append it.
///
/// Only the small header of the block is parsed: record count, last
/// position, map count, chromosome, and the first marker's position delta
/// (which is the absolute first position).
pub fn append_entry_from_block(index_buf: &mut Vec<u8>, offset: u64, block: &[u8]) -> Result<()> {
    let mut cursor = Cursor::new(block);
    let _n_recs = read_i32(&mut cursor)?;
    let end_pos = read_i32(&mut cursor)?;
    let _n_maps = read_u8(&mut cursor)?;
    let chrom = read_utf(&mut cursor)?;
    let start_pos = read_restricted_int(&mut cursor)?;
    if end_pos < 0 || start_pos < 0 {
        return Err(Bref4Error::corrupt("negative position in block header"));
    }
    append_entry(index_buf, offset, &chrom, start_pos as u32, end_pos as u32)
}

/// Write the index tail: the buffered index body, the end-of-index marker,
/// and the absolute file offset of the index body.
pub fn write_tail<W: Write>(index_buf: &[u8], index_offset: u64, out: &mut W) -> Result<()> {
    out.write_all(index_buf)?;
    write_i64(out, END_OF_INDEX)?;
    write_i64(out, index_offset as i64)?;
    Ok(())
}

/// The parsed tail index of a bref4 file: per-chromosome sorted block
/// intervals with their file offsets.
#[derive(Debug)]
pub struct Bref4Index {
    // row is the chromosome index assigned by the interner
    chrom_names: Vec<Arc<str>>,
    start_pos: Vec<Vec<u32>>,
    end_pos: Vec<Vec<u32>>,
    offsets: Vec<Vec<u64>>,
    n_blocks: usize,
}

impl Bref4Index {
    /// Read the index from the tail of a bref4 file.
    pub fn read(path: &Path, chrom_ids: &Arc<ChromIds>) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < 8 {
            return Err(Bref4Error::corrupt("file too short to hold an index"));
        }
        file.seek(SeekFrom::End(-8))?;
        let index_offset = read_i64(&mut file)?;
        if index_offset < 0 || index_offset as u64 >= file_len {
            return Err(Bref4Error::corrupt(format!(
                "index offset {} out of range",
                index_offset
            )));
        }
        file.seek(SeekFrom::Start(index_offset as u64))?;
        Self::read_body(&mut file, chrom_ids)
    }

    fn read_body<R: Read>(input: &mut R, chrom_ids: &Arc<ChromIds>) -> Result<Self> {
        let mut chrom_names: Vec<Arc<str>> = Vec::new();
        let mut start_pos: Vec<Vec<u32>> = Vec::new();
        let mut end_pos: Vec<Vec<u32>> = Vec::new();
        let mut offsets: Vec<Vec<u64>> = Vec::new();
        let mut n_blocks = 0;
        loop {
            let offset = read_i64(input)?;
            if offset == END_OF_INDEX {
                break;
            }
            if offset < 0 {
                return Err(Bref4Error::corrupt(format!(
                    "negative block offset {} in index",
                    offset
                )));
            }
            let chrom = read_utf(input)?;
            let start = read_i32(input)?;
            let end = read_i32(input)?;
            if start < 0 || end < start {
                return Err(Bref4Error::corrupt(format!(
                    "invalid block interval [{}, {}] in index",
                    start, end
                )));
            }
            let interned = chrom_ids.intern(&chrom);
            let chrom_idx = interned.as_usize();
            while chrom_idx >= start_pos.len() {
                chrom_names.push(chrom_ids.name(crate::data::ChromIdx::new(
                    start_pos.len() as u16,
                )));
                start_pos.push(Vec::new());
                end_pos.push(Vec::new());
                offsets.push(Vec::new());
            }
            start_pos[chrom_idx].push(start as u32);
            end_pos[chrom_idx].push(end as u32);
            offsets[chrom_idx].push(offset as u64);
            n_blocks += 1;
        }
        Ok(Self {
            chrom_names,
            start_pos,
            end_pos,
            offsets,
            n_blocks,
        })
    }

    /// Total number of blocks
    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }

    /// Number of blocks on one chromosome
    pub fn n_chrom_blocks(&self, chrom: ChromIdx) -> usize {
        self.start_pos
            .get(chrom.as_usize())
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// First position of the given block
    pub fn start_pos(&self, chrom: ChromIdx, block: usize) -> u32 {
        self.start_pos[chrom.as_usize()][block]
    }

    /// Last position of the given block
    pub fn end_pos(&self, chrom: ChromIdx, block: usize) -> u32 {
        self.end_pos[chrom.as_usize()][block]
    }

    /// File offset of the given block's length prefix
    pub fn offset(&self, chrom: ChromIdx, block: usize) -> u64 {
        self.offsets[chrom.as_usize()][block]
    }

    /// Index of the first block whose interval contains `pos`, or of the
    /// first block starting after `pos`; `n_chrom_blocks(chrom)` if no
    /// such block exists.
    pub fn block(&self, chrom: ChromIdx, pos: u32) -> usize {
        let Some(ends) = self.end_pos.get(chrom.as_usize()) else {
            return 0;
        };
        match ends.binary_search(&pos) {
            Ok(mut i) => {
                while i > 0 && ends[i - 1] == pos {
                    i -= 1;
                }
                i
            }
            Err(i) => i,
        }
    }

    /// Index of the first block whose start position is greater than `pos`.
    pub fn next_block(&self, chrom: ChromIdx, pos: u32) -> usize {
        let Some(starts) = self.start_pos.get(chrom.as_usize()) else {
            return 0;
        };
        match starts.binary_search(&pos) {
            Ok(mut i) => {
                i += 1;
                while i < starts.len() && starts[i] == pos {
                    i += 1;
                }
                i
            }
            Err(i) => i,
        }
    }
}

impl std::fmt::Display for Bref4Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "BLOCK\tCHROM\tSTART\tEND\tOFFSET")?;
        let mut block_no = 0usize;
        for (chrom_idx, name) in self.chrom_names.iter().enumerate() {
            for k in 0..self.offsets[chrom_idx].len() {
                block_no += 1;
                writeln!(
                    f,
                    "{}\t{}\t{}\t{}\t{}",
                    block_no,
                    name,
                    self.start_pos[chrom_idx][k],
                    self.end_pos[chrom_idx][k],
                    self.offsets[chrom_idx][k],
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_from_entries(entries: &[(u64, &str, u32, u32)]) -> (Bref4Index, Arc<ChromIds>) {
        let mut buf = Vec::new();
        for &(offset, chrom, start, end) in entries {
            append_entry(&mut buf, offset, chrom, start, end).unwrap();
        }
        write_i64(&mut buf, END_OF_INDEX).unwrap();
        let chrom_ids = Arc::new(ChromIds::new());
        let index = Bref4Index::read_body(&mut Cursor::new(&buf), &chrom_ids).unwrap();
        (index, chrom_ids)
    }

    #[test]
    fn test_index_round_trip() {
        let (index, chrom_ids) = index_from_entries(&[
            (100, "chr1", 1000, 1999),
            (200, "chr1", 2000, 2999),
            (300, "chr2", 10, 20),
        ]);
        assert_eq!(index.n_blocks(), 3);
        let chr1 = chrom_ids.intern("chr1");
        let chr2 = chrom_ids.intern("chr2");
        assert_eq!(index.n_chrom_blocks(chr1), 2);
        assert_eq!(index.n_chrom_blocks(chr2), 1);
        assert_eq!(index.offset(chr1, 1), 200);
        assert_eq!(index.start_pos(chr2, 0), 10);
        assert_eq!(index.end_pos(chr1, 0), 1999);
    }

    #[test]
    fn test_block_lookup() {
        let (index, chrom_ids) = index_from_entries(&[
            (100, "chr1", 1000, 1999),
            (200, "chr1", 2000, 2999),
        ]);
        let chr1 = chrom_ids.intern("chr1");
        assert_eq!(index.block(chr1, 500), 0);
        assert_eq!(index.block(chr1, 1500), 0);
        assert_eq!(index.block(chr1, 2000), 1);
        assert_eq!(index.block(chr1, 5000), 2);
        assert_eq!(index.next_block(chr1, 1000), 1);
        assert_eq!(index.next_block(chr1, 999), 0);
    }

    #[test]
    fn test_display_lists_blocks_in_order() {
        let (index, _) = index_from_entries(&[
            (100, "chr1", 1000, 1999),
            (200, "chr2", 10, 20),
        ]);
        let text = index.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "BLOCK\tCHROM\tSTART\tEND\tOFFSET");
        assert_eq!(lines[1], "1\tchr1\t1000\t1999\t100");
        assert_eq!(lines[2], "2\tchr2\t10\t20\t200");
    }

    #[test]
    fn test_entry_from_block_header() {
        // assemble a minimal block header: n_recs, last_pos, n_maps, chrom, first delta
        let mut block = Vec::new();
        write_i32(&mut block, 2).unwrap();
        write_i32(&mut block, 5_000_000).unwrap();
        block.push(3);
        write_utf(&mut block, "chr7").unwrap();
        crate::io::bits::write_restricted_int(&mut block, 4_900_000).unwrap();

        let mut buf = Vec::new();
        append_entry_from_block(&mut buf, 42, &block).unwrap();
        write_i64(&mut buf, END_OF_INDEX).unwrap();
        let chrom_ids = Arc::new(ChromIds::new());
        let index = Bref4Index::read_body(&mut Cursor::new(&buf), &chrom_ids).unwrap();
        let chr7 = chrom_ids.intern("chr7");
        assert_eq!(index.offset(chr7, 0), 42);
        assert_eq!(index.start_pos(chr7, 0), 4_900_000);
        assert_eq!(index.end_pos(chr7, 0), 5_000_000);
    }
}
