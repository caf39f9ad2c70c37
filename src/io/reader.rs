//! # Bref4 Reader
//!
//! Streaming access to a bref4 file: the header, the raw length-prefixed
//! blocks, and a record iterator that inflates batches of blocks on
//! parallel threads while preserving input order.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use crate::data::rec::RefGTRec;
use crate::data::ChromIds;
use crate::error::{Bref4Error, Result};
use crate::io::bits::read_i32;
use crate::io::header::Bref4Header;
use crate::io::inflater::BlockInflater;

/// Reads the header and raw blocks of a bref4 stream
pub struct Bref4Reader {
    input: Box<dyn Read + Send>,
    header: Bref4Header,
    done: bool,
}

impl Bref4Reader {
    /// Open a bref4 file and read its header.
    pub fn open(path: &Path) -> Result<Self> {
        let input: Box<dyn Read + Send> = Box::new(BufReader::new(File::open(path)?));
        Self::from_reader(input)
    }

    /// Read from an arbitrary stream.
    pub fn from_reader(mut input: Box<dyn Read + Send>) -> Result<Self> {
        let header = Bref4Header::read(&mut input)?;
        Ok(Self {
            input,
            header,
            done: false,
        })
    }

    /// The file header
    pub fn header(&self) -> &Bref4Header {
        &self.header
    }

    /// Read the next length-prefixed block, or `None` after the
    /// end-of-blocks sentinel.
    pub fn read_block(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        let n_bytes = read_i32(&mut self.input)?;
        if n_bytes == 0 {
            self.done = true;
            return Ok(None);
        }
        if n_bytes < 0 {
            return Err(Bref4Error::corrupt(format!(
                "negative block length {}",
                n_bytes
            )));
        }
        let mut bytes = vec![0u8; n_bytes as usize];
        self.input.read_exact(&mut bytes)?;
        Ok(Some(bytes))
    }

    /// Read up to `n` blocks; fewer are returned at end of data.
    pub fn read_blocks(&mut self, n: usize) -> Result<Vec<Vec<u8>>> {
        let mut blocks = Vec::with_capacity(n);
        for _ in 0..n {
            match self.read_block()? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }
}

/// Iterates the records of a bref4 file, inflating a batch of blocks in
/// parallel and yielding each block's records in input order.
pub struct Bref4RecIt {
    reader: Bref4Reader,
    inflater: BlockInflater,
    max_blocks: usize,
    buffers: VecDeque<Vec<RefGTRec>>,
}

impl Bref4RecIt {
    pub fn new(reader: Bref4Reader, chrom_ids: Arc<ChromIds>, n_threads: usize) -> Self {
        let n_haps = reader.header().n_haps();
        Self {
            reader,
            inflater: BlockInflater::new(n_haps, chrom_ids),
            max_blocks: n_threads.max(1) << 4,
            buffers: VecDeque::new(),
        }
    }

    /// The file header
    pub fn header(&self) -> &Bref4Header {
        &self.reader.header
    }

    /// The next block's records, or `None` at end of data.
    pub fn next_records(&mut self) -> Result<Option<Vec<RefGTRec>>> {
        while self.buffers.is_empty() {
            let blocks = self.reader.read_blocks(self.max_blocks)?;
            if blocks.is_empty() {
                return Ok(None);
            }
            let decoded: Result<Vec<Vec<RefGTRec>>> = blocks
                .par_iter()
                .map(|block| self.inflater.inflate(block))
                .collect();
            self.buffers.extend(decoded?);
        }
        Ok(self.buffers.pop_front())
    }
}
