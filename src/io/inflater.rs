//! # Block Inflater
//!
//! Converts one bref4 block byte sequence back into records. Blocks are
//! self-contained, so independent blocks can be inflated on parallel
//! threads; one inflater call handles one block and reuses a single
//! composition scratch buffer across the block's records.

use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::data::ints::IndexArray;
use crate::data::marker::Marker;
use crate::data::rec::{AlleleRec, IntArrayRec, MapRec, RefGTRec};
use crate::data::ChromIds;
use crate::error::{Bref4Error, Result};
use crate::io::bits::{
    read_i32, read_packed_array, read_restricted_int, read_u8, read_utf, SENTINEL_BYTE,
};

/// Decodes bref4 blocks into records
pub struct BlockInflater {
    n_haps: usize,
    chrom_ids: Arc<ChromIds>,
}

impl BlockInflater {
    pub fn new(n_haps: usize, chrom_ids: Arc<ChromIds>) -> Self {
        Self { n_haps, chrom_ids }
    }

    /// Inflate one block. Returns no records for an empty byte sequence.
    pub fn inflate(&self, bytes: &[u8]) -> Result<Vec<RefGTRec>> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        let mut input = Cursor::new(bytes);
        let n_recs = read_i32(&mut input)?;
        if n_recs <= 0 {
            return Err(Bref4Error::corrupt(format!(
                "block record count {} out of range",
                n_recs
            )));
        }
        let _last_pos = read_i32(&mut input)?;
        let n_maps = read_u8(&mut input)? as usize;
        let chrom_name = read_utf(&mut input)?;
        let chrom = self.chrom_ids.intern(&chrom_name);

        // The first ceil((n_maps + 1) / 2) maps compose into hap -> seq,
        // the rest into seq -> allele.
        let n_hap_to_seq_maps = (n_maps + 1) >> 1;
        let mut maps: Vec<Option<IndexArray>> = vec![None; n_maps];
        let mut hap_to_seq: Option<Arc<IndexArray>> = None;
        let mut scratch = vec![0u32; self.n_haps];

        let mut records = Vec::with_capacity(n_recs as usize);
        let mut last_pos = 0u32;
        for _ in 0..n_recs {
            let delta = read_restricted_int(&mut input)?;
            if delta < 0 {
                return Err(Bref4Error::corrupt("negative position delta"));
            }
            let pos = last_pos
                .checked_add(delta as u32)
                .ok_or_else(|| Bref4Error::corrupt("position overflow"))?;
            let marker = Marker::read_non_pos_fields(chrom, pos, &mut input)?;
            last_pos = pos;

            let tag = read_u8(&mut input)?;
            if tag == SENTINEL_BYTE {
                records.push(self.read_allele_rec(marker, &mut input)?);
            } else if (tag as i8) >= 0 {
                let start = tag as usize;
                if n_maps == 0 || start >= n_maps {
                    return Err(Bref4Error::corrupt(format!(
                        "map start index {} out of range [0, {})",
                        start, n_maps
                    )));
                }
                self.read_maps(&mut maps, start, &mut input)?;
                if n_hap_to_seq_maps == n_maps {
                    // a one-map chain is the packed alleles themselves
                    let alleles = required(&maps, 0)?.clone();
                    records.push(IntArrayRec::new(marker, alleles));
                } else {
                    if start < n_hap_to_seq_maps {
                        hap_to_seq = Some(Arc::new(compose(
                            &maps,
                            0,
                            n_hap_to_seq_maps,
                            &mut scratch,
                        )?));
                    }
                    let seq_to_allele = compose(&maps, n_hap_to_seq_maps, n_maps, &mut scratch)?;
                    let hap_to_seq = hap_to_seq
                        .clone()
                        .ok_or_else(|| Bref4Error::corrupt("record depends on an absent map"))?;
                    records.push(MapRec::new(marker, hap_to_seq, seq_to_allele)?);
                }
            } else {
                return Err(Bref4Error::corrupt(format!("invalid record tag {}", tag)));
            }
        }
        Ok(records)
    }

    /// Read `maps[start..]`, chaining each map's length to the value size
    /// of its predecessor.
    fn read_maps<R: Read>(
        &self,
        maps: &mut [Option<IndexArray>],
        start: usize,
        input: &mut R,
    ) -> Result<()> {
        let mut size = if start == 0 {
            self.n_haps
        } else {
            required(maps, start - 1)?.value_size() as usize
        };
        for slot in maps[start..].iter_mut() {
            if size > self.n_haps {
                return Err(Bref4Error::corrupt(format!(
                    "map length {} exceeds haplotype count {}",
                    size, self.n_haps
                )));
            }
            let map = read_packed_array(input, size)?;
            size = map.value_size() as usize;
            *slot = Some(map);
        }
        Ok(())
    }

    fn read_allele_rec<R: Read>(&self, marker: Marker, input: &mut R) -> Result<RefGTRec> {
        let n_alleles = marker.n_alleles();
        let mut lists: Vec<Option<Vec<u32>>> = Vec::with_capacity(n_alleles);
        for _ in 0..n_alleles {
            let len = read_restricted_int(input)?;
            if len == -1 {
                lists.push(None);
                continue;
            }
            if len as usize > self.n_haps {
                return Err(Bref4Error::corrupt(format!(
                    "carrier list of {} haplotypes exceeds haplotype count {}",
                    len, self.n_haps
                )));
            }
            let mut list = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let hap = read_i32(input)?;
                if hap < 0 || hap as usize >= self.n_haps {
                    return Err(Bref4Error::corrupt(format!(
                        "haplotype index {} out of range [0, {})",
                        hap, self.n_haps
                    )));
                }
                list.push(hap as u32);
            }
            lists.push(Some(list));
        }
        AlleleRec::from_lists(marker, self.n_haps, lists)
    }
}

fn required<'a>(maps: &'a [Option<IndexArray>], index: usize) -> Result<&'a IndexArray> {
    maps[index]
        .as_ref()
        .ok_or_else(|| Bref4Error::corrupt("record depends on an absent map"))
}

/// Compose `maps[from..to]` element-wise: `v_{j+1} = maps[j+1].get(v_j)`.
/// The result has the length of `maps[from]` and the value size of
/// `maps[to - 1]`.
fn compose(
    maps: &[Option<IndexArray>],
    from: usize,
    to: usize,
    scratch: &mut [u32],
) -> Result<IndexArray> {
    let first = required(maps, from)?;
    let size = first.size();
    if size > scratch.len() {
        return Err(Bref4Error::corrupt(format!(
            "map length {} exceeds haplotype count {}",
            size,
            scratch.len()
        )));
    }
    for (k, slot) in scratch[..size].iter_mut().enumerate() {
        *slot = first.get(k);
    }
    let mut value_size = first.value_size();
    for map in &maps[from + 1..to] {
        let map = map
            .as_ref()
            .ok_or_else(|| Bref4Error::corrupt("record depends on an absent map"))?;
        if value_size as usize > map.size() {
            return Err(Bref4Error::corrupt("map chain length mismatch"));
        }
        for slot in scratch[..size].iter_mut() {
            *slot = map.get(*slot as usize);
        }
        value_size = map.value_size();
    }
    Ok(IndexArray::from_values(&scratch[..size], value_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bits::{write_i32, write_restricted_int, write_utf};

    #[test]
    fn test_empty_block_yields_no_records() {
        let chrom_ids = Arc::new(ChromIds::new());
        let inflater = BlockInflater::new(4, chrom_ids);
        assert!(inflater.inflate(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_record_count_rejected() {
        let chrom_ids = Arc::new(ChromIds::new());
        let inflater = BlockInflater::new(4, chrom_ids);
        let mut block = Vec::new();
        write_i32(&mut block, -3).unwrap();
        write_i32(&mut block, 100).unwrap();
        block.push(0);
        write_utf(&mut block, "chr1").unwrap();
        assert!(matches!(
            inflater.inflate(&block),
            Err(Bref4Error::CorruptBlock { .. })
        ));
    }

    #[test]
    fn test_map_start_out_of_range_rejected() {
        let chrom_ids = Arc::new(ChromIds::new());
        let inflater = BlockInflater::new(4, chrom_ids);
        let mut block = Vec::new();
        write_i32(&mut block, 1).unwrap();
        write_i32(&mut block, 100).unwrap();
        block.push(0); // no maps in this block
        write_utf(&mut block, "chr1").unwrap();
        write_restricted_int(&mut block, 100).unwrap();
        // marker: id ".", allele code for [A, C], qual/filter/info
        write_utf(&mut block, ".").unwrap();
        block.push(0b01);
        write_utf(&mut block, ".").unwrap();
        write_utf(&mut block, "PASS").unwrap();
        write_utf(&mut block, ".").unwrap();
        block.push(0); // claims a map chain although n_maps == 0
        assert!(matches!(
            inflater.inflate(&block),
            Err(Bref4Error::CorruptBlock { .. })
        ));
    }

    #[test]
    fn test_compose() {
        let maps = vec![
            Some(IndexArray::from_values(&[0, 1, 1, 2], 3)),
            Some(IndexArray::from_values(&[2, 0, 1], 3)),
        ];
        let mut scratch = vec![0u32; 4];
        let composed = compose(&maps, 0, 2, &mut scratch).unwrap();
        assert_eq!(composed.to_vec(), vec![2, 0, 0, 1]);
        assert_eq!(composed.value_size(), 3);
    }
}
