/*!
Spare-area layout descriptors and the pack/unpack engine.

A descriptor is a sequence of `(offset, len)` segments naming where inside
the spare area a logical field lives. Three descriptors make a layout: one
for the tag store bytes, one for the page-data ECC run, one for the 16-bit
tag ECC. The block-status byte sits at a fixed offset outside any
descriptor.

Default layouts by page data size (offsets in bytes within the spare, `S` =
status byte):

| page data | tag store    | data ECC | tag ECC | S |
| --------- | ------------ | -------- | ------- | - |
| 256       | {0:4}        | {4:1, 6:2} | none  | 5 |
| 512       | {0:5, 6:1}   | {9:6}    | {7:2}   | 5 |
| 1024      | {0:5, 6:1}   | {9:12}   | {7:2}   | 5 |
| 2048+     | {0:5, 6:1}   | {9:24}   | {7:2}   | 5 |

These defaults are wire-fixed: existing volumes were written with them.
Writing never strays outside the segments; source bytes beyond the last
segment are silently dropped, so a layout's segments bound what survives on
flash (the 256-byte layout keeps only the first 4 tag-store bytes and has
nowhere to put a tag ECC).
*/

use crate::ecc::calculate_tag_ecc;
use crate::tag::{Tag, TAG_STORE_SIZE};

/// One contiguous byte range inside the spare area.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub offs: usize,
    pub len: usize,
}

const fn seg(offs: usize, len: usize) -> Segment {
    Segment { offs, len }
}

pub const P256_TAG: &[Segment] = &[seg(0, 4)];
pub const P256_ECC: &[Segment] = &[seg(4, 1), seg(6, 2)];
pub const P256_TAG_ECC: &[Segment] = &[];

pub const P512_TAG: &[Segment] = &[seg(0, 5), seg(6, 1)];
pub const P512_ECC: &[Segment] = &[seg(9, 6)];
pub const P512_TAG_ECC: &[Segment] = &[seg(7, 2)];

pub const P1K_TAG: &[Segment] = &[seg(0, 5), seg(6, 1)];
pub const P1K_ECC: &[Segment] = &[seg(9, 12)];
pub const P1K_TAG_ECC: &[Segment] = &[seg(7, 2)];

pub const P2K_TAG: &[Segment] = &[seg(0, 5), seg(6, 1)];
pub const P2K_ECC: &[Segment] = &[seg(9, 24)];
pub const P2K_TAG_ECC: &[Segment] = &[seg(7, 2)];

/// A resolved layout: the three descriptors plus the status-byte offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpareLayout {
    pub tag: Vec<Segment>,
    pub ecc: Vec<Segment>,
    pub tag_ecc: Vec<Segment>,
    pub block_status_offs: usize,
}

impl SpareLayout {
    /// The wire-fixed default for a page data size. Sizes of 2048 and above
    /// share the 2048 descriptor.
    pub fn defaults_for(page_data_size: usize, block_status_offs: usize) -> SpareLayout {
        let (tag, ecc, tag_ecc) = match page_data_size {
            256 => (P256_TAG, P256_ECC, P256_TAG_ECC),
            512 => (P512_TAG, P512_ECC, P512_TAG_ECC),
            1024 => (P1K_TAG, P1K_ECC, P1K_TAG_ECC),
            _ => (P2K_TAG, P2K_ECC, P2K_TAG_ECC),
        };
        SpareLayout {
            tag: tag.to_vec(),
            ecc: ecc.to_vec(),
            tag_ecc: tag_ecc.to_vec(),
            block_status_offs,
        }
    }

    /// Smallest spare prefix the interface has to read or write: one past
    /// the last byte any descriptor touches, or the status byte.
    pub fn required_spare_size(&self, ecc_size: usize) -> usize {
        let mut need = self.block_status_offs + 1;
        need = need.max(seg_end(&self.ecc, ecc_size));
        need = need.max(seg_end(&self.tag, TAG_STORE_SIZE));
        need.max(seg_end(&self.tag_ecc, 2))
    }

    /// Bytes the descriptor can actually hold.
    pub fn capacity(segs: &[Segment]) -> usize {
        segs.iter().map(|s| s.len).sum()
    }
}

fn seg_end(segs: &[Segment], budget: usize) -> usize {
    let mut remaining = budget;
    let mut last = 0;
    for s in segs {
        if remaining == 0 {
            break;
        }
        let n = s.len.min(remaining);
        last = last.max(s.offs + n);
        remaining -= n;
    }
    last
}

/// Write `src` across the segments until either side runs out.
fn scatter(segs: &[Segment], src: &[u8], spare: &mut [u8]) {
    let mut taken = 0;
    for s in segs {
        if taken >= src.len() {
            break;
        }
        let n = s.len.min(src.len() - taken);
        spare[s.offs..s.offs + n].copy_from_slice(&src[taken..taken + n]);
        taken += n;
    }
}

/// Read the segments back into `dst` until either side runs out.
fn gather(segs: &[Segment], spare: &[u8], dst: &mut [u8]) {
    let mut filled = 0;
    for s in segs {
        if filled >= dst.len() {
            break;
        }
        let n = s.len.min(dst.len() - filled);
        dst[filled..filled + n].copy_from_slice(&spare[s.offs..s.offs + n]);
        filled += n;
    }
}

/// Assemble a spare image: everything starts erased, then the data ECC run
/// (if any), the tag store, and the tag ECC land in their segments.
///
/// `tag.tag_ecc` is computed over the store bytes when `tag_ecc_enabled`,
/// else forced to `0xFFFF` (it is only ever checked on committed tags, and
/// the claim phase must not program bits it would have to re-program later).
pub fn pack_spare(
    layout: &SpareLayout,
    tag: &mut Tag,
    ecc: Option<&[u8]>,
    tag_ecc_enabled: bool,
    spare: &mut [u8],
) {
    spare.fill(0xFF);
    if let Some(ecc_bytes) = ecc {
        scatter(&layout.ecc, ecc_bytes, spare);
    }
    let store = tag.store_bytes();
    tag.tag_ecc = if tag_ecc_enabled { calculate_tag_ecc(&store) } else { 0xFFFF };
    scatter(&layout.tag, &store, spare);
    scatter(&layout.tag_ecc, &tag.tag_ecc.to_le_bytes(), spare);
}

/// Take a spare image apart: tag store, tag ECC, block status, and
/// optionally the data ECC run.
pub fn unpack_spare(layout: &SpareLayout, spare: &[u8], ecc: Option<&mut [u8]>) -> Tag {
    let mut store = [0xFFu8; TAG_STORE_SIZE];
    gather(&layout.tag, spare, &mut store);
    let mut tag = Tag::from_store_bytes(&store);
    let mut code = [0xFFu8; 2];
    gather(&layout.tag_ecc, spare, &mut code);
    tag.tag_ecc = u16::from_le_bytes(code);
    if let Some(ecc_out) = ecc {
        gather(&layout.ecc, spare, ecc_out);
    }
    tag.block_status = spare[layout.block_status_offs];
    tag
}
