/*!
The flash page interface: everything the layer above does to a page goes
through here, on top of an injected [`FlashOps`] driver.

# The three-phase write

[`Device::write_page_combine`] is what makes a page commit atomically
observable across power loss:

| phase | programs | after a crash here, readers see |
| ----- | -------- | ------------------------------- |
| 1 | a tag with only `dirty` cleared | `dirty=0, valid=1`: a torn write |
| 2 | the page data (plus its ECC)    | `dirty=0, valid=1`: a torn write |
| 3 | the full tag with `valid` cleared, its ECC, and the data ECC | `dirty=0, valid=0`: committed |

The phases run strictly in order and the ordering, not the individual
writes, is the crash-safety guarantee: an untouched page still reads
`dirty=1`, and nothing reads as committed until the last spare program
lands.

# Bad blocks

This module is the single place that feeds the device's
[`BadBlockList`](crate::device::BadBlockList): any driver-raised suspicion
and any unrecoverable ECC failure gets the block recorded (and a warning
logged). Recording is all that happens here; rescuing live data and
punching the on-flash mark are the layer above's call. A successful
correction alone never condemns a block.
*/

use crate::device::{Device, EccOption, LayoutOption, PageBuf};
use crate::ecc;
use crate::layout::{pack_spare, unpack_spare};
use crate::tag::{Tag, TAG_STORE_SIZE};
use crate::FlashResult;

/// Serialized size of a full tag handed to `*_with_layout` drivers: the
/// store bytes followed by the little-endian tag ECC.
pub const TAG_WIRE_SIZE: usize = TAG_STORE_SIZE + 2;

/// The capability a NAND driver injects under a device.
///
/// Every operation returns a [`FlashResult`]; drivers signal bad-block
/// suspicion by setting its flag on an otherwise ordinary result. Spare
/// buffers passed in may cover only a prefix of the physical spare area.
///
/// Depending on [`LayoutOption`], a driver serves either the raw-spare
/// calls or the `*_with_layout` pair (the defaults for the latter report
/// `IO_ERR`, so a raw-layout driver never has to think about them, and the
/// inverse holds for a with-layout driver). A `with_layout` driver
/// receives tags as [`TAG_WIRE_SIZE`] byte runs; a shorter slice is a
/// prefix (phase 1 of a write sends just the first store byte). Since such
/// a driver owns the spare geometry, it is also the only party that can
/// see the block-status byte, and reports it through the read call's
/// `block_status` out-parameter.
pub trait FlashOps {
    fn init_device(&mut self) -> FlashResult {
        FlashResult::NO_ERR
    }

    fn release_device(&mut self) -> FlashResult {
        FlashResult::NO_ERR
    }

    /// Read page data. In `Hw` ECC mode the driver writes the page's ECC
    /// run into `ecc`; in `HwAuto` it corrects internally and `ecc` stays
    /// `None`.
    fn read_page_data(
        &mut self,
        block: u32,
        page: u32,
        data: &mut [u8],
        ecc: Option<&mut [u8]>,
    ) -> FlashResult;

    fn read_page_spare(&mut self, block: u32, page: u32, spare: &mut [u8]) -> FlashResult;

    /// Read the spare through the driver's own layout: the tag wire bytes,
    /// optionally the stored data-ECC run, and the block-status byte.
    fn read_page_spare_with_layout(
        &mut self,
        block: u32,
        page: u32,
        tag: &mut [u8],
        ecc: Option<&mut [u8]>,
        block_status: &mut u8,
    ) -> FlashResult {
        let _ = (block, page, tag, ecc, block_status);
        FlashResult::IO_ERR
    }

    /// Program page data. In `Hw` ECC mode the driver computes the ECC it
    /// used and writes it back through `ecc` for the commit phase to store.
    fn write_page_data(
        &mut self,
        block: u32,
        page: u32,
        data: &[u8],
        ecc: Option<&mut [u8]>,
    ) -> FlashResult;

    fn write_page_spare(&mut self, block: u32, page: u32, spare: &[u8]) -> FlashResult;

    fn write_page_spare_with_layout(
        &mut self,
        block: u32,
        page: u32,
        tag: &[u8],
        ecc: Option<&[u8]>,
    ) -> FlashResult {
        let _ = (block, page, tag, ecc);
        FlashResult::IO_ERR
    }

    fn erase_block(&mut self, block: u32) -> FlashResult;

    /// Punch the factory-style bad mark into the block.
    fn mark_bad_block(&mut self, block: u32) -> FlashResult;

    /// Native bad-block query, when the hardware has one. `None` makes the
    /// interface fall back to reading the status byte itself.
    fn check_bad_block(&mut self, block: u32) -> Option<bool> {
        let _ = block;
        None
    }
}

impl<F: FlashOps> Device<F> {
    /// Read one page's data into `buf`, checking or recovering it according
    /// to the ECC mode, and decode the `data_len`/`check_sum` header on
    /// success.
    pub fn read_page_data(&mut self, block: u32, page: u32, buf: &mut PageBuf) -> FlashResult {
        let size = self.attr.page_data_size;
        let ecc_size = self.ecc_size;
        let mut bad = false;

        let mut ecc_store = vec![0xFFu8; ecc_size];
        let mut ret = match self.attr.ecc_opt {
            EccOption::Hw => {
                self.ops
                    .read_page_data(block, page, &mut buf.data[..size], Some(&mut ecc_store))
            }
            _ => self.ops.read_page_data(block, page, &mut buf.data[..size], None),
        };
        bad |= ret.is_bad_block();

        if !ret.is_err() && self.attr.ecc_opt == EccOption::Soft {
            let mut ecc_calc = vec![0u8; ecc_size];
            ecc::calculate_ecc(&buf.data[..size], &mut ecc_calc);
            let spare_ret = self.read_page_spare(block, page, None, Some(&mut ecc_store));
            bad |= spare_ret.is_bad_block();
            if spare_ret.is_err() {
                ret = spare_ret;
            } else {
                ret = FlashResult::from_ecc(ecc::apply_ecc(
                    &mut buf.data[..size],
                    &ecc_store,
                    &ecc_calc,
                ));
                bad |= ret.is_bad_block();
            }
        }

        if !ret.is_err() {
            buf.data_len = u16::from_le_bytes([buf.data[0], buf.data[1]]);
            buf.check_sum = u16::from_le_bytes([buf.data[2], buf.data[3]]);
        }
        if bad {
            self.note_bad_block(block);
            ret = ret.flag_bad();
        }
        ret
    }

    /// Read one page's spare: the tag (if wanted), the stored data-ECC run
    /// (if wanted), with the tag verified against its own code once the
    /// page is committed.
    ///
    /// The raw `dirty`/`valid` bits are mirrored into the tag before any
    /// repair; a tag still showing `valid == 1` is returned as-is, since an
    /// uncommitted tag has no code to check.
    pub fn read_page_spare(
        &mut self,
        block: u32,
        page: u32,
        mut tag: Option<&mut Tag>,
        mut ecc: Option<&mut [u8]>,
    ) -> FlashResult {
        let mut bad = false;
        let mut ret = match self.attr.layout_opt {
            LayoutOption::Flash => {
                let mut wire = [0xFFu8; TAG_WIRE_SIZE];
                let mut status = 0xFFu8;
                let r = self.ops.read_page_spare_with_layout(
                    block,
                    page,
                    &mut wire,
                    ecc.as_deref_mut(),
                    &mut status,
                );
                if !r.is_err() {
                    if let Some(out) = tag.as_deref_mut() {
                        let store: [u8; TAG_STORE_SIZE] = wire[..TAG_STORE_SIZE].try_into().unwrap();
                        let mut t = Tag::from_store_bytes(&store);
                        t.tag_ecc = u16::from_le_bytes([wire[6], wire[7]]);
                        t.block_status = status;
                        *out = t;
                    }
                }
                r
            }
            LayoutOption::Core => {
                let r = self.ops.read_page_spare(block, page, &mut self.spare_buf);
                if !r.is_err() {
                    let t = unpack_spare(&self.layout, &self.spare_buf, ecc.as_deref_mut());
                    if let Some(out) = tag.as_deref_mut() {
                        *out = t;
                    }
                }
                r
            }
        };
        bad |= ret.is_bad_block();

        if !ret.is_err() {
            if let Some(tag) = tag {
                tag.raw_dirty = tag.dirty;
                tag.raw_valid = tag.valid;
                // An uncommitted tag carries no trustworthy code.
                let checkable = !tag.valid
                    && self.attr.ecc_opt != EccOption::None
                    && !self.layout.tag_ecc.is_empty();
                if checkable {
                    ret = FlashResult::from_ecc(tag.repair_store());
                    bad |= ret.is_bad_block();
                }
            }
        }

        if bad {
            self.note_bad_block(block);
            ret = ret.flag_bad();
        }
        ret
    }

    /// Commit one page: data plus tag, in the three-phase order described
    /// in the module docs. `tag` comes back with `dirty`/`valid` cleared
    /// and `tag_ecc` filled in, matching what landed on flash.
    ///
    /// Aborts on the first failing phase; whatever that leaves on flash
    /// reads back as untouched or torn, never committed.
    pub fn write_page_combine(
        &mut self,
        block: u32,
        page: u32,
        buf: &PageBuf,
        tag: &mut Tag,
    ) -> FlashResult {
        let size = self.attr.page_data_size;
        let ecc_size = self.ecc_size;
        let tag_ecc_on = self.attr.ecc_opt != EccOption::None;
        let mut ecc_buf = vec![0xFFu8; ecc_size];
        let mut bad = false;

        // phase 1: claim the page
        let mut claim = Tag::claim();
        let mut ret = match self.attr.layout_opt {
            LayoutOption::Core => {
                pack_spare(&self.layout, &mut claim, None, false, &mut self.spare_buf);
                self.ops.write_page_spare(block, page, &self.spare_buf)
            }
            LayoutOption::Flash => {
                self.ops
                    .write_page_spare_with_layout(block, page, &claim.store_bytes()[..1], None)
            }
        };
        bad |= ret.is_bad_block();

        // phase 2: page data and its ECC
        if !ret.is_err() {
            ret = match self.attr.ecc_opt {
                EccOption::Soft => {
                    ecc::calculate_ecc(&buf.data[..size], &mut ecc_buf);
                    self.ops.write_page_data(block, page, &buf.data[..size], None)
                }
                EccOption::Hw => {
                    self.ops
                        .write_page_data(block, page, &buf.data[..size], Some(&mut ecc_buf))
                }
                _ => self.ops.write_page_data(block, page, &buf.data[..size], None),
            };
            bad |= ret.is_bad_block();
        }

        // phase 3: commit the full tag
        if !ret.is_err() {
            tag.dirty = false;
            tag.valid = false;
            let stored_ecc = match self.attr.ecc_opt {
                EccOption::Soft | EccOption::Hw => Some(&ecc_buf[..]),
                _ => None,
            };
            ret = match self.attr.layout_opt {
                LayoutOption::Core => {
                    pack_spare(&self.layout, tag, stored_ecc, tag_ecc_on, &mut self.spare_buf);
                    self.ops.write_page_spare(block, page, &self.spare_buf)
                }
                LayoutOption::Flash => {
                    tag.tag_ecc = if tag_ecc_on {
                        ecc::calculate_tag_ecc(&tag.store_bytes())
                    } else {
                        0xFFFF
                    };
                    let mut wire = [0u8; TAG_WIRE_SIZE];
                    wire[..TAG_STORE_SIZE].copy_from_slice(&tag.store_bytes());
                    wire[TAG_STORE_SIZE..].copy_from_slice(&tag.tag_ecc.to_le_bytes());
                    self.ops
                        .write_page_spare_with_layout(block, page, &wire, stored_ecc)
                }
            };
            bad |= ret.is_bad_block();
        }

        if bad {
            self.note_bad_block(block);
            ret = ret.flag_bad();
        }
        ret
    }

    /// Erase a block. A driver-reported suspicion lands the block in the
    /// bad-block list like any other.
    pub fn erase_block(&mut self, block: u32) -> FlashResult {
        let ret = self.ops.erase_block(block);
        if ret.is_bad_block() {
            self.note_bad_block(block);
        }
        ret
    }

    /// Is the block marked bad on flash?
    ///
    /// Prefers the driver's native answer. Otherwise page 0's status byte
    /// decides: `0xFF` is good, and anything else is confirmed by a second
    /// read before the block is condemned, so one transient flipped bit in
    /// a read does not retire a block.
    pub fn is_bad_block(&mut self, block: u32) -> bool {
        if let Some(known) = self.ops.check_bad_block(block) {
            return known;
        }
        if self.read_block_status(block) == 0xFF {
            return false;
        }
        self.read_block_status(block) != 0xFF
    }

    /// Punch the on-flash bad mark. Only called by the layer above once it
    /// has rescued whatever the block still held.
    pub fn mark_bad_block(&mut self, block: u32) -> FlashResult {
        self.ops.mark_bad_block(block)
    }

    fn read_block_status(&mut self, block: u32) -> u8 {
        match self.attr.layout_opt {
            LayoutOption::Flash => {
                let mut wire = [0xFFu8; TAG_WIRE_SIZE];
                let mut status = 0xFFu8;
                let ret = self
                    .ops
                    .read_page_spare_with_layout(block, 0, &mut wire, None, &mut status);
                if ret.is_err() {
                    // No readable evidence either way; don't condemn on silence.
                    return 0xFF;
                }
                status
            }
            LayoutOption::Core => {
                let ret = self.ops.read_page_spare(block, 0, &mut self.spare_buf);
                if ret.is_err() {
                    return 0xFF;
                }
                self.spare_buf[self.layout.block_status_offs]
            }
        }
    }

    pub(crate) fn note_bad_block(&mut self, block: u32) {
        if self.bad_blocks.add(block) {
            log::warn!("new bad block {} detected", block);
        }
    }
}
