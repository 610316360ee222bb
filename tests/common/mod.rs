#![allow(dead_code)]

use std::io::Cursor;

use nandfort::device::{Device, EccOption, LayoutOption, PageBuf, StorageAttr};
use nandfort::ecc::ecc_size_for;
use nandfort::emu::{EmuConfig, EmuNand};
use nandfort::flash::{FlashOps, TAG_WIRE_SIZE};
use nandfort::tag::{BlockType, Tag};
use nandfort::FlashResult;

pub type MemNand = EmuNand<Cursor<Vec<u8>>>;

pub fn mem_nand(cfg: &EmuConfig) -> MemNand {
    EmuNand::format(Cursor::new(Vec::new()), cfg.clone()).unwrap()
}

pub fn mount(cfg: EmuConfig) -> Device<MemNand> {
    mount_with(cfg, 4)
}

pub fn mount_with(cfg: EmuConfig, max_cached_blocks: usize) -> Device<MemNand> {
    let nand = mem_nand(&cfg);
    Device::new(cfg.storage_attr(), nand, max_cached_blocks).unwrap()
}

pub fn remount(nand: MemNand, max_cached_blocks: usize) -> Device<MemNand> {
    let attr = nand.config().storage_attr();
    Device::new(attr, nand, max_cached_blocks).unwrap()
}

/// A small array so cache and scan tests stay cheap.
pub fn small_cfg() -> EmuConfig {
    EmuConfig { total_blocks: 16, pages_per_block: 4, ..EmuConfig::default() }
}

/// A page buffer with a recognizable payload and a stamped header.
pub fn sample_page(page_data_size: usize, data_len: u16, check_sum: u16) -> PageBuf {
    let mut buf = PageBuf::new(page_data_size);
    for (i, b) in buf.data.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    buf.set_header(data_len, check_sum);
    buf
}

/// A committed-style tag with distinctive higher-level fields.
pub fn sample_tag(object_id: u16, page_id: u8) -> Tag {
    Tag {
        block_type: BlockType::Data,
        block_ts: 0,
        page_id,
        data_len: 0x0200,
        object_id,
        parent: 2,
        ..Tag::ERASED
    }
}

/// An in-memory driver that owns its own spare geometry, the way a
/// flash-managed layout device does: tags, data ECC and the block-status
/// byte exist only behind the `*_with_layout` calls, and the raw spare
/// methods are deliberately unserved.
pub struct LayoutNand {
    total_blocks: u32,
    pages_per_block: u32,
    page_data_size: usize,
    pages: Vec<LayoutPage>,
}

#[derive(Clone)]
struct LayoutPage {
    data: Vec<u8>,
    tag: [u8; TAG_WIRE_SIZE],
    ecc: Vec<u8>,
    status: u8,
}

impl LayoutNand {
    pub fn new(total_blocks: u32, pages_per_block: u32, page_data_size: usize) -> LayoutNand {
        let erased = LayoutPage {
            data: vec![0xFF; page_data_size],
            tag: [0xFF; TAG_WIRE_SIZE],
            ecc: vec![0xFF; ecc_size_for(page_data_size)],
            status: 0xFF,
        };
        LayoutNand {
            total_blocks,
            pages_per_block,
            page_data_size,
            pages: vec![erased; (total_blocks * pages_per_block) as usize],
        }
    }

    pub fn attr(&self) -> StorageAttr {
        StorageAttr {
            total_blocks: self.total_blocks,
            pages_per_block: self.pages_per_block,
            page_data_size: self.page_data_size,
            spare_size: 16,
            block_status_offs: 5,
            ecc_opt: EccOption::Soft,
            ecc_size: 0,
            layout_opt: LayoutOption::Flash,
            tag_layout: None,
            ecc_layout: None,
            tag_ecc_layout: None,
        }
    }

    /// Pre-zero a block's status byte, like a factory mark. Test hook.
    pub fn seed_status(&mut self, block: u32, value: u8) {
        let i = self.index(block, 0).unwrap();
        self.pages[i].status = value;
    }

    /// Flip one bit of a page's stored tag wire. Test hook.
    pub fn flip_tag_bit(&mut self, block: u32, page: u32, byte: usize, bit: u8) {
        let i = self.index(block, page).unwrap();
        self.pages[i].tag[byte] ^= 1 << bit;
    }

    fn index(&self, block: u32, page: u32) -> Option<usize> {
        if block >= self.total_blocks || page >= self.pages_per_block {
            return None;
        }
        Some((block * self.pages_per_block + page) as usize)
    }
}

fn program(dst: &mut [u8], src: &[u8]) {
    for (cur, new) in dst.iter_mut().zip(src) {
        *cur &= new;
    }
}

impl FlashOps for LayoutNand {
    fn read_page_data(
        &mut self,
        block: u32,
        page: u32,
        data: &mut [u8],
        ecc: Option<&mut [u8]>,
    ) -> FlashResult {
        let i = match self.index(block, page) {
            Some(i) => i,
            None => return FlashResult::IO_ERR,
        };
        data.copy_from_slice(&self.pages[i].data[..data.len()]);
        if let Some(ecc_out) = ecc {
            let n = ecc_out.len().min(self.pages[i].ecc.len());
            ecc_out[..n].copy_from_slice(&self.pages[i].ecc[..n]);
        }
        FlashResult::NO_ERR
    }

    fn read_page_spare(&mut self, _block: u32, _page: u32, _spare: &mut [u8]) -> FlashResult {
        FlashResult::IO_ERR
    }

    fn read_page_spare_with_layout(
        &mut self,
        block: u32,
        page: u32,
        tag: &mut [u8],
        ecc: Option<&mut [u8]>,
        block_status: &mut u8,
    ) -> FlashResult {
        let i = match self.index(block, page) {
            Some(i) => i,
            None => return FlashResult::IO_ERR,
        };
        let n = tag.len().min(TAG_WIRE_SIZE);
        tag[..n].copy_from_slice(&self.pages[i].tag[..n]);
        if let Some(ecc_out) = ecc {
            let n = ecc_out.len().min(self.pages[i].ecc.len());
            ecc_out[..n].copy_from_slice(&self.pages[i].ecc[..n]);
        }
        *block_status = self.pages[i].status;
        FlashResult::NO_ERR
    }

    fn write_page_data(
        &mut self,
        block: u32,
        page: u32,
        data: &[u8],
        _ecc: Option<&mut [u8]>,
    ) -> FlashResult {
        let i = match self.index(block, page) {
            Some(i) => i,
            None => return FlashResult::IO_ERR,
        };
        program(&mut self.pages[i].data, data);
        FlashResult::NO_ERR
    }

    fn write_page_spare(&mut self, _block: u32, _page: u32, _spare: &[u8]) -> FlashResult {
        FlashResult::IO_ERR
    }

    fn write_page_spare_with_layout(
        &mut self,
        block: u32,
        page: u32,
        tag: &[u8],
        ecc: Option<&[u8]>,
    ) -> FlashResult {
        let i = match self.index(block, page) {
            Some(i) => i,
            None => return FlashResult::IO_ERR,
        };
        program(&mut self.pages[i].tag, tag);
        if let Some(ecc_in) = ecc {
            program(&mut self.pages[i].ecc, ecc_in);
        }
        FlashResult::NO_ERR
    }

    fn erase_block(&mut self, block: u32) -> FlashResult {
        let start = match self.index(block, 0) {
            Some(i) => i,
            None => return FlashResult::IO_ERR,
        };
        for page in &mut self.pages[start..start + self.pages_per_block as usize] {
            page.data.fill(0xFF);
            page.tag = [0xFF; TAG_WIRE_SIZE];
            page.ecc.fill(0xFF);
            page.status = 0xFF;
        }
        FlashResult::NO_ERR
    }

    fn mark_bad_block(&mut self, block: u32) -> FlashResult {
        let i = match self.index(block, 0) {
            Some(i) => i,
            None => return FlashResult::IO_ERR,
        };
        self.pages[i].status = 0x00;
        FlashResult::NO_ERR
    }
}

/// A driver wrapper that lets a fixed number of program operations through
/// and then fails every one with `IO_ERR`, leaving reads untouched. Used to
/// stop `write_page_combine` between phases the way a power cut would.
pub struct FlakyNand<F> {
    inner: F,
    writes_left: u32,
}

impl<F> FlakyNand<F> {
    pub fn new(inner: F, allowed_writes: u32) -> FlakyNand<F> {
        FlakyNand { inner, writes_left: allowed_writes }
    }

    pub fn into_inner(self) -> F {
        self.inner
    }

    fn take_write(&mut self) -> bool {
        if self.writes_left == 0 {
            return false;
        }
        self.writes_left -= 1;
        true
    }
}

impl<F: FlashOps> FlashOps for FlakyNand<F> {
    fn read_page_data(
        &mut self,
        block: u32,
        page: u32,
        data: &mut [u8],
        ecc: Option<&mut [u8]>,
    ) -> FlashResult {
        self.inner.read_page_data(block, page, data, ecc)
    }

    fn read_page_spare(&mut self, block: u32, page: u32, spare: &mut [u8]) -> FlashResult {
        self.inner.read_page_spare(block, page, spare)
    }

    fn read_page_spare_with_layout(
        &mut self,
        block: u32,
        page: u32,
        tag: &mut [u8],
        ecc: Option<&mut [u8]>,
        block_status: &mut u8,
    ) -> FlashResult {
        self.inner.read_page_spare_with_layout(block, page, tag, ecc, block_status)
    }

    fn write_page_data(
        &mut self,
        block: u32,
        page: u32,
        data: &[u8],
        ecc: Option<&mut [u8]>,
    ) -> FlashResult {
        if !self.take_write() {
            return FlashResult::IO_ERR;
        }
        self.inner.write_page_data(block, page, data, ecc)
    }

    fn write_page_spare(&mut self, block: u32, page: u32, spare: &[u8]) -> FlashResult {
        if !self.take_write() {
            return FlashResult::IO_ERR;
        }
        self.inner.write_page_spare(block, page, spare)
    }

    fn write_page_spare_with_layout(
        &mut self,
        block: u32,
        page: u32,
        tag: &[u8],
        ecc: Option<&[u8]>,
    ) -> FlashResult {
        if !self.take_write() {
            return FlashResult::IO_ERR;
        }
        self.inner.write_page_spare_with_layout(block, page, tag, ecc)
    }

    fn erase_block(&mut self, block: u32) -> FlashResult {
        self.inner.erase_block(block)
    }

    fn mark_bad_block(&mut self, block: u32) -> FlashResult {
        self.inner.mark_bad_block(block)
    }

    fn check_bad_block(&mut self, block: u32) -> Option<bool> {
        self.inner.check_bad_block(block)
    }
}

/// A driver wrapper that corrupts the block-status byte of the first spare
/// read it serves, emulating a one-off bit glitch on the bus.
pub struct GlitchNand<F> {
    inner: F,
    status_offs: usize,
    glitches_left: u32,
}

impl<F> GlitchNand<F> {
    pub fn new(inner: F, status_offs: usize, glitches: u32) -> GlitchNand<F> {
        GlitchNand { inner, status_offs, glitches_left: glitches }
    }
}

impl<F: FlashOps> FlashOps for GlitchNand<F> {
    fn read_page_data(
        &mut self,
        block: u32,
        page: u32,
        data: &mut [u8],
        ecc: Option<&mut [u8]>,
    ) -> FlashResult {
        self.inner.read_page_data(block, page, data, ecc)
    }

    fn read_page_spare(&mut self, block: u32, page: u32, spare: &mut [u8]) -> FlashResult {
        let ret = self.inner.read_page_spare(block, page, spare);
        if self.glitches_left > 0 && self.status_offs < spare.len() {
            self.glitches_left -= 1;
            spare[self.status_offs] = 0x00;
        }
        ret
    }

    fn read_page_spare_with_layout(
        &mut self,
        block: u32,
        page: u32,
        tag: &mut [u8],
        ecc: Option<&mut [u8]>,
        block_status: &mut u8,
    ) -> FlashResult {
        let ret = self.inner.read_page_spare_with_layout(block, page, tag, ecc, block_status);
        if self.glitches_left > 0 {
            self.glitches_left -= 1;
            *block_status = 0x00;
        }
        ret
    }

    fn write_page_data(
        &mut self,
        block: u32,
        page: u32,
        data: &[u8],
        ecc: Option<&mut [u8]>,
    ) -> FlashResult {
        self.inner.write_page_data(block, page, data, ecc)
    }

    fn write_page_spare(&mut self, block: u32, page: u32, spare: &[u8]) -> FlashResult {
        self.inner.write_page_spare(block, page, spare)
    }

    fn write_page_spare_with_layout(
        &mut self,
        block: u32,
        page: u32,
        tag: &[u8],
        ecc: Option<&[u8]>,
    ) -> FlashResult {
        self.inner.write_page_spare_with_layout(block, page, tag, ecc)
    }

    fn erase_block(&mut self, block: u32) -> FlashResult {
        self.inner.erase_block(block)
    }

    fn mark_bad_block(&mut self, block: u32) -> FlashResult {
        self.inner.mark_bad_block(block)
    }

    fn check_bad_block(&mut self, block: u32) -> Option<bool> {
        self.inner.check_bad_block(block)
    }
}
