/*!
A file-backed NAND emulator.

Backs a [`FlashOps`] implementation with anything `Read + Write + Seek`: a
`Cursor<Vec<u8>>` for tests, a real file for host-side tooling. Pages are
stored as `data ‖ spare` in block/page order. The emulator keeps NAND
program semantics: writing can only clear bits, only erase sets them back,
and a freshly formatted array reads all-`0xFF`.

[`EmuConfig`] is the typed record of the emulated geometry; its defaults
describe the classic small-array test device (128 blocks of 32 × 512-byte
pages with 16-byte spares, soft ECC, status byte at offset 5).
*/

use std::io::{Read, Seek, SeekFrom, Write};

use crate::device::{EccOption, LayoutOption, StorageAttr};
use crate::flash::FlashOps;
use crate::FlashResult;

/// Geometry of an emulated NAND array.
#[derive(Clone, Debug)]
pub struct EmuConfig {
    pub total_blocks: u32,
    pub pages_per_block: u32,
    pub page_data_size: usize,
    pub page_spare_size: usize,
    pub status_byte_offset: usize,
    pub ecc_opt: EccOption,
    /// 0 lets the device derive the size from the page data size.
    pub ecc_size: usize,
}

impl Default for EmuConfig {
    fn default() -> Self {
        EmuConfig {
            total_blocks: 128,
            pages_per_block: 32,
            page_data_size: 512,
            page_spare_size: 16,
            status_byte_offset: 5,
            ecc_opt: EccOption::Soft,
            ecc_size: 0,
        }
    }
}

impl EmuConfig {
    /// The storage attributes a device mounts this array with. The
    /// emulator always hands the core raw spare bytes, so the layout stays
    /// core-managed with the wire-fixed defaults.
    pub fn storage_attr(&self) -> StorageAttr {
        StorageAttr {
            total_blocks: self.total_blocks,
            pages_per_block: self.pages_per_block,
            page_data_size: self.page_data_size,
            spare_size: self.page_spare_size,
            block_status_offs: self.status_byte_offset,
            ecc_opt: self.ecc_opt,
            ecc_size: self.ecc_size,
            layout_opt: LayoutOption::Core,
            tag_layout: None,
            ecc_layout: None,
            tag_ecc_layout: None,
        }
    }

    fn page_stride(&self) -> usize {
        self.page_data_size + self.page_spare_size
    }

    fn total_size(&self) -> usize {
        self.total_blocks as usize * self.pages_per_block as usize * self.page_stride()
    }
}

/// The emulated array over its backing store.
pub struct EmuNand<RW> {
    io: RW,
    cfg: EmuConfig,
}

impl<RW: Read + Write + Seek> EmuNand<RW> {
    /// Take over a backing store and erase the whole array.
    pub fn format(io: RW, cfg: EmuConfig) -> std::io::Result<EmuNand<RW>> {
        let mut nand = EmuNand { io, cfg };
        nand.fill(0, nand.cfg.total_size(), 0xFF)?;
        Ok(nand)
    }

    /// Re-attach to a backing store that already holds an array image.
    pub fn open(io: RW, cfg: EmuConfig) -> EmuNand<RW> {
        EmuNand { io, cfg }
    }

    pub fn config(&self) -> &EmuConfig {
        &self.cfg
    }

    pub fn into_inner(self) -> RW {
        self.io
    }

    fn page_offset(&self, block: u32, page: u32) -> u64 {
        let index = block as u64 * self.cfg.pages_per_block as u64 + page as u64;
        index * self.cfg.page_stride() as u64
    }

    fn spare_offset(&self, block: u32, page: u32) -> u64 {
        self.page_offset(block, page) + self.cfg.page_data_size as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.read_exact(buf)
    }

    /// NAND program: bits can go from 1 to 0, never back.
    fn program_at(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        let mut current = vec![0xFFu8; bytes.len()];
        self.read_at(offset, &mut current)?;
        for (cur, new) in current.iter_mut().zip(bytes) {
            *cur &= new;
        }
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.write_all(&current)
    }

    fn fill(&mut self, offset: u64, len: usize, value: u8) -> std::io::Result<()> {
        self.io.seek(SeekFrom::Start(offset))?;
        let chunk = [value; 4096];
        let mut left = len;
        while left > 0 {
            let n = left.min(chunk.len());
            self.io.write_all(&chunk[..n])?;
            left -= n;
        }
        Ok(())
    }

    /// Flip one bit of a page's data region, bypassing program semantics.
    /// Test hook for emulating silent corruption.
    pub fn flip_data_bit(&mut self, block: u32, page: u32, byte: usize, bit: u8) -> std::io::Result<()> {
        self.flip_at(self.page_offset(block, page) + byte as u64, bit)
    }

    /// Flip one bit of a page's spare region. Test hook.
    pub fn flip_spare_bit(&mut self, block: u32, page: u32, byte: usize, bit: u8) -> std::io::Result<()> {
        self.flip_at(self.spare_offset(block, page) + byte as u64, bit)
    }

    /// Overwrite one raw spare byte, bypassing program semantics. Test hook
    /// for seeding factory bad-block marks.
    pub fn seed_spare_byte(&mut self, block: u32, page: u32, offs: usize, value: u8) -> std::io::Result<()> {
        self.io.seek(SeekFrom::Start(self.spare_offset(block, page) + offs as u64))?;
        self.io.write_all(&[value])
    }

    fn flip_at(&mut self, offset: u64, bit: u8) -> std::io::Result<()> {
        let mut b = [0u8];
        self.read_at(offset, &mut b)?;
        b[0] ^= 1 << bit;
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.write_all(&b)
    }

    fn io_result(res: std::io::Result<()>) -> FlashResult {
        match res {
            Ok(()) => FlashResult::NO_ERR,
            Err(_) => FlashResult::IO_ERR,
        }
    }
}

impl<RW: Read + Write + Seek> FlashOps for EmuNand<RW> {
    fn read_page_data(
        &mut self,
        block: u32,
        page: u32,
        data: &mut [u8],
        _ecc: Option<&mut [u8]>,
    ) -> FlashResult {
        let offset = self.page_offset(block, page);
        Self::io_result(self.read_at(offset, data))
    }

    fn read_page_spare(&mut self, block: u32, page: u32, spare: &mut [u8]) -> FlashResult {
        let offset = self.spare_offset(block, page);
        Self::io_result(self.read_at(offset, spare))
    }

    fn write_page_data(
        &mut self,
        block: u32,
        page: u32,
        data: &[u8],
        _ecc: Option<&mut [u8]>,
    ) -> FlashResult {
        let offset = self.page_offset(block, page);
        Self::io_result(self.program_at(offset, data))
    }

    fn write_page_spare(&mut self, block: u32, page: u32, spare: &[u8]) -> FlashResult {
        let offset = self.spare_offset(block, page);
        Self::io_result(self.program_at(offset, spare))
    }

    fn erase_block(&mut self, block: u32) -> FlashResult {
        let offset = self.page_offset(block, 0);
        let len = self.cfg.pages_per_block as usize * self.cfg.page_stride();
        Self::io_result(self.fill(offset, len, 0xFF))
    }

    fn mark_bad_block(&mut self, block: u32) -> FlashResult {
        let offs = self.cfg.status_byte_offset;
        Self::io_result(self.seed_spare_byte(block, 0, offs, 0x00))
    }
}
