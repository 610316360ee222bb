/*!
The device handle: storage attributes, driver ops, scratch memory, the
bad-block list and the block-info cache all hang off one [`Device`].

Nothing here is global; two mounted devices are fully independent. The
attributes and the resolved spare layout are fixed at [`Device::new`] and
immutable afterwards.
*/

use crate::cache::BlockInfoCache;
use crate::ecc::ecc_size_for;
use crate::flash::FlashOps;
use crate::layout::{Segment, SpareLayout};
use crate::FlashResult;

/// How page data is protected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EccOption {
    /// No protection at all; tags carry no code either.
    None,
    /// This crate computes and checks the ECC in software.
    Soft,
    /// The driver computes the ECC; this crate stores and compares it.
    Hw,
    /// The driver owns ECC end to end; nothing is stored in the spare.
    HwAuto,
}

/// Who turns tags and ECC runs into spare bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayoutOption {
    /// This crate packs the spare and hands the driver raw bytes.
    Core,
    /// The driver knows its own spare geometry; tags and ECC are handed
    /// over logically via the `*_with_layout` driver calls.
    Flash,
}

/// Geometry and policy of the NAND array behind a device. Immutable after
/// mount.
#[derive(Clone, Debug)]
pub struct StorageAttr {
    pub total_blocks: u32,
    pub pages_per_block: u32,
    /// One of 256/512/1024, or any multiple of 256 from 2048 up.
    pub page_data_size: usize,
    pub spare_size: usize,
    /// Offset of the block-status byte within the spare.
    pub block_status_offs: usize,
    pub ecc_opt: EccOption,
    /// ECC bytes per page; 0 derives `3 * page_data_size / 256`.
    pub ecc_size: usize,
    pub layout_opt: LayoutOption,
    /// Descriptor overrides; `None` picks the wire-fixed default for the
    /// page size.
    pub tag_layout: Option<Vec<Segment>>,
    pub ecc_layout: Option<Vec<Segment>>,
    pub tag_ecc_layout: Option<Vec<Segment>>,
}

impl StorageAttr {
    pub fn ecc_size_or_default(&self) -> usize {
        if self.ecc_size == 0 {
            ecc_size_for(self.page_data_size)
        } else {
            self.ecc_size
        }
    }
}

/// Why a device refused to come up.
#[derive(Debug)]
pub enum InitError {
    UnsupportedPageSize(usize),
    /// The spare area cannot hold everything the layout places in it.
    SpareTooSmall { required: usize, available: usize },
    /// The ECC descriptor holds fewer bytes than one page's ECC run; data
    /// written through it would not be fully protected.
    EccLayoutTooSmall { required: usize, capacity: usize },
    /// The driver's own init failed.
    Driver(FlashResult),
}

/// A page worth of data on its way to or from flash, plus the two header
/// fields every committed page carries in its first four data bytes.
#[derive(Clone, Debug)]
pub struct PageBuf {
    pub data: Vec<u8>,
    pub data_len: u16,
    pub check_sum: u16,
}

impl PageBuf {
    pub fn new(page_data_size: usize) -> PageBuf {
        PageBuf { data: vec![0xFF; page_data_size], data_len: 0, check_sum: 0 }
    }

    /// Stamp the header fields into the first four data bytes (and keep the
    /// struct fields in sync), little-endian.
    pub fn set_header(&mut self, data_len: u16, check_sum: u16) {
        self.data_len = data_len;
        self.check_sum = check_sum;
        self.data[0..2].copy_from_slice(&data_len.to_le_bytes());
        self.data[2..4].copy_from_slice(&check_sum.to_le_bytes());
    }
}

/// Runtime-discovered bad blocks, waiting for the layer above to recover
/// their contents and mark them on flash. Insertion is idempotent.
#[derive(Debug, Default)]
pub struct BadBlockList {
    blocks: Vec<u32>,
}

impl BadBlockList {
    /// Record a block. Returns `false` when it was already listed.
    pub fn add(&mut self, block: u32) -> bool {
        if self.blocks.contains(&block) {
            return false;
        }
        self.blocks.push(block);
        true
    }

    pub fn contains(&self, block: u32) -> bool {
        self.blocks.contains(&block)
    }

    /// Drop a block once the layer above has dealt with it.
    pub fn remove(&mut self, block: u32) -> bool {
        match self.blocks.iter().position(|&b| b == block) {
            Some(i) => {
                self.blocks.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// One mounted NAND device.
pub struct Device<F> {
    pub attr: StorageAttr,
    pub ops: F,
    pub bad_blocks: BadBlockList,
    pub(crate) layout: SpareLayout,
    pub(crate) ecc_size: usize,
    /// Scratch spare image reused by every operation; contents are only
    /// meaningful within a single call.
    pub(crate) spare_buf: Vec<u8>,
    pub(crate) cache: BlockInfoCache,
}

impl<F: FlashOps> Device<F> {
    /// Validate the attributes, resolve the spare layout, size the scratch
    /// buffers, initialize the driver and the block-info cache.
    pub fn new(attr: StorageAttr, mut ops: F, max_cached_blocks: usize) -> Result<Device<F>, InitError> {
        match attr.page_data_size {
            256 | 512 | 1024 => {}
            n if n >= 2048 && n % 256 == 0 => {}
            n => return Err(InitError::UnsupportedPageSize(n)),
        }

        let defaults = SpareLayout::defaults_for(attr.page_data_size, attr.block_status_offs);
        let layout = SpareLayout {
            tag: attr.tag_layout.clone().unwrap_or(defaults.tag),
            ecc: attr.ecc_layout.clone().unwrap_or(defaults.ecc),
            tag_ecc: attr.tag_ecc_layout.clone().unwrap_or(defaults.tag_ecc),
            block_status_offs: attr.block_status_offs,
        };

        let ecc_size = attr.ecc_size_or_default();
        if attr.ecc_opt == EccOption::Soft || attr.ecc_opt == EccOption::Hw {
            let capacity = SpareLayout::capacity(&layout.ecc);
            if capacity < ecc_size {
                return Err(InitError::EccLayoutTooSmall { required: ecc_size, capacity });
            }
        }

        let spare_buf_size = layout.required_spare_size(ecc_size);
        if spare_buf_size > attr.spare_size {
            return Err(InitError::SpareTooSmall {
                required: spare_buf_size,
                available: attr.spare_size,
            });
        }

        let ret = ops.init_device();
        if ret.is_err() {
            return Err(InitError::Driver(ret));
        }

        log::debug!(
            "flash interface up: {} blocks x {} pages, {}B data + {}B spare, ecc {:?} ({}B), layout {:?}",
            attr.total_blocks,
            attr.pages_per_block,
            attr.page_data_size,
            attr.spare_size,
            attr.ecc_opt,
            ecc_size,
            attr.layout_opt,
        );

        let cache = BlockInfoCache::new(max_cached_blocks, attr.pages_per_block);
        Ok(Device {
            attr,
            ops,
            bad_blocks: BadBlockList::default(),
            layout,
            ecc_size,
            spare_buf: vec![0xFF; spare_buf_size],
            cache,
        })
    }

    /// ECC bytes per page under the mounted configuration.
    pub fn ecc_size(&self) -> usize {
        self.ecc_size
    }

    /// The resolved spare layout in effect.
    pub fn layout(&self) -> &SpareLayout {
        &self.layout
    }

    /// Tear the device down, releasing the driver. The block-info cache
    /// goes with it; outstanding pins are a caller bug and only warned
    /// about, since the memory is reclaimed either way.
    pub fn release(mut self) -> F {
        if !self.cache.is_all_free() {
            log::warn!("device released with pinned block info entries");
        }
        self.ops.release_device();
        self.ops
    }
}
