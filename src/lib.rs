/*!
A crash-safe page translation core for raw NAND flash.

This crate sits between a file-system layer and a raw NAND driver. It owns the
on-flash spare-area format (per-page tags plus ECC, placed by configurable
layout descriptors), the three-phase write protocol that keeps page commits
atomically observable across power loss, runtime bad-block detection, and an
LRU cache of per-block tag summaries.

The pieces, bottom up:

- [`ecc`]: Hamming-style SECDED over 256-byte data regions plus a compact
  16-bit code over the tag record.
- [`layout`]: translates between a logical `(tag, ecc)` pair and the raw
  bytes of the spare area.
- [`tag`]: the per-page metadata record and its bit-exact packing.
- [`flash`]: the driver capability trait and the page read/write/erase
  operations built on it.
- [`cache`]: reference-counted block info with LRU reuse.
- [`emu`]: a file-backed NAND emulator for tests and host-side tooling.

Flash operations report a [`FlashResult`] value rather than an `Err`: partial
failure (a corrected bit, a suspected bad block) is ordinary data in this
domain, not an exception.
*/

pub mod cache;
pub mod device;
pub mod ecc;
pub mod emu;
pub mod flash;
pub mod layout;
pub mod tag;

/// Outcome class of a single flash operation.
///
/// Ordered by severity so callers can keep the worst outcome of a sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlashCode {
    /// Completed with no anomaly.
    NoErr,
    /// Completed; one or more flipped bits were corrected. Data is good.
    EccOk,
    /// Flipped bits beyond what the code can repair. Data must not be used.
    EccFail,
    /// The driver reports the operation did not complete.
    IoErr,
}

/// Result value of a flash operation: an outcome code plus an orthogonal
/// bad-block suspicion flag that may ride alongside any code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashResult {
    pub code: FlashCode,
    pub bad_block: bool,
}

impl FlashResult {
    pub const NO_ERR: FlashResult = FlashResult { code: FlashCode::NoErr, bad_block: false };
    pub const ECC_OK: FlashResult = FlashResult { code: FlashCode::EccOk, bad_block: false };
    pub const ECC_FAIL: FlashResult = FlashResult { code: FlashCode::EccFail, bad_block: false };
    pub const IO_ERR: FlashResult = FlashResult { code: FlashCode::IoErr, bad_block: false };

    /// True when the operation failed outright and output buffers must not
    /// be consumed. Corrected reads (`EccOk`) are not errors.
    pub fn is_err(self) -> bool {
        matches!(self.code, FlashCode::EccFail | FlashCode::IoErr)
    }

    /// True when this result should count against the block: either the
    /// driver raised the suspicion flag or the ECC gave up entirely.
    pub fn is_bad_block(self) -> bool {
        self.bad_block || self.code == FlashCode::EccFail
    }

    /// Same code with the bad-block suspicion flag set.
    pub fn flag_bad(self) -> FlashResult {
        FlashResult { bad_block: true, ..self }
    }

    /// Keep the more severe code of the two; suspicion flags accumulate.
    pub fn merge(self, other: FlashResult) -> FlashResult {
        FlashResult {
            code: self.code.max(other.code),
            bad_block: self.bad_block || other.bad_block,
        }
    }

    pub(crate) fn from_ecc(outcome: Result<usize, ecc::EccError>) -> FlashResult {
        match outcome {
            Ok(0) => FlashResult::NO_ERR,
            Ok(_) => FlashResult::ECC_OK,
            Err(_) => FlashResult::ECC_FAIL,
        }
    }
}

impl Default for FlashResult {
    fn default() -> Self {
        FlashResult::NO_ERR
    }
}
