//! The flash driver contract: the four primitives this crate requires from the
//! underlying NOR-flash device.

use crate::Result;

/// A raw NOR-flash device capable of `init`/`read`/`program`/`erase`.
///
/// `program` must only clear bits (program semantics are 1 -> 0); callers of this
/// trait never rely on it being able to set a bit back to 1 without an intervening
/// `erase`. `erase` operates on whole sectors: both `addr` and `len` are multiples
/// of [`crate::constants::SECTOR`]. `read` has no alignment requirement.
pub trait FlashDriver {
    /// Prepare the device for use. Called once by `Engine::init`.
    fn init(&mut self) -> Result<()>;

    /// Read `buf.len()` bytes starting at `addr` into `buf`.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Program `buf` starting at `addr`. Every targeted byte must already be
    /// bitwise >= its new value (i.e. already 0xFF or a superset of the new bits).
    fn program(&mut self, addr: u32, buf: &[u8]) -> Result<()>;

    /// Erase the sector(s) covering `[addr, addr + len)`, resetting their bytes to 0xFF.
    fn erase(&mut self, addr: u32, len: u32) -> Result<()>;
}
