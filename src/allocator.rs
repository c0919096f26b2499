//! The append-only allocator: hands out addresses for new table/manager writes while
//! respecting the rule that a row-table may never cross a sector boundary.

use defmt::debug;

use crate::constants::SECTOR;
use crate::driver::FlashDriver;
use crate::error::{Error, Result};

/// Round `addr` up to the start of the next sector.
#[must_use]
pub fn next_sector_boundary(addr: u32) -> u32 {
    (addr / SECTOR + 1) * SECTOR
}

/// Offset of `addr` within its containing sector.
#[must_use]
pub fn offset_in_sector(addr: u32) -> u32 {
    addr % SECTOR
}

/// Allocate `size` contiguous bytes starting at or after `*cursor`, advancing
/// `*cursor` past the allocation. If the request would cross a sector boundary,
/// the allocation starts at the next sector instead, and that sector is erased
/// when `erase_allowed` is set.
///
/// # Errors
///
/// Returns [`Error::InvalidArg`] if `size` is zero or larger than one sector, and
/// [`Error::NoSpace`] if the allocation would exceed `total_size`.
pub fn allocate<D: FlashDriver>(
    driver: &mut D,
    cursor: &mut u32,
    total_size: u32,
    size: u32,
    erase_allowed: bool,
) -> Result<u32> {
    if size == 0 || size > SECTOR {
        return Err(Error::InvalidArg);
    }

    let mut addr = *cursor;
    let crossed = offset_in_sector(addr) + size > SECTOR;
    if crossed {
        addr = next_sector_boundary(addr);
    }

    if addr.checked_add(size).is_none_or(|end| end > total_size) {
        return Err(Error::NoSpace);
    }

    if crossed && erase_allowed {
        driver.erase(addr, SECTOR)?;
        debug!("allocator: erased sector at 0x{:08x} before allocation", addr);
    }

    *cursor = addr + size;
    debug!("allocator: allocated {} bytes at 0x{:08x}", size, addr);
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_flash::MockFlash;

    #[test]
    fn allocates_within_a_sector_without_crossing() {
        let mut driver = MockFlash::new(SECTOR * 4);
        let mut cursor = 0u32;
        let a = allocate(&mut driver, &mut cursor, SECTOR * 4, 100, true).unwrap();
        let b = allocate(&mut driver, &mut cursor, SECTOR * 4, 100, true).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 100);
        assert_eq!(cursor, 200);
    }

    #[test]
    fn crosses_to_next_sector_when_request_does_not_fit() {
        let mut driver = MockFlash::new(SECTOR * 4);
        let mut cursor = SECTOR - 10;
        let addr = allocate(&mut driver, &mut cursor, SECTOR * 4, 100, true).unwrap();
        assert_eq!(addr, SECTOR);
        assert_eq!(cursor, SECTOR + 100);
    }

    #[test]
    fn rejects_oversized_and_zero_requests() {
        let mut driver = MockFlash::new(SECTOR * 4);
        let mut cursor = 0u32;
        assert!(allocate(&mut driver, &mut cursor, SECTOR * 4, 0, true).is_err());
        assert!(allocate(&mut driver, &mut cursor, SECTOR * 4, SECTOR + 1, true).is_err());
    }

    #[test]
    fn reports_no_space_past_total_size() {
        let mut driver = MockFlash::new(SECTOR);
        let mut cursor = SECTOR - 10;
        assert!(matches!(
            allocate(&mut driver, &mut cursor, SECTOR, 100, true),
            Err(Error::NoSpace)
        ));
    }
}
