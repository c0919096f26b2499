//! Writes a new manager-table version into its reserved slot and advances the
//! reservation for the version after that.

use defmt::{debug, info};

use crate::allocator::{next_sector_boundary, offset_in_sector};
use crate::chunked::program_chunked;
use crate::codec::{ManagerTable, MANAGER_TABLE_LEN};
use crate::constants::SECTOR;
use crate::driver::FlashDriver;
use crate::error::{Error, Result};

/// Commit `manager` (with its CRC freshly recomputed) to its reserved address,
/// reserve the following version, and advance `*cursor` past it.
///
/// # Errors
///
/// Returns [`Error::NoSpace`] if there is no room left for the next reservation,
/// and [`Error::EraseForbidden`] if the target needs erasing but erasing is
/// disallowed (the subsequent program attempt is still made, and will surface
/// as [`Error::DriverError`] if the device truly is not erased).
pub fn save_manager_table<D: FlashDriver>(
    driver: &mut D,
    manager: &mut ManagerTable,
    cursor: &mut u32,
    total_size: u32,
    erase_allowed: bool,
) -> Result<()> {
    let target = manager.next_manager_addr;
    if target == 0 || target >= total_size {
        return Err(Error::NoSpace);
    }

    let mut next_reservation = *cursor;
    if SECTOR - offset_in_sector(next_reservation) < MANAGER_TABLE_LEN as u32 {
        next_reservation = next_sector_boundary(next_reservation);
    }
    if next_reservation
        .checked_add(MANAGER_TABLE_LEN as u32)
        .is_none_or(|end| end > total_size)
    {
        return Err(Error::NoSpace);
    }

    if erase_allowed {
        let mut probe = [0u8; 1];
        driver.read(target, &mut probe)?;
        if probe[0] != 0xFF {
            let sector_start = target - offset_in_sector(target);
            let span_end = target + MANAGER_TABLE_LEN as u32;
            let mut sector = sector_start;
            while sector < span_end {
                driver.erase(sector, SECTOR).map_err(|_err| Error::EraseForbidden)?;
                sector += SECTOR;
            }
            debug!("commit: erased sectors covering 0x{:08x}..0x{:08x}", sector_start, span_end);
        }
    }

    manager.next_manager_addr = next_reservation;
    manager.recompute_crc();
    let bytes = manager.to_bytes();
    program_chunked(driver, target, &bytes)?;

    *cursor = next_reservation + MANAGER_TABLE_LEN as u32;
    info!("commit: manager table written at 0x{:08x}, next reservation 0x{:08x}", target, next_reservation);
    Ok(())
}
