//! Boot-time discovery: walk the manager-table linked list starting at flash
//! offset 0, adopt the latest valid version, and reconstruct the write cursor.

use defmt::{info, warn};

use crate::codec::{ManagerTable, MANAGER_TABLE_LEN, SlotStatus};
use crate::driver::FlashDriver;
use crate::error::{Error, Result};

/// Result of a successful discovery pass: the adopted manager table and the
/// reconstructed write cursor (next free byte on the device).
pub struct Discovered {
    pub manager: ManagerTable,
    pub cursor: u32,
}

/// Load the manager table, or bootstrap a fresh device if none is found.
///
/// # Errors
///
/// Returns [`Error::NoSpace`] if `total_size` cannot even hold one manager table,
/// and propagates driver errors encountered while bootstrapping a fresh device.
pub fn load_manager_table<D: FlashDriver>(driver: &mut D, total_size: u32) -> Result<Discovered> {
    if (total_size as usize) < MANAGER_TABLE_LEN {
        return Err(Error::NoSpace);
    }

    let mut addr = 0u32;
    let mut buf = [0u8; MANAGER_TABLE_LEN];
    let Ok(()) = driver.read(addr, &mut buf) else {
        warn!("discovery: unreadable at offset 0, bootstrapping fresh device");
        return fresh_init(driver, total_size);
    };

    let Some(mut current) = ManagerTable::from_bytes(&buf).ok().filter(ManagerTable::is_valid) else {
        warn!("discovery: no valid manager table at offset 0, bootstrapping fresh device");
        return fresh_init(driver, total_size);
    };

    loop {
        let next = current.next_manager_addr;
        let in_range = next != 0
            && next > addr
            && u64::from(next) + MANAGER_TABLE_LEN as u64 <= u64::from(total_size);
        if !in_range {
            break;
        }

        let mut next_buf = [0u8; MANAGER_TABLE_LEN];
        if driver.read(next, &mut next_buf).is_err() {
            warn!("discovery: read failed at 0x{:08x}, stopping at prior version", next);
            break;
        }
        let Some(next_candidate) = ManagerTable::from_bytes(&next_buf).ok().filter(ManagerTable::is_valid) else {
            warn!("discovery: invalid manager table at 0x{:08x}, stopping at prior version", next);
            break;
        };

        addr = next;
        current = next_candidate;
    }

    let mut cursor = addr + MANAGER_TABLE_LEN as u32;
    for slot in &current.tables {
        if slot.status == SlotStatus::Valid {
            cursor = cursor.max(slot.addr + slot.size);
        }
    }

    info!(
        "discovery: adopted manager at 0x{:08x}, {} tables, cursor 0x{:08x}",
        addr, current.table_count, cursor
    );
    Ok(Discovered { manager: current, cursor })
}

fn fresh_init<D: FlashDriver>(driver: &mut D, total_size: u32) -> Result<Discovered> {
    driver.erase(0, crate::constants::SECTOR)?;

    let mut manager = ManagerTable::empty(total_size);
    manager.next_manager_addr = MANAGER_TABLE_LEN as u32;
    // The manager table itself is the only thing occupying flash so far; later
    // mutations recompute this to also cover every `Valid` slot's footprint.
    manager.used_size = MANAGER_TABLE_LEN as u32;
    manager.recompute_crc();

    let bytes = manager.to_bytes();
    driver.program(0, &bytes)?;

    info!("discovery: fresh device initialized, total_size={}", total_size);
    Ok(Discovered {
        manager,
        cursor: 2 * MANAGER_TABLE_LEN as u32,
    })
}
