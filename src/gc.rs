//! Garbage collection: compact every `Valid` row-table down toward the low end
//! of the device, reclaiming erased sectors for future allocation.

use defmt::{info, warn};

use crate::allocator::{next_sector_boundary, offset_in_sector};
use crate::chunked::program_chunked;
use crate::codec::{ManagerTable, MANAGER_TABLE_LEN, SlotStatus};
use crate::constants::{MAX_TABLES, SECTOR};
use crate::driver::FlashDriver;
use crate::error::{Error, Result};

/// Compact the device in place. Requires a manager table to already be loaded
/// and erasing to be allowed.
///
/// # Errors
///
/// Returns [`Error::EraseForbidden`] if erasing is disallowed, and propagates
/// driver errors encountered while relocating tables or the manager.
pub fn run<D: FlashDriver>(
    driver: &mut D,
    manager: &mut ManagerTable,
    cursor: &mut u32,
    total_size: u32,
    erase_allowed: bool,
) -> Result<()> {
    if !erase_allowed {
        return Err(Error::EraseForbidden);
    }

    let sector_count = total_size / SECTOR;
    let sector_occupied = |manager: &ManagerTable, sector: u32| {
        manager
            .tables
            .iter()
            .any(|slot| slot.status == SlotStatus::Valid && slot.addr / SECTOR == sector)
    };

    let scratch = (1..sector_count).find(|&sector| !sector_occupied(manager, sector));

    let Some(scratch) = scratch else {
        return reset(driver, manager, cursor, total_size);
    };

    // Phase 1: move sector-0 residents into the scratch sector so sector 0 can
    // be erased without losing data that still lives there.
    driver.erase(scratch * SECTOR, SECTOR)?;
    let mut sector0: heapless::Vec<usize, MAX_TABLES> = (0..manager.tables.len())
        .filter(|&i| manager.tables[i].status == SlotStatus::Valid && manager.tables[i].addr / SECTOR == 0)
        .collect();
    sector0.sort_unstable_by_key(|&i| manager.tables[i].addr);

    let mut scratch_pos = scratch * SECTOR;
    for &idx in &sector0 {
        let slot = manager.tables[idx];
        let mut buf: heapless::Vec<u8, crate::constants::SECTOR_LEN> = heapless::Vec::new();
        buf.resize(slot.size as usize, 0).map_err(|_err| Error::NoSpace)?;
        driver.read(slot.addr, &mut buf)?;
        program_chunked(driver, scratch_pos, &buf)?;
        manager.tables[idx].addr = scratch_pos;
        scratch_pos += slot.size;
    }

    // Phase 2: rewrite every valid table, in ascending current-address order,
    // starting right after the reserved manager slot. Every valid table's
    // current bytes (sector-0 residents already relocated into scratch above,
    // plus everything that never moved) are staged into RAM first, before any
    // Phase 2 erase runs: the packing below can place a table's destination in
    // the very sector another still-unread table currently occupies, so no
    // erase may happen until nothing further needs to be read off flash.
    let mut valid: heapless::Vec<usize, MAX_TABLES> = (0..manager.tables.len())
        .filter(|&i| manager.tables[i].status == SlotStatus::Valid)
        .collect();
    valid.sort_unstable_by_key(|&i| manager.tables[i].addr);

    let mut staged: heapless::Vec<(usize, heapless::Vec<u8, crate::constants::SECTOR_LEN>), MAX_TABLES> =
        heapless::Vec::new();
    for &idx in &valid {
        let slot = manager.tables[idx];
        let mut buf: heapless::Vec<u8, crate::constants::SECTOR_LEN> = heapless::Vec::new();
        buf.resize(slot.size as usize, 0).map_err(|_err| Error::NoSpace)?;
        driver.read(slot.addr, &mut buf)?;
        staged.push((idx, buf)).map_err(|_entry| Error::NoSpace)?;
    }

    driver.erase(0, SECTOR)?;

    let mut pos = MANAGER_TABLE_LEN as u32;
    let mut last_sector = 0u32;
    for (idx, buf) in &staged {
        let slot_size = manager.tables[*idx].size;
        if offset_in_sector(pos) + slot_size > SECTOR {
            let next_pos = next_sector_boundary(pos);
            driver.erase(next_pos, SECTOR)?;
            pos = next_pos;
        }
        if pos.checked_add(slot_size).is_none_or(|end| end > total_size) {
            return Err(Error::NoSpace);
        }

        program_chunked(driver, pos, buf)?;
        manager.tables[*idx].addr = pos;
        last_sector = pos / SECTOR;
        pos += slot_size;
    }

    manager.next_manager_addr = pos;
    manager.used_size = pos;
    manager.recompute_crc();
    let bytes = manager.to_bytes();
    driver.program(0, &bytes)?;

    // Erase every sector after the last one written, reclaiming the scratch
    // sector if the compacted layout never reached it.
    for sector in (last_sector + 1)..sector_count {
        driver.erase(sector * SECTOR, SECTOR)?;
    }

    *cursor = pos + MANAGER_TABLE_LEN as u32;
    info!("gc: compacted to {} bytes, scratch sector {}", pos, scratch);
    Ok(())
}

fn reset<D: FlashDriver>(
    driver: &mut D,
    manager: &mut ManagerTable,
    cursor: &mut u32,
    total_size: u32,
) -> Result<()> {
    let sector_count = total_size / SECTOR;
    for sector in 0..sector_count {
        driver.erase(sector * SECTOR, SECTOR)?;
    }

    *manager = ManagerTable::empty(total_size);
    manager.next_manager_addr = MANAGER_TABLE_LEN as u32;
    manager.recompute_crc();
    let bytes = manager.to_bytes();
    driver.program(0, &bytes)?;
    *cursor = 2 * MANAGER_TABLE_LEN as u32;

    warn!("gc: no empty sector available, device reset to an empty store");
    Ok(())
}
