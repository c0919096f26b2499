//! The top-level engine: owns the flash driver and in-RAM manager table state,
//! and exposes the full named-table CRUD surface.

use defmt::{debug, info, warn};

use crate::allocator::allocate;
use crate::chunked::program_chunked;
use crate::codec::{
    compute_crc, decode_name, encode_name, ManagerTable, SlotStatus, TableHeader, TableSlot,
    MANAGER_TABLE_LEN, TABLE_HEADER_LEN,
};
use crate::commit::save_manager_table;
use crate::constants::{MAGIC_TBL, MAX_TABLES, SECTOR};
use crate::discovery::load_manager_table;
use crate::driver::FlashDriver;
use crate::error::{Error, Result};
use crate::gc;

/// Largest data payload one row-table can hold: one sector minus its header.
const MAX_TABLE_DATA: usize = SECTOR as usize - TABLE_HEADER_LEN;

/// A snapshot of one table's metadata, returned by `get_table_info`/`list_tables`.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: heapless::String<{ crate::constants::NAME_MAX }>,
    pub struct_size: u32,
    pub struct_nums: u32,
    pub table_size: u32,
    pub addr: u32,
}

/// The flash table engine: named, typed row-tables over a raw flash region.
pub struct Engine<D: FlashDriver> {
    driver: D,
    total_size: u32,
    erase_allowed: bool,
    manager: ManagerTable,
    cursor: u32,
}

impl<D: FlashDriver> Engine<D> {
    /// Initialize the driver and discover (or bootstrap) the manager table.
    ///
    /// # Errors
    ///
    /// Propagates driver errors from `init` and from discovery's bootstrap path.
    pub fn init(mut driver: D, total_size: u32, allow_erase: bool) -> Result<Self> {
        driver.init()?;
        let discovered = load_manager_table(&mut driver, total_size)?;
        Ok(Self {
            driver,
            total_size,
            erase_allowed: allow_erase,
            manager: discovered.manager,
            cursor: discovered.cursor,
        })
    }

    pub fn set_erase_allowed(&mut self, allowed: bool) {
        self.erase_allowed = allowed;
    }

    /// Reclaim the underlying driver, discarding this engine's in-RAM state.
    ///
    /// There is no teardown call in the on-flash protocol itself: a caller that drops
    /// the engine and re-runs [`Engine::init`] against the same device recovers the
    /// identical state via discovery. This accessor exists for callers (and tests)
    /// that want to simulate exactly that reboot without a second physical device.
    #[must_use]
    pub fn into_driver(self) -> D {
        self.driver
    }

    #[must_use]
    pub const fn is_erase_allowed(&self) -> bool {
        self.erase_allowed
    }

    #[must_use]
    pub const fn get_total_size(&self) -> u32 {
        self.total_size
    }

    #[must_use]
    pub const fn get_used_size(&self) -> u32 {
        self.manager.used_size
    }

    #[must_use]
    pub fn get_free_size(&self) -> u32 {
        self.total_size.saturating_sub(self.manager.used_size)
    }

    #[must_use]
    pub fn table_exists(&self, name: &str) -> bool {
        self.manager.find_valid(name).is_some()
    }

    /// Run compaction. Requires erasing to be allowed.
    ///
    /// # Errors
    ///
    /// See [`gc::run`].
    pub fn gc(&mut self) -> Result<()> {
        gc::run(
            &mut self.driver,
            &mut self.manager,
            &mut self.cursor,
            self.total_size,
            self.erase_allowed,
        )
    }

    pub fn create_table(&mut self, name: &str, struct_size: u32, max_structs: u32) -> Result<()> {
        if struct_size == 0 || max_structs == 0 || TABLE_HEADER_LEN as u32 + struct_size > SECTOR {
            return Err(Error::InvalidArg);
        }
        if self.table_exists(name) {
            return Err(Error::Exists);
        }
        let slot_idx = self.manager.find_free().ok_or(Error::NoSlot)?;
        let name_bytes = encode_name(name)?;
        let table_size = TABLE_HEADER_LEN as u32
            + struct_size.checked_mul(max_structs).ok_or(Error::InvalidArg)?;

        let header = TableHeader {
            magic: MAGIC_TBL,
            name: name_bytes,
            table_size,
            data_len: 0,
            struct_size,
            struct_nums: 0,
            data_crc: 0,
        };
        let addr = allocate(
            &mut self.driver,
            &mut self.cursor,
            self.total_size,
            TABLE_HEADER_LEN as u32,
            self.erase_allowed,
        )?;
        program_chunked(&mut self.driver, addr, &header.to_bytes())?;

        self.manager.tables[slot_idx] = TableSlot {
            name: name_bytes,
            addr,
            size: TABLE_HEADER_LEN as u32,
            used_size: TABLE_HEADER_LEN as u32,
            magic: MAGIC_TBL,
            status: SlotStatus::Valid,
            reserved: 0,
            next_manager_addr: 0,
        };
        self.manager.table_count += 1;
        self.recompute_used_size();
        self.commit()?;
        info!("engine: created table {}", name);
        Ok(())
    }

    pub fn delete_table(&mut self, name: &str) -> Result<()> {
        let idx = self.manager.find_valid(name).ok_or(Error::NotFound)?;
        self.manager.tables[idx].status = SlotStatus::Deleted;
        self.manager.table_count = self.manager.table_count.saturating_sub(1);
        self.recompute_used_size();
        self.commit()?;
        info!("engine: deleted table {}", name);
        Ok(())
    }

    pub fn read_table_data(&mut self, name: &str, index: u32, buf: &mut [u8]) -> Result<()> {
        let idx = self.manager.find_valid(name).ok_or(Error::NotFound)?;
        let slot = self.manager.tables[idx];
        let header = self.read_header(slot.addr)?;
        if index >= header.struct_nums {
            return Err(Error::OutOfRange);
        }
        if buf.len() as u32 != header.struct_size {
            return Err(Error::InvalidArg);
        }
        let row_addr = slot.addr + TABLE_HEADER_LEN as u32 + index * header.struct_size;
        self.driver.read(row_addr, buf)
    }

    /// Append one row (`write_table_data`): no capacity check.
    pub fn write_table_data(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.append_impl(name, data, false)
    }

    /// Append one row, failing with [`Error::Full`] once `max_structs` is reached.
    pub fn append_table_data(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.append_impl(name, data, true)
    }

    fn append_impl(&mut self, name: &str, data: &[u8], checked: bool) -> Result<()> {
        let idx = self.manager.find_valid(name).ok_or(Error::NotFound)?;
        let slot = self.manager.tables[idx];
        let header = self.read_header(slot.addr)?;
        if data.len() as u32 != header.struct_size {
            return Err(Error::InvalidArg);
        }
        if checked && header.struct_nums >= capacity(&header) {
            return Err(Error::Full);
        }

        let old_data = self.read_data(slot.addr, header.data_len)?;
        let mut new_data: heapless::Vec<u8, MAX_TABLE_DATA> = heapless::Vec::new();
        new_data.extend_from_slice(&old_data).map_err(|()| Error::NoSpace)?;
        new_data.extend_from_slice(data).map_err(|()| Error::NoSpace)?;

        let new_header = TableHeader {
            data_len: new_data.len() as u32,
            struct_nums: header.struct_nums + 1,
            data_crc: compute_crc(&new_data),
            ..header
        };
        self.relocate(idx, new_header, &new_data)?;
        info!("engine: appended a row to table {}", name);
        Ok(())
    }

    pub fn write_table_data_by_index(&mut self, name: &str, index: u32, data: &[u8]) -> Result<()> {
        let idx = self.manager.find_valid(name).ok_or(Error::NotFound)?;
        let slot = self.manager.tables[idx];
        let header = self.read_header(slot.addr)?;
        if data.len() as u32 != header.struct_size {
            return Err(Error::InvalidArg);
        }
        if index >= header.struct_nums {
            return Err(Error::OutOfRange);
        }

        let mut buf = self.read_data(slot.addr, header.data_len)?;
        let start = (index * header.struct_size) as usize;
        buf[start..start + data.len()].copy_from_slice(data);

        let new_header = TableHeader {
            data_crc: compute_crc(&buf),
            ..header
        };
        self.relocate(idx, new_header, &buf)?;
        info!("engine: overwrote row {} of table {}", index, name);
        Ok(())
    }

    pub fn write_table_data_batch(
        &mut self,
        name: &str,
        data: &[u8],
        struct_size: u32,
        count: u32,
    ) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidArg);
        }
        let idx = self.manager.find_valid(name).ok_or(Error::NotFound)?;
        let slot = self.manager.tables[idx];
        let header = self.read_header(slot.addr)?;
        if struct_size != header.struct_size {
            return Err(Error::InvalidArg);
        }
        let expected_len = struct_size.checked_mul(count).ok_or(Error::InvalidArg)?;
        if data.len() as u32 != expected_len {
            return Err(Error::InvalidArg);
        }
        if header
            .struct_nums
            .checked_add(count)
            .is_none_or(|total| total > capacity(&header))
        {
            return Err(Error::Full);
        }

        let old_data = self.read_data(slot.addr, header.data_len)?;
        let mut new_data: heapless::Vec<u8, MAX_TABLE_DATA> = heapless::Vec::new();
        new_data.extend_from_slice(&old_data).map_err(|()| Error::NoSpace)?;
        new_data.extend_from_slice(data).map_err(|()| Error::NoSpace)?;

        let new_header = TableHeader {
            data_len: new_data.len() as u32,
            struct_nums: header.struct_nums + count,
            data_crc: compute_crc(&new_data),
            ..header
        };
        self.relocate(idx, new_header, &new_data)?;
        info!("engine: batch appended {} rows to table {}", count, name);
        Ok(())
    }

    pub fn clear_table_data(&mut self, name: &str, mask: u64) -> Result<()> {
        let idx = self.manager.find_valid(name).ok_or(Error::NotFound)?;
        let slot = self.manager.tables[idx];
        let header = self.read_header(slot.addr)?;

        let usable_bits = header.struct_nums.min(64);
        let valid_mask = if usable_bits == 64 { u64::MAX } else { (1u64 << usable_bits) - 1 };
        if mask & !valid_mask != 0 {
            return Err(Error::OutOfRange);
        }
        if mask == 0 {
            return Ok(());
        }

        let old_data = self.read_data(slot.addr, header.data_len)?;
        let mut new_data: heapless::Vec<u8, MAX_TABLE_DATA> = heapless::Vec::new();
        let mut kept = 0u32;
        for row in 0..header.struct_nums {
            if row < 64 && (mask >> row) & 1 == 1 {
                continue;
            }
            let start = (row * header.struct_size) as usize;
            let end = start + header.struct_size as usize;
            new_data
                .extend_from_slice(&old_data[start..end])
                .map_err(|()| Error::NoSpace)?;
            kept += 1;
        }

        let new_header = TableHeader {
            data_len: new_data.len() as u32,
            struct_nums: kept,
            data_crc: if kept == 0 { 0 } else { compute_crc(&new_data) },
            ..header
        };
        self.relocate(idx, new_header, &new_data)?;
        info!("engine: cleared rows (mask 0x{:x}) of table {}", mask, name);
        Ok(())
    }

    pub fn get_table_count(&mut self, name: &str) -> Result<u32> {
        let idx = self.manager.find_valid(name).ok_or(Error::NotFound)?;
        let header = self.read_header(self.manager.tables[idx].addr)?;
        Ok(header.struct_nums)
    }

    pub fn get_table_info(&mut self, name: &str) -> Result<TableInfo> {
        let idx = self.manager.find_valid(name).ok_or(Error::NotFound)?;
        let slot = self.manager.tables[idx];
        let header = self.read_header(slot.addr)?;
        Self::build_info(&slot, &header)
    }

    pub fn list_tables(&mut self) -> Result<heapless::Vec<TableInfo, MAX_TABLES>> {
        let slots: heapless::Vec<TableSlot, MAX_TABLES> = self
            .manager
            .tables
            .iter()
            .copied()
            .filter(|slot| slot.status == SlotStatus::Valid)
            .collect();

        let mut out = heapless::Vec::new();
        for slot in slots {
            let header = self.read_header(slot.addr)?;
            let info = Self::build_info(&slot, &header)?;
            out.push(info).map_err(|_info| Error::NoSlot)?;
        }
        Ok(out)
    }

    pub fn validate_table_data(&mut self, name: &str) -> Result<()> {
        let idx = self.manager.find_valid(name).ok_or(Error::NotFound)?;
        let slot = self.manager.tables[idx];
        let header = self.read_header(slot.addr)?;
        if !header.is_valid_magic() {
            return Err(Error::Corruption);
        }
        if header.struct_nums.checked_mul(header.struct_size) != Some(header.data_len) {
            return Err(Error::Corruption);
        }
        let data = self.read_data(slot.addr, header.data_len)?;
        if compute_crc(&data) != header.data_crc {
            return Err(Error::Corruption);
        }
        Ok(())
    }

    pub fn repair_table(&mut self, name: &str) -> Result<()> {
        let idx = self.manager.find_valid(name).ok_or(Error::NotFound)?;
        let slot = self.manager.tables[idx];
        let mut header = self.read_header(slot.addr)?;
        let data = self.read_data(slot.addr, header.data_len)?;
        let correct_crc = compute_crc(&data);
        if header.data_crc == correct_crc {
            return Ok(());
        }

        header.data_crc = correct_crc;
        if self.driver.program(slot.addr, &header.to_bytes()).is_ok() {
            warn!("engine: repaired table {} in place", name);
            return Ok(());
        }
        warn!("engine: in-place repair of table {} failed, relocating", name);
        self.relocate(idx, header, &data)
    }

    /// Log a diagnostic dump of every slot in the manager table.
    pub fn dump_manager_table(&self) {
        debug!(
            "manager: version={} table_count={} used_size={} next_manager_addr=0x{:08x}",
            self.manager.version, self.manager.table_count, self.manager.used_size, self.manager.next_manager_addr
        );
        for slot in &self.manager.tables {
            if slot.status == SlotStatus::Valid {
                debug!(
                    "  slot: addr=0x{:08x} size={} used_size={}",
                    slot.addr, slot.size, slot.used_size
                );
            }
        }
    }

    fn read_header(&mut self, addr: u32) -> Result<TableHeader> {
        let mut buf = [0u8; TABLE_HEADER_LEN];
        self.driver.read(addr, &mut buf)?;
        TableHeader::from_bytes(&buf)
    }

    fn read_data(&mut self, addr: u32, len: u32) -> Result<heapless::Vec<u8, MAX_TABLE_DATA>> {
        let mut buf: heapless::Vec<u8, MAX_TABLE_DATA> = heapless::Vec::new();
        buf.resize(len as usize, 0).map_err(|_byte| Error::NoSpace)?;
        self.driver.read(addr + TABLE_HEADER_LEN as u32, &mut buf)?;
        Ok(buf)
    }

    /// Relocate a table's header+data to a freshly allocated address, update
    /// its slot, and commit a new manager version.
    fn relocate(&mut self, slot_idx: usize, header: TableHeader, data: &[u8]) -> Result<()> {
        let total_len = TABLE_HEADER_LEN as u32 + header.data_len;
        let addr = allocate(
            &mut self.driver,
            &mut self.cursor,
            self.total_size,
            total_len,
            self.erase_allowed,
        )?;
        program_chunked(&mut self.driver, addr, &header.to_bytes())?;
        if !data.is_empty() {
            program_chunked(&mut self.driver, addr + TABLE_HEADER_LEN as u32, data)?;
        }

        let slot = &mut self.manager.tables[slot_idx];
        slot.addr = addr;
        slot.size = total_len;
        slot.used_size = total_len;
        self.recompute_used_size();
        self.commit()
    }

    fn commit(&mut self) -> Result<()> {
        save_manager_table(
            &mut self.driver,
            &mut self.manager,
            &mut self.cursor,
            self.total_size,
            self.erase_allowed,
        )
    }

    /// Sum every `Valid` slot's on-flash footprint plus the reserved manager-table
    /// slot itself, matching the accounting `gc::run` performs after compaction.
    fn recompute_used_size(&mut self) {
        let tables_used: u32 = self
            .manager
            .tables
            .iter()
            .filter(|slot| slot.status == SlotStatus::Valid)
            .map(|slot| slot.size)
            .sum();
        self.manager.used_size = tables_used + MANAGER_TABLE_LEN as u32;
    }

    fn build_info(slot: &TableSlot, header: &TableHeader) -> Result<TableInfo> {
        let name = decode_name(&slot.name)?;
        Ok(TableInfo {
            name: heapless::String::try_from(name).map_err(|()| Error::Corruption)?,
            struct_size: header.struct_size,
            struct_nums: header.struct_nums,
            table_size: header.table_size,
            addr: slot.addr,
        })
    }
}

fn capacity(header: &TableHeader) -> u32 {
    (header.table_size - TABLE_HEADER_LEN as u32) / header.struct_size
}
