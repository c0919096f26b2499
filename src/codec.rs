//! On-flash record layouts and their manual byte-level (de)serializers.
//!
//! None of these records use `postcard`/`serde`: the on-flash layout is a fixed,
//! explicit byte format so that it is independent of any serialization crate's
//! internal representation and stable across compiler versions.

use crc32fast::Hasher;

use crate::constants::{MAGIC_MGR, MAGIC_TBL, MAX_TABLES, NAME_MAX};
use crate::error::{Error, Result};

/// Encoded size in bytes of a [`TableHeader`].
pub const TABLE_HEADER_LEN: usize = 2 + NAME_MAX + 4 + 4 + 4 + 4 + 4;

/// Encoded size in bytes of a [`TableSlot`].
pub const TABLE_SLOT_LEN: usize = NAME_MAX + 4 + 4 + 4 + 2 + 1 + 1 + 4;

/// Offset, in bytes, into a [`ManagerTable`] record where the CRC-covered region begins.
pub const MANAGER_CRC_START: usize = 2 + 4;

/// Encoded size in bytes of a [`ManagerTable`], including its slot array.
pub const MANAGER_TABLE_LEN: usize = MANAGER_CRC_START + 1 + 1 + 4 + 4 + 4 + MAX_TABLES * TABLE_SLOT_LEN;

/// Encode a table name, NUL-padding to [`NAME_MAX`] bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidArg`] if `name` does not fit in `NAME_MAX` bytes.
pub fn encode_name(name: &str) -> Result<[u8; NAME_MAX]> {
    let bytes = name.as_bytes();
    if bytes.len() > NAME_MAX {
        return Err(Error::InvalidArg);
    }
    let mut out = [0u8; NAME_MAX];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// Decode a NUL-padded name field back to a `&str`, trimming trailing NUL bytes.
///
/// # Errors
///
/// Returns [`Error::Corruption`] if the stored bytes are not valid UTF-8.
pub fn decode_name(bytes: &[u8; NAME_MAX]) -> Result<&str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
    core::str::from_utf8(&bytes[..end]).map_err(|_err| Error::Corruption)
}

/// The header stored at the start of every row-table's flash region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    pub magic: u16,
    pub name: [u8; NAME_MAX],
    /// Logical maximum footprint: `TABLE_HEADER_LEN + struct_size * max_structs`.
    pub table_size: u32,
    pub data_len: u32,
    pub struct_size: u32,
    pub struct_nums: u32,
    pub data_crc: u32,
}

impl TableHeader {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; TABLE_HEADER_LEN] {
        let mut buf = [0u8; TABLE_HEADER_LEN];
        let mut pos = 0;
        buf[pos..pos + 2].copy_from_slice(&self.magic.to_le_bytes());
        pos += 2;
        buf[pos..pos + NAME_MAX].copy_from_slice(&self.name);
        pos += NAME_MAX;
        buf[pos..pos + 4].copy_from_slice(&self.table_size.to_le_bytes());
        pos += 4;
        buf[pos..pos + 4].copy_from_slice(&self.data_len.to_le_bytes());
        pos += 4;
        buf[pos..pos + 4].copy_from_slice(&self.struct_size.to_le_bytes());
        pos += 4;
        buf[pos..pos + 4].copy_from_slice(&self.struct_nums.to_le_bytes());
        pos += 4;
        buf[pos..pos + 4].copy_from_slice(&self.data_crc.to_le_bytes());
        buf
    }

    /// # Errors
    ///
    /// Returns [`Error::Corruption`] if `buf` is shorter than [`TABLE_HEADER_LEN`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < TABLE_HEADER_LEN {
            return Err(Error::Corruption);
        }
        let mut pos = 0;
        let magic = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
        pos += 2;
        let mut name = [0u8; NAME_MAX];
        name.copy_from_slice(&buf[pos..pos + NAME_MAX]);
        pos += NAME_MAX;
        let table_size = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let data_len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let struct_size = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let struct_nums = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let data_crc = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        Ok(Self {
            magic,
            name,
            table_size,
            data_len,
            struct_size,
            struct_nums,
            data_crc,
        })
    }

    #[must_use]
    pub fn is_valid_magic(&self) -> bool {
        self.magic == MAGIC_TBL
    }
}

/// Status of one [`TableSlot`] in the manager's slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Invalid,
    Valid,
    Deleted,
}

impl From<u8> for SlotStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Valid,
            2 => Self::Deleted,
            _ => Self::Invalid,
        }
    }
}

impl From<SlotStatus> for u8 {
    fn from(value: SlotStatus) -> Self {
        match value {
            SlotStatus::Invalid => 0,
            SlotStatus::Valid => 1,
            SlotStatus::Deleted => 2,
        }
    }
}

/// One entry in the manager table's fixed-size slot array, describing one row-table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSlot {
    pub name: [u8; NAME_MAX],
    pub addr: u32,
    /// On-flash footprint: `TABLE_HEADER_LEN + data_len`. Not the logical maximum.
    pub size: u32,
    pub used_size: u32,
    pub magic: u16,
    pub status: SlotStatus,
    pub reserved: u8,
    pub next_manager_addr: u32,
}

impl TableSlot {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            name: [0; NAME_MAX],
            addr: 0,
            size: 0,
            used_size: 0,
            magic: 0,
            status: SlotStatus::Invalid,
            reserved: 0,
            next_manager_addr: 0,
        }
    }

    fn to_bytes(self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= TABLE_SLOT_LEN);
        let mut pos = 0;
        buf[pos..pos + NAME_MAX].copy_from_slice(&self.name);
        pos += NAME_MAX;
        buf[pos..pos + 4].copy_from_slice(&self.addr.to_le_bytes());
        pos += 4;
        buf[pos..pos + 4].copy_from_slice(&self.size.to_le_bytes());
        pos += 4;
        buf[pos..pos + 4].copy_from_slice(&self.used_size.to_le_bytes());
        pos += 4;
        buf[pos..pos + 2].copy_from_slice(&self.magic.to_le_bytes());
        pos += 2;
        buf[pos] = self.status.into();
        pos += 1;
        buf[pos] = self.reserved;
        pos += 1;
        buf[pos..pos + 4].copy_from_slice(&self.next_manager_addr.to_le_bytes());
    }

    fn from_bytes(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= TABLE_SLOT_LEN);
        let mut pos = 0;
        let mut name = [0u8; NAME_MAX];
        name.copy_from_slice(&buf[pos..pos + NAME_MAX]);
        pos += NAME_MAX;
        let addr = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let size = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let used_size = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let magic = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
        pos += 2;
        let status = SlotStatus::from(buf[pos]);
        pos += 1;
        let reserved = buf[pos];
        pos += 1;
        let next_manager_addr = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        Self {
            name,
            addr,
            size,
            used_size,
            magic,
            status,
            reserved,
            next_manager_addr,
        }
    }
}

/// The on-flash index: a linked-list node describing every known table and pointing
/// at the next reserved manager-table slot.
#[derive(Debug, Clone)]
pub struct ManagerTable {
    pub magic: u16,
    pub crc: u32,
    pub version: u8,
    pub table_count: u8,
    pub total_size: u32,
    pub used_size: u32,
    pub next_manager_addr: u32,
    pub tables: [TableSlot; MAX_TABLES],
}

impl ManagerTable {
    #[must_use]
    pub const fn empty(total_size: u32) -> Self {
        Self {
            magic: MAGIC_MGR,
            crc: 0,
            version: crate::constants::MGR_VERSION,
            table_count: 0,
            total_size,
            used_size: 0,
            next_manager_addr: 0,
            tables: [TableSlot::empty(); MAX_TABLES],
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> heapless::Vec<u8, MANAGER_TABLE_LEN> {
        let mut buf: heapless::Vec<u8, MANAGER_TABLE_LEN> = heapless::Vec::new();
        buf.resize(MANAGER_TABLE_LEN, 0).ok();
        let mut pos = 0;
        buf[pos..pos + 2].copy_from_slice(&self.magic.to_le_bytes());
        pos += 2;
        buf[pos..pos + 4].copy_from_slice(&self.crc.to_le_bytes());
        pos += 4;
        buf[pos] = self.version;
        pos += 1;
        buf[pos] = self.table_count;
        pos += 1;
        buf[pos..pos + 4].copy_from_slice(&self.total_size.to_le_bytes());
        pos += 4;
        buf[pos..pos + 4].copy_from_slice(&self.used_size.to_le_bytes());
        pos += 4;
        buf[pos..pos + 4].copy_from_slice(&self.next_manager_addr.to_le_bytes());
        pos += 4;
        for slot in &self.tables {
            slot.to_bytes(&mut buf[pos..pos + TABLE_SLOT_LEN]);
            pos += TABLE_SLOT_LEN;
        }
        buf
    }

    /// # Errors
    ///
    /// Returns [`Error::Corruption`] if `buf` is shorter than [`MANAGER_TABLE_LEN`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < MANAGER_TABLE_LEN {
            return Err(Error::Corruption);
        }
        let mut pos = 0;
        let magic = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
        pos += 2;
        let crc = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let version = buf[pos];
        pos += 1;
        let table_count = buf[pos];
        pos += 1;
        let total_size = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let used_size = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let next_manager_addr = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let mut tables = [TableSlot::empty(); MAX_TABLES];
        for slot in &mut tables {
            *slot = TableSlot::from_bytes(&buf[pos..pos + TABLE_SLOT_LEN]);
            pos += TABLE_SLOT_LEN;
        }
        Ok(Self {
            magic,
            crc,
            version,
            table_count,
            total_size,
            used_size,
            next_manager_addr,
            tables,
        })
    }

    /// Recompute the CRC over everything after the `{magic, crc}` prefix.
    pub fn recompute_crc(&mut self) {
        let bytes = self.to_bytes();
        self.crc = compute_crc(&bytes[MANAGER_CRC_START..]);
    }

    /// Validate magic, version and CRC against the record's own encoding.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.magic != MAGIC_MGR || self.version != crate::constants::MGR_VERSION {
            return false;
        }
        let bytes = self.to_bytes();
        self.crc == compute_crc(&bytes[MANAGER_CRC_START..])
    }

    /// Find the slot index whose name matches and whose status is `Valid`.
    #[must_use]
    pub fn find_valid(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|slot| {
            slot.status == SlotStatus::Valid
                && decode_name(&slot.name).map(|stored| stored == name).unwrap_or(false)
        })
    }

    /// Find the first `Invalid` slot (free for reuse).
    #[must_use]
    pub fn find_free(&self) -> Option<usize> {
        self.tables.iter().position(|slot| slot.status == SlotStatus::Invalid)
    }
}

/// Compute the standard reflected CRC-32 (IEEE 802.3 / CRC-32/ISO-HDLC) checksum
/// of `data`, matching the algorithm used by the rest of this crate's own
/// on-flash block checksums.
#[must_use]
pub fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
