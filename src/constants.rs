//! Compile-time layout constants for the flash table engine.
//!
//! Changing any of these invalidates data previously written with a different value,
//! since they are baked into the on-flash layout rather than stored in it.

/// Size in bytes of one erase unit on the target NOR device.
pub const SECTOR: u32 = 4096;

/// [`SECTOR`] as a `usize`, for sizing fixed-capacity buffers.
pub const SECTOR_LEN: usize = SECTOR as usize;

/// Maximum number of bytes programmed by a single chunked-programmer sub-operation.
pub const CHUNK: usize = 1024;

/// Maximum length, including the trailing NUL padding, of a table name.
pub const NAME_MAX: usize = 8;

/// Maximum number of table slots tracked by one manager table.
pub const MAX_TABLES: usize = 24;

/// Magic value stamped at the start of every `ManagerTable` record.
pub const MAGIC_MGR: u16 = 0xAAAA;

/// Magic value stamped at the start of every `TableHeader` record.
pub const MAGIC_TBL: u16 = 0x0531;

/// On-flash format version of the `ManagerTable` record.
pub const MGR_VERSION: u8 = 1;
