//! A key-value / named-table storage engine for raw NOR-flash devices.
//!
//! The engine manages a fixed flash region as a collection of named, typed
//! row-tables. Durability across power loss comes from writing new versions
//! of the index (the "manager table") in append fashion, and from relocating
//! row-tables on every mutation rather than editing them in place, so that
//! bits only ever transition 1 -> 0 until the device is erased.
//!
//! See [`Engine`] for the entry point, and [`FlashDriver`] for the contract a
//! caller's flash driver must satisfy.
#![cfg_attr(not(feature = "host"), no_std)]

pub mod allocator;
pub mod chunked;
pub mod codec;
pub mod commit;
pub mod constants;
pub mod discovery;
mod engine;
mod error;
pub mod gc;
pub mod driver;

#[cfg(any(test, feature = "host"))]
pub mod mock_flash;

pub use driver::FlashDriver;
pub use engine::{Engine, TableInfo};
pub use error::{Error, Result};
