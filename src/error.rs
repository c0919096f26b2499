//! Unified error type for the flash table engine.

use derive_more::derive::{Display, Error, From};

/// A specialized `Result` where the error is this crate's `Error` type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Define a unified error type for this crate.
#[expect(missing_docs, reason = "The variants are self-explanatory.")]
#[derive(Debug, Display, Error, From)]
pub enum Error {
    #[display("argument is invalid for this operation")]
    InvalidArg,

    #[display("no table with the given name exists")]
    NotFound,

    #[display("a table with the given name already exists")]
    Exists,

    #[display("no free table slot remains in the manager table")]
    NoSlot,

    #[display("flash region has no space left for this request")]
    NoSpace,

    #[display("table is at capacity for its configured max_structs")]
    Full,

    #[display("index or mask bit is out of range for this table")]
    OutOfRange,

    #[display("operation requires an erase but erasing is not allowed")]
    EraseForbidden,

    #[display("on-flash data failed CRC or magic validation")]
    Corruption,

    #[display("gc or commit was attempted before a manager table was loaded")]
    InvalidState,

    #[display("underlying flash driver reported a failure")]
    DriverError,
}

impl Error {
    /// Maps this error onto the C-style `{0, -1, -2}` exit-code convention for callers
    /// that need it. Internal code should use `Result<T, Error>` directly instead.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArg | Self::NotFound | Self::Corruption | Self::DriverError => -1,
            Self::Exists
            | Self::NoSlot
            | Self::NoSpace
            | Self::Full
            | Self::OutOfRange
            | Self::EraseForbidden
            | Self::InvalidState => -2,
        }
    }
}
