//! A host-only `FlashDriver` used by this crate's own tests. Not part of the
//! product surface.

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::path::Path;

use crate::constants::SECTOR;
use crate::driver::FlashDriver;
use crate::error::{Error, Result};

/// An in-process NOR-flash stand-in, enforcing the same 1-bit-only program
/// semantics as a real device, backed either by a plain byte buffer or by a
/// `tempfile`-backed file for tests that want to exercise a real filesystem.
pub struct MockFlash {
    bytes: Vec<u8>,
    file: Option<File>,
}

impl MockFlash {
    /// Create an in-memory mock of `total_size` bytes, all erased (0xFF).
    #[must_use]
    pub fn new(total_size: u32) -> Self {
        Self {
            bytes: vec![0xFFu8; total_size as usize],
            file: None,
        }
    }

    /// Snapshot the current device contents, for power-loss-simulation tests that
    /// want to replay the same starting bytes through several truncated mutations.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Rebuild an in-memory mock from a previously captured [`Self::snapshot`].
    #[must_use]
    pub fn from_snapshot(bytes: Vec<u8>) -> Self {
        Self { bytes, file: None }
    }

    /// Create a mock backed by a temporary file, for tests that want to
    /// simulate truncated writes by reopening a shorter file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverError`] if the temp file cannot be created or sized.
    pub fn create_tempfile(total_size: u32) -> Result<(Self, tempfile::NamedTempFile)> {
        let tmp = tempfile::NamedTempFile::new().map_err(|_err| Error::DriverError)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .map_err(|_err| Error::DriverError)?;
        file.set_len(u64::from(total_size)).map_err(|_err| Error::DriverError)?;
        let mut mock = Self {
            bytes: vec![0xFFu8; total_size as usize],
            file: Some(file),
        };
        mock.flush_to_file()?;
        Ok((mock, tmp))
    }

    /// Reopen a tempfile-backed mock from a path, for power-loss-simulation
    /// tests that truncate the file out from under a running mock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverError`] if the file cannot be opened or read.
    pub fn open_tempfile(path: &Path, total_size: u32) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|_err| Error::DriverError)?;
        let mut bytes = vec![0xFFu8; total_size as usize];
        file.seek(SeekFrom::Start(0)).map_err(|_err| Error::DriverError)?;
        let read_len = file.read(&mut bytes).map_err(|_err| Error::DriverError)?;
        // Bytes beyond a truncated file stay 0xFF, simulating an erased tail.
        let _ = read_len;
        Ok(Self { bytes, file: Some(file) })
    }

    fn flush_to_file(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(0)).map_err(|_err| Error::DriverError)?;
            file.write_all(&self.bytes).map_err(|_err| Error::DriverError)?;
            file.flush().map_err(|_err| Error::DriverError)?;
        }
        Ok(())
    }

    /// Truncate the backing file to `len` bytes, simulating a write
    /// interrupted by power loss partway through.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverError`] if there is no backing file or the
    /// truncation fails.
    pub fn truncate_backing_file(&mut self, len: u64) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::DriverError)?;
        file.set_len(len).map_err(|_err| Error::DriverError)
    }
}

impl FlashDriver for MockFlash {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let start = addr as usize;
        let end = start + buf.len();
        let slice = self.bytes.get(start..end).ok_or(Error::DriverError)?;
        buf.copy_from_slice(slice);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let start = addr as usize;
        let end = start + data.len();
        let slice = self.bytes.get_mut(start..end).ok_or(Error::DriverError)?;
        for (existing, incoming) in slice.iter_mut().zip(data) {
            if *existing & incoming != *incoming {
                return Err(Error::DriverError);
            }
            *existing = *incoming;
        }
        self.flush_to_file()
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        if addr % SECTOR != 0 || len % SECTOR != 0 {
            return Err(Error::InvalidArg);
        }
        let start = addr as usize;
        let end = start + len as usize;
        let slice = self.bytes.get_mut(start..end).ok_or(Error::DriverError)?;
        slice.fill(0xFF);
        self.flush_to_file()
    }
}
