//! Splits a single large flash program into bounded-size sub-operations so that a
//! long write can be preempted between chunks.

use defmt::debug;

use crate::constants::CHUNK;
use crate::driver::FlashDriver;
use crate::error::Result;

/// Program `data` at `addr`, issuing the underlying driver's `program` in pieces
/// of at most [`CHUNK`] bytes. Aborts on the first failing sub-operation.
pub fn program_chunked<D: FlashDriver>(driver: &mut D, addr: u32, data: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < data.len() {
        let remaining = data.len() - offset;
        let len = remaining.min(CHUNK);
        let chunk_addr = addr + offset as u32;
        driver.program(chunk_addr, &data[offset..offset + len])?;
        debug!("chunked program: {} bytes at 0x{:08x}", len, chunk_addr);
        offset += len;
    }
    Ok(())
}
