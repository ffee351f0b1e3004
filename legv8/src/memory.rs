//! The three-region paged address space: zero page, text, and dynamic.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::constants::{DYNAMIC_END, TEXT_END, TEXT_START, ZERO_PAGE_BYTES};
use crate::Address;

/// Host page size dynamic pages are allocated in.
const PAGE_SIZE: u64 = 4096;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    #[error("address 0x{0:016X} is not mapped")]
    InvalidAddress(Address),
}

/// Single point of byte-level access to the address space.
///
/// Fallible byte read/write at an absolute address. The three fixed regions here are
/// not independently-mountable fragments, they're dispatched on by address range inside
/// a single [`Memory`] type, since the region layout is fixed for the lifetime of the
/// VM.
pub trait Storage {
    fn read_byte(&mut self, addr: Address) -> Result<u8, AccessError>;
    fn write_byte(&mut self, addr: Address, value: u8) -> Result<(), AccessError>;
}

enum Region {
    ZeroPage(usize),
    Text(usize),
    Dynamic(u64, usize),
    Reserved,
}

/// The VM's address space: an optional zero page, the read-only text segment, and an
/// on-demand-paged dynamic region.
pub struct Memory {
    zero_page: Option<Vec<u8>>,
    text: Vec<u8>,
    dynamic: HashMap<u64, Vec<u8>>,
}

impl Memory {
    /// Builds the address space around an already-assembled instruction stream.
    /// `text` is the packed, big-endian instruction bytes; `zero_page` enables the
    /// 4096-byte region at address 0 (the `-z`/`--zero-page` CLI flag).
    pub fn new(text: Vec<u8>, zero_page: bool) -> Self {
        Memory {
            zero_page: zero_page.then(|| vec![0u8; ZERO_PAGE_BYTES as usize]),
            text,
            dynamic: HashMap::new(),
        }
    }

    fn classify(&self, addr: Address) -> Region {
        if let Some(zp) = &self.zero_page {
            if addr < zp.len() as u64 {
                return Region::ZeroPage(addr as usize);
            }
        }
        if addr >= TEXT_START && addr < TEXT_END {
            let offset = (addr - TEXT_START) as usize;
            if offset < self.text.len() {
                return Region::Text(offset);
            }
            return Region::Reserved;
        }
        if addr >= TEXT_END && addr < DYNAMIC_END {
            let page = addr / PAGE_SIZE;
            let offset = (addr % PAGE_SIZE) as usize;
            return Region::Dynamic(page, offset);
        }
        Region::Reserved
    }

    /// Reads the 32-bit instruction word at the given 0-based index into the text
    /// segment. Out-of-range indices are `InvalidAddress`, not a silent halt — callers
    /// wanting halt-at-end-of-text semantics check the index against the text length
    /// themselves before fetching (see [`crate::vm::Vm`]).
    pub fn load_aligned(&self, word_index: u64) -> Result<u32, AccessError> {
        let offset = (word_index as usize)
            .checked_mul(4)
            .ok_or(AccessError::InvalidAddress(TEXT_START + word_index * 4))?;
        let bytes = self
            .text
            .get(offset..offset + 4)
            .ok_or(AccessError::InvalidAddress(TEXT_START + word_index * 4))?;
        Ok(BigEndian::read_u32(bytes))
    }

    /// Number of whole instruction words in the text segment.
    pub fn text_word_count(&self) -> u64 {
        self.text.len() as u64 / 4
    }

    fn read_bytes(&mut self, addr: Address, buf: &mut [u8]) -> Result<(), AccessError> {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.read_byte(addr + i as u64)?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, addr: Address, bytes: &[u8]) -> Result<(), AccessError> {
        for (i, &byte) in bytes.iter().enumerate() {
            self.write_byte(addr + i as u64, byte)?;
        }
        Ok(())
    }

    pub fn load_i8(&mut self, addr: Address) -> Result<i8, AccessError> {
        Ok(self.read_byte(addr)? as i8)
    }

    pub fn store_i8(&mut self, addr: Address, value: i8) -> Result<(), AccessError> {
        self.write_byte(addr, value as u8)
    }

    pub fn load_i16(&mut self, addr: Address) -> Result<i16, AccessError> {
        let mut buf = [0u8; 2];
        self.read_bytes(addr, &mut buf)?;
        Ok(BigEndian::read_i16(&buf))
    }

    pub fn store_i16(&mut self, addr: Address, value: i16) -> Result<(), AccessError> {
        let mut buf = [0u8; 2];
        BigEndian::write_i16(&mut buf, value);
        self.write_bytes(addr, &buf)
    }

    pub fn load_i32(&mut self, addr: Address) -> Result<i32, AccessError> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(BigEndian::read_i32(&buf))
    }

    pub fn store_i32(&mut self, addr: Address, value: i32) -> Result<(), AccessError> {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, value);
        self.write_bytes(addr, &buf)
    }

    pub fn load_i64(&mut self, addr: Address) -> Result<i64, AccessError> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(BigEndian::read_i64(&buf))
    }

    pub fn store_i64(&mut self, addr: Address, value: i64) -> Result<(), AccessError> {
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, value);
        self.write_bytes(addr, &buf)
    }

    pub fn load_f32(&mut self, addr: Address) -> Result<f32, AccessError> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(BigEndian::read_f32(&buf))
    }

    pub fn store_f32(&mut self, addr: Address, value: f32) -> Result<(), AccessError> {
        let mut buf = [0u8; 4];
        BigEndian::write_f32(&mut buf, value);
        self.write_bytes(addr, &buf)
    }

    pub fn load_f64(&mut self, addr: Address) -> Result<f64, AccessError> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(BigEndian::read_f64(&buf))
    }

    pub fn store_f64(&mut self, addr: Address, value: f64) -> Result<(), AccessError> {
        let mut buf = [0u8; 8];
        BigEndian::write_f64(&mut buf, value);
        self.write_bytes(addr, &buf)
    }
}

impl Storage for Memory {
    fn read_byte(&mut self, addr: Address) -> Result<u8, AccessError> {
        match self.classify(addr) {
            Region::ZeroPage(i) => Ok(self.zero_page.as_ref().unwrap()[i]),
            Region::Text(i) => Ok(self.text[i]),
            Region::Dynamic(page, offset) => {
                log::trace!("allocating dynamic page {page} on read");
                let bytes = self
                    .dynamic
                    .entry(page)
                    .or_insert_with(|| vec![0u8; PAGE_SIZE as usize]);
                Ok(bytes[offset])
            }
            Region::Reserved => Err(AccessError::InvalidAddress(addr)),
        }
    }

    fn write_byte(&mut self, addr: Address, value: u8) -> Result<(), AccessError> {
        match self.classify(addr) {
            Region::ZeroPage(i) => {
                self.zero_page.as_mut().unwrap()[i] = value;
                Ok(())
            }
            Region::Text(_) => Err(AccessError::InvalidAddress(addr)),
            Region::Dynamic(page, offset) => {
                log::trace!("allocating dynamic page {page} on write");
                let bytes = self
                    .dynamic
                    .entry(page)
                    .or_insert_with(|| vec![0u8; PAGE_SIZE as usize]);
                bytes[offset] = value;
                Ok(())
            }
            Region::Reserved => Err(AccessError::InvalidAddress(addr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Memory {
        Memory::new(vec![0u8; 16], false)
    }

    #[test]
    fn store_then_load_round_trips() {
        let mut mem = memory();
        mem.store_i64(TEXT_END, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(mem.load_i64(TEXT_END).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn load_before_text_start_faults() {
        let mut mem = memory();
        assert!(mem.load_i8(TEXT_START - 1).is_err());
    }

    #[test]
    fn load_at_text_end_lands_in_dynamic_and_succeeds() {
        let mut mem = memory();
        assert_eq!(mem.load_i32(TEXT_END).unwrap(), 0);
    }

    #[test]
    fn write_into_text_segment_is_rejected() {
        let mut mem = memory();
        assert!(mem.store_i8(TEXT_START, 1).is_err());
    }

    #[test]
    fn load_across_dynamic_page_boundary_matches_contiguous_region() {
        let mut mem = memory();
        let addr = TEXT_END + PAGE_SIZE - 2;
        mem.store_i32(addr, 0x1122_3344).unwrap();
        assert_eq!(mem.load_i32(addr).unwrap(), 0x1122_3344);
    }

    #[test]
    fn zero_page_is_only_mapped_when_enabled() {
        let mut mem = Memory::new(vec![0u8; 16], false);
        assert!(mem.load_i8(0).is_err());
        let mut mem = Memory::new(vec![0u8; 16], true);
        assert_eq!(mem.load_i8(0).unwrap(), 0);
    }
}
