//! Reference MMU backed by a page map.
//!
//! Ships with the crate so the test suite (and embedders without their own
//! page tables) can run guest code paths against real memory. Pages are
//! materialized on first touch; an interior lock makes the `&self` contract
//! safe under concurrent workers. Not a performance-oriented MMU.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use procbox_abi::flags::{MapFlags, ProtFlags};

use super::{GuestAddr, Mmu};

const PAGE_SIZE: u64 = 4096;

struct Page {
    data: Box<[u8; PAGE_SIZE as usize]>,
    prot: ProtFlags,
}

impl Page {
    fn zeroed(prot: ProtFlags) -> Page {
        Page { data: Box::new([0u8; PAGE_SIZE as usize]), prot }
    }
}

#[derive(Default)]
struct FlatState {
    pages: BTreeMap<u64, Page>,
    region_names: BTreeMap<u64, String>,
    brk_base: u64,
    brk_end: u64,
    mmap_cursor: u64,
}

/// Page-granular guest memory with on-demand allocation.
pub struct FlatMmu {
    state: RwLock<FlatState>,
}

impl FlatMmu {
    pub fn new() -> FlatMmu {
        let state = FlatState {
            brk_base: 0x4000_0000,
            brk_end: 0x4000_0000,
            mmap_cursor: 0x7f00_0000_0000,
            ..FlatState::default()
        };
        FlatMmu { state: RwLock::new(state) }
    }

    fn page_of(addr: GuestAddr) -> u64 {
        addr & !(PAGE_SIZE - 1)
    }

    fn read_bytes(&self, addr: GuestAddr, dst: &mut [u8]) {
        let mut state = self.state.write();
        let mut offset = 0usize;
        while offset < dst.len() {
            let cursor = addr + offset as u64;
            let base = Self::page_of(cursor);
            let in_page = (cursor - base) as usize;
            let take = dst.len().min(offset + (PAGE_SIZE as usize - in_page)) - offset;
            let page = state
                .pages
                .entry(base)
                .or_insert_with(|| Page::zeroed(ProtFlags::READ | ProtFlags::WRITE));
            dst[offset..offset + take].copy_from_slice(&page.data[in_page..in_page + take]);
            offset += take;
        }
    }

    fn write_bytes(&self, addr: GuestAddr, src: &[u8]) {
        let mut state = self.state.write();
        let mut offset = 0usize;
        while offset < src.len() {
            let cursor = addr + offset as u64;
            let base = Self::page_of(cursor);
            let in_page = (cursor - base) as usize;
            let take = src.len().min(offset + (PAGE_SIZE as usize - in_page)) - offset;
            let page = state
                .pages
                .entry(base)
                .or_insert_with(|| Page::zeroed(ProtFlags::READ | ProtFlags::WRITE));
            page.data[in_page..in_page + take].copy_from_slice(&src[offset..offset + take]);
            offset += take;
        }
    }
}

impl Default for FlatMmu {
    fn default() -> FlatMmu {
        FlatMmu::new()
    }
}

impl Mmu for FlatMmu {
    fn read8(&self, addr: GuestAddr) -> u8 {
        let mut raw = [0u8; 1];
        self.read_bytes(addr, &mut raw);
        raw[0]
    }

    fn read16(&self, addr: GuestAddr) -> u16 {
        let mut raw = [0u8; 2];
        self.read_bytes(addr, &mut raw);
        u16::from_le_bytes(raw)
    }

    fn read32(&self, addr: GuestAddr) -> u32 {
        let mut raw = [0u8; 4];
        self.read_bytes(addr, &mut raw);
        u32::from_le_bytes(raw)
    }

    fn read64(&self, addr: GuestAddr) -> u64 {
        let mut raw = [0u8; 8];
        self.read_bytes(addr, &mut raw);
        u64::from_le_bytes(raw)
    }

    fn write8(&self, addr: GuestAddr, value: u8) {
        self.write_bytes(addr, &[value]);
    }

    fn write16(&self, addr: GuestAddr, value: u16) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    fn write32(&self, addr: GuestAddr, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    fn write64(&self, addr: GuestAddr, value: u64) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    fn copy_from_mmu(&self, dst: &mut [u8], src: GuestAddr) {
        self.read_bytes(src, dst);
    }

    fn copy_to_mmu(&self, dst: GuestAddr, src: &[u8]) {
        self.write_bytes(dst, src);
    }

    fn read_string(&self, addr: GuestAddr) -> String {
        let mut bytes = Vec::new();
        let mut cursor = addr;
        loop {
            let byte = self.read8(cursor);
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            cursor += 1;
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn mmap(&self, addr: GuestAddr, length: u64, prot: ProtFlags, flags: MapFlags) -> u64 {
        let mut state = self.state.write();
        let length = (length + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        let base = if flags.contains(MapFlags::FIXED) || addr != 0 {
            Self::page_of(addr)
        } else {
            let base = state.mmap_cursor;
            state.mmap_cursor += length;
            base
        };
        let mut page_addr = base;
        while page_addr < base + length {
            state.pages.insert(page_addr, Page::zeroed(prot));
            page_addr += PAGE_SIZE;
        }
        base
    }

    fn mprotect(&self, addr: GuestAddr, length: u64, prot: ProtFlags) -> i32 {
        let mut state = self.state.write();
        let base = Self::page_of(addr);
        let mut page_addr = base;
        while page_addr < addr + length {
            state
                .pages
                .entry(page_addr)
                .or_insert_with(|| Page::zeroed(prot))
                .prot = prot;
            page_addr += PAGE_SIZE;
        }
        0
    }

    fn munmap(&self, addr: GuestAddr, length: u64) -> i32 {
        let mut state = self.state.write();
        let base = Self::page_of(addr);
        let mut page_addr = base;
        while page_addr < addr + length {
            state.pages.remove(&page_addr);
            page_addr += PAGE_SIZE;
        }
        0
    }

    fn brk(&self, addr: GuestAddr) -> u64 {
        let mut state = self.state.write();
        if addr == 0 {
            return state.brk_end;
        }
        if addr >= state.brk_base {
            let mut page_addr = Self::page_of(state.brk_end);
            while page_addr < addr {
                state
                    .pages
                    .entry(page_addr)
                    .or_insert_with(|| Page::zeroed(ProtFlags::READ | ProtFlags::WRITE));
                page_addr += PAGE_SIZE;
            }
            state.brk_end = addr;
        }
        state.brk_end
    }

    fn prot(&self, addr: GuestAddr) -> ProtFlags {
        let state = self.state.read();
        state
            .pages
            .get(&Self::page_of(addr))
            .map(|page| page.prot)
            .unwrap_or(ProtFlags::empty())
    }

    fn set_region_name(&self, addr: GuestAddr, name: &str) {
        let mut state = self.state.write();
        state.region_names.insert(Self::page_of(addr), name.to_string());
    }

    fn mincore(&self, addr: GuestAddr, length: u64) -> Vec<u8> {
        let state = self.state.read();
        let base = Self::page_of(addr);
        let mut out = Vec::new();
        let mut page_addr = base;
        while page_addr < addr + length {
            out.push(u8::from(state.pages.contains_key(&page_addr)));
            page_addr += PAGE_SIZE;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips_cross_page_boundaries() {
        let mmu = FlatMmu::new();
        mmu.write64(PAGE_SIZE - 4, 0x0123_4567_89ab_cdef);
        assert_eq!(mmu.read64(PAGE_SIZE - 4), 0x0123_4567_89ab_cdef);
        assert_eq!(mmu.read32(PAGE_SIZE - 4), 0x89ab_cdef);
    }

    #[test]
    fn strings_are_nul_terminated() {
        let mmu = FlatMmu::new();
        mmu.copy_to_mmu(0x1000, b"/tmp/x\0junk");
        assert_eq!(mmu.read_string(0x1000), "/tmp/x");
    }

    #[test]
    fn anonymous_mmap_allocates_distinct_regions() {
        let mmu = FlatMmu::new();
        let a = mmu.mmap(0, 8192, ProtFlags::READ | ProtFlags::WRITE, MapFlags::ANONYMOUS | MapFlags::PRIVATE);
        let b = mmu.mmap(0, 4096, ProtFlags::READ, MapFlags::ANONYMOUS | MapFlags::PRIVATE);
        assert_ne!(a, b);
        assert_eq!(mmu.prot(b), ProtFlags::READ);
        assert_eq!(mmu.mincore(a, 8192), vec![1, 1]);
        mmu.munmap(a, 8192);
        assert_eq!(mmu.mincore(a, 8192), vec![0, 0]);
    }

    #[test]
    fn brk_grows_and_reports() {
        let mmu = FlatMmu::new();
        let base = mmu.brk(0);
        let grown = mmu.brk(base + 100);
        assert_eq!(grown, base + 100);
        assert_eq!(mmu.brk(0), base + 100);
    }
}
