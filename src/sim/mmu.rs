//! Virtual memory and address translation.
//!
//! This module consists of:
//! - [`Mmu`]: The memory-management unit, which owns physical memory and translates every access.
//! - [`PageTableEntry`]: One entry of a page table.
//! - [`MemAccessCtx`]: What is being accessed, by whom, and through which page tables.
//! - [`PageFault`]: The error raised when a page is not present.
//!
//! # Translation
//!
//! In real mode (the default), a virtual address is used as the physical address.
//!
//! In paged mode, a virtual address is split into a 20-bit page number and a
//! 12-bit offset ([`NUMBER_BITS_OFFSET`]). The page table is a flat array of
//! [`PageTableEntry`]s in physical memory, so the entry for page `n` lives at
//! `table + 4n`. The entry supplies the frame, and the physical address is
//! `frame ‖ offset`.
//!
//! With nested tables, the walk happens twice: the guest table maps the virtual address
//! to a guest-physical address, which the host table then maps to the physical address.
//!
//! ```
//! use sim32::bits::{PhysicalAddress, VirtualAddress, DoubleWord};
//! use sim32::sim::mem::SparseRam;
//! use sim32::sim::mmu::{Mmu, MemAccessCtx, PageTableEntry};
//! use sim32::sim::SimErr;
//!
//! let mut mmu = Mmu::new(SparseRam::new(PhysicalAddress::from_u32(0xF_FFFF)));
//! let table = PhysicalAddress::from_u32(0x8000);
//! mmu.enable_memory_virtualization();
//!
//! let ctx = MemAccessCtx::kernel_write(table);
//! let addr = VirtualAddress::from_u32(0x1234);
//! let Err(SimErr::PageFault(fault)) = mmu.write_word(addr, DoubleWord::from_u32(5), ctx) else {
//!     panic!("page 1 should not be mapped")
//! };
//! assert_eq!(fault.entry_address, PhysicalAddress::from_u32(0x8004));
//!
//! // Map page 1 to frame 0x42 and retry.
//! mmu.set_entry(fault.entry_address, PageTableEntry::mapped(0x42)).unwrap();
//! mmu.write_word(addr, DoubleWord::from_u32(5), ctx).unwrap();
//! assert_eq!(mmu.translate(addr, ctx).unwrap(), PhysicalAddress::from_u32(0x42234));
//! ```

use crate::bits::{Bits, Byte, DoubleWord, PhysicalAddress, VirtualAddress};

use super::mem::Memory;
use super::observer::{AccessObserver, AccessSet};
use super::regs::Privilege;
use super::SimErr;

/// Number of offset bits in a virtual address.
pub const NUMBER_BITS_OFFSET: usize = 12;
/// Number of page number bits in a virtual address.
pub const NUMBER_BITS_PAGE: usize = 32 - NUMBER_BITS_OFFSET;
/// Bytes per page.
pub const PAGE_SIZE: u32 = 1 << NUMBER_BITS_OFFSET;

/// A page table entry.
///
/// The entry is laid out as the following (bit 0 is the most significant bit):
/// - `PTE[0]`: present
/// - `PTE[1]`: writable
/// - `PTE[2]`: executable
/// - `PTE[3]`: kernel-only
/// - `PTE[4]`: pinned (never evicted, not interpreted by the MMU)
/// - `PTE[5]`: changed (set by the MMU on every write through this entry)
/// - `PTE[6..12]`: reserved
/// - `PTE[12..32]`: page frame number
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PageTableEntry(DoubleWord);

macro_rules! pte_flags {
    ($($(#[$m:meta])* $get:ident, $set:ident = $idx:literal);+ $(;)?) => {
        impl PageTableEntry {
            $(
                $(#[$m])*
                pub fn $get(&self) -> bool {
                    self.0.bit($idx)
                }
                #[doc = concat!("Sets the flag read by [`PageTableEntry::", stringify!($get), "`].")]
                pub fn $set(&mut self, value: bool) {
                    self.0.set_bit($idx, value);
                }
            )+
        }
    }
}
pte_flags! {
    /// Whether the page is mapped.
    present, set_present = 0;
    /// Whether the page can be written.
    writable, set_writable = 1;
    /// Whether instructions can be fetched from the page.
    executable, set_executable = 2;
    /// Whether only kernel mode can access the page.
    kernel_only, set_kernel_only = 3;
    /// Whether the page is pinned in memory.
    pinned, set_pinned = 4;
    /// Whether the page was written since this flag was last cleared.
    changed, set_changed = 5;
}

impl PageTableEntry {
    /// Interprets a double word as an entry.
    pub fn new(word: DoubleWord) -> Self {
        Self(word)
    }
    /// A present, writable and executable user page mapped to `frame`.
    pub fn mapped(frame: u32) -> Self {
        let mut pte = Self::default().with_frame(frame);
        pte.set_present(true);
        pte.set_writable(true);
        pte.set_executable(true);
        pte
    }
    /// The raw word.
    pub fn get(&self) -> DoubleWord {
        self.0
    }
    /// The 12 flag bits.
    pub fn flags(&self) -> Bits<NUMBER_BITS_OFFSET> {
        self.0.most_significant()
    }
    /// The page frame number.
    pub fn frame(&self) -> Bits<NUMBER_BITS_PAGE> {
        self.0.least_significant()
    }
    /// This entry, with its frame replaced by the low 20 bits of `frame`.
    pub fn with_frame(self, frame: u32) -> Self {
        let frame = DoubleWord::from_u32(frame).least_significant::<NUMBER_BITS_PAGE>();
        Self(self.0.with_field(NUMBER_BITS_OFFSET, frame))
    }
}
impl std::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags: String = [
            (self.present(), 'P'),
            (self.writable(), 'W'),
            (self.executable(), 'X'),
            (self.kernel_only(), 'K'),
            (self.pinned(), 'L'),
            (self.changed(), 'C'),
        ].into_iter()
            .map(|(set, c)| if set { c } else { '-' })
            .collect();

        write!(f, "PageTableEntry({flags}, frame 0x{:05X})", self.frame().to_unsigned_integer())
    }
}

/// The kind of memory access.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Access {
    /// Reading data.
    Read,
    /// Writing data.
    Write,
    /// Fetching an instruction.
    Execute
}

/// The page tables used for paged translation.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum PageTables {
    /// One table (PTP).
    Single(PhysicalAddress),
    /// A guest table (GPTP) followed by a host table (NPTP).
    Nested {
        /// The guest table.
        guest: PhysicalAddress,
        /// The host table.
        host: PhysicalAddress
    }
}

/// Which table a walk was using when it faulted.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Stage {
    /// The only table of a single-level translation.
    Single,
    /// The guest table of a nested translation.
    Guest,
    /// The host table of a nested translation.
    Host
}

/// Context behind a memory access.
///
/// The CPU builds this from its registers for each access (see [`Cpu::mem_ctx`]).
///
/// [`Cpu::mem_ctx`]: super::Cpu::mem_ctx
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct MemAccessCtx {
    /// The privilege level of the requester.
    pub privilege: Privilege,
    /// The kind of access.
    pub access: Access,
    /// The tables used when paging is enabled.
    pub tables: PageTables
}
impl MemAccessCtx {
    /// A kernel-mode read through a single table.
    pub fn kernel_read(table: PhysicalAddress) -> Self {
        Self { privilege: Privilege::Kernel, access: Access::Read, tables: PageTables::Single(table) }
    }
    /// A kernel-mode write through a single table.
    pub fn kernel_write(table: PhysicalAddress) -> Self {
        Self { privilege: Privilege::Kernel, access: Access::Write, tables: PageTables::Single(table) }
    }
    /// This context with another kind of access.
    pub fn with_access(self, access: Access) -> Self {
        Self { access, ..self }
    }
}

/// A page was not present during translation.
///
/// The caller is expected to map the page (by writing the entry at `entry_address`)
/// and retry the access.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct PageFault {
    /// The flags of the entry that faulted.
    pub flags: Bits<NUMBER_BITS_OFFSET>,
    /// The physical address of the entry that faulted.
    pub entry_address: PhysicalAddress,
    /// The virtual address being translated.
    pub virtual_address: VirtualAddress,
    /// The table the entry belongs to.
    pub stage: Stage
}
impl std::fmt::Display for PageFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page fault at {} (entry at {}", self.virtual_address, self.entry_address)?;
        match self.stage {
            Stage::Single => f.write_str(")"),
            Stage::Guest  => f.write_str(", guest table)"),
            Stage::Host   => f.write_str(", host table)"),
        }
    }
}
impl std::error::Error for PageFault {}

/// Page table entries (guest or single, then host) a write still has to mark as changed.
type Dirty = [Option<PhysicalAddress>; 2];

/// The memory-management unit.
///
/// This owns physical memory. Every access goes through [`Mmu::translate`],
/// and every translated data access is recorded in [`Mmu::observer`].
#[derive(Debug)]
pub struct Mmu<M> {
    ram: M,
    paging: bool,
    /// Tracks physical memory accesses.
    pub observer: AccessObserver
}
impl<M: Memory> Mmu<M> {
    /// Creates an MMU in real mode.
    pub fn new(ram: M) -> Self {
        Self { ram, paging: false, observer: Default::default() }
    }

    /// The physical memory.
    pub fn ram(&self) -> &M {
        &self.ram
    }
    /// The physical memory, mutably.
    ///
    /// Accesses through this bypass translation and observation.
    pub fn ram_mut(&mut self) -> &mut M {
        &mut self.ram
    }

    /// Whether paged translation is enabled.
    pub fn is_paging(&self) -> bool {
        self.paging
    }
    /// Switches to paged mode.
    pub fn enable_memory_virtualization(&mut self) {
        tracing::debug!("paging enabled");
        self.paging = true;
    }
    /// Switches to real mode.
    pub fn disable_memory_virtualization(&mut self) {
        tracing::debug!("paging disabled");
        self.paging = false;
    }

    /// Reads the page table entry at a physical address.
    pub fn entry(&self, entry_address: PhysicalAddress) -> Result<PageTableEntry, SimErr> {
        Ok(PageTableEntry::new(self.ram.read_word(entry_address)?))
    }
    /// Writes the page table entry at a physical address.
    pub fn set_entry(&mut self, entry_address: PhysicalAddress, pte: PageTableEntry) -> Result<(), SimErr> {
        Ok(self.ram.write_word(entry_address, pte.get())?)
    }

    /// Walks one table, returning the translated address
    /// and, for a write, the entry which still has to be marked as changed.
    fn walk(&self, table: PhysicalAddress, addr: VirtualAddress, ctx: MemAccessCtx, stage: Stage) -> Result<(PhysicalAddress, Option<PhysicalAddress>), SimErr> {
        let bits = addr.to_double_word();

        // table + 4 * page number
        let index = DoubleWord::zero()
            .with_field(NUMBER_BITS_OFFSET - 2, bits.most_significant::<NUMBER_BITS_PAGE>());
        let entry_address = table.wrapping_offset(index);

        let pte = self.entry(entry_address)?;
        if !pte.present() {
            let fault = PageFault { flags: pte.flags(), entry_address, virtual_address: addr, stage };
            tracing::debug!(%fault, "page fault");
            return Err(SimErr::PageFault(fault));
        }

        let denied = (ctx.privilege == Privilege::User && pte.kernel_only())
            || (ctx.access == Access::Write && !pte.writable())
            || (ctx.access == Access::Execute && !pte.executable());
        if denied {
            tracing::debug!(%addr, ?pte, ?ctx, "page access denied");
            return Err(SimErr::PrivilegeViolation);
        }

        let physical = DoubleWord::zero()
            .with_field(0, pte.frame())
            .with_field(NUMBER_BITS_PAGE, bits.least_significant::<NUMBER_BITS_OFFSET>());
        let dirty = (ctx.access == Access::Write && !pte.changed()).then_some(entry_address);
        Ok((PhysicalAddress::from_double_word(physical), dirty))
    }

    /// Translates without touching any page table entry.
    fn resolve(&self, addr: VirtualAddress, ctx: MemAccessCtx) -> Result<(PhysicalAddress, Dirty), SimErr> {
        if !self.paging {
            return Ok((addr.identity_mapped(), [None; 2]));
        }

        match ctx.tables {
            PageTables::Single(table) => {
                let (physical, dirty) = self.walk(table, addr, ctx, Stage::Single)?;
                Ok((physical, [dirty, None]))
            },
            PageTables::Nested { guest, host } => {
                let (guest_physical, guest_dirty) = self.walk(guest, addr, ctx, Stage::Guest)?;
                let guest_physical = VirtualAddress::from_double_word(guest_physical.to_double_word());
                let (physical, host_dirty) = self.walk(host, guest_physical, ctx, Stage::Host)?;
                Ok((physical, [guest_dirty, host_dirty]))
            }
        }
    }

    fn mark_changed(&mut self, dirty: Dirty) -> Result<(), SimErr> {
        for entry_address in dirty.into_iter().flatten() {
            let mut pte = self.entry(entry_address)?;
            if !pte.changed() {
                pte.set_changed(true);
                self.set_entry(entry_address, pte)?;
            }
        }
        Ok(())
    }

    /// Translates a virtual address, checking that the access is allowed.
    ///
    /// In real mode, this always succeeds.
    /// A write through a page table entry sets its `changed` flag.
    pub fn translate(&mut self, addr: VirtualAddress, ctx: MemAccessCtx) -> Result<PhysicalAddress, SimErr> {
        let (physical, dirty) = self.resolve(addr, ctx)?;
        self.mark_changed(dirty)?;
        Ok(physical)
    }

    /// Translates the four bytes of a word, without marking any entry.
    ///
    /// Unless the word crosses a page boundary in paged mode, the bytes are contiguous.
    fn resolve_word(&self, addr: VirtualAddress, ctx: MemAccessCtx) -> Result<([PhysicalAddress; 4], [Dirty; 4]), SimErr> {
        let offset = addr.to_integer() % PAGE_SIZE;
        if !self.paging || offset <= PAGE_SIZE - 4 {
            let (base, dirty) = self.resolve(addr, ctx)?;
            return Ok(([0, 1, 2, 3].map(|i| base.wrapping_add(i)), [dirty, [None; 2], [None; 2], [None; 2]]));
        }

        let mut bytes = [PhysicalAddress::zero(); 4];
        let mut dirty = [[None; 2]; 4];
        for (i, (b, d)) in bytes.iter_mut().zip(&mut dirty).enumerate() {
            (*b, *d) = self.resolve(addr.wrapping_add(i as u32), ctx)?;
        }
        Ok((bytes, dirty))
    }

    /// Reads a byte.
    pub fn read_byte(&mut self, addr: VirtualAddress, ctx: MemAccessCtx) -> Result<Byte, SimErr> {
        let physical = self.translate(addr, ctx)?;
        let data = self.ram.read_byte(physical)?;
        self.observer.update_mem_accesses(physical, AccessSet::READ);
        Ok(data)
    }

    /// Writes a byte.
    pub fn write_byte(&mut self, addr: VirtualAddress, data: Byte, ctx: MemAccessCtx) -> Result<(), SimErr> {
        let (physical, dirty) = self.resolve(addr, ctx)?;
        self.ram.check_range(physical)?;
        self.mark_changed(dirty)?;
        self.write_physical(physical, data)
    }

    /// Reads a (big-endian) word.
    pub fn read_word(&mut self, addr: VirtualAddress, ctx: MemAccessCtx) -> Result<DoubleWord, SimErr> {
        let (physical, dirty) = self.resolve_word(addr, ctx)?;

        let mut bytes = [Byte::zero(); 4];
        for (b, &p) in bytes.iter_mut().zip(&physical) {
            *b = self.ram.read_byte(p)?;
        }
        for d in dirty {
            self.mark_changed(d)?;
        }
        for p in physical {
            self.observer.update_mem_accesses(p, AccessSet::READ);
        }
        Ok(DoubleWord::from_bytes(bytes))
    }

    /// Writes a (big-endian) word.
    ///
    /// Every byte is translated and bounds-checked before any entry is marked
    /// or any byte is written.
    pub fn write_word(&mut self, addr: VirtualAddress, data: DoubleWord, ctx: MemAccessCtx) -> Result<(), SimErr> {
        let (physical, dirty) = self.resolve_word(addr, ctx)?;
        for &p in &physical {
            self.ram.check_range(p)?;
        }
        for d in dirty {
            self.mark_changed(d)?;
        }
        for (p, b) in physical.into_iter().zip(data.to_bytes()) {
            self.write_physical(p, b)?;
        }
        Ok(())
    }

    fn write_physical(&mut self, physical: PhysicalAddress, data: Byte) -> Result<(), SimErr> {
        let old = self.ram.read_byte(physical)?;
        self.ram.write_byte(physical, data)?;

        let mut set = AccessSet::WRITTEN;
        if old != data {
            set |= AccessSet::MODIFIED;
        }
        self.observer.update_mem_accesses(physical, set);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::mem::SparseRam;

    use super::*;

    const TABLE: u32 = 0x8000;

    fn mmu() -> Mmu<SparseRam> {
        let mut mmu = Mmu::new(SparseRam::new(PhysicalAddress::from_u32(0xF_FFFF)));
        mmu.enable_memory_virtualization();
        mmu
    }
    fn entry_addr(table: u32, page: u32) -> PhysicalAddress {
        PhysicalAddress::from_u32(table + 4 * page)
    }
    fn ctx(privilege: Privilege, access: Access) -> MemAccessCtx {
        MemAccessCtx { privilege, access, tables: PageTables::Single(PhysicalAddress::from_u32(TABLE)) }
    }

    #[test]
    fn test_pte_layout() {
        let mut pte = PageTableEntry::mapped(0xABCDE);
        assert_eq!(pte.get().to_u32(), 0xE00A_BCDE);
        pte.set_kernel_only(true);
        pte.set_changed(true);
        assert_eq!(pte.flags(), "111101000000".parse().unwrap());
        assert_eq!(pte.frame().to_unsigned_integer(), 0xABCDE);

        // frame numbers are truncated to 20 bits
        assert_eq!(PageTableEntry::default().with_frame(0xFFF0_0001).get().to_u32(), 1);
    }

    #[test]
    fn test_real_mode() {
        let mut mmu = mmu();
        mmu.disable_memory_virtualization();

        let addr = VirtualAddress::from_u32(0x1234);
        let c = ctx(Privilege::User, Access::Write);
        assert_eq!(mmu.translate(addr, c).unwrap(), PhysicalAddress::from_u32(0x1234));
        mmu.write_word(addr, DoubleWord::from_u32(99), c).unwrap();
        assert_eq!(mmu.ram().read_word(PhysicalAddress::from_u32(0x1234)).unwrap().to_u32(), 99);
    }

    #[test]
    fn test_page_fault_round_trip() {
        let mut mmu = mmu();
        let addr = VirtualAddress::from_u32(0x0000_3010);
        let value = DoubleWord::from_u32(0xDEAD_BEEF);
        let c = ctx(Privilege::User, Access::Write);

        let Err(SimErr::PageFault(fault)) = mmu.write_word(addr, value, c) else {
            panic!("expected page fault")
        };
        assert_eq!(fault.entry_address, entry_addr(TABLE, 3));
        assert_eq!(fault.virtual_address, addr);
        assert_eq!(fault.stage, Stage::Single);
        assert!(fault.flags.is_zero());

        mmu.set_entry(fault.entry_address, PageTableEntry::mapped(0x51)).unwrap();
        mmu.write_word(addr, value, c).unwrap();
        assert_eq!(mmu.read_word(addr, c.with_access(Access::Read)).unwrap(), value);
        assert_eq!(mmu.ram().read_word(PhysicalAddress::from_u32(0x51010)).unwrap(), value);

        // the write marked the entry as changed
        assert!(mmu.entry(fault.entry_address).unwrap().changed());
    }

    #[test]
    fn test_access_checks() {
        let mut mmu = mmu();
        let mut pte = PageTableEntry::mapped(0x10);
        pte.set_writable(false);
        pte.set_executable(false);
        mmu.set_entry(entry_addr(TABLE, 0), pte).unwrap();
        let mut kernel = PageTableEntry::mapped(0x11);
        kernel.set_kernel_only(true);
        mmu.set_entry(entry_addr(TABLE, 1), kernel).unwrap();

        let page0 = VirtualAddress::from_u32(0x10);
        let page1 = VirtualAddress::from_u32(0x1010);
        assert!(mmu.read_word(page0, ctx(Privilege::User, Access::Read)).is_ok());
        assert_eq!(mmu.translate(page0, ctx(Privilege::Kernel, Access::Write)), Err(SimErr::PrivilegeViolation));
        assert_eq!(mmu.translate(page0, ctx(Privilege::Kernel, Access::Execute)), Err(SimErr::PrivilegeViolation));

        assert_eq!(mmu.translate(page1, ctx(Privilege::User, Access::Read)), Err(SimErr::PrivilegeViolation));
        assert_eq!(
            mmu.translate(page1, ctx(Privilege::Kernel, Access::Write)),
            Ok(PhysicalAddress::from_u32(0x11010))
        );
    }

    #[test]
    fn test_word_across_pages() {
        let mut mmu = mmu();
        mmu.set_entry(entry_addr(TABLE, 0), PageTableEntry::mapped(0x20)).unwrap();
        mmu.set_entry(entry_addr(TABLE, 1), PageTableEntry::mapped(0x07)).unwrap();

        let c = ctx(Privilege::Kernel, Access::Write);
        mmu.write_word(VirtualAddress::from_u32(0xFFE), DoubleWord::from_u32(0x1122_3344), c).unwrap();

        let ram = mmu.ram();
        assert_eq!(ram.read_byte(PhysicalAddress::from_u32(0x20FFE)).unwrap().to_u8(), 0x11);
        assert_eq!(ram.read_byte(PhysicalAddress::from_u32(0x20FFF)).unwrap().to_u8(), 0x22);
        assert_eq!(ram.read_byte(PhysicalAddress::from_u32(0x07000)).unwrap().to_u8(), 0x33);
        assert_eq!(ram.read_byte(PhysicalAddress::from_u32(0x07001)).unwrap().to_u8(), 0x44);

        // A fault on the second page writes nothing.
        let Err(SimErr::PageFault(fault)) = mmu.write_word(VirtualAddress::from_u32(0x1FFF), DoubleWord::ones(), c) else {
            panic!("expected page fault")
        };
        assert_eq!(fault.entry_address, entry_addr(TABLE, 2));
        assert_eq!(mmu.ram().read_byte(PhysicalAddress::from_u32(0x07FFF)).unwrap(), Byte::zero());
    }

    #[test]
    fn test_faulted_write_marks_nothing() {
        let mut mmu = mmu();
        mmu.set_entry(entry_addr(TABLE, 4), PageTableEntry::mapped(0x30)).unwrap();
        let c = ctx(Privilege::Kernel, Access::Write);

        // page 4 is mapped, page 5 is not
        let Err(SimErr::PageFault(fault)) = mmu.write_word(VirtualAddress::from_u32(0x4FFE), DoubleWord::ones(), c) else {
            panic!("expected page fault")
        };
        assert_eq!(fault.entry_address, entry_addr(TABLE, 5));
        assert!(!mmu.entry(entry_addr(TABLE, 4)).unwrap().changed());
        assert_eq!(mmu.ram().read_byte(PhysicalAddress::from_u32(0x30FFE)).unwrap(), Byte::zero());

        mmu.set_entry(entry_addr(TABLE, 5), PageTableEntry::mapped(0x31)).unwrap();
        mmu.write_word(VirtualAddress::from_u32(0x4FFE), DoubleWord::ones(), c).unwrap();
        assert!(mmu.entry(entry_addr(TABLE, 4)).unwrap().changed());
        assert!(mmu.entry(entry_addr(TABLE, 5)).unwrap().changed());

        // reads never mark
        mmu.set_entry(entry_addr(TABLE, 6), PageTableEntry::mapped(0x32)).unwrap();
        mmu.read_word(VirtualAddress::from_u32(0x6000), c.with_access(Access::Read)).unwrap();
        assert!(!mmu.entry(entry_addr(TABLE, 6)).unwrap().changed());
    }

    #[test]
    fn test_nested() {
        let mut mmu = mmu();
        let guest = 0x8000;
        let host = 0x9000;
        let c = MemAccessCtx {
            privilege: Privilege::User,
            access: Access::Read,
            tables: PageTables::Nested { guest: PhysicalAddress::from_u32(guest), host: PhysicalAddress::from_u32(host) }
        };

        // virtual page 2 -> guest frame 5 -> host frame 0x33
        mmu.set_entry(entry_addr(guest, 2), PageTableEntry::mapped(5)).unwrap();
        let Err(SimErr::PageFault(fault)) = mmu.translate(VirtualAddress::from_u32(0x2ABC), c) else {
            panic!("expected host page fault")
        };
        assert_eq!(fault.stage, Stage::Host);
        assert_eq!(fault.entry_address, entry_addr(host, 5));
        assert_eq!(fault.virtual_address, VirtualAddress::from_u32(0x5ABC));

        mmu.set_entry(entry_addr(host, 5), PageTableEntry::mapped(0x33)).unwrap();
        assert_eq!(mmu.translate(VirtualAddress::from_u32(0x2ABC), c), Ok(PhysicalAddress::from_u32(0x33ABC)));

        let Err(SimErr::PageFault(fault)) = mmu.translate(VirtualAddress::from_u32(0x3000), c) else {
            panic!("expected guest page fault")
        };
        assert_eq!(fault.stage, Stage::Guest);
    }

    #[test]
    fn test_observer() {
        let mut mmu = mmu();
        mmu.disable_memory_virtualization();
        let c = ctx(Privilege::Kernel, Access::Write);
        let addr = VirtualAddress::from_u32(0x40);

        mmu.write_word(addr, DoubleWord::from_u32(0x0000_0001), c).unwrap();
        let accesses: Vec<_> = mmu.observer.take_mem_accesses().collect();
        assert_eq!(accesses.len(), 4);
        assert!(accesses[0].1.written() && !accesses[0].1.modified());
        assert!(accesses[3].1.modified());

        mmu.read_byte(addr, c.with_access(Access::Read)).unwrap();
        assert!(mmu.observer.get_mem_accesses(PhysicalAddress::from_u32(0x40)).read());
    }
}
