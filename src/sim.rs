//! Simulating and execution of assembled programs.
//!
//! This module is focused on executing fully assembled code (i.e., [`Program`]).
//!
//! This module consists of:
//! - [`Cpu`]: The struct that executes instructions.
//! - [`regs`]: The register file and the EFLAGS register.
//! - [`mmu`]: Address translation, page tables and page faults.
//! - [`mem`]: The physical memory store.
//! - [`debug`]: The module handling types of breakpoints for the CPU.
//! - [`frame`]: The module handling the frame stack and call frame management.
//! - [`observer`]: The module recording physical memory accesses.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a CPU and load a program into it:
//!
//! ```
//! use sim32::asm::assemble;
//! use sim32::sim::Cpu;
//!
//! let program = assemble("
//!     MOV $100, %eax
//! .loop:
//!     SUB $1, %eax
//!     CMP $0, %eax
//!     JG loop
//! ").unwrap();
//!
//! let mut cpu = Cpu::new(Default::default());
//! cpu.load_program(&program).unwrap();
//! cpu.run().unwrap();
//!
//! assert!(cpu.hit_halt());
//! assert_eq!(cpu.regs.eax.get().to_u32(), 0);
//! ```
//!
//! Execution stops when the fetched instruction word is all zeros.
//! Since every real instruction has delimiter bits set, untouched memory past the end
//! of a program acts as a halt.
//!
//! ## Flags
//!
//! Here, we define `cpu` to have the default flags.
//! We could also configure the CPU by editing the flags. For example,
//! if we wish to start in user mode, we can edit the flags like so:
//!
//! ```
//! # use sim32::sim::{Cpu, SimFlags};
//! let cpu = Cpu::new(SimFlags { start_in_user_mode: true, ..Default::default() });
//! assert!(!cpu.regs.eflags.is_kernel());
//! ```
//!
//! All of the available flags can be found in [`SimFlags`].
//!
//! ## Execution
//!
//! Beyond the basic [`Cpu::run`] (which runs until halting),
//! there are also:
//! - [`Cpu::cycle`]: one fetch-decode-execute cycle
//! - [`Cpu::step_in`], [`Cpu::step_out`], [`Cpu::step_over`]: manual step-by-step simulation
//! - [`Cpu::run_while`], [`Cpu::run_with_limit`]: more advanced programmatic execution
//!
//! ## Page faults
//!
//! When memory virtualization is enabled, any access can fail with [`SimErr::PageFault`].
//! The faulting instruction has not changed any register, so after the fault is handled
//! (typically by writing a page table entry), calling [`Cpu::cycle`] again retries it.
//!
//! ## Debugging with breakpoints
//!
//! Breakpoints are accessible through the `breakpoints` field on [`Cpu`].
//! The run loops pause after any instruction which leaves a breakpoint's condition met.
//!
//! ```
//! use sim32::asm::assemble;
//! use sim32::isa::RegisterCode;
//! use sim32::sim::Cpu;
//! use sim32::sim::debug::{Breakpoint, Comparator};
//!
//! let program = assemble("
//!     MOV $100, %eax
//! .loop:
//!     SUB $1, %eax
//!     CMP $0, %eax
//!     JG loop
//! ").unwrap();
//!
//! let mut cpu = Cpu::new(Default::default());
//! cpu.load_program(&program).unwrap();
//! cpu.breakpoints.insert(Breakpoint::Reg { reg: RegisterCode::EAX, value: Comparator::Eq(40) });
//! cpu.run().unwrap();
//!
//! assert!(cpu.hit_breakpoint());
//! assert_eq!(cpu.regs.eax.get().to_u32(), 40);
//! ```
pub mod debug;
pub mod frame;
pub mod mem;
pub mod mmu;
pub mod observer;
pub mod regs;

use std::borrow::Cow;
use std::collections::HashSet;

use crate::alu::{twos_complement, Alu, AluErr};
use crate::asm::Program;
use crate::bits::{AddressSpace, DoubleWord, PhysicalAddress, Virtual, VirtualAddress, WidthMismatch};
use crate::isa::{AddressingMode, Header, Instruction, Operand, OperandType, Operation, RegisterCode, INSTRUCTION_WIDTH};
use debug::Breakpoint;
use frame::{Frame, FrameStack, FrameType};
use mem::{AddressOutOfRange, Memory, SparseRam};
use mmu::{Access, MemAccessCtx, Mmu, PageFault, PageTables};
use regs::{Eflags, MachineInitStrategy, Privilege, Register, RegisterFile};

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SimErr {
    /// A bit vector had the wrong width.
    WidthMismatch(WidthMismatch),
    /// Word was decoded, but its delimiters, instruction type or opcode were invalid.
    UnrecognizedInstruction,
    /// An operand's type code was invalid.
    UnrecognizedOperandType,
    /// An operand's addressing mode was invalid
    /// (`01`, or indirect addressing on something other than a register).
    UnrecognizedAddressingMode,
    /// A register operand named no register.
    UnrecognizedRegister,
    /// An instruction was missing an operand it requires.
    MissingOperand,
    /// An operand cannot be used this way (e.g., writing to an immediate).
    UnsupportedOperandType,
    /// Division by zero.
    DivisionByZero,
    /// A privileged instruction was executed in user mode, or a page denied the access.
    PrivilegeViolation,
    /// A kernel-only register (or the privilege level or IF of EFLAGS) was written in user mode.
    RegisterNotWritableInUserMode,
    /// A page was not present.
    PageFault(PageFault),
    /// A physical address was beyond the end of memory.
    AddressOutOfRange(AddressOutOfRange),
}
impl SimErr {
    /// Whether the caller can recover from this error and retry the instruction.
    ///
    /// Only page faults can be recovered from (by mapping the page).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SimErr::PageFault(_))
    }
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::WidthMismatch(e)              => e.fmt(f),
            SimErr::UnrecognizedInstruction       => f.write_str("unrecognized instruction"),
            SimErr::UnrecognizedOperandType       => f.write_str("unrecognized operand type"),
            SimErr::UnrecognizedAddressingMode    => f.write_str("unrecognized addressing mode"),
            SimErr::UnrecognizedRegister          => f.write_str("unrecognized register"),
            SimErr::MissingOperand                => f.write_str("instruction is missing an operand"),
            SimErr::UnsupportedOperandType        => f.write_str("operand type is not supported here"),
            SimErr::DivisionByZero                => f.write_str("division by zero"),
            SimErr::PrivilegeViolation            => f.write_str("privilege violation"),
            SimErr::RegisterNotWritableInUserMode => f.write_str("register is not writable in user mode"),
            SimErr::PageFault(e)                  => e.fmt(f),
            SimErr::AddressOutOfRange(e)          => e.fmt(f),
        }
    }
}
impl std::error::Error for SimErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimErr::WidthMismatch(e)     => Some(e),
            SimErr::PageFault(e)         => Some(e),
            SimErr::AddressOutOfRange(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for SimErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            SimErr::UnrecognizedInstruction
            | SimErr::UnrecognizedOperandType
            | SimErr::UnrecognizedAddressingMode => Some("EIP is probably pointing at data, not at an instruction".into()),
            SimErr::UnsupportedOperandType        => Some("only registers and memory can be written to".into()),
            SimErr::PrivilegeViolation            => Some("CLI, STI, PUSHF, POPF, IRET and SYSEXIT need kernel mode, and pages can deny access".into()),
            SimErr::RegisterNotWritableInUserMode => Some("EIR, GPTP, NPTP and VMPTR can only be written in kernel mode, and user mode cannot change the privilege level or IF".into()),
            SimErr::PageFault(_)                  => Some("map the page by writing its page table entry, then run the instruction again".into()),
            SimErr::AddressOutOfRange(_)          => Some("try a larger RAM capacity".into()),
            _ => None
        }
    }
}
impl From<WidthMismatch> for SimErr {
    fn from(value: WidthMismatch) -> Self {
        Self::WidthMismatch(value)
    }
}
impl From<AddressOutOfRange> for SimErr {
    fn from(value: AddressOutOfRange) -> Self {
        Self::AddressOutOfRange(value)
    }
}
impl From<PageFault> for SimErr {
    fn from(value: PageFault) -> Self {
        Self::PageFault(value)
    }
}
impl From<AluErr> for SimErr {
    fn from(value: AluErr) -> Self {
        match value {
            AluErr::DivisionByZero => Self::DivisionByZero,
        }
    }
}

/// Reason for why execution paused if it wasn't due to an error.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
enum PauseCondition {
    /// Program reached the halt sentinel.
    Halt,
    /// Program hit a breakpoint.
    Breakpoint,
    /// Program hit a tripwire condition.
    Tripwire,
    /// Program hit an error and did not pause successfully.
    #[default]
    Unsuccessful
}

/// Configuration flags for [`Cpu`].
///
/// These are applied when the `Cpu` is created with [`Cpu::new`] (or reset with [`Cpu::reset`]).
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// The highest physical address.
    ///
    /// By default, this is `0x000F_FFFF` (1 MiB of memory).
    pub ram_capacity: u32,

    /// The initial value of ESP.
    ///
    /// The stack grows down, so the first push writes just below this address.
    ///
    /// By default, this is `0x0010_0000`.
    pub stack_pointer: u32,

    /// Whether the CPU starts in user mode.
    ///
    /// By default, this flag is `false`.
    pub start_in_user_mode: bool,

    /// The creation strategy for the general-purpose registers.
    ///
    /// By default, this flag is [`MachineInitStrategy::default`].
    pub machine_init: MachineInitStrategy,

    /// Whether to store debugging information about call frames.
    ///
    /// By default, this flag is `false`.
    pub debug_frames: bool
}

impl Default for SimFlags {
    fn default() -> Self {
        Self {
            ram_capacity: 0x000F_FFFF,
            stack_pointer: 0x0010_0000,
            start_in_user_mode: false,
            machine_init: Default::default(),
            debug_frames: false
        }
    }
}

/// Where an operand's value lives.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Place {
    Register(RegisterCode),
    Memory(VirtualAddress)
}

fn slot_below(addr: VirtualAddress) -> VirtualAddress {
    addr.wrapping_offset(twos_complement(&DoubleWord::from_u32(4)))
}
fn slot_above(addr: VirtualAddress) -> VirtualAddress {
    addr.wrapping_add(4)
}

/// Executes assembled code.
///
/// The CPU owns its registers and its MMU (which owns physical memory),
/// so several independent CPUs can coexist.
#[derive(Debug)]
pub struct Cpu<M = SparseRam> {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Cpu::reset`] resets these values.

    /// The register file.
    pub regs: RegisterFile,

    /// The MMU, which also holds physical memory.
    pub mmu: Mmu<M>,

    /// The frame stack.
    pub frame_stack: FrameStack,

    /// The number of instructions successfully run since this `Cpu` was initialized.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    /// Indicates the reason why the last execution (via [`Cpu::run_while`] and adjacent)
    /// had paused.
    pause_condition: PauseCondition,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Cpu::reset`] does not reset these values.

    /// Configuration settings for the CPU.
    pub flags: SimFlags,

    /// Breakpoints for the CPU.
    pub breakpoints: HashSet<Breakpoint>,
}

impl Cpu<SparseRam> {
    /// Creates a new CPU with empty sparse memory sized by the flags.
    pub fn new(flags: SimFlags) -> Self {
        let ram = SparseRam::new(PhysicalAddress::from_u32(flags.ram_capacity));
        Self::with_memory(flags, ram)
    }

    /// Resets the CPU.
    ///
    /// This clears memory and registers, but keeps the flags and breakpoints.
    /// Programs have to be loaded again.
    pub fn reset(&mut self) {
        let flags = self.flags;
        let breakpoints = std::mem::take(&mut self.breakpoints);

        *self = Cpu::new(flags);
        self.breakpoints = breakpoints;
    }
}
impl<M: Memory> Cpu<M> {
    /// Creates a new CPU which uses the provided memory.
    pub fn with_memory(flags: SimFlags, ram: M) -> Self {
        let mut filler = flags.machine_init.generator();
        let mut regs = RegisterFile::new(&mut filler);
        regs.esp.set(VirtualAddress::from_u32(flags.stack_pointer));
        if flags.start_in_user_mode {
            regs.eflags.enter_user_mode();
        }

        Self {
            regs,
            mmu: Mmu::new(ram),
            frame_stack: FrameStack::new(flags.debug_frames),
            instructions_run: 0,
            pause_condition: Default::default(),
            flags,
            breakpoints: Default::default(),
        }
    }

    /// Writes a program into memory at its origin and points EIP at its first instruction.
    ///
    /// The words are written through the MMU with kernel privilege,
    /// so in paged mode the program's pages must already be mapped.
    /// This returns the addresses the program occupies (`None` for an empty program).
    pub fn load_program(&mut self, program: &Program) -> Result<Option<AddressSpace<Virtual>>, SimErr> {
        let ctx = MemAccessCtx { privilege: Privilege::Kernel, ..self.mem_ctx(Access::Write) };

        let mut addr = program.origin();
        for &word in program.words() {
            self.mmu.write_word(addr, word, ctx)?;
            addr = addr.wrapping_add(4);
        }
        self.regs.eip.set(program.origin());

        let segment = program.segment();
        tracing::debug!(origin = %program.origin(), words = program.words().len(), "loaded program");
        Ok(segment)
    }

    /// Computes the memory access context for the current privilege level and page tables.
    ///
    /// When GPTP is present, translation goes through the guest table (GPTP)
    /// and then the host table (NPTP). Otherwise, it goes through PTP.
    pub fn mem_ctx(&self, access: Access) -> MemAccessCtx {
        let tables = match self.regs.gptp {
            Some(gptp) => PageTables::Nested { guest: gptp.get(), host: self.regs.nptp.get() },
            None => PageTables::Single(self.regs.ptp.get()),
        };
        MemAccessCtx { privilege: self.regs.eflags.privilege(), access, tables }
    }

    /// Enables hardware virtualization, making GPTP present.
    pub fn enable_virtualization(&mut self, gptp: PhysicalAddress) {
        tracing::debug!(%gptp, "virtualization enabled");
        self.regs.gptp = Some(Register::new("gptp", gptp));
    }
    /// Disables hardware virtualization, making GPTP absent.
    pub fn disable_virtualization(&mut self) {
        tracing::debug!("virtualization disabled");
        self.regs.gptp = None;
    }

    fn read_mem(&mut self, addr: VirtualAddress) -> Result<DoubleWord, SimErr> {
        let ctx = self.mem_ctx(Access::Read);
        self.mmu.read_word(addr, ctx)
    }
    fn write_mem(&mut self, addr: VirtualAddress, data: DoubleWord) -> Result<(), SimErr> {
        let ctx = self.mem_ctx(Access::Write);
        self.mmu.write_word(addr, data, ctx)
    }

    fn require_kernel(&self) -> Result<(), SimErr> {
        match self.regs.eflags.is_kernel() {
            true  => Ok(()),
            false => Err(SimErr::PrivilegeViolation),
        }
    }

    /// Finds where a (register or memory) operand lives.
    fn locate(&self, op: &Operand) -> Result<Place, SimErr> {
        if op.kind == OperandType::No {
            return Err(SimErr::MissingOperand);
        }
        if !op.kind.is_writable() {
            return Err(SimErr::UnsupportedOperandType);
        }

        match (op.kind, op.mode) {
            (OperandType::Register, AddressingMode::Indirect) => {
                let reg = op.register().ok_or(SimErr::UnrecognizedRegister)?;
                Ok(Place::Memory(VirtualAddress::from_double_word(self.regs.read(reg))))
            },
            (OperandType::Register, _) => op.register().map(Place::Register).ok_or(SimErr::UnrecognizedRegister),
            _ => Ok(Place::Memory(VirtualAddress::from_double_word(op.value))),
        }
    }
    fn load(&mut self, place: Place) -> Result<DoubleWord, SimErr> {
        match place {
            Place::Register(reg) => Ok(self.regs.read(reg)),
            Place::Memory(addr)  => self.read_mem(addr),
        }
    }
    /// Writes a value and then commits `flags`, returning whether EIP was written.
    ///
    /// Nothing is committed if the write fails.
    fn store(&mut self, place: Place, value: DoubleWord, flags: Eflags) -> Result<bool, SimErr> {
        match place {
            Place::Memory(addr) => {
                self.write_mem(addr, value)?;
                self.regs.eflags = flags;
                Ok(false)
            },
            Place::Register(reg) => {
                let user = !self.regs.eflags.is_kernel();
                if user && reg.is_kernel_only() {
                    return Err(SimErr::RegisterNotWritableInUserMode);
                }
                // User mode can change the status flags, but not its privilege level or IF.
                if user && reg == RegisterCode::EFLAGS && !self.regs.eflags.keeps_control_bits(value.least_significant_byte()) {
                    return Err(SimErr::RegisterNotWritableInUserMode);
                }
                self.regs.eflags = flags;
                self.regs.write(reg, value);
                Ok(reg == RegisterCode::EIP)
            },
        }
    }
    /// Computes the value of an operand.
    ///
    /// Immediates and labels are their own value.
    fn read_operand(&mut self, op: &Operand) -> Result<DoubleWord, SimErr> {
        match op.kind {
            OperandType::No => Err(SimErr::MissingOperand),
            OperandType::Immediate | OperandType::Label => Ok(op.value),
            OperandType::Register | OperandType::Memory => {
                let place = self.locate(op)?;
                self.load(place)
            }
        }
    }

    /// `target = f(target, source)`, computed with a copy of the flags
    /// which is committed together with the result.
    fn alu_binary(
        &mut self,
        instr: &Instruction,
        f: impl FnOnce(&mut Alu<'_>, &DoubleWord, &DoubleWord) -> Result<DoubleWord, SimErr>
    ) -> Result<bool, SimErr> {
        let [source, target] = &instr.operands;
        let place = self.locate(target)?;
        let b = self.read_operand(source)?;
        let a = self.load(place)?;

        let mut flags = self.regs.eflags;
        let result = f(&mut Alu::new(&mut flags), &a, &b)?;
        self.store(place, result, flags)
    }
    /// `target = f(target)` for single-operand instructions.
    fn alu_unary(&mut self, instr: &Instruction, f: impl FnOnce(&mut Alu<'_>, &DoubleWord) -> DoubleWord) -> Result<bool, SimErr> {
        let place = self.locate(&instr.operands[0])?;
        let a = self.load(place)?;

        let mut flags = self.regs.eflags;
        let result = f(&mut Alu::new(&mut flags), &a);
        self.store(place, result, flags)
    }

    fn push(&mut self, value: DoubleWord) -> Result<(), SimErr> {
        let esp = slot_below(self.regs.esp.get());
        self.write_mem(esp, value)?;
        self.regs.esp.set(esp);
        Ok(())
    }
    fn pop(&mut self) -> Result<DoubleWord, SimErr> {
        let esp = self.regs.esp.get();
        let value = self.read_mem(esp)?;
        self.regs.esp.set(slot_above(esp));
        Ok(value)
    }

    /// Jumps to the value of the first operand if `cond` holds.
    fn jump_if(&mut self, instr: &Instruction, cond: bool) -> Result<bool, SimErr> {
        let target = self.read_operand(&instr.operands[0])?;
        if cond {
            self.regs.eip.set(VirtualAddress::from_double_word(target));
        }
        Ok(cond)
    }

    /// Enters kernel mode with interrupts disabled and calls `handler`.
    ///
    /// The stack receives the EFLAGS from before the switch and then `return_addr`.
    fn enter_kernel(&mut self, handler: VirtualAddress, return_addr: VirtualAddress, frame_type: FrameType, vector: Option<u32>) -> Result<(), SimErr> {
        let snapshot = self.regs.eflags;
        let mut flags = snapshot;
        flags.enter_kernel_mode();
        flags.set_interrupts_enabled(false);

        let ctx = MemAccessCtx { privilege: Privilege::Kernel, ..self.mem_ctx(Access::Write) };
        let flags_slot = slot_below(self.regs.esp.get());
        let return_slot = slot_below(flags_slot);
        self.mmu.write_word(flags_slot, snapshot.get().zero_extend(), ctx)?;
        self.mmu.write_word(return_slot, return_addr.to_double_word(), ctx)?;

        self.regs.eflags = flags;
        self.regs.esp.set(return_slot);
        self.regs.eip.set(handler);
        self.frame_stack.push_frame(Frame {
            caller_addr: return_addr,
            callee_addr: handler,
            vector,
            frame_type,
            stack_pointer: return_slot
        });
        tracing::debug!(%handler, ?frame_type, ?vector, "entered kernel mode");
        Ok(())
    }
    /// Returns from [`Cpu::enter_kernel`]: pops EIP and EFLAGS, enables interrupts and enters user mode.
    fn leave_kernel(&mut self) -> Result<(), SimErr> {
        let return_slot = self.regs.esp.get();
        let flags_slot = slot_above(return_slot);
        let return_addr = self.read_mem(return_slot)?;
        let saved = self.read_mem(flags_slot)?;

        let mut flags = Eflags::new(saved.least_significant_byte());
        flags.set_interrupts_enabled(true);
        flags.enter_user_mode();

        self.regs.eip.set(VirtualAddress::from_double_word(return_addr));
        self.regs.esp.set(slot_above(flags_slot));
        self.regs.eflags = flags;
        self.frame_stack.pop_frame();
        tracing::debug!(eip = %self.regs.eip.get(), "returned to user mode");
        Ok(())
    }

    /// Raises a software interrupt from outside of the program.
    ///
    /// This does what `INT vector` does, except that the return address is the current EIP
    /// (so `IRET` resumes at the interrupted instruction instead of after it).
    /// An orchestrator uses this to run a handler after a page fault and then retry the faulting instruction.
    pub fn int(&mut self, vector: u32) -> Result<(), SimErr> {
        let eip = self.regs.eip.get();
        let handler = self.regs.itp.get().wrapping_add(vector);
        self.enter_kernel(handler, eip, FrameType::Interrupt, Some(vector))
    }

    /// Reads the instruction at `eip`, returning `None` for the halt sentinel.
    ///
    /// The header word is stored in EIR.
    fn fetch(&mut self, eip: VirtualAddress) -> Result<Option<Instruction>, SimErr> {
        let ctx = self.mem_ctx(Access::Execute);
        let header = self.mmu.read_word(eip, ctx)?;
        self.regs.eir.set(header);
        if header.is_zero() { return Ok(None); }

        let (operation, slots) = Header::decode(header)?.resolve()?;
        let mut operands = [Operand::NONE; 2];
        for (i, (operand, (mode, kind))) in operands.iter_mut().zip(slots).enumerate() {
            if kind == OperandType::No { continue; }
            if mode == AddressingMode::Indirect && kind != OperandType::Register {
                return Err(SimErr::UnrecognizedAddressingMode);
            }

            let value = self.mmu.read_word(eip.wrapping_add(4 * (i as u32 + 1)), ctx)?;
            *operand = Operand { kind, mode, value };
            if kind == OperandType::Register && operand.register().is_none() {
                return Err(SimErr::UnrecognizedRegister);
            }
        }

        Ok(Some(Instruction { operation, operands }))
    }

    /// Runs the instruction, returning whether it wrote EIP.
    fn execute(&mut self, instr: &Instruction) -> Result<bool, SimErr> {
        let [op1, _] = &instr.operands;
        let eip = self.regs.eip.get();
        let next = eip.wrapping_add(INSTRUCTION_WIDTH);

        match instr.operation {
            Operation::ADD => self.alu_binary(instr, |alu, a, b| Ok(alu.add(a, b))),
            Operation::ADC => self.alu_binary(instr, |alu, a, b| Ok(alu.adc(a, b))),
            Operation::SUB => self.alu_binary(instr, |alu, a, b| Ok(alu.sub(a, b))),
            Operation::SBB => self.alu_binary(instr, |alu, a, b| Ok(alu.sbb(a, b))),
            Operation::MUL => self.alu_binary(instr, |alu, a, b| Ok(alu.mul(a, b))),
            Operation::DIV => self.alu_binary(instr, |alu, a, b| Ok(alu.div(a, b)?.0)),
            Operation::AND => self.alu_binary(instr, |alu, a, b| Ok(alu.and(a, b))),
            Operation::OR  => self.alu_binary(instr, |alu, a, b| Ok(alu.or(a, b))),
            Operation::XOR => self.alu_binary(instr, |alu, a, b| Ok(alu.xor(a, b))),
            Operation::SHL => self.alu_binary(instr, |alu, a, b| Ok(alu.shl(a, b))),
            Operation::SHR => self.alu_binary(instr, |alu, a, b| Ok(alu.shr(a, b))),
            Operation::SAR => self.alu_binary(instr, |alu, a, b| Ok(alu.sar(a, b))),
            Operation::NOT => self.alu_unary(instr, |alu, a| alu.not(a)),
            Operation::NEG => self.alu_unary(instr, |alu, a| alu.neg(a)),
            Operation::INC => self.alu_unary(instr, |alu, a| alu.inc(a)),
            Operation::DEC => self.alu_unary(instr, |alu, a| alu.dec(a)),
            Operation::CMP => {
                let [source, target] = &instr.operands;
                let b = self.read_operand(source)?;
                let a = self.read_operand(target)?;
                Alu::new(&mut self.regs.eflags).cmp(&a, &b);
                Ok(false)
            },

            Operation::MOV => {
                let [source, target] = &instr.operands;
                let value = self.read_operand(source)?;
                let place = self.locate(target)?;
                self.store(place, value, self.regs.eflags)
            },
            Operation::PUSH => {
                let value = self.read_operand(op1)?;
                self.push(value)?;
                Ok(false)
            },
            Operation::POP => {
                let esp = self.regs.esp.get();
                let value = self.read_mem(esp)?;
                let place = self.locate(op1)?;
                let branched = self.store(place, value, self.regs.eflags)?;
                // POP %esp keeps the popped value.
                if place != Place::Register(RegisterCode::ESP) {
                    self.regs.esp.set(slot_above(esp));
                }
                Ok(branched)
            },
            Operation::PUSHF => {
                self.require_kernel()?;
                self.push(self.regs.eflags.get().zero_extend())?;
                Ok(false)
            },
            Operation::POPF => {
                self.require_kernel()?;
                let value = self.pop()?;
                self.regs.eflags.set(value.least_significant_byte());
                Ok(false)
            },
            Operation::CLI => {
                self.require_kernel()?;
                self.regs.eflags.set_interrupts_enabled(false);
                Ok(false)
            },
            Operation::STI => {
                self.require_kernel()?;
                self.regs.eflags.set_interrupts_enabled(true);
                Ok(false)
            },
            Operation::NOP => Ok(false),
            Operation::INT => {
                let vector = self.read_operand(op1)?;
                let handler = self.regs.itp.get().wrapping_offset(vector);
                self.enter_kernel(handler, next, FrameType::Interrupt, Some(vector.to_u32()))?;
                Ok(true)
            },
            Operation::IRET | Operation::SYSEXIT => {
                self.require_kernel()?;
                self.leave_kernel()?;
                Ok(true)
            },
            Operation::SYSENTER => {
                let handler = VirtualAddress::from_double_word(self.read_operand(op1)?);
                self.enter_kernel(handler, next, FrameType::SystemCall, None)?;
                Ok(true)
            },

            Operation::JMP => self.jump_if(instr, true),
            Operation::JZ  => self.jump_if(instr, self.regs.eflags.zero()),
            Operation::JNZ => self.jump_if(instr, !self.regs.eflags.zero()),
            Operation::JG  => {
                let f = self.regs.eflags;
                self.jump_if(instr, !f.zero() && f.overflow() == f.sign())
            },
            Operation::JGE => {
                let f = self.regs.eflags;
                self.jump_if(instr, f.overflow() == f.sign())
            },
            Operation::JL  => {
                let f = self.regs.eflags;
                self.jump_if(instr, f.overflow() != f.sign())
            },
            Operation::JLE => {
                let f = self.regs.eflags;
                self.jump_if(instr, f.zero() && f.overflow() != f.sign())
            },
            Operation::CALL => {
                let target = VirtualAddress::from_double_word(self.read_operand(op1)?);
                self.push(next.to_double_word())?;
                self.regs.eip.set(target);
                self.frame_stack.push_frame(Frame {
                    caller_addr: eip,
                    callee_addr: target,
                    vector: None,
                    frame_type: FrameType::Subroutine,
                    stack_pointer: self.regs.esp.get()
                });
                Ok(true)
            },
            Operation::RET => {
                let target = self.pop()?;
                self.regs.eip.set(VirtualAddress::from_double_word(target));
                self.frame_stack.pop_frame();
                Ok(true)
            },
        }
    }

    /// Runs one fetch-decode-execute cycle.
    ///
    /// This returns `Ok(false)` if the fetched word was all zeros (the halt sentinel),
    /// and `Ok(true)` if an instruction was executed.
    ///
    /// If the instruction fails, no register has changed
    /// (other than EIR, which holds the fetched header), so a page-faulted instruction
    /// can be retried by calling this again once the page is mapped.
    pub fn cycle(&mut self) -> Result<bool, SimErr> {
        let eip = self.regs.eip.get();
        let Some(instr) = self.fetch(eip)? else {
            tracing::debug!(%eip, "halt");
            return Ok(false);
        };

        tracing::trace!(%eip, %instr, "execute");
        let branched = self.execute(&instr)?;
        if !branched {
            self.regs.eip.set(eip.wrapping_add(INSTRUCTION_WIDTH));
        }
        self.instructions_run += 1;
        Ok(true)
    }

    /// Indicates whether the last execution of the CPU hit a breakpoint.
    pub fn hit_breakpoint(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Breakpoint)
    }

    /// Indicates whether the last execution of the CPU reached the halt sentinel.
    pub fn hit_halt(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Halt)
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - the halt sentinel is fetched
    /// - A breakpoint matches
    /// - An error occurs
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Cpu<M>) -> bool) -> Result<(), SimErr> {
        self.mmu.observer.clear();
        std::mem::take(&mut self.pause_condition);

        // event loop
        // run until:
        // 1. the tripwire condition returns false
        // 2. the program halts
        // 3. any of the breakpoints are hit
        let result = loop {
            // Tripwire turned off:
            if !tripwire(self) {
                break Ok(PauseCondition::Tripwire);
            }

            // Run a cycle:
            match self.cycle() {
                Ok(true) => {},
                Ok(false) => break Ok(PauseCondition::Halt),
                Err(e) => break Err(e)
            }

            // After executing, check that any breakpoints were hit.
            if self.breakpoints.iter().any(|bp| bp.check(self)) {
                break Ok(PauseCondition::Breakpoint);
            }
        };

        self.pause_condition = result?;
        Ok(())
    }

    /// Execute the program.
    ///
    /// This blocks until the program ends.
    /// If you would like to limit the maximum number of steps to execute, consider [`Cpu::run_with_limit`].
    pub fn run(&mut self) -> Result<(), SimErr> {
        self.run_while(|_| true)
    }

    /// Execute the program with a limit on how many steps to execute.
    ///
    /// This blocks until the program ends or until the number of steps to execute has been hit.
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<(), SimErr> {
        let i = self.instructions_run;
        self.run_while(|cpu| cpu.instructions_run.wrapping_sub(i) < max_steps)
    }

    /// Simulate one step, executing one instruction.
    ///
    /// Unlike the run loops, this ignores breakpoints.
    pub fn step_in(&mut self) -> Result<(), SimErr> {
        self.mmu.observer.clear();
        self.cycle().map(|_| ())
    }

    /// Simulate one step, executing one instruction and running through entire calls as a single step.
    pub fn step_over(&mut self) -> Result<(), SimErr> {
        let curr_frame = self.frame_stack.len();
        let mut first = Some(()); // is Some if this is the first instruction executed in this call

        // this function should do at least one step before checking its condition
        // condition: run until we have landed back in the same frame
        self.run_while(|cpu| first.take().is_some() || curr_frame < cpu.frame_stack.len())
    }

    /// Run through the CPU's execution until the current call is exited.
    pub fn step_out(&mut self) -> Result<(), SimErr> {
        let curr_frame = self.frame_stack.len();
        let mut first = Some(()); // is Some if this is the first instruction executed in this call

        // this function should do at least one step before checking its condition
        // condition: run until we've landed in a smaller frame
        if curr_frame != 0 {
            self.run_while(|cpu| first.take().is_some() || curr_frame <= cpu.frame_stack.len())?;
        }

        Ok(())
    }
}
impl Default for Cpu<SparseRam> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}
