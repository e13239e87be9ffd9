//! An assembler and simulator for a 32-bit instruction set
//! with privilege levels, interrupts and paged virtual memory.
//!
//! Every value the machine handles is a fixed-width vector of bits ([`bits`]),
//! and every arithmetic result is computed bit by bit by the [`alu`],
//! so the flags come out of the same circuits real hardware would use.
//!
//! # Usage
//!
//! To convert assembly source code to a program, it must be assembled:
//! ```
//! use sim32::asm::assemble;
//!
//! let code = "
//!     MOV $0, %eax
//!     ADD $7, %eax
//! ";
//! let program = assemble(code).unwrap();
//! assert_eq!(program.words().len(), 6);
//! ```
//!
//! The mnemonics and operand forms the assembler accepts are data, not code.
//! See [`asm::lang`] for how to supply another instruction definition file.
//!
//! Once a program has been assembled, it can be executed with the simulator:
//! ```
//! # use sim32::asm::assemble;
//! # let program = assemble("MOV $0, %eax\nADD $7, %eax").unwrap();
//! use sim32::sim::Cpu;
//!
//! let mut cpu = Cpu::new(Default::default());
//! cpu.load_program(&program).unwrap();
//! cpu.run().unwrap(); // <-- Result can be handled accordingly
//! assert_eq!(cpu.regs.eax.get().to_u32(), 7);
//! ```
//!
//! If more granularity is needed for simulation, there are also step-in and step-out functions.
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod bits;
pub mod alu;
pub mod isa;
pub mod asm;
pub mod sim;
pub mod err;
