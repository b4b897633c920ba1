//! Instruction vocabulary and linear method bodies.
//!
//! # Key Types
//!
//! - [`IrOpcode`] - opcodes and their semantic classes
//! - [`IrInstruction`] - opcode plus operands
//! - [`MethodItem`] - entries of a linear stream (instructions, targets, try markers,
//!   positions, debug events, source blocks)
//! - [`IrCode`] - a method body, linear or as an editable CFG
//!
//! The S-expression loader ([`parse_code`]) and printer ([`print_items`]) exist for tests and
//! diagnostics.

mod code;
mod instruction;
mod item;
mod opcode;
mod parser;
mod printer;

pub use code::IrCode;
pub use instruction::{IrInstruction, Label, Payload, Reg};
pub use item::{
    BranchTarget, CatchEntry, CatchId, DebugInfo, DebugOpcode, DexPosition, MethodItem,
    SourceBlock,
};
pub use opcode::IrOpcode;
pub use parser::parse_code;
pub use printer::{print_items, print_items_pretty};
