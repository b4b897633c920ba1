//! Instruction records.
//!
//! An [`IrInstruction`] is an opcode plus its operands: an optional destination register, the
//! ordered source registers and at most one payload (literal, reference or data table).
//! Branch instructions in linear code name their targets through [`Label`]s; inside a CFG the
//! targets live on edges and the label payload is empty.

use std::{fmt, sync::Arc};

use crate::{
    ir::IrOpcode,
    model::{DexFieldRef, DexMethodRef, DexString, DexType},
};

/// A virtual register. Wide values occupy `(r, r + 1)`.
pub type Reg = u32;

/// A branch label in linear code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":L{}", self.0)
    }
}

/// The non-register operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Payload {
    /// No payload.
    #[default]
    None,
    /// An integer literal (`const`, `*-int/lit`, `injection-id`).
    Literal(i64),
    /// A string reference (`const-string`).
    String(DexString),
    /// A type reference.
    Type(DexType),
    /// A field reference.
    Field(DexFieldRef),
    /// A method reference.
    Method(DexMethodRef),
    /// An inline data table (`fill-array-data`), in 16-bit units.
    Data(Arc<Vec<u16>>),
    /// Branch targets in linear code: one label for `goto`/`if-*`, the case labels for
    /// `switch`.
    Targets(Vec<Label>),
}

/// A single IR instruction.
///
/// # Examples
///
/// ```rust
/// use redex::ir::{IrInstruction, IrOpcode};
///
/// let insn = IrInstruction::new(IrOpcode::AddIntLit)
///     .with_dest(1)
///     .with_srcs(vec![0])
///     .with_literal(1);
///
/// assert_eq!(insn.literal(), Some(1));
/// assert_eq!(insn.to_string(), "(add-int/lit v1 v0 1)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IrInstruction {
    opcode: IrOpcode,
    dest: Option<Reg>,
    srcs: Vec<Reg>,
    payload: Payload,
}

impl IrInstruction {
    /// Creates an instruction with no operands.
    #[must_use]
    pub fn new(opcode: IrOpcode) -> Self {
        IrInstruction {
            opcode,
            dest: None,
            srcs: Vec::new(),
            payload: Payload::None,
        }
    }

    /// Sets the destination register.
    #[must_use]
    pub fn with_dest(mut self, dest: Reg) -> Self {
        self.dest = Some(dest);
        self
    }

    /// Sets the source registers.
    #[must_use]
    pub fn with_srcs(mut self, srcs: Vec<Reg>) -> Self {
        self.srcs = srcs;
        self
    }

    /// Sets an integer literal payload.
    #[must_use]
    pub fn with_literal(mut self, literal: i64) -> Self {
        self.payload = Payload::Literal(literal);
        self
    }

    /// Sets a string payload.
    #[must_use]
    pub fn with_string(mut self, string: DexString) -> Self {
        self.payload = Payload::String(string);
        self
    }

    /// Sets a type payload.
    #[must_use]
    pub fn with_type(mut self, ty: DexType) -> Self {
        self.payload = Payload::Type(ty);
        self
    }

    /// Sets a field payload.
    #[must_use]
    pub fn with_field(mut self, field: DexFieldRef) -> Self {
        self.payload = Payload::Field(field);
        self
    }

    /// Sets a method payload.
    #[must_use]
    pub fn with_method(mut self, method: DexMethodRef) -> Self {
        self.payload = Payload::Method(method);
        self
    }

    /// Sets an arbitrary payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Returns the opcode.
    #[must_use]
    pub fn opcode(&self) -> IrOpcode {
        self.opcode
    }

    /// Replaces the opcode, keeping operands.
    pub fn set_opcode(&mut self, opcode: IrOpcode) {
        self.opcode = opcode;
    }

    /// Returns the destination register, if any.
    #[must_use]
    pub fn dest(&self) -> Option<Reg> {
        self.dest
    }

    /// Sets or clears the destination register.
    pub fn set_dest(&mut self, dest: Option<Reg>) {
        self.dest = dest;
    }

    /// Returns the source registers.
    #[must_use]
    pub fn srcs(&self) -> &[Reg] {
        &self.srcs
    }

    /// Returns source register `index`.
    ///
    /// # Panics
    ///
    /// Panics if the instruction has fewer sources.
    #[must_use]
    pub fn src(&self, index: usize) -> Reg {
        self.srcs[index]
    }

    /// Replaces source register `index`.
    ///
    /// # Panics
    ///
    /// Panics if the instruction has fewer sources.
    pub fn set_src(&mut self, index: usize, reg: Reg) {
        self.srcs[index] = reg;
    }

    /// Replaces all source registers.
    pub fn set_srcs(&mut self, srcs: Vec<Reg>) {
        self.srcs = srcs;
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Replaces the payload.
    pub fn set_payload(&mut self, payload: Payload) {
        self.payload = payload;
    }

    /// Returns the literal payload, if any.
    #[must_use]
    pub fn literal(&self) -> Option<i64> {
        match self.payload {
            Payload::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Sets a literal payload.
    pub fn set_literal(&mut self, literal: i64) {
        self.payload = Payload::Literal(literal);
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn string(&self) -> Option<&DexString> {
        match &self.payload {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the type payload, if any.
    #[must_use]
    pub fn ty(&self) -> Option<&DexType> {
        match &self.payload {
            Payload::Type(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the field payload, if any.
    #[must_use]
    pub fn field(&self) -> Option<&DexFieldRef> {
        match &self.payload {
            Payload::Field(f) => Some(f),
            _ => None,
        }
    }

    /// Returns the method payload, if any.
    #[must_use]
    pub fn method(&self) -> Option<&DexMethodRef> {
        match &self.payload {
            Payload::Method(m) => Some(m),
            _ => None,
        }
    }

    /// Replaces the method payload.
    pub fn set_method(&mut self, method: DexMethodRef) {
        self.payload = Payload::Method(method);
    }

    /// Returns the data table payload, if any.
    #[must_use]
    pub fn data(&self) -> Option<&[u16]> {
        match &self.payload {
            Payload::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the branch labels of a linear-code branch.
    #[must_use]
    pub fn targets(&self) -> &[Label] {
        match &self.payload {
            Payload::Targets(t) => t,
            _ => &[],
        }
    }

    /// Returns `true` if source `index` is a register pair.
    ///
    /// Invokes consult the callee prototype: the receiver (if any) is never wide and each
    /// wide argument occupies one source slot naming the low register of its pair.
    #[must_use]
    pub fn src_is_wide(&self, index: usize) -> bool {
        if self.opcode.is_invoke() {
            let Some(method) = self.method() else {
                return false;
            };
            let args = method.proto().args();
            let receiver = usize::from(self.opcode != IrOpcode::InvokeStatic);
            return index >= receiver && args.get(index - receiver).is_some_and(|t| t.is_wide());
        }
        self.opcode.src_is_wide(index)
    }

    /// Returns every register this instruction reads, with wide sources contributing both
    /// halves.
    #[must_use]
    pub fn used_regs(&self) -> Vec<Reg> {
        let mut regs = Vec::with_capacity(self.srcs.len());
        for (i, &r) in self.srcs.iter().enumerate() {
            regs.push(r);
            if self.src_is_wide(i) {
                regs.push(r + 1);
            }
        }
        regs
    }

    /// Returns one past the highest register this instruction touches.
    #[must_use]
    pub fn max_reg_bound(&self) -> u32 {
        let mut bound = 0;
        if let Some(dest) = self.dest {
            bound = dest + if self.opcode.dest_is_wide() { 2 } else { 1 };
        }
        for (i, &r) in self.srcs.iter().enumerate() {
            bound = bound.max(r + if self.src_is_wide(i) { 2 } else { 1 });
        }
        bound
    }

    /// Adds `offset` to every register.
    pub fn shift_regs(&mut self, offset: u32) {
        if let Some(dest) = &mut self.dest {
            *dest += offset;
        }
        for src in &mut self.srcs {
            *src += offset;
        }
    }

    /// Returns `true` if the instruction writes `reg`, counting the high half of a wide
    /// destination.
    #[must_use]
    pub fn writes(&self, reg: Reg) -> bool {
        match self.dest {
            Some(d) => d == reg || (self.opcode.dest_is_wide() && d + 1 == reg),
            None => false,
        }
    }

    /// Returns `true` if this instruction may raise an exception.
    ///
    /// Narrower than [`IrOpcode::can_throw`]: a literal division by a non-zero constant
    /// never throws.
    #[must_use]
    pub fn may_throw(&self) -> bool {
        match self.opcode {
            IrOpcode::DivIntLit | IrOpcode::RemIntLit => !matches!(self.literal(), Some(l) if l != 0),
            op => op.can_throw(),
        }
    }

    /// Estimated serialized size in 16-bit code units.
    ///
    /// Width-folded opcodes are sized by their operands: small literals and low registers
    /// select the compact encodings.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_with_cases(self.targets().len())
    }

    /// Estimated size with the case count of a switch given by the caller.
    ///
    /// In CFG form a switch carries its cases on branch edges, not on the instruction.
    #[must_use]
    pub fn size_with_cases(&self, cases: usize) -> usize {
        let base = self.opcode.base_code_units();
        if base == 0 {
            return 0;
        }
        match self.opcode {
            IrOpcode::Const => match self.literal().unwrap_or(0) {
                -8..=7 if self.dest.unwrap_or(0) < 16 => 1,
                -32768..=32767 => 2,
                _ => 3,
            },
            IrOpcode::ConstWide => match self.literal().unwrap_or(0) {
                -32768..=32767 => 2,
                l if i32::try_from(l).is_ok() => 3,
                _ => 5,
            },
            IrOpcode::FillArrayData => base + self.data().map_or(0, <[u16]>::len),
            IrOpcode::Switch => base + 2 * cases,
            op if op.is_binop() => {
                let low = self.dest == self.srcs.first().copied() && self.max_reg_bound() <= 16;
                if low {
                    1
                } else {
                    2
                }
            }
            IrOpcode::Move | IrOpcode::MoveWide | IrOpcode::MoveObject
                if self.max_reg_bound() > 16 =>
            {
                2
            }
            _ => base,
        }
    }
}

impl fmt::Display for IrInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.opcode)?;
        if let Some(dest) = self.dest {
            write!(f, " v{dest}")?;
        }
        for src in &self.srcs {
            write!(f, " v{src}")?;
        }
        match &self.payload {
            Payload::None => {}
            Payload::Literal(v) => write!(f, " {v}")?,
            Payload::String(s) => write!(f, " {:?}", s.as_str())?,
            Payload::Type(t) => write!(f, " \"{t}\"")?,
            Payload::Field(fr) => write!(f, " \"{fr}\"")?,
            Payload::Method(m) => write!(f, " \"{m}\"")?,
            Payload::Data(d) => {
                f.write_str(" (")?;
                for (i, unit) in d.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{unit}")?;
                }
                f.write_str(")")?;
            }
            Payload::Targets(targets) => {
                if self.opcode.is_switch() {
                    f.write_str(" (")?;
                    for (i, label) in targets.iter().enumerate() {
                        if i > 0 {
                            f.write_str(" ")?;
                        }
                        write!(f, "{label}")?;
                    }
                    f.write_str(")")?;
                } else {
                    for label in targets {
                        write!(f, " {label}")?;
                    }
                }
            }
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DexContext;

    #[test]
    fn test_invoke_wide_args() {
        let ctx = DexContext::new();
        let m = ctx.make_method_from_str("LFoo;.bar:(JI)V").unwrap();
        let insn = IrInstruction::new(IrOpcode::InvokeVirtual)
            .with_srcs(vec![0, 1, 3])
            .with_method(m.clone());
        assert!(!insn.src_is_wide(0));
        assert!(insn.src_is_wide(1));
        assert!(!insn.src_is_wide(2));
        assert_eq!(insn.used_regs(), vec![0, 1, 2, 3]);
        assert_eq!(insn.max_reg_bound(), 4);

        let insn = IrInstruction::new(IrOpcode::InvokeStatic)
            .with_srcs(vec![4, 6])
            .with_method(m);
        assert!(insn.src_is_wide(0));
        assert_eq!(insn.max_reg_bound(), 7);
    }

    #[test]
    fn test_wide_dest_writes_pair() {
        let insn = IrInstruction::new(IrOpcode::ConstWide).with_dest(2).with_literal(0);
        assert!(insn.writes(2));
        assert!(insn.writes(3));
        assert!(!insn.writes(4));
        assert_eq!(insn.max_reg_bound(), 4);
    }

    #[test]
    fn test_shift_regs() {
        let mut insn = IrInstruction::new(IrOpcode::AddInt).with_dest(0).with_srcs(vec![1, 2]);
        insn.shift_regs(10);
        assert_eq!(insn.dest(), Some(10));
        assert_eq!(insn.srcs(), &[11, 12]);
    }

    #[test]
    fn test_size_estimates() {
        let small = IrInstruction::new(IrOpcode::Const).with_dest(0).with_literal(3);
        let medium = IrInstruction::new(IrOpcode::Const).with_dest(0).with_literal(300);
        let large = IrInstruction::new(IrOpcode::Const).with_dest(0).with_literal(1 << 20);
        assert_eq!(small.size(), 1);
        assert_eq!(medium.size(), 2);
        assert_eq!(large.size(), 3);
        let internal = IrInstruction::new(IrOpcode::LoadParam).with_dest(0);
        assert_eq!(internal.size(), 0);

        let switch = IrInstruction::new(IrOpcode::Switch)
            .with_srcs(vec![0])
            .with_payload(Payload::Targets(vec![Label(1), Label(2)]));
        assert_eq!(switch.size(), 7);
        let bare = IrInstruction::new(IrOpcode::Switch).with_srcs(vec![0]);
        assert_eq!(bare.size_with_cases(3), 9);
    }

    #[test]
    fn test_may_throw() {
        let div = IrInstruction::new(IrOpcode::DivIntLit).with_dest(0).with_srcs(vec![1]);
        assert!(div.clone().with_literal(0).may_throw());
        assert!(!div.clone().with_literal(7).may_throw());
        assert!(!div.with_literal(-1).may_throw());
        let get = IrInstruction::new(IrOpcode::ArrayLength).with_dest(0).with_srcs(vec![1]);
        assert!(get.may_throw());
        let konst = IrInstruction::new(IrOpcode::Const).with_dest(0).with_literal(1);
        assert!(!konst.may_throw());
    }

    #[test]
    fn test_display() {
        let ctx = DexContext::new();
        let insn = IrInstruction::new(IrOpcode::ConstString).with_string(ctx.make_string("hi"));
        assert_eq!(insn.to_string(), "(const-string \"hi\")");
        let insn = IrInstruction::new(IrOpcode::IfEqz)
            .with_srcs(vec![0])
            .with_payload(Payload::Targets(vec![Label(2)]));
        assert_eq!(insn.to_string(), "(if-eqz v0 :L2)");
    }
}
