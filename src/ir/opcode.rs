//! The IR opcode set and its semantic classes.
//!
//! The set mirrors the serialized Dalvik instruction set with two differences: width
//! variants (`move/from16`, `const/4`, `add-int/lit8`, ...) are folded into one opcode each,
//! and a handful of internal opcodes exist only in the IR:
//!
//! - `load-param*` define the incoming parameters at the top of a body
//! - `move-result-pseudo*` carry the result of an instruction that may throw, so the throwing
//!   instruction itself has no destination
//! - `init-class` forces a class to be initialized
//! - `unreachable` materializes a value on paths that can never execute
//! - `write-barrier` fences final-field writes of an inlined constructor
//! - `injection-id` marks instrumentation sites
//!
//! Internal opcodes have no code-unit size but take part in dataflow like any other
//! instruction.
//!
//! Every predicate here must agree with the runtime semantics of the serialized opcode; the
//! CFG builder, the analyses and the cost model all rely on them.

use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// An IR opcode.
///
/// The textual form (used by the S-expression loader and printer) is available through
/// `Display`/`FromStr`.
#[allow(missing_docs)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    IntoStaticStr,
    EnumIter,
    EnumCount,
)]
pub enum IrOpcode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "move")]
    Move,
    #[strum(serialize = "move-wide")]
    MoveWide,
    #[strum(serialize = "move-object")]
    MoveObject,
    #[strum(serialize = "move-result")]
    MoveResult,
    #[strum(serialize = "move-result-wide")]
    MoveResultWide,
    #[strum(serialize = "move-result-object")]
    MoveResultObject,
    #[strum(serialize = "move-exception")]
    MoveException,
    #[strum(serialize = "return-void")]
    ReturnVoid,
    #[strum(serialize = "return")]
    Return,
    #[strum(serialize = "return-wide")]
    ReturnWide,
    #[strum(serialize = "return-object")]
    ReturnObject,
    #[strum(serialize = "const")]
    Const,
    #[strum(serialize = "const-wide")]
    ConstWide,
    #[strum(serialize = "const-string")]
    ConstString,
    #[strum(serialize = "const-class")]
    ConstClass,
    #[strum(serialize = "monitor-enter")]
    MonitorEnter,
    #[strum(serialize = "monitor-exit")]
    MonitorExit,
    #[strum(serialize = "check-cast")]
    CheckCast,
    #[strum(serialize = "instance-of")]
    InstanceOf,
    #[strum(serialize = "array-length")]
    ArrayLength,
    #[strum(serialize = "new-instance")]
    NewInstance,
    #[strum(serialize = "new-array")]
    NewArray,
    #[strum(serialize = "filled-new-array")]
    FilledNewArray,
    #[strum(serialize = "fill-array-data")]
    FillArrayData,
    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "goto")]
    Goto,
    #[strum(serialize = "switch")]
    Switch,
    #[strum(serialize = "cmpl-float")]
    CmplFloat,
    #[strum(serialize = "cmpg-float")]
    CmpgFloat,
    #[strum(serialize = "cmpl-double")]
    CmplDouble,
    #[strum(serialize = "cmpg-double")]
    CmpgDouble,
    #[strum(serialize = "cmp-long")]
    CmpLong,
    #[strum(serialize = "if-eq")]
    IfEq,
    #[strum(serialize = "if-ne")]
    IfNe,
    #[strum(serialize = "if-lt")]
    IfLt,
    #[strum(serialize = "if-ge")]
    IfGe,
    #[strum(serialize = "if-gt")]
    IfGt,
    #[strum(serialize = "if-le")]
    IfLe,
    #[strum(serialize = "if-eqz")]
    IfEqz,
    #[strum(serialize = "if-nez")]
    IfNez,
    #[strum(serialize = "if-ltz")]
    IfLtz,
    #[strum(serialize = "if-gez")]
    IfGez,
    #[strum(serialize = "if-gtz")]
    IfGtz,
    #[strum(serialize = "if-lez")]
    IfLez,
    #[strum(serialize = "aget")]
    Aget,
    #[strum(serialize = "aget-wide")]
    AgetWide,
    #[strum(serialize = "aget-object")]
    AgetObject,
    #[strum(serialize = "aget-boolean")]
    AgetBoolean,
    #[strum(serialize = "aget-byte")]
    AgetByte,
    #[strum(serialize = "aget-char")]
    AgetChar,
    #[strum(serialize = "aget-short")]
    AgetShort,
    #[strum(serialize = "aput")]
    Aput,
    #[strum(serialize = "aput-wide")]
    AputWide,
    #[strum(serialize = "aput-object")]
    AputObject,
    #[strum(serialize = "aput-boolean")]
    AputBoolean,
    #[strum(serialize = "aput-byte")]
    AputByte,
    #[strum(serialize = "aput-char")]
    AputChar,
    #[strum(serialize = "aput-short")]
    AputShort,
    #[strum(serialize = "iget")]
    Iget,
    #[strum(serialize = "iget-wide")]
    IgetWide,
    #[strum(serialize = "iget-object")]
    IgetObject,
    #[strum(serialize = "iget-boolean")]
    IgetBoolean,
    #[strum(serialize = "iget-byte")]
    IgetByte,
    #[strum(serialize = "iget-char")]
    IgetChar,
    #[strum(serialize = "iget-short")]
    IgetShort,
    #[strum(serialize = "iput")]
    Iput,
    #[strum(serialize = "iput-wide")]
    IputWide,
    #[strum(serialize = "iput-object")]
    IputObject,
    #[strum(serialize = "iput-boolean")]
    IputBoolean,
    #[strum(serialize = "iput-byte")]
    IputByte,
    #[strum(serialize = "iput-char")]
    IputChar,
    #[strum(serialize = "iput-short")]
    IputShort,
    #[strum(serialize = "sget")]
    Sget,
    #[strum(serialize = "sget-wide")]
    SgetWide,
    #[strum(serialize = "sget-object")]
    SgetObject,
    #[strum(serialize = "sget-boolean")]
    SgetBoolean,
    #[strum(serialize = "sget-byte")]
    SgetByte,
    #[strum(serialize = "sget-char")]
    SgetChar,
    #[strum(serialize = "sget-short")]
    SgetShort,
    #[strum(serialize = "sput")]
    Sput,
    #[strum(serialize = "sput-wide")]
    SputWide,
    #[strum(serialize = "sput-object")]
    SputObject,
    #[strum(serialize = "sput-boolean")]
    SputBoolean,
    #[strum(serialize = "sput-byte")]
    SputByte,
    #[strum(serialize = "sput-char")]
    SputChar,
    #[strum(serialize = "sput-short")]
    SputShort,
    #[strum(serialize = "invoke-virtual")]
    InvokeVirtual,
    #[strum(serialize = "invoke-super")]
    InvokeSuper,
    #[strum(serialize = "invoke-direct")]
    InvokeDirect,
    #[strum(serialize = "invoke-static")]
    InvokeStatic,
    #[strum(serialize = "invoke-interface")]
    InvokeInterface,
    #[strum(serialize = "invoke-polymorphic")]
    InvokePolymorphic,
    #[strum(serialize = "invoke-custom")]
    InvokeCustom,
    #[strum(serialize = "neg-int")]
    NegInt,
    #[strum(serialize = "not-int")]
    NotInt,
    #[strum(serialize = "neg-long")]
    NegLong,
    #[strum(serialize = "not-long")]
    NotLong,
    #[strum(serialize = "neg-float")]
    NegFloat,
    #[strum(serialize = "neg-double")]
    NegDouble,
    #[strum(serialize = "int-to-long")]
    IntToLong,
    #[strum(serialize = "int-to-float")]
    IntToFloat,
    #[strum(serialize = "int-to-double")]
    IntToDouble,
    #[strum(serialize = "long-to-int")]
    LongToInt,
    #[strum(serialize = "long-to-float")]
    LongToFloat,
    #[strum(serialize = "long-to-double")]
    LongToDouble,
    #[strum(serialize = "float-to-int")]
    FloatToInt,
    #[strum(serialize = "float-to-long")]
    FloatToLong,
    #[strum(serialize = "float-to-double")]
    FloatToDouble,
    #[strum(serialize = "double-to-int")]
    DoubleToInt,
    #[strum(serialize = "double-to-long")]
    DoubleToLong,
    #[strum(serialize = "double-to-float")]
    DoubleToFloat,
    #[strum(serialize = "int-to-byte")]
    IntToByte,
    #[strum(serialize = "int-to-char")]
    IntToChar,
    #[strum(serialize = "int-to-short")]
    IntToShort,
    #[strum(serialize = "add-int")]
    AddInt,
    #[strum(serialize = "sub-int")]
    SubInt,
    #[strum(serialize = "mul-int")]
    MulInt,
    #[strum(serialize = "div-int")]
    DivInt,
    #[strum(serialize = "rem-int")]
    RemInt,
    #[strum(serialize = "and-int")]
    AndInt,
    #[strum(serialize = "or-int")]
    OrInt,
    #[strum(serialize = "xor-int")]
    XorInt,
    #[strum(serialize = "shl-int")]
    ShlInt,
    #[strum(serialize = "shr-int")]
    ShrInt,
    #[strum(serialize = "ushr-int")]
    UshrInt,
    #[strum(serialize = "add-long")]
    AddLong,
    #[strum(serialize = "sub-long")]
    SubLong,
    #[strum(serialize = "mul-long")]
    MulLong,
    #[strum(serialize = "div-long")]
    DivLong,
    #[strum(serialize = "rem-long")]
    RemLong,
    #[strum(serialize = "and-long")]
    AndLong,
    #[strum(serialize = "or-long")]
    OrLong,
    #[strum(serialize = "xor-long")]
    XorLong,
    #[strum(serialize = "shl-long")]
    ShlLong,
    #[strum(serialize = "shr-long")]
    ShrLong,
    #[strum(serialize = "ushr-long")]
    UshrLong,
    #[strum(serialize = "add-float")]
    AddFloat,
    #[strum(serialize = "sub-float")]
    SubFloat,
    #[strum(serialize = "mul-float")]
    MulFloat,
    #[strum(serialize = "div-float")]
    DivFloat,
    #[strum(serialize = "rem-float")]
    RemFloat,
    #[strum(serialize = "add-double")]
    AddDouble,
    #[strum(serialize = "sub-double")]
    SubDouble,
    #[strum(serialize = "mul-double")]
    MulDouble,
    #[strum(serialize = "div-double")]
    DivDouble,
    #[strum(serialize = "rem-double")]
    RemDouble,
    #[strum(serialize = "add-int/lit")]
    AddIntLit,
    #[strum(serialize = "rsub-int/lit")]
    RsubIntLit,
    #[strum(serialize = "mul-int/lit")]
    MulIntLit,
    #[strum(serialize = "div-int/lit")]
    DivIntLit,
    #[strum(serialize = "rem-int/lit")]
    RemIntLit,
    #[strum(serialize = "and-int/lit")]
    AndIntLit,
    #[strum(serialize = "or-int/lit")]
    OrIntLit,
    #[strum(serialize = "xor-int/lit")]
    XorIntLit,
    #[strum(serialize = "shl-int/lit")]
    ShlIntLit,
    #[strum(serialize = "shr-int/lit")]
    ShrIntLit,
    #[strum(serialize = "ushr-int/lit")]
    UshrIntLit,
    #[strum(serialize = "const-method-handle")]
    ConstMethodHandle,
    #[strum(serialize = "const-method-type")]
    ConstMethodType,
    #[strum(serialize = "load-param")]
    LoadParam,
    #[strum(serialize = "load-param-object")]
    LoadParamObject,
    #[strum(serialize = "load-param-wide")]
    LoadParamWide,
    #[strum(serialize = "move-result-pseudo")]
    MoveResultPseudo,
    #[strum(serialize = "move-result-pseudo-object")]
    MoveResultPseudoObject,
    #[strum(serialize = "move-result-pseudo-wide")]
    MoveResultPseudoWide,
    #[strum(serialize = "init-class")]
    InitClass,
    #[strum(serialize = "unreachable")]
    Unreachable,
    #[strum(serialize = "write-barrier")]
    WriteBarrier,
    #[strum(serialize = "injection-id")]
    InjectionId,
}

use IrOpcode as Op;

impl IrOpcode {
    /// Returns `true` for opcodes that exist only in the IR and have no serialized form.
    #[must_use]
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            Op::LoadParam
                | Op::LoadParamObject
                | Op::LoadParamWide
                | Op::MoveResultPseudo
                | Op::MoveResultPseudoObject
                | Op::MoveResultPseudoWide
                | Op::InitClass
                | Op::Unreachable
                | Op::WriteBarrier
                | Op::InjectionId
        )
    }

    /// Returns `true` for `load-param*`.
    #[must_use]
    pub fn is_load_param(self) -> bool {
        matches!(self, Op::LoadParam | Op::LoadParamObject | Op::LoadParamWide)
    }

    /// Returns `true` for `move-result*` (the follower of invokes and `filled-new-array`).
    #[must_use]
    pub fn is_move_result(self) -> bool {
        matches!(self, Op::MoveResult | Op::MoveResultWide | Op::MoveResultObject)
    }

    /// Returns `true` for `move-result-pseudo*`.
    #[must_use]
    pub fn is_move_result_pseudo(self) -> bool {
        matches!(
            self,
            Op::MoveResultPseudo | Op::MoveResultPseudoObject | Op::MoveResultPseudoWide
        )
    }

    /// Returns `true` for either kind of result follower.
    #[must_use]
    pub fn is_move_result_any(self) -> bool {
        self.is_move_result() || self.is_move_result_pseudo()
    }

    /// Returns `true` for register-to-register moves.
    #[must_use]
    pub fn is_a_move(self) -> bool {
        matches!(self, Op::Move | Op::MoveWide | Op::MoveObject)
    }

    /// Returns `true` for `return*`.
    #[must_use]
    pub fn is_return(self) -> bool {
        matches!(
            self,
            Op::ReturnVoid | Op::Return | Op::ReturnWide | Op::ReturnObject
        )
    }

    /// Returns `true` for the invoke family.
    #[must_use]
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Op::InvokeVirtual
                | Op::InvokeSuper
                | Op::InvokeDirect
                | Op::InvokeStatic
                | Op::InvokeInterface
                | Op::InvokePolymorphic
                | Op::InvokeCustom
        )
    }

    /// Returns `true` for two-register and zero-compare conditional branches.
    #[must_use]
    pub fn is_conditional_branch(self) -> bool {
        matches!(
            self,
            Op::IfEq
                | Op::IfNe
                | Op::IfLt
                | Op::IfGe
                | Op::IfGt
                | Op::IfLe
                | Op::IfEqz
                | Op::IfNez
                | Op::IfLtz
                | Op::IfGez
                | Op::IfGtz
                | Op::IfLez
        )
    }

    /// Returns `true` for conditional branches that compare one register against zero.
    #[must_use]
    pub fn is_testz_branch(self) -> bool {
        matches!(
            self,
            Op::IfEqz | Op::IfNez | Op::IfLtz | Op::IfGez | Op::IfGtz | Op::IfLez
        )
    }

    /// Returns `true` for `switch`.
    #[must_use]
    pub fn is_switch(self) -> bool {
        self == Op::Switch
    }

    /// Returns `true` for `goto`.
    #[must_use]
    pub fn is_goto(self) -> bool {
        self == Op::Goto
    }

    /// Returns `true` for `goto`, `if-*` and `switch`.
    #[must_use]
    pub fn is_branch(self) -> bool {
        self.is_goto() || self.is_conditional_branch() || self.is_switch()
    }

    /// Returns `true` for `throw`.
    #[must_use]
    pub fn is_throw(self) -> bool {
        self == Op::Throw
    }

    /// Returns `true` for `monitor-enter` and `monitor-exit`.
    #[must_use]
    pub fn is_monitor(self) -> bool {
        matches!(self, Op::MonitorEnter | Op::MonitorExit)
    }

    /// Returns `true` for `const` and `const-wide`.
    #[must_use]
    pub fn is_literal_const(self) -> bool {
        matches!(self, Op::Const | Op::ConstWide)
    }

    /// Returns `true` for the `*-int/lit` family.
    #[must_use]
    pub fn is_binop_lit(self) -> bool {
        matches!(
            self,
            Op::AddIntLit
                | Op::RsubIntLit
                | Op::MulIntLit
                | Op::DivIntLit
                | Op::RemIntLit
                | Op::AndIntLit
                | Op::OrIntLit
                | Op::XorIntLit
                | Op::ShlIntLit
                | Op::ShrIntLit
                | Op::UshrIntLit
        )
    }

    /// Returns `true` for `aget*`.
    #[must_use]
    pub fn is_aget(self) -> bool {
        matches!(
            self,
            Op::Aget
                | Op::AgetWide
                | Op::AgetObject
                | Op::AgetBoolean
                | Op::AgetByte
                | Op::AgetChar
                | Op::AgetShort
        )
    }

    /// Returns `true` for `aput*`.
    #[must_use]
    pub fn is_aput(self) -> bool {
        matches!(
            self,
            Op::Aput
                | Op::AputWide
                | Op::AputObject
                | Op::AputBoolean
                | Op::AputByte
                | Op::AputChar
                | Op::AputShort
        )
    }

    /// Returns `true` for `iget*`.
    #[must_use]
    pub fn is_iget(self) -> bool {
        matches!(
            self,
            Op::Iget
                | Op::IgetWide
                | Op::IgetObject
                | Op::IgetBoolean
                | Op::IgetByte
                | Op::IgetChar
                | Op::IgetShort
        )
    }

    /// Returns `true` for `iput*`.
    #[must_use]
    pub fn is_iput(self) -> bool {
        matches!(
            self,
            Op::Iput
                | Op::IputWide
                | Op::IputObject
                | Op::IputBoolean
                | Op::IputByte
                | Op::IputChar
                | Op::IputShort
        )
    }

    /// Returns `true` for `sget*`.
    #[must_use]
    pub fn is_sget(self) -> bool {
        matches!(
            self,
            Op::Sget
                | Op::SgetWide
                | Op::SgetObject
                | Op::SgetBoolean
                | Op::SgetByte
                | Op::SgetChar
                | Op::SgetShort
        )
    }

    /// Returns `true` for `sput*`.
    #[must_use]
    pub fn is_sput(self) -> bool {
        matches!(
            self,
            Op::Sput
                | Op::SputWide
                | Op::SputObject
                | Op::SputBoolean
                | Op::SputByte
                | Op::SputChar
                | Op::SputShort
        )
    }

    /// Returns `true` for instructions that reference a field.
    #[must_use]
    pub fn has_field(self) -> bool {
        self.is_iget() || self.is_iput() || self.is_sget() || self.is_sput()
    }

    /// Returns `true` for instructions that reference a method.
    #[must_use]
    pub fn has_method(self) -> bool {
        self.is_invoke()
    }

    /// Returns `true` for instructions that reference a type.
    #[must_use]
    pub fn has_type(self) -> bool {
        matches!(
            self,
            Op::ConstClass
                | Op::CheckCast
                | Op::InstanceOf
                | Op::NewInstance
                | Op::NewArray
                | Op::FilledNewArray
                | Op::InitClass
        )
    }

    /// Returns `true` for instructions that reference a string.
    #[must_use]
    pub fn has_string(self) -> bool {
        self == Op::ConstString
    }

    /// Returns `true` for instructions that carry an integer literal.
    #[must_use]
    pub fn has_literal(self) -> bool {
        self.is_literal_const() || self.is_binop_lit() || self == Op::InjectionId
    }

    /// Returns `true` for instructions that carry an inline data table.
    #[must_use]
    pub fn has_data(self) -> bool {
        self == Op::FillArrayData
    }

    /// Returns `true` if execution cannot continue past this instruction in its block.
    #[must_use]
    pub fn ends_control_flow(self) -> bool {
        self.is_return() || self.is_throw()
    }

    /// Returns `true` if the opcode may raise an exception at runtime.
    #[must_use]
    pub fn can_throw(self) -> bool {
        matches!(
            self,
            Op::ConstString
                | Op::ConstClass
                | Op::MonitorEnter
                | Op::MonitorExit
                | Op::CheckCast
                | Op::InstanceOf
                | Op::ArrayLength
                | Op::NewInstance
                | Op::NewArray
                | Op::FilledNewArray
                | Op::FillArrayData
                | Op::Throw
                | Op::DivInt
                | Op::RemInt
                | Op::DivLong
                | Op::RemLong
                | Op::DivIntLit
                | Op::RemIntLit
                | Op::InitClass
                | Op::ConstMethodHandle
                | Op::ConstMethodType
        ) || self.is_aget()
            || self.is_aput()
            || self.is_iget()
            || self.is_iput()
            || self.is_sget()
            || self.is_sput()
            || self.is_invoke()
    }

    /// Returns `true` if executing the opcode is observable beyond its destination register.
    ///
    /// Such instructions may not be removed even when their result is unused. Whether the
    /// opcode can throw is a separate question; see [`IrOpcode::can_throw`].
    #[must_use]
    pub fn has_side_effects(self) -> bool {
        self.is_return()
            || self.is_branch()
            || self.is_monitor()
            || self.is_aput()
            || self.is_iput()
            || self.is_sput()
            || self.is_invoke()
            || matches!(
                self,
                Op::Throw
                    | Op::FillArrayData
                    | Op::InitClass
                    | Op::WriteBarrier
                    | Op::InjectionId
                    | Op::Unreachable
            )
    }

    /// Returns `true` if the result is delivered through a following `move-result*`.
    #[must_use]
    pub fn has_move_result(self) -> bool {
        self.is_invoke() || self == Op::FilledNewArray
    }

    /// Returns `true` if the result is delivered through a following `move-result-pseudo*`.
    #[must_use]
    pub fn has_move_result_pseudo(self) -> bool {
        matches!(
            self,
            Op::ConstString
                | Op::ConstClass
                | Op::CheckCast
                | Op::InstanceOf
                | Op::ArrayLength
                | Op::NewInstance
                | Op::NewArray
                | Op::DivInt
                | Op::RemInt
                | Op::DivLong
                | Op::RemLong
                | Op::DivIntLit
                | Op::RemIntLit
                | Op::ConstMethodHandle
                | Op::ConstMethodType
        ) || self.is_aget()
            || self.is_iget()
            || self.is_sget()
    }

    /// Returns `true` if the instruction writes a destination register itself.
    #[must_use]
    pub fn has_dest(self) -> bool {
        if self.has_move_result_pseudo() || self.has_move_result() {
            return false;
        }
        matches!(
            self,
            Op::Move
                | Op::MoveWide
                | Op::MoveObject
                | Op::MoveResult
                | Op::MoveResultWide
                | Op::MoveResultObject
                | Op::MoveException
                | Op::Const
                | Op::ConstWide
                | Op::CmplFloat
                | Op::CmpgFloat
                | Op::CmplDouble
                | Op::CmpgDouble
                | Op::CmpLong
                | Op::LoadParam
                | Op::LoadParamObject
                | Op::LoadParamWide
                | Op::MoveResultPseudo
                | Op::MoveResultPseudoObject
                | Op::MoveResultPseudoWide
                | Op::Unreachable
        ) || self.is_unop()
            || self.is_binop()
            || self.is_binop_lit()
    }

    /// Returns `true` for unary arithmetic and conversions.
    #[must_use]
    pub fn is_unop(self) -> bool {
        (Op::NegInt as u32..=Op::IntToShort as u32).contains(&(self as u32))
    }

    /// Returns `true` for two-register arithmetic.
    #[must_use]
    pub fn is_binop(self) -> bool {
        (Op::AddInt as u32..=Op::RemDouble as u32).contains(&(self as u32))
    }

    /// Returns `true` if the destination is a register pair.
    #[must_use]
    pub fn dest_is_wide(self) -> bool {
        matches!(
            self,
            Op::MoveWide
                | Op::MoveResultWide
                | Op::ConstWide
                | Op::LoadParamWide
                | Op::MoveResultPseudoWide
                | Op::NegLong
                | Op::NotLong
                | Op::NegDouble
                | Op::IntToLong
                | Op::IntToDouble
                | Op::LongToDouble
                | Op::FloatToLong
                | Op::FloatToDouble
                | Op::DoubleToLong
                | Op::AddLong
                | Op::SubLong
                | Op::MulLong
                | Op::AndLong
                | Op::OrLong
                | Op::XorLong
                | Op::ShlLong
                | Op::ShrLong
                | Op::UshrLong
                | Op::AddDouble
                | Op::SubDouble
                | Op::MulDouble
                | Op::DivDouble
                | Op::RemDouble
        )
    }

    /// Returns `true` if the destination holds a reference.
    #[must_use]
    pub fn dest_is_object(self) -> bool {
        matches!(
            self,
            Op::MoveObject
                | Op::MoveResultObject
                | Op::MoveException
                | Op::LoadParamObject
                | Op::MoveResultPseudoObject
        )
    }

    /// Returns `true` if source operand `index` is a register pair.
    ///
    /// Invokes are not covered: their operand widths come from the callee prototype (see
    /// [`IrInstruction::src_is_wide`](crate::ir::IrInstruction::src_is_wide)).
    #[must_use]
    pub fn src_is_wide(self, index: usize) -> bool {
        match self {
            Op::MoveWide
            | Op::ReturnWide
            | Op::AputWide
            | Op::IputWide
            | Op::SputWide
            | Op::NegLong
            | Op::NotLong
            | Op::NegDouble
            | Op::LongToInt
            | Op::LongToFloat
            | Op::LongToDouble
            | Op::DoubleToInt
            | Op::DoubleToLong
            | Op::DoubleToFloat
            | Op::ShlLong
            | Op::ShrLong
            | Op::UshrLong => index == 0,
            Op::CmpLong
            | Op::CmplDouble
            | Op::CmpgDouble
            | Op::AddLong
            | Op::SubLong
            | Op::MulLong
            | Op::DivLong
            | Op::RemLong
            | Op::AndLong
            | Op::OrLong
            | Op::XorLong
            | Op::AddDouble
            | Op::SubDouble
            | Op::MulDouble
            | Op::DivDouble
            | Op::RemDouble => index < 2,
            _ => false,
        }
    }

    /// Returns the `move*` that copies a value defined by this `load-param*` or consumed by
    /// this `return*`.
    #[must_use]
    pub fn matching_move(self) -> Option<IrOpcode> {
        match self {
            Op::LoadParam | Op::Return => Some(Op::Move),
            Op::LoadParamObject | Op::ReturnObject => Some(Op::MoveObject),
            Op::LoadParamWide | Op::ReturnWide => Some(Op::MoveWide),
            _ => None,
        }
    }

    /// Returns the `move*` with the same value kind as this `move-result*` follower.
    #[must_use]
    pub fn move_for_result(self) -> Option<IrOpcode> {
        match self {
            Op::MoveResult | Op::MoveResultPseudo => Some(Op::Move),
            Op::MoveResultObject | Op::MoveResultPseudoObject => Some(Op::MoveObject),
            Op::MoveResultWide | Op::MoveResultPseudoWide => Some(Op::MoveWide),
            _ => None,
        }
    }

    /// Returns the serialized size in 16-bit code units, ignoring operand widths.
    ///
    /// Internal opcodes have no size. Instructions whose size depends on their literal or
    /// data table are refined by [`IrInstruction::size`](crate::ir::IrInstruction::size).
    #[must_use]
    pub fn base_code_units(self) -> usize {
        if self.is_internal() {
            return 0;
        }
        match self {
            Op::Nop
            | Op::Move
            | Op::MoveWide
            | Op::MoveObject
            | Op::MoveResult
            | Op::MoveResultWide
            | Op::MoveResultObject
            | Op::MoveException
            | Op::ReturnVoid
            | Op::Return
            | Op::ReturnWide
            | Op::ReturnObject
            | Op::MonitorEnter
            | Op::MonitorExit
            | Op::ArrayLength
            | Op::Throw
            | Op::Goto => 1,
            Op::FilledNewArray | Op::FillArrayData | Op::Switch | Op::InvokeCustom => 3,
            Op::InvokePolymorphic => 4,
            _ if self.is_invoke() => 3,
            _ if self.is_unop() => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_textual_form_round_trips() {
        for op in IrOpcode::iter() {
            let text = op.to_string();
            assert_eq!(IrOpcode::from_str(&text).unwrap(), op, "{text}");
        }
        assert_eq!(IrOpcode::from_str("add-int/lit").unwrap(), IrOpcode::AddIntLit);
        assert!(IrOpcode::from_str("add-int/lit8").is_err());
    }

    #[test]
    fn test_result_followers_are_exclusive() {
        for op in IrOpcode::iter() {
            let followers = [op.has_dest(), op.has_move_result(), op.has_move_result_pseudo()];
            assert!(
                followers.iter().filter(|&&f| f).count() <= 1,
                "{op} has more than one way to produce a result"
            );
        }
    }

    #[test]
    fn test_throwing_results_use_pseudo_moves() {
        for op in IrOpcode::iter() {
            if op.has_dest() && !op.is_move_result_any() && !op.is_load_param() {
                assert!(!op.can_throw(), "{op} writes a register and may throw");
            }
        }
    }

    #[test]
    fn test_internal_opcodes_have_no_size() {
        for op in IrOpcode::iter().filter(|op| op.is_internal()) {
            assert_eq!(op.base_code_units(), 0);
        }
        assert_eq!(IrOpcode::InvokeStatic.base_code_units(), 3);
    }

    #[test]
    fn test_semantic_classes() {
        assert!(IrOpcode::DivInt.can_throw());
        assert!(IrOpcode::DivInt.has_move_result_pseudo());
        assert!(!IrOpcode::DivFloat.can_throw());
        assert!(IrOpcode::DivFloat.has_dest());
        assert!(IrOpcode::AddLong.dest_is_wide());
        assert!(!IrOpcode::CmpLong.dest_is_wide());
        assert!(IrOpcode::CmpLong.src_is_wide(1));
        assert!(!IrOpcode::ShlLong.src_is_wide(1));
        assert!(IrOpcode::IntToShort.is_unop());
        assert!(!IrOpcode::AddInt.is_unop());
        assert!(IrOpcode::RemDouble.is_binop());
        assert!(IrOpcode::Unreachable.has_dest());
        assert!(IrOpcode::WriteBarrier.has_side_effects());
        assert!(!IrOpcode::WriteBarrier.can_throw());
    }
}
