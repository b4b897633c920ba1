//! Safety analysis for inlining constructors.
//!
//! Inlining `Foo.<init>` leaves the allocation and the super-constructor call in the caller,
//! so the verifier sees the callee's body operating on an object it still considers
//! uninitialized, and final field writes lose the freeze at the end of the constructor. A
//! constructor is inlinable only if its receiver is not touched before the super-init, it
//! does not delegate to another constructor of its own class, and any final field writes are
//! covered by a fence.

use std::{collections::BTreeSet, fmt};

use crate::{
    analysis::dataflow::{
        AnalysisResults, DataFlowAnalysis, DataFlowSolver, Direction, MeetSemiLattice,
    },
    cfg::{Block, ControlFlowGraph},
    ir::{IrInstruction, IrOpcode, Reg},
    model::{DexContext, DexFieldRef, DexMethod, DexType},
};

/// Lowest API level at which relaxed constructor inlining is allowed.
pub const RELAXED_INIT_MIN_SDK: i32 = 21;

const THROWABLE: &str = "Ljava/lang/Throwable;";

/// Why a constructor cannot be inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitRejection {
    /// The method is not an instance constructor with a body.
    NotAConstructor,
    /// An instance field of the receiver is written before the super constructor runs.
    FieldWriteBeforeSuperInit,
    /// The receiver escapes before the super constructor runs.
    UninitializedEscape,
    /// The constructor delegates to another constructor of the same class.
    DelegatesToSameClass,
    /// A final field is written and relaxed inlining is off or unavailable.
    WritesFinalField,
    /// The class is a `Throwable`, whose constructor captures the stack.
    Throwable,
}

impl fmt::Display for InitRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InitRejection::NotAConstructor => "not a constructor",
            InitRejection::FieldWriteBeforeSuperInit => "field write before super init",
            InitRejection::UninitializedEscape => "receiver escapes before super init",
            InitRejection::DelegatesToSameClass => "delegates to same-class constructor",
            InitRejection::WritesFinalField => "writes final field",
            InitRejection::Throwable => "throwable constructor",
        };
        f.write_str(text)
    }
}

/// Policy knobs for [`can_inline_init`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InitInlineOptions {
    /// Allow final field writes, guarded by a fence.
    pub relaxed: bool,
    /// Reject constructors of `Throwable` subclasses.
    pub strict_throwable: bool,
    /// The global minimum SDK.
    pub min_sdk: i32,
    /// The caller is itself a constructor of the callee's class.
    pub same_class_caller: bool,
}

/// An approved constructor inline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitInline {
    /// Final fields of the receiver the body writes.
    pub final_fields: Vec<DexFieldRef>,
    /// A write barrier must follow the inlined body.
    pub needs_fence: bool,
}

/// What is known about the receiver at a program point.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Receiver {
    Unreached,
    Tracked {
        aliases: BTreeSet<Reg>,
        initialized: bool,
    },
}

impl MeetSemiLattice for Receiver {
    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Receiver::Unreached, x) | (x, Receiver::Unreached) => x.clone(),
            (
                Receiver::Tracked {
                    aliases: a,
                    initialized: ia,
                },
                Receiver::Tracked {
                    aliases: b,
                    initialized: ib,
                },
            ) => Receiver::Tracked {
                aliases: a.intersection(b).copied().collect(),
                initialized: *ia && *ib,
            },
        }
    }

    fn is_bottom(&self) -> bool {
        matches!(self, Receiver::Tracked { aliases, initialized: false } if aliases.is_empty())
    }
}

struct ReceiverTracking {
    this_reg: Reg,
}

impl ReceiverTracking {
    fn step(&self, state: &mut Receiver, insn: &IrInstruction) {
        let Receiver::Tracked {
            aliases,
            initialized,
        } = state
        else {
            return;
        };
        let op = insn.opcode();
        if op == IrOpcode::InvokeDirect
            && insn.method().is_some_and(|m| m.is_init())
            && insn.srcs().first().is_some_and(|r| aliases.contains(r))
        {
            *initialized = true;
        }
        let Some(dest) = insn.dest() else {
            return;
        };
        let aliased = match op {
            IrOpcode::LoadParamObject => dest == self.this_reg,
            IrOpcode::MoveObject => aliases.contains(&insn.src(0)),
            _ => false,
        };
        aliases.remove(&dest);
        if op.dest_is_wide() {
            aliases.remove(&(dest + 1));
        }
        if aliased {
            aliases.insert(dest);
        }
    }
}

impl DataFlowAnalysis for ReceiverTracking {
    type Lattice = Receiver;
    const DIRECTION: Direction = Direction::Forward;

    fn boundary(&self, _cfg: &ControlFlowGraph) -> Receiver {
        Receiver::Tracked {
            aliases: BTreeSet::new(),
            initialized: false,
        }
    }

    fn initial(&self, _cfg: &ControlFlowGraph) -> Receiver {
        Receiver::Unreached
    }

    fn transfer(&self, block: &Block, input: &Receiver, _cfg: &ControlFlowGraph) -> Receiver {
        let mut state = input.clone();
        for (_, insn) in block.insns() {
            self.step(&mut state, insn);
        }
        state
    }
}

/// Decides whether the body of constructor `init` may be inlined into a caller.
///
/// # Arguments
///
/// * `ctx` - Supplies field and class definitions
/// * `init` - The constructor
/// * `cfg` - The constructor's body
/// * `options` - Relaxed-mode policy and facts about the caller
///
/// # Errors
///
/// Returns the [`InitRejection`] explaining why the inline is unsafe.
pub fn can_inline_init(
    ctx: &DexContext,
    init: &DexMethod,
    cfg: &ControlFlowGraph,
    options: &InitInlineOptions,
) -> std::result::Result<InitInline, InitRejection> {
    if !init.is_init() || init.is_static() {
        return Err(InitRejection::NotAConstructor);
    }
    let class = init.class();
    if options.strict_throwable && is_throwable(ctx, &class) {
        return Err(InitRejection::Throwable);
    }
    let this_reg = cfg
        .param_positions()
        .first()
        .and_then(|&p| cfg.insn(p).dest())
        .ok_or(InitRejection::NotAConstructor)?;

    let tracking = ReceiverTracking { this_reg };
    let (tracking, results): (ReceiverTracking, AnalysisResults<Receiver>) =
        DataFlowSolver::new(tracking).solve_into(cfg);

    let mut final_fields: Vec<DexFieldRef> = Vec::new();
    for block in cfg.blocks() {
        let Some(mut state) = results.in_state(block.id()).cloned() else {
            continue;
        };
        for (_, insn) in block.insns() {
            if let Receiver::Tracked {
                aliases,
                initialized,
            } = &state
            {
                check_insn(ctx, &class, insn, aliases, *initialized, &mut final_fields)?;
            }
            tracking.step(&mut state, insn);
        }
    }

    if final_fields.is_empty() || options.same_class_caller {
        return Ok(InitInline {
            final_fields,
            needs_fence: false,
        });
    }
    if options.relaxed && options.min_sdk >= RELAXED_INIT_MIN_SDK {
        return Ok(InitInline {
            final_fields,
            needs_fence: true,
        });
    }
    Err(InitRejection::WritesFinalField)
}

fn check_insn(
    ctx: &DexContext,
    class: &DexType,
    insn: &IrInstruction,
    aliases: &BTreeSet<Reg>,
    initialized: bool,
    final_fields: &mut Vec<DexFieldRef>,
) -> std::result::Result<(), InitRejection> {
    let op = insn.opcode();
    let uses_this = insn.srcs().iter().any(|r| aliases.contains(r));
    if !uses_this {
        return Ok(());
    }

    if op.is_iput() && aliases.contains(&insn.src(1)) {
        if !initialized {
            return Err(InitRejection::FieldWriteBeforeSuperInit);
        }
        if let Some(field) = insn.field() {
            let is_final = ctx.field_def(field).is_some_and(|f| f.is_final());
            if is_final && field.class() == class && !final_fields.contains(field) {
                final_fields.push(field.clone());
            }
        }
        if !aliases.contains(&insn.src(0)) {
            return Ok(());
        }
    }

    if op == IrOpcode::InvokeDirect && aliases.contains(&insn.src(0)) {
        if let Some(method) = insn.method().filter(|m| m.is_init()) {
            if method.class() == class {
                return Err(InitRejection::DelegatesToSameClass);
            }
            if !initialized {
                let escapes = insn.srcs()[1..].iter().any(|r| aliases.contains(r));
                return if escapes {
                    Err(InitRejection::UninitializedEscape)
                } else {
                    Ok(())
                };
            }
        }
    }

    if !initialized && !op.is_a_move() {
        return Err(InitRejection::UninitializedEscape);
    }
    Ok(())
}

fn is_throwable(ctx: &DexContext, ty: &DexType) -> bool {
    ctx.get_type(THROWABLE)
        .is_some_and(|throwable| ctx.is_subclass(ty, &throwable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccessFlags, DexClass, DexField, MethodBuilder};

    fn setup(ctx: &DexContext, body: &str) -> (std::sync::Arc<DexMethod>, ControlFlowGraph) {
        let ty = ctx.make_type("LC;");
        ctx.define_class(DexClass::new(
            ty.clone(),
            Some(ctx.make_type("Ljava/lang/Object;")),
            AccessFlags::PUBLIC,
        ));
        let int = ctx.make_type("I");
        ctx.define_field(DexField::new(
            ctx.make_field(ty.clone(), "f", int.clone()),
            AccessFlags::PRIVATE | AccessFlags::FINAL,
        ));
        ctx.define_field(DexField::new(
            ctx.make_field(ty, "g", int),
            AccessFlags::PRIVATE,
        ));
        let init = MethodBuilder::new("LC;.<init>:(I)V")
            .access(AccessFlags::PUBLIC)
            .code(body)
            .build(ctx)
            .unwrap();
        let cfg = {
            let code = read_lock!(init.code);
            let code = code.as_ref().unwrap();
            ControlFlowGraph::build(code.items(), code.registers_size()).unwrap()
        };
        (init, cfg)
    }

    #[test]
    fn test_plain_field_write_is_fine() {
        let ctx = DexContext::new();
        let (init, cfg) = setup(
            &ctx,
            r#"((load-param-object v0)
                (load-param v1)
                (invoke-direct (v0) "Ljava/lang/Object;.<init>:()V")
                (iput v1 v0 "LC;.g:I")
                (return-void))"#,
        );
        let verdict = can_inline_init(&ctx, &init, &cfg, &InitInlineOptions::default());
        assert_eq!(verdict, Ok(InitInline::default()));
    }

    #[test]
    fn test_write_before_super_init() {
        let ctx = DexContext::new();
        let (init, cfg) = setup(
            &ctx,
            r#"((load-param-object v0)
                (load-param v1)
                (move-object v2 v0)
                (iput v1 v2 "LC;.g:I")
                (invoke-direct (v0) "Ljava/lang/Object;.<init>:()V")
                (return-void))"#,
        );
        let verdict = can_inline_init(&ctx, &init, &cfg, &InitInlineOptions::default());
        assert_eq!(verdict, Err(InitRejection::FieldWriteBeforeSuperInit));
    }

    #[test]
    fn test_delegating_constructor() {
        let ctx = DexContext::new();
        let (init, cfg) = setup(
            &ctx,
            r#"((load-param-object v0)
                (load-param v1)
                (invoke-direct (v0) "LC;.<init>:()V")
                (return-void))"#,
        );
        let verdict = can_inline_init(&ctx, &init, &cfg, &InitInlineOptions::default());
        assert_eq!(verdict, Err(InitRejection::DelegatesToSameClass));
    }

    #[test]
    fn test_final_field_needs_relaxed_mode() {
        let ctx = DexContext::new();
        let (init, cfg) = setup(
            &ctx,
            r#"((load-param-object v0)
                (load-param v1)
                (invoke-direct (v0) "Ljava/lang/Object;.<init>:()V")
                (iput v1 v0 "LC;.f:I")
                (return-void))"#,
        );
        let strict = InitInlineOptions::default();
        assert_eq!(
            can_inline_init(&ctx, &init, &cfg, &strict),
            Err(InitRejection::WritesFinalField)
        );

        let relaxed = InitInlineOptions {
            relaxed: true,
            min_sdk: 21,
            ..InitInlineOptions::default()
        };
        let verdict = can_inline_init(&ctx, &init, &cfg, &relaxed).unwrap();
        assert!(verdict.needs_fence);
        assert_eq!(verdict.final_fields.len(), 1);

        let same_class = InitInlineOptions {
            same_class_caller: true,
            ..InitInlineOptions::default()
        };
        let verdict = can_inline_init(&ctx, &init, &cfg, &same_class).unwrap();
        assert!(!verdict.needs_fence);
    }
}
