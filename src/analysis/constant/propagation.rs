//! Intraprocedural constant propagation over a [`ControlFlowGraph`].
//!
//! The analysis is edge-sensitive: a conditional branch or `switch` whose operands are
//! known sends an unreachable state along the edges that cannot be taken. Parameters start
//! from caller-supplied values, which is how call-site summaries specialize a callee.

use crate::{
    analysis::dataflow::{
        AnalysisResults, DataFlowAnalysis, DataFlowSolver, Direction, JoinSemiLattice,
    },
    cfg::{Block, BlockId, ControlFlowGraph, Edge, EdgeId, EdgeKind, InsnPos},
    ir::{IrInstruction, IrOpcode},
    model::DexContext,
};

use super::{ConstantEnvironment, ConstantValue, RESULT_REGISTER};

/// Boxed primitive types, their accessor and the accessor's return descriptor.
const BOXED_TYPES: &[(&str, &str, &str)] = &[
    ("Ljava/lang/Integer;", "intValue", "I"),
    ("Ljava/lang/Boolean;", "booleanValue", "Z"),
    ("Ljava/lang/Byte;", "byteValue", "B"),
    ("Ljava/lang/Short;", "shortValue", "S"),
    ("Ljava/lang/Character;", "charValue", "C"),
    ("Ljava/lang/Long;", "longValue", "J"),
];

/// Forward constant propagation.
pub struct ConstantPropagation<'a> {
    params: Vec<ConstantValue>,
    ctx: Option<&'a DexContext>,
}

impl<'a> ConstantPropagation<'a> {
    /// Creates an analysis where every parameter is unknown.
    #[must_use]
    pub fn new() -> Self {
        ConstantPropagation {
            params: Vec::new(),
            ctx: None,
        }
    }

    /// Sets the values of the parameters, in `load-param` order. Missing values are unknown.
    #[must_use]
    pub fn with_params(mut self, params: Vec<ConstantValue>) -> Self {
        self.params = params;
        self
    }

    /// Enables the rules that need definitions: enum singletons and boxed immutables.
    #[must_use]
    pub fn with_context(mut self, ctx: &'a DexContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Applies the instructions of `block` with index below `end` to `env`.
    fn analyze_range(&self, block: &Block, end: usize, env: &mut ConstantEnvironment) {
        let mut param = 0;
        for (index, insn) in block.insns() {
            if index >= end || env.is_unreachable() {
                break;
            }
            let site = allocation_site(block.id(), index);
            self.analyze_insn(insn, site, env, &mut param);
        }
    }

    /// Applies one instruction to `env`.
    fn analyze_insn(
        &self,
        insn: &IrInstruction,
        site: u32,
        env: &mut ConstantEnvironment,
        param: &mut usize,
    ) {
        use IrOpcode as Op;

        let op = insn.opcode();
        let src = |env: &ConstantEnvironment, i: usize| env.get(insn.src(i));
        match op {
            Op::LoadParam | Op::LoadParamObject | Op::LoadParamWide => {
                let value = self.params.get(*param).cloned().unwrap_or(ConstantValue::Top);
                *param += 1;
                write_dest(env, insn, value);
            }
            Op::Const | Op::ConstWide => {
                let value = insn.literal().map_or(ConstantValue::Top, ConstantValue::constant);
                write_dest(env, insn, value);
            }
            Op::Move | Op::MoveObject | Op::MoveWide => {
                let value = src(env, 0);
                write_dest(env, insn, value);
            }
            op if op.is_move_result_any() => {
                let value = env.get(RESULT_REGISTER);
                env.set_top(RESULT_REGISTER);
                write_dest(env, insn, value);
            }
            Op::MoveException => write_dest(env, insn, ConstantValue::NonZero),
            Op::ConstString => {
                let value = insn
                    .string()
                    .cloned()
                    .map_or(ConstantValue::Top, ConstantValue::string);
                env.set(RESULT_REGISTER, value);
            }
            Op::ConstClass => {
                let value = insn
                    .ty()
                    .cloned()
                    .map_or(ConstantValue::Top, ConstantValue::class_object);
                env.set(RESULT_REGISTER, value);
            }
            Op::NewInstance | Op::NewArray | Op::FilledNewArray => {
                let value = insn
                    .ty()
                    .cloned()
                    .map_or(ConstantValue::NonZero, |ty| ConstantValue::new_object(ty, site));
                env.set(RESULT_REGISTER, value);
            }
            Op::CheckCast => {
                let value = src(env, 0);
                env.set(RESULT_REGISTER, value);
            }
            Op::SgetObject => {
                let value = self.singleton_read(insn).unwrap_or(ConstantValue::Top);
                env.set(RESULT_REGISTER, value);
            }
            Op::InvokeStatic => {
                let value = self.boxing(insn, env).unwrap_or(ConstantValue::Top);
                env.set(RESULT_REGISTER, value);
            }
            Op::InvokeVirtual => {
                let value = unboxing(insn, env).unwrap_or(ConstantValue::Top);
                env.set(RESULT_REGISTER, value);
            }
            Op::DivInt | Op::RemInt => {
                let value = fold_binop(op, &src(env, 0), &src(env, 1));
                env.set(RESULT_REGISTER, value);
            }
            Op::DivIntLit | Op::RemIntLit => {
                let lit = insn.literal().map_or(ConstantValue::Top, ConstantValue::constant);
                let value = fold_binop(op, &src(env, 0), &lit);
                env.set(RESULT_REGISTER, value);
            }
            op if op.is_binop_lit() => {
                let lit = insn.literal().map_or(ConstantValue::Top, ConstantValue::constant);
                let value = fold_binop(op, &src(env, 0), &lit);
                write_dest(env, insn, value);
            }
            op if op.is_binop() => {
                let value = fold_binop(op, &src(env, 0), &src(env, 1));
                write_dest(env, insn, value);
            }
            op if op.is_unop() => {
                let value = fold_unop(op, &src(env, 0));
                write_dest(env, insn, value);
            }
            Op::CmpLong => {
                let value = match (src(env, 0).as_constant(), src(env, 1).as_constant()) {
                    (Some(a), Some(b)) => ConstantValue::constant(a.cmp(&b) as i64),
                    _ => ConstantValue::interval(-1, 1),
                };
                write_dest(env, insn, value);
            }
            _ => {
                if op.has_move_result() || op.has_move_result_pseudo() {
                    env.set_top(RESULT_REGISTER);
                }
                if insn.dest().is_some() {
                    write_dest(env, insn, ConstantValue::Top);
                }
            }
        }
    }

    /// `sget-object` of a final static field typed as its own class is an enum-like
    /// singleton.
    fn singleton_read(&self, insn: &IrInstruction) -> Option<ConstantValue> {
        let ctx = self.ctx?;
        let field = insn.field()?;
        if field.ty() != field.class() {
            return None;
        }
        let def = ctx.field_def(field)?;
        (def.is_static() && def.is_final()).then(|| ConstantValue::singleton(field.clone()))
    }

    /// `Integer.valueOf(c)` and friends.
    fn boxing(&self, insn: &IrInstruction, env: &ConstantEnvironment) -> Option<ConstantValue> {
        let ctx = self.ctx?;
        let method = insn.method()?;
        if method.name().as_str() != "valueOf" || insn.srcs().len() != 1 {
            return None;
        }
        let class = method.class().descriptor();
        let &(_, accessor, rtype) = BOXED_TYPES.iter().find(|(ty, _, _)| *ty == class)?;
        if method.proto().rtype() != method.class() {
            return None;
        }
        let value = env.get(insn.src(0)).as_constant()?;
        let accessor = ctx
            .make_method_from_str(&format!("{class}.{accessor}:(){rtype}"))
            .ok()?;
        Some(ConstantValue::with_immutable_attr(
            method.class().clone(),
            accessor,
            value,
        ))
    }

    fn refine_edge(
        &self,
        edge: &Edge,
        output: &ConstantEnvironment,
        cfg: &ControlFlowGraph,
    ) -> ConstantEnvironment {
        if output.is_unreachable() || edge.kind().is_throw() || edge.kind().is_ghost() {
            return output.clone();
        }
        let src = edge.src();
        let Some((_, insn)) = cfg.block(src).branch_insn() else {
            return output.clone();
        };
        let op = insn.opcode();
        let taken = edge.kind().is_branch();

        if op.is_switch() {
            let value = output.get(insn.src(0));
            let reachable = match edge.kind() {
                EdgeKind::Branch { case_key: Some(k) } => admits(&value, i64::from(*k)),
                _ => match value.as_constant() {
                    Some(v) => !cfg
                        .branch_edges(src)
                        .iter()
                        .any(|&e| cfg.edge(e).kind().case_key().map(i64::from) == Some(v)),
                    None => true,
                },
            };
            return if reachable {
                output.clone()
            } else {
                ConstantEnvironment::Unreachable
            };
        }

        let lhs = output.get(insn.src(0));
        let decision = if op.is_testz_branch() {
            decide_testz(op, &lhs)
        } else {
            decide_compare(op, &lhs, &output.get(insn.src(1)))
        };
        match decision {
            Some(outcome) if outcome != taken => return ConstantEnvironment::Unreachable,
            Some(_) => return output.clone(),
            None => {}
        }

        let mut refined = output.clone();
        match (op, taken) {
            (IrOpcode::IfEqz, true) | (IrOpcode::IfNez, false) => {
                refined.set(insn.src(0), ConstantValue::constant(0));
            }
            (IrOpcode::IfEqz, false) | (IrOpcode::IfNez, true) if lhs.is_top() => {
                refined.set(insn.src(0), ConstantValue::NonZero);
            }
            _ => {}
        }
        refined
    }
}

impl Default for ConstantPropagation<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFlowAnalysis for ConstantPropagation<'_> {
    type Lattice = ConstantEnvironment;
    const DIRECTION: Direction = Direction::Forward;

    fn boundary(&self, _cfg: &ControlFlowGraph) -> ConstantEnvironment {
        ConstantEnvironment::default()
    }

    fn initial(&self, _cfg: &ControlFlowGraph) -> ConstantEnvironment {
        ConstantEnvironment::Unreachable
    }

    fn transfer(
        &self,
        block: &Block,
        input: &ConstantEnvironment,
        _cfg: &ControlFlowGraph,
    ) -> ConstantEnvironment {
        let mut env = input.clone();
        self.analyze_range(block, usize::MAX, &mut env);
        env
    }

    fn transfer_edge(
        &self,
        edge: &Edge,
        output: &ConstantEnvironment,
        cfg: &ControlFlowGraph,
    ) -> ConstantEnvironment {
        self.refine_edge(edge, output, cfg)
    }
}

/// The solved constant propagation of one graph.
///
/// # Examples
///
/// ```rust
/// use redex::{
///     analysis::{ConstantAnalysis, ConstantValue},
///     ir::parse_code,
///     model::DexContext,
/// };
///
/// let ctx = DexContext::new();
/// let mut code = parse_code(
///     &ctx,
///     "((load-param v0) (if-eqz v0 :zero) (const v1 1) (return v1) (:zero) (const v1 2) (return v1))",
/// )?;
/// code.build_cfg()?;
/// let cfg = code.cfg().unwrap();
///
/// let analysis = ConstantAnalysis::run(cfg, vec![ConstantValue::constant(0)], None);
/// assert_eq!(analysis.unreachable_blocks(cfg).len(), 1);
/// # Ok::<(), redex::Error>(())
/// ```
pub struct ConstantAnalysis<'a> {
    analyzer: ConstantPropagation<'a>,
    results: AnalysisResults<ConstantEnvironment>,
}

impl<'a> ConstantAnalysis<'a> {
    /// Runs the analysis with the given parameter values.
    #[must_use]
    pub fn run(
        cfg: &ControlFlowGraph,
        params: Vec<ConstantValue>,
        ctx: Option<&'a DexContext>,
    ) -> Self {
        let mut analyzer = ConstantPropagation::new().with_params(params);
        if let Some(ctx) = ctx {
            analyzer = analyzer.with_context(ctx);
        }
        let (analyzer, results) = DataFlowSolver::new(analyzer).solve_into(cfg);
        ConstantAnalysis { analyzer, results }
    }

    /// The state on entry to `block`.
    #[must_use]
    pub fn entry_env(&self, block: BlockId) -> ConstantEnvironment {
        self.results
            .in_state(block)
            .cloned()
            .unwrap_or(ConstantEnvironment::Unreachable)
    }

    /// The state after the last instruction of `block`.
    #[must_use]
    pub fn exit_env(&self, block: BlockId) -> ConstantEnvironment {
        self.results
            .out_state(block)
            .cloned()
            .unwrap_or(ConstantEnvironment::Unreachable)
    }

    /// Returns `true` if some execution reaches `block`.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        !self.entry_env(block).is_unreachable()
    }

    /// The state immediately before the instruction at `pos`.
    #[must_use]
    pub fn env_before(&self, cfg: &ControlFlowGraph, pos: InsnPos) -> ConstantEnvironment {
        let mut env = self.entry_env(pos.block());
        self.analyzer
            .analyze_range(cfg.block(pos.block()), pos.index(), &mut env);
        env
    }

    /// The state flowing along `edge`.
    #[must_use]
    pub fn edge_env(&self, cfg: &ControlFlowGraph, edge: EdgeId) -> ConstantEnvironment {
        let edge = cfg.edge(edge);
        self.analyzer
            .refine_edge(edge, &self.exit_env(edge.src()), cfg)
    }

    /// Blocks no execution reaches under the analyzed parameters.
    #[must_use]
    pub fn unreachable_blocks(&self, cfg: &ControlFlowGraph) -> Vec<BlockId> {
        cfg.blocks()
            .map(Block::id)
            .filter(|&b| !self.is_reachable(b) && !cfg.is_ghost(b))
            .collect()
    }

    /// Branch and goto edges leaving reachable blocks that can never be taken.
    #[must_use]
    pub fn infeasible_edges(&self, cfg: &ControlFlowGraph) -> Vec<EdgeId> {
        let mut edges = Vec::new();
        for block in cfg.blocks() {
            if !self.is_reachable(block.id()) || block.branch_insn().is_none() {
                continue;
            }
            for &e in block.succs() {
                let kind = cfg.edge(e).kind();
                if (kind.is_branch() || kind.is_goto()) && self.edge_env(cfg, e).is_unreachable()
                {
                    edges.push(e);
                }
            }
        }
        edges
    }
}

fn allocation_site(block: BlockId, index: usize) -> u32 {
    ((block.index() as u32) << 16) | (index as u32 & 0xffff)
}

fn write_dest(env: &mut ConstantEnvironment, insn: &IrInstruction, value: ConstantValue) {
    let Some(dest) = insn.dest() else {
        return;
    };
    env.set(dest, value);
    if insn.opcode().dest_is_wide() {
        env.set_top(dest + 1);
    }
}

/// `intValue()` and friends on a boxed constant.
fn unboxing(insn: &IrInstruction, env: &ConstantEnvironment) -> Option<ConstantValue> {
    let method = insn.method()?;
    let ConstantValue::ObjectWithImmutableAttr { attrs, .. } = env.get(*insn.srcs().first()?)
    else {
        return None;
    };
    attrs
        .iter()
        .find(|a| &a.accessor == method)
        .map(|a| ConstantValue::constant(a.value))
}

/// Returns `true` if `value` may equal `k`.
fn admits(value: &ConstantValue, k: i64) -> bool {
    match value.bounds() {
        Some((lo, hi)) => (lo..=hi).contains(&k),
        None => !value.is_nez() || k != 0,
    }
}

fn decide_testz(op: IrOpcode, v: &ConstantValue) -> Option<bool> {
    let (lo, hi) = match v.bounds() {
        Some(b) => b,
        None if v.is_nez() => {
            return match op {
                IrOpcode::IfEqz => Some(false),
                IrOpcode::IfNez => Some(true),
                _ => None,
            }
        }
        None => return None,
    };
    match op {
        IrOpcode::IfEqz if lo == 0 && hi == 0 => Some(true),
        IrOpcode::IfEqz if v.is_nez() => Some(false),
        IrOpcode::IfNez if lo == 0 && hi == 0 => Some(false),
        IrOpcode::IfNez if v.is_nez() => Some(true),
        IrOpcode::IfLtz => decide_range(hi < 0, lo >= 0),
        IrOpcode::IfGez => decide_range(lo >= 0, hi < 0),
        IrOpcode::IfGtz => decide_range(lo > 0, hi <= 0),
        IrOpcode::IfLez => decide_range(hi <= 0, lo > 0),
        _ => None,
    }
}

fn decide_compare(op: IrOpcode, a: &ConstantValue, b: &ConstantValue) -> Option<bool> {
    let ((alo, ahi), (blo, bhi)) = (a.bounds()?, b.bounds()?);
    match op {
        IrOpcode::IfEq => decide_range(alo == ahi && blo == bhi && alo == blo, ahi < blo || bhi < alo),
        IrOpcode::IfNe => decide_range(ahi < blo || bhi < alo, alo == ahi && blo == bhi && alo == blo),
        IrOpcode::IfLt => decide_range(ahi < blo, alo >= bhi),
        IrOpcode::IfGe => decide_range(alo >= bhi, ahi < blo),
        IrOpcode::IfGt => decide_range(alo > bhi, ahi <= blo),
        IrOpcode::IfLe => decide_range(ahi <= blo, alo > bhi),
        _ => None,
    }
}

fn decide_range(always: bool, never: bool) -> Option<bool> {
    if always {
        Some(true)
    } else if never {
        Some(false)
    } else {
        None
    }
}

fn fold_unop(op: IrOpcode, v: &ConstantValue) -> ConstantValue {
    let Some(a) = v.as_constant() else {
        return ConstantValue::Top;
    };
    let a32 = a as i32;
    let folded = match op {
        IrOpcode::NegInt => i64::from(a32.wrapping_neg()),
        IrOpcode::NotInt => i64::from(!a32),
        IrOpcode::NegLong => a.wrapping_neg(),
        IrOpcode::NotLong => !a,
        IrOpcode::IntToLong => i64::from(a32),
        IrOpcode::LongToInt => i64::from(a as i32),
        IrOpcode::IntToByte => i64::from(a32 as i8),
        IrOpcode::IntToChar => i64::from(a32 as u16),
        IrOpcode::IntToShort => i64::from(a32 as i16),
        _ => return ConstantValue::Top,
    };
    ConstantValue::constant(folded)
}

fn fold_binop(op: IrOpcode, lhs: &ConstantValue, rhs: &ConstantValue) -> ConstantValue {
    use IrOpcode as Op;

    let (Some(a), Some(b)) = (lhs.as_constant(), rhs.as_constant()) else {
        return ConstantValue::Top;
    };
    let (a32, b32) = (a as i32, b as i32);
    let int = |v: Option<i32>| v.map_or(ConstantValue::Top, |v| ConstantValue::constant(i64::from(v)));
    let long = |v: Option<i64>| v.map_or(ConstantValue::Top, ConstantValue::constant);
    match op {
        Op::AddInt | Op::AddIntLit => int(Some(a32.wrapping_add(b32))),
        Op::SubInt => int(Some(a32.wrapping_sub(b32))),
        Op::RsubIntLit => int(Some(b32.wrapping_sub(a32))),
        Op::MulInt | Op::MulIntLit => int(Some(a32.wrapping_mul(b32))),
        Op::DivInt | Op::DivIntLit => int((b32 != 0).then(|| a32.wrapping_div(b32))),
        Op::RemInt | Op::RemIntLit => int((b32 != 0).then(|| a32.wrapping_rem(b32))),
        Op::AndInt | Op::AndIntLit => int(Some(a32 & b32)),
        Op::OrInt | Op::OrIntLit => int(Some(a32 | b32)),
        Op::XorInt | Op::XorIntLit => int(Some(a32 ^ b32)),
        Op::ShlInt | Op::ShlIntLit => int(Some(a32.wrapping_shl(b32 as u32 & 0x1f))),
        Op::ShrInt | Op::ShrIntLit => int(Some(a32.wrapping_shr(b32 as u32 & 0x1f))),
        Op::UshrInt | Op::UshrIntLit => int(Some(((a32 as u32) >> (b32 as u32 & 0x1f)) as i32)),
        Op::AddLong => long(Some(a.wrapping_add(b))),
        Op::SubLong => long(Some(a.wrapping_sub(b))),
        Op::MulLong => long(Some(a.wrapping_mul(b))),
        Op::AndLong => long(Some(a & b)),
        Op::OrLong => long(Some(a | b)),
        Op::XorLong => long(Some(a ^ b)),
        _ => ConstantValue::Top,
    }
}
