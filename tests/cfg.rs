//! Control-flow graph integration tests.
//!
//! These drive the graph through `IrCode` the way a pass does: build, edit, linearize.

use redex::{
    cfg::{inline_cfg, ControlFlowGraph, EdgeKind, InlineOptions, InsnPos},
    ir::{parse_code, print_items, IrInstruction, IrOpcode},
    model::DexContext,
    Error, Result,
};

fn canonical(ctx: &DexContext, text: &str) -> Result<String> {
    Ok(print_items(parse_code(ctx, text)?.items()))
}

fn invokes(cfg: &ControlFlowGraph) -> Vec<InsnPos> {
    cfg.instructions()
        .filter(|(_, i)| i.opcode().is_invoke())
        .map(|(p, _)| p)
        .collect()
}

#[test]
fn test_build_and_clear_keeps_body() -> Result<()> {
    let ctx = DexContext::new();
    let text = r#"((load-param v0)
        (if-nez v0 :big)
        (const v1 0)
        (:join)
        (return v1)
        (:big)
        (switch v0 (:one :two))
        (const v1 9)
        (goto :join)
        (:one 1)
        (const v1 1)
        (goto :join)
        (:two 2)
        (const v1 2)
        (goto :join))"#;
    let mut code = parse_code(&ctx, text)?;
    code.build_cfg()?;
    assert!(code.items().is_empty());
    {
        let cfg = code.cfg().unwrap();
        cfg.sanity_check()?;
        assert_eq!(cfg.return_blocks().len(), 1);
        let switch = cfg
            .blocks()
            .find(|b| cfg.branch_edges(b.id()).len() == 2)
            .unwrap();
        let mut keys: Vec<i32> = cfg
            .branch_edges(switch.id())
            .into_iter()
            .filter_map(|e| cfg.edge(e).kind().case_key())
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 2]);
    }
    code.clear_cfg()?;
    assert!(code.cfg().is_none());

    let once = print_items(code.items());
    let mut again = parse_code(&ctx, &once)?;
    again.build_cfg()?;
    again.clear_cfg()?;
    assert_eq!(print_items(again.items()), once);
    Ok(())
}

#[test]
fn test_malformed_body_is_left_linear() -> Result<()> {
    let ctx = DexContext::new();
    let mut code = parse_code(&ctx, "((load-param v0) (if-eqz v0 :a) (return v0) (:a) (const v0 1))")?;
    let before = print_items(code.items());
    assert!(matches!(code.build_cfg(), Err(Error::Malformed { .. })));
    assert!(code.cfg().is_none());
    assert_eq!(print_items(code.items()), before);
    Ok(())
}

#[test]
fn test_edit_then_linearize() -> Result<()> {
    let ctx = DexContext::new();
    let mut code = parse_code(&ctx, "((load-param v0) (add-int/lit v1 v0 2) (return v1))")?;
    code.build_cfg()?;
    let cfg = code.cfg_mut().unwrap();
    let add = cfg
        .instructions()
        .find(|(_, i)| i.opcode() == IrOpcode::AddIntLit)
        .map(|(p, _)| p)
        .unwrap();
    let tmp = cfg.allocate_temp();
    cfg.replace_insn(
        add,
        vec![
            IrInstruction::new(IrOpcode::Const).with_dest(tmp).with_literal(2),
            IrInstruction::new(IrOpcode::AddInt).with_dest(1).with_srcs(vec![0, tmp]),
        ],
    )?;
    cfg.sanity_check()?;
    code.clear_cfg()?;

    assert_eq!(code.registers_size(), 3);
    assert_eq!(
        print_items(code.items()),
        canonical(&ctx, "((load-param v0) (const v2 2) (add-int v1 v0 v2) (return v1))")?
    );
    Ok(())
}

#[test]
fn test_cut_branch_and_drop_dead_side() -> Result<()> {
    let ctx = DexContext::new();
    let mut code = parse_code(
        &ctx,
        "((load-param v0) (if-eqz v0 :dead) (const v1 0) (return v1) (:dead) (const v1 5) (return v1))",
    )?;
    code.build_cfg()?;
    let cfg = code.cfg_mut().unwrap();
    let entry = cfg.entry();
    let dead = cfg.edge(cfg.branch_edges(entry)[0]).target();
    assert_eq!(cfg.delete_succ_edges_if(entry, |e| e.kind().is_branch(), true), 1);
    let (removed, _) = cfg.remove_unreachable_blocks();
    assert!(removed >= 1);
    assert!(cfg.get_block(dead).is_none());
    cfg.simplify();
    cfg.sanity_check()?;
    code.clear_cfg()?;

    let printed = print_items(code.items());
    assert!(!printed.contains("if-eqz"), "{printed}");
    assert!(!printed.contains("(const v1 5)"), "{printed}");
    Ok(())
}

#[test]
fn test_deep_copy_is_independent() -> Result<()> {
    let ctx = DexContext::new();
    let code = parse_code(&ctx, "((load-param v0) (if-eqz v0 :a) (const v0 1) (:a) (return v0))")?;
    let original = ControlFlowGraph::build(code.items(), code.registers_size())?;
    let mut copy = original.deep_copy();
    let ret = copy.return_blocks()[0];
    copy.push_front(ret, vec![IrInstruction::new(IrOpcode::Const).with_dest(0).with_literal(4)])?;

    assert_eq!(copy.num_opcodes(), original.num_opcodes() + 1);
    assert_ne!(print_items(&copy.linearize()?), print_items(&original.linearize()?));
    Ok(())
}

#[test]
fn test_inline_chain_with_remap() -> Result<()> {
    let ctx = DexContext::new();
    let code = parse_code(
        &ctx,
        r#"((load-param v0)
            (invoke-static (v0) "LA;.twice:(I)I")
            (move-result v1)
            (invoke-static (v1) "LA;.twice:(I)I")
            (move-result v2)
            (return v2))"#,
    )?;
    let mut caller = ControlFlowGraph::build(code.items(), code.registers_size())?;
    let callee_code = parse_code(&ctx, "((load-param v0) (add-int v1 v0 v0) (return v1))")?;
    let callee = ControlFlowGraph::build(callee_code.items(), callee_code.registers_size())?;

    let sites = invokes(&caller);
    assert_eq!(sites.len(), 2);
    let next = caller.registers_size();
    let first = inline_cfg(&mut caller, sites[0], &callee, next, &InlineOptions::default())?;
    let second = first.remap(sites[1]).unwrap();
    let next = caller.registers_size();
    inline_cfg(&mut caller, second, &callee, next, &InlineOptions::default())?;

    caller.simplify();
    caller.sanity_check()?;
    assert!(invokes(&caller).is_empty());
    let adds = caller
        .instructions()
        .filter(|(_, i)| i.opcode() == IrOpcode::AddInt)
        .count();
    assert_eq!(adds, 2);
    assert_eq!(caller.return_blocks().len(), 1);
    Ok(())
}

#[test]
fn test_inline_into_try_region_adds_handler_edges() -> Result<()> {
    let ctx = DexContext::new();
    let code = parse_code(
        &ctx,
        r#"((load-param v0)
            (.try_start c0)
            (invoke-static (v0) "LA;.check:(I)V")
            (.try_end c0)
            (return-void)
            (.catch (c0) "Ljava/lang/Exception;")
            (return-void))"#,
    )?;
    let mut caller = ControlFlowGraph::build(code.items(), code.registers_size())?;
    let callee_code = parse_code(
        &ctx,
        r#"((load-param v0) (invoke-static (v0) "LA;.log:(I)V") (invoke-static (v0) "LA;.log:(I)V") (return-void))"#,
    )?;
    let callee = ControlFlowGraph::build(callee_code.items(), callee_code.registers_size())?;

    let site = invokes(&caller)[0];
    let next = caller.registers_size();
    inline_cfg(&mut caller, site, &callee, next, &InlineOptions::default())?;
    caller.sanity_check()?;

    let logs = invokes(&caller);
    assert_eq!(logs.len(), 2);
    for pos in logs {
        let throws = caller.throw_edges(pos.block());
        assert!(!throws.is_empty());
        assert!(throws
            .iter()
            .any(|e| matches!(caller.edge(*e).kind(), EdgeKind::Throw { catch_type: Some(_), .. })));
    }
    let items = caller.linearize()?;
    let printed = print_items(&items);
    assert!(printed.contains(".try_start"), "{printed}");
    Ok(())
}
