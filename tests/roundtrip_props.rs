//! Property tests over generated method bodies.
//!
//! Bodies are chains of straight-line arithmetic and if/else diamonds on one parameter,
//! ending in a single return.

use proptest::prelude::*;
use redex::{
    cfg::ControlFlowGraph,
    compiler::{Shrinker, ShrinkerConfig},
    ir::{parse_code, print_items, IrOpcode},
    model::DexContext,
};

#[derive(Debug, Clone)]
enum Segment {
    Add(i32),
    Diamond(i32, i32),
    Guard(i32),
}

fn segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        (-8i32..8).prop_map(Segment::Add),
        (-8i32..8, -8i32..8).prop_map(|(a, b)| Segment::Diamond(a, b)),
        (-8i32..8).prop_map(Segment::Guard),
    ]
}

fn render(segments: &[Segment]) -> String {
    let mut text = String::from("((load-param v0) (const v1 0)");
    for (n, seg) in segments.iter().enumerate() {
        match seg {
            Segment::Add(k) => {
                text.push_str(&format!(" (const v2 {k}) (add-int v1 v1 v2)"));
            }
            Segment::Diamond(a, b) => {
                text.push_str(&format!(
                    " (if-eqz v0 :else{n}) (const v1 {a}) (goto :join{n}) (:else{n}) (const v1 {b}) (:join{n})"
                ));
            }
            Segment::Guard(k) => {
                text.push_str(&format!(" (if-nez v0 :skip{n}) (add-int/lit v1 v1 {k}) (:skip{n})"));
            }
        }
    }
    text.push_str(" (return v1))");
    text
}

fn round_trip(ctx: &DexContext, text: &str) -> String {
    let code = parse_code(ctx, text).unwrap();
    let cfg = ControlFlowGraph::build(code.items(), code.registers_size()).unwrap();
    cfg.sanity_check().unwrap();
    print_items(&cfg.linearize().unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn linearized_form_is_a_fixed_point(segments in prop::collection::vec(segment(), 0..12)) {
        let ctx = DexContext::new();
        let once = round_trip(&ctx, &render(&segments));
        let twice = round_trip(&ctx, &once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn build_preserves_instructions(segments in prop::collection::vec(segment(), 0..12)) {
        let ctx = DexContext::new();
        let code = parse_code(&ctx, &render(&segments)).unwrap();
        let cfg = ControlFlowGraph::build(code.items(), code.registers_size()).unwrap();
        let gotos = code.insns().filter(|i| i.opcode() == IrOpcode::Goto).count();
        prop_assert_eq!(cfg.num_opcodes(), code.count_opcodes() - gotos);
        prop_assert_eq!(cfg.return_blocks().len(), 1);
    }

    #[test]
    fn shrinker_output_is_well_formed(segments in prop::collection::vec(segment(), 0..12)) {
        let ctx = DexContext::new();
        let code = parse_code(&ctx, &render(&segments)).unwrap();
        let mut cfg = ControlFlowGraph::build(code.items(), code.registers_size()).unwrap();
        let config = ShrinkerConfig { max_rounds: 16, ..ShrinkerConfig::default() };
        let shrinker = Shrinker::new(config.clone());

        let first = shrinker.shrink(&mut cfg).unwrap();
        cfg.sanity_check().unwrap();
        prop_assert!(first.opcodes_after <= first.opcodes_before);
        prop_assert!(!cfg.return_blocks().is_empty());
        prop_assert!(cfg.linearize().is_ok());

        if first.rounds < config.max_rounds {
            let second = shrinker.shrink(&mut cfg).unwrap();
            prop_assert!(!second.changed(), "{}", second);
        }
    }
}
