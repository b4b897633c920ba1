//! Printer for the textual S-expression IR.
//!
//! Labels and catch ids are renamed canonically (`:L0`, `:L1`, ... and `c0`, `c1`, ... in
//! order of first appearance), so two bodies that differ only in label naming print
//! identically.

use std::{collections::HashMap, fmt::Write};

use crate::ir::{CatchId, DexPosition, IrInstruction, Label, MethodItem, Payload};

#[derive(Default)]
struct Names {
    labels: HashMap<Label, Label>,
    catches: HashMap<CatchId, CatchId>,
}

impl Names {
    fn label(&mut self, label: Label) -> Label {
        let next = Label(self.labels.len() as u32);
        *self.labels.entry(label).or_insert(next)
    }

    fn catch_id(&mut self, id: CatchId) -> CatchId {
        let next = CatchId(self.catches.len() as u32);
        *self.catches.entry(id).or_insert(next)
    }
}

/// Prints items as a single-line S-expression with canonical label names.
#[must_use]
pub fn print_items(items: &[MethodItem]) -> String {
    let mut names = Names::default();
    let mut out = String::from("(");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        print_item(&mut out, item, &mut names);
    }
    out.push(')');
    out
}

/// Prints items one per line, indented, for diagnostics.
#[must_use]
pub fn print_items_pretty(items: &[MethodItem]) -> String {
    let mut names = Names::default();
    let mut out = String::from("(\n");
    for item in items {
        out.push_str("  ");
        print_item(&mut out, item, &mut names);
        out.push('\n');
    }
    out.push(')');
    out
}

fn print_item(out: &mut String, item: &MethodItem, names: &mut Names) {
    // Writing into a String cannot fail.
    let _ = match item {
        MethodItem::Opcode(insn) => {
            print_insn(out, insn, names);
            Ok(())
        }
        MethodItem::Target(target) => {
            let label = names.label(target.label);
            match target.case_key {
                Some(key) => write!(out, "({label} {key})"),
                None => write!(out, "({label})"),
            }
        }
        MethodItem::TryStart(id) => write!(out, "(.try_start {})", names.catch_id(*id)),
        MethodItem::TryEnd(id) => write!(out, "(.try_end {})", names.catch_id(*id)),
        MethodItem::Catch(entry) => {
            let id = names.catch_id(entry.id);
            let _ = match entry.next {
                Some(next) => write!(out, "(.catch ({id} {})", names.catch_id(next)),
                None => write!(out, "(.catch ({id})"),
            };
            match &entry.catch_type {
                Some(ty) => write!(out, " \"{ty}\")"),
                None => write!(out, ")"),
            }
        }
        MethodItem::Position(pos) => {
            print_position(out, pos);
            Ok(())
        }
        MethodItem::Debug(dbg) => {
            let _ = write!(out, "(.dbg {}", dbg.opcode);
            if let Some(reg) = dbg.reg {
                let _ = write!(out, " {reg}");
            }
            if let Some(name) = &dbg.name {
                let _ = write!(out, " {:?}", name.as_str());
            }
            if let Some(ty) = &dbg.ty {
                let _ = write!(out, " \"{ty}\"");
            }
            write!(out, ")")
        }
        MethodItem::SourceBlock(sb) => match sb.hit {
            Some(hit) => write!(out, "(.src_block \"{}\" {} {hit})", sb.src, sb.id),
            None => write!(out, "(.src_block \"{}\" {})", sb.src, sb.id),
        },
    };
}

fn print_position(out: &mut String, pos: &DexPosition) {
    let _ = write!(out, "(.pos \"{}\" {:?} {}", pos.method, pos.file.as_str(), pos.line);
    if let Some(parent) = &pos.parent {
        out.push(' ');
        print_position(out, parent);
    }
    out.push(')');
}

fn print_insn(out: &mut String, insn: &IrInstruction, names: &mut Names) {
    match insn.payload() {
        Payload::Targets(targets) => {
            let renamed: Vec<Label> = targets.iter().map(|&l| names.label(l)).collect();
            let canonical = insn.clone().with_payload(Payload::Targets(renamed));
            let _ = write!(out, "{canonical}");
        }
        _ => {
            let _ = write!(out, "{insn}");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{ir::parse_code, model::DexContext};

    #[test]
    fn test_canonical_labels() {
        let ctx = DexContext::new();
        let a = parse_code(&ctx, "((load-param v0) (if-eqz v0 :zzz) (:zzz) (return-void))").unwrap();
        let b = parse_code(&ctx, "((load-param v0) (if-eqz v0 :aaa) (:aaa) (return-void))").unwrap();
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(
            a.to_string(),
            "((load-param v0) (if-eqz v0 :L0) (:L0) (return-void))"
        );
    }

    #[test]
    fn test_print_parse_round_trip() {
        let ctx = DexContext::new();
        let text = r#"((load-param v0) (.try_start c0) (invoke-static v0 "LFoo;.bar:(I)V") (.try_end c0) (switch v0 (:L0 :L1)) (:L0 1) (:L1 2) (return-void) (.catch (c0)) (move-exception v1) (throw v1))"#;
        let code = parse_code(&ctx, text).unwrap();
        assert_eq!(code.to_string(), text);
        let again = parse_code(&ctx, &code.to_string()).unwrap();
        assert_eq!(again.items(), code.items());
    }
}
