//! Loader for the textual S-expression IR.
//!
//! The format is a parenthesized list of items:
//!
//! ```text
//! (
//!   (load-param v0)
//!   (.try_start c0)
//!   (invoke-static (v0) "LFoo;.bar:(I)V")
//!   (.try_end c0)
//!   (if-eqz v0 :done)
//!   (const v1 0x10)
//!   (:done)
//!   (return-void)
//!   (.catch (c0) "Ljava/lang/Exception;")
//!   (move-exception v2)
//!   (throw v2)
//! )
//! ```
//!
//! Invoke and `filled-new-array` sources may be written either bare or as a parenthesized
//! register list. Labels and catch ids are local to one body; they are renumbered in order of
//! first appearance.
//!
//! Parsing happens in two steps: `nom` turns the text into a generic tree of atoms, strings
//! and lists, and [`Loader`] interprets that tree against the [`DexContext`].

use std::{collections::HashMap, str::FromStr, sync::Arc};

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt, value},
    multi::many0,
    sequence::{delimited, preceded, terminated},
    IResult, Parser,
};

use crate::{
    ir::{
        BranchTarget, CatchEntry, CatchId, DebugInfo, DebugOpcode, DexPosition, IrCode,
        IrInstruction, IrOpcode, Label, MethodItem, Payload, Reg, SourceBlock,
    },
    model::DexContext,
    Error, Result,
};

#[derive(Debug, Clone, PartialEq)]
enum SExpr {
    Atom(String),
    Str(String),
    List(Vec<SExpr>),
}

fn is_atom_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')' && c != '"'
}

fn parse_string(input: &str) -> IResult<&str, String> {
    let body = escaped_transform(
        is_not("\\\""),
        '\\',
        alt((
            value("\\", char('\\')),
            value("\"", char('"')),
            value("\n", char('n')),
            value("\t", char('t')),
        )),
    );
    map(delimited(char('"'), opt(body), char('"')), Option::unwrap_or_default).parse(input)
}

fn parse_sexpr(input: &str) -> IResult<&str, SExpr> {
    alt((
        map(parse_string, SExpr::Str),
        map(take_while1(is_atom_char), |s: &str| SExpr::Atom(s.to_string())),
        map(
            delimited(
                char('('),
                many0(preceded(multispace0, parse_sexpr)),
                preceded(multispace0, char(')')),
            ),
            SExpr::List,
        ),
    ))
    .parse(input)
}

fn parse_document(input: &str) -> Result<SExpr> {
    let mut parser = all_consuming(terminated(preceded(multispace0, parse_sexpr), multispace0));
    match parser.parse(input) {
        Ok((_, expr)) => Ok(expr),
        Err(e) => Err(Error::Parse(format!("invalid S-expression: {e}"))),
    }
}

/// Parses a method body from its S-expression form.
///
/// # Errors
///
/// Returns [`Error::Parse`] for syntax errors and unknown opcodes, and
/// [`Error::Malformed`] for references to labels that are never defined.
///
/// # Examples
///
/// ```rust
/// use redex::{ir::parse_code, model::DexContext};
///
/// let ctx = DexContext::new();
/// let code = parse_code(&ctx, "((const v0 1) (return v0))")?;
/// assert_eq!(code.items().len(), 2);
/// # Ok::<(), redex::Error>(())
/// ```
pub fn parse_code(ctx: &DexContext, text: &str) -> Result<IrCode> {
    let SExpr::List(items) = parse_document(text)? else {
        return Err(Error::Parse("a method body must be a list".to_string()));
    };
    let mut loader = Loader::new(ctx);
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        out.push(loader.item(item)?);
    }
    loader.check_labels(&out)?;
    Ok(IrCode::from_items(out))
}

struct Loader<'a> {
    ctx: &'a DexContext,
    labels: HashMap<String, Label>,
    catches: HashMap<String, CatchId>,
}

impl<'a> Loader<'a> {
    fn new(ctx: &'a DexContext) -> Self {
        Loader {
            ctx,
            labels: HashMap::new(),
            catches: HashMap::new(),
        }
    }

    fn label(&mut self, name: &str) -> Label {
        let next = Label(self.labels.len() as u32);
        *self.labels.entry(name.to_string()).or_insert(next)
    }

    fn catch_id(&mut self, name: &str) -> CatchId {
        let next = CatchId(self.catches.len() as u32);
        *self.catches.entry(name.to_string()).or_insert(next)
    }

    fn item(&mut self, expr: &SExpr) -> Result<MethodItem> {
        let SExpr::List(parts) = expr else {
            return Err(Error::Parse(format!("expected an item list, found {expr:?}")));
        };
        let Some(SExpr::Atom(head)) = parts.first() else {
            return Err(Error::Parse(format!("item without a head: {expr:?}")));
        };
        let args = &parts[1..];

        if let Some(name) = head.strip_prefix(':') {
            let label = self.label(name);
            let case_key = match args {
                [] => None,
                [SExpr::Atom(key)] => Some(parse_int(key)? as i32),
                _ => return Err(Error::Parse(format!("bad target {expr:?}"))),
            };
            return Ok(MethodItem::Target(BranchTarget { label, case_key }));
        }

        match head.as_str() {
            ".try_start" => Ok(MethodItem::TryStart(self.catch_id(atom(args, 0)?))),
            ".try_end" => Ok(MethodItem::TryEnd(self.catch_id(atom(args, 0)?))),
            ".catch" => self.catch(args),
            ".pos" => Ok(MethodItem::Position(Arc::new(self.position(args)?))),
            ".dbg" => self.debug(args),
            ".src_block" => {
                let src = self.ctx.make_method_from_str(string(args, 0)?)?;
                let id = parse_int(atom(args, 1)?)? as u32;
                let hit = match args.get(2) {
                    Some(SExpr::Atom(h)) => Some(
                        h.parse::<f32>()
                            .map_err(|_| Error::Parse(format!("bad hit value `{h}`")))?,
                    ),
                    _ => None,
                };
                Ok(MethodItem::SourceBlock(SourceBlock { src, id, hit }))
            }
            _ => {
                let opcode = IrOpcode::from_str(head)
                    .map_err(|_| Error::Parse(format!("unknown opcode `{head}`")))?;
                Ok(MethodItem::Opcode(self.instruction(opcode, args)?))
            }
        }
    }

    fn catch(&mut self, args: &[SExpr]) -> Result<MethodItem> {
        let Some(SExpr::List(ids)) = args.first() else {
            return Err(Error::Parse("`.catch` needs an id list".to_string()));
        };
        let id = self.catch_id(atom(ids, 0)?);
        let next = match ids.get(1) {
            Some(SExpr::Atom(next)) => Some(self.catch_id(next)),
            _ => None,
        };
        let catch_type = match args.get(1) {
            Some(SExpr::Str(ty)) => Some(self.ctx.make_type(ty)),
            _ => None,
        };
        Ok(MethodItem::Catch(CatchEntry {
            id,
            catch_type,
            next,
        }))
    }

    fn position(&mut self, args: &[SExpr]) -> Result<DexPosition> {
        let method = self.ctx.make_method_from_str(string(args, 0)?)?;
        let file = self.ctx.make_string(string(args, 1)?);
        let line = parse_int(atom(args, 2)?)? as u32;
        let parent = match args.get(3) {
            Some(SExpr::List(parent)) if matches!(parent.first(), Some(SExpr::Atom(h)) if h == ".pos") => {
                Some(Arc::new(self.position(&parent[1..])?))
            }
            Some(other) => return Err(Error::Parse(format!("bad position parent {other:?}"))),
            None => None,
        };
        Ok(DexPosition {
            method,
            file,
            line,
            parent,
        })
    }

    fn debug(&mut self, args: &[SExpr]) -> Result<MethodItem> {
        let name = atom(args, 0)?;
        let opcode = DebugOpcode::from_str(name)
            .map_err(|_| Error::Parse(format!("unknown debug opcode `{name}`")))?;
        let reg = match args.get(1) {
            Some(SExpr::Atom(r)) => Some(parse_int(r.trim_start_matches('v'))? as Reg),
            _ => None,
        };
        let name = match args.get(2) {
            Some(SExpr::Str(s)) => Some(self.ctx.make_string(s)),
            _ => None,
        };
        let ty = match args.get(3) {
            Some(SExpr::Str(s)) => Some(self.ctx.make_type(s)),
            _ => None,
        };
        Ok(MethodItem::Debug(DebugInfo {
            opcode,
            reg,
            name,
            ty,
        }))
    }

    fn instruction(&mut self, opcode: IrOpcode, args: &[SExpr]) -> Result<IrInstruction> {
        let mut insn = IrInstruction::new(opcode);
        let mut rest = args;

        if opcode.has_dest() {
            let (dest, tail) = rest
                .split_first()
                .ok_or_else(|| Error::Parse(format!("`{opcode}` needs a destination")))?;
            insn = insn.with_dest(register(dest)?);
            rest = tail;
        }

        let mut srcs = Vec::new();
        while let Some((first, tail)) = rest.split_first() {
            match first {
                SExpr::Atom(a) if is_register(a) => srcs.push(register(first)?),
                SExpr::List(list) if !opcode.is_switch() && !opcode.has_data() => {
                    for r in list {
                        srcs.push(register(r)?);
                    }
                }
                _ => break,
            }
            rest = tail;
        }
        insn = insn.with_srcs(srcs);

        let payload = match rest {
            [] if needs_payload(opcode) => {
                return Err(Error::Parse(format!("`{opcode}` is missing its operand")))
            }
            [] => Payload::None,
            [SExpr::Atom(a)] if opcode.has_literal() => Payload::Literal(parse_int(a)?),
            [SExpr::Str(s)] if opcode.has_string() => Payload::String(self.ctx.make_string(s)),
            [SExpr::Str(s)] if opcode.has_type() => Payload::Type(self.ctx.make_type(s)),
            [SExpr::Str(s)] if opcode.has_field() => {
                Payload::Field(self.ctx.make_field_from_str(s)?)
            }
            [SExpr::Str(s)] if opcode.has_method() => {
                Payload::Method(self.ctx.make_method_from_str(s)?)
            }
            [SExpr::List(units)] if opcode.has_data() => {
                let data = units
                    .iter()
                    .map(|u| match u {
                        SExpr::Atom(a) => parse_int(a).map(|v| v as u16),
                        other => Err(Error::Parse(format!("bad data unit {other:?}"))),
                    })
                    .collect::<Result<Vec<u16>>>()?;
                Payload::Data(Arc::new(data))
            }
            [SExpr::List(labels)] if opcode.is_switch() => Payload::Targets(
                labels
                    .iter()
                    .map(|l| self.label_ref(l))
                    .collect::<Result<Vec<_>>>()?,
            ),
            [SExpr::Atom(l)] if opcode.is_goto() || opcode.is_conditional_branch() => {
                Payload::Targets(vec![self.label_ref(&SExpr::Atom(l.clone()))?])
            }
            other => {
                return Err(Error::Parse(format!(
                    "unexpected operands for `{opcode}`: {other:?}"
                )))
            }
        };
        Ok(insn.with_payload(payload))
    }

    fn label_ref(&mut self, expr: &SExpr) -> Result<Label> {
        match expr {
            SExpr::Atom(a) if a.starts_with(':') => Ok(self.label(&a[1..])),
            other => Err(Error::Parse(format!("expected a label, found {other:?}"))),
        }
    }

    /// Every branch label must be defined, and switch labels must carry a case key.
    fn check_labels(&self, items: &[MethodItem]) -> Result<()> {
        let mut defined: HashMap<Label, Option<i32>> = HashMap::new();
        for item in items {
            if let MethodItem::Target(target) = item {
                if defined.insert(target.label, target.case_key).is_some() {
                    return Err(malformed_error!("label {} defined twice", target.label));
                }
            }
        }
        let name_of = |label: Label| {
            self.labels
                .iter()
                .find(|&(_, &l)| l == label)
                .map_or_else(|| label.to_string(), |(n, _)| format!(":{n}"))
        };
        for insn in items.iter().filter_map(MethodItem::insn) {
            for &label in insn.targets() {
                match defined.get(&label) {
                    None => {
                        return Err(malformed_error!(
                            "`{}` branches to undefined label {}",
                            insn.opcode(),
                            name_of(label)
                        ))
                    }
                    Some(None) if insn.opcode().is_switch() => {
                        return Err(malformed_error!(
                            "switch case label {} has no case key",
                            name_of(label)
                        ))
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn needs_payload(opcode: IrOpcode) -> bool {
    opcode.has_literal()
        || opcode.has_string()
        || opcode.has_type()
        || opcode.has_field()
        || opcode.has_method()
        || opcode.has_data()
        || opcode.is_branch()
}

fn is_register(atom: &str) -> bool {
    atom.len() > 1 && atom.starts_with('v') && atom[1..].bytes().all(|b| b.is_ascii_digit())
}

fn register(expr: &SExpr) -> Result<Reg> {
    match expr {
        SExpr::Atom(a) if is_register(a) => a[1..]
            .parse()
            .map_err(|_| Error::Parse(format!("bad register `{a}`"))),
        other => Err(Error::Parse(format!("expected a register, found {other:?}"))),
    }
}

fn parse_int(text: &str) -> Result<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = match digits.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).map(|v| v as i64),
        None => digits.parse::<i64>(),
    }
    .map_err(|_| Error::Parse(format!("bad integer `{text}`")))?;
    Ok(if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    })
}

fn atom(args: &[SExpr], index: usize) -> Result<&str> {
    match args.get(index) {
        Some(SExpr::Atom(a)) => Ok(a),
        other => Err(Error::Parse(format!(
            "expected an atom at operand {index}, found {other:?}"
        ))),
    }
}

fn string(args: &[SExpr], index: usize) -> Result<&str> {
    match args.get(index) {
        Some(SExpr::Str(s)) => Ok(s),
        other => Err(Error::Parse(format!(
            "expected a string at operand {index}, found {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sexpr_tree() {
        let (_, tree) = parse_sexpr(r#"(a "b \"c\"" (d))"#).unwrap();
        assert_eq!(
            tree,
            SExpr::List(vec![
                SExpr::Atom("a".into()),
                SExpr::Str("b \"c\"".into()),
                SExpr::List(vec![SExpr::Atom("d".into())]),
            ])
        );
        let (_, empty) = parse_sexpr(r#""""#).unwrap();
        assert_eq!(empty, SExpr::Str(String::new()));
    }

    #[test]
    fn test_parse_instructions() {
        let ctx = DexContext::new();
        let code = parse_code(
            &ctx,
            r#"((load-param-object v0)
                (const v1 -0x10)
                (invoke-virtual (v0 v1) "LFoo;.bar:(I)I")
                (move-result v2)
                (iget v0 "LFoo;.f:I")
                (move-result-pseudo v3)
                (return v2))"#,
        )
        .unwrap();
        let insns: Vec<_> = code.insns().collect();
        assert_eq!(insns[1].literal(), Some(-16));
        assert_eq!(insns[2].srcs(), &[0, 1]);
        assert_eq!(insns[2].method().unwrap().to_string(), "LFoo;.bar:(I)I");
        assert_eq!(insns[4].field().unwrap().to_string(), "LFoo;.f:I");
        assert_eq!(insns[4].dest(), None);
        assert_eq!(code.registers_size(), 4);
    }

    #[test]
    fn test_parse_control_flow_items() {
        let ctx = DexContext::new();
        let code = parse_code(
            &ctx,
            r#"((load-param v0)
                (switch v0 (:a :b))
                (.try_start c0)
                (const-string "x")
                (move-result-pseudo-object v1)
                (.try_end c0)
                (:a 1)
                (:b 2)
                (return-void)
                (.catch (c0 c1) "Ljava/lang/Error;")
                (.catch (c1))
                (move-exception v2)
                (throw v2))"#,
        )
        .unwrap();
        let items = code.items();
        assert!(matches!(items[2], MethodItem::TryStart(CatchId(0))));
        assert!(matches!(
            items[6],
            MethodItem::Target(BranchTarget { case_key: Some(1), .. })
        ));
        match &items[9] {
            MethodItem::Catch(entry) => {
                assert_eq!(entry.next, Some(CatchId(1)));
                assert_eq!(entry.catch_type.as_ref().unwrap().descriptor(), "Ljava/lang/Error;");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&items[10], MethodItem::Catch(CatchEntry { catch_type: None, .. })));
    }

    #[test]
    fn test_undefined_label_is_malformed() {
        let ctx = DexContext::new();
        assert!(matches!(
            parse_code(&ctx, "((goto :nowhere))"),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            parse_code(&ctx, "((load-param v0) (switch v0 (:a)) (:a) (return-void))"),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_errors() {
        let ctx = DexContext::new();
        assert!(matches!(parse_code(&ctx, "((frobnicate v0))"), Err(Error::Parse(_))));
        assert!(matches!(parse_code(&ctx, "((const v0 1)"), Err(Error::Parse(_))));
        assert!(matches!(parse_code(&ctx, "((const v0))"), Err(Error::Parse(_))));
        assert!(matches!(
            parse_code(&ctx, "((load-param v1) (add-int/lit v0 v1))"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(parse_code(&ctx, "((invoke-static ()))"), Err(Error::Parse(_))));
        assert!(matches!(parse_code(&ctx, "((goto))"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_parse_debug_items() {
        let ctx = DexContext::new();
        let code = parse_code(
            &ctx,
            r#"((.pos "LFoo;.bar:()V" "Foo.java" 12 (.pos "LFoo;.baz:()V" "Foo.java" 3))
                (.dbg DBG_START_LOCAL 1 "x" "I")
                (.src_block "LFoo;.bar:()V" 0 0.5)
                (return-void))"#,
        )
        .unwrap();
        match &code.items()[0] {
            MethodItem::Position(pos) => {
                assert_eq!(pos.line, 12);
                assert_eq!(pos.parent.as_ref().unwrap().line, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &code.items()[1] {
            MethodItem::Debug(dbg) => {
                assert_eq!(dbg.opcode, DebugOpcode::StartLocal);
                assert_eq!(dbg.reg, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &code.items()[2] {
            MethodItem::SourceBlock(sb) => assert!(sb.is_hot()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
