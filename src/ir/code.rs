//! Method bodies.

use std::fmt;

use crate::{
    cfg::ControlFlowGraph,
    ir::{printer, IrInstruction, MethodItem},
    Result,
};

/// A method body.
///
/// A body is either linear (a list of [`MethodItem`]s) or, between [`IrCode::build_cfg`] and
/// [`IrCode::clear_cfg`], an editable [`ControlFlowGraph`]. While the graph exists the linear
/// list is empty and must not be used.
///
/// # Examples
///
/// ```rust
/// use redex::{ir::parse_code, model::DexContext};
///
/// let ctx = DexContext::new();
/// let mut code = parse_code(&ctx, "((const v0 0) (if-eqz v0 :a) (:a) (return-void))")?;
/// code.build_cfg()?;
/// assert!(code.items().is_empty());
/// assert_eq!(code.cfg().map(|cfg| cfg.num_blocks()), Some(2));
/// code.clear_cfg()?;
/// assert!(code.cfg().is_none());
/// # Ok::<(), redex::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct IrCode {
    items: Vec<MethodItem>,
    registers_size: u32,
    cfg: Option<ControlFlowGraph>,
}

impl IrCode {
    /// Creates a linear body.
    #[must_use]
    pub fn new(items: Vec<MethodItem>, registers_size: u32) -> Self {
        IrCode {
            items,
            registers_size,
            cfg: None,
        }
    }

    /// Creates a linear body whose register count is derived from the instructions.
    #[must_use]
    pub fn from_items(items: Vec<MethodItem>) -> Self {
        let registers_size = items
            .iter()
            .filter_map(MethodItem::insn)
            .map(IrInstruction::max_reg_bound)
            .max()
            .unwrap_or(0);
        IrCode::new(items, registers_size)
    }

    /// Returns the linear items. Empty while a CFG is built.
    #[must_use]
    pub fn items(&self) -> &[MethodItem] {
        &self.items
    }

    /// Returns the linear items mutably.
    pub fn items_mut(&mut self) -> &mut Vec<MethodItem> {
        &mut self.items
    }

    /// Returns the number of registers the body uses.
    #[must_use]
    pub fn registers_size(&self) -> u32 {
        match &self.cfg {
            Some(cfg) => cfg.registers_size(),
            None => self.registers_size,
        }
    }

    /// Sets the register count of a linear body.
    pub fn set_registers_size(&mut self, size: u32) {
        self.registers_size = size;
    }

    /// Converts the linear body into an editable CFG.
    ///
    /// Does nothing if a CFG already exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the linear code is structurally invalid.
    pub fn build_cfg(&mut self) -> Result<()> {
        if self.cfg.is_some() {
            return Ok(());
        }
        let items = std::mem::take(&mut self.items);
        match ControlFlowGraph::build(&items, self.registers_size) {
            Ok(cfg) => {
                self.cfg = Some(cfg);
                Ok(())
            }
            Err(e) => {
                self.items = items;
                Err(e)
            }
        }
    }

    /// Linearizes the CFG back into the item list and drops the graph.
    ///
    /// Does nothing if no CFG exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] if the graph cannot be linearized; the graph is
    /// kept in that case.
    pub fn clear_cfg(&mut self) -> Result<()> {
        let Some(cfg) = &self.cfg else {
            return Ok(());
        };
        let items = cfg.linearize()?;
        self.registers_size = cfg.registers_size();
        self.items = items;
        self.cfg = None;
        Ok(())
    }

    /// Returns the CFG, if built.
    #[must_use]
    pub fn cfg(&self) -> Option<&ControlFlowGraph> {
        self.cfg.as_ref()
    }

    /// Returns the CFG mutably, if built.
    pub fn cfg_mut(&mut self) -> Option<&mut ControlFlowGraph> {
        self.cfg.as_mut()
    }

    /// Replaces the body with an editable CFG.
    pub fn set_cfg(&mut self, cfg: ControlFlowGraph) {
        self.items.clear();
        self.registers_size = cfg.registers_size();
        self.cfg = Some(cfg);
    }

    /// Returns the number of non-internal instructions.
    #[must_use]
    pub fn count_opcodes(&self) -> usize {
        match &self.cfg {
            Some(cfg) => cfg.num_opcodes(),
            None => self
                .items
                .iter()
                .filter_map(MethodItem::insn)
                .filter(|insn| !insn.opcode().is_internal())
                .count(),
        }
    }

    /// Returns the estimated serialized size in code units.
    #[must_use]
    pub fn estimate_code_units(&self) -> usize {
        match &self.cfg {
            Some(cfg) => cfg.estimate_code_units(),
            None => self
                .items
                .iter()
                .filter_map(MethodItem::insn)
                .map(IrInstruction::size)
                .sum(),
        }
    }

    /// Iterates over the instructions of a linear body.
    pub fn insns(&self) -> impl Iterator<Item = &IrInstruction> {
        self.items.iter().filter_map(MethodItem::insn)
    }
}

impl fmt::Display for IrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cfg {
            Some(cfg) => match cfg.linearize() {
                Ok(items) => f.write_str(&printer::print_items(&items)),
                Err(e) => write!(f, "<{e}>"),
            },
            None => f.write_str(&printer::print_items(&self.items)),
        }
    }
}
