//! Control-flow edges.

use std::fmt;

use crate::{cfg::BlockId, model::DexType};

/// Identifies an edge within its [`ControlFlowGraph`](crate::cfg::ControlFlowGraph).
///
/// Ids of deleted edges are never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub(crate) u32);

impl EdgeId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// The kind of control flow an edge represents.
///
/// # Examples
///
/// ```rust
/// use redex::cfg::EdgeKind;
///
/// let taken = EdgeKind::Branch { case_key: None };
/// assert!(taken.is_branch());
/// assert!(!EdgeKind::Goto.is_throw());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Fall-through or unconditional continuation. At most one per source block.
    Goto,
    /// The taken side of an `if-*` (`case_key == None`) or one `switch` case.
    Branch {
        /// The switch case selecting this edge.
        case_key: Option<i32>,
    },
    /// Transfer to an exception handler.
    Throw {
        /// The caught type; `None` is a catch-all.
        catch_type: Option<DexType>,
        /// The position of the handler in its chain; lower indices are consulted first.
        index: u32,
    },
    /// Synthetic link to the merged exit block. Never real control flow.
    Ghost,
}

impl EdgeKind {
    /// Returns `true` for [`EdgeKind::Goto`].
    #[must_use]
    pub fn is_goto(&self) -> bool {
        matches!(self, EdgeKind::Goto)
    }

    /// Returns `true` for [`EdgeKind::Branch`].
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(self, EdgeKind::Branch { .. })
    }

    /// Returns `true` for [`EdgeKind::Throw`].
    #[must_use]
    pub fn is_throw(&self) -> bool {
        matches!(self, EdgeKind::Throw { .. })
    }

    /// Returns `true` for [`EdgeKind::Ghost`].
    #[must_use]
    pub fn is_ghost(&self) -> bool {
        matches!(self, EdgeKind::Ghost)
    }

    /// Returns `true` for a catch-all throw edge.
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        matches!(self, EdgeKind::Throw { catch_type: None, .. })
    }

    /// Returns the case key of a switch branch.
    #[must_use]
    pub fn case_key(&self) -> Option<i32> {
        match self {
            EdgeKind::Branch { case_key } => *case_key,
            _ => None,
        }
    }

    /// Returns the handler index of a throw edge.
    #[must_use]
    pub fn throw_index(&self) -> Option<u32> {
        match self {
            EdgeKind::Throw { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// A directed edge between two blocks of the same graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub(crate) src: BlockId,
    pub(crate) target: BlockId,
    pub(crate) kind: EdgeKind,
}

impl Edge {
    /// Returns the source block.
    #[must_use]
    pub fn src(&self) -> BlockId {
        self.src
    }

    /// Returns the target block.
    #[must_use]
    pub fn target(&self) -> BlockId {
        self.target
    }

    /// Returns the edge kind.
    #[must_use]
    pub fn kind(&self) -> &EdgeKind {
        &self.kind
    }
}
