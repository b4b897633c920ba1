//! Register-to-value maps.

use std::{collections::BTreeMap, fmt};

use crate::{
    analysis::dataflow::{JoinSemiLattice, MeetSemiLattice},
    ir::Reg,
};

use super::ConstantValue;

/// The pseudo-register holding the result of the last instruction whose value is picked up
/// by a following `move-result*` or `move-result-pseudo*`.
pub const RESULT_REGISTER: Reg = Reg::MAX;

/// The abstract state at a program point: a value per register.
///
/// Registers without an entry are unknown. An unreachable point has no registers at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantEnvironment {
    /// No execution reaches this point.
    Unreachable,
    /// The known values.
    Reachable(BTreeMap<Reg, ConstantValue>),
}

impl Default for ConstantEnvironment {
    fn default() -> Self {
        ConstantEnvironment::Reachable(BTreeMap::new())
    }
}

impl ConstantEnvironment {
    /// Returns `true` if no execution reaches this point.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ConstantEnvironment::Unreachable)
    }

    /// Returns the value of `reg`.
    #[must_use]
    pub fn get(&self, reg: Reg) -> ConstantValue {
        match self {
            ConstantEnvironment::Unreachable => ConstantValue::Bottom,
            ConstantEnvironment::Reachable(map) => {
                map.get(&reg).cloned().unwrap_or(ConstantValue::Top)
            }
        }
    }

    /// Binds `reg` to `value`. Binding `Bottom` makes the whole point unreachable.
    pub fn set(&mut self, reg: Reg, value: ConstantValue) {
        if value.is_bottom() {
            *self = ConstantEnvironment::Unreachable;
            return;
        }
        if let ConstantEnvironment::Reachable(map) = self {
            if value.is_top() {
                map.remove(&reg);
            } else {
                map.insert(reg, value);
            }
        }
    }

    /// Forgets everything known about `reg`.
    pub fn set_top(&mut self, reg: Reg) {
        if let ConstantEnvironment::Reachable(map) = self {
            map.remove(&reg);
        }
    }

    /// Iterates over the registers with a known value.
    pub fn bindings(&self) -> impl Iterator<Item = (Reg, &ConstantValue)> {
        let map = match self {
            ConstantEnvironment::Reachable(map) => Some(map),
            ConstantEnvironment::Unreachable => None,
        };
        map.into_iter().flat_map(|m| m.iter().map(|(&r, v)| (r, v)))
    }
}

impl MeetSemiLattice for ConstantEnvironment {
    /// Combines two paths: a register keeps whatever both paths agree on.
    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (ConstantEnvironment::Unreachable, x) | (x, ConstantEnvironment::Unreachable) => {
                x.clone()
            }
            (ConstantEnvironment::Reachable(a), ConstantEnvironment::Reachable(b)) => {
                let mut joined = BTreeMap::new();
                for (reg, va) in a {
                    if let Some(vb) = b.get(reg) {
                        let v = va.join(vb);
                        if !v.is_top() {
                            joined.insert(*reg, v);
                        }
                    }
                }
                ConstantEnvironment::Reachable(joined)
            }
        }
    }

    fn is_bottom(&self) -> bool {
        matches!(self, ConstantEnvironment::Reachable(map) if map.is_empty())
    }
}

impl fmt::Display for ConstantEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantEnvironment::Unreachable => f.write_str("_|_"),
            ConstantEnvironment::Reachable(map) => {
                f.write_str("{")?;
                for (i, (reg, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if *reg == RESULT_REGISTER {
                        write!(f, "result: {v}")?;
                    } else {
                        write!(f, "v{reg}: {v}")?;
                    }
                }
                f.write_str("}")
            }
        }
    }
}
