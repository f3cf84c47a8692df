use crate::core::{PersistenceError, Result};
use std::fmt;
use std::str::FromStr;

/// Lifecycle operations that can travel along an association edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeOp {
    Persist,
    Remove,
    Refresh,
    Merge,
    Detach,
}

impl CascadeOp {
    pub const ALL: [CascadeOp; 5] = [
        CascadeOp::Persist,
        CascadeOp::Remove,
        CascadeOp::Refresh,
        CascadeOp::Merge,
        CascadeOp::Detach,
    ];

    fn bit(self) -> u8 {
        match self {
            CascadeOp::Persist => 1,
            CascadeOp::Remove => 1 << 1,
            CascadeOp::Refresh => 1 << 2,
            CascadeOp::Merge => 1 << 3,
            CascadeOp::Detach => 1 << 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CascadeOp::Persist => "PERSIST",
            CascadeOp::Remove => "REMOVE",
            CascadeOp::Refresh => "REFRESH",
            CascadeOp::Merge => "MERGE",
            CascadeOp::Detach => "DETACH",
        }
    }
}

impl fmt::Display for CascadeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of cascaded operations carried by an association edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CascadeSet(u8);

impl CascadeSet {
    pub const NONE: CascadeSet = CascadeSet(0);
    pub const ALL: CascadeSet = CascadeSet(0b1_1111);

    pub fn of(ops: &[CascadeOp]) -> Self {
        ops.iter().fold(Self::NONE, |set, op| set.with(*op))
    }

    pub fn with(self, op: CascadeOp) -> Self {
        CascadeSet(self.0 | op.bit())
    }

    pub fn contains(&self, op: CascadeOp) -> bool {
        self.0 & op.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn ops(&self) -> impl Iterator<Item = CascadeOp> + '_ {
        CascadeOp::ALL.into_iter().filter(|op| self.contains(*op))
    }
}

impl FromStr for CascadeSet {
    type Err = PersistenceError;

    /// Parses a comma separated list such as `PERSIST,REMOVE`, `ALL` or `NONE`.
    fn from_str(input: &str) -> Result<Self> {
        let mut set = CascadeSet::NONE;
        for part in input.split(',') {
            let token = part.trim().to_ascii_uppercase();
            set = match token.as_str() {
                "" | "NONE" => set,
                "ALL" => CascadeSet::ALL,
                "PERSIST" => set.with(CascadeOp::Persist),
                "REMOVE" => set.with(CascadeOp::Remove),
                "REFRESH" => set.with(CascadeOp::Refresh),
                "MERGE" => set.with(CascadeOp::Merge),
                "DETACH" => set.with(CascadeOp::Detach),
                other => {
                    return Err(PersistenceError::InvalidMetadata(format!(
                        "Unknown cascade option '{}'",
                        other
                    )));
                }
            };
        }
        Ok(set)
    }
}

impl fmt::Display for CascadeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == CascadeSet::ALL {
            return f.write_str("ALL");
        }
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<&str> = self.ops().map(CascadeOp::name).collect();
        f.write_str(&names.join(","))
    }
}
