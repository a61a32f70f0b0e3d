//! Join kinds and join clauses accumulated by the [`QueryBuilder`](crate::QueryBuilder).

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::schema::{ColumnPath, DerivedTable};
use crate::value::Value;

/// Join keyword of a [`JoinClause`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JoinType {
    /// Relation and owner-chain joins; the related row must exist
    #[default]
    Inner,
    Left,
}

impl JoinType {
    pub const fn as_sql(self) -> &'static str {
        match self {
            JoinType::Inner => " JOIN ",
            JoinType::Left => " LEFT JOIN ",
        }
    }
}

// =============================================================================
// Join clauses
// =============================================================================

/// Left side of an `ON` equality.
#[derive(Debug, Clone, PartialEq)]
pub enum OnOperand {
    Column(ColumnPath),
    /// Bound as a parameter when the statement is built
    Literal(Value),
}

impl From<ColumnPath> for OnOperand {
    fn from(column: ColumnPath) -> Self {
        OnOperand::Column(column)
    }
}

/// What a join brings into scope.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinTarget {
    Table(CompactString),
    Derived(DerivedTable),
}

impl JoinTarget {
    /// Name the target's columns are qualified with.
    pub fn name(&self) -> &str {
        match self {
            JoinTarget::Table(name) => name,
            JoinTarget::Derived(derived) => &derived.alias,
        }
    }
}

/// `<join> target ON left[0] = right[0] AND ...`
///
/// The operand lists must have equal length; the builder rejects the statement otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub target: JoinTarget,
    pub left: SmallVec<[OnOperand; 2]>,
    pub right: SmallVec<[ColumnPath; 2]>,
    pub join_type: JoinType,
}

impl JoinClause {
    pub fn new<L, R>(target: JoinTarget, left: L, right: R) -> Self
    where
        L: IntoIterator,
        L::Item: Into<OnOperand>,
        R: IntoIterator<Item = ColumnPath>,
    {
        Self {
            target,
            left: left.into_iter().map(Into::into).collect(),
            right: right.into_iter().collect(),
            join_type: JoinType::Inner,
        }
    }

    pub fn with_join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }
}
