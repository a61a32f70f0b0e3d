use compact_str::CompactString;
use smallvec::SmallVec;

use super::entity::Column;
use crate::error::{QueryError, Result};
use crate::sql::Fragment;
use crate::value::Value;

/// Key under which surfaced link-row fields are nested.
pub const LINK_KEY: &str = "_link";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    BelongsToOne,
    HasOne,
    HasMany,
    ManyToMany,
    HasOneThroughLink,
    HasOneDepending,
}

impl RelationKind {
    /// List-valued when embedded.
    pub const fn is_many(self) -> bool {
        matches!(self, RelationKind::HasMany | RelationKind::ManyToMany)
    }

    /// Traverses a link table.
    pub const fn uses_link(self) -> bool {
        matches!(
            self,
            RelationKind::ManyToMany | RelationKind::HasOneThroughLink
        )
    }
}

/// Left side of a join pair: a source column or a constant.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOperand {
    Column(CompactString),
    Literal(Value),
}

/// `right = left`, where `right` is a column of the joined table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPair {
    pub left: JoinOperand,
    pub right: CompactString,
}

impl JoinPair {
    pub fn columns(left: &str, right: &str) -> Self {
        Self {
            left: JoinOperand::Column(CompactString::from(left)),
            right: CompactString::from(right),
        }
    }

    pub fn literal(value: impl Into<Value>, right: &str) -> Self {
        Self {
            left: JoinOperand::Literal(value.into()),
            right: CompactString::from(right),
        }
    }

    pub fn left_column(&self) -> Option<&str> {
        match &self.left {
            JoinOperand::Column(c) => Some(c),
            JoinOperand::Literal(_) => None,
        }
    }
}

impl From<(&str, &str)> for JoinPair {
    fn from((left, right): (&str, &str)) -> Self {
        JoinPair::columns(left, right)
    }
}

/// How link-row columns appear on embedded rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LinkSurface {
    #[default]
    Hidden,
    /// All link columns under [`LINK_KEY`]
    Nested,
    /// The named link columns merged into the embedded row
    Fields(Vec<CompactString>),
}

/// The join table of a link-traversing relation.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkTable {
    pub table: CompactString,
    /// `(link column, target column)` pairs
    pub target_pairs: SmallVec<[(CompactString, CompactString); 2]>,
    pub surface: LinkSurface,
}

/// A parameterised subquery joined under an alias.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedTable {
    pub alias: CompactString,
    pub source: Fragment,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelationTarget {
    Entity(CompactString),
    Derived(DerivedTable),
}

/// A directed edge of the relation graph.
///
/// For link-traversing kinds, `join` pairs match source operands to link columns and
/// [`LinkTable::target_pairs`] match link columns to target columns. Otherwise `join` pairs
/// match source operands to target columns directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub name: CompactString,
    pub source: CompactString,
    pub kind: RelationKind,
    pub target: RelationTarget,
    pub join: SmallVec<[JoinPair; 2]>,
    pub link: Option<LinkTable>,
}

impl Relation {
    pub fn new<I>(name: &str, source: &str, kind: RelationKind, target: &str, join: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<JoinPair>,
    {
        Self {
            name: CompactString::from(name),
            source: CompactString::from(source),
            kind,
            target: RelationTarget::Entity(CompactString::from(target)),
            join: join.into_iter().map(Into::into).collect(),
            link: None,
        }
    }

    pub fn belongs_to(name: &str, source: &str, target: &str, pairs: &[(&str, &str)]) -> Self {
        Self::new(name, source, RelationKind::BelongsToOne, target, pairs.iter().copied())
    }

    pub fn has_one(name: &str, source: &str, target: &str, pairs: &[(&str, &str)]) -> Self {
        Self::new(name, source, RelationKind::HasOne, target, pairs.iter().copied())
    }

    pub fn has_many(name: &str, source: &str, target: &str, pairs: &[(&str, &str)]) -> Self {
        Self::new(name, source, RelationKind::HasMany, target, pairs.iter().copied())
    }

    /// `source_pairs` are `(source column, link column)`; `target_pairs` are
    /// `(link column, target column)`.
    pub fn many_to_many(
        name: &str,
        source: &str,
        target: &str,
        link_table: &str,
        source_pairs: &[(&str, &str)],
        target_pairs: &[(&str, &str)],
    ) -> Self {
        let mut relation = Self::new(
            name,
            source,
            RelationKind::ManyToMany,
            target,
            source_pairs.iter().copied(),
        );
        relation.link = Some(LinkTable {
            table: CompactString::from(link_table),
            target_pairs: target_pairs
                .iter()
                .map(|(l, t)| (CompactString::from(*l), CompactString::from(*t)))
                .collect(),
            surface: LinkSurface::Hidden,
        });
        relation
    }

    pub fn with_kind(mut self, kind: RelationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_join_pair(mut self, pair: JoinPair) -> Self {
        self.join.push(pair);
        self
    }

    pub fn with_link_surface(mut self, surface: LinkSurface) -> Self {
        if let Some(link) = self.link.as_mut() {
            link.surface = surface;
        }
        self
    }

    /// Table name or derived-table alias used to qualify the target's columns.
    pub fn target_table(&self) -> &str {
        match &self.target {
            RelationTarget::Entity(name) => name,
            RelationTarget::Derived(derived) => &derived.alias,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.target, RelationTarget::Derived(_))
    }

    pub fn is_many(&self) -> bool {
        self.kind.is_many()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.join.is_empty() {
            return Err(QueryError::Build(format!(
                "relation {}.{} declares no join pairs",
                self.source, self.name
            )));
        }
        match (&self.link, self.kind.uses_link()) {
            (None, true) => Err(QueryError::Build(format!(
                "relation {}.{} of kind {:?} needs a link table",
                self.source, self.name, self.kind
            ))),
            (Some(_), false) => Err(QueryError::Build(format!(
                "relation {}.{} of kind {:?} cannot traverse a link table",
                self.source, self.name, self.kind
            ))),
            (Some(link), true) if link.target_pairs.is_empty() => Err(QueryError::Build(format!(
                "link table {} of relation {}.{} declares no target pairs",
                link.table, self.source, self.name
            ))),
            _ => Ok(()),
        }
    }
}
