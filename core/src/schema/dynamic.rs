//! Relations materialised per request from a caller-supplied context map.
//!
//! A [`DynamicRelation`] is a plain declaration: the derived-table SQL with `{param}` slots, the
//! columns it yields and the join back to the source entity. [`DynamicRelation::materialize`]
//! binds the slots from the request's [`RelationContext`] and returns an ordinary [`Relation`].

use compact_str::{CompactString, format_compact};
use hashbrown::HashMap;
use smallvec::SmallVec;

use super::entity::Column;
use super::relation::{DerivedTable, JoinPair, Relation, RelationKind, RelationTarget};
use crate::error::{Loc, QueryError, Result};
use crate::sql::Fragment;
use crate::value::Value;

/// Arguments for one dynamic relation.
pub type RelationArgs = HashMap<CompactString, Value>;

/// Per-request arguments keyed by dynamic relation name.
pub type RelationContext = HashMap<CompactString, RelationArgs>;

#[derive(Debug, Clone, PartialEq)]
enum TemplatePart {
    Sql(String),
    Param(CompactString),
}

/// Derived-table SQL with `{name}` parameter slots.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedTemplate {
    alias: CompactString,
    parts: Vec<TemplatePart>,
    columns: Vec<Column>,
}

impl DerivedTemplate {
    pub fn parse(alias: &str, sql: &str, columns: Vec<Column>) -> Result<Self> {
        let mut parts = Vec::new();
        let mut rest = sql;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                parts.push(TemplatePart::Sql(rest[..open].to_owned()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                QueryError::Build(format!("unclosed parameter slot in derived table {alias}"))
            })?;
            let name = after[..close].trim();
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(QueryError::Build(format!(
                    "invalid parameter slot `{{{name}}}` in derived table {alias}"
                )));
            }
            parts.push(TemplatePart::Param(CompactString::from(name)));
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Sql(rest.to_owned()));
        }
        Ok(Self {
            alias: CompactString::from(alias),
            parts,
            columns,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            TemplatePart::Param(name) => Some(name.as_str()),
            TemplatePart::Sql(_) => None,
        })
    }
}

/// A relation to a derived table that exists only once its parameters are known.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicRelation {
    pub name: CompactString,
    pub source: CompactString,
    pub kind: RelationKind,
    pub template: DerivedTemplate,
    pub join: SmallVec<[JoinPair; 2]>,
}

impl DynamicRelation {
    pub fn new<I>(name: &str, source: &str, kind: RelationKind, template: DerivedTemplate, join: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<JoinPair>,
    {
        Self {
            name: CompactString::from(name),
            source: CompactString::from(source),
            kind,
            template,
            join: join.into_iter().map(Into::into).collect(),
        }
    }

    /// Binds every template slot from `args` and returns the concrete relation.
    pub fn materialize(&self, args: &RelationArgs) -> Result<Relation> {
        let mut source = Fragment::raw("(");
        for part in &self.template.parts {
            match part {
                TemplatePart::Sql(sql) => {
                    source.push_raw(sql.clone());
                }
                TemplatePart::Param(name) => {
                    let value = args.get(name).ok_or_else(|| {
                        QueryError::validation(
                            Loc::query("embed").join(&self.name),
                            format!(
                                "Missing context parameter `{name}` for dynamic relation {}",
                                self.name
                            ),
                        )
                    })?;
                    source.push_param(
                        format_compact!("{}_ctx_{}", self.template.alias, name),
                        value.clone(),
                    );
                }
            }
        }
        source.push_raw(")");

        let relation = Relation {
            name: self.name.clone(),
            source: self.source.clone(),
            kind: self.kind,
            target: RelationTarget::Derived(DerivedTable {
                alias: self.template.alias.clone(),
                source,
                columns: self.template.columns.clone(),
            }),
            join: self.join.clone(),
            link: None,
        };
        relation.validate()?;
        Ok(relation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ColumnType;

    fn last_visit() -> DynamicRelation {
        let template = DerivedTemplate::parse(
            "last_visit",
            "SELECT patient_id, max(visit_ts) AS visit_ts FROM visit WHERE clinic_id = {clinic} GROUP BY patient_id",
            vec![
                Column::new("patient_id", ColumnType::BigInt),
                Column::new("visit_ts", ColumnType::Timestamp),
            ],
        )
        .unwrap();
        DynamicRelation::new(
            "last_visit",
            "patient",
            RelationKind::HasOne,
            template,
            [("id", "patient_id")],
        )
    }

    #[test]
    fn template_slots_are_parsed() {
        let relation = last_visit();
        assert_eq!(relation.template.params().collect::<Vec<_>>(), ["clinic"]);
        assert!(DerivedTemplate::parse("x", "SELECT {oops", Vec::new()).is_err());
        assert!(DerivedTemplate::parse("x", "SELECT {a b}", Vec::new()).is_err());
    }

    #[test]
    fn materialize_binds_context() {
        let mut args = RelationArgs::new();
        args.insert("clinic".into(), Value::Int(4));
        let relation = last_visit().materialize(&args).unwrap();

        let RelationTarget::Derived(derived) = &relation.target else {
            panic!("expected derived target");
        };
        assert_eq!(
            derived.source.to_string(),
            "(SELECT patient_id, max(visit_ts) AS visit_ts FROM visit WHERE clinic_id = :last_visit_ctx_clinic GROUP BY patient_id)"
        );
        assert_eq!(relation.target_table(), "last_visit");
        assert!(relation.is_dynamic());
    }

    #[test]
    fn missing_argument_is_a_validation_error() {
        let err = last_visit().materialize(&RelationArgs::new()).unwrap_err();
        assert!(matches!(err, QueryError::Validation { .. }));
        assert_eq!(err.loc().unwrap().to_string(), "query.embed.last_visit");
    }
}
