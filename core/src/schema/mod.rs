//! Entity descriptors, the relation graph and the in-process [`Schema`] registry.

mod dynamic;
mod entity;
mod relation;

pub use dynamic::{DerivedTemplate, DynamicRelation, RelationArgs, RelationContext};
pub use entity::{Column, ColumnPath, ColumnRef, EntityDescriptor, OwnerScope};
pub use relation::{
    DerivedTable, JoinOperand, JoinPair, LINK_KEY, LinkSurface, LinkTable, Relation,
    RelationKind, RelationTarget,
};

use std::sync::{Arc, PoisonError, RwLock};

use compact_str::CompactString;
use hashbrown::HashMap;

use crate::error::{QueryError, Result};
use crate::permission::resolve_owner_chain;

// =============================================================================
// RelationGraph
// =============================================================================

/// Source of entity descriptors and their relations.
pub trait RelationGraph: Send + Sync {
    fn entity(&self, name: &str) -> Option<&EntityDescriptor>;

    /// Relations declared once for the process lifetime.
    fn static_relations(&self, entity: &str) -> &[Relation];

    /// Declarations of relations that need a per-request context to exist.
    fn dynamic_relations(&self, entity: &str) -> &[DynamicRelation];

    /// Static relations merged with every dynamic relation the context can materialise.
    fn relation_map(&self, entity: &str, context: &RelationContext) -> Result<RelationMap> {
        let mut map = RelationMap {
            relations: self.static_relations(entity).to_vec(),
            unresolved: Vec::new(),
        };
        for dynamic in self.dynamic_relations(entity) {
            match context.get(&dynamic.name) {
                Some(args) => map.relations.push(dynamic.materialize(args)?),
                None => map.unresolved.push(dynamic.name.clone()),
            }
        }
        Ok(map)
    }

    /// Shortest belongs-to chain from `entity` to `owner_table`.
    fn owner_chain(&self, entity: &str, owner_table: &str) -> Result<Arc<[Relation]>> {
        resolve_owner_chain(self, entity, owner_table).map(Arc::from)
    }

    /// Columns of a relation's target, qualified by the target table or derived-table alias.
    fn target_columns(&self, relation: &Relation) -> Result<Vec<ColumnRef>> {
        match &relation.target {
            RelationTarget::Entity(name) => Ok(self.require_entity(name)?.column_refs().collect()),
            RelationTarget::Derived(derived) => Ok(derived
                .columns
                .iter()
                .map(|column| ColumnRef::of(&derived.alias, column))
                .collect()),
        }
    }

    /// Looks up an entity, failing with a build error when it is not registered.
    fn require_entity(&self, name: &str) -> Result<&EntityDescriptor> {
        self.entity(name)
            .ok_or_else(|| QueryError::Build(format!("entity {name} is not registered")))
    }
}

/// Relations usable for one request, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct RelationMap {
    relations: Vec<Relation>,
    unresolved: Vec<CompactString>,
}

impl RelationMap {
    pub fn get(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of resolvable relations, then of dynamic relations lacking context.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relations
            .iter()
            .map(|r| r.name.as_str())
            .chain(self.unresolved.iter().map(CompactString::as_str))
    }

    /// Declared as dynamic but absent from the request context.
    pub fn is_unresolved_dynamic(&self, name: &str) -> bool {
        self.unresolved.iter().any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

// =============================================================================
// Schema
// =============================================================================

type ChainKey = (CompactString, CompactString);

/// In-process registry implementing [`RelationGraph`].
///
/// Declarations are validated on registration. Owner chains are computed once per
/// `(entity, owner table)` and cached.
#[derive(Debug, Default)]
pub struct Schema {
    entities: HashMap<CompactString, EntityDescriptor>,
    relations: HashMap<CompactString, Vec<Relation>>,
    dynamic: HashMap<CompactString, Vec<DynamicRelation>>,
    owner_chains: RwLock<HashMap<ChainKey, Arc<[Relation]>>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity: EntityDescriptor) -> Result<&mut Self> {
        entity.validate()?;
        if self.entities.contains_key(entity.name()) {
            return Err(QueryError::Build(format!(
                "entity {} registered twice",
                entity.name()
            )));
        }
        self.entities
            .insert(CompactString::from(entity.name()), entity);
        Ok(self)
    }

    pub fn relate(&mut self, relation: Relation) -> Result<&mut Self> {
        relation.validate()?;
        let source = self.require_entity(&relation.source)?;
        self.check_name(source, &relation.name)?;
        check_left_columns(source, &relation)?;

        match &relation.link {
            Some(link) => {
                let link_entity = self.require_entity(&link.table)?;
                check_right_columns(link_entity, relation.join.iter().map(|p| &p.right))?;
                let target = self.require_entity(relation.target_table())?;
                for (link_column, target_column) in &link.target_pairs {
                    check_right_columns(link_entity, [link_column])?;
                    check_right_columns(target, [target_column])?;
                }
            }
            None => {
                let target = self.require_entity(relation.target_table())?;
                check_right_columns(target, relation.join.iter().map(|p| &p.right))?;
            }
        }

        self.owner_chains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.relations
            .entry(relation.source.clone())
            .or_default()
            .push(relation);
        Ok(self)
    }

    pub fn relate_dynamic(&mut self, relation: DynamicRelation) -> Result<&mut Self> {
        if relation.kind.uses_link() {
            return Err(QueryError::Build(format!(
                "dynamic relation {} cannot traverse a link table",
                relation.name
            )));
        }
        let source = self.require_entity(&relation.source)?;
        self.check_name(source, &relation.name)?;
        for pair in &relation.join {
            if let Some(column) = pair.left_column() {
                if !source.has_column(column) {
                    return Err(unknown_join_column(source.name(), column));
                }
            }
            if !relation.template.columns().iter().any(|c| c.name == pair.right) {
                return Err(unknown_join_column(relation.template.alias(), &pair.right));
            }
        }
        self.dynamic
            .entry(relation.source.clone())
            .or_default()
            .push(relation);
        Ok(self)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }

    fn check_name(&self, source: &EntityDescriptor, name: &str) -> Result<()> {
        let taken = source.has_column(name)
            || self.static_relations(source.name()).iter().any(|r| r.name == name)
            || self.dynamic_relations(source.name()).iter().any(|r| r.name == name);
        if taken {
            return Err(QueryError::Build(format!(
                "relation name {name} collides with a column or relation of {}",
                source.name()
            )));
        }
        Ok(())
    }
}

fn check_left_columns(source: &EntityDescriptor, relation: &Relation) -> Result<()> {
    for column in relation.join.iter().filter_map(JoinPair::left_column) {
        if !source.has_column(column) {
            return Err(unknown_join_column(source.name(), column));
        }
    }
    Ok(())
}

fn check_right_columns<'a>(
    entity: &EntityDescriptor,
    columns: impl IntoIterator<Item = &'a CompactString>,
) -> Result<()> {
    for column in columns {
        if !entity.has_column(column) {
            return Err(unknown_join_column(entity.name(), column));
        }
    }
    Ok(())
}

fn unknown_join_column(table: &str, column: &str) -> QueryError {
    QueryError::Build(format!("join column {table}.{column} does not exist"))
}

impl RelationGraph for Schema {
    fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    fn static_relations(&self, entity: &str) -> &[Relation] {
        self.relations.get(entity).map(Vec::as_slice).unwrap_or_default()
    }

    fn dynamic_relations(&self, entity: &str) -> &[DynamicRelation] {
        self.dynamic.get(entity).map(Vec::as_slice).unwrap_or_default()
    }

    fn owner_chain(&self, entity: &str, owner_table: &str) -> Result<Arc<[Relation]>> {
        let key = (CompactString::from(entity), CompactString::from(owner_table));
        if let Some(chain) = self
            .owner_chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(chain));
        }
        let chain: Arc<[Relation]> = resolve_owner_chain(self, entity, owner_table)?.into();
        self.owner_chains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&chain));
        Ok(chain)
    }
}
