//! Request orchestration: the `search`, `get` and permission flows of one entity.
//!
//! [`Engine`] wires the compilers, the [`QueryBuilder`], the [`PermissionGate`], the
//! [`EmbedResolver`] and the pagination helper together. It owns no connection; every call
//! takes the [`Executor`] to run against.

use compact_str::CompactString;
use hashbrown::HashMap;

use crate::builder::{LeadingSort, QueryBuilder};
use crate::compile::{
    CompiledSelection, SortSpec, compile_relation_search, compile_search,
    compile_selection, compile_sort,
};
use crate::config::EngineConfig;
use crate::constraint::ConflictMap;
use crate::embed::EmbedResolver;
use crate::error::{Loc, QueryError, Result};
use crate::executor::Executor;
use crate::pagination::{LinkBase, PageDirection, PageLinks, pagination_links};
use crate::permission::{
    Actor, CapabilityOracle, Operation, PermissionGate, Target, Verdict, scope_to_owner,
};
use crate::row::Row;
use crate::schema::{ColumnPath, EntityDescriptor, RelationContext, RelationGraph};
use crate::sql::Fragment;
use crate::value::Value;

/// Query parameters of a listing request.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub q: Option<String>,
    /// `q.<relation>` filters keyed by relation name
    pub q_extra: HashMap<CompactString, String>,
    pub fields: Option<String>,
    pub embed: Option<String>,
    pub sort_by: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
    /// Cursor of a previously returned link
    pub pq: Option<String>,
    pub from_prev: bool,
    pub context: RelationContext,
    /// Where links point; no links are built without it
    pub base: Option<LinkBase>,
    /// Ordered before `sort_by`, e.g. a text-search rank joined for this request
    pub leading_sort: Option<LeadingSort>,
}

/// Query parameters of a single-record read.
#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    pub fields: Option<String>,
    pub embed: Option<String>,
    pub context: RelationContext,
}

/// One page of a listing, in the requested logical order.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SearchPage {
    pub items: Vec<Row>,
    pub links: Option<PageLinks>,
    pub is_last_page: bool,
}

pub struct Engine<'g, O> {
    graph: &'g dyn RelationGraph,
    config: EngineConfig,
    conflicts: ConflictMap,
    gate: PermissionGate<'g, O>,
}

impl<'g, O: CapabilityOracle> Engine<'g, O> {
    pub fn new(graph: &'g dyn RelationGraph, oracle: O, config: EngineConfig) -> Self {
        let gate = PermissionGate::new(graph, oracle, &config.permissions.admin_role);
        Self {
            graph,
            conflicts: ConflictMap::from_config(&config),
            config,
            gate,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn conflicts(&self) -> &ConflictMap {
        &self.conflicts
    }

    pub fn gate(&self) -> &PermissionGate<'g, O> {
        &self.gate
    }

    /// Runs the permission state machine for one operation.
    ///
    /// `Deny` surfaces as [`QueryError::AuthorizationDenied`]; a `Scoped` verdict is only
    /// returned for searches.
    pub async fn authorize<E>(
        &self,
        executor: &E,
        actor: &Actor,
        entity: &str,
        operation: Operation,
        target: Target<'_>,
    ) -> Result<Verdict>
    where
        E: Executor + ?Sized,
    {
        let verdict = self
            .gate
            .check(executor, actor, entity, operation, target)
            .await?;
        if verdict.is_denied() {
            return Err(QueryError::AuthorizationDenied {
                entity: entity.to_owned(),
                operation,
            });
        }
        Ok(verdict)
    }

    /// Lists one page of `entity`.
    pub async fn search<E>(
        &self,
        executor: &E,
        actor: &Actor,
        entity: &str,
        request: &SearchRequest,
    ) -> Result<SearchPage>
    where
        E: Executor + ?Sized,
    {
        let descriptor = self.graph.require_entity(entity)?;
        let relations = self.graph.relation_map(entity, &request.context)?;
        let selection = compile_selection(
            request.fields.as_deref(),
            request.embed.as_deref(),
            relations.names(),
        )?;
        let tie_break: Vec<&str> = selection.fields.columns().collect();
        let mut sort = compile_sort(
            request.sort_by.as_deref(),
            descriptor.primary_key(),
            &tie_break,
        )?;
        check_sort_in_fields(descriptor, &sort, &selection)?;

        let verdict = self
            .authorize(executor, actor, entity, Operation::Search, Target::Collection)
            .await?;

        let direction = PageDirection::from_prev(request.from_prev);
        let page_size = self.config.page_size(request.limit);

        let mut builder = QueryBuilder::new(self.graph, entity)?;
        builder.apply_fields(&selection.fields)?;
        if !selection.fields.is_empty() {
            for column in descriptor.primary_key() {
                builder.add_column(ColumnPath::new(entity, column));
            }
        }
        if let Some(leading) = &request.leading_sort {
            builder.apply_leading_sort(leading, &mut sort);
        }
        sort.mark_nullable(&builder.reachable_columns()?);
        match direction {
            PageDirection::Forward => builder.apply_sort(&sort)?,
            PageDirection::Backward => builder.apply_sort(&sort.reversed())?,
        };
        builder.limit(page_size);
        if let Some(offset) = request.offset {
            builder.offset(offset);
        }
        if let Verdict::Scoped(owner) = &verdict {
            scope_to_owner(&mut builder, owner, &actor.id)?;
        }

        for (param, text) in [("q", &request.q), ("pq", &request.pq)] {
            let Some(text) = text.clone().filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            builder.add_pre_build(move |builder| {
                let columns = builder.reachable_columns()?;
                let predicate = compile_search(&text, &columns, builder.binds_mut(), Loc::query(param))?;
                builder.where_(predicate);
                Ok(())
            });
        }

        let relation_searches = compile_relation_search(
            request
                .q_extra
                .iter()
                .map(|(name, q)| (name.as_str(), q.as_str())),
            &relations,
            self.graph,
            builder.binds_mut(),
        )?;
        for (relation, predicate) in relation_searches {
            builder.add_existence_subquery(relation, predicate);
        }

        let statement = builder.build()?;
        let mut items = executor
            .fetch_all(&statement)
            .await
            .map_err(|e| self.conflicts.map_err(e))?;

        let is_last_page = items.len() <= page_size as usize;
        items.truncate(page_size as usize);
        if direction == PageDirection::Backward {
            items.reverse();
        }

        if !selection.embed.is_empty() {
            EmbedResolver::new(self.graph, executor, &request.context)
                .with_sort(&sort)
                .expand(entity, &mut items, &selection.embed, &selection.fields)
                .await?;
        }

        let links = request.base.as_ref().map(|base| {
            let first_row = request.pq.as_ref().and_then(|_| items.first());
            pagination_links(base, &sort, first_row, items.last(), is_last_page, direction)
        });

        Ok(SearchPage {
            items,
            links,
            is_last_page,
        })
    }

    /// Reads one record by primary key.
    pub async fn get<E>(
        &self,
        executor: &E,
        actor: &Actor,
        entity: &str,
        id: &[Value],
        request: &GetRequest,
    ) -> Result<Row>
    where
        E: Executor + ?Sized,
    {
        let descriptor = self.graph.require_entity(entity)?;
        let relations = self.graph.relation_map(entity, &request.context)?;
        let selection = compile_selection(
            request.fields.as_deref(),
            request.embed.as_deref(),
            relations.names(),
        )?;
        if descriptor.primary_key().len() != id.len() {
            return Err(QueryError::validation(
                Loc::from(["path", "id"]),
                format!(
                    "{entity} is identified by {} key values, got {}",
                    descriptor.primary_key().len(),
                    id.len()
                ),
            ));
        }

        self.authorize(executor, actor, entity, Operation::Get, Target::Record(id))
            .await?;

        let mut builder = QueryBuilder::new(self.graph, entity)?;
        builder.apply_fields(&selection.fields)?;
        for (column, value) in descriptor.primary_key().iter().zip(id) {
            let name = builder.binds_mut().next_name(entity, column);
            let mut filter = Fragment::new();
            filter
                .push_column(entity, column)
                .push_raw(" = ")
                .push_param(name, value.clone());
            builder.where_(filter);
        }
        let statement = builder.build()?;
        let row = executor
            .fetch_optional(&statement)
            .await
            .map_err(|e| self.conflicts.map_err(e))?
            .ok_or_else(|| QueryError::NotFound {
                loc: Loc::from(["path", "id"]),
            })?;

        let mut rows = [row];
        if !selection.embed.is_empty() {
            EmbedResolver::new(self.graph, executor, &request.context)
                .expand(entity, &mut rows, &selection.embed, &selection.fields)
                .await?;
        }
        let [row] = rows;
        Ok(row)
    }
}

/// Sort columns must be fetched for cursors to be built; primary-key columns are always
/// projected.
fn check_sort_in_fields(
    entity: &EntityDescriptor,
    sort: &SortSpec,
    selection: &CompiledSelection,
) -> Result<()> {
    if selection.fields.is_empty() {
        return Ok(());
    }
    let primary_key = entity.primary_key();
    for column in sort.columns() {
        if !selection.fields.contains(column) && !primary_key.iter().any(|pk| pk == column) {
            return Err(QueryError::validation(
                Loc::query("sort_by").join(column),
                format!("the column {column} used for sorting is not available in the fields list"),
            ));
        }
    }
    Ok(())
}
