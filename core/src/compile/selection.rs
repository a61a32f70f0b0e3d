use compact_str::CompactString;

use super::param_name;
use crate::error::{Loc, QueryError, Result};
use crate::grammar::fields::{FieldNode, parse_fields};

/// One entry of a [`SelectionTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Project this column.
    Column,
    /// Embed this relation, narrowed to the nested selection when it is not empty.
    Nested(SelectionTree),
}

impl Selection {
    pub fn as_nested(&self) -> Option<&SelectionTree> {
        match self {
            Selection::Nested(tree) => Some(tree),
            Selection::Column => None,
        }
    }
}

/// Ordered `name -> true | subtree` mapping built from a `fields` or `embed` string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionTree {
    entries: Vec<(CompactString, Selection)>,
}

impl SelectionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Selection> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, selection)| selection)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets `name`, replacing an earlier entry in place.
    pub fn insert(&mut self, name: impl Into<CompactString>, selection: Selection) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = selection,
            None => self.entries.push((name, selection)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Selection)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Names selected as plain columns.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, s)| matches!(s, Selection::Column))
            .map(|(n, _)| n)
    }

    /// Entries carrying a nested selection.
    pub fn nested(&self) -> impl Iterator<Item = (&str, &SelectionTree)> {
        self.iter().filter_map(|(n, s)| s.as_nested().map(|tree| (n, tree)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn from_nodes(nodes: Vec<FieldNode>) -> Self {
        let mut tree = SelectionTree::new();
        for node in nodes {
            let selection = match node.nested {
                Some(nested) => Selection::Nested(SelectionTree::from_nodes(nested)),
                None => Selection::Column,
            };
            tree.insert(node.name, selection);
        }
        tree
    }
}

/// The compiled `fields` and `embed` parameters of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledSelection {
    /// Columns to project; relation names map to the related entity's projection.
    pub fields: SelectionTree,
    /// Relations to embed; nested entries embed one level deeper.
    pub embed: SelectionTree,
}

impl CompiledSelection {
    /// Projection requested for the rows of `relation`. Empty means every column.
    pub fn relation_fields(&self, relation: &str) -> SelectionTree {
        self.fields
            .get(relation)
            .and_then(Selection::as_nested)
            .cloned()
            .unwrap_or_default()
    }
}

/// Compiles the `fields` and `embed` parameters.
///
/// A relation named in `fields` without a nested selection becomes an empty nested selection,
/// so it reads as "embed with every column" rather than "project a column". Top-level embed
/// names must be relations of the entity; deeper levels are checked during expansion.
pub fn compile_selection<'a>(
    fields: Option<&str>,
    embed: Option<&str>,
    relation_names: impl IntoIterator<Item = &'a str>,
) -> Result<CompiledSelection> {
    let relation_names: Vec<&str> = relation_names.into_iter().collect();
    let mut compiled = CompiledSelection::default();

    if let Some(fields) = fields.filter(|f| !f.trim().is_empty()) {
        compiled.fields = parse_tree(fields, Loc::query("fields"))?;
        for (name, selection) in &mut compiled.fields.entries {
            if matches!(selection, Selection::Column) && relation_names.contains(&name.as_str()) {
                *selection = Selection::Nested(SelectionTree::new());
            }
        }
    }

    if let Some(embed) = embed.filter(|e| !e.trim().is_empty()) {
        let loc = Loc::query("embed");
        compiled.embed = parse_tree(embed, loc.clone())?;
        if let Some(unknown) = compiled
            .embed
            .names()
            .find(|name| !relation_names.contains(name))
        {
            return Err(QueryError::unknown_relation(loc.join(unknown), unknown));
        }
    }

    Ok(compiled)
}

fn parse_tree(input: &str, loc: Loc) -> Result<SelectionTree> {
    // A leading `!` is accepted by the grammar and ignored here.
    let parsed = parse_fields(input)
        .map_err(|e| e.into_query_error(param_name(&loc), input, loc.clone()))?;
    Ok(SelectionTree::from_nodes(parsed.fields))
}
