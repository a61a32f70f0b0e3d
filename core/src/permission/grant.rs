use core::fmt;
use core::future::Future;
use core::str::FromStr;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::Value;

/// Permission level a role holds for one action on one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grant {
    All,
    Own,
    None,
}

impl FromStr for Grant {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Grant::All),
            "own" => Ok(Grant::Own),
            "none" => Ok(Grant::None),
            other => Err(format!("unknown grant `{other}`")),
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Grant::All => "all",
            Grant::Own => "own",
            Grant::None => "none",
        })
    }
}

/// Action class a grant is looked up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    Read,
    Write,
    Delete,
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermissionKind::Read => "read",
            PermissionKind::Write => "write",
            PermissionKind::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Search,
    Get,
    Create,
    Update,
    Merge,
    Delete,
}

impl Operation {
    pub const fn kind(self) -> PermissionKind {
        match self {
            Operation::Search | Operation::Get => PermissionKind::Read,
            Operation::Create | Operation::Update | Operation::Merge => PermissionKind::Write,
            Operation::Delete => PermissionKind::Delete,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Search => "search",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Merge => "merge",
            Operation::Delete => "delete",
        })
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: Value,
    pub role: CompactString,
}

impl Actor {
    pub fn new(id: impl Into<Value>, role: &str) -> Self {
        Self {
            id: id.into(),
            role: CompactString::from(role),
        }
    }
}

/// External source of grants, typically a permission table.
pub trait CapabilityOracle: Sync {
    fn grant(
        &self,
        role: &str,
        entity: &str,
        kind: PermissionKind,
    ) -> impl Future<Output = Result<Grant>> + Send;
}

impl<O: CapabilityOracle> CapabilityOracle for &O {
    fn grant(
        &self,
        role: &str,
        entity: &str,
        kind: PermissionKind,
    ) -> impl Future<Output = Result<Grant>> + Send {
        (**self).grant(role, entity, kind)
    }
}
