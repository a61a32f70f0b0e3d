//! Row-level permission scoping.
//!
//! A [`CapabilityOracle`] answers `all`, `own` or `none` per role, entity and action. This
//! module turns an `own` answer into query structure: the owner chain of belongs-to relations
//! is joined into the builder and filtered by the actor's id ([`scope_to_owner`]), or checked
//! against one stored or proposed record ([`is_record_owner`], [`is_create_record_owner`]).
//! [`PermissionGate`] runs the whole decision for one operation.

mod cache;
mod gate;
mod grant;
mod owner;

pub use cache::{CachedOracle, Clock, SystemClock};
pub use gate::{PermissionGate, Target, Verdict};
pub use grant::{Actor, CapabilityOracle, Grant, Operation, PermissionKind};
pub use owner::{is_create_record_owner, is_record_owner, resolve_owner_chain, scope_to_owner};
