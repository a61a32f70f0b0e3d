#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crudql::prelude::*;
use crudql::{PermissionKind, Statement};

/// Clinic domain used across the integration tests.
///
/// `user_account <- clinic.admin_user_id`, `user_account <- patient.owner_user_id`,
/// `clinic <- patient.clinic_id`, `patient <- visit.patient_id` and `patient <-> tag` through
/// `patient_tag`. Patients and visits are owned by a user account, clinics administer them.
pub fn clinic_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .register(
            EntityDescriptor::new("user_account")
                .with_column(Column::new("id", ColumnType::BigInt))
                .with_column(Column::new("email", ColumnType::Text))
                .with_primary_key(&["id"]),
        )
        .unwrap()
        .register(
            EntityDescriptor::new("clinic")
                .with_column(Column::new("id", ColumnType::BigInt))
                .with_column(Column::new("name", ColumnType::Text))
                .with_column(Column::new("admin_user_id", ColumnType::BigInt))
                .with_primary_key(&["id"]),
        )
        .unwrap()
        .register(
            EntityDescriptor::new("patient")
                .with_column(Column::new("id", ColumnType::BigInt))
                .with_column(Column::new("code", ColumnType::Text))
                .with_column(Column::new("clinic_id", ColumnType::BigInt))
                .with_column(Column::new("owner_user_id", ColumnType::BigInt))
                .with_column(Column::new("seen_on", ColumnType::Date).nullable())
                .with_primary_key(&["id"])
                .owned_by(
                    OwnerScope::new("user_account", "id").with_admin_column("clinic", "admin_user_id"),
                ),
        )
        .unwrap()
        .register(
            EntityDescriptor::new("visit")
                .with_column(Column::new("id", ColumnType::BigInt))
                .with_column(Column::new("patient_id", ColumnType::BigInt))
                .with_column(Column::new("reason", ColumnType::Text))
                .with_primary_key(&["id"])
                .owned_by(OwnerScope::new("user_account", "id")),
        )
        .unwrap()
        .register(
            EntityDescriptor::new("tag")
                .with_column(Column::new("id", ColumnType::BigInt))
                .with_column(Column::new("label", ColumnType::Text))
                .with_primary_key(&["id"]),
        )
        .unwrap()
        .register(
            EntityDescriptor::new("patient_tag")
                .with_column(Column::new("patient_id", ColumnType::BigInt))
                .with_column(Column::new("tag_id", ColumnType::BigInt))
                .with_primary_key(&["patient_id", "tag_id"]),
        )
        .unwrap();
    schema
        .relate(Relation::belongs_to("admin", "clinic", "user_account", &[("admin_user_id", "id")]))
        .unwrap()
        .relate(Relation::belongs_to("owner", "patient", "user_account", &[("owner_user_id", "id")]))
        .unwrap()
        .relate(Relation::belongs_to("clinic", "patient", "clinic", &[("clinic_id", "id")]))
        .unwrap()
        .relate(Relation::has_many("visits", "patient", "visit", &[("id", "patient_id")]))
        .unwrap()
        .relate(Relation::belongs_to("patient", "visit", "patient", &[("patient_id", "id")]))
        .unwrap()
        .relate(Relation::many_to_many(
            "tags",
            "patient",
            "tag",
            "patient_tag",
            &[("id", "patient_id")],
            &[("tag_id", "id")],
        ))
        .unwrap();
    schema
}

pub fn patient(id: i64, code: &str, clinic_id: i64, owner: i64) -> Row {
    row! {
        "id" => id,
        "code" => code,
        "clinic_id" => clinic_id,
        "owner_user_id" => owner,
        "seen_on" => Value::Null,
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Records every statement and serves canned rows.
///
/// Queued results are served first, in order; after that the rows registered for the table
/// named right after `FROM` are returned.
#[derive(Default)]
pub struct RecordingExecutor {
    queue: Mutex<Vec<Result<Vec<Row>, QueryError>>>,
    tables: Mutex<Vec<(String, Vec<Row>)>>,
    seen: Mutex<Vec<Statement>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(self, rows: Vec<Row>) -> Self {
        self.queue.lock().unwrap().insert(0, Ok(rows));
        self
    }

    pub fn fail(self, error: QueryError) -> Self {
        self.queue.lock().unwrap().insert(0, Err(error));
        self
    }

    pub fn table(self, name: &str, rows: Vec<Row>) -> Self {
        self.tables.lock().unwrap().push((name.to_owned(), rows));
        self
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.seen.lock().unwrap().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(Statement::sql).collect()
    }
}

fn from_table(sql: &str) -> Option<&str> {
    sql.split(" FROM ").nth(1)?.split('"').nth(1)
}

impl Executor for RecordingExecutor {
    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Row>, QueryError> {
        let sql = statement.sql();
        self.seen.lock().unwrap().push(statement.clone());
        if let Some(next) = self.queue.lock().unwrap().pop() {
            return next;
        }
        let tables = self.tables.lock().unwrap();
        Ok(from_table(&sql)
            .and_then(|table| tables.iter().find(|(name, _)| name == table))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}

// =============================================================================
// Oracles
// =============================================================================

/// Grants per `(role, entity)`; anything unlisted is `none`.
#[derive(Default)]
pub struct FixedOracle {
    grants: Vec<(String, String, PermissionKind, Grant)>,
    calls: AtomicUsize,
}

impl FixedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, role: &str, entity: &str, kind: PermissionKind, grant: Grant) -> Self {
        self.grants
            .push((role.to_owned(), entity.to_owned(), kind, grant));
        self
    }

    /// Same grant for every operation kind.
    pub fn allow_all_kinds(self, role: &str, entity: &str, grant: Grant) -> Self {
        self.allow(role, entity, PermissionKind::Read, grant)
            .allow(role, entity, PermissionKind::Write, grant)
            .allow(role, entity, PermissionKind::Delete, grant)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CapabilityOracle for FixedOracle {
    async fn grant(&self, role: &str, entity: &str, kind: PermissionKind) -> Result<Grant, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .grants
            .iter()
            .find(|(r, e, k, _)| r == role && e == entity && *k == kind)
            .map_or(Grant::None, |(_, _, _, grant)| *grant))
    }
}
