//! Schema diffing and migration.
//!
//! Compares desired [`TableSchema`]s with what the store reports and produces
//! an ordered list of [`SchemaChange`]s. Column drops (including the drop half
//! of a type change) only run when destructive migrations are allowed.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use super::{ColumnSchema, IndexSchema, TableSchema};
use crate::store::{Store, StoreError};

/// One DDL step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaChange {
    CreateTable(TableSchema),
    AddColumn { table: String, column: ColumnSchema },
    DropColumn { table: String, column: String },
    CreateIndex { table: String, index: IndexSchema },
    DropIndex { table: String, name: String },
}

impl SchemaChange {
    /// Whether applying this change can lose data.
    pub fn is_destructive(&self) -> bool {
        matches!(self, SchemaChange::DropColumn { .. })
    }

    pub fn table(&self) -> &str {
        match self {
            SchemaChange::CreateTable(t) => &t.name,
            SchemaChange::AddColumn { table, .. }
            | SchemaChange::DropColumn { table, .. }
            | SchemaChange::CreateIndex { table, .. }
            | SchemaChange::DropIndex { table, .. } => table,
        }
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaChange::CreateTable(t) => write!(f, "create table {}", t.name),
            SchemaChange::AddColumn { table, column } => {
                write!(f, "add column {table}.{} ({:?})", column.name, column.db_type)
            }
            SchemaChange::DropColumn { table, column } => {
                write!(f, "drop column {table}.{column}")
            }
            SchemaChange::CreateIndex { table, index } => {
                write!(f, "create index {} on {table}", index.name)
            }
            SchemaChange::DropIndex { table, name } => write!(f, "drop index {name} on {table}"),
        }
    }
}

/// Changes to run plus those held back because they are destructive.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationPlan {
    pub changes: Vec<SchemaChange>,
    pub skipped: Vec<SchemaChange>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.skipped.is_empty()
    }
}

/// Outcome of applying a plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub applied: usize,
    pub skipped: usize,
    pub created_tables: Vec<String>,
}

/// Diffs desired table schemas against a live store.
pub struct SchemaMigrator;

impl SchemaMigrator {
    /// Compute the changes needed to bring `tables` up to date.
    pub async fn plan(
        store: &dyn Store,
        tables: &[TableSchema],
        allow_destructive: bool,
    ) -> Result<MigrationPlan, StoreError> {
        let mut plan = MigrationPlan::default();

        for table in tables {
            match store.describe(&table.name).await? {
                None => plan.changes.push(SchemaChange::CreateTable(table.clone())),
                Some(live) => {
                    let mut drop_indexes = Vec::new();
                    let mut drop_columns = Vec::new();
                    let mut add_columns = Vec::new();
                    let mut create_indexes = Vec::new();
                    let mut recreated: HashSet<&str> = HashSet::new();

                    for column in &table.columns {
                        match live.column(&column.name) {
                            None => add_columns.push(SchemaChange::AddColumn {
                                table: table.name.clone(),
                                column: column.clone(),
                            }),
                            Some(existing) if existing.db_type != Some(column.db_type) => {
                                // A type change is a drop followed by an add.
                                let drop = SchemaChange::DropColumn {
                                    table: table.name.clone(),
                                    column: column.name.clone(),
                                };
                                let add = SchemaChange::AddColumn {
                                    table: table.name.clone(),
                                    column: column.clone(),
                                };
                                if allow_destructive {
                                    recreated.insert(column.name.as_str());
                                    drop_columns.push(drop);
                                    add_columns.push(add);
                                } else {
                                    plan.skipped.push(drop);
                                    plan.skipped.push(add);
                                }
                            }
                            Some(_) => {}
                        }
                    }

                    for existing in &live.columns {
                        if !table.has_column(&existing.name) {
                            drop_columns.push(SchemaChange::DropColumn {
                                table: table.name.clone(),
                                column: existing.name.clone(),
                            });
                        }
                    }

                    for index in &table.indexes {
                        let touches_recreated =
                            index.columns.iter().any(|c| recreated.contains(c.as_str()));
                        let exists = live.index_names.contains(&index.name);
                        if exists && touches_recreated {
                            drop_indexes.push(SchemaChange::DropIndex {
                                table: table.name.clone(),
                                name: index.name.clone(),
                            });
                        }
                        if !exists || touches_recreated {
                            create_indexes.push(SchemaChange::CreateIndex {
                                table: table.name.clone(),
                                index: index.clone(),
                            });
                        }
                    }

                    for name in &live.index_names {
                        if table.index(name).is_none()
                            && IndexSchema::is_managed_name(&table.name, name)
                        {
                            drop_indexes.push(SchemaChange::DropIndex {
                                table: table.name.clone(),
                                name: name.clone(),
                            });
                        }
                    }

                    plan.changes.extend(drop_indexes);
                    for change in drop_columns {
                        if allow_destructive {
                            plan.changes.push(change);
                        } else {
                            plan.skipped.push(change);
                        }
                    }
                    plan.changes.extend(add_columns);
                    plan.changes.extend(create_indexes);
                }
            }
        }

        Ok(plan)
    }

    /// Apply a plan to the store.
    pub async fn apply(
        store: &dyn Store,
        plan: &MigrationPlan,
    ) -> Result<MigrationReport, StoreError> {
        for change in &plan.skipped {
            warn!(change = %change, "skipping destructive schema change");
        }

        store.apply(&plan.changes).await?;

        let created_tables: Vec<String> = plan
            .changes
            .iter()
            .filter_map(|c| match c {
                SchemaChange::CreateTable(t) => Some(t.name.clone()),
                _ => None,
            })
            .collect();

        for change in &plan.changes {
            info!(change = %change, "schema change applied");
        }

        Ok(MigrationReport {
            applied: plan.changes.len(),
            skipped: plan.skipped.len(),
            created_tables,
        })
    }

    /// Plan and apply in one step.
    pub async fn migrate(
        store: &dyn Store,
        tables: &[TableSchema],
        allow_destructive: bool,
    ) -> Result<MigrationReport, StoreError> {
        let plan = Self::plan(store, tables, allow_destructive).await?;
        Self::apply(store, &plan).await
    }
}
