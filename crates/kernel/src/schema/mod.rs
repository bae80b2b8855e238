//! Table schemas and the schema migrator.
//!
//! A [`TableSchema`] is the storage-level shape of a collection or system
//! table: ordered columns with their database types plus the indexes that
//! back uniqueness constraints. The [`SchemaMigrator`] diffs these against
//! the live store.

mod migrator;

pub use migrator::{MigrationPlan, MigrationReport, SchemaChange, SchemaMigrator};

use serde::{Deserialize, Serialize};

/// Primary key column present on every table.
pub const ID_COLUMN: &str = "id";

/// Language column on translatable collections.
pub const LANGUAGE_COLUMN: &str = "language";

/// Translation group column on translatable collections.
pub const TRANSLATIONS_COLUMN: &str = "translations";

/// Creation timestamp column (milliseconds since the Unix epoch).
pub const CREATED_AT_COLUMN: &str = "created_at";

/// Last update timestamp column (milliseconds since the Unix epoch).
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Search keyword column on collections with search fields.
pub const KEYWORDS_COLUMN: &str = "__keywords";

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DbType {
    Text,
    Boolean,
    Decimal,
    BigInt,
    Json,
}

impl DbType {
    /// Map a PostgreSQL `information_schema` data type to a column type.
    pub fn from_postgres(data_type: &str) -> Option<Self> {
        match data_type.to_ascii_lowercase().as_str() {
            "text" | "character varying" => Some(DbType::Text),
            "boolean" => Some(DbType::Boolean),
            "numeric" | "decimal" => Some(DbType::Decimal),
            "bigint" => Some(DbType::BigInt),
            "jsonb" | "json" => Some(DbType::Json),
            _ => None,
        }
    }
}

/// A single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub db_type: DbType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnSchema {
    /// A nullable, non-key column.
    pub fn new(name: impl Into<String>, db_type: DbType) -> Self {
        Self {
            name: name.into(),
            db_type,
            nullable: true,
            primary_key: false,
        }
    }

    /// Mark as NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as the primary key (implies NOT NULL).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

/// An index over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexSchema {
    /// Build an index with the conventional `{table}_{cols}_{unique|idx}` name.
    pub fn new(table: &str, columns: Vec<String>, unique: bool) -> Self {
        let suffix = if unique { "unique" } else { "idx" };
        let name = format!("{table}_{}_{suffix}", columns.join("_"));
        Self {
            name,
            columns,
            unique,
        }
    }

    /// Whether an index name follows the managed naming convention for `table`.
    pub fn is_managed_name(table: &str, name: &str) -> bool {
        name.starts_with(&format!("{table}_"))
            && (name.ends_with("_unique") || name.ends_with("_idx"))
    }
}

/// Storage-level shape of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// A column as reported by the live store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    /// `None` when the store reports a type vellum does not manage.
    pub db_type: Option<DbType>,
}

/// A table as reported by the live store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTable {
    pub columns: Vec<LiveColumn>,
    pub index_names: Vec<String>,
}

impl LiveTable {
    pub fn column(&self, name: &str) -> Option<&LiveColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Schema of the durable session token table.
pub fn tokens_table() -> TableSchema {
    TableSchema {
        name: "tokens".to_string(),
        columns: vec![
            ColumnSchema::new("token", DbType::Text).primary_key(),
            ColumnSchema::new("user_id", DbType::Text).not_null(),
            ColumnSchema::new("iat", DbType::BigInt).not_null(),
            ColumnSchema::new("exp", DbType::BigInt).not_null(),
        ],
        indexes: vec![IndexSchema::new("tokens", vec!["user_id".to_string()], false)],
    }
}

/// Schema of the durable job queue table.
pub fn jobs_table() -> TableSchema {
    TableSchema {
        name: "jobs".to_string(),
        columns: vec![
            ColumnSchema::new(ID_COLUMN, DbType::Text).primary_key(),
            ColumnSchema::new("name", DbType::Text).not_null(),
            ColumnSchema::new("args", DbType::Json).not_null(),
            ColumnSchema::new("jti", DbType::Text),
            ColumnSchema::new("priority", DbType::BigInt).not_null(),
            ColumnSchema::new(CREATED_AT_COLUMN, DbType::BigInt).not_null(),
        ],
        indexes: vec![IndexSchema::new(
            "jobs",
            vec!["priority".to_string(), CREATED_AT_COLUMN.to_string()],
            false,
        )],
    }
}

/// All system tables managed alongside collection tables.
pub fn system_tables() -> Vec<TableSchema> {
    vec![tokens_table(), jobs_table()]
}
