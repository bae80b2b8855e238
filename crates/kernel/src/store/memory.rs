//! In-process store backend.
//!
//! Evaluates the same condition trees the SQL backend compiles, with SQL
//! three-valued NULL logic, so results match PostgreSQL for the operators
//! vellum emits.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;

use super::{
    Condition, Operator, Predicate, Record, SortDirection, Store, StoreError, StoreQuery, sql,
};
use crate::schema::{ColumnSchema, IndexSchema, LiveColumn, LiveTable, SchemaChange, TableSchema};

#[derive(Debug, Clone)]
struct MemTable {
    columns: Vec<ColumnSchema>,
    indexes: Vec<IndexSchema>,
    rows: Vec<Record>,
}

impl MemTable {
    fn from_schema(schema: &TableSchema) -> Self {
        Self {
            columns: schema.columns.clone(),
            indexes: schema.indexes.clone(),
            rows: Vec::new(),
        }
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn check_columns<'a>(
        &self,
        table: &str,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), StoreError> {
        for name in names {
            if !self.has_column(name) {
                return Err(StoreError::UnknownColumn {
                    table: table.to_string(),
                    column: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Unique key sets: the primary key plus every unique index.
    fn unique_keys(&self, table: &str) -> Vec<(String, Vec<String>)> {
        let mut keys: Vec<(String, Vec<String>)> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| (format!("{table}_pkey"), vec![c.name.clone()]))
            .collect();
        keys.extend(
            self.indexes
                .iter()
                .filter(|i| i.unique)
                .map(|i| (i.name.clone(), i.columns.clone())),
        );
        keys
    }

    /// Verify that no two rows collide on a unique key. NULLs never collide.
    fn check_unique(&self, table: &str, rows: &[Record]) -> Result<(), StoreError> {
        for (index, columns) in self.unique_keys(table) {
            let mut seen: Vec<Vec<&Value>> = Vec::with_capacity(rows.len());
            for row in rows {
                let key: Vec<&Value> = columns
                    .iter()
                    .map(|c| row.get(c).unwrap_or(&Value::Null))
                    .collect();
                if key.iter().any(|v| v.is_null()) {
                    continue;
                }
                if seen
                    .iter()
                    .any(|other| other.iter().zip(&key).all(|(a, b)| values_equal(a, b)))
                {
                    return Err(StoreError::UniqueViolation { index: Some(index) });
                }
                seen.push(key);
            }
        }
        Ok(())
    }
}

/// Process-local store. Data lives as long as the value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, query: &StoreQuery) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables.read();
        let table = get_table(&tables, &query.table)?;
        let rows = filtered(table, query)?;
        let mut rows = grouped(rows, &query.group);

        sort_rows(&mut rows, query);

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        let columns = query.effective_columns();

        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(row, columns.as_deref()))
            .collect())
    }

    async fn count(&self, query: &StoreQuery) -> Result<u64, StoreError> {
        let tables = self.tables.read();
        let table = get_table(&tables, &query.table)?;
        let rows = filtered(table, query)?;
        Ok(grouped(rows, &query.group).len() as u64)
    }

    async fn insert(&self, table_name: &str, row: &Record) -> Result<Record, StoreError> {
        let mut tables = self.tables.write();
        let table = get_table_mut(&mut tables, table_name)?;
        table.check_columns(table_name, row.keys().map(String::as_str))?;

        let stored: Record = table
            .columns
            .iter()
            .map(|c| {
                let value = row.get(&c.name).cloned().unwrap_or(Value::Null);
                (c.name.clone(), value)
            })
            .collect();

        let mut candidate = table.rows.clone();
        candidate.push(stored.clone());
        table.check_unique(table_name, &candidate)?;

        table.rows = candidate;
        Ok(stored)
    }

    async fn update(
        &self,
        table_name: &str,
        condition: &Condition,
        changes: &Record,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();
        let table = get_table_mut(&mut tables, table_name)?;
        table.check_columns(table_name, changes.keys().map(String::as_str))?;
        table.check_columns(table_name, condition.fields())?;

        let mut affected = 0;
        let mut candidate = table.rows.clone();
        for row in candidate.iter_mut() {
            if eval(condition, row) == Some(true) {
                for (key, value) in changes {
                    row.insert(key.clone(), value.clone());
                }
                affected += 1;
            }
        }
        table.check_unique(table_name, &candidate)?;

        table.rows = candidate;
        Ok(affected)
    }

    async fn delete(&self, table_name: &str, condition: &Condition) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();
        let table = get_table_mut(&mut tables, table_name)?;
        table.check_columns(table_name, condition.fields())?;

        let before = table.rows.len();
        table.rows.retain(|row| eval(condition, row) != Some(true));
        Ok((before - table.rows.len()) as u64)
    }

    async fn describe(&self, table_name: &str) -> Result<Option<LiveTable>, StoreError> {
        let tables = self.tables.read();
        Ok(tables.get(table_name).map(|table| {
            let mut index_names: Vec<String> =
                table.indexes.iter().map(|i| i.name.clone()).collect();
            if table.columns.iter().any(|c| c.primary_key) {
                index_names.push(format!("{table_name}_pkey"));
            }
            LiveTable {
                columns: table
                    .columns
                    .iter()
                    .map(|c| LiveColumn {
                        name: c.name.clone(),
                        db_type: Some(c.db_type),
                    })
                    .collect(),
                index_names,
            }
        }))
    }

    async fn apply(&self, changes: &[SchemaChange]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        // Work on a copy so a failing change leaves the store untouched.
        let mut next = tables.clone();

        for change in changes {
            match change {
                SchemaChange::CreateTable(schema) => {
                    next.entry(schema.name.clone())
                        .or_insert_with(|| MemTable::from_schema(schema));
                }
                SchemaChange::AddColumn { table, column } => {
                    let t = get_table_mut(&mut next, table)?;
                    if !t.has_column(&column.name) {
                        for row in t.rows.iter_mut() {
                            row.insert(column.name.clone(), Value::Null);
                        }
                        t.columns.push(column.clone());
                    }
                }
                SchemaChange::DropColumn { table, column } => {
                    let t = get_table_mut(&mut next, table)?;
                    t.columns.retain(|c| &c.name != column);
                    t.indexes.retain(|i| !i.columns.contains(column));
                    for row in t.rows.iter_mut() {
                        row.remove(column);
                    }
                }
                SchemaChange::CreateIndex { table, index } => {
                    let t = get_table_mut(&mut next, table)?;
                    t.check_columns(table, index.columns.iter().map(String::as_str))?;
                    if !t.indexes.iter().any(|i| i.name == index.name) {
                        t.indexes.push(index.clone());
                        t.check_unique(table, &t.rows)?;
                    }
                }
                SchemaChange::DropIndex { table, name } => {
                    let t = get_table_mut(&mut next, table)?;
                    t.indexes.retain(|i| &i.name != name);
                }
            }
        }

        *tables = next;
        Ok(())
    }
}

fn get_table<'a>(
    tables: &'a HashMap<String, MemTable>,
    name: &str,
) -> Result<&'a MemTable, StoreError> {
    tables
        .get(name)
        .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
}

fn get_table_mut<'a>(
    tables: &'a mut HashMap<String, MemTable>,
    name: &str,
) -> Result<&'a mut MemTable, StoreError> {
    tables
        .get_mut(name)
        .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
}

fn filtered(table: &MemTable, query: &StoreQuery) -> Result<Vec<Record>, StoreError> {
    table.check_columns(&query.table, query.condition.fields())?;
    table.check_columns(&query.table, query.group.iter().map(String::as_str))?;
    table.check_columns(&query.table, query.order.iter().map(|o| o.field.as_str()))?;
    if let Some(columns) = &query.columns {
        table.check_columns(&query.table, columns.iter().map(String::as_str))?;
    }

    Ok(table
        .rows
        .iter()
        .filter(|row| eval(&query.condition, row) == Some(true))
        .cloned()
        .collect())
}

/// Collapse rows to one per distinct combination of the group columns.
fn grouped(rows: Vec<Record>, group: &[String]) -> Vec<Record> {
    if group.is_empty() {
        return rows;
    }
    let mut seen: Vec<Vec<Value>> = Vec::new();
    let mut out = Vec::new();
    for row in rows {
        let key: Vec<Value> = group
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        if !seen.contains(&key) {
            seen.push(key);
            out.push(row);
        }
    }
    out
}

fn project(row: Record, columns: Option<&[String]>) -> Record {
    match columns {
        None => row,
        Some(columns) => columns
            .iter()
            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
            .collect(),
    }
}

/// Stable sort. NULLs sort last ascending and first descending.
fn sort_rows(rows: &mut [Record], query: &StoreQuery) {
    if query.order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for term in &query.order {
            let left = a.get(&term.field).unwrap_or(&Value::Null);
            let right = b.get(&term.field).unwrap_or(&Value::Null);
            let ord = sort_cmp(left, right);
            let ord = match term.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

fn sort_cmp(a: &Value, b: &Value) -> Ordering {
    compare(a, b).unwrap_or_else(|| match type_rank(a).cmp(&type_rank(b)) {
        Ordering::Equal => a.to_string().cmp(&b.to_string()),
        other => other,
    })
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Three-valued evaluation: `None` is SQL NULL.
fn eval(condition: &Condition, row: &Record) -> Option<bool> {
    match condition {
        Condition::All(children) => {
            let mut unknown = false;
            for child in children {
                match eval(child, row) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown { None } else { Some(true) }
        }
        Condition::Any(children) => {
            let mut unknown = false;
            for child in children {
                match eval(child, row) {
                    Some(true) => return Some(true),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown { None } else { Some(false) }
        }
        Condition::Not(inner) => eval(inner, row).map(|b| !b),
        Condition::Predicate(p) => eval_predicate(p, row),
    }
}

fn eval_predicate(p: &Predicate, row: &Record) -> Option<bool> {
    let value = row.get(&p.field).unwrap_or(&Value::Null);

    match p.operator {
        Operator::IsNull => return Some(value.is_null()),
        Operator::IsNotNull => return Some(!value.is_null()),
        Operator::Eq if p.value.is_null() => return Some(value.is_null()),
        Operator::Ne if p.value.is_null() => return Some(!value.is_null()),
        Operator::In if sql::list_values(&p.value).is_empty() => return Some(false),
        Operator::NotIn if sql::list_values(&p.value).is_empty() => return Some(true),
        _ => {}
    }

    if value.is_null() {
        return None;
    }

    match p.operator {
        Operator::Eq => (!p.value.is_null()).then(|| values_equal(value, &p.value)),
        Operator::Ne => (!p.value.is_null()).then(|| !values_equal(value, &p.value)),
        Operator::Gt => compare(value, &p.value).map(Ordering::is_gt),
        Operator::Gte => compare(value, &p.value).map(Ordering::is_ge),
        Operator::Lt => compare(value, &p.value).map(Ordering::is_lt),
        Operator::Lte => compare(value, &p.value).map(Ordering::is_le),
        Operator::Between | Operator::NotBetween => {
            let (low, high) = sql::range_bounds(&p.value)?;
            let inside = compare(value, low)?.is_ge() && compare(value, high)?.is_le();
            Some(inside == (p.operator == Operator::Between))
        }
        Operator::In | Operator::NotIn => {
            let items = sql::list_values(&p.value);
            let found = items.iter().any(|item| values_equal(value, item));
            if found {
                Some(p.operator == Operator::In)
            } else if items.iter().any(Value::is_null) {
                None
            } else {
                Some(p.operator == Operator::NotIn)
            }
        }
        Operator::Like | Operator::NotLike | Operator::ILike | Operator::NotILike => {
            let insensitive = matches!(p.operator, Operator::ILike | Operator::NotILike);
            let negated = matches!(p.operator, Operator::NotLike | Operator::NotILike);
            let pattern = like_regex(&text(&p.value), insensitive)?;
            Some(pattern.is_match(&text(value)) != negated)
        }
        Operator::IsNull | Operator::IsNotNull => None,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Translate a SQL LIKE pattern (with `\` escapes) into an anchored regex.
fn like_regex(pattern: &str, insensitive: bool) -> Option<Regex> {
    let mut out = String::from(if insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::DbType;
    use serde_json::json;

    fn row(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn store_with_posts() -> MemoryStore {
        let store = MemoryStore::new();
        let mut table = TableSchema::new("posts");
        table.columns = vec![
            ColumnSchema::new("id", DbType::Text).primary_key(),
            ColumnSchema::new("title", DbType::Text),
            ColumnSchema::new("views", DbType::Decimal),
            ColumnSchema::new("category", DbType::Text),
        ];
        table
            .indexes
            .push(IndexSchema::new("posts", vec!["title".to_string()], true));
        store
            .apply(&[SchemaChange::CreateTable(table)])
            .await
            .unwrap();

        for (id, title, views, category) in [
            ("1", "Hello World", json!(10), json!("news")),
            ("2", "100% Rust", json!(5), json!("news")),
            ("3", "Goodbye", Value::Null, json!("misc")),
        ] {
            store
                .insert(
                    "posts",
                    &row(json!({"id": id, "title": title, "views": views, "category": category})),
                )
                .await
                .unwrap();
        }
        store
    }

    fn ids(rows: &[Record]) -> Vec<&str> {
        rows.iter().map(|r| r["id"].as_str().unwrap()).collect()
    }

    #[tokio::test]
    async fn not_equal_excludes_nulls() {
        let store = store_with_posts().await;
        let q = StoreQuery::new("posts").filter(Condition::predicate(
            "views",
            Operator::Ne,
            json!(10),
        ));
        let rows = store.select(&q).await.unwrap();
        assert_eq!(ids(&rows), vec!["2"]);
    }

    #[tokio::test]
    async fn like_honours_escapes() {
        let store = store_with_posts().await;
        let pattern = format!("{}%", sql::escape_like_wildcards("100%"));
        let q = StoreQuery::new("posts").filter(Condition::predicate(
            "title",
            Operator::Like,
            json!(pattern),
        ));
        assert_eq!(ids(&store.select(&q).await.unwrap()), vec!["2"]);

        let q = StoreQuery::new("posts").filter(Condition::predicate(
            "title",
            Operator::ILike,
            json!("%WORLD%"),
        ));
        assert_eq!(ids(&store.select(&q).await.unwrap()), vec!["1"]);
    }

    #[tokio::test]
    async fn ordering_puts_nulls_last_ascending() {
        let store = store_with_posts().await;
        let q = StoreQuery::new("posts").order_by("views", SortDirection::Asc);
        assert_eq!(ids(&store.select(&q).await.unwrap()), vec!["2", "1", "3"]);

        let q = StoreQuery::new("posts").order_by("views", SortDirection::Desc);
        assert_eq!(ids(&store.select(&q).await.unwrap()), vec!["3", "1", "2"]);
    }

    #[tokio::test]
    async fn grouping_counts_distinct_values() {
        let store = store_with_posts().await;
        let mut q = StoreQuery::new("posts");
        q.group = vec!["category".to_string()];
        assert_eq!(store.count(&q).await.unwrap(), 2);
        let rows = store.select(&q).await.unwrap();
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["category"]);
    }

    #[tokio::test]
    async fn unique_index_rejects_duplicates() {
        let store = store_with_posts().await;
        let err = store
            .insert("posts", &row(json!({"id": "4", "title": "Goodbye"})))
            .await
            .unwrap_err();
        match err {
            StoreError::UniqueViolation { index } => {
                assert_eq!(index.as_deref(), Some("posts_title_unique"))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = store
            .update(
                "posts",
                &Condition::eq("id", "1"),
                &row(json!({"title": "Goodbye"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn unknown_column_is_an_error() {
        let store = store_with_posts().await;
        let q = StoreQuery::new("posts").filter(Condition::eq("nope", 1));
        assert!(matches!(
            store.select(&q).await,
            Err(StoreError::UnknownColumn { .. })
        ));
    }

    #[tokio::test]
    async fn between_and_in() {
        let store = store_with_posts().await;
        let q = StoreQuery::new("posts").filter(Condition::predicate(
            "views",
            Operator::Between,
            json!([5, 9]),
        ));
        assert_eq!(ids(&store.select(&q).await.unwrap()), vec!["2"]);

        let q = StoreQuery::new("posts").filter(Condition::predicate(
            "id",
            Operator::In,
            json!(["1", "3"]),
        ));
        assert_eq!(store.count(&q).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_and_paging() {
        let store = store_with_posts().await;
        let mut q = StoreQuery::new("posts").order_by("id", SortDirection::Asc).limit(1);
        q.offset = Some(1);
        assert_eq!(ids(&store.select(&q).await.unwrap()), vec!["2"]);

        let removed = store
            .delete("posts", &Condition::eq("category", "news"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count(&StoreQuery::new("posts")).await.unwrap(), 1);
    }
}
