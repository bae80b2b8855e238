//! PostgreSQL statement generation using SeaQuery.
//!
//! Generates SQL for [`StoreQuery`] reads, row mutations and schema changes.
//! Values are rendered inline by SeaQuery's escaping, the same way the
//! statements are executed by [`super::PgStore`].

use sea_query::{
    Alias, Asterisk, ColumnDef, Cond, Expr, ExprTrait, Func, Index, Order, PostgresQueryBuilder,
    Query, SelectStatement, SimpleExpr, Table, Value as SqlValue,
};
use serde_json::Value;

use super::{Condition, Operator, Predicate, Record, SortDirection, StoreQuery};
use crate::schema::{ColumnSchema, DbType, IndexSchema, SchemaChange};

/// Build the SELECT statement for a query.
pub fn select(query: &StoreQuery) -> String {
    let mut stmt = Query::select();

    match query.effective_columns() {
        Some(cols) => {
            stmt.columns(cols.iter().map(|c| Alias::new(c.as_str())));
        }
        None => {
            stmt.column((Alias::new(query.table.as_str()), Asterisk));
        }
    }

    stmt.from(Alias::new(query.table.as_str()));
    add_condition(&mut stmt, &query.condition);

    for col in &query.group {
        stmt.group_by_col(Alias::new(col.as_str()));
    }

    for order in &query.order {
        let direction = match order.direction {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        };
        stmt.order_by(Alias::new(order.field.as_str()), direction);
    }

    if let Some(limit) = query.limit {
        stmt.limit(limit);
    }
    if let Some(offset) = query.offset {
        stmt.offset(offset);
    }

    stmt.to_string(PostgresQueryBuilder)
}

/// Wrap a SELECT so every row comes back as one JSON object.
pub fn select_json(query: &StoreQuery) -> String {
    format!("SELECT row_to_json(t) FROM ({}) t", select(query))
}

/// Build a COUNT query. Grouped queries count groups.
pub fn count(query: &StoreQuery) -> String {
    if !query.group.is_empty() {
        let inner = StoreQuery {
            limit: None,
            offset: None,
            order: Vec::new(),
            ..query.clone()
        };
        return format!("SELECT COUNT(*) FROM ({}) t", select(&inner));
    }

    let mut stmt = Query::select();
    stmt.expr(Expr::col(Asterisk).count());
    stmt.from(Alias::new(query.table.as_str()));
    add_condition(&mut stmt, &query.condition);
    stmt.to_string(PostgresQueryBuilder)
}

/// Build an INSERT returning the stored row as JSON.
pub fn insert_json(table: &str, row: &Record) -> Result<String, sea_query::error::Error> {
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(table))
        .columns(row.keys().map(|k| Alias::new(k.as_str())))
        .values(row.values().map(|v| SimpleExpr::Value(sql_value(v))))?
        .returning_all();

    Ok(format!(
        "WITH inserted AS ({}) SELECT row_to_json(inserted) FROM inserted",
        stmt.to_string(PostgresQueryBuilder)
    ))
}

/// Build an UPDATE for every row matching `condition`.
pub fn update(table: &str, condition: &Condition, changes: &Record) -> String {
    let mut stmt = Query::update();
    stmt.table(Alias::new(table)).values(
        changes
            .iter()
            .map(|(k, v)| (Alias::new(k.as_str()), SimpleExpr::Value(sql_value(v)))),
    );
    if !condition.is_empty() {
        stmt.cond_where(cond(condition));
    }
    stmt.to_string(PostgresQueryBuilder)
}

/// Build a DELETE for every row matching `condition`.
pub fn delete(table: &str, condition: &Condition) -> String {
    let mut stmt = Query::delete();
    stmt.from_table(Alias::new(table));
    if !condition.is_empty() {
        stmt.cond_where(cond(condition));
    }
    stmt.to_string(PostgresQueryBuilder)
}

/// Render one schema change as DDL.
pub fn schema_change(change: &SchemaChange) -> Vec<String> {
    match change {
        SchemaChange::CreateTable(table) => {
            let mut stmt = Table::create();
            stmt.table(Alias::new(table.name.as_str())).if_not_exists();
            for column in &table.columns {
                stmt.col(column_def(column));
            }
            let mut out = vec![stmt.to_string(PostgresQueryBuilder)];
            out.extend(
                table
                    .indexes
                    .iter()
                    .map(|index| create_index(&table.name, index)),
            );
            out
        }
        // Existing rows have no value for an added column, so it starts nullable.
        SchemaChange::AddColumn { table, column } => vec![
            Table::alter()
                .table(Alias::new(table.as_str()))
                .add_column(column_def(&ColumnSchema {
                    nullable: true,
                    ..column.clone()
                }))
                .to_string(PostgresQueryBuilder),
        ],
        SchemaChange::DropColumn { table, column } => vec![
            Table::alter()
                .table(Alias::new(table.as_str()))
                .drop_column(Alias::new(column.as_str()))
                .to_string(PostgresQueryBuilder),
        ],
        SchemaChange::CreateIndex { table, index } => vec![create_index(table, index)],
        SchemaChange::DropIndex { table, name } => vec![
            Index::drop()
                .name(name.as_str())
                .table(Alias::new(table.as_str()))
                .to_string(PostgresQueryBuilder),
        ],
    }
}

fn create_index(table: &str, index: &IndexSchema) -> String {
    let mut stmt = Index::create();
    stmt.name(index.name.as_str())
        .table(Alias::new(table))
        .if_not_exists();
    for col in &index.columns {
        stmt.col(Alias::new(col.as_str()));
    }
    if index.unique {
        stmt.unique();
    }
    stmt.to_string(PostgresQueryBuilder)
}

fn column_def(column: &ColumnSchema) -> ColumnDef {
    let mut def = ColumnDef::new(Alias::new(column.name.as_str()));
    match column.db_type {
        DbType::Text => def.text(),
        DbType::Boolean => def.boolean(),
        DbType::Decimal => def.decimal(),
        DbType::BigInt => def.big_integer(),
        DbType::Json => def.json_binary(),
    };
    if column.primary_key {
        def.primary_key();
    }
    if !column.nullable {
        def.not_null();
    }
    def
}

fn add_condition(stmt: &mut SelectStatement, condition: &Condition) {
    if !condition.is_empty() {
        stmt.cond_where(cond(condition));
    }
}

/// Translate a condition tree into a SeaQuery condition.
pub fn cond(condition: &Condition) -> Cond {
    match condition {
        Condition::All(children) => children
            .iter()
            .filter(|c| !c.is_empty())
            .fold(Cond::all(), |acc, c| acc.add(cond(c))),
        Condition::Any(children) if children.is_empty() => Cond::all().add(Expr::cust("FALSE")),
        Condition::Any(children) => children
            .iter()
            .fold(Cond::any(), |acc, c| acc.add(cond(c))),
        Condition::Not(inner) => cond(inner).not(),
        Condition::Predicate(p) => Cond::all().add(predicate_expr(p)),
    }
}

fn predicate_expr(p: &Predicate) -> SimpleExpr {
    let col: SimpleExpr = Expr::col(Alias::new(p.field.as_str())).into();

    match p.operator {
        Operator::Eq if p.value.is_null() => col.is_null(),
        Operator::Ne if p.value.is_null() => col.is_not_null(),
        Operator::Eq => col.eq(sql_value(&p.value)),
        Operator::Ne => col.ne(sql_value(&p.value)),
        Operator::Gt => col.gt(sql_value(&p.value)),
        Operator::Gte => col.gte(sql_value(&p.value)),
        Operator::Lt => col.lt(sql_value(&p.value)),
        Operator::Lte => col.lte(sql_value(&p.value)),
        Operator::Between | Operator::NotBetween => {
            let Some((low, high)) = range_bounds(&p.value) else {
                return Expr::cust("FALSE");
            };
            let range = Cond::all()
                .add(col.clone().gte(sql_value(low)))
                .add(col.lte(sql_value(high)));
            if p.operator == Operator::NotBetween {
                range.not().into()
            } else {
                range.into()
            }
        }
        Operator::In | Operator::NotIn => {
            let values: Vec<SqlValue> = list_values(&p.value).iter().map(sql_value).collect();
            match (p.operator, values.is_empty()) {
                (Operator::In, true) => Expr::cust("FALSE"),
                (_, true) => Expr::cust("TRUE"),
                (Operator::In, false) => col.is_in(values),
                (_, false) => col.is_not_in(values),
            }
        }
        Operator::Like => col.like(pattern(&p.value)),
        Operator::NotLike => Cond::all().add(col.like(pattern(&p.value))).not().into(),
        Operator::ILike => {
            SimpleExpr::from(Func::lower(col)).like(pattern(&p.value).to_lowercase())
        }
        Operator::NotILike => Cond::all()
            .add(SimpleExpr::from(Func::lower(col)).like(pattern(&p.value).to_lowercase()))
            .not()
            .into(),
        Operator::IsNull => col.is_null(),
        Operator::IsNotNull => col.is_not_null(),
    }
}

/// Convert a JSON value into a SeaQuery value.
///
/// Arrays and objects are rendered as JSON text, which PostgreSQL casts
/// implicitly for JSONB columns.
pub fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::String(None),
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or_default().into(),
        },
        Value::String(s) => s.clone().into(),
        Value::Array(_) | Value::Object(_) => value.to_string().into(),
    }
}

/// `[low, high]` bounds of a between predicate.
pub fn range_bounds(value: &Value) -> Option<(&Value, &Value)> {
    match value.as_array().map(Vec::as_slice) {
        Some([low, high]) => Some((low, high)),
        _ => None,
    }
}

/// Items of an IN predicate. A scalar is treated as a one-item list.
pub fn list_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn pattern(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
pub fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
