//! Collection schema compiler.
//!
//! Resolves each collection field against the field registry and derives the
//! storage table: ordered columns, unique and lookup indexes, and the system
//! columns for translations, timestamps and search. Problems are reported per
//! collection and field; everything that does resolve is still compiled.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};

use super::definition::{
    CollectionDefinition, CollectionField, CollectionMode, DRAFT_TOKEN_FIELD, PATH_FIELD,
    PUBLIC_FIELD, UniqueScope, is_identifier,
};
use crate::field::{ConditionalRule, FieldDefinition, FieldRegistry};
use crate::plugin::RegistrationError;
use crate::schema::{
    CREATED_AT_COLUMN, ColumnSchema, DbType, ID_COLUMN, IndexSchema, KEYWORDS_COLUMN,
    LANGUAGE_COLUMN, TRANSLATIONS_COLUMN, TableSchema, UPDATED_AT_COLUMN,
};

/// Columns the kernel manages itself.
pub const SYSTEM_COLUMNS: &[&str] = &[
    ID_COLUMN,
    LANGUAGE_COLUMN,
    TRANSLATIONS_COLUMN,
    CREATED_AT_COLUMN,
    UPDATED_AT_COLUMN,
    KEYWORDS_COLUMN,
];

/// A collection field resolved against its field type.
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub name: String,
    pub definition: Arc<FieldDefinition>,
    pub options: Value,
    pub required: bool,
    pub unique: Option<UniqueScope>,
    /// Name of the unique index backing `unique`, if any.
    pub unique_index: Option<String>,
    pub conditional_logic: Vec<ConditionalRule>,
}

impl CompiledField {
    pub fn default_value(&self) -> Value {
        (self.definition.default)(&self.options)
    }
}

/// A collection ready to be queried.
#[derive(Debug, Clone)]
pub struct CompiledCollection {
    pub definition: CollectionDefinition,
    pub fields: Vec<CompiledField>,
    pub table: TableSchema,
}

impl CompiledCollection {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn mode(&self) -> CollectionMode {
        self.definition.mode
    }

    pub fn is_translatable(&self) -> bool {
        self.definition.translatable
    }

    pub fn has_timestamps(&self) -> bool {
        self.definition.timestamps
    }

    pub fn has_public_pages(&self) -> bool {
        self.definition.public_pages
    }

    pub fn is_searchable(&self) -> bool {
        self.table.has_column(KEYWORDS_COLUMN)
    }

    pub fn field(&self, name: &str) -> Option<&CompiledField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` is a queryable column of this collection.
    pub fn has_column(&self, name: &str) -> bool {
        self.table.has_column(name)
    }

    /// The field owning a unique index.
    pub fn field_for_index(&self, index: &str) -> Option<&CompiledField> {
        self.fields
            .iter()
            .find(|f| f.unique_index.as_deref() == Some(index))
    }

    /// Fields feeding the search column, in declaration order.
    pub fn search_fields(&self) -> impl Iterator<Item = &CompiledField> {
        self.fields
            .iter()
            .filter(|f| self.definition.search.contains(&f.name))
    }
}

/// One compile problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostic {
    pub collection: String,
    pub field: Option<String>,
    pub error: RegistrationError,
}

/// Standard fields added to public page collections.
fn page_fields() -> Vec<CollectionField> {
    vec![
        CollectionField::new(PATH_FIELD, "text").unique(UniqueScope::PerLanguage),
        CollectionField::new(PUBLIC_FIELD, "switch"),
        CollectionField::new(DRAFT_TOKEN_FIELD, "text").options(json!({"default": null})),
    ]
}

/// Compile one collection.
///
/// Returns `None` only when the collection itself is unusable (bad name).
/// Individual bad fields are dropped and reported.
pub fn compile_collection(
    registry: &FieldRegistry,
    definition: &CollectionDefinition,
) -> (Option<CompiledCollection>, Vec<CompileDiagnostic>) {
    let name = definition.name.as_str();
    let mut diagnostics = Vec::new();
    let diag = |field: Option<&str>, error: RegistrationError| CompileDiagnostic {
        collection: name.to_string(),
        field: field.map(str::to_string),
        error,
    };

    if !is_identifier(name) {
        diagnostics.push(diag(
            None,
            RegistrationError::InvalidCollectionName(name.to_string()),
        ));
        return (None, diagnostics);
    }

    let mut declared: Vec<CollectionField> = definition.fields.clone();
    if definition.public_pages {
        for standard in page_fields() {
            if !declared.iter().any(|f| f.name == standard.name) {
                declared.push(standard);
            }
        }
    }

    let mut table = TableSchema::new(name);
    table
        .columns
        .push(ColumnSchema::new(ID_COLUMN, DbType::Text).primary_key());
    if definition.translatable {
        table
            .columns
            .push(ColumnSchema::new(LANGUAGE_COLUMN, DbType::Text).not_null());
        table
            .columns
            .push(ColumnSchema::new(TRANSLATIONS_COLUMN, DbType::Text).not_null());
        table.indexes.push(IndexSchema::new(
            name,
            vec![TRANSLATIONS_COLUMN.to_string()],
            false,
        ));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut fields = Vec::with_capacity(declared.len());

    for field in &declared {
        let field_name = field.name.as_str();

        if SYSTEM_COLUMNS.contains(&field_name) {
            diagnostics.push(diag(
                Some(field_name),
                RegistrationError::ReservedFieldName {
                    collection: name.to_string(),
                    field: field.name.clone(),
                },
            ));
            continue;
        }
        if !is_identifier(field_name) {
            diagnostics.push(diag(
                Some(field_name),
                RegistrationError::InvalidFieldIdentifier {
                    collection: name.to_string(),
                    field: field.name.clone(),
                },
            ));
            continue;
        }
        if !seen.insert(field_name) {
            diagnostics.push(diag(
                Some(field_name),
                RegistrationError::DuplicateCollectionField {
                    collection: name.to_string(),
                    field: field.name.clone(),
                },
            ));
            continue;
        }

        let Some(field_def) = registry.get(&field.field_type) else {
            diagnostics.push(diag(
                Some(field_name),
                RegistrationError::UnknownFieldType {
                    collection: name.to_string(),
                    field: field.name.clone(),
                    field_type: field.field_type.clone(),
                },
            ));
            continue;
        };

        if let Err(details) = field_def.check_options(&field.options) {
            diagnostics.push(diag(
                Some(field_name),
                RegistrationError::InvalidFieldOptions {
                    collection: name.to_string(),
                    field: field.name.clone(),
                    details,
                },
            ));
            continue;
        }

        table
            .columns
            .push(ColumnSchema::new(field_name, field_def.field_type.db));

        let unique_index = field.additional.unique.map(|scope| {
            let columns = if definition.translatable && scope == UniqueScope::PerLanguage {
                vec![field.name.clone(), LANGUAGE_COLUMN.to_string()]
            } else {
                vec![field.name.clone()]
            };
            let index = IndexSchema::new(name, columns, true);
            let index_name = index.name.clone();
            table.indexes.push(index);
            index_name
        });
        if field.additional.index && field.additional.unique.is_none() {
            table
                .indexes
                .push(IndexSchema::new(name, vec![field.name.clone()], false));
        }

        fields.push(CompiledField {
            name: field.name.clone(),
            required: field.additional.required || field_def.input_meta.required,
            definition: field_def,
            options: field.options.clone(),
            unique: field.additional.unique,
            unique_index,
            conditional_logic: field.additional.conditional_logic.clone(),
        });
    }

    if definition.timestamps {
        table
            .columns
            .push(ColumnSchema::new(CREATED_AT_COLUMN, DbType::BigInt).not_null());
        table
            .columns
            .push(ColumnSchema::new(UPDATED_AT_COLUMN, DbType::BigInt).not_null());
    }

    for search_field in &definition.search {
        if !fields.iter().any(|f| &f.name == search_field) {
            diagnostics.push(diag(
                Some(search_field.as_str()),
                RegistrationError::UnknownSearchField {
                    collection: name.to_string(),
                    field: search_field.clone(),
                },
            ));
        }
    }
    if fields.iter().any(|f| definition.search.contains(&f.name)) {
        table
            .columns
            .push(ColumnSchema::new(KEYWORDS_COLUMN, DbType::Text));
    }

    let compiled = CompiledCollection {
        definition: CollectionDefinition {
            fields: declared,
            ..definition.clone()
        },
        fields,
        table,
    };
    (Some(compiled), diagnostics)
}
