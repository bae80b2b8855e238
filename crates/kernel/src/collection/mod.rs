//! Collections: user-defined content types compiled into tables.

mod compiler;
mod definition;
mod registry;

pub use compiler::{
    CompileDiagnostic, CompiledCollection, CompiledField, SYSTEM_COLUMNS, compile_collection,
};
pub use definition::{
    CollectionDefinition, CollectionField, CollectionMode, DRAFT_TOKEN_FIELD, FieldAdditional,
    PATH_FIELD, PUBLIC_FIELD, UniqueScope, is_identifier,
};
pub use registry::CollectionRegistry;
