//! The built-in `users` collection.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::password::hash_password;
use crate::collection::{CollectionDefinition, CollectionField, UniqueScope};
use crate::hook::{Hook, HookContext};

pub const USERS_COLLECTION: &str = "users";

const PASSWORD_FIELD: &str = "password";

pub fn users_collection() -> CollectionDefinition {
    CollectionDefinition::new(USERS_COLLECTION)
        .field(
            CollectionField::new("email", "email")
                .required()
                .unique(UniqueScope::AllLanguages),
        )
        .field(
            CollectionField::new(PASSWORD_FIELD, "text")
                .required()
                .options(json!({"minLength": 8})),
        )
        .field(CollectionField::new("first_name", "text"))
        .field(CollectionField::new("last_name", "text"))
        .field(CollectionField::new("is_active", "switch").options(json!({"default": true})))
        .field(CollectionField::new("is_admin", "switch"))
        .field(CollectionField::new("capabilities", "json").options(json!({"default": []})))
}

/// Replaces a plain-text password in create/update input with its hash.
pub struct PasswordHook;

#[async_trait]
impl Hook for PasswordHook {
    async fn call(&self, ctx: &mut HookContext) -> anyhow::Result<()> {
        let Some(input) = ctx.input.as_mut() else {
            return Ok(());
        };
        let Some(plain) = input
            .get(PASSWORD_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(());
        };

        let hash = tokio::task::spawn_blocking(move || hash_password(&plain)).await??;
        input.insert(PASSWORD_FIELD.to_string(), Value::from(hash));
        Ok(())
    }
}

/// Password hashes never leave the kernel.
pub fn strip_passwords(ctx: &mut HookContext) -> anyhow::Result<()> {
    for record in &mut ctx.records {
        record.remove(PASSWORD_FIELD);
    }
    Ok(())
}
