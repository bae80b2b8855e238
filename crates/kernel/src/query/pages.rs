//! Public page lookup.

use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::error::QueryError;
use super::filter::Filter;
use crate::collection::{DRAFT_TOKEN_FIELD, PATH_FIELD, PUBLIC_FIELD};
use crate::field::is_truthy;
use crate::state::AppState;
use crate::store::Record;

/// Find the page at `path` in `language`.
///
/// A page is returned when it is public, or when `draft_token` matches the
/// page's non-empty draft token. Everything else looks like a missing page.
/// Public pages are served from the page cache when it is available.
pub async fn resolve_page(
    state: &AppState,
    collection: &str,
    path: &str,
    language: &str,
    draft_token: Option<&str>,
) -> Result<Option<Record>, QueryError> {
    let query = state.query(collection)?;
    if !query.compiled().has_public_pages() {
        return Err(QueryError::InvalidArgument(format!(
            "collection '{collection}' has no public pages"
        )));
    }

    if draft_token.is_none()
        && let Some(cached) = state.cache().get_page(collection, language, path).await
        && let Ok(page) = serde_json::from_str::<Record>(&cached)
    {
        return Ok(Some(page));
    }

    let Some(page) = query
        .where_eq(PATH_FIELD, path)
        .language(language)
        .populate()
        .first()
        .await?
    else {
        return Ok(None);
    };

    if page.get(PUBLIC_FIELD).is_some_and(is_truthy) {
        if let Ok(body) = serde_json::to_string(&page) {
            state
                .cache()
                .set_page(collection, language, path, &body)
                .await;
        }
        return Ok(Some(page));
    }

    let unlocked = match (
        draft_token,
        page.get(DRAFT_TOKEN_FIELD).and_then(Value::as_str),
    ) {
        (Some(given), Some(stored)) if !stored.is_empty() => {
            bool::from(given.as_bytes().ct_eq(stored.as_bytes()))
        }
        _ => false,
    };

    debug!(collection, path, unlocked, "draft page requested");
    Ok(unlocked.then_some(page))
}
