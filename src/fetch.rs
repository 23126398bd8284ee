//! Paginated retrieval: stitches windowed server pages into one ordered list.

use serde_json::Value;
use tracing::{debug, info};

use crate::contract::{ContentSource, PageQuery};
use crate::error::Result;

/// Fixed server-side window size; the source never returns more per request.
pub const PAGE_SIZE: u64 = 200;

/// Which collection of the namespace is being drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection<'a> {
    Entities(&'a str),
    Assets,
}

/// Fetch an entire entity collection by walking `(skip, take)` windows until
/// the declared total is reached. Windows are requested sequentially; `skip`
/// strictly increases, so the walk terminates even against a moving total.
/// No snapshot isolation: if the source mutates between windows the result is
/// best-effort consistent.
pub async fn fetch_all_entities(
    source: &dyn ContentSource,
    namespace: &str,
    entity_type: &str,
    filter: Option<String>,
    limit: Option<u64>,
) -> Result<Vec<Value>> {
    fetch_all(source, namespace, Collection::Entities(entity_type), filter, limit).await
}

/// Same walk over the namespace's asset collection.
pub async fn fetch_all_assets(
    source: &dyn ContentSource,
    namespace: &str,
    filter: Option<String>,
    limit: Option<u64>,
) -> Result<Vec<Value>> {
    fetch_all(source, namespace, Collection::Assets, filter, limit).await
}

async fn fetch_all(
    source: &dyn ContentSource,
    namespace: &str,
    collection: Collection<'_>,
    filter: Option<String>,
    limit: Option<u64>,
) -> Result<Vec<Value>> {
    let mut items: Vec<Value> = Vec::new();
    let mut skip: u64 = 0;

    loop {
        let remaining = limit.map(|l| l.saturating_sub(items.len() as u64));
        let take = match remaining {
            Some(0) => break,
            Some(r) => r.min(PAGE_SIZE),
            None => PAGE_SIZE,
        };
        let query = PageQuery {
            skip,
            take,
            filter: filter.clone(),
            sort: None,
        };
        let page = match collection {
            Collection::Entities(entity_type) => {
                source.fetch_page(namespace, entity_type, &query).await?
            }
            Collection::Assets => source.fetch_asset_page(namespace, &query).await?,
        };
        let received = page.items.len() as u64;
        debug!(
            ?collection,
            skip,
            take,
            received,
            total = page.total,
            "Fetched collection window"
        );
        items.extend(page.items);

        // An empty window below the declared total means the source is lying
        // or shrank mid-walk; stop rather than spin.
        if received == 0 || page.total <= skip + received {
            break;
        }
        skip += received;
    }

    if let Some(l) = limit {
        items.truncate(l as usize);
    }
    info!(?collection, count = items.len(), "Collection fully fetched");
    Ok(items)
}
