use std::sync::Arc;

use indexcore_common::{DocId, Embedder, IndexKind, Result};
use indexcore_engine::{ContextRegistry, IndexRegistry, SearchHit};

/// The library's public search surface: picks `instance`'s shards of `kind`,
/// loads each with a freshly issued token, searches it, releases the token,
/// and merges the top `k` hits by score across every shard. No HTTP surface
/// sits in front of this; callers embed the crate and call it directly.
pub fn search(
    indexes: &IndexRegistry,
    context: &ContextRegistry,
    embedder: &dyn Embedder,
    instance: u64,
    kind: IndexKind,
    query_text: &str,
    k: usize,
) -> Result<Vec<SearchHit>> {
    let shards = indexes.get(instance, kind)?;
    if shards.is_empty() {
        return Ok(Vec::new());
    }

    let query_vector = if kind == IndexKind::Vector {
        embedder.encode(&[query_text]).pop().unwrap_or_default()
    } else {
        Vec::new()
    };

    let mut merged: Vec<SearchHit> = Vec::new();
    for shard in &shards {
        let token = context.generate();
        let result = shard.load(token).and_then(|_| shard.search(&query_vector, query_text, k));
        shard.release(token);
        context.release(token);
        match result {
            Ok(hits) => merged.extend(hits),
            Err(err) => log::warn!("search skipped shard {}: {err}", shard.path().display()),
        }
    }

    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(k);
    Ok(merged)
}

/// Convenience overload taking an `Arc<IndexRegistry>` etc., matching how
/// the bootstrap binary holds its dependencies.
pub fn search_shared(
    indexes: &Arc<IndexRegistry>,
    context: &Arc<ContextRegistry>,
    embedder: &Arc<dyn Embedder>,
    instance: u64,
    kind: IndexKind,
    query_text: &str,
    k: usize,
) -> Result<Vec<(DocId, f32)>> {
    let hits = search(indexes, context, embedder.as_ref(), instance, kind, query_text, k)?;
    Ok(hits.into_iter().map(|hit| (hit.id, hit.score)).collect())
}
