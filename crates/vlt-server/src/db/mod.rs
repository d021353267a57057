// db/mod.rs
// Unified database layer: rusqlite behind a deadpool pool, with sync
// functions (suffix `_sync`) designed to run inside pool.interact closures.

mod chunks;
mod conversations;
mod delta;
mod graph;
pub mod pool;
mod repo_map;
mod schema;
mod summary;
mod symbols;
mod threads;

pub use chunks::{
    FtsHit, chunk_by_id_sync, chunks_missing_embedding_sync, chunks_with_embeddings_sync,
    count_chunks_sync, delete_file_data_sync, fts_search_sync, get_chunks_by_file_sync,
    save_chunks_sync, set_chunk_embedding_sync,
};
pub use conversations::{
    find_active_conversation_sync, insert_conversation_sync, update_conversation_sync,
};
pub use delta::{
    delta_queue_stats_sync, promote_to_critical_sync, queued_entries_sync, set_delta_status_sync,
    upsert_delta_sync, DeltaQueueStats,
};
pub use graph::{
    code_node_by_name_sync, edges_for_target_sync, get_code_edges_sync, get_code_nodes_sync,
    save_graph_sync, update_centrality_sync,
};
pub use pool::DatabasePool;
pub use repo_map::{get_repo_map_sync, project_stats_sync, save_repo_map_sync, ProjectStats};
pub use schema::{rebuild_chunk_fts, run_all_migrations};
pub use summary::{delete_summary_cache_sync, get_summary_cache_sync, upsert_summary_cache_sync};
pub use symbols::{save_symbols_sync, symbols_by_name_sync};
pub use threads::{
    add_reference_sync, add_tag_sync, count_nodes_sync, get_or_create_project_sync,
    get_or_create_thread_sync, get_thread_sync, insert_node_sync, latest_node_sync,
    list_threads_sync, node_by_id_sync, node_embedding_candidates_sync, nodes_after_sequence_sync,
    nodes_in_order_sync, nodes_missing_embedding_sync, recent_nodes_sync, set_node_embedding_sync,
};

use chrono::{DateTime, Utc};

/// Parse an rfc3339 TEXT timestamp; malformed values collapse to the epoch
/// rather than failing the whole row.
pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
