// db/conversations.rs
// Oracle conversation rows. The exchange log is one JSON blob, always
// replaced as a whole — no partial merges.

use super::parse_ts;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use vlt_types::{ConversationStatus, Exchange, OracleConversation};

const CONV_COLUMNS: &str = "id, project_id, user_id, token_budget, tokens_used, \
     compressed_summary, recent_exchanges, status, last_activity, expires_at, \
     compression_count, mentioned_symbols, mentioned_files";

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OracleConversation> {
    let exchanges_json: String = row.get(6)?;
    let status: String = row.get(7)?;
    let last_activity: String = row.get(8)?;
    let expires_at: String = row.get(9)?;
    let symbols: String = row.get(11)?;
    let files: String = row.get(12)?;

    let recent_exchanges: Vec<Exchange> = serde_json::from_str(&exchanges_json).unwrap_or_default();

    Ok(OracleConversation {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        token_budget: row.get::<_, i64>(3)? as usize,
        tokens_used: row.get::<_, i64>(4)? as usize,
        compressed_summary: row.get(5)?,
        recent_exchanges,
        status: ConversationStatus::parse(&status).unwrap_or(ConversationStatus::Active),
        last_activity: parse_ts(&last_activity),
        expires_at: parse_ts(&expires_at),
        compression_count: row.get::<_, i64>(10)? as u32,
        mentioned_symbols: split_csv(&symbols),
        mentioned_files: split_csv(&files),
    })
}

fn split_csv(s: &str) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split(',').map(|p| p.to_string()).collect()
    }
}

/// Find the active, unexpired conversation for (project, user).
pub fn find_active_conversation_sync(
    conn: &Connection,
    project_id: &str,
    user_id: &str,
    cutoff: DateTime<Utc>,
) -> rusqlite::Result<Option<OracleConversation>> {
    conn.query_row(
        &format!(
            "SELECT {CONV_COLUMNS} FROM oracle_conversations
             WHERE project_id = ? AND user_id = ? AND status = 'active' AND last_activity > ?
             ORDER BY last_activity DESC LIMIT 1"
        ),
        params![project_id, user_id, cutoff.to_rfc3339()],
        conversation_from_row,
    )
    .optional()
}

pub fn insert_conversation_sync(
    conn: &Connection,
    conversation: &OracleConversation,
) -> rusqlite::Result<()> {
    let exchanges_json = serde_json::to_string(&conversation.recent_exchanges)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        &format!(
            "INSERT INTO oracle_conversations ({CONV_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        params![
            conversation.id,
            conversation.project_id,
            conversation.user_id,
            conversation.token_budget as i64,
            conversation.tokens_used as i64,
            conversation.compressed_summary,
            exchanges_json,
            conversation.status.as_str(),
            conversation.last_activity.to_rfc3339(),
            conversation.expires_at.to_rfc3339(),
            conversation.compression_count as i64,
            conversation.mentioned_symbols.join(","),
            conversation.mentioned_files.join(","),
        ],
    )?;
    Ok(())
}

/// Replace the whole mutable portion of the row, including the JSON blob.
pub fn update_conversation_sync(
    conn: &Connection,
    conversation: &OracleConversation,
) -> rusqlite::Result<()> {
    let exchanges_json = serde_json::to_string(&conversation.recent_exchanges)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "UPDATE oracle_conversations SET
            token_budget = ?, tokens_used = ?, compressed_summary = ?,
            recent_exchanges = ?, status = ?, last_activity = ?, expires_at = ?,
            compression_count = ?, mentioned_symbols = ?, mentioned_files = ?
         WHERE id = ?",
        params![
            conversation.token_budget as i64,
            conversation.tokens_used as i64,
            conversation.compressed_summary,
            exchanges_json,
            conversation.status.as_str(),
            conversation.last_activity.to_rfc3339(),
            conversation.expires_at.to_rfc3339(),
            conversation.compression_count as i64,
            conversation.mentioned_symbols.join(","),
            conversation.mentioned_files.join(","),
            conversation.id,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_all_migrations;
    use chrono::Duration;

    fn test_conversation(id: &str, last_activity: DateTime<Utc>) -> OracleConversation {
        OracleConversation {
            id: id.to_string(),
            project_id: "p".to_string(),
            user_id: "u".to_string(),
            token_budget: 16000,
            tokens_used: 0,
            compressed_summary: None,
            recent_exchanges: Vec::new(),
            status: ConversationStatus::Active,
            last_activity,
            expires_at: last_activity + Duration::hours(24),
            compression_count: 0,
            mentioned_symbols: Vec::new(),
            mentioned_files: Vec::new(),
        }
    }

    #[test]
    fn test_find_active_respects_expiry_window() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        let now = Utc::now();
        insert_conversation_sync(&conn, &test_conversation("stale", now - Duration::hours(30)))
            .unwrap();
        insert_conversation_sync(&conn, &test_conversation("fresh", now - Duration::hours(1)))
            .unwrap();

        let cutoff = now - Duration::hours(24);
        let found = find_active_conversation_sync(&conn, "p", "u", cutoff)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "fresh");
    }

    #[test]
    fn test_update_replaces_blob_as_whole() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        let mut conv = test_conversation("c1", Utc::now());
        insert_conversation_sync(&conn, &conv).unwrap();

        conv.recent_exchanges.push(Exchange {
            tool_name: "ask_oracle".to_string(),
            input_data: serde_json::json!({"question": "q"}),
            output_summary: "a".to_string(),
            key_insights: vec![],
            mentioned_symbols: vec![],
            mentioned_files: vec![],
            token_count: 4,
            timestamp: Utc::now(),
        });
        conv.tokens_used = 4;
        conv.mentioned_symbols = vec!["Foo".to_string(), "bar_baz".to_string()];
        update_conversation_sync(&conn, &conv).unwrap();

        let cutoff = Utc::now() - Duration::hours(24);
        let loaded = find_active_conversation_sync(&conn, "p", "u", cutoff)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.recent_exchanges.len(), 1);
        assert_eq!(loaded.tokens_used, 4);
        assert_eq!(loaded.mentioned_symbols, vec!["Foo", "bar_baz"]);
    }
}
