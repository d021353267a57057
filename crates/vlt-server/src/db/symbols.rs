// db/symbols.rs
// Symbol definitions from the external ctags index

use rusqlite::{Connection, params};
use vlt_types::SymbolDefinition;

const SYMBOL_COLUMNS: &str = "id, project_id, name, file_path, line, kind, scope, signature, language";

fn symbol_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolDefinition> {
    Ok(SymbolDefinition {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        file_path: row.get(3)?,
        line: row.get(4)?,
        kind: row.get(5)?,
        scope: row.get(6)?,
        signature: row.get(7)?,
        language: row.get(8)?,
    })
}

/// Insert a batch of symbol definitions in one transaction.
pub fn save_symbols_sync(
    conn: &Connection,
    symbols: &[SymbolDefinition],
    project_id: &str,
) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    for sym in symbols {
        tx.execute(
            &format!("INSERT INTO symbol_definitions ({SYMBOL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                sym.id,
                project_id,
                sym.name,
                sym.file_path,
                sym.line,
                sym.kind,
                sym.scope,
                sym.signature,
                sym.language,
            ],
        )?;
    }
    tx.commit()?;
    Ok(symbols.len())
}

/// All symbol definitions matching a name, file order.
pub fn symbols_by_name_sync(
    conn: &Connection,
    project_id: &str,
    name: &str,
) -> rusqlite::Result<Vec<SymbolDefinition>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SYMBOL_COLUMNS} FROM symbol_definitions
         WHERE project_id = ? AND name = ? ORDER BY file_path, line"
    ))?;
    let rows = stmt
        .query_map(params![project_id, name], symbol_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_all_migrations;

    #[test]
    fn test_save_and_lookup() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        let symbols = vec![SymbolDefinition {
            id: "s1".to_string(),
            project_id: "p".to_string(),
            name: "authenticate_user".to_string(),
            file_path: "src/auth.py".to_string(),
            line: 42,
            kind: "function".to_string(),
            scope: None,
            signature: Some("def authenticate_user(username, password)".to_string()),
            language: "python".to_string(),
        }];
        save_symbols_sync(&conn, &symbols, "p").unwrap();

        let found = symbols_by_name_sync(&conn, "p", "authenticate_user").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_path, "src/auth.py");
        assert_eq!(found[0].line, 42);

        assert!(symbols_by_name_sync(&conn, "p", "missing").unwrap().is_empty());
    }
}
