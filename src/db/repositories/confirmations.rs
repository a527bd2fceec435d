use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{helpers::parse_datetime, models::ConfirmationRecord, Database};

fn row_to_confirmation(row: &Row) -> Result<ConfirmationRecord> {
    let confirmed_at: String = row.get("confirmed_at")?;
    Ok(ConfirmationRecord {
        identity: row.get("identity")?,
        confirmed_at: parse_datetime(&confirmed_at, "confirmed_at")?,
    })
}

impl Database {
    pub fn list_confirmations(&self) -> Result<Vec<ConfirmationRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT identity, confirmed_at
                 FROM confirmed_targets
                 ORDER BY confirmed_at ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_confirmation(row)?);
            }
            Ok(records)
        })
    }

    /// Insert or refresh a confirmation; confirming twice is harmless.
    pub fn upsert_confirmation(&self, identity: &str, confirmed_at: DateTime<Utc>) -> Result<()> {
        let identity = identity.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO confirmed_targets (identity, confirmed_at)
                 VALUES (?1, ?2)
                 ON CONFLICT(identity) DO UPDATE SET confirmed_at = excluded.confirmed_at",
                params![identity, confirmed_at.to_rfc3339()],
            )
            .with_context(|| "failed to upsert confirmation")?;
            Ok(())
        })
    }

    pub fn delete_confirmation(&self, identity: &str) -> Result<()> {
        let identity = identity.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM confirmed_targets WHERE identity = ?1",
                params![identity],
            )
            .with_context(|| "failed to delete confirmation")?;
            Ok(())
        })
    }
}
