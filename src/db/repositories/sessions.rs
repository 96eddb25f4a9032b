use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, to_i64, to_u64},
    models::WatchSession,
};

fn row_to_session(row: &Row) -> Result<WatchSession> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let duration_ms: Option<i64> = row.get("duration_ms")?;

    Ok(WatchSession {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        media_id: row.get("media_id")?,
        media_title: row.get("media_title")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        duration_ms: duration_ms
            .map(|ms| to_u64(ms, "duration_ms"))
            .transpose()?,
    })
}

impl Database {
    /// Inserts an open session row and returns its durably assigned id.
    pub async fn insert_session(
        &self,
        room_id: &str,
        media_id: &str,
        media_title: &str,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        let room_id = room_id.to_string();
        let media_id = media_id.to_string();
        let media_title = media_title.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (room_id, media_id, media_title, started_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![room_id, media_id, media_title, started_at.to_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn close_session(
        &self,
        session_id: i64,
        ended_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET ended_at = ?1,
                     duration_ms = ?2
                 WHERE id = ?3 AND ended_at IS NULL",
                params![ended_at.to_rfc3339(), to_i64(duration_ms)?, session_id],
            )?;
            Ok(())
        })
        .await
    }

    /// All sessions still open on disk, oldest first. Used by the
    /// crash-recovery bootstrap.
    pub async fn get_open_sessions(&self) -> Result<Vec<WatchSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, media_id, media_title, started_at, ended_at, duration_ms
                 FROM sessions
                 WHERE ended_at IS NULL
                 ORDER BY started_at ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    pub async fn get_session(&self, session_id: i64) -> Result<WatchSession> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, media_id, media_title, started_at, ended_at, duration_ms
                 FROM sessions
                 WHERE id = ?1",
            )?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))?
                .map_err(|e| anyhow::anyhow!("Failed to parse session: {}", e))?;

            Ok(session)
        })
        .await
    }
}
