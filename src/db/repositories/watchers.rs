use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime},
    models::Watcher,
};

fn row_to_watcher(row: &Row) -> Result<Watcher> {
    let joined_at: String = row.get("joined_at")?;
    let left_at: Option<String> = row.get("left_at")?;
    let rewarded: i64 = row.get("rewarded")?;

    Ok(Watcher {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        username: row.get("username")?,
        joined_at: parse_datetime(&joined_at, "joined_at")?,
        left_at: parse_optional_datetime(left_at, "left_at")?,
        rewarded: rewarded != 0,
        reward_amount: row.get("reward_amount")?,
    })
}

impl Database {
    /// Inserts a participation window unless the user already has an
    /// open one for this session. Returns false when the guard fired.
    pub async fn insert_watcher(
        &self,
        session_id: i64,
        username: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<bool> {
        let username = username.to_string();
        self.execute(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM watchers
                     WHERE session_id = ?1 AND username = ?2 AND left_at IS NULL",
                    params![session_id, username],
                    |row| row.get(0),
                )
                .optional()?;

            if existing.is_some() {
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO watchers (id, session_id, username, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    session_id,
                    username,
                    joined_at.to_rfc3339(),
                ],
            )?;
            Ok(true)
        })
        .await
    }

    /// Closes the user's open window, if any.
    pub async fn mark_watcher_left(
        &self,
        session_id: i64,
        username: &str,
        left_at: DateTime<Utc>,
    ) -> Result<()> {
        let username = username.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE watchers
                 SET left_at = ?1
                 WHERE session_id = ?2 AND username = ?3 AND left_at IS NULL",
                params![left_at.to_rfc3339(), session_id, username],
            )?;
            Ok(())
        })
        .await
    }

    /// Closes every still-open window for a session in one pass.
    pub async fn close_active_watchers(
        &self,
        session_id: i64,
        left_at: DateTime<Utc>,
    ) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE watchers
                 SET left_at = ?1
                 WHERE session_id = ?2 AND left_at IS NULL",
                params![left_at.to_rfc3339(), session_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Records a payout against the user's open window only. Rows that
    /// already carry a left_at belong to earlier participation windows
    /// and are never revisited.
    pub async fn mark_watcher_rewarded(
        &self,
        session_id: i64,
        username: &str,
        amount: i64,
    ) -> Result<()> {
        let username = username.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE watchers
                 SET rewarded = 1,
                     reward_amount = ?1
                 WHERE session_id = ?2 AND username = ?3 AND left_at IS NULL",
                params![amount, session_id, username],
            )?;
            Ok(())
        })
        .await
    }

    /// Open, not-yet-rewarded windows for a session. The bootstrap uses
    /// this to decide which watchers are candidates for resumption.
    pub async fn get_active_watchers(&self, session_id: i64) -> Result<Vec<Watcher>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, username, joined_at, left_at, rewarded, reward_amount
                 FROM watchers
                 WHERE session_id = ?1 AND left_at IS NULL AND rewarded = 0
                 ORDER BY joined_at ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut watchers = Vec::new();
            while let Some(row) = rows.next()? {
                watchers.push(row_to_watcher(row)?);
            }

            Ok(watchers)
        })
        .await
    }

    pub async fn get_watchers_for_session(&self, session_id: i64) -> Result<Vec<Watcher>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, username, joined_at, left_at, rewarded, reward_amount
                 FROM watchers
                 WHERE session_id = ?1
                 ORDER BY joined_at ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut watchers = Vec::new();
            while let Some(row) = rows.next()? {
                watchers.push(row_to_watcher(row)?);
            }

            Ok(watchers)
        })
        .await
    }
}
