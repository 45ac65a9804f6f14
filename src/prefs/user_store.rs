use std::collections::BTreeSet;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::{
    DEFAULT_PUSH_INTERVAL_MINUTES, MAX_PUSH_INTERVAL_MINUTES, MIN_PUSH_INTERVAL_MINUTES,
};
use crate::db::models::PreferenceRow;
use crate::error::{AppError, Result};
use crate::types::UserPreference;

/// Conditional-write rounds a toggle gets before giving up.
const TOGGLE_ATTEMPTS: u32 = 8;

/// Per-user exchange selection and push interval.
///
/// Plain key-value semantics: nothing here relates one user to another. The
/// "at least two exchanges" rule is applied by readers, not on write.
#[derive(Clone)]
pub struct UserPreferenceStore {
    pool: SqlitePool,
    known_exchanges: BTreeSet<String>,
}

impl UserPreferenceStore {
    pub fn new(pool: SqlitePool, known_exchanges: &[String]) -> Self {
        Self {
            pool,
            known_exchanges: known_exchanges.iter().cloned().collect(),
        }
    }

    /// Full preference record; defaults for a user never seen before.
    pub async fn get(&self, user_id: i64) -> Result<UserPreference> {
        let row = sqlx::query_as::<_, PreferenceRow>(
            "SELECT user_id, exchanges, interval_minutes FROM user_preference WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => self.from_row(row),
            None => UserPreference {
                user_id,
                exchanges: Vec::new(),
                interval_minutes: DEFAULT_PUSH_INTERVAL_MINUTES,
            },
        })
    }

    pub async fn get_selection(&self, user_id: i64) -> Result<Vec<String>> {
        Ok(self.get(user_id).await?.exchanges)
    }

    /// Replace the selection. Every name must be a known exchange.
    /// Returns the stored (sorted, deduplicated) selection.
    pub async fn set_selection(&self, user_id: i64, exchanges: &[String]) -> Result<Vec<String>> {
        let selection = self.validate_selection(exchanges)?;
        let encoded = serde_json::to_string(&selection)?;
        sqlx::query(
            r#"
            INSERT INTO user_preference (user_id, exchanges, interval_minutes)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                exchanges = excluded.exchanges
            "#,
        )
        .bind(user_id)
        .bind(encoded)
        .bind(i64::from(DEFAULT_PUSH_INTERVAL_MINUTES))
        .execute(&self.pool)
        .await?;
        debug!(user_id, exchanges = ?selection, "Selection updated");
        Ok(selection)
    }

    /// Add `exchange` to the selection if absent, remove it if present.
    ///
    /// Each attempt is a single conditional write against the value it read,
    /// never a read transaction upgraded to a write. A lost race re-reads.
    pub async fn toggle_exchange(&self, user_id: i64, exchange: &str) -> Result<Vec<String>> {
        let name = self.validate_exchange(exchange)?;

        for attempt in 1..=TOGGLE_ATTEMPTS {
            let stored: Option<String> =
                sqlx::query_scalar("SELECT exchanges FROM user_preference WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?;

            let mut selection: BTreeSet<String> = stored
                .as_deref()
                .map(|raw| self.decode_exchanges(user_id, raw))
                .unwrap_or_default()
                .into_iter()
                .collect();
            if !selection.remove(&name) {
                selection.insert(name.clone());
            }
            let selection: Vec<String> = selection.into_iter().collect();
            let encoded = serde_json::to_string(&selection)?;

            let res = match &stored {
                Some(raw) => {
                    sqlx::query(
                        r#"
                        UPDATE user_preference SET exchanges = ?
                        WHERE user_id = ? AND exchanges = ?
                        "#,
                    )
                    .bind(&encoded)
                    .bind(user_id)
                    .bind(raw)
                    .execute(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO user_preference (user_id, exchanges, interval_minutes)
                        VALUES (?, ?, ?)
                        ON CONFLICT(user_id) DO NOTHING
                        "#,
                    )
                    .bind(user_id)
                    .bind(&encoded)
                    .bind(i64::from(DEFAULT_PUSH_INTERVAL_MINUTES))
                    .execute(&self.pool)
                    .await?
                }
            };

            if res.rows_affected() == 1 {
                debug!(user_id, exchanges = ?selection, "Selection toggled");
                return Ok(selection);
            }
            debug!(user_id, attempt, "Selection changed underneath toggle, retrying");
        }

        Err(AppError::Conflict(format!(
            "selection for user {user_id} kept changing, toggle not applied"
        )))
    }

    pub async fn get_interval(&self, user_id: i64) -> Result<u32> {
        Ok(self.get(user_id).await?.interval_minutes)
    }

    /// Rejects values outside the allowed minute range.
    pub async fn set_interval(&self, user_id: i64, minutes: u32) -> Result<()> {
        validate_interval(minutes)?;

        sqlx::query(
            r#"
            INSERT INTO user_preference (user_id, exchanges, interval_minutes)
            VALUES (?, '[]', ?)
            ON CONFLICT(user_id) DO UPDATE SET
                interval_minutes = excluded.interval_minutes
            "#,
        )
        .bind(user_id)
        .bind(i64::from(minutes))
        .execute(&self.pool)
        .await?;

        debug!(user_id, minutes, "Interval updated");
        Ok(())
    }

    /// Every user with a stored record.
    pub async fn users(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT user_id FROM user_preference ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    pub fn known_exchanges(&self) -> Vec<String> {
        self.known_exchanges.iter().cloned().collect()
    }

    fn validate_exchange(&self, exchange: &str) -> Result<String> {
        let name = exchange.trim().to_lowercase();
        if self.known_exchanges.contains(&name) {
            Ok(name)
        } else {
            Err(AppError::InvalidInput(format!("unknown exchange: {exchange}")))
        }
    }

    fn validate_selection(&self, exchanges: &[String]) -> Result<Vec<String>> {
        let mut selection = BTreeSet::new();
        for exchange in exchanges {
            selection.insert(self.validate_exchange(exchange)?);
        }
        Ok(selection.into_iter().collect())
    }

    /// Drops names no longer in the known set (e.g. after a config change).
    fn decode_exchanges(&self, user_id: i64, raw: &str) -> Vec<String> {
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(list) => list
                .into_iter()
                .filter(|e| self.known_exchanges.contains(e))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Err(e) => {
                warn!(user_id, "Unreadable stored selection, treating as empty: {e}");
                Vec::new()
            }
        }
    }

    fn from_row(&self, row: PreferenceRow) -> UserPreference {
        let interval_minutes = u32::try_from(row.interval_minutes)
            .unwrap_or(DEFAULT_PUSH_INTERVAL_MINUTES)
            .clamp(MIN_PUSH_INTERVAL_MINUTES, MAX_PUSH_INTERVAL_MINUTES);
        UserPreference {
            user_id: row.user_id,
            exchanges: self.decode_exchanges(row.user_id, &row.exchanges),
            interval_minutes,
        }
    }
}

pub fn validate_interval(minutes: u32) -> Result<()> {
    if (MIN_PUSH_INTERVAL_MINUTES..=MAX_PUSH_INTERVAL_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "interval must be between {MIN_PUSH_INTERVAL_MINUTES} and \
             {MAX_PUSH_INTERVAL_MINUTES} minutes, got {minutes}"
        )))
    }
}
