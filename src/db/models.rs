//! Database row types that do not map one-to-one onto a domain type.

#[derive(Debug, sqlx::FromRow)]
pub struct PreferenceRow {
    pub user_id: i64,
    /// JSON array of exchange names.
    pub exchanges: String,
    pub interval_minutes: i64,
}
