use anyhow::{Context, Result};
use sqlx::MySqlPool;

const ATTENDANCE_SCHEMA: &str = include_str!("../migrations/0001_attendance_records.sql");

pub async fn init_db(database_url: &str) -> Result<MySqlPool> {
    let pool = MySqlPool::connect(database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::query(ATTENDANCE_SCHEMA)
        .execute(&pool)
        .await
        .context("Failed to create attendance_records table")?;

    Ok(pool)
}
