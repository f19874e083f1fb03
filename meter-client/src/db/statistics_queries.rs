use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::StatisticRecord;

/// Fetch the time-ordered statistics series for one stream.
pub async fn load_statistics(
    pool: &PgPool,
    statistic_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<StatisticRecord>> {
    let rows = sqlx::query_as::<_, StatisticRecord>(
        r#"
        SELECT
            ts,
            state,
            sum
        FROM energy_statistics
        WHERE statistic_id = $1
          AND ts >= $2
          AND ts <  $3
        ORDER BY ts
        "#,
    )
    .bind(statistic_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Most recent statistic written for a stream, if any.
///
/// Used to resume a stream's running sum after a restart instead of
/// re-importing the whole history.
pub async fn latest_statistic(pool: &PgPool, statistic_id: &str) -> Result<Option<StatisticRecord>> {
    let row = sqlx::query_as::<_, StatisticRecord>(
        r#"
        SELECT
            ts,
            state,
            sum
        FROM energy_statistics
        WHERE statistic_id = $1
        ORDER BY ts DESC
        LIMIT 1
        "#,
    )
    .bind(statistic_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
