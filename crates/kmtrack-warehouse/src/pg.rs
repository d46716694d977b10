//! Postgres-backed warehouse client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::client::{TravelFilter, Warehouse, WarehouseError};
use crate::models::{TelemetryRow, TravelCostRow, TravelRow};
use crate::query::{render_where, BindValue, Table};

/// [`Warehouse`] implementation over a Postgres connection pool.
#[derive(Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bind_values<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    binds: &'q [BindValue],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for bind in binds {
        query = match bind {
            BindValue::Timestamp(t) => query.bind(*t),
            BindValue::Int(i) => query.bind(*i),
            BindValue::Text(s) => query.bind(s.as_str()),
            BindValue::Uuid(u) => query.bind(*u),
        };
    }
    query
}

fn travel_cost_row(row: &PgRow) -> Result<TravelCostRow, sqlx::Error> {
    Ok(TravelCostRow {
        travel_id: row.try_get("travel_id")?,
        datetime: row.try_get("datetime")?,
        full_distance: row.try_get("full_distance")?,
        unit_id: row.try_get("unit_id")?,
        fix_cost: row.try_get("fix_cost")?,
        variable_km: row.try_get("variable_km")?,
    })
}

fn travel_row(row: &PgRow) -> Result<TravelRow, sqlx::Error> {
    Ok(TravelRow {
        travel_id: row.try_get("travel_id")?,
        datetime: row.try_get("datetime")?,
        full_distance: row.try_get("full_distance")?,
        unit_id: row.try_get("unit_id")?,
    })
}

#[async_trait]
impl Warehouse for PgWarehouse {
    #[instrument(skip(self))]
    async fn upsert_vehicle(&self, plate: &str) -> Result<Uuid, WarehouseError> {
        let row = sqlx::query(
            r#"
            INSERT INTO vehicles (id, plate, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (plate) DO UPDATE SET plate = EXCLUDED.plate
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(plate)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id").map_err(WarehouseError::from)?)
    }

    #[instrument(skip(self, rows), fields(table = %table, rows = rows.len()))]
    async fn insert_rows(
        &self,
        table: Table,
        rows: &[TelemetryRow],
    ) -> Result<u64, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Table comes from a closed enum; this is not caller input.
        let sql = format!(
            r#"
            INSERT INTO {} (
                vehicle_plate, driver, date, distance_km, duration_minutes,
                idle_minutes, odometer_start, odometer_end, distance_delta,
                consolidated_cost, expected_distance, divergent, score
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
            table.name()
        );

        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&sql)
                .bind(&row.vehicle_plate)
                .bind(&row.driver)
                .bind(row.date)
                .bind(row.distance_km)
                .bind(row.duration_minutes)
                .bind(row.idle_minutes)
                .bind(row.odometer_start)
                .bind(row.odometer_end)
                .bind(row.distance_delta)
                .bind(row.consolidated_cost)
                .bind(row.expected_distance)
                .bind(row.divergent)
                .bind(row.score)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(count = rows.len(), table = table.name(), "Inserted rows");
        Ok(rows.len() as u64)
    }

    #[instrument(skip(self, filter))]
    async fn fetch_travel_costs(
        &self,
        filter: &TravelFilter,
    ) -> Result<Vec<TravelCostRow>, WarehouseError> {
        let clause = render_where(&filter.predicates, 1);
        let sql = format!(
            r#"
            SELECT
                t.id AS travel_id,
                t.datetime,
                t.full_distance,
                t.unit_id,
                b.fix_cost,
                b.variable_km
            FROM travels t
            LEFT JOIN bills b ON b.travel_id = t.id{}
            ORDER BY t.datetime ASC
            "#,
            clause.sql
        );

        let rows = bind_values(sqlx::query(&sql), &clause.binds)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| travel_cost_row(r).map_err(WarehouseError::from))
            .collect()
    }

    #[instrument(skip(self, filter))]
    async fn fetch_travels(&self, filter: &TravelFilter) -> Result<Vec<TravelRow>, WarehouseError> {
        let clause = render_where(&filter.predicates, 1);
        let sql = format!(
            r#"
            SELECT
                t.id AS travel_id,
                t.datetime,
                t.full_distance,
                t.unit_id
            FROM travels t{}
            ORDER BY t.datetime ASC
            "#,
            clause.sql
        );

        let rows = bind_values(sqlx::query(&sql), &clause.binds)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| travel_row(r).map_err(WarehouseError::from))
            .collect()
    }

    #[instrument(skip(self))]
    async fn travel_created_at(
        &self,
        travel_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, WarehouseError> {
        let row = sqlx::query("SELECT created_at FROM travels WHERE id = $1")
            .bind(travel_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(r.try_get("created_at").map_err(WarehouseError::from)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn delete_stops(&self, travel_id: Uuid) -> Result<u64, WarehouseError> {
        let result = sqlx::query("DELETE FROM stops WHERE travel_id = $1")
            .bind(travel_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete_bill(&self, travel_id: Uuid) -> Result<u64, WarehouseError> {
        let result = sqlx::query("DELETE FROM bills WHERE travel_id = $1")
            .bind(travel_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete_travel(&self, travel_id: Uuid) -> Result<u64, WarehouseError> {
        let result = sqlx::query("DELETE FROM travels WHERE id = $1")
            .bind(travel_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
