//! Postgres-backed store.
//!
//! The schema lives in `engine/schema.sql`. Conversions are persisted as a
//! JSONB body (the locked quote and history are nested documents) plus
//! extracted columns for lookups; everything else is flat columns. The
//! `applied_events` primary key on `(conversion_id, event_key)` is the
//! unique constraint behind exactly-once event application.

use async_trait::async_trait;
use cambio_common::{
    AffiliateId, CambioError, CommissionId, Conversion, ConversionId, Currency, CustomerId,
    EventKey, Money, Result, Timestamp,
};
use cambio_ledger::{
    BalanceAmounts, BalanceSnapshot, CommissionEntry, CommissionStatus, EntryPair, LedgerEntry,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

use super::{CommissionFilter, ConversionStore};

/// Store backed by a Postgres connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .map_err(storage_err)?;
        Ok(Self::new(pool))
    }

    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn conversion_from_row(row: &PgRow) -> Result<Conversion> {
        let body: serde_json::Value = row.try_get("body").map_err(storage_err)?;
        serde_json::from_value(body)
            .map_err(|e| CambioError::Storage(format!("corrupt conversion body: {e}")))
    }

    fn commission_from_row(row: &PgRow) -> Result<CommissionEntry> {
        let id: Uuid = row.try_get("id").map_err(storage_err)?;
        let conversion_id: Uuid = row.try_get("conversion_id").map_err(storage_err)?;
        let affiliate_id: String = row.try_get("affiliate_id").map_err(storage_err)?;
        let amount_brl: i64 = row.try_get("amount_brl_minor").map_err(storage_err)?;
        let amount_usdt: i64 = row.try_get("amount_usdt_minor").map_err(storage_err)?;
        let status: String = row.try_get("status").map_err(storage_err)?;
        let created_at: Timestamp = row.try_get("created_at").map_err(storage_err)?;
        let paid_at: Option<Timestamp> = row.try_get("paid_at").map_err(storage_err)?;

        Ok(CommissionEntry {
            id: CommissionId::from_uuid(id),
            conversion_id: ConversionId::from_uuid(conversion_id),
            affiliate_id: AffiliateId::new(affiliate_id),
            amount_brl: Money::new(amount_brl, Currency::Brl),
            amount_usdt: Money::new(amount_usdt, Currency::Usdt),
            status: CommissionStatus::from_str(&status).map_err(CambioError::Storage)?,
            created_at,
            paid_at,
        })
    }

    fn balance_from_row(row: &PgRow) -> Result<BalanceSnapshot> {
        let customer_id: String = row.try_get("customer_id").map_err(storage_err)?;
        let brl_available: i64 = row.try_get("brl_available").map_err(storage_err)?;
        let brl_locked: i64 = row.try_get("brl_locked").map_err(storage_err)?;
        let usdt_available: i64 = row.try_get("usdt_available").map_err(storage_err)?;
        let usdt_locked: i64 = row.try_get("usdt_locked").map_err(storage_err)?;
        let updated_at: Timestamp = row.try_get("updated_at").map_err(storage_err)?;

        Ok(BalanceSnapshot {
            customer_id: CustomerId::new(customer_id),
            brl: BalanceAmounts {
                available: Money::new(brl_available, Currency::Brl),
                locked: Money::new(brl_locked, Currency::Brl),
            },
            usdt: BalanceAmounts {
                available: Money::new(usdt_available, Currency::Usdt),
                locked: Money::new(usdt_locked, Currency::Usdt),
            },
            updated_at,
        })
    }

    fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
        let body: serde_json::Value = row.try_get("body").map_err(storage_err)?;
        serde_json::from_value(body)
            .map_err(|e| CambioError::Storage(format!("corrupt ledger entry body: {e}")))
    }

    async fn upsert_conversion<'e, E>(conversion: &Conversion, executor: E) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let body = serde_json::to_value(conversion)
            .map_err(|e| CambioError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO conversions (id, customer_id, status, affiliate_id, provider_ref, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                provider_ref = EXCLUDED.provider_ref,
                body = EXCLUDED.body,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(conversion.id.as_uuid())
        .bind(conversion.customer_id.as_str())
        .bind(format!("{:?}", conversion.status).to_uppercase())
        .bind(conversion.affiliate_id.as_ref().map(|a| a.as_str().to_string()))
        .bind(conversion.provider_ref.clone())
        .bind(body)
        .bind(conversion.created_at)
        .bind(conversion.updated_at)
        .execute(executor)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn upsert_balance<'e, E>(balance: &BalanceSnapshot, executor: E) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO balances (customer_id, brl_available, brl_locked, usdt_available, usdt_locked, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (customer_id) DO UPDATE
            SET brl_available = EXCLUDED.brl_available,
                brl_locked = EXCLUDED.brl_locked,
                usdt_available = EXCLUDED.usdt_available,
                usdt_locked = EXCLUDED.usdt_locked,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(balance.customer_id.as_str())
        .bind(balance.brl.available.minor_units)
        .bind(balance.brl.locked.minor_units)
        .bind(balance.usdt.available.minor_units)
        .bind(balance.usdt.locked.minor_units)
        .bind(balance.updated_at)
        .execute(executor)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn insert_entry<'e, E>(entry: &LedgerEntry, executor: E) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let body =
            serde_json::to_value(entry).map_err(|e| CambioError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, conversion_id, customer_id, body, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.conversion_id.as_uuid())
        .bind(entry.customer_id.as_str())
        .bind(body)
        .bind(entry.created_at)
        .execute(executor)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn insert_commission<'e, E>(entry: &CommissionEntry, executor: E) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        // The UNIQUE constraint on conversion_id is the defense-in-depth
        // backstop: a second entry for the same conversion fails loudly.
        sqlx::query(
            r#"
            INSERT INTO commission_entries
                (id, conversion_id, affiliate_id, amount_brl_minor, amount_usdt_minor, status, created_at, paid_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.conversion_id.as_uuid())
        .bind(entry.affiliate_id.as_str())
        .bind(entry.amount_brl.minor_units)
        .bind(entry.amount_usdt.minor_units)
        .bind(entry.status.as_str())
        .bind(entry.created_at)
        .bind(entry.paid_at)
        .execute(executor)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

#[async_trait]
impl ConversionStore for PgStore {
    async fn insert_conversion(&self, conversion: &Conversion) -> Result<()> {
        Self::upsert_conversion(conversion, &self.pool).await
    }

    async fn update_conversion(&self, conversion: &Conversion) -> Result<()> {
        Self::upsert_conversion(conversion, &self.pool).await
    }

    async fn get_conversion(&self, id: ConversionId) -> Result<Option<Conversion>> {
        let row = sqlx::query("SELECT body FROM conversions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|r| Self::conversion_from_row(&r)).transpose()
    }

    async fn conversion_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<Conversion>> {
        let row = sqlx::query("SELECT body FROM conversions WHERE provider_ref = $1")
            .bind(provider_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|r| Self::conversion_from_row(&r)).transpose()
    }

    async fn get_balance(&self, customer_id: &CustomerId) -> Result<Option<BalanceSnapshot>> {
        let row = sqlx::query("SELECT * FROM balances WHERE customer_id = $1")
            .bind(customer_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|r| Self::balance_from_row(&r)).transpose()
    }

    async fn put_balance(&self, balance: &BalanceSnapshot) -> Result<()> {
        Self::upsert_balance(balance, &self.pool).await
    }

    async fn entries_for_conversion(&self, id: ConversionId) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT body FROM ledger_entries WHERE conversion_id = $1 ORDER BY created_at",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn get_commission(&self, id: CommissionId) -> Result<Option<CommissionEntry>> {
        let row = sqlx::query("SELECT * FROM commission_entries WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|r| Self::commission_from_row(&r)).transpose()
    }

    async fn commission_for_conversion(
        &self,
        id: ConversionId,
    ) -> Result<Option<CommissionEntry>> {
        let row = sqlx::query("SELECT * FROM commission_entries WHERE conversion_id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|r| Self::commission_from_row(&r)).transpose()
    }

    async fn commissions_for_affiliate(
        &self,
        affiliate_id: &AffiliateId,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM commission_entries
            WHERE affiliate_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
            ORDER BY created_at
            "#,
        )
        .bind(affiliate_id.as_str())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.since)
        .bind(filter.until)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(Self::commission_from_row).collect()
    }

    async fn update_commission(&self, entry: &CommissionEntry) -> Result<()> {
        let result = sqlx::query(
            "UPDATE commission_entries SET status = $2, paid_at = $3 WHERE id = $1",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.status.as_str())
        .bind(entry.paid_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(CambioError::CommissionNotFound(entry.id));
        }
        Ok(())
    }

    async fn try_consume_event(
        &self,
        conversion_id: ConversionId,
        event_key: &EventKey,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO applied_events (conversion_id, event_key)
            VALUES ($1, $2)
            ON CONFLICT (conversion_id, event_key) DO NOTHING
            "#,
        )
        .bind(conversion_id.as_uuid())
        .bind(event_key.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn event_applied(
        &self,
        conversion_id: ConversionId,
        event_key: &EventKey,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM applied_events WHERE conversion_id = $1 AND event_key = $2",
        )
        .bind(conversion_id.as_uuid())
        .bind(event_key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.is_some())
    }

    async fn record_settlement(
        &self,
        conversion: &Conversion,
        entries: &EntryPair,
        balance: &BalanceSnapshot,
        commission: Option<&CommissionEntry>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        Self::insert_entry(&entries.debit, &mut *tx).await?;
        Self::insert_entry(&entries.credit, &mut *tx).await?;
        Self::upsert_balance(balance, &mut *tx).await?;
        if let Some(entry) = commission {
            Self::insert_commission(entry, &mut *tx).await?;
        }
        Self::upsert_conversion(conversion, &mut *tx).await?;

        tx.commit().await.map_err(storage_err)
    }

    async fn record_reversal(
        &self,
        conversion: &Conversion,
        entries: &EntryPair,
        balance: &BalanceSnapshot,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        Self::insert_entry(&entries.debit, &mut *tx).await?;
        Self::insert_entry(&entries.credit, &mut *tx).await?;
        Self::upsert_balance(balance, &mut *tx).await?;
        Self::upsert_conversion(conversion, &mut *tx).await?;

        tx.commit().await.map_err(storage_err)
    }
}

fn storage_err(err: sqlx::Error) -> CambioError {
    CambioError::Storage(err.to_string())
}
