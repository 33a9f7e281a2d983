//! SQLite-backed state store for managed positions.
//!
//! Three durable tables plus a singleton row: `positions` (one record per
//! managed position, never deleted), `fill_events` (the idempotency journal,
//! keyed by exchange order id), `action_audits` (append-only forensic log),
//! and `monitoring_state`. Every mutation that touches more than one row —
//! and every phase/stop/remaining-size update — runs inside a single
//! transaction so a concurrent reader can never observe a half-applied
//! change. Phase writes are additionally gated on
//! [`PositionPhase::can_advance_to`] so a bug upstream cannot move a
//! position backwards.

pub mod error;

use chrono::{DateTime, Utc};
use ladder_core::{
    ActionAudit, AuditAction, Direction, FillType, MonitoringState, OrderFillEvent,
    PositionPhase, PositionState, SettleCurrency, StrategyType,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

pub use error::{Result, StoreError};

#[derive(Clone)]
pub struct PositionStore {
    pool: SqlitePool,
}

impl PositionStore {
    /// Opens (creating if needed) the database at `database_url` and runs
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database. Used by tests across the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    // ------------------------------------------------------------------
    // Positions
    // ------------------------------------------------------------------

    /// Persists a freshly opened position together with its opening audit
    /// entry, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_position(&self, pos: &PositionState) -> Result<()> {
        let audit = ActionAudit::ok(
            pos.id,
            AuditAction::PositionOpened,
            format!(
                "{} {} x{} @ {} ({})",
                pos.direction, pos.contract, pos.total_size, pos.entry_price, pos.strategy
            ),
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO positions (
                id, contract, direction, strategy, total_size, entry_price,
                entry_order_id, multiplier, tier1_size, tier2_size, runner_size,
                tier1_order_id, tier2_order_id, stop_order_id, phase,
                remaining_size, realized_pnl, original_stop_price,
                current_stop_price, tier1_price, tier2_price, leverage,
                credential_ref, settle, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26
            )
            ",
        )
        .bind(pos.id.to_string())
        .bind(&pos.contract)
        .bind(pos.direction.as_str())
        .bind(pos.strategy.as_str())
        .bind(pos.total_size)
        .bind(pos.entry_price.to_string())
        .bind(&pos.entry_order_id)
        .bind(pos.multiplier.to_string())
        .bind(pos.tier1_size)
        .bind(pos.tier2_size)
        .bind(pos.runner_size)
        .bind(pos.tier1_order_id.as_deref())
        .bind(pos.tier2_order_id.as_deref())
        .bind(pos.stop_order_id.as_deref())
        .bind(pos.phase.as_str())
        .bind(pos.remaining_size)
        .bind(pos.realized_pnl.to_string())
        .bind(pos.original_stop_price.to_string())
        .bind(pos.current_stop_price.to_string())
        .bind(pos.tier1_price.to_string())
        .bind(pos.tier2_price.to_string())
        .bind(i64::from(pos.leverage))
        .bind(&pos.credential_ref)
        .bind(pos.settle.as_str())
        .bind(pos.created_at)
        .bind(pos.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut tx, &audit).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Loads one position by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is corrupt.
    pub async fn get_position(&self, id: Uuid) -> Result<Option<PositionState>> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| map_position(&r)).transpose()
    }

    /// Loads all positions that have not reached a terminal phase, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn active_positions(&self) -> Result<Vec<PositionState>> {
        let rows = sqlx::query(
            "SELECT * FROM positions
             WHERE phase NOT IN ('completed', 'stopped_out')
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_position).collect()
    }

    /// Number of non-terminal positions.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn active_position_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM positions WHERE phase NOT IN ('completed', 'stopped_out')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Writes back a mutated position, optionally marking the fill event
    /// that drove the change as processed, plus an audit entry — all in one
    /// transaction.
    ///
    /// The current database phase is re-read inside the transaction and the
    /// write is rejected if it would be a backward transition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IllegalTransition`] on a backward phase write,
    /// [`StoreError::PositionNotFound`] if the position vanished, or a
    /// database error.
    pub async fn update_position(
        &self,
        pos: &PositionState,
        processed_order_id: Option<&str>,
        audit: &ActionAudit,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT phase FROM positions WHERE id = ?1")
            .bind(pos.id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::PositionNotFound(pos.id))?;
        let current = parse_enum::<PositionPhase>(&row, "positions", "phase")?;

        if current != pos.phase && !current.can_advance_to(pos.phase) {
            return Err(StoreError::IllegalTransition {
                position_id: pos.id,
                from: current,
                to: pos.phase,
            });
        }

        sqlx::query(
            r"
            UPDATE positions SET
                tier1_order_id = ?2,
                tier2_order_id = ?3,
                stop_order_id = ?4,
                phase = ?5,
                remaining_size = ?6,
                realized_pnl = ?7,
                current_stop_price = ?8,
                updated_at = ?9
            WHERE id = ?1
            ",
        )
        .bind(pos.id.to_string())
        .bind(pos.tier1_order_id.as_deref())
        .bind(pos.tier2_order_id.as_deref())
        .bind(pos.stop_order_id.as_deref())
        .bind(pos.phase.as_str())
        .bind(pos.remaining_size)
        .bind(pos.realized_pnl.to_string())
        .bind(pos.current_stop_price.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if let Some(order_id) = processed_order_id {
            sqlx::query("UPDATE fill_events SET processed_at = ?2 WHERE order_id = ?1")
                .bind(order_id)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fill journal
    // ------------------------------------------------------------------

    /// True if a fill event for this order id is already journaled.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn has_fill(&self, order_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM fill_events WHERE order_id = ?1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Journals a fill event plus its audit entry in one transaction.
    ///
    /// Returns `false` without writing anything if the order id is already
    /// journaled — the idempotency boundary for the whole detection path.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn record_fill(&self, event: &OrderFillEvent, audit: &ActionAudit) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT 1 FROM fill_events WHERE order_id = ?1")
            .bind(&event.order_id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Ok(false);
        }

        sqlx::query(
            r"
            INSERT INTO fill_events
                (order_id, position_id, contract, fill_type, size, price, filled_at, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
            ",
        )
        .bind(&event.order_id)
        .bind(event.position_id.to_string())
        .bind(&event.contract)
        .bind(event.fill_type.as_str())
        .bind(event.size)
        .bind(event.price.to_string())
        .bind(event.filled_at)
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Fill events not yet consumed by the stop-loss manager, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn unprocessed_fills(&self) -> Result<Vec<OrderFillEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM fill_events WHERE processed_at IS NULL ORDER BY filled_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_fill_event).collect()
    }

    /// Number of journaled fills awaiting processing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn unprocessed_fill_count(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM fill_events WHERE processed_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Marks one fill event as processed without touching its position.
    /// Used for fills that are already reflected in the current phase.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_fill_processed(&self, order_id: &str) -> Result<()> {
        sqlx::query("UPDATE fill_events SET processed_at = ?2 WHERE order_id = ?1")
            .bind(order_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    /// Appends a single audit entry outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn append_audit(&self, audit: &ActionAudit) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Audit trail for one position, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn audits_for_position(&self, position_id: Uuid) -> Result<Vec<ActionAudit>> {
        let rows = sqlx::query(
            "SELECT * FROM action_audits WHERE position_id = ?1 ORDER BY timestamp ASC",
        )
        .bind(position_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_audit).collect()
    }

    // ------------------------------------------------------------------
    // Monitoring state
    // ------------------------------------------------------------------

    /// Flips the singleton active flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_monitoring_active(&self, active: bool) -> Result<()> {
        sqlx::query("UPDATE monitoring_state SET is_active = ?1 WHERE id = 1")
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a completed detection cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn record_check(&self, tracked_position_count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE monitoring_state SET last_check = ?1, tracked_position_count = ?2 WHERE id = 1",
        )
        .bind(Utc::now())
        .bind(tracked_position_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reads the singleton monitoring row.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn monitoring_state(&self) -> Result<MonitoringState> {
        let row = sqlx::query("SELECT * FROM monitoring_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(MonitoringState {
            is_active: row.try_get("is_active")?,
            last_check: row.try_get("last_check")?,
            tracked_position_count: row.try_get("tracked_position_count")?,
        })
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

async fn insert_audit(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    audit: &ActionAudit,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO action_audits (id, position_id, action, details, timestamp, success, error)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
    )
    .bind(audit.id.to_string())
    .bind(audit.position_id.to_string())
    .bind(audit.action.as_str())
    .bind(&audit.details)
    .bind(audit.timestamp)
    .bind(audit.success)
    .bind(audit.error.as_deref())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_decimal(row: &SqliteRow, table: &str, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str_exact(&raw)
        .map_err(|e| StoreError::corrupt(table, format!("{column}: {e}")))
}

fn parse_uuid(row: &SqliteRow, table: &str, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e| StoreError::corrupt(table, format!("{column}: {e}")))
}

fn parse_enum<T>(row: &SqliteRow, table: &str, column: &str) -> Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: anyhow::Error| StoreError::corrupt(table, format!("{column}: {e}")))
}

fn map_position(row: &SqliteRow) -> Result<PositionState> {
    let leverage: i64 = row.try_get("leverage")?;
    Ok(PositionState {
        id: parse_uuid(row, "positions", "id")?,
        contract: row.try_get("contract")?,
        direction: parse_enum::<Direction>(row, "positions", "direction")?,
        strategy: parse_enum::<StrategyType>(row, "positions", "strategy")?,
        total_size: row.try_get("total_size")?,
        entry_price: parse_decimal(row, "positions", "entry_price")?,
        entry_order_id: row.try_get("entry_order_id")?,
        multiplier: parse_decimal(row, "positions", "multiplier")?,
        tier1_size: row.try_get("tier1_size")?,
        tier2_size: row.try_get("tier2_size")?,
        runner_size: row.try_get("runner_size")?,
        tier1_order_id: row.try_get("tier1_order_id")?,
        tier2_order_id: row.try_get("tier2_order_id")?,
        stop_order_id: row.try_get("stop_order_id")?,
        phase: parse_enum::<PositionPhase>(row, "positions", "phase")?,
        remaining_size: row.try_get("remaining_size")?,
        realized_pnl: parse_decimal(row, "positions", "realized_pnl")?,
        original_stop_price: parse_decimal(row, "positions", "original_stop_price")?,
        current_stop_price: parse_decimal(row, "positions", "current_stop_price")?,
        tier1_price: parse_decimal(row, "positions", "tier1_price")?,
        tier2_price: parse_decimal(row, "positions", "tier2_price")?,
        leverage: u32::try_from(leverage)
            .map_err(|e| StoreError::corrupt("positions", format!("leverage: {e}")))?,
        credential_ref: row.try_get("credential_ref")?,
        settle: parse_enum::<SettleCurrency>(row, "positions", "settle")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_fill_event(row: &SqliteRow) -> Result<OrderFillEvent> {
    Ok(OrderFillEvent {
        order_id: row.try_get("order_id")?,
        position_id: parse_uuid(row, "fill_events", "position_id")?,
        contract: row.try_get("contract")?,
        fill_type: parse_enum::<FillType>(row, "fill_events", "fill_type")?,
        size: row.try_get("size")?,
        price: parse_decimal(row, "fill_events", "price")?,
        filled_at: row.try_get("filled_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn map_audit(row: &SqliteRow) -> Result<ActionAudit> {
    Ok(ActionAudit {
        id: parse_uuid(row, "action_audits", "id")?,
        position_id: parse_uuid(row, "action_audits", "position_id")?,
        action: parse_enum(row, "action_audits", "action")?,
        details: row.try_get("details")?,
        timestamp: row.try_get("timestamp")?,
        success: row.try_get("success")?,
        error: row.try_get("error")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ladder_core::{AuditAction, Direction, FillType, StrategyType};
    use rust_decimal_macros::dec;

    fn sample_position() -> PositionState {
        PositionState {
            id: Uuid::new_v4(),
            contract: "BTC_USDT".to_string(),
            direction: Direction::Long,
            strategy: StrategyType::MultiTier,
            total_size: 200,
            entry_price: dec!(50000),
            entry_order_id: "e-1".to_string(),
            multiplier: dec!(0.0001),
            tier1_size: 100,
            tier2_size: 60,
            runner_size: 40,
            tier1_order_id: Some("t1".to_string()),
            tier2_order_id: Some("t2".to_string()),
            stop_order_id: Some("sl-1".to_string()),
            phase: PositionPhase::Initial,
            remaining_size: 200,
            realized_pnl: Decimal::ZERO,
            original_stop_price: dec!(49000),
            current_stop_price: dec!(49000),
            tier1_price: dec!(50750),
            tier2_price: dec!(51250),
            leverage: 10,
            credential_ref: "main".to_string(),
            settle: SettleCurrency::Usdt,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn fill_for(pos: &PositionState, order_id: &str, fill_type: FillType, size: i64) -> OrderFillEvent {
        OrderFillEvent {
            order_id: order_id.to_string(),
            position_id: pos.id,
            contract: pos.contract.clone(),
            fill_type,
            size,
            price: dec!(50750),
            filled_at: Utc::now(),
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn position_round_trips() {
        let store = PositionStore::new_in_memory().await.unwrap();
        let pos = sample_position();
        store.create_position(&pos).await.unwrap();

        let loaded = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(loaded.contract, pos.contract);
        assert_eq!(loaded.entry_price, pos.entry_price);
        assert_eq!(loaded.phase, PositionPhase::Initial);
        assert_eq!(loaded.tier1_size, 100);
        assert_eq!(loaded.settle, SettleCurrency::Usdt);

        // Opening wrote an audit entry in the same transaction.
        let audits = store.audits_for_position(pos.id).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].action, AuditAction::PositionOpened);
    }

    #[tokio::test]
    async fn active_positions_excludes_terminal() {
        let store = PositionStore::new_in_memory().await.unwrap();
        let open = sample_position();
        store.create_position(&open).await.unwrap();

        let mut done = sample_position();
        done.id = Uuid::new_v4();
        done.phase = PositionPhase::StoppedOut;
        store.create_position(&done).await.unwrap();

        let active = store.active_positions().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, open.id);
        assert_eq!(store.active_position_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_fill_is_rejected_without_writing() {
        let store = PositionStore::new_in_memory().await.unwrap();
        let pos = sample_position();
        store.create_position(&pos).await.unwrap();

        let event = fill_for(&pos, "t1", FillType::Tier1, 100);
        let audit = ActionAudit::ok(pos.id, AuditAction::FillDetected, "tier1 fill");

        assert!(store.record_fill(&event, &audit).await.unwrap());
        assert!(!store.record_fill(&event, &audit).await.unwrap());

        assert_eq!(store.unprocessed_fill_count().await.unwrap(), 1);
        // Only one FillDetected audit made it in.
        let audits = store.audits_for_position(pos.id).await.unwrap();
        let fills = audits
            .iter()
            .filter(|a| a.action == AuditAction::FillDetected)
            .count();
        assert_eq!(fills, 1);
    }

    #[tokio::test]
    async fn update_marks_fill_processed_atomically() {
        let store = PositionStore::new_in_memory().await.unwrap();
        let mut pos = sample_position();
        store.create_position(&pos).await.unwrap();

        let event = fill_for(&pos, "t1", FillType::Tier1, 100);
        let audit = ActionAudit::ok(pos.id, AuditAction::FillDetected, "tier1 fill");
        store.record_fill(&event, &audit).await.unwrap();

        pos.phase = PositionPhase::Tp1Filled;
        pos.tier1_order_id = None;
        pos.stop_order_id = Some("sl-2".to_string());
        pos.current_stop_price = dec!(50025);
        pos.remaining_size = 100;
        let advance = ActionAudit::ok(pos.id, AuditAction::StopReplaced, "breakeven");
        store.update_position(&pos, Some("t1"), &advance).await.unwrap();

        assert_eq!(store.unprocessed_fill_count().await.unwrap(), 0);
        let loaded = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(loaded.phase, PositionPhase::Tp1Filled);
        assert_eq!(loaded.stop_order_id.as_deref(), Some("sl-2"));
        assert_eq!(loaded.remaining_size, 100);
    }

    #[tokio::test]
    async fn backward_phase_write_is_rejected() {
        let store = PositionStore::new_in_memory().await.unwrap();
        let mut pos = sample_position();
        pos.phase = PositionPhase::Tp2Filled;
        store.create_position(&pos).await.unwrap();

        pos.phase = PositionPhase::Tp1Filled;
        let audit = ActionAudit::ok(pos.id, AuditAction::PhaseAdvanced, "bogus");
        let err = store.update_position(&pos, None, &audit).await.unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));

        // Nothing was written.
        let loaded = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(loaded.phase, PositionPhase::Tp2Filled);
    }

    #[tokio::test]
    async fn unprocessed_fills_come_back_oldest_first() {
        let store = PositionStore::new_in_memory().await.unwrap();
        let pos = sample_position();
        store.create_position(&pos).await.unwrap();

        let mut first = fill_for(&pos, "a", FillType::Tier1, 100);
        first.filled_at = Utc::now() - chrono::Duration::seconds(60);
        let second = fill_for(&pos, "b", FillType::Tier2, 60);

        store
            .record_fill(&second, &ActionAudit::ok(pos.id, AuditAction::FillDetected, "fill"))
            .await
            .unwrap();
        store
            .record_fill(&first, &ActionAudit::ok(pos.id, AuditAction::FillDetected, "fill"))
            .await
            .unwrap();

        let fills = store.unprocessed_fills().await.unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].order_id, "a");
        assert_eq!(fills[1].order_id, "b");
    }

    #[tokio::test]
    async fn monitoring_state_round_trips() {
        let store = PositionStore::new_in_memory().await.unwrap();
        let initial = store.monitoring_state().await.unwrap();
        assert!(!initial.is_active);
        assert!(initial.last_check.is_none());

        store.set_monitoring_active(true).await.unwrap();
        store.record_check(3).await.unwrap();

        let state = store.monitoring_state().await.unwrap();
        assert!(state.is_active);
        assert!(state.last_check.is_some());
        assert_eq!(state.tracked_position_count, 3);
    }
}
