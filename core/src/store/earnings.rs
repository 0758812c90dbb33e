use super::{decimal_col, enum_col, millis, opt_timestamp_col, timestamp_col, LedgerStore};
use crate::{
    earnings_ledger::{PayoutSchedule, StoreEarnings},
    error::{PayoutError, PayoutResult},
};
use rusqlite::{params, OptionalExtension, Row};

const EARNINGS_COLUMNS: &str = "store_id, total_sales, platform_fee_accrued, net_earnings,
    pending_balance, available_balance, lifetime_earnings, current_month_sales,
    payout_schedule, last_payout_date, next_payout_date, version, created_at, updated_at";

fn earnings_from_row(row: &Row<'_>) -> rusqlite::Result<StoreEarnings> {
    Ok(StoreEarnings {
        store_id:             row.get(0)?,
        total_sales:          decimal_col(row, 1)?,
        platform_fee_accrued: decimal_col(row, 2)?,
        net_earnings:         decimal_col(row, 3)?,
        pending_balance:      decimal_col(row, 4)?,
        available_balance:    decimal_col(row, 5)?,
        lifetime_earnings:    decimal_col(row, 6)?,
        current_month_sales:  decimal_col(row, 7)?,
        payout_schedule:      enum_col(row, 8)?,
        last_payout_date:     opt_timestamp_col(row, 9)?,
        next_payout_date:     opt_timestamp_col(row, 10)?,
        version:              row.get(11)?,
        created_at:           timestamp_col(row, 12)?,
        updated_at:           timestamp_col(row, 13)?,
    })
}

impl LedgerStore {
    // ── Store earnings ──────────────────────────────────────────────

    pub fn insert_store_earnings(&self, e: &StoreEarnings) -> PayoutResult<()> {
        self.conn.execute(
            "INSERT INTO store_earnings (
                store_id, total_sales, platform_fee_accrued, net_earnings,
                pending_balance, available_balance, lifetime_earnings, current_month_sales,
                payout_schedule, last_payout_date, next_payout_date, version,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                e.store_id,
                e.total_sales.to_string(),
                e.platform_fee_accrued.to_string(),
                e.net_earnings.to_string(),
                e.pending_balance.to_string(),
                e.available_balance.to_string(),
                e.lifetime_earnings.to_string(),
                e.current_month_sales.to_string(),
                e.payout_schedule.as_str(),
                e.last_payout_date.map(millis),
                e.next_payout_date.map(millis),
                e.version,
                millis(e.created_at),
                millis(e.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_store_earnings(&self, store_id: &str) -> PayoutResult<Option<StoreEarnings>> {
        let sql = format!("SELECT {EARNINGS_COLUMNS} FROM store_earnings WHERE store_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![store_id], earnings_from_row)
            .optional()?;
        Ok(row)
    }

    /// Write every mutable field, provided the row still carries
    /// `e.version`. Returns the record with its bumped version.
    pub fn update_store_earnings(&self, e: &StoreEarnings) -> PayoutResult<StoreEarnings> {
        let changed = self.conn.execute(
            "UPDATE store_earnings SET
                total_sales = ?1, platform_fee_accrued = ?2, net_earnings = ?3,
                pending_balance = ?4, available_balance = ?5, lifetime_earnings = ?6,
                current_month_sales = ?7, payout_schedule = ?8,
                last_payout_date = ?9, next_payout_date = ?10,
                updated_at = ?11, version = version + 1
             WHERE store_id = ?12 AND version = ?13",
            params![
                e.total_sales.to_string(),
                e.platform_fee_accrued.to_string(),
                e.net_earnings.to_string(),
                e.pending_balance.to_string(),
                e.available_balance.to_string(),
                e.lifetime_earnings.to_string(),
                e.current_month_sales.to_string(),
                e.payout_schedule.as_str(),
                e.last_payout_date.map(millis),
                e.next_payout_date.map(millis),
                millis(e.updated_at),
                e.store_id,
                e.version,
            ],
        )?;
        if changed != 1 {
            return Err(PayoutError::ConcurrentModification {
                store_id: e.store_id.clone(),
                version: e.version,
            });
        }
        Ok(StoreEarnings {
            version: e.version + 1,
            ..e.clone()
        })
    }

    pub fn stores_with_schedule(&self, schedule: PayoutSchedule) -> PayoutResult<Vec<StoreEarnings>> {
        let sql = format!(
            "SELECT {EARNINGS_COLUMNS} FROM store_earnings
             WHERE payout_schedule = ?1 ORDER BY store_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![schedule.as_str()], earnings_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn all_store_earnings(&self) -> PayoutResult<Vec<StoreEarnings>> {
        let sql = format!("SELECT {EARNINGS_COLUMNS} FROM store_earnings ORDER BY store_id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], earnings_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn all_store_ids(&self) -> PayoutResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT store_id FROM store_earnings ORDER BY store_id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}
