use super::{decimal_col, enum_col, millis, opt_timestamp_col, timestamp_col, LedgerStore};
use crate::{
    commission_service::{CommissionTransaction, TransactionStatus},
    error::PayoutResult,
    types::Timestamp,
};
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;

const TXN_COLUMNS: &str = "transaction_id, order_id, store_id, category_id, gross_amount,
    commission_rate, platform_fee, net_amount, status, created_at, settled_at";

fn txn_from_row(row: &Row<'_>) -> rusqlite::Result<CommissionTransaction> {
    Ok(CommissionTransaction {
        transaction_id:  row.get(0)?,
        order_id:        row.get(1)?,
        store_id:        row.get(2)?,
        category_id:     row.get(3)?,
        gross_amount:    decimal_col(row, 4)?,
        commission_rate: decimal_col(row, 5)?,
        platform_fee:    decimal_col(row, 6)?,
        net_amount:      decimal_col(row, 7)?,
        status:          enum_col(row, 8)?,
        created_at:      timestamp_col(row, 9)?,
        settled_at:      opt_timestamp_col(row, 10)?,
    })
}

impl LedgerStore {
    // ── Commission transactions ─────────────────────────────────────

    pub fn insert_commission_transaction(&self, txn: &CommissionTransaction) -> PayoutResult<()> {
        self.conn.execute(
            "INSERT INTO commission_transaction (
                transaction_id, order_id, store_id, category_id, gross_amount,
                commission_rate, platform_fee, net_amount, status, created_at, settled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                txn.transaction_id,
                txn.order_id,
                txn.store_id,
                txn.category_id,
                txn.gross_amount.to_string(),
                txn.commission_rate.to_string(),
                txn.platform_fee.to_string(),
                txn.net_amount.to_string(),
                txn.status.as_str(),
                millis(txn.created_at),
                txn.settled_at.map(millis),
            ],
        )?;
        Ok(())
    }

    pub fn get_commission_transaction(
        &self,
        transaction_id: &str,
    ) -> PayoutResult<Option<CommissionTransaction>> {
        let sql = format!("SELECT {TXN_COLUMNS} FROM commission_transaction WHERE transaction_id = ?1");
        let txn = self
            .conn
            .query_row(&sql, params![transaction_id], txn_from_row)
            .optional()?;
        Ok(txn)
    }

    pub fn get_commission_transaction_by_order(
        &self,
        order_id: &str,
    ) -> PayoutResult<Option<CommissionTransaction>> {
        let sql = format!("SELECT {TXN_COLUMNS} FROM commission_transaction WHERE order_id = ?1");
        let txn = self
            .conn
            .query_row(&sql, params![order_id], txn_from_row)
            .optional()?;
        Ok(txn)
    }

    /// pending → completed. Returns false if the transaction was not pending.
    pub fn mark_transaction_completed(&self, transaction_id: &str) -> PayoutResult<bool> {
        let changed = self.conn.execute(
            "UPDATE commission_transaction SET status = ?1
             WHERE transaction_id = ?2 AND status = ?3",
            params![
                TransactionStatus::Completed.as_str(),
                transaction_id,
                TransactionStatus::Pending.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Sets `settled_at` once. Returns false if already settled or not completed.
    pub fn mark_transaction_settled(&self, transaction_id: &str, at: Timestamp) -> PayoutResult<bool> {
        let changed = self.conn.execute(
            "UPDATE commission_transaction SET settled_at = ?1
             WHERE transaction_id = ?2 AND status = ?3 AND settled_at IS NULL",
            params![millis(at), transaction_id, TransactionStatus::Completed.as_str()],
        )?;
        Ok(changed == 1)
    }

    /// Completed, unsettled transactions created on or before `cutoff`, oldest first.
    pub fn unsettled_completed_before(
        &self,
        cutoff: Timestamp,
    ) -> PayoutResult<Vec<CommissionTransaction>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM commission_transaction
             WHERE status = ?1 AND settled_at IS NULL AND created_at <= ?2
             ORDER BY created_at ASC, transaction_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![TransactionStatus::Completed.as_str(), millis(cutoff)],
                txn_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Pending transactions created before `cutoff` (stuck in the order flow).
    pub fn pending_transactions_created_before(
        &self,
        cutoff: Timestamp,
    ) -> PayoutResult<Vec<CommissionTransaction>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM commission_transaction
             WHERE status = ?1 AND created_at < ?2
             ORDER BY created_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![TransactionStatus::Pending.as_str(), millis(cutoff)],
                txn_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Completed transactions created in `[from, to)`.
    pub fn completed_transactions_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> PayoutResult<Vec<CommissionTransaction>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM commission_transaction
             WHERE status = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![TransactionStatus::Completed.as_str(), millis(from), millis(to)],
                txn_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Sum of completed gross amounts for a store since `since`.
    /// Summed as `Decimal` in Rust; SQLite would sum the text as floats.
    pub fn sum_completed_sales_since(&self, store_id: &str, since: Timestamp) -> PayoutResult<Decimal> {
        let mut stmt = self.conn.prepare(
            "SELECT gross_amount FROM commission_transaction
             WHERE store_id = ?1 AND status = ?2 AND created_at >= ?3",
        )?;
        let amounts = stmt
            .query_map(
                params![store_id, TransactionStatus::Completed.as_str(), millis(since)],
                |row| decimal_col(row, 0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(amounts.into_iter().sum())
    }

    pub fn commission_transaction_count(&self) -> PayoutResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM commission_transaction", [], |row| row.get(0))?;
        Ok(count)
    }
}
