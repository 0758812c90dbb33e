use super::{decimal_col, enum_col, json_col, millis, opt_timestamp_col, timestamp_col, LedgerStore};
use crate::{
    error::PayoutResult,
    payout_service::{PayoutAccount, PayoutRequest, PayoutStatus},
    types::Timestamp,
};
use rusqlite::{params, OptionalExtension, Row};

const PAYOUT_COLUMNS: &str = "payout_id, store_id, amount, status, automatic, requested_at,
    processed_at, transfer_id, failure_reason, bank_details, archived";

fn payout_from_row(row: &Row<'_>) -> rusqlite::Result<PayoutRequest> {
    Ok(PayoutRequest {
        payout_id:      row.get(0)?,
        store_id:       row.get(1)?,
        amount:         decimal_col(row, 2)?,
        status:         enum_col(row, 3)?,
        automatic:      row.get(4)?,
        requested_at:   timestamp_col(row, 5)?,
        processed_at:   opt_timestamp_col(row, 6)?,
        transfer_id:    row.get(7)?,
        failure_reason: row.get(8)?,
        bank_details:   json_col(row, 9)?,
        archived:       row.get(10)?,
    })
}

impl LedgerStore {
    // ── Payout requests ─────────────────────────────────────────────

    pub fn insert_payout_request(&self, p: &PayoutRequest) -> PayoutResult<()> {
        let bank_details = p
            .bank_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO payout_request (
                payout_id, store_id, amount, status, automatic, requested_at,
                processed_at, transfer_id, failure_reason, bank_details, archived
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                p.payout_id,
                p.store_id,
                p.amount.to_string(),
                p.status.as_str(),
                p.automatic,
                millis(p.requested_at),
                p.processed_at.map(millis),
                p.transfer_id,
                p.failure_reason,
                bank_details,
                p.archived,
            ],
        )?;
        Ok(())
    }

    pub fn get_payout_request(&self, payout_id: &str) -> PayoutResult<Option<PayoutRequest>> {
        let sql = format!("SELECT {PAYOUT_COLUMNS} FROM payout_request WHERE payout_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![payout_id], payout_from_row)
            .optional()?;
        Ok(row)
    }

    /// Conditional status move. Returns false if the request was not in `from`.
    pub fn transition_payout(
        &self,
        payout_id: &str,
        from: PayoutStatus,
        to: PayoutStatus,
    ) -> PayoutResult<bool> {
        let changed = self.conn.execute(
            "UPDATE payout_request SET status = ?1 WHERE payout_id = ?2 AND status = ?3",
            params![to.as_str(), payout_id, from.as_str()],
        )?;
        Ok(changed == 1)
    }

    /// processing → completed, recording the transfer reference.
    pub fn complete_payout(
        &self,
        payout_id: &str,
        transfer_id: &str,
        at: Timestamp,
    ) -> PayoutResult<bool> {
        let changed = self.conn.execute(
            "UPDATE payout_request
             SET status = ?1, transfer_id = ?2, processed_at = ?3, failure_reason = NULL
             WHERE payout_id = ?4 AND status = ?5",
            params![
                PayoutStatus::Completed.as_str(),
                transfer_id,
                millis(at),
                payout_id,
                PayoutStatus::Processing.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// processing → failed, recording the reason.
    pub fn fail_payout(&self, payout_id: &str, reason: &str, at: Timestamp) -> PayoutResult<bool> {
        let changed = self.conn.execute(
            "UPDATE payout_request
             SET status = ?1, failure_reason = ?2, processed_at = ?3
             WHERE payout_id = ?4 AND status = ?5",
            params![
                PayoutStatus::Failed.as_str(),
                reason,
                millis(at),
                payout_id,
                PayoutStatus::Processing.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Newest first.
    pub fn payouts_for_store(&self, store_id: &str) -> PayoutResult<Vec<PayoutRequest>> {
        let sql = format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_request
             WHERE store_id = ?1 ORDER BY requested_at DESC, payout_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![store_id], payout_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn failed_payouts_since(&self, since: Timestamp) -> PayoutResult<Vec<PayoutRequest>> {
        let sql = format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_request
             WHERE status = ?1 AND processed_at >= ?2 ORDER BY processed_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![PayoutStatus::Failed.as_str(), millis(since)],
                payout_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn payouts_in_status_requested_before(
        &self,
        status: PayoutStatus,
        cutoff: Timestamp,
    ) -> PayoutResult<Vec<PayoutRequest>> {
        let sql = format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_request
             WHERE status = ?1 AND requested_at < ?2 ORDER BY requested_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.as_str(), millis(cutoff)], payout_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Flag completed, not-yet-archived requests older than `cutoff`.
    /// Returns the number flagged.
    pub fn archive_completed_payouts_before(&self, cutoff: Timestamp) -> PayoutResult<usize> {
        let changed = self.conn.execute(
            "UPDATE payout_request SET archived = 1
             WHERE status = ?1 AND archived = 0 AND requested_at < ?2",
            params![PayoutStatus::Completed.as_str(), millis(cutoff)],
        )?;
        Ok(changed)
    }

    // ── External payout accounts ────────────────────────────────────

    pub fn insert_payout_account(&self, account: &PayoutAccount) -> PayoutResult<()> {
        self.conn.execute(
            "INSERT INTO store_payout_account (store_id, account_id, email, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                account.store_id,
                account.account_id,
                account.email,
                millis(account.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_payout_account(&self, store_id: &str) -> PayoutResult<Option<PayoutAccount>> {
        let row = self
            .conn
            .query_row(
                "SELECT store_id, account_id, email, created_at
                 FROM store_payout_account WHERE store_id = ?1",
                params![store_id],
                |row| {
                    Ok(PayoutAccount {
                        store_id:   row.get(0)?,
                        account_id: row.get(1)?,
                        email:      row.get(2)?,
                        created_at: timestamp_col(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
