use super::{millis, LedgerStore};
use crate::{error::PayoutResult, settings_resolver::CommissionSettings, types::Timestamp};
use rusqlite::{params, OptionalExtension};

const SETTINGS_ID: &str = "global";

impl LedgerStore {
    // ── Commission settings (single document) ───────────────────────

    pub fn load_commission_settings(&self) -> PayoutResult<Option<CommissionSettings>> {
        let document: Option<String> = self
            .conn
            .query_row(
                "SELECT document FROM commission_settings WHERE settings_id = ?1",
                params![SETTINGS_ID],
                |row| row.get(0),
            )
            .optional()?;
        match document {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn save_commission_settings(
        &self,
        settings: &CommissionSettings,
        at: Timestamp,
    ) -> PayoutResult<()> {
        self.conn.execute(
            "INSERT INTO commission_settings (settings_id, document, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (settings_id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at",
            params![SETTINGS_ID, serde_json::to_string(settings)?, millis(at)],
        )?;
        Ok(())
    }
}
