// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel leases: at most one live owner per messaging account.
//!
//! Expiry is stored as epoch milliseconds and compared against the caller's
//! clock at statement time.

use std::time::Duration;

use corvid_core::CorvidError;
use corvid_core::types::{ChannelLease, LeaseAcquisition};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, duration_ms, map_tr_err, now_ms};

fn select_lease(
    conn: &rusqlite::Connection,
    account_id: &str,
) -> rusqlite::Result<Option<ChannelLease>> {
    conn.query_row(
        "SELECT account_id, owner_id, expires_at FROM channel_leases WHERE account_id = ?1",
        params![account_id],
        |row| {
            Ok(ChannelLease {
                account_id: row.get(0)?,
                owner_id: row.get(1)?,
                expires_at: row.get(2)?,
            })
        },
    )
    .optional()
}

/// Install or take over the lease in one conditional upsert.
///
/// The upsert only overwrites a row that has expired or already belongs to
/// `owner_id`; otherwise the current holder is reported.
pub async fn acquire_lease(
    db: &Database,
    account_id: &str,
    owner_id: &str,
    ttl: Duration,
) -> Result<LeaseAcquisition, CorvidError> {
    let account_id = account_id.to_string();
    let owner_id = owner_id.to_string();
    let ttl_ms = duration_ms(ttl);
    db.connection()
        .call(move |conn| -> Result<LeaseAcquisition, rusqlite::Error> {
            let tx = conn.transaction()?;
            let now = now_ms();
            let expires_at = now.saturating_add(ttl_ms);
            let changed = tx.execute(
                "INSERT INTO channel_leases (account_id, owner_id, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(account_id) DO UPDATE SET
                   owner_id = excluded.owner_id,
                   expires_at = excluded.expires_at,
                   updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE channel_leases.expires_at <= ?4
                    OR channel_leases.owner_id = excluded.owner_id",
                params![account_id, owner_id, expires_at, now],
            )?;
            let outcome = if changed == 1 {
                LeaseAcquisition::Acquired(ChannelLease {
                    account_id: account_id.clone(),
                    owner_id: owner_id.clone(),
                    expires_at,
                })
            } else {
                match select_lease(&tx, &account_id)? {
                    Some(current) => LeaseAcquisition::Held {
                        owner_id: current.owner_id,
                        expires_at: current.expires_at,
                    },
                    None => LeaseAcquisition::Held {
                        owner_id: String::new(),
                        expires_at: now,
                    },
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)
}

/// Extend the lease if `owner_id` is still recorded as its owner.
///
/// A lease that expired but was not taken over can still be renewed.
pub async fn heartbeat_lease(
    db: &Database,
    account_id: &str,
    owner_id: &str,
    ttl: Duration,
) -> Result<bool, CorvidError> {
    let account_id = account_id.to_string();
    let owner_id = owner_id.to_string();
    let ttl_ms = duration_ms(ttl);
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE channel_leases SET expires_at = ?3,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE account_id = ?1 AND owner_id = ?2",
                params![account_id, owner_id, now_ms().saturating_add(ttl_ms)],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed == 1)
}

pub async fn release_lease(
    db: &Database,
    account_id: &str,
    owner_id: &str,
) -> Result<bool, CorvidError> {
    let account_id = account_id.to_string();
    let owner_id = owner_id.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM channel_leases WHERE account_id = ?1 AND owner_id = ?2",
                params![account_id, owner_id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed == 1)
}

pub async fn get_lease(db: &Database, account_id: &str) -> Result<Option<ChannelLease>, CorvidError> {
    let account_id = account_id.to_string();
    db.connection()
        .call(move |conn| select_lease(conn, &account_id))
        .await
        .map_err(map_tr_err)
}
