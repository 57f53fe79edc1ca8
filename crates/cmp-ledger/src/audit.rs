use cmp_crypto::{BreakKind, ChainBreak, ChainStatus, ChainVerifier};
use cmp_types::{LedgerEntry, GENESIS};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::traits::{LedgerReader, LedgerRecord};

/// Entries fetched per read during an audit.
pub const DEFAULT_AUDIT_BATCH: usize = 1_000;

/// Result of auditing a whole ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    /// Entries checked before the audit finished or stopped at a break.
    pub entries_checked: u64,
    /// Chain status; a break's `index` is its position in the whole ledger.
    pub status: ChainStatus,
    /// Id and hash of the last entry verified as intact.
    pub verified_head: Option<(u64, String)>,
}

impl AuditReport {
    pub fn is_intact(&self) -> bool {
        self.status.is_intact()
    }
}

/// Batched chain verification over any [`LedgerReader`].
///
/// Reads in ascending id order with `read_records_after`, carrying the last
/// verified entry forward as the anchor of the next batch. A row that no
/// longer decodes is reported as a [`BreakKind::Undecodable`] break at its
/// position. The ledger is never modified, whatever the outcome.
pub struct Auditor;

impl Auditor {
    pub fn audit<R: LedgerReader + ?Sized>(
        reader: &R,
        batch_size: usize,
    ) -> Result<AuditReport, LedgerError> {
        let batch_size = batch_size.max(1);
        let mut anchor_hash = GENESIS.to_string();
        let mut anchor_id: Option<u64> = None;
        let mut checked: usize = 0;

        loop {
            let records = reader.read_records_after(anchor_id.unwrap_or(0), batch_size)?;
            if records.is_empty() {
                break;
            }

            let decoded = records.iter().take_while(|r| r.entry().is_some()).count();
            let batch: Vec<LedgerEntry> = records[..decoded]
                .iter()
                .filter_map(|r| r.entry().cloned())
                .collect();

            let status = match (
                ChainVerifier::verify_from(&anchor_hash, anchor_id, &batch),
                records.get(decoded),
            ) {
                (ChainStatus::Broken(b), _) => Some(b),
                (ChainStatus::Intact { .. }, Some(LedgerRecord::Undecodable { id, reason })) => {
                    Some(ChainBreak {
                        index: decoded,
                        id: *id,
                        kind: BreakKind::Undecodable {
                            reason: reason.clone(),
                        },
                    })
                }
                (ChainStatus::Intact { .. }, _) => None,
            };

            if let Some(b) = status {
                let verified_head = anchor_before(&batch, b.index, anchor_id, &anchor_hash);
                let index = checked + b.index;
                let brk = ChainBreak { index, ..b };
                warn!(index, id = brk.id, "ledger chain broken: {brk}");
                return Ok(AuditReport {
                    entries_checked: (index + 1) as u64,
                    status: ChainStatus::Broken(brk),
                    verified_head,
                });
            }

            checked += batch.len();
            if let Some(last) = batch.last() {
                anchor_hash = last.hash.clone();
                anchor_id = Some(last.id);
            }
        }

        info!(entries = checked, "ledger chain intact");
        Ok(AuditReport {
            entries_checked: checked as u64,
            status: ChainStatus::Intact { verified: checked },
            verified_head: anchor_id.map(|id| (id, anchor_hash)),
        })
    }
}

/// The last intact entry before position `index` of `batch`.
fn anchor_before(
    batch: &[LedgerEntry],
    index: usize,
    anchor_id: Option<u64>,
    anchor_hash: &str,
) -> Option<(u64, String)> {
    match index.checked_sub(1) {
        Some(prev) => batch.get(prev).map(|e| (e.id, e.hash.clone())),
        None => anchor_id.map(|id| (id, anchor_hash.to_string())),
    }
}
