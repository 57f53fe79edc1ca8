use cmp_types::{LedgerEntry, Payload, ValidationError};
use serde_json::Value;
use tracing::info;

use crate::error::LedgerError;
use crate::traits::{LedgerReader, LedgerRecord, LedgerWriter};

const SCAN_BATCH: usize = 500;

/// `action` of entries that correct an earlier entry.
pub const CORRECTION_ACTION: &str = "correction";

/// Append an entry correcting `original_id`.
///
/// The original entry is left untouched. The correction's payload is
/// `{"corrects": <id>, "reason": <reason>, "data": <data or null>}`.
pub fn record_correction<L>(
    ledger: &L,
    actor: &str,
    original_id: u64,
    reason: &str,
    data: Option<Payload>,
) -> Result<LedgerEntry, LedgerError>
where
    L: LedgerWriter + LedgerReader + ?Sized,
{
    if reason.trim().is_empty() {
        return Err(ValidationError::Empty { field: "reason" }.into());
    }
    if ledger.get(original_id)?.is_none() {
        return Err(LedgerError::NotFound { id: original_id });
    }

    let payload = Payload::new()
        .with("corrects", original_id)
        .with("reason", reason)
        .with("data", data.map_or(Value::Null, Payload::into_value));
    let entry = ledger.append(actor, CORRECTION_ACTION, Some(payload))?;
    info!(id = entry.id, corrects = original_id, "correction recorded");
    Ok(entry)
}

/// Every correction entry referencing `original_id`, oldest first.
///
/// Rows that no longer decode are skipped; audits report them.
pub fn corrections_for<R: LedgerReader + ?Sized>(
    reader: &R,
    original_id: u64,
) -> Result<Vec<LedgerEntry>, LedgerError> {
    let mut found = Vec::new();
    let mut cursor = original_id;
    loop {
        let records = reader.read_records_after(cursor, SCAN_BATCH)?;
        let Some(last) = records.last() else {
            return Ok(found);
        };
        cursor = last.id();
        found.extend(records.into_iter().filter_map(|r| match r {
            LedgerRecord::Entry(e)
                if e.action == CORRECTION_ACTION && corrects(&e) == Some(original_id) =>
            {
                Some(e)
            }
            _ => None,
        }));
    }
}

fn corrects(entry: &LedgerEntry) -> Option<u64> {
    entry.data.as_ref()?.get("corrects")?.as_u64()
}

#[cfg(test)]
mod tests {
    use cmp_crypto::{ChainStatus, ChainVerifier};

    use super::*;
    use crate::memory::InMemoryLedger;

    #[test]
    fn correction_references_original() {
        let ledger = InMemoryLedger::new();
        let original = ledger
            .append("AI:Accountant", "post", Some(Payload::new().with("amount", 100)))
            .unwrap();

        let fix = record_correction(
            &ledger,
            "Human:controller",
            original.id,
            "wrong amount",
            Some(Payload::new().with("amount", 110)),
        )
        .unwrap();

        assert_eq!(fix.action, CORRECTION_ACTION);
        assert_eq!(fix.prev_hash, original.hash);
        let payload = fix.data.as_ref().unwrap();
        assert_eq!(payload.get("corrects"), Some(&Value::from(1)));
        assert_eq!(payload.get("reason"), Some(&Value::from("wrong amount")));
        assert_eq!(payload.get("data").unwrap()["amount"], 110);

        assert_eq!(ledger.get(original.id).unwrap(), Some(original));
        assert!(ChainVerifier::verify_chain(&ledger.read_all_in_order().unwrap()).is_intact());
    }

    #[test]
    fn missing_original_is_not_found() {
        let ledger = InMemoryLedger::new();
        let err = record_correction(&ledger, "Human:controller", 7, "typo", None).unwrap_err();
        assert_eq!(err, LedgerError::NotFound { id: 7 });
        assert_eq!(ledger.count().unwrap(), 0);
    }

    #[test]
    fn blank_reason_is_rejected() {
        let ledger = InMemoryLedger::new();
        ledger.append("AI:Accountant", "post", None).unwrap();
        let err = record_correction(&ledger, "Human:controller", 1, "  ", None).unwrap_err();
        assert_eq!(
            err,
            LedgerError::Validation(ValidationError::Empty { field: "reason" })
        );
    }

    #[test]
    fn corrections_are_found_by_original() {
        let ledger = InMemoryLedger::new();
        ledger.append("AI:Accountant", "post", None).unwrap();
        ledger.append("AI:Accountant", "post", None).unwrap();
        record_correction(&ledger, "Human:a", 1, "first", None).unwrap();
        record_correction(&ledger, "Human:b", 2, "other", None).unwrap();
        record_correction(&ledger, "Human:c", 1, "second", None).unwrap();

        let fixes = corrections_for(&ledger, 1).unwrap();
        let ids: Vec<_> = fixes.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 5]);
        assert_eq!(
            fixes[0].data.as_ref().unwrap().get("data"),
            Some(&Value::Null)
        );
        assert!(corrections_for(&ledger, 9).unwrap().is_empty());
        assert!(matches!(
            ChainVerifier::verify_chain(&ledger.read_all_in_order().unwrap()),
            ChainStatus::Intact { verified: 5 }
        ));
    }
}
