//! Conditioned write: compare revision, then set.

use crate::merge::MergePolicy;
use crate::record::{decode_record, normalize_revision, DocumentRecord, REVISION_FIELD};
use crate::store::{DocumentStore, Fields, TxDecision, TxOutcome};
use crate::tracker::SyncBase;

use super::error::SyncError;

/// Result of a successful conditioned write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WriteOutcome {
    /// Revision now stored remotely
    pub revision: u64,
    /// Text now stored remotely
    pub text: String,
    /// True if the stored text differs from what the caller asked to save
    pub merged: bool,
}

/// Writes `local_text` if the remote revision still equals the base.
///
/// On rejection the current remote record is merged with the local edit
/// and the write is retried once against the remote revision. A second
/// rejection is a [`SyncError::ConflictExhausted`].
pub(crate) async fn conditioned_write(
    store: &dyn DocumentStore,
    path: &str,
    base: &SyncBase,
    local_text: &str,
    policy: MergePolicy,
) -> Result<WriteOutcome, SyncError> {
    if let Some(revision) = attempt(store, path, base.base_revision, local_text).await? {
        tracing::debug!("wrote {} at revision {}", path, revision);
        return Ok(WriteOutcome {
            revision,
            text: local_text.to_string(),
            merged: false,
        });
    }

    let current = decode_record(store.read(path).await?.fields.as_ref());
    tracing::info!(
        "write to {} rejected: expected revision {}, remote at {}; merging",
        path,
        base.base_revision,
        current.revision
    );

    let remote_text = current.text.unwrap_or_default();
    let merged = policy.resolve(&base.base_text, local_text, &remote_text);
    if merged.fell_back {
        tracing::warn!(
            "merge for {} below threshold ({:.2}); keeping local text",
            path,
            merged.confidence
        );
    }

    match attempt(store, path, current.revision, &merged.text).await? {
        Some(revision) => {
            tracing::debug!("wrote merged {} at revision {}", path, revision);
            Ok(WriteOutcome {
                revision,
                merged: merged.text != local_text,
                text: merged.text,
            })
        }
        None => Err(SyncError::ConflictExhausted {
            path: path.to_string(),
        }),
    }
}

/// One transaction. `Ok(None)` means the precondition failed.
async fn attempt(
    store: &dyn DocumentStore,
    path: &str,
    expected: u64,
    text: &str,
) -> Result<Option<u64>, SyncError> {
    let next = expected.saturating_add(1);
    let body = |current: Option<&Fields>| {
        if decode_record(current).revision != expected {
            TxDecision::Reject
        } else {
            TxDecision::Commit(DocumentRecord::write_fields(text, next))
        }
    };

    match store.transaction(path, &body).await? {
        TxOutcome::Committed(fields) => Ok(Some(normalize_revision(fields.get(REVISION_FIELD)))),
        TxOutcome::Rejected => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    const PATH: &str = "users/u1/doc/editor";

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_remote_writes_first_time() {
        let store = MemoryStore::new();
        store.set(PATH, fields(json!({"text": "X", "rev": 1}))).await;

        let outcome = conditioned_write(
            &store,
            PATH,
            &SyncBase::new(1, "X"),
            "XY",
            MergePolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            WriteOutcome {
                revision: 2,
                text: "XY".to_string(),
                merged: false
            }
        );
        let stats = store.stats();
        assert_eq!(stats.transactions, 1);
        assert_eq!(stats.reads, 0);
    }

    #[tokio::test]
    async fn test_absent_record_accepts_revision_zero() {
        let store = MemoryStore::new();
        let outcome = conditioned_write(
            &store,
            PATH,
            &SyncBase::default(),
            "draft",
            MergePolicy::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.revision, 1);
        assert_eq!(store.get(PATH).await.unwrap()["text"], "draft");
    }

    #[tokio::test]
    async fn test_conflict_merges_and_retries_once() {
        let store = MemoryStore::new();
        store.set(PATH, fields(json!({"text": "XZ", "rev": 2}))).await;

        let outcome = conditioned_write(
            &store,
            PATH,
            &SyncBase::new(1, "X"),
            "XY",
            MergePolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.revision, 3);
        assert_eq!(outcome.text, "XYZ");
        assert!(outcome.merged);

        let stats = store.stats();
        assert_eq!(stats.transactions, 2);
        assert_eq!(stats.rejections, 1);
        assert_eq!(stats.reads, 1);
    }

    #[tokio::test]
    async fn test_failed_merge_keeps_local_text() {
        let store = MemoryStore::new();
        store
            .set(PATH, fields(json!({"text": "goodbye", "rev": 5})))
            .await;

        let outcome = conditioned_write(
            &store,
            PATH,
            &SyncBase::new(4, "hello world"),
            "hello there",
            MergePolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.revision, 6);
        assert_eq!(outcome.text, "hello there");
        assert!(!outcome.merged);
    }

    #[tokio::test]
    async fn test_malformed_remote_revision_is_zero() {
        let store = MemoryStore::new();
        store
            .set(PATH, fields(json!({"text": "hello", "rev": "bad"})))
            .await;

        let outcome = conditioned_write(
            &store,
            PATH,
            &SyncBase::new(0, "hello"),
            "hello!",
            MergePolicy::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.revision, 1);
        assert_eq!(store.stats().transactions, 1);
    }
}
