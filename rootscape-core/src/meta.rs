use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::warn;

use crate::feed::AtlasApi;
use crate::ProbeId;

/// Descriptive probe data from the probes endpoint. Only the fields used
/// for the detail panel are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeMeta {
    pub id: ProbeId,
    #[serde(default)]
    pub asn_v4: Option<u32>,
    #[serde(default)]
    pub asn_v6: Option<u32>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Key-value memo whose entries are computed at most once. Concurrent
/// callers for the same key wait on the same in-flight computation.
#[derive(Debug)]
pub struct Memo<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Memo<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = Arc::clone(self.cells.lock().entry(key).or_default());
        cell.get_or_init(compute).await.clone()
    }

    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Memoized probe metadata lookups. A failed lookup is remembered as
/// `None` and not retried.
pub struct MetaCache<A> {
    api: Arc<A>,
    memo: Memo<ProbeId, Option<ProbeMeta>>,
}

impl<A: AtlasApi> MetaCache<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            memo: Memo::new(),
        }
    }

    pub async fn get(&self, probe: ProbeId) -> Option<ProbeMeta> {
        self.memo
            .get_or_compute(probe, || async {
                match self.api.probe(probe).await {
                    Ok(meta) => Some(meta),
                    Err(err) => {
                        warn!(probe, error = %err, "probe metadata lookup failed");
                        None
                    }
                }
            })
            .await
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn memo_computes_once_per_key() {
        let memo: Memo<u32, String> = Memo::new();
        let calls = AtomicUsize::new(0);
        let compute = |n: u32| {
            let calls = &calls;
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                format!("v{n}")
            }
        };

        let (a, b) = tokio::join!(
            memo.get_or_compute(1, compute(1)),
            memo.get_or_compute(1, compute(1))
        );
        assert_eq!(a, "v1");
        assert_eq!(b, "v1");
        assert_eq!(memo.get_or_compute(1, compute(1)).await, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(memo.get_or_compute(2, compute(2)).await, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn probe_meta_ignores_unknown_fields() {
        let meta: ProbeMeta = serde_json::from_str(
            r#"{"id": 100, "asn_v4": 3333, "asn_v6": null, "status": {"name": "Connected"}}"#,
        )
        .unwrap();
        assert_eq!(meta.asn_v4, Some(3333));
        assert_eq!(meta.asn_v6, None);
        assert_eq!(meta.country_code, None);
    }
}
