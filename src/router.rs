use std::{sync::Arc, time::Duration};

use serde_json::Value;

use crate::{
    engine::{EngineError, KvEngine},
    raft::{
        app::{ConsensusHandle, NodeState},
        types::{ApplyOutcome, CommandPayload},
    },
};

/// Per-request failures on the command paths.
#[derive(Debug)]
pub enum KvError {
    EmptyKey,
    NotLeader,
    ApplyFailed(String),
    InternalShape,
    DecodeFailed(String),
    Engine(EngineError),
}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyKey => write!(f, "key is empty"),
            Self::NotLeader => write!(f, "not the leader"),
            Self::ApplyFailed(e) => write!(f, "error persisting data in raft cluster: {e}"),
            Self::InternalShape => write!(f, "commit response does not match apply response"),
            Self::DecodeFailed(e) => write!(f, "stored value is not valid JSON: {e}"),
            Self::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for KvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            _ => None,
        }
    }
}

/// The only write path, and the local read path.
///
/// Writes go through Raft on the leader and return once the entry has
/// committed and applied; this node never forwards to the leader, the
/// client retries elsewhere. Reads come straight from the local engine
/// and may trail the leader by the replica's applied-index lag.
pub struct CommandRouter {
    raft: Arc<dyn ConsensusHandle>,
    engine: KvEngine,
    apply_timeout: Duration,
}

impl CommandRouter {
    pub fn new(raft: Arc<dyn ConsensusHandle>, engine: KvEngine, apply_timeout: Duration) -> Self {
        Self {
            raft,
            engine,
            apply_timeout,
        }
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<(), KvError> {
        let key = trimmed_key(key)?;
        self.submit(CommandPayload::set(key, value)).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), KvError> {
        let key = trimmed_key(key)?;
        self.submit(CommandPayload::delete(key)).await
    }

    /// Local engine read; absent keys are `None`.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        let key = trimmed_key(key)?;
        let Some(bytes) = self.engine.get(key.as_bytes()).map_err(KvError::Engine)? else {
            return Ok(None);
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_slice(&bytes).map_err(|e| KvError::DecodeFailed(e.to_string()))?;
        Ok(Some(value))
    }

    async fn submit(&self, payload: CommandPayload) -> Result<(), KvError> {
        if self.raft.state() != NodeState::Leader {
            return Err(KvError::NotLeader);
        }

        let encoded =
            serde_json::to_value(&payload).map_err(|e| KvError::ApplyFailed(e.to_string()))?;
        let outcome = self
            .raft
            .apply(encoded, self.apply_timeout)
            .await
            .map_err(|e| KvError::ApplyFailed(e.to_string()))?;

        match outcome {
            // A per-operation engine error inside the outcome is not
            // surfaced here; the submitted value is what was asked for
            // and the entry is committed either way.
            ApplyOutcome::Applied { .. } => Ok(()),
            ApplyOutcome::Ignored => Err(KvError::InternalShape),
        }
    }
}

fn trimmed_key(key: &str) -> Result<String, KvError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(KvError::EmptyKey);
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Mutex};

    use serde_json::json;

    use crate::{
        engine::EngineOptions,
        raft::{
            app::{BoxFuture, LocalConsensus},
            types::{NodeId, NodeMeta},
        },
    };

    use super::*;

    fn test_engine(dir: &std::path::Path) -> KvEngine {
        KvEngine::open(EngineOptions {
            dir: dir.to_path_buf(),
            create_if_missing: true,
        })
        .unwrap()
    }

    fn local_router(engine: KvEngine) -> (Arc<LocalConsensus>, CommandRouter) {
        let consensus = Arc::new(LocalConsensus::new(engine.clone()));
        let router = CommandRouter::new(consensus.clone(), engine, Duration::from_millis(500));
        (consensus, router)
    }

    /// Consensus stand-in with scripted apply results, for the error
    /// paths `LocalConsensus` cannot produce.
    struct ScriptedConsensus {
        outcomes: Mutex<Vec<anyhow::Result<ApplyOutcome>>>,
    }

    impl ConsensusHandle for ScriptedConsensus {
        fn state(&self) -> NodeState {
            NodeState::Leader
        }

        fn apply(
            &self,
            _payload: Value,
            _timeout: Duration,
        ) -> BoxFuture<'_, anyhow::Result<ApplyOutcome>> {
            let next = self.outcomes.lock().unwrap().remove(0);
            Box::pin(async move { next })
        }

        fn add_voter(&self, _id: NodeId, _node: NodeMeta) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move { Ok(()) })
        }

        fn remove_server(&self, _id: NodeId) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move { Ok(()) })
        }

        fn membership(&self) -> Vec<(NodeId, NodeMeta)> {
            Vec::new()
        }

        fn stats(&self) -> BTreeMap<String, String> {
            BTreeMap::new()
        }

        fn shutdown(&self) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move { Ok(()) })
        }
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = test_engine(tmp.path());
        let (_consensus, router) = local_router(engine);

        router.set("greeting", json!("hello")).await.unwrap();
        assert_eq!(router.get("greeting").await.unwrap(), Some(json!("hello")));
    }

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let tmp = tempfile::tempdir().unwrap();
        let (_consensus, router) = local_router(test_engine(tmp.path()));

        router.set("k", json!(1)).await.unwrap();
        router.set("k", json!(2)).await.unwrap();
        assert_eq!(router.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn delete_then_get_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let (_consensus, router) = local_router(test_engine(tmp.path()));

        router.set("k", json!([1, 2])).await.unwrap();
        router.delete("k").await.unwrap();
        router.delete("k").await.unwrap();
        assert_eq!(router.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_are_trimmed_before_use() {
        let tmp = tempfile::tempdir().unwrap();
        let (_consensus, router) = local_router(test_engine(tmp.path()));

        router.set("  padded  ", json!(true)).await.unwrap();
        assert_eq!(router.get("padded").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn empty_and_whitespace_keys_fail_on_every_operation() {
        let tmp = tempfile::tempdir().unwrap();
        let (_consensus, router) = local_router(test_engine(tmp.path()));

        for key in ["", "   ", "\t\n"] {
            assert!(matches!(
                router.set(key, json!(1)).await,
                Err(KvError::EmptyKey)
            ));
            assert!(matches!(router.get(key).await, Err(KvError::EmptyKey)));
            assert!(matches!(router.delete(key).await, Err(KvError::EmptyKey)));
        }
    }

    #[tokio::test]
    async fn writes_on_a_follower_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = test_engine(tmp.path());
        let (consensus, router) = local_router(engine);
        consensus.set_state(NodeState::Follower);

        assert!(matches!(
            router.set("k", json!(1)).await,
            Err(KvError::NotLeader)
        ));
        assert!(matches!(router.delete("k").await, Err(KvError::NotLeader)));
        // Reads bypass consensus entirely.
        assert_eq!(router.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn apply_failure_and_bad_shape_surface_as_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = test_engine(tmp.path());
        let consensus = Arc::new(ScriptedConsensus {
            outcomes: Mutex::new(vec![
                Err(anyhow::anyhow!("no quorum")),
                Ok(ApplyOutcome::Ignored),
            ]),
        });
        let router = CommandRouter::new(consensus, engine, Duration::from_millis(500));

        assert!(matches!(
            router.set("k", json!(1)).await,
            Err(KvError::ApplyFailed(_))
        ));
        assert!(matches!(
            router.set("k", json!(1)).await,
            Err(KvError::InternalShape)
        ));
    }

    #[tokio::test]
    async fn engine_write_error_is_not_propagated_to_the_writer() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = test_engine(tmp.path());
        let consensus = Arc::new(ScriptedConsensus {
            outcomes: Mutex::new(vec![Ok(ApplyOutcome::Applied {
                error: Some("disk full".to_string()),
                data: json!(1),
            })]),
        });
        let router = CommandRouter::new(consensus, engine, Duration::from_millis(500));

        assert!(router.set("k", json!(1)).await.is_ok());
    }

    #[tokio::test]
    async fn read_of_corrupt_bytes_fails_with_decode_error() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = test_engine(tmp.path());
        engine.put(b"bad", b"not-json{").unwrap();
        let (_consensus, router) = local_router(engine);

        assert!(matches!(
            router.get("bad").await,
            Err(KvError::DecodeFailed(_))
        ));
    }
}
