use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use eon_id_core::MetricsSink;
use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorConfig;
use crate::error::Error;
use crate::key_schema::KeySchema;
use crate::store::SharedStore;
use crate::worker_record::WorkerRecord;

const STORE_RPC_TIMEOUT: Duration = Duration::from_secs(5);
const REREGISTER_AFTER_FAILURES: u32 = 3;

struct RegistrationState {
    registered: bool,
    register_time: i64,
    instance_id: String,
}

/// Obtains and holds a `(datacenter_id, worker_id)` slot against a shared
/// store, refreshing its lease through periodic heartbeats.
///
/// Always constructed inside an `Arc` (via [`WorkerIdCoordinator::new`])
/// since the heartbeat background task holds a clone of it.
pub struct WorkerIdCoordinator<S: SharedStore> {
    store: Arc<S>,
    datacenter_id: i64,
    schema: KeySchema,
    ttl: Duration,
    heartbeat_interval: Duration,
    max_worker_id: i64,
    unhealthy_after_failures: u32,
    local_ip: String,
    worker_id: AtomicI64,
    healthy: AtomicBool,
    state: RwLock<RegistrationState>,
    heartbeat_token: StdMutex<Option<CancellationToken>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl<S: SharedStore + 'static> WorkerIdCoordinator<S> {
    /// Constructs a coordinator for the given datacenter against `store`.
    /// `worker_bits` is the generator's configured worker-id field width;
    /// `config.max_worker_id` must fit inside it or construction fails with
    /// `Error::ConfigInvalid`. No registration happens here; call
    /// [`Self::register_worker_id`] or [`Self::register_specific_worker_id`]
    /// afterward. Callers wrap the result in an `Arc` before registering,
    /// since the heartbeat task holds a clone of it.
    pub fn new(
        store: Arc<S>,
        datacenter_id: i64,
        worker_bits: u8,
        config: CoordinatorConfig,
    ) -> Result<Self, Error> {
        let prefix = config.validate(worker_bits)?;
        Ok(Self {
            store,
            datacenter_id,
            schema: KeySchema::new(&prefix),
            ttl: config.ttl,
            heartbeat_interval: config.heartbeat_interval,
            max_worker_id: config.max_worker_id,
            unhealthy_after_failures: config.unhealthy_after_failures,
            local_ip: local_outbound_ip(),
            worker_id: AtomicI64::new(-1),
            healthy: AtomicBool::new(true),
            state: RwLock::new(RegistrationState {
                registered: false,
                register_time: 0,
                instance_id: String::new(),
            }),
            heartbeat_token: StdMutex::new(None),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn datacenter_id(&self) -> i64 {
        self.datacenter_id
    }

    pub fn get_worker_id(&self) -> i64 {
        self.worker_id.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Dynamically allocates a worker id in `[0, max_worker_id]`. Idempotent
    /// if already registered.
    pub async fn register_worker_id(self: &Arc<Self>, cancel: CancellationToken) -> Result<i64, Error> {
        {
            let state = self.state.read().await;
            if state.registered {
                return Ok(self.worker_id.load(Ordering::SeqCst));
            }
        }

        let total = self.max_worker_id + 1;
        let counter_key = self.schema.counter_key(self.datacenter_id);

        for attempt in 0..total {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let seq = self.store.eval_counter_with_wrap(&counter_key, total).await?;
            let candidate = seq - 1;

            if self.try_claim(candidate).await? {
                #[cfg(feature = "tracing")]
                tracing::info!(
                    worker_id = candidate,
                    datacenter_id = self.datacenter_id,
                    attempts = attempt + 1,
                    "registered worker id"
                );
                return Ok(candidate);
            }

            let backoff_ms = 10 + rand::rng().random_range(0..41u64);
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }

        self.healthy.store(false, Ordering::SeqCst);
        Err(Error::NoWorkerIdAvailable {
            datacenter_id: self.datacenter_id,
            attempts: total as u32,
        })
    }

    /// Registers a specific worker id, failing with `WorkerIdConflict` if
    /// another instance already holds it.
    pub async fn register_specific_worker_id(self: &Arc<Self>, worker_id: i64) -> Result<(), Error> {
        {
            let state = self.state.read().await;
            if state.registered {
                return if self.worker_id.load(Ordering::SeqCst) == worker_id {
                    Ok(())
                } else {
                    Err(Error::WorkerIdConflict {
                        worker_id,
                        datacenter_id: self.datacenter_id,
                        conflict_with: "this instance (different worker id already held)".to_string(),
                    })
                };
            }
        }

        if self.try_claim(worker_id).await? {
            Ok(())
        } else {
            self.healthy.store(false, Ordering::SeqCst);
            Err(Error::WorkerIdConflict {
                worker_id,
                datacenter_id: self.datacenter_id,
                conflict_with: "another instance".to_string(),
            })
        }
    }

    /// Attempts to claim `candidate` via `set_if_absent`; on success,
    /// persists local state and starts the heartbeat task.
    async fn try_claim(self: &Arc<Self>, candidate: i64) -> Result<bool, Error> {
        let instance_id = generate_instance_id(self.datacenter_id);
        let now = now_unix_secs();
        let record = WorkerRecord {
            worker_id: candidate,
            datacenter_id: self.datacenter_id,
            ip: self.local_ip.clone(),
            register_time: now,
            last_heartbeat: now,
            instance_id: instance_id.clone(),
        };
        let key = self.schema.worker_key(self.datacenter_id, candidate);
        let claimed = self
            .store
            .set_if_absent(&key, &record.to_json(), self.ttl.as_secs())
            .await?;
        if !claimed {
            return Ok(false);
        }

        self.worker_id.store(candidate, Ordering::SeqCst);
        {
            let mut state = self.state.write().await;
            state.registered = true;
            state.register_time = now;
            state.instance_id = instance_id;
        }

        let registry_key = self.schema.registry_key();
        let member = format!("{}:{candidate}", self.datacenter_id);
        let _ = self.store.set_add(&registry_key, &member).await;

        self.healthy.store(true, Ordering::SeqCst);
        self.start_heartbeat();
        if let Some(m) = &self.metrics {
            m.record_registration();
        }
        Ok(true)
    }

    /// Relinquishes the held worker id: stops the heartbeat, removes the
    /// worker key and registry entry (best-effort), clears local state.
    pub async fn unregister_worker_id(&self) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if !state.registered {
            return Ok(());
        }

        self.healthy.store(false, Ordering::SeqCst);
        if let Some(token) = self.heartbeat_token.lock().unwrap().take() {
            token.cancel();
        }

        let wid = self.worker_id.load(Ordering::SeqCst);
        let registry_key = self.schema.registry_key();
        let member = format!("{}:{wid}", self.datacenter_id);
        let _ = self.store.set_remove(&registry_key, &member).await;
        let _ = self.store.delete(&self.schema.worker_key(self.datacenter_id, wid)).await;

        self.worker_id.store(-1, Ordering::SeqCst);
        state.registered = false;
        Ok(())
    }

    /// Reads the informational registry set and resolves each member to its
    /// worker record, skipping any entry that fails to parse.
    pub async fn get_registered_workers(&self) -> Result<Vec<WorkerRecord>, Error> {
        let members = self.store.members(&self.schema.registry_key()).await?;
        let mut workers = Vec::with_capacity(members.len());
        for member in members {
            let mut parts = member.splitn(2, ':');
            let (Some(dc_str), Some(wid_str)) = (parts.next(), parts.next()) else {
                continue;
            };
            let (Ok(dc), Ok(wid)) = (dc_str.parse::<i64>(), wid_str.parse::<i64>()) else {
                continue;
            };
            let Ok(Some(json)) = self.store.get(&self.schema.worker_key(dc, wid)).await else {
                continue;
            };
            let Ok(record) = WorkerRecord::from_json(&json) else {
                continue;
            };
            workers.push(record);
        }
        Ok(workers)
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let mut guard = self.heartbeat_token.lock().unwrap();
        if let Some(stale) = guard.take() {
            stale.cancel();
        }
        let token = CancellationToken::new();
        *guard = Some(token.clone());
        drop(guard);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.heartbeat_loop(token).await });
    }

    async fn heartbeat_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                () = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            match self.send_heartbeat().await {
                Ok(()) => {
                    if consecutive_failures > 0 {
                        #[cfg(feature = "tracing")]
                        tracing::info!(
                            worker_id = self.worker_id.load(Ordering::SeqCst),
                            "heartbeat recovered after {consecutive_failures} failures"
                        );
                    }
                    consecutive_failures = 0;
                    self.healthy.store(true, Ordering::SeqCst);
                    if let Some(m) = &self.metrics {
                        m.record_heartbeat_success();
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        worker_id = self.worker_id.load(Ordering::SeqCst),
                        attempt = consecutive_failures,
                        %err,
                        "heartbeat failed"
                    );
                    if let Some(m) = &self.metrics {
                        m.record_heartbeat_failure();
                    }
                    if consecutive_failures >= self.unhealthy_after_failures {
                        self.healthy.store(false, Ordering::SeqCst);
                    }
                    if consecutive_failures >= REREGISTER_AFTER_FAILURES {
                        match self.try_re_register().await {
                            Ok(()) => {
                                #[cfg(feature = "tracing")]
                                tracing::info!(
                                    worker_id = self.worker_id.load(Ordering::SeqCst),
                                    "re-registered worker id"
                                );
                                consecutive_failures = 0;
                                self.healthy.store(true, Ordering::SeqCst);
                            }
                            Err(err) => {
                                #[cfg(feature = "tracing")]
                                tracing::error!(%err, "failed to re-register worker id");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Builds the current heartbeat payload from a read-locked snapshot,
    /// releasing the lock before the RPC.
    async fn heartbeat_payload(&self) -> Option<(String, String, String)> {
        let wid = self.worker_id.load(Ordering::SeqCst);
        if wid < 0 {
            return None;
        }
        let state = self.state.read().await;
        if !state.registered {
            return None;
        }
        let record = WorkerRecord {
            worker_id: wid,
            datacenter_id: self.datacenter_id,
            ip: self.local_ip.clone(),
            register_time: state.register_time,
            last_heartbeat: now_unix_secs(),
            instance_id: state.instance_id.clone(),
        };
        Some((
            self.schema.worker_key(self.datacenter_id, wid),
            record.to_json(),
            state.instance_id.clone(),
        ))
    }

    async fn send_heartbeat(&self) -> Result<(), Error> {
        let Some((key, payload, instance_id)) = self.heartbeat_payload().await else {
            return Err(Error::NotReady {
                reason: "worker id not registered".to_string(),
            });
        };
        self.run_guarded_refresh(&key, &payload, &instance_id, true).await
    }

    /// Re-verifies ownership and refreshes the lease outside the regular
    /// tick, used after repeated heartbeat failures. Unlike a plain
    /// heartbeat, failure here does not retry further within this call.
    async fn try_re_register(&self) -> Result<(), Error> {
        let Some((key, payload, instance_id)) = self.heartbeat_payload().await else {
            return Err(Error::NotReady {
                reason: "no worker id to re-register".to_string(),
            });
        };
        self.run_guarded_refresh(&key, &payload, &instance_id, false).await
    }

    async fn run_guarded_refresh(
        &self,
        key: &str,
        payload: &str,
        instance_id: &str,
        clear_state_on_loss: bool,
    ) -> Result<(), Error> {
        let wid = self.worker_id.load(Ordering::SeqCst);
        let result = timeout(
            STORE_RPC_TIMEOUT,
            self.store
                .eval_guarded_refresh(key, payload, instance_id, self.ttl.as_secs()),
        )
        .await
        .map_err(|_| Error::StoreUnavailable {
            reason: "guarded refresh timed out".to_string(),
        })??;

        match result {
            1 => Ok(()),
            0 => {
                if clear_state_on_loss {
                    self.clear_registration().await;
                }
                Err(Error::LeaseLost {
                    worker_id: wid,
                    reason: "worker id was taken by another instance".to_string(),
                })
            }
            -1 => {
                if clear_state_on_loss {
                    self.clear_registration().await;
                }
                Err(Error::LeaseLost {
                    worker_id: wid,
                    reason: "worker key has expired".to_string(),
                })
            }
            -2 => Err(Error::StoreUnavailable {
                reason: format!("worker id {wid} has invalid stored format"),
            }),
            other => Err(Error::StoreUnavailable {
                reason: format!("guarded refresh returned unknown status {other}"),
            }),
        }
    }

    async fn clear_registration(&self) {
        self.worker_id.store(-1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        state.registered = false;
    }
}

fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX_EPOCH")
        .as_secs() as i64
}

fn generate_instance_id(datacenter_id: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX_EPOCH");
    let pid = std::process::id();
    let micros_frag = now.as_micros() % 10_000;
    let jitter: u32 = rand::rng().random_range(0..100_000);
    format!(
        "instance-{}-{datacenter_id}-{pid}-{micros_frag}-{jitter}",
        now.as_nanos()
    )
}

/// Best-effort local outbound IP, for troubleshooting only; never fails the
/// caller. Uses the "connect a UDP socket, read back its local address"
/// trick to avoid enumerating interfaces by hand.
fn local_outbound_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::InMemoryStore;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            key_prefix: "test:".to_string(),
            max_worker_id: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn registers_and_reports_worker_id() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(WorkerIdCoordinator::new(store, 1, 5, config()).unwrap());
        let wid = coordinator
            .register_worker_id(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(wid, 0);
        assert_eq!(coordinator.get_worker_id(), 0);
        assert!(coordinator.is_healthy());
    }

    #[tokio::test]
    async fn register_worker_id_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(WorkerIdCoordinator::new(store, 1, 5, config()).unwrap());
        let first = coordinator
            .register_worker_id(CancellationToken::new())
            .await
            .unwrap();
        let second = coordinator
            .register_worker_id(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn single_slot_taken_fails_with_no_worker_id_available() {
        let store = Arc::new(InMemoryStore::new());
        // Occupy the only slot under a different instance id first.
        let taken = WorkerRecord {
            worker_id: 0,
            datacenter_id: 1,
            ip: "10.0.0.1".to_string(),
            register_time: 0,
            last_heartbeat: 0,
            instance_id: "someone-else".to_string(),
        };
        store
            .set_if_absent("test:dc:1:worker:0", &taken.to_json(), 30)
            .await
            .unwrap();

        let coordinator = Arc::new(WorkerIdCoordinator::new(store, 1, 5, config()).unwrap());
        let err = coordinator
            .register_worker_id(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoWorkerIdAvailable { .. }));
        assert!(!coordinator.is_healthy());
    }

    #[tokio::test]
    async fn register_specific_worker_id_conflicts_when_taken() {
        let store = Arc::new(InMemoryStore::new());
        let taken = WorkerRecord {
            worker_id: 4,
            datacenter_id: 1,
            ip: "10.0.0.1".to_string(),
            register_time: 0,
            last_heartbeat: 0,
            instance_id: "someone-else".to_string(),
        };
        store
            .set_if_absent("test:dc:1:worker:4", &taken.to_json(), 30)
            .await
            .unwrap();

        let mut cfg = config();
        cfg.max_worker_id = 31;
        let coordinator = Arc::new(WorkerIdCoordinator::new(store, 1, 5, cfg).unwrap());
        let err = coordinator.register_specific_worker_id(4).await.unwrap_err();
        assert!(matches!(err, Error::WorkerIdConflict { .. }));
    }

    #[tokio::test]
    async fn unregister_clears_local_state_and_store() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(WorkerIdCoordinator::new(store.clone(), 1, 5, config()).unwrap());
        coordinator
            .register_worker_id(CancellationToken::new())
            .await
            .unwrap();
        coordinator.unregister_worker_id().await.unwrap();
        assert_eq!(coordinator.get_worker_id(), -1);
        assert!(store.get("test:dc:1:worker:0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_registered_workers_skips_unparsable_entries() {
        let store = Arc::new(InMemoryStore::new());
        store.set_add("test:registry", "1:0").await.unwrap();
        store.set_add("test:registry", "not-a-valid-entry").await.unwrap();
        let record = WorkerRecord {
            worker_id: 0,
            datacenter_id: 1,
            ip: "10.0.0.1".to_string(),
            register_time: 0,
            last_heartbeat: 0,
            instance_id: "x".to_string(),
        };
        store
            .set_if_absent("test:dc:1:worker:0", &record.to_json(), 30)
            .await
            .unwrap();

        let coordinator = Arc::new(WorkerIdCoordinator::new(store, 1, 5, config()).unwrap());
        let workers = coordinator.get_registered_workers().await.unwrap();
        assert_eq!(workers, vec![record]);
    }

    #[tokio::test]
    async fn heartbeat_loss_clears_local_state() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(WorkerIdCoordinator::new(store.clone(), 1, 5, config()).unwrap());
        coordinator
            .register_worker_id(CancellationToken::new())
            .await
            .unwrap();

        // Simulate the lease expiring out from under us.
        store.expire("test:dc:1:worker:0");
        let err = coordinator.send_heartbeat().await.unwrap_err();
        assert!(matches!(err, Error::LeaseLost { .. }));
        assert_eq!(coordinator.get_worker_id(), -1);
    }
}
