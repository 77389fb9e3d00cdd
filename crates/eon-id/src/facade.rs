use std::sync::{Arc, RwLock};

use eon_id_core::{Generator, GeneratorConfig, MetricsSink, ParsedId, SystemClock};
use eon_id_coordinator::{CoordinatorConfig, SharedStore, WorkerIdCoordinator, WorkerRecord};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Composes one [`Generator`] and one [`WorkerIdCoordinator`] behind the
/// operation set an embedding host needs.
///
/// Construction is always explicit — there is no process-global accessor.
/// [`SnowflakeIdService::new`] builds the service but leaves it unregistered
/// (every hot-path call returns `Error::NotReady` until then); call
/// [`Self::register`] or [`Self::register_specific`] afterward to obtain a
/// worker id and bring the generator online. Always held behind an `Arc`
/// once registered, since the coordinator's heartbeat task holds its own
/// clone of the coordinator handle.
pub struct SnowflakeIdService<S: SharedStore> {
    coordinator: Arc<WorkerIdCoordinator<S>>,
    generator: RwLock<Option<Generator<SystemClock>>>,
    generator_config: GeneratorConfig,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl<S: SharedStore + 'static> SnowflakeIdService<S> {
    /// Builds the service against `store`. No registration happens here;
    /// [`generate_id`](Self::generate_id) and friends return
    /// `Error::NotReady` until [`Self::register`] or
    /// [`Self::register_specific`] succeeds.
    ///
    /// `coordinator_config.max_worker_id` is checked against
    /// `generator_config.worker_bits` up front, so an incompatible pair
    /// fails here rather than after a worker slot has already been claimed
    /// in the shared store.
    pub fn new(
        store: Arc<S>,
        datacenter_id: i64,
        generator_config: GeneratorConfig,
        coordinator_config: CoordinatorConfig,
    ) -> Result<Self, Error> {
        let coordinator = Arc::new(WorkerIdCoordinator::new(
            store,
            datacenter_id,
            generator_config.worker_bits,
            coordinator_config,
        )?);
        Ok(Self {
            coordinator,
            generator: RwLock::new(None),
            generator_config,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Dynamically allocates a worker id and brings the generator online.
    /// Idempotent if already registered.
    pub async fn register(&self, cancel: CancellationToken) -> Result<i64, Error> {
        let worker_id = self.coordinator.register_worker_id(cancel).await?;
        self.install_generator(worker_id)?;
        Ok(worker_id)
    }

    /// Registers a specific worker id rather than letting the coordinator
    /// pick one dynamically, then brings the generator online.
    pub async fn register_specific(&self, worker_id: i64) -> Result<(), Error> {
        self.coordinator.register_specific_worker_id(worker_id).await?;
        self.install_generator(worker_id)
    }

    fn install_generator(&self, worker_id: i64) -> Result<(), Error> {
        let generator = Generator::new(
            self.coordinator.datacenter_id(),
            worker_id,
            self.generator_config,
            SystemClock,
        )?;
        let generator = match &self.metrics {
            Some(sink) => generator.with_metrics(Arc::clone(sink)),
            None => generator,
        };
        *self
            .generator
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(generator);
        Ok(())
    }

    fn with_generator<T>(&self, f: impl FnOnce(&Generator<SystemClock>) -> Result<T, eon_id_core::Error>) -> Result<T, Error> {
        let guard = self
            .generator
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let r#gen = guard.as_ref().ok_or_else(|| Error::NotReady {
            reason: "generator not initialized".to_string(),
        })?;
        Ok(f(r#gen)?)
    }

    pub fn generate_id(&self) -> Result<i64, Error> {
        self.with_generator(Generator::generate_id)
    }

    pub fn generate_id_with_metadata(&self) -> Result<(i64, ParsedId), Error> {
        self.with_generator(Generator::generate_id_with_metadata)
    }

    pub fn parse_id(&self, id: i64) -> Result<ParsedId, Error> {
        self.with_generator(|r#gen| r#gen.parse_id(id))
    }

    /// Healthy iff the coordinator's lease is healthy and the generator has
    /// been initialized (registration completed).
    pub fn check_health(&self) -> Result<(), Error> {
        if !self.coordinator.is_healthy() {
            return Err(Error::NotReady {
                reason: "coordinator lease is unhealthy".to_string(),
            });
        }
        let guard = self
            .generator
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.is_none() {
            return Err(Error::NotReady {
                reason: "generator not initialized".to_string(),
            });
        }
        Ok(())
    }

    pub fn get_worker_id(&self) -> i64 {
        self.coordinator.get_worker_id()
    }

    pub async fn get_registered_workers(&self) -> Result<Vec<WorkerRecord>, Error> {
        Ok(self.coordinator.get_registered_workers().await?)
    }

    pub fn get_metrics(&self) -> Option<Arc<dyn MetricsSink>> {
        self.metrics.clone()
    }

    /// Relinquishes the held worker id and clears the generator, so a
    /// subsequent `generate_id` fails with `NotReady` until re-registered.
    pub async fn unregister(&self) -> Result<(), Error> {
        self.coordinator.unregister_worker_id().await?;
        *self
            .generator
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eon_id_coordinator::mock::InMemoryStore;
    use std::sync::Arc;

    async fn service() -> SnowflakeIdService<InMemoryStore> {
        let svc = SnowflakeIdService::new(
            Arc::new(InMemoryStore::new()),
            0,
            GeneratorConfig::default(),
            CoordinatorConfig::default(),
        )
        .unwrap();
        svc.register(CancellationToken::new()).await.unwrap();
        svc
    }

    #[tokio::test]
    async fn unregistered_service_reports_not_ready() {
        let svc = SnowflakeIdService::new(
            Arc::new(InMemoryStore::new()),
            0,
            GeneratorConfig::default(),
            CoordinatorConfig::default(),
        )
        .unwrap();
        assert!(matches!(svc.generate_id(), Err(Error::NotReady { .. })));
        assert!(svc.check_health().is_err());
    }

    #[tokio::test]
    async fn registered_service_generates_monotonic_ids() {
        let svc = service().await;
        let a = svc.generate_id().unwrap();
        let b = svc.generate_id().unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn generated_id_parses_back_to_service_worker_id() {
        let svc = service().await;
        let (id, parsed) = svc.generate_id_with_metadata().unwrap();
        assert_eq!(parsed.worker_id, svc.get_worker_id());
        assert_eq!(svc.parse_id(id).unwrap(), parsed);
    }

    #[tokio::test]
    async fn healthy_after_registration() {
        let svc = service().await;
        assert!(svc.check_health().is_ok());
    }

    #[tokio::test]
    async fn unregister_clears_the_generator() {
        let svc = service().await;
        svc.unregister().await.unwrap();
        assert!(matches!(svc.generate_id(), Err(Error::NotReady { .. })));
        assert!(svc.check_health().is_err());
    }

    #[tokio::test]
    async fn get_registered_workers_includes_self() {
        let svc = service().await;
        let workers = svc.get_registered_workers().await.unwrap();
        assert!(workers.iter().any(|w| w.worker_id == svc.get_worker_id()));
    }

    #[tokio::test]
    async fn specific_registration_honors_the_requested_worker_id() {
        let svc = SnowflakeIdService::new(
            Arc::new(InMemoryStore::new()),
            0,
            GeneratorConfig::default(),
            CoordinatorConfig::default(),
        )
        .unwrap();
        svc.register_specific(7).await.unwrap();
        assert_eq!(svc.get_worker_id(), 7);
    }
}
