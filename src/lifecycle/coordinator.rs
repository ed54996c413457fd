//! Session Coordinator
//!
//! Public entry point. Requests are admitted synchronously against the
//! lifecycle machine, run on spawned tokio tasks, and finish by updating the
//! registry, emitting one completion event and resolving the caller's
//! `Completion`.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

use super::completion::Completion;
use super::state::{Continuation, CreatePlan, JoinReply, LifecycleState, Machine, OpId, Phase};
use crate::config::CoordinatorConfig;
use crate::directory::{AdvertisementManager, DirectoryService};
use crate::discovery::{DiscoveryEngine, SearchOutcome, SearchQuery, SearchResult};
use crate::error::{CoordinatorError, JoinError, Result};
use crate::join::{JoinCoordinator, JoinPolicy, NoTravel, Transport, TravelHandler};
use crate::session::{
    ConnectionInfo, CoordinatorEvent, EventEmitter, HostSettings, RegistryChange, SessionDescriptor, SessionRegistry,
};

/// Builder for `SessionCoordinator`
pub struct SessionCoordinatorBuilder {
    config: CoordinatorConfig,
    directory: Option<Arc<dyn DirectoryService>>,
    transport: Option<Arc<dyn Transport>>,
    travel: Arc<dyn TravelHandler>,
}

impl SessionCoordinatorBuilder {
    pub fn directory(mut self, directory: Arc<dyn DirectoryService>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn travel(mut self, travel: Arc<dyn TravelHandler>) -> Self {
        self.travel = travel;
        self
    }

    /// Validate the configuration and wire the components
    pub fn build(self) -> Result<SessionCoordinator> {
        self.config.validate()?;
        let directory = self
            .directory
            .ok_or_else(|| CoordinatorError::InterfaceUnavailable("no directory service".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| CoordinatorError::InterfaceUnavailable("no transport".to_string()))?;

        info!(
            "Session coordinator using {} directory and {} transport",
            directory.backend_name(),
            transport.transport_type()
        );

        let policy = JoinPolicy::from_config(&self.config);
        Ok(SessionCoordinator {
            inner: Arc::new(Inner {
                machine: Mutex::new(Machine::new()),
                registry: SessionRegistry::new(),
                advertisements: AdvertisementManager::new(directory.clone()),
                discovery: DiscoveryEngine::new(directory.clone()),
                joins: JoinCoordinator::new(directory, transport, policy),
                travel: self.travel,
                events: EventEmitter::default(),
                config: self.config,
            }),
        })
    }
}

/// Coordinates hosting, searching, joining and teardown of one game session
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoordinatorConfig,
    machine: Mutex<Machine>,
    registry: SessionRegistry,
    advertisements: AdvertisementManager,
    discovery: DiscoveryEngine,
    joins: JoinCoordinator,
    travel: Arc<dyn TravelHandler>,
    events: EventEmitter,
}

impl SessionCoordinator {
    pub fn builder(config: CoordinatorConfig) -> SessionCoordinatorBuilder {
        SessionCoordinatorBuilder {
            config,
            directory: None,
            transport: None,
            travel: Arc::new(NoTravel),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.machine.lock().state()
    }

    pub fn pending_phase(&self) -> Option<Phase> {
        self.inner.machine.lock().pending_phase()
    }

    pub fn current_local(&self) -> Option<SessionDescriptor> {
        self.inner.registry.current_local()
    }

    pub fn current_remote(&self) -> Option<ConnectionInfo> {
        self.inner.registry.current_remote()
    }

    /// Subscribe to caller-facing events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to registry change notifications
    pub fn registry_changes(&self) -> broadcast::Receiver<RegistryChange> {
        self.inner.registry.subscribe()
    }

    /// Host a new session.
    ///
    /// When a session already exists it is destroyed first and the create is
    /// reissued with `settings` once the destroy succeeds.
    pub fn create(&self, settings: HostSettings, timeout: Option<Duration>) -> Result<Completion<bool>> {
        let timeout = timeout.unwrap_or_else(|| self.inner.config.create_timeout());
        let (tx, rx) = oneshot::channel();

        let plan = {
            let mut machine = self.inner.machine.lock();
            machine.admit(Phase::Creating)?;
            let old = machine.state();
            let has_session = self.inner.registry.has_session();
            if has_session {
                info!("Session exists, destroying before recreating as {}", settings.match_type);
            }
            let plan = machine.begin_create(settings.clone(), timeout, tx, has_session);
            self.inner.events.emit_state(old, machine.state());
            plan
        };

        match plan {
            CreatePlan::Create(op) => self.inner.launch_create(op, settings, timeout),
            CreatePlan::DestroyFirst(op) => self.inner.launch_destroy(op, self.inner.config.destroy_timeout()),
        }
        Ok(Completion::new(rx))
    }

    /// Search for sessions. Works with or without a hosted session.
    pub fn find(&self, query: SearchQuery, timeout: Option<Duration>) -> Result<Completion<SearchOutcome>> {
        let timeout = timeout.unwrap_or_else(|| self.inner.config.find_timeout());
        let (tx, rx) = oneshot::channel();

        let op = {
            let mut machine = self.inner.machine.lock();
            machine.admit(Phase::Finding)?;
            let old = machine.state();
            let op = machine.begin_find(tx);
            self.inner.events.emit_state(old, machine.state());
            op
        };

        self.inner.launch_find(op, query, timeout);
        Ok(Completion::new(rx))
    }

    /// Join a session from the latest search.
    ///
    /// Fails immediately with `AlreadyInSession` while a join is pending or a
    /// remote session is already joined.
    pub fn join(
        &self,
        result: SearchResult,
        timeout: Option<Duration>,
    ) -> Result<Completion<std::result::Result<ConnectionInfo, JoinError>>> {
        let timeout = timeout.unwrap_or_else(|| self.inner.config.join_timeout());
        let (tx, rx) = oneshot::channel();

        let op = {
            let mut machine = self.inner.machine.lock();
            machine.admit(Phase::Joining)?;
            if let Some(current) = self.inner.registry.current_remote() {
                warn!("Refusing join to {}: already in {}", result.descriptor.id, current.session_id);
                return Err(JoinError::AlreadyInSession.into());
            }
            let old = machine.state();
            let op = machine.begin_join(tx);
            self.inner.events.emit_state(old, machine.state());
            op
        };

        self.inner.launch_join(op, result, timeout);
        Ok(Completion::new(rx))
    }

    /// Mark the hosted match as started and refresh its advertisement
    pub fn start(&self, timeout: Option<Duration>) -> Result<Completion<bool>> {
        let timeout = timeout.unwrap_or_else(|| self.inner.config.start_timeout());
        let (tx, rx) = oneshot::channel();

        let op = {
            let mut machine = self.inner.machine.lock();
            machine.admit(Phase::Starting)?;
            if self.inner.registry.current_local().is_none() {
                warn!("Start requested without a hosted session");
                self.inner.events.emit_start(false);
                return Ok(Completion::ready(false));
            }
            let old = machine.state();
            let op = machine.begin_start(tx);
            self.inner.events.emit_state(old, machine.state());
            op
        };

        self.inner.launch_start(op, timeout);
        Ok(Completion::new(rx))
    }

    /// Tear down the hosted and/or joined session
    pub fn destroy(&self, timeout: Option<Duration>) -> Result<Completion<bool>> {
        let timeout = timeout.unwrap_or_else(|| self.inner.config.destroy_timeout());
        let (tx, rx) = oneshot::channel();

        let op = {
            let mut machine = self.inner.machine.lock();
            machine.admit(Phase::Destroying)?;
            if !self.inner.registry.has_session() {
                warn!("Destroy requested without a session");
                self.inner.events.emit_destroy(false);
                return Ok(Completion::ready(false));
            }
            let old = machine.state();
            let op = machine.begin_destroy(tx);
            self.inner.events.emit_state(old, machine.state());
            op
        };

        self.inner.launch_destroy(op, timeout);
        Ok(Completion::new(rx))
    }

    /// Update the hosted session's player count and refresh its advertisement
    pub async fn set_occupancy(&self, occupancy: u32) -> Result<SessionDescriptor> {
        let (updated, previous) = {
            let machine = self.inner.machine.lock();
            if machine.is_shut_down() {
                return Err(CoordinatorError::ShutDown);
            }
            if let Some(phase) = machine.pending_phase() {
                return Err(CoordinatorError::AlreadyInProgress(phase));
            }
            let local = self
                .inner
                .registry
                .current_local()
                .ok_or_else(|| CoordinatorError::Rejected("no hosted session".to_string()))?;
            if occupancy > local.capacity {
                return Err(CoordinatorError::Rejected(format!(
                    "occupancy {} exceeds capacity {}",
                    occupancy, local.capacity
                )));
            }
            let updated = self
                .inner
                .registry
                .update_local(|d| d.occupancy = occupancy)
                .map_err(|e| CoordinatorError::Rejected(e.to_string()))?;
            (updated, local.occupancy)
        };

        if let Err(e) = self.inner.advertisements.refresh(&updated).await {
            warn!("Occupancy refresh for {} failed, keeping {}: {}", updated.id, previous, e);
            let _ = self.inner.registry.update_local(|d| {
                if d.id == updated.id {
                    d.occupancy = previous;
                }
            });
            return Err(e.into());
        }
        Ok(updated)
    }

    /// Abandon pending work and withdraw the hosted session, whatever the
    /// current state. Every later request fails with `ShutDown`.
    pub async fn shutdown(&self) -> bool {
        self.inner.shutdown().await
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        // A pending create may still publish after the drop
        let needs_teardown = {
            let machine = self.inner.machine.lock();
            !machine.is_shut_down()
                && (machine.pending_phase().is_some() || self.inner.registry.current_local().is_some())
        };
        if !needs_teardown {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Coordinator dropped while hosting or busy, shutting down");
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    inner.shutdown().await;
                });
            }
            Err(_) => error!("Coordinator dropped outside a runtime; hosted session may stay advertised"),
        }
    }
}

impl Inner {
    fn launch_create(self: &Arc<Self>, op: OpId, settings: HostSettings, timeout: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_create(op, settings, timeout).await;
        });
    }

    fn launch_destroy(self: &Arc<Self>, op: OpId, timeout: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_destroy(op, timeout).await;
        });
    }

    fn launch_find(self: &Arc<Self>, op: OpId, query: SearchQuery, timeout: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_find(op, query, timeout).await;
        });
    }

    fn launch_join(self: &Arc<Self>, op: OpId, result: SearchResult, timeout: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_join(op, result, timeout).await;
        });
    }

    fn launch_start(self: &Arc<Self>, op: OpId, timeout: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_start(op, timeout).await;
        });
    }

    async fn run_create(self: Arc<Self>, op: OpId, settings: HostSettings, timeout: Duration) {
        if let Err(reason) = settings.validate() {
            warn!("Create rejected: {}", reason);
            self.fail_create(op);
            return;
        }

        let descriptor = settings.to_descriptor();
        debug!("Creating session {} ({})", descriptor.name, descriptor.id);

        let published = match tokio::time::timeout(timeout, self.advertisements.publish(&descriptor)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!("Create failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Create timed out after {:?}, withdrawing partial advertisement", timeout);
                self.advertisements.abandon(&descriptor.id).await;
                false
            }
        };
        if !published {
            self.fail_create(op);
            return;
        }

        let registered = {
            let mut machine = self.machine.lock();
            if machine.is_current(op) && self.registry.register_local(descriptor.clone()).is_ok() {
                let old = machine.state();
                let reply = machine.finish_create(op, true);
                self.events.emit_state(old, machine.state());
                self.events.emit_create(true, Some(descriptor.id.clone()));
                if let Some(reply) = reply {
                    let _ = reply.send(true);
                }
                true
            } else {
                false
            }
        };

        if registered {
            info!("Session {} created", descriptor.id);
            self.travel.host_travel(&descriptor);
            return;
        }

        warn!("Create {} was abandoned after publishing, withdrawing", descriptor.id);
        self.advertisements.abandon(&descriptor.id).await;
        self.fail_create(op);
    }

    fn fail_create(&self, op: OpId) {
        let mut machine = self.machine.lock();
        let old = machine.state();
        if let Some(reply) = machine.finish_create(op, false) {
            self.events.emit_state(old, machine.state());
            self.events.emit_create(false, None);
            let _ = reply.send(false);
        }
    }

    async fn run_destroy(self: Arc<Self>, op: OpId, timeout: Duration) {
        let success = match self.advertisements.current_handle() {
            Some(handle) => match tokio::time::timeout(timeout, self.advertisements.unpublish(&handle)).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!("Destroy failed: {}", e);
                    false
                }
                Err(_) => {
                    warn!("Destroy timed out after {:?}", timeout);
                    false
                }
            },
            None => true,
        };

        let resumed = {
            let mut machine = self.machine.lock();
            if !machine.is_current(op) {
                return;
            }
            if success {
                self.registry.clear_local();
                self.registry.clear_remote();
            }
            let old = machine.state();
            let Some(done) = machine.finish_destroy(op, success, self.registry.has_session()) else {
                return;
            };
            self.events.emit_state(old, machine.state());
            self.events.emit_destroy(success);
            if let Some(reply) = done.reply {
                let _ = reply.send(success);
            }

            match done.continuation {
                Some(Continuation::Recreate { settings, timeout, reply }) if success => {
                    let old = machine.state();
                    let next = machine.resume_create(reply);
                    self.events.emit_state(old, machine.state());
                    Some((next, settings, timeout))
                }
                Some(Continuation::Recreate { reply, .. }) => {
                    warn!("Recreate dropped: the existing session could not be destroyed");
                    self.events.emit_create(false, None);
                    let _ = reply.send(false);
                    None
                }
                None => None,
            }
        };

        if let Some((next, settings, timeout)) = resumed {
            info!("Recreating session as {} after destroy", settings.match_type);
            self.launch_create(next, settings, timeout);
        }
    }

    async fn run_find(self: Arc<Self>, op: OpId, query: SearchQuery, timeout: Duration) {
        let outcome = match self.discovery.search(&query, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Search could not start: {}", e);
                SearchOutcome::failed()
            }
        };
        let success = outcome.success;
        let results: Vec<SearchResult> = outcome.results.collect();

        let mut machine = self.machine.lock();
        let old = machine.state();
        if let Some(reply) = machine.finish_find(op) {
            self.events.emit_state(old, machine.state());
            self.events.emit_find(results.clone(), success);
            let _ = reply.send(SearchOutcome {
                results: results.into(),
                success,
            });
        }
    }

    async fn run_join(self: Arc<Self>, op: OpId, result: SearchResult, timeout: Duration) {
        let mut outcome = self.joins.join(&result, timeout).await;

        let joined = {
            let mut machine = self.machine.lock();
            if !machine.is_current(op) {
                debug!("Discarding join result for abandoned operation {}", op);
                return;
            }
            if let Ok(connection) = &outcome {
                if let Err(e) = self.registry.set_remote(connection.clone()) {
                    warn!("Could not record joined session: {}", e);
                    outcome = Err(JoinError::AlreadyInSession);
                }
            }
            let old = machine.state();
            let reply: Option<JoinReply> = machine.finish_join(op, outcome.is_ok());
            self.events.emit_state(old, machine.state());
            self.events.emit_join(&outcome);
            let joined = outcome.as_ref().ok().cloned();
            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
            joined
        };

        if let Some(connection) = joined {
            self.travel.client_travel(&connection);
        }
    }

    async fn run_start(self: Arc<Self>, op: OpId, timeout: Duration) {
        let mut previous = false;
        let success = match self.registry.update_local(|d| {
            previous = d.in_progress;
            d.in_progress = true;
        }) {
            Ok(descriptor) => match tokio::time::timeout(timeout, self.advertisements.refresh(&descriptor)).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!("Start failed: {}", e);
                    false
                }
                Err(_) => {
                    warn!("Start timed out after {:?}", timeout);
                    false
                }
            },
            Err(e) => {
                warn!("Start failed: {}", e);
                false
            }
        };

        let mut machine = self.machine.lock();
        if !machine.is_current(op) {
            return;
        }
        if !success {
            let _ = self.registry.update_local(|d| d.in_progress = previous);
        }
        let old = machine.state();
        if let Some(reply) = machine.finish_start(op) {
            self.events.emit_state(old, machine.state());
            self.events.emit_start(success);
            let _ = reply.send(success);
        }
    }

    async fn shutdown(&self) -> bool {
        let local = {
            let mut machine = self.machine.lock();
            if machine.is_shut_down() {
                return true;
            }
            let local = self.registry.current_local();
            let old = machine.state();
            let abandoned = machine.shut_down(local.is_some());
            if let Some(phase) = abandoned.phase() {
                warn!("Shutdown abandons pending {}", phase);
            }
            self.events.emit_state(old, machine.state());
            local
        };

        info!("Shutting down session coordinator");
        let mut success = true;
        if let Some(descriptor) = &local {
            let withdrawn = match self.advertisements.current_handle() {
                Some(handle) => matches!(
                    tokio::time::timeout(self.config.destroy_timeout(), self.advertisements.unpublish(&handle)).await,
                    Ok(Ok(()))
                ),
                None => false,
            };
            if !withdrawn {
                warn!("Could not withdraw {} cleanly, abandoning it", descriptor.id);
                self.advertisements.abandon(&descriptor.id).await;
                success = false;
            }
        }

        let mut machine = self.machine.lock();
        self.registry.clear_local();
        self.registry.clear_remote();
        let old = machine.state();
        machine.settle_idle();
        self.events.emit_state(old, machine.state());
        info!("Session coordinator shut down");
        success
    }
}
