//! Composition root for a terminal.
//!
//! The original design wired its engines through ambient singletons; here
//! a [`TerminalBuilder`] constructs everything once and [`Terminal`] holds
//! the references explicitly. `build()` refuses to yield a core until every
//! dependency is present, so "not yet initialized" is unrepresentable
//! afterwards.

use crate::agent::SyncAgent;
use crate::bus::{Notice, NoticeBus, SubscriberId};
use crate::clock::{Clock, SystemClock};
use crate::config::TerminalConfig;
use crate::error::{Result, TerminalError};
use crate::transport::SyncTransport;
use std::sync::{Arc, Mutex};
use tally_engine::{
    ActorSession, AuditRecord, BranchScope, EventLog, EventPayload, LedgerEvent, Staff,
    StaffDirectory, Store, SyncOperation, SyncQueue, VersionedObject, VersionedObjectStore,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Step-by-step constructor for a [`Terminal`].
#[derive(Default)]
pub struct TerminalBuilder {
    config: Option<TerminalConfig>,
    store: Option<Arc<dyn Store>>,
    staff_directory: Option<Arc<dyn StaffDirectory>>,
    transport: Option<Arc<dyn SyncTransport>>,
    clock: Option<Arc<dyn Clock>>,
}

impl TerminalBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: TerminalConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn staff_directory(mut self, directory: Arc<dyn StaffDirectory>) -> Self {
        self.staff_directory = Some(directory);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the wall clock (tests use a fixed clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Construct the core. Fails with
    /// [`TerminalError::MissingDependency`] until every seam is supplied.
    pub fn build(self) -> Result<Terminal> {
        let config = self
            .config
            .ok_or(TerminalError::MissingDependency("config"))?;
        let store = self.store.ok_or(TerminalError::MissingDependency("store"))?;
        let staff_directory = self
            .staff_directory
            .ok_or(TerminalError::MissingDependency("staff_directory"))?;
        let transport = self
            .transport
            .ok_or(TerminalError::MissingDependency("transport"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let scope = Arc::new(
            BranchScope::new(store.clone()).with_audit_retention(config.audit_retention_ms),
        );
        scope.set_active_branch(&config.branch_id)?;

        let bus = Arc::new(NoticeBus::new());
        {
            let bus = bus.clone();
            scope.set_violation_hook(Arc::new(move |violation| {
                tracing::warn!(
                    active = %violation.active_branch,
                    requested = %violation.requested_branch,
                    operation = %violation.operation,
                    "branch access violation",
                );
                bus.publish(Notice::BranchAccessViolation(violation.clone()));
            }));
        }

        let log = Arc::new(Mutex::new(EventLog::new(
            config.device_id.clone(),
            scope.clone(),
        )));
        let queue = Arc::new(SyncQueue::new(scope.clone()).with_max_retries(config.max_retries));
        let objects = Arc::new(VersionedObjectStore::new(scope.clone()));
        let session = Mutex::new(
            ActorSession::new(
                config.device_id.clone(),
                staff_directory,
                store.clone(),
            )
            .with_ttl(config.session_ttl_ms),
        );

        let agent = Arc::new(SyncAgent::new(
            log.clone(),
            objects.clone(),
            queue.clone(),
            scope.clone(),
            transport,
            bus.clone(),
            clock.clone(),
            config.device_id.clone(),
            config.sync_interval_ms,
        ));

        Ok(Terminal {
            config,
            scope,
            log,
            queue,
            objects,
            session,
            agent,
            bus,
            clock,
        })
    }
}

/// A fully wired terminal core.
pub struct Terminal {
    config: TerminalConfig,
    scope: Arc<BranchScope>,
    log: Arc<Mutex<EventLog>>,
    queue: Arc<SyncQueue>,
    objects: Arc<VersionedObjectStore>,
    session: Mutex<ActorSession>,
    agent: Arc<SyncAgent>,
    bus: Arc<NoticeBus>,
    clock: Arc<dyn Clock>,
}

impl Terminal {
    /// The configuration this core was built with.
    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// Restore persisted state after a restart: verify and resume the
    /// event chain and rebind any unexpired staff session.
    pub fn restore(&self) -> Result<Option<Staff>> {
        let now = self.clock.now_ms();
        {
            let mut log = self.log.lock().map_err(|_| TerminalError::Poisoned)?;
            log.resume_from_storage(now)?;
        }
        let mut session = self.session.lock().map_err(|_| TerminalError::Poisoned)?;
        Ok(session.resume(now)?)
    }

    // ---- sessions ----

    /// Verify staff credentials and bind the actor for subsequent writes.
    pub fn login(&self, code: &str, pin: &str) -> Result<Staff> {
        let now = self.clock.now_ms();
        let mut session = self.session.lock().map_err(|_| TerminalError::Poisoned)?;
        session.expire_if_due(now)?;
        let staff = session.login(code, pin, Uuid::new_v4().to_string(), now)?;
        tracing::info!(staff = %staff.id, "staff logged in");
        Ok(staff)
    }

    /// Reset the actor to the `system` sentinel.
    pub fn logout(&self) -> Result<()> {
        let mut session = self.session.lock().map_err(|_| TerminalError::Poisoned)?;
        session.logout()?;
        tracing::info!("staff logged out");
        Ok(())
    }

    /// The actor currently stamped onto ledger writes.
    pub fn current_actor(&self) -> Result<String> {
        let now = self.clock.now_ms();
        let mut session = self.session.lock().map_err(|_| TerminalError::Poisoned)?;
        session.expire_if_due(now)?;
        Ok(session.current_actor())
    }

    // ---- branch scoping ----

    /// Switch the active branch for all subsequent operations.
    pub fn set_active_branch(&self, branch_id: &str) -> Result<()> {
        self.scope.set_active_branch(branch_id)?;
        Ok(())
    }

    /// The active branch.
    pub fn active_branch(&self) -> Result<String> {
        Ok(self.scope.active_branch()?)
    }

    /// Audit records for a branch, newest first.
    pub fn audit_log(&self, branch_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        Ok(self.scope.audit_log(branch_id, limit)?)
    }

    /// Prune audit records past the retention window.
    pub fn prune_audit(&self, branch_id: &str) -> Result<usize> {
        Ok(self.scope.prune_audit(branch_id, self.clock.now_ms())?)
    }

    // ---- ledger ----

    /// Record a business event, stamped with the session actor and chained
    /// onto this device's log.
    pub fn record(&self, payload: EventPayload) -> Result<LedgerEvent> {
        let actor = self.current_actor()?;
        let branch = self.scope.active_branch()?;
        let mut log = self.log.lock().map_err(|_| TerminalError::Poisoned)?;
        Ok(log.append(&branch, actor, payload, self.clock.now_ms())?)
    }

    /// All events of the active branch in chain order.
    pub fn events(&self) -> Result<Vec<LedgerEvent>> {
        let log = self.log.lock().map_err(|_| TerminalError::Poisoned)?;
        Ok(log.events(self.clock.now_ms())?)
    }

    /// Events still awaiting backend acknowledgment.
    pub fn unsynced_events(&self) -> Result<Vec<LedgerEvent>> {
        let log = self.log.lock().map_err(|_| TerminalError::Poisoned)?;
        Ok(log.unsynced_events(self.clock.now_ms())?)
    }

    /// Verify the active branch's stored chain.
    pub fn verify_chain(&self) -> Result<()> {
        let events = self.events()?;
        Ok(EventLog::verify_chain(&events)?)
    }

    // ---- versioned objects ----

    /// Insert or update a shared entity and enqueue it for sync.
    pub fn upsert(
        &self,
        entity_type: &str,
        id: &str,
        data: serde_json::Value,
    ) -> Result<VersionedObject> {
        let actor = self.current_actor()?;
        let modified_by = format!("{actor}@{}", self.config.device_id);
        Ok(self.objects.upsert(
            entity_type,
            id,
            data,
            &modified_by,
            Uuid::new_v4().to_string(),
            self.clock.now_ms(),
        )?)
    }

    /// Local, branch-scoped read of one entity.
    pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<VersionedObject>> {
        Ok(self.objects.get(entity_type, id, self.clock.now_ms())?)
    }

    /// Local, branch-scoped read of all entities of one type.
    pub fn list(&self, entity_type: &str) -> Result<Vec<VersionedObject>> {
        Ok(self.objects.list(entity_type, self.clock.now_ms())?)
    }

    // ---- sync ----

    /// Handle to the sync agent.
    pub fn agent(&self) -> &Arc<SyncAgent> {
        &self.agent
    }

    /// Operations parked for manual conflict resolution.
    pub fn conflicts(&self) -> Result<Vec<SyncOperation>> {
        Ok(self.queue.conflicts(self.clock.now_ms())?)
    }

    /// Operations that exhausted their retries and need an operator.
    pub fn failed_operations(&self) -> Result<Vec<SyncOperation>> {
        Ok(self.queue.failed(self.clock.now_ms())?)
    }

    /// Subscribe to runtime notices.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<Notice>) {
        self.bus.subscribe()
    }
}
