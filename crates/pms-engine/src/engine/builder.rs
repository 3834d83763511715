//! Engine composition.

use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};

use super::executor::Executor;
use super::{EngineConfig, EngineInner, EngineTask, OrchestrationEngine};
use crate::TRACING_TARGET_ENGINE;
use crate::advise::{Adviser, AdviserRegistry};
use crate::error::{Error, Result};
use crate::event::{BroadcastEventEmitter, EventEmitter};
use crate::execution::{
    MemoryStore, NodeExecutionRepository, NodeExecutionService, PlanExecutionRepository,
    PlanExecutionService, PlanRepository,
};
use crate::facilitate::{Facilitator, FacilitatorRegistry};
use crate::notify::{Notification, NotifyEngine};
use crate::observer::{
    NodeStatusUpdateObserver, OrchestrationEndObserver, OrchestrationStartObserver, Subject,
};
use crate::sdk::SdkResponseRouter;
use crate::step::{Step, StepRegistry, TaskQueue};

/// Builder for [`OrchestrationEngine`].
///
/// Anything not set falls back to an in-memory default: a [`MemoryStore`],
/// the built-in facilitators and advisers, a [`BroadcastEventEmitter`] and
/// the default SDK router. Without a task queue, `TASK` nodes end `ERRORED`.
pub struct EngineBuilder {
    config: EngineConfig,
    plans: Option<Arc<dyn PlanRepository>>,
    plan_executions: Option<Arc<dyn PlanExecutionRepository>>,
    node_executions: Option<Arc<dyn NodeExecutionRepository>>,
    steps: StepRegistry,
    facilitators: FacilitatorRegistry,
    advisers: AdviserRegistry,
    task_queue: Option<Arc<dyn TaskQueue>>,
    events: Option<Arc<dyn EventEmitter>>,
    router: Option<SdkResponseRouter>,
    start_observers: Vec<Arc<dyn OrchestrationStartObserver>>,
    end_observers: Vec<Arc<dyn OrchestrationEndObserver>>,
    node_observers: Vec<Arc<dyn NodeStatusUpdateObserver>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            plans: None,
            plan_executions: None,
            node_executions: None,
            steps: StepRegistry::new(),
            facilitators: FacilitatorRegistry::with_builtins(),
            advisers: AdviserRegistry::with_builtins(),
            task_queue: None,
            events: None,
            router: None,
            start_observers: Vec::new(),
            end_observers: Vec::new(),
            node_observers: Vec::new(),
        }
    }
}

impl EngineBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses one store for plans, plan executions and node executions.
    pub fn store<S>(mut self, store: S) -> Self
    where
        S: PlanRepository + PlanExecutionRepository + NodeExecutionRepository + 'static,
    {
        let store = Arc::new(store);
        self.plans = Some(store.clone());
        self.plan_executions = Some(store.clone());
        self.node_executions = Some(store);
        self
    }

    /// Sets the plan repository.
    pub fn plan_repository(mut self, repository: Arc<dyn PlanRepository>) -> Self {
        self.plans = Some(repository);
        self
    }

    /// Sets the plan execution repository.
    pub fn plan_execution_repository(mut self, repository: Arc<dyn PlanExecutionRepository>) -> Self {
        self.plan_executions = Some(repository);
        self
    }

    /// Sets the node execution repository.
    pub fn node_execution_repository(mut self, repository: Arc<dyn NodeExecutionRepository>) -> Self {
        self.node_executions = Some(repository);
        self
    }

    /// Replaces the step registry.
    pub fn steps(mut self, steps: StepRegistry) -> Self {
        self.steps = steps;
        self
    }

    /// Registers a step.
    pub fn step(mut self, name: impl Into<String>, step: impl Step + 'static) -> Self {
        self.steps = self.steps.register(name, step);
        self
    }

    /// Replaces the facilitator registry.
    pub fn facilitators(mut self, facilitators: FacilitatorRegistry) -> Self {
        self.facilitators = facilitators;
        self
    }

    /// Registers a facilitator next to the built-in ones.
    pub fn facilitator(mut self, name: impl Into<String>, facilitator: impl Facilitator + 'static) -> Self {
        self.facilitators = self.facilitators.register(name, facilitator);
        self
    }

    /// Replaces the adviser registry.
    pub fn advisers(mut self, advisers: AdviserRegistry) -> Self {
        self.advisers = advisers;
        self
    }

    /// Registers an adviser next to the built-in ones.
    pub fn adviser(mut self, name: impl Into<String>, adviser: impl Adviser + 'static) -> Self {
        self.advisers = self.advisers.register(name, adviser);
        self
    }

    /// Sets the delegate task queue.
    pub fn task_queue(mut self, queue: impl TaskQueue + 'static) -> Self {
        self.task_queue = Some(Arc::new(queue));
        self
    }

    /// Sets the lifecycle event sink.
    pub fn event_emitter(mut self, emitter: impl EventEmitter + 'static) -> Self {
        self.events = Some(Arc::new(emitter));
        self
    }

    /// Sets the SDK response router.
    pub fn sdk_router(mut self, router: SdkResponseRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Registers a plan execution start observer.
    pub fn start_observer(mut self, observer: Arc<dyn OrchestrationStartObserver>) -> Self {
        self.start_observers.push(observer);
        self
    }

    /// Registers a plan execution end observer.
    pub fn end_observer(mut self, observer: Arc<dyn OrchestrationEndObserver>) -> Self {
        self.end_observers.push(observer);
        self
    }

    /// Registers a node execution status observer.
    pub fn node_status_observer(mut self, observer: Arc<dyn NodeStatusUpdateObserver>) -> Self {
        self.node_observers.push(observer);
        self
    }

    /// Builds the engine and starts its notification dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<OrchestrationEngine> {
        let handle = Handle::try_current().map_err(|error| {
            Error::configuration()
                .with_message("the engine must be built inside a tokio runtime")
                .with_source(error)
        })?;

        let default_store = Arc::new(MemoryStore::new());
        let plans: Arc<dyn PlanRepository> = match self.plans {
            Some(plans) => plans,
            None => default_store.clone(),
        };
        let plan_executions: Arc<dyn PlanExecutionRepository> = match self.plan_executions {
            Some(plan_executions) => plan_executions,
            None => default_store.clone(),
        };
        let node_executions: Arc<dyn NodeExecutionRepository> = match self.node_executions {
            Some(node_executions) => node_executions,
            None => default_store,
        };
        let events: Arc<dyn EventEmitter> = match self.events {
            Some(events) => events,
            None => Arc::new(BroadcastEventEmitter::default()),
        };

        let node_subject: Arc<Subject<dyn NodeStatusUpdateObserver>> = Arc::new(Subject::new());
        for observer in self.node_observers {
            node_subject.register(observer);
        }
        let start_subject = Subject::new();
        for observer in self.start_observers {
            start_subject.register(observer);
        }
        let end_subject = Subject::new();
        for observer in self.end_observers {
            end_subject.register(observer);
        }

        let (notify, receiver) = NotifyEngine::with_retention(self.config.notify_retention());
        let (ends, _) = broadcast::channel(64);

        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            finalize_attempts = self.config.finalize_attempts,
            default_timeout_secs = self.config.default_timeout_secs,
            notify_retention_secs = self.config.notify_retention_secs,
            steps = ?self.steps,
            task_queue = self.task_queue.is_some(),
            "orchestration engine initialized"
        );

        let inner = Arc::new(EngineInner {
            executor: Executor::new(self.config.max_concurrent_tasks, handle.clone()),
            config: self.config,
            plan_executions: PlanExecutionService::new(plans, plan_executions, node_executions.clone()),
            node_executions: NodeExecutionService::new(node_executions, node_subject),
            notify: Arc::new(notify),
            steps: self.steps,
            facilitators: self.facilitators,
            advisers: self.advisers,
            task_queue: self.task_queue,
            events,
            router: self.router.unwrap_or_default(),
            start_subject,
            end_subject,
            ends,
        });

        spawn_dispatcher(&handle, Arc::downgrade(&inner), receiver);
        Ok(OrchestrationEngine { inner })
    }
}

/// Hands every fired wait to the worker pool.
///
/// The dispatcher holds the engine weakly: once the last engine handle is
/// dropped the notification channel closes and the loop ends.
fn spawn_dispatcher(
    handle: &Handle,
    engine: Weak<EngineInner>,
    mut receiver: mpsc::UnboundedReceiver<Notification>,
) {
    handle.spawn(async move {
        while let Some(notification) = receiver.recv().await {
            let Some(inner) = engine.upgrade() else {
                break;
            };
            OrchestrationEngine { inner }.submit(EngineTask::Notify(notification));
        }
        tracing::debug!(target: TRACING_TARGET_ENGINE, "notification dispatcher stopped");
    });
}
