use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{Finalization, OrchestrationEngine};
use crate::ErrorKind;
use crate::advise::AdviserResponse;
use crate::error::Result;
use crate::execution::{
    MemoryStore, NodeExecution, NodeExecutionRepository, PlanExecution, PlanExecutionRepository,
    PlanRepository, UpdateNodeExecution,
};
use crate::notify::{DeliveryOutcome, ResponseData};
use crate::observer::{Observer, OrchestrationEndObserver};
use crate::plan::{AdviserObtainment, FacilitatorObtainment, Plan, PlanNode, RefObject, SkipGraphType};
use crate::sdk::{
    AddStepDetailsInstanceRequest, HandleAdviserResponseRequest, HandleProgressRequest, HandleStepResponseRequest, SdkResponseEvent,
    SdkResponseEventType,
};
use crate::step::{AsyncExecutable, ChannelTaskQueue, Step, StepContext, TaskRequest};
use crate::types::{
    Ambiance, CorrelationId, ExecutionMetadata, FailureInfo, FailureType, NodeExecutionId,
    PlanExecutionId, PlanId, PlanNodeId, Status, StepResponse, StepType,
};

const WAIT: Duration = Duration::from_secs(5);

struct Succeed;

#[async_trait]
impl Step for Succeed {
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse> {
        Ok(StepResponse::succeeded().with_outcome("value", ctx.parameters().clone()))
    }
}

struct Echo;

#[async_trait]
impl Step for Echo {
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse> {
        Ok(ctx
            .inputs
            .iter()
            .fold(StepResponse::succeeded(), |response, (name, value)| {
                response.with_outcome(name.clone(), value.clone())
            }))
    }
}

struct Callback;

#[async_trait]
impl Step for Callback {
    async fn execute_async(&self, ctx: &StepContext) -> Result<AsyncExecutable> {
        let callback: String = ctx.parameters_as()?;
        Ok(AsyncExecutable::new([CorrelationId::new(callback)]))
    }
}

struct Flaky {
    calls: Arc<AtomicUsize>,
    failures: usize,
}

#[async_trait]
impl Step for Flaky {
    async fn execute_sync(&self, _ctx: &StepContext) -> Result<StepResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if call < self.failures {
            StepResponse::failed(FailureInfo::new("flaked").with_type(FailureType::Connectivity))
        } else {
            StepResponse::succeeded()
        })
    }
}

struct FanOut;

#[async_trait]
impl Step for FanOut {
    async fn obtain_children(&self, ctx: &StepContext) -> Result<Vec<PlanNodeId>> {
        ctx.parameters_as()
    }
}

struct Delegate;

#[async_trait]
impl Step for Delegate {
    async fn obtain_task(&self, ctx: &StepContext) -> Result<TaskRequest> {
        Ok(TaskRequest::new("ECHO", ctx.parameters().clone()))
    }
}

#[derive(Default)]
struct CountEnds(AtomicUsize);

impl Observer for CountEnds {}

impl OrchestrationEndObserver for CountEnds {
    fn on_end(&self, _ambiance: &Ambiance, _status: Status) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Rejects every conditional plan status write except one allowed from any
/// flowing status.
struct RejectingStore(MemoryStore);

#[async_trait]
impl PlanRepository for RejectingStore {
    async fn save_plan(&self, plan: Plan) -> Result<Arc<Plan>> {
        self.0.save_plan(plan).await
    }

    async fn find_plan(&self, plan_id: PlanId) -> Result<Arc<Plan>> {
        self.0.find_plan(plan_id).await
    }
}

#[async_trait]
impl PlanExecutionRepository for RejectingStore {
    async fn create_plan_execution(&self, execution: PlanExecution) -> Result<PlanExecution> {
        self.0.create_plan_execution(execution).await
    }

    async fn find_plan_execution(&self, id: PlanExecutionId) -> Result<PlanExecution> {
        self.0.find_plan_execution(id).await
    }

    async fn update_plan_execution_status(
        &self,
        id: PlanExecutionId,
        status: Status,
        allowed_from: &[Status],
    ) -> Result<Option<PlanExecution>> {
        if allowed_from != Status::FLOWING {
            return Ok(None);
        }
        self.0
            .update_plan_execution_status(id, status, allowed_from)
            .await
    }
}

#[async_trait]
impl NodeExecutionRepository for RejectingStore {
    async fn create_node_execution(&self, execution: NodeExecution) -> Result<NodeExecution> {
        self.0.create_node_execution(execution).await
    }

    async fn find_node_execution(&self, id: NodeExecutionId) -> Result<NodeExecution> {
        self.0.find_node_execution(id).await
    }

    async fn update_node_execution(
        &self,
        id: NodeExecutionId,
        update: UpdateNodeExecution,
        allowed_from: Option<&[Status]>,
    ) -> Result<Option<NodeExecution>> {
        self.0.update_node_execution(id, update, allowed_from).await
    }

    async fn record_adviser_response(
        &self,
        id: NodeExecutionId,
        response: AdviserResponse,
    ) -> Result<Option<NodeExecution>> {
        self.0.record_adviser_response(id, response).await
    }

    async fn list_node_executions(&self, plan_execution_id: PlanExecutionId) -> Result<Vec<NodeExecution>> {
        self.0.list_node_executions(plan_execution_id).await
    }

    async fn list_children(&self, parent_id: NodeExecutionId) -> Result<Vec<NodeExecution>> {
        self.0.list_children(parent_id).await
    }
}

fn engine() -> OrchestrationEngine {
    OrchestrationEngine::builder()
        .step("SUCCEED", Succeed)
        .step("ECHO", Echo)
        .step("CALLBACK", Callback)
        .step("FAN_OUT", FanOut)
        .step("DELEGATE", Delegate)
        .build()
        .unwrap()
}

fn node(identifier: &str, step: &str, facilitator: &str) -> PlanNode {
    PlanNode::new(identifier, StepType::new(step)).with_facilitator(FacilitatorObtainment::new(facilitator))
}

fn plan(start: &PlanNode, rest: &[&PlanNode]) -> Plan {
    rest.iter()
        .fold(Plan::builder().add_node(start.clone()), |builder, node| {
            builder.add_node((*node).clone())
        })
        .starting_node_id(start.id)
        .build()
        .unwrap()
}

async fn run(engine: &OrchestrationEngine, plan: Plan) -> PlanExecution {
    let execution = engine
        .start_execution(plan, ExecutionMetadata::default())
        .await
        .unwrap();
    tokio::time::timeout(WAIT, engine.wait_for_completion(execution.id))
        .await
        .expect("plan execution did not finish")
        .unwrap()
}

async fn nodes(engine: &OrchestrationEngine, id: PlanExecutionId) -> Vec<NodeExecution> {
    engine.node_executions().list_current(id).await.unwrap()
}

fn by_identifier<'a>(nodes: &'a [NodeExecution], identifier: &str) -> &'a NodeExecution {
    nodes
        .iter()
        .find(|n| n.node.identifier == identifier)
        .unwrap()
}

async fn wait_for_status(engine: &OrchestrationEngine, id: PlanExecutionId, status: Status) -> NodeExecution {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(node) = nodes(engine, id)
                .await
                .into_iter()
                .find(|n| n.status == status)
            {
                return node;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("node never reached the status")
}

fn payload(response: StepResponse) -> ResponseData {
    ResponseData::Payload(serde_json::to_value(response).unwrap())
}

#[tokio::test]
async fn sync_then_async_chain_succeeds() {
    let engine = engine();
    let second = node("second", "CALLBACK", "ASYNC").with_parameters(json!("cb-second"));
    let first = node("first", "SUCCEED", "SYNC")
        .with_parameters(json!(1))
        .with_adviser(AdviserObtainment::new("NEXT_STEP").with_parameters(json!({"next_node_id": second.id})));

    let callback = CorrelationId::from("cb-second");
    let response = payload(StepResponse::succeeded().with_outcome("answer", json!(42)));
    assert_eq!(engine.notify().deliver(&callback, response), DeliveryOutcome::Parked);

    let execution = run(&engine, plan(&first, &[&second])).await;
    assert_eq!(execution.status, Status::Succeeded);
    assert!(execution.end_ts.is_some());

    let nodes = nodes(&engine, execution.id).await;
    assert_eq!(nodes.len(), 2);
    let (a, b) = (by_identifier(&nodes, "first"), by_identifier(&nodes, "second"));
    assert_eq!(a.status, Status::Succeeded);
    assert_eq!(a.next_id, Some(b.id));
    assert_eq!(b.previous_id, Some(a.id));
    assert_eq!(b.outcomes["answer"], json!(42));
    assert!(b.end_ts.is_some());

    let again = engine
        .notify()
        .deliver(&callback, payload(StepResponse::succeeded()));
    assert_eq!(again, DeliveryOutcome::Unknown);
}

#[tokio::test]
async fn async_error_fails_the_plan() {
    let engine = engine();
    let second = node("second", "CALLBACK", "ASYNC").with_parameters(json!("cb-error"));
    let first = node("first", "SUCCEED", "SYNC")
        .with_adviser(AdviserObtainment::new("NEXT_STEP").with_parameters(json!({"next_node_id": second.id})));
    let outcome = engine
        .notify()
        .deliver_error(&CorrelationId::from("cb-error"), FailureInfo::new("remote crashed"));
    assert_eq!(outcome, DeliveryOutcome::Parked);

    let execution = run(&engine, plan(&first, &[&second])).await;
    assert_eq!(execution.status, Status::Failed);

    let nodes = nodes(&engine, execution.id).await;
    assert_eq!(nodes.len(), 2);
    let (a, b) = (by_identifier(&nodes, "first"), by_identifier(&nodes, "second"));
    assert_eq!(a.status, Status::Succeeded);
    assert_eq!(a.next_id, Some(b.id));
    assert_eq!(b.status, Status::Failed);
    assert_eq!(b.failure_info.as_ref().unwrap().message, "remote crashed");
}

#[tokio::test]
async fn children_fan_out_and_roll_up() {
    let engine = engine();
    let left = node("left", "SUCCEED", "SYNC");
    let right = node("right", "SUCCEED", "SYNC");
    let parent = node("parent", "FAN_OUT", "CHILDREN").with_parameters(json!([left.id, right.id]));

    let execution = run(&engine, plan(&parent, &[&left, &right])).await;
    assert_eq!(execution.status, Status::Succeeded);

    let nodes = nodes(&engine, execution.id).await;
    let parent = by_identifier(&nodes, "parent");
    assert_eq!(parent.status, Status::Succeeded);
    let children = engine
        .node_executions()
        .list_children(parent.id)
        .await
        .unwrap();
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|c| c.status == Status::Succeeded));
    assert!(children.iter().all(|c| c.notify_id.is_some()));
    assert!(children.iter().all(|c| c.ambiance.levels.len() == 2));
}

#[tokio::test]
async fn failing_child_fails_the_parent() {
    let engine = OrchestrationEngine::builder()
        .step("FAN_OUT", FanOut)
        .step("SUCCEED", Succeed)
        .step(
            "FLAKY",
            Flaky {
                calls: Arc::default(),
                failures: usize::MAX,
            },
        )
        .build()
        .unwrap();
    let good = node("good", "SUCCEED", "SYNC");
    let bad = node("bad", "FLAKY", "SYNC");
    let parent = node("parent", "FAN_OUT", "CHILDREN").with_parameters(json!([good.id, bad.id]));

    let execution = run(&engine, plan(&parent, &[&good, &bad])).await;
    assert_eq!(execution.status, Status::Failed);
    let nodes = nodes(&engine, execution.id).await;
    assert_eq!(by_identifier(&nodes, "parent").status, Status::Failed);
    assert_eq!(by_identifier(&nodes, "good").status, Status::Succeeded);
}

#[tokio::test]
async fn retry_adviser_retries_until_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = OrchestrationEngine::builder()
        .step(
            "FLAKY",
            Flaky {
                calls: Arc::clone(&calls),
                failures: 2,
            },
        )
        .build()
        .unwrap();
    let flaky = node("flaky", "FLAKY", "SYNC")
        .with_adviser(AdviserObtainment::new("RETRY").with_parameters(json!({"retry_count": 3})));

    let execution = run(&engine, plan(&flaky, &[])).await;
    assert_eq!(execution.status, Status::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let current = nodes(&engine, execution.id).await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].retry_ids.len(), 2);
    assert_eq!(current[0].ambiance.current_level().map(|l| l.retry_index), Some(2));

    let all = engine
        .plan_executions()
        .calculate_status(execution.id)
        .await
        .unwrap();
    assert_eq!(all, Status::Succeeded);
}

#[tokio::test]
async fn exhausted_retries_keep_the_failure() {
    let engine = OrchestrationEngine::builder()
        .step(
            "FLAKY",
            Flaky {
                calls: Arc::default(),
                failures: usize::MAX,
            },
        )
        .build()
        .unwrap();
    let flaky = node("flaky", "FLAKY", "SYNC")
        .with_adviser(AdviserObtainment::new("RETRY").with_parameters(json!({"retry_count": 1, "wait_intervals_ms": [10]})));

    let execution = run(&engine, plan(&flaky, &[])).await;
    assert_eq!(execution.status, Status::Failed);
    let current = nodes(&engine, execution.id).await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].retry_ids.len(), 1);
}

#[tokio::test]
async fn ignore_failure_moves_on() {
    let engine = OrchestrationEngine::builder()
        .step("SUCCEED", Succeed)
        .step(
            "FLAKY",
            Flaky {
                calls: Arc::default(),
                failures: usize::MAX,
            },
        )
        .build()
        .unwrap();
    let after = node("after", "SUCCEED", "SYNC");
    let flaky = node("flaky", "FLAKY", "SYNC").with_adviser(
        AdviserObtainment::new("IGNORE_FAILURE").with_parameters(json!({"next_node_id": after.id})),
    );

    let execution = run(&engine, plan(&flaky, &[&after])).await;
    assert_eq!(execution.status, Status::Succeeded);
    let nodes = nodes(&engine, execution.id).await;
    assert_eq!(by_identifier(&nodes, "flaky").status, Status::IgnoreFailed);
    assert_eq!(by_identifier(&nodes, "after").status, Status::Succeeded);
}

#[tokio::test]
async fn abort_ends_the_plan_aborted() {
    let engine = engine();
    let waiting = node("waiting", "CALLBACK", "ASYNC").with_parameters(json!("cb-never"));
    let execution = engine
        .start_execution(plan(&waiting, &[]), ExecutionMetadata::default())
        .await
        .unwrap();
    wait_for_status(&engine, execution.id, Status::AsyncWaiting).await;

    let aborted = engine.abort_plan_execution(execution.id).await.unwrap();
    assert_eq!(aborted, 1);

    let finished = tokio::time::timeout(WAIT, engine.wait_for_completion(execution.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, Status::Aborted);
    assert_eq!(nodes(&engine, execution.id).await[0].status, Status::Aborted);
    assert!(!engine.notify().is_registered(&CorrelationId::from("cb-never")));

    let err = engine
        .abort_plan_execution(execution.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn async_wait_expires_after_timeout() {
    let engine = engine();
    let waiting = node("waiting", "CALLBACK", "ASYNC")
        .with_parameters(json!("cb-slow"))
        .with_timeout_ms(20);

    let execution = run(&engine, plan(&waiting, &[])).await;
    assert_eq!(execution.status, Status::Expired);
    let failure = nodes(&engine, execution.id).await[0]
        .failure_info
        .clone()
        .unwrap();
    assert!(failure.has_type(FailureType::Timeout));

    let late = engine
        .notify()
        .deliver(&CorrelationId::from("cb-slow"), payload(StepResponse::succeeded()));
    assert_eq!(late, DeliveryOutcome::Unknown);
}

#[tokio::test]
async fn concurrent_finalizers_accept_exactly_one() {
    let ends = Arc::new(CountEnds::default());
    let engine = OrchestrationEngine::builder()
        .end_observer(ends.clone())
        .build()
        .unwrap();
    let execution = engine
        .plan_executions()
        .create(PlanExecution::new(PlanId::new(), ExecutionMetadata::default()))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        engine.finalize_plan(execution.id, Status::Succeeded),
        engine.finalize_plan(execution.id, Status::Failed),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let accepted = outcomes
        .iter()
        .filter(|o| matches!(o, Finalization::Accepted(_)))
        .count();
    let superseded = outcomes
        .iter()
        .filter(|o| matches!(o, Finalization::Superseded(_)))
        .count();
    assert_eq!((accepted, superseded), (1, 1));
    assert_eq!(ends.0.load(Ordering::SeqCst), 1);

    let stored = engine.plan_executions().get(execution.id).await.unwrap();
    assert!(outcomes.contains(&Finalization::Accepted(stored.status)));
}

#[tokio::test]
async fn rejected_finalization_falls_back_to_errored() {
    let ends = Arc::new(CountEnds::default());
    let engine = OrchestrationEngine::builder()
        .store(RejectingStore(MemoryStore::new()))
        .end_observer(ends.clone())
        .build()
        .unwrap();
    let execution = engine
        .plan_executions()
        .create(PlanExecution::new(PlanId::new(), ExecutionMetadata::default()))
        .await
        .unwrap();

    let outcome = engine
        .finalize_plan(execution.id, Status::Succeeded)
        .await
        .unwrap();
    assert_eq!(outcome, Finalization::FellBack);
    let stored = engine.plan_executions().get(execution.id).await.unwrap();
    assert_eq!(stored.status, Status::Errored);
    assert_eq!(ends.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sdk_responses_update_and_finish_the_node() {
    let engine = engine();
    let waiting = node("waiting", "CALLBACK", "ASYNC").with_parameters(json!("cb-sdk"));
    let execution = engine
        .start_execution(plan(&waiting, &[]), ExecutionMetadata::default())
        .await
        .unwrap();
    let parked = wait_for_status(&engine, execution.id, Status::AsyncWaiting).await;
    let ambiance = parked.ambiance.clone();

    let progress = HandleProgressRequest {
        node_execution_id: parked.id,
        progress: json!({"percent": 50}),
    };
    let details = AddStepDetailsInstanceRequest {
        node_execution_id: parked.id,
        name: "logs".into(),
        data: json!({"lines": 12}),
    };
    let finish = HandleStepResponseRequest {
        node_execution_id: parked.id,
        step_response: StepResponse::succeeded(),
    };
    for event in [
        SdkResponseEvent::new(SdkResponseEventType::HandleProgress, ambiance.clone(), &progress).unwrap(),
        SdkResponseEvent::new(SdkResponseEventType::AddStepDetailsInstance, ambiance.clone(), &details).unwrap(),
        SdkResponseEvent::new(SdkResponseEventType::HandleStepResponse, ambiance, &finish).unwrap(),
    ] {
        engine.handle_sdk_response(event).await.unwrap();
    }

    let finished = tokio::time::timeout(WAIT, engine.wait_for_completion(execution.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, Status::Succeeded);

    let node = engine.node_executions().get(parked.id).await.unwrap();
    assert_eq!(node.progress.len(), 1);
    assert_eq!(node.progress[0].data["percent"], 50);
    assert_eq!(node.step_details[0].name, "logs");
}

#[tokio::test]
async fn sdk_response_for_unknown_node_is_not_found() {
    let engine = engine();
    let request = HandleStepResponseRequest {
        node_execution_id: NodeExecutionId::new(),
        step_response: StepResponse::succeeded(),
    };
    let event = SdkResponseEvent::new(
        SdkResponseEventType::HandleStepResponse,
        Ambiance::new(PlanId::new(), PlanExecutionId::new()),
        &request,
    )
    .unwrap();
    let err = engine.handle_sdk_response(event).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn skipped_node_succeeds_without_running() {
    let engine = engine();
    let skipped = node("skipped", "CALLBACK", "ASYNC")
        .with_parameters(json!("cb-skipped"))
        .with_skip(SkipGraphType::SkipNode);

    let execution = run(&engine, plan(&skipped, &[])).await;
    assert_eq!(execution.status, Status::Succeeded);
    assert_eq!(nodes(&engine, execution.id).await[0].status, Status::Skipped);
    assert!(!engine.notify().is_registered(&CorrelationId::from("cb-skipped")));
}

#[tokio::test]
async fn delegate_task_round_trip() {
    let (queue, mut tasks) = ChannelTaskQueue::new();
    let engine = OrchestrationEngine::builder()
        .step("DELEGATE", Delegate)
        .task_queue(queue)
        .build()
        .unwrap();

    let worker = engine.clone();
    tokio::spawn(async move {
        while let Some(task) = tasks.recv().await {
            let response = StepResponse::succeeded().with_outcome("echo", task.request.payload.clone());
            worker.notify().deliver(&task.task_id, payload(response));
        }
    });

    let delegated = node("delegated", "DELEGATE", "TASK").with_parameters(json!({"cmd": "build"}));
    let execution = run(&engine, plan(&delegated, &[])).await;
    assert_eq!(execution.status, Status::Succeeded);
    let node = &nodes(&engine, execution.id).await[0];
    assert_eq!(node.outcomes["echo"], json!({"cmd": "build"}));
}

#[tokio::test]
async fn task_mode_without_queue_errors() {
    let engine = engine();
    let delegated = node("delegated", "DELEGATE", "TASK");
    let execution = run(&engine, plan(&delegated, &[])).await;
    assert_eq!(execution.status, Status::Errored);
}

#[tokio::test]
async fn missing_facilitator_errors_the_node() {
    let engine = engine();
    let bare = PlanNode::new("bare", StepType::new("SUCCEED"));
    let execution = run(&engine, plan(&bare, &[])).await;
    assert_eq!(execution.status, Status::Errored);

    let node = &nodes(&engine, execution.id).await[0];
    assert_eq!(node.status, Status::Errored);
    assert!(node.failure_info.is_some());
}

#[tokio::test]
async fn ref_objects_resolve_producer_outcomes() {
    let engine = engine();
    let consumer = node("consumer", "ECHO", "SYNC");
    let producer = node("producer", "SUCCEED", "SYNC")
        .with_parameters(json!("payload"))
        .with_adviser(AdviserObtainment::new("NEXT_STEP").with_parameters(json!({"next_node_id": consumer.id})));
    let consumer = consumer.with_ref_object(RefObject::new("input", producer.id, "value"));

    let execution = run(&engine, plan(&producer, &[&consumer])).await;
    assert_eq!(execution.status, Status::Succeeded);
    let nodes = nodes(&engine, execution.id).await;
    assert_eq!(by_identifier(&nodes, "consumer").outcomes["input"], json!("payload"));
}

#[tokio::test]
async fn unresolved_ref_object_fails_the_consumer() {
    let engine = engine();
    let consumer = node("consumer", "ECHO", "SYNC").with_ref_object(RefObject::new(
        "input",
        PlanNodeId::new(),
        "value",
    ));

    let execution = run(&engine, plan(&consumer, &[])).await;
    assert_eq!(execution.status, Status::Failed);
}

#[tokio::test]
async fn initial_wait_delays_execution() {
    let engine = engine();
    let delayed = PlanNode::new("delayed", StepType::new("SUCCEED"))
        .with_facilitator(FacilitatorObtainment::new("SYNC").with_parameters(json!({"initial_wait_ms": 30})));

    let started = std::time::Instant::now();
    let execution = run(&engine, plan(&delayed, &[])).await;
    assert_eq!(execution.status, Status::Succeeded);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn manual_intervention_waits_for_an_operator() {
    let engine = OrchestrationEngine::builder()
        .step(
            "FLAKY",
            Flaky {
                calls: Arc::default(),
                failures: usize::MAX,
            },
        )
        .build()
        .unwrap();
    let flaky = node("flaky", "FLAKY", "SYNC").with_adviser(AdviserObtainment::new("MANUAL_INTERVENTION"));
    let execution = engine
        .start_execution(plan(&flaky, &[]), ExecutionMetadata::default())
        .await
        .unwrap();
    let failed = wait_for_status(&engine, execution.id, Status::Failed).await;
    let correlation_id = CorrelationId::from(failed.id);
    tokio::time::timeout(WAIT, async {
        while !engine.notify().is_registered(&correlation_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let decision = crate::advise::AdviserResponse::MarkStatus {
        status: Status::Succeeded,
    };
    engine
        .notify()
        .deliver(&correlation_id, ResponseData::Adviser(decision));

    let finished = tokio::time::timeout(WAIT, engine.wait_for_completion(execution.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, Status::Succeeded);
    let node = engine.node_executions().get(failed.id).await.unwrap();
    assert_eq!(node.status, Status::Succeeded);
    assert!(node.adviser_response.is_some());
}

fn always_failing() -> OrchestrationEngine {
    OrchestrationEngine::builder()
        .step("SUCCEED", Succeed)
        .step(
            "FLAKY",
            Flaky {
                calls: Arc::default(),
                failures: usize::MAX,
            },
        )
        .build()
        .unwrap()
}

async fn wait_for_deferred_advise(engine: &OrchestrationEngine, id: PlanExecutionId) -> NodeExecution {
    let failed = wait_for_status(engine, id, Status::Failed).await;
    let correlation_id = CorrelationId::from(failed.id);
    tokio::time::timeout(WAIT, async {
        while !engine.notify().is_registered(&correlation_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("advise was never deferred");
    failed
}

#[tokio::test]
async fn abort_ends_a_plan_waiting_for_an_operator() {
    let engine = always_failing();
    let flaky = node("flaky", "FLAKY", "SYNC").with_adviser(AdviserObtainment::new("MANUAL_INTERVENTION"));
    let execution = engine
        .start_execution(plan(&flaky, &[]), ExecutionMetadata::default())
        .await
        .unwrap();
    let failed = wait_for_deferred_advise(&engine, execution.id).await;

    let aborted = engine.abort_plan_execution(execution.id).await.unwrap();
    assert_eq!(aborted, 0);

    let finished = tokio::time::timeout(WAIT, engine.wait_for_completion(execution.id))
        .await
        .expect("aborted plan execution never ended")
        .unwrap();
    assert!(finished.is_final());
    assert_eq!(finished.status, Status::Failed);

    let correlation_id = CorrelationId::from(failed.id);
    assert!(!engine.notify().is_registered(&correlation_id));
    let node = engine.node_executions().get(failed.id).await.unwrap();
    assert_eq!(node.status, Status::Failed);
    assert_eq!(node.adviser_response, Some(AdviserResponse::Unknown));

    // A late operator decision finds nothing to resume.
    let late = engine.notify().deliver(
        &correlation_id,
        ResponseData::Adviser(AdviserResponse::MarkStatus {
            status: Status::Succeeded,
        }),
    );
    assert_eq!(late, DeliveryOutcome::Unknown);
}

#[tokio::test]
async fn concurrent_advise_decisions_apply_once() {
    let engine = always_failing();
    let next = node("next", "SUCCEED", "SYNC");
    let flaky = node("flaky", "FLAKY", "SYNC").with_adviser(AdviserObtainment::new("MANUAL_INTERVENTION"));
    let execution = engine
        .start_execution(plan(&flaky, &[&next]), ExecutionMetadata::default())
        .await
        .unwrap();
    let failed = wait_for_deferred_advise(&engine, execution.id).await;

    let decision = AdviserResponse::IgnoreFailure {
        next_node_id: Some(next.id),
    };
    let request = HandleAdviserResponseRequest {
        node_execution_id: failed.id,
        adviser_response: decision.clone(),
    };
    let event = SdkResponseEvent::new(
        SdkResponseEventType::HandleAdviserResponse,
        failed.ambiance.clone(),
        &request,
    )
    .unwrap();
    let correlation_id = CorrelationId::from(failed.id);
    let (handled, delivered) = tokio::join!(engine.handle_sdk_response(event), async {
        engine
            .notify()
            .deliver(&correlation_id, ResponseData::Adviser(decision.clone()))
    });
    handled.unwrap();
    assert_eq!(delivered, DeliveryOutcome::Resumed);

    let finished = tokio::time::timeout(WAIT, engine.wait_for_completion(execution.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, Status::Succeeded);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let nodes = nodes(&engine, execution.id).await;
    assert_eq!(nodes.iter().filter(|n| n.node.identifier == "next").count(), 1);
    let advised = engine.node_executions().get(failed.id).await.unwrap();
    assert_eq!(advised.status, Status::IgnoreFailed);
    assert_eq!(advised.adviser_response, Some(decision));
}
