//! End-to-end pipeline runs against scripted in-process backends.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use inquiry_core::llm::{BackendError, CompletionBackend, CompletionRequest, FragmentStream};
use inquiry_core::skills::FALLBACK_TAG;
use inquiry_core::state::{
    decode, run_key, MemorySnapshotStore, SnapshotRecord, SnapshotStore, AUTOSAVE_KEY,
};
use inquiry_core::swarm::{
    Coordinator, CoordinatorConfig, PipelineError, PipelineStage, StageId, SwarmEvent,
    SwarmEventKind,
};
use inquiry_core::tools::{
    ToolBackend, ToolError, ToolGateway, ToolOptions, ToolRequest, ToolResponse,
};

enum Script {
    Reply(Vec<&'static str>),
    /// Some fragments, then a failure
    Broken(Vec<&'static str>, BackendError),
    Fail(BackendError),
    Stall,
}

/// Replays queued scripts per stage and records every prompt it receives.
/// A stage with an empty queue answers `"<stage> output"`.
#[derive(Default)]
struct ScriptedBackend {
    scripts: Mutex<HashMap<StageId, VecDeque<Script>>>,
    prompts: Mutex<Vec<(StageId, String)>>,
}

impl ScriptedBackend {
    fn script(self, stage: StageId, scripts: Vec<Script>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .extend(scripts);
        self
    }

    fn calls(&self, stage: StageId) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .count()
    }

    fn prompts(&self, stage: StageId) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, request: &CompletionRequest) -> Result<FragmentStream, BackendError> {
        self.prompts
            .lock()
            .unwrap()
            .push((request.stage, request.prompt.clone()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.stage)
            .and_then(VecDeque::pop_front);

        match script {
            None => Ok(stream::iter(vec![Ok(format!("{} output", request.stage))]).boxed()),
            Some(Script::Reply(fragments)) => Ok(stream::iter(
                fragments.into_iter().map(|f| Ok(f.to_string())).collect::<Vec<_>>(),
            )
            .boxed()),
            Some(Script::Broken(fragments, error)) => {
                let mut items: Vec<Result<String, BackendError>> =
                    fragments.into_iter().map(|f| Ok(f.to_string())).collect();
                items.push(Err(error));
                Ok(stream::iter(items).boxed())
            }
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Stall) => Ok(stream::pending().boxed()),
        }
    }
}

/// Always-healthy tool service echoing the query
#[derive(Default)]
struct EchoTools {
    requests: Mutex<Vec<ToolRequest>>,
}

#[async_trait]
impl ToolBackend for EchoTools {
    async fn health(&self) -> bool {
        true
    }

    async fn call(&self, request: &ToolRequest) -> Result<ToolResponse, ToolError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ToolResponse {
            result: format!("{} hits for {}", request.task.as_str(), request.query),
            success: true,
            error: None,
        })
    }
}

/// Keeps every record written under a key, in write order
#[derive(Default)]
struct RecordingStore {
    inner: MemorySnapshotStore,
    writes: Mutex<Vec<(String, String)>>,
}

impl RecordingStore {
    fn writes_to(&self, key: &str) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

impl SnapshotStore for RecordingStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, record: &str) -> anyhow::Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), record.to_string()));
        self.inner.set(key, record)
    }

    fn delete(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.delete(key)
    }

    fn list(&self) -> anyhow::Result<Vec<SnapshotRecord>> {
        self.inner.list()
    }
}

fn build(backend: &Arc<ScriptedBackend>) -> Coordinator {
    Coordinator::with_backend(CoordinatorConfig::default(), backend.clone())
        .with_tool_gateway(ToolGateway::disabled())
}

fn drain(rx: &mut mpsc::Receiver<SwarmEvent>) -> Vec<SwarmEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count_kind(events: &[SwarmEvent], kind: SwarmEventKind) -> usize {
    events.iter().filter(|e| e.kind == kind).count()
}

fn unreachable() -> BackendError {
    BackendError::Unreachable("connection refused".to_string())
}

#[tokio::test]
async fn two_restarts_then_continue() {
    let backend = Arc::new(
        ScriptedBackend::default()
            .script(
                StageId::Search,
                vec![
                    Script::Reply(vec!["search pass 1"]),
                    Script::Reply(vec!["search pass 2"]),
                    Script::Reply(vec!["search pass 3"]),
                ],
            )
            .script(
                StageId::OpportunityAnalysis,
                vec![
                    Script::Reply(vec!["Gaps remain. RESEARCH_AGAIN"]),
                    Script::Reply(vec!["Still thin, research_again"]),
                    Script::Reply(vec!["Sufficient. CONTINUE"]),
                ],
            ),
    );
    let coordinator = build(&backend);

    let state = coordinator.start("X").await.unwrap();

    for stage in [
        StageId::Search,
        StageId::Learnings,
        StageId::OpportunityAnalysis,
    ] {
        assert_eq!(backend.calls(stage), 3, "{}", stage);
    }
    assert_eq!(backend.calls(StageId::Proposer), 1);
    assert_eq!(state.restart_count, 2);
    assert_eq!(state.current_stage, PipelineStage::Feedback);

    // Search keeps every pass; the loop's Learnings/OA entries are wiped
    assert_eq!(state.count(StageId::Search), 3);
    assert_eq!(state.count(StageId::Learnings), 1);
    assert_eq!(state.count(StageId::OpportunityAnalysis), 1);
    assert_eq!(
        state.latest(StageId::OpportunityAnalysis),
        "Sufficient. CONTINUE"
    );

    let last_learnings_prompt = backend.prompts(StageId::Learnings).pop().unwrap();
    assert!(last_learnings_prompt.contains("search pass 1\n\nsearch pass 2\n\nsearch pass 3"));
}

#[tokio::test]
async fn resume_after_granted_restart_searches_again() {
    let backend = Arc::new(
        ScriptedBackend::default()
            .script(
                StageId::Search,
                vec![
                    Script::Reply(vec!["search pass 1"]),
                    Script::Reply(vec!["search pass 2"]),
                ],
            )
            .script(
                StageId::OpportunityAnalysis,
                vec![
                    Script::Reply(vec!["Gaps remain. RESEARCH_AGAIN"]),
                    Script::Reply(vec!["Sufficient. CONTINUE"]),
                ],
            ),
    );
    let recorder = Arc::new(RecordingStore::default());
    let finished = build(&backend)
        .with_snapshot_store(recorder.clone())
        .start("X")
        .await
        .unwrap();

    // The checkpoint written right after the restart was granted
    let checkpoint = recorder
        .writes_to(&run_key(&finished.thread_id))
        .into_iter()
        .find(|record| {
            let state = decode(record).unwrap();
            state.restart_count == 1 && state.count(StageId::Learnings) == 0
        })
        .expect("no checkpoint after the restart");

    let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
    store.set(&run_key(&finished.thread_id), &checkpoint).unwrap();
    let resumed = build(&backend).with_snapshot_store(store);
    resumed.restore_run(&finished.thread_id).await.unwrap();

    let restored = resumed.snapshot().await;
    assert_eq!(restored.current_stage, PipelineStage::Idle);
    assert_eq!(restored.restart_count, 1);
    assert!(!restored.completed_stages.contains(&StageId::Search));

    let plan = resumed.prepare_resume().await.unwrap();
    assert_eq!(plan.entry, StageId::Search);
}

#[tokio::test]
async fn restart_limit_forces_continue_with_note() {
    let backend = Arc::new(ScriptedBackend::default().script(
        StageId::OpportunityAnalysis,
        (0..5)
            .map(|_| Script::Reply(vec!["Insufficient data. ", "RESEARCH_AGAIN"]))
            .collect(),
    ));
    let (tx, mut rx) = mpsc::channel(1024);
    let coordinator = build(&backend).with_event_channel(tx);

    let state = coordinator.start("X").await.unwrap();
    let events = drain(&mut rx);

    assert_eq!(backend.calls(StageId::OpportunityAnalysis), 3);
    assert_eq!(backend.calls(StageId::Search), 3);
    assert_eq!(state.restart_count, 2);
    assert_eq!(count_kind(&events, SwarmEventKind::RestartRequested), 2);
    assert_eq!(count_kind(&events, SwarmEventKind::RestartDenied), 1);

    let stored = state.latest(StageId::OpportunityAnalysis);
    assert!(stored.starts_with("Insufficient data. RESEARCH_AGAIN"));
    assert!(stored.ends_with(
        "[Note: Restart request denied - maximum of 2 search restarts reached. Proceeding with current research.]"
    ));
    assert_eq!(state.current_stage, PipelineStage::Feedback);
}

#[tokio::test]
async fn learnings_failure_falls_back_and_continues() {
    let backend = Arc::new(
        ScriptedBackend::default().script(StageId::Learnings, vec![Script::Fail(unreachable())]),
    );
    let (tx, mut rx) = mpsc::channel(1024);
    let coordinator = build(&backend).with_event_channel(tx);

    let state = coordinator.start("X").await.unwrap();
    let events = drain(&mut rx);

    assert_eq!(state.count(StageId::Learnings), 1);
    let fallback = state.latest(StageId::Learnings);
    assert!(fallback.starts_with(FALLBACK_TAG));
    assert!(state.completed_stages.contains(&StageId::Learnings));

    // Downstream received the fallback as its input
    let oa_prompt = &backend.prompts(StageId::OpportunityAnalysis)[0];
    assert!(oa_prompt.contains(fallback));

    let warnings: Vec<_> = events
        .iter()
        .filter(|e| e.kind == SwarmEventKind::StageWarning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].stage, Some(StageId::Learnings));
    assert_eq!(state.current_stage, PipelineStage::Feedback);
}

#[tokio::test]
async fn broken_stream_slot_is_fully_replaced() {
    let backend = Arc::new(ScriptedBackend::default().script(
        StageId::Proposer,
        vec![Script::Broken(
            vec!["Half a propos"],
            BackendError::MalformedFrame("{bad".to_string()),
        )],
    ));
    let coordinator = build(&backend);

    let state = coordinator.start("X").await.unwrap();

    let stored = state.latest(StageId::Proposer);
    assert!(stored.starts_with(FALLBACK_TAG));
    assert!(!stored.contains("Half a propos"));
}

#[tokio::test]
async fn aggregator_failure_aborts_run() {
    let backend = Arc::new(ScriptedBackend::default().script(
        StageId::Aggregator,
        vec![Script::Fail(BackendError::Status {
            status: 500,
            body: "boom".to_string(),
        })],
    ));
    let (tx, mut rx) = mpsc::channel(1024);
    let coordinator = build(&backend).with_event_channel(tx);

    let err = coordinator.start("X").await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageFailed {
            stage: StageId::Aggregator,
            ..
        }
    ));

    let state = coordinator.snapshot().await;
    assert_eq!(state.current_stage, PipelineStage::Idle);
    assert!(state.last_error.as_deref().unwrap().contains("boom"));
    assert_eq!(backend.calls(StageId::FactsExtractor), 0);
    assert_eq!(
        count_kind(&drain(&mut rx), SwarmEventKind::PipelineFailed),
        1
    );

    // The interrupted run resumes at the failed stage
    let resumed = coordinator.resume().await.unwrap();
    assert_eq!(resumed.current_stage, PipelineStage::Feedback);
    assert_eq!(backend.calls(StageId::Search), 1);
    assert_eq!(resumed.count(StageId::Aggregator), 2);
    assert_eq!(resumed.latest(StageId::Aggregator), "aggregator output");
}

#[tokio::test]
async fn revision_appends_new_entries() {
    let backend = Arc::new(
        ScriptedBackend::default()
            .script(
                StageId::Search,
                vec![
                    Script::Reply(vec!["first search"]),
                    Script::Reply(vec!["second search"]),
                    Script::Reply(vec!["revised search"]),
                ],
            )
            .script(
                StageId::OpportunityAnalysis,
                vec![Script::Reply(vec!["RESEARCH_AGAIN"])],
            ),
    );
    let coordinator = build(&backend);

    let first = coordinator.start("X").await.unwrap();
    assert_eq!(first.restart_count, 1);

    let second = coordinator.revise("focus on estuaries").await.unwrap();

    assert_eq!(second.iteration_number, first.iteration_number + 1);
    assert_eq!(second.restart_count, 0);
    assert_eq!(second.feedback, "focus on estuaries");
    for stage in StageId::ORDER {
        assert_eq!(
            second.count(stage),
            first.count(stage) + 1,
            "{} should gain exactly one entry",
            stage
        );
        assert_eq!(second.entries(stage)[..first.count(stage)], first.entries(stage)[..]);
    }

    // The revision's research summary starts fresh
    let learnings_prompt = backend.prompts(StageId::Learnings).pop().unwrap();
    assert!(learnings_prompt.contains("revised search"));
    assert!(!learnings_prompt.contains("first search"));
    assert!(learnings_prompt.contains("focus on estuaries"));
}

#[tokio::test]
async fn restart_from_stage_keeps_upstream_and_counter() {
    let backend = Arc::new(ScriptedBackend::default().script(
        StageId::OpportunityAnalysis,
        vec![Script::Reply(vec!["RESEARCH_AGAIN"])],
    ));
    let coordinator = build(&backend);
    let first = coordinator.start("X").await.unwrap();

    let state = coordinator.restart_from(StageId::Proposer).await.unwrap();

    assert_eq!(state.count(StageId::Search), first.count(StageId::Search));
    assert_eq!(state.count(StageId::Learnings), first.count(StageId::Learnings));
    assert_eq!(state.count(StageId::Proposer), 2);
    assert_eq!(state.count(StageId::QuestionsExtractor), 2);
    assert_eq!(state.restart_count, first.restart_count);
    assert_eq!(state.iteration_number, 1);
    assert_eq!(state.current_stage, PipelineStage::Feedback);
}

#[tokio::test]
async fn fragments_match_stored_text() {
    let backend = Arc::new(ScriptedBackend::default().script(
        StageId::FactsExtractor,
        vec![Script::Reply(vec![
            "- Tides — lunar",
            "ly driven\n",
            "- Currents: wind driven",
        ])],
    ));
    let (tx, mut rx) = mpsc::channel(1024);
    let coordinator = build(&backend).with_event_channel(tx);

    let state = coordinator.start("X").await.unwrap();
    let events = drain(&mut rx);

    let streamed: String = events
        .iter()
        .filter(|e| e.kind == SwarmEventKind::Fragment && e.stage == Some(StageId::FactsExtractor))
        .filter_map(|e| e.data.as_ref()?["text"].as_str().map(str::to_string))
        .collect();
    assert_eq!(streamed, state.latest(StageId::FactsExtractor));

    assert_eq!(state.stylized_facts.len(), 2);
    assert_eq!(state.stylized_facts[0].description, "lunarly driven");
    assert_eq!(state.stylized_facts[1].fact, "Currents");
}

#[tokio::test]
async fn share_link_restores_into_feedback() {
    let backend = Arc::new(ScriptedBackend::default());
    let coordinator = build(&backend);
    let original = coordinator.start("kelp & \"forests\"").await.unwrap();
    let link = coordinator.share_link("https://inquiry.local/app").await;

    let fresh = build(&backend);
    fresh.restore_from_link(&link).await.unwrap();
    let restored = fresh.snapshot().await;

    assert_eq!(restored.current_stage, PipelineStage::Feedback);
    assert_eq!(restored.stage_histories, original.stage_histories);
    assert_eq!(restored, original);

    let missing = fresh.restore_from_link("https://inquiry.local/app").await;
    assert!(matches!(missing, Err(PipelineError::Restore(_))));
}

#[tokio::test]
async fn autosave_round_trip() {
    let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
    let backend = Arc::new(ScriptedBackend::default());
    let coordinator = build(&backend).with_snapshot_store(store.clone());
    let finished = coordinator.start("X").await.unwrap();

    assert!(store.get(AUTOSAVE_KEY).unwrap().is_some());
    let keys: Vec<String> = store.list().unwrap().into_iter().map(|r| r.key).collect();
    assert!(keys.contains(&format!("run:{}", finished.thread_id)));

    let fresh = build(&backend).with_snapshot_store(store.clone());
    fresh.restore_autosave().await.unwrap();
    assert_eq!(fresh.snapshot().await, finished);

    let empty = build(&backend).with_snapshot_store(Arc::new(MemorySnapshotStore::new()));
    assert!(matches!(
        empty.restore_autosave().await,
        Err(PipelineError::NoAutosave)
    ));
}

#[tokio::test]
async fn search_and_novelty_use_tools() {
    let backend = Arc::new(
        ScriptedBackend::default()
            .script(StageId::Proposer, vec![Script::Reply(vec!["Map estuary tides"])]),
    );
    let tools = Arc::new(EchoTools::default());
    let gateway = ToolGateway::new(
        tools.clone(),
        ToolOptions {
            web: true,
            local: true,
        },
        Duration::from_secs(5),
    );
    let coordinator = build(&backend).with_tool_gateway(gateway);

    let state = coordinator.start("tides").await.unwrap();

    let search_prompt = &backend.prompts(StageId::Search)[0];
    assert!(search_prompt.contains("**Web Search Results:**\nweb_search hits for tides"));
    assert!(search_prompt.contains("**Local Search Results:**\nlocal_search hits for tides"));

    let requests = tools.requests.lock().unwrap();
    assert_eq!(requests.len(), 4);
    let novelty: Vec<_> = requests
        .iter()
        .filter(|r| r.agent_name == "novelty_checker")
        .collect();
    assert_eq!(novelty.len(), 2);
    assert_eq!(novelty[0].query, "Map estuary tides");
    assert_eq!(novelty[0].metadata["purpose"], "novelty_check");

    let results = state.tool_results.as_ref().unwrap();
    assert_eq!(
        results.web_text.as_deref(),
        Some("web_search hits for Map estuary tides")
    );
}

#[tokio::test]
async fn stalled_stage_times_out_into_fallback() {
    let backend = Arc::new(
        ScriptedBackend::default().script(StageId::NoveltyChecker, vec![Script::Stall]),
    );
    let mut config = CoordinatorConfig::default();
    config.per_stage_timeouts.insert(StageId::NoveltyChecker, 1);
    let coordinator = Coordinator::with_backend(config, backend.clone())
        .with_tool_gateway(ToolGateway::disabled());

    let state = coordinator.start("X").await.unwrap();

    assert!(state
        .latest(StageId::NoveltyChecker)
        .starts_with(FALLBACK_TAG));
    assert_eq!(state.current_stage, PipelineStage::Feedback);
}

#[tokio::test]
async fn concurrent_start_is_rejected_while_running() {
    let backend = Arc::new(
        ScriptedBackend::default().script(StageId::Search, vec![Script::Stall]),
    );
    let mut config = CoordinatorConfig::default();
    config.per_stage_timeouts.insert(StageId::Search, 1);
    let coordinator = Arc::new(
        Coordinator::with_backend(config, backend.clone())
            .with_tool_gateway(ToolGateway::disabled()),
    );

    let plan = coordinator.prepare_start("first").await.unwrap();
    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.execute(plan).await })
    };

    let second = coordinator.start("second").await;
    assert!(matches!(second, Err(PipelineError::Busy { .. })));
    let revision = coordinator.revise("more").await;
    assert!(revision.unwrap_err().is_busy());

    let finished = running.await.unwrap().unwrap();
    assert_eq!(finished.topic, "first");
    assert_eq!(finished.current_stage, PipelineStage::Feedback);
}

#[tokio::test]
async fn set_viewed_is_idempotent_and_clamped() {
    let backend = Arc::new(ScriptedBackend::default());
    let coordinator = build(&backend);
    coordinator.start("X").await.unwrap();
    coordinator.revise("again").await.unwrap();

    coordinator.set_viewed(StageId::Aggregator, 0).await;
    let once = coordinator.snapshot().await.get_viewed(StageId::Aggregator).to_string();
    coordinator.set_viewed(StageId::Aggregator, 0).await;
    let twice = coordinator.snapshot().await.get_viewed(StageId::Aggregator).to_string();
    assert_eq!(once, twice);

    assert_eq!(coordinator.set_viewed(StageId::Aggregator, 42).await, 1);
}
