//! Queued operations, dispatchers and out-of-process workers

mod common;

use common::mock_support::{MOCK_DIMENSIONS, MOCK_TEXT_MODEL, MockDriver, assistant, mock_config};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uni_ai::Ai;
use uni_ai::agent::AgentKey;
use uni_ai::error::{AiError, Result};
use uni_ai::fake::{FakeContext, FakeReplies};
use uni_ai::queue::{Dispatcher, PendingDispatch, QueuedOperation, QueuedResponse};

/// Holds jobs until the test runs them.
#[derive(Clone, Default)]
struct CollectingDispatcher {
    jobs: Arc<Mutex<Vec<PendingDispatch>>>,
}

impl CollectingDispatcher {
    fn take(&self) -> Vec<PendingDispatch> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }
}

impl Dispatcher for CollectingDispatcher {
    fn dispatch(&self, job: PendingDispatch) -> Result<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

fn queued_ai(driver: &MockDriver, dispatcher: &CollectingDispatcher) -> Ai {
    Ai::builder()
        .config(mock_config(&["primary", "secondary"]))
        .register_driver(driver.clone())
        .dispatcher(dispatcher.clone())
        .register_agent(assistant().named("assistant"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_queued_prompt_runs_only_when_a_worker_picks_it_up() {
    let driver = MockDriver::new();
    let dispatcher = CollectingDispatcher::default();
    let ai = queued_ai(&driver, &dispatcher);
    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = replies.clone();

    ai.agent(assistant())
        .queue("later")
        .then(move |response| {
            if let QueuedResponse::Text(text) = response {
                sink.lock().unwrap().push(text.text.clone());
            }
        })
        .dispatch()
        .unwrap();
    assert!(driver.calls().is_empty());

    for job in dispatcher.take() {
        job.run().await.unwrap();
    }

    assert_eq!(
        *replies.lock().unwrap(),
        vec![format!("primary:{MOCK_TEXT_MODEL}:later")]
    );
}

#[tokio::test]
async fn test_catch_receives_failures() {
    let driver = MockDriver::new();
    driver.fail_with("primary", "down for maintenance");
    let dispatcher = CollectingDispatcher::default();
    let ai = queued_ai(&driver, &dispatcher);
    let caught = Arc::new(Mutex::new(None));
    let sink = caught.clone();

    ai.embeddings(["a"])
        .queue()
        .then(|_| panic!("should not succeed"))
        .catch(move |error| *sink.lock().unwrap() = Some(error.to_string()))
        .dispatch()
        .unwrap();
    for job in dispatcher.take() {
        job.run().await.unwrap();
    }

    let caught = caught.lock().unwrap();
    assert!(caught.as_deref().unwrap().contains("down for maintenance"));
}

#[tokio::test]
async fn test_failures_without_catch_are_returned_to_the_worker() {
    let driver = MockDriver::new();
    driver.rate_limit("primary");
    let dispatcher = CollectingDispatcher::default();
    let ai = queued_ai(&driver, &dispatcher);

    ai.reranking(["a", "b"]).queue("q").dispatch().unwrap();
    let err = dispatcher.take().pop().unwrap().run().await.unwrap_err();

    assert!(err.is_failoverable());
}

#[tokio::test]
async fn test_queued_operations_keep_their_failover_list() {
    let driver = MockDriver::new();
    driver.rate_limit("primary");
    let dispatcher = CollectingDispatcher::default();
    let ai = queued_ai(&driver, &dispatcher);

    ai.agent(assistant())
        .provider(["primary", "secondary"])
        .queue("hi")
        .dispatch()
        .unwrap();
    dispatcher.take().pop().unwrap().run().await.unwrap();

    assert_eq!(driver.calls_to("secondary"), 1);
}

#[tokio::test]
async fn test_serialized_operations_run_on_another_instance() {
    let driver = MockDriver::new();
    let dispatcher = CollectingDispatcher::default();
    let ai = queued_ai(&driver, &dispatcher);

    let job = ai.agent(assistant().named("assistant")).queue("from a worker");
    let json = job.operation().to_json().unwrap();
    drop(job);

    let operation = QueuedOperation::from_json(&json).unwrap();
    let response = ai.run_queued(operation).await.unwrap();

    match response {
        QueuedResponse::Text(text) => {
            assert_eq!(text.text, format!("primary:{MOCK_TEXT_MODEL}:from a worker"));
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn test_unregistered_agents_cannot_run_out_of_process() {
    let driver = MockDriver::new();
    let dispatcher = CollectingDispatcher::default();
    let ai = queued_ai(&driver, &dispatcher);

    let operation = ai
        .agent(assistant().named("stranger"))
        .queue("hi")
        .operation()
        .clone();
    let err = ai.run_queued(operation).await.unwrap_err();

    assert!(matches!(err, AiError::Config(_)));
    assert!(err.to_string().contains("Agent [stranger] is not registered"));
}

#[tokio::test]
async fn test_queued_embeddings_use_provider_dimensions() {
    let driver = MockDriver::new();
    let dispatcher = CollectingDispatcher::default();
    let ai = queued_ai(&driver, &dispatcher);

    let operation = ai.embeddings(["abc"]).queue().operation().clone();
    assert_eq!(operation.capability(), uni_ai::api::Capability::Embeddings);

    match ai.run_queued(operation).await.unwrap() {
        QueuedResponse::Embeddings(embeddings) => {
            assert_eq!(embeddings.first().map(<[f32]>::len), Some(MOCK_DIMENSIONS as usize));
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn test_tokio_dispatcher_runs_in_the_background() {
    let driver = MockDriver::new();
    let ai = Ai::builder()
        .config(mock_config(&["primary"]))
        .register_driver(driver.clone())
        .build()
        .unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    ai.image("A harbour")
        .queue()
        .then(move |response| {
            let _ = tx.send(matches!(response, QueuedResponse::Image(_)));
        })
        .dispatch()
        .unwrap();

    let was_image = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert!(was_image);
    assert_eq!(driver.calls_to("primary"), 1);
}

#[tokio::test]
async fn test_faked_agents_record_queued_prompts() {
    let driver = MockDriver::new();
    let dispatcher = CollectingDispatcher::default();
    let fakes = FakeContext::new();
    let key = AgentKey::named("assistant");
    fakes.fake_agent(key.clone(), FakeReplies::new());
    fakes.fake_images(FakeReplies::new());
    let ai = Ai::builder()
        .config(mock_config(&["primary"]))
        .register_driver(driver.clone())
        .dispatcher(dispatcher.clone())
        .fake(fakes.clone())
        .build()
        .unwrap();

    ai.agent(assistant().named("assistant"))
        .queue("Summarize the report")
        .dispatch()
        .unwrap();
    ai.image("A bridge").queue().dispatch().unwrap();
    // Not faked, so it reaches the dispatcher.
    ai.embeddings(["x"]).queue().dispatch().unwrap();

    fakes.assert_queued(&key, "Summarize the report");
    fakes.assert_not_queued(&key, "Something else");
    fakes.assert_image_queued(|p| p.contains("bridge"));
    fakes.assert_no_embeddings_queued();
    assert_eq!(fakes.queued().len(), 2);
    assert_eq!(dispatcher.take().len(), 1);
    assert!(driver.calls().is_empty());
}
