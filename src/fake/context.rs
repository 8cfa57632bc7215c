use super::gateways::{
    FakeAudioGateway, FakeEmbeddingGateway, FakeFileGateway, FakeImageGateway,
    FakeRerankingGateway, FakeStoreGateway, FakeTextGateway, FakeTranscriptionGateway,
};
use super::{Answer, FakeReplies, FakeText};
use crate::agent::AgentKey;
use crate::api::Capability;
use crate::error::Result;
use crate::prompt::{
    AgentPrompt, AudioPrompt, EmbeddingsPrompt, FileUpload, ImagePrompt, RerankingPrompt,
    StoreRequest, TranscriptionPrompt,
};
use crate::provider::Provider;
use crate::queue::{
    QueuedAgentPrompt, QueuedAudioPrompt, QueuedEmbeddingsPrompt, QueuedImagePrompt,
    QueuedOperation, QueuedRerankingPrompt, QueuedTranscriptionPrompt,
};
use crate::response::{
    AudioResponse, EmbeddingsResponse, FileResponse, ImageResponse, RerankingResponse,
    StoreResponse, TranscriptionResponse,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

struct Faked<I, R> {
    replies: FakeReplies<I, R>,
    recorded: Vec<I>,
}

impl<I: Clone, R> Faked<I, R> {
    fn new(replies: FakeReplies<I, R>) -> Self {
        Self {
            replies,
            recorded: Vec::new(),
        }
    }

    fn answer(&mut self, input: &I, operation: &str) -> Result<Answer<I, R>> {
        self.recorded.push(input.clone());
        self.replies.next(operation)
    }
}

struct FileFake {
    replies: FakeReplies<String, FileResponse>,
    stored: Vec<FileUpload>,
    deleted: Vec<String>,
    next_id: usize,
}

struct StoreFake {
    replies: FakeReplies<String, StoreResponse>,
    created: Vec<StoreRequest>,
    deleted: Vec<String>,
    added: Vec<(String, String)>,
    removed: Vec<(String, String)>,
    next_id: usize,
}

#[derive(Default)]
struct FakeState {
    agents: HashMap<AgentKey, Faked<AgentPrompt, FakeText>>,
    embeddings: Option<Faked<EmbeddingsPrompt, EmbeddingsResponse>>,
    images: Option<Faked<ImagePrompt, ImageResponse>>,
    audio: Option<Faked<AudioPrompt, AudioResponse>>,
    transcriptions: Option<Faked<TranscriptionPrompt, TranscriptionResponse>>,
    reranking: Option<Faked<RerankingPrompt, RerankingResponse>>,
    files: Option<FileFake>,
    stores: Option<StoreFake>,
    queued: Vec<QueuedOperation>,
}

/// The fakes of one test, shared by every clone.
///
/// Assertions panic with a descriptive message, like `assert!`.
#[derive(Clone, Default)]
pub struct FakeContext {
    state: Arc<Mutex<FakeState>>,
}

macro_rules! capability_fake {
    (
        $field:ident, $prompt:ty, $response:ty, $variant:ident, $queued:ty, $label:literal,
        fake: $fake:ident,
        generated: $generated:ident,
        not_generated: $not_generated:ident,
        nothing_generated: $nothing_generated:ident,
        queued: $was_queued:ident,
        not_queued: $not_queued:ident,
        nothing_queued: $nothing_queued:ident,
        answer: $answer:ident,
    ) => {
        pub fn $fake(&self, replies: impl Into<FakeReplies<$prompt, $response>>) -> &Self {
            self.lock().$field = Some(Faked::new(replies.into()));
            self
        }

        pub(crate) fn $answer(&self, prompt: &$prompt) -> Result<Answer<$prompt, $response>> {
            match self.lock().$field.as_mut() {
                Some(faked) => faked.answer(prompt, $label),
                None => Ok(Answer::Default),
            }
        }

        pub fn $generated(&self, predicate: impl Fn(&$prompt) -> bool) {
            let state = self.lock();
            let recorded = state.$field.as_ref().map(|f| f.recorded.as_slice()).unwrap_or_default();
            assert!(
                recorded.iter().any(|p| predicate(p)),
                concat!("An expected ", $label, " was not performed.")
            );
        }

        pub fn $not_generated(&self, predicate: impl Fn(&$prompt) -> bool) {
            let state = self.lock();
            let recorded = state.$field.as_ref().map(|f| f.recorded.as_slice()).unwrap_or_default();
            assert!(
                !recorded.iter().any(|p| predicate(p)),
                concat!("An unexpected ", $label, " was performed.")
            );
        }

        pub fn $nothing_generated(&self) {
            let state = self.lock();
            let count = state.$field.as_ref().map_or(0, |f| f.recorded.len());
            assert_eq!(count, 0, concat!("Unexpected ", $label, " operations were performed."));
        }

        pub fn $was_queued(&self, predicate: impl Fn(&$queued) -> bool) {
            assert!(
                self.queued_where(|op| matches!(op, QueuedOperation::$variant(p) if predicate(p))),
                concat!("An expected queued ", $label, " was not found.")
            );
        }

        pub fn $not_queued(&self, predicate: impl Fn(&$queued) -> bool) {
            assert!(
                !self.queued_where(|op| matches!(op, QueuedOperation::$variant(p) if predicate(p))),
                concat!("An unexpected queued ", $label, " was found.")
            );
        }

        pub fn $nothing_queued(&self) {
            assert!(
                !self.queued_where(|op| matches!(op, QueuedOperation::$variant(_))),
                concat!("Unexpected queued ", $label, " operations were found.")
            );
        }
    };
}

impl FakeContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Forget every fake and every recording.
    pub fn reset(&self) {
        *self.lock() = FakeState::default();
    }

    fn queued_where(&self, predicate: impl Fn(&QueuedOperation) -> bool) -> bool {
        self.lock().queued.iter().any(predicate)
    }

    /// Everything queued while faked, oldest first.
    pub fn queued(&self) -> Vec<QueuedOperation> {
        self.lock().queued.clone()
    }

    // Agents

    /// Fake the agent identified by `agent`. Other agents are unaffected.
    pub fn fake_agent(
        &self,
        agent: AgentKey,
        replies: impl Into<FakeReplies<AgentPrompt, FakeText>>,
    ) -> &Self {
        self.lock().agents.insert(agent, Faked::new(replies.into()));
        self
    }

    pub fn is_agent_faked(&self, agent: &AgentKey) -> bool {
        self.lock().agents.contains_key(agent)
    }

    pub(crate) fn answer_agent(&self, prompt: &AgentPrompt) -> Result<Answer<AgentPrompt, FakeText>> {
        match self.lock().agents.get_mut(&prompt.agent_key()) {
            Some(faked) => faked.answer(prompt, "prompt"),
            None => Ok(Answer::Default),
        }
    }

    /// Prompts recorded for `agent`, oldest first.
    pub fn prompts(&self, agent: &AgentKey) -> Vec<AgentPrompt> {
        self.lock()
            .agents
            .get(agent)
            .map(|faked| faked.recorded.clone())
            .unwrap_or_default()
    }

    /// Assert `agent` received a prompt with exactly this text.
    pub fn assert_prompted(&self, agent: &AgentKey, prompt: &str) {
        self.assert_prompted_with(agent, |p| p.prompt == prompt);
    }

    pub fn assert_prompted_with(&self, agent: &AgentKey, predicate: impl Fn(&AgentPrompt) -> bool) {
        assert!(
            self.prompts(agent).iter().any(predicate),
            "An expected prompt was not received by agent [{agent}]."
        );
    }

    pub fn assert_not_prompted(&self, agent: &AgentKey, prompt: &str) {
        self.assert_not_prompted_with(agent, |p| p.prompt == prompt);
    }

    pub fn assert_not_prompted_with(
        &self,
        agent: &AgentKey,
        predicate: impl Fn(&AgentPrompt) -> bool,
    ) {
        assert!(
            !self.prompts(agent).iter().any(predicate),
            "An unexpected prompt was received by agent [{agent}]."
        );
    }

    pub fn assert_never_prompted(&self, agent: &AgentKey) {
        assert!(
            self.prompts(agent).is_empty(),
            "Agent [{agent}] was prompted unexpectedly."
        );
    }

    pub fn assert_queued(&self, agent: &AgentKey, prompt: &str) {
        self.assert_queued_with(agent, |p| p.prompt == prompt);
    }

    pub fn assert_queued_with(
        &self,
        agent: &AgentKey,
        predicate: impl Fn(&QueuedAgentPrompt) -> bool,
    ) {
        assert!(
            self.queued_where(
                |op| matches!(op, QueuedOperation::Prompt(p) if &p.agent == agent && predicate(p))
            ),
            "An expected queued prompt was not found for agent [{agent}]."
        );
    }

    pub fn assert_not_queued(&self, agent: &AgentKey, prompt: &str) {
        self.assert_not_queued_with(agent, |p| p.prompt == prompt);
    }

    pub fn assert_not_queued_with(
        &self,
        agent: &AgentKey,
        predicate: impl Fn(&QueuedAgentPrompt) -> bool,
    ) {
        assert!(
            !self.queued_where(
                |op| matches!(op, QueuedOperation::Prompt(p) if &p.agent == agent && predicate(p))
            ),
            "An unexpected queued prompt was found for agent [{agent}]."
        );
    }

    pub fn assert_never_queued(&self, agent: &AgentKey) {
        assert!(
            !self.queued_where(|op| matches!(op, QueuedOperation::Prompt(p) if &p.agent == agent)),
            "Agent [{agent}] was queued unexpectedly."
        );
    }

    // Capabilities

    capability_fake!(
        embeddings, EmbeddingsPrompt, EmbeddingsResponse, Embeddings, QueuedEmbeddingsPrompt,
        "embeddings generation",
        fake: fake_embeddings,
        generated: assert_embeddings_generated,
        not_generated: assert_embeddings_not_generated,
        nothing_generated: assert_no_embeddings_generated,
        queued: assert_embeddings_queued,
        not_queued: assert_embeddings_not_queued,
        nothing_queued: assert_no_embeddings_queued,
        answer: answer_embeddings,
    );

    capability_fake!(
        images, ImagePrompt, ImageResponse, Image, QueuedImagePrompt,
        "image generation",
        fake: fake_images,
        generated: assert_image_generated,
        not_generated: assert_image_not_generated,
        nothing_generated: assert_no_images_generated,
        queued: assert_image_queued,
        not_queued: assert_image_not_queued,
        nothing_queued: assert_no_images_queued,
        answer: answer_image,
    );

    capability_fake!(
        audio, AudioPrompt, AudioResponse, Audio, QueuedAudioPrompt,
        "audio generation",
        fake: fake_audio,
        generated: assert_audio_generated,
        not_generated: assert_audio_not_generated,
        nothing_generated: assert_no_audio_generated,
        queued: assert_audio_queued,
        not_queued: assert_audio_not_queued,
        nothing_queued: assert_no_audio_queued,
        answer: answer_audio,
    );

    capability_fake!(
        transcriptions, TranscriptionPrompt, TranscriptionResponse, Transcription,
        QueuedTranscriptionPrompt,
        "transcription generation",
        fake: fake_transcriptions,
        generated: assert_transcription_generated,
        not_generated: assert_transcription_not_generated,
        nothing_generated: assert_no_transcriptions_generated,
        queued: assert_transcription_queued,
        not_queued: assert_transcription_not_queued,
        nothing_queued: assert_no_transcriptions_queued,
        answer: answer_transcription,
    );

    capability_fake!(
        reranking, RerankingPrompt, RerankingResponse, Reranking, QueuedRerankingPrompt,
        "reranking",
        fake: fake_reranking,
        generated: assert_reranked,
        not_generated: assert_not_reranked,
        nothing_generated: assert_nothing_reranked,
        queued: assert_reranking_queued,
        not_queued: assert_reranking_not_queued,
        nothing_queued: assert_no_reranking_queued,
        answer: answer_reranking,
    );

    // Files

    /// Fake file retrieval. Replies are keyed on the requested file id.
    pub fn fake_files(&self, replies: impl Into<FakeReplies<String, FileResponse>>) -> &Self {
        self.lock().files = Some(FileFake {
            replies: replies.into(),
            stored: Vec::new(),
            deleted: Vec::new(),
            next_id: 0,
        });
        self
    }

    /// Record an upload and return its fake id, `fake_file_<n>`.
    pub(crate) fn store_file(&self, file: &FileUpload) -> String {
        let mut state = self.lock();
        match state.files.as_mut() {
            Some(files) => {
                files.stored.push(file.clone());
                files.next_id += 1;
                format!("fake_file_{}", files.next_id)
            }
            None => "fake_file_0".to_string(),
        }
    }

    pub(crate) fn answer_file(&self) -> Result<Answer<String, FileResponse>> {
        match self.lock().files.as_mut() {
            Some(files) => files.replies.next("file retrieval"),
            None => Ok(Answer::Default),
        }
    }

    pub(crate) fn delete_file(&self, file_id: &str) {
        if let Some(files) = self.lock().files.as_mut() {
            files.deleted.push(file_id.to_string());
        }
    }

    pub fn assert_file_stored(&self, predicate: impl Fn(&FileUpload) -> bool) {
        let state = self.lock();
        let stored = state.files.as_ref().map(|f| f.stored.as_slice()).unwrap_or_default();
        assert!(
            stored.iter().any(predicate),
            "An expected file was not stored."
        );
    }

    pub fn assert_file_not_stored(&self, predicate: impl Fn(&FileUpload) -> bool) {
        let state = self.lock();
        let stored = state.files.as_ref().map(|f| f.stored.as_slice()).unwrap_or_default();
        assert!(
            !stored.iter().any(predicate),
            "An unexpected file was stored."
        );
    }

    pub fn assert_no_files_stored(&self) {
        let count = self.lock().files.as_ref().map_or(0, |f| f.stored.len());
        assert_eq!(count, 0, "Unexpected files were stored.");
    }

    pub fn assert_file_deleted(&self, file_id: &str) {
        let deleted = self.lock().files.as_ref().is_some_and(|f| f.deleted.iter().any(|id| id == file_id));
        assert!(deleted, "File [{file_id}] was not deleted.");
    }

    pub fn assert_file_not_deleted(&self, file_id: &str) {
        let deleted = self.lock().files.as_ref().is_some_and(|f| f.deleted.iter().any(|id| id == file_id));
        assert!(!deleted, "File [{file_id}] was deleted unexpectedly.");
    }

    pub fn assert_no_files_deleted(&self) {
        let count = self.lock().files.as_ref().map_or(0, |f| f.deleted.len());
        assert_eq!(count, 0, "Unexpected files were deleted.");
    }

    // Stores

    /// Fake vector stores. Replies answer store lookups, keyed on the store id.
    pub fn fake_stores(&self, replies: impl Into<FakeReplies<String, StoreResponse>>) -> &Self {
        self.lock().stores = Some(StoreFake {
            replies: replies.into(),
            created: Vec::new(),
            deleted: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
            next_id: 0,
        });
        self
    }

    pub(crate) fn create_store(&self, request: &StoreRequest) -> String {
        let mut state = self.lock();
        match state.stores.as_mut() {
            Some(stores) => {
                stores.created.push(request.clone());
                stores.next_id += 1;
                format!("fake_store_{}", stores.next_id)
            }
            None => "fake_store_0".to_string(),
        }
    }

    pub(crate) fn answer_store(&self) -> Result<Answer<String, StoreResponse>> {
        match self.lock().stores.as_mut() {
            Some(stores) => stores.replies.next("store retrieval"),
            None => Ok(Answer::Default),
        }
    }

    pub(crate) fn delete_store(&self, store_id: &str) {
        if let Some(stores) = self.lock().stores.as_mut() {
            stores.deleted.push(store_id.to_string());
        }
    }

    pub(crate) fn add_file_to_store(&self, store_id: &str, file_id: &str) {
        if let Some(stores) = self.lock().stores.as_mut() {
            stores.added.push((store_id.to_string(), file_id.to_string()));
        }
    }

    pub(crate) fn remove_file_from_store(&self, store_id: &str, file_id: &str) {
        if let Some(stores) = self.lock().stores.as_mut() {
            stores.removed.push((store_id.to_string(), file_id.to_string()));
        }
    }

    pub fn assert_store_created(&self, name: &str) {
        self.assert_store_created_with(|request| request.name == name);
    }

    pub fn assert_store_created_with(&self, predicate: impl Fn(&StoreRequest) -> bool) {
        let state = self.lock();
        let created = state.stores.as_ref().map(|s| s.created.as_slice()).unwrap_or_default();
        assert!(
            created.iter().any(predicate),
            "An expected store was not created."
        );
    }

    pub fn assert_store_not_created(&self, name: &str) {
        let state = self.lock();
        let created = state.stores.as_ref().map(|s| s.created.as_slice()).unwrap_or_default();
        assert!(
            !created.iter().any(|request| request.name == name),
            "Store [{name}] was created unexpectedly."
        );
    }

    pub fn assert_no_stores_created(&self) {
        let count = self.lock().stores.as_ref().map_or(0, |s| s.created.len());
        assert_eq!(count, 0, "Unexpected stores were created.");
    }

    pub fn assert_store_deleted(&self, store_id: &str) {
        let deleted = self.lock().stores.as_ref().is_some_and(|s| s.deleted.iter().any(|id| id == store_id));
        assert!(deleted, "Store [{store_id}] was not deleted.");
    }

    pub fn assert_store_not_deleted(&self, store_id: &str) {
        let deleted = self.lock().stores.as_ref().is_some_and(|s| s.deleted.iter().any(|id| id == store_id));
        assert!(!deleted, "Store [{store_id}] was deleted unexpectedly.");
    }

    pub fn assert_no_stores_deleted(&self) {
        let count = self.lock().stores.as_ref().map_or(0, |s| s.deleted.len());
        assert_eq!(count, 0, "Unexpected stores were deleted.");
    }

    pub fn assert_file_added_to_store(&self, store_id: &str, file_id: &str) {
        let added = self.lock().stores.as_ref().is_some_and(|s| {
            s.added.iter().any(|(store, file)| store == store_id && file == file_id)
        });
        assert!(added, "File [{file_id}] was not added to store [{store_id}].");
    }

    pub fn assert_file_not_added_to_store(&self, store_id: &str, file_id: &str) {
        let added = self.lock().stores.as_ref().is_some_and(|s| {
            s.added.iter().any(|(store, file)| store == store_id && file == file_id)
        });
        assert!(!added, "File [{file_id}] was added to store [{store_id}] unexpectedly.");
    }

    pub fn assert_file_removed_from_store(&self, store_id: &str, file_id: &str) {
        let removed = self.lock().stores.as_ref().is_some_and(|s| {
            s.removed.iter().any(|(store, file)| store == store_id && file == file_id)
        });
        assert!(removed, "File [{file_id}] was not removed from store [{store_id}].");
    }

    pub fn assert_file_not_removed_from_store(&self, store_id: &str, file_id: &str) {
        let removed = self.lock().stores.as_ref().is_some_and(|s| {
            s.removed.iter().any(|(store, file)| store == store_id && file == file_id)
        });
        assert!(!removed, "File [{file_id}] was removed from store [{store_id}] unexpectedly.");
    }

    // Wiring

    fn fakes(&self, capability: Capability, agent: Option<&AgentKey>) -> bool {
        let state = self.lock();
        match capability {
            Capability::Text => agent.is_some_and(|agent| state.agents.contains_key(agent)),
            Capability::Embeddings => state.embeddings.is_some(),
            Capability::Image => state.images.is_some(),
            Capability::Audio => state.audio.is_some(),
            Capability::Transcription => state.transcriptions.is_some(),
            Capability::Reranking => state.reranking.is_some(),
            Capability::Files => state.files.is_some(),
            Capability::Stores => state.stores.is_some(),
        }
    }

    /// Swap in the fake gateway when `capability` (or `agent`, for text) is
    /// faked. Callers check that the provider supports `capability` first.
    pub(crate) fn intercept(
        &self,
        provider: Provider,
        capability: Capability,
        agent: Option<&AgentKey>,
    ) -> Option<Provider> {
        if !self.fakes(capability, agent) {
            return None;
        }
        let fakes = self.clone();
        Some(match capability {
            Capability::Text => provider.with_text_gateway(Arc::new(FakeTextGateway::new(fakes))),
            Capability::Embeddings => {
                provider.with_embedding_gateway(Arc::new(FakeEmbeddingGateway::new(fakes)))
            }
            Capability::Image => provider.with_image_gateway(Arc::new(FakeImageGateway::new(fakes))),
            Capability::Audio => provider.with_audio_gateway(Arc::new(FakeAudioGateway::new(fakes))),
            Capability::Transcription => provider
                .with_transcription_gateway(Arc::new(FakeTranscriptionGateway::new(fakes))),
            Capability::Reranking => {
                provider.with_reranking_gateway(Arc::new(FakeRerankingGateway::new(fakes)))
            }
            Capability::Files => provider.with_file_gateway(Arc::new(FakeFileGateway::new(fakes))),
            Capability::Stores => {
                provider.with_store_gateway(Arc::new(FakeStoreGateway::new(fakes)))
            }
        })
    }

    pub(crate) fn intercepts_queued(&self, operation: &QueuedOperation) -> bool {
        match operation {
            QueuedOperation::Prompt(prompt) => self.is_agent_faked(&prompt.agent),
            other => self.fakes(other.capability(), None),
        }
    }

    pub(crate) fn record_queued(&self, operation: QueuedOperation) {
        self.lock().queued.push(operation);
    }
}

impl std::fmt::Debug for FakeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeContext")
            .field("agents", &state.agents.keys().collect::<Vec<_>>())
            .field("queued", &state.queued.len())
            .finish()
    }
}
