//! Agent middleware.
//!
//! Each middleware receives the prompt and a [`Next`] continuation. It may
//! revise the prompt before calling `next`, observe or replace the result
//! after, or skip `next` entirely to short-circuit. A `Next` is consumed by
//! `run`, so the terminal dispatch runs at most once per traversal.

use crate::error::Result;
use crate::prompt::AgentPrompt;
use crate::response::{AgentResponse, StreamableAgentResponse};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// The dispatch at the end of the chain.
pub type Terminal<O> = Arc<dyn Fn(AgentPrompt) -> BoxFuture<'static, Result<O>> + Send + Sync>;

/// Wrap an async closure as a [`Terminal`].
pub fn terminal<O, F, Fut>(f: F) -> Terminal<O>
where
    F: Fn(AgentPrompt) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    Arc::new(move |prompt| Box::pin(f(prompt)))
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, prompt: AgentPrompt, next: Next<'_, AgentResponse>) -> Result<AgentResponse> {
        next.run(prompt).await
    }

    /// Streaming counterpart of [`handle`](Self::handle). The response is
    /// still lazy when it reaches the middleware; use
    /// [`StreamableAgentResponse::then`] to act on the drained result.
    async fn handle_stream(
        &self,
        prompt: AgentPrompt,
        next: Next<'_, StreamableAgentResponse>,
    ) -> Result<StreamableAgentResponse> {
        next.run(prompt).await
    }
}

/// The rest of the chain.
pub struct Next<'a, O> {
    middleware: &'a [Arc<dyn Middleware>],
    terminal: &'a Terminal<O>,
}

impl<O: PipelineOutput> Next<'_, O> {
    pub async fn run(self, prompt: AgentPrompt) -> Result<O> {
        match self.middleware.split_first() {
            Some((first, rest)) => {
                let next = Next {
                    middleware: rest,
                    terminal: self.terminal,
                };
                O::dispatch(first.as_ref(), prompt, next).await
            }
            None => (self.terminal)(prompt).await,
        }
    }
}

/// Selects which [`Middleware`] method a pipeline output flows through.
pub trait PipelineOutput: Send + Sized + 'static {
    fn dispatch<'a>(
        middleware: &'a dyn Middleware,
        prompt: AgentPrompt,
        next: Next<'a, Self>,
    ) -> BoxFuture<'a, Result<Self>>;
}

impl PipelineOutput for AgentResponse {
    fn dispatch<'a>(
        middleware: &'a dyn Middleware,
        prompt: AgentPrompt,
        next: Next<'a, Self>,
    ) -> BoxFuture<'a, Result<Self>> {
        middleware.handle(prompt, next)
    }
}

impl PipelineOutput for StreamableAgentResponse {
    fn dispatch<'a>(
        middleware: &'a dyn Middleware,
        prompt: AgentPrompt,
        next: Next<'a, Self>,
    ) -> BoxFuture<'a, Result<Self>> {
        middleware.handle_stream(prompt, next)
    }
}

/// Middleware in declared order, outermost first.
pub struct Pipeline<'a> {
    middleware: &'a [Arc<dyn Middleware>],
}

impl<'a> Pipeline<'a> {
    pub fn new(middleware: &'a [Arc<dyn Middleware>]) -> Self {
        Self { middleware }
    }

    pub async fn run<O: PipelineOutput>(&self, prompt: AgentPrompt, terminal: Terminal<O>) -> Result<O> {
        Next {
            middleware: self.middleware,
            terminal: &terminal,
        }
        .run(prompt)
        .await
    }
}

/// Middleware that rewrites the prompt before both prompt and stream
/// dispatch.
pub struct MapPrompt<F> {
    map: F,
}

pub fn map_prompt<F>(map: F) -> MapPrompt<F>
where
    F: Fn(AgentPrompt) -> AgentPrompt + Send + Sync,
{
    MapPrompt { map }
}

#[async_trait]
impl<F> Middleware for MapPrompt<F>
where
    F: Fn(AgentPrompt) -> AgentPrompt + Send + Sync,
{
    async fn handle(&self, prompt: AgentPrompt, next: Next<'_, AgentResponse>) -> Result<AgentResponse> {
        next.run((self.map)(prompt)).await
    }

    async fn handle_stream(
        &self,
        prompt: AgentPrompt,
        next: Next<'_, StreamableAgentResponse>,
    ) -> Result<StreamableAgentResponse> {
        next.run((self.map)(prompt)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::agent;
    use crate::data::{Meta, Usage};
    use crate::streaming::text_to_events;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tag(&'static str, Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(&self, prompt: AgentPrompt, next: Next<'_, AgentResponse>) -> Result<AgentResponse> {
            self.1.lock().unwrap().push(format!("before {}", self.0));
            let revised = prompt.revise(format!("{} {}", prompt.prompt, self.0), None);
            let response = next.run(revised).await;
            self.1.lock().unwrap().push(format!("after {}", self.0));
            response
        }
    }

    struct Cached;

    #[async_trait]
    impl Middleware for Cached {
        async fn handle(&self, prompt: AgentPrompt, _next: Next<'_, AgentResponse>) -> Result<AgentResponse> {
            Ok(AgentResponse::new("cached", "from cache", Usage::default(), Meta::new(prompt.provider, prompt.model)))
        }
    }

    fn prompt() -> AgentPrompt {
        AgentPrompt::new(Arc::new(agent("x")), "base", vec![], "loopback", "loopback-text")
    }

    fn echo(calls: Arc<AtomicUsize>) -> Terminal<AgentResponse> {
        terminal(move |prompt: AgentPrompt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(AgentResponse::new("inv", prompt.prompt, Usage::default(), Meta::default()))
            }
        })
    }

    #[tokio::test]
    async fn runs_in_declared_order_and_terminal_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let middleware: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(Tag("a", log.clone())), Arc::new(Tag("b", log.clone()))];

        let response = Pipeline::new(&middleware).run(prompt(), echo(calls.clone())).await.unwrap();

        assert_eq!(response.text, "base a b");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock().unwrap(), vec!["before a", "before b", "after b", "after a"]);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let middleware: Vec<Arc<dyn Middleware>> = vec![Arc::new(Cached)];

        let response = Pipeline::new(&middleware).run(prompt(), echo(calls.clone())).await.unwrap();

        assert_eq!(response.text, "from cache");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_middleware_sees_a_lazy_response() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(Mutex::new(None));

        struct Observe(Arc<Mutex<Option<String>>>, Arc<AtomicUsize>);

        #[async_trait]
        impl Middleware for Observe {
            async fn handle_stream(
                &self,
                prompt: AgentPrompt,
                next: Next<'_, StreamableAgentResponse>,
            ) -> Result<StreamableAgentResponse> {
                let response = next.run(prompt).await?;
                assert_eq!(self.1.load(Ordering::SeqCst), 0);
                let sink = self.0.clone();
                Ok(response.then(move |streamed| *sink.lock().unwrap() = Some(streamed.text.clone())))
            }
        }

        let counter = pulled.clone();
        let stream_terminal = terminal(move |prompt: AgentPrompt| {
            let counter = counter.clone();
            async move {
                let events = text_to_events("inv", "p", "m", &prompt.prompt, Usage::default());
                let source = Box::pin(async_stream::stream! {
                    for event in events {
                        counter.fetch_add(1, Ordering::SeqCst);
                        yield Ok::<_, crate::error::AiError>(event);
                    }
                });
                Ok(StreamableAgentResponse::new("inv", Meta::default(), source))
            }
        });

        let middleware: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(map_prompt(|p: AgentPrompt| p.revise("hello world", None))), Arc::new(Observe(observed.clone(), pulled.clone()))];
        let mut response = Pipeline::new(&middleware).run(prompt(), stream_terminal).await.unwrap();

        assert!(observed.lock().unwrap().is_none());
        response.collect().await.unwrap();
        assert_eq!(observed.lock().unwrap().as_deref(), Some("hello world"));
    }
}
