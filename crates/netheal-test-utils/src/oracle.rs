//! Scripted oracle backend
//!
//! Answers come from, in order:
//! 1. the first keyword route whose needle appears in the request
//! 2. the FIFO queue
//! 3. the fallback answer
//!
//! With none of these the call fails as unavailable.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use netheal_oracle::{OracleBackend, OracleError, OracleRequest};

type Answer = Result<String, OracleError>;

#[derive(Debug)]
struct Route {
    needle: String,
    answers: VecDeque<Answer>,
    last: Answer,
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    routes: Mutex<Vec<Route>>,
    queue: Mutex<VecDeque<Answer>>,
    fallback: Mutex<Option<Answer>>,
    calls: Mutex<Vec<OracleRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one answer
    #[must_use]
    pub fn respond(self, text: &str) -> Self {
        self.queue.lock().push_back(Ok(text.to_string()));
        self
    }

    /// Queue one transport failure
    #[must_use]
    pub fn fail(self, reason: &str) -> Self {
        self.queue
            .lock()
            .push_back(Err(OracleError::unavailable(reason)));
        self
    }

    /// Every request containing `needle` gets `text`
    #[must_use]
    pub fn route(self, needle: &str, text: &str) -> Self {
        self.route_sequence(needle, &[text])
    }

    /// Requests containing `needle` get `texts` in order; the last one repeats
    #[must_use]
    pub fn route_sequence(self, needle: &str, texts: &[&str]) -> Self {
        let mut answers: VecDeque<Answer> = texts.iter().map(|t| Ok((*t).to_string())).collect();
        let last = answers
            .pop_back()
            .unwrap_or_else(|| Err(OracleError::unavailable("empty route")));
        self.routes.lock().push(Route {
            needle: needle.to_string(),
            answers,
            last,
        });
        self
    }

    /// Requests containing `needle` always fail as unavailable
    #[must_use]
    pub fn route_failure(self, needle: &str) -> Self {
        self.routes.lock().push(Route {
            needle: needle.to_string(),
            answers: VecDeque::new(),
            last: Err(OracleError::unavailable("scripted outage")),
        });
        self
    }

    /// Answer when nothing else matches
    #[must_use]
    pub fn fallback(self, text: &str) -> Self {
        *self.fallback.lock() = Some(Ok(text.to_string()));
        self
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<OracleRequest> {
        self.calls.lock().clone()
    }

    /// Requests whose text contains `needle`
    #[must_use]
    pub fn calls_matching(&self, needle: &str) -> Vec<OracleRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|r| request_text(r).contains(needle))
            .cloned()
            .collect()
    }
}

fn request_text(request: &OracleRequest) -> String {
    request
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl OracleBackend for ScriptedBackend {
    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError> {
        self.calls.lock().push(request.clone());
        let text = request_text(request);

        {
            let mut routes = self.routes.lock();
            if let Some(route) = routes.iter_mut().find(|r| text.contains(&r.needle)) {
                return route.answers.pop_front().unwrap_or_else(|| route.last.clone());
            }
        }
        if let Some(answer) = self.queue.lock().pop_front() {
            return answer;
        }
        self.fallback
            .lock()
            .clone()
            .unwrap_or_else(|| Err(OracleError::unavailable("script exhausted")))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
