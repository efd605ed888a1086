//! Scripted test double.
//!
//! Responses are queued per task and handed out in order. When a task's
//! queue is empty the sticky response set with [`ScriptedGateway::always`]
//! is returned; with neither, the call fails with `Misconfiguration`.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use scriptline_utils::error::LlmError;

use crate::types::{Generation, GenerationGateway, GenerationRequest};

#[derive(Debug, Default)]
struct Script {
    queued: BTreeMap<String, VecDeque<Result<String, LlmError>>>,
    sticky: BTreeMap<String, String>,
    requests: Vec<GenerationRequest>,
}

#[derive(Debug, Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
}

impl ScriptedGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut guard = match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Queue one successful response for `task`.
    pub fn push(&self, task: &str, content: impl Into<String>) -> &Self {
        let content = content.into();
        self.with_script(|s| {
            s.queued
                .entry(task.to_string())
                .or_default()
                .push_back(Ok(content));
        });
        self
    }

    /// Queue one failure for `task`.
    pub fn push_err(&self, task: &str, err: LlmError) -> &Self {
        self.with_script(|s| {
            s.queued
                .entry(task.to_string())
                .or_default()
                .push_back(Err(err));
        });
        self
    }

    /// Response returned for `task` whenever its queue is empty.
    pub fn always(&self, task: &str, content: impl Into<String>) -> &Self {
        let content = content.into();
        self.with_script(|s| {
            s.sticky.insert(task.to_string(), content);
        });
        self
    }

    /// Number of calls received for `task`.
    #[must_use]
    pub fn calls(&self, task: &str) -> usize {
        self.with_script(|s| s.requests.iter().filter(|r| r.task == task).count())
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.with_script(|s| s.requests.len())
    }

    /// Every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.with_script(|s| s.requests.clone())
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn call(&self, request: GenerationRequest) -> Result<Generation, LlmError> {
        let task = request.task.clone();
        let next = self.with_script(|s| {
            s.requests.push(request);
            s.queued
                .get_mut(&task)
                .and_then(VecDeque::pop_front)
                .or_else(|| s.sticky.get(&task).cloned().map(Ok))
        });

        match next {
            Some(Ok(content)) => Ok(Generation::new(content, "scripted", "scripted")),
            Some(Err(err)) => Err(err),
            None => Err(LlmError::Misconfiguration(format!(
                "no scripted response for task '{task}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_sticky_then_error() {
        let gw = ScriptedGateway::new();
        gw.push("judge", "first").always("judge", "again");

        let req = || GenerationRequest::new("judge", Vec::new());
        assert_eq!(gw.call(req()).await.unwrap().content, "first");
        assert_eq!(gw.call(req()).await.unwrap().content, "again");
        assert_eq!(gw.call(req()).await.unwrap().content, "again");
        assert!(gw.call(GenerationRequest::new("fix", Vec::new())).await.is_err());

        assert_eq!(gw.calls("judge"), 3);
        assert_eq!(gw.calls("fix"), 1);
        assert_eq!(gw.total_calls(), 4);
    }
}
