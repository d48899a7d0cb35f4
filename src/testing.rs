//! In-memory collaborators for unit tests.

use crate::broker::{Publisher, Subscription};
use crate::error::{BrokerError, RegistryError, ToolError};
use crate::models::{InboundMessage, ProfileName};
use crate::registry::ProfileRegistry;
use crate::report::ReportTools;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Records every publication.
#[derive(Default)]
pub struct MemoryBroker {
    published: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl MemoryBroker {
    pub fn fail_publishing(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    /// Payloads published on one channel, in order.
    pub fn on(&self, channel: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p)
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        self.published
            .lock()
            .unwrap()
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

enum Exhausted {
    End,
    Fail,
    Hang,
}

/// Replays a fixed list of deliveries, then ends, fails, or hangs.
pub struct ScriptedSubscription {
    queue: VecDeque<InboundMessage>,
    exhausted: Exhausted,
    closed: bool,
}

impl ScriptedSubscription {
    pub fn new(messages: impl IntoIterator<Item = InboundMessage>) -> Self {
        Self {
            queue: messages.into_iter().collect(),
            exhausted: Exhausted::End,
            closed: false,
        }
    }

    pub fn then_fail(mut self) -> Self {
        self.exhausted = Exhausted::Fail;
        self
    }

    pub fn then_hang(mut self) -> Self {
        self.exhausted = Exhausted::Hang;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl Subscription for ScriptedSubscription {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if let Some(message) = self.queue.pop_front() {
            return Ok(Some(message));
        }
        match self.exhausted {
            Exhausted::End => Ok(None),
            Exhausted::Fail => Err(BrokerError::Closed),
            Exhausted::Hang => futures::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.closed = true;
        Ok(())
    }
}

/// Registry holding pending names and counting reported-time stamps.
#[derive(Default)]
pub struct MemoryRegistry {
    pending: Mutex<HashSet<String>>,
    stamps: Mutex<HashMap<String, usize>>,
    operations: AtomicUsize,
    failing_deletes: AtomicBool,
}

impl MemoryRegistry {
    pub fn with_pending<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let registry = Self::default();
        registry
            .pending
            .lock()
            .unwrap()
            .extend(names.into_iter().map(String::from));
        registry
    }

    pub fn fail_deletes(&self) {
        self.failing_deletes.store(true, Ordering::SeqCst);
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.lock().unwrap().contains(name)
    }

    pub fn stamp_count(&self, name: &str) -> usize {
        self.stamps.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileRegistry for MemoryRegistry {
    async fn delete_profile_from_report_queue(
        &self,
        profile: &ProfileName,
    ) -> Result<bool, RegistryError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(RegistryError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection dropped",
            ))));
        }
        Ok(self.pending.lock().unwrap().remove(profile.as_str()))
    }

    async fn update_reported_time_for_expired_profile(
        &self,
        profile: &ProfileName,
    ) -> Result<bool, RegistryError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        *self
            .stamps
            .lock()
            .unwrap()
            .entry(profile.to_string())
            .or_insert(0) += 1;
        Ok(true)
    }
}

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Summarize { capture: PathBuf, document: PathBuf },
    Render { document: PathBuf, target: PathBuf },
}

/// Tools that record their calls and write placeholder outputs.
#[derive(Default)]
pub struct RecordingTools {
    calls: Mutex<Vec<ToolCall>>,
    fail_render: bool,
    cancel_on_summarize: Option<CancellationToken>,
}

impl RecordingTools {
    pub fn failing_render() -> Self {
        Self {
            fail_render: true,
            ..Self::default()
        }
    }

    /// Tools that trigger shutdown mid-summary, as a signal arriving during a run would.
    pub fn cancelling(cancel: CancellationToken) -> Self {
        Self {
            cancel_on_summarize: Some(cancel),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn summarize_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ToolCall::Summarize { .. }))
            .count()
    }

    pub fn render_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ToolCall::Render { .. }))
            .count()
    }
}

#[async_trait]
impl ReportTools for RecordingTools {
    async fn summarize(
        &self,
        capture: &Path,
        document: &Path,
        _workdir: &Path,
    ) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(ToolCall::Summarize {
            capture: capture.to_path_buf(),
            document: document.to_path_buf(),
        });
        if let Some(cancel) = &self.cancel_on_summarize {
            cancel.cancel();
            return Err(ToolError::Cancelled {
                program: "spsummarizer.sh".to_string(),
            });
        }
        std::fs::write(document, "# Summary\n").map_err(|source| ToolError::Output {
            path: document.to_path_buf(),
            source,
        })
    }

    async fn render(&self, document: &Path, target: &Path, _workdir: &Path) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(ToolCall::Render {
            document: document.to_path_buf(),
            target: target.to_path_buf(),
        });
        if self.fail_render {
            return Err(ToolError::Exit {
                program: "pandoc".to_string(),
                code: Some(43),
            });
        }
        std::fs::write(target, b"%PDF-1.5\n").map_err(|source| ToolError::Output {
            path: target.to_path_buf(),
            source,
        })
    }
}
