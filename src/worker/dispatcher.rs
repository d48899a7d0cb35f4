//! Event dispatcher: the worker's receive loop.
//!
//! Messages are handled strictly one at a time, in arrival order. A report
//! request is awaited to completion (processing, notification, registry
//! close-out) before the next message is read.

use crate::broker::Subscription;
use crate::error::WorkerError;
use crate::models::{Command, DecodeError, InboundMessage, ProfileName, ReportOutcome, ServiceStatus};
use crate::registry::{ProfileRegistry, RegistryUpdater};
use crate::report::TrafficProcessor;
use crate::worker::announcer::StatusAnnouncer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How the receive loop ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The subscription stream ended.
    StreamEnded,
    /// A shutdown signal cancelled the worker.
    Cancelled,
}

/// What handling one message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a content message, or a payload no command matches.
    Ignored,
    /// Answered a liveness probe.
    StatusReported,
    /// Ran a report request to one of its terminal outcomes.
    Report(ReportOutcome),
    /// A report request was cut short by shutdown; nothing was announced.
    Interrupted,
}

/// Routes control messages to their handlers.
pub struct Dispatcher {
    announcer: StatusAnnouncer,
    registry: Arc<dyn ProfileRegistry>,
    processor: TrafficProcessor,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        announcer: StatusAnnouncer,
        registry: Arc<dyn ProfileRegistry>,
        processor: TrafficProcessor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            announcer,
            registry,
            processor,
            cancel,
        }
    }

    /// Run the worker on an open subscription.
    ///
    /// The offline announcement is attempted and the subscription closed on
    /// every exit path, faulted or not.
    pub async fn serve(&self, subscription: &mut dyn Subscription) -> Result<Shutdown, WorkerError> {
        let result = self.receive_loop(subscription).await;

        let offline = self.announcer.announce(ServiceStatus::Offline).await;
        if let Err(e) = subscription.close().await {
            warn!("Failed to close subscription: {}", e);
        }

        match (result, offline) {
            (Ok(shutdown), Ok(())) => {
                info!("Terminating ({:?})", shutdown);
                Ok(shutdown)
            }
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Err(offline_err)) => {
                warn!("Offline announcement failed: {}", offline_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    async fn receive_loop(&self, subscription: &mut dyn Subscription) -> Result<Shutdown, WorkerError> {
        self.announcer.announce(ServiceStatus::Online).await?;

        loop {
            // Shutdown wins over messages already queued on the subscription.
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Shutdown::Cancelled),
                next = subscription.next_message() => next?,
            };

            let Some(message) = next else {
                return Ok(Shutdown::StreamEnded);
            };

            self.handle(&message).await?;
        }
    }

    /// Handle a single delivery from the subscription.
    pub async fn handle(&self, message: &InboundMessage) -> Result<Dispatch, WorkerError> {
        if !message.is_content() {
            debug!("Ignoring {} on {}", message.kind, message.channel);
            return Ok(Dispatch::Ignored);
        }

        info!(
            "New message received in channel {}: {}",
            message.channel, message.payload
        );

        match Command::decode(&message.payload) {
            Ok(Command::StatusProbe) => {
                self.announcer.announce(ServiceStatus::Online).await?;
                Ok(Dispatch::StatusReported)
            }
            Ok(Command::ReportProfile(profile)) => self.report(&profile).await,
            Err(DecodeError::Unrecognized) => {
                debug!("No command matches {:?}", message.payload);
                Ok(Dispatch::Ignored)
            }
            Err(DecodeError::InvalidProfile(e)) => {
                warn!("Ignoring report request {:?}: {}", message.payload, e);
                Ok(Dispatch::Ignored)
            }
        }
    }

    async fn report(&self, profile: &ProfileName) -> Result<Dispatch, WorkerError> {
        info!("Starting report on profile {}", profile);

        let outcome = match self.processor.process(profile).await {
            Ok(result) => {
                info!(
                    "Status of report on profile {}: {}",
                    profile,
                    result.has_valid_capture()
                );
                ReportOutcome::from(&result)
            }
            Err(e) if e.is_cancelled() => {
                warn!("Report on profile {} interrupted: {}", profile, e);
                return Ok(Dispatch::Interrupted);
            }
            Err(e) => {
                error!("Report on profile {} failed: {}", profile, e);
                ReportOutcome::Failed
            }
        };

        match outcome {
            ReportOutcome::EmptyCapture => info!("All associated captures were empty"),
            ReportOutcome::Completed => info!("Processing of associated captures completed"),
            ReportOutcome::Failed => info!("Profile {} stays pending", profile),
        }

        self.announcer.notify(&outcome.notification(profile)).await?;

        if outcome.closes_profile() {
            let closed = RegistryUpdater::new(self.registry.as_ref())
                .close_out(profile)
                .await;
            if !(closed.dequeued && closed.stamped) {
                warn!("Profile {} was only partially closed out", profile);
            }
        }

        Ok(Dispatch::Report(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConfig, CaptureScanner};
    use crate::config::{RedisConfig, ReportConfig};
    use crate::models::MessageKind;
    use crate::storage::StorageLocator;
    use crate::testing::{MemoryBroker, MemoryRegistry, RecordingTools, ScriptedSubscription};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    const STATUS: &str = "services_status";
    const NOTIFY: &str = "mod_comm_send_check";
    const CONTROL: &str = "mod_report_check";

    struct Harness {
        _temp: TempDir,
        root: std::path::PathBuf,
        broker: Arc<MemoryBroker>,
        registry: Arc<MemoryRegistry>,
        tools: Arc<RecordingTools>,
        cancel: CancellationToken,
        dispatcher: Dispatcher,
    }

    fn harness(pending: &[&str]) -> Harness {
        harness_with(pending, |_| RecordingTools::default())
    }

    fn harness_with(
        pending: &[&str],
        tools: impl FnOnce(&CancellationToken) -> RecordingTools,
    ) -> Harness {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let broker = Arc::new(MemoryBroker::default());
        let registry = Arc::new(MemoryRegistry::with_pending(pending.iter().copied()));
        let cancel = CancellationToken::new();
        let tools = Arc::new(tools(&cancel));

        let processor = TrafficProcessor::new(
            StorageLocator::new(root.clone(), &ReportConfig::default()),
            CaptureScanner::new(CaptureConfig::default()),
            tools.clone(),
        );
        let dispatcher = Dispatcher::new(
            StatusAnnouncer::new(broker.clone(), &RedisConfig::default()),
            registry.clone(),
            processor,
            cancel.clone(),
        );

        Harness {
            _temp: temp,
            root,
            broker,
            registry,
            tools,
            cancel,
            dispatcher,
        }
    }

    fn add_capture(root: &Path, profile: &str, file: &str, len: usize) {
        let dir = root.join(profile);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), vec![0xa1u8; len]).unwrap();
    }

    fn msg(payload: &str) -> InboundMessage {
        InboundMessage::message(CONTROL, payload)
    }

    #[tokio::test]
    async fn test_status_probe_announces_online_only() {
        let h = harness(&["alice"]);

        let dispatch = assert_ok!(h.dispatcher.handle(&msg("report_status")).await);

        assert_eq!(dispatch, Dispatch::StatusReported);
        assert_eq!(h.broker.on(STATUS), vec!["MOD_REPORT:online"]);
        assert!(h.broker.on(NOTIFY).is_empty());
        assert_eq!(h.registry.operations(), 0);
    }

    #[tokio::test]
    async fn test_unrecognized_payloads_do_nothing() {
        let h = harness(&["alice"]);

        for payload in ["", "hello", "report_profile", "report_profile:", "report_profile:a/b"] {
            let dispatch = assert_ok!(h.dispatcher.handle(&msg(payload)).await);
            assert_eq!(dispatch, Dispatch::Ignored, "payload {:?}", payload);
        }

        assert!(h.broker.published().is_empty());
        assert!(h.tools.calls().is_empty());
        assert_eq!(h.registry.operations(), 0);
    }

    #[tokio::test]
    async fn test_non_content_messages_are_ignored() {
        let h = harness(&[]);
        let ack = InboundMessage {
            kind: MessageKind::Other("subscribe".to_string()),
            channel: CONTROL.to_string(),
            payload: "report_status".to_string(),
        };

        let dispatch = assert_ok!(h.dispatcher.handle(&ack).await);

        assert_eq!(dispatch, Dispatch::Ignored);
        assert!(h.broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_empty_capture_outcome() {
        let h = harness(&["alice"]);
        add_capture(&h.root, "alice", "alice.pcap", 10);

        let dispatch = assert_ok!(h.dispatcher.handle(&msg("report_profile:alice")).await);

        assert_eq!(dispatch, Dispatch::Report(ReportOutcome::EmptyCapture));
        assert_eq!(h.broker.on(NOTIFY), vec!["send_empty_capture_email:alice"]);
        assert!(!h.root.join("alice/alice.pdf").exists());
        assert!(!h.registry.is_pending("alice"));
        assert_eq!(h.registry.stamp_count("alice"), 1);
        assert!(h.tools.calls().is_empty());
    }

    #[tokio::test]
    async fn test_completed_outcome() {
        let h = harness(&["bob"]);
        add_capture(&h.root, "bob", "a.pcap", 10_000);
        add_capture(&h.root, "bob", "b.pcap", 5);

        let dispatch = assert_ok!(h.dispatcher.handle(&msg("report_profile:bob")).await);

        assert_eq!(dispatch, Dispatch::Report(ReportOutcome::Completed));
        assert_eq!(h.broker.on(NOTIFY), vec!["send_report_profile_email:bob"]);
        assert_eq!(h.tools.summarize_count(), 1);
        assert_eq!(h.tools.render_count(), 1);
        assert!(h.root.join("bob/bob.pdf").exists());
        assert!(!h.registry.is_pending("bob"));
        assert_eq!(h.registry.stamp_count("bob"), 1);
    }

    #[tokio::test]
    async fn test_failed_profile_keeps_worker_alive_and_registry_untouched() {
        let h = harness(&["ghost", "alice"]);
        add_capture(&h.root, "alice", "alice.pcap", 3);
        let mut subscription = ScriptedSubscription::new([
            msg("report_profile:ghost"),
            msg("report_profile:alice"),
        ]);

        let shutdown = assert_ok!(h.dispatcher.serve(&mut subscription).await);

        assert_eq!(shutdown, Shutdown::StreamEnded);
        assert_eq!(
            h.broker.on(NOTIFY),
            vec![
                "report_profile_failed:ghost",
                "send_empty_capture_email:alice"
            ]
        );
        assert!(h.registry.is_pending("ghost"));
        assert_eq!(h.registry.stamp_count("ghost"), 0);
        assert!(!h.registry.is_pending("alice"));
    }

    #[tokio::test]
    async fn test_stream_end_is_a_clean_shutdown() {
        let h = harness(&[]);
        let mut subscription = ScriptedSubscription::new([msg("report_status")]);

        let shutdown = assert_ok!(h.dispatcher.serve(&mut subscription).await);

        assert_eq!(shutdown, Shutdown::StreamEnded);
        assert_eq!(
            h.broker.on(STATUS),
            vec!["MOD_REPORT:online", "MOD_REPORT:online", "MOD_REPORT:offline"]
        );
        assert!(subscription.is_closed());
    }

    #[tokio::test]
    async fn test_messages_are_handled_in_arrival_order() {
        let h = harness(&["alice", "bob"]);
        add_capture(&h.root, "alice", "x.pcap", 1);
        add_capture(&h.root, "bob", "x.pcap", 100);
        let mut subscription = ScriptedSubscription::new([
            msg("report_profile:bob"),
            msg("noise"),
            msg("report_profile:alice"),
            msg("report_profile:bob"),
        ]);

        assert_ok!(h.dispatcher.serve(&mut subscription).await);

        assert_eq!(
            h.broker.on(NOTIFY),
            vec![
                "send_report_profile_email:bob",
                "send_empty_capture_email:alice",
                "send_report_profile_email:bob",
            ]
        );
        assert_eq!(h.tools.summarize_count(), 2);
        assert_eq!(h.registry.stamp_count("bob"), 2);
    }

    #[tokio::test]
    async fn test_publish_fault_ends_the_loop() {
        let h = harness(&["alice"]);
        h.broker.fail_publishing();
        let mut subscription = ScriptedSubscription::new([msg("report_status")]);

        let result = h.dispatcher.serve(&mut subscription).await;

        assert!(matches!(result, Err(WorkerError::Broker(_))));
        assert!(subscription.is_closed());
        assert_eq!(subscription.remaining(), 1);
    }

    #[tokio::test]
    async fn test_receive_fault_ends_the_loop() {
        let h = harness(&[]);
        let mut subscription = ScriptedSubscription::new(Vec::<InboundMessage>::new()).then_fail();

        let result = h.dispatcher.serve(&mut subscription).await;

        assert!(result.is_err());
        assert_eq!(
            h.broker.on(STATUS),
            vec!["MOD_REPORT:online", "MOD_REPORT:offline"]
        );
        assert!(subscription.is_closed());
    }

    #[tokio::test]
    async fn test_cancellation_is_a_clean_shutdown() {
        let h = harness(&[]);
        let mut subscription = ScriptedSubscription::new(Vec::<InboundMessage>::new()).then_hang();
        let cancel = h.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let shutdown = assert_ok!(h.dispatcher.serve(&mut subscription).await);

        assert_eq!(shutdown, Shutdown::Cancelled);
        assert_eq!(
            h.broker.on(STATUS),
            vec!["MOD_REPORT:online", "MOD_REPORT:offline"]
        );
    }

    #[tokio::test]
    async fn test_shutdown_during_report_announces_nothing() {
        let h = harness_with(&["bob"], |cancel| RecordingTools::cancelling(cancel.clone()));
        add_capture(&h.root, "bob", "a.pcap", 10_000);

        let dispatch = assert_ok!(h.dispatcher.handle(&msg("report_profile:bob")).await);

        assert_eq!(dispatch, Dispatch::Interrupted);
        assert!(h.cancel.is_cancelled());
        assert!(h.broker.published().is_empty());
        assert!(h.registry.is_pending("bob"));
        assert_eq!(h.registry.operations(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_during_report_skips_queued_messages() {
        let h = harness_with(&["bob"], |cancel| RecordingTools::cancelling(cancel.clone()));
        add_capture(&h.root, "bob", "a.pcap", 10_000);
        let mut subscription = ScriptedSubscription::new([
            msg("report_profile:bob"),
            msg("report_status"),
            msg("report_profile:bob"),
        ]);

        let shutdown = assert_ok!(h.dispatcher.serve(&mut subscription).await);

        assert_eq!(shutdown, Shutdown::Cancelled);
        assert_eq!(
            h.broker.on(STATUS),
            vec!["MOD_REPORT:online", "MOD_REPORT:offline"]
        );
        assert!(h.broker.on(NOTIFY).is_empty());
        assert_eq!(h.tools.summarize_count(), 1);
        assert_eq!(h.registry.operations(), 0);
        assert!(h.registry.is_pending("bob"));
        assert_eq!(subscription.remaining(), 2);
        assert!(subscription.is_closed());
    }
}
