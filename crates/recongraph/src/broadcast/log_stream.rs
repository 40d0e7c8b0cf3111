//! Per-observer event feed over a scan's live state.
//!
//! Every observer keeps its own cursor into the scan log. On each tick it
//! receives the new log lines, a stats snapshot and the current status, and
//! once the scan's execution path has finished, a `done` marker.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ReplayPolicy;
use crate::scan::{ActiveScanRegistry, ScanStats, ScanStatus};

/// One event of a scan feed. Serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Log {
        line: String,
    },
    Stats {
        data: ScanStats,
    },
    Status {
        status: ScanStatus,
    },
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ScanStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ScanEvent {
    fn not_active() -> Self {
        ScanEvent::Done {
            status: None,
            message: Some("Scan not active".to_string()),
        }
    }

    /// Server-sent-events framing: `data: <json>\n\n`.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ScanEvent::Done { .. })
    }
}

/// A polling feed for one observer of one scan.
pub struct LogStream {
    scan_id: String,
    registry: ActiveScanRegistry,
    cursor: usize,
    poll_interval: Duration,
    shutdown: CancellationToken,
    pending: VecDeque<ScanEvent>,
    ticked: bool,
    closed: bool,
}

impl LogStream {
    pub fn new(
        registry: ActiveScanRegistry,
        scan_id: &str,
        replay: ReplayPolicy,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let cursor = registry
            .get(scan_id)
            .map(|scan| replay.start_cursor(scan.log_len()))
            .unwrap_or(0);
        Self {
            scan_id: scan_id.to_string(),
            registry,
            cursor,
            poll_interval,
            shutdown,
            pending: VecDeque::new(),
            ticked: false,
            closed: false,
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    /// Next event, or `None` once the feed has ended.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.closed {
                return None;
            }
            if self.ticked {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = self.shutdown.cancelled() => {
                        self.close_for_shutdown();
                        continue;
                    }
                }
            }
            self.ticked = true;
            self.tick();
        }
    }

    /// Adapts the feed into a `Stream`.
    pub fn into_stream(self) -> impl Stream<Item = ScanEvent> {
        futures_util::stream::unfold(self, |mut feed| async move {
            feed.next_event().await.map(|event| (event, feed))
        })
    }

    fn tick(&mut self) {
        let Some(scan) = self.registry.get(&self.scan_id) else {
            self.pending.push_back(ScanEvent::not_active());
            self.closed = true;
            return;
        };

        // Read before the log so the final lines are always flushed.
        let finished = scan.is_finished();

        let lines = scan.lines_from(self.cursor);
        self.cursor += lines.len();
        self.pending
            .extend(lines.into_iter().map(|line| ScanEvent::Log { line }));

        self.pending.push_back(ScanEvent::Stats { data: scan.stats() });

        let status = scan.status();
        self.pending.push_back(ScanEvent::Status { status });

        if finished && status.is_terminal() {
            self.pending.push_back(ScanEvent::Done {
                status: Some(status),
                message: None,
            });
            self.closed = true;
        }
    }

    fn close_for_shutdown(&mut self) {
        self.tick();
        if !self.closed {
            let status = self.registry.get(&self.scan_id).map(|scan| scan.status());
            self.pending.push_back(ScanEvent::Done {
                status,
                message: Some("Engine shutting down".to_string()),
            });
            self.closed = true;
        }
    }
}
