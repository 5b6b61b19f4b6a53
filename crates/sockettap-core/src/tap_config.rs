//! Socket tap configuration and tapper factory

use crate::config::{SocketTapSettings, TapMode};
use crate::events::ConnectionInfo;
use crate::matcher::{MatchOutcome, MatchPredicate};
use crate::sink::{MatchSink, MatchingSink, TraceSink};
use crate::stats::TransportTapStats;
use crate::tapper::PerSocketTapper;
use crate::time::TimeSource;
use std::sync::Arc;
use tracing::trace;

/// How tapped traffic is handed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    /// Every event is evaluated and submitted as it happens
    Streamed,
    /// The whole connection is buffered and evaluated once at close
    Buffered {
        max_rx_bytes: u64,
        max_tx_bytes: u64,
    },
}

/// Immutable tap configuration shared by every connection it taps
pub struct SocketTapConfig {
    mode: SubmissionMode,
    engine: Arc<dyn MatchSink>,
    time_source: Arc<dyn TimeSource>,
}

/// Shared handle to a tap configuration
pub type SharedTapConfig = Arc<SocketTapConfig>;

impl SocketTapConfig {
    pub fn new(
        mode: SubmissionMode,
        engine: Arc<dyn MatchSink>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            mode,
            engine,
            time_source,
        }
    }

    /// Build from settings, with the default predicate engine in front of `sink`
    pub fn from_settings(
        settings: &SocketTapSettings,
        sink: Arc<dyn TraceSink>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let mode = match settings.mode {
            TapMode::Streamed => SubmissionMode::Streamed,
            TapMode::Buffered => SubmissionMode::Buffered {
                max_rx_bytes: settings.max_buffered_rx_bytes,
                max_tx_bytes: settings.max_buffered_tx_bytes,
            },
        };
        let predicate = MatchPredicate::compile(&settings.match_config);
        Self::new(
            mode,
            Arc::new(MatchingSink::new(predicate, sink)),
            time_source,
        )
    }

    /// Create the tapper for a new connection.
    ///
    /// Returns `None` when the connection can never match, in which case the
    /// connection carries no tap state at all.
    pub fn create_per_socket_tapper(
        self: &Arc<Self>,
        stats: &TransportTapStats,
        connection: &ConnectionInfo,
    ) -> Option<PerSocketTapper> {
        if self.engine.on_connection(connection) == MatchOutcome::NotMatched {
            trace!(connection_id = connection.id, "Connection not tapped");
            return None;
        }
        Some(PerSocketTapper::new(
            Arc::clone(self),
            stats.clone(),
            connection.clone(),
        ))
    }

    pub fn mode(&self) -> SubmissionMode {
        self.mode
    }

    pub fn time_source(&self) -> &dyn TimeSource {
        self.time_source.as_ref()
    }

    pub(crate) fn engine(&self) -> &dyn MatchSink {
        self.engine.as_ref()
    }
}

impl std::fmt::Debug for SocketTapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTapConfig")
            .field("mode", &self.mode)
            .field("time_source", &self.time_source)
            .finish_non_exhaustive()
    }
}
