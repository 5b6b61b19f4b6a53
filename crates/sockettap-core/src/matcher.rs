//! Match predicates deciding which traces get emitted
//!
//! A [`MatchPredicate`] tree is compiled once from [`MatchConfig`] and then
//! evaluated at two points in a connection's life:
//!
//! - at connection setup, against the [`ConnectionInfo`] alone. Leaves that
//!   depend on traffic are undecided at that point, so the result is
//!   three-valued. A definite [`MatchOutcome::NotMatched`] lets the factory
//!   skip tapping the connection entirely.
//! - at submission time, against a [`MatchContext`] carrying the connection
//!   and the bytes observed so far.

use crate::events::{ConnectionInfo, StreamedSegment, TraceBuffer};
use serde::{Deserialize, Serialize};

/// Match configuration, as written in settings files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchConfig {
    /// Always matches
    #[default]
    Any,
    /// Inverts the inner rule
    Not { rule: Box<MatchConfig> },
    /// All rules must match
    And { rules: Vec<MatchConfig> },
    /// At least one rule must match
    Or { rules: Vec<MatchConfig> },
    /// Local (proxy side) port equals
    LocalPort { port: u16 },
    /// Remote (peer) port equals
    RemotePort { port: u16 },
    /// Negotiated protocol equals
    Protocol { name: String },
    /// Total bytes read and written reach a threshold
    MinTotalBytes { bytes: u64 },
}

/// Result of evaluating a predicate before any traffic was seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched,
    NotMatched,
    /// Depends on traffic that has not been observed yet
    Undecided,
}

/// Everything a predicate may look at when deciding on a submission
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub connection: &'a ConnectionInfo,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl<'a> MatchContext<'a> {
    pub fn for_segment(segment: &'a StreamedSegment) -> Self {
        Self {
            connection: &segment.connection,
            rx_bytes: segment.rx_total,
            tx_bytes: segment.tx_total,
        }
    }

    pub fn for_trace(trace: &'a TraceBuffer) -> Self {
        Self {
            connection: trace.connection(),
            rx_bytes: trace.rx().observed_bytes,
            tx_bytes: trace.tx().observed_bytes,
        }
    }
}

/// Compiled predicate tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPredicate {
    Any,
    Not(Box<MatchPredicate>),
    And(Vec<MatchPredicate>),
    Or(Vec<MatchPredicate>),
    LocalPort(u16),
    RemotePort(u16),
    Protocol(String),
    MinTotalBytes(u64),
}

impl MatchPredicate {
    pub fn compile(config: &MatchConfig) -> Self {
        match config {
            MatchConfig::Any => MatchPredicate::Any,
            MatchConfig::Not { rule } => MatchPredicate::Not(Box::new(Self::compile(rule))),
            MatchConfig::And { rules } => {
                MatchPredicate::And(rules.iter().map(Self::compile).collect())
            }
            MatchConfig::Or { rules } => {
                MatchPredicate::Or(rules.iter().map(Self::compile).collect())
            }
            MatchConfig::LocalPort { port } => MatchPredicate::LocalPort(*port),
            MatchConfig::RemotePort { port } => MatchPredicate::RemotePort(*port),
            MatchConfig::Protocol { name } => MatchPredicate::Protocol(name.clone()),
            MatchConfig::MinTotalBytes { bytes } => MatchPredicate::MinTotalBytes(*bytes),
        }
    }

    /// Evaluate against the connection alone
    pub fn on_connection(&self, connection: &ConnectionInfo) -> MatchOutcome {
        match self {
            MatchPredicate::Any => MatchOutcome::Matched,
            MatchPredicate::Not(inner) => match inner.on_connection(connection) {
                MatchOutcome::Matched => MatchOutcome::NotMatched,
                MatchOutcome::NotMatched => MatchOutcome::Matched,
                MatchOutcome::Undecided => MatchOutcome::Undecided,
            },
            MatchPredicate::And(rules) => {
                let mut outcome = MatchOutcome::Matched;
                for rule in rules {
                    match rule.on_connection(connection) {
                        MatchOutcome::NotMatched => return MatchOutcome::NotMatched,
                        MatchOutcome::Undecided => outcome = MatchOutcome::Undecided,
                        MatchOutcome::Matched => {}
                    }
                }
                outcome
            }
            MatchPredicate::Or(rules) => {
                let mut outcome = MatchOutcome::NotMatched;
                for rule in rules {
                    match rule.on_connection(connection) {
                        MatchOutcome::Matched => return MatchOutcome::Matched,
                        MatchOutcome::Undecided => outcome = MatchOutcome::Undecided,
                        MatchOutcome::NotMatched => {}
                    }
                }
                outcome
            }
            MatchPredicate::LocalPort(port) => decided(connection.local_port() == Some(*port)),
            MatchPredicate::RemotePort(port) => decided(connection.remote_port() == Some(*port)),
            MatchPredicate::Protocol(name) => {
                decided(connection.protocol.as_deref() == Some(name.as_str()))
            }
            MatchPredicate::MinTotalBytes(0) => MatchOutcome::Matched,
            MatchPredicate::MinTotalBytes(_) => MatchOutcome::Undecided,
        }
    }

    /// Evaluate against the connection and the traffic observed so far
    pub fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        match self {
            MatchPredicate::Any => true,
            MatchPredicate::Not(inner) => !inner.matches(ctx),
            MatchPredicate::And(rules) => rules.iter().all(|r| r.matches(ctx)),
            MatchPredicate::Or(rules) => rules.iter().any(|r| r.matches(ctx)),
            MatchPredicate::LocalPort(_)
            | MatchPredicate::RemotePort(_)
            | MatchPredicate::Protocol(_) => {
                self.on_connection(ctx.connection) == MatchOutcome::Matched
            }
            MatchPredicate::MinTotalBytes(bytes) => {
                ctx.rx_bytes.saturating_add(ctx.tx_bytes) >= *bytes
            }
        }
    }
}

fn decided(matched: bool) -> MatchOutcome {
    if matched {
        MatchOutcome::Matched
    } else {
        MatchOutcome::NotMatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionInfo {
        ConnectionInfo::new(1)
            .with_local_address("10.0.0.1:443".parse().unwrap())
            .with_remote_address("10.0.0.2:51000".parse().unwrap())
            .with_protocol("h2")
    }

    fn ctx(conn: &ConnectionInfo, rx: u64, tx: u64) -> MatchContext<'_> {
        MatchContext {
            connection: conn,
            rx_bytes: rx,
            tx_bytes: tx,
        }
    }

    #[test]
    fn test_parse_match_tree() {
        let toml_str = r#"
            type = "and"

            [[rules]]
            type = "local_port"
            port = 443

            [[rules]]
            type = "not"
            rule = { type = "protocol", name = "http/1.1" }
        "#;
        let config: MatchConfig = toml::from_str(toml_str).unwrap();
        let predicate = MatchPredicate::compile(&config);
        assert_eq!(
            predicate,
            MatchPredicate::And(vec![
                MatchPredicate::LocalPort(443),
                MatchPredicate::Not(Box::new(MatchPredicate::Protocol("http/1.1".into()))),
            ])
        );
        assert_eq!(predicate.on_connection(&connection()), MatchOutcome::Matched);
    }

    #[test]
    fn test_connection_time_rejection() {
        let predicate = MatchPredicate::And(vec![
            MatchPredicate::RemotePort(80),
            MatchPredicate::MinTotalBytes(100),
        ]);
        assert_eq!(
            predicate.on_connection(&connection()),
            MatchOutcome::NotMatched
        );
    }

    #[test]
    fn test_traffic_dependent_is_undecided() {
        let conn = connection();
        let predicate = MatchPredicate::MinTotalBytes(100);
        assert_eq!(predicate.on_connection(&conn), MatchOutcome::Undecided);
        assert!(!predicate.matches(&ctx(&conn, 50, 49)));
        assert!(predicate.matches(&ctx(&conn, 50, 50)));

        let negated = MatchPredicate::Not(Box::new(predicate));
        assert_eq!(negated.on_connection(&conn), MatchOutcome::Undecided);
    }

    #[test]
    fn test_or_short_circuits() {
        let conn = connection();
        let predicate = MatchPredicate::Or(vec![
            MatchPredicate::MinTotalBytes(1 << 20),
            MatchPredicate::Protocol("h2".into()),
        ]);
        assert_eq!(predicate.on_connection(&conn), MatchOutcome::Matched);
        assert!(predicate.matches(&ctx(&conn, 0, 0)));

        let none = MatchPredicate::Or(vec![]);
        assert_eq!(none.on_connection(&conn), MatchOutcome::NotMatched);
    }

    #[test]
    fn test_missing_address_never_matches_port() {
        let conn = ConnectionInfo::new(2);
        assert_eq!(
            MatchPredicate::LocalPort(443).on_connection(&conn),
            MatchOutcome::NotMatched
        );
    }
}
