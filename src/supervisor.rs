//! Runs one session per account and coordinates shutdown

use crate::config::AccountConfig;
use crate::iface::InterfaceProbe;
use crate::models::{SessionEvent, SessionPhase};
use crate::portal::PortalApi;
use crate::session::{shutdown_channel, Session, SessionEnv, SessionError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};

/// How a supervised run ended
#[derive(Debug, Default)]
pub struct RunReport {
    /// A termination request ended the run
    pub shutdown_requested: bool,
    /// Accounts whose session ended with an error
    pub failed: Vec<String>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.shutdown_requested {
            0
        } else {
            1
        }
    }

    fn record(&mut self, joined: Result<(String, Result<(), SessionError>), JoinError>) {
        match joined {
            Ok((key, Ok(()))) => tracing::debug!("[{}] Session finished", key),
            Ok((key, Err(e))) => {
                tracing::error!("{}", e);
                self.failed.push(key);
            }
            Err(e) => {
                tracing::error!("Session task aborted: {}", e);
                self.failed.push("<unknown>".to_string());
            }
        }
    }
}

pub struct Supervisor<A, P> {
    env: SessionEnv<A, P>,
}

impl<A, P> Supervisor<A, P>
where
    A: PortalApi + 'static,
    P: InterfaceProbe + 'static,
{
    pub fn new(env: SessionEnv<A, P>) -> Self {
        Self { env }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.env.events.subscribe()
    }

    /// Start every account and wait for `terminate`. Then broadcast shutdown
    /// and wait until each session has logged out and stopped.
    ///
    /// Returns early if all sessions end on their own.
    pub async fn run<F>(&self, accounts: Vec<AccountConfig>, terminate: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let (trigger, _) = shutdown_channel();
        let mut sessions = JoinSet::new();

        for account in accounts {
            let session = Session::new(account, self.env.clone(), trigger.subscribe());
            let key = session.key().to_string();
            sessions.spawn(async move {
                let result = session.run().await;
                (key, result)
            });
        }

        let mut report = RunReport::default();
        tokio::pin!(terminate);

        loop {
            tokio::select! {
                biased;
                _ = &mut terminate => {
                    tracing::info!("Caught termination signal, logging out...");
                    report.shutdown_requested = true;
                    trigger.trigger();
                    break;
                }
                joined = sessions.join_next() => match joined {
                    Some(joined) => report.record(joined),
                    None => {
                        tracing::error!("Every session has stopped, exiting");
                        return report;
                    }
                },
            }
        }

        while let Some(joined) = sessions.join_next().await {
            report.record(joined);
        }
        tracing::info!("All instances stopped. Exiting...");
        report
    }
}

/// Latest known phase of every account, built from session events
#[derive(Debug, Default, Clone)]
pub struct StatusBoard {
    table: Arc<Mutex<HashMap<String, SessionPhase>>>,
}

impl StatusBoard {
    /// Record an event; returns the account's previous phase
    pub fn apply(&self, event: &SessionEvent) -> Option<SessionPhase> {
        self.table.lock().insert(event.account.clone(), event.phase)
    }

    pub fn snapshot(&self) -> Vec<(String, SessionPhase)> {
        let mut rows: Vec<_> = self
            .table
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Keep the board current until the event channel closes
    pub async fn follow(self, mut events: broadcast::Receiver<SessionEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    match self.apply(&event) {
                        Some(prev) => tracing::debug!("[{}] {} -> {}", event.account, prev, event.phase),
                        None => tracing::debug!("[{}] {}", event.account, event.phase),
                    }
                    if event.phase.is_terminal() {
                        let running = self
                            .table
                            .lock()
                            .values()
                            .filter(|phase| !phase.is_terminal())
                            .count();
                        tracing::debug!("{} session(s) still running", running);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Status board missed {} session events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
