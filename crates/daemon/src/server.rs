//! Server setup and lifecycle management

use crate::config::DaemonConfig;
use crate::error::DaemonResult;
use crate::transport::{Inbound, JsonLinesWriter, Outbound};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use warden_enrollment::{register_flows, Ed25519SigningOracle, Enroler, SigningOracle, Subject};
use warden_flow_engine::{
    DispatchOutcome, FlowEngine, FlowRegistry, FlowStateStore, JournalFlowStore, MemoryFlowStore,
};
use warden_flow_types::{ClientMessage, SessionId};
use warden_query::{search_clients, Behaviour, NavigationRegistry, QueryWindow};
use warden_store::{ObjectStore, Token};

/// Warden server: one flow engine fed from a line-oriented transport.
pub struct Server {
    config: DaemonConfig,
    store: ObjectStore,
    engine: FlowEngine,
    journal: Option<Arc<JournalFlowStore>>,
    writer: Arc<JsonLinesWriter>,
    navigation: NavigationRegistry,
}

impl Server {
    /// A server writing to stdout.
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        Self::with_writer(config, Arc::new(JsonLinesWriter::stdout()))
    }

    /// A server writing outbound records to `writer`.
    pub fn with_writer(config: DaemonConfig, writer: Arc<JsonLinesWriter>) -> DaemonResult<Self> {
        let store = ObjectStore::in_memory();

        let issuer = Subject::new(config.enrollment.ca_name.clone());
        let oracle = match &config.enrollment.ca_key_path {
            Some(path) => Ed25519SigningOracle::load_or_create(path, issuer)?,
            None => {
                warn!("No CA key configured, certificates will not survive a restart");
                Ed25519SigningOracle::generate(issuer)?
            }
        }
        .with_clock_skew(chrono::Duration::seconds(config.enrollment.clock_skew_secs))
        .with_validity(chrono::Duration::days(config.enrollment.validity_days));
        let oracle: Arc<dyn SigningOracle> = Arc::new(oracle);

        let enroler = Arc::new(Enroler::new(
            SessionId::new(config.enrollment.well_known_session.clone()),
            config.enrollment.cache_capacity,
        ));

        let journal = match &config.persistence.journal_path {
            Some(path) => Some(Arc::new(
                JournalFlowStore::open(path)?.with_sync(config.persistence.sync),
            )),
            None => None,
        };
        let persistence: Arc<dyn FlowStateStore> = match &journal {
            Some(journal) => journal.clone() as Arc<dyn FlowStateStore>,
            None => Arc::new(MemoryFlowStore::new()),
        };

        let engine = FlowEngine::builder(register_flows(FlowRegistry::new())?, store.clone())
            .with_config(config.engine.clone())
            .with_service(oracle)
            .with_well_known(enroler)
            .with_persistence(persistence)
            .with_outbox(writer.clone())
            .build();

        Ok(Self {
            config,
            store,
            engine,
            journal,
            writer,
            navigation: default_navigation(),
        })
    }

    pub fn engine(&self) -> &FlowEngine {
        &self.engine
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn navigation(&self) -> &NavigationRegistry {
        &self.navigation
    }

    /// Handle one input line.
    pub fn handle_line(&self, line: &str) -> DaemonResult<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        match Inbound::parse(line)? {
            Inbound::Message(message) => {
                self.dispatch(message);
                Ok(())
            }
            Inbound::Search { query, window } => self.search(&query, window),
            Inbound::Navigation => {
                let (host, general): (Vec<_>, Vec<_>) = self
                    .navigation
                    .categories()
                    .iter()
                    .partition(|c| c.behaviour == Behaviour::Host);
                self.writer.write(&Outbound::Navigation { host, general })?;
                Ok(())
            }
        }
    }

    fn dispatch(&self, message: ClientMessage) {
        let session_id = message.session_id.clone();
        match self.engine.dispatch(message) {
            DispatchOutcome::Rejected(reason) => {
                debug!(session_id = %session_id, reason = %reason, "Message rejected")
            }
            DispatchOutcome::Dropped(reason) => {
                debug!(session_id = %session_id, reason = ?reason, "Message dropped")
            }
            DispatchOutcome::WellKnown | DispatchOutcome::Delivered { .. } => {}
        }
    }

    fn search(&self, query: &str, window: QueryWindow) -> DaemonResult<()> {
        let record = match search_clients(&self.store, &Token::system(), query, window) {
            Ok(clients) => Outbound::SearchResults { query, clients },
            Err(e) => Outbound::SearchError {
                query,
                error: e.to_string(),
            },
        };
        self.writer.write(&record)?;
        Ok(())
    }

    /// Recover persisted flows, then serve stdin until it closes or the
    /// process is interrupted.
    pub async fn run(self) -> DaemonResult<()> {
        self.serve(BufReader::new(tokio::io::stdin()), shutdown_signal()).await
    }

    /// Recover persisted flows, then handle `input` line by line until it
    /// ends or `shutdown` resolves. Lines still being handled are awaited
    /// before deferred writes are flushed and the journal is compacted.
    pub async fn serve<R, S>(self, input: R, shutdown: S) -> DaemonResult<()>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let server = Arc::new(self);
        let restored = server.engine.recover()?;
        info!(
            restored,
            journal = ?server.config.persistence.journal_path,
            well_known = %server.config.enrollment.well_known_session,
            "wardend started"
        );

        let sweeper = spawn_sweeper(
            server.engine.clone(),
            server.config.engine.sweep_interval(),
        );

        let mut in_flight = JoinSet::new();
        let mut lines = input.lines();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let server = server.clone();
                        in_flight.spawn_blocking(move || {
                            if let Err(e) = server.handle_line(&line) {
                                warn!(error = %e, "Input line not handled");
                            }
                        });
                    }
                    Ok(None) => {
                        info!("Input closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Input closed with an error");
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                }
                _ = &mut shutdown => break,
            }
        }

        let draining = in_flight.len();
        if draining > 0 {
            info!(lines = draining, "Waiting for in-flight lines");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }

        sweeper.abort();
        server.shutdown()
    }

    fn shutdown(&self) -> DaemonResult<()> {
        let flushed = self.store.flush_deferred()?;
        if let Some(journal) = &self.journal {
            let kept = journal.compact()?;
            info!(sessions = kept, "Flow journal compacted on shutdown");
        }
        let snapshot = serde_json::to_string(&self.store.telemetry().snapshot())?;
        info!(
            deferred_flushed = flushed,
            active_flows = self.engine.active_flows().len(),
            telemetry = %snapshot,
            "wardend stopped"
        );
        Ok(())
    }
}

fn default_navigation() -> NavigationRegistry {
    let mut navigation = NavigationRegistry::new();
    navigation
        .register("HostInformation", "Host Information", Behaviour::Host)
        .register("FlowManagement", "Start new flows", Behaviour::Host)
        .register("ClientSearch", "Search Clients", Behaviour::General)
        .register("Statistics", "Server Statistics", Behaviour::General);
    navigation
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Input line task failed");
    }
}

fn spawn_sweeper(engine: FlowEngine, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            let engine = engine.clone();
            match tokio::task::spawn_blocking(move || engine.check_timeouts(Utc::now())).await {
                Ok(0) => {}
                Ok(acted) => info!(requests = acted, "Timeout sweep acted on overdue requests"),
                Err(e) => error!(error = %e, "Timeout sweep failed"),
            }
        }
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
