//! Scan-session lifecycle: submit, poll on a timer, reset.
//!
//! The controller owns at most one session. Submitting starts a poller task
//! that fetches the summary and then the findings on every tick. The poller is
//! held by a guard that cancels it when dropped, so a reset, a new submit, a
//! terminal scan status or dropping the controller all stop the timer.
//!
//! Responses are applied only while the session they belong to is still the
//! active one; anything else is discarded.

use std::sync::Arc;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{self, SeverityCards, NO_FINDINGS_MESSAGE};
use crate::client::{FindingsFilter, ScanApi};
use crate::config::{ClientConfig, HeatmapOrder, PollPolicy};
use crate::error::{ApiError, PollError, SubmitError};
use crate::types::{Finding, HeatmapEntry, ScanProgress, ScanRequest, SessionId, Summary};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Submitting,
    Active,
}

/// The session currently owned by a controller.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanSession {
    pub id: SessionId,
    pub created_at: String,
    pub export_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub policy: PollPolicy,
    pub heatmap_order: HeatmapOrder,
    pub filter: FindingsFilter,
}

impl PollSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            interval: config.poll_interval,
            policy: config.poll_policy,
            heatmap_order: config.heatmap_order,
            filter: FindingsFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: FindingsFilter) -> Self {
        self.filter = filter;
        self
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Render-ready snapshot of the controller.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ViewModel {
    pub phase: Phase,
    pub session: Option<ScanSession>,
    pub polling: bool,
    pub status: Option<String>,
    pub total_findings: u64,
    pub cards: SeverityCards,
    pub heatmap: Vec<HeatmapEntry>,
    /// Set when the heatmap is empty.
    pub empty_message: Option<&'static str>,
    pub service_totals: Vec<(String, u64)>,
    pub findings: Vec<Finding>,
    pub last_error: Option<String>,
    pub poll_failures: u64,
    pub ticks: u64,
}

/// Cancels its poller when dropped.
struct PollGuard {
    session: SessionId,
    cancel: CancellationToken,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct ControllerState {
    phase: Phase,
    session: Option<ScanSession>,
    summary: Option<Summary>,
    findings: Vec<Finding>,
    last_error: Option<String>,
    poll_failures: u64,
    ticks: u64,
    poller: Option<PollGuard>,
    // bumped on every submit and reset; a submit only lands if it still matches
    generation: u64,
}

impl ControllerState {
    fn is_current(&self, session: &SessionId) -> bool {
        self.session.as_ref().map(|s| &s.id) == Some(session)
    }

    fn clear_session(&mut self) {
        self.poller = None;
        self.session = None;
        self.summary = None;
        self.findings.clear();
        self.last_error = None;
        self.poll_failures = 0;
        self.ticks = 0;
        self.phase = Phase::Idle;
        self.generation += 1;
    }

    fn record_poll_failure(&mut self, err: &PollError) {
        warn!(error = %err, "poll tick failed; keeping previous results");
        self.last_error = Some(err.to_string());
        self.poll_failures += 1;
    }

    fn view(&self, order: HeatmapOrder) -> ViewModel {
        let heatmap = aggregator::heatmap(
            self.summary.as_ref().map(|s| s.severity_totals.as_slice()),
            order,
        );
        ViewModel {
            phase: self.phase,
            session: self.session.clone(),
            polling: self.poller.is_some(),
            status: self.summary.as_ref().map(|s| s.status.clone()),
            total_findings: self.summary.as_ref().map_or(0, |s| s.total_findings),
            cards: aggregator::severity_cards(self.summary.as_ref()),
            empty_message: heatmap.is_empty().then_some(NO_FINDINGS_MESSAGE),
            heatmap,
            service_totals: self
                .summary
                .as_ref()
                .map(|s| s.service_totals.clone())
                .unwrap_or_default(),
            findings: self.findings.clone(),
            last_error: self.last_error.clone(),
            poll_failures: self.poll_failures,
            ticks: self.ticks,
        }
    }
}

struct Shared {
    state: RwLock<ControllerState>,
    view: watch::Sender<ViewModel>,
    settings: PollSettings,
}

impl Shared {
    fn publish(&self, st: &ControllerState) {
        self.view.send_replace(st.view(self.settings.heatmap_order));
    }
}

enum TickOutcome {
    Applied { terminal: bool },
    Failed,
    Stale,
}

/// Drives one scan session at a time against a [`ScanApi`].
pub struct SessionController<A> {
    api: Arc<A>,
    shared: Arc<Shared>,
    teardown: CancellationToken,
}

impl<A: ScanApi + 'static> SessionController<A> {
    pub fn new(api: Arc<A>, settings: PollSettings) -> Self {
        let (view, _) = watch::channel(ViewModel {
            empty_message: Some(NO_FINDINGS_MESSAGE),
            ..ViewModel::default()
        });
        Self {
            api,
            shared: Arc::new(Shared {
                state: RwLock::new(ControllerState::default()),
                view,
                settings,
            }),
            teardown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.shared.settings
    }

    /// Start a scan. Any previous session is torn down first. On success the
    /// controller is `Active` and polling; on failure it is back to `Idle`.
    /// The request, credentials included, is dropped before this returns.
    pub async fn submit(&self, request: ScanRequest) -> Result<SessionId, SubmitError> {
        let generation = {
            let mut st = self.shared.state.write().await;
            st.clear_session();
            st.phase = Phase::Submitting;
            self.shared.publish(&st);
            st.generation
        };
        info!(regions = ?request.region_scope, "submitting scan");

        let started = self.api.start_scan(&request).await;
        drop(request);

        let mut st = self.shared.state.write().await;
        if st.generation != generation {
            debug!("discarding start response for a superseded submit");
            return Err(SubmitError::Superseded);
        }
        let err = match started {
            Ok(id) if !id.is_empty() => {
                info!(session = %id, "scan started");
                let export_url = self.api.export_url(&id).ok().map(|u| u.to_string());
                st.phase = Phase::Active;
                st.session = Some(ScanSession {
                    id: id.clone(),
                    created_at: now_rfc3339(),
                    export_url,
                });
                self.spawn_poller(&mut st, id.clone());
                self.shared.publish(&st);
                return Ok(id);
            }
            Ok(_) => SubmitError::EmptySessionId,
            Err(e) => SubmitError::Api(e),
        };
        warn!(error = %err, "scan submit failed");
        st.phase = Phase::Idle;
        st.last_error = Some(err.to_string());
        self.shared.publish(&st);
        Err(err)
    }

    /// Begin polling `session` if it is the active one. Returns whether a
    /// poller is running for it afterwards. Never starts a second timer.
    pub async fn start_polling(&self, session: &SessionId) -> bool {
        let mut st = self.shared.state.write().await;
        if st.phase != Phase::Active || !st.is_current(session) {
            return false;
        }
        if st.poller.as_ref().is_some_and(|p| &p.session == session) {
            return true;
        }
        self.spawn_poller(&mut st, session.clone());
        self.shared.publish(&st);
        true
    }

    /// Cancel the timer. Safe to call at any time, any number of times.
    pub async fn stop_polling(&self) {
        let mut st = self.shared.state.write().await;
        if st.poller.take().is_some() {
            info!("polling stopped");
            self.shared.publish(&st);
        }
    }

    /// Stop polling, forget the session and its results, return to `Idle`.
    pub async fn reset(&self) {
        let mut st = self.shared.state.write().await;
        st.clear_session();
        info!("controller reset");
        self.shared.publish(&st);
    }

    /// Per-region progress of the active session, if any.
    pub async fn fetch_progress(&self) -> Result<Option<ScanProgress>, ApiError> {
        let Some(session) = self.session_id().await else {
            return Ok(None);
        };
        self.api.fetch_progress(&session).await.map(Some)
    }

    pub async fn phase(&self) -> Phase {
        self.shared.state.read().await.phase
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        let st = self.shared.state.read().await;
        st.session.as_ref().map(|s| s.id.clone())
    }

    pub async fn summary(&self) -> Option<Summary> {
        self.shared.state.read().await.summary.clone()
    }

    pub async fn findings(&self) -> Vec<Finding> {
        self.shared.state.read().await.findings.clone()
    }

    pub async fn is_polling(&self) -> bool {
        self.shared.state.read().await.poller.is_some()
    }

    /// Latest published snapshot.
    pub fn view(&self) -> ViewModel {
        self.shared.view.borrow().clone()
    }

    /// Receives a new snapshot after every applied change.
    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.shared.view.subscribe()
    }

    fn spawn_poller(&self, st: &mut ControllerState, session: SessionId) {
        let cancel = self.teardown.child_token();
        // replacing the guard cancels any previous poller
        st.poller = Some(PollGuard {
            session: session.clone(),
            cancel: cancel.clone(),
        });
        debug!(session = %session, interval = ?self.shared.settings.interval, "polling started");
        tokio::spawn(poll_loop(
            self.api.clone(),
            self.shared.clone(),
            session,
            cancel,
        ));
    }
}

impl<A> Drop for SessionController<A> {
    fn drop(&mut self) {
        self.teardown.cancel();
    }
}

/// Ticks run one after another inside this task, so they never overlap. A
/// tick that outlasts the interval delays the next one until it finishes.
async fn poll_loop<A: ScanApi>(
    api: Arc<A>,
    shared: Arc<Shared>,
    session: SessionId,
    cancel: CancellationToken,
) {
    let period = shared.settings.interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match poll_once(api.as_ref(), &shared, &session, &cancel).await {
            TickOutcome::Applied { terminal: true }
                if shared.settings.policy == PollPolicy::UntilTerminal =>
            {
                let mut st = shared.state.write().await;
                if st.is_current(&session) && !cancel.is_cancelled() {
                    info!(session = %session, "scan reached a terminal status; polling stopped");
                    st.poller = None;
                    shared.publish(&st);
                }
                break;
            }
            TickOutcome::Stale => break,
            TickOutcome::Applied { .. } | TickOutcome::Failed => {}
        }
    }
    debug!(session = %session, "poll loop finished");
}

/// One tick: summary first, then findings. A failed summary ends the tick
/// without touching the findings. A tick only counts as terminal once both
/// fetches succeeded. Subscribers see one snapshot per tick.
async fn poll_once<A: ScanApi>(
    api: &A,
    shared: &Shared,
    session: &SessionId,
    cancel: &CancellationToken,
) -> TickOutcome {
    let summary = api.fetch_summary(session).await;
    let terminal = {
        let mut st = shared.state.write().await;
        if cancel.is_cancelled() || !st.is_current(session) {
            debug!(session = %session, "discarding stale summary");
            return TickOutcome::Stale;
        }
        st.ticks += 1;
        match summary {
            Ok(summary) => {
                let terminal = summary.scan_status().is_terminal();
                st.summary = Some(summary);
                terminal
            }
            Err(source) => {
                st.record_poll_failure(&PollError::Summary {
                    session: session.clone(),
                    source,
                });
                shared.publish(&st);
                return TickOutcome::Failed;
            }
        }
    };

    let findings = api.fetch_findings(session, &shared.settings.filter).await;
    let mut st = shared.state.write().await;
    if cancel.is_cancelled() || !st.is_current(session) {
        debug!(session = %session, "discarding stale findings");
        return TickOutcome::Stale;
    }
    match findings {
        Ok(findings) => {
            if let Some(summary) = &st.summary {
                if shared.settings.filter == FindingsFilter::default()
                    && aggregator::totals_drift(summary, &findings)
                {
                    debug!(session = %session, "summary totals differ from fetched findings");
                }
            }
            st.findings = findings;
            st.last_error = None;
        }
        Err(source) => {
            st.record_poll_failure(&PollError::Findings {
                session: session.clone(),
                source,
            });
            // a terminal summary with stale findings keeps the timer running
            shared.publish(&st);
            return TickOutcome::Failed;
        }
    }
    shared.publish(&st);
    TickOutcome::Applied { terminal }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
