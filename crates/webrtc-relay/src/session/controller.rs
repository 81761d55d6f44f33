//! Call session controller
//!
//! Turns signaling messages into one live peer connection at a time.
//! Messages are handled in arrival order by [`CallController::run`].
//! Engine events are queued per call and handled by one task per call,
//! tagged with the epoch of the call that raised them so a late event from
//! a torn-down session never touches its successor.
//!
//! All call state sits behind one sync lock held only for field updates.
//! Teardowns are serialized by an async gate; the slow parts (process
//! stop, pump join, session close) run with the gate held but the lock
//! released.

use super::state::{CallResources, CallSnapshot, CallState};
use crate::config::{IceConfig, RelayConfig};
use crate::media::{pump_rtp, PipelineLauncher, RelayExit, SupervisedProcess};
use crate::peer::{CandidateInit, EngineSession, SessionEvent, SessionFactory};
use crate::signaling::{ClientMessage, Inbound, SignalingChannel};
use crate::{Error, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Drives the single call from signaling messages and engine events
#[derive(Clone)]
pub struct CallController {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<RelayConfig>,
    factory: Arc<dyn SessionFactory>,
    launcher: Arc<dyn PipelineLauncher>,
    signaling: Arc<dyn SignalingChannel>,

    /// Process-wide token; each call runs on a child of it
    shutdown: CancellationToken,

    state: Mutex<CallState>,
    teardown_gate: tokio::sync::Mutex<()>,
}

impl CallController {
    pub fn new(
        config: Arc<RelayConfig>,
        factory: Arc<dyn SessionFactory>,
        launcher: Arc<dyn PipelineLauncher>,
        signaling: Arc<dyn SignalingChannel>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                launcher,
                signaling,
                shutdown,
                state: Mutex::new(CallState::default()),
                teardown_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Current call state
    pub fn snapshot(&self) -> CallSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Dispatch loop: read and handle messages until a read fails
    ///
    /// A companion task tears the call down once when the shutdown token
    /// fires, for as long as the loop runs. The loop itself ends on the
    /// next failed read, which the surrounding process causes by closing
    /// the signaling channel.
    pub async fn run(&self) -> Result<()> {
        let finished = CancellationToken::new();
        let _finished_guard = finished.clone().drop_guard();

        let watcher = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = finished.cancelled() => {}
                _ = watcher.inner.shutdown.cancelled() => {
                    info!("Shutdown requested, tearing down call");
                    watcher.teardown().await;
                }
            }
        });

        loop {
            match self.inner.signaling.read().await {
                Ok(message) => self.handle_message(&message).await,
                Err(e) => {
                    if self.inner.shutdown.is_cancelled() {
                        info!("Signaling closed during shutdown: {}", e);
                    } else {
                        error!("Signaling read failed: {}", e);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Handle one inbound signaling message
    pub async fn handle_message(&self, message: &ClientMessage) {
        match message.classify() {
            Inbound::Hello { id } => info!(id = %id, "Signaling server assigned id"),
            Inbound::Offer { from, sdp } => self.handle_offer(from, sdp).await,
            Inbound::Answer { from } => {
                warn!(from = %from, "Unexpected answer, this node never sends offers")
            }
            Inbound::Candidate { from, candidate } => self.handle_candidate(&from, candidate).await,
            Inbound::Ignored => debug!("Ignoring signaling message: {:?}", message),
        }
    }

    #[instrument(skip_all, fields(caller_id = %from))]
    async fn handle_offer(&self, from: String, sdp: String) {
        info!("Received offer");

        let (session, epoch, cancel) = {
            // Held until the new call is installed so no other teardown
            // interleaves with the replacement
            let _gate = self.inner.teardown_gate.lock().await;
            self.release(None).await;

            if self.inner.shutdown.is_cancelled() {
                info!("Shutting down, ignoring offer");
                return;
            }

            let Some(session) = self.create_session().await else {
                return;
            };

            let cancel = self.inner.shutdown.child_token();
            let epoch = self
                .inner
                .state
                .lock()
                .install(Arc::clone(&session), &from, cancel.clone());

            self.attach_events(&session, epoch, cancel.clone());
            (session, epoch, cancel)
        };

        for kind in self.inner.config.media.enabled_kinds() {
            let sink = match session.add_outbound_track(kind).await {
                Ok(sink) => sink,
                Err(e) => {
                    error!(kind = %kind, "Failed to add track: {}", e);
                    self.abandon_offer(epoch, &e).await;
                    return;
                }
            };

            let media = &self.inner.config.media;
            let Some(process) = self.inner.launcher.launch(kind, &media.pipeline(kind)) else {
                warn!(kind = %kind, "Pipeline not started, skipping {}", kind);
                continue;
            };

            let pump = tokio::spawn(pump_rtp(
                media.relay_addr(kind),
                sink,
                media.mtu(kind),
                kind,
                cancel.clone(),
            ));

            if let Some(mut process) = self.attach_media(epoch, process, pump) {
                // Call was torn down while starting; the pump sees the token
                process.stop(media.stop_grace()).await;
                return;
            }
        }

        if let Err(e) = session.set_remote_description(&sdp).await {
            error!("Failed to set remote description: {}", e);
            self.abandon_offer(epoch, &e).await;
            return;
        }

        let pending = {
            let mut state = self.inner.state.lock();
            if !state.is_current(epoch) {
                return;
            }
            state.accept_remote_offer()
        };

        if !pending.is_empty() {
            debug!(count = pending.len(), "Applying buffered candidates");
        }
        for candidate in pending {
            if let Err(e) = session.add_remote_candidate(candidate).await {
                warn!("Failed to add buffered candidate: {}", e);
            }
        }

        let answer = match session.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                error!("Failed to create answer: {}", e);
                return;
            }
        };

        if let Err(e) = session.set_local_description(&answer).await {
            error!("Failed to set local description: {}", e);
            return;
        }

        if !self.inner.state.lock().is_current(epoch) {
            return;
        }

        if let Err(e) = self
            .inner
            .signaling
            .write(&ClientMessage::answer(&from, answer))
            .await
        {
            error!("Failed to send answer: {}", e);
            return;
        }
        info!("Answer sent");

        let held = match self.inner.state.lock().mark_answer_sent(epoch) {
            Some(held) => held,
            None => return,
        };
        if !held.is_empty() {
            debug!(count = held.len(), "Sending held local candidates");
        }
        for candidate in held {
            self.send_candidate(&from, &candidate).await;
        }
    }

    /// Drop the offer's call when `error` leaves nothing usable behind
    async fn abandon_offer(&self, epoch: u64, error: &Error) {
        if error.is_fatal_to_call() {
            self.teardown_epoch(epoch).await;
        } else {
            warn!("Keeping call after non-fatal error: {}", error);
        }
    }

    async fn send_candidate(&self, caller_id: &str, candidate: &CandidateInit) {
        if let Err(e) = self
            .inner
            .signaling
            .write(&ClientMessage::candidate(caller_id, candidate))
            .await
        {
            warn!("Failed to send candidate: {}", e);
        }
    }

    async fn handle_candidate(&self, from: &str, candidate: CandidateInit) {
        let session = {
            let mut state = self.inner.state.lock();

            if state.caller_id.is_empty() || from != state.caller_id {
                debug!(from = %from, "Discarding candidate from non-caller");
                return;
            }

            match (&state.session, state.have_remote_offer) {
                (Some(session), true) => Arc::clone(session),
                _ => {
                    state.pending_candidates.push(candidate);
                    return;
                }
            }
        };

        if let Err(e) = session.add_remote_candidate(candidate).await {
            warn!("Failed to add candidate: {}", e);
        }
    }

    /// Tear down the current call, if any. Idempotent.
    pub async fn teardown(&self) {
        let _gate = self.inner.teardown_gate.lock().await;
        self.release(None).await;
    }

    /// Tear down only if the call of `epoch` is still the current one
    async fn teardown_epoch(&self, epoch: u64) {
        let _gate = self.inner.teardown_gate.lock().await;
        self.release(Some(epoch)).await;
    }

    /// Release the call; the caller holds the teardown gate
    async fn release(&self, epoch: Option<u64>) {
        let resources = {
            let mut state = self.inner.state.lock();
            if let Some(epoch) = epoch {
                if state.epoch != epoch {
                    debug!(epoch, current = state.epoch, "Stale teardown ignored");
                    return;
                }
            }
            state.take_call()
        };

        let Some(CallResources {
            call_id,
            caller_id,
            session,
            cancel,
            processes,
            pumps,
        }) = resources
        else {
            return;
        };

        info!(caller_id = %caller_id, call_id = ?call_id, "Tearing down call");

        if let Some(cancel) = &cancel {
            cancel.cancel();
        }

        let grace = self.inner.config.media.stop_grace();
        let stops = join_all(processes.into_iter().map(|mut process| async move {
            let kind = process.kind();
            let outcome = process.stop(grace).await;
            debug!(kind = %kind, outcome = ?outcome, "Pipeline stopped");
        }));

        let join_timeout = self.inner.config.pump_join_timeout();
        let joins = async move {
            match tokio::time::timeout(join_timeout, join_all(pumps)).await {
                Ok(exits) => debug!(exits = ?exits, "Relay pumps joined"),
                Err(_) => warn!("Relay pumps did not finish within {:?}", join_timeout),
            }
        };

        tokio::join!(stops, joins);

        if let Some(session) = session {
            if let Err(e) = session.close().await {
                warn!("Failed to close session: {}", e);
            }
        }

        info!(caller_id = %caller_id, "Call torn down");
    }

    async fn create_session(&self) -> Option<Arc<dyn EngineSession>> {
        match self.inner.factory.create(&self.inner.config.ice).await {
            Ok(session) => return Some(session),
            Err(e) => warn!("Session creation failed, retrying with STUN only: {}", e),
        }

        match self.inner.factory.create(&IceConfig::stun_only()).await {
            Ok(session) => Some(session),
            Err(e) => {
                error!("Session creation failed: {}", e);
                None
            }
        }
    }

    /// Queue engine events for this call and spawn the task handling them
    fn attach_events(
        &self,
        session: &Arc<dyn EngineSession>,
        epoch: u64,
        cancel: CancellationToken,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        session.on_event(Arc::new(move |event| {
            let _ = tx.send((epoch, event));
        }));

        tokio::spawn(Self::event_loop(Arc::downgrade(&self.inner), rx, cancel));
    }

    async fn event_loop(
        inner: Weak<Inner>,
        mut events: mpsc::UnboundedReceiver<(u64, SessionEvent)>,
        cancel: CancellationToken,
    ) {
        loop {
            let (epoch, event) = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = events.recv() => match next {
                    Some(next) => next,
                    None => break,
                },
            };

            let Some(inner) = inner.upgrade() else {
                break;
            };
            CallController { inner }.handle_event(epoch, event).await;
        }
    }

    async fn handle_event(&self, epoch: u64, event: SessionEvent) {
        match event {
            SessionEvent::LocalCandidate(candidate) => {
                let caller_id = {
                    let mut state = self.inner.state.lock();
                    if !state.is_current(epoch) {
                        return;
                    }
                    if state.caller_id.is_empty() {
                        debug!("No caller, dropping local candidate");
                        return;
                    }
                    // The caller cannot use candidates before it has the answer
                    if !state.answer_sent {
                        state.held_local_candidates.push(candidate);
                        return;
                    }
                    state.caller_id.clone()
                };

                self.send_candidate(&caller_id, &candidate).await;
            }
            SessionEvent::StatusChanged(status) => {
                info!(status = ?status, "Connection status changed");
                if status.is_terminal() {
                    self.teardown_epoch(epoch).await;
                }
            }
            SessionEvent::RemoteTrack { kind, id } => {
                info!(kind = %kind, id = %id, "Remote track received")
            }
            SessionEvent::DataChannelOpened { label } => {
                info!(label = %label, "Data channel opened")
            }
        }
    }

    /// Record a started pipeline and its pump; hands the process back if
    /// the call of `epoch` is gone
    fn attach_media(
        &self,
        epoch: u64,
        process: Box<dyn SupervisedProcess>,
        pump: JoinHandle<RelayExit>,
    ) -> Option<Box<dyn SupervisedProcess>> {
        let mut state = self.inner.state.lock();
        if !state.is_current(epoch) {
            return Some(process);
        }
        state.processes.push(process);
        state.pumps.push(pump);
        None
    }
}
