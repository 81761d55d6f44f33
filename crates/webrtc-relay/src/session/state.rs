//! State of the single active call

use crate::media::{RelayExit, SupervisedProcess};
use crate::peer::{CandidateInit, EngineSession};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Coarse call phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// No call
    Idle,
    /// Offer accepted, remote description not applied yet
    Negotiating,
    /// Remote description applied
    Active,
}

/// The call owned by the controller. Only ever touched under its lock.
#[derive(Default)]
pub struct CallState {
    pub session: Option<Arc<dyn EngineSession>>,
    pub caller_id: String,
    pub have_remote_offer: bool,
    pub pending_candidates: Vec<CandidateInit>,
    pub active: bool,

    /// Local candidates wait here until the answer reaches the caller
    pub answer_sent: bool,
    pub held_local_candidates: Vec<CandidateInit>,

    /// Bumped on every install and teardown; stale callbacks compare
    /// against it and back off
    pub epoch: u64,

    pub call_id: Option<Uuid>,
    pub cancel: Option<CancellationToken>,
    pub processes: Vec<Box<dyn SupervisedProcess>>,
    pub pumps: Vec<JoinHandle<RelayExit>>,
}

/// Resources taken out of [`CallState`] for release outside the lock
pub struct CallResources {
    pub call_id: Option<Uuid>,
    pub caller_id: String,
    pub session: Option<Arc<dyn EngineSession>>,
    pub cancel: Option<CancellationToken>,
    pub processes: Vec<Box<dyn SupervisedProcess>>,
    pub pumps: Vec<JoinHandle<RelayExit>>,
}

/// Point-in-time view of the call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub caller_id: String,
    pub have_remote_offer: bool,
    pub pending_candidates: usize,
    pub held_local_candidates: usize,
    pub active: bool,
    pub has_session: bool,
    pub process_count: usize,
    pub pump_count: usize,
    pub epoch: u64,
}

impl CallState {
    pub fn phase(&self) -> CallPhase {
        if !self.active {
            CallPhase::Idle
        } else if self.have_remote_offer {
            CallPhase::Active
        } else {
            CallPhase::Negotiating
        }
    }

    /// Install a fresh call for `caller_id`; returns its epoch
    pub fn install(
        &mut self,
        session: Arc<dyn EngineSession>,
        caller_id: &str,
        cancel: CancellationToken,
    ) -> u64 {
        self.epoch += 1;
        self.session = Some(session);
        self.caller_id = caller_id.to_string();
        self.have_remote_offer = false;
        self.pending_candidates.clear();
        self.answer_sent = false;
        self.held_local_candidates.clear();
        self.active = true;
        self.call_id = Some(Uuid::new_v4());
        self.cancel = Some(cancel);
        self.epoch
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.active && self.epoch == epoch
    }

    /// Mark the remote offer applied and hand back the buffered candidates
    /// in arrival order
    pub fn accept_remote_offer(&mut self) -> Vec<CandidateInit> {
        self.have_remote_offer = true;
        std::mem::take(&mut self.pending_candidates)
    }

    /// Mark the answer of the call of `epoch` delivered and hand back the
    /// local candidates held until then; `None` if that call is gone
    pub fn mark_answer_sent(&mut self, epoch: u64) -> Option<Vec<CandidateInit>> {
        if !self.is_current(epoch) {
            return None;
        }
        self.answer_sent = true;
        Some(std::mem::take(&mut self.held_local_candidates))
    }

    /// Reset to idle and return everything that needs releasing; `None`
    /// when there was nothing to release
    pub fn take_call(&mut self) -> Option<CallResources> {
        let empty = !self.active
            && self.session.is_none()
            && self.cancel.is_none()
            && self.processes.is_empty()
            && self.pumps.is_empty();
        if empty {
            return None;
        }

        self.epoch += 1;
        self.active = false;
        self.have_remote_offer = false;
        self.pending_candidates.clear();
        self.answer_sent = false;
        self.held_local_candidates.clear();

        Some(CallResources {
            call_id: self.call_id.take(),
            caller_id: std::mem::take(&mut self.caller_id),
            session: self.session.take(),
            cancel: self.cancel.take(),
            processes: std::mem::take(&mut self.processes),
            pumps: std::mem::take(&mut self.pumps),
        })
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            phase: self.phase(),
            caller_id: self.caller_id.clone(),
            have_remote_offer: self.have_remote_offer,
            pending_candidates: self.pending_candidates.len(),
            held_local_candidates: self.held_local_candidates.len(),
            active: self.active,
            has_session: self.session.is_some(),
            process_count: self.processes.len(),
            pump_count: self.pumps.len(),
            epoch: self.epoch,
        }
    }
}
