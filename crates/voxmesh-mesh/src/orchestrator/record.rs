use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use voxmesh_common::StreamHandle;

use crate::engine::PeerConnection;
use crate::machine::{ConnectionMachine, MachineInput};
use crate::session::PeerSummary;

/// Holder of a record's current engine connection, shared with the
/// operation task that creates it. Never locked across an await.
#[derive(Clone, Default)]
pub(crate) struct ConnectionSlot(Arc<Mutex<Option<Arc<dyn PeerConnection>>>>);

impl ConnectionSlot {
    pub fn get(&self) -> Option<Arc<dyn PeerConnection>> {
        self.lock().clone()
    }

    pub fn replace(&self, connection: Arc<dyn PeerConnection>) -> Option<Arc<dyn PeerConnection>> {
        self.lock().replace(connection)
    }

    pub fn take(&self) -> Option<Arc<dyn PeerConnection>> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn PeerConnection>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct InFlight {
    pub op_id: u64,
    pub handle: JoinHandle<()>,
}

/// Per-peer state owned by the orchestrator.
pub(crate) struct PeerRecord {
    pub machine: ConnectionMachine,
    pub slot: ConnectionSlot,
    /// Id of the operation that opened the current connection.
    pub epoch: u64,
    pub in_flight: Option<InFlight>,
    /// Inputs waiting for the in-flight operation to finish.
    pub backlog: VecDeque<MachineInput>,
    pub timer: Option<JoinHandle<()>>,
    pub local_muted: bool,
    pub remote_muted: bool,
    pub remote_video_enabled: bool,
    pub remote_stream: Option<StreamHandle>,
}

impl PeerRecord {
    pub fn new(machine: ConnectionMachine, local_muted: bool) -> Self {
        Self {
            machine,
            slot: ConnectionSlot::default(),
            epoch: 0,
            in_flight: None,
            backlog: VecDeque::new(),
            timer: None,
            local_muted,
            remote_muted: false,
            remote_video_enabled: false,
            remote_stream: None,
        }
    }

    pub fn abort_operation(&mut self) {
        if let Some(op) = self.in_flight.take() {
            op.handle.abort();
        }
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            peer_id: self.machine.remote().clone(),
            state: self.machine.state(),
            connected: self.machine.is_connected(),
            pending_candidates: self.machine.pending_candidates(),
            local_muted: self.local_muted,
            remote_muted: self.remote_muted,
            remote_video_enabled: self.remote_video_enabled,
            remote_stream: self.remote_stream.clone(),
        }
    }
}

impl Drop for PeerRecord {
    fn drop(&mut self) {
        self.abort_operation();
        self.cancel_timer();
    }
}
