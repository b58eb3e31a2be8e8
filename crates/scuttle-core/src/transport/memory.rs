//! In-process connections
//!
//! [`connect`] wires two endpoints together the way an authenticated
//! network connection would: history stream requests are answered by the
//! remote endpoint's [`HistoryStreamServer`] and EBT sessions travel over a
//! pair of channels. Notes are passed through their JSON encoding.

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::RawMessage;
use crate::identity::IdentityRef;
use crate::replication::{
    EbtDuplex, EbtStream, HistoryStream, HistoryStreamRequest, HistoryStreamServer,
    IncomingMessage, Notes, PeerConnection, Role,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Messages in flight per direction of an EBT session
const EBT_CHANNEL_CAPACITY: usize = 256;

/// One side of an in-memory connection.
#[derive(Clone)]
pub struct MemoryEndpoint {
    pub identity: IdentityRef,
    pub history: HistoryStreamServer,
    pub ebt_enabled: bool,
}

/// Connect `initiator` to `responder`.
///
/// Returns the connection as seen by the initiator and by the responder.
/// Cancelling `cancel` ends all history streams of both sides.
pub fn connect(
    initiator: MemoryEndpoint,
    responder: MemoryEndpoint,
    cancel: CancellationToken,
) -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
    let (to_responder, responder_inbound) = oneshot::channel();
    let (to_initiator, initiator_inbound) = oneshot::channel();

    let initiator_side = MemoryConnection {
        remote: responder.identity,
        role: Role::Initiator,
        remote_history: responder.history,
        remote_ebt_enabled: responder.ebt_enabled,
        outbound: parking_lot::Mutex::new(Some(to_responder)),
        inbound: AsyncMutex::new(Some(initiator_inbound)),
        cancel: cancel.clone(),
    };
    let responder_side = MemoryConnection {
        remote: initiator.identity,
        role: Role::Responder,
        remote_history: initiator.history,
        remote_ebt_enabled: initiator.ebt_enabled,
        outbound: parking_lot::Mutex::new(Some(to_initiator)),
        inbound: AsyncMutex::new(Some(responder_inbound)),
        cancel,
    };
    (Arc::new(initiator_side), Arc::new(responder_side))
}

pub struct MemoryConnection {
    remote: IdentityRef,
    role: Role,
    remote_history: HistoryStreamServer,
    remote_ebt_enabled: bool,
    outbound: parking_lot::Mutex<Option<oneshot::Sender<EbtDuplex>>>,
    inbound: AsyncMutex<Option<oneshot::Receiver<EbtDuplex>>>,
    cancel: CancellationToken,
}

impl MemoryConnection {
    /// End every history stream served over this connection.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    fn remote(&self) -> IdentityRef {
        self.remote
    }

    fn role(&self) -> Role {
        self.role
    }

    async fn open_ebt(&self) -> ReplicationResult<EbtDuplex> {
        if !self.remote_ebt_enabled {
            return Err(ReplicationError::Rejected(format!(
                "{} does not support EBT",
                self.remote
            )));
        }
        let Some(outbound) = self.outbound.lock().take() else {
            return Err(ReplicationError::Rejected("EBT session already opened".into()));
        };

        let (local_tx, remote_rx) = mpsc::channel(EBT_CHANNEL_CAPACITY);
        let (remote_tx, local_rx) = mpsc::channel(EBT_CHANNEL_CAPACITY);

        let remote_half = EbtDuplex {
            outgoing: Arc::new(ChannelStream { tx: remote_tx }),
            incoming: remote_rx,
        };
        if outbound.send(remote_half).is_err() {
            return Err(ReplicationError::Rejected(format!(
                "{} is not accepting EBT",
                self.remote
            )));
        }

        Ok(EbtDuplex {
            outgoing: Arc::new(ChannelStream { tx: local_tx }),
            incoming: local_rx,
        })
    }

    async fn accept_ebt(&self, timeout: Duration) -> ReplicationResult<Option<EbtDuplex>> {
        let Some(mut inbound) = self.inbound.lock().await.take() else {
            return Ok(None);
        };
        match tokio::time::timeout(timeout, &mut inbound).await {
            Ok(Ok(duplex)) => Ok(Some(duplex)),
            // the remote dropped its side without opening
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                debug!(peer = %self.remote, "Timed out waiting for EBT");
                Ok(None)
            }
        }
    }

    async fn create_history_stream(
        &self,
        request: HistoryStreamRequest,
    ) -> ReplicationResult<HistoryStream> {
        if self.cancel.is_cancelled() {
            return Err(ReplicationError::Transport("connection closed".into()));
        }
        Ok(self.remote_history.serve(request, self.cancel.child_token()))
    }
}

struct ChannelStream {
    tx: mpsc::Sender<IncomingMessage>,
}

#[async_trait]
impl EbtStream for ChannelStream {
    async fn send_notes(&self, notes: Notes) -> ReplicationResult<()> {
        let notes = Notes::from_json(&notes.to_json()?)?;
        self.send(IncomingMessage::Notes(notes)).await
    }

    async fn send_message(&self, raw: RawMessage) -> ReplicationResult<()> {
        self.send(IncomingMessage::Message(raw)).await
    }
}

impl ChannelStream {
    async fn send(&self, message: IncomingMessage) -> ReplicationResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| ReplicationError::Transport("EBT session closed".into()))
    }
}
