use crate::error::ReplicationResult;
use crate::pipeline::{MessageBuffer, RawMessageHandler};
use crate::replication::ebt::{self, EbtSession, MessageStreamer};
use crate::replication::{EbtDuplex, GossipReplicator, PeerConnection, Role};
use crate::wants::WantedFeedsCache;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Protocol selection for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Ebt,
    Gossip,
}

/// Picks EBT or gossip for each new connection.
///
/// The initiator opens EBT and falls back to gossip when the remote
/// rejects it. The responder waits for the initiator's EBT session and
/// runs gossip if none arrives in time.
pub struct Negotiator {
    ebt_enabled: bool,
    accept_timeout: Duration,
    wants: Arc<WantedFeedsCache>,
    buffer: MessageBuffer,
    handler: Arc<dyn RawMessageHandler>,
    streamer: MessageStreamer,
    gossip: Arc<GossipReplicator>,
}

impl Negotiator {
    pub fn new(
        ebt_enabled: bool,
        accept_timeout: Duration,
        wants: Arc<WantedFeedsCache>,
        buffer: MessageBuffer,
        handler: Arc<dyn RawMessageHandler>,
        streamer: MessageStreamer,
        gossip: Arc<GossipReplicator>,
    ) -> Self {
        Self {
            ebt_enabled,
            accept_timeout,
            wants,
            buffer,
            handler,
            streamer,
            gossip,
        }
    }

    /// Replicate with `peer` until cancelled or the connection fails.
    ///
    /// Returns the protocol that ran.
    pub async fn replicate(
        &self,
        cancel: CancellationToken,
        peer: Arc<dyn PeerConnection>,
    ) -> ReplicationResult<Protocol> {
        let remote = peer.remote();

        let duplex = if !self.ebt_enabled {
            None
        } else {
            match peer.role() {
                Role::Initiator => match peer.open_ebt().await {
                    Ok(duplex) => Some(duplex),
                    Err(e) if e.is_rejection() => {
                        debug!(peer = %remote, error = %e, "Peer rejected EBT, falling back to gossip");
                        None
                    }
                    Err(e) => return Err(e),
                },
                Role::Responder => {
                    let accepted = tokio::select! {
                        _ = cancel.cancelled() => return Ok(Protocol::Gossip),
                        accepted = peer.accept_ebt(self.accept_timeout) => accepted?,
                    };
                    if accepted.is_none() {
                        debug!(peer = %remote, "No EBT session opened by peer, using gossip");
                    }
                    accepted
                }
            }
        };

        match duplex {
            Some(duplex) => {
                info!(peer = %remote, "Replicating with EBT");
                self.run_ebt(cancel, peer.as_ref(), duplex).await?;
                Ok(Protocol::Ebt)
            }
            None => {
                info!(peer = %remote, "Replicating with gossip");
                self.gossip.replicate(peer.as_ref(), &cancel).await?;
                Ok(Protocol::Gossip)
            }
        }
    }

    async fn run_ebt(
        &self,
        cancel: CancellationToken,
        peer: &dyn PeerConnection,
        duplex: EbtDuplex,
    ) -> ReplicationResult<()> {
        let wants = self.wants.get()?;
        let local_notes = ebt::local_notes(&wants, &self.buffer)?;
        let session = EbtSession::new(
            peer.remote(),
            duplex.outgoing,
            self.handler.clone(),
            self.streamer.clone(),
            cancel,
        );
        session.run(duplex.incoming, local_notes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ReplicationError};
    use crate::identity::{IdentityRef, PrivateIdentity};
    use crate::replication::{HistoryStream, HistoryStreamRequest};
    use crate::test_utils::{eventually, pipeline_fixture, PipelineFixture, RecordingStream};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    enum EbtOffer {
        Reject,
        Fail,
        Accept(Arc<RecordingStream>),
    }

    /// Peer with scripted EBT behaviour and empty history streams.
    struct ScriptedPeer {
        identity: IdentityRef,
        role: Role,
        offer: EbtOffer,
        history_requests: Mutex<Vec<HistoryStreamRequest>>,
    }

    impl ScriptedPeer {
        fn new(role: Role, offer: EbtOffer) -> Arc<Self> {
            Arc::new(Self {
                identity: PrivateIdentity::generate().unwrap().identity(),
                role,
                offer,
                history_requests: Mutex::new(Vec::new()),
            })
        }

        fn ran_gossip(&self) -> bool {
            !self.history_requests.lock().is_empty()
        }
    }

    fn duplex(outgoing: Arc<RecordingStream>) -> EbtDuplex {
        // the remote hangs up right away
        let (_, incoming) = mpsc::channel(1);
        EbtDuplex { outgoing, incoming }
    }

    #[async_trait]
    impl PeerConnection for ScriptedPeer {
        fn remote(&self) -> IdentityRef {
            self.identity
        }

        fn role(&self) -> Role {
            self.role
        }

        async fn open_ebt(&self) -> ReplicationResult<EbtDuplex> {
            match &self.offer {
                EbtOffer::Reject => Err(ReplicationError::Rejected("ebt unsupported".into())),
                EbtOffer::Fail => Err(ReplicationError::Transport("connection reset".into())),
                EbtOffer::Accept(stream) => Ok(duplex(stream.clone())),
            }
        }

        async fn accept_ebt(&self, timeout: Duration) -> ReplicationResult<Option<EbtDuplex>> {
            match &self.offer {
                EbtOffer::Accept(stream) => Ok(Some(duplex(stream.clone()))),
                _ => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }

        async fn create_history_stream(
            &self,
            request: HistoryStreamRequest,
        ) -> ReplicationResult<HistoryStream> {
            self.history_requests.lock().push(request);
            let (_, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    fn negotiator(fixture: &PipelineFixture, ebt_enabled: bool) -> Arc<Negotiator> {
        let writer = fixture.pipeline.buffer().writer().clone();
        let gossip = Arc::new(GossipReplicator::new(
            fixture.wants.clone(),
            fixture.pipeline.clone(),
            4,
            Duration::from_secs(3600),
        ));
        Arc::new(Negotiator::new(
            ebt_enabled,
            Duration::from_millis(500),
            fixture.wants.clone(),
            fixture.pipeline.buffer().clone(),
            fixture.pipeline.clone(),
            MessageStreamer::new(writer, 16),
            gossip,
        ))
    }

    /// Run until gossip has issued a request, then cancel.
    async fn replicate_until_gossip(
        negotiator: Arc<Negotiator>,
        peer: Arc<ScriptedPeer>,
    ) -> ReplicationResult<Protocol> {
        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            let peer: Arc<dyn PeerConnection> = peer.clone();
            tokio::spawn(async move { negotiator.replicate(cancel, peer).await })
        };
        assert!(eventually(|| peer.ran_gossip()).await);
        cancel.cancel();
        run.await.unwrap()
    }

    // ========================================================================
    // Initiator
    // ========================================================================

    #[tokio::test]
    async fn test_rejected_ebt_falls_back_to_gossip() {
        let feed = PrivateIdentity::generate().unwrap().identity().main_feed();
        let fixture = pipeline_fixture(vec![feed]);
        let peer = ScriptedPeer::new(Role::Initiator, EbtOffer::Reject);

        let protocol = replicate_until_gossip(negotiator(&fixture, true), peer)
            .await
            .unwrap();
        assert_eq!(protocol, Protocol::Gossip);
    }

    #[tokio::test]
    async fn test_transport_error_on_open_is_returned() {
        let feed = PrivateIdentity::generate().unwrap().identity().main_feed();
        let fixture = pipeline_fixture(vec![feed]);
        let peer = ScriptedPeer::new(Role::Initiator, EbtOffer::Fail);

        let err = negotiator(&fixture, true)
            .replicate(CancellationToken::new(), peer.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!peer.ran_gossip());
    }

    #[tokio::test]
    async fn test_accepted_ebt_runs_session() {
        let feed = PrivateIdentity::generate().unwrap().identity().main_feed();
        let fixture = pipeline_fixture(vec![feed]);
        let stream = Arc::new(RecordingStream::default());
        let peer = ScriptedPeer::new(Role::Initiator, EbtOffer::Accept(stream.clone()));

        let protocol = negotiator(&fixture, true)
            .replicate(CancellationToken::new(), peer.clone())
            .await
            .unwrap();
        assert_eq!(protocol, Protocol::Ebt);
        assert!(!peer.ran_gossip());

        let notes = stream.notes.lock().clone();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].get(&feed).is_some());
    }

    #[tokio::test]
    async fn test_disabled_ebt_goes_straight_to_gossip() {
        let feed = PrivateIdentity::generate().unwrap().identity().main_feed();
        let fixture = pipeline_fixture(vec![feed]);
        let stream = Arc::new(RecordingStream::default());
        let peer = ScriptedPeer::new(Role::Initiator, EbtOffer::Accept(stream.clone()));

        let protocol = replicate_until_gossip(negotiator(&fixture, false), peer)
            .await
            .unwrap();
        assert_eq!(protocol, Protocol::Gossip);
        assert!(stream.notes.lock().is_empty());
    }

    // ========================================================================
    // Responder
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_responder_timeout_falls_back_to_gossip() {
        let feed = PrivateIdentity::generate().unwrap().identity().main_feed();
        let fixture = pipeline_fixture(vec![feed]);
        let peer = ScriptedPeer::new(Role::Responder, EbtOffer::Reject);

        let protocol = replicate_until_gossip(negotiator(&fixture, true), peer)
            .await
            .unwrap();
        assert_eq!(protocol, Protocol::Gossip);
    }

    #[tokio::test(start_paused = true)]
    async fn test_responder_cancelled_while_waiting() {
        let fixture = pipeline_fixture(vec![]);
        let peer = ScriptedPeer::new(Role::Responder, EbtOffer::Reject);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let protocol = negotiator(&fixture, true)
            .replicate(cancel, peer.clone())
            .await
            .unwrap();
        assert_eq!(protocol, Protocol::Gossip);
        assert!(!peer.ran_gossip());
    }
}
