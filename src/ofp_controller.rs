use std::io::{Read, Write};

use crate::error::Result;
use crate::ofp_message::OfpMessage;

/// OpenFlow Controller
///
/// Version-agnostic API for implementing an OpenFlow controller.
pub trait OfpController {
    /// OpenFlow message type supporting the same protocol version as the controller.
    type Message: OfpMessage;

    /// Send a message to the node at the other end of `writer`.
    fn send_message<W: Write>(xid: u32, msg: Self::Message, writer: &mut W) -> Result<()>;
    /// Perform handshake and begin loop reading incoming messages from client stream.
    fn handle_client_connected<S: Read + Write>(&self, stream: S) -> Result<()>;
}

pub mod openflow0x04 {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    use tracing::{debug, error, info, info_span, trace, warn};

    use super::OfpController;
    use crate::error::{Error, Result};
    use crate::mac_table::DatapathId;
    use crate::ofp_message::OfpMessage;
    use crate::openflow0x04::message::Message;
    use crate::openflow0x04::{ErrorMsg, Hello, PacketIn, SwitchFeatures};
    use crate::session::{SessionRegistry, SessionState, SwitchSession};

    /// OpenFlow 1.3 application callbacks, one per event category the controller acts on.
    ///
    /// Handlers return the messages to send to the switch; the dispatcher writes them in order
    /// without waiting for any acknowledgment.
    pub trait OF0x04Controller: Send + Sync {
        /// The switch `sw` completed its handshake. Runs before any of its packet-ins.
        fn switch_connected(&self, sw: DatapathId, feats: &SwitchFeatures) -> Vec<Message>;
        /// The session for `sw` ended. Never called for a session that was superseded.
        fn switch_disconnected(&self, sw: DatapathId);
        /// A packet-in arrived from the active switch `sw`.
        fn packet_in(&self, sw: DatapathId, xid: u32, pkt: PacketIn) -> Vec<Message>;
    }

    /// Accepts switch connections and routes their events to an `OF0x04Controller`.
    pub struct Dispatcher<C> {
        app: Arc<C>,
        sessions: SessionRegistry,
        next_session: AtomicU64,
    }

    impl<C: OF0x04Controller + 'static> Dispatcher<C> {
        pub fn new(app: Arc<C>) -> Self {
            Self {
                app,
                sessions: SessionRegistry::new(),
                next_session: AtomicU64::new(1),
            }
        }

        pub fn app(&self) -> &Arc<C> {
            &self.app
        }

        pub fn sessions(&self) -> &SessionRegistry {
            &self.sessions
        }

        /// Serve every connection on `listener`, one thread per switch.
        pub fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let peer = stream.peer_addr().ok();
                        let _ = stream.set_nodelay(true);
                        let dispatcher = Arc::clone(&self);
                        let spawned = thread::Builder::new()
                            .name("ofp-session".to_string())
                            .spawn(move || dispatcher.run_session(stream));
                        match spawned {
                            Ok(_) => debug!(?peer, "accepted switch connection"),
                            Err(e) => error!(?peer, error = %e, "cannot spawn session thread"),
                        }
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
            Ok(())
        }

        /// Drive one connection to completion, logging how it ended.
        pub fn run_session<S: Read + Write>(&self, stream: S) {
            match self.handle_client_connected(stream) {
                Ok(()) => (),
                Err(Error::UnsupportedVersion { peer }) => {
                    warn!(peer_version = peer, "rejected switch with unsupported OpenFlow version")
                }
                Err(Error::Io(e)) => info!(error = %e, "switch connection lost"),
                Err(e) => warn!(error = %e, "switch session ended on protocol error"),
            }
        }

        fn drive<S: Read + Write>(&self, session: &mut SwitchSession<S>) -> Result<()> {
            session.send(Message::Hello(Hello::ours()))?;
            loop {
                let Some((header, body)) = session.recv()? else {
                    debug!("switch closed the connection");
                    return Ok(());
                };
                if let Some(dpid) = session.dpid() {
                    if !self.sessions.is_current(dpid, session.id()) {
                        info!(dpid, "session superseded by a newer connection");
                        return Ok(());
                    }
                }
                let (xid, msg) = Message::parse(&header, &body)?;
                match (session.state(), msg) {
                    (_, Message::EchoRequest(data)) => session.reply(xid, Message::EchoReply(data))?,
                    (SessionState::Connecting, Message::Hello(hello)) => {
                        if !hello.supports_ours(header.version()) {
                            let _ = session.reply(
                                xid,
                                Message::Error(ErrorMsg::hello_failed("OpenFlow 1.3 required")),
                            );
                            return Err(Error::UnsupportedVersion {
                                peer: header.version(),
                            });
                        }
                        session.advance(SessionState::Handshaking)?;
                        session.send(Message::FeaturesReq)?;
                    }
                    (SessionState::Handshaking, Message::FeaturesReply(feats)) => {
                        self.complete_handshake(session, &feats)?;
                    }
                    (SessionState::Active, Message::PacketIn(pkt)) => {
                        let dpid = session.dpid().ok_or_else(|| {
                            Error::Protocol("active session without datapath id".to_string())
                        })?;
                        for out in self.app.packet_in(dpid, xid, pkt) {
                            session.send(out)?;
                        }
                    }
                    (_, Message::Error(err)) => {
                        warn!(typ = err.typ, code = err.code, xid, "switch reported an error")
                    }
                    (state, msg) => trace!(?state, ?msg, "ignoring message"),
                }
            }
        }

        fn complete_handshake<S: Read + Write>(
            &self,
            session: &mut SwitchSession<S>,
            feats: &SwitchFeatures,
        ) -> Result<()> {
            let dpid = feats.datapath_id;
            let mut greeting = vec![];
            let superseded = self.sessions.activate(dpid, session.id(), || {
                greeting = self.app.switch_connected(dpid, feats);
            });
            if let Some(previous) = superseded {
                warn!(dpid, previous, "switch reconnected, superseding previous session");
            }
            session.activate(dpid)?;
            tracing::Span::current().record("dpid", dpid);
            info!(
                dpid,
                buffers = feats.num_buffers,
                tables = feats.num_tables,
                "switch connected"
            );
            for msg in greeting {
                session.send(msg)?;
            }
            Ok(())
        }

        fn teardown<S>(&self, session: &mut SwitchSession<S>)
        where
            S: Read + Write,
        {
            if let Some(dpid) = session.dpid() {
                let retired = self.sessions.retire(dpid, session.id(), || {
                    self.app.switch_disconnected(dpid);
                });
                if retired {
                    info!(dpid, "switch disconnected");
                }
            }
            let _ = session.advance(SessionState::Disconnected);
        }
    }

    impl<C: OF0x04Controller + 'static> OfpController for Dispatcher<C> {
        type Message = Message;

        fn send_message<W: Write>(xid: u32, msg: Message, writer: &mut W) -> Result<()> {
            let bytes = Message::marshal(xid, msg)?;
            writer.write_all(&bytes)?;
            writer.flush()?;
            Ok(())
        }

        fn handle_client_connected<S: Read + Write>(&self, stream: S) -> Result<()> {
            let id = self.next_session.fetch_add(1, Ordering::Relaxed);
            let span = info_span!("session", id, dpid = tracing::field::Empty);
            let _enter = span.enter();
            let mut session = SwitchSession::new(id, stream);
            let result = self.drive(&mut session);
            self.teardown(&mut session);
            result
        }
    }

}
