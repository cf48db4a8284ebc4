//! The broker's event loop.
//!
//! A single-threaded `mio` reactor: one listener, any number of client
//! connections, no worker threads. A `Poll` loop dispatches readable/writable
//! events to per-connection state, with a dedicated token for an out-of-band
//! wakeup used to request a clean shutdown from another thread.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Socket, Type};

use crate::codec::{self, Format};
use crate::config::Config;
use crate::connection::{Connection, ReadOutcome};
use crate::error::BrokerError;
use crate::message::{Frame, Record};
use crate::protocol::{self, Effect};
use crate::topic::{ConnId, TopicTree};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONN_TOKEN: usize = 2;

/// Requests the broker's run loop to stop, from any thread. Built on
/// `mio::Waker` plus a shared flag: the flag records the decision, and the
/// waker makes sure the reactor wakes up from `poll` to notice it even with
/// no client traffic in flight.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            error!("failed to wake the reactor for shutdown: {}", e);
        }
    }
}

/// The broker itself: a bound listener, the topic tree, and the live
/// connection set. Owns no threads — [`Broker::run`] blocks the calling
/// thread until [`ShutdownHandle::shutdown`] is called.
pub struct Broker {
    listener: TcpListener,
    poll: Poll,
    connections: HashMap<Token, Connection>,
    token_of: HashMap<ConnId, Token>,
    next_token: usize,
    next_conn_id: usize,
    tree: TopicTree,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Broker {
    /// Resolves `config.host`/`config.port`, binds with `SO_REUSEADDR`, and
    /// starts listening. The bind goes through `socket2` so `SO_REUSEADDR`
    /// and the backlog can be set before the socket is handed off to
    /// `mio::net::TcpListener::from_std`, which has no setters of its own for
    /// either.
    pub fn bind(config: &Config) -> Result<Broker, BrokerError> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "configured host resolved to no addresses")
            })?;

        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.backlog as i32)?;
        socket.set_nonblocking(true)?;

        let mut listener = TcpListener::from_std(socket.into());
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        info!("listening on {}", addr);

        Ok(Broker {
            listener,
            poll,
            connections: HashMap::new(),
            token_of: HashMap::new(),
            next_token: FIRST_CONN_TOKEN,
            next_conn_id: 0,
            tree: TopicTree::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { waker: self.waker.clone(), flag: self.shutdown.clone() }
    }

    /// Runs until a [`ShutdownHandle`] requests a stop.
    pub fn run(&mut self) -> Result<(), BrokerError> {
        let mut events = Events::with_capacity(1024);

        loop {
            self.poll.poll(&mut events, None)?;

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_all()?,
                    WAKER => {
                        if self.shutdown.load(Ordering::SeqCst) {
                            debug!("shutdown requested, leaving the run loop");
                            return Ok(());
                        }
                    }
                    token => {
                        if event.is_readable() {
                            self.service_readable(token);
                        }
                        // A connection dropped mid-event (a protocol error
                        // on the readable half) must not be serviced again.
                        if event.is_writable() && self.connections.contains_key(&token) {
                            self.service_writable(token);
                        }
                    }
                }
            }
        }
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn accept_all(&mut self) -> Result<(), BrokerError> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = self.alloc_token();
                    let conn_id = ConnId(self.next_conn_id);
                    self.next_conn_id += 1;

                    self.poll.registry().register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;
                    debug!("accepted {} as {:?}", peer, conn_id);

                    self.token_of.insert(conn_id, token);
                    self.connections.insert(token, Connection::new(conn_id, stream));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn service_readable(&mut self, token: Token) {
        let outcome = match self.connections.get_mut(&token) {
            Some(conn) => conn.read_frames(),
            None => return,
        };

        match outcome {
            Ok(ReadOutcome::Closed) => {
                debug!("{:?} closed the connection", token);
                self.drop_connection(token);
            }
            Ok(ReadOutcome::Frames(frames)) => {
                for (format, record) in frames {
                    if let Err(e) = self.handle_frame(token, format, record) {
                        warn!("closing {:?} after a protocol error: {}", token, e);
                        self.drop_connection(token);
                        return;
                    }
                    // A frame in this same batch (an UNSUBSCRIBE) may have
                    // already closed the connection via `Effect::Close`; the
                    // remaining buffered frames for it, if any, have nowhere
                    // left to go.
                    if !self.connections.contains_key(&token) {
                        return;
                    }
                }
                self.service_writable(token);
            }
            Err(e) => {
                warn!("closing {:?} after a framing error: {}", token, e);
                self.drop_connection(token);
            }
        }
    }

    fn handle_frame(&mut self, token: Token, format: Format, record: Record) -> Result<(), BrokerError> {
        let conn_id = self
            .connections
            .get(&token)
            .expect("token is live for the duration of handle_frame")
            .id;

        let frame = Frame::from_record(record)?;
        let effects = protocol::handle(&mut self.tree, conn_id, format, frame);
        self.apply_effects(effects);
        Ok(())
    }

    /// Applies the effects of one inbound frame. A single publish's fan-out
    /// encodes its payload at most once per format — every `Effect::Send`
    /// produced by one `protocol::handle` call carries the same record, so a
    /// cache keyed by format scoped to this batch avoids re-encoding it once
    /// per recipient, without the protocol layer needing to know about wire
    /// formats at all.
    fn apply_effects(&mut self, effects: Vec<Effect>) {
        let mut cache: HashMap<Format, Vec<u8>> = HashMap::new();
        for effect in effects {
            match effect {
                Effect::Send { to, format, record } => self.deliver(to, format, &record, &mut cache),
                Effect::Close { conn } => {
                    if let Some(&token) = self.token_of.get(&conn) {
                        debug!("closing {:?} per UNSUBSCRIBE", token);
                        self.drop_connection(token);
                    }
                }
            }
        }
    }

    fn deliver(&mut self, to: ConnId, format: Format, record: &Record, cache: &mut HashMap<Format, Vec<u8>>) {
        let token = match self.token_of.get(&to) {
            Some(token) => *token,
            None => return,
        };

        let framed = if let Some(framed) = cache.get(&format) {
            framed.clone()
        } else {
            let framed = match codec::frame_broker_to_client(format, record) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("dropping outbound frame for {:?}, failed to encode: {}", to, e);
                    return;
                }
            };
            cache.insert(format, framed.clone());
            framed
        };

        if let Some(conn) = self.connections.get_mut(&token) {
            conn.queue_write(framed);
        }
        self.service_writable(token);
    }

    fn service_writable(&mut self, token: Token) {
        let result = match self.connections.get_mut(&token) {
            Some(conn) => conn.flush(),
            None => return,
        };

        if let Err(e) = result {
            warn!("closing {:?} after a write error: {}", token, e);
            self.drop_connection(token);
        }
    }

    fn drop_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            self.token_of.remove(&conn.id);
            self.tree.remove_subscriber_everywhere(conn.id);
            if let Err(e) = self.poll.registry().deregister(conn.stream()) {
                warn!("failed to deregister {:?} from the poller: {}", token, e);
            }
        }
    }
}

/// Binds and runs a broker to completion. The entry point CLI binaries and
/// embedders call when they have no need for a [`ShutdownHandle`] ahead of
/// time.
pub fn serve(config: &Config) -> Result<(), BrokerError> {
    let mut broker = Broker::bind(config)?;
    broker.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn ephemeral_config() -> Config {
        Config { host: "localhost".into(), port: 0, backlog: 100 }
    }

    #[test]
    fn bind_picks_up_the_configured_backlog_and_assigns_a_port() {
        let config = ephemeral_config();
        let broker = Broker::bind(&config).unwrap();
        assert_ne!(broker.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn shutdown_handle_stops_the_run_loop_promptly_with_no_clients() {
        let config = ephemeral_config();
        let mut broker = Broker::bind(&config).unwrap();
        let shutdown = broker.shutdown_handle();

        let start = Instant::now();
        let handle = std::thread::spawn(move || broker.run());
        shutdown.shutdown();

        handle.join().unwrap().expect("run loop exited cleanly");
        assert!(start.elapsed() < Duration::from_secs(2), "shutdown should not wait on a new connection");
    }
}
