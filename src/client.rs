//! A thin blocking client: a small synchronous wrapper that turns
//! request/reply pairs into ordinary function calls, built for what a
//! broker's test suite (and small standalone tools) need: one format, one
//! connection, no background threads.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use byteorder::{BigEndian, ReadBytesExt};
use serde_json::Value;

use crate::codec::{self, Format};
use crate::error::BrokerError;
use crate::message::Frame;

pub struct Client {
    stream: TcpStream,
    format: Format,
}

impl Client {
    /// Connects and fixes the wire format for the lifetime of the connection.
    pub fn connect<A: ToSocketAddrs>(addr: A, format: Format) -> io::Result<Client> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Client { stream, format })
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.send(Frame::Subscribe { topic: topic.to_owned() })
    }

    pub fn unsubscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.send(Frame::Unsubscribe { topic: topic.to_owned() })
    }

    pub fn publish(&mut self, topic: &str, msg: Value) -> Result<(), BrokerError> {
        self.send(Frame::Publish { topic: topic.to_owned(), msg })
    }

    pub fn request_topics(&mut self) -> Result<(), BrokerError> {
        self.send(Frame::ListRequest)
    }

    fn send(&mut self, frame: Frame) -> Result<(), BrokerError> {
        let record = frame.into_record();
        let framed = codec::frame_client_to_broker(self.format, &record)?;
        self.stream.write_all(&framed)?;
        Ok(())
    }

    /// Bounds how long [`recv`](Self::recv) blocks waiting for a frame —
    /// mainly useful to tests asserting that *no* message arrives.
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Blocks for the broker's next frame (a `SEND` delivery or a
    /// `REP_TOPICS` reply) and decodes it.
    pub fn recv(&mut self) -> Result<Frame, BrokerError> {
        let len = self.stream.read_u16::<BigEndian>()? as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        let record = codec::decode_payload(self.format, &payload)?;
        Ok(Frame::from_record(record)?)
    }
}
