//! Per-socket framing state.
//!
//! A [`Connection`] owns exactly one `mio` stream and accumulates bytes across
//! `readable` events until a full frame is assembled, stepping through the
//! `tag(1) || length(2)` client-to-broker framing one stage at a time so a
//! short read never loses partial progress. Outbound bytes are buffered the
//! same way, so a write that would block never blocks the reactor thread.

use std::io::{self, Read, Write};

use mio::net::TcpStream;

use crate::codec::Format;
use crate::error::{BrokerError, ProtocolError};
use crate::message::Record;
use crate::topic::ConnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvStage {
    Tag,
    Length,
    Payload,
}

struct RecvState {
    stage: RecvStage,
    read: usize,
    tag: [u8; 1],
    length: [u8; 2],
    payload: Vec<u8>,
}

impl RecvState {
    fn new() -> Self {
        RecvState {
            stage: RecvStage::Tag,
            read: 0,
            tag: [0u8; 1],
            length: [0u8; 2],
            payload: Vec::new(),
        }
    }
}

enum FillOutcome {
    /// The target was fully read.
    Complete,
    /// Some bytes landed but the target isn't full yet; more will arrive on
    /// a later readable event.
    Partial,
    /// No bytes were available at all.
    WouldBlock,
    /// The peer closed mid-read.
    Eof,
}

/// Outcome of a single attempt to drain a socket's incoming buffer.
pub enum ReadOutcome {
    /// Zero or more frames were fully assembled (zero means "keep waiting").
    Frames(Vec<(Format, Record)>),
    /// The peer closed the connection cleanly, on a frame boundary.
    Closed,
}

pub struct Connection {
    pub id: ConnId,
    stream: TcpStream,
    recv: RecvState,
    /// Set from the tag of the connection's first frame and assumed fixed
    /// for its lifetime: a client picks one wire format per connection and
    /// keeps it, so later frames omit the tag and this is just reused.
    pub format: Option<Format>,
    write_buf: Vec<u8>,
    written: usize,
}

impl Connection {
    pub fn new(id: ConnId, stream: TcpStream) -> Self {
        Connection {
            id,
            stream,
            recv: RecvState::new(),
            format: None,
            write_buf: Vec::new(),
            written: 0,
        }
    }

    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    fn fill_fixed(stream: &mut TcpStream, buf: &mut [u8], read: &mut usize) -> Result<FillOutcome, io::Error> {
        loop {
            if *read == buf.len() {
                return Ok(FillOutcome::Complete);
            }
            match stream.read(&mut buf[*read..]) {
                Ok(0) => return Ok(FillOutcome::Eof),
                Ok(n) => {
                    *read += n;
                    if *read == buf.len() {
                        return Ok(FillOutcome::Complete);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(if *read == 0 { FillOutcome::WouldBlock } else { FillOutcome::Partial })
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Drains as many complete frames as are currently available without
    /// blocking. A short read partway through a frame is not an error — the
    /// partially read bytes stay in `self.recv` until the next readable
    /// event fills in the rest. A real TCP stream has no guarantee that one
    /// `read` call returns a whole frame, so this has to be resumable.
    pub fn read_frames(&mut self) -> Result<ReadOutcome, BrokerError> {
        let mut frames = Vec::new();

        loop {
            if self.recv.stage == RecvStage::Tag {
                match Self::fill_fixed(&mut self.stream, &mut self.recv.tag, &mut self.recv.read)? {
                    FillOutcome::WouldBlock => return Ok(ReadOutcome::Frames(frames)),
                    FillOutcome::Partial => return Ok(ReadOutcome::Frames(frames)),
                    FillOutcome::Eof => {
                        return if self.recv.read == 0 && frames.is_empty() {
                            Ok(ReadOutcome::Closed)
                        } else {
                            Err(ProtocolError::TruncatedFrame.into())
                        }
                    }
                    FillOutcome::Complete => {
                        let format = Format::from_tag(self.recv.tag[0])?;
                        self.format.get_or_insert(format);
                        self.recv.stage = RecvStage::Length;
                        self.recv.read = 0;
                    }
                }
            }

            if self.recv.stage == RecvStage::Length {
                match Self::fill_fixed(&mut self.stream, &mut self.recv.length, &mut self.recv.read)? {
                    FillOutcome::WouldBlock | FillOutcome::Partial => return Ok(ReadOutcome::Frames(frames)),
                    FillOutcome::Eof => return Err(ProtocolError::TruncatedFrame.into()),
                    FillOutcome::Complete => {
                        let len = u16::from_be_bytes(self.recv.length) as usize;
                        self.recv.payload = vec![0u8; len];
                        self.recv.stage = RecvStage::Payload;
                        self.recv.read = 0;
                    }
                }
            }

            // RecvStage::Payload
            let outcome = if self.recv.payload.is_empty() {
                FillOutcome::Complete
            } else {
                Self::fill_fixed(&mut self.stream, &mut self.recv.payload, &mut self.recv.read)?
            };
            match outcome {
                FillOutcome::WouldBlock | FillOutcome::Partial => return Ok(ReadOutcome::Frames(frames)),
                FillOutcome::Eof => return Err(ProtocolError::TruncatedFrame.into()),
                FillOutcome::Complete => {
                    let format = self.format.expect("format tag is read before any payload");
                    let payload = std::mem::take(&mut self.recv.payload);
                    let record = crate::codec::decode_payload(format, &payload)?;
                    frames.push((format, record));
                    self.recv.stage = RecvStage::Tag;
                    self.recv.read = 0;
                }
            }
        }
    }

    /// Appends `bytes` to the outbound buffer, to be drained by [`flush`](Self::flush).
    pub fn queue_write(&mut self, bytes: Vec<u8>) {
        if self.written == self.write_buf.len() {
            self.write_buf.clear();
            self.written = 0;
        }
        self.write_buf.extend_from_slice(&bytes);
    }

    pub fn has_pending_write(&self) -> bool {
        self.written < self.write_buf.len()
    }

    /// Writes as much of the pending buffer as the socket accepts without
    /// blocking. Returns `Ok(())` whether or not everything was flushed —
    /// callers check [`Connection::has_pending_write`] to decide whether to
    /// keep the connection registered for writable events.
    pub fn flush(&mut self) -> io::Result<()> {
        while self.written < self.write_buf.len() {
            match self.stream.write(&self.write_buf[self.written..]) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "peer closed during write")),
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.write_buf.clear();
        self.written = 0;
        Ok(())
    }
}
