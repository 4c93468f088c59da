//! Session orchestration: owns one transport, drives the transcoders, and
//! speaks the YAML engine's reader/writer callback contract.
//!
//! A session is single-threaded and cooperative. The only blocking point is
//! the transport receive; an interrupt there surfaces as a zero-length
//! successful read so the caller can poll or cancel.

use std::io::{self, Read, Write};

use crate::decode::{Control, Inbound};
use crate::encode::{Outbound, PushOutcome};
use crate::error::{Error, write_error_chain};
use crate::transport::{SocketOption, Transport, TransportError};
use crate::wire::{MsgFlags, split_messages};

/// The YAML engine's reader callback: fill `buf`, report `(bytes, ok)`.
/// Zero bytes with `ok` means end-of-stream or a benign interruption.
pub trait YamlSource {
    /// Fill `buf` with document bytes.
    fn read(&mut self, buf: &mut [u8]) -> (usize, bool);
}

/// The YAML engine's writer callback: consume emitted text, report success.
pub trait YamlSink {
    /// Consume one emitted fragment.
    fn write(&mut self, fragment: &str) -> bool;
    /// Terminal write: the document is complete.
    fn finish(&mut self) -> bool;
}

/// One successful step of the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were delivered.
    Data(usize),
    /// The receive was interrupted; call again to continue.
    Interrupted,
    /// The stream is complete and fully drained.
    Eof,
}

fn configure<T: Transport>(
    transport: &mut T,
    option: SocketOption,
    enable: bool,
    stage: &'static str,
) -> Result<(), Error> {
    transport.configure(option, enable).map_err(|source| Error::Attach { stage, source })
}

/// Inbound session: kernel messages in, YAML text out.
#[derive(Debug)]
pub struct ReadSession<T: Transport> {
    transport: T,
    inbound: Inbound,
    complete: bool,
    error: Option<String>,
    notes: Vec<String>,
}

impl<T: Transport> ReadSession<T> {
    /// Wire a reader to `transport`.
    ///
    /// Streaming sessions carry async events without the usual
    /// request/response pairing, so sequence checking and auto-ack go off.
    pub fn attach(mut transport: T, stream: bool) -> Result<Self, Error> {
        configure(&mut transport, SocketOption::BroadcastError, true, "broadcast-error reporting")?;
        configure(&mut transport, SocketOption::ExtAck, true, "extended-ack reporting")?;
        if stream {
            configure(&mut transport, SocketOption::SequenceCheck, false, "sequence checking")?;
            configure(&mut transport, SocketOption::AutoAck, false, "automatic acknowledgement")?;
        }
        Ok(Self {
            transport,
            inbound: Inbound::new(),
            complete: false,
            error: None,
            notes: Vec::new(),
        })
    }

    /// Drive the transport until staged text lands in `buf`, the stream
    /// completes, or the receive is interrupted.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, Error> {
        if let Some(earlier) = &self.error {
            return Err(Error::Failed(earlier.clone()));
        }
        loop {
            if self.inbound.staged() > 0 {
                return Ok(ReadOutcome::Data(self.inbound.drain_into(buf)));
            }
            if self.complete {
                return Ok(ReadOutcome::Eof);
            }
            let datagram = match self.transport.receive() {
                Ok(datagram) => datagram,
                Err(TransportError::Interrupted) => return Ok(ReadOutcome::Interrupted),
                Err(err) => return Err(self.fail(Error::Transport(err))),
            };
            for msg in split_messages(&datagram) {
                let bytes = match msg {
                    Ok((_, bytes)) => bytes,
                    Err(err) => {
                        self.notes.push(err.to_string());
                        break;
                    }
                };
                match self.inbound.absorb(bytes) {
                    Ok(Control::More) => {}
                    Ok(Control::Done) => {
                        self.complete = true;
                        self.inbound.teardown();
                        break;
                    }
                    Err(err) if err.is_skip() => self.notes.push(err.to_string()),
                    Err(err) => return Err(self.fail(err)),
                }
            }
        }
    }

    /// Loop the reader until end-of-stream and return the whole document.
    pub fn read_to_document(&mut self) -> Result<String, Error> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match self.read_chunk(&mut buf)? {
                ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
                ReadOutcome::Interrupted => {}
                ReadOutcome::Eof => break,
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// The recorded reader error, if the session failed.
    pub fn reader_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Diagnostics for messages that were skipped rather than fatal.
    pub fn notes(&self) -> Vec<&str> {
        self.notes
            .iter()
            .map(String::as_str)
            .chain(self.inbound.notes().iter().map(String::as_str))
            .collect()
    }

    /// Pretty-print the recorded error, if any, with `context`.
    pub fn log_error<W: Write>(&self, out: &mut W, context: &str) -> io::Result<()> {
        match &self.error {
            Some(message) => write_error_chain(out, context, message, None),
            None => Ok(()),
        }
    }

    /// The owned transport, for inspection.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn fail(&mut self, err: Error) -> Error {
        self.error = Some(err.to_string());
        err
    }
}

impl<T: Transport> YamlSource for ReadSession<T> {
    fn read(&mut self, buf: &mut [u8]) -> (usize, bool) {
        match self.read_chunk(buf) {
            Ok(ReadOutcome::Data(n)) => (n, true),
            Ok(ReadOutcome::Interrupted | ReadOutcome::Eof) => (0, true),
            Err(_) => (0, false),
        }
    }
}

impl<T: Transport> Read for ReadSession<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_chunk(buf) {
            Ok(ReadOutcome::Data(n)) => Ok(n),
            Ok(ReadOutcome::Eof) => Ok(0),
            Ok(ReadOutcome::Interrupted) => Err(io::Error::from(io::ErrorKind::Interrupted)),
            Err(err) => Err(io::Error::other(err.to_string())),
        }
    }
}

/// Outbound session: YAML text in, one kernel message out.
#[derive(Debug)]
pub struct WriteSession<T: Transport> {
    transport: T,
    family: String,
    outbound: Outbound,
    sent: bool,
    error: Option<String>,
}

impl<T: Transport> WriteSession<T> {
    /// Wire a writer to `transport`, addressed to `family`/`command`.
    pub fn attach(
        mut transport: T,
        family: &str,
        version: u8,
        command: u8,
        flags: MsgFlags,
    ) -> Result<Self, Error> {
        let family_id = transport
            .resolve_family(family)
            .map_err(|source| Error::Attach { stage: "family resolution", source })?;
        let pid = transport.local_pid();
        let outbound = Outbound::new(family_id, command, version, flags, 1, pid);
        Ok(Self { transport, family: family.to_string(), outbound, sent: false, error: None })
    }

    /// Consume one emitted text fragment.
    pub fn write_fragment(&mut self, fragment: &str) -> Result<(), Error> {
        if let Some(earlier) = &self.error {
            return Err(Error::Failed(earlier.clone()));
        }
        let outcome = match self.outbound.push(fragment) {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.fail(err)),
        };
        self.apply(outcome)
    }

    fn apply(&mut self, outcome: PushOutcome) -> Result<(), Error> {
        if let Some(group) = outcome.group {
            match self.transport.resolve_group(&self.family, &group) {
                Ok(id) => {
                    if let Err(err) = self.transport.subscribe(id) {
                        return Err(self.fail(Error::Transport(err)));
                    }
                }
                Err(TransportError::NoSuchGroup(_)) => {
                    return Err(self.fail(Error::UnknownGroup(group)));
                }
                Err(err) => return Err(self.fail(Error::Transport(err))),
            }
        }
        if outcome.terminal {
            self.finish()?;
        }
        Ok(())
    }

    /// Terminal write: close open containers and send the message.
    pub fn finish(&mut self) -> Result<(), Error> {
        if self.sent {
            return Ok(());
        }
        if let Some(earlier) = &self.error {
            return Err(Error::Failed(earlier.clone()));
        }
        let tail = match self.outbound.flush_tail() {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.fail(err)),
        };
        if tail.group.is_some() {
            self.apply(PushOutcome { group: tail.group, terminal: false })?;
        }
        let msg = match self.outbound.finish() {
            Ok(msg) => msg,
            Err(err) => return Err(self.fail(err)),
        };
        match self.transport.send(&msg) {
            Ok(()) => {
                self.sent = true;
                Ok(())
            }
            Err(err) => Err(self.fail(Error::Transport(err))),
        }
    }

    /// The recorded writer error, if the session failed.
    pub fn writer_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Pretty-print the recorded error, if any.
    pub fn log_error<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match &self.error {
            Some(message) => write_error_chain(out, "", message, None),
            None => Ok(()),
        }
    }

    /// The owned transport, for inspection.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Tear the session down, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn fail(&mut self, err: Error) -> Error {
        self.error = Some(err.to_string());
        err
    }
}

impl<T: Transport> YamlSink for WriteSession<T> {
    fn write(&mut self, fragment: &str) -> bool {
        self.write_fragment(fragment).is_ok()
    }

    fn finish(&mut self) -> bool {
        Self::finish(self).is_ok()
    }
}
