//! Outbound transcoder: consumes emitted YAML text and shapes it into a
//! typed-attribute message.
//!
//! There is no schema on this path. Structure is inferred from indentation
//! and bracket tokens; container names and scalars all travel as
//! `VALUE`-tagged strings and the receiver reconciles them against its own
//! key table.

use memchr::memchr;

use crate::error::Error;
use crate::wire::{MessageBuilder, MsgFlags, NestSlot, tag};

/// One open container while inferring structure.
#[derive(Debug)]
struct Frame {
    /// Indentation of the container's content lines.
    indent: usize,
    slot: NestSlot,
}

/// A bare `key:` line whose role (mapping or empty scalar) depends on the
/// indentation of the following line.
#[derive(Debug)]
struct Pending {
    indent: usize,
    name: String,
}

/// What one `push` call surfaced to the orchestrator.
#[derive(Debug, Default)]
pub struct PushOutcome {
    /// The multicast group line, the first time it is seen.
    pub group: Option<String>,
    /// A terminal write was seen; the message should be sent.
    pub terminal: bool,
}

/// Outbound transcoder state for one session.
#[derive(Debug)]
pub struct Outbound {
    family: u16,
    cmd: u8,
    version: u8,
    flags: MsgFlags,
    seq: u32,
    pid: u32,
    /// Unterminated last line carried between write callbacks.
    tail: String,
    group: Option<String>,
    builder: Option<MessageBuilder>,
    group_slot: Option<NestSlot>,
    frames: Vec<Frame>,
    pending: Option<Pending>,
    body_attrs: usize,
}

impl Outbound {
    /// State for one outgoing message with the given identity.
    pub fn new(family: u16, cmd: u8, version: u8, flags: MsgFlags, seq: u32, pid: u32) -> Self {
        Self {
            family,
            cmd,
            version,
            flags,
            seq,
            pid,
            tail: String::new(),
            group: None,
            builder: None,
            group_slot: None,
            frames: Vec::new(),
            pending: None,
            body_attrs: 0,
        }
    }

    /// Consume one emitted text fragment, which may hold any number of
    /// complete or partial lines.
    pub fn push(&mut self, fragment: &str) -> Result<PushOutcome, Error> {
        let mut outcome = PushOutcome::default();
        self.tail.push_str(fragment);
        while let Some(pos) = memchr(b'\n', self.tail.as_bytes()) {
            let line: String = self.tail[..pos].to_string();
            self.tail.drain(..=pos);
            self.handle_line(&line, &mut outcome)?;
        }
        Ok(outcome)
    }

    /// Process a trailing unterminated line, if any.
    pub fn flush_tail(&mut self) -> Result<PushOutcome, Error> {
        let mut outcome = PushOutcome::default();
        if !self.tail.is_empty() {
            let line = std::mem::take(&mut self.tail);
            self.handle_line(&line, &mut outcome)?;
        }
        Ok(outcome)
    }

    /// Close every open container and produce the framed message.
    ///
    /// With no resolved group nothing can be addressed; a body that produced
    /// no attributes degrades to a bare command-only message.
    pub fn finish(&mut self) -> Result<Vec<u8>, Error> {
        if let Some(p) = self.pending.take() {
            self.emit_str(&p.name);
        }
        if self.group.is_none() {
            return Err(Error::NoGroup);
        }
        if self.body_attrs == 0 {
            self.builder = None;
            self.group_slot = None;
            return Ok(self.bare_message());
        }
        while let Some(frame) = self.frames.pop() {
            self.close_nest(frame.slot);
        }
        if let Some(slot) = self.group_slot.take() {
            self.builder_mut().end_nested(slot);
        }
        let Some(builder) = self.builder.take() else {
            return Err(Error::Framing("message already sent".to_string()));
        };
        Ok(builder.finish())
    }

    fn bare_message(&self) -> Vec<u8> {
        MessageBuilder::new(self.family, self.flags, self.seq, self.pid, self.cmd, self.version)
            .finish()
    }

    fn handle_line(&mut self, raw: &str, outcome: &mut PushOutcome) -> Result<(), Error> {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if raw.trim().is_empty() {
            if self.group.is_some() {
                outcome.terminal = true;
            }
            return Ok(());
        }
        // Document markers carry no content of their own.
        if raw.starts_with("---") || raw.starts_with("...") {
            return Ok(());
        }

        let line = substitute_quotes(raw)?;
        let trimmed = line.trim_start_matches(' ');
        let indent = line.len() - trimmed.len();

        if self.group.is_none() {
            if indent == 0
                && let Some(name) = trimmed.strip_suffix(':')
                && !name.is_empty()
                && !name.contains([':', ' '])
            {
                self.group = Some(name.to_string());
                outcome.group = Some(name.to_string());
                return Ok(());
            }
            return Err(Error::NoGroup);
        }

        self.body_line(indent, trimmed)
    }

    fn body_line(&mut self, indent: usize, content: &str) -> Result<(), Error> {
        if let Some(p) = self.pending.take() {
            self.emit_str(&p.name);
            if indent > p.indent {
                let slot = self.open_nest();
                self.frames.push(Frame { indent, slot });
            }
        }
        while self.frames.last().is_some_and(|frame| indent < frame.indent) {
            if let Some(frame) = self.frames.pop() {
                self.close_nest(frame.slot);
            }
        }
        self.entry(indent, content)
    }

    fn entry(&mut self, indent: usize, content: &str) -> Result<(), Error> {
        if let Some(rest) = content.strip_prefix("- ") {
            // A sequence element is its own container; its content sits two
            // columns deeper than the dash.
            let slot = self.open_nest();
            self.frames.push(Frame { indent: indent + 2, slot });
            return self.entry(indent + 2, rest);
        }
        if let Some(open) = content.find(['{', '[']) {
            return self.flow_entry(content, open);
        }
        if let Some((key, value)) = content.split_once(": ") {
            self.emit_str(key.trim_end());
            self.emit_str(value.trim());
            return Ok(());
        }
        if let Some(key) = content.strip_suffix(':') {
            self.pending = Some(Pending { indent, name: key.trim_end().to_string() });
            return Ok(());
        }
        self.emit_str(content.trim_end());
        Ok(())
    }

    /// `key: { a, b }` and `key: [ a, b ]` collapse to one nested attribute
    /// holding one sibling per comma-separated token.
    fn flow_entry(&mut self, content: &str, open: usize) -> Result<(), Error> {
        let Some(close) = content.rfind(['}', ']']) else {
            return Err(Error::Framing(format!("unterminated flow container in '{content}'")));
        };
        if close < open {
            return Err(Error::Framing(format!("mismatched flow brackets in '{content}'")));
        }
        let key = content[..open].trim_end().trim_end_matches(':').trim_end();
        if !key.is_empty() {
            self.emit_str(key);
        }
        let slot = self.open_nest();
        for token in content[open + 1..close].split(',') {
            let token = token.trim();
            if !token.is_empty() {
                self.emit_str(token);
            }
        }
        self.close_nest(slot);
        Ok(())
    }

    fn builder_mut(&mut self) -> &mut MessageBuilder {
        if self.builder.is_none() {
            let mut b = MessageBuilder::new(
                self.family,
                self.flags,
                self.seq,
                self.pid,
                self.cmd,
                self.version,
            );
            self.group_slot = Some(b.begin_nested(tag::LIST));
            self.builder = Some(b);
        }
        match self.builder.as_mut() {
            Some(b) => b,
            None => unreachable!("builder initialized above"),
        }
    }

    fn emit_str(&mut self, s: &str) {
        self.body_attrs += 1;
        self.builder_mut().put_str(tag::VALUE, s);
    }

    fn open_nest(&mut self) -> NestSlot {
        self.body_attrs += 1;
        self.builder_mut().begin_nested(tag::LIST)
    }

    fn close_nest(&mut self, slot: NestSlot) {
        self.builder_mut().end_nested(slot);
    }
}

/// Replace each quoted segment with `% seg %`; the wire string framing does
/// not tolerate embedded quotes and the receiving side undoes the
/// substitution.
fn substitute_quotes(line: &str) -> Result<String, Error> {
    if !line.contains(['\'', '"']) {
        return Ok(line.to_string());
    }
    let mut out = String::with_capacity(line.len() + 4);
    let mut open: Option<char> = None;
    for c in line.chars() {
        match c {
            '\'' | '"' => match open {
                None => {
                    open = Some(c);
                    out.push_str("% ");
                }
                Some(q) if q == c => {
                    open = None;
                    out.push_str(" %");
                }
                Some(_) => out.push(c),
            },
            _ => out.push(c),
        }
    }
    if open.is_some() {
        return Err(Error::UnbalancedQuotes(line.to_string()));
    }
    Ok(out)
}
