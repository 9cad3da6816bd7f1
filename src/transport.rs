//! Line based command transport over any [embedded_io::Read] & [embedded_io::Write]
//! interface. This is the one communication session every channel of an instrument shares.

use embedded_io::Error as _;
use log::{debug, warn};

use crate::{
    error::{Error, Result},
    program::Directive,
};

const TERMINATOR: u8 = b'\n';
const CHUNK: usize = 64;

pub struct Transport<S: embedded_io::Read + embedded_io::Write> {
    interface: S,
    /// Bytes received after the last terminator, kept for the next reply.
    pending: Vec<u8>,
    /// Used to prefix log lines.
    label: String,
}

impl<S: embedded_io::Read + embedded_io::Write> Transport<S> {
    pub fn new(interface: S, label: impl Into<String>) -> Self {
        Self {
            interface,
            pending: Vec::new(),
            label: label.into(),
        }
    }

    /// Write a single directive followed by the line terminator.
    pub fn send(&mut self, directive: &Directive) -> Result<(), S::Error> {
        let line = directive.to_string();
        self.interface
            .write_all(line.as_bytes())
            .and_then(|()| self.interface.write_all(&[TERMINATOR]))
            .and_then(|()| self.interface.flush())
            .map_err(Error::SerialError)?;
        debug!("[{}] Sent command: {}", self.label, line);
        Ok(())
    }

    /// Read one reply line, without its terminator.
    ///
    /// A reply that ends without a terminator is accepted once the interface stops
    /// delivering data. No data at all is a [`Error::Timeout`].
    pub fn read_line(&mut self) -> Result<String, S::Error> {
        self.read_reply(false)
    }

    /// Read one reply line that must arrive with its terminator.
    ///
    /// A reply cut off before the terminator is dropped and reported as
    /// [`Error::Timeout`].
    pub fn read_complete_line(&mut self) -> Result<String, S::Error> {
        self.read_reply(true)
    }

    /// Send a query and read its reply.
    pub fn query(&mut self, directive: &Directive) -> Result<String, S::Error> {
        self.send(directive)?;
        self.read_line()
    }

    /// Send a query whose reply is only usable in full.
    pub fn query_complete(&mut self, directive: &Directive) -> Result<String, S::Error> {
        self.send(directive)?;
        self.read_complete_line()
    }

    pub fn interface(&self) -> &S {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut S {
        &mut self.interface
    }

    fn read_reply(&mut self, complete: bool) -> Result<String, S::Error> {
        let mut chunk = [0u8; CHUNK];
        let raw: Vec<u8> = loop {
            if let Some(end) = self.pending.iter().position(|&b| b == TERMINATOR) {
                let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                line.pop();
                break line;
            }

            match self.interface.read(&mut chunk) {
                Ok(0) => break self.take_unterminated(complete)?,
                Ok(bytes_read) => self.pending.extend_from_slice(&chunk[..bytes_read]),
                Err(e)
                    if matches!(
                        e.kind(),
                        embedded_io::ErrorKind::Other | embedded_io::ErrorKind::TimedOut
                    ) =>
                {
                    break self.take_unterminated(complete)?;
                }
                Err(e) => return Err(Error::SerialError(e)),
            }
        };

        let line = String::from_utf8(raw)
            .map_err(|e| Error::InvalidResponse(format!("reply is not UTF-8: {e}")))?;
        let line = line.trim_end_matches('\r').to_string();
        debug!("[{}] Received response: {}", self.label, line);
        Ok(line)
    }

    fn take_unterminated(&mut self, complete: bool) -> Result<Vec<u8>, S::Error> {
        if self.pending.is_empty() {
            return Err(Error::Timeout);
        }
        if complete {
            warn!(
                "[{}] Reply cut off after {} bytes, discarding it",
                self.label,
                self.pending.len()
            );
            self.pending.clear();
            return Err(Error::Timeout);
        }
        Ok(core::mem::take(&mut self.pending))
    }
}
