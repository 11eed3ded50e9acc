//! In-memory stream double used by the unit tests: scripted input bytes,
//! captured output bytes, and knobs for deadline and stall behavior.

use std::io::{self, Read, Write};

pub struct MockStream {
    input: io::Cursor<Vec<u8>>,
    pub output: Vec<u8>,
    timeout_on_drain: bool,
    refuse_writes: bool,
}

impl MockStream {
    pub fn new(input: Vec<u8>) -> Self {
        MockStream {
            input: io::Cursor::new(input),
            output: Vec::new(),
            timeout_on_drain: false,
            refuse_writes: false,
        }
    }

    /// Reads past the scripted input behave like an expired socket deadline.
    pub fn timeout_on_drain(mut self) -> Self {
        self.timeout_on_drain = true;
        self
    }

    /// All writes report zero bytes written.
    pub fn refuse_writes(mut self) -> Self {
        self.refuse_writes = true;
        self
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.input.read(buf)?;
        if n == 0 && self.timeout_on_drain {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "deadline"));
        }
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.refuse_writes {
            return Ok(0);
        }
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
