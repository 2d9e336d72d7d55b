//! Fiber-cooperative TCP streams.
//!
//! A [`FiberStream`]/[`FiberListener`] pair wraps a non-blocking
//! [`std::net::TcpStream`]/[`TcpListener`] the way `coio` wraps a raw socket:
//! a would-block result suspends the current fiber on the socket's
//! readiness via the reactor rather than blocking the worker thread, and
//! resumes once `IoManager` observes the fd ready.

use crate::error::{Error, Result};
use crate::io::{Events, IoManager};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

pub struct FiberStream {
    io: Arc<IoManager>,
    stream: TcpStream,
}

impl FiberStream {
    pub fn connect(io: &Arc<IoManager>, addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(io.clone(), stream)
    }

    fn from_stream(io: Arc<IoManager>, stream: TcpStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self { io, stream })
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Fills `buf` completely, suspending on readability whenever the
    /// socket would block. Returns `Ok(false)` only if the peer closed the
    /// connection before a single byte of this call was read — a clean
    /// frame-boundary EOF, not an error; any other short read is
    /// [`Error::ConnectionClosed`].
    pub fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    return if filled == 0 {
                        Ok(false)
                    } else {
                        Err(Error::ConnectionClosed)
                    };
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.io.wait_event(self.stream.as_raw_fd(), Events::READ)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.read_exact_or_eof(buf)? {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.stream.write(buf) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.io.wait_event(self.stream.as_raw_fd(), Events::WRITE)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

pub struct FiberListener {
    io: Arc<IoManager>,
    listener: TcpListener,
}

impl FiberListener {
    pub fn bind(io: &Arc<IoManager>, addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            io: io.clone(),
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts the next connection, suspending the current fiber while none
    /// is pending.
    pub fn accept(&self) -> Result<FiberStream> {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => return FiberStream::from_stream(self.io.clone(), stream),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.io.wait_event(self.listener.as_raw_fd(), Events::READ)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
