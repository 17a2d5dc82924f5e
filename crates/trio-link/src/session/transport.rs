//! Session transport (TCP telnet port).

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use smol_str::SmolStr;

use crate::error::TrioError;

/// Telnet port of the controller command channel.
pub const DEFAULT_PORT: u16 = 23;

/// Byte stream to one controller.
pub trait Transport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Waits up to `timeout` for bytes. `Ok(0)` means the peer closed the
    /// stream; `WouldBlock`/`TimedOut` errors mean nothing arrived in time.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Returns bytes that are already buffered, without waiting.
    fn drain(&mut self) -> io::Result<Vec<u8>>;
}

/// Opens transports to one endpoint; used again after a controller restart.
pub trait Connector {
    type Transport: Transport;

    fn endpoint(&self) -> &str;

    fn open(&mut self, timeout: Duration) -> io::Result<Self::Transport>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConnector {
    host: SmolStr,
    port: u16,
    endpoint: SmolStr,
}

impl TcpConnector {
    /// Accepts `host`, `host:port` or `tcp://host:port`.
    pub fn parse(text: &str) -> Result<Self, TrioError> {
        let trimmed = text.trim();
        let rest = trimmed.strip_prefix("tcp://").unwrap_or(trimmed);
        if rest.is_empty() || rest.contains('/') {
            return Err(TrioError::InvalidEndpoint(SmolStr::new(text)));
        }
        if let Ok(addr) = rest.parse::<SocketAddr>() {
            return Ok(Self::new(addr.ip().to_string(), addr.port()));
        }
        match rest.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| TrioError::InvalidEndpoint(SmolStr::new(text)))?;
                if host.is_empty() {
                    return Err(TrioError::InvalidEndpoint(SmolStr::new(text)));
                }
                Ok(Self::new(host, port))
            }
            _ => Ok(Self::new(rest.trim_matches(&['[', ']'][..]), DEFAULT_PORT)),
        }
    }

    #[must_use]
    pub fn new(host: impl Into<SmolStr>, port: u16) -> Self {
        let host = host.into();
        let endpoint = if host.contains(':') {
            SmolStr::new(format!("[{host}]:{port}"))
        } else {
            SmolStr::new(format!("{host}:{port}"))
        };
        Self {
            host,
            port,
            endpoint,
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn open(&mut self, timeout: Duration) -> io::Result<TcpTransport> {
        let mut last_err = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(TcpTransport { stream });
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address for {}", self.endpoint),
            )
        }))
    }
}

#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        self.stream.read(buf)
    }

    fn drain(&mut self) -> io::Result<Vec<u8>> {
        self.stream.set_nonblocking(true)?;
        let mut drained = Vec::new();
        let mut chunk = [0u8; 1024];
        let result = loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => drained.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => break Err(err),
            }
        };
        self.stream.set_nonblocking(false)?;
        result.map(|()| drained)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
