//! Connects to the gateway's command socket.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use cangate_config::SocketEndpoint;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::errors::AppError;

/// Upper bound on establishing a connection; replies are awaited without a
/// limit since `subscribe_next_msg` may wait for minutes.
pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// An open stream to the gateway, whichever socket family carries it.
pub(crate) struct Connection {
    stream: Box<dyn Stream>,
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

pub(crate) fn connect(endpoint: &SocketEndpoint) -> Result<Connection, AppError> {
    let stream: Box<dyn Stream> = match endpoint {
        SocketEndpoint::Tcp { host, port } => Box::new(connect_tcp(endpoint, host, *port)?),
        #[cfg(unix)]
        SocketEndpoint::Unix { path } => {
            Box::new(connect_unix(path.as_str()).map_err(|source| AppError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?)
        }
        #[cfg(not(unix))]
        SocketEndpoint::Unix { path: _path } => {
            return Err(AppError::UnsupportedUnixTransport(endpoint.to_string()));
        }
    };
    Ok(Connection { stream })
}

/// Tries each resolved address in turn and reports the last failure.
fn connect_tcp(endpoint: &SocketEndpoint, host: &str, port: u16) -> Result<TcpStream, AppError> {
    let addresses: Vec<_> = (host, port)
        .to_socket_addrs()
        .map_err(|source| AppError::Resolve {
            endpoint: endpoint.to_string(),
            source,
        })?
        .collect();
    let mut last_error =
        io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses");
    for address in addresses {
        match TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = error,
        }
    }
    Err(AppError::Connect {
        endpoint: endpoint.to_string(),
        source: last_error,
    })
}

#[cfg(unix)]
fn connect_unix(path: &str) -> io::Result<UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.connect_timeout(&SockAddr::unix(path)?, CONNECTION_TIMEOUT)?;
    Ok(UnixStream::from(socket))
}
