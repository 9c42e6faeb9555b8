//! Socket plumbing shared by the probe and the transfer workers.

use std::{io, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time,
};
use tokio_native_tls::{TlsConnector, native_tls};

use crate::{
    Error, MAX_BUFFER_SIZE, MAX_HEAD_SIZE, Result,
    url_ref::{Scheme, UrlRef},
    wire::{self, ResponseHead},
};

pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// A plain or TLS-wrapped TCP stream.
pub type Connection = Box<dyn Stream>;

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out"))
}

/// Opens a TCP connection and, for https, performs a TLS handshake.
///
/// The server certificate is verified against the system trust store.
pub async fn connect(url: &UrlRef, timeout: Duration) -> Result<Connection> {
    let connect_error = |source: io::Error| Error::Connect {
        host: url.host().to_string(),
        port: url.port(),
        source,
    };

    let tcp = time::timeout(timeout, TcpStream::connect((url.host(), url.port())))
        .await
        .map_err(|_| connect_error(timed_out("connect")))?
        .map_err(connect_error)?;

    if let Err(err) = tcp.set_nodelay(true) {
        tracing::trace!("Could not set TCP_NODELAY: {err}");
    }

    match url.scheme() {
        Scheme::Http => Ok(Box::new(tcp)),
        Scheme::Https => {
            let connector = native_tls::TlsConnector::new()
                .map_err(|err| connect_error(io::Error::other(err)))?;
            let connector = TlsConnector::from(connector);

            let tls = time::timeout(timeout, connector.connect(url.host(), tcp))
                .await
                .map_err(|_| connect_error(timed_out("TLS handshake")))?
                .map_err(|err| connect_error(io::Error::other(err)))?;

            Ok(Box::new(tls))
        }
    }
}

pub async fn send_request(conn: &mut Connection, request: &[u8]) -> Result<()> {
    conn.write_all(request).await.map_err(Error::Send)?;
    conn.flush().await.map_err(Error::Send)
}

/// Reads until the header terminator shows up, possibly across several reads.
///
/// Body bytes that arrive with the head are kept in [`ResponseHead::body_prefix`].
pub async fn read_head(
    conn: &mut Connection,
    idle_timeout: Duration,
    buffer_size: usize,
) -> Result<ResponseHead> {
    let read_size = buffer_size.clamp(1, MAX_BUFFER_SIZE);
    let mut buf = Vec::with_capacity(read_size);
    let mut chunk = vec![0u8; read_size];

    loop {
        if wire::find_head_end(&buf).is_some() {
            return wire::parse_response(&buf);
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(Error::MalformedResponse(format!(
                "no header terminator within {MAX_HEAD_SIZE} bytes"
            )));
        }

        let read = time::timeout(idle_timeout, conn.read(&mut chunk))
            .await
            .map_err(|_| Error::Receive(timed_out("waiting for response head")))?
            .map_err(Error::Receive)?;

        if read == 0 {
            return Err(Error::MalformedResponse(
                "connection closed before the header terminator".into(),
            ));
        }

        buf.extend_from_slice(&chunk[..read]);
    }
}

/// Connects, sends `request` and reads the response head, leaving the body on the connection.
pub async fn exchange(
    url: &UrlRef,
    request: &[u8],
    connect_timeout: Duration,
    idle_timeout: Duration,
    buffer_size: usize,
) -> Result<(Connection, ResponseHead)> {
    let mut conn = connect(url, connect_timeout).await?;
    send_request(&mut conn, request).await?;
    let head = read_head(&mut conn, idle_timeout, buffer_size).await?;
    Ok((conn, head))
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn serve_once(reply: Vec<Vec<u8>>) -> UrlRef {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            for part in reply {
                socket.write_all(&part).await.unwrap();
                socket.flush().await.unwrap();
                time::sleep(Duration::from_millis(20)).await;
            }
        });

        UrlRef::parse(&format!("http://127.0.0.1:{port}/")).unwrap()
    }

    #[tokio::test]
    async fn test_read_head_split_across_reads() {
        let url = serve_once(vec![
            b"HTTP/1.1 200 OK\r\ncontent-le".to_vec(),
            b"ngth: 5\r\n\r".to_vec(),
            b"\nhel".to_vec(),
        ])
        .await;

        let request = wire::build_request(&url, &[], None);
        let (_, head) = exchange(&url, &request, Duration::from_secs(2), Duration::from_secs(2), 8)
            .await
            .unwrap();

        assert_eq!(head.status_code, 200);
        assert_eq!(head.content_length(), Some(5));
        assert_eq!(head.body_prefix, b"hel");
    }

    #[tokio::test]
    async fn test_read_head_closed_early() {
        let url = serve_once(vec![b"HTTP/1.1 200 OK\r\n".to_vec()]).await;

        let request = wire::build_request(&url, &[], None);
        let timeout = Duration::from_secs(2);
        let result = exchange(&url, &request, timeout, timeout, 1024).await;

        assert!(matches!(result, Err(Error::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = UrlRef::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
        let result = connect(&url, Duration::from_secs(2)).await;

        assert!(matches!(result, Err(Error::Connect { port: p, .. }) if p == port));
    }
}
