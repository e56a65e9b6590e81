//! Connection pair
//!
//! One accepted front-end connection plus the backend connection dialed for
//! it, relayed together as a unit. Two copy loops run concurrently, one per
//! direction, each owning its own keystream cursor. The first loop to see
//! EOF, an I/O error or an idle-timeout expiry tears the whole pair down:
//! the other loop's task is aborted and both sockets close as their halves
//! drop. Relay is best effort; bytes not yet written when teardown starts
//! are discarded.

use crate::cipher::CipherStream;
use crate::config::TunnelConfig;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Bound on the backend connect. A connection that cannot dial within this
/// window is dropped; the remote client is expected to reconnect.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// How one copy loop ended, with the bytes it relayed.
enum Outcome {
    /// The read side signalled end of stream
    Eof(u64),
    /// No byte arrived within the idle deadline
    IdleTimeout(u64),
    /// A read or write failed
    Failed(u64, io::Error),
}

/// Relay one accepted front-end connection until either direction
/// terminates. Every failure is local to this pair: it is logged and the
/// pair is discarded, the listener keeps accepting.
pub(crate) async fn run(
    tunnel: String,
    front: TcpStream,
    peer: SocketAddr,
    config: Arc<TunnelConfig>,
) {
    let backend = match dial_backend(&config.backend).await {
        Ok(stream) => stream,
        Err(e) => {
            // Dropping `front` closes the front-end socket. One dial
            // attempt per accepted connection, never retried.
            warn!(
                "tunnel {}: backend {} unreachable, dropping {}: {}",
                tunnel, config.backend, peer, e
            );
            return;
        }
    };

    // Two independent cursors, one per direction. Sharing one would corrupt
    // both streams under concurrent writes.
    let (forward_cipher, reverse_cipher) = match CipherStream::pair(config.method, &config.secret) {
        Ok(pair) => pair,
        Err(e) => {
            warn!("tunnel {}: cipher setup failed, dropping {}: {}", tunnel, peer, e);
            return;
        }
    };

    front.set_nodelay(true).ok();
    backend.set_nodelay(true).ok();

    let (front_read, front_write) = front.into_split();
    let (back_read, back_write) = backend.into_split();

    let buffer_size = config.buffer_size;
    let idle = config.idle_timeout;

    let mut forward = tokio::spawn(pipe(front_read, back_write, forward_cipher, buffer_size, idle));
    let mut reverse = tokio::spawn(pipe(back_read, front_write, reverse_cipher, buffer_size, idle));

    // Whichever loop finishes first takes the other one down with it. The
    // aborted task drops its socket halves, which closes both sockets and
    // unblocks any read or write still in flight.
    let outcomes = tokio::select! {
        first = &mut forward => {
            reverse.abort();
            let second = reverse.await;
            [("forward", first), ("reverse", second)]
        }
        first = &mut reverse => {
            forward.abort();
            let second = forward.await;
            [("reverse", first), ("forward", second)]
        }
    };

    for (direction, outcome) in outcomes {
        log_outcome(&tunnel, peer, direction, outcome);
    }
    debug!("tunnel {}: connection pair for {} closed", tunnel, peer);
}

async fn dial_backend(addr: &str) -> io::Result<TcpStream> {
    match timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "backend connect timed out",
        )),
    }
}

/// Copy one direction until it terminates, applying the keystream in place.
///
/// Each read is bounded by the idle deadline; an expiry terminates the pair
/// exactly like an EOF would. A read returning zero bytes is the stream's
/// end-of-file signal.
async fn pipe(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut cipher: CipherStream,
    buffer_size: usize,
    idle: Option<Duration>,
) -> Outcome {
    let mut buf = vec![0u8; buffer_size];
    let mut relayed: u64 = 0;

    loop {
        let read = match idle {
            Some(limit) => match timeout(limit, reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => return Outcome::IdleTimeout(relayed),
            },
            None => reader.read(&mut buf).await,
        };

        let n = match read {
            Ok(0) => return Outcome::Eof(relayed),
            Ok(n) => n,
            Err(e) => return Outcome::Failed(relayed, e),
        };

        cipher.apply(&mut buf[..n]);

        if let Err(e) = writer.write_all(&buf[..n]).await {
            return Outcome::Failed(relayed, e);
        }
        relayed += n as u64;
    }
}

fn log_outcome(
    tunnel: &str,
    peer: SocketAddr,
    direction: &str,
    outcome: Result<Outcome, JoinError>,
) {
    match outcome {
        Ok(Outcome::Eof(bytes)) => {
            debug!("tunnel {}: {} {} closed after {} bytes", tunnel, peer, direction, bytes)
        }
        Ok(Outcome::IdleTimeout(bytes)) => {
            debug!(
                "tunnel {}: {} {} idle, disconnecting after {} bytes",
                tunnel, peer, direction, bytes
            )
        }
        Ok(Outcome::Failed(bytes, e)) => {
            debug!(
                "tunnel {}: {} {} failed after {} bytes: {}",
                tunnel, peer, direction, bytes, e
            )
        }
        // Aborted by the other direction's teardown.
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::Method;
    use tokio::net::TcpListener;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_pipe_relays_until_eof() {
        let (mut upstream, relay_in) = tcp_pair().await;
        let (relay_out, mut downstream) = tcp_pair().await;

        let cipher = CipherStream::new(Method::Plain, "s").unwrap();
        let task = tokio::spawn(pipe(
            relay_in.into_split().0,
            relay_out.into_split().1,
            cipher,
            4096,
            None,
        ));

        upstream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        downstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(upstream);
        match task.await.unwrap() {
            Outcome::Eof(5) => {}
            _ => panic!("expected EOF after 5 bytes"),
        }
    }

    #[tokio::test]
    async fn test_pipe_idle_timeout_counts_as_disconnect() {
        let (mut upstream, relay_in) = tcp_pair().await;
        let (relay_out, mut downstream) = tcp_pair().await;

        let cipher = CipherStream::new(Method::Plain, "s").unwrap();
        let task = tokio::spawn(pipe(
            relay_in.into_split().0,
            relay_out.into_split().1,
            cipher,
            4096,
            Some(Duration::from_millis(100)),
        ));

        upstream.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        downstream.read_exact(&mut buf).await.unwrap();

        // Leave the connection open but quiet; the deadline must fire.
        match timeout(Duration::from_secs(2), task).await.unwrap().unwrap() {
            Outcome::IdleTimeout(2) => {}
            _ => panic!("expected idle timeout after 2 bytes"),
        }
    }

    #[tokio::test]
    async fn test_pipe_applies_keystream() {
        let (mut upstream, relay_in) = tcp_pair().await;
        let (relay_out, mut downstream) = tcp_pair().await;

        let cipher = CipherStream::new(Method::Rc4, "s").unwrap();
        tokio::spawn(pipe(
            relay_in.into_split().0,
            relay_out.into_split().1,
            cipher,
            4096,
            None,
        ));

        upstream.write_all(b"plaintext").await.unwrap();
        let mut wire = [0u8; 9];
        downstream.read_exact(&mut wire).await.unwrap();
        assert_ne!(&wire, b"plaintext");

        let mut decode = CipherStream::new(Method::Rc4, "s").unwrap();
        decode.apply(&mut wire);
        assert_eq!(&wire, b"plaintext");
    }
}
