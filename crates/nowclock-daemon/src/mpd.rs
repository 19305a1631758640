//! MPD text-protocol client over TCP.
//!
//! One `MpdClient` is one connection.  Commands are written as a single
//! line; responses are `key: value` lines terminated by `OK`, or a single
//! `ACK [error@index] {command} message` line.
//!
//! Idle handling:
//!
//! ```text
//!   send_idle("player")  ── "idle player" ──▶
//!   fetch_idle()         ◀── "changed: player" / "OK"      (blocks)
//!   noidle()             ── "noidle" ──▶  ◀── "OK"         (early return)
//! ```
//!
//! `fetch_idle` is cancel-safe: bytes of a partly received line stay in the
//! connection's line buffer, and `noidle` drains whatever is left of the
//! idle response up to its `OK`.
//!
//! Any other failed exchange (timeout, bad framing, I/O) leaves an unknown
//! amount of reply in the socket.  The client is then marked broken and
//! every later request fails with `ConnectionClosed`, so the caller
//! reconnects instead of reading another request's reply.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use nowclock_proto::{Error, PlaybackStatus, Result, TrackMetadata};
use nowclock_sync::MusicClient;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

const GREETING_PREFIX: &str = "OK MPD ";

type Pairs = Vec<(String, String)>;

pub struct MpdClient {
    /// Label for log lines ("loop" / "position").
    name: &'static str,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Bytes of the line being received; survives a cancelled read.
    line: Vec<u8>,
    idling: bool,
    broken: bool,
    timeout: Duration,
    version: String,
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout)?
}

impl MpdClient {
    pub async fn connect(name: &'static str, address: &str, timeout: Duration) -> Result<Self> {
        let stream = with_timeout(timeout, async {
            TcpStream::connect(address).await.map_err(Error::from)
        })
        .await?;
        let (read_half, write_half) = stream.into_split();

        let mut client = Self {
            name,
            reader: BufReader::new(read_half),
            writer: write_half,
            line: Vec::new(),
            idling: false,
            broken: false,
            timeout,
            version: String::new(),
        };

        let greeting = with_timeout(timeout, client.read_line()).await?;
        client.version = greeting
            .strip_prefix(GREETING_PREFIX)
            .ok_or_else(|| Error::InvalidValue {
                field: "greeting",
                value: greeting.clone(),
            })?
            .to_string();

        info!(
            "mpd {}: connected to {} (protocol {})",
            name, address, client.version
        );
        Ok(client)
    }

    async fn read_line(&mut self) -> Result<String> {
        self.reader.read_until(b'\n', &mut self.line).await?;
        if !self.line.ends_with(b"\n") {
            return Err(Error::ConnectionClosed);
        }
        let raw = std::mem::take(&mut self.line);
        let line = String::from_utf8_lossy(&raw)
            .trim_end_matches(|c| c == '\n' || c == '\r')
            .to_string();
        trace!("mpd {}: <- {}", self.name, line);
        Ok(line)
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        trace!("mpd {}: -> {}", self.name, line);
        let mut raw = String::with_capacity(line.len() + 1);
        raw.push_str(line);
        raw.push('\n');
        self.writer.write_all(raw.as_bytes()).await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Pairs> {
        let mut pairs = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "OK" {
                return Ok(pairs);
            }
            if let Some(ack) = line.strip_prefix("ACK ") {
                return Err(Error::Server(ack.to_string()));
            }
            match line.split_once(": ") {
                Some((key, value)) => pairs.push((key.to_string(), value.to_string())),
                None => {
                    return Err(Error::InvalidValue {
                        field: "response line",
                        value: line,
                    })
                }
            }
        }
    }

    async fn round_trip(&mut self, command: &str) -> Result<Pairs> {
        self.write_line(command).await?;
        self.read_response().await
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.broken {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    /// Mark the connection broken unless the server answered in frame.
    fn check_frame<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if !matches!(e, Error::Server(_)) && !self.broken {
                warn!("mpd {}: connection out of step after: {}", self.name, e);
                self.broken = true;
            }
        }
        result
    }

    /// Request/response command bounded by the configured timeout.
    async fn command(&mut self, command: &str) -> Result<Pairs> {
        self.ensure_usable()?;
        debug!("mpd {}: {}", self.name, command);
        let limit = self.timeout;
        let result = with_timeout(limit, self.round_trip(command)).await;
        self.check_frame(result)
    }
}

fn borrowed(pairs: &Pairs) -> impl Iterator<Item = (&str, &str)> {
    pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

#[async_trait]
impl MusicClient for MpdClient {
    async fn status(&mut self) -> Result<PlaybackStatus> {
        let pairs = self.command("status").await?;
        PlaybackStatus::from_pairs(borrowed(&pairs))
    }

    async fn current_song(&mut self) -> Result<TrackMetadata> {
        let pairs = self.command("currentsong").await?;
        TrackMetadata::from_pairs(borrowed(&pairs))
    }

    async fn send_idle(&mut self, subsystem: &str) -> Result<()> {
        self.ensure_usable()?;
        let result = self.write_line(&format!("idle {}", subsystem)).await;
        self.check_frame(result)?;
        self.idling = true;
        Ok(())
    }

    async fn fetch_idle(&mut self) -> Result<Vec<String>> {
        self.ensure_usable()?;
        let result = self.read_response().await;
        self.idling = false;
        let pairs = self.check_frame(result)?;
        Ok(pairs
            .into_iter()
            .filter(|(k, _)| k == "changed")
            .map(|(_, v)| v)
            .collect())
    }

    async fn noidle(&mut self) -> Result<()> {
        if !self.idling {
            return Err(Error::NotIdle);
        }
        self.ensure_usable()?;
        let limit = self.timeout;
        let result = with_timeout(limit, self.round_trip("noidle")).await;
        self.idling = false;
        self.check_frame(result).map(|_| ())
    }

    async fn close(&mut self) -> Result<()> {
        if self.broken {
            self.writer.shutdown().await?;
            debug!("mpd {}: closed broken connection", self.name);
            return Ok(());
        }
        if self.idling {
            // Best effort: the server drops the idle with the connection anyway.
            let _ = self.noidle().await;
        }
        self.write_line("close").await?;
        self.writer.shutdown().await?;
        debug!("mpd {}: closed", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nowclock_proto::PlaybackState;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const LIMIT: Duration = Duration::from_secs(2);

    /// Single-connection scripted server: for each `(expect, reply)` it reads
    /// one command line, checks it, then writes `reply` verbatim.
    async fn fake_mpd(
        greeting: &'static str,
        script: Vec<(&'static str, &'static str)>,
    ) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            write_half.write_all(greeting.as_bytes()).await.unwrap();
            for (expect, reply) in script {
                let line = lines.next_line().await.unwrap().unwrap();
                assert_eq!(line, expect);
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_status_and_current_song() {
        let (addr, server) = fake_mpd(
            "OK MPD 0.23.5\n",
            vec![
                (
                    "status",
                    "volume: 70\nstate: play\nsong: 2\nsongid: 31\nelapsed: 61.204\nOK\n",
                ),
                (
                    "currentsong",
                    "file: x.flac\nTitle: Song\nArtist: Band\nAlbum: Record\nTrack: 7\nduration: 245.3\nOK\n",
                ),
            ],
        )
        .await;

        let mut client = MpdClient::connect("test", &addr, LIMIT).await.unwrap();
        assert_eq!(client.version, "0.23.5");

        let status = client.status().await.unwrap();
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.song_id.as_deref(), Some("31"));
        assert_eq!(status.elapsed, 61.204);

        let meta = client.current_song().await.unwrap();
        assert_eq!(meta.title, "Song");
        assert_eq!(meta.track_number, "7");
        assert_eq!(meta.duration, 245.3);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_is_server_error() {
        let (addr, server) = fake_mpd(
            "OK MPD 0.23.5\n",
            vec![("currentsong", "ACK [50@0] {currentsong} No such song\n")],
        )
        .await;

        let mut client = MpdClient::connect("test", &addr, LIMIT).await.unwrap();
        let err = client.current_song().await.unwrap_err();
        assert!(matches!(err, Error::Server(msg) if msg.contains("No such song")));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_state_surfaces() {
        let (addr, server) = fake_mpd(
            "OK MPD 0.23.5\n",
            vec![("status", "state: rewind\nOK\n")],
        )
        .await;

        let mut client = MpdClient::connect("test", &addr, LIMIT).await.unwrap();
        assert!(matches!(
            client.status().await,
            Err(Error::UnknownState(s)) if s == "rewind"
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_reports_changed_subsystems() {
        let (addr, server) = fake_mpd(
            "OK MPD 0.23.5\n",
            vec![("idle player", "changed: player\nOK\n")],
        )
        .await;

        let mut client = MpdClient::connect("test", &addr, LIMIT).await.unwrap();
        let changed = client.idle("player").await.unwrap();
        assert_eq!(changed, vec!["player".to_string()]);
        assert!(matches!(client.noidle().await, Err(Error::NotIdle)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_noidle_interrupts_blocked_idle() {
        let (addr, server) = fake_mpd(
            "OK MPD 0.23.5\n",
            vec![("idle player", ""), ("noidle", "OK\n"), ("status", "state: stop\nOK\n")],
        )
        .await;

        let mut client = MpdClient::connect("test", &addr, LIMIT).await.unwrap();
        client.send_idle("player").await.unwrap();
        tokio::select! {
            _ = client.fetch_idle() => panic!("idle returned without a change"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        client.noidle().await.unwrap();

        // The connection is usable again after the interrupt.
        let status = client.status().await.unwrap();
        assert_eq!(status, PlaybackStatus::default());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_noidle_without_idle_is_benign() {
        let (addr, server) = fake_mpd("OK MPD 0.23.5\n", vec![]).await;
        let mut client = MpdClient::connect("test", &addr, LIMIT).await.unwrap();
        assert!(matches!(client.noidle().await, Err(Error::NotIdle)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_non_mpd_greeting() {
        let (addr, server) = fake_mpd("SSH-2.0-OpenSSH_9.6\n", vec![]).await;
        let err = MpdClient::connect("test", &addr, LIMIT).await.err().unwrap();
        assert!(matches!(err, Error::InvalidValue { field: "greeting", .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_retires_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            write_half.write_all(b"OK MPD 0.23.5\n").await.unwrap();

            let first = lines.next_line().await.unwrap();
            assert_eq!(first.as_deref(), Some("status"));
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = write_half
                .write_all(b"state: play\nsongid: 1\nOK\n")
                .await;

            // Later requests get a different answer, so a stale read shows.
            while let Ok(Some(_)) = lines.next_line().await {
                let _ = write_half.write_all(b"state: stop\nOK\n").await;
            }
        });

        let mut client = MpdClient::connect("test", &addr, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(matches!(client.status().await, Err(Error::Timeout)));

        // The late reply has arrived by now; it must not answer this request.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(matches!(client.status().await, Err(Error::ConnectionClosed)));
        assert!(matches!(client.send_idle("player").await, Err(Error::ConnectionClosed)));

        client.close().await.unwrap();
        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_connection_is_transient() {
        let (addr, server) = fake_mpd("OK MPD 0.23.5\n", vec![]).await;
        let mut client = MpdClient::connect("test", &addr, LIMIT).await.unwrap();
        server.await.unwrap();

        let err = client.status().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {}", err);
    }
}
