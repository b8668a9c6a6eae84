//! Networked store speaking RESP to a Redis-compatible server
//!
//! One connection is opened lazily and shared by all callers; requests are
//! sequential on it. A failed connect or request drops the connection and
//! marks the store unavailable for `retry_after`, after which the next call
//! reconnects.
//!
//! The connection is taken out of its slot for each exchange and only put
//! back once a full reply has been read. A caller that is cancelled mid
//! exchange drops the connection with it, so no stale reply is left for the
//! next request.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::memory::MAX_TTL;
use crate::stats::{StatsSnapshot, StoreStats};
use crate::traits::{CacheStore, ScanPage};
use crate::wire::Frame;

/// Connection settings for a [`RemoteStore`]
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// `host:port` of the server
    pub addr: String,
    /// Name used in logs and stats
    pub name: String,
    /// TTL for writes that do not specify one
    pub default_ttl: Duration,
    /// Deadline for connecting plus one request/reply exchange
    pub io_timeout: Duration,
    /// How long to report unavailable after a failure
    pub retry_after: Duration,
}

impl RemoteConfig {
    /// Defaults: 10 minute TTL, 2s I/O timeout, 5s retry window
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            name: "l2".to_string(),
            default_ttl: Duration::from_secs(600),
            io_timeout: Duration::from_secs(2),
            retry_after: Duration::from_secs(5),
        }
    }
}

struct Connection {
    stream: TcpStream,
    buf: BytesMut,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        })
    }

    async fn round_trip(&mut self, request: &Frame) -> Result<Frame> {
        self.stream.write_all(&request.to_bytes()).await?;

        loop {
            if let Some(frame) = Frame::decode(&mut self.buf)? {
                return Ok(frame);
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )));
            }
        }
    }
}

/// RESP-backed store
pub struct RemoteStore {
    config: RemoteConfig,
    conn: tokio::sync::Mutex<Option<Connection>>,
    down_since: Mutex<Option<Instant>>,
    stats: StoreStats,
}

impl RemoteStore {
    /// Create a store that connects on first use
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            conn: tokio::sync::Mutex::new(None),
            down_since: Mutex::new(None),
            stats: StoreStats::new(),
        }
    }

    /// Create a store and verify the server answers `PING`
    pub async fn connect(config: RemoteConfig) -> Result<Self> {
        let store = Self::new(config);
        store.ping().await?;
        info!(store = %store.config.name, addr = %store.config.addr, "connected to remote store");
        Ok(store)
    }

    /// Round-trip a `PING`
    pub async fn ping(&self) -> Result<()> {
        match self.call(vec![b"PING".to_vec()]).await? {
            Frame::Simple(_) | Frame::Bulk(Some(_)) => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    /// Server address
    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    async fn call(&self, parts: Vec<Vec<u8>>) -> Result<Frame> {
        if !self.is_available() {
            return Err(Error::Unavailable(format!(
                "{} is in its retry window",
                self.config.addr
            )));
        }

        let request = Frame::command(parts);
        let mut guard = self.conn.lock().await;
        let idle = guard.take();

        let exchange = async {
            let mut conn = match idle {
                Some(conn) => conn,
                None => {
                    debug!(addr = %self.config.addr, "opening connection");
                    Connection::open(&self.config.addr).await?
                }
            };
            let reply = conn.round_trip(&request).await?;
            Ok::<_, Error>((conn, reply))
        };

        let result = match timeout(self.config.io_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };

        match result {
            Ok((conn, reply)) => {
                *guard = Some(conn);
                self.mark_up();
                match reply {
                    Frame::Error(message) => Err(Error::Remote(message)),
                    frame => Ok(frame),
                }
            }
            Err(e) => {
                self.mark_down(&e);
                Err(e)
            }
        }
    }

    fn mark_up(&self) {
        if self.down_since.lock().take().is_some() {
            info!(store = %self.config.name, addr = %self.config.addr, "remote store recovered");
        }
    }

    fn mark_down(&self, cause: &Error) {
        let mut down_since = self.down_since.lock();
        if down_since.is_none() {
            warn!(
                store = %self.config.name,
                addr = %self.config.addr,
                error = %cause,
                "remote store unavailable"
            );
        }
        *down_since = Some(Instant::now());
    }
}

fn ttl_millis(ttl: Duration) -> Vec<u8> {
    ttl.min(MAX_TTL).as_millis().max(1).to_string().into_bytes()
}

fn unexpected(command: &str, reply: &Frame) -> Error {
    Error::Protocol(format!("unexpected reply to {}: {:?}", command, reply))
}

fn integer(command: &str, reply: Frame) -> Result<i64> {
    match reply {
        Frame::Integer(n) => Ok(n),
        other => Err(unexpected(command, &other)),
    }
}

#[async_trait]
impl CacheStore for RemoteStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    fn is_available(&self) -> bool {
        match *self.down_since.lock() {
            None => true,
            Some(since) => since.elapsed() >= self.config.retry_after,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.call(vec![b"GET".to_vec(), key.into()]).await? {
            Frame::Bulk(Some(value)) => {
                self.stats.record_hit();
                Ok(Some(value))
            }
            Frame::Bulk(None) => {
                self.stats.record_miss();
                Ok(None)
            }
            other => Err(unexpected("GET", &other)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let reply = self
            .call(vec![
                b"SET".to_vec(),
                key.into(),
                value,
                b"PX".to_vec(),
                ttl_millis(ttl),
            ])
            .await?;

        match reply {
            Frame::Simple(_) => {
                self.stats.record_set();
                Ok(())
            }
            other => Err(unexpected("SET", &other)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = integer("DEL", self.call(vec![b"DEL".to_vec(), key.into()]).await?)? > 0;
        if removed {
            self.stats.record_delete();
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(integer("EXISTS", self.call(vec![b"EXISTS".to_vec(), key.into()]).await?)? > 0)
    }

    async fn clear(&self) -> Result<()> {
        match self.call(vec![b"FLUSHDB".to_vec()]).await? {
            Frame::Simple(_) => {
                self.stats.reset();
                Ok(())
            }
            other => Err(unexpected("FLUSHDB", &other)),
        }
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        let value = integer("INCR", self.call(vec![b"INCR".to_vec(), key.into()]).await?)?;
        if value == 1 {
            self.expire(key, ttl.unwrap_or(self.config.default_ttl)).await?;
        }
        self.stats.record_set();
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let reply = self
            .call(vec![b"PEXPIRE".to_vec(), key.into(), ttl_millis(ttl)])
            .await?;
        Ok(integer("PEXPIRE", reply)? > 0)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let reply = self
            .call(vec![
                b"SCAN".to_vec(),
                cursor.to_string().into_bytes(),
                b"MATCH".to_vec(),
                pattern.into(),
                b"COUNT".to_vec(),
                count.to_string().into_bytes(),
            ])
            .await?;

        let mut parts = match reply {
            Frame::Array(Some(parts)) => parts,
            other => return Err(unexpected("SCAN", &other)),
        };
        if parts.len() != 2 {
            return Err(Error::Protocol(format!(
                "SCAN reply has {} elements, expected 2",
                parts.len()
            )));
        }

        let keys_frame = parts.pop().unwrap_or(Frame::Array(None));
        let cursor_frame = parts.pop().unwrap_or(Frame::nil());

        let cursor = cursor_frame
            .as_bytes()
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| unexpected("SCAN", &cursor_frame))?;

        let keys = match keys_frame {
            Frame::Array(Some(items)) => items
                .iter()
                .filter_map(|item| item.as_bytes())
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect(),
            Frame::Array(None) => Vec::new(),
            other => return Err(unexpected("SCAN", &other)),
        };

        Ok(ScanPage { cursor, keys })
    }

    async fn stats(&self) -> Result<StatsSnapshot> {
        let size = integer("DBSIZE", self.call(vec![b"DBSIZE".to_vec()]).await?)?;
        Ok(self.stats.snapshot(size.max(0) as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one connection and answer each request with the next canned reply
    async fn canned_server(replies: Vec<Frame>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            for reply in replies {
                loop {
                    if Frame::decode(&mut buf).unwrap().is_some() {
                        break;
                    }
                    if stream.read_buf(&mut buf).await.unwrap() == 0 {
                        return;
                    }
                }
                stream.write_all(&reply.to_bytes()).await.unwrap();
            }
        });

        addr
    }

    /// Answer every `GET key` with `value-of-key`, holding back the reply
    /// for `slow_key` on each connection
    async fn echo_server(slow_key: &'static str, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = BytesMut::new();
                    loop {
                        let request = loop {
                            if let Some(frame) = Frame::decode(&mut buf).unwrap() {
                                break frame;
                            }
                            if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
                                return;
                            }
                        };
                        let Frame::Array(Some(parts)) = request else {
                            return;
                        };
                        let key = String::from_utf8_lossy(parts[1].as_bytes().unwrap()).to_string();
                        if key == slow_key {
                            tokio::time::sleep(delay).await;
                        }
                        let reply = Frame::bulk(format!("value-of-{}", key).into_bytes());
                        if stream.write_all(&reply.to_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        addr
    }

    async fn unused_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_get_hit_and_miss() {
        let addr = canned_server(vec![Frame::bulk(b"42".to_vec()), Frame::nil()]).await;
        let store = RemoteStore::new(RemoteConfig::new(addr));

        assert_eq!(store.get("dashboard:stats").await.unwrap(), Some(b"42".to_vec()));
        assert_eq!(store.get("dashboard:other").await.unwrap(), None);
        assert_eq!(store.stats.hits(), 1);
        assert_eq!(store.stats.misses(), 1);
    }

    #[tokio::test]
    async fn test_scan_reply_parsing() {
        let reply = Frame::Array(Some(vec![
            Frame::bulk(b"17".to_vec()),
            Frame::Array(Some(vec![
                Frame::bulk(b"products:1".to_vec()),
                Frame::bulk(b"products:2".to_vec()),
            ])),
        ]));
        let addr = canned_server(vec![reply]).await;
        let store = RemoteStore::new(RemoteConfig::new(addr));

        let page = store.scan(0, "products:*", 10).await.unwrap();
        assert_eq!(page.cursor, 17);
        assert_eq!(page.keys, vec!["products:1", "products:2"]);
    }

    #[tokio::test]
    async fn test_error_reply_keeps_store_available() {
        let addr = canned_server(vec![Frame::Error("ERR not an integer".into())]).await;
        let store = RemoteStore::new(RemoteConfig::new(addr));

        let err = store.incr("text", None).await.unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
        assert!(store.is_available());
    }

    #[tokio::test]
    async fn test_refused_connection_marks_unavailable() {
        let mut config = RemoteConfig::new(unused_addr().await);
        config.retry_after = Duration::from_secs(60);
        let store = RemoteStore::new(config);

        assert!(store.is_available());
        assert!(store.get("k").await.unwrap_err().is_connection());
        assert!(!store.is_available());

        // Inside the retry window no connection is attempted
        assert!(matches!(
            store.set("k", vec![], None).await,
            Err(Error::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_call_does_not_leak_reply() {
        let addr = echo_server("slow", Duration::from_millis(200)).await;
        let store = RemoteStore::new(RemoteConfig::new(addr));

        let cancelled = tokio::time::timeout(Duration::from_millis(30), store.get("slow")).await;
        assert!(cancelled.is_err());

        assert_eq!(store.get("fast").await.unwrap(), Some(b"value-of-fast".to_vec()));
        assert_eq!(store.get("other").await.unwrap(), Some(b"value-of-other".to_vec()));
        assert!(store.is_available());
    }

    #[tokio::test]
    async fn test_connection_is_reused_after_error_reply() {
        let addr = canned_server(vec![
            Frame::Error("ERR not an integer".into()),
            Frame::bulk(b"42".to_vec()),
        ])
        .await;
        let store = RemoteStore::new(RemoteConfig::new(addr));

        assert!(store.incr("text", None).await.is_err());
        // canned_server accepts a single connection
        assert_eq!(store.get("k").await.unwrap(), Some(b"42".to_vec()));
    }

    #[test]
    fn test_ttl_millis_is_clamped() {
        assert_eq!(ttl_millis(Duration::ZERO), b"1".to_vec());
        assert_eq!(ttl_millis(Duration::MAX), MAX_TTL.as_millis().to_string().into_bytes());
    }

    #[tokio::test]
    async fn test_retry_window_elapses() {
        let mut config = RemoteConfig::new(unused_addr().await);
        config.retry_after = Duration::from_millis(20);
        let store = RemoteStore::new(config);

        assert!(store.exists("k").await.is_err());
        assert!(!store.is_available());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.is_available());
    }
}
