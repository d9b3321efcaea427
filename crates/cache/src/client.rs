//! The cache client: one TCP or TLS connection, all commands serialised
//! through a mutex, reset on any I/O error so the next call re-dials,
//! re-handshakes when TLS is on, and re-runs AUTH/SELECT.
//!
//! Per-command timeouts use the configured fallback; callers with a tighter
//! deadline wrap calls in `tokio::time::timeout`, which produces the same
//! reset behaviour on expiry.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;

use hg_domain::config::CacheConfig;
use hg_domain::{Error, Result};

use crate::resp::{self, Value};

/// Either side of the optional TLS wrapping.
trait CacheIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> CacheIo for T {}

type Conn = BufReader<Box<dyn CacheIo>>;

pub struct CacheClient {
    config: CacheConfig,
    conn: Mutex<Option<Conn>>,
}

impl CacheClient {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    /// Collapse consecutive `:` runs and prepend the namespace prefix once.
    pub fn normalize_key(&self, key: &str) -> String {
        let mut collapsed = String::with_capacity(key.len());
        let mut last_colon = false;
        for c in key.chars() {
            if c == ':' {
                if !last_colon {
                    collapsed.push(c);
                }
                last_colon = true;
            } else {
                collapsed.push(c);
                last_colon = false;
            }
        }
        let collapsed = collapsed.trim_matches(':');

        let prefix = &self.config.key_prefix;
        if prefix.is_empty() || collapsed.starts_with(&format!("{prefix}:")) {
            collapsed.to_string()
        } else {
            format!("{prefix}:{collapsed}")
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn incr(&self, key: &str) -> Result<i64> {
        let key = self.normalize_key(key);
        match self.command(&[b"INCR", key.as_bytes()]).await? {
            Value::Int(n) => Ok(n),
            other => Err(unexpected("INCR", &other)),
        }
    }

    /// Set a key's TTL in milliseconds. Returns false when the key is gone.
    pub async fn pexpire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let key = self.normalize_key(key);
        let millis = ttl.as_millis().to_string();
        match self
            .command(&[b"PEXPIRE", key.as_bytes(), millis.as_bytes()])
            .await?
        {
            Value::Int(n) => Ok(n == 1),
            other => Err(unexpected("PEXPIRE", &other)),
        }
    }

    /// Remaining TTL in milliseconds; -1 when no TTL, -2 when the key is gone.
    pub async fn pttl(&self, key: &str) -> Result<i64> {
        let key = self.normalize_key(key);
        match self.command(&[b"PTTL", key.as_bytes()]).await? {
            Value::Int(n) => Ok(n),
            other => Err(unexpected("PTTL", &other)),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = self.normalize_key(key);
        match self.command(&[b"GET", key.as_bytes()]).await? {
            Value::Bulk(data) => Ok(data),
            other => Err(unexpected("GET", &other)),
        }
    }

    pub async fn set_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let key = self.normalize_key(key);
        let millis = ttl.as_millis().to_string();
        match self
            .command(&[b"SET", key.as_bytes(), value, b"PX", millis.as_bytes()])
            .await?
        {
            Value::Simple(_) => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    pub async fn del(&self, keys: &[&str]) -> Result<u64> {
        let normalized: Vec<String> = keys.iter().map(|k| self.normalize_key(k)).collect();
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend(normalized.iter().map(|k| k.as_bytes()));
        match self.command(&args).await? {
            Value::Int(n) => Ok(n.max(0) as u64),
            other => Err(unexpected("DEL", &other)),
        }
    }

    /// The rate-limit primitive: INCR, then PEXPIRE only when the count is 1,
    /// then PTTL. Returns `(count, remaining)`.
    ///
    /// The TTL is asserted on the first increment only — callers wanting a
    /// sliding window must re-arm it themselves.
    pub async fn increment_with_ttl(&self, key: &str, window: Duration) -> Result<(i64, Duration)> {
        let count = self.incr(key).await?;
        if count == 1 {
            self.pexpire(key, window).await?;
        }
        let ttl_ms = self.pttl(key).await?;
        let remaining = Duration::from_millis(ttl_ms.max(0) as u64);
        Ok((count, remaining))
    }

    /// Readiness probe: one GET round trip on a probe key.
    pub async fn ping(&self) -> Result<()> {
        self.get("health:probe").await.map(|_| ())
    }

    // ── Connection handling ──────────────────────────────────────────

    fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.config.command_timeout_ms.max(1))
    }

    /// SNI name for the TLS handshake: the configured override, or the host
    /// part of `addr`.
    fn tls_server_name(&self) -> String {
        if let Some(name) = &self.config.tls.server_name {
            return name.clone();
        }
        let host = self
            .config
            .addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.config.addr);
        host.trim_start_matches('[').trim_end_matches(']').to_string()
    }

    /// Connector trusting the webpki roots plus the configured private CA.
    fn tls_connector(&self) -> Result<TlsConnector> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(path) = &self.config.tls.ca_file {
            let pem = std::fs::read(path)
                .map_err(|e| Error::upstream("reading cache CA file").with_source(e))?;
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                let cert = cert
                    .map_err(|e| Error::upstream("parsing cache CA file").with_source(e))?;
                roots
                    .add(cert)
                    .map_err(|e| Error::upstream("adding cache CA root").with_source(e))?;
            }
        }

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::internal("building cache tls config").with_source(e))?
        .with_root_certificates(roots)
        .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(config)))
    }

    async fn dial(&self) -> Result<Conn> {
        let tcp = TcpStream::connect(&self.config.addr)
            .await
            .map_err(|e| Error::upstream("cache unreachable").with_source(e))?;

        let mut conn: Conn = if self.config.tls.enabled {
            let connector = self.tls_connector()?;
            let server_name = ServerName::try_from(self.tls_server_name())
                .map_err(|e| Error::validation("invalid cache tls server name").with_source(e))?;
            let stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| Error::upstream("cache tls handshake failed").with_source(e))?;
            let boxed: Box<dyn CacheIo> = Box::new(stream);
            BufReader::new(boxed)
        } else {
            let boxed: Box<dyn CacheIo> = Box::new(tcp);
            BufReader::new(boxed)
        };

        if let Some(password) = &self.config.password {
            let reply = exchange(&mut conn, &[b"AUTH", password.as_bytes()]).await?;
            if let Value::Error(msg) = reply {
                return Err(Error::upstream(format!("cache auth failed: {msg}")));
            }
        }
        if self.config.db != 0 {
            let db = self.config.db.to_string();
            let reply = exchange(&mut conn, &[b"SELECT", db.as_bytes()]).await?;
            if let Value::Error(msg) = reply {
                return Err(Error::upstream(format!("cache select failed: {msg}")));
            }
        }
        Ok(conn)
    }

    async fn command(&self, args: &[&[u8]]) -> Result<Value> {
        let mut guard = self.conn.lock().await;

        let attempt = tokio::time::timeout(self.command_timeout(), async {
            if guard.is_none() {
                *guard = Some(self.dial().await?);
            }
            // The guard was just populated above when empty.
            let conn = guard.as_mut().expect("connection populated");
            exchange(conn, args).await
        })
        .await;

        match attempt {
            Ok(Ok(Value::Error(msg))) => {
                // A -error reply is a healthy connection; keep it.
                Err(Error::upstream(format!("cache rejected command: {msg}")))
            }
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                // Reset so the next call re-dials and re-runs AUTH/SELECT.
                *guard = None;
                tracing::debug!(error = %err, "cache connection reset");
                Err(err)
            }
            Err(_elapsed) => {
                *guard = None;
                tracing::debug!("cache connection reset after timeout");
                Err(Error::upstream("cache command timed out"))
            }
        }
    }
}

async fn exchange(conn: &mut Conn, args: &[&[u8]]) -> Result<Value> {
    let encoded = resp::encode_command(args);
    conn.get_mut()
        .write_all(&encoded)
        .await
        .map_err(|e| Error::upstream("cache write failed").with_source(e))?;
    resp::read_value(conn)
        .await
        .map_err(|e| Error::upstream("cache read failed").with_source(e))
}

fn unexpected(command: &str, value: &Value) -> Error {
    Error::internal(format!("unexpected cache reply to {command}: {value:?}"))
}
