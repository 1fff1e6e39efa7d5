//! SCPI over TCP communication.
//!
//! Provides an async SCPI client for the bench's analyzer and generator
//! (raw socket, port 5025) plus a scripted transport for tests. Sessions talk
//! to [`ScpiTransport`] so either can be injected.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default raw-socket SCPI port
pub const DEFAULT_PORT: u16 = 5025;

/// Default command timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Command channel to one instrument.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query and read the trimmed response line.
    async fn query(&self, query: &str) -> Result<String>;

    /// Shut the connection down.
    async fn close(&self) -> Result<()>;

    /// Query a floating-point value.
    async fn query_f64(&self, query: &str) -> Result<f64> {
        let response = self.query(query).await?;
        response.trim().parse::<f64>().with_context(|| {
            format!(
                "Failed to parse '{}' as f64 from query: {}",
                response, query
            )
        })
    }

    /// Query an integer value.
    async fn query_u32(&self, query: &str) -> Result<u32> {
        let response = self.query(query).await?;
        response.trim().parse::<u32>().with_context(|| {
            format!(
                "Failed to parse '{}' as integer from query: {}",
                response, query
            )
        })
    }

    /// Append `*OPC?` to `command` and wait for completion.
    async fn write_and_wait(&self, command: &str) -> Result<()> {
        let response = self.query(&format!("{};*OPC?", command)).await?;
        if response.trim() != "1" {
            anyhow::bail!("Unexpected completion reply '{}' to: {}", response, command);
        }
        Ok(())
    }
}

/// Connection state behind the client's lock.
struct Link<S> {
    reader: BufReader<S>,
    /// Replies still due for queries that timed out
    owed: usize,
}

/// Async SCPI client for TCP communication
///
/// Every query yields exactly one response line. When a query times out its
/// reply may still arrive later; the client counts such replies and discards
/// them before the next command so a late answer is never read as the
/// response to a different query.
pub struct ScpiClient<S = TcpStream> {
    link: Mutex<Link<S>>,
    peer: String,
    timeout: Duration,
}

impl ScpiClient<TcpStream> {
    /// Connect to `host:port`, giving up after `timeout_ms`.
    pub async fn connect(host: &str, port: u16, timeout_ms: u64) -> Result<Self> {
        let peer = format!("{}:{}", host, port);
        let io_timeout = Duration::from_millis(timeout_ms);

        let stream = timeout(io_timeout, TcpStream::connect((host, port)))
            .await
            .with_context(|| format!("Connection timeout to {}", peer))?
            .with_context(|| format!("Failed to connect to {}", peer))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        tracing::info!("Connected to instrument at {}", peer);

        Ok(Self::from_stream(stream, peer, io_timeout))
    }
}

impl<S> ScpiClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream.
    pub fn from_stream(stream: S, peer: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            link: Mutex::new(Link {
                reader: BufReader::new(stream),
                owed: 0,
            }),
            peer: peer.into(),
            timeout: io_timeout,
        }
    }

    /// Address this client is connected to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn send_line(link: &mut Link<S>, line: &str) -> Result<()> {
        let cmd = format!("{}\n", line);
        link.reader
            .get_mut()
            .write_all(cmd.as_bytes())
            .await
            .with_context(|| format!("Failed to write command: {}", line))?;
        link.reader
            .get_mut()
            .flush()
            .await
            .context("Failed to flush stream")
    }

    /// Read and drop replies owed by earlier timed-out queries.
    async fn discard_late_replies(&self, link: &mut Link<S>) -> Result<()> {
        while link.owed > 0 {
            let mut stale = String::new();
            match timeout(self.timeout, link.reader.read_line(&mut stale)).await {
                Ok(Ok(0)) => anyhow::bail!("Connection closed by {}", self.peer),
                Ok(Ok(_)) => {
                    link.owed -= 1;
                    tracing::warn!(
                        peer = %self.peer,
                        "Discarded late SCPI response: {:?}",
                        stale.trim()
                    );
                }
                Ok(Err(e)) => return Err(e).context("Failed to read late response"),
                Err(_) => anyhow::bail!(
                    "{} still owes {} response(s) to timed-out queries",
                    self.peer,
                    link.owed
                ),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S> ScpiTransport for ScpiClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&self, command: &str) -> Result<()> {
        let mut link = self.link.lock().await;
        self.discard_late_replies(&mut link).await?;
        tracing::debug!(peer = %self.peer, "SCPI write: {:?}", command);
        Self::send_line(&mut link, command).await
    }

    async fn query(&self, query: &str) -> Result<String> {
        let mut link = self.link.lock().await;
        self.discard_late_replies(&mut link).await?;
        tracing::debug!(peer = %self.peer, "SCPI query: {:?}", query);
        Self::send_line(&mut link, query).await?;

        let mut response = String::new();
        match timeout(self.timeout, link.reader.read_line(&mut response)).await {
            Ok(Ok(0)) => anyhow::bail!("Connection closed by {}", self.peer),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::debug!(peer = %self.peer, "SCPI response: {:?}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(e).context("Failed to read response"),
            Err(_) => {
                // the reply may still arrive; any part already read is lost
                // and its tail is discarded as one line
                link.owed += 1;
                anyhow::bail!("Timeout waiting for response to: {}", query)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        link.reader
            .get_mut()
            .shutdown()
            .await
            .with_context(|| format!("Failed to close connection to {}", self.peer))?;
        tracing::info!("Closed connection to {}", self.peer);
        Ok(())
    }
}

/// Scripted transport for testing without hardware.
///
/// Every write and query is appended to a shared log. Queries are answered
/// from a reply table; `*OPC?` completions and `*IDN?` answer by default.
#[derive(Clone, Default)]
pub struct MockScpiTransport {
    log: Arc<Mutex<Vec<String>>>,
    replies: Arc<Mutex<HashMap<String, String>>>,
}

impl MockScpiTransport {
    /// Create a new mock transport with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` with `reply`.
    pub async fn reply(&self, query: &str, reply: &str) {
        self.replies
            .lock()
            .await
            .insert(query.to_string(), reply.to_string());
    }

    /// Every command and query seen so far, in order.
    pub async fn log(&self) -> Vec<String> {
        self.log.lock().await.clone()
    }
}

#[async_trait]
impl ScpiTransport for MockScpiTransport {
    async fn write(&self, command: &str) -> Result<()> {
        tracing::debug!("Mock SCPI write: {}", command);
        self.log.lock().await.push(command.to_string());
        Ok(())
    }

    async fn query(&self, query: &str) -> Result<String> {
        tracing::debug!("Mock SCPI query: {}", query);
        self.log.lock().await.push(query.to_string());
        if let Some(reply) = self.replies.lock().await.get(query) {
            return Ok(reply.clone());
        }
        if query.ends_with("*OPC?") {
            return Ok("1".to_string());
        }
        if query == "*IDN?" {
            return Ok("Rohde&Schwarz,MOCK,000000,0.0.0".to_string());
        }
        anyhow::bail!("Unknown mock query: {}", query)
    }

    async fn close(&self) -> Result<()> {
        self.log.lock().await.push("<close>".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_traffic_in_order() {
        let vsa = MockScpiTransport::new();
        vsa.write(":INP:ATT 10").await.unwrap();
        vsa.write_and_wait("INIT:IMM").await.unwrap();
        assert_eq!(vsa.log().await, vec![":INP:ATT 10", "INIT:IMM;*OPC?"]);
    }

    #[tokio::test]
    async fn mock_parses_scripted_replies() {
        let vsg = MockScpiTransport::new();
        vsg.reply(":SOURce1:BB:EUTRa:UL:NORB?", "25").await;
        vsg.reply(":FETC:CC1:SUMM:EVM:ALL:AVER?", "-41.7").await;
        assert_eq!(vsg.query_u32(":SOURce1:BB:EUTRa:UL:NORB?").await.unwrap(), 25);
        assert_eq!(vsg.query_f64(":FETC:CC1:SUMM:EVM:ALL:AVER?").await.unwrap(), -41.7);
        assert!(vsg.query(":UNKNOWN?").await.is_err());
    }

    /// Instrument side of a duplex pipe: answers each query line in order,
    /// holding back the first reply until `late_by` has elapsed.
    fn spawn_slow_instrument(
        stream: tokio::io::DuplexStream,
        replies: Vec<&'static str>,
        late_by: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream);
            for (i, reply) in replies.into_iter().enumerate() {
                let mut query = String::new();
                if lines.read_line(&mut query).await.unwrap_or(0) == 0 {
                    return;
                }
                if i == 0 {
                    tokio::time::sleep(late_by).await;
                }
                let _ = lines.get_mut().write_all(format!("{}\n", reply).as_bytes()).await;
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_is_not_read_by_next_query() {
        let (ours, theirs) = tokio::io::duplex(1024);
        let instrument = spawn_slow_instrument(theirs, vec!["1", "-41.7"], Duration::from_secs(15));
        let client = ScpiClient::from_stream(ours, "duplex", Duration::from_secs(10));

        let err = client.write_and_wait("INIT:IMM").await.unwrap_err();
        assert!(err.to_string().contains("Timeout"));

        let evm = client.query_f64(":FETC:CC1:SUMM:EVM:ALL:AVER?").await.unwrap();
        assert_eq!(evm, -41.7);
        instrument.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_late_reply_fails_next_call() {
        let (ours, theirs) = tokio::io::duplex(1024);
        let _instrument =
            spawn_slow_instrument(theirs, vec!["1", "-41.7"], Duration::from_secs(3600));
        let client = ScpiClient::from_stream(ours, "duplex", Duration::from_secs(10));

        assert!(client.write_and_wait("INIT:IMM").await.is_err());
        let err = client.query(":FETC:CC1:SUMM:EVM:ALL:AVER?").await.unwrap_err();
        assert!(err.to_string().contains("owes 1 response"));
    }

    #[tokio::test]
    async fn completion_reply_must_be_one() {
        let vsa = MockScpiTransport::new();
        vsa.reply("*RST;*OPC?", "0").await;
        assert!(vsa.write_and_wait("*RST").await.is_err());
    }
}
