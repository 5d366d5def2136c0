//! Low-level FTP command/response codec (RFC 959 §4).
//!
//! Handles:
//! - Sending FTP commands terminated with `\r\n`
//! - Reading single-line and multi-line replies
//! - Parsing the 3-digit reply code
//! - Reporting every line to the session transcript, with passwords masked
//! - Aborting any pending read or write when the connection is interrupted

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::FtpResponse;
use skiff_core::listener::TranscriptListener;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Run `fut` unless the token fires or `limit` elapses first.
pub(crate) async fn guarded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    fut: F,
) -> FtpResult<T>
where
    F: Future<Output = FtpResult<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(FtpError::cancelled()),
        result = tokio::time::timeout(limit, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(FtpError::timeout(format!("No reply within {}s", limit.as_secs()))),
        },
    }
}

/// Line as it may appear in logs and transcripts.
fn masked(cmd: &str) -> String {
    match cmd.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("PASS ") => "PASS ********".to_string(),
        _ => cmd.to_string(),
    }
}

/// The FTP command/response codec operating on split halves.
pub struct FtpCodec {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    transcript: Arc<dyn TranscriptListener>,
    cancel: CancellationToken,
    timeout: Duration,
    /// Compare reply codes exactly instead of by their first digit.
    strict: bool,
}

impl FtpCodec {
    pub fn new(
        stream: TcpStream,
        transcript: Arc<dyn TranscriptListener>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: BufReader::new(rd),
            writer: wr,
            transcript,
            cancel,
            timeout,
            strict: false,
        }
    }

    pub fn set_strict_return_codes(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a raw FTP command (without trailing CRLF).
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let line = format!("{}\r\n", cmd);
        let writer = &mut self.writer;
        guarded(&self.cancel, self.timeout, async move {
            writer.write_all(line.as_bytes()).await?;
            Ok::<_, FtpError>(())
        })
        .await?;
        let shown = masked(cmd);
        log::trace!(">>> {}", shown);
        self.transcript.log(true, &shown);
        Ok(())
    }

    /// Read a single line from the control channel, without CRLF.
    async fn read_line(&mut self) -> FtpResult<String> {
        let mut buf = String::new();
        let reader = &mut self.reader;
        let n = guarded(&self.cancel, self.timeout, async {
            Ok::<_, FtpError>(reader.read_line(&mut buf).await?)
        })
        .await?;
        if n == 0 {
            return Err(FtpError::null_reply("Server closed connection"));
        }
        let line = buf.trim_end_matches(['\r', '\n']).to_string();
        self.transcript.log(false, &line);
        Ok(line)
    }

    /// Read a complete FTP response (possibly multi-line).
    ///
    /// Multi-line responses look like:
    /// ```text
    /// 220-Welcome to my FTP server
    /// 220-This is line 2
    /// 220 End of greeting
    /// ```
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;
        let mut lines = vec![first];

        // "NNN-" means more lines follow until "NNN " is seen.
        let is_multi = lines[0].as_bytes().get(3) == Some(&b'-');
        if is_multi {
            let terminator = format!("{} ", code);
            loop {
                let next = self.read_line().await?;
                let done = next.starts_with(&terminator) || next == code.to_string();
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let resp = FtpResponse { code, lines };
        log::trace!("<<< {} {}", resp.code, resp.message());
        Ok(resp)
    }

    /// Send a command and return the response.
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Check `resp` against the accepted codes. Strict mode requires one of
    /// the exact codes, otherwise the first digit decides.
    pub fn validate(&self, resp: FtpResponse, accepted: &[u16]) -> FtpResult<FtpResponse> {
        let ok = if self.strict {
            accepted.contains(&resp.code)
        } else {
            accepted.iter().any(|c| c / 100 == resp.code / 100)
        };
        if ok {
            Ok(resp)
        } else {
            Err(FtpError::from_reply(resp.code, resp.message()))
        }
    }

    /// Send a command and require one of `accepted` in the reply.
    pub async fn expect(&mut self, cmd: &str, accepted: &[u16]) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        self.validate(resp, accepted)
    }

    /// Expect any 2xx reply, regardless of strictness.
    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        if resp.is_success() {
            Ok(resp)
        } else {
            Err(FtpError::from_reply(resp.code, resp.message()))
        }
    }

    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Parse the 3-digit reply code from the start of a line.
fn parse_code(line: &str) -> FtpResult<u16> {
    line.get(..3)
        .and_then(|c| c.parse::<u16>().ok())
        .filter(|c| (100..600).contains(c))
        .ok_or_else(|| FtpError::protocol_error(format!("Invalid reply code in: '{}'", line)))
}
