//! Stateful FTP client: owns the control connection and issues commands.
//!
//! Lifecycle: `connect()` → `login()` → probing (`SYST`, `FEAT`, `PWD`) →
//! listing and file commands. Every call honours the connection timeout and
//! aborts as soon as the cancellation token handed to `connect` fires.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{guarded, FtpCodec};
use crate::ftp::transfer::{self, open_data_channel};
use crate::ftp::types::*;
use chrono::{NaiveDateTime, TimeZone, Utc};
use skiff_core::listener::TranscriptListener;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// A connected FTP control channel.
pub struct FtpClient {
    codec: FtpCodec,
    mode: DataChannelMode,
    peer_ip: IpAddr,
    local_ip: IpAddr,
    banner: String,
    features: Option<ServerFeatures>,
}

impl FtpClient {
    /// Dial `hostname:port` and read the greeting.
    pub async fn connect(
        hostname: &str,
        port: u16,
        transcript: Arc<dyn TranscriptListener>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> FtpResult<Self> {
        if hostname.is_empty() {
            return Err(FtpError::connection_failed("Host must not be empty"));
        }
        let target = format!("{}:{}", hostname, port);
        let stream = guarded(&cancel, timeout, async {
            TcpStream::connect(&target)
                .await
                .map_err(|e| FtpError::connection_failed(format!("{}: {}", target, e)))
        })
        .await?;
        let peer_ip = stream.peer_addr()?.ip();
        let local_ip = stream.local_addr()?.ip();
        log::debug!("Control connection to {} established", target);

        let mut codec = FtpCodec::new(stream, transcript, cancel, timeout);
        let greeting = codec.read_response().await?;
        if greeting.code == 120 {
            // Service ready in nnn minutes; the real greeting follows.
            let ready = codec.read_response().await?;
            return Self::accept_greeting(codec, ready, peer_ip, local_ip);
        }
        Self::accept_greeting(codec, greeting, peer_ip, local_ip)
    }

    fn accept_greeting(
        codec: FtpCodec,
        greeting: FtpResponse,
        peer_ip: IpAddr,
        local_ip: IpAddr,
    ) -> FtpResult<Self> {
        if greeting.code != 220 {
            return Err(FtpError::from_reply(greeting.code, greeting.message()));
        }
        Ok(Self {
            codec,
            mode: DataChannelMode::default(),
            peer_ip,
            local_ip,
            banner: greeting.text(),
            features: None,
        })
    }

    pub fn banner(&self) -> &str {
        &self.banner
    }

    pub fn mode(&self) -> DataChannelMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DataChannelMode) {
        self.mode = mode;
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.codec.set_strict_return_codes(strict);
    }

    pub fn peer_ip(&self) -> IpAddr {
        self.peer_ip
    }

    // ─── Authentication ─────────────────────────────────────────

    pub async fn login(&mut self, username: &str, password: &str) -> FtpResult<()> {
        let user = self.codec.execute(&format!("USER {}", username)).await?;
        match user.code {
            230 | 202 => return Ok(()),
            331 | 332 => {}
            code => return Err(Self::rejected_login(code, user.message())),
        }
        let pass = self.codec.execute(&format!("PASS {}", password)).await?;
        match pass.code {
            230 | 202 => Ok(()),
            code => Err(Self::rejected_login(code, pass.message())),
        }
    }

    fn rejected_login(code: u16, message: &str) -> FtpError {
        if code == 421 {
            return FtpError::from_reply(code, message);
        }
        FtpError::auth_failed(format!("Login failed: {}", message)).with_code(code)
    }

    // ─── Probing ────────────────────────────────────────────────

    /// Operating system as reported by `SYST`. `None` when the server does
    /// not implement the command.
    pub async fn system(&mut self) -> FtpResult<Option<String>> {
        let resp = self.codec.execute("SYST").await?;
        if resp.is_success() {
            Ok(Some(resp.message().to_string()))
        } else {
            log::debug!("SYST not supported: {}", resp.text());
            Ok(None)
        }
    }

    /// Extensions announced by `FEAT`, queried once per connection.
    pub async fn feat(&mut self) -> FtpResult<ServerFeatures> {
        if let Some(ref features) = self.features {
            return Ok(features.clone());
        }
        let resp = self.codec.execute("FEAT").await?;
        let features = if resp.is_success() {
            ServerFeatures::from_lines(&resp.lines)
        } else {
            ServerFeatures::default()
        };
        self.features = Some(features.clone());
        Ok(features)
    }

    /// Switch the control channel to UTF-8.
    pub async fn utf8(&mut self) -> FtpResult<()> {
        self.codec.expect("OPTS UTF8 ON", &[200, 202]).await?;
        Ok(())
    }

    pub async fn noop(&mut self) -> FtpResult<()> {
        self.codec.expect("NOOP", &[200]).await?;
        Ok(())
    }

    // ─── Navigation ─────────────────────────────────────────────

    pub async fn pwd(&mut self) -> FtpResult<String> {
        let resp = self.codec.expect("PWD", &[257]).await?;
        parse_pwd(&resp.lines.join(" "))
    }

    pub async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect(&format!("CWD {}", path), &[250]).await?;
        Ok(())
    }

    // ─── Listing ────────────────────────────────────────────────

    /// Listing sent over the control channel in reply to `STAT path`.
    pub async fn stat_list(&mut self, path: &str) -> FtpResult<Vec<String>> {
        let resp = self
            .codec
            .expect(&format!("STAT {}", path), &[211, 212, 213])
            .await?;
        if resp.lines.len() < 3 {
            return Ok(Vec::new());
        }
        let body = &resp.lines[1..resp.lines.len() - 1];
        Ok(body
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// `LIST path` over a data connection.
    pub async fn list(&mut self, path: &str) -> FtpResult<Vec<String>> {
        let cmd = if path.is_empty() {
            "LIST".to_string()
        } else {
            format!("LIST {}", path)
        };
        let data = self.transfer_in(&cmd).await?;
        Ok(String::from_utf8_lossy(&data)
            .lines()
            .map(|l| l.trim_end().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Modification time in UTC epoch milliseconds (`MDTM`, RFC 3659).
    pub async fn mdtm(&mut self, path: &str) -> FtpResult<i64> {
        let resp = self.codec.expect(&format!("MDTM {}", path), &[213]).await?;
        parse_mdtm(resp.message())
    }

    pub async fn size(&mut self, path: &str) -> FtpResult<i64> {
        self.binary().await?;
        let resp = self.codec.expect(&format!("SIZE {}", path), &[213]).await?;
        resp.message()
            .trim()
            .parse::<i64>()
            .map_err(|_| FtpError::protocol_error(format!("Invalid SIZE reply: {}", resp.text())))
    }

    // ─── Mutations ──────────────────────────────────────────────

    pub async fn mkd(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect(&format!("MKD {}", path), &[257]).await?;
        Ok(())
    }

    pub async fn rmd(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect(&format!("RMD {}", path), &[250]).await?;
        Ok(())
    }

    pub async fn dele(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect(&format!("DELE {}", path), &[250]).await?;
        Ok(())
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        self.codec.expect(&format!("RNFR {}", from), &[350]).await?;
        self.codec.expect(&format!("RNTO {}", to), &[250]).await?;
        Ok(())
    }

    /// `SITE` sub-command, e.g. `CHMOD 644 file`.
    pub async fn site(&mut self, command: &str) -> FtpResult<FtpResponse> {
        self.codec.expect(&format!("SITE {}", command), &[200, 202]).await
    }

    /// Send an arbitrary command and return the reply unchecked.
    pub async fn quote(&mut self, command: &str) -> FtpResult<FtpResponse> {
        self.codec.execute(command).await
    }

    // ─── Transfers ──────────────────────────────────────────────

    pub async fn retrieve(&mut self, path: &str) -> FtpResult<Vec<u8>> {
        self.binary().await?;
        self.transfer_in(&format!("RETR {}", path)).await
    }

    pub async fn store(&mut self, path: &str, data: &[u8], append: bool) -> FtpResult<()> {
        self.binary().await?;
        let verb = if append { "APPE" } else { "STOR" };
        self.transfer_out(&format!("{} {}", verb, path), data).await
    }

    async fn binary(&mut self) -> FtpResult<()> {
        self.codec.expect("TYPE I", &[200]).await?;
        Ok(())
    }

    async fn transfer_in(&mut self, cmd: &str) -> FtpResult<Vec<u8>> {
        let channel = open_data_channel(&mut self.codec, self.mode, self.peer_ip, self.local_ip).await?;
        self.codec.expect(cmd, &[125, 150]).await?;
        let tcp = channel.establish(&self.codec).await?;
        let data = transfer::read_all(&self.codec, tcp).await?;
        let done = self.codec.read_response().await?;
        self.codec.validate(done, &[226, 250])?;
        log::debug!("{}: received {} bytes", cmd, data.len());
        Ok(data)
    }

    async fn transfer_out(&mut self, cmd: &str, data: &[u8]) -> FtpResult<()> {
        let channel = open_data_channel(&mut self.codec, self.mode, self.peer_ip, self.local_ip).await?;
        self.codec.expect(cmd, &[125, 150]).await?;
        let tcp = channel.establish(&self.codec).await?;
        transfer::write_all(&self.codec, tcp, data).await?;
        let done = self.codec.read_response().await?;
        self.codec.validate(done, &[226, 250])?;
        log::debug!("{}: sent {} bytes", cmd, data.len());
        Ok(())
    }

    // ─── Teardown ───────────────────────────────────────────────

    /// Say goodbye and close the control connection.
    pub async fn quit(&mut self) -> FtpResult<()> {
        let result = self.codec.expect("QUIT", &[221]).await.map(|_| ());
        self.codec.shutdown().await;
        result
    }
}

/// Extract the quoted directory from a `257 "/path" is current directory`
/// reply. Embedded quotes are doubled per RFC 959.
pub(crate) fn parse_pwd(text: &str) -> FtpResult<String> {
    let start = text
        .find('"')
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PWD: {}", text)))?;
    let rest = &text[start + 1..];
    let mut out = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                out.push('"');
                chars.next();
                continue;
            }
            return Ok(out);
        }
        out.push(c);
    }
    Err(FtpError::protocol_error(format!("Unterminated PWD path: {}", text)))
}

/// `YYYYMMDDHHMMSS[.sss]` in UTC to epoch milliseconds.
pub(crate) fn parse_mdtm(text: &str) -> FtpResult<i64> {
    let text = text.trim();
    let invalid = || FtpError::protocol_error(format!("Invalid MDTM timestamp: {}", text));
    let base = text.get(..14).ok_or_else(invalid)?;
    let naive = NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S").map_err(|_| invalid())?;
    let mut millis = Utc.from_utc_datetime(&naive).timestamp_millis();
    if let Some(fraction) = text.get(15..).filter(|f| !f.is_empty()) {
        let digits: String = fraction.chars().take(3).collect();
        let scale = 10i64.pow(3 - digits.len() as u32);
        millis += digits.parse::<i64>().map_err(|_| invalid())? * scale;
    }
    Ok(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pwd_reply() {
        assert_eq!(parse_pwd("257 \"/\" is current directory").unwrap(), "/");
        assert_eq!(parse_pwd("257 \"/home/a\"\"b\"").unwrap(), "/home/a\"b");
        assert!(parse_pwd("257 no quotes").is_err());
    }

    #[test]
    fn mdtm_reply() {
        assert_eq!(parse_mdtm("20231114221320").unwrap(), 1_700_000_000_000);
        assert_eq!(parse_mdtm("20231114221320.25").unwrap(), 1_700_000_000_250);
        assert!(parse_mdtm("2023").is_err());
    }
}
