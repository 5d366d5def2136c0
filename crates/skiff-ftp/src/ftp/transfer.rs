//! Data-channel management for FTP transfers.
//!
//! Supports four modes (RFC 959 + RFC 2428):
//! - **PASV**: server opens a port, client connects
//! - **EPSV**: extended passive (IPv6-ready)
//! - **PORT**: client opens a port, tells server
//! - **EPRT**: extended active (IPv6-ready)
//!
//! Active modes return a [`DataChannel::Pending`] listener; the connection
//! is accepted only after the transfer command went out.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{guarded, FtpCodec};
use crate::ftp::types::DataChannelMode;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub enum DataChannel {
    Connected(TcpStream),
    /// Active mode: waiting for the server to connect back.
    Pending(TcpListener),
}

impl DataChannel {
    /// Resolve into a connected stream.
    pub async fn establish(self, codec: &FtpCodec) -> FtpResult<TcpStream> {
        match self {
            DataChannel::Connected(tcp) => Ok(tcp),
            DataChannel::Pending(listener) => {
                guarded(codec.cancel_token(), codec.timeout(), async {
                    let (tcp, _) = listener
                        .accept()
                        .await
                        .map_err(|e| FtpError::data_channel(format!("Data accept: {}", e)))?;
                    Ok::<_, FtpError>(tcp)
                })
                .await
            }
        }
    }
}

/// Open a data channel according to `mode`. `control_ip` is the peer
/// address of the control connection.
pub async fn open_data_channel(
    codec: &mut FtpCodec,
    mode: DataChannelMode,
    control_ip: IpAddr,
    local_ip: IpAddr,
) -> FtpResult<DataChannel> {
    match mode {
        DataChannelMode::Passive => open_pasv(codec, control_ip).await.map(DataChannel::Connected),
        DataChannelMode::ExtendedPassive => {
            open_epsv(codec, control_ip).await.map(DataChannel::Connected)
        }
        DataChannelMode::Active => open_port(codec, local_ip).await.map(DataChannel::Pending),
        DataChannelMode::ExtendedActive => {
            open_eprt(codec, local_ip).await.map(DataChannel::Pending)
        }
    }
}

async fn connect(codec: &FtpCodec, addr: SocketAddr, label: &str) -> FtpResult<TcpStream> {
    guarded(codec.cancel_token(), codec.timeout(), async {
        TcpStream::connect(addr)
            .await
            .map_err(|e| FtpError::data_channel(format!("{} data connect to {}: {}", label, addr, e)))
    })
    .await
}

// ─── PASV ────────────────────────────────────────────────────────────

/// Issue `PASV`, parse the response, connect to the returned address.
///
/// Response format: `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
async fn open_pasv(codec: &mut FtpCodec, control_ip: IpAddr) -> FtpResult<TcpStream> {
    let resp = codec.expect("PASV", &[227]).await?;
    let mut addr = parse_pasv_response(&resp.text())?;
    // Servers behind NAT often announce a private address.
    if addr.ip().is_unspecified() || (is_private(addr.ip()) && !is_private(control_ip)) {
        log::debug!("Ignoring PASV address {} in favour of {}", addr.ip(), control_ip);
        addr.set_ip(control_ip);
    }
    connect(codec, addr, "PASV").await
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 response.
pub(crate) fn parse_pasv_response(text: &str) -> FtpResult<SocketAddr> {
    let re = Regex::new(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)")
        .map_err(|e| FtpError::protocol_error(e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV: {}", text)))?;

    let nums: Vec<u8> = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::protocol_error("PASV number out of range"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = (nums[4] as u16) * 256 + (nums[5] as u16);
    Ok(SocketAddr::new(ip, port))
}

// ─── EPSV ────────────────────────────────────────────────────────────

/// Issue `EPSV`, parse port, connect to the *same host* on that port.
///
/// Response format: `229 Entering Extended Passive Mode (|||port|)`
async fn open_epsv(codec: &mut FtpCodec, control_ip: IpAddr) -> FtpResult<TcpStream> {
    let resp = codec.expect("EPSV", &[229]).await?;
    let port = parse_epsv_response(&resp.text())?;
    connect(codec, SocketAddr::new(control_ip, port), "EPSV").await
}

pub(crate) fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    let re = Regex::new(r"\|\|\|(\d+)\|").map_err(|e| FtpError::protocol_error(e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse EPSV: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error("EPSV port out of range"))
}

// ─── PORT / EPRT ─────────────────────────────────────────────────────

async fn bind_local(local_ip: IpAddr) -> FtpResult<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(SocketAddr::new(local_ip, 0))
        .await
        .map_err(|e| FtpError::data_channel(format!("Data bind: {}", e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| FtpError::data_channel(format!("Data local_addr: {}", e)))?;
    Ok((listener, local))
}

/// Bind a local TCP listener and tell the server via `PORT`.
async fn open_port(codec: &mut FtpCodec, local_ip: IpAddr) -> FtpResult<TcpListener> {
    let (listener, local) = bind_local(local_ip).await?;
    let octets = match local.ip() {
        IpAddr::V4(v4) => v4.octets(),
        _ => return Err(FtpError::data_channel("PORT requires IPv4")),
    };
    let port = local.port();
    let cmd = format!(
        "PORT {},{},{},{},{},{}",
        octets[0],
        octets[1],
        octets[2],
        octets[3],
        port / 256,
        port % 256
    );
    codec.expect(&cmd, &[200]).await?;
    Ok(listener)
}

/// Bind a local listener and tell the server via `EPRT |af|ip|port|`.
async fn open_eprt(codec: &mut FtpCodec, local_ip: IpAddr) -> FtpResult<TcpListener> {
    let (listener, local) = bind_local(local_ip).await?;
    let af = match local.ip() {
        IpAddr::V4(_) => 1,
        IpAddr::V6(_) => 2,
    };
    let cmd = format!("EPRT |{}|{}|{}|", af, local.ip(), local.port());
    codec.expect(&cmd, &[200]).await?;
    Ok(listener)
}

// ─── Payload helpers ─────────────────────────────────────────────────

pub async fn read_all(codec: &FtpCodec, mut tcp: TcpStream) -> FtpResult<Vec<u8>> {
    let mut buf = Vec::new();
    guarded(codec.cancel_token(), codec.timeout(), async {
        tcp.read_to_end(&mut buf).await?;
        Ok::<_, FtpError>(())
    })
    .await?;
    Ok(buf)
}

pub async fn write_all(codec: &FtpCodec, mut tcp: TcpStream, data: &[u8]) -> FtpResult<()> {
    guarded(codec.cancel_token(), codec.timeout(), async {
        tcp.write_all(data).await?;
        tcp.shutdown().await?;
        Ok::<_, FtpError>(())
    })
    .await
}
