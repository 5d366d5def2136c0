//! Scripted FTP server on a loopback socket.

#![allow(dead_code)]

use chrono_tz::Tz;
use skiff_core::date::FixedClock;
use skiff_core::host::Credentials;
use skiff_core::{Host, Preferences, Protocol, SessionContext};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

/// 2023-11-14T22:13:20Z
pub const NOW: i64 = 1_700_000_000_000;

#[derive(Clone)]
pub struct ServerConfig {
    pub users: Vec<(String, String)>,
    pub pwd: String,
    /// Full `SYST` reply line.
    pub syst: String,
    pub listing: Vec<String>,
    pub stat_supported: bool,
    /// Path → `MDTM` timestamp.
    pub mdtm: BTreeMap<String, String>,
    /// Commands (by verb) the server never answers.
    pub hang_on: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            users: vec![("alice".into(), "secret".into())],
            pwd: "/".into(),
            syst: "215 UNIX Type: L8".into(),
            listing: Vec::new(),
            stat_supported: true,
            mdtm: BTreeMap::new(),
            hang_on: None,
        }
    }
}

pub struct ServerState {
    config: ServerConfig,
    commands: Mutex<Vec<String>>,
    connections: AtomicUsize,
    /// Next `n` NOOPs answer 421 and drop the connection.
    noop_failures: AtomicUsize,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl ServerState {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(verb))
            .count()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn fail_next_noops(&self, n: usize) {
        self.noop_failures.store(n, Ordering::SeqCst);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.files.lock().unwrap().insert(path.to_string(), data.to_vec());
    }
}

pub struct MockFtpServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
}

impl MockFtpServer {
    pub async fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState {
            config,
            commands: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            noop_failures: AtomicUsize::new(0),
            files: Mutex::new(BTreeMap::new()),
        });
        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, shared.clone()));
            }
        });
        Self { addr, state }
    }

    pub fn host(&self) -> Host {
        Host::new(Protocol::Ftp, "127.0.0.1")
            .with_port(self.addr.port())
            .with_credentials(Credentials::new("alice", "secret"))
    }
}

pub fn context(preferences: Preferences) -> SessionContext {
    SessionContext::default()
        .with_preferences(preferences)
        .with_clock(Arc::new(FixedClock::new(NOW)))
}

pub fn preferences(configure: impl FnOnce(&mut Preferences)) -> Preferences {
    let mut preferences = Preferences::default();
    preferences.ftp_timezone_default = Tz::UTC.name().to_string();
    configure(&mut preferences);
    preferences
}

enum DataEndpoint {
    Passive(TcpListener),
    Active(SocketAddr),
}

async fn open_data(endpoint: Option<DataEndpoint>) -> Option<TcpStream> {
    match endpoint? {
        DataEndpoint::Passive(listener) => listener.accept().await.ok().map(|(s, _)| s),
        DataEndpoint::Active(addr) => TcpStream::connect(addr).await.ok(),
    }
}

async fn reply(writer: &mut OwnedWriteHalf, text: &str) {
    let _ = writer.write_all(format!("{}\r\n", text).as_bytes()).await;
}

async fn serve(stream: TcpStream, state: Arc<ServerState>) {
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();
    let mut user = String::new();
    let mut pwd = state.config.pwd.clone();
    let mut data: Option<DataEndpoint> = None;
    reply(&mut wr, "220 mock ready").await;

    while let Ok(Some(line)) = lines.next_line().await {
        state.commands.lock().unwrap().push(line.clone());
        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_uppercase(), a.to_string()),
            None => (line.to_uppercase(), String::new()),
        };
        if state.config.hang_on.as_deref() == Some(verb.as_str()) {
            continue;
        }
        match verb.as_str() {
            "USER" => {
                user = arg;
                reply(&mut wr, "331 Password required").await;
            }
            "PASS" => {
                let valid = state.config.users.iter().any(|(u, p)| *u == user && *p == arg);
                if valid {
                    reply(&mut wr, "230 Logged in").await;
                } else {
                    reply(&mut wr, "530 Login incorrect").await;
                }
            }
            "SYST" => reply(&mut wr, &state.config.syst).await,
            "OPTS" => reply(&mut wr, "200 UTF8 set to on").await,
            "PWD" => reply(&mut wr, &format!("257 \"{}\" is current directory", pwd)).await,
            "CWD" => {
                pwd = arg;
                reply(&mut wr, "250 Directory changed").await;
            }
            "NOOP" => {
                let failing = state
                    .noop_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failing {
                    reply(&mut wr, "421 Service not available, closing control connection").await;
                    return;
                }
                reply(&mut wr, "200 NOOP ok").await;
            }
            "TYPE" => reply(&mut wr, "200 Type set").await,
            "STAT" if state.config.stat_supported => {
                let mut text = format!("211-Status of {}:\r\n", arg);
                for entry in &state.config.listing {
                    text.push_str(&format!(" {}\r\n", entry));
                }
                text.push_str("211 End of status");
                reply(&mut wr, &text).await;
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();
                data = Some(DataEndpoint::Passive(listener));
                reply(
                    &mut wr,
                    &format!("227 Entering Passive Mode (127,0,0,1,{},{})", port / 256, port % 256),
                )
                .await;
            }
            "PORT" => {
                let n: Vec<u16> = arg.split(',').filter_map(|s| s.trim().parse().ok()).collect();
                let addr: SocketAddr =
                    format!("{}.{}.{}.{}:{}", n[0], n[1], n[2], n[3], n[4] * 256 + n[5])
                        .parse()
                        .unwrap();
                data = Some(DataEndpoint::Active(addr));
                reply(&mut wr, "200 PORT command successful").await;
            }
            "LIST" => {
                reply(&mut wr, "150 Opening data connection").await;
                if let Some(mut tcp) = open_data(data.take()).await {
                    let body: String =
                        state.config.listing.iter().map(|l| format!("{}\r\n", l)).collect();
                    let _ = tcp.write_all(body.as_bytes()).await;
                    let _ = tcp.shutdown().await;
                }
                reply(&mut wr, "226 Transfer complete").await;
            }
            "RETR" => match state.file(&arg) {
                Some(content) => {
                    reply(&mut wr, "150 Opening data connection").await;
                    if let Some(mut tcp) = open_data(data.take()).await {
                        let _ = tcp.write_all(&content).await;
                        let _ = tcp.shutdown().await;
                    }
                    reply(&mut wr, "226 Transfer complete").await;
                }
                None => reply(&mut wr, "550 No such file or directory").await,
            },
            "STOR" => {
                reply(&mut wr, "150 Ok to send data").await;
                let mut content = Vec::new();
                if let Some(mut tcp) = open_data(data.take()).await {
                    let _ = tcp.read_to_end(&mut content).await;
                }
                state.put_file(&arg, &content);
                reply(&mut wr, "226 Transfer complete").await;
            }
            "SIZE" => match state.file(&arg) {
                Some(content) => reply(&mut wr, &format!("213 {}", content.len())).await,
                None => reply(&mut wr, "550 No such file or directory").await,
            },
            "MDTM" => match state.config.mdtm.get(&arg) {
                Some(stamp) => reply(&mut wr, &format!("213 {}", stamp)).await,
                None => reply(&mut wr, "550 No such file or directory").await,
            },
            "MKD" => reply(&mut wr, &format!("257 \"{}\" created", arg)).await,
            "RMD" | "DELE" => reply(&mut wr, "250 Deleted").await,
            "RNFR" => reply(&mut wr, "350 Ready for destination name").await,
            "RNTO" => reply(&mut wr, "250 Rename successful").await,
            "QUIT" => {
                reply(&mut wr, "221 Goodbye").await;
                return;
            }
            _ => reply(&mut wr, "502 Command not implemented").await,
        }
    }
}
