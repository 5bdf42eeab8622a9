use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};

pub const HOST_ENV: &str = "SWITCHBOARD_HOST";
pub const PORT_ENV: &str = "SWITCHBOARD_PORT";
pub const DB_PATH_ENV: &str = "SWITCHBOARD_DB_PATH";
pub const AGENTS_FILE_ENV: &str = "SWITCHBOARD_AGENTS_FILE";

const DEFAULT_PORT: u16 = 7878;

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: IpAddr,
    pub port: u16,
    pub db_path: PathBuf,
    pub agents_file: Option<PathBuf>,
}

impl Settings {
    pub fn new() -> Result<Self> {
        let host = match std::env::var(HOST_ENV) {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("Invalid {HOST_ENV}: '{raw}'"))?,
            Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        };

        let port = match std::env::var(PORT_ENV) {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("Invalid {PORT_ENV}: '{raw}'"))?,
            Err(_) => DEFAULT_PORT,
        };

        let db_path = std::env::var(DB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| switchboard::config::default_db_path());

        let agents_file = std::env::var(AGENTS_FILE_ENV).ok().map(PathBuf::from);

        Ok(Self {
            host,
            port,
            db_path,
            agents_file,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
