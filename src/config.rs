//! Config file and CLI flags for the demo binaries.
//!
//! The file format is deliberately minimal: line-based `key=value`, `#`
//! lines ignored, whitespace stripped before parsing. CLI parsing is layered
//! on top with `clap`'s derive API, matching how the other example repos in
//! this corpus wire up their demo/bootstrap binaries.

use crate::error::{Error, Result};
use clap::Parser;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// The four keys a config file may set. Anything else is accepted and
/// ignored rather than rejected, so a file can carry comments or
/// forward-compatible keys without failing to parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_server_ip: IpAddr,
    pub rpc_server_port: u16,
    pub zookeeper_ip: IpAddr,
    pub zookeeper_port: u16,
}

impl Config {
    /// Parses `path` as `key=value` lines. Lines that are empty after
    /// trimming, or that start with `#`, are skipped. A non-empty line with
    /// no `=` is a hard parse error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut values: HashMap<String, String> = HashMap::new();

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| Error::InvalidConfigLine {
                line_no: line_no + 1,
                line: raw_line.to_string(),
            })?;
            values.insert(key.trim().to_string(), value.trim().to_string());
        }

        let get = |key: &'static str| -> Result<&str> {
            values.get(key).map(String::as_str).ok_or(Error::MissingConfigKey(key))
        };

        Ok(Self {
            rpc_server_ip: get("rpcserverip")?.parse().map_err(Error::other)?,
            rpc_server_port: get("rpcserverport")?.parse().map_err(Error::other)?,
            zookeeper_ip: get("zookeeperip")?.parse().map_err(Error::other)?,
            zookeeper_port: get("zookeeperport")?.parse().map_err(Error::other)?,
        })
    }

    pub fn rpc_server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.rpc_server_ip, self.rpc_server_port)
    }

    pub fn zookeeper_addr(&self) -> SocketAddr {
        SocketAddr::new(self.zookeeper_ip, self.zookeeper_port)
    }
}

/// `-i <config-file>`, the only flag the RPC bootstrap binaries take.
/// Absence of `-i` makes `clap` print usage and exit non-zero on its own.
#[derive(Parser, Debug)]
#[command(about = "fibermesh RPC demo bootstrap")]
pub struct Cli {
    #[arg(short = 'i', long = "config")]
    pub config_path: PathBuf,
}

impl Cli {
    /// Parses `argv` and loads the config file it names in one step — the
    /// shape every demo binary's `main` actually wants.
    pub fn load_config() -> Result<Config> {
        let cli = Cli::parse();
        Config::load(&cli.config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("fibermesh-config-test-{}.txt", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_recognized_keys_and_ignores_comments() {
        let path = write_temp(
            "# comment\n\
             rpcserverip=127.0.0.1\n\
             rpcserverport = 12345\n\
             zookeeperip=127.0.0.1\n\
             zookeeperport=2181\n",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.rpc_server_port, 12345);
        assert_eq!(config.zookeeper_port, 2181);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_key_is_an_error() {
        let path = write_temp("rpcserverip=127.0.0.1\n");
        assert!(matches!(
            Config::load(&path),
            Err(Error::MissingConfigKey(_))
        ));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn line_without_equals_is_an_error() {
        let path = write_temp("rpcserverip 127.0.0.1\n");
        assert!(matches!(
            Config::load(&path),
            Err(Error::InvalidConfigLine { .. })
        ));
        std::fs::remove_file(path).unwrap();
    }
}
