use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::engine::{parse_time, WorkingHours};

/// Server settings, read once from `CLASSBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub hours: WorkingHours,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "classbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            hours: WorkingHours::default(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    /// Only one of the certificate/key pair was given.
    TlsPair,
    Hours(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid {var}: {value:?}"),
            ConfigError::TlsPair => write!(
                f,
                "both CLASSBOOK_TLS_CERT and CLASSBOOK_TLS_KEY must be set, or neither"
            ),
            ConfigError::Hours(msg) => write!(f, "invalid working hours: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Config::default();
        let port = parse_var(&lookup, "CLASSBOOK_PORT")?.unwrap_or(d.port);
        let max_connections =
            parse_var(&lookup, "CLASSBOOK_MAX_CONNECTIONS")?.unwrap_or(d.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "CLASSBOOK_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }
        let compact_threshold =
            parse_var(&lookup, "CLASSBOOK_COMPACT_THRESHOLD")?.unwrap_or(d.compact_threshold);
        let metrics_port = parse_var(&lookup, "CLASSBOOK_METRICS_PORT")?;

        let tls_cert = lookup("CLASSBOOK_TLS_CERT").map(PathBuf::from);
        let tls_key = lookup("CLASSBOOK_TLS_KEY").map(PathBuf::from);
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }

        let clock = |var: &'static str, default| match lookup(var) {
            None => Ok(default),
            Some(v) => parse_time(&v).map_err(|_| ConfigError::Invalid { var, value: v }),
        };
        let hours = WorkingHours::new(
            clock("CLASSBOOK_OPEN", d.hours.open)?,
            clock("CLASSBOOK_CLOSE", d.hours.close)?,
        )
        .map_err(|e| ConfigError::Hours(e.to_string()))?;

        Ok(Self {
            port,
            bind: lookup("CLASSBOOK_BIND").unwrap_or(d.bind),
            data_dir: lookup("CLASSBOOK_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            password: lookup("CLASSBOOK_PASSWORD").unwrap_or(d.password),
            max_connections,
            compact_threshold,
            metrics_port,
            tls_cert,
            tls_key,
            hours,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Build the TLS acceptor when a certificate pair is configured.
    pub fn load_tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let (Some(cert_path), Some(key_path)) = (&self.tls_cert, &self.tls_key) else {
            return Ok(None);
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "no private key found in key file")
            })?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: v }),
    }
}
