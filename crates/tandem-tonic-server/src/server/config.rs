use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `tandem-tonic-server` binary.
///
/// Every value can be given on the command line or through the environment
/// (a `.env` file in the working directory is loaded first). The defaults
/// reproduce the behavior of the demonstration services: five greetings one
/// second apart, 64 KiB download chunks, and a three-second drain on shutdown.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tandem-tonic-server",
    version,
    about = "A gRPC server for the calculator, greet and blog services"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/tandem.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Capacity of each call's response buffer.
    ///
    /// A handler can run this many responses ahead of the client before its
    /// next send waits.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds in-flight calls may keep running after a shutdown signal.
    ///
    /// Calls still running afterwards are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Number of responses sent by `GreetManyTimes`.
    ///
    /// Environment variable: `GREET_REPEAT`
    #[arg(long, env = "GREET_REPEAT", default_value_t = 5)]
    pub greet_repeat: u32,

    /// Pause between greetings, in milliseconds.
    ///
    /// Also the length of each of the three steps of `GreetWithDeadline`.
    ///
    /// Environment variable: `GREET_INTERVAL_MS`
    #[arg(long, env = "GREET_INTERVAL_MS", default_value_t = 1000)]
    pub greet_interval_ms: u64,

    /// Directory `DownloadImage` serves files from.
    ///
    /// Environment variable: `ASSETS_DIR`
    #[arg(long, env = "ASSETS_DIR", default_value = ".")]
    pub assets_dir: PathBuf,

    /// Size of each `DownloadImage` chunk in bytes.
    ///
    /// Environment variable: `DOWNLOAD_CHUNK_BYTES`
    #[arg(long, env = "DOWNLOAD_CHUNK_BYTES", default_value_t = 64 * 1024)]
    pub download_chunk_bytes: usize,

    /// PEM certificate chain. Enables TLS together with `TLS_KEY`.
    ///
    /// Environment variable: `TLS_CERT`
    #[cfg(feature = "tls")]
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key matching `TLS_CERT`.
    ///
    /// Environment variable: `TLS_KEY`
    #[cfg(feature = "tls")]
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,
}

#[cfg(feature = "tls")]
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub greet_repeat: u32,
    pub greet_interval: Duration,
    pub assets_dir: PathBuf,
    pub download_chunk_bytes: usize,
    #[cfg(feature = "tls")]
    pub tls: Option<TlsFiles>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.download_chunk_bytes == 0 {
            bail!("DOWNLOAD_CHUNK_BYTES must be greater than 0");
        }

        if !args.assets_dir.is_dir() {
            bail!(
                "ASSETS_DIR ({}) is not a directory",
                args.assets_dir.display()
            );
        }

        #[cfg(feature = "tls")]
        let tls = match (args.tls_cert, args.tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            (None, None) => None,
            _ => bail!("TLS_CERT and TLS_KEY must be set together"),
        };

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            greet_repeat: args.greet_repeat,
            greet_interval: Duration::from_millis(args.greet_interval_ms),
            assets_dir: args.assets_dir,
            download_chunk_bytes: args.download_chunk_bytes,
            #[cfg(feature = "tls")]
            tls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(
            core::iter::once("tandem-tonic-server").chain(args.iter().copied()),
        )?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.stream_buffer_size, 8);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(config.greet_repeat, 5);
        assert_eq!(config.greet_interval, Duration::from_secs(1));
        assert_eq!(config.download_chunk_bytes, 65536);
        assert!(!config.uds);
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(parse(&["--stream-buffer-size", "0"]).is_err());
        assert!(parse(&["--download-chunk-bytes", "0"]).is_err());
    }

    #[test]
    fn rejects_missing_assets_dir() {
        let err = parse(&["--assets-dir", "/definitely/not/here"]).unwrap_err();
        assert!(err.to_string().contains("ASSETS_DIR"));
    }
}
