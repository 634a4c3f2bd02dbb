use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use core::time::Duration;
use std::path::PathBuf;
use tandem::CallOptions;
use tandem_tonic_core::proto::greet::Greeting;
use tonic::codec::CompressionEncoding;

#[derive(Parser, Debug)]
#[command(
    name = "tandem-tonic-client",
    version,
    about = "Calls the calculator, greet and blog services"
)]
pub struct CliArgs {
    /// Server URI.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value = "http://127.0.0.1:50051")]
    pub addr: String,

    /// Deadline of each call in milliseconds. No deadline when omitted.
    #[arg(long, env = "TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Compress requests and accept compressed responses.
    #[arg(long, value_enum, default_value_t = Compression::None)]
    pub compression: Compression,

    /// PEM bundle of the certificate authority that signed the server's
    /// certificate. Enables TLS.
    ///
    /// Environment variable: `CA_CERT`
    #[cfg(feature = "tls")]
    #[arg(long, env = "CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// Name to verify the server certificate against.
    #[cfg(feature = "tls")]
    #[arg(long, default_value = "localhost")]
    pub domain: String,

    #[command(subcommand)]
    pub command: Command,
}

impl CliArgs {
    pub fn call_options(&self) -> CallOptions {
        self.timeout_ms
            .map(|ms| CallOptions::with_timeout(Duration::from_millis(ms)))
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
    Deflate,
}

impl Compression {
    pub fn encoding(self) -> Option<CompressionEncoding> {
        match self {
            Self::None => None,
            Self::Gzip => Some(CompressionEncoding::Gzip),
            Self::Zstd => Some(CompressionEncoding::Zstd),
            Self::Deflate => Some(CompressionEncoding::Deflate),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Adds two numbers.
    Sum {
        #[arg(allow_negative_numbers = true)]
        first: i32,
        #[arg(allow_negative_numbers = true)]
        second: i32,
    },
    /// Streams the prime factors of a number.
    Primes { number: i64 },
    /// Averages the given numbers.
    Average {
        #[arg(allow_negative_numbers = true)]
        numbers: Vec<i32>,
    },
    /// Prints every new running maximum of the given numbers.
    Maximum {
        #[arg(allow_negative_numbers = true)]
        numbers: Vec<i32>,
    },
    /// Square root of a number.
    Sqrt {
        #[arg(allow_negative_numbers = true)]
        number: i32,
    },
    Greet(Person),
    /// Greets the same person several times.
    GreetManyTimes(Person),
    /// Sends several greetings and prints the combined answer.
    LongGreet(People),
    /// Greets everyone, one answer per greeting.
    GreetEveryone(People),
    /// Greets after a delay; combine with --timeout-ms.
    GreetWithDeadline(Person),
    #[command(subcommand)]
    Blog(BlogCommand),
}

#[derive(Args, Debug)]
pub struct Person {
    pub first_name: String,
    pub last_name: String,
}

impl From<Person> for Greeting {
    fn from(p: Person) -> Self {
        Greeting::new(p.first_name, p.last_name)
    }
}

#[derive(Args, Debug)]
pub struct People {
    /// "First Last" for each person.
    #[arg(required = true)]
    pub names: Vec<String>,
}

impl People {
    pub fn greetings(&self) -> anyhow::Result<Vec<Greeting>> {
        self.names.iter().map(|name| parse_name(name)).collect()
    }
}

fn parse_name(name: &str) -> anyhow::Result<Greeting> {
    let (first, last) = name
        .trim()
        .split_once(' ')
        .with_context(|| format!("expected \"First Last\", got {name:?}"))?;
    Ok(Greeting::new(first.trim(), last.trim()))
}

#[derive(Subcommand, Debug)]
pub enum BlogCommand {
    Create(BlogFields),
    Read { id: String },
    Update {
        id: String,
        #[command(flatten)]
        fields: BlogFields,
    },
    Delete { id: String },
    List,
    /// Downloads a file from the server's assets directory.
    Download {
        file_name: String,
        /// Where to write the file. Defaults to its base name.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct BlogFields {
    #[arg(long)]
    pub author_id: String,
    #[arg(long)]
    pub title: String,
    #[arg(long, default_value = "")]
    pub content: String,
}
