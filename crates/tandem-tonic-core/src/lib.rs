#![doc = include_str!("../README.md")]

mod channel;
mod codec;
pub mod proto;
mod server;
mod timeout;

pub use channel::TonicTransport;
pub use codec::BytesCodec;
pub use server::{RpcServer, ServiceName};
pub use timeout::{TimeoutError, parse_grpc_timeout};
// Public re-export so downstream crates can reach the core through
// `tandem_tonic_core::tandem`
pub use tandem;
