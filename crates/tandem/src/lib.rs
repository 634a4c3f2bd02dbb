#![doc = include_str!("../README.md")]

pub mod call;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod multiplex;
pub mod status;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod testing;

pub use call::{CallContext, CallEvent, CallHead, CallOptions, CallState, Shape};
pub use client::{BidiCall, CallHandle, Client, ClientStreamingCall, RequestSink, ResponseStream};
pub use dispatch::{CallObserver, DispatchConfig, Dispatcher};
pub use error::{Error, Result};
pub use handler::{BoxedHandler, Registry, RegistryBuilder};
pub use multiplex::{Multiplexed, multiplex};
pub use status::CallError;
pub use stream::{Frames, ResponseSink, Streaming};
pub use transport::{LocalTransport, Transport};
