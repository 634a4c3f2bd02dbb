//! Handlers of the calculator, greet and blog services.
//!
//! Each submodule exposes a `register` function that adds its operations to
//! a [`RegistryBuilder`]; [`registry`] wires all three together from the
//! server configuration.
//!
//! ## Structure
//!
//! - [`calculator`] - arithmetic over every call shape.
//! - [`greet`] - greetings, including the paced and deadline-aware ones.
//! - [`blog`] - document CRUD over an injected [`DocumentStore`], plus file
//!   downloads.

pub mod blog;
pub mod calculator;
pub mod greet;

use crate::server::{config::ServerConfig, store::DocumentStore};
use blog::BlogSettings;
use greet::GreetSettings;
use std::sync::Arc;
use tandem::{Registry, RegistryBuilder};

/// Builds the immutable operation table served by this process.
pub fn registry(config: &ServerConfig, store: Arc<dyn DocumentStore>) -> tandem::Result<Registry> {
    let builder = calculator::register(RegistryBuilder::new());
    let builder = greet::register(
        builder,
        GreetSettings {
            repeat: config.greet_repeat,
            interval: config.greet_interval,
        },
    );
    let builder = blog::register(
        builder,
        BlogSettings {
            store,
            assets_dir: config.assets_dir.clone(),
            chunk_bytes: config.download_chunk_bytes,
        },
    );
    builder.build()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use tandem::{Client, DispatchConfig, Dispatcher, LocalTransport, RegistryBuilder};

    /// An in-process client for the handlers in `builder`.
    pub fn client(builder: RegistryBuilder) -> Client<LocalTransport> {
        dispatch(builder).0
    }

    /// Like [`client`], also returning the dispatcher behind it.
    pub fn dispatch(builder: RegistryBuilder) -> (Client<LocalTransport>, Arc<Dispatcher>) {
        let dispatcher = Arc::new(Dispatcher::new(
            builder.build().unwrap(),
            DispatchConfig::default(),
        ));
        let client = Client::new(LocalTransport::new(Arc::clone(&dispatcher)));
        (client, dispatcher)
    }
}
