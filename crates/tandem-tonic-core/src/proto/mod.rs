//! Message types and operation paths of the bundled gRPC services.
//!
//! Each submodule mirrors one protobuf package: a marker type naming the gRPC
//! service (used to mount an [`RpcServer`](crate::RpcServer) and to report
//! health), one `const` per operation path, and the request/response messages.

pub mod blog;
pub mod calculator;
pub mod greet;

pub use blog::BlogService;
pub use calculator::CalculatorService;
pub use greet::GreetService;
