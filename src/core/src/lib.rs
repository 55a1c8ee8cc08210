//! The invocation state machine of the Restate Rust SDK.
//!
//! This crate drives a user handler through the journal replay protocol:
//! it decodes the message stream, maintains the per-invocation journal,
//! bridges runtime completions to the futures user code awaits, decides when
//! to suspend, and runs side effects with durable retries.

mod context;
mod driver;
mod futures;
mod invocation;
mod journal;
mod machine;
mod rand;
mod side_effect;

pub use self::context::{Awakeable, Context, InvocationHandler};
pub use self::driver::{DriverOptions, InvocationDriver, TransportError};
pub use self::futures::{all, all_settled, any, race, DurableFuture};
pub use self::invocation::InvocationMetadata;
pub use self::side_effect::SideEffectError;

pub use restate_sdk_service_protocol::discovery::ProtocolMode;
pub use restate_sdk_types::errors::TerminalError;
pub use restate_sdk_types::retries::RetryPolicy;
