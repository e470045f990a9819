//! # InvokeRPC
//!
//! The wire protocol of the unified messenger: how one node asks another to
//! run a method on a named remote, and how the outcome finds its way back.
//!
//! ## Architecture
//!
//! - `value`: argument/result values and their declared type tags.
//! - `envelope`: call and reply frames, correlation ids, the `Invoke` invariant.
//! - `codec`: value, type tag and fault translation to `wirepack`.
//! - `error`: protocol errors versus remote faults.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod value;

pub use envelope::CorrelationId;
pub use envelope::Envelope;
pub use envelope::Invoke;
pub use envelope::MethodCall;
pub use envelope::NodeId;
pub use envelope::Outcome;
pub use envelope::PROTOCOL_VERSION;
pub use envelope::Reply;
pub use envelope::peek_call_id;
pub use envelope::peek_reply_id;
pub use error::Error;
pub use error::Fault;
pub use error::Result;
pub use value::TypeTag;
pub use value::Value;

#[cfg(test)]
mod tests;
