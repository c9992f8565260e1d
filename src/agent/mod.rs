//! Agent module: query routing and the context handed to the model.

pub mod context;
pub mod router;

pub use router::{EmailAgent, FALLBACK_REPLY, QueryReply};
