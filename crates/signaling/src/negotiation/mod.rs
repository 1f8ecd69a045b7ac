//! Offer/answer negotiation

pub mod buffer;
pub mod engine;
pub mod state;

pub use engine::{EngineDeps, NegotiationEngine, SignalSink};
pub use state::{EngineSnapshot, NegotiationRole, NegotiationState};
