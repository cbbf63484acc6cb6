//! Agent runtime: profiles, turn state machine, prompt assembly and the
//! retrieval / tool / generation loop

pub mod context;
pub mod distill;
pub mod profile;
pub mod runtime;
pub mod state;

pub use context::{ContextBuilder, Retrieved};
pub use distill::MemoryDistiller;
pub use profile::AgentProfile;
pub use runtime::{AgentRuntime, TurnOutcome};
pub use state::{TurnEvent, TurnState, TurnTracker};
