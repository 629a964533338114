#![deny(clippy::unwrap_used)]

mod compiler;
mod config;
mod interrupt;
mod outcome;
mod pull;
mod resource;
mod scope;

pub use config::CompileConfig;
pub use interrupt::InterruptCause;
pub use outcome::{Interruption, Outcome};
pub use pull::{Pull, StepLeg, Uncons};
pub use resource::{Finalizer, ResourceLease, ScopedResource};
pub use rill_base::{Chunk, ChunkQueue, ExitCase, StreamError, Token, chunk, compose, compose_all};
pub use scope::{Scope, ScopeLease};
