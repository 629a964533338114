#![deny(clippy::unwrap_used)]

mod chunk;
mod error;
mod exit_case;
mod token;

pub use chunk::{Chunk, ChunkQueue};
pub use error::{StreamError, compose, compose_all};
pub use exit_case::ExitCase;
pub use token::Token;
