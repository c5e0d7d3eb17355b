pub mod google;
pub mod stub;
mod types;

pub use types::{ChatChunk, ChatRequest, Provider};
