pub mod coalesce;
pub mod generator;
mod runtime;

pub use coalesce::{CoalescePolicy, Coalescer};
pub use generator::{ChunkStream, Cumulative, Generator, GeneratorError, ScriptStep, Scripted};
pub use runtime::start_generation_runtime;
