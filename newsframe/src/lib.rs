// Library interface for newsframe modules
// This allows tests and the binary to import modules

pub mod error;
pub mod history;
pub mod imaging;
pub mod llm;
pub mod models;
pub mod news;
pub mod pipeline;
pub mod publish;

pub use error::{PipelineError, UpstreamError};
pub use models::{Article, Caption, GeneratedImage, ImagePrompt, PostResult};
pub use pipeline::Pipeline;
