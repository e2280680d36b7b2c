//! Generation side: job submission, the shared result stream, and the prompt
//! and fallback tables the facade draws on.

pub mod correlator;
pub mod prompts;
pub mod scripted;
pub mod sse;
pub mod transport;

pub use correlator::Correlator;
pub use prompts::{FallbackValues, PromptTemplates};
pub use scripted::{ScriptedTransport, SubmitOutcome};
pub use transport::{GenerationTransport, HttpTransport, JobAck, JobRequest, LineStream};
