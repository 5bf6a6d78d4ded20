//! Language-model integration: an OpenAI-compatible chat client and the
//! internal `ai.*` gateway tools built on top of it.

mod ai_tools;
mod chat;

pub use ai_tools::{
    register_ai_tools, AiExtractTool, AiGenerateTool, AiProcessTool, AiSummarizeTool,
};
pub use chat::HttpChatModel;
