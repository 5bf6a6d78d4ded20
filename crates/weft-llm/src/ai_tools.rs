//! Internal `ai.*` tools: in-process data transformation backed by the
//! language model, dispatched by the gateway without any provider
//! connection.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use weft_core::error::{Result, WeftError};
use weft_core::traits::{LanguageModel, ToolHandler};
use weft_core::types::{ToolCallContext, ToolDescriptor};
use weft_gateway::ToolGateway;

/// Register every `ai.*` tool on the gateway.
pub fn register_ai_tools(gateway: &mut ToolGateway, model: Arc<dyn LanguageModel>) {
    gateway.register_internal(Arc::new(AiProcessTool {
        model: model.clone(),
    }));
    gateway.register_internal(Arc::new(AiSummarizeTool {
        model: model.clone(),
    }));
    gateway.register_internal(Arc::new(AiExtractTool {
        model: model.clone(),
    }));
    gateway.register_internal(Arc::new(AiGenerateTool { model }));
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn str_param_or<'a>(params: &'a Value, key: &str, default: &'a str) -> &'a str {
    str_param(params, key).unwrap_or(default)
}

/// General-purpose transformation of input data under an instruction.
pub struct AiProcessTool {
    model: Arc<dyn LanguageModel>,
}

impl ToolHandler for AiProcessTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "ai",
            "process",
            "Use AI to process, transform, or generate content from input data. \
             Use this for tasks like summarizing, analyzing, generating text, \
             converting formats, or any intelligent data transformation.",
            json!({
                "type": "object",
                "properties": {
                    "input_data": {
                        "type": "string",
                        "description": "The input data to process (text, JSON, etc.)"
                    },
                    "instruction": {
                        "type": "string",
                        "description": "What to do with the input data (e.g., 'summarize this', 'extract key points', 'convert to markdown')"
                    },
                    "output_format": {
                        "type": "string",
                        "description": "Desired output format (default: 'text')",
                        "enum": ["text", "json", "markdown", "html"],
                        "default": "text"
                    }
                },
                "required": ["input_data", "instruction"]
            }),
        )
    }

    fn invoke(&self, params: Value, _ctx: ToolCallContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let (Some(input_data), Some(instruction)) =
                (str_param(&params, "input_data"), str_param(&params, "instruction"))
            else {
                return Err(WeftError::ToolValidation(
                    "Both input_data and instruction are required".to_string(),
                ));
            };
            let format_instruction = match str_param_or(&params, "output_format", "text") {
                "json" => "Respond with valid JSON only, no markdown.",
                "markdown" => "Respond in well-formatted Markdown.",
                "html" => "Respond in clean HTML.",
                _ => "Respond in plain text.",
            };

            let system_prompt = format!(
                "You are a helpful AI assistant that processes and transforms data.\n\
                 {}\n\
                 Be thorough but concise. Focus on quality output.",
                format_instruction
            );
            let user_prompt = format!(
                "Instruction: {}\n\nInput Data:\n{}\n\n\
                 Process the input data according to the instruction above.",
                instruction, input_data
            );

            let result = self.model.generate(&system_prompt, &user_prompt).await?;
            Ok(Value::String(result))
        })
    }
}

/// Condense text to a requested length.
pub struct AiSummarizeTool {
    model: Arc<dyn LanguageModel>,
}

impl ToolHandler for AiSummarizeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "ai",
            "summarize",
            "Summarize text content into a concise form.",
            json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "The text to summarize"
                    },
                    "max_length": {
                        "type": "string",
                        "description": "Target length: 'short' (1-2 sentences), 'medium' (1 paragraph), 'long' (multiple paragraphs)",
                        "enum": ["short", "medium", "long"],
                        "default": "medium"
                    }
                },
                "required": ["text"]
            }),
        )
    }

    fn invoke(&self, params: Value, _ctx: ToolCallContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let Some(text) = str_param(&params, "text") else {
                return Err(WeftError::ToolValidation("Text is required".to_string()));
            };
            let length_instruction = match str_param_or(&params, "max_length", "medium") {
                "short" => "Provide a 1-2 sentence summary.",
                "long" => "Provide a comprehensive multi-paragraph summary.",
                _ => "Provide a concise paragraph summary.",
            };

            let system_prompt = format!(
                "You are a summarization expert.\n{}\n\
                 Capture the key points and main ideas.",
                length_instruction
            );
            let user_prompt = format!("Summarize the following text:\n\n{}", text);

            let result = self.model.generate(&system_prompt, &user_prompt).await?;
            Ok(Value::String(result))
        })
    }
}

/// Pull requested facts out of text.
pub struct AiExtractTool {
    model: Arc<dyn LanguageModel>,
}

impl ToolHandler for AiExtractTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "ai",
            "extract",
            "Extract specific information from text using AI.",
            json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "The text to extract information from"
                    },
                    "extract_what": {
                        "type": "string",
                        "description": "What to extract (e.g., 'email addresses', 'dates', 'key facts', 'action items')"
                    }
                },
                "required": ["text", "extract_what"]
            }),
        )
    }

    fn invoke(&self, params: Value, _ctx: ToolCallContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let (Some(text), Some(extract_what)) =
                (str_param(&params, "text"), str_param(&params, "extract_what"))
            else {
                return Err(WeftError::ToolValidation(
                    "Both text and extract_what are required".to_string(),
                ));
            };

            let system_prompt = "You are an information extraction expert.\n\
                                 Extract only the requested information.\n\
                                 If the information isn't present, say so clearly.\n\
                                 Format the output clearly and concisely.";
            let user_prompt = format!(
                "Extract the following from the text: {}\n\nText:\n{}",
                extract_what, text
            );

            let result = self.model.generate(system_prompt, &user_prompt).await?;
            Ok(Value::String(result))
        })
    }
}

/// Generate new content from a prompt and optional context.
pub struct AiGenerateTool {
    model: Arc<dyn LanguageModel>,
}

impl ToolHandler for AiGenerateTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "ai",
            "generate",
            "Generate new content based on a prompt and optional context.",
            json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "What to generate (e.g., 'a business plan for...', 'an email response to...')"
                    },
                    "context": {
                        "type": "string",
                        "description": "Optional context or background information to use"
                    },
                    "tone": {
                        "type": "string",
                        "description": "Tone of the output",
                        "enum": ["professional", "casual", "formal", "creative"],
                        "default": "professional"
                    }
                },
                "required": ["prompt"]
            }),
        )
    }

    fn invoke(&self, params: Value, _ctx: ToolCallContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let Some(prompt) = str_param(&params, "prompt") else {
                return Err(WeftError::ToolValidation("Prompt is required".to_string()));
            };
            let tone_instruction = match str_param_or(&params, "tone", "professional") {
                "casual" => "Use a friendly, conversational tone.",
                "formal" => "Use a formal, academic tone.",
                "creative" => "Be creative and engaging.",
                _ => "Use a professional, business-appropriate tone.",
            };

            let system_prompt = format!(
                "You are a skilled content generator.\n{}\n\
                 Create high-quality, well-structured content.",
                tone_instruction
            );
            let user_prompt = match str_param(&params, "context") {
                Some(context) => format!("{}\n\nContext:\n{}", prompt, context),
                None => prompt.to_string(),
            };

            let result = self.model.generate(&system_prompt, &user_prompt).await?;
            Ok(Value::String(result))
        })
    }
}
