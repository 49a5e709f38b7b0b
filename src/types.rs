pub mod api;

pub use api::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, FunctionCall, Message, Role, ToolCall,
    ToolDefinition, ToolFunction,
};
