//! Chat and response models
//!
//! - `parts`: content parts and payload types shared with the sinks
//! - `ResponseModel`: one exchange's response with change notifications
//! - `ChatModel`: a session's exchanges, plan and snapshot
//! - `render`: progressive-render diffing

mod chat;
mod parts;
mod plan;
pub mod render;
mod response;

pub use chat::{
    ChatChange, ChatModel, ChatProgress, ChatRequest, Exchange, ExchangeSnapshot, SessionSnapshot,
};
pub use parts::{
    AgentInfo, CodeCitation, CodeEdit, ContentReference, EditsInfo, EditsState, Followup,
    MarkdownText, PlanStep, ProgressMessage, ResponsePart, ResponseResult, TaskPart,
    TextEditGroup, Vote, Warning,
};
pub use plan::{PlanModel, PlanStepEntry, StepStatus};
pub use render::{ProgressiveRenderer, RenderContent};
pub use response::{code_citations_message, Response, ResponseChange, ResponseModel};
