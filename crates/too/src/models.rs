//! These models represent the objects passed around by the agent
//!
//! There are several different related formats we need to interact with:
//! - openai-style chat completion messages/tools (openai, openrouter, ollama)
//! - anthropic messages/tools and their typed stream events
//! - gemini contents/function declarations
//! - the transcript shown to the user
//!
//! Each provider converts these internal structs to and from its own wire format at the
//! edge, so nothing vendor specific leaks past the provider module.
pub mod message;
pub mod response;
pub mod tool;
