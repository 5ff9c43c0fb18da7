pub mod canonical;
pub mod mapping;
pub mod normalize;
pub mod openai_chat;
pub mod openai_responses;

/// Output token cap used when neither the caller nor the config sets one.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u64 = 4096;
