//! System instruction and structured-reply prompt.

use parley_core::config::Config;

const DEFAULT_PERSONA: &str = "你是一个友好、简洁的语音聊天助手。";

const SPEECH_STYLE: &str = "Your replies are read aloud by a speech synthesizer. \
Answer in short spoken sentences with ordinary punctuation. \
Do not use markdown, lists, code blocks or emoji.";

/// Instruction sent with each spoken turn in structured mode.
pub const DEFAULT_STRUCTURED_PROMPT: &str = "请听这段用户语音，并只用 JSON 回复，格式为 \
{\"user_transcription\": \"用户说的话\", \"assistant_response\": \"你的回答\"}。";

/// Build the system instruction for a new chat session.
pub fn build_system_instruction(config: &Config) -> String {
    let mut parts = Vec::new();

    let persona = config
        .model
        .as_ref()
        .and_then(|m| m.system_prompt.as_deref())
        .unwrap_or(DEFAULT_PERSONA);
    parts.push(persona.to_string());

    parts.push(SPEECH_STYLE.to_string());

    let now = chrono::Utc::now();
    parts.push(format!("Current time: {}", now.format("%Y-%m-%d %H:%M:%S UTC")));

    parts.join("\n\n")
}

/// The configured structured-mode prompt, or the default one.
pub fn structured_prompt(config: &Config) -> String {
    config
        .structured_prompt()
        .unwrap_or(DEFAULT_STRUCTURED_PROMPT)
        .to_string()
}
