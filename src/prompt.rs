//! Prompt composition
//!
//! Renders the system text, retrieved fragments and the user's question in a
//! model family's chat format. Every template ends with the assistant turn
//! opener, which is one of the start markers the worker adapter searches for.

use crate::retrieval::MemoryFragment;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Chat format of the worker's model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTemplate {
    /// Qwen and other `<|im_start|>` models
    #[default]
    ChatMl,
    Llama3,
    Phi3,
    /// `### User:` / `### Assistant:` headings
    Plain,
}

impl std::str::FromStr for ChatTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chatml" | "qwen" => Ok(ChatTemplate::ChatMl),
            "llama3" | "llama" => Ok(ChatTemplate::Llama3),
            "phi3" | "phi" => Ok(ChatTemplate::Phi3),
            "plain" => Ok(ChatTemplate::Plain),
            other => Err(format!("unknown chat template: {}", other)),
        }
    }
}

impl ChatTemplate {
    /// Full prompt for one question
    pub fn render(&self, system: &str, fragments: &[MemoryFragment], question: &str) -> String {
        let user = user_message(fragments, question);
        let system = sanitize(system);

        match self {
            ChatTemplate::ChatMl => format!(
                "<|im_start|>system\n{}<|im_end|>\n<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n",
                system, user
            ),
            ChatTemplate::Llama3 => format!(
                "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{}<|eot_id|>\
                 <|start_header_id|>user<|end_header_id|>\n\n{}<|eot_id|>\
                 <|start_header_id|>assistant<|end_header_id|>\n\n",
                system, user
            ),
            ChatTemplate::Phi3 => format!(
                "<|system|>\n{}<|end|>\n<|user|>\n{}<|end|>\n<|assistant|>\n",
                system, user
            ),
            ChatTemplate::Plain => format!("{}\n\n### User:\n{}\n\n### Assistant:", system, user),
        }
    }
}

fn user_message(fragments: &[MemoryFragment], question: &str) -> String {
    let question = sanitize(question);
    if fragments.is_empty() {
        return question;
    }

    let mut message = String::from("Context:\n");
    for (i, fragment) in fragments.iter().enumerate() {
        // Writing to a String cannot fail
        let _ = writeln!(
            message,
            "[{}] ({}) {}",
            i + 1,
            sanitize(&fragment.category),
            sanitize(fragment.content.trim())
        );
    }
    message.push_str("\nQuestion: ");
    message.push_str(&question);
    message
}

/// Neutralize chat control tokens and heading markers in untrusted text
fn sanitize(text: &str) -> String {
    text.replace("<|", "<").replace("###", "#").replace("Assistant:", "Assistant -")
}
