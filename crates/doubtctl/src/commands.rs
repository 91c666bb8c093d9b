//! Command implementations for doubtctl

use crate::api_client::ApiClient;
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use doubt_common::api::{AnswerResponse, AskRequest};
use doubt_common::chat::{ChatMessage, ImageRef, Role};
use doubt_common::store::{QuestionSummary, QuestionThread};
use doubt_common::Strategy;
use owo_colors::OwoColorize;
use std::io::Read;
use std::path::Path;

/// Read a file, or stdin when no path is given
pub fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

/// Base64 body of an image file, ready for an ask request
pub fn encode_image(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    if bytes.is_empty() {
        bail!("Image {} is empty", path.display());
    }
    Ok(BASE64.encode(bytes))
}

// ============================================================================
// Rendering
// ============================================================================

fn render_image(image: &ImageRef) -> String {
    match image {
        ImageRef::Inline { mime, .. } => format!("[image attached: {}]", mime),
        ImageRef::Url { url } => format!("[image: {}]", url),
    }
}

pub fn render_message(message: &ChatMessage) -> Option<String> {
    let body = message.content.text();
    match message.role {
        Role::User => {
            let mut out = format!("📝 Your Question: {}", body);
            if let Some(image) = message.content.image() {
                out.push('\n');
                out.push_str(&render_image(image));
            }
            Some(out)
        }
        Role::Assistant => Some(format!("🤖 Solution:\n{}", body)),
        Role::System => None,
    }
}

/// Full thread as plain text, oldest message first
pub fn render_thread(thread: &QuestionThread) -> String {
    let mut lines = vec![format!(
        "{} | {} | {}",
        thread.subject,
        thread.question_type,
        thread.created_at.format("%Y-%m-%d %H:%M")
    )];
    for message in &thread.messages {
        if let Some(rendered) = render_message(message) {
            lines.push(String::new());
            lines.push(rendered);
        }
    }
    lines.join("\n")
}

pub fn render_summary(summary: &QuestionSummary) -> String {
    let mut preview: String = summary.question_text.chars().take(60).collect();
    if summary.question_text.chars().count() > 60 {
        preview.push_str("...");
    }
    if preview.is_empty() {
        preview = "Image uploaded".to_string();
    }
    format!(
        "{}  {:<12} {:<10} {:>3} msgs  {}",
        summary.id, summary.subject, summary.question_type, summary.message_count, preview
    )
}

fn print_answer(answer: &AnswerResponse) {
    println!("🤖 Solution:");
    println!("{}", answer.answer);
    println!();
    println!("{} {}", "question:".dimmed(), answer.question_id);
    if let Some(usage) = answer.usage {
        println!(
            "{} {} prompt + {} completion = {}",
            "tokens:".dimmed(),
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total_tokens
        );
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Normalize locally, without the daemon
pub fn normalize(path: Option<&Path>, strategy: Strategy) -> Result<()> {
    let input = read_input(path)?;
    println!("{}", strategy.apply(&input));
    Ok(())
}

pub fn status(client: &ApiClient) -> Result<()> {
    let health = client.health()?;
    println!(
        "{} doubtd {} ({}, up {}s, {} sessions)",
        "[OK]".bright_green(),
        health.version,
        health.status,
        health.uptime_seconds,
        health.active_sessions
    );
    Ok(())
}

pub fn signup(client: &ApiClient, username: &str, password: &str) -> Result<()> {
    let account = client.signup(username, password)?;
    println!(
        "{} Account created for {}. Please log in.",
        "[OK]".bright_green(),
        account.username
    );
    Ok(())
}

pub fn login(client: &ApiClient, username: &str, password: &str) -> Result<()> {
    let account = client.login(username, password)?;
    let token = account.token.context("doubtd did not return a session token")?;
    eprintln!("{} Logged in as {}", "[OK]".bright_green(), account.username);
    // Bare token on stdout so `export DOUBT_TOKEN=$(doubtctl login ...)` works
    println!("{}", token);
    Ok(())
}

pub fn logout(client: &ApiClient) -> Result<()> {
    client.logout()?;
    println!("{} Logged out", "[OK]".bright_green());
    Ok(())
}

pub fn ask(
    client: &ApiClient,
    text: Option<String>,
    image: Option<&Path>,
    subject: Option<String>,
    question_type: Option<String>,
) -> Result<()> {
    let image_base64 = image.map(encode_image).transpose()?;
    let request = AskRequest {
        text,
        image_base64,
        subject,
        question_type,
    };
    let answer = client.ask(&request)?;
    print_answer(&answer);
    Ok(())
}

pub fn follow_up(client: &ApiClient, question_id: &str, text: &str) -> Result<()> {
    let answer = client.follow_up(question_id, text)?;
    print_answer(&answer);
    Ok(())
}

pub fn show(client: &ApiClient, question_id: &str) -> Result<()> {
    let thread = client.thread(question_id)?;
    println!("{}", render_thread(&thread));
    Ok(())
}

pub fn list(client: &ApiClient) -> Result<()> {
    let questions = client.questions()?;
    if questions.is_empty() {
        println!("No questions yet. Ask one with `doubtctl ask`.");
        return Ok(());
    }
    for summary in &questions {
        println!("{}", render_summary(summary));
    }
    Ok(())
}

pub fn feedback(client: &ApiClient, question_id: &str, text: &str, rating: Option<u8>) -> Result<()> {
    client.feedback(question_id, text, rating)?;
    println!("{} Thank you for your feedback!", "[OK]".bright_green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use doubt_common::chat::MessageContent;

    #[test]
    fn test_system_messages_are_hidden() {
        assert!(render_message(&ChatMessage::system("rules")).is_none());
    }

    #[test]
    fn test_user_message_shows_image_marker() {
        let content = MessageContent::with_image(
            "what is this?",
            ImageRef::Url {
                url: "https://img.example/q.png".to_string(),
            },
        );
        let rendered = render_message(&ChatMessage::user(content)).unwrap();
        assert_eq!(
            rendered,
            "📝 Your Question: what is this?\n[image: https://img.example/q.png]"
        );
    }
}
