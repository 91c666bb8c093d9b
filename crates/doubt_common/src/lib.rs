//! Doubt Solver Common - shared domain logic for the exam doubt solver.
//!
//! Math-markup normalization of model answers, the chat message model,
//! the chat completion and image hosting clients, account handling and the
//! SQLite-backed store for question threads and feedback.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod image_host;
pub mod llm_client;
pub mod normalizer;
pub mod prompts;
pub mod solver;
pub mod store;

pub use chat::{ChatMessage, ContentPart, ImageRef, MessageContent, Role, TokenUsage};
pub use config::Config;
pub use conversation::Conversation;
pub use normalizer::{normalize, normalize_with, Strategy};
pub use solver::{Question, Solver, SolverConfig, SolverError, Turn};
