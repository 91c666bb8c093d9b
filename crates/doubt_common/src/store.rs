//! Document store for accounts, question threads and feedback.
//!
//! Backed by a single SQLite connection behind a mutex. Every write is an
//! insert or a single-thread append; multi-row writes run in one transaction.

use crate::chat::{ChatMessage, ImageRef, MessageContent, Role, TokenUsage};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS questions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    question_text TEXT NOT NULL,
    image_ref TEXT,
    subject TEXT NOT NULL,
    question_type TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_questions_user ON questions(user_id, created_at);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id TEXT NOT NULL REFERENCES questions(id),
    seq INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    token_usage TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(question_id, seq)
);

CREATE TABLE IF NOT EXISTS feedback (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    question_id TEXT NOT NULL REFERENCES questions(id),
    feedback_text TEXT NOT NULL,
    rating INTEGER,
    created_at TEXT NOT NULL
);
";

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Fields of a question at submission time
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub user_id: String,
    pub question_text: String,
    pub image: Option<ImageRef>,
    pub subject: String,
    pub question_type: String,
    /// Opening user message of the thread
    pub first_message: ChatMessage,
}

/// A question with its full message history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionThread {
    pub id: String,
    pub user_id: String,
    pub question_text: String,
    pub image: Option<ImageRef>,
    pub subject: String,
    pub question_type: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSummary {
    pub id: String,
    pub question_text: String,
    pub subject: String,
    pub question_type: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub user_id: String,
    pub question_id: String,
    pub feedback_text: String,
    pub rating: Option<u8>,
    pub created_at: DateTime<Utc>,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening database at: {}", path.display());

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    pub fn add_user(&self, username: &str, password_hash: &str) -> Result<UserAccount, StoreError> {
        let user = UserAccount {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![user.id, user.username, user.password_hash, user.created_at],
            )
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => {
                    StoreError::Duplicate(format!("user '{}'", username))
                }
                _ => StoreError::Sqlite(e),
            })
        })?;

        debug!("Added user {}", user.id);
        Ok(user)
    }

    pub fn get_user(&self, username: &str) -> Result<Option<UserAccount>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(UserAccount {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    // ------------------------------------------------------------------------
    // Question threads
    // ------------------------------------------------------------------------

    /// Insert a question and its opening message, returning the question id
    pub fn add_question(&self, question: &NewQuestion) -> Result<String, StoreError> {
        self.add_question_with_replies(question, &[])
    }

    /// Insert a question, its opening message and the replies to it, all or nothing
    pub fn add_question_with_replies(
        &self,
        question: &NewQuestion,
        replies: &[ChatMessage],
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let image = question
            .image
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO questions (id, user_id, question_text, image_ref, subject, question_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    question.user_id,
                    question.question_text,
                    image,
                    question.subject,
                    question.question_type,
                    question.first_message.timestamp,
                ],
            )?;
            insert_message(&tx, &id, &question.first_message)?;
            for reply in replies {
                insert_message(&tx, &id, reply)?;
            }
            tx.commit()?;
            Ok(())
        })?;

        debug!("Added question {}", id);
        Ok(id)
    }

    /// Append one message to a thread
    pub fn add_message(&self, question_id: &str, message: &ChatMessage) -> Result<(), StoreError> {
        self.append_messages(question_id, std::slice::from_ref(message))
    }

    /// Append messages to a thread in order. Either all are stored or none.
    pub fn append_messages(&self, question_id: &str, messages: &[ChatMessage]) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            if !question_exists(&tx, question_id)? {
                return Err(StoreError::NotFound(format!("question '{}'", question_id)));
            }
            for message in messages {
                insert_message(&tx, question_id, message)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_question(&self, question_id: &str) -> Result<QuestionThread, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, question_text, image_ref, subject, question_type, created_at
                     FROM questions WHERE id = ?1",
                    params![question_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, DateTime<Utc>>(6)?,
                        ))
                    },
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("question '{}'", question_id)))?;

            let (id, user_id, question_text, image, subject, question_type, created_at) = row;
            let image = image
                .map(|json| serde_json::from_str::<ImageRef>(&json))
                .transpose()?;

            Ok(QuestionThread {
                messages: load_messages(conn, &id)?,
                id,
                user_id,
                question_text,
                image,
                subject,
                question_type,
                created_at,
            })
        })
    }

    /// Threads of one user, newest first
    pub fn list_questions(&self, user_id: &str) -> Result<Vec<QuestionSummary>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT q.id, q.question_text, q.subject, q.question_type, q.created_at,
                        (SELECT COUNT(*) FROM messages m WHERE m.question_id = q.id)
                 FROM questions q WHERE q.user_id = ?1
                 ORDER BY q.created_at DESC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(QuestionSummary {
                    id: row.get(0)?,
                    question_text: row.get(1)?,
                    subject: row.get(2)?,
                    question_type: row.get(3)?,
                    created_at: row.get(4)?,
                    message_count: row.get::<_, i64>(5)? as usize,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    pub fn count_user_messages(&self, question_id: &str) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE question_id = ?1 AND role = ?2",
                params![question_id, Role::User.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    // ------------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------------

    pub fn add_feedback(
        &self,
        user_id: &str,
        question_id: &str,
        feedback_text: &str,
        rating: Option<u8>,
    ) -> Result<Feedback, StoreError> {
        let feedback = Feedback {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            question_id: question_id.to_string(),
            feedback_text: feedback_text.to_string(),
            rating,
            created_at: Utc::now(),
        };

        self.with_conn(|conn| {
            if !question_exists(conn, question_id)? {
                return Err(StoreError::NotFound(format!("question '{}'", question_id)));
            }
            conn.execute(
                "INSERT INTO feedback (id, user_id, question_id, feedback_text, rating, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    feedback.id,
                    feedback.user_id,
                    feedback.question_id,
                    feedback.feedback_text,
                    feedback.rating,
                    feedback.created_at,
                ],
            )?;
            Ok(())
        })?;

        Ok(feedback)
    }

    pub fn list_feedback(&self, question_id: &str) -> Result<Vec<Feedback>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, question_id, feedback_text, rating, created_at
                 FROM feedback WHERE question_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![question_id], |row| {
                Ok(Feedback {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    question_id: row.get(2)?,
                    feedback_text: row.get(3)?,
                    rating: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
}

fn question_exists(conn: &Connection, question_id: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM questions WHERE id = ?1",
            params![question_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn insert_message(conn: &Connection, question_id: &str, message: &ChatMessage) -> Result<(), StoreError> {
    let content = serde_json::to_string(&message.content)?;
    let usage = message
        .token_usage
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO messages (question_id, seq, role, content, token_usage, created_at)
         VALUES (?1,
                 (SELECT COALESCE(MAX(seq), -1) + 1 FROM messages WHERE question_id = ?1),
                 ?2, ?3, ?4, ?5)",
        params![question_id, message.role.as_str(), content, usage, message.timestamp],
    )?;
    Ok(())
}

fn load_messages(conn: &Connection, question_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT role, content, token_usage, created_at FROM messages
         WHERE question_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![question_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, DateTime<Utc>>(3)?,
        ))
    })?;

    let mut messages = Vec::new();
    for row in rows {
        let (role, content, usage, timestamp) = row?;
        let role = Role::parse(&role)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown role '{}'", role)))?;
        let content: MessageContent = serde_json::from_str(&content)?;
        let token_usage = usage
            .map(|json| serde_json::from_str::<TokenUsage>(&json))
            .transpose()?;
        messages.push(ChatMessage {
            role,
            content,
            token_usage,
            timestamp,
        });
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_user() -> (Store, UserAccount) {
        let store = Store::open_in_memory().unwrap();
        let user = store.add_user("asha", "sha256$00$00").unwrap();
        (store, user)
    }

    fn new_question(user_id: &str, text: &str) -> NewQuestion {
        NewQuestion {
            user_id: user_id.to_string(),
            question_text: text.to_string(),
            image: None,
            subject: "Physics".to_string(),
            question_type: "Numerical".to_string(),
            first_message: ChatMessage::user(text),
        }
    }

    #[test]
    fn test_duplicate_username() {
        let (store, _) = store_with_user();
        let err = store.add_user("asha", "x").unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn test_get_user() {
        let (store, user) = store_with_user();
        let found = store.get_user("asha").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.password_hash, "sha256$00$00");
        assert!(store.get_user("nobody").unwrap().is_none());
    }

    #[test]
    fn test_question_thread_appends_in_order() {
        let (store, user) = store_with_user();
        let id = store.add_question(&new_question(&user.id, "What is g?")).unwrap();

        let usage = TokenUsage {
            prompt_tokens: 3,
            completion_tokens: 4,
            total_tokens: 7,
        };
        store
            .add_message(&id, &ChatMessage::assistant("$g = 9.8$").with_usage(Some(usage)))
            .unwrap();
        store.add_message(&id, &ChatMessage::user("Why?")).unwrap();

        let thread = store.get_question(&id).unwrap();
        assert_eq!(thread.question_text, "What is g?");
        assert_eq!(thread.messages.len(), 3);
        assert_eq!(thread.messages[0].role, Role::User);
        assert_eq!(thread.messages[1].token_usage, Some(usage));
        assert_eq!(thread.messages[2].content.text(), "Why?");
        assert_eq!(store.count_user_messages(&id).unwrap(), 2);
    }

    #[test]
    fn test_image_ref_round_trips_through_thread() {
        let (store, user) = store_with_user();
        let image = ImageRef::Url {
            url: "https://img.example/q.png".to_string(),
        };
        let mut question = new_question(&user.id, "See image");
        question.image = Some(image.clone());
        question.first_message = ChatMessage::user(MessageContent::with_image("See image", image.clone()));

        let id = store.add_question(&question).unwrap();
        let thread = store.get_question(&id).unwrap();
        assert_eq!(thread.image, Some(image.clone()));
        assert_eq!(thread.messages[0].content.image(), Some(&image));
    }

    #[test]
    fn test_missing_question() {
        let (store, _) = store_with_user();
        assert!(matches!(store.get_question("nope"), Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.add_message("nope", &ChatMessage::user("x")),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.count_user_messages("nope").unwrap(), 0);
    }

    #[test]
    fn test_list_questions_per_user() {
        let (store, user) = store_with_user();
        let other = store.add_user("ravi", "h").unwrap();
        store.add_question(&new_question(&user.id, "one")).unwrap();
        store.add_question(&new_question(&user.id, "two")).unwrap();
        store.add_question(&new_question(&other.id, "three")).unwrap();

        let mine = store.list_questions(&user.id).unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|q| q.message_count == 1));
        assert_eq!(store.list_questions(&other.id).unwrap().len(), 1);
    }

    #[test]
    fn test_feedback() {
        let (store, user) = store_with_user();
        let id = store.add_question(&new_question(&user.id, "q")).unwrap();

        store.add_feedback(&user.id, &id, "clear answer", Some(5)).unwrap();
        store.add_feedback(&user.id, &id, "too long", None).unwrap();

        let feedback = store.list_feedback(&id).unwrap();
        assert_eq!(feedback.len(), 2);
        assert_eq!(feedback[0].rating, Some(5));
        assert_eq!(feedback[1].rating, None);

        assert!(matches!(
            store.add_feedback(&user.id, "nope", "x", None),
            Err(StoreError::NotFound(_))
        ));
    }

    fn reject_assistant_messages(store: &Store) {
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER no_answers BEFORE INSERT ON messages
                     WHEN NEW.role = 'assistant'
                     BEGIN SELECT RAISE(ABORT, 'answers disabled'); END;",
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_question_with_replies_is_all_or_nothing() {
        let (store, user) = store_with_user();
        let id = store
            .add_question_with_replies(&new_question(&user.id, "q1"), &[ChatMessage::assistant("a1")])
            .unwrap();
        assert_eq!(store.get_question(&id).unwrap().messages.len(), 2);

        reject_assistant_messages(&store);
        let err = store
            .add_question_with_replies(&new_question(&user.id, "q2"), &[ChatMessage::assistant("a2")])
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));

        let listed = store.list_questions(&user.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].question_text, "q1");
    }

    #[test]
    fn test_append_messages_is_all_or_nothing() {
        let (store, user) = store_with_user();
        let id = store.add_question(&new_question(&user.id, "q")).unwrap();

        reject_assistant_messages(&store);
        let exchange = [ChatMessage::user("why?"), ChatMessage::assistant("because")];
        assert!(store.append_messages(&id, &exchange).is_err());

        assert_eq!(store.count_user_messages(&id).unwrap(), 1);
        assert_eq!(store.get_question(&id).unwrap().messages.len(), 1);
    }

    #[test]
    fn test_open_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doubt.db");
        {
            let store = Store::open(&path).unwrap();
            store.add_user("asha", "h").unwrap();
        }
        let reopened = Store::open(&path).unwrap();
        assert!(reopened.get_user("asha").unwrap().is_some());
    }
}
