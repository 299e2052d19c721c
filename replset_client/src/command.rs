//! Commands are the only way to talk to a replica-set member.
//! A command is a body document addressed to a database. The database is sent as the `$db`
//! field when the command goes over the wire, and every command carries a process-wide unique
//! request id so that monitoring events and wire messages can be correlated.
use std::{
    fmt,
    sync::atomic::{AtomicI32, Ordering},
};

use bson::{doc, Bson, Document};

use crate::error_chain_fmt;

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub database: String,
    pub body: Document,
    request_id: i32,
}

impl Command {
    pub fn new(database: impl Into<String>, body: Document) -> Self {
        Self {
            database: database.into(),
            body,
            request_id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The handshake and monitoring command.
    pub fn hello(app_name: Option<&str>) -> Self {
        let mut body = doc! { "hello": 1 };
        if let Some(name) = app_name {
            body.insert("client", doc! { "application": { "name": name } });
        }
        Self::new("admin", body)
    }

    pub fn ping() -> Self {
        Self::new("admin", doc! { "ping": 1 })
    }

    /// The command name is the first key of the body.
    pub fn name(&self) -> &str {
        self.body.keys().next().map(String::as_str).unwrap_or("")
    }

    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    /// The body with `$db` appended, as it is sent to the server.
    pub(crate) fn to_wire_document(&self) -> Document {
        let mut document = self.body.clone();
        document.insert("$db", self.database.clone());
        document
    }
}

/// Turns a reply whose `ok` field is not 1 into a [`CommandError`].
pub fn check_reply(reply: Document) -> Result<Document, CommandError> {
    let ok = match reply.get("ok") {
        Some(Bson::Double(v)) => *v == 1.0,
        Some(Bson::Int32(v)) => *v == 1,
        Some(Bson::Int64(v)) => *v == 1,
        Some(Bson::Boolean(v)) => *v,
        _ => false,
    };
    if ok {
        return Ok(reply);
    }

    let code = match reply.get("code") {
        Some(Bson::Int32(v)) => *v,
        Some(Bson::Int64(v)) => *v as i32,
        Some(Bson::Double(v)) => *v as i32,
        _ => 0,
    };
    Err(CommandError {
        code,
        code_name: reply.get_str("codeName").unwrap_or_default().to_string(),
        message: reply
            .get_str("errmsg")
            .unwrap_or("reply did not contain ok: 1")
            .to_string(),
    })
}

#[derive(thiserror::Error, Clone, PartialEq, Eq)]
#[error("Command failed with code {code} ({code_name}): {message}")]
pub struct CommandError {
    pub code: i32,
    pub code_name: String,
    pub message: String,
}

impl fmt::Debug for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        error_chain_fmt(self, f)
    }
}
