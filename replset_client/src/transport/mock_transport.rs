//! Scripted in-memory transport for monitor and client tests.
use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bson::{doc, Document};
use parking_lot::Mutex;

use crate::{Command, CommandTransport, Connection, ConnectionId, ServerAddress, TransportError};

#[derive(Debug, Clone)]
pub(crate) struct MockServer {
    pub hello: Document,
    pub reachable: bool,
    pub delay: Duration,
    /// Commands other than `hello` fail as if the connection dropped.
    pub drop_commands: bool,
    /// Number of `hello` commands that carried client metadata.
    pub handshakes: usize,
    pub replies: HashMap<String, Document>,
    pub received: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    servers: Arc<Mutex<HashMap<ServerAddress, MockServer>>>,
    next_id: Arc<AtomicU32>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_server(&self, address: &str, hello: Document) {
        let mut servers = self.servers.lock();
        let server = servers.entry(addr(address)).or_insert_with(|| MockServer {
            hello: Document::new(),
            reachable: true,
            delay: Duration::ZERO,
            drop_commands: false,
            handshakes: 0,
            replies: HashMap::new(),
            received: Vec::new(),
        });
        server.hello = hello;
        server.reachable = true;
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        if let Some(server) = self.servers.lock().get_mut(&addr(address)) {
            server.reachable = reachable;
        }
    }

    pub fn set_delay(&self, address: &str, delay: Duration) {
        if let Some(server) = self.servers.lock().get_mut(&addr(address)) {
            server.delay = delay;
        }
    }

    pub fn set_drop_commands(&self, address: &str, drop_commands: bool) {
        if let Some(server) = self.servers.lock().get_mut(&addr(address)) {
            server.drop_commands = drop_commands;
        }
    }

    pub fn set_reply(&self, address: &str, command_name: &str, reply: Document) {
        if let Some(server) = self.servers.lock().get_mut(&addr(address)) {
            server.replies.insert(command_name.to_string(), reply);
        }
    }

    /// Number of `hello` commands with client metadata that `address` accepted.
    pub fn handshakes(&self, address: &str) -> usize {
        self.servers
            .lock()
            .get(&addr(address))
            .map(|s| s.handshakes)
            .unwrap_or(0)
    }

    /// Names of the commands other than `hello` that `address` received.
    pub fn received(&self, address: &str) -> Vec<String> {
        self.servers
            .lock()
            .get(&addr(address))
            .map(|s| s.received.clone())
            .unwrap_or_default()
    }

    fn refused(address: &ServerAddress) -> TransportError {
        TransportError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("{} refused the connection", address),
        ))
    }
}

#[async_trait]
impl CommandTransport for MockTransport {
    async fn checkout(
        &self,
        address: &ServerAddress,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let reachable = self
            .servers
            .lock()
            .get(address)
            .map(|s| s.reachable)
            .unwrap_or(false);
        if !reachable {
            return Err(Self::refused(address));
        }

        Ok(Box::new(MockConnection {
            id: ConnectionId {
                address: address.clone(),
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
            },
            metadata_sent: false,
            metadata_seen: false,
            servers: self.servers.clone(),
        }))
    }
}

struct MockConnection {
    id: ConnectionId,
    metadata_sent: bool,
    /// Server side of the handshake state, kept apart from what the client claims.
    metadata_seen: bool,
    servers: Arc<Mutex<HashMap<ServerAddress, MockServer>>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn metadata_sent(&self) -> bool {
        self.metadata_sent
    }

    fn mark_metadata_sent(&mut self) {
        self.metadata_sent = true;
    }

    async fn send_command(&mut self, command: &Command) -> Result<Document, TransportError> {
        let (reply, delay) = {
            let mut servers = self.servers.lock();
            let server = match servers.get_mut(&self.id.address) {
                Some(server) if server.reachable => server,
                _ => return Err(MockTransport::refused(&self.id.address)),
            };
            let reply = match command.name() {
                "hello" if command.body.contains_key("client") && self.metadata_seen => {
                    doc! {
                        "ok": 0.0,
                        "code": 186,
                        "codeName": "ClientMetadataCannotBeMutated",
                        "errmsg": "The client metadata document may only be sent in the first hello",
                    }
                }
                "hello" => {
                    if command.body.contains_key("client") {
                        self.metadata_seen = true;
                        server.handshakes += 1;
                    }
                    server.hello.clone()
                }
                name if server.drop_commands => {
                    return Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        format!("{} reset the connection during `{}`", self.id.address, name),
                    )));
                }
                name => {
                    server.received.push(name.to_string());
                    server
                        .replies
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| doc! { "ok": 1.0 })
                }
            };
            (reply, server.delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(reply)
    }
}

fn addr(address: &str) -> ServerAddress {
    ServerAddress::parse(address).unwrap()
}

/// Builds a `hello` reply for a replica-set member.
pub(crate) fn hello(
    role: &str,
    set_name: &str,
    me: &str,
    hosts: &[&str],
    tags: &[(&str, &str)],
) -> Document {
    let mut tag_doc = Document::new();
    for (k, v) in tags {
        tag_doc.insert(*k, *v);
    }
    let mut reply = doc! {
        "ok": 1.0,
        "isWritablePrimary": role == "primary",
        "secondary": role == "secondary",
        "setName": set_name,
        "me": me,
        "hosts": hosts.iter().map(|h| h.to_string()).collect::<Vec<_>>(),
        "tags": tag_doc,
    };
    if role == "arbiter" {
        reply.insert("arbiterOnly", true);
    }
    if role == "hidden" {
        reply.insert("hidden", true);
    }
    reply
}
