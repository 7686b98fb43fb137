// Scripted in-memory sources for tests
//
// Each token maps to a queue of events and injected failures. Attaching
// consumes the queue's receiving end; dropping the handle ends the stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use botfleet_core::{EventSource, SourceConnector, SourceError, SourceEvent};

type ScriptItem = Result<SourceEvent, SourceError>;

struct ScriptEntry {
    rx: Option<mpsc::UnboundedReceiver<ScriptItem>>,
    deny: Option<String>,
}

/// Connector whose per-token behavior is scripted by the test
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    entries: Arc<Mutex<HashMap<String, ScriptEntry>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token and get the handle that feeds its stream.
    /// Dropping the handle closes the stream.
    pub fn script(&self, token: &str) -> ScriptHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.lock().unwrap().insert(
            token.to_string(),
            ScriptEntry {
                rx: Some(rx),
                deny: None,
            },
        );
        ScriptHandle { tx }
    }

    /// Make attach fail for this token
    pub fn deny(&self, token: &str, reason: &str) {
        self.entries.lock().unwrap().insert(
            token.to_string(),
            ScriptEntry {
                rx: None,
                deny: Some(reason.to_string()),
            },
        );
    }
}

#[async_trait]
impl SourceConnector for ScriptedConnector {
    async fn attach(&self, token: &str) -> Result<Box<dyn EventSource>, SourceError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(token) {
            None => Err(SourceError::Attach(format!("unknown token: {token}"))),
            Some(entry) => {
                if let Some(reason) = &entry.deny {
                    return Err(SourceError::Attach(reason.clone()));
                }
                let rx = entry
                    .rx
                    .take()
                    .ok_or_else(|| SourceError::Attach("token already attached".into()))?;
                Ok(Box::new(ScriptedSource { rx }))
            }
        }
    }
}

/// Feeds events and failures into one scripted stream
#[derive(Clone)]
pub struct ScriptHandle {
    tx: mpsc::UnboundedSender<ScriptItem>,
}

impl ScriptHandle {
    /// Deliver one event
    pub fn emit(&self, subject_id: i64, subject_label: &str) {
        let _ = self.tx.send(Ok(SourceEvent {
            subject_id,
            subject_label: subject_label.to_string(),
        }));
    }

    /// Inject a receive failure
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(SourceError::Receive(reason.to_string())));
    }
}

/// Stream end of a scripted token
#[derive(Debug)]
pub struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<ScriptItem>,
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Err(SourceError::Closed),
        }
    }
}
