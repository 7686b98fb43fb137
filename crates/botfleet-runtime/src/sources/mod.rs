// Source connectors: how workers attach to their external message source
//
// - TelegramConnector: production long-polling transport
// - ScriptedConnector: in-memory scripted streams for tests

pub mod scripted;
pub mod telegram;

pub use scripted::{ScriptHandle, ScriptedConnector, ScriptedSource};
pub use telegram::{TelegramConnector, TelegramSource};
