use crate::core::serialization::PacketReader;
use crate::error::{constants, ProtocolError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn<T> = dyn Fn(&T, &mut PacketReader<'_>) -> Result<()> + Send + Sync + 'static;

/// Routes payloads to handlers by their leading tag byte.
///
/// `T` is whatever the handlers need to act on, typically a
/// `Connection<Session>` plus shared application state.
pub struct Dispatcher<T> {
    handlers: Arc<RwLock<HashMap<u8, Box<HandlerFn<T>>>>>,
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
        }
    }
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `handler` for `tag`, replacing any previous one
    pub fn register<F>(&self, tag: impl Into<u8>, handler: F) -> Result<()>
    where
        F: Fn(&T, &mut PacketReader<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        handlers.insert(tag.into(), Box::new(handler));
        Ok(())
    }

    /// Read the tag byte and hand the rest of `payload` to its handler
    pub fn dispatch(&self, target: &T, payload: &[u8]) -> Result<()> {
        let mut reader = PacketReader::new(payload);
        let tag = reader
            .read_u8()
            .map_err(|_| ProtocolError::MalformedPayload(constants::ERR_EMPTY_PAYLOAD.to_string()))?;

        let handlers = self.handlers.read().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string())
        })?;

        handlers
            .get(&tag)
            .ok_or(ProtocolError::UnexpectedMessage(tag))
            .and_then(|handler| handler(target, &mut reader))
    }

    pub fn is_registered(&self, tag: u8) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(&tag))
            .unwrap_or(false)
    }
}
