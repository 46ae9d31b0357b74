//! Inbound message dispatch by type tag.
//!
//! A [`Dispatcher`] is built once per role (server or client), with one
//! handler per message type, and then shared. `Ctx` is whatever per-
//! connection state the handlers need; the dispatcher itself holds none,
//! so one instance serves every connection.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    Envelope, ErasedValue, ProtocolError, SerializationRegistry, TypeTag,
    WireType,
};

type Handler<Ctx> =
    Box<dyn Fn(&mut Ctx, ErasedValue) -> Result<(), ProtocolError> + Send + Sync>;

/// Routes decoded messages to their handler.
pub struct Dispatcher<Ctx> {
    registry: Arc<SerializationRegistry>,
    handlers: HashMap<TypeTag, Handler<Ctx>>,
}

impl<Ctx: 'static> Dispatcher<Ctx> {
    pub fn new(registry: Arc<SerializationRegistry>) -> Self {
        Self {
            registry,
            handlers: HashMap::new(),
        }
    }

    /// Registers the handler for messages of type `T`.
    ///
    /// # Errors
    /// - [`ProtocolError::NotRegistered`] if `T` has no registry binding.
    /// - [`ProtocolError::DuplicateHandler`] if `T` already has a handler;
    ///   the existing one stays.
    pub fn register_handler<T, F>(&mut self, handler: F) -> Result<(), ProtocolError>
    where
        T: WireType,
        F: Fn(&mut Ctx, T) + Send + Sync + 'static,
    {
        if !self.registry.contains(T::TAG) {
            return Err(ProtocolError::NotRegistered(T::NAME));
        }
        if self.handlers.contains_key(&T::TAG) {
            return Err(ProtocolError::DuplicateHandler(T::TAG));
        }

        let erased: Handler<Ctx> = Box::new(move |ctx: &mut Ctx, value: ErasedValue| {
            let value = value
                .downcast::<T>()
                .map_err(|_| ProtocolError::TypeMismatch(T::NAME))?;
            handler(ctx, *value);
            Ok(())
        });
        self.handlers.insert(T::TAG, erased);
        Ok(())
    }

    /// Decodes `body` as `tag` and runs its handler.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownType`] for tags the registry doesn't know,
    /// [`ProtocolError::Unhandled`] for known tags without a handler, or the
    /// decode error. The caller logs and drops the message.
    pub fn dispatch(
        &self,
        ctx: &mut Ctx,
        tag: TypeTag,
        body: &[u8],
    ) -> Result<(), ProtocolError> {
        if !self.registry.contains(tag) {
            return Err(ProtocolError::UnknownType(tag));
        }
        let handler = self.handlers.get(&tag).ok_or(ProtocolError::Unhandled(tag))?;
        let value = self.registry.decode(tag, body)?;
        handler(ctx, value)
    }

    /// Dispatches the body of an envelope.
    pub fn dispatch_envelope(
        &self,
        ctx: &mut Ctx,
        envelope: &Envelope,
    ) -> Result<(), ProtocolError> {
        self.dispatch(ctx, envelope.tag, &envelope.body)
    }

    pub fn handles(&self, tag: TypeTag) -> bool {
        self.handlers.contains_key(&tag)
    }
}

impl<Ctx> std::fmt::Debug for Dispatcher<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().copied().collect();
        tags.sort();
        f.debug_struct("Dispatcher").field("handlers", &tags).finish()
    }
}
