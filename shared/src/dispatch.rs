//! Command id → handler registry
//!
//! Each component registers its handlers explicitly when it is built. A
//! registry instance covers one id space: the node owns one for signaling
//! commands and one for peer commands.
//!
//! `dispatch` is a fault barrier. Unknown ids and handler errors are logged
//! and reported through [`DispatchOutcome`], never returned to the caller, so
//! one bad message cannot stop the messages queued behind it.

use crate::codec::ByteReader;
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// What happened to a dispatched message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// Id outside the enumeration or without a bound handler; dropped
    Unhandled,
    /// The handler ran and returned an error; logged and dropped
    Failed,
}

type Handler<Ctx, Src, E> = Box<dyn FnMut(&mut Ctx, &Src, &mut ByteReader<'_>) -> Result<(), E>>;

struct Registration<Ctx, Src, E> {
    owner: &'static str,
    handler: Handler<Ctx, Src, E>,
}

/// Maps command ids of type `C` to handlers operating on `Ctx`.
/// `Src` describes where a message came from (unit for signaling, the peer
/// token for peer channels).
pub struct CommandRegistry<C, Ctx, Src, E> {
    name: &'static str,
    handlers: HashMap<C, Registration<Ctx, Src, E>>,
}

impl<C, Ctx, Src, E> CommandRegistry<C, Ctx, Src, E>
where
    C: Copy + Eq + Hash + Debug + TryFrom<u8>,
    E: Display,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: HashMap::new(),
        }
    }

    /// Binds `handler` to `command` on behalf of `owner`.
    ///
    /// Returns false (and logs) when the id is already bound; the first
    /// registration stays active.
    pub fn register<F>(&mut self, owner: &'static str, command: C, handler: F) -> bool
    where
        F: FnMut(&mut Ctx, &Src, &mut ByteReader<'_>) -> Result<(), E> + 'static,
    {
        if let Some(existing) = self.handlers.get(&command) {
            warn!(
                "{}: {} tried to register {:?}, already bound by {}; ignoring",
                self.name, owner, command, existing.owner
            );
            return false;
        }

        self.handlers.insert(
            command,
            Registration {
                owner,
                handler: Box::new(handler),
            },
        );
        true
    }

    pub fn is_registered(&self, command: C) -> bool {
        self.handlers.contains_key(&command)
    }

    /// Name of the component bound to `command`
    pub fn owner_of(&self, command: C) -> Option<&'static str> {
        self.handlers.get(&command).map(|r| r.owner)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler bound to `id` over the rest of `reader`
    pub fn dispatch(
        &mut self,
        ctx: &mut Ctx,
        src: &Src,
        id: u8,
        reader: &mut ByteReader<'_>,
    ) -> DispatchOutcome {
        let Ok(command) = C::try_from(id) else {
            warn!("{}: unknown command id {}, dropping message", self.name, id);
            return DispatchOutcome::Unhandled;
        };

        let Some(registration) = self.handlers.get_mut(&command) else {
            warn!("{}: no handler for {:?}, dropping message", self.name, command);
            return DispatchOutcome::Unhandled;
        };

        match (registration.handler)(ctx, src, reader) {
            Ok(()) => {
                debug!("{}: handled {:?}", self.name, command);
                DispatchOutcome::Handled
            }
            Err(e) => {
                warn!(
                    "{}: {} failed on {:?}: {}",
                    self.name, registration.owner, command, e
                );
                DispatchOutcome::Failed
            }
        }
    }

    /// Reads the leading command byte of `frame` and dispatches the rest
    pub fn dispatch_frame(&mut self, ctx: &mut Ctx, src: &Src, frame: &[u8]) -> DispatchOutcome {
        let mut reader = ByteReader::new(frame);
        match reader.read_u8() {
            Ok(id) => self.dispatch(ctx, src, id, &mut reader),
            Err(_) => {
                warn!("{}: empty frame, dropping", self.name);
                DispatchOutcome::Unhandled
            }
        }
    }
}
