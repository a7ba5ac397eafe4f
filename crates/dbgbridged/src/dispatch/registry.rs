//! Name to handler table.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use thiserror::Error;

use crate::protocol::{Reply, Request};

use super::CommandError;

/// Handles one named command.
///
/// Handlers run on the connection's worker thread. They receive the request
/// read-only and never choose the response `id` or `command`.
pub trait CommandHandler: Send + Sync + 'static {
    /// Runs the command.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] describing why the command failed.
    fn handle(&self, request: &Request) -> Result<Reply, CommandError>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Request) -> Result<Reply, CommandError> + Send + Sync + 'static,
{
    fn handle(&self, request: &Request) -> Result<Reply, CommandError> {
        self(request)
    }
}

/// Registration failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A handler with this name already exists.
    #[error("command '{name}' is already registered")]
    Duplicate {
        /// Name that was registered twice.
        name: String,
    },
    /// The registry was frozen when the server started.
    #[error("cannot register '{name}': the registry is frozen")]
    Frozen {
        /// Name that arrived too late.
        name: String,
    },
    /// Command names must contain a non-whitespace character.
    #[error("command names must not be empty")]
    EmptyName,
}

type HandlerMap = HashMap<String, Arc<dyn CommandHandler>>;

/// Command table built at startup and read-only once frozen.
#[derive(Default)]
pub struct CommandRegistry {
    building: Mutex<HandlerMap>,
    frozen: OnceLock<HandlerMap>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

impl CommandRegistry {
    /// Creates an empty, unfrozen registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler under `name`.
    ///
    /// # Errors
    ///
    /// Fails when `name` is empty, already registered, or the registry has been
    /// frozen.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), RegistryError> {
        let command = name.into();
        if command.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let mut building = self.building.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so a concurrent freeze cannot lose the entry.
        if self.is_frozen() {
            return Err(RegistryError::Frozen { name: command });
        }
        if building.contains_key(&command) {
            return Err(RegistryError::Duplicate { name: command });
        }
        building.insert(command, handler);
        Ok(())
    }

    /// Stops accepting registrations. Idempotent.
    pub fn freeze(&self) {
        let mut building = self.building.lock().unwrap_or_else(PoisonError::into_inner);
        if self.frozen.get().is_none() {
            let _ = self.frozen.set(std::mem::take(&mut *building));
        }
    }

    /// Whether [`Self::freeze`] has run.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// Finds the handler for `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        if let Some(frozen) = self.frozen.get() {
            return frozen.get(name).cloned();
        }
        self.building
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered command names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.frozen.get() {
            Some(frozen) => frozen.keys().cloned().collect(),
            None => self
                .building
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned()
                .collect(),
        };
        names.sort_unstable();
        names
    }
}
