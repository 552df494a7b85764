//! Removal tokens for handlers and subscriptions.

use parking_lot::Mutex;
use std::fmt;

type Remover = Box<dyn FnOnce() + Send>;

/// Undoes one registration (`add`, `on`, `once`).
///
/// Removal is idempotent, and a token only ever removes the registration that
/// produced it: after a name is re-registered, an old token is a no-op.
/// Dropping the token does not remove anything.
pub struct RemovalToken {
    name: String,
    remover: Mutex<Option<Remover>>,
}

impl RemovalToken {
    pub(crate) fn new(name: impl Into<String>, remover: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            remover: Mutex::new(Some(Box::new(remover))),
        }
    }

    /// Name the registration was made under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the registration. Returns `false` if this token was already used.
    pub fn remove(&self) -> bool {
        // Take first so the remover runs without the lock held
        let remover = self.remover.lock().take();
        match remover {
            Some(remove) => {
                remove();
                true
            }
            None => false,
        }
    }

    /// Whether `remove` has been called.
    pub fn is_removed(&self) -> bool {
        self.remover.lock().is_none()
    }
}

impl fmt::Debug for RemovalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemovalToken")
            .field("name", &self.name)
            .field("removed", &self.is_removed())
            .finish()
    }
}
