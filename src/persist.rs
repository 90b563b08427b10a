//! Debounced, expiring form drafts on top of a [`DraftStorage`].
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{runtime::Handle, task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use crate::storage::{DraftStorage, PersistError};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);
pub const UNLOAD_MESSAGE: &str = "You have unsaved changes. Are you sure you want to leave?";

#[derive(Debug, Clone)]
pub struct PersistOptions {
    pub key: String,
    pub debounce: Duration,
    pub expiry: Duration,
    pub confirm_unload: bool,
}

impl PersistOptions {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            debounce: DEFAULT_DEBOUNCE,
            expiry: DEFAULT_EXPIRY,
            confirm_unload: true,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Saved<T> {
    data: T,
    saved_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

struct Draft<T> {
    values: Option<T>,
    dirty: bool,
}

/// Keeps one form's values in storage under `options.key`.
///
/// [`update`](Self::update) debounces on the current tokio runtime. Outside a runtime it writes
/// through immediately.
pub struct FormPersistence<T> {
    storage: Arc<dyn DraftStorage>,
    options: PersistOptions,
    draft: Arc<Mutex<Draft<T>>>,
    pending: Option<JoinHandle<()>>,
}

impl<T> FormPersistence<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    pub fn new(storage: Arc<dyn DraftStorage>, options: PersistOptions) -> Self {
        Self {
            storage,
            options,
            draft: Arc::new(Mutex::new(Draft {
                values: None,
                dirty: false,
            })),
            pending: None,
        }
    }

    /// Saved values, if any are stored and not yet expired.
    ///
    /// Expired or unreadable drafts are removed from storage.
    pub fn restore(&mut self) -> Result<Option<T>, PersistError> {
        let Some(raw) = self.storage.get(&self.options.key)? else {
            return Ok(None);
        };

        let saved = match serde_json::from_str::<Saved<T>>(&raw) {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Discarding unreadable draft {}: {e}", self.options.key);
                self.storage.remove(&self.options.key)?;
                return Ok(None);
            }
        };

        if saved.expires_at <= Utc::now() {
            debug!("Discarding draft {} saved at {}", self.options.key, saved.saved_at);
            self.storage.remove(&self.options.key)?;
            return Ok(None);
        }

        let mut draft = lock(&self.draft);
        draft.values = Some(saved.data.clone());
        draft.dirty = false;

        Ok(Some(saved.data))
    }

    /// Records new values and schedules a save after the debounce window.
    pub fn update(&mut self, values: T) {
        {
            let mut draft = lock(&self.draft);
            draft.values = Some(values);
            draft.dirty = true;
        }

        self.cancel();

        let Ok(runtime) = Handle::try_current() else {
            debug!("No runtime for draft {}, saving without debounce", self.options.key);
            if let Err(e) = write(self.storage.as_ref(), &self.options, &self.draft) {
                warn!("Failed to save draft {}: {e}", self.options.key);
            }
            return;
        };

        let storage = self.storage.clone();
        let options = self.options.clone();
        let draft = self.draft.clone();

        self.pending = Some(runtime.spawn(async move {
            sleep(options.debounce).await;

            if let Err(e) = write(storage.as_ref(), &options, &draft) {
                warn!("Failed to save draft {}: {e}", options.key);
            }
        }));
    }

    pub fn save_now(&mut self) -> Result<(), PersistError> {
        self.cancel();
        write(self.storage.as_ref(), &self.options, &self.draft)
    }

    pub fn clear(&mut self) -> Result<(), PersistError> {
        self.cancel();

        let mut draft = lock(&self.draft);
        draft.values = None;
        draft.dirty = false;

        self.storage.remove(&self.options.key)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        lock(&self.draft).dirty
    }

    /// Prompt to show before leaving, when enabled and something is unsaved.
    pub fn confirm_unload(&self) -> Option<&'static str> {
        (self.options.confirm_unload && self.has_unsaved_changes()).then_some(UNLOAD_MESSAGE)
    }

    pub fn options(&self) -> &PersistOptions {
        &self.options
    }
}

impl<T> FormPersistence<T> {
    fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl<T> Drop for FormPersistence<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write<T: Serialize>(
    storage: &dyn DraftStorage,
    options: &PersistOptions,
    draft: &Mutex<Draft<T>>,
) -> Result<(), PersistError> {
    let mut draft = lock(draft);

    let Some(values) = &draft.values else {
        return Ok(());
    };

    let saved_at = Utc::now();
    let expiry = chrono::Duration::from_std(options.expiry).unwrap_or_else(|_| chrono::Duration::days(1));
    let saved = Saved {
        data: values,
        saved_at,
        expires_at: saved_at + expiry,
    };

    storage.set(&options.key, &serde_json::to_string(&saved)?)?;
    draft.dirty = false;

    Ok(())
}
