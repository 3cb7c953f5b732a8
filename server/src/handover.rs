use std::collections::HashMap;

/// Key/value data gates exchange during an evaluation, persisted for use by
/// the session establishment step once the client is admitted.
///
/// Values are opaque JSON strings. Writes are last-write-wins; gates that
/// share keys are expected to coordinate naming among themselves, the store
/// provides no namespacing. The store has no locking of its own: it lives
/// inside the deferral's single guarded state so reads never observe a torn
/// update relative to gate verdicts.
#[derive(Debug, Clone, Default)]
pub struct HandoverStore {
    entries: HashMap<String, String>,
}

impl HandoverStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `json` under `key`, replacing any previous value.
    pub fn set(&mut self, key: &str, json: &str) {
        self.entries.insert(key.to_string(), json.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Copies the current contents out, detaching the caller from later writes.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
