//! Conversation state store.
//!
//! A thread-safe, string-keyed container shared by every `Execute` call of
//! one conversation. Values are type-erased and read back through typed
//! accessors; a handful of keys are reserved for the engine's own data
//! (history, working memory, task plan, collaborator handles).
//!
//! All access is serialized by a single `RwLock`.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StateError;
use crate::message::Message;
use crate::todo::TaskPlan;

/// Reserved keys used by the engine.
pub mod keys {
    pub const HISTORY: &str = "history";
    pub const FILES: &str = "files";
    pub const CURRENT_ARTICLE: &str = "current_article";
    pub const TODO: &str = "todo";
    pub const DICTIONARIES: &str = "dictionaries";
    pub const STORAGE: &str = "storage";
    pub const TOOLS_REGISTRY: &str = "tools_registry";

    pub const RESERVED: [&str; 7] = [
        HISTORY,
        FILES,
        CURRENT_ARTICLE,
        TODO,
        DICTIONARIES,
        STORAGE,
        TOOLS_REGISTRY,
    ];

    pub fn is_reserved(key: &str) -> bool {
        RESERVED.contains(&key)
    }
}

/// Header of the working-memory block injected into the system prompt.
pub const ARTICLE_CONTEXT_MARKER: &str = "ARTICLE CONTEXT";

/// Working-memory entry: one attached file and its cached analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub filename: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub mime_type: String,

    #[serde(default)]
    pub size: u64,

    /// Result of a vision model's analysis, reused on later turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_description: Option<String>,
}

impl FileMeta {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: String::new(),
            mime_type: String::new(),
            size: 0,
            vision_description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.vision_description = Some(description.into());
        self
    }
}

/// Files grouped by tag (e.g. "sketch", "plm_data"), ordered for stable output.
pub type FileMap = BTreeMap<String, Vec<FileMeta>>;

type Entry = Box<dyn Any + Send + Sync>;

/// The conversation state store.
pub struct CoreState {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Default for CoreState {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreState {
    /// Create a store with empty history, working memory and plan.
    pub fn new() -> Self {
        let mut entries: HashMap<String, Entry> = HashMap::new();
        entries.insert(keys::HISTORY.into(), Box::new(Vec::<Message>::new()));
        entries.insert(keys::FILES.into(), Box::new(FileMap::new()));
        entries.insert(keys::TODO.into(), Box::new(TaskPlan::new()));
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Generic key-value access ──────────────────────────────────────

    /// Read a clone of the value stored under `key`.
    pub fn get<T>(&self, key: &str) -> Result<T, StateError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entries = self.read();
        let value = entries
            .get(key)
            .ok_or_else(|| StateError::KeyNotFound(key.to_string()))?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| invalid_type::<T>(key))
    }

    /// Store `value` under a non-reserved `key`, replacing any previous value.
    pub fn set<T>(&self, key: &str, value: T) -> Result<(), StateError>
    where
        T: Send + Sync + 'static,
    {
        reject_reserved(key)?;
        self.write().insert(key.to_string(), Box::new(value));
        Ok(())
    }

    /// Atomic read-modify-write of a non-reserved key.
    ///
    /// `f` receives the current value (`None` if absent) and returns the new
    /// one; returning `None` deletes the key. A stored value of another type
    /// is left untouched and reported as `InvalidType`.
    pub fn update<T, F>(&self, key: &str, f: F) -> Result<(), StateError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Option<T>) -> Option<T>,
    {
        reject_reserved(key)?;
        let mut entries = self.write();

        let current = match entries.remove(key) {
            None => None,
            Some(boxed) => match boxed.downcast::<T>() {
                Ok(typed) => Some(*typed),
                Err(original) => {
                    entries.insert(key.to_string(), original);
                    return Err(invalid_type::<T>(key));
                }
            },
        };

        if let Some(next) = f(current) {
            entries.insert(key.to_string(), Box::new(next));
        }
        Ok(())
    }

    /// Remove a non-reserved key. Missing keys are an error.
    pub fn delete(&self, key: &str) -> Result<(), StateError> {
        reject_reserved(key)?;
        self.write()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StateError::KeyNotFound(key.to_string()))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// All keys currently stored, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Run `f` against a reserved entry under the write lock.
    fn with_reserved_mut<T, R>(
        &self,
        key: &'static str,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, StateError>
    where
        T: Default + Send + Sync + 'static,
    {
        let mut entries = self.write();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Box::new(T::default()));
        let typed = entry
            .downcast_mut::<T>()
            .ok_or_else(|| invalid_type::<T>(key))?;
        Ok(f(typed))
    }

    /// Read a reserved entry under the read lock.
    fn with_reserved<T, R>(&self, key: &'static str, f: impl FnOnce(Option<&T>) -> R) -> R
    where
        T: Send + Sync + 'static,
    {
        let entries = self.read();
        f(entries.get(key).and_then(|v| v.downcast_ref::<T>()))
    }

    // ── History ───────────────────────────────────────────────────────

    /// Append a message to the dialogue history.
    pub fn append(&self, message: Message) -> Result<(), StateError> {
        self.with_reserved_mut(keys::HISTORY, |history: &mut Vec<Message>| {
            history.push(message)
        })
    }

    /// A copy of the full dialogue history.
    pub fn history(&self) -> Vec<Message> {
        self.with_reserved(keys::HISTORY, |h: Option<&Vec<Message>>| {
            h.cloned().unwrap_or_default()
        })
    }

    /// The most recent history message.
    pub fn last_message(&self) -> Option<Message> {
        self.with_reserved(keys::HISTORY, |h: Option<&Vec<Message>>| {
            h.and_then(|h| h.last().cloned())
        })
    }

    pub fn history_len(&self) -> usize {
        self.with_reserved(keys::HISTORY, |h: Option<&Vec<Message>>| {
            h.map_or(0, Vec::len)
        })
    }

    pub fn clear_history(&self) -> Result<(), StateError> {
        self.with_reserved_mut(keys::HISTORY, |history: &mut Vec<Message>| history.clear())
    }

    // ── Working memory ────────────────────────────────────────────────

    /// Replace the working-memory file set.
    pub fn set_files(&self, files: FileMap) -> Result<(), StateError> {
        self.with_reserved_mut(keys::FILES, |current: &mut FileMap| *current = files)
    }

    pub fn files(&self) -> FileMap {
        self.with_reserved(keys::FILES, |f: Option<&FileMap>| f.cloned().unwrap_or_default())
    }

    /// Store the vision analysis for one file.
    pub fn update_file_analysis(
        &self,
        tag: &str,
        filename: &str,
        description: impl Into<String>,
    ) -> Result<(), StateError> {
        let description = description.into();
        self.with_reserved_mut(keys::FILES, |files: &mut FileMap| {
            files
                .get_mut(tag)
                .and_then(|list| list.iter_mut().find(|f| f.filename == filename))
                .map(|file| file.vision_description = Some(description))
                .ok_or_else(|| StateError::FileNotFound {
                    tag: tag.to_string(),
                    filename: filename.to_string(),
                })
        })?
    }

    pub fn set_current_article(&self, article_id: impl Into<String>) -> Result<(), StateError> {
        let article_id = article_id.into();
        self.with_reserved_mut(keys::CURRENT_ARTICLE, |current: &mut String| {
            *current = article_id
        })
    }

    pub fn current_article(&self) -> Option<String> {
        self.with_reserved(keys::CURRENT_ARTICLE, |a: Option<&String>| {
            a.filter(|s| !s.is_empty()).cloned()
        })
    }

    // ── Task plan ─────────────────────────────────────────────────────

    pub fn add_todo_task(&self, description: impl Into<String>) -> Result<usize, StateError> {
        let description = description.into();
        self.with_reserved_mut(keys::TODO, |plan: &mut TaskPlan| plan.add(description))
    }

    pub fn complete_todo_task(&self, id: usize) -> Result<(), StateError> {
        self.with_reserved_mut(keys::TODO, |plan: &mut TaskPlan| plan.complete(id))?
    }

    pub fn fail_todo_task(&self, id: usize, reason: impl Into<String>) -> Result<(), StateError> {
        let reason = reason.into();
        self.with_reserved_mut(keys::TODO, |plan: &mut TaskPlan| plan.fail(id, reason))?
    }

    pub fn clear_todo(&self) -> Result<(), StateError> {
        self.with_reserved_mut(keys::TODO, |plan: &mut TaskPlan| plan.clear())
    }

    pub fn todo_plan(&self) -> TaskPlan {
        self.with_reserved(keys::TODO, |p: Option<&TaskPlan>| p.cloned().unwrap_or_default())
    }

    /// The plan as shown to the model.
    pub fn todo_summary(&self) -> String {
        self.todo_plan().to_string()
    }

    // ── Collaborator handles ──────────────────────────────────────────

    /// Attach an object-storage client (opaque to the engine).
    pub fn set_storage<T: Send + Sync + 'static>(&self, storage: Arc<T>) {
        self.write().insert(keys::STORAGE.to_string(), Box::new(storage));
    }

    pub fn storage<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.with_reserved(keys::STORAGE, |s: Option<&Arc<T>>| s.cloned())
    }

    /// Attach reference dictionaries (opaque to the engine).
    pub fn set_dictionaries<T: Send + Sync + 'static>(&self, dictionaries: Arc<T>) {
        self.write()
            .insert(keys::DICTIONARIES.to_string(), Box::new(dictionaries));
    }

    pub fn dictionaries<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.with_reserved(keys::DICTIONARIES, |d: Option<&Arc<T>>| d.cloned())
    }

    // ── Context assembly ──────────────────────────────────────────────

    /// Assemble the message list for a model call.
    ///
    /// 1. System message: `system_prompt` plus the working-memory block (if any file
    ///    has a vision description).
    /// 2. System message with the task plan (omitted when the plan is empty).
    /// 3. The full history, in order.
    ///
    /// Has no side effects: equal state and prompt give equal output.
    pub fn build_context(&self, system_prompt: &str) -> Vec<Message> {
        let entries = self.read();

        let history = entries
            .get(keys::HISTORY)
            .and_then(|v| v.downcast_ref::<Vec<Message>>());
        let files = entries
            .get(keys::FILES)
            .and_then(|v| v.downcast_ref::<FileMap>());
        let plan = entries
            .get(keys::TODO)
            .and_then(|v| v.downcast_ref::<TaskPlan>());

        let mut messages = Vec::with_capacity(history.map_or(0, Vec::len) + 2);

        let knowledge = files.map(render_knowledge_block).unwrap_or_default();
        messages.push(Message::system(format!("{system_prompt}{knowledge}")));

        if let Some(plan) = plan.filter(|p| !p.is_empty()) {
            messages.push(Message::system(plan.to_string()));
        }

        if let Some(history) = history {
            messages.extend(history.iter().cloned());
        }
        messages
    }
}

impl std::fmt::Debug for CoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreState")
            .field("keys", &self.list())
            .field("history_len", &self.history_len())
            .finish()
    }
}

fn render_knowledge_block(files: &FileMap) -> String {
    let mut lines = String::new();
    for (tag, list) in files {
        for file in list {
            if let Some(description) = file.vision_description.as_deref().filter(|d| !d.is_empty()) {
                let _ = writeln!(lines, "- [{tag}] {}: {description}", file.filename);
            }
        }
    }

    if lines.is_empty() {
        String::new()
    } else {
        format!("\n\n{ARTICLE_CONTEXT_MARKER} (file analysis results):\n{lines}")
    }
}

fn reject_reserved(key: &str) -> Result<(), StateError> {
    if keys::is_reserved(key) {
        return Err(StateError::KeyReserved(key.to_string()));
    }
    Ok(())
}

fn invalid_type<T>(key: &str) -> StateError {
    StateError::InvalidType {
        key: key.to_string(),
        expected: std::any::type_name::<T>(),
    }
}
