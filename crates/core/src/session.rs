use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stackscope_protocol::{CategoryIndex, Thread};

use crate::graph::registry::SelectorRegistry;
use crate::graph::thread_view::ThreadView;
use crate::model::CallNodePath;
use crate::strategy::SummaryStrategy;

/// Identifies a thread within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadKey(pub u32);

/// Profile-wide values every thread's views depend on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileSettings {
    /// Sampling interval in milliseconds.
    pub interval: f64,
    /// Category for frames that do not carry one.
    pub default_category: CategoryIndex,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            interval: 1.0,
            default_category: 0,
        }
    }
}

/// Which frames the external filter pipeline keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImplementationFilter {
    #[default]
    Combined,
    Js,
    Cpp,
}

/// User choices that apply to every thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionPreferences {
    pub last_selected_summary_strategy: SummaryStrategy,
    pub invert_callstack: bool,
    /// Consumed by the filter pipeline that produces thread variants; the
    /// views here only see its output.
    pub implementation_filter: ImplementationFilter,
}

/// Per-thread selection state, stored as paths so it survives table
/// changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadViewOptions {
    pub selected_call_node_path: CallNodePath,
    pub right_clicked_call_node_path: Option<CallNodePath>,
    pub expanded_call_node_paths: Vec<CallNodePath>,
}

/// Everything the views of one thread read.
///
/// Producers replace fields wholesale; a changed table must arrive as a new
/// `Arc` or cached views will not notice it.
#[derive(Debug, Clone)]
pub struct ThreadInputs {
    /// The thread as imported.
    pub thread: Arc<Thread>,
    /// After transforms and the committed range.
    pub filtered: Arc<Thread>,
    /// `filtered`, further narrowed to the preview selection.
    pub preview_filtered: Arc<Thread>,
    /// Restricted to the active tab's activity.
    pub tab_filtered: Arc<Thread>,
    pub view_options: Arc<ThreadViewOptions>,
}

impl ThreadInputs {
    /// Inputs for a thread with no filters applied: every variant is the
    /// thread itself.
    pub fn unfiltered(thread: Arc<Thread>) -> Self {
        Self {
            filtered: thread.clone(),
            preview_filtered: thread.clone(),
            tab_filtered: thread.clone(),
            thread,
            view_options: Arc::new(ThreadViewOptions::default()),
        }
    }
}

/// Application state for one loaded profile: settings, preferences, the
/// per-thread inputs and the derivation graph of every thread.
///
/// Graphs are created the first time a thread's views are read and dropped
/// together with the thread or the session.
#[derive(Debug)]
pub struct Session {
    settings: ProfileSettings,
    preferences: SessionPreferences,
    threads: BTreeMap<ThreadKey, ThreadInputs>,
    registry: SelectorRegistry,
}

impl Session {
    /// An empty session with default preferences.
    pub fn new(settings: ProfileSettings) -> Self {
        Self {
            settings,
            preferences: SessionPreferences::default(),
            threads: BTreeMap::new(),
            registry: SelectorRegistry::default(),
        }
    }

    /// Profile-wide interval and default category.
    pub fn settings(&self) -> &ProfileSettings {
        &self.settings
    }

    /// Current preferences shared by every thread.
    pub fn preferences(&self) -> &SessionPreferences {
        &self.preferences
    }

    /// Replace every preference at once.
    pub fn set_preferences(&mut self, preferences: SessionPreferences) {
        self.preferences = preferences;
    }

    /// Change some preferences in place. Views depending on them are
    /// recomputed on their next read.
    pub fn update_preferences(&mut self, update: impl FnOnce(&mut SessionPreferences)) {
        update(&mut self.preferences);
    }

    /// Add a thread, or replace all of its inputs.
    pub fn insert_thread(&mut self, key: ThreadKey, inputs: ThreadInputs) {
        self.threads.insert(key, inputs);
    }

    /// Remove a thread and discard its cached views.
    pub fn remove_thread(&mut self, key: ThreadKey) -> Option<ThreadInputs> {
        self.registry.remove(key);
        self.threads.remove(&key)
    }

    /// The current inputs of a thread.
    pub fn thread_inputs(&self, key: ThreadKey) -> Option<&ThreadInputs> {
        self.threads.get(&key)
    }

    /// Swap some of a thread's inputs. Returns `false` for an unknown thread.
    pub fn update_thread(&mut self, key: ThreadKey, update: impl FnOnce(&mut ThreadInputs)) -> bool {
        match self.threads.get_mut(&key) {
            Some(inputs) => {
                update(inputs);
                true
            }
            None => false,
        }
    }

    /// Replace a thread's view options.
    pub fn set_view_options(&mut self, key: ThreadKey, options: ThreadViewOptions) -> bool {
        self.update_thread(key, |inputs| inputs.view_options = Arc::new(options))
    }

    /// Keys of every thread, in ascending order.
    pub fn thread_keys(&self) -> impl Iterator<Item = ThreadKey> + '_ {
        self.threads.keys().copied()
    }

    /// Number of threads in the session.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// The per-thread caches, for inspecting recomputations.
    pub fn registry(&self) -> &SelectorRegistry {
        &self.registry
    }

    /// The views of one thread, or `None` if the session has no such thread.
    pub fn thread_view(&mut self, key: ThreadKey) -> Option<ThreadView<'_>> {
        let inputs = self.threads.get(&key)?;
        let graph = self.registry.graph_mut(key);
        Some(ThreadView::new(
            &self.settings,
            &self.preferences,
            inputs,
            graph,
        ))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(ProfileSettings::default())
    }
}
