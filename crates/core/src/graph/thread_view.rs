use std::sync::Arc;

use log::debug;
use stackscope_protocol::{
    Capabilities, FrameTable, FuncTable, SamplesTable, StackTable, Thread, TimeRange,
};

use crate::error::ViewError;
use crate::graph::memo::{Inputs, Memo};
use crate::model::{
    CallNodeIndex, CallNodeInfo, CallNodePath, compute_call_node_info, invert_call_node_info,
    resolve, resolve_all,
};
use crate::session::{ProfileSettings, SessionPreferences, ThreadInputs, ThreadViewOptions};
use crate::strategy::{SummaryStrategy, resolve_strategy};
use crate::views::call_tree::{CallTree, compute_call_tree_for_strategy};
use crate::views::flame_graph::{FlameGraphTiming, compute_flame_graph_timing};
use crate::views::selection::{
    SampleTreeOrder, SelectedState, TreeOrder, classify_samples, sample_call_nodes,
};
use crate::views::stack_timing::{StackTiming, compute_stack_timing};

type SampleNodes = Arc<[Option<CallNodeIndex>]>;
type TableInputs = (Arc<StackTable>, Arc<FrameTable>, Arc<FuncTable>, usize);
type TreeInputs = (Arc<Thread>, Arc<CallNodeInfo>, SummaryStrategy, f64);

/// The cached derivations of one thread.
///
/// Every field holds the last output of one derivation together with the
/// inputs it was computed from. Nothing is computed until a `ThreadView`
/// reads it.
#[derive(Debug)]
pub struct ThreadGraph {
    samples_range: Memo<(Arc<SamplesTable>, f64), Option<TimeRange>>,
    call_node_info: Memo<TableInputs, Arc<CallNodeInfo>>,
    inverted_call_node_info: Memo<(Arc<CallNodeInfo>,), Arc<CallNodeInfo>>,
    max_depth: Memo<(Arc<CallNodeInfo>,), Option<u32>>,
    selected_index: Memo<(Arc<CallNodeInfo>, Arc<ThreadViewOptions>), Option<CallNodeIndex>>,
    right_clicked_index: Memo<(Arc<CallNodeInfo>, Arc<ThreadViewOptions>), Option<CallNodeIndex>>,
    expanded_indexes: Memo<(Arc<CallNodeInfo>, Arc<ThreadViewOptions>), SampleNodes>,
    sample_call_nodes: Memo<(Arc<SamplesTable>, Arc<CallNodeInfo>), SampleNodes>,
    non_inverted_sample_call_nodes: Memo<(Arc<SamplesTable>, Arc<CallNodeInfo>), SampleNodes>,
    tree_order: Memo<(Arc<CallNodeInfo>,), Arc<TreeOrder>>,
    selected_states: Memo<
        (SampleNodes, Arc<SamplesTable>, Arc<TreeOrder>, Option<CallNodeIndex>),
        Arc<[SelectedState]>,
    >,
    tree_order_comparator: Memo<(SampleNodes, Arc<TreeOrder>), Arc<SampleTreeOrder>>,
    strategy: Memo<(Capabilities, SummaryStrategy), SummaryStrategy>,
    call_tree: Memo<TreeInputs, Arc<CallTree>>,
    flame_graph_tree: Memo<TreeInputs, Arc<CallTree>>,
    stack_timing: Memo<
        (Arc<SamplesTable>, SampleNodes, Arc<CallNodeInfo>, Option<u32>, f64),
        Arc<StackTiming>,
    >,
    flame_graph_timing: Memo<(Arc<CallTree>, Arc<FuncTable>), Arc<FlameGraphTiming>>,
}

impl ThreadGraph {
    pub fn new() -> Self {
        Self {
            samples_range: Memo::new("unfiltered samples range"),
            call_node_info: Memo::new("call node info"),
            inverted_call_node_info: Memo::new("inverted call node info"),
            max_depth: Memo::new("max call node depth"),
            selected_index: Memo::new("selected call node"),
            right_clicked_index: Memo::new("right-clicked call node"),
            expanded_indexes: Memo::new("expanded call nodes"),
            sample_call_nodes: Memo::new("sample call nodes"),
            non_inverted_sample_call_nodes: Memo::new("non-inverted sample call nodes"),
            tree_order: Memo::new("tree order"),
            selected_states: Memo::new("samples selected states"),
            tree_order_comparator: Memo::new("tree order comparator"),
            strategy: Memo::new("summary strategy"),
            call_tree: Memo::new("call tree"),
            flame_graph_tree: Memo::new("flame graph call tree"),
            stack_timing: Memo::new("stack timing"),
            flame_graph_timing: Memo::new("flame graph timing"),
        }
    }

    /// How often each derivation has run, by name.
    pub fn recomputations(&self) -> Vec<(&'static str, u64)> {
        fn count<K: Inputs, V: Clone>(memo: &Memo<K, V>) -> (&'static str, u64) {
            (memo.name(), memo.computations())
        }
        vec![
            count(&self.samples_range),
            count(&self.call_node_info),
            count(&self.inverted_call_node_info),
            count(&self.max_depth),
            count(&self.selected_index),
            count(&self.right_clicked_index),
            count(&self.expanded_indexes),
            count(&self.sample_call_nodes),
            count(&self.non_inverted_sample_call_nodes),
            count(&self.tree_order),
            count(&self.selected_states),
            count(&self.tree_order_comparator),
            count(&self.strategy),
            count(&self.call_tree),
            count(&self.flame_graph_tree),
            count(&self.stack_timing),
            count(&self.flame_graph_timing),
        ]
    }

    /// Recomputation count of the derivation called `name`, or 0 if there
    /// is no such derivation.
    pub fn recomputations_of(&self, name: &str) -> u64 {
        self.recomputations()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map_or(0, |(_, count)| count)
    }
}

impl Default for ThreadGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// The derived views of one thread.
///
/// Borrowed from a `Session`; every accessor takes no arguments beyond the
/// session state and returns the cached value while its inputs are
/// unchanged.
pub struct ThreadView<'a> {
    settings: &'a ProfileSettings,
    preferences: &'a SessionPreferences,
    inputs: &'a ThreadInputs,
    graph: &'a mut ThreadGraph,
}

impl<'a> ThreadView<'a> {
    pub(crate) fn new(
        settings: &'a ProfileSettings,
        preferences: &'a SessionPreferences,
        inputs: &'a ThreadInputs,
        graph: &'a mut ThreadGraph,
    ) -> Self {
        Self {
            settings,
            preferences,
            inputs,
            graph,
        }
    }

    pub fn graph(&self) -> &ThreadGraph {
        &*self.graph
    }

    /// From the first sample of the unfiltered thread to one interval past
    /// its last. `None` for a thread without samples.
    pub fn unfiltered_samples_range(&mut self) -> Option<TimeRange> {
        let key = (self.inputs.thread.samples.clone(), self.settings.interval);
        self.graph
            .samples_range
            .get_or_compute(key, |(samples, interval)| {
                let start = *samples.time.first()?;
                let end = *samples.time.last()?;
                Some(TimeRange::new(start, end + interval))
            })
    }

    /// Call-node info of the filtered thread, never inverted.
    pub fn non_inverted_call_node_info(&mut self) -> Arc<CallNodeInfo> {
        let thread = &self.inputs.filtered;
        let key = (
            thread.stack_table.clone(),
            thread.frame_table.clone(),
            thread.func_table.clone(),
            self.settings.default_category,
        );
        self.graph
            .call_node_info
            .get_or_compute(key, |(stacks, frames, funcs, default_category)| {
                Arc::new(compute_call_node_info(stacks, frames, funcs, *default_category))
            })
    }

    /// Call-node info in the orientation the user picked.
    pub fn call_node_info(&mut self) -> Arc<CallNodeInfo> {
        let info = self.non_inverted_call_node_info();
        if !self.preferences.invert_callstack {
            return info;
        }
        self.graph
            .inverted_call_node_info
            .get_or_compute((info,), |(info,)| Arc::new(invert_call_node_info(info)))
    }

    /// Deepest node of the non-inverted table, `None` when it is empty.
    pub fn max_call_node_depth(&mut self) -> Option<u32> {
        let info = self.non_inverted_call_node_info();
        self.graph.max_depth.get_or_compute((info,), |(info,)| {
            let table = info.table();
            table.iter().map(|n| table.depth(n)).max()
        })
    }

    /// Deepest row of the flame graph.
    pub fn flame_graph_max_depth(&mut self) -> Result<Option<u32>, ViewError> {
        Ok(self.flame_graph_timing()?.max_depth())
    }

    pub fn selected_call_node_path(&self) -> &'a CallNodePath {
        &self.inputs.view_options.selected_call_node_path
    }

    /// The selected path resolved in the current table. A path that no
    /// longer exists means nothing is selected.
    pub fn selected_call_node_index(&mut self) -> Option<CallNodeIndex> {
        let key = (self.call_node_info(), self.inputs.view_options.clone());
        self.graph
            .selected_index
            .get_or_compute(key, |(info, options)| {
                resolve(&options.selected_call_node_path, info.table())
            })
    }

    pub fn right_clicked_call_node_path(&self) -> Option<&'a CallNodePath> {
        self.inputs.view_options.right_clicked_call_node_path.as_ref()
    }

    pub fn right_clicked_call_node_index(&mut self) -> Option<CallNodeIndex> {
        let key = (self.call_node_info(), self.inputs.view_options.clone());
        self.graph
            .right_clicked_index
            .get_or_compute(key, |(info, options)| {
                options
                    .right_clicked_call_node_path
                    .as_ref()
                    .and_then(|path| resolve(path, info.table()))
            })
    }

    /// The expanded paths resolved in order, `None` where a path is gone.
    pub fn expanded_call_node_indexes(&mut self) -> Arc<[Option<CallNodeIndex>]> {
        let key = (self.call_node_info(), self.inputs.view_options.clone());
        self.graph
            .expanded_indexes
            .get_or_compute(key, |(info, options)| {
                resolve_all(&options.expanded_call_node_paths, info.table()).into()
            })
    }

    fn sample_call_nodes(&mut self) -> SampleNodes {
        let key = (self.inputs.filtered.samples.clone(), self.call_node_info());
        self.graph
            .sample_call_nodes
            .get_or_compute(key, |(samples, info)| sample_call_nodes(samples, info).into())
    }

    fn non_inverted_sample_call_nodes(&mut self) -> SampleNodes {
        let key = (
            self.inputs.filtered.samples.clone(),
            self.non_inverted_call_node_info(),
        );
        self.graph
            .non_inverted_sample_call_nodes
            .get_or_compute(key, |(samples, info)| sample_call_nodes(samples, info).into())
    }

    fn tree_order(&mut self) -> Arc<TreeOrder> {
        let info = self.call_node_info();
        self.graph
            .tree_order
            .get_or_compute((info,), |(info,)| Arc::new(TreeOrder::new(info.table())))
    }

    /// Where every filtered sample stands relative to the selected call
    /// node. `None` when the thread is marked as too large to classify.
    pub fn samples_selected_states(&mut self) -> Option<Arc<[SelectedState]>> {
        if self.inputs.thread.skip_sample_classification {
            return None;
        }
        let key = (
            self.sample_call_nodes(),
            self.inputs.tab_filtered.samples.clone(),
            self.tree_order(),
            self.selected_call_node_index(),
        );
        let states = self
            .graph
            .selected_states
            .get_or_compute(key, |(nodes, tab_samples, order, selected)| {
                classify_samples(nodes, tab_samples, order, *selected).into()
            });
        Some(states)
    }

    /// Orders filtered sample indexes by the tree position of their call
    /// nodes.
    pub fn tree_order_comparator(&mut self) -> Arc<SampleTreeOrder> {
        let key = (self.sample_call_nodes(), self.tree_order());
        self.graph
            .tree_order_comparator
            .get_or_compute(key, |(nodes, order)| {
                Arc::new(SampleTreeOrder::new(nodes.clone(), order.clone()))
            })
    }

    /// The last chosen strategy if the thread supports it, else timing.
    pub fn summary_strategy(&mut self) -> SummaryStrategy {
        let key = (
            self.inputs.thread.capabilities(),
            self.preferences.last_selected_summary_strategy,
        );
        self.graph
            .strategy
            .get_or_compute(key, |(capabilities, last)| resolve_strategy(capabilities, *last))
    }

    /// The call tree of the preview-filtered thread under the effective
    /// strategy, inverted when the user asked for it.
    pub fn call_tree(&mut self) -> Result<Arc<CallTree>, ViewError> {
        let key = (
            self.inputs.preview_filtered.clone(),
            self.call_node_info(),
            self.summary_strategy(),
            self.settings.interval,
        );
        self.graph.call_tree.try_get_or_compute(key, build_tree)
    }

    /// Timeline boxes of the filtered samples, one row per depth.
    pub fn stack_timing(&mut self) -> Arc<StackTiming> {
        let key = (
            self.inputs.filtered.samples.clone(),
            self.non_inverted_sample_call_nodes(),
            self.non_inverted_call_node_info(),
            self.max_call_node_depth(),
            self.settings.interval,
        );
        self.graph.stack_timing.get_or_compute(
            key,
            |(samples, nodes, info, max_depth, interval)| {
                Arc::new(compute_stack_timing(
                    samples,
                    nodes,
                    info.table(),
                    *max_depth,
                    *interval,
                ))
            },
        )
    }

    /// The non-inverted call tree the flame graph is laid out from. While
    /// the call stack is not inverted this is the same tree as
    /// [`ThreadView::call_tree`].
    pub fn flame_graph_call_tree(&mut self) -> Result<Arc<CallTree>, ViewError> {
        if !self.preferences.invert_callstack {
            return self.call_tree();
        }
        let key = (
            self.inputs.preview_filtered.clone(),
            self.non_inverted_call_node_info(),
            self.summary_strategy(),
            self.settings.interval,
        );
        self.graph.flame_graph_tree.try_get_or_compute(key, build_tree)
    }

    /// The flame graph of the preview-filtered thread. Always laid out from
    /// the non-inverted tree.
    pub fn flame_graph_timing(&mut self) -> Result<Arc<FlameGraphTiming>, ViewError> {
        let tree = self.flame_graph_call_tree()?;
        let funcs = self.inputs.preview_filtered.func_table.clone();
        Ok(self
            .graph
            .flame_graph_timing
            .get_or_compute((tree, funcs), |(tree, funcs)| {
                Arc::new(compute_flame_graph_timing(tree, funcs))
            }))
    }
}

fn build_tree(
    (thread, info, strategy, interval): &TreeInputs,
) -> Result<Arc<CallTree>, ViewError> {
    debug!("building {strategy} call tree for thread {}", thread.name);
    compute_call_tree_for_strategy(thread, info.clone(), *strategy, *interval).map(Arc::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Capability;
    use crate::model::call_node::tests::abc_thread;
    use crate::session::{Session, ThreadKey};
    use pretty_assertions::assert_eq;
    use stackscope_protocol::NativeAllocationsTable;

    const KEY: ThreadKey = ThreadKey(0);

    fn session_with(thread: Thread) -> Session {
        let mut session = Session::default();
        session.insert_thread(KEY, ThreadInputs::unfiltered(Arc::new(thread)));
        session
    }

    fn select(session: &mut Session, funcs: Vec<usize>) {
        let options = ThreadViewOptions {
            selected_call_node_path: CallNodePath::new(funcs),
            ..ThreadViewOptions::default()
        };
        assert!(session.set_view_options(KEY, options));
    }

    #[test]
    fn repeated_reads_return_same_reference() {
        let mut session = session_with(abc_thread());
        let mut view = session.thread_view(KEY).unwrap();

        let first = view.call_tree().unwrap();
        let second = view.call_tree().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&view.stack_timing(), &view.stack_timing()));
        assert!(Arc::ptr_eq(&view.call_node_info(), &view.call_node_info()));
        assert_eq!(view.graph().recomputations_of("call tree"), 1);
        assert_eq!(view.graph().recomputations_of("call node info"), 1);
    }

    #[test]
    fn nothing_is_computed_before_a_read() {
        let mut session = session_with(abc_thread());
        let view = session.thread_view(KEY).unwrap();
        assert!(view.graph().recomputations().iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn samples_range_spans_one_interval_past_last_sample() {
        let mut session = session_with(abc_thread());
        let mut view = session.thread_view(KEY).unwrap();
        assert_eq!(view.unfiltered_samples_range(), Some(TimeRange::new(0.0, 3.0)));

        let mut empty = session_with(abc_thread().with_samples(SamplesTable::default()));
        assert_eq!(empty.thread_view(KEY).unwrap().unfiltered_samples_range(), None);
    }

    #[test]
    fn selection_change_keeps_call_tree() {
        let mut session = session_with(abc_thread());
        let tree = session.thread_view(KEY).unwrap().call_tree().unwrap();

        select(&mut session, vec![0, 1]);
        let mut view = session.thread_view(KEY).unwrap();
        assert!(Arc::ptr_eq(&tree, &view.call_tree().unwrap()));
        assert_eq!(view.selected_call_node_index(), Some(CallNodeIndex::new(1)));
        assert_eq!(view.graph().recomputations_of("call tree"), 1);
    }

    #[test]
    fn classifies_against_selected_path() {
        let mut session = session_with(abc_thread());
        select(&mut session, vec![0, 1]);
        let mut view = session.thread_view(KEY).unwrap();
        let states = view.samples_selected_states().unwrap();
        assert_eq!(
            &*states,
            &[
                SelectedState::Selected,
                SelectedState::Selected,
                SelectedState::UnselectedAfter,
            ]
        );
    }

    #[test]
    fn missing_path_means_no_selection() {
        let mut session = session_with(abc_thread());
        select(&mut session, vec![0, 7]);
        let mut view = session.thread_view(KEY).unwrap();
        assert_eq!(view.selected_call_node_index(), None);
        let states = view.samples_selected_states().unwrap();
        assert!(states.iter().all(|s| *s == SelectedState::UnselectedBefore));
    }

    #[test]
    fn skip_flag_disables_classification() {
        let mut thread = abc_thread();
        thread.skip_sample_classification = true;
        let mut session = session_with(thread);
        assert!(session.thread_view(KEY).unwrap().samples_selected_states().is_none());
    }

    #[test]
    fn expanded_and_right_clicked_paths_resolve() {
        let mut session = session_with(abc_thread());
        let options = ThreadViewOptions {
            selected_call_node_path: CallNodePath::default(),
            right_clicked_call_node_path: Some(CallNodePath::new(vec![0, 2])),
            expanded_call_node_paths: vec![CallNodePath::new(vec![0]), CallNodePath::new(vec![1])],
        };
        session.set_view_options(KEY, options);
        let mut view = session.thread_view(KEY).unwrap();
        assert_eq!(view.right_clicked_call_node_index(), Some(CallNodeIndex::new(2)));
        assert_eq!(
            view.right_clicked_call_node_path(),
            Some(&CallNodePath::new(vec![0, 2]))
        );
        assert_eq!(
            &*view.expanded_call_node_indexes(),
            &[Some(CallNodeIndex::new(0)), None]
        );
    }

    #[test]
    fn inverting_switches_tree_but_not_flame_graph() {
        let mut session = session_with(abc_thread());
        let flame = session.thread_view(KEY).unwrap().flame_graph_timing().unwrap();

        session.update_preferences(|prefs| prefs.invert_callstack = true);
        let mut view = session.thread_view(KEY).unwrap();
        assert!(view.call_node_info().is_inverted());
        assert!(!view.non_inverted_call_node_info().is_inverted());

        let tree = view.call_tree().unwrap();
        let info = tree.call_node_info();
        let roots: Vec<_> = tree.roots().iter().map(|&r| info.table().func(r)).collect();
        assert_eq!(roots, vec![1, 2]);

        let inverted_flame = view.flame_graph_timing().unwrap();
        assert_eq!(*flame, *inverted_flame);
        assert!(Arc::ptr_eq(&inverted_flame, &view.flame_graph_timing().unwrap()));
        assert_eq!(view.graph().recomputations_of("flame graph call tree"), 1);
        assert_eq!(view.flame_graph_max_depth().unwrap(), Some(1));
        assert_eq!(view.max_call_node_depth(), Some(1));
    }

    #[test]
    fn flame_graph_shares_the_call_tree_when_not_inverted() {
        let mut session = session_with(abc_thread());
        let mut view = session.thread_view(KEY).unwrap();

        let tree = view.call_tree().unwrap();
        view.flame_graph_timing().unwrap();
        assert!(Arc::ptr_eq(&tree, &view.flame_graph_call_tree().unwrap()));
        assert_eq!(view.graph().recomputations_of("call tree"), 1);
        assert_eq!(view.graph().recomputations_of("flame graph call tree"), 0);
    }

    #[test]
    fn unsupported_strategy_falls_back_to_timing() {
        let mut session = session_with(abc_thread());
        session.update_preferences(|prefs| {
            prefs.last_selected_summary_strategy = SummaryStrategy::JsAllocations;
        });
        let mut view = session.thread_view(KEY).unwrap();
        assert_eq!(view.summary_strategy(), SummaryStrategy::Timing);
        assert_eq!(view.call_tree().unwrap().strategy(), SummaryStrategy::Timing);
    }

    #[test]
    fn retained_without_addresses_fails() {
        let thread = abc_thread().with_native_allocations(NativeAllocationsTable {
            stack: vec![Some(1)],
            time: vec![0.0],
            weight: vec![64.0],
            memory_address: None,
        });
        let mut session = session_with(thread);
        session.update_preferences(|prefs| {
            prefs.last_selected_summary_strategy = SummaryStrategy::NativeRetainedAllocations;
        });
        let mut view = session.thread_view(KEY).unwrap();
        assert_eq!(
            view.summary_strategy(),
            SummaryStrategy::NativeRetainedAllocations
        );
        assert!(matches!(
            view.call_tree(),
            Err(ViewError::CapabilityMissing {
                capability: Capability::NativeMemoryAddresses,
                ..
            })
        ));
    }

    #[test]
    fn threads_do_not_share_caches() {
        let mut session = session_with(abc_thread());
        session.insert_thread(ThreadKey(1), ThreadInputs::unfiltered(Arc::new(abc_thread())));

        session.thread_view(KEY).unwrap().call_tree().unwrap();
        let mut other = session.thread_view(ThreadKey(1)).unwrap();
        assert_eq!(other.graph().recomputations_of("call tree"), 0);
        other.call_tree().unwrap();

        let replaced = Arc::new(abc_thread());
        session.update_thread(ThreadKey(1), |inputs| {
            *inputs = ThreadInputs::unfiltered(replaced);
        });
        session.thread_view(ThreadKey(1)).unwrap().call_tree().unwrap();

        let first = session.registry().graph(KEY).unwrap();
        let second = session.registry().graph(ThreadKey(1)).unwrap();
        assert_eq!(first.recomputations_of("call tree"), 1);
        assert_eq!(second.recomputations_of("call tree"), 2);
    }

    #[test]
    fn tab_filter_marks_missing_samples() {
        let thread = Arc::new(abc_thread());
        let mut tab_samples = (*thread.samples).clone();
        tab_samples.stack[2] = None;
        let mut inputs = ThreadInputs::unfiltered(thread.clone());
        inputs.tab_filtered = Arc::new(thread.with_samples(tab_samples));

        let mut session = Session::default();
        session.insert_thread(KEY, inputs);
        let states = session
            .thread_view(KEY)
            .unwrap()
            .samples_selected_states()
            .unwrap();
        assert_eq!(states[2], SelectedState::FilteredOutByTab);
        assert_eq!(states[0], SelectedState::UnselectedBefore);
    }

    #[test]
    fn comparator_orders_samples_by_tree_position() {
        let mut session = session_with(abc_thread());
        let comparator = session.thread_view(KEY).unwrap().tree_order_comparator();
        assert_eq!(comparator.compare(0, 1), std::cmp::Ordering::Equal);
        assert_eq!(comparator.compare(0, 2), std::cmp::Ordering::Less);
        assert_eq!(comparator.compare(2, 0), std::cmp::Ordering::Greater);
    }
}
