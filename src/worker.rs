use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::filters::{EVENT_CHANNEL_CAPACITY, INTENT_CHANNEL_CAPACITY};
use crate::controller::{FilterController, RefreshOutcome, SelectionChange};
use crate::data::{FilterValue, FloodRecord};
use crate::filters::{FilterDimension, FilterOptionSet};
use crate::notices::Notice;
use crate::query_builder::ConditionGroup;
use crate::types::NoticeId;

/// A user action on the filter controls.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterIntent {
    /// Choose a value for a dimension.
    Select(FilterDimension, FilterValue),
    /// Clear one dimension.
    Clear(FilterDimension),
    /// Clear every dimension.
    ClearAll,
    /// Reload one control, or every control when `None`.
    Reload(Option<FilterDimension>),
    /// Load the record set under the current selection.
    LoadRecords(Option<ConditionGroup>),
}

/// Something the worker wants the presentation layer to show.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterEvent {
    /// Published options after a refresh.
    OptionsUpdated(FilterOptionSet),
    /// Records under the current selection.
    RecordsLoaded(Vec<FloodRecord>),
    /// A notice raised while handling intents.
    Notice(Notice),
    /// An intent was refused because the channel was full, or (`None`) a
    /// refresh was skipped because another one was running.
    Dropped(Option<FilterIntent>),
}

/// Background thread applying filter intents to a shared controller.
///
/// Intents queue in a bounded channel; when it is full new intents are
/// dropped. Intents that are already waiting when the worker wakes up are
/// applied together and followed by a single option refresh. Events are
/// held in a bounded channel too; once it is full, undrained events are
/// discarded.
pub struct FilterWorker {
    intents: Option<SyncSender<FilterIntent>>,
    events: Receiver<FilterEvent>,
    event_sender: SyncSender<FilterEvent>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FilterWorker {
    /// Start a worker with the default channel capacity.
    pub fn spawn(controller: Arc<FilterController>) -> Self {
        Self::with_capacity(controller, INTENT_CHANNEL_CAPACITY)
    }

    /// Start a worker whose intent channel holds `capacity` entries.
    pub fn with_capacity(controller: Arc<FilterController>, capacity: usize) -> Self {
        let (intents, intent_rx) = mpsc::sync_channel(capacity.max(1));
        let (event_sender, events) = mpsc::sync_channel(EVENT_CHANNEL_CAPACITY);
        let thread_events = event_sender.clone();
        let handle = thread::spawn(move || run(controller, intent_rx, thread_events));
        Self {
            intents: Some(intents),
            events,
            event_sender,
            handle: Some(handle),
        }
    }

    /// Queue an intent. Returns `false` (and emits `Dropped`) when the channel is full.
    pub fn submit(&self, intent: FilterIntent) -> bool {
        let Some(intents) = self.intents.as_ref() else {
            return false;
        };
        match intents.try_send(intent) {
            Ok(()) => true,
            Err(TrySendError::Full(intent)) => {
                debug!(?intent, "filter intent dropped; worker busy");
                let _ = self.event_sender.try_send(FilterEvent::Dropped(Some(intent)));
                false
            }
            Err(TrySendError::Disconnected(intent)) => {
                warn!(?intent, "filter worker stopped; intent discarded");
                false
            }
        }
    }

    /// Block until the next event arrives, or `None` after `timeout`.
    pub fn next_event(&self, timeout: Duration) -> Option<FilterEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Every event already emitted, without blocking.
    pub fn drain_events(&self) -> Vec<FilterEvent> {
        self.events.try_iter().collect()
    }
}

impl Drop for FilterWorker {
    fn drop(&mut self) {
        self.intents.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
struct Batch {
    selection_changed: bool,
    reload_all: bool,
    reload: Vec<FilterDimension>,
    load_records: Option<Option<ConditionGroup>>,
}

impl Batch {
    fn absorb(&mut self, controller: &FilterController, intent: FilterIntent) {
        match intent {
            FilterIntent::Select(dim, value) => {
                controller.stage(SelectionChange::Select(dim, value));
                self.selection_changed = true;
            }
            FilterIntent::Clear(dim) => {
                controller.stage(SelectionChange::Clear(dim));
                self.selection_changed = true;
            }
            FilterIntent::ClearAll => {
                controller.stage(SelectionChange::ClearAll);
                self.selection_changed = true;
            }
            FilterIntent::Reload(None) => self.reload_all = true,
            FilterIntent::Reload(Some(dim)) => {
                if !self.reload.contains(&dim) {
                    self.reload.push(dim);
                }
            }
            FilterIntent::LoadRecords(conditions) => self.load_records = Some(conditions),
        }
    }
}

fn run(
    controller: Arc<FilterController>,
    intents: Receiver<FilterIntent>,
    events: SyncSender<FilterEvent>,
) {
    let mut last_notice: NoticeId = 0;
    while let Ok(first) = intents.recv() {
        let mut batch = Batch::default();
        batch.absorb(&controller, first);
        let mut coalesced = 1usize;
        for intent in intents.try_iter() {
            batch.absorb(&controller, intent);
            coalesced += 1;
        }
        debug!(intents = coalesced, "applying filter intents");

        let mut outgoing = Vec::new();
        if batch.selection_changed || batch.reload_all {
            match controller.refresh_options() {
                RefreshOutcome::Dropped => outgoing.push(FilterEvent::Dropped(None)),
                RefreshOutcome::Fetched(options) | RefreshOutcome::Cached(options) => {
                    outgoing.push(FilterEvent::OptionsUpdated(options))
                }
            }
        } else if !batch.reload.is_empty() {
            for dim in &batch.reload {
                controller.reload_dimension(*dim);
            }
            outgoing.push(FilterEvent::OptionsUpdated(controller.options()));
        }
        if let Some(conditions) = batch.load_records
            && let Ok(records) = controller.load_records(conditions.as_ref())
        {
            outgoing.push(FilterEvent::RecordsLoaded(records));
        }
        for notice in controller.notices_since(last_notice) {
            last_notice = last_notice.max(notice.id);
            outgoing.push(FilterEvent::Notice(notice));
        }
        for event in outgoing {
            match events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    debug!(?event, "event channel full; event discarded")
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
    debug!("filter worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::source::InMemoryTable;
    use serde_json::json;

    fn controller() -> Arc<FilterController> {
        let rows = vec![
            json!({"id": 1, "year": "2020", "location_name": "Athens", "cause_of_flood": "Storm"}),
            json!({"id": 2, "year": "2023", "location_name": "Volos", "cause_of_flood": "Rainfall"}),
        ]
        .into_iter()
        .map(|row| match row {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        })
        .collect();
        let source = Arc::new(InMemoryTable::new("memory", "floods", rows));
        Arc::new(FilterController::new(
            source,
            ClientConfig::new("https://abcd.supabase.co", "key"),
        ))
    }

    #[test]
    fn select_intent_emits_narrowed_options() {
        let worker = FilterWorker::spawn(controller());
        assert!(worker.submit(FilterIntent::Select(
            FilterDimension::Location,
            FilterValue::from("Volos")
        )));
        let options = match worker.next_event(Duration::from_secs(5)) {
            Some(FilterEvent::OptionsUpdated(options)) => options,
            other => panic!("unexpected event {other:?}"),
        };
        assert_eq!(
            options.values(FilterDimension::Cause),
            &[FilterValue::from("Rainfall")]
        );
    }

    #[test]
    fn load_records_intent_emits_the_record_set() {
        let worker = FilterWorker::spawn(controller());
        worker.submit(FilterIntent::LoadRecords(None));
        let event = worker.next_event(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, FilterEvent::RecordsLoaded(records) if records.len() == 2));
    }

    #[test]
    fn undrained_events_stay_within_the_channel_capacity() {
        let worker = FilterWorker::with_capacity(controller(), 1);
        for _ in 0..(EVENT_CHANNEL_CAPACITY * 4) {
            worker.submit(FilterIntent::Reload(None));
        }
        thread::sleep(Duration::from_millis(200));
        assert!(worker.drain_events().len() <= EVENT_CHANNEL_CAPACITY);
        drop(worker);
    }

    #[test]
    fn dropping_the_worker_joins_its_thread() {
        let worker = FilterWorker::spawn(controller());
        worker.submit(FilterIntent::Reload(None));
        drop(worker);
    }
}
