//! Progress and checkpoint notifications published on the event bus

use crate::job::{CollectionType, SyncJobId};
use core_runtime::events::{CoreEvent, EventBus, ProgressStage, SyncEvent};

#[derive(Debug, Clone)]
pub struct ProgressReporter {
    event_bus: EventBus,
    job_id: SyncJobId,
    collection_type: CollectionType,
    phase: Option<String>,
}

impl ProgressReporter {
    pub fn new(event_bus: EventBus, job_id: SyncJobId, collection_type: CollectionType) -> Self {
        Self {
            event_bus,
            job_id,
            collection_type,
            phase: None,
        }
    }

    /// Reporter labelling its events with a sub-phase, e.g. "watched 1/2"
    pub fn with_phase(&self, phase: impl Into<String>) -> Self {
        Self {
            phase: Some(phase.into()),
            ..self.clone()
        }
    }

    pub fn job_id(&self) -> SyncJobId {
        self.job_id
    }

    pub fn report(
        &self,
        stage: ProgressStage,
        current: u64,
        total: u64,
        message: impl Into<String>,
    ) {
        self.emit(SyncEvent::Progress {
            job_id: self.job_id.as_str(),
            stage,
            current,
            total,
            percent: percent(current, total),
            message: message.into(),
            phase: self.phase.clone(),
        });
    }

    pub fn checkpoint_saved(&self, page: u32, item_index: u32) {
        self.emit(SyncEvent::CheckpointSaved {
            job_id: self.job_id.as_str(),
            collection_type: self.collection_type.to_string(),
            page,
            item_index,
        });
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // Lagging or absent subscribers never hold up the sync.
        let _ = self.event_bus.emit(CoreEvent::Sync(event));
    }
}

fn percent(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((current.min(total) * 100) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(5, 4), 100);
    }

    #[tokio::test]
    async fn test_phase_label_is_attached() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let reporter = ProgressReporter::new(bus, SyncJobId::new(), CollectionType::AllVideos)
            .with_phase("want_videos 2/2");

        reporter.report(ProgressStage::Pages, 1, 4, "Page 1 of 4");

        match rx.recv().await.unwrap() {
            CoreEvent::Sync(SyncEvent::Progress {
                percent, phase, ..
            }) => {
                assert_eq!(percent, 25);
                assert_eq!(phase.as_deref(), Some("want_videos 2/2"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
