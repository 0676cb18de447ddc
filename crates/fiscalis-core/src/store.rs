//! Hand-off point for completed subject aggregates.
//!
//! The core writes aggregates and never reads them back during a run.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::Mutex;

use crate::{CoreError, SubjectAggregate};

/// Durable destination for aggregates.
pub trait RecordStore: Send + Sync {
    fn store<'a>(
        &'a self,
        aggregate: &'a SubjectAggregate,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>>;
}

/// Keeps every stored aggregate in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<SubjectAggregate>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<SubjectAggregate> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn store<'a>(
        &'a self,
        aggregate: &'a SubjectAggregate,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.records.lock().await.push(aggregate.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SubjectId;

    #[tokio::test]
    async fn keeps_aggregates_in_arrival_order() {
        let store = MemoryRecordStore::new();
        for raw in ["12345678000190", "52998224725"] {
            let aggregate = SubjectAggregate::new(
                SubjectId::parse(raw).expect("valid subject"),
                None,
                None,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                0,
            );
            store.store(&aggregate).await.expect("memory store never fails");
        }

        let subjects = store
            .records()
            .await
            .into_iter()
            .map(|aggregate| aggregate.subject.to_string())
            .collect::<Vec<_>>();
        assert_eq!(subjects, vec!["12345678000190", "52998224725"]);
    }
}
