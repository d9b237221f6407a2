//! HandlerRegistry - task kind ごとの handler を登録・管理
//!
//! # 内部実装
//! - `ResourceHandler<D>` を `Arc<dyn TaskHandler>` に型消去して保持
//! - `HashMap<TaskKind, Arc<dyn TaskHandler>>` で管理

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{ResourceHandler, TaskHandler};
use super::record::{
    AssignmentData, LevelProgressionData, ReviewStatisticData, SrsSystemData, StudyMaterialData,
    SubjectData, SummaryData, UserData,
};
use crate::domain::TaskKind;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for task kind '{0}' is already registered")]
    AlreadyRegistered(TaskKind),
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One handler for every task kind.
    pub fn standard() -> Self {
        let handlers: [Arc<dyn TaskHandler>; 9] = [
            Arc::new(ResourceHandler::<UserData>::new(TaskKind::GetUser)),
            Arc::new(ResourceHandler::<SrsSystemData>::new(TaskKind::GetSrsSystems)),
            Arc::new(ResourceHandler::<LevelProgressionData>::new(TaskKind::GetLevelProgression)),
            Arc::new(ResourceHandler::<SubjectData>::new(TaskKind::GetSubjects)),
            Arc::new(ResourceHandler::<SubjectData>::new(TaskKind::GetSubjectsById)),
            Arc::new(ResourceHandler::<AssignmentData>::new(TaskKind::GetAssignments)),
            Arc::new(ResourceHandler::<ReviewStatisticData>::new(TaskKind::GetReviewStatistics)),
            Arc::new(ResourceHandler::<StudyMaterialData>::new(TaskKind::GetStudyMaterials)),
            Arc::new(ResourceHandler::<SummaryData>::new(TaskKind::GetSummary)),
        ];
        let mut registry = Self::new();
        for handler in handlers {
            registry.handlers.insert(handler.kind(), handler);
        }
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> Result<(), RegistryError> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Replace (or add) the handler for its kind.
    pub fn replace(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn registered_kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Kinds without a handler.
    pub fn missing_kinds(&self) -> Vec<TaskKind> {
        TaskKind::ALL
            .into_iter()
            .filter(|k| !self.handlers.contains_key(k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_kind() {
        let registry = HandlerRegistry::standard();
        assert!(registry.missing_kinds().is_empty());
        assert_eq!(registry.registered_kinds().len(), TaskKind::ALL.len());
        for kind in TaskKind::ALL {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(Arc::new(ResourceHandler::<UserData>::new(TaskKind::GetUser)))
            .unwrap();
        let result =
            registry.register(Arc::new(ResourceHandler::<UserData>::new(TaskKind::GetUser)));
        assert!(matches!(
            result,
            Err(RegistryError::AlreadyRegistered(TaskKind::GetUser))
        ));
    }

    #[test]
    fn empty_registry_reports_missing_kinds() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.missing_kinds(), TaskKind::ALL.to_vec());
        assert!(registry.get(TaskKind::GetSummary).is_none());
    }
}
