pub mod cache;
pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::cache::LiveCache;
use crate::database::store::ExamStore;
use crate::services::{
    evaluation_service::EvaluationService, exam_service::ExamService,
    notification_service::Notifier, recovery_service::RecoveryService,
    schedule_service::ScheduleService, session_service::SessionService,
};

#[derive(Clone)]
pub struct AppState {
    pub jwt_secret: Arc<str>,
    pub session_service: SessionService,
    pub evaluation_service: EvaluationService,
    pub schedule_service: ScheduleService,
    pub exam_service: ExamService,
    pub recovery_service: RecoveryService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ExamStore>,
        cache: Arc<dyn LiveCache>,
        notifier: Arc<dyn Notifier>,
        jwt_secret: &str,
    ) -> Self {
        Self {
            jwt_secret: Arc::from(jwt_secret),
            session_service: SessionService::new(store.clone(), cache.clone(), notifier.clone()),
            evaluation_service: EvaluationService::new(store.clone()),
            schedule_service: ScheduleService::new(store.clone(), cache.clone(), notifier),
            exam_service: ExamService::new(store.clone()),
            recovery_service: RecoveryService::new(store, cache),
        }
    }
}
