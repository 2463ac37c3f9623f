pub mod balancer_service;
pub mod evaluation_service;
pub mod exam_service;
pub mod grading_service;
pub mod integrity_service;
pub mod notification_service;
pub mod recovery_service;
pub mod schedule_resolver;
pub mod schedule_service;
pub mod sequencer_service;
pub mod session_service;

#[cfg(test)]
pub(crate) mod test_support;
