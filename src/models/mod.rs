pub mod actor;
pub mod certificate;
pub mod exam;
pub mod integrity_event;
pub mod outbox_event;
pub mod question;
pub mod schedule;
pub mod session;
