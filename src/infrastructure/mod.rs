pub mod config;
pub mod csv_codec;
pub mod error;
pub mod focus_session_repository;
pub mod logging;
pub mod settings_repository;
pub mod storage;
pub mod task_repository;

#[cfg(test)]
pub(crate) mod test_support;
