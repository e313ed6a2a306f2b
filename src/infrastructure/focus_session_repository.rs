use crate::domain::models::{FocusSession, SessionType};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use rusqlite::{Connection, Row, params};
use std::path::{Path, PathBuf};

pub trait FocusSessionRepository: Send + Sync {
    fn list(&self) -> Result<Vec<FocusSession>, InfraError>;
    /// Stores the session and bumps the owning task's session counter.
    fn record(&self, session: &FocusSession) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteFocusSessionRepository {
    db_path: PathBuf,
}

impl SqliteFocusSessionRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

impl FocusSessionRepository for SqliteFocusSessionRepository {
    fn list(&self) -> Result<Vec<FocusSession>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT id, task_id, duration, completed_at, session_type
             FROM focus_sessions ORDER BY completed_at ASC",
        )?;
        let rows = statement.query_map([], session_from_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    fn record(&self, session: &FocusSession) -> Result<(), InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;

        if let Some(task_id) = session.task_id.as_deref() {
            let bumped = transaction.execute(
                "UPDATE tasks SET focus_sessions = focus_sessions + 1 WHERE id = ?1",
                params![task_id],
            )?;
            if bumped == 0 {
                return Err(InfraError::NotFound(format!("task not found: {task_id}")));
            }
        }

        transaction.execute(
            "INSERT INTO focus_sessions (id, task_id, duration, completed_at, session_type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id,
                session.task_id,
                session.duration,
                session.completed_at,
                session.session_type.as_str(),
            ],
        )?;
        transaction.commit()?;
        Ok(())
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<FocusSession> {
    let session_type: Option<String> = row.get(4)?;
    Ok(FocusSession {
        id: row.get(0)?,
        task_id: row.get(1)?,
        duration: row.get(2)?,
        completed_at: row.get(3)?,
        session_type: session_type
            .as_deref()
            .and_then(|raw| SessionType::parse(raw).ok())
            .unwrap_or_default(),
    })
}
