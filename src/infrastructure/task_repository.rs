use crate::domain::models::{Difficulty, Task, clamp_progress};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

const TASK_COLUMNS: &str = "id, title, topic, date, time, is_done, progress, difficulty, order_index, focus_sessions, created_at";

pub trait TaskRepository: Send + Sync {
    fn list(&self) -> Result<Vec<Task>, InfraError>;
    fn list_for_date(&self, date: &str) -> Result<Vec<Task>, InfraError>;
    /// Undone tasks dated on or before `today`.
    fn list_overdue(&self, today: &str) -> Result<Vec<Task>, InfraError>;
    fn get(&self, task_id: &str) -> Result<Option<Task>, InfraError>;
    fn insert(&self, task: &Task) -> Result<(), InfraError>;
    fn update(&self, task: &Task) -> Result<(), InfraError>;
    fn delete(&self, task_id: &str) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    db_path: PathBuf,
}

impl SqliteTaskRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }

    fn query_tasks(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<Task>, InfraError> {
        let connection = self.connect()?;
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks {filter} ORDER BY date ASC, order_index ASC, created_at ASC"
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement.query_map(args, task_from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }
}

impl TaskRepository for SqliteTaskRepository {
    fn list(&self) -> Result<Vec<Task>, InfraError> {
        self.query_tasks("", [])
    }

    fn list_for_date(&self, date: &str) -> Result<Vec<Task>, InfraError> {
        self.query_tasks("WHERE date = ?1", params![date])
    }

    fn list_overdue(&self, today: &str) -> Result<Vec<Task>, InfraError> {
        self.query_tasks("WHERE date <= ?1 AND is_done = 0", params![today])
    }

    fn get(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        let connection = self.connect()?;
        let task = connection
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![task_id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    fn insert(&self, task: &Task) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO tasks (id, title, topic, date, time, is_done, progress, difficulty, order_index, focus_sessions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                task.id,
                task.title,
                task.topic,
                task.date,
                task.time,
                task.is_done,
                task.progress,
                task.difficulty.as_str(),
                task.order_index,
                task.focus_sessions,
                task.created_at,
            ],
        )?;
        Ok(())
    }

    fn update(&self, task: &Task) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "UPDATE tasks SET
               title = ?2, topic = ?3, date = ?4, time = ?5, is_done = ?6,
               progress = ?7, difficulty = ?8, order_index = ?9, focus_sessions = ?10
             WHERE id = ?1",
            params![
                task.id,
                task.title,
                task.topic,
                task.date,
                task.time,
                task.is_done,
                task.progress,
                task.difficulty.as_str(),
                task.order_index,
                task.focus_sessions,
            ],
        )?;
        if changed == 0 {
            return Err(InfraError::NotFound(format!("task not found: {}", task.id)));
        }
        Ok(())
    }

    fn delete(&self, task_id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let removed = connection.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(removed > 0)
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let difficulty: Option<String> = row.get(7)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        topic: row.get(2)?,
        date: row.get(3)?,
        time: row.get(4)?,
        is_done: row.get(5)?,
        progress: clamp_progress(row.get(6)?),
        difficulty: Difficulty::from_stored(difficulty.as_deref()),
        order_index: row.get(8)?,
        focus_sessions: row.get(9)?,
        created_at: row.get(10)?,
    })
}
