//! SQLite implementation of the storage traits.
//!
//! [`SqliteStore`] persists courses and learner records in a SQLite database
//! with WAL mode, atomic transactions on every write, and automatic schema
//! migrations. Nested records are stored as JSON TEXT columns via
//! serde_json; each learner row carries the version used for
//! compare-and-swap.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use pathwise_core::course::Course;
use pathwise_core::id::{ConceptId, CourseId, UserId};
use pathwise_core::learner::{CourseProgress, InteractionAttempt, MasteryState, ReviewSchedule};

use crate::error::StorageError;
use crate::hash::course_fingerprint;
use crate::traits::{CourseStore, LearnerStore};
use crate::types::{
    check_version, ConceptKey, CourseSummary, InteractionCommit, ProgressKey, Versioned,
    VersionedWrite,
};

/// SQLite-backed store.
///
/// `rusqlite::Connection` is `!Sync`, so the connection sits behind a mutex
/// and every call holds it for one statement or one transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Tables holding per-concept records.
#[derive(Debug, Clone, Copy)]
enum ConceptTable {
    Mastery,
    Reviews,
}

impl ConceptTable {
    fn name(self) -> &'static str {
        match self {
            ConceptTable::Mastery => "mastery",
            ConceptTable::Reviews => "review_schedules",
        }
    }
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn assert_course_exists(conn: &Connection, id: CourseId) -> Result<(), StorageError> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM courses WHERE id = ?1)",
            params![id.0],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StorageError::CourseNotFound(id));
        }
        Ok(())
    }

    fn load_concept_row<T: DeserializeOwned>(
        conn: &Connection,
        table: ConceptTable,
        key: &ConceptKey,
    ) -> Result<Option<Versioned<T>>, StorageError> {
        let sql = format!(
            "SELECT version, state_json FROM {} \
             WHERE user_id = ?1 AND course_id = ?2 AND concept_id = ?3",
            table.name()
        );
        let row: Option<(i64, String)> = conn
            .query_row(
                &sql,
                params![key.user.0.to_string(), key.course.0, key.concept.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(version, json)| decode_versioned(version, &json))
            .transpose()
    }

    fn concept_version(
        conn: &Connection,
        table: ConceptTable,
        key: &ConceptKey,
    ) -> Result<Option<u64>, StorageError> {
        let sql = format!(
            "SELECT version FROM {} WHERE user_id = ?1 AND course_id = ?2 AND concept_id = ?3",
            table.name()
        );
        let version: Option<i64> = conn
            .query_row(
                &sql,
                params![key.user.0.to_string(), key.course.0, key.concept.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.map(|v| v as u64))
    }

    /// Compare-and-swap write of one per-concept row. Must run inside a
    /// transaction.
    fn write_concept_row<T: Serialize>(
        conn: &Connection,
        table: ConceptTable,
        write: &VersionedWrite<ConceptKey, T>,
    ) -> Result<u64, StorageError> {
        Self::assert_course_exists(conn, write.key.course)?;
        let actual = Self::concept_version(conn, table, &write.key)?;
        let version = check_version(write.key, actual, write.expected)?;
        let json = serde_json::to_string(&write.value)?;
        let sql = format!(
            "INSERT INTO {} (user_id, course_id, concept_id, version, state_json) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (user_id, course_id, concept_id) \
             DO UPDATE SET version = excluded.version, state_json = excluded.state_json",
            table.name()
        );
        conn.execute(
            &sql,
            params![
                write.key.user.0.to_string(),
                write.key.course.0,
                write.key.concept.0,
                version as i64,
                json
            ],
        )?;
        Ok(version)
    }

    fn progress_version(conn: &Connection, key: &ProgressKey) -> Result<Option<u64>, StorageError> {
        let version: Option<i64> = conn
            .query_row(
                "SELECT version FROM progress WHERE user_id = ?1 AND course_id = ?2",
                params![key.user.0.to_string(), key.course.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.map(|v| v as u64))
    }

    fn write_progress_row(
        conn: &Connection,
        write: &VersionedWrite<ProgressKey, CourseProgress>,
    ) -> Result<u64, StorageError> {
        Self::assert_course_exists(conn, write.key.course)?;
        let actual = Self::progress_version(conn, &write.key)?;
        let version = check_version(write.key, actual, write.expected)?;
        let json = serde_json::to_string(&write.value)?;
        conn.execute(
            "INSERT INTO progress (user_id, course_id, version, progress_json) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (user_id, course_id) \
             DO UPDATE SET version = excluded.version, progress_json = excluded.progress_json",
            params![
                write.key.user.0.to_string(),
                write.key.course.0,
                version as i64,
                json
            ],
        )?;
        Ok(version)
    }

    fn insert_attempt(conn: &Connection, attempt: &InteractionAttempt) -> Result<(), StorageError> {
        let json = serde_json::to_string(attempt)?;
        conn.execute(
            "INSERT INTO attempts (attempt_id, user_id, course_id, node_id, attempt_json) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                attempt.id.to_string(),
                attempt.user.0.to_string(),
                attempt.course.0,
                attempt.node.0,
                json
            ],
        )?;
        Ok(())
    }
}

fn decode_versioned<T: DeserializeOwned>(
    version: i64,
    json: &str,
) -> Result<Versioned<T>, StorageError> {
    Ok(Versioned {
        value: serde_json::from_str(json)?,
        version: version as u64,
    })
}

impl CourseStore for SqliteStore {
    fn save_course(&self, course: &Course) -> Result<CourseId, StorageError> {
        let fingerprint = course_fingerprint(course)?.to_hex().to_string();
        let json = course.to_json()?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM courses WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO courses (title, fingerprint, course_json) VALUES (?1, ?2, ?3)",
                    params![course.meta().title, fingerprint, json],
                )?;
                tx.last_insert_rowid()
            }
        };
        tx.commit()?;
        Ok(CourseId(id))
    }

    fn load_course(&self, id: CourseId) -> Result<Course, StorageError> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT course_json FROM courses WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        let json = json.ok_or(StorageError::CourseNotFound(id))?;
        Ok(Course::from_json(&json)?)
    }

    fn delete_course(&self, id: CourseId) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        Self::assert_course_exists(&conn, id)?;
        let tx = conn.transaction()?;
        // Learner rows go with the course via ON DELETE CASCADE.
        tx.execute("DELETE FROM courses WHERE id = ?1", params![id.0])?;
        tx.commit()?;
        Ok(())
    }

    fn list_courses(&self) -> Result<Vec<CourseSummary>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT id, title, fingerprint FROM courses ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(CourseSummary {
                id: CourseId(row.get(0)?),
                title: row.get(1)?,
                fingerprint: row.get(2)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

impl LearnerStore for SqliteStore {
    fn load_mastery(
        &self,
        key: &ConceptKey,
    ) -> Result<Option<Versioned<MasteryState>>, StorageError> {
        let conn = self.conn()?;
        Self::load_concept_row(&conn, ConceptTable::Mastery, key)
    }

    fn save_mastery(
        &self,
        write: &VersionedWrite<ConceptKey, MasteryState>,
    ) -> Result<u64, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let version = Self::write_concept_row(&tx, ConceptTable::Mastery, write)?;
        tx.commit()?;
        Ok(version)
    }

    fn mastery_for_course(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Vec<(ConceptId, Versioned<MasteryState>)>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT concept_id, version, state_json FROM mastery \
             WHERE user_id = ?1 AND course_id = ?2 ORDER BY concept_id",
        )?;
        let rows = stmt.query_map(params![user.0.to_string(), course.0], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (concept, version, json) = row?;
            result.push((ConceptId(concept), decode_versioned(version, &json)?));
        }
        Ok(result)
    }

    fn load_review(
        &self,
        key: &ConceptKey,
    ) -> Result<Option<Versioned<ReviewSchedule>>, StorageError> {
        let conn = self.conn()?;
        Self::load_concept_row(&conn, ConceptTable::Reviews, key)
    }

    fn save_review(
        &self,
        write: &VersionedWrite<ConceptKey, ReviewSchedule>,
    ) -> Result<u64, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let version = Self::write_concept_row(&tx, ConceptTable::Reviews, write)?;
        tx.commit()?;
        Ok(version)
    }

    fn reviews_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<(ConceptKey, Versioned<ReviewSchedule>)>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT course_id, concept_id, version, state_json FROM review_schedules \
             WHERE user_id = ?1 ORDER BY course_id, concept_id",
        )?;
        let rows = stmt.query_map(params![user.0.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (course, concept, version, json) = row?;
            let key = ConceptKey {
                user,
                course: CourseId(course),
                concept: ConceptId(concept),
            };
            result.push((key, decode_versioned(version, &json)?));
        }
        Ok(result)
    }

    fn load_progress(
        &self,
        key: &ProgressKey,
    ) -> Result<Option<Versioned<CourseProgress>>, StorageError> {
        let conn = self.conn()?;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, progress_json FROM progress WHERE user_id = ?1 AND course_id = ?2",
                params![key.user.0.to_string(), key.course.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(version, json)| decode_versioned(version, &json))
            .transpose()
    }

    fn save_progress(
        &self,
        write: &VersionedWrite<ProgressKey, CourseProgress>,
    ) -> Result<u64, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let version = Self::write_progress_row(&tx, write)?;
        tx.commit()?;
        Ok(version)
    }

    fn commit_interaction(&self, commit: &InteractionCommit) -> Result<(), StorageError> {
        commit.check_distinct_keys()?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::assert_course_exists(&tx, commit.attempt.course)?;
        for w in &commit.mastery {
            Self::write_concept_row(&tx, ConceptTable::Mastery, w)?;
        }
        for w in &commit.reviews {
            Self::write_concept_row(&tx, ConceptTable::Reviews, w)?;
        }
        if let Some(w) = &commit.progress {
            Self::write_progress_row(&tx, w)?;
        }
        Self::insert_attempt(&tx, &commit.attempt)?;
        // Dropping the transaction on any error above rolls everything back.
        tx.commit()?;
        Ok(())
    }

    fn attempts_for(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Vec<InteractionAttempt>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT attempt_json FROM attempts WHERE user_id = ?1 AND course_id = ?2 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![user.0.to_string(), course.0], |row| {
            row.get::<_, String>(0)
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(serde_json::from_str(&row?)?);
        }
        Ok(result)
    }
}
