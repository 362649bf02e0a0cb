use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::schema::{MIGRATIONS, SCHEMA_VERSION};
use super::{
    AttendanceFilter, ClassFilter, ClassUpdate, EventChanges, EventFilter, GradeFilter, NewParent,
    PersonFilter, Query, Store,
};
use crate::error::{Error, Result};
use crate::ingest::{BatchMode, BatchReport, RecordFailure};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn now() -> String {
    format_datetime(&Utc::now())
}

fn parse_enum<T: FromStr<Err = Error>>(idx: usize, text: String) -> rusqlite::Result<T> {
    text.parse().map_err(|e: Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Maps UNIQUE/PRIMARY KEY failures to a conflict naming `field`.
fn conflict_on(e: rusqlite::Error, field: &str) -> Error {
    let err = Error::from(e);
    if err.is_unique_violation() {
        Error::Conflict(field.to_string())
    } else {
        err
    }
}

fn query_all<T>(
    conn: &Connection,
    query: Query,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let (sql, values) = query.build();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), map)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

fn query_one<T>(
    conn: &Connection,
    query: Query,
    map: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    let (sql, values) = query.build();
    conn.query_row(&sql, params_from_iter(values), map)
        .optional()
        .map_err(Error::from)
}

/// Runs one aggregate. A failing metric is logged and reported as zero so
/// the remaining metrics still reach the caller.
fn metric(conn: &Connection, name: &str, query: Query) -> i64 {
    let (sql, values) = query.build();
    match conn.query_row(&sql, params_from_iter(values), |row| row.get::<_, i64>(0)) {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!("Metric {name} unavailable, reporting 0: {e}");
            0
        }
    }
}

// Row mapping

const INSTITUTION_COLUMNS: &str = "id, name, reg_number, type, address, email, website, phone, \
     folder_name, institution_code, created_at, updated_at";

fn institution_from_row(row: &Row<'_>) -> rusqlite::Result<Institution> {
    Ok(Institution {
        id: row.get(0)?,
        name: row.get(1)?,
        reg_number: row.get(2)?,
        institution_type: row.get(3)?,
        address: row.get::<_, Option<String>>(4)?.map(AddressField::from_db_text),
        email: row.get(5)?,
        website: row.get(6)?,
        phone: row.get(7)?,
        folder_name: row.get(8)?,
        institution_code: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        updated_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

const USER_COLUMNS: &str =
    "id, username, password_hash, role, name, email, institution_id, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role: parse_enum(3, row.get(3)?)?,
        name: row.get(4)?,
        email: row.get(5)?,
        institution_id: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        updated_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

const SESSION_COLUMNS: &str =
    "id, token_hash, token_lookup, user_id, created_at, expires_at, last_used_at";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        user_id: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        expires_at: parse_datetime(&row.get::<_, String>(5)?),
        last_used_at: row.get::<_, Option<String>>(6)?.map(|s| parse_datetime(&s)),
    })
}

const STUDENT_COLUMNS: &str = "id, name, department, class, email, phone, status, \
     institution_id, photo_directory, user_id, created_at, updated_at";

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        department: row.get(2)?,
        class_label: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        status: row.get(6)?,
        institution_id: row.get(7)?,
        photo_directory: row.get(8)?,
        user_id: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        updated_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

const TEACHER_COLUMNS: &str = "id, name, department, subject, email, phone, qualification, \
     experience, status, institution_id, photo_directory, user_id, created_at, updated_at";

fn teacher_from_row(row: &Row<'_>) -> rusqlite::Result<Teacher> {
    Ok(Teacher {
        id: row.get(0)?,
        name: row.get(1)?,
        department: row.get(2)?,
        subject: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        qualification: row.get(6)?,
        experience: row.get(7)?,
        status: row.get(8)?,
        institution_id: row.get(9)?,
        photo_directory: row.get(10)?,
        user_id: row.get(11)?,
        created_at: parse_datetime(&row.get::<_, String>(12)?),
        updated_at: parse_datetime(&row.get::<_, String>(13)?),
    })
}

const ATTENDANCE_COLUMNS: &str = "id, date, time, student_id, student_name, department, status, \
     face_recognition, institution_id, created_at";

fn attendance_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get(0)?,
        date: row.get(1)?,
        time: row.get(2)?,
        student_id: row.get(3)?,
        student_name: row.get(4)?,
        department: row.get(5)?,
        status: parse_enum(6, row.get(6)?)?,
        face_recognition: row.get(7)?,
        institution_id: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

const CLASS_COLUMNS: &str = "id, name, department, teacher_id, room, schedule, capacity, status, \
     grade_level, section, academic_year, grade_category, institution_id, created_at, updated_at";

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: row.get(0)?,
        name: row.get(1)?,
        department: row.get(2)?,
        teacher_id: row.get(3)?,
        room: row.get(4)?,
        schedule: row.get(5)?,
        capacity: row.get(6)?,
        status: row.get(7)?,
        grade_level: row.get(8)?,
        section: row.get(9)?,
        academic_year: row.get(10)?,
        grade_category: row.get(11)?,
        institution_id: row.get(12)?,
        created_at: parse_datetime(&row.get::<_, String>(13)?),
        updated_at: parse_datetime(&row.get::<_, String>(14)?),
    })
}

const EVENT_COLUMNS: &str = "id, title, description, event_type, start_date, end_date, \
     start_time, end_time, class_id, institution_id, created_by, created_at";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<CalendarEvent> {
    Ok(CalendarEvent {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        event_type: parse_enum(3, row.get(3)?)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        start_time: row.get(6)?,
        end_time: row.get(7)?,
        class_id: row.get(8)?,
        institution_id: row.get(9)?,
        created_by: row.get(10)?,
        created_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

const PARENT_COLUMNS: &str =
    "id, name, email, phone, address, student_ids, institution_id, created_at, updated_at";

fn parent_from_row(row: &Row<'_>) -> rusqlite::Result<Parent> {
    let raw_ids: String = row.get(5)?;
    let student_ids = serde_json::from_str(&raw_ids).unwrap_or_else(|e| {
        tracing::warn!("Unreadable student_ids on parent row: {e}");
        Vec::new()
    });
    Ok(Parent {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        address: row.get(4)?,
        student_ids,
        institution_id: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        updated_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

const ANNOUNCEMENT_COLUMNS: &str = "id, title, content, target_audience, priority, \
     institution_id, created_by, is_published, published_at, expires_at, created_at";

fn announcement_from_row(row: &Row<'_>) -> rusqlite::Result<Announcement> {
    Ok(Announcement {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        target_audience: parse_enum(3, row.get(3)?)?,
        priority: parse_enum(4, row.get(4)?)?,
        institution_id: row.get(5)?,
        created_by: row.get(6)?,
        is_published: row.get(7)?,
        published_at: row.get::<_, Option<String>>(8)?.map(|s| parse_datetime(&s)),
        expires_at: row.get::<_, Option<String>>(9)?.map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

// Lookups shared by trait methods and post-write reads. They take the
// connection so callers already holding the lock can reuse it.

fn fetch_institution(conn: &Connection, id: i64) -> Result<Option<Institution>> {
    query_one(
        conn,
        Query::select(format!("SELECT {INSTITUTION_COLUMNS} FROM institutions")).filter("id = ?", id),
        institution_from_row,
    )
}

fn fetch_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    query_one(
        conn,
        Query::select(format!("SELECT {USER_COLUMNS} FROM users")).filter("id = ?", id),
        user_from_row,
    )
}

fn fetch_student(conn: &Connection, id: &str) -> Result<Option<Student>> {
    query_one(
        conn,
        Query::select(format!("SELECT {STUDENT_COLUMNS} FROM students")).filter("id = ?", id.to_string()),
        student_from_row,
    )
}

fn fetch_teacher(conn: &Connection, id: &str) -> Result<Option<Teacher>> {
    query_one(
        conn,
        Query::select(format!("SELECT {TEACHER_COLUMNS} FROM teachers")).filter("id = ?", id.to_string()),
        teacher_from_row,
    )
}

fn fetch_class(conn: &Connection, id: i64, scope: &TenantScope) -> Result<Option<Class>> {
    query_one(
        conn,
        Query::select(format!("SELECT {CLASS_COLUMNS} FROM classes"))
            .filter("id = ?", id)
            .scoped("institution_id", scope),
        class_from_row,
    )
}

fn fetch_event(conn: &Connection, id: i64, scope: &TenantScope) -> Result<Option<CalendarEvent>> {
    query_one(
        conn,
        Query::select(format!("SELECT {EVENT_COLUMNS} FROM calendar_events"))
            .filter("id = ?", id)
            .scoped("institution_id", scope),
        event_from_row,
    )
}

fn insert_user(conn: &Connection, user: &NewUser, now: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO users (username, password_hash, role, name, email, institution_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            user.username,
            user.password_hash,
            user.role.as_str(),
            user.name,
            user.email,
            user.institution_id,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_attendance_row(conn: &Connection, record: &NewAttendance, now: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO attendance
             (date, time, student_id, student_name, department, status, face_recognition, institution_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.date,
            record.time,
            record.student_id,
            record.student_name,
            record.department,
            record.status.as_str(),
            record.face_recognition,
            record.institution_id,
            now,
        ],
    )?;
    Ok(())
}

fn month_start(today: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today)
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        let mut conn = self.conn();
        let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if current > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "database schema version {current} is newer than this build supports ({SCHEMA_VERSION})"
            )));
        }

        for (index, migration) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            let version = index as u32 + 1;
            let tx = conn.transaction()?;
            tx.execute_batch(migration)?;
            tx.pragma_update(None, "user_version", version)?;
            tx.commit()?;
            tracing::info!("Applied schema migration {version}");
        }

        Ok(())
    }

    fn schema_version(&self) -> Result<u32> {
        let conn = self.conn();
        let version = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(version)
    }

    fn superadmin_exists(&self) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'superadmin'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // Institution operations

    fn create_institution_with_admin(
        &self,
        institution: &NewInstitution,
        admin: &NewUser,
    ) -> Result<Institution> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = now();

        tx.execute(
            "INSERT INTO institutions
                 (name, reg_number, type, address, email, website, phone, folder_name, institution_code, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                institution.name,
                institution.reg_number,
                institution.institution_type,
                institution.address.as_ref().map(AddressField::to_db_text),
                institution.email,
                institution.website,
                institution.phone,
                institution.folder_name,
                institution.institution_code,
                now,
            ],
        )
        .map_err(|e| conflict_on(e, "institution code"))?;
        let id = tx.last_insert_rowid();

        let admin = NewUser {
            role: Role::Admin,
            institution_id: Some(id),
            ..admin.clone()
        };
        insert_user(&tx, &admin, &now).map_err(|e| conflict_on(e, "username"))?;

        let created = fetch_institution(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(created)
    }

    fn institution_code_exists(&self, code: &str) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM institutions WHERE institution_code = ?1",
            params![code],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get_institution(&self, id: i64) -> Result<Option<Institution>> {
        fetch_institution(&self.conn(), id)
    }

    fn get_institution_by_code(&self, code: &str) -> Result<Option<Institution>> {
        query_one(
            &self.conn(),
            Query::select(format!("SELECT {INSTITUTION_COLUMNS} FROM institutions"))
                .filter("institution_code = ?", code.to_string()),
            institution_from_row,
        )
    }

    fn get_institution_detail(&self, id: i64) -> Result<Option<InstitutionDetail>> {
        let conn = self.conn();
        let Some(institution) = fetch_institution(&conn, id)? else {
            return Ok(None);
        };

        let admin: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT username, name, email FROM users
                 WHERE institution_id = ?1 AND role = 'admin'
                 ORDER BY id LIMIT 1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (admin_username, admin_name, admin_email) = match admin {
            Some((username, name, email)) => (Some(username), Some(name), email),
            None => (None, None, None),
        };

        Ok(Some(InstitutionDetail {
            institution,
            admin_username,
            admin_name,
            admin_email,
        }))
    }

    fn list_institutions(&self) -> Result<Vec<Institution>> {
        query_all(
            &self.conn(),
            Query::select(format!("SELECT {INSTITUTION_COLUMNS} FROM institutions"))
                .order_by("created_at DESC, id DESC"),
            institution_from_row,
        )
    }

    fn update_institution(&self, id: i64, update: &InstitutionUpdate) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = now();

        let rows = tx.execute(
            "UPDATE institutions SET
                 name = ?1, reg_number = ?2, type = ?3, address = COALESCE(?4, address),
                 email = ?5, website = ?6, phone = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                update.name,
                update.reg_number,
                update.institution_type,
                update.address.as_ref().map(AddressField::to_db_text),
                update.email,
                update.website,
                update.phone,
                now,
                id,
            ],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE users SET email = ?1, updated_at = ?2 WHERE institution_id = ?3 AND role = 'admin'",
            params![update.admin_email, now, id],
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn delete_institution(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if fetch_institution(&tx, id)?.is_none() {
            return Ok(false);
        }

        tx.execute("DELETE FROM calendar_events WHERE institution_id = ?1", params![id])?;
        tx.execute("DELETE FROM announcements WHERE institution_id = ?1", params![id])?;
        for table in ["students", "teachers", "classes", "parents", "attendance"] {
            tx.execute(
                &format!("UPDATE {table} SET institution_id = NULL WHERE institution_id = ?1"),
                params![id],
            )?;
        }
        tx.execute(
            "DELETE FROM users WHERE institution_id = ?1 AND role = 'admin'",
            params![id],
        )?;
        tx.execute(
            "UPDATE users SET institution_id = NULL WHERE institution_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM institutions WHERE id = ?1", params![id])?;

        tx.commit()?;
        Ok(true)
    }

    fn system_stats(&self) -> Result<SystemStats> {
        let conn = self.conn();

        let institutions_by_type = query_all(
            &conn,
            Query::select("SELECT type, COUNT(*) FROM institutions GROUP BY type ORDER BY type"),
            |row| {
                Ok(InstitutionTypeCount {
                    institution_type: row.get(0)?,
                    count: row.get(1)?,
                })
            },
        )
        .unwrap_or_else(|e| {
            tracing::warn!("Metric institutions_by_type unavailable: {e}");
            Vec::new()
        });

        Ok(SystemStats {
            total_institutions: metric(&conn, "total_institutions", Query::select("SELECT COUNT(*) FROM institutions")),
            total_students: metric(
                &conn,
                "total_students",
                Query::select("SELECT COUNT(*) FROM students").filter("status = ?", "active".to_string()),
            ),
            total_teachers: metric(
                &conn,
                "total_teachers",
                Query::select("SELECT COUNT(*) FROM teachers").filter("status = ?", "active".to_string()),
            ),
            system_admins: metric(
                &conn,
                "system_admins",
                Query::select("SELECT COUNT(*) FROM users").raw("role IN ('admin', 'superadmin')"),
            ),
            institutions_by_type,
        })
    }

    // User and session operations

    fn create_user(&self, user: &NewUser) -> Result<User> {
        let conn = self.conn();
        let id = insert_user(&conn, user, &now()).map_err(|e| conflict_on(e, "username"))?;
        fetch_user(&conn, id)?.ok_or(Error::NotFound)
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        fetch_user(&self.conn(), id)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        query_one(
            &self.conn(),
            Query::select(format!("SELECT {USER_COLUMNS} FROM users"))
                .filter("username = ?", username.to_string()),
            user_from_row,
        )
    }

    fn username_exists(&self, username: &str) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_session(&self, session: &Session) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO sessions (id, token_hash, token_lookup, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.id,
                    session.token_hash,
                    session.token_lookup,
                    session.user_id,
                    format_datetime(&session.created_at),
                    format_datetime(&session.expires_at),
                ],
            )
            .map_err(|e| conflict_on(e, "token lookup"))?;
        Ok(())
    }

    fn get_session_by_lookup(&self, lookup: &str) -> Result<Option<Session>> {
        query_one(
            &self.conn(),
            Query::select(format!("SELECT {SESSION_COLUMNS} FROM sessions"))
                .filter("token_lookup = ?", lookup.to_string()),
            session_from_row,
        )
    }

    fn touch_session(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE sessions SET last_used_at = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        Ok(())
    }

    fn delete_session(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let rows = self.conn().execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![format_datetime(&now)],
        )?;
        Ok(rows)
    }

    // Student operations

    fn create_student(&self, student: &NewStudent, account: &NewUser) -> Result<Student> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = now();

        let user_id = insert_user(&tx, account, &now).map_err(|e| conflict_on(e, "username"))?;

        tx.execute(
            "INSERT INTO students
                 (id, name, department, class, email, phone, status, institution_id, photo_directory, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                student.id,
                student.name,
                student.department,
                student.class_label,
                student.email,
                student.phone,
                student.status,
                student.institution_id,
                student.photo_directory,
                user_id,
                now,
            ],
        )
        .map_err(|e| conflict_on(e, "student id"))?;

        let created = fetch_student(&tx, &student.id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(created)
    }

    fn student_exists(&self, id: &str) -> Result<bool> {
        Ok(fetch_student(&self.conn(), id)?.is_some())
    }

    fn get_student(&self, id: &str) -> Result<Option<Student>> {
        fetch_student(&self.conn(), id)
    }

    fn list_students(&self, filter: &PersonFilter, scope: &TenantScope) -> Result<Vec<Student>> {
        query_all(
            &self.conn(),
            Query::select(format!("SELECT {STUDENT_COLUMNS} FROM students"))
                .filter_opt("department = ?", filter.department.clone())
                .filter_opt("status = ?", filter.status.clone())
                .scoped("institution_id", scope)
                .order_by("name"),
            student_from_row,
        )
    }

    fn delete_student(&self, id: &str) -> Result<Option<Student>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let Some(student) = fetch_student(&tx, id)? else {
            return Ok(None);
        };

        tx.execute("DELETE FROM students WHERE id = ?1", params![id])?;
        if let Some(user_id) = student.user_id {
            tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        }

        // History removal is best-effort and never undoes the delete.
        if let Err(e) = tx.execute("DELETE FROM attendance WHERE student_id = ?1", params![id]) {
            tracing::warn!("Failed to delete attendance for student {id}: {e}");
        }

        tx.commit()?;
        Ok(Some(student))
    }

    // Teacher operations

    fn create_teacher(&self, teacher: &NewTeacher, account: &NewUser) -> Result<Teacher> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = now();

        let user_id = insert_user(&tx, account, &now).map_err(|e| conflict_on(e, "username"))?;

        tx.execute(
            "INSERT INTO teachers
                 (id, name, department, subject, email, phone, qualification, experience, status,
                  institution_id, photo_directory, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                teacher.id,
                teacher.name,
                teacher.department,
                teacher.subject,
                teacher.email,
                teacher.phone,
                teacher.qualification,
                teacher.experience,
                teacher.status,
                teacher.institution_id,
                teacher.photo_directory,
                user_id,
                now,
            ],
        )
        .map_err(|e| conflict_on(e, "teacher id"))?;

        let created = fetch_teacher(&tx, &teacher.id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(created)
    }

    fn teacher_exists(&self, id: &str) -> Result<bool> {
        Ok(fetch_teacher(&self.conn(), id)?.is_some())
    }

    fn get_teacher(&self, id: &str) -> Result<Option<Teacher>> {
        fetch_teacher(&self.conn(), id)
    }

    fn list_teachers(&self, filter: &PersonFilter, scope: &TenantScope) -> Result<Vec<Teacher>> {
        query_all(
            &self.conn(),
            Query::select(format!("SELECT {TEACHER_COLUMNS} FROM teachers"))
                .filter_opt("department = ?", filter.department.clone())
                .filter_opt("status = ?", filter.status.clone())
                .scoped("institution_id", scope)
                .order_by("name"),
            teacher_from_row,
        )
    }

    fn delete_teacher(&self, id: &str) -> Result<Option<Teacher>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let Some(teacher) = fetch_teacher(&tx, id)? else {
            return Ok(None);
        };

        tx.execute("DELETE FROM teachers WHERE id = ?1", params![id])?;
        if let Some(user_id) = teacher.user_id {
            tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        }

        tx.commit()?;
        Ok(Some(teacher))
    }

    // Attendance operations

    fn insert_attendance(&self, records: &[NewAttendance], mode: BatchMode) -> Result<BatchReport> {
        let mut report = BatchReport {
            submitted: records.len(),
            ..BatchReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let mut conn = self.conn();
        let mut tx = conn.transaction()?;
        let now = now();

        match mode {
            BatchMode::Atomic => {
                for (index, record) in records.iter().enumerate() {
                    if let Err(e) = insert_attendance_row(&tx, record, &now) {
                        let err = Error::from(e);
                        tracing::warn!(
                            "Attendance batch of {} rolled back at record {}: {err}",
                            records.len(),
                            index + 1
                        );
                        if err.is_constraint_violation() {
                            return Err(Error::BadRequest(format!(
                                "record {} (student {}) rejected: {err}",
                                index + 1,
                                record.student_id
                            )));
                        }
                        return Err(err);
                    }
                }
                report.inserted = records.len();
            }
            BatchMode::Isolated => {
                for (index, record) in records.iter().enumerate() {
                    let savepoint = tx.savepoint()?;
                    match insert_attendance_row(&savepoint, record, &now) {
                        Ok(()) => {
                            savepoint.commit()?;
                            report.inserted += 1;
                        }
                        Err(e) => {
                            let err = Error::from(e);
                            if !err.is_constraint_violation() {
                                return Err(err);
                            }
                            // Dropping the savepoint rolls back this record only.
                            drop(savepoint);
                            report.failed.push(RecordFailure {
                                index,
                                student_id: record.student_id.clone(),
                                reason: err.to_string(),
                            });
                        }
                    }
                }
            }
        }

        tx.commit()?;
        Ok(report)
    }

    fn list_attendance(
        &self,
        filter: &AttendanceFilter,
        scope: &TenantScope,
    ) -> Result<Vec<AttendanceRecord>> {
        query_all(
            &self.conn(),
            Query::select(format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance"))
                .filter_opt("date = ?", filter.date.clone())
                .filter_opt("student_id = ?", filter.student_id.clone())
                .filter_opt("department = ?", filter.department.clone())
                .filter_opt("status = ?", filter.status.map(|s| s.as_str().to_string()))
                .scoped("institution_id", scope)
                .order_by("date DESC, time DESC, id DESC")
                .limit(filter.limit),
            attendance_from_row,
        )
    }

    fn attendance_stats(&self, scope: &TenantScope, today: NaiveDate) -> Result<AttendanceStats> {
        let conn = self.conn();
        let day = format_date(today);
        let week_start = format_date(today - Duration::days(7));
        let month = format_date(month_start(today));

        let count = |from: &str| Query::select(format!("SELECT COUNT(*) FROM {from}"));

        let today_attendance = metric(
            &conn,
            "today_attendance",
            count("attendance").filter("date = ?", day.clone()).scoped("institution_id", scope),
        );
        let today_present = metric(
            &conn,
            "today_present",
            Query::select("SELECT COUNT(DISTINCT student_id) FROM attendance")
                .filter("date = ?", day)
                .raw("status IN ('present', 'late')")
                .scoped("institution_id", scope),
        );
        let week_attendance = metric(
            &conn,
            "week_attendance",
            count("attendance").filter("date >= ?", week_start).scoped("institution_id", scope),
        );
        let month_attendance = metric(
            &conn,
            "month_attendance",
            count("attendance").filter("date >= ?", month).scoped("institution_id", scope),
        );
        let total_students = metric(
            &conn,
            "total_students",
            count("students")
                .filter("status = ?", "active".to_string())
                .scoped("institution_id", scope),
        );

        Ok(AttendanceStats {
            today_attendance,
            today_present,
            week_attendance,
            month_attendance,
            total_students,
            today_attendance_rate: attendance_rate(today_present, total_students),
        })
    }

    fn institution_stats(&self, institution_id: i64, today: NaiveDate) -> Result<InstitutionStats> {
        let conn = self.conn();
        let scope = TenantScope::Institution(institution_id);
        let month_began = format_datetime(&month_start(today).and_time(NaiveTime::MIN).and_utc());

        let active = |table: &str| {
            Query::select(format!("SELECT COUNT(*) FROM {table}"))
                .filter("status = ?", "active".to_string())
                .scoped("institution_id", &scope)
        };
        let created_since = |table: &str| {
            Query::select(format!("SELECT COUNT(*) FROM {table}"))
                .filter("created_at >= ?", month_began.clone())
                .scoped("institution_id", &scope)
        };

        let total_students = metric(&conn, "total_students", active("students"));
        let present_today = metric(
            &conn,
            "present_today",
            Query::select("SELECT COUNT(DISTINCT student_id) FROM attendance")
                .filter("date = ?", format_date(today))
                .raw("status IN ('present', 'late')")
                .scoped("institution_id", &scope),
        );

        Ok(InstitutionStats {
            total_students,
            total_teachers: metric(&conn, "total_teachers", active("teachers")),
            total_classes: metric(&conn, "total_classes", active("classes")),
            new_students_this_month: metric(&conn, "new_students_this_month", created_since("students")),
            new_teachers_this_month: metric(&conn, "new_teachers_this_month", created_since("teachers")),
            attendance_rate: attendance_rate(present_today, total_students),
        })
    }

    // Class operations

    fn create_class(&self, class: &NewClass) -> Result<Class> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO classes
                 (name, department, teacher_id, room, schedule, capacity, status, grade_level, section,
                  academic_year, grade_category, institution_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                class.name,
                class.department,
                class.teacher_id,
                class.room,
                class.schedule,
                class.capacity,
                class.grade_level,
                class.section,
                class.academic_year,
                class.grade_category,
                class.institution_id,
                now(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        fetch_class(&conn, id, &TenantScope::All)?.ok_or(Error::NotFound)
    }

    fn get_class(&self, id: i64, scope: &TenantScope) -> Result<Option<Class>> {
        fetch_class(&self.conn(), id, scope)
    }

    fn list_classes(&self, filter: &ClassFilter, scope: &TenantScope) -> Result<Vec<Class>> {
        query_all(
            &self.conn(),
            Query::select(format!("SELECT {CLASS_COLUMNS} FROM classes"))
                .filter_opt("department = ?", filter.department.clone())
                .filter_opt("status = ?", filter.status.clone())
                .scoped("institution_id", scope)
                .order_by("name"),
            class_from_row,
        )
    }

    fn list_classes_by_grade(&self, filter: &GradeFilter, scope: &TenantScope) -> Result<Vec<Class>> {
        query_all(
            &self.conn(),
            Query::select(format!("SELECT {CLASS_COLUMNS} FROM classes"))
                .filter("grade_level = ?", filter.level)
                .filter("status = ?", "active".to_string())
                .filter_opt("academic_year = ?", filter.academic_year.clone())
                .filter_opt("section = ?", filter.section.clone())
                .scoped("institution_id", scope)
                .order_by("section, name"),
            class_from_row,
        )
    }

    fn update_class(&self, id: i64, update: &ClassUpdate, scope: &TenantScope) -> Result<Option<Class>> {
        let conn = self.conn();
        if fetch_class(&conn, id, scope)?.is_none() {
            return Ok(None);
        }

        conn.execute(
            "UPDATE classes SET
                 name = COALESCE(?1, name),
                 department = COALESCE(?2, department),
                 teacher_id = COALESCE(?3, teacher_id),
                 room = COALESCE(?4, room),
                 schedule = COALESCE(?5, schedule),
                 capacity = COALESCE(?6, capacity),
                 status = COALESCE(?7, status),
                 grade_level = COALESCE(?8, grade_level),
                 section = COALESCE(?9, section),
                 academic_year = COALESCE(?10, academic_year),
                 grade_category = COALESCE(?11, grade_category),
                 updated_at = ?12
             WHERE id = ?13",
            params![
                update.name,
                update.department,
                update.teacher_id,
                update.room,
                update.schedule,
                update.capacity,
                update.status,
                update.grade_level,
                update.section,
                update.academic_year,
                update.grade_category,
                now(),
                id,
            ],
        )?;

        fetch_class(&conn, id, scope)
    }

    fn archive_class(&self, id: i64, scope: &TenantScope) -> Result<bool> {
        let conn = self.conn();
        if fetch_class(&conn, id, scope)?.is_none() {
            return Ok(false);
        }
        conn.execute(
            "UPDATE classes SET status = 'deleted', updated_at = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        Ok(true)
    }

    // Calendar operations

    fn create_event(&self, event: &NewCalendarEvent) -> Result<CalendarEvent> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO calendar_events
                 (title, description, event_type, start_date, end_date, start_time, end_time,
                  class_id, institution_id, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.title,
                event.description,
                event.event_type.as_str(),
                event.start_date,
                event.end_date,
                event.start_time,
                event.end_time,
                event.class_id,
                event.institution_id,
                event.created_by,
                now(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        fetch_event(&conn, id, &TenantScope::All)?.ok_or(Error::NotFound)
    }

    fn list_events(&self, filter: &EventFilter, scope: &TenantScope) -> Result<Vec<CalendarEvent>> {
        query_all(
            &self.conn(),
            Query::select(format!("SELECT {EVENT_COLUMNS} FROM calendar_events"))
                .filter_opt("start_date >= ?", filter.start_date.clone())
                .filter_opt("start_date <= ?", filter.end_date.clone())
                .filter_opt("event_type = ?", filter.event_type.map(|t| t.as_str().to_string()))
                .filter_opt("class_id = ?", filter.class_id)
                .scoped("institution_id", scope)
                .order_by("start_date, start_time"),
            event_from_row,
        )
    }

    fn update_event(
        &self,
        id: i64,
        changes: &EventChanges,
        scope: &TenantScope,
    ) -> Result<Option<CalendarEvent>> {
        let conn = self.conn();
        if fetch_event(&conn, id, scope)?.is_none() {
            return Ok(None);
        }

        conn.execute(
            "UPDATE calendar_events SET
                 title = ?1, description = ?2, event_type = ?3, start_date = ?4, end_date = ?5,
                 start_time = ?6, end_time = ?7, class_id = ?8
             WHERE id = ?9",
            params![
                changes.title,
                changes.description,
                changes.event_type.as_str(),
                changes.start_date,
                changes.end_date,
                changes.start_time,
                changes.end_time,
                changes.class_id,
                id,
            ],
        )?;

        fetch_event(&conn, id, scope)
    }

    fn delete_event(&self, id: i64, scope: &TenantScope) -> Result<bool> {
        let conn = self.conn();
        if fetch_event(&conn, id, scope)?.is_none() {
            return Ok(false);
        }
        let rows = conn.execute("DELETE FROM calendar_events WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Parent and announcement operations

    fn create_parent(&self, parent: &NewParent) -> Result<Parent> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO parents (name, email, phone, address, student_ids, institution_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                parent.name,
                parent.email,
                parent.phone,
                parent.address,
                serde_json::to_string(&parent.student_ids)?,
                parent.institution_id,
                now(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        query_one(
            &conn,
            Query::select(format!("SELECT {PARENT_COLUMNS} FROM parents")).filter("id = ?", id),
            parent_from_row,
        )?
        .ok_or(Error::NotFound)
    }

    fn list_parents(&self, scope: &TenantScope) -> Result<Vec<Parent>> {
        query_all(
            &self.conn(),
            Query::select(format!("SELECT {PARENT_COLUMNS} FROM parents"))
                .scoped("institution_id", scope)
                .order_by("name"),
            parent_from_row,
        )
    }

    fn create_announcement(&self, announcement: &NewAnnouncement) -> Result<Announcement> {
        let conn = self.conn();
        let now = now();
        conn.execute(
            "INSERT INTO announcements
                 (title, content, target_audience, priority, institution_id, created_by,
                  is_published, published_at, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?7)",
            params![
                announcement.title,
                announcement.content,
                announcement.target_audience.as_str(),
                announcement.priority.as_str(),
                announcement.institution_id,
                announcement.created_by,
                now,
                announcement.expires_at.as_ref().map(format_datetime),
            ],
        )?;
        let id = conn.last_insert_rowid();
        query_one(
            &conn,
            Query::select(format!("SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements")).filter("id = ?", id),
            announcement_from_row,
        )?
        .ok_or(Error::NotFound)
    }

    fn list_announcements(&self, scope: &TenantScope, now: DateTime<Utc>) -> Result<Vec<Announcement>> {
        query_all(
            &self.conn(),
            Query::select(format!("SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements"))
                .raw("is_published = 1")
                .filter("(expires_at IS NULL OR expires_at > ?)", format_datetime(&now))
                .scoped("institution_id", scope)
                .order_by("created_at DESC, id DESC"),
            announcement_from_row,
        )
    }

    fn close(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn account(username: &str, role: Role, institution_id: Option<i64>) -> NewUser {
        NewUser {
            username: username.to_string(),
            password_hash: "hash".to_string(),
            role,
            name: username.to_string(),
            email: None,
            institution_id,
        }
    }

    fn institution(store: &SqliteStore, name: &str, code: &str, admin: &str) -> Institution {
        store
            .create_institution_with_admin(
                &NewInstitution {
                    name: name.to_string(),
                    reg_number: None,
                    institution_type: Some("school".to_string()),
                    address: None,
                    email: None,
                    website: None,
                    phone: None,
                    folder_name: name.to_lowercase(),
                    institution_code: code.to_string(),
                },
                &account(admin, Role::Admin, None),
            )
            .unwrap()
    }

    fn student(id: &str, department: &str, institution_id: Option<i64>) -> NewStudent {
        NewStudent {
            id: id.to_string(),
            name: format!("Student {id}"),
            department: department.to_string(),
            class_label: None,
            email: None,
            phone: None,
            status: "active".to_string(),
            institution_id,
            photo_directory: None,
        }
    }

    fn record(date: &str, time: &str, student_id: &str) -> NewAttendance {
        NewAttendance {
            date: date.to_string(),
            time: time.to_string(),
            student_id: student_id.to_string(),
            student_name: format!("Student {student_id}"),
            department: "CS".to_string(),
            status: RecordStatus::Present,
            face_recognition: true,
            institution_id: None,
        }
    }

    fn count_rows(store: &SqliteStore, table: &str) -> i64 {
        store
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = open_store();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "institutions",
            "users",
            "sessions",
            "students",
            "teachers",
            "attendance",
            "classes",
            "parents",
            "calendar_events",
            "announcements",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let (_temp, store) = open_store();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);

        store.initialize().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_natural_key_migration_dedupes_existing_rows() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();

        {
            let mut conn = store.conn();
            let tx = conn.transaction().unwrap();
            tx.execute_batch(MIGRATIONS[0]).unwrap();
            tx.execute_batch(MIGRATIONS[1]).unwrap();
            tx.pragma_update(None, "user_version", 2u32).unwrap();
            for name in ["first", "second"] {
                tx.execute(
                    "INSERT INTO attendance (date, time, student_id, student_name, department, created_at)
                     VALUES ('2025-01-10', '08:00:00', '100', ?1, 'CS', '2025-01-10T08:00:00+00:00')",
                    params![name],
                )
                .unwrap();
            }
            tx.commit().unwrap();
        }

        store.initialize().unwrap();

        let rows = store
            .list_attendance(&AttendanceFilter::default(), &TenantScope::All)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_name, "second");
    }

    #[test]
    fn test_resubmission_replaces_row() {
        let (_temp, store) = open_store();

        store
            .insert_attendance(&[record("2025-01-10", "08:00:00", "100")], BatchMode::Atomic)
            .unwrap();
        let mut again = record("2025-01-10", "08:00:00", "100");
        again.status = RecordStatus::Late;
        store.insert_attendance(&[again], BatchMode::Atomic).unwrap();

        let rows = store
            .list_attendance(&AttendanceFilter::default(), &TenantScope::All)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RecordStatus::Late);
    }

    #[test]
    fn test_atomic_batch_rolls_back_entirely() {
        let (_temp, store) = open_store();

        let mut batch: Vec<NewAttendance> = (0..10)
            .map(|i| record("2025-01-10", &format!("08:0{i}:00"), &format!("{}", 100 + i)))
            .collect();
        batch[6].date = "10/01/2025".to_string();

        let err = store.insert_attendance(&batch, BatchMode::Atomic).unwrap_err();
        assert!(matches!(err, Error::BadRequest(ref msg) if msg.starts_with("record 7")));
        assert_eq!(count_rows(&store, "attendance"), 0);
    }

    #[test]
    fn test_isolated_batch_skips_bad_records() {
        let (_temp, store) = open_store();

        let mut batch: Vec<NewAttendance> = (0..10)
            .map(|i| record("2025-01-10", &format!("08:0{i}:00"), &format!("{}", 100 + i)))
            .collect();
        batch[6].date = "10/01/2025".to_string();

        let report = store.insert_attendance(&batch, BatchMode::Isolated).unwrap();
        assert_eq!(report.submitted, 10);
        assert_eq!(report.inserted, 9);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 6);
        assert_eq!(report.failed[0].student_id, "106");
        assert_eq!(count_rows(&store, "attendance"), 9);
    }

    #[test]
    fn test_empty_batch_is_a_no_op() {
        let (_temp, store) = open_store();
        let report = store.insert_attendance(&[], BatchMode::Atomic).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.submitted, 0);
    }

    #[test]
    fn test_student_username_collision_leaves_no_student() {
        let (_temp, store) = open_store();
        store.create_user(&account("taken", Role::Teacher, None)).unwrap();

        let err = store
            .create_student(&student("S1", "CS", None), &account("taken", Role::Student, None))
            .unwrap_err();

        assert!(matches!(err, Error::Conflict(ref field) if field == "username"));
        assert!(!store.student_exists("S1").unwrap());
        assert_eq!(count_rows(&store, "users"), 1);
    }

    #[test]
    fn test_duplicate_student_id_leaves_no_user() {
        let (_temp, store) = open_store();
        store
            .create_student(&student("S1", "CS", None), &account("first", Role::Student, None))
            .unwrap();

        let err = store
            .create_student(&student("S1", "CS", None), &account("second", Role::Student, None))
            .unwrap_err();

        assert!(matches!(err, Error::Conflict(ref field) if field == "student id"));
        assert!(!store.username_exists("second").unwrap());
    }

    #[test]
    fn test_teacher_username_collision_leaves_no_teacher() {
        let (_temp, store) = open_store();
        store.create_user(&account("taken", Role::Student, None)).unwrap();

        let teacher = NewTeacher {
            id: "T1".to_string(),
            name: "Grace".to_string(),
            department: "Math".to_string(),
            subject: None,
            email: None,
            phone: None,
            qualification: None,
            experience: Some(4),
            status: "active".to_string(),
            institution_id: None,
            photo_directory: None,
        };
        let err = store
            .create_teacher(&teacher, &account("taken", Role::Teacher, None))
            .unwrap_err();

        assert!(matches!(err, Error::Conflict(_)));
        assert!(!store.teacher_exists("T1").unwrap());
    }

    #[test]
    fn test_institution_admin_collision_leaves_no_institution() {
        let (_temp, store) = open_store();
        store.create_user(&account("principal", Role::Teacher, None)).unwrap();

        let result = store.create_institution_with_admin(
            &NewInstitution {
                name: "North".to_string(),
                reg_number: None,
                institution_type: None,
                address: None,
                email: None,
                website: None,
                phone: None,
                folder_name: "north".to_string(),
                institution_code: "NOR001".to_string(),
            },
            &account("principal", Role::Admin, None),
        );

        assert!(matches!(result, Err(Error::Conflict(ref field)) if field == "username"));
        assert!(store.list_institutions().unwrap().is_empty());
    }

    #[test]
    fn test_tenant_scope_never_leaks() {
        let (_temp, store) = open_store();
        let a = institution(&store, "Alpha", "ALP001", "alpha-admin");
        let b = institution(&store, "Beta", "BET001", "beta-admin");

        store
            .create_student(&student("A1", "Math", Some(a.id)), &account("a1", Role::Student, Some(a.id)))
            .unwrap();
        store
            .create_student(&student("B1", "CSE", Some(b.id)), &account("b1", Role::Student, Some(b.id)))
            .unwrap();
        store
            .create_student(&student("U1", "CSE", None), &account("u1", Role::Student, None))
            .unwrap();

        let scope = TenantScope::Institution(a.id);
        let filters = [
            PersonFilter::default(),
            PersonFilter {
                department: Some("CSE".to_string()),
                status: None,
            },
            PersonFilter {
                department: None,
                status: Some("active".to_string()),
            },
        ];
        for filter in &filters {
            let rows = store.list_students(filter, &scope).unwrap();
            assert!(rows.iter().all(|s| s.institution_id == Some(a.id)));
        }

        let cse = store.list_students(&filters[1], &scope).unwrap();
        assert!(cse.is_empty());

        let unassigned = store
            .list_students(&PersonFilter::default(), &TenantScope::Unassigned)
            .unwrap();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].id, "U1");

        let all = store.list_students(&PersonFilter::default(), &TenantScope::All).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_delete_student_removes_user_and_history() {
        let (_temp, store) = open_store();
        let created = store
            .create_student(&student("S1", "CS", None), &account("s1", Role::Student, None))
            .unwrap();
        store
            .insert_attendance(&[record("2025-01-10", "08:00:00", "S1")], BatchMode::Atomic)
            .unwrap();

        let deleted = store.delete_student("S1").unwrap().unwrap();
        assert_eq!(deleted.user_id, created.user_id);
        assert!(store.get_user(created.user_id.unwrap()).unwrap().is_none());
        assert_eq!(count_rows(&store, "attendance"), 0);

        assert!(store.delete_student("S1").unwrap().is_none());
    }

    #[test]
    fn test_delete_institution_detaches_rows() {
        let (_temp, store) = open_store();
        let inst = institution(&store, "Alpha", "ALP001", "alpha-admin");
        store
            .create_student(&student("S1", "CS", Some(inst.id)), &account("s1", Role::Student, Some(inst.id)))
            .unwrap();
        store
            .create_event(&NewCalendarEvent {
                title: "Exams".to_string(),
                description: None,
                event_type: EventType::Exam,
                start_date: "2025-03-01".to_string(),
                end_date: None,
                start_time: None,
                end_time: None,
                class_id: None,
                institution_id: Some(inst.id),
                created_by: None,
            })
            .unwrap();

        assert!(store.delete_institution(inst.id).unwrap());

        assert!(store.get_institution(inst.id).unwrap().is_none());
        assert!(!store.username_exists("alpha-admin").unwrap());
        let s1 = store.get_student("S1").unwrap().unwrap();
        assert_eq!(s1.institution_id, None);
        let s1_user = store.get_user_by_username("s1").unwrap().unwrap();
        assert_eq!(s1_user.institution_id, None);
        assert_eq!(count_rows(&store, "calendar_events"), 0);

        assert!(!store.delete_institution(inst.id).unwrap());
    }

    #[test]
    fn test_institution_detail_and_update() {
        let (_temp, store) = open_store();
        let inst = institution(&store, "Alpha", "ALP001", "alpha-admin");

        let updated = store
            .update_institution(
                inst.id,
                &InstitutionUpdate {
                    name: "Alpha Academy".to_string(),
                    reg_number: "R-1".to_string(),
                    institution_type: "college".to_string(),
                    address: None,
                    email: "office@alpha.test".to_string(),
                    website: None,
                    phone: None,
                    admin_email: "admin@alpha.test".to_string(),
                },
            )
            .unwrap();
        assert!(updated);

        let detail = store.get_institution_detail(inst.id).unwrap().unwrap();
        assert_eq!(detail.institution.name, "Alpha Academy");
        assert_eq!(detail.admin_username.as_deref(), Some("alpha-admin"));
        assert_eq!(detail.admin_email.as_deref(), Some("admin@alpha.test"));

        assert!(store.get_institution_by_code("ALP001").unwrap().is_some());
        assert!(store.get_institution_by_code("NOPE00").unwrap().is_none());
    }

    #[test]
    fn test_attendance_stats() {
        let (_temp, store) = open_store();
        let today = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        for id in ["S1", "S2", "S3"] {
            store
                .create_student(&student(id, "CS", None), &account(id, Role::Student, None))
                .unwrap();
        }

        let mut absent = record("2025-01-10", "08:02:00", "S3");
        absent.status = RecordStatus::Absent;
        store
            .insert_attendance(
                &[
                    record("2025-01-10", "08:00:00", "S1"),
                    record("2025-01-10", "12:00:00", "S1"),
                    absent,
                    record("2025-01-05", "08:00:00", "S2"),
                    record("2024-12-30", "08:00:00", "S2"),
                ],
                BatchMode::Atomic,
            )
            .unwrap();

        let stats = store.attendance_stats(&TenantScope::All, today).unwrap();
        assert_eq!(stats.today_attendance, 3);
        assert_eq!(stats.today_present, 1);
        assert_eq!(stats.week_attendance, 4);
        assert_eq!(stats.month_attendance, 4);
        assert_eq!(stats.total_students, 3);
        assert_eq!(stats.today_attendance_rate, 33.3);

        let other = store.attendance_stats(&TenantScope::Institution(99), today).unwrap();
        assert_eq!(other, AttendanceStats::default());
    }

    #[test]
    fn test_stats_degrade_per_metric() {
        let (_temp, store) = open_store();
        let inst = institution(&store, "Alpha", "ALP001", "alpha-admin");
        store
            .create_student(&student("S1", "CS", Some(inst.id)), &account("s1", Role::Student, Some(inst.id)))
            .unwrap();
        store
            .create_class(&NewClass {
                name: "Algebra".to_string(),
                department: "Math".to_string(),
                institution_id: Some(inst.id),
                ..NewClass::default()
            })
            .unwrap();

        store.conn().execute_batch("DROP TABLE calendar_events; DROP TABLE classes;").unwrap();

        let today = Utc::now().date_naive();
        let stats = store.institution_stats(inst.id, today).unwrap();
        assert_eq!(stats.total_classes, 0);
        assert_eq!(stats.total_students, 1);
        assert_eq!(stats.new_students_this_month, 1);
    }

    #[test]
    fn test_class_soft_delete_and_scope() {
        let (_temp, store) = open_store();
        let inst = institution(&store, "Alpha", "ALP001", "alpha-admin");
        let class = store
            .create_class(&NewClass {
                name: "Physics".to_string(),
                department: "Science".to_string(),
                grade_level: Some(10),
                section: Some("B".to_string()),
                institution_id: Some(inst.id),
                ..NewClass::default()
            })
            .unwrap();

        let outsider = TenantScope::Institution(inst.id + 1);
        assert!(!store.archive_class(class.id, &outsider).unwrap());
        assert!(
            store
                .update_class(class.id, &ClassUpdate::default(), &outsider)
                .unwrap()
                .is_none()
        );

        let own = TenantScope::Institution(inst.id);
        let moved = store
            .update_class(
                class.id,
                &ClassUpdate {
                    room: Some("Lab 2".to_string()),
                    ..ClassUpdate::default()
                },
                &own,
            )
            .unwrap()
            .unwrap();
        assert_eq!(moved.room.as_deref(), Some("Lab 2"));
        assert_eq!(moved.name, "Physics");

        let grade = GradeFilter {
            level: 10,
            ..GradeFilter::default()
        };
        assert_eq!(store.list_classes_by_grade(&grade, &own).unwrap().len(), 1);

        assert!(store.archive_class(class.id, &own).unwrap());
        let archived = store.get_class(class.id, &own).unwrap().unwrap();
        assert_eq!(archived.status, "deleted");
        assert!(store.list_classes_by_grade(&grade, &own).unwrap().is_empty());
    }

    #[test]
    fn test_events_filtered_and_ordered() {
        let (_temp, store) = open_store();
        let event = |title: &str, date: &str, kind: EventType| NewCalendarEvent {
            title: title.to_string(),
            description: None,
            event_type: kind,
            start_date: date.to_string(),
            end_date: None,
            start_time: None,
            end_time: None,
            class_id: None,
            institution_id: None,
            created_by: None,
        };
        store.create_event(&event("Finals", "2025-03-20", EventType::Exam)).unwrap();
        store.create_event(&event("Break", "2025-03-01", EventType::Holiday)).unwrap();
        store.create_event(&event("April", "2025-04-02", EventType::Meeting)).unwrap();

        let march = EventFilter {
            start_date: Some("2025-03-01".to_string()),
            end_date: Some("2025-03-31".to_string()),
            ..EventFilter::default()
        };
        let titles: Vec<String> = store
            .list_events(&march, &TenantScope::All)
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["Break", "Finals"]);

        let exams = EventFilter {
            event_type: Some(EventType::Exam),
            ..EventFilter::default()
        };
        assert_eq!(store.list_events(&exams, &TenantScope::All).unwrap().len(), 1);
    }

    #[test]
    fn test_announcements_hide_expired() {
        let (_temp, store) = open_store();
        let now = Utc::now();
        let make = |title: &str, expires_at| NewAnnouncement {
            title: title.to_string(),
            content: "body".to_string(),
            target_audience: Audience::All,
            priority: AnnouncementPriority::High,
            institution_id: None,
            created_by: None,
            expires_at,
        };
        store.create_announcement(&make("current", None)).unwrap();
        store
            .create_announcement(&make("stale", Some(now - Duration::days(1))))
            .unwrap();

        let visible = store.list_announcements(&TenantScope::All, now).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "current");
        assert_eq!(visible[0].priority, AnnouncementPriority::High);
    }

    #[test]
    fn test_parent_student_ids_round_trip() {
        let (_temp, store) = open_store();
        let parent = store
            .create_parent(&NewParent {
                name: "Pat".to_string(),
                email: None,
                phone: None,
                address: None,
                student_ids: vec!["S1".to_string(), "S2".to_string()],
                institution_id: None,
            })
            .unwrap();
        assert_eq!(parent.student_ids, vec!["S1", "S2"]);
        assert_eq!(store.list_parents(&TenantScope::Unassigned).unwrap().len(), 1);
    }

    #[test]
    fn test_session_lookup_collision() {
        let (_temp, store) = open_store();
        let user = store.create_user(&account("ada", Role::Admin, None)).unwrap();

        let session = |id: &str| Session {
            id: id.to_string(),
            token_hash: "hash".to_string(),
            token_lookup: "lookup12".to_string(),
            user_id: user.id,
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(1),
            last_used_at: None,
        };
        store.create_session(&session("s-1")).unwrap();

        let result = store.create_session(&session("s-2"));
        assert!(matches!(result, Err(Error::Conflict(ref field)) if field == "token lookup"));

        assert_eq!(store.delete_expired_sessions(Utc::now()).unwrap(), 0);
        assert_eq!(
            store
                .delete_expired_sessions(Utc::now() + Duration::hours(2))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_superadmin_exists() {
        let (_temp, store) = open_store();
        assert!(!store.superadmin_exists().unwrap());
        store.create_user(&account("root", Role::Superadmin, None)).unwrap();
        assert!(store.superadmin_exists().unwrap());
    }
}
