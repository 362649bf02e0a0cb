/// Ordered schema migrations. Entry `n` moves the database from
/// `user_version = n` to `n + 1`; applied entries are never edited.
pub const MIGRATIONS: &[&str] = &[INITIAL_SCHEMA, CLASS_GRADES, ATTENDANCE_NATURAL_KEY];

pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

const INITIAL_SCHEMA: &str = r#"
-- Tenants
CREATE TABLE IF NOT EXISTS institutions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    reg_number TEXT,
    type TEXT,
    address TEXT,               -- JSON object, or legacy free text
    email TEXT,
    website TEXT,
    phone TEXT,
    folder_name TEXT NOT NULL,
    institution_code TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('superadmin', 'admin', 'teacher', 'student', 'parent', 'demo')),
    name TEXT NOT NULL,
    email TEXT,
    institution_id INTEGER REFERENCES institutions(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Only the lookup part of a session token is stored in clear
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,
    token_lookup TEXT NOT NULL UNIQUE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    last_used_at TEXT
);

CREATE TABLE IF NOT EXISTS students (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    department TEXT NOT NULL,
    class TEXT,
    email TEXT,
    phone TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    institution_id INTEGER REFERENCES institutions(id),
    photo_directory TEXT,
    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS teachers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    department TEXT NOT NULL,
    subject TEXT,
    email TEXT,
    phone TEXT,
    qualification TEXT,
    experience INTEGER,
    status TEXT NOT NULL DEFAULT 'active',
    institution_id INTEGER REFERENCES institutions(id),
    photo_directory TEXT,
    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL CHECK (date GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'),
    time TEXT NOT NULL,
    student_id TEXT NOT NULL CHECK (length(student_id) > 0),
    student_name TEXT NOT NULL,
    department TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'present' CHECK (status IN ('present', 'absent', 'late', 'excused')),
    face_recognition INTEGER NOT NULL DEFAULT 0,
    institution_id INTEGER REFERENCES institutions(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS classes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    department TEXT NOT NULL,
    teacher_id TEXT,
    room TEXT,
    schedule TEXT,
    capacity INTEGER,
    status TEXT NOT NULL DEFAULT 'active',
    institution_id INTEGER REFERENCES institutions(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS parents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT,
    phone TEXT,
    address TEXT,
    student_ids TEXT NOT NULL DEFAULT '[]',   -- JSON array of student ids
    institution_id INTEGER REFERENCES institutions(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS calendar_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT,
    event_type TEXT NOT NULL CHECK (event_type IN ('class', 'exam', 'holiday', 'meeting', 'announcement')),
    start_date TEXT NOT NULL,
    end_date TEXT,
    start_time TEXT,
    end_time TEXT,
    class_id INTEGER REFERENCES classes(id) ON DELETE SET NULL,
    institution_id INTEGER REFERENCES institutions(id),
    created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS announcements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    target_audience TEXT NOT NULL DEFAULT 'all' CHECK (target_audience IN ('all', 'teachers', 'students', 'parents')),
    priority TEXT NOT NULL DEFAULT 'medium' CHECK (priority IN ('low', 'medium', 'high', 'urgent')),
    institution_id INTEGER REFERENCES institutions(id),
    created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    is_published INTEGER NOT NULL DEFAULT 1,
    published_at TEXT,
    expires_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_institution ON users(institution_id);
CREATE INDEX IF NOT EXISTS idx_students_institution ON students(institution_id);
CREATE INDEX IF NOT EXISTS idx_teachers_institution ON teachers(institution_id);
CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
CREATE INDEX IF NOT EXISTS idx_attendance_institution ON attendance(institution_id);
CREATE INDEX IF NOT EXISTS idx_classes_institution ON classes(institution_id);
CREATE INDEX IF NOT EXISTS idx_events_start ON calendar_events(start_date);
"#;

const CLASS_GRADES: &str = r#"
ALTER TABLE classes ADD COLUMN grade_level INTEGER;
ALTER TABLE classes ADD COLUMN section TEXT;
ALTER TABLE classes ADD COLUMN academic_year TEXT;
ALTER TABLE classes ADD COLUMN grade_category TEXT;
CREATE INDEX IF NOT EXISTS idx_classes_grade ON classes(grade_level);
"#;

// Keeps the most recently written row for each natural key.
const ATTENDANCE_NATURAL_KEY: &str = r#"
DELETE FROM attendance WHERE id NOT IN (
    SELECT MAX(id) FROM attendance GROUP BY date, time, student_id, department
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_natural_key
    ON attendance(date, time, student_id, department);
"#;
