//! SQLite schema definition.

/// Complete database schema for clinic-sched.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    phone TEXT,
    email TEXT,
    push_id TEXT,
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(name);

-- ============================================================================
-- Appointments
-- ============================================================================

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    scheduled_at TEXT NOT NULL,                  -- RFC3339 UTC, second precision
    duration_minutes INTEGER NOT NULL DEFAULT 60,
    treatment_type TEXT,
    notes TEXT,
    status TEXT NOT NULL DEFAULT 'booked'
        CHECK (status IN ('booked', 'visited', 'done', 'paid', 'cancelled', 'no_show')),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- A patient may hold at most one active appointment per exact timestamp.
-- Cancelled and no-show rows stay behind as history without blocking rebooking.
CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_patient_slot
    ON appointments(patient_id, scheduled_at)
    WHERE status NOT IN ('cancelled', 'no_show');

CREATE INDEX IF NOT EXISTS idx_appointments_scheduled ON appointments(scheduled_at);
CREATE INDEX IF NOT EXISTS idx_appointments_patient ON appointments(patient_id);
CREATE INDEX IF NOT EXISTS idx_appointments_status ON appointments(status);

-- ============================================================================
-- Deliveries (reminder instances)
-- ============================================================================

CREATE TABLE IF NOT EXISTS deliveries (
    id TEXT PRIMARY KEY,
    appointment_id TEXT NOT NULL REFERENCES appointments(id),
    patient_id TEXT NOT NULL REFERENCES patients(id),
    channel TEXT NOT NULL CHECK (channel IN ('email', 'sms', 'push')),
    lead_time TEXT NOT NULL CHECK (lead_time IN ('seven_day', 'three_day', 'one_day')),
    scheduled_at TEXT NOT NULL,                  -- when the dispatcher should fire
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'sent', 'failed', 'cancelled')),
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    sent_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Lets the dispatcher find due work without scanning terminal rows.
CREATE INDEX IF NOT EXISTS idx_deliveries_due ON deliveries(status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_deliveries_appointment ON deliveries(appointment_id);
"#;
