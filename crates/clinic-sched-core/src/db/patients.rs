//! Patient database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{ts_from_string, ts_to_string, Database, DbError, DbResult};
use crate::models::Patient;

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<PatientRow> {
    Ok(PatientRow {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        push_id: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const PATIENT_COLUMNS: &str = "id, name, phone, email, push_id, notes, created_at, updated_at";

impl Database {
    /// Insert a new patient.
    pub fn insert_patient(&self, patient: &Patient) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO patients (
                id, name, phone, email, push_id, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                patient.id,
                patient.name,
                patient.phone,
                patient.email,
                patient.push_id,
                patient.notes,
                ts_to_string(patient.created_at),
                ts_to_string(patient.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Update an existing patient's contact data.
    pub fn update_patient(&self, patient: &Patient, now: DateTime<Utc>) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE patients SET
                name = ?2,
                phone = ?3,
                email = ?4,
                push_id = ?5,
                notes = ?6,
                updated_at = ?7
            WHERE id = ?1
            "#,
            params![
                patient.id,
                patient.name,
                patient.phone,
                patient.email,
                patient.push_id,
                patient.notes,
                ts_to_string(now),
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, id: &str) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM patients WHERE id = ?", PATIENT_COLUMNS),
                [id],
                patient_from_row,
            )
            .optional()?
            .map(Patient::try_from)
            .transpose()
    }

    /// Search patients by name (prefix match).
    pub fn search_patients(&self, query: &str, limit: usize) -> DbResult<Vec<Patient>> {
        let pattern = format!("{}%", query);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patients WHERE name LIKE ? ORDER BY name LIMIT ?",
            PATIENT_COLUMNS
        ))?;

        let rows = stmt.query_map(params![pattern, limit as i64], patient_from_row)?;

        let mut patients = Vec::new();
        for row in rows {
            patients.push(row?.try_into()?);
        }
        Ok(patients)
    }

    /// List all patients.
    pub fn list_patients(&self) -> DbResult<Vec<Patient>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patients ORDER BY name",
            PATIENT_COLUMNS
        ))?;

        let rows = stmt.query_map([], patient_from_row)?;

        let mut patients = Vec::new();
        for row in rows {
            patients.push(row?.try_into()?);
        }
        Ok(patients)
    }
}

/// Intermediate row struct for database mapping.
struct PatientRow {
    id: String,
    name: String,
    phone: Option<String>,
    email: Option<String>,
    push_id: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PatientRow> for Patient {
    type Error = DbError;

    fn try_from(row: PatientRow) -> Result<Self, Self::Error> {
        Ok(Patient {
            id: row.id,
            name: row.name,
            phone: row.phone,
            email: row.email,
            push_id: row.push_id,
            notes: row.notes,
            created_at: ts_from_string(&row.created_at)?,
            updated_at: ts_from_string(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();

        let mut patient = Patient::new("Tanaka Yuki".into());
        patient.email = Some("yuki@example.com".into());
        patient.phone = Some("+81-90-0000-0000".into());

        db.insert_patient(&patient).unwrap();

        let retrieved = db.get_patient(&patient.id).unwrap().unwrap();
        assert_eq!(retrieved.name, "Tanaka Yuki");
        assert_eq!(retrieved.email, Some("yuki@example.com".into()));
        assert_eq!(retrieved.phone, Some("+81-90-0000-0000".into()));
    }

    #[test]
    fn test_update_patient() {
        let db = setup_db();

        let mut patient = Patient::new("Tanaka Yuki".into());
        db.insert_patient(&patient).unwrap();

        patient.push_id = Some("U12345".into());
        patient.notes = Some("Prefers morning visits".into());
        db.update_patient(&patient, Utc::now()).unwrap();

        let retrieved = db.get_patient(&patient.id).unwrap().unwrap();
        assert_eq!(retrieved.push_id, Some("U12345".into()));
        assert_eq!(retrieved.notes, Some("Prefers morning visits".into()));
    }

    #[test]
    fn test_search_patients() {
        let db = setup_db();

        db.insert_patient(&Patient::new("Sato Ken".into())).unwrap();
        db.insert_patient(&Patient::new("Sato Mei".into())).unwrap();
        db.insert_patient(&Patient::new("Tanaka Yuki".into())).unwrap();

        let results = db.search_patients("Sato", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|p| p.name == "Sato Ken"));
        assert!(results.iter().any(|p| p.name == "Sato Mei"));
    }

    #[test]
    fn test_list_patients_sorted_by_name() {
        let db = setup_db();

        db.insert_patient(&Patient::new("Tanaka Yuki".into())).unwrap();
        db.insert_patient(&Patient::new("Sato Ken".into())).unwrap();

        let all = db.list_patients().unwrap();
        let names: Vec<&str> = all.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Sato Ken", "Tanaka Yuki"]);
    }
}
