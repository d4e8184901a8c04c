//! Surgery query layer -- read access to scheduled operations.
//!
//! The `surgeries` table is owned by the CRUD side of the backend; this module
//! only reads it (plus an insert helper for embedding code and tests).

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::storage::Pool;

/// Group used for surgeries that carry no ward.
pub const UNKNOWN_WARD: &str = "Unknown";

/// One planned procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surgery {
    pub id: i64,
    /// Hospital record number.
    pub patient_id: Option<String>,
    pub patient_name: String,
    pub surgery_date: NaiveDate,
    pub surgery_time: Option<NaiveTime>,
    /// Grouping key for notifications.
    pub ward: Option<String>,
    pub procedure_type: Option<String>,
    pub operating_room: Option<String>,
    pub diagnosis: Option<String>,
    pub surgeon: Option<String>,
    pub anesthetist: Option<String>,
    pub phone_primary: Option<String>,
    pub phone_secondary: Option<String>,
    pub notes: Option<String>,
}

impl Surgery {
    /// A surgery with only the mandatory fields set.
    pub fn new(patient_name: impl Into<String>, surgery_date: NaiveDate) -> Self {
        Self {
            id: 0,
            patient_id: None,
            patient_name: patient_name.into(),
            surgery_date,
            surgery_time: None,
            ward: None,
            procedure_type: None,
            operating_room: None,
            diagnosis: None,
            surgeon: None,
            anesthetist: None,
            phone_primary: None,
            phone_secondary: None,
            notes: None,
        }
    }

    /// The notification group this surgery belongs to.
    pub fn group_key(&self) -> &str {
        match self.ward.as_deref().map(str::trim) {
            Some(w) if !w.is_empty() => w,
            _ => UNKNOWN_WARD,
        }
    }
}

const SELECT_COLUMNS: &str = "id, patient_id, patient_name, surgery_date, surgery_time, ward,
    procedure_type, operating_room, diagnosis, surgeon, anesthetist,
    phone_primary, phone_secondary, notes";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Surgery> {
    Ok(Surgery {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        patient_name: row.get(2)?,
        surgery_date: row.get(3)?,
        surgery_time: row.get(4)?,
        ward: row.get(5)?,
        procedure_type: row.get(6)?,
        operating_room: row.get(7)?,
        diagnosis: row.get(8)?,
        surgeon: row.get(9)?,
        anesthetist: row.get(10)?,
        phone_primary: row.get(11)?,
        phone_secondary: row.get(12)?,
        notes: row.get(13)?,
    })
}

/// All surgeries on `date`, optionally restricted to one ward, ordered by
/// ward then time. Passing [`UNKNOWN_WARD`] selects surgeries with no ward.
pub fn list_for_date(pool: &Pool, date: NaiveDate, ward: Option<&str>) -> Result<Vec<Surgery>> {
    let conn = pool.get().context("Failed to get DB connection")?;
    let date_str = date.format("%Y-%m-%d").to_string();

    let base = format!(
        "SELECT {} FROM surgeries WHERE surgery_date = ?1",
        SELECT_COLUMNS
    );
    let order = " ORDER BY COALESCE(TRIM(ward), ''), surgery_time IS NULL, surgery_time, id";

    let rows = match ward {
        None => {
            let mut stmt = conn.prepare(&format!("{}{}", base, order))?;
            let rows = stmt
                .query_map(params![date_str], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
        Some(w) if w == UNKNOWN_WARD => {
            let mut stmt = conn.prepare(&format!(
                "{} AND (ward IS NULL OR TRIM(ward) = '' OR TRIM(ward) = ?2){}",
                base, order
            ))?;
            let rows = stmt
                .query_map(params![date_str, UNKNOWN_WARD], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
        Some(w) => {
            let mut stmt = conn.prepare(&format!("{} AND TRIM(ward) = ?2{}", base, order))?;
            let rows = stmt
                .query_map(params![date_str, w.trim()], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
    };

    Ok(rows)
}

/// Group surgeries by [`Surgery::group_key`], preserving query order inside
/// each group.
pub fn group_by_ward(surgeries: Vec<Surgery>) -> BTreeMap<String, Vec<Surgery>> {
    let mut groups: BTreeMap<String, Vec<Surgery>> = BTreeMap::new();
    for s in surgeries {
        groups.entry(s.group_key().to_string()).or_default().push(s);
    }
    groups
}

/// Current surgery count per ward for `date`.
pub fn count_by_ward(pool: &Pool, date: NaiveDate) -> Result<BTreeMap<String, usize>> {
    let groups = group_by_ward(list_for_date(pool, date, None)?);
    Ok(groups.into_iter().map(|(k, v)| (k, v.len())).collect())
}

/// Insert a surgery and return its row id.
pub fn insert(pool: &Pool, s: &Surgery) -> Result<i64> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO surgeries (patient_id, patient_name, surgery_date, surgery_time, ward,
            procedure_type, operating_room, diagnosis, surgeon, anesthetist,
            phone_primary, phone_secondary, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            s.patient_id,
            s.patient_name,
            s.surgery_date,
            s.surgery_time,
            s.ward,
            s.procedure_type,
            s.operating_room,
            s.diagnosis,
            s.surgeon,
            s.anesthetist,
            s.phone_primary,
            s.phone_secondary,
            s.notes,
        ],
    )
    .context("Failed to insert surgery")?;
    Ok(conn.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_memory_pool;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn at(h: u32, m: u32) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(h, m, 0)
    }

    fn add(pool: &Pool, name: &str, date: NaiveDate, ward: Option<&str>, time: Option<NaiveTime>) {
        let mut s = Surgery::new(name, date);
        s.ward = ward.map(str::to_string);
        s.surgery_time = time;
        insert(pool, &s).unwrap();
    }

    #[test]
    fn test_list_orders_by_ward_then_time() {
        let pool = open_memory_pool().unwrap();
        add(&pool, "late-a", day(20), Some("Ward A"), at(14, 0));
        add(&pool, "b", day(20), Some("Ward B"), at(8, 0));
        add(&pool, "early-a", day(20), Some("Ward A"), at(7, 30));
        add(&pool, "other-day", day(21), Some("Ward A"), at(9, 0));

        let names: Vec<String> = list_for_date(&pool, day(20), None)
            .unwrap()
            .into_iter()
            .map(|s| s.patient_name)
            .collect();
        assert_eq!(names, vec!["early-a", "late-a", "b"]);
    }

    #[test]
    fn test_filter_by_ward_and_unknown() {
        let pool = open_memory_pool().unwrap();
        add(&pool, "a", day(20), Some("Ward A"), None);
        add(&pool, "none", day(20), None, None);
        add(&pool, "blank", day(20), Some("  "), None);

        assert_eq!(list_for_date(&pool, day(20), Some("Ward A")).unwrap().len(), 1);
        let unknown = list_for_date(&pool, day(20), Some(UNKNOWN_WARD)).unwrap();
        assert_eq!(unknown.len(), 2);
        assert!(unknown.iter().all(|s| s.group_key() == UNKNOWN_WARD));
    }

    #[test]
    fn test_count_by_ward() {
        let pool = open_memory_pool().unwrap();
        add(&pool, "1", day(20), Some("Ward A"), None);
        add(&pool, "2", day(20), Some("Ward A"), None);
        add(&pool, "3", day(20), None, None);

        let counts = count_by_ward(&pool, day(20)).unwrap();
        assert_eq!(counts.get("Ward A"), Some(&2));
        assert_eq!(counts.get(UNKNOWN_WARD), Some(&1));
        assert!(count_by_ward(&pool, day(22)).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_preserves_time() {
        let pool = open_memory_pool().unwrap();
        add(&pool, "x", day(20), Some("Ward A"), at(9, 45));
        let s = &list_for_date(&pool, day(20), None).unwrap()[0];
        assert_eq!(s.surgery_time, at(9, 45));
        assert_eq!(s.surgery_date, day(20));
    }
}
