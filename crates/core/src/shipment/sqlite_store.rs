//! SQLite-backed shipment store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    CreateShipmentRequest, Shipment, ShipmentError, ShipmentFilter, ShipmentPatch,
    ShipmentStatus, ShipmentStore, StatusTransition,
};

const SHIPMENT_COLUMNS: &str =
    "id, carrier, service_code, tracking_number, status, created_at, updated_at";

/// Fixed-width RFC3339 so stored timestamps compare correctly as text.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Raw row as read from SQLite, before domain validation.
struct ShipmentRow {
    id: i64,
    carrier: Option<String>,
    service_code: Option<String>,
    tracking_number: Option<String>,
    status: Option<String>,
    created_at: String,
    updated_at: Option<String>,
}

impl ShipmentRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            carrier: row.get(1)?,
            service_code: row.get(2)?,
            tracking_number: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_shipment(self) -> Result<Shipment, ShipmentError> {
        let id = self.id;
        let invalid = |reason: String| ShipmentError::InvalidData { id, reason };

        let status = self
            .status
            .map(|s| s.parse::<ShipmentStatus>())
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;

        let created_at = parse_timestamp(&self.created_at)
            .ok_or_else(|| invalid(format!("bad created_at: {}", self.created_at)))?;

        let updated_at = match self.updated_at {
            Some(raw) => Some(
                parse_timestamp(&raw).ok_or_else(|| invalid(format!("bad updated_at: {}", raw)))?,
            ),
            None => None,
        };

        Ok(Shipment {
            id,
            carrier: self.carrier,
            service_code: self.service_code,
            tracking_number: self.tracking_number,
            status,
            created_at,
            updated_at,
        })
    }
}

/// SQLite-backed shipment store.
pub struct SqliteShipmentStore {
    conn: Mutex<Connection>,
}

impl SqliteShipmentStore {
    /// Create a new SQLite shipment store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, ShipmentError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite shipment store (useful for testing).
    pub fn in_memory() -> Result<Self, ShipmentError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ShipmentError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS shipments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                carrier TEXT,
                service_code TEXT,
                tracking_number TEXT,
                status TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT,
                deleted_at TEXT,
                is_deleted INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_shipments_tracking_number ON shipments(tracking_number);
            CREATE INDEX IF NOT EXISTS idx_shipments_status ON shipments(status);
            CREATE INDEX IF NOT EXISTS idx_shipments_is_deleted ON shipments(is_deleted);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ShipmentError> {
        self.conn
            .lock()
            .map_err(|_| ShipmentError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &ShipmentFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = vec!["is_deleted = 0"];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        (format!("WHERE {}", conditions.join(" AND ")), params)
    }

    fn fetch(conn: &Connection, id: i64) -> Result<Option<Shipment>, ShipmentError> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM shipments WHERE id = ? AND is_deleted = 0",
                    SHIPMENT_COLUMNS
                ),
                params![id],
                ShipmentRow::from_row,
            )
            .optional()?;

        row.map(ShipmentRow::into_shipment).transpose()
    }

    fn collect(
        stmt: &mut rusqlite::Statement<'_>,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Shipment>, ShipmentError> {
        let rows = stmt.query_map(params, ShipmentRow::from_row)?;

        let mut shipments = Vec::new();
        for row in rows {
            shipments.push(row?.into_shipment()?);
        }
        Ok(shipments)
    }
}

impl ShipmentStore for SqliteShipmentStore {
    fn create(&self, request: CreateShipmentRequest) -> Result<Shipment, ShipmentError> {
        let conn = self.lock()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO shipments (carrier, service_code, tracking_number, status, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                request.carrier,
                request.service_code,
                request.tracking_number,
                request.status.map(|s| s.as_str()),
                format_timestamp(now),
            ],
        )?;
        let id = conn.last_insert_rowid();

        Self::fetch(&conn, id)?.ok_or(ShipmentError::NotFound(id))
    }

    fn get(&self, id: i64) -> Result<Option<Shipment>, ShipmentError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn list(&self, filter: &ShipmentFilter) -> Result<Vec<Shipment>, ShipmentError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM shipments {} ORDER BY id DESC LIMIT ? OFFSET ?",
            SHIPMENT_COLUMNS, where_clause
        );

        let mut all_params = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        Self::collect(&mut stmt, param_refs.as_slice())
    }

    fn count(&self, filter: &ShipmentFilter) -> Result<i64, ShipmentError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM shipments {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn update(&self, id: i64, patch: ShipmentPatch) -> Result<Shipment, ShipmentError> {
        let conn = self.lock()?;

        let current = Self::fetch(&conn, id)?.ok_or(ShipmentError::NotFound(id))?;

        let carrier = patch.carrier.or(current.carrier);
        let service_code = patch.service_code.or(current.service_code);
        let tracking_number = match patch.tracking_number {
            Some(number) if number.is_empty() => None,
            Some(number) => Some(number),
            None => current.tracking_number,
        };
        let status = patch.status.or(current.status);

        conn.execute(
            "UPDATE shipments SET carrier = ?, service_code = ?, tracking_number = ?, status = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
            params![
                carrier,
                service_code,
                tracking_number,
                status.map(|s| s.as_str()),
                format_timestamp(Utc::now()),
                id,
            ],
        )?;

        Self::fetch(&conn, id)?.ok_or(ShipmentError::NotFound(id))
    }

    fn delete(&self, id: i64) -> Result<Shipment, ShipmentError> {
        let conn = self.lock()?;

        let shipment = Self::fetch(&conn, id)?.ok_or(ShipmentError::NotFound(id))?;

        conn.execute(
            "UPDATE shipments SET is_deleted = 1, deleted_at = ? WHERE id = ?",
            params![format_timestamp(Utc::now()), id],
        )?;

        Ok(shipment)
    }

    fn transition_status(
        &self,
        id: i64,
        expected: Option<ShipmentStatus>,
        new: ShipmentStatus,
    ) -> Result<StatusTransition, ShipmentError> {
        let conn = self.lock()?;

        let changed = conn.execute(
            "UPDATE shipments SET status = ?, updated_at = ? WHERE id = ? AND is_deleted = 0 AND status IS ?",
            params![
                new.as_str(),
                format_timestamp(Utc::now()),
                id,
                expected.map(|s| s.as_str()),
            ],
        )?;

        if changed == 1 {
            return match Self::fetch(&conn, id)? {
                Some(shipment) => Ok(StatusTransition::Applied(shipment)),
                None => Ok(StatusTransition::NotFound),
            };
        }

        match Self::fetch(&conn, id)? {
            Some(shipment) => Ok(StatusTransition::Conflict {
                found: shipment.status,
            }),
            None => Ok(StatusTransition::NotFound),
        }
    }

    fn list_stale_tracked(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Shipment>, ShipmentError> {
        let conn = self.lock()?;

        let sql = format!(
            "SELECT {} FROM shipments \
             WHERE is_deleted = 0 \
               AND tracking_number IS NOT NULL AND tracking_number != '' \
               AND (status IS NULL OR status NOT IN ('delivered', 'cancelled', 'failed')) \
               AND COALESCE(updated_at, created_at) < ? \
             ORDER BY COALESCE(updated_at, created_at) ASC LIMIT ?",
            SHIPMENT_COLUMNS
        );

        let before = format_timestamp(before);
        let mut stmt = conn.prepare(&sql)?;
        Self::collect(&mut stmt, params![before, limit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteShipmentStore {
        SqliteShipmentStore::in_memory().unwrap()
    }

    fn tracked_request(status: Option<ShipmentStatus>) -> CreateShipmentRequest {
        CreateShipmentRequest {
            carrier: Some("usps".to_string()),
            service_code: Some("usps_priority".to_string()),
            tracking_number: Some("9400111899223197428490".to_string()),
            status,
        }
    }

    #[test]
    fn test_create_shipment() {
        let store = create_test_store();

        let shipment = store
            .create(tracked_request(Some(ShipmentStatus::Pending)))
            .unwrap();

        assert!(shipment.id > 0);
        assert_eq!(shipment.carrier.as_deref(), Some("usps"));
        assert_eq!(shipment.status, Some(ShipmentStatus::Pending));
        assert!(shipment.updated_at.is_none());
    }

    #[test]
    fn test_get_nonexistent_shipment() {
        let store = create_test_store();
        assert!(store.get(42).unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first_with_pagination() {
        let store = create_test_store();
        let ids: Vec<i64> = (0..5)
            .map(|_| store.create(tracked_request(None)).unwrap().id)
            .collect();

        let page = store
            .list(&ShipmentFilter::new().with_limit(2).with_offset(0))
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, ids[4]);
        assert_eq!(page[1].id, ids[3]);

        let last = store
            .list(&ShipmentFilter::new().with_limit(2).with_offset(4))
            .unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id, ids[0]);
    }

    #[test]
    fn test_count_with_status_filter() {
        let store = create_test_store();
        store
            .create(tracked_request(Some(ShipmentStatus::Pending)))
            .unwrap();
        store
            .create(tracked_request(Some(ShipmentStatus::Delivered)))
            .unwrap();
        store.create(tracked_request(None)).unwrap();

        assert_eq!(store.count(&ShipmentFilter::new()).unwrap(), 3);
        assert_eq!(
            store
                .count(&ShipmentFilter::new().with_status(ShipmentStatus::Delivered))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_update_applies_patch_only() {
        let store = create_test_store();
        let shipment = store
            .create(tracked_request(Some(ShipmentStatus::Pending)))
            .unwrap();

        let updated = store
            .update(
                shipment.id,
                ShipmentPatch {
                    status: Some(ShipmentStatus::Cancelled),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.status, Some(ShipmentStatus::Cancelled));
        assert_eq!(updated.carrier.as_deref(), Some("usps"));
        assert_eq!(updated.tracking_number, shipment.tracking_number);
        assert!(updated.updated_at.is_some());
    }

    #[test]
    fn test_update_with_empty_tracking_number_clears_it() {
        let store = create_test_store();
        let shipment = store
            .create(tracked_request(Some(ShipmentStatus::Shipped)))
            .unwrap();

        let updated = store
            .update(
                shipment.id,
                ShipmentPatch {
                    tracking_number: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.tracking_number, None);
        assert!(!updated.has_tracking_number());
        assert_eq!(updated.status, Some(ShipmentStatus::Shipped));
    }

    #[test]
    fn test_update_nonexistent_shipment() {
        let store = create_test_store();
        let result = store.update(7, ShipmentPatch::default());
        assert!(matches!(result, Err(ShipmentError::NotFound(7))));
    }

    #[test]
    fn test_soft_delete_hides_shipment() {
        let store = create_test_store();
        let shipment = store.create(tracked_request(None)).unwrap();

        let deleted = store.delete(shipment.id).unwrap();
        assert_eq!(deleted.id, shipment.id);

        assert!(store.get(shipment.id).unwrap().is_none());
        assert_eq!(store.count(&ShipmentFilter::new()).unwrap(), 0);
        assert!(matches!(
            store.delete(shipment.id),
            Err(ShipmentError::NotFound(_))
        ));
    }

    #[test]
    fn test_transition_applies_when_status_matches() {
        let store = create_test_store();
        let shipment = store
            .create(tracked_request(Some(ShipmentStatus::Processing)))
            .unwrap();

        let result = store
            .transition_status(
                shipment.id,
                Some(ShipmentStatus::Processing),
                ShipmentStatus::Shipped,
            )
            .unwrap();

        match result {
            StatusTransition::Applied(updated) => {
                assert_eq!(updated.status, Some(ShipmentStatus::Shipped));
                assert!(updated.updated_at.is_some());
            }
            other => panic!("expected Applied, got {:?}", other),
        }
    }

    #[test]
    fn test_transition_matches_null_status() {
        let store = create_test_store();
        let shipment = store.create(tracked_request(None)).unwrap();

        let result = store
            .transition_status(shipment.id, None, ShipmentStatus::Pending)
            .unwrap();

        assert!(matches!(result, StatusTransition::Applied(_)));
    }

    #[test]
    fn test_transition_conflict_leaves_row_untouched() {
        let store = create_test_store();
        let shipment = store
            .create(tracked_request(Some(ShipmentStatus::Shipped)))
            .unwrap();

        let result = store
            .transition_status(
                shipment.id,
                Some(ShipmentStatus::Processing),
                ShipmentStatus::Shipped,
            )
            .unwrap();

        assert_eq!(
            result,
            StatusTransition::Conflict {
                found: Some(ShipmentStatus::Shipped)
            }
        );
        assert!(store.get(shipment.id).unwrap().unwrap().updated_at.is_none());
    }

    #[test]
    fn test_transition_on_deleted_shipment() {
        let store = create_test_store();
        let shipment = store.create(tracked_request(None)).unwrap();
        store.delete(shipment.id).unwrap();

        let result = store
            .transition_status(shipment.id, None, ShipmentStatus::Pending)
            .unwrap();
        assert_eq!(result, StatusTransition::NotFound);
    }

    #[test]
    fn test_unknown_stored_status_is_invalid_data() {
        let store = create_test_store();
        let shipment = store.create(tracked_request(None)).unwrap();

        store
            .lock()
            .unwrap()
            .execute(
                "UPDATE shipments SET status = 'lost_at_sea' WHERE id = ?",
                params![shipment.id],
            )
            .unwrap();

        let err = store.get(shipment.id).unwrap_err();
        assert!(matches!(err, ShipmentError::InvalidData { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_list_stale_tracked() {
        let store = create_test_store();

        let stale = store
            .create(tracked_request(Some(ShipmentStatus::Shipped)))
            .unwrap();
        store
            .create(tracked_request(Some(ShipmentStatus::Delivered)))
            .unwrap();
        store
            .create(CreateShipmentRequest {
                tracking_number: None,
                ..tracked_request(None)
            })
            .unwrap();

        let future = Utc::now() + chrono::Duration::seconds(60);
        let shipments = store.list_stale_tracked(future, 10).unwrap();
        assert_eq!(shipments.len(), 1);
        assert_eq!(shipments[0].id, stale.id);

        let past = Utc::now() - chrono::Duration::seconds(60);
        assert!(store.list_stale_tracked(past, 10).unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_format_sorts_as_text() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_timestamp(earlier) < format_timestamp(later));
        assert_eq!(
            parse_timestamp(&format_timestamp(earlier)).map(|t| t.timestamp_micros()),
            Some(earlier.timestamp_micros())
        );
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("shipments.db");

        let store = SqliteShipmentStore::new(&db_path).unwrap();
        let shipment = store.create(tracked_request(None)).unwrap();

        assert!(db_path.exists());
        assert!(store.get(shipment.id).unwrap().is_some());
    }
}
