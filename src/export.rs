//! CSV rendering of exported requests

use thiserror::Error;

use crate::model::MaterialRequest;

const HEADERS: [&str; 9] = [
    "Material",
    "Quantity",
    "Unit",
    "Status",
    "Priority",
    "Requested By",
    "Requested At",
    "Updated At",
    "Notes",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write CSV record: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to flush CSV output: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders already-resolved rows as CSV with a header line
pub fn to_csv(rows: &[MaterialRequest]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADERS)?;

    for row in rows {
        writer.write_record([
            row.material_name.as_str(),
            &row.quantity.to_string(),
            row.unit.as_str(),
            row.status.as_str(),
            row.priority.as_str(),
            row.requester_display_name(),
            &row.requested_at.to_rfc3339(),
            &row.updated_at.to_rfc3339(),
            row.notes.as_deref().unwrap_or(""),
        ])?;
    }

    writer.into_inner().map_err(|err| ExportError::Io(err.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompanyId, Priority, RequestId, RequestStatus, Unit, UserId};
    use chrono::{TimeZone, Utc};

    fn row(name: &str, notes: Option<&str>, requester: Option<&str>) -> MaterialRequest {
        let at = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        MaterialRequest {
            id: RequestId::new(),
            company_id: CompanyId::new(),
            project_id: None,
            material_name: name.into(),
            quantity: 2.5,
            unit: Unit::CubicMeters,
            status: RequestStatus::Approved,
            priority: Priority::Urgent,
            requested_by: UserId::new(),
            requester_name: requester.map(str::to_string),
            requested_at: at,
            notes: notes.map(str::to_string),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_header_and_rows() {
        let bytes = to_csv(&[row("Concrete", None, Some("Ada Builder"))]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Material,Quantity,Unit,Status,Priority,Requested By,Requested At,Updated At,Notes"
        );
        let line = lines.next().unwrap();
        assert!(line.starts_with("Concrete,2.5,cubic_meters,approved,urgent,Ada Builder,"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_unresolved_requester_and_quoting() {
        let bytes = to_csv(&[row("Pipe, 20mm", Some("call \"site B\" first"), None)]).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[0], "Pipe, 20mm");
        assert_eq!(&record[5], "Unknown");
        assert_eq!(&record[8], "call \"site B\" first");
    }

    #[test]
    fn test_empty_export_has_only_header() {
        let bytes = to_csv(&[]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap().lines().count(), 1);
    }
}
