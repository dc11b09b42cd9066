use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{CompanyId, Priority, ProjectId, RequestId, RequestStatus, Unit, UserId};

pub const MAX_MATERIAL_NAME_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 1000;
pub const MAX_QUANTITY: f64 = 1_000_000.0;

/// Placeholder shown when the requester's profile could not be resolved
pub const UNKNOWN_REQUESTER: &str = "Unknown";

/// A construction material request, as stored remotely and held in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRequest {
    pub id: RequestId,
    pub company_id: CompanyId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub material_name: String,
    pub quantity: f64,
    pub unit: Unit,
    pub status: RequestStatus,
    pub priority: Priority,
    pub requested_by: UserId,
    /// Resolved by a secondary profile lookup, never stored on the row itself
    #[serde(default, skip_serializing)]
    pub requester_name: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MaterialRequest {
    pub fn requester_display_name(&self) -> &str {
        self.requester_name.as_deref().unwrap_or(UNKNOWN_REQUESTER)
    }
}

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_material_name(name: &str, violations: &mut Vec<FieldViolation>) {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        violations.push(FieldViolation::new("material_name", "is required"));
    } else if trimmed.chars().count() > MAX_MATERIAL_NAME_LEN {
        violations.push(FieldViolation::new(
            "material_name",
            format!("must be at most {MAX_MATERIAL_NAME_LEN} characters"),
        ));
    }
}

fn check_quantity(quantity: f64, violations: &mut Vec<FieldViolation>) {
    if !quantity.is_finite() || quantity <= 0.0 {
        violations.push(FieldViolation::new("quantity", "must be greater than 0"));
    } else if quantity > MAX_QUANTITY {
        violations.push(FieldViolation::new(
            "quantity",
            "must be at most 1,000,000",
        ));
    }
}

fn check_notes(notes: Option<&str>, violations: &mut Vec<FieldViolation>) {
    if let Some(notes) = notes {
        if notes.chars().count() > MAX_NOTES_LEN {
            violations.push(FieldViolation::new(
                "notes",
                format!("must be at most {MAX_NOTES_LEN} characters"),
            ));
        }
    }
}

/// Fields supplied by the requester when creating a request.
///
/// Status, requester, company and timestamps are filled in by the store client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMaterialRequest {
    pub material_name: String,
    pub quantity: f64,
    pub unit: Unit,
    pub priority: Priority,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
}

impl NewMaterialRequest {
    pub fn new(material_name: impl Into<String>, quantity: f64, unit: Unit, priority: Priority) -> Self {
        Self {
            material_name: material_name.into(),
            quantity,
            unit,
            priority,
            notes: None,
            project_id: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<(), Vec<FieldViolation>> {
        let mut violations = Vec::new();
        check_material_name(&self.material_name, &mut violations);
        check_quantity(self.quantity, &mut violations);
        check_notes(self.notes.as_deref(), &mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// Partial edit of a request. `None` leaves a field untouched.
///
/// `notes` and `project_id` are doubly optional so they can be cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Unit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Option<ProjectId>>,
}

impl RequestPatch {
    pub fn status(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), Vec<FieldViolation>> {
        let mut violations = Vec::new();
        if let Some(name) = &self.material_name {
            check_material_name(name, &mut violations);
        }
        if let Some(quantity) = self.quantity {
            check_quantity(quantity, &mut violations);
        }
        if let Some(notes) = &self.notes {
            check_notes(notes.as_deref(), &mut violations);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Applies the edited fields to `row`. Timestamps are left to the caller.
    pub fn apply_to(&self, row: &mut MaterialRequest) {
        if let Some(name) = &self.material_name {
            row.material_name = name.trim().to_string();
        }
        if let Some(quantity) = self.quantity {
            row.quantity = quantity;
        }
        if let Some(unit) = self.unit {
            row.unit = unit;
        }
        if let Some(priority) = self.priority {
            row.priority = priority;
        }
        if let Some(status) = self.status {
            row.status = status;
        }
        if let Some(notes) = &self.notes {
            row.notes = notes.clone();
        }
        if let Some(project_id) = self.project_id {
            row.project_id = project_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_row() -> MaterialRequest {
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap();
        MaterialRequest {
            id: RequestId::new(),
            company_id: CompanyId::new(),
            project_id: None,
            material_name: "Steel Bars".to_string(),
            quantity: 500.0,
            unit: Unit::Kg,
            status: RequestStatus::Pending,
            priority: Priority::High,
            requested_by: UserId::new(),
            requester_name: None,
            requested_at: at,
            notes: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_new_request_validation_bounds() {
        let ok = NewMaterialRequest::new("Cement", 1_000_000.0, Unit::Tons, Priority::Low);
        assert!(ok.validate().is_ok());

        let blank = NewMaterialRequest::new("   ", 0.0, Unit::Kg, Priority::Low)
            .with_notes("x".repeat(MAX_NOTES_LEN + 1));
        let violations = blank.validate().unwrap_err();
        let fields: Vec<_> = violations.iter().map(|v| v.field).collect();
        assert_eq!(fields, vec!["material_name", "quantity", "notes"]);

        let too_long = NewMaterialRequest::new("a".repeat(201), 1.5, Unit::M, Priority::Medium);
        assert_eq!(too_long.validate().unwrap_err()[0].field, "material_name");

        let too_much = NewMaterialRequest::new("Sand", 1_000_000.5, Unit::Tons, Priority::Low);
        assert_eq!(too_much.validate().unwrap_err()[0].field, "quantity");
    }

    #[test]
    fn test_patch_applies_only_set_fields() {
        let mut row = sample_row();
        row.notes = Some("deliver to gate 2".to_string());
        let before = row.clone();

        RequestPatch::default().apply_to(&mut row);
        assert_eq!(row, before);

        let patch = RequestPatch {
            quantity: Some(750.0),
            notes: Some(None),
            ..Default::default()
        };
        patch.apply_to(&mut row);
        assert_eq!(row.quantity, 750.0);
        assert_eq!(row.notes, None);
        assert_eq!(row.material_name, before.material_name);
        assert_eq!(row.status, before.status);
    }

    #[test]
    fn test_patch_serializes_only_present_fields() {
        let patch = RequestPatch {
            priority: Some(Priority::Urgent),
            notes: Some(None),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"priority": "urgent", "notes": null}));
    }

    #[test]
    fn test_requester_display_name_falls_back() {
        let mut row = sample_row();
        assert_eq!(row.requester_display_name(), UNKNOWN_REQUESTER);
        row.requester_name = Some("Dana Ortiz".to_string());
        assert_eq!(row.requester_display_name(), "Dana Ortiz");
    }
}
