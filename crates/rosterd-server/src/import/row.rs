//! Per-row parsing and validation
//!
//! Validation is pure: it looks only at the record and an in-memory
//! [`CodeBook`] loaded once per job from the code-lookup collaborator.
//! A structurally broken row is a row-level rejection, never a job failure.

use csv::StringRecord;
use std::collections::HashMap;
use uuid::Uuid;

/// Expected column order of the roster CSV (after the header row):
/// external id (optional), first name, last name, class group, year group,
/// guardian email.
pub const EXPECTED_COLUMNS: usize = 6;

/// Label-to-id maps for the group codes known to the data store.
#[derive(Debug, Clone, Default)]
pub struct CodeBook {
    pub class_groups: HashMap<String, Uuid>,
    pub year_groups: HashMap<String, Uuid>,
}

/// A row that passed validation and is ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRow {
    /// `None` means the auto-generate sentinel (empty external id column).
    pub external_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub class_group: String,
    pub class_group_id: Uuid,
    pub year_group: String,
    pub year_group_id: Uuid,
    pub guardian_email: String,
}

impl ValidRow {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Structured rejection of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    pub row: u64,
    pub reason: String,
}

/// Result of checking one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowCheck {
    Valid(ValidRow),
    Rejected(RowRejection),
    /// Every field empty. Counted as `skipped`, not an error.
    Blank,
}

/// Validate one raw CSV record against the loaded code book.
///
/// `row` is the 1-based data row number (header excluded).
pub fn validate_record(record: &StringRecord, row: u64, codes: &CodeBook) -> RowCheck {
    if record.iter().all(|field| field.trim().is_empty()) {
        return RowCheck::Blank;
    }

    if record.len() != EXPECTED_COLUMNS {
        return RowCheck::Rejected(RowRejection {
            row,
            reason: format!(
                "expected {} columns, found {}",
                EXPECTED_COLUMNS,
                record.len()
            ),
        });
    }

    let field = |idx: usize| record.get(idx).unwrap_or("").trim();

    let external_id = field(0);
    let first_name = field(1);
    let last_name = field(2);
    let class_group = field(3);
    let year_group = field(4);
    let guardian_email = field(5);

    for (value, label) in [
        (first_name, "first name"),
        (last_name, "last name"),
        (class_group, "class group"),
        (year_group, "year group"),
        (guardian_email, "guardian email"),
    ] {
        if value.is_empty() {
            return RowCheck::Rejected(RowRejection {
                row,
                reason: format!("missing required field: {}", label),
            });
        }
    }

    if !email_is_well_formed(guardian_email) {
        return RowCheck::Rejected(RowRejection {
            row,
            reason: format!("malformed guardian email: {}", guardian_email),
        });
    }

    let Some(&class_group_id) = codes.class_groups.get(class_group) else {
        return RowCheck::Rejected(RowRejection {
            row,
            reason: format!("unknown class group: {}", class_group),
        });
    };

    let Some(&year_group_id) = codes.year_groups.get(year_group) else {
        return RowCheck::Rejected(RowRejection {
            row,
            reason: format!("unknown year group: {}", year_group),
        });
    };

    RowCheck::Valid(ValidRow {
        external_id: if external_id.is_empty() {
            None
        } else {
            Some(external_id.to_string())
        },
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        class_group: class_group.to_string(),
        class_group_id,
        year_group: year_group.to_string(),
        year_group_id,
        guardian_email: guardian_email.to_string(),
    })
}

/// Best-effort display name for a record, used to label outcomes for rows
/// that never made it through validation.
pub fn subject_label(record: &StringRecord, row: u64) -> String {
    let first = record.get(1).unwrap_or("").trim();
    let last = record.get(2).unwrap_or("").trim();
    if first.is_empty() && last.is_empty() {
        format!("row {}", row)
    } else {
        format!("{} {}", first, last).trim().to_string()
    }
}

fn email_is_well_formed(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}
