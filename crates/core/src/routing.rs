//! Pure routing rules shared by every engine transition: approver
//! eligibility, comment policy, and mandatory-field validation.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::approver::ApproverEntry;
use crate::domain::history::HistoryAction;
use crate::domain::instance::FieldValue;
use crate::domain::workflow::{CommentPolicy, FieldSpec};
use crate::errors::EngineError;

/// Picks the approver responsible for a level. With a known amount this is
/// the FIRST entry in display order whose ceiling covers it, not the entry
/// with the tightest sufficient ceiling. When no entry qualifies, or the
/// amount is unknown, the first entry takes it. Empty lists resolve to None.
///
/// Do not reorder by limit without a stakeholder decision: first-match by
/// stored order changes who gets assigned for identical submissions.
pub fn resolve_eligible(
    entries: &[ApproverEntry],
    amount: Option<Decimal>,
) -> Option<&ApproverEntry> {
    if let Some(amount) = amount {
        if let Some(entry) = entries.iter().find(|entry| entry.covers(amount)) {
            return Some(entry);
        }
    }
    entries.first()
}

/// Applies the workflow's comment policy to an approver action.
pub fn check_comments(
    policy: &CommentPolicy,
    action: HistoryAction,
    comments: Option<&str>,
) -> Result<(), EngineError> {
    let blank = comments.map(|text| text.trim().is_empty()).unwrap_or(true);
    if !blank {
        return Ok(());
    }

    if policy.always {
        return Err(EngineError::validation("comments are mandatory"));
    }
    if action == HistoryAction::Rejected && policy.on_reject {
        return Err(EngineError::validation("comments are mandatory for rejection"));
    }
    if action == HistoryAction::Escalated && policy.on_escalate {
        return Err(EngineError::validation("comments are mandatory for escalation"));
    }
    Ok(())
}

/// Labels of mandatory fields that have no non-blank stored value, in field
/// order. An empty result means the instance may be submitted.
pub fn missing_mandatory_fields<'a>(
    fields: impl Iterator<Item = &'a FieldSpec>,
    values: &[FieldValue],
) -> Vec<String> {
    let stored: HashMap<&str, &FieldValue> =
        values.iter().map(|value| (value.field_name.as_str(), value)).collect();

    fields
        .filter(|field| field.is_mandatory)
        .filter(|field| stored.get(field.name.as_str()).map(|v| v.is_blank()).unwrap_or(true))
        .map(|field| field.label.clone())
        .collect()
}

/// Parses a monetary amount out of a raw field value, tolerating thousands
/// separators and currency symbols. Unparsable input yields None so the
/// eligibility resolver falls back to list order.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String =
        raw.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect();
    if cleaned.is_empty() {
        return None;
    }

    match cleaned.parse::<Decimal>() {
        Ok(amount) => Some(amount),
        Err(_) => {
            warn!(value = raw, "could not parse amount field value");
            None
        }
    }
}

/// Derives the instance title by joining the values of title-marked fields
/// in display order with `_`.
pub fn derive_title<'a>(
    fields: impl Iterator<Item = &'a FieldSpec>,
    values: &[FieldValue],
) -> Option<String> {
    let stored: HashMap<&str, &FieldValue> =
        values.iter().map(|value| (value.field_name.as_str(), value)).collect();

    let mut title_fields: Vec<&FieldSpec> = fields.filter(|field| field.is_title).collect();
    title_fields.sort_by_key(|field| field.display_order);

    let parts: Vec<String> = title_fields
        .iter()
        .filter_map(|field| stored.get(field.name.as_str()))
        .filter(|value| !value.is_blank())
        .filter_map(|value| value.value.clone())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("_"))
    }
}
