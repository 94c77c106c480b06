use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCategory {
    Financial,
    NonFinancial,
}

impl WorkflowCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::NonFinancial => "non_financial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "financial" => Some(Self::Financial),
            "non_financial" => Some(Self::NonFinancial),
            _ => None,
        }
    }
}

/// Which transitions require a non-blank comment from the acting approver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPolicy {
    pub always: bool,
    pub on_reject: bool,
    pub on_escalate: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    TextArea,
    Number,
    Date,
    Checkbox,
    Select,
    Email,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::TextArea => "textarea",
            Self::Number => "number",
            Self::Date => "date",
            Self::Checkbox => "checkbox",
            Self::Select => "select",
            Self::Email => "email",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "textarea" => Some(Self::TextArea),
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            "checkbox" => Some(Self::Checkbox),
            "select" => Some(Self::Select),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// One field of a workflow form. `name` is unique within the workflow;
/// the field named `amount` carries the instance's monetary value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub is_mandatory: bool,
    pub is_amount: bool,
    pub is_title: bool,
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub display_order: u32,
    pub group: Option<String>,
}

impl FieldSpec {
    pub fn is_amount_field(&self) -> bool {
        self.is_amount || self.name.eq_ignore_ascii_case("amount")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowForm {
    pub name: String,
    pub display_order: u32,
    pub fields: Vec<FieldSpec>,
}

/// Immutable-per-version workflow template: ordered forms of fields plus the
/// routing policy flags the engine consults on every transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub category: WorkflowCategory,
    pub requires_approval: bool,
    pub is_published: bool,
    pub is_active: bool,
    pub version_number: u32,
    pub comment_policy: CommentPolicy,
    pub forms: Vec<WorkflowForm>,
}

impl WorkflowDefinition {
    pub fn is_available(&self) -> bool {
        self.is_published && self.is_active
    }

    /// All fields across forms, in form order then field order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.forms.iter().flat_map(|form| form.fields.iter())
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldSpec> {
        self.fields().find(|field| field.name == name)
    }
}
