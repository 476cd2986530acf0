//! RBAC data models: role identity, policy rules, permission records and
//! column filters.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Strongly-typed role identifier.
///
/// Stored as the decimal string form in the subject column of a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub i64);

impl RoleId {
    /// The role of a request without an authenticated identity.
    pub const ANONYMOUS: RoleId = RoleId(0);

    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == 0
    }

    /// The subject string used in policy rules.
    pub fn subject(&self) -> String {
        self.0.to_string()
    }

    /// Parse a decimal role id, as carried in string claims.
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse::<i64>().ok().map(Self)
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RoleId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Rule
// ═══════════════════════════════════════════════════════════════════════════════

/// A single allow rule: `subject` may perform `action` on paths matching `object`.
///
/// Rules have no identity of their own; two rules are the same rule when
/// all three fields are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Role id in string form.
    pub subject: String,
    /// Path pattern, e.g. `/api/users/*`.
    pub object: String,
    /// HTTP method, matched exactly.
    pub action: String,
}

impl PolicyRule {
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    /// Build the rule granting `permission` to `role`.
    pub fn for_role(role: RoleId, permission: &PermissionRecord) -> Self {
        Self::new(role.subject(), &permission.path, &permission.method)
    }

    /// Value of the given column.
    pub fn field(&self, column: PolicyColumn) -> &str {
        match column {
            PolicyColumn::Subject => &self.subject,
            PolicyColumn::Object => &self.object,
            PolicyColumn::Action => &self.action,
        }
    }

    pub fn set_field(&mut self, column: PolicyColumn, value: impl Into<String>) {
        let value = value.into();
        match column {
            PolicyColumn::Subject => self.subject = value,
            PolicyColumn::Object => self.object = value,
            PolicyColumn::Action => self.action = value,
        }
    }

    /// Project away the subject.
    pub fn to_permission(&self) -> PermissionRecord {
        PermissionRecord::new(&self.object, &self.action)
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.object, self.action)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Public-facing view of a rule with the subject omitted.
///
/// Serializes as `{"path": "/api/users/*", "method": "GET"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub path: String,
    pub method: String,
}

impl PermissionRecord {
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
        }
    }

    /// Parse the `PATH:METHOD` shorthand, splitting on the last colon so
    /// that `:param` path segments survive.
    ///
    /// The method must be an uppercase token or `*`, so a path ending in a
    /// `:param` segment with the method left off is rejected rather than
    /// split inside the parameter.
    pub fn parse(s: &str) -> Option<Self> {
        let (path, method) = s.rsplit_once(':')?;
        if path.is_empty() || !is_method_token(method) {
            return None;
        }
        Some(Self::new(path, method))
    }

    /// Reject records that can never match a request.
    pub fn validate(&self) -> Result<()> {
        validate_path(&self.path)?;
        validate_method(&self.method)
    }
}

impl fmt::Display for PermissionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

fn is_method_token(method: &str) -> bool {
    method == "*" || (!method.is_empty() && method.chars().all(|c| c.is_ascii_uppercase()))
}

pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(WardenError::invalid_permission("path must not be empty"));
    }
    if !path.starts_with('/') && path != "*" {
        return Err(WardenError::invalid_permission(format!(
            "path must start with '/': {}",
            path
        )));
    }
    Ok(())
}

pub(crate) fn validate_method(method: &str) -> Result<()> {
    if method.is_empty() {
        return Err(WardenError::invalid_permission("method must not be empty"));
    }
    if method.chars().any(char::is_whitespace) {
        return Err(WardenError::invalid_permission(format!(
            "method must not contain whitespace: {:?}",
            method
        )));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Columns and Filters
// ═══════════════════════════════════════════════════════════════════════════════

/// Policy table columns, in stored order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyColumn {
    Subject = 0,
    Object = 1,
    Action = 2,
}

impl PolicyColumn {
    pub const ALL: [PolicyColumn; 3] = [Self::Subject, Self::Object, Self::Action];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Storage column name (`v0`, `v1`, `v2`).
    pub fn column_name(&self) -> &'static str {
        match self {
            Self::Subject => "v0",
            Self::Object => "v1",
            Self::Action => "v2",
        }
    }
}

impl TryFrom<usize> for PolicyColumn {
    type Error = WardenError;

    fn try_from(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| {
                WardenError::invalid_filter(format!("column index {} out of range", index))
            })
    }
}

impl fmt::Display for PolicyColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Subject => "subject",
            Self::Object => "object",
            Self::Action => "action",
        };
        write!(f, "{}", name)
    }
}

/// Positional filter over consecutive columns.
///
/// `values[i]` constrains column `column + i`; an empty value matches
/// anything in that column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyFilter {
    column: PolicyColumn,
    values: Vec<String>,
}

impl PolicyFilter {
    pub fn new(column: PolicyColumn, values: Vec<String>) -> Result<Self> {
        if values.is_empty() {
            return Err(WardenError::invalid_filter("at least one filter value is required"));
        }
        if column.index() + values.len() > PolicyColumn::ALL.len() {
            return Err(WardenError::invalid_filter(format!(
                "{} values starting at column {} exceed the rule width",
                values.len(),
                column.index()
            )));
        }
        if values.iter().all(String::is_empty) {
            return Err(WardenError::invalid_filter("filter values must not all be empty"));
        }
        Ok(Self { column, values })
    }

    /// Filter on the subject column for a role.
    pub fn subject(role: RoleId) -> Self {
        Self {
            column: PolicyColumn::Subject,
            values: vec![role.subject()],
        }
    }

    pub fn column(&self) -> PolicyColumn {
        self.column
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// The non-wildcard constraints as (column, value) pairs.
    pub fn constraints(&self) -> impl Iterator<Item = (PolicyColumn, &str)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.is_empty())
            .map(move |(offset, value)| {
                (PolicyColumn::ALL[self.column.index() + offset], value.as_str())
            })
    }

    pub fn matches(&self, rule: &PolicyRule) -> bool {
        self.constraints().all(|(column, value)| rule.field(column) == value)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
