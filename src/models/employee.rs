//! Employee model for the site directory.

use serde::{Deserialize, Deserializer, Serialize};

/// Daily allowance in LKR used when neither the day nor the employee sets one.
pub const DEFAULT_DAILY_ALLOWANCE: i64 = 1000;

/// A site employee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Default allowance for a worked day; `None` falls back to 1000
    #[serde(default)]
    pub daily_allowance: Option<i64>,
    pub created_at: String,
}

impl Employee {
    /// The employee's default allowance, or the site-wide default.
    pub fn default_allowance(&self) -> i64 {
        self.daily_allowance.unwrap_or(DEFAULT_DAILY_ALLOWANCE)
    }
}

/// Request body for creating a new employee.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmployeeRequest {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub daily_allowance: Option<i64>,
}

/// Request body for updating an existing employee.
///
/// Absent fields are kept. An explicit `null` clears an optional field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEmployeeRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub age: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub daily_allowance: Option<Option<i64>>,
}

/// Marks a field as sent, so `null` reads as `Some(None)` and absence as `None`.
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Checks applied to employee fields before any write reaches the store.
pub fn validate_employee_fields(
    name: Option<&str>,
    age: Option<i64>,
    daily_allowance: Option<i64>,
) -> Result<(), String> {
    if let Some(name) = name {
        if name.trim().chars().count() < 2 {
            return Err("Name must be at least 2 characters.".to_string());
        }
    }
    if matches!(age, Some(age) if age <= 0) {
        return Err("Age must be a positive number.".to_string());
    }
    if matches!(daily_allowance, Some(amount) if amount < 0) {
        return Err("Daily allowance cannot be negative.".to_string());
    }
    Ok(())
}
