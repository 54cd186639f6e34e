//! Postal address snapshot.

use serde::{Deserialize, Serialize};

/// A shipping or billing address as captured at checkout.
///
/// Orders store a copy of this (JSONB), so later edits elsewhere never change
/// where a historical order was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub address1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
}

impl Address {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_owned()
    }

    /// Non-empty lines for printing on an invoice or in a chat message.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.full_name()];
        lines.extend(non_empty(self.company.as_deref()));
        lines.extend(non_empty(Some(&self.address1)));
        lines.extend(non_empty(self.address2.as_deref()));

        let locality = [
            Some(self.city.as_str()),
            self.province.as_deref(),
            Some(self.postal_code.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
        if !locality.is_empty() {
            lines.push(locality);
        }

        lines.extend(non_empty(Some(&self.country)));
        lines.retain(|line| !line.is_empty());
        lines
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
