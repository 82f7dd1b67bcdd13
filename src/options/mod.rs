//! Fixed choice lists for signup and organization forms.

mod countries;

use serde::Serialize;

use countries::COUNTRIES;

/// A selectable value with its display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub value: &'static str,
    pub label: &'static str,
}

pub const SECTORS: [Choice; 3] = [
    Choice {
        value: "manufacturing",
        label: "Manufacturing",
    },
    Choice {
        value: "oil_gas",
        label: "Oil & Gas",
    },
    Choice {
        value: "finance",
        label: "Finance",
    },
];

pub const REPORTING_FOCUSES: [Choice; 3] = [
    Choice {
        value: "NIGERIA",
        label: "Nigeria Regulators Only",
    },
    Choice {
        value: "INTERNATIONAL",
        label: "International Frameworks Only",
    },
    Choice {
        value: "HYBRID",
        label: "Nigeria + International (Hybrid)",
    },
];

pub fn is_choice(choices: &[Choice], value: &str) -> bool {
    choices.iter().any(|c| c.value == value)
}

/// Comma-separated values, for error messages.
pub fn list_values(choices: &[Choice]) -> String {
    choices.iter().map(|c| c.value).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Country {
    pub code: &'static str,
    pub name: &'static str,
}

/// Every ISO 3166-1 country, ordered by name.
pub fn countries() -> impl Iterator<Item = Country> {
    COUNTRIES
        .iter()
        .map(|&(code, name)| Country { code, name })
}

/// Look up a country by alpha-2 code, ignoring case.
pub fn country(code: &str) -> Option<Country> {
    countries().find(|c| c.code.eq_ignore_ascii_case(code))
}
