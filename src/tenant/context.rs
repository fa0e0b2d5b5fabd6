use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MAX_SLUG_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid tenant slug '{0}': use 1-64 ASCII letters, digits, '-' or '_'")]
pub struct InvalidSlug(pub String);

/// URL-safe tenant identifier. Also names the tenant's database file, so
/// anything that could escape the data directory is rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantSlug(String);

impl TenantSlug {
    pub fn parse(raw: &str) -> Result<Self, InvalidSlug> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SLUG_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidSlug(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantSlug {
    type Error = InvalidSlug;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantSlug> for String {
    fn from(slug: TenantSlug) -> Self {
        slug.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantContext {
    slug: Option<TenantSlug>,
}

impl TenantContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_tenant(slug: TenantSlug) -> Self {
        Self { slug: Some(slug) }
    }

    pub fn set(&mut self, slug: TenantSlug) {
        self.slug = Some(slug);
    }

    pub fn get(&self) -> Option<&TenantSlug> {
        self.slug.as_ref()
    }

    pub fn clear(&mut self) {
        self.slug = None;
    }
}
