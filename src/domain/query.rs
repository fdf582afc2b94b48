//! Device-selection query
//!
//! Every field is optional. Unset fields are left out of the request sent to
//! the platform entirely: an explicitly present empty filter list means
//! something different to the chooser than an absent one.

use crate::domain::error::Result;
use crate::domain::identifier::{CanonicalId, GattId};
use serde::{Deserialize, Serialize};

/// Query handed to the device chooser, as written by the application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDeviceQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_all_devices: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<DeviceFilter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_services: Option<Vec<GattId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<GattId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
}

impl RequestDeviceQuery {
    /// Let the chooser offer every nearby device
    pub fn accept_all() -> Self {
        Self {
            accept_all_devices: Some(true),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: DeviceFilter) -> Self {
        self.filters.get_or_insert_with(Vec::new).push(filter);
        self
    }

    pub fn with_optional_service(mut self, service: impl Into<GattId>) -> Self {
        self.optional_services
            .get_or_insert_with(Vec::new)
            .push(service.into());
        self
    }

    /// Normalize every identifier in the query
    pub fn to_platform(&self) -> Result<PlatformQuery> {
        Ok(PlatformQuery {
            accept_all_devices: self.accept_all_devices,
            filters: self
                .filters
                .as_ref()
                .map(|filters| {
                    filters
                        .iter()
                        .map(DeviceFilter::to_platform)
                        .collect::<Result<Vec<_>>>()
                })
                .transpose()?,
            optional_services: normalize_all(self.optional_services.as_deref())?,
        })
    }

    /// The JSON object the platform chooser receives
    pub fn to_platform_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.to_platform()?)?)
    }
}

impl DeviceFilter {
    pub fn name_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_service(mut self, service: impl Into<GattId>) -> Self {
        self.services
            .get_or_insert_with(Vec::new)
            .push(service.into());
        self
    }

    fn to_platform(&self) -> Result<PlatformFilter> {
        Ok(PlatformFilter {
            services: normalize_all(self.services.as_deref())?,
            name: self.name.clone(),
            name_prefix: self.name_prefix.clone(),
        })
    }
}

fn normalize_all(ids: Option<&[GattId]>) -> Result<Option<Vec<CanonicalId>>> {
    ids.map(|ids| ids.iter().map(GattId::normalize).collect::<Result<Vec<_>>>())
        .transpose()
}

/// Query with canonical identifiers, in the shape sent to the platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_all_devices: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<PlatformFilter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_services: Option<Vec<CanonicalId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<CanonicalId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
}

impl PlatformQuery {
    /// Whether an advertiser with this name and these services satisfies the query
    ///
    /// Used by backends that implement the chooser themselves.
    pub fn matches(&self, name: Option<&str>, services: &[CanonicalId]) -> bool {
        if self.accept_all_devices == Some(true) {
            return true;
        }
        self.filters
            .iter()
            .flatten()
            .any(|filter| filter.matches(name, services))
    }
}

impl PlatformFilter {
    fn matches(&self, name: Option<&str>, services: &[CanonicalId]) -> bool {
        if let Some(expected) = &self.name {
            if name != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.name_prefix {
            if !name.is_some_and(|n| n.starts_with(prefix.as_str())) {
                return false;
            }
        }
        self.services
            .iter()
            .flatten()
            .all(|wanted| services.contains(wanted))
    }
}
