//! Emoncms "apps": fixed dashboards built from a handful of feeds.
//!
//! Each `AppCategory` has a static list of feed fields the user maps to
//! feeds of their instance, and a static page layout built from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::page::PageId;
use crate::refresh::PageSource;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("{0}")]
    Generic(String),

    #[error("App is not configured")]
    NotConfigured,

    #[error("Initial load failed")]
    InitialFailed,

    #[error("Update failed")]
    UpdateFailed,
}

/// One feed an app needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppConfigField {
    pub id: &'static str,
    pub name: &'static str,
    pub optional: bool,
    /// Feed name to pre-select when an instance has a feed by that name.
    pub default_name: &'static str,
}

const fn field(id: &'static str, name: &'static str, default_name: &'static str) -> AppConfigField {
    AppConfigField {
        id,
        name,
        optional: false,
        default_name,
    }
}

const MY_ELECTRIC_FIELDS: &[AppConfigField] = &[
    field("use", "Power Feed", "use"),
    field("kwh", "kWh Feed", "use_kwh"),
];

const MY_SOLAR_FIELDS: &[AppConfigField] = &[
    field("use", "Power Feed", "use"),
    field("useKwh", "Power kWh Feed", "use_kwh"),
    field("solar", "Solar Feed", "solar"),
    field("solarKwh", "Solar kWh Feed", "solar_kwh"),
];

const MY_SOLAR_DIVERT_FIELDS: &[AppConfigField] = &[
    field("use", "Power Feed", "use"),
    field("useKwh", "Power kWh Feed", "use_kwh"),
    field("solar", "Solar Feed", "solar"),
    field("solarKwh", "Solar kWh Feed", "solar_kwh"),
    field("divert", "Divert Feed", "divert"),
    field("divertKwh", "Divert kWh Feed", "divert_kwh"),
];

/// One page of an app and the fields it charts.
#[derive(Debug)]
struct PageLayout {
    suffix: &'static str,
    fields: &'static [&'static str],
}

const MY_ELECTRIC_PAGES: &[PageLayout] = &[
    PageLayout { suffix: "power", fields: &["use"] },
    PageLayout { suffix: "usage", fields: &["kwh"] },
];

const MY_SOLAR_PAGES: &[PageLayout] = &[
    PageLayout { suffix: "power", fields: &["use", "solar"] },
    PageLayout { suffix: "usage", fields: &["useKwh", "solarKwh"] },
];

const MY_SOLAR_DIVERT_PAGES: &[PageLayout] = &[
    PageLayout { suffix: "power", fields: &["use", "solar", "divert"] },
    PageLayout { suffix: "usage", fields: &["useKwh", "solarKwh", "divertKwh"] },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppCategory {
    MyElectric,
    MySolar,
    MySolarDivert,
}

impl AppCategory {
    pub const ALL: [AppCategory; 3] = [
        AppCategory::MyElectric,
        AppCategory::MySolar,
        AppCategory::MySolarDivert,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            AppCategory::MyElectric => "MyElectric",
            AppCategory::MySolar => "MySolar",
            AppCategory::MySolarDivert => "MySolarDivert",
        }
    }

    pub fn feed_config_fields(&self) -> &'static [AppConfigField] {
        match self {
            AppCategory::MyElectric => MY_ELECTRIC_FIELDS,
            AppCategory::MySolar => MY_SOLAR_FIELDS,
            AppCategory::MySolarDivert => MY_SOLAR_DIVERT_FIELDS,
        }
    }

    /// Pages of the app in display order.
    fn page_layout(&self) -> &'static [PageLayout] {
        match self {
            AppCategory::MyElectric => MY_ELECTRIC_PAGES,
            AppCategory::MySolar => MY_SOLAR_PAGES,
            AppCategory::MySolarDivert => MY_SOLAR_DIVERT_PAGES,
        }
    }

    /// Parse a display name or its lowercase form.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.display_name().eq_ignore_ascii_case(name))
    }
}

/// A configured app: a category plus the feed chosen for each field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub id: String,
    pub name: String,
    pub category: AppCategory,
    /// Field id to feed id.
    #[serde(default)]
    pub feeds: BTreeMap<String, String>,
}

impl AppConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: AppCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            feeds: BTreeMap::new(),
        }
    }

    pub fn with_feed(mut self, field_id: &str, feed_id: impl Into<String>) -> Self {
        self.feeds.insert(field_id.to_string(), feed_id.into());
        self
    }

    /// Every required field must map to a feed.
    pub fn validate(&self) -> Result<(), AppError> {
        let missing = self
            .category
            .feed_config_fields()
            .iter()
            .any(|f| !f.optional && !self.feeds.contains_key(f.id));
        if missing {
            return Err(AppError::NotConfigured);
        }
        Ok(())
    }

    /// The app's pages, with ids unique per app, in display order.
    pub fn page_sources(&self) -> Result<Vec<(PageId, PageSource)>, AppError> {
        self.validate()?;
        let pages = self
            .category
            .page_layout()
            .iter()
            .map(|layout| {
                let feeds = layout
                    .fields
                    .iter()
                    .filter_map(|f| self.feeds.get(*f).cloned())
                    .collect();
                (
                    PageId::new(format!("{}:{}", self.id, layout.suffix)),
                    PageSource::Feeds(feeds),
                )
            })
            .collect();
        Ok(pages)
    }
}
