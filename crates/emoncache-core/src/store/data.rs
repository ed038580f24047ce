use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Dashboard, DataPoint, DateRange};
use crate::refresh::RefreshKind;

/// Current on-disk schema version. Bump whenever `StoreData` changes shape;
/// stores written with any other version are discarded on open.
pub const SCHEMA_VERSION: u32 = 2;

/// Feed id to its cached samples, sorted by time.
pub type PageSeries = BTreeMap<String, Vec<DataPoint>>;

/// Everything cached for one account.
///
/// Series are kept per page: two pages charting the same feed over different
/// ranges each own their copy, so one page's merge policy never touches
/// points another page is showing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    pub schema_version: u32,
    pub account_id: Uuid,
    #[serde(default)]
    pub pages: BTreeMap<String, PageSeries>,
    #[serde(default)]
    pub dashboards: Vec<Dashboard>,
    #[serde(default)]
    pub updated_at: BTreeMap<String, DateTime<Utc>>,
}

/// Just enough of a store file to read its version, whatever its shape.
#[derive(Debug, Deserialize)]
pub(crate) struct VersionProbe {
    #[serde(default)]
    pub schema_version: u32,
}

impl StoreData {
    pub fn empty(account_id: Uuid, schema_version: u32) -> Self {
        Self {
            schema_version,
            account_id,
            pages: BTreeMap::new(),
            dashboards: Vec::new(),
            updated_at: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.dashboards.is_empty() && self.updated_at.is_empty()
    }

    /// Cached samples of `feed_id` as loaded for page `page`.
    pub fn series(&self, page: &str, feed_id: &str) -> &[DataPoint] {
        self.pages
            .get(page)
            .and_then(|feeds| feeds.get(feed_id))
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    /// Fold fetched points into page `page`'s cached series for `feed_id`.
    ///
    /// - `Initial` replaces the series with `points`
    /// - `Update` merges by timestamp, the incoming value wins on collision
    /// - `DateRangeChange` drops cached points outside `range`, then merges
    pub fn apply_series(
        &mut self,
        page: &str,
        feed_id: &str,
        points: Vec<DataPoint>,
        kind: RefreshKind,
        range: &DateRange,
    ) {
        let feeds = self.pages.entry(page.to_string()).or_default();
        let existing = feeds.remove(feed_id).unwrap_or_default();
        let kept: Vec<DataPoint> = match kind {
            RefreshKind::Initial => Vec::new(),
            RefreshKind::Update => existing,
            RefreshKind::DateRangeChange => existing
                .into_iter()
                .filter(|p| range.contains(p.time))
                .collect(),
        };

        let mut by_time: BTreeMap<DateTime<Utc>, f64> =
            kept.into_iter().map(|p| (p.time, p.value)).collect();
        for point in points {
            by_time.insert(point.time, point.value);
        }

        let merged = by_time
            .into_iter()
            .map(|(time, value)| DataPoint::new(time, value))
            .collect();
        feeds.insert(feed_id.to_string(), merged);
    }

    pub fn replace_dashboards(&mut self, dashboards: Vec<Dashboard>) {
        self.dashboards = dashboards;
    }

    pub fn mark_updated(&mut self, key: &str, at: DateTime<Utc>) {
        self.updated_at.insert(key.to_string(), at);
    }

    pub fn last_updated(&self, key: &str) -> Option<DateTime<Utc>> {
        self.updated_at.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn pt(secs: i64, value: f64) -> DataPoint {
        DataPoint::new(at(secs), value)
    }

    fn range(start: i64, end: i64) -> DateRange {
        DateRange::new(at(start), at(end)).unwrap()
    }

    fn pairs(points: &[DataPoint]) -> Vec<(i64, f64)> {
        points.iter().map(|p| (p.time.timestamp(), p.value)).collect()
    }

    #[test]
    fn test_update_merges_last_write_wins() {
        let mut data = StoreData::empty(Uuid::new_v4(), SCHEMA_VERSION);
        let r = range(0, 100);
        data.apply_series("power", "use", vec![pt(10, 1.0), pt(20, 2.0)], RefreshKind::Initial, &r);
        data.apply_series("power", "use", vec![pt(20, 9.0), pt(30, 3.0)], RefreshKind::Update, &r);
        assert_eq!(
            pairs(data.series("power", "use")),
            vec![(10, 1.0), (20, 9.0), (30, 3.0)]
        );
    }

    #[test]
    fn test_initial_replaces_existing_series() {
        let mut data = StoreData::empty(Uuid::new_v4(), SCHEMA_VERSION);
        let r = range(0, 100);
        data.apply_series("power", "use", vec![pt(10, 1.0)], RefreshKind::Initial, &r);
        data.apply_series("power", "use", vec![pt(40, 4.0)], RefreshKind::Initial, &r);
        assert_eq!(pairs(data.series("power", "use")), vec![(40, 4.0)]);
    }

    #[test]
    fn test_date_range_change_discards_points_outside_new_range() {
        let mut data = StoreData::empty(Uuid::new_v4(), SCHEMA_VERSION);
        data.apply_series(
            "power",
            "use",
            vec![pt(10, 1.0), pt(60, 6.0)],
            RefreshKind::Initial,
            &range(0, 100),
        );
        data.apply_series(
            "power",
            "use",
            vec![pt(120, 12.0)],
            RefreshKind::DateRangeChange,
            &range(50, 150),
        );
        assert_eq!(pairs(data.series("power", "use")), vec![(60, 6.0), (120, 12.0)]);
    }

    #[test]
    fn test_series_for_unknown_feed_is_empty() {
        let data = StoreData::empty(Uuid::new_v4(), SCHEMA_VERSION);
        assert!(data.series("power", "missing").is_empty());
        assert!(data.is_empty());
    }

    #[test]
    fn test_feeds_are_independent() {
        let mut data = StoreData::empty(Uuid::new_v4(), SCHEMA_VERSION);
        let r = range(0, 100);
        data.apply_series("power", "use", vec![pt(10, 1.0)], RefreshKind::Initial, &r);
        data.apply_series("power", "solar", vec![pt(10, 5.0)], RefreshKind::Initial, &r);
        data.apply_series("power", "use", vec![pt(20, 2.0)], RefreshKind::Initial, &r);
        assert_eq!(pairs(data.series("power", "solar")), vec![(10, 5.0)]);
    }

    #[test]
    fn test_pages_sharing_a_feed_keep_their_own_series() {
        let mut data = StoreData::empty(Uuid::new_v4(), SCHEMA_VERSION);
        let r = range(0, 1000);
        data.apply_series("b:power", "1", vec![pt(10, 1.0), pt(500, 5.0)], RefreshKind::Initial, &r);
        data.apply_series("a:power", "1", vec![pt(20, 2.0)], RefreshKind::Initial, &r);
        data.apply_series("a:power", "1", vec![pt(600, 6.0)], RefreshKind::DateRangeChange, &range(550, 650));

        assert_eq!(pairs(data.series("a:power", "1")), vec![(600, 6.0)]);
        assert_eq!(pairs(data.series("b:power", "1")), vec![(10, 1.0), (500, 5.0)]);
    }
}
