//! Task catalog: the fixed set of files a run transfers
//!
//! Generation is pure and deterministic. Tasks come out category first (in
//! configured order), then by year, then by month. Order only affects progress
//! output; both phases run tasks through an unordered pool.

use crate::config::{CatalogConfig, DestinationConfig, KeyLayout};
use crate::types::{FileTask, Period};
use std::collections::BTreeSet;

/// Staged file name for a category and month
///
/// ```
/// use tripdata_sync::catalog::file_name;
/// use tripdata_sync::types::Period;
///
/// assert_eq!(file_name("yellow", Period::new(2019, 1)), "yellow_tripdata_2019-01.csv.gz");
/// ```
pub fn file_name(category: &str, period: Period) -> String {
    format!(
        "{}_tripdata_{}-{:02}.csv.gz",
        category, period.year, period.month
    )
}

/// Destination key for a staged file
pub fn remote_key(prefix: &str, layout: KeyLayout, category: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let relative = match layout {
        KeyLayout::ByCategory => format!("{}/{}", category, file_name),
        KeyLayout::Flat => file_name.to_string(),
    };
    if prefix.is_empty() {
        relative
    } else {
        format!("{}/{}", prefix, relative)
    }
}

/// Build the ordered task list
///
/// Years and months are de-duplicated and sorted. The catalog is expected to
/// have passed [`Config::validate`](crate::config::Config::validate); an empty
/// parameter set yields an empty list.
pub fn generate(catalog: &CatalogConfig, destination: &DestinationConfig) -> Vec<FileTask> {
    let years: BTreeSet<i32> = catalog.years.iter().copied().collect();
    let months: BTreeSet<u32> = catalog
        .months
        .iter()
        .copied()
        .filter(|m| (1..=12).contains(m))
        .collect();

    let mut tasks = Vec::with_capacity(catalog.datasets.len() * years.len() * months.len());
    for dataset in &catalog.datasets {
        for &year in &years {
            for &month in &months {
                let period = Period::new(year, month);
                let file_name = file_name(&dataset.category, period);
                tasks.push(FileTask {
                    category: dataset.category.clone(),
                    period,
                    remote_url: format!(
                        "{}/{}/{}",
                        dataset.base_url(),
                        dataset.category,
                        file_name
                    ),
                    remote_key: remote_key(
                        &destination.prefix,
                        destination.key_layout,
                        &dataset.category,
                        &file_name,
                    ),
                    file_name,
                });
            }
        }
    }
    tasks
}
