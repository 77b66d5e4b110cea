use std::{fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ConfigError;
use crate::database::StoreRecord;
use crate::validation::validate_store_url;

/// Delivery platform hosting a storefront
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Grab,
    Foodpanda,
    Other,
}

impl Platform {
    pub fn from_host(host: &str) -> Self {
        let host = host.to_ascii_lowercase();
        if host.contains("grab.com") {
            Platform::Grab
        } else if host.contains("foodpanda") {
            Platform::Foodpanda
        } else {
            Platform::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Grab => "grab",
            Platform::Foodpanda => "foodpanda",
            Platform::Other => "other",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "grab" => Ok(Platform::Grab),
            "foodpanda" => Ok(Platform::Foodpanda),
            "other" => Ok(Platform::Other),
            other => Err(other.to_string()),
        }
    }
}

/// A storefront probed every cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedStore {
    pub id: String,
    pub name: String,
    pub url: String,
    pub platform: Platform,
}

impl TrackedStore {
    /// Derive id, display name and platform from a storefront URL
    ///
    /// The id is the last path segment; the name is that segment with dashes
    /// turned into spaces and each word capitalised.
    pub fn from_url(raw: &str) -> Result<Self, ConfigError> {
        validate_store_url(raw).into_result(raw).map_err(ConfigError::Invalid)?;
        let url = Url::parse(raw).map_err(|e| ConfigError::Invalid(format!("{raw}: {e}")))?;

        let slug = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
            .or_else(|| url.host_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            name: display_name(&slug),
            platform: Platform::from_host(url.host_str().unwrap_or_default()),
            id: slug,
            url: raw.to_string(),
        })
    }
}

impl From<&TrackedStore> for StoreRecord {
    fn from(store: &TrackedStore) -> Self {
        Self {
            id: store.id.clone(),
            name: store.name.clone(),
            url: store.url.clone(),
            platform: store.platform,
        }
    }
}

fn display_name(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Debug, Deserialize)]
struct UrlList {
    urls: Vec<String>,
}

/// Load a `{"urls": [...]}` store list
pub fn load_url_list(path: &Path) -> Result<Vec<TrackedStore>, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFailed { path: path.to_path_buf(), source })?;
    parse_url_list(&raw)
        .map_err(|source| ConfigError::StoreListFailed { path: path.to_path_buf(), source })?
        .iter()
        .map(|url| TrackedStore::from_url(url))
        .collect()
}

fn parse_url_list(raw: &str) -> Result<Vec<String>, serde_json::Error> {
    let list: UrlList = serde_json::from_str(raw)?;
    Ok(list.urls.into_iter().map(|url| url.trim().to_string()).filter(|url| !url.is_empty()).collect())
}
