use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_HEADER_SCAN_ROWS: usize = 20;
pub const DEFAULT_MAIN_STORE_SHEET: &str = "RAW DATA";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub header_scan_rows: usize,
    pub global: GlobalSettings,
    pub main_store: MainStoreSettings,
    pub pending: PendingSettings,
    pub catalog: CatalogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            header_scan_rows: DEFAULT_HEADER_SCAN_ROWS,
            global: GlobalSettings::default(),
            main_store: MainStoreSettings::default(),
            pending: PendingSettings::default(),
            catalog: CatalogSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Locations left out of the global total, e.g. "Intransit Store".
    pub excluded_locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MainStoreSettings {
    pub sheet_name: String,
    pub store_name: Option<String>,
}

impl Default for MainStoreSettings {
    fn default() -> Self {
        MainStoreSettings {
            sheet_name: DEFAULT_MAIN_STORE_SHEET.to_string(),
            store_name: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PendingSettings {
    pub store_name: Option<String>,
    /// Only orders created within this many days of the run date count as pending.
    pub window_days: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub sheet_name: Option<String>,
}

impl Settings {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Settings::default());
        }
        let settings: Settings =
            serde_yml::from_str(text).context("Failed to parse settings YAML")?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file '{}'", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("Invalid settings file '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let settings = Settings::from_yaml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.main_store.sheet_name, "RAW DATA");
        assert_eq!(settings.header_scan_rows, 20);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = "\
main_store:
  store_name: Main Medical Store (MMS)-SEPL
pending:
  window_days: 90
global:
  excluded_locations:
    - Intransit Store
";
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.main_store.sheet_name, "RAW DATA");
        assert_eq!(
            settings.main_store.store_name.as_deref(),
            Some("Main Medical Store (MMS)-SEPL")
        );
        assert_eq!(settings.pending.window_days, Some(90));
        assert_eq!(settings.pending.store_name, None);
        assert_eq!(settings.global.excluded_locations, vec!["Intransit Store"]);
        assert_eq!(settings.catalog.sheet_name, None);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(Settings::from_yaml("header_scan_rows: [1, 2").is_err());
    }
}
