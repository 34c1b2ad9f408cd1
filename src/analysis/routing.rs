//! Routing configuration model, loaded from TOML and validated up front
//!
//! ```toml
//! [[endpoints]]
//! id = "us-east"
//! max_qps = 90000
//!
//! [[configs]]
//! id = "72245759413"
//! name = "US mobile apps"
//! endpoint = "us-east"
//! qps_limit = 50000
//! geos = ["US"]
//! excluded_geos = []
//! platforms = ["Phone", "Tablet"]
//! environments = ["App"]
//! sizes = []          # empty = accept every size
//! state = "active"
//! ```
//!
//! Nothing in this crate writes routing configuration back; it is input only.

use super::geo::canonical_country;
use super::sizes::{canonical_label, CreativeSize};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// INCLUDE-only size filter. There is no exclude operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeFilter {
    /// Accepts every size
    Unset,
    /// Accepts exactly the listed sizes (never empty)
    Include(BTreeSet<String>),
}

impl SizeFilter {
    /// Empty input means `Unset`. Entries must be well-formed `WxH`.
    pub fn from_list<S: AsRef<str>>(sizes: &[S]) -> std::result::Result<Self, String> {
        let mut set = BTreeSet::new();
        for raw in sizes {
            let raw = raw.as_ref();
            let size = CreativeSize::parse(raw).ok_or_else(|| format!("malformed size '{}'", raw))?;
            set.insert(size.to_string());
        }
        Ok(if set.is_empty() {
            SizeFilter::Unset
        } else {
            SizeFilter::Include(set)
        })
    }

    pub fn accepts(&self, size: &str) -> bool {
        match self {
            SizeFilter::Unset => true,
            SizeFilter::Include(set) => set.contains(&canonical_label(size)),
        }
    }

    /// Filter after adding one size. From `Unset` this narrows to that size.
    pub fn with_added(&self, size: &str) -> Self {
        let mut set = match self {
            SizeFilter::Unset => BTreeSet::new(),
            SizeFilter::Include(set) => set.clone(),
        };
        set.insert(canonical_label(size));
        SizeFilter::Include(set)
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, SizeFilter::Unset)
    }

    pub fn sizes(&self) -> Vec<String> {
        match self {
            SizeFilter::Unset => Vec::new(),
            SizeFilter::Include(set) => set.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigState {
    Active,
    Suspended,
}

impl ConfigState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigState::Active => "active",
            ConfigState::Suspended => "suspended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub id: String,
    pub max_qps: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingConfig {
    pub id: String,
    pub name: String,
    /// Uppercase country codes; empty = all
    pub geos: BTreeSet<String>,
    pub excluded_geos: BTreeSet<String>,
    /// Lowercase; empty = all
    pub platforms: BTreeSet<String>,
    /// Lowercase; empty = all
    pub environments: BTreeSet<String>,
    pub sizes: SizeFilter,
    pub qps_limit: u64,
    pub endpoint_id: String,
    pub state: ConfigState,
}

impl RoutingConfig {
    pub fn is_active(&self) -> bool {
        self.state == ConfigState::Active
    }

    /// Every non-size dimension holds. Excluded geos always reject.
    pub fn matches_dimensions(&self, country: &str, platform: &str, environment: &str) -> bool {
        let country = canonical_country(country);
        if self.excluded_geos.contains(&country) {
            return false;
        }
        set_accepts(&self.geos, &country)
            && set_accepts(&self.platforms, &platform.to_lowercase())
            && set_accepts(&self.environments, &environment.to_lowercase())
    }

    /// Full predicate: AND across dimensions, OR within each dimension's set.
    pub fn matches(&self, country: &str, platform: &str, environment: &str, size: &str) -> bool {
        self.matches_dimensions(country, platform, environment) && self.sizes.accepts(size)
    }
}

fn set_accepts(set: &BTreeSet<String>, value: &str) -> bool {
    set.is_empty() || set.contains(value)
}

#[derive(Debug, Deserialize)]
struct RoutingFile {
    #[serde(default)]
    endpoints: Vec<RawEndpoint>,
    #[serde(default)]
    configs: Vec<RawConfig>,
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    id: String,
    max_qps: u64,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    id: String,
    #[serde(default)]
    name: Option<String>,
    endpoint: String,
    qps_limit: u64,
    #[serde(default)]
    geos: Vec<String>,
    #[serde(default)]
    excluded_geos: Vec<String>,
    #[serde(default)]
    platforms: Vec<String>,
    #[serde(default)]
    environments: Vec<String>,
    #[serde(default)]
    sizes: Vec<String>,
    #[serde(default = "default_state")]
    state: ConfigState,
}

fn default_state() -> ConfigState {
    ConfigState::Active
}

/// Validated endpoints and configs.
#[derive(Debug, Clone, Default)]
pub struct RoutingSet {
    endpoints: BTreeMap<String, Endpoint>,
    configs: BTreeMap<String, RoutingConfig>,
}

impl RoutingSet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let set = Self::from_toml(&text)?;
        log::info!(
            "🧭 Loaded {} routing configs across {} endpoints from {}",
            set.configs.len(),
            set.endpoints.len(),
            path.as_ref().display()
        );
        Ok(set)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let file: RoutingFile = toml::from_str(text)?;

        let endpoints = file
            .endpoints
            .into_iter()
            .map(|e| Endpoint {
                id: e.id.trim().to_string(),
                max_qps: e.max_qps,
            })
            .collect();

        let configs = file
            .configs
            .into_iter()
            .map(build_config)
            .collect::<Result<Vec<_>>>()?;

        Self::new(endpoints, configs)
    }

    /// Fails fast on the first structural problem.
    pub fn new(endpoints: Vec<Endpoint>, configs: Vec<RoutingConfig>) -> Result<Self> {
        let mut endpoint_map = BTreeMap::new();
        for endpoint in endpoints {
            if endpoint.id.is_empty() {
                return Err(EngineError::invalid_config("<endpoint>", "blank endpoint id"));
            }
            if endpoint.max_qps == 0 {
                return Err(EngineError::invalid_config(&endpoint.id, "endpoint max_qps must be positive"));
            }
            if endpoint_map.contains_key(&endpoint.id) {
                return Err(EngineError::invalid_config(&endpoint.id, "duplicate endpoint id"));
            }
            endpoint_map.insert(endpoint.id.clone(), endpoint);
        }

        let mut config_map = BTreeMap::new();
        for config in configs {
            if config.id.is_empty() {
                return Err(EngineError::invalid_config("<config>", "blank config id"));
            }
            if config_map.contains_key(&config.id) {
                return Err(EngineError::invalid_config(&config.id, "duplicate config id"));
            }
            if !endpoint_map.contains_key(&config.endpoint_id) {
                return Err(EngineError::invalid_config(
                    &config.id,
                    format!("unknown endpoint '{}'", config.endpoint_id),
                ));
            }
            if let Some(geo) = config.geos.intersection(&config.excluded_geos).next() {
                return Err(EngineError::invalid_config(
                    &config.id,
                    format!("geo '{}' is both included and excluded", geo),
                ));
            }
            config_map.insert(config.id.clone(), config);
        }

        Ok(Self {
            endpoints: endpoint_map,
            configs: config_map,
        })
    }

    pub fn config(&self, id: &str) -> Option<&RoutingConfig> {
        self.configs.get(id)
    }

    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.get(id)
    }

    pub fn configs(&self) -> impl Iterator<Item = &RoutingConfig> {
        self.configs.values()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    pub fn configs_for_endpoint<'a>(&'a self, endpoint_id: &'a str) -> impl Iterator<Item = &'a RoutingConfig> {
        self.configs.values().filter(move |c| c.endpoint_id == endpoint_id)
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty() && self.endpoints.is_empty()
    }
}

fn canonical_geos(geos: BTreeSet<String>) -> BTreeSet<String> {
    geos.iter().map(|g| canonical_country(g)).collect()
}

fn build_config(raw: RawConfig) -> Result<RoutingConfig> {
    let id = raw.id.trim().to_string();
    let clean = |field: &str, values: Vec<String>, upper: bool| -> Result<BTreeSet<String>> {
        values
            .into_iter()
            .map(|v| {
                let v = v.trim();
                if v.is_empty() {
                    Err(EngineError::invalid_config(&id, format!("blank entry in {}", field)))
                } else if upper {
                    Ok(v.to_uppercase())
                } else {
                    Ok(v.to_lowercase())
                }
            })
            .collect()
    };

    let geos = canonical_geos(clean("geos", raw.geos, true)?);
    let excluded_geos = canonical_geos(clean("excluded_geos", raw.excluded_geos, true)?);
    let platforms = clean("platforms", raw.platforms, false)?;
    let environments = clean("environments", raw.environments, false)?;
    let sizes = SizeFilter::from_list(&raw.sizes).map_err(|reason| EngineError::invalid_config(&id, reason))?;

    Ok(RoutingConfig {
        name: raw.name.unwrap_or_else(|| id.clone()),
        id,
        geos,
        excluded_geos,
        platforms,
        environments,
        sizes,
        qps_limit: raw.qps_limit,
        endpoint_id: raw.endpoint.trim().to_string(),
        state: raw.state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[endpoints]]
        id = "us-east"
        max_qps = 90000

        [[configs]]
        id = "cfg-a"
        name = "US phones"
        endpoint = "us-east"
        qps_limit = 50000
        geos = ["us", "CA"]
        platforms = ["Phone"]

        [[configs]]
        id = "cfg-b"
        endpoint = "us-east"
        qps_limit = 50000
        excluded_geos = ["RU"]
        sizes = ["300x250", "320 x 50"]
        state = "suspended"
    "#;

    #[test]
    fn test_load_sample() {
        let set = RoutingSet::from_toml(SAMPLE).unwrap();
        let a = set.config("cfg-a").unwrap();
        assert_eq!(a.name, "US phones");
        assert!(a.geos.contains("US"));
        assert!(a.sizes.is_unset());
        assert!(a.is_active());

        let b = set.config("cfg-b").unwrap();
        assert_eq!(b.name, "cfg-b");
        assert_eq!(b.sizes.sizes(), vec!["300x250", "320x50"]);
        assert_eq!(b.state, ConfigState::Suspended);
        assert_eq!(set.configs_for_endpoint("us-east").count(), 2);
    }

    #[test]
    fn test_predicate() {
        let set = RoutingSet::from_toml(SAMPLE).unwrap();
        let a = set.config("cfg-a").unwrap();
        assert!(a.matches("US", "phone", "App", "728x90"));
        assert!(a.matches("ca", "Phone", "Web", "300x250"));
        assert!(!a.matches("DE", "Phone", "App", "300x250"));
        assert!(!a.matches("US", "Tablet", "App", "300x250"));

        let b = set.config("cfg-b").unwrap();
        assert!(b.matches("DE", "Desktop", "Web", "300x250"));
        assert!(!b.matches("DE", "Desktop", "Web", "728x90"));
        assert!(!b.matches("RU", "Desktop", "Web", "300x250"));
    }

    #[test]
    fn test_geo_names_match_codes() {
        let toml = r#"
            [[endpoints]]
            id = "e"
            max_qps = 10
            [[configs]]
            id = "c"
            endpoint = "e"
            qps_limit = 1
            geos = ["United States"]
            excluded_geos = ["russia"]
        "#;
        let set = RoutingSet::from_toml(toml).unwrap();
        let c = set.config("c").unwrap();
        assert!(c.geos.contains("US"));
        assert!(c.matches("US", "Phone", "App", "300x250"));
        assert!(c.matches("united states", "Phone", "App", "300x250"));
        assert!(!c.matches("RU", "Phone", "App", "300x250"));
    }

    #[test]
    fn test_size_filter_include_only() {
        let observed = ["300x250", "320x50", "728x90", "360x300"];
        let unset = SizeFilter::Unset;
        assert!(observed.iter().all(|s| unset.accepts(s)));

        let one = unset.with_added("728x90");
        let accepted: Vec<_> = observed.iter().filter(|s| one.accepts(s)).collect();
        assert_eq!(accepted, vec![&"728x90"]);

        let two = one.with_added("300x250");
        for size in observed {
            // growing the list never rejects something it accepted before
            assert!(!one.accepts(size) || two.accepts(size));
        }
        assert_eq!(observed.iter().filter(|s| two.accepts(s)).count(), 2);
    }

    #[test]
    fn test_invalid_configs_fail_fast() {
        let conflicting = r#"
            [[endpoints]]
            id = "e"
            max_qps = 10
            [[configs]]
            id = "c"
            endpoint = "e"
            qps_limit = 1
            geos = ["US"]
            excluded_geos = ["us"]
        "#;
        assert!(matches!(
            RoutingSet::from_toml(conflicting),
            Err(EngineError::InvalidConfig { config_id, .. }) if config_id == "c"
        ));

        let unknown_endpoint = r#"
            [[configs]]
            id = "c"
            endpoint = "missing"
            qps_limit = 1
        "#;
        assert!(matches!(
            RoutingSet::from_toml(unknown_endpoint),
            Err(EngineError::InvalidConfig { .. })
        ));

        let bad_size = r#"
            [[endpoints]]
            id = "e"
            max_qps = 10
            [[configs]]
            id = "c"
            endpoint = "e"
            qps_limit = 1
            sizes = ["banner"]
        "#;
        assert!(RoutingSet::from_toml(bad_size).is_err());

        let duplicate = r#"
            [[endpoints]]
            id = "e"
            max_qps = 10
            [[endpoints]]
            id = "e"
            max_qps = 20
        "#;
        assert!(RoutingSet::from_toml(duplicate).is_err());

        assert!(matches!(
            RoutingSet::from_toml("[[endpoints]]\nid = \"e\"\nmax_qps = 0\n"),
            Err(EngineError::InvalidConfig { .. })
        ));
    }
}
