use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::client::ClientConfig;

/// The two Copernicus data stores reached through the Retrieve API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    /// Climate Data Store (ERA5).
    Cds,
    /// Atmosphere Data Store (CAMS).
    Ads,
}

impl Store {
    pub fn label(self) -> &'static str {
        match self {
            Store::Cds => "CDS",
            Store::Ads => "ADS",
        }
    }

    /// Prefix used for keys in `.cdsapirc` (`cds.url`, `ads.key`).
    fn namespace(self) -> &'static str {
        match self {
            Store::Cds => "cds",
            Store::Ads => "ads",
        }
    }

    fn env_prefix(self) -> &'static str {
        match self {
            Store::Cds => "CDSAPI",
            Store::Ads => "ADSAPI",
        }
    }

    pub fn default_url(self) -> &'static str {
        match self {
            Store::Cds => "https://cds.climate.copernicus.eu/api",
            Store::Ads => "https://ads.atmosphere.copernicus.eu/api",
        }
    }

    fn host_marker(self) -> &'static str {
        match self {
            Store::Cds => "cds.",
            Store::Ads => "ads.",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct RcConfig {
    pub(crate) url: Option<String>,
    pub(crate) key: Option<String>,
    pub(crate) verify: Option<bool>,
}

/// Parsed `.cdsapirc`: one section per namespace, `""` for un-prefixed keys.
#[derive(Debug, Default)]
pub(crate) struct RcFile {
    sections: HashMap<String, RcConfig>,
}

impl RcFile {
    /// Settings for `store`: its own namespace first, then the un-prefixed
    /// keys when they are not obviously meant for the other store.
    fn for_store(&self, store: Store) -> Option<&RcConfig> {
        if let Some(cfg) = self.sections.get(store.namespace()) {
            return Some(cfg);
        }
        let plain = self.sections.get("")?;
        let other = match store {
            Store::Cds => Store::Ads,
            Store::Ads => Store::Cds,
        };
        match plain.url.as_deref() {
            Some(url) if url.contains(other.host_marker()) => None,
            Some(_) => Some(plain),
            // No url to judge from: only the CDS owns bare keys.
            None if store == Store::Cds => Some(plain),
            None => None,
        }
    }
}

/// Resolves the configuration of `store` using (in order of precedence)
/// explicit arguments, `<STORE>API_URL`/`<STORE>API_KEY`, then `.cdsapirc`.
pub(crate) fn load_config(
    store: Store,
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let prefix = store.env_prefix();
    let url = url.or_else(|| std::env::var(format!("{prefix}_URL")).ok());
    let key = key.or_else(|| std::env::var(format!("{prefix}_KEY")).ok());
    resolve(store, url, key, verify, &rc_candidates())
}

pub(crate) fn resolve(
    store: Store,
    mut url: Option<String>,
    mut key: Option<String>,
    verify: Option<bool>,
    rc_candidates: &[PathBuf],
) -> Result<ClientConfig> {
    let mut file_verify: Option<bool> = None;

    if url.is_none() || key.is_none() || verify.is_none() {
        for rc_path in rc_candidates {
            if !rc_path.exists() {
                continue;
            }
            let rc = read_rc(rc_path).with_context(|| {
                format!("failed to read configuration file {}", rc_path.display())
            })?;
            if let Some(cfg) = rc.for_store(store) {
                if url.is_none() {
                    url = cfg.url.clone();
                }
                if key.is_none() {
                    key = cfg.key.clone();
                }
                file_verify = cfg.verify;
                break;
            }
        }
    }

    let Some(key) = key else {
        let searched = rc_candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        bail!(
            "Missing {} configuration: key (set {}_KEY or put `{}.key:` in one of: {})",
            store.label(),
            store.env_prefix(),
            store.namespace(),
            if searched.is_empty() { ".cdsapirc" } else { searched.as_str() }
        );
    };

    let url = url.unwrap_or_else(|| store.default_url().to_string());
    let verify = verify.or(file_verify).unwrap_or(true);

    Ok(ClientConfig { url, key, verify })
}

fn read_rc(path: &Path) -> Result<RcFile> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

pub(crate) fn parse_rc(text: &str) -> RcFile {
    let mut rc = RcFile::default();

    // `key:` may be on one line with the token on the next one.
    let mut pending: Option<(String, String)> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((ns, field)) = pending.take() {
            if !line.contains(':') || line.starts_with("http") {
                set_field(&mut rc, &ns, &field, strip_quotes(line));
                continue;
            }
        }

        let Some((k, v)) = line.split_once(':') else {
            continue;
        };
        let (ns, field) = match k.trim().split_once('.') {
            Some((ns, field)) => (ns.trim().to_string(), field.trim().to_string()),
            None => (String::new(), k.trim().to_string()),
        };
        let v = strip_quotes(v.trim());
        if v.is_empty() && field != "verify" {
            pending = Some((ns, field));
        } else {
            set_field(&mut rc, &ns, &field, v);
        }
    }

    rc
}

fn set_field(rc: &mut RcFile, ns: &str, field: &str, value: &str) {
    let cfg = rc.sections.entry(ns.to_string()).or_default();
    match field {
        "url" => cfg.url = Some(value.to_string()),
        "key" => cfg.key = Some(value.to_string()),
        "verify" if !value.is_empty() => cfg.verify = Some(value != "0"),
        other => tracing::debug!("ignoring unknown .cdsapirc key {other}"),
    }
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) CDSAPI_RC (explicit)
    // 2) ./.cdsapirc
    // 3) ~/.cdsapirc
    if let Ok(p) = std::env::var("CDSAPI_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".cdsapirc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".cdsapirc"));
    }
    v
}
