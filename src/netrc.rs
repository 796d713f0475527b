//! Minimal `.netrc` reader for Earthdata credentials.

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
    /// Optional `account` token, sometimes used to carry a URL.
    pub account: Option<String>,
}

#[derive(Debug, Default)]
struct Entry {
    machine: Option<String>,
    login: Option<String>,
    password: Option<String>,
    account: Option<String>,
}

impl Entry {
    fn into_credentials(self) -> Option<Credentials> {
        Some(Credentials {
            login: self.login?,
            password: self.password?,
            account: self.account,
        })
    }
}

/// Location of the netrc file: `NETRC` or `~/.netrc`.
pub fn default_path() -> Option<PathBuf> {
    std::env::var_os("NETRC")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".netrc")))
}

/// Credentials for `host` from the default netrc file.
pub fn credentials_for(host: &str) -> Result<Credentials> {
    let path = default_path().ok_or_else(|| anyhow!("cannot locate a home directory for .netrc"))?;
    read_credentials(&path, host)
}

pub fn read_credentials(path: &Path, host: &str) -> Result<Credentials> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    lookup(&text, host).ok_or_else(|| {
        anyhow!(
            "please provide entry \"{host}\" in {}; example: machine {host} login <login> password <passwd>",
            path.display()
        )
    })
}

/// First `machine host` entry with login and password, else the `default` entry.
pub(crate) fn lookup(text: &str, host: &str) -> Option<Credentials> {
    let mut default: Option<Entry> = None;
    let mut current: Option<Entry> = None;
    let mut is_default = false;
    let mut tokens = text.split_whitespace();

    let finish = |entry: Option<Entry>, is_default: bool, default: &mut Option<Entry>| -> Option<Credentials> {
        let entry = entry?;
        if is_default {
            *default = Some(entry);
            None
        } else if entry.machine.as_deref() == Some(host) {
            entry.into_credentials()
        } else {
            None
        }
    };

    while let Some(tok) = tokens.next() {
        match tok {
            "machine" => {
                if let Some(c) = finish(current.take(), is_default, &mut default) {
                    return Some(c);
                }
                is_default = false;
                current = Some(Entry {
                    machine: tokens.next().map(str::to_string),
                    ..Entry::default()
                });
            }
            "default" => {
                if let Some(c) = finish(current.take(), is_default, &mut default) {
                    return Some(c);
                }
                is_default = true;
                current = Some(Entry::default());
            }
            "login" | "password" | "account" => {
                let value = tokens.next().map(str::to_string);
                if let Some(entry) = current.as_mut() {
                    match tok {
                        "login" => entry.login = value,
                        "password" => entry.password = value,
                        _ => entry.account = value,
                    }
                }
            }
            "macdef" => {
                // Only the macro name is skipped.
                tokens.next();
            }
            _ => {}
        }
    }

    finish(current.take(), is_default, &mut default)
        .or_else(|| default.and_then(Entry::into_credentials))
}
