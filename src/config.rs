// cteractl - CLI for CTERA Portal and Edge Filer administration
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    pub portal: Option<PortalConfig>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub verify_tls: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    User,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate a writable config directory for the current user")]
    MissingConfigDir,
    #[error(
        "Portal address/username/password are required; set them with `cteractl configure ...` or pass --address/--username/--password"
    )]
    MissingPortalFields,
}

#[derive(Debug)]
pub struct PortalEffectiveConfig {
    pub address: String,
    pub username: String,
    pub password: String,
    pub verify_tls: bool,
}

pub fn config_path(scope: Scope, cwd: &Path) -> Result<PathBuf> {
    match scope {
        Scope::Local => Ok(cwd.join(".cteractl.yaml")),
        Scope::User => {
            if let Ok(custom) = env::var("CTERACTL_CONFIG_DIR") {
                return Ok(PathBuf::from(custom).join("config.yaml"));
            }
            let base = config_dir().ok_or(ConfigError::MissingConfigDir)?;
            Ok(base.join("cteractl").join("config.yaml"))
        }
    }
}

pub fn load(cwd: &Path) -> Result<Config> {
    let user = read_if_exists(&config_path(Scope::User, cwd)?)?.unwrap_or_default();
    let local = read_if_exists(&config_path(Scope::Local, cwd)?)?.unwrap_or_default();
    Ok(merge(user, local))
}

pub fn load_scope(scope: Scope, cwd: &Path) -> Result<Config> {
    Ok(read_if_exists(&config_path(scope, cwd)?)?.unwrap_or_default())
}

pub fn save(scope: Scope, config: &Config, cwd: &Path) -> Result<PathBuf> {
    let path = config_path(scope, cwd)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let serialized = serde_yaml::to_string(config).context("serializing config")?;
    fs::write(&path, serialized).with_context(|| format!("writing {:?}", path))?;
    Ok(path)
}

/// Merges user and project config, applies CLI overrides and insists on a
/// complete set of portal credentials.
pub fn resolve_portal(
    cwd: &Path,
    overrides: Option<PortalConfig>,
) -> Result<PortalEffectiveConfig> {
    let mut merged = load(cwd)?;
    if let Some(ovr) = overrides {
        merged.portal = Some(merge_portal(merged.portal.unwrap_or_default(), ovr));
    }
    let portal = merged.portal.ok_or(ConfigError::MissingPortalFields)?;
    let address = portal.address.ok_or(ConfigError::MissingPortalFields)?;
    let username = portal.username.ok_or(ConfigError::MissingPortalFields)?;
    let password = portal.password.ok_or(ConfigError::MissingPortalFields)?;

    Ok(PortalEffectiveConfig {
        address: address.trim().to_string(),
        username,
        password,
        verify_tls: portal.verify_tls,
    })
}

/// Copy of `config` that is safe to print.
pub fn masked(config: &Config) -> Config {
    let mut masked = config.clone();
    if let Some(portal) = masked.portal.as_mut()
        && portal.password.is_some()
    {
        portal.password = Some("*****".into());
    }
    masked
}

fn read_if_exists(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let config = serde_yaml::from_str(&contents).with_context(|| format!("parsing {:?}", path))?;
    Ok(Some(config))
}

fn merge(user: Config, local: Config) -> Config {
    Config {
        portal: match (user.portal, local.portal) {
            (Some(u), Some(l)) => Some(merge_portal(u, l)),
            (Some(u), None) => Some(u),
            (None, Some(l)) => Some(l),
            (None, None) => None,
        },
    }
}

fn merge_portal(user: PortalConfig, local: PortalConfig) -> PortalConfig {
    PortalConfig {
        address: local.address.or(user.address),
        username: local.username.or(user.username),
        password: local.password.or(user.password),
        verify_tls: local.verify_tls || user.verify_tls,
    }
}
