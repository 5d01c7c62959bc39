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

use crate::field::graft;
use crate::session::{DeviceRef, PortalSession, SessionError, Tenant};
use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const API_PREFIX: &str = "ServicesPortal/api";
const DEVICE_PREFIX: &str = "devicecmdnew";

static UA: OnceLock<HeaderValue> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct ResponseData {
    pub body: String,
    pub json: Option<Value>,
}

/// Non-success answer from the portal, kept typed so callers can tell a
/// missing object from a broken request.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HttpError {
    pub status: u16,
    pub message: String,
}

/// Cookie-authenticated JSON client for a CTERA Portal.
#[derive(Debug)]
pub struct PortalClient {
    base_url: Url,
    http: Client,
    username: String,
    password: String,
    logged_in: bool,
}

impl PortalClient {
    /// Builds the client and logs in. Failing here is the only fatal error of
    /// a report run.
    pub fn connect(
        address: &str,
        username: &str,
        password: &str,
        verify_tls: bool,
    ) -> std::result::Result<Self, SessionError> {
        let base_url = normalize_address(address).map_err(|err| SessionError::Connect {
            url: address.to_string(),
            message: format!("{err:#}"),
        })?;
        let user_agent = UA.get_or_init(|| HeaderValue::from_static("cteractl/0.1"));
        let http = Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!verify_tls)
            .user_agent(user_agent.clone())
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| SessionError::Connect {
                url: base_url.to_string(),
                message: err.to_string(),
            })?;

        let mut client = Self {
            base_url,
            http,
            username: username.to_string(),
            password: password.to_string(),
            logged_in: false,
        };
        client.login()?;
        Ok(client)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn login(&mut self) -> std::result::Result<(), SessionError> {
        let url = self
            .base_url
            .join(&format!("{API_PREFIX}/login"))
            .map_err(|err| SessionError::Connect {
                url: self.base_url.to_string(),
                message: err.to_string(),
            })?;
        let form = [
            ("j_username", self.username.as_str()),
            ("j_password", self.password.as_str()),
        ];

        let response = self
            .http
            .post(url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .form(&form)
            .send()
            .map_err(|err| SessionError::Connect {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SessionError::Login {
                url: url.to_string(),
                username: self.username.clone(),
                status: response.status().as_u16(),
            });
        }
        self.logged_in = true;
        debug!(url = %url, user = %self.username, "logged in");
        Ok(())
    }

    fn force_relogin(&mut self) -> Result<()> {
        self.logged_in = false;
        self.login()?;
        Ok(())
    }

    fn api_path(path: &str) -> String {
        format!("{API_PREFIX}/{}", path.trim_start_matches('/'))
    }

    /// Absolute URL of a remote filer path; tenant and device names are
    /// percent-encoded as single segments.
    fn device_path(&self, device: &DeviceRef, path: &str) -> Result<String> {
        let segments = [DEVICE_PREFIX, device.tenant.as_str(), device.name.as_str()]
            .into_iter()
            .chain(path.trim_start_matches('/').split('/'));
        Ok(push_segments(&self.base_url, segments)?.into())
    }

    fn get(&mut self, path: &str) -> Result<ResponseData> {
        self.request(Method::GET, path, Option::<&()>::None)
    }

    fn post<B: Serialize + ?Sized>(&mut self, path: &str, body: Option<&B>) -> Result<ResponseData> {
        self.request(Method::POST, path, body)
    }

    fn put<B: Serialize + ?Sized>(&mut self, path: &str, body: Option<&B>) -> Result<ResponseData> {
        self.request(Method::PUT, path, body)
    }

    fn request<B: Serialize + ?Sized>(
        &mut self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ResponseData> {
        if !self.logged_in {
            self.login()?;
        }
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("joining path `{}` to base URL", path))?;

        let build = |http: &Client| {
            let mut req: RequestBuilder = http
                .request(method.clone(), url.clone())
                .header(ACCEPT, HeaderValue::from_static("application/json"))
                .header(
                    USER_AGENT,
                    UA.get_or_init(|| HeaderValue::from_static("cteractl/0.1"))
                        .clone(),
                );
            if let Some(b) = body {
                req = req.json(b);
            }
            req
        };

        let mut response: Response = build(&self.http)
            .send()
            .with_context(|| format!("sending {} {}", method, url))?;

        // Session expired; log in again and retry once
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(url = %url, "session rejected, logging in again");
            self.force_relogin()?;
            response = build(&self.http)
                .send()
                .with_context(|| format!("sending {} {}", method, url))?;
        }

        let status = response.status();
        let text = response.text().context("reading response body")?;
        if !status.is_success() {
            return Err(HttpError {
                status: status.as_u16(),
                message: Self::format_error_message(&method, status, &text, url.as_str()),
            }
            .into());
        }

        let json = serde_json::from_str(&text).ok();
        debug!(%method, url = %url, status = status.as_u16(), "portal response");
        Ok(ResponseData {
            body: text,
            json,
        })
    }

    fn format_error_message(
        method: &Method,
        status: StatusCode,
        body: &str,
        url: impl AsRef<str>,
    ) -> String {
        let url_str = url.as_ref();

        if status == StatusCode::UNAUTHORIZED {
            return format!(
                "Authentication failed (401) at {}\n\nPossible causes:\n  • Session expired and re-login was rejected\n  • The account lacks global administrator rights\n\nTry:\n  cteractl validate",
                url_str
            );
        }

        if status == StatusCode::FORBIDDEN {
            return format!(
                "Access denied (403) at {}\n\nPossible causes:\n  • The account cannot browse this tenant\n  • Remote access to the filer is disabled",
                url_str
            );
        }

        if status == StatusCode::NOT_FOUND {
            return format!(
                "Not found (404) at {}\n\nPossible causes:\n  • The tenant or filer name is misspelled\n  • The filer firmware does not expose this path\n\nTry:\n  cteractl devices --all-tenants",
                url_str
            );
        }

        format!(
            "{} failed with HTTP {} at {}\n\nResponse: {}",
            method,
            status,
            url_str,
            if body.len() > 200 {
                format!("{}...", body.chars().take(200).collect::<String>())
            } else {
                body.to_string()
            }
        )
    }
}

impl PortalSession for PortalClient {
    fn logout(&mut self) -> Result<()> {
        if !self.logged_in {
            return Ok(());
        }
        let url = self.base_url.join(&Self::api_path("logout"))?;
        self.http
            .post(url)
            .send()
            .and_then(|r| r.error_for_status())
            .context("sending logout request")?;
        self.logged_in = false;
        Ok(())
    }

    fn browse(&mut self, tenant: &str) -> Result<()> {
        self.put(&Self::api_path("currentPortal"), Some(&json!(tenant)))
            .with_context(|| format!("browsing to tenant {tenant}"))?;
        Ok(())
    }

    fn browse_global_admin(&mut self) -> Result<()> {
        self.put(&Self::api_path("currentPortal"), Some(&json!("")))
            .context("browsing to global administration")?;
        Ok(())
    }

    fn tenants(&mut self) -> Result<Vec<Tenant>> {
        let resp = self.get(&Self::api_path("portals"))?;
        let items = json_items(&resp)?;
        Ok(items
            .iter()
            .filter_map(|item| item.get("name").and_then(Value::as_str))
            .map(|name| Tenant {
                name: name.to_string(),
            })
            .collect())
    }

    fn devices(&mut self) -> Result<Vec<DeviceRef>> {
        let resp = self.get(&Self::api_path("devices"))?;
        let items = json_items(&resp)?;
        Ok(items.iter().filter_map(parse_device).collect())
    }

    fn device(&mut self, name: &str) -> Result<Option<DeviceRef>> {
        let segments = API_PREFIX.split('/').chain(["devices", name]);
        let url: String = push_segments(&self.base_url, segments)?.into();
        match self.get(&url) {
            Ok(resp) => Ok(resp.json.as_ref().and_then(parse_device)),
            Err(err) if err.downcast_ref::<HttpError>().is_some_and(|e| e.status == 404) => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn get_multi(&mut self, device: &DeviceRef, paths: &[&str]) -> Result<Value> {
        let body = json!({ "name": "get-multi", "param": paths });
        let url = self.device_path(device, "/")?;
        let resp = self.post(&url, Some(&body))?;
        let json = resp
            .json
            .ok_or_else(|| anyhow!("batched fetch for {} returned non-JSON", device.name))?;

        match json {
            Value::Array(values) => {
                let mut tree = Value::Null;
                for (path, value) in paths.iter().zip(values) {
                    graft(&mut tree, path, value);
                }
                Ok(tree)
            }
            tree @ Value::Object(_) => Ok(tree),
            other => Err(anyhow!(
                "unexpected batched fetch response for {}: {}",
                device.name,
                other
            )),
        }
    }

    fn remote_get(&mut self, device: &DeviceRef, path: &str) -> Result<Value> {
        let url = self.device_path(device, path)?;
        let resp = self.get(&url)?;
        Ok(resp.json.unwrap_or(Value::String(resp.body)))
    }

    fn execute(
        &mut self,
        device: &DeviceRef,
        path: &str,
        action: &str,
        param: Value,
    ) -> Result<Value> {
        let body = json!({ "name": action, "param": param });
        let url = self.device_path(device, path)?;
        let resp = self.post(&url, Some(&body))?;
        Ok(resp.json.unwrap_or(Value::String(resp.body)))
    }
}

/// Accepts `host`, `host:port` or a full URL; defaults to HTTPS.
pub fn normalize_address(address: &str) -> Result<Url> {
    let trimmed = address.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        format!("{trimmed}/")
    } else {
        format!("https://{trimmed}/")
    };
    Url::parse(&with_scheme).with_context(|| format!("parsing portal address `{address}`"))
}

fn push_segments<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("portal address {base} cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn json_items(resp: &ResponseData) -> Result<&Vec<Value>> {
    let json = resp
        .json
        .as_ref()
        .ok_or_else(|| anyhow!("expected a JSON response"))?;
    match json {
        Value::Array(items) => Ok(items),
        Value::Object(map) => map
            .get("objects")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("expected a JSON list")),
        _ => Err(anyhow!("expected a JSON list")),
    }
}

fn parse_device(item: &Value) -> Option<DeviceRef> {
    Some(DeviceRef {
        name: item.get("name")?.as_str()?.to_string(),
        tenant: item
            .get("portal")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        connected: item
            .get("connected")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}
