//! In-memory portal used by the unit tests.

use crate::field::graft;
use crate::session::{DeviceRef, PortalSession, Tenant};
use anyhow::{Result, anyhow, bail};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

#[derive(Default)]
pub struct FakePortal {
    tenants: Vec<String>,
    devices: Vec<DeviceRef>,
    trees: HashMap<String, Value>,
    commands: HashMap<(String, String), Value>,
    failing: HashSet<String>,
    current: Option<String>,
    calls: Rc<RefCell<Vec<String>>>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tenant(mut self, name: &str) -> Self {
        self.tenants.push(name.to_string());
        self
    }

    pub fn device(mut self, tenant: &str, name: &str, connected: bool) -> Self {
        self.devices.push(DeviceRef {
            name: name.to_string(),
            tenant: tenant.to_string(),
            connected,
        });
        self
    }

    /// Remote configuration/status tree served for `device`.
    pub fn tree(mut self, device: &str, tree: Value) -> Self {
        self.trees.insert(device.to_string(), tree);
        self
    }

    pub fn command(mut self, device: &str, command: &str, output: Value) -> Self {
        self.commands
            .insert((device.to_string(), command.to_string()), output);
        self
    }

    pub fn fail_browse(self, tenant: &str) -> Self {
        self.fail(&format!("browse:{tenant}"))
    }

    /// Makes the operation with this key fail, e.g. `tenants`,
    /// `devices:<tenant>`, `get_multi:<device>`, `execute:<device>:<action>`.
    pub fn fail(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }

    pub fn calls(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.calls)
    }

    fn record(&self, call: String) -> Result<()> {
        let failing = self.failing.contains(&call);
        self.calls.borrow_mut().push(call.clone());
        if failing {
            bail!("simulated failure: {call}");
        }
        Ok(())
    }

    fn tree_for(&self, device: &DeviceRef) -> Value {
        self.trees.get(&device.name).cloned().unwrap_or(Value::Null)
    }
}

impl PortalSession for FakePortal {
    fn logout(&mut self) -> Result<()> {
        self.record("logout".into())
    }

    fn browse(&mut self, tenant: &str) -> Result<()> {
        self.record(format!("browse:{tenant}"))?;
        if !self.tenants.iter().any(|t| t == tenant) {
            bail!("tenant {tenant} not found");
        }
        self.current = Some(tenant.to_string());
        Ok(())
    }

    fn browse_global_admin(&mut self) -> Result<()> {
        self.record("browse_global_admin".into())?;
        self.current = None;
        Ok(())
    }

    fn tenants(&mut self) -> Result<Vec<Tenant>> {
        self.record("tenants".into())?;
        Ok(self
            .tenants
            .iter()
            .map(|name| Tenant { name: name.clone() })
            .collect())
    }

    fn devices(&mut self) -> Result<Vec<DeviceRef>> {
        let tenant = self
            .current
            .clone()
            .ok_or_else(|| anyhow!("no tenant selected"))?;
        self.record(format!("devices:{tenant}"))?;
        Ok(self
            .devices
            .iter()
            .filter(|d| d.tenant == tenant)
            .cloned()
            .collect())
    }

    fn device(&mut self, name: &str) -> Result<Option<DeviceRef>> {
        let tenant = self
            .current
            .clone()
            .ok_or_else(|| anyhow!("no tenant selected"))?;
        self.record(format!("device:{tenant}:{name}"))?;
        Ok(self
            .devices
            .iter()
            .find(|d| d.tenant == tenant && d.name == name)
            .cloned())
    }

    fn get_multi(&mut self, device: &DeviceRef, paths: &[&str]) -> Result<Value> {
        self.record(format!("get_multi:{}", device.name))?;
        let source = self.tree_for(device);
        let mut tree = Value::Null;
        for path in paths {
            if let Some(value) = source.pointer(path) {
                graft(&mut tree, path, value.clone());
            }
        }
        Ok(tree)
    }

    fn remote_get(&mut self, device: &DeviceRef, path: &str) -> Result<Value> {
        self.record(format!("remote_get:{}:{path}", device.name))?;
        self.tree_for(device)
            .pointer(path)
            .cloned()
            .ok_or_else(|| anyhow!("HTTP 404 for {path}"))
    }

    fn execute(
        &mut self,
        device: &DeviceRef,
        _path: &str,
        action: &str,
        param: Value,
    ) -> Result<Value> {
        self.record(format!("execute:{}:{action}", device.name))?;
        if action != "debugCmd" {
            return Ok(json!("ok"));
        }
        let command = param.as_str().unwrap_or_default().to_string();
        self.commands
            .get(&(device.name.clone(), command.clone()))
            .cloned()
            .ok_or_else(|| anyhow!("unknown command `{command}`"))
    }
}
