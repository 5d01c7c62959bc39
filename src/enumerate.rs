use crate::session::{DeviceRef, PortalSession};
use anyhow::Result;
use tracing::{info, warn};

/// Which filers a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    SingleDevice { name: String, tenant: String },
    OneTenant(String),
    AllTenants,
}

/// Connected filers in `scope`, in the order the portal lists them.
///
/// Remote errors are logged and produce an empty result (or skip the one
/// tenant that failed); they never abort the caller.
pub fn list_devices(session: &mut dyn PortalSession, scope: &Scope) -> Vec<DeviceRef> {
    match scope {
        Scope::SingleDevice { name, tenant } => match single_device(session, tenant, name) {
            Ok(device) => device.into_iter().collect(),
            Err(err) => {
                warn!(%tenant, device = %name, error = %format!("{err:#}"), "device lookup failed");
                Vec::new()
            }
        },
        Scope::OneTenant(tenant) => match tenant_devices(session, tenant) {
            Ok(devices) => devices,
            Err(err) => {
                warn!(%tenant, error = %format!("{err:#}"), "listing tenant devices failed");
                Vec::new()
            }
        },
        Scope::AllTenants => match all_tenant_devices(session) {
            Ok(devices) => devices,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "listing tenants failed");
                Vec::new()
            }
        },
    }
}

fn single_device(
    session: &mut dyn PortalSession,
    tenant: &str,
    name: &str,
) -> Result<Option<DeviceRef>> {
    session.browse(tenant)?;
    let device = session.device(name)?.map(|mut device| {
        device.tenant = tenant.to_string();
        device
    });
    Ok(device.filter(|d| {
        if !d.connected {
            warn!(%tenant, device = %name, "device is not connected");
        }
        d.connected
    }))
}

fn tenant_devices(session: &mut dyn PortalSession, tenant: &str) -> Result<Vec<DeviceRef>> {
    session.browse(tenant)?;
    let devices: Vec<DeviceRef> = session
        .devices()?
        .into_iter()
        .filter(|d| d.connected)
        .map(|mut d| {
            d.tenant = tenant.to_string();
            d
        })
        .collect();
    info!(%tenant, connected = devices.len(), "listed tenant devices");
    Ok(devices)
}

fn all_tenant_devices(session: &mut dyn PortalSession) -> Result<Vec<DeviceRef>> {
    session.browse_global_admin()?;
    let tenants = session.tenants()?;

    let mut devices = Vec::new();
    for tenant in tenants {
        match tenant_devices(session, &tenant.name) {
            Ok(found) => devices.extend(found),
            Err(err) => {
                warn!(tenant = %tenant.name, error = %format!("{err:#}"), "skipping tenant");
            }
        }
    }
    Ok(devices)
}
