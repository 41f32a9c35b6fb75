//! Instance preparation and post-run cleanup
//!
//! Setup runs once per instance before a suite: stray benchmark processes
//! are killed, the framework package is installed when a URL is configured,
//! and the shared data volume is mounted. Cleanup runs after every attempt.

use distbench_common::defaults::{DATA_MOUNT_DIR, KILL_OK_EXIT_CODES};
use distbench_common::{CloudType, RunPlan};
use tracing::{info, warn};

use crate::config::SuiteSettings;
use crate::executor::{Instance, RemoteExecutor};

/// Mount options for NFS data volumes
const NFS_MOUNT_OPTIONS: &str = "nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2";

/// Device of the data disk attached to GCE instances
const GCE_DATA_DISK: &str = "/dev/disk/by-id/google-persistent-disk-1";

/// Round-robin cursor over the NFS endpoints of a suite
#[derive(Debug, Default)]
pub struct VolumeRotation {
    next: usize,
}

impl VolumeRotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over at the first endpoint
    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Endpoint for the next mount, advancing the cursor
    pub fn next_endpoint<'a>(&mut self, endpoints: &'a [String]) -> Option<&'a str> {
        if endpoints.is_empty() {
            return None;
        }
        let endpoint = &endpoints[self.next % endpoints.len()];
        self.next = (self.next + 1) % endpoints.len();
        Some(endpoint)
    }
}

fn sudo_prefix(sudo: bool) -> &'static str {
    if sudo { "sudo " } else { "" }
}

/// Command killing every process of `username` that matches `pattern`
pub fn kill_command(pattern: &str, username: &str, sudo: bool) -> String {
    format!("{}pkill -f \"{pattern}\" -u {username}", sudo_prefix(sudo))
}

/// Command installing (or upgrading to) the package at `url`
pub fn install_command(url: &str, sudo: bool) -> String {
    format!("{}pip install --quiet --upgrade {url}", sudo_prefix(sudo))
}

/// Commands creating the mount point and mounting the data volume.
///
/// `None` for cloud types without a shared data volume, or on AWS when no
/// endpoint is available.
pub fn mount_commands(cloud_type: CloudType, endpoint: Option<&str>) -> Option<[String; 2]> {
    match cloud_type {
        CloudType::Aws => endpoint.map(|efs| {
            [
                format!("mkdir {DATA_MOUNT_DIR}"),
                format!("sudo mount -t nfs4 -o {NFS_MOUNT_OPTIONS} {efs}:/ {DATA_MOUNT_DIR}"),
            ]
        }),
        CloudType::Gce => Some([
            format!("sudo mkdir {DATA_MOUNT_DIR}"),
            format!("sudo mount -o discard,ro -t ext4 {GCE_DATA_DISK} {DATA_MOUNT_DIR}"),
        ]),
        CloudType::Ssh | CloudType::Local => None,
    }
}

/// Kill stray benchmark processes on `instance`
pub async fn kill_processes<E: RemoteExecutor>(
    executor: &E,
    instance: &Instance,
    plan: &RunPlan,
    settings: &SuiteSettings,
) {
    let cmd = kill_command(
        &plan.process_pattern,
        &settings.username,
        settings.use_sudo(plan),
    );
    if let Err(e) = executor.run_and_wait(instance, &cmd, KILL_OK_EXIT_CODES).await {
        warn!(instance = %instance.id, error = %e, "Failed to kill benchmark processes");
    }
}

/// Prepare one instance for a suite
pub async fn prepare_instance<E: RemoteExecutor>(
    executor: &E,
    instance: &Instance,
    plan: &RunPlan,
    settings: &SuiteSettings,
    rotation: &mut VolumeRotation,
) {
    info!(instance = %instance.id, "Setting up instance");
    kill_processes(executor, instance, plan, settings).await;

    if let Some(url) = settings.tf_url(plan) {
        info!(instance = %instance.id, url, "Installing framework");
        let cmd = install_command(url, settings.use_sudo(plan));
        match executor.run_and_wait(instance, &cmd, &[0]).await {
            Ok(_) => info!(instance = %instance.id, "Framework installed"),
            Err(e) => warn!(instance = %instance.id, error = %e, "Framework install failed"),
        }
    }

    if !settings.mount {
        return;
    }
    let endpoint = match plan.cloud_type {
        CloudType::Aws => {
            let endpoint = rotation.next_endpoint(&plan.efs);
            if endpoint.is_none() {
                warn!(instance = %instance.id, "No efs endpoints configured, skipping data mount");
            }
            endpoint
        }
        _ => None,
    };

    if let Some([mkdir, mount]) = mount_commands(plan.cloud_type, endpoint) {
        // The mount point may already exist
        let _ = executor.run_and_wait(instance, &mkdir, &[0, 1]).await;
        info!(instance = %instance.id, command = %mount, "Mounting data volume");
        if let Err(e) = executor.run_and_wait(instance, &mount, &[0]).await {
            warn!(instance = %instance.id, error = %e, "Failed to mount data volume");
        }
    }
}

/// Kill stray processes and close every session on the pool
pub async fn cleanup_instances<E: RemoteExecutor>(
    executor: &E,
    pool: &[Instance],
    plan: &RunPlan,
    settings: &SuiteSettings,
) {
    for instance in pool {
        kill_processes(executor, instance, plan, settings).await;
        executor.cleanup(instance).await;
    }
}
