//! Command-line interface definitions for the `nodekeeper` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `nodekeeper` binary.
#[derive(Debug, Parser)]
#[command(
    name = "nodekeeper",
    about = "Create, provision, configure, and maintain database nodes",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info", value_name = "FILTER")]
    pub(crate) log_level: String,
    /// Re-run the whole operation up to this many extra times after a
    /// recoverable failure.
    #[arg(long, global = true, default_value_t = 0, value_name = "N")]
    pub(crate) retries: u32,
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Operations exposed by the binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create an instance and wait until it accepts SSH.
    Create(CreateCommand),
    /// Prepare an existing instance and run the provisioning playbook.
    Provision(ProvisionCommand),
    /// Stage software, install certificates, and apply configuration.
    Configure(Box<ConfigureCommand>),
    /// Start, stop, or restart a database process.
    Control(ControlCommand),
    /// Tear an instance down.
    Destroy(DestroyCommand),
    /// Check that the current or the replacement key connects.
    VerifyKey(VerifyKeyCommand),
    /// Authorize an additional SSH key.
    AddKey(KeyEditCommand),
    /// Revoke an SSH key.
    RemoveKey(KeyEditCommand),
    /// Check that the node accepts SSH.
    WaitForSsh(NodeArgs),
    /// Reboot a running instance.
    Reboot(RebootCommand),
    /// Switch the instance type.
    ChangeInstanceType(ChangeInstanceTypeCommand),
    /// Grow the data disks and their file systems.
    UpdateDisk(UpdateDiskCommand),
    /// Stage and run a custom hook script.
    RunHooks(RunHooksCommand),
    /// Print host details.
    List(ListCommand),
}

/// Arguments shared by every per-node operation.
#[derive(Debug, Args)]
pub(crate) struct NodeArgs {
    /// Instance name used for lookups.
    #[arg(value_name = "TARGET")]
    pub(crate) search_pattern: String,
    /// Role the node plays.
    #[arg(long, default_value = "cluster-server")]
    pub(crate) server_type: String,
    /// SSH login user; defaults to the configured user.
    #[arg(long)]
    pub(crate) ssh_user: Option<String>,
    /// Port sshd should listen on; defaults to the configured port.
    #[arg(long)]
    pub(crate) custom_ssh_port: Option<u16>,
    /// Private key used to reach the node.
    #[arg(long, value_name = "PATH")]
    pub(crate) private_key_file: Option<PathBuf>,
    /// Use the SSH2 client binaries.
    #[arg(long)]
    pub(crate) ssh2_enabled: bool,
    /// Executor tags to run.
    #[arg(long)]
    pub(crate) tags: Option<String>,
    /// Executor tags to skip.
    #[arg(long)]
    pub(crate) skip_tags: Option<String>,
    /// Extra executor variable as `key=value`; repeatable.
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub(crate) vars: Vec<String>,
}

/// Arguments for `nodekeeper create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Script the instance runs on first boot.
    #[arg(long, value_name = "PATH")]
    pub(crate) boot_script: Option<PathBuf>,
    /// Subnet of a secondary network interface.
    #[arg(long)]
    pub(crate) cloud_subnet_secondary: Option<String>,
}

/// Arguments for `nodekeeper provision`.
#[derive(Debug, Args)]
pub(crate) struct ProvisionCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Skip the preprovision step.
    #[arg(long)]
    pub(crate) skip_preprovision: bool,
    /// Leave sshd on its current port.
    #[arg(long)]
    pub(crate) disable_custom_ssh: bool,
    /// Boot script re-run after the secondary interface is configured.
    #[arg(long, value_name = "PATH")]
    pub(crate) boot_script: Option<PathBuf>,
    /// Local directory holding third-party tarballs.
    #[arg(long, value_name = "PATH")]
    pub(crate) local_package_path: Option<String>,
    /// Install without internet access.
    #[arg(long)]
    pub(crate) air_gap: bool,
    /// Configure chrony for time synchronisation.
    #[arg(long)]
    pub(crate) use_chrony: bool,
    /// NTP server handed to chrony; repeatable.
    #[arg(long = "ntp-server", value_name = "HOST")]
    pub(crate) ntp_servers: Vec<String>,
}

/// How the package reaches the node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum DownloadSource {
    /// Copy the local package over SCP.
    #[default]
    Local,
    /// Download from S3 on the node.
    S3,
    /// Download from GCS on the node.
    Gcs,
    /// Download over HTTP(S) on the node.
    Http,
}

/// Where certificate material lives.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum CertsLocation {
    /// On this machine.
    #[default]
    Local,
    /// Already on the node.
    Remote,
}

/// Arguments for `nodekeeper configure`.
#[derive(Debug, Args)]
pub(crate) struct ConfigureCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Master addresses handed to tablet servers.
    #[arg(long = "master-addresses-for-tserver")]
    pub(crate) master_addresses: Option<String>,
    /// Master addresses handed to masters.
    #[arg(long)]
    pub(crate) master_addresses_for_master: Option<String>,
    /// Addresses the server advertises.
    #[arg(long)]
    pub(crate) server_broadcast_addresses: Option<String>,
    /// Process the configuration applies to: `master` or `tserver`.
    #[arg(long)]
    pub(crate) process_type: Option<String>,
    /// Database package: a local path, or a URI for remote downloads.
    #[arg(long)]
    pub(crate) package: Option<String>,
    /// How the package reaches the node.
    #[arg(long, value_enum, default_value_t = DownloadSource::Local)]
    pub(crate) download_source: DownloadSource,
    /// Package path used by integration test installs.
    #[arg(long, value_name = "URI", conflicts_with = "download_source")]
    pub(crate) itest_s3_package_path: Option<String>,
    /// Full gflag set as JSON.
    #[arg(long, value_name = "JSON")]
    pub(crate) gflags: Option<String>,
    /// Extra gflags merged into the current set, as JSON.
    #[arg(long, value_name = "JSON")]
    pub(crate) extra_gflags: Option<String>,
    /// Gflags to drop, as a JSON array.
    #[arg(long, value_name = "JSON")]
    pub(crate) gflags_to_remove: Option<String>,
    /// Access key for S3 downloads.
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub(crate) aws_access_key: Option<String>,
    /// Secret key for S3 downloads.
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub(crate) aws_secret_key: Option<String>,
    /// Service account JSON for GCS downloads.
    #[arg(long, env = "GCS_CREDENTIALS_JSON", hide_env_values = true)]
    pub(crate) gcs_credentials_json: Option<String>,
    /// Checksum verified after an HTTP download.
    #[arg(long, default_value = "")]
    pub(crate) http_package_checksum: String,
    /// Install third-party packages and stop.
    #[arg(long)]
    pub(crate) install_third_party_packages: bool,
    /// Local directory holding third-party tarballs.
    #[arg(long, value_name = "PATH")]
    pub(crate) local_package_path: Option<String>,
    #[command(flatten)]
    pub(crate) certs: CertArgs,
}

/// Certificate arguments for `nodekeeper configure`.
#[derive(Debug, Args)]
pub(crate) struct CertArgs {
    /// Rotation step: `APPEND_NEW_ROOT_CERT`, `ROTATE_CERTS`,
    /// `REMOVE_OLD_ROOT_CERT`, or `UPDATE_CERT_DIRS`.
    #[arg(long)]
    pub(crate) cert_rotate_action: Option<String>,
    /// Node-to-node root certificate.
    #[arg(long, value_name = "PATH")]
    pub(crate) root_cert_path: Option<PathBuf>,
    /// Node-to-node server certificate.
    #[arg(long, value_name = "PATH", requires = "root_cert_path")]
    pub(crate) server_cert_path: Option<PathBuf>,
    /// Node-to-node server key.
    #[arg(long, value_name = "PATH", requires = "root_cert_path")]
    pub(crate) server_key_path: Option<PathBuf>,
    /// Client-to-server root certificate.
    #[arg(long, value_name = "PATH")]
    pub(crate) root_cert_path_client_server: Option<PathBuf>,
    /// Client-to-server server certificate.
    #[arg(long, value_name = "PATH", requires = "root_cert_path_client_server")]
    pub(crate) server_cert_path_client_server: Option<PathBuf>,
    /// Client-to-server server key.
    #[arg(long, value_name = "PATH", requires = "root_cert_path_client_server")]
    pub(crate) server_key_path_client_server: Option<PathBuf>,
    /// Client certificate installed on the node.
    #[arg(long, value_name = "PATH", requires = "client_key_path")]
    pub(crate) client_cert_path: Option<PathBuf>,
    /// Client key installed on the node.
    #[arg(long, value_name = "PATH", requires = "client_cert_path")]
    pub(crate) client_key_path: Option<PathBuf>,
    /// Encryption-at-rest key file.
    #[arg(long, value_name = "PATH")]
    pub(crate) encryption_key_source_file: Option<PathBuf>,
    /// Where node-to-node certificate material lives.
    #[arg(long, value_enum, default_value_t = CertsLocation::Local)]
    pub(crate) certs_location: CertsLocation,
    /// Where client-to-server certificate material lives.
    #[arg(long, value_enum, default_value_t = CertsLocation::Local)]
    pub(crate) certs_location_client_to_server: CertsLocation,
    /// Verification the node skips: `ALL` or `HOSTNAME`.
    #[arg(long)]
    pub(crate) skip_cert_validation: Option<String>,
    /// Directory for node-to-node certificates.
    #[arg(long)]
    pub(crate) certs_node_dir: Option<String>,
    /// Directory for client-to-server certificates.
    #[arg(long)]
    pub(crate) certs_client_server_dir: Option<String>,
    /// Directory for client certificates.
    #[arg(long)]
    pub(crate) certs_client_dir: Option<String>,
    /// Directory for encryption-at-rest keys.
    #[arg(long)]
    pub(crate) encryption_key_dir: Option<String>,
}

/// Arguments for `nodekeeper control`.
#[derive(Debug, Args)]
pub(crate) struct ControlCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Database process: `master`, `tserver`, or `controller`.
    #[arg(long)]
    pub(crate) process: String,
    /// Command for the process, for example `start` or `restart`.
    #[arg(long)]
    pub(crate) command: String,
}

/// Arguments for `nodekeeper destroy`.
#[derive(Debug, Args)]
pub(crate) struct DestroyCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Address of the node, for executors that cannot look it up.
    #[arg(long)]
    pub(crate) node_ip: Option<String>,
}

/// Arguments for `nodekeeper verify-key`.
#[derive(Debug, Args)]
pub(crate) struct VerifyKeyCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Replacement key tried when the current key fails.
    #[arg(long, value_name = "PATH")]
    pub(crate) new_private_key_file: Option<PathBuf>,
}

/// Arguments for `nodekeeper add-key` and `nodekeeper remove-key`.
#[derive(Debug, Args)]
pub(crate) struct KeyEditCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Private key being added or removed.
    #[arg(long = "key-file", value_name = "PATH")]
    pub(crate) key_file: PathBuf,
    /// Matching public key; derived from `--key-file` when empty.
    #[arg(long, default_value = "")]
    pub(crate) public_key_content: String,
}

/// Arguments for `nodekeeper reboot`.
#[derive(Debug, Args)]
pub(crate) struct RebootCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Reboot with `sudo reboot` instead of the cloud API.
    #[arg(long)]
    pub(crate) use_ssh: bool,
}

/// Arguments for `nodekeeper change-instance-type`.
#[derive(Debug, Args)]
pub(crate) struct ChangeInstanceTypeCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Instance type to switch to.
    #[arg(long)]
    pub(crate) instance_type: Option<String>,
    /// Stop and resize even when the type is unchanged.
    #[arg(long)]
    pub(crate) force: bool,
    /// Memory ceiling for the Postgres process, in MiB.
    #[arg(long, default_value_t = 0)]
    pub(crate) pg_max_mem_mb: u32,
    /// Install without internet access.
    #[arg(long)]
    pub(crate) air_gap: bool,
}

/// Arguments for `nodekeeper update-disk`.
#[derive(Debug, Args)]
pub(crate) struct UpdateDiskCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// New disk size in GiB.
    #[arg(long)]
    pub(crate) volume_size: u32,
}

/// Arguments for `nodekeeper run-hooks`.
#[derive(Debug, Args)]
pub(crate) struct RunHooksCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Interpreter: `Bash` or `Python`.
    #[arg(long)]
    pub(crate) execution_lang: String,
    /// Event that triggered the hook.
    #[arg(long)]
    pub(crate) trigger: String,
    /// Local path of the hook script.
    #[arg(long, value_name = "PATH")]
    pub(crate) hook_path: PathBuf,
    /// Task that is running the hook.
    #[arg(long)]
    pub(crate) parent_task: String,
    /// Run the hook with `sudo` as the SSH user.
    #[arg(long)]
    pub(crate) use_sudo: bool,
    /// Extra hook argument as `key=value`; repeatable.
    #[arg(long = "runtime-arg", value_name = "KEY=VALUE")]
    pub(crate) runtime_args: Vec<String>,
}

/// Arguments for `nodekeeper list`.
#[derive(Debug, Args)]
pub(crate) struct ListCommand {
    /// Instance name, or a substring when listing all hosts.
    #[arg(value_name = "PATTERN")]
    pub(crate) pattern: Option<String>,
    /// List every matching host.
    #[arg(long)]
    pub(crate) all: bool,
    /// Print JSON instead of `key=value` lines.
    #[arg(long)]
    pub(crate) as_json: bool,
}
