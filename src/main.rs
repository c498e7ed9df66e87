//! Binary entry point for the `nodekeeper` CLI.

mod cli;

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use serde_json::Value;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use nodekeeper::certs::{
    CertDirs, CertLocation, CertRotateAction, CertificateRequest, ClientCertMaterial,
    ServerCertMaterial,
};
use nodekeeper::lifecycle::{
    ChangeInstanceTypeRequest, ConfigureRequest, CreateRequest, HookRequest, HostListing,
    PackageSource, ProcessControl, ProvisionRequest, RebootRequest,
};
use nodekeeper::{
    AnsibleExecutor, Backoff, CliCloudApi, KeyEdit, NodeTarget, OpsConfig, OpsError, Orchestrator,
    ProcessCommandRunner, RetryPolicy, ServerType, SshClient, SshConfig, retry_recoverable,
};

use cli::{
    CertArgs, CertsLocation, Cli, Command, ConfigureCommand, DownloadSource, NodeArgs,
    RunHooksCommand,
};

/// Exit status for failures worth retrying (`EX_TEMPFAIL`).
const EXIT_RECOVERABLE: i32 = 75;
/// Delay before the first whole-operation retry.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(5);

type NodeOrchestrator = Orchestrator<
    CliCloudApi<ProcessCommandRunner>,
    AnsibleExecutor<ProcessCommandRunner>,
    SshClient<ProcessCommandRunner>,
>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Ops(#[from] OpsError),
    #[error("could not write output: {0}")]
    Output(String),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Ops(err) if err.is_recoverable() => EXIT_RECOVERABLE,
            _ => 1,
        }
    }
}

/// What a successful operation prints on stdout.
#[derive(Debug)]
enum Report {
    Nothing,
    Json(Value),
    Listing { listing: HostListing, as_json: bool },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let exit_code = match run(&cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn run(cli: &Cli) -> Result<(), CliError> {
    let config =
        OpsConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let ssh_config =
        SshConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let shell = SshClient::with_process_runner(ssh_config)
        .map_err(|err| CliError::Config(err.to_string()))?;
    let cloud = CliCloudApi::with_process_runner(
        config.cloud_provider.clone(),
        config.cloud_helper_bin.clone(),
    );
    let executor = AnsibleExecutor::with_process_runner(
        config.executor_bin.clone(),
        config.playbook_dir.clone(),
    );
    let orchestrator = Orchestrator::new(cloud, executor, shell, config);

    let policy = RetryPolicy::new(
        cli.retries.saturating_add(1),
        Backoff::Exponential {
            base: RETRY_BASE_DELAY,
        },
    );
    let report = retry_recoverable(policy, operation_name(&cli.command), || {
        execute(&orchestrator, &cli.command)
    })
    .await?;
    write_report(io::stdout(), &report)
}

const fn operation_name(command: &Command) -> &'static str {
    match command {
        Command::Create(_) => "create",
        Command::Provision(_) => "provision",
        Command::Configure(_) => "configure",
        Command::Control(_) => "control",
        Command::Destroy(_) => "destroy",
        Command::VerifyKey(_) => "verify-key",
        Command::AddKey(_) => "add-key",
        Command::RemoveKey(_) => "remove-key",
        Command::WaitForSsh(_) => "wait-for-ssh",
        Command::Reboot(_) => "reboot",
        Command::ChangeInstanceType(_) => "change-instance-type",
        Command::UpdateDisk(_) => "update-disk",
        Command::RunHooks(_) => "run-hooks",
        Command::List(_) => "list",
    }
}

async fn execute(orchestrator: &NodeOrchestrator, command: &Command) -> Result<Report, OpsError> {
    let config = orchestrator.config();
    match command {
        Command::Create(args) => {
            let target = node_target(&args.node, config)?;
            let request = CreateRequest {
                boot_script: args.boot_script.as_deref().map(utf8_path).transpose()?,
                cloud_subnet_secondary: args.cloud_subnet_secondary.clone(),
            };
            let output = orchestrator.create(&target, &request).await?;
            Ok(Report::Json(output.to_json()))
        }
        Command::Provision(args) => {
            let target = node_target(&args.node, config)?;
            let request = ProvisionRequest {
                skip_preprovision: args.skip_preprovision,
                disable_custom_ssh: args.disable_custom_ssh,
                boot_script: args.boot_script.as_deref().map(utf8_path).transpose()?,
                local_package_path: args.local_package_path.clone(),
                air_gap: args.air_gap,
                use_chrony: args.use_chrony,
                ntp_servers: args.ntp_servers.clone(),
            };
            orchestrator.provision(&target, &request).await?;
            Ok(Report::Nothing)
        }
        Command::Configure(args) => {
            let target = node_target(&args.node, config)?;
            orchestrator
                .configure(&target, &configure_request(args)?)
                .await?;
            Ok(Report::Nothing)
        }
        Command::Control(args) => {
            let target = node_target(&args.node, config)?;
            let control = ProcessControl::new(&args.process, &args.command)?;
            orchestrator.control(&target, &control).await?;
            Ok(Report::Nothing)
        }
        Command::Destroy(args) => {
            let target = node_target(&args.node, config)?;
            orchestrator.destroy(&target, args.node_ip.as_deref())?;
            Ok(Report::Nothing)
        }
        Command::VerifyKey(args) => {
            let target = node_target(&args.node, config)?;
            let new_key = args.new_private_key_file.as_deref().map(utf8_path).transpose()?;
            orchestrator.verify_key(&target, new_key.as_deref()).await?;
            Ok(Report::Nothing)
        }
        Command::AddKey(args) => {
            let target = node_target(&args.node, config)?;
            let edit = KeyEdit::new(utf8_path(&args.key_file)?)
                .with_public_key(args.public_key_content.clone());
            orchestrator.add_key(&target, &edit).await?;
            Ok(Report::Nothing)
        }
        Command::RemoveKey(args) => {
            let target = node_target(&args.node, config)?;
            let edit = KeyEdit::new(utf8_path(&args.key_file)?)
                .with_public_key(args.public_key_content.clone());
            orchestrator.remove_key(&target, &edit).await?;
            Ok(Report::Nothing)
        }
        Command::WaitForSsh(args) => {
            orchestrator.wait_for_ssh(&node_target(args, config)?).await?;
            Ok(Report::Nothing)
        }
        Command::Reboot(args) => {
            let target = node_target(&args.node, config)?;
            let request = RebootRequest {
                use_ssh: args.use_ssh,
            };
            orchestrator.reboot(&target, request).await?;
            Ok(Report::Nothing)
        }
        Command::ChangeInstanceType(args) => {
            let target = node_target(&args.node, config)?;
            let request = ChangeInstanceTypeRequest {
                instance_type: args.instance_type.clone(),
                force: args.force,
                pg_max_mem_mb: args.pg_max_mem_mb,
                air_gap: args.air_gap,
            };
            orchestrator.change_instance_type(&target, &request).await?;
            Ok(Report::Nothing)
        }
        Command::UpdateDisk(args) => {
            let target = node_target(&args.node, config)?;
            orchestrator.update_disk(&target, args.volume_size).await?;
            Ok(Report::Nothing)
        }
        Command::RunHooks(args) => {
            let target = node_target(&args.node, config)?;
            orchestrator.run_hooks(&target, &hook_request(args)?).await?;
            Ok(Report::Nothing)
        }
        Command::List(args) => {
            let listing = orchestrator.list(args.pattern.as_deref(), args.all).await?;
            Ok(Report::Listing {
                listing,
                as_json: args.as_json,
            })
        }
    }
}

fn node_target(args: &NodeArgs, config: &OpsConfig) -> Result<NodeTarget, OpsError> {
    let mut target = NodeTarget::new(args.search_pattern.clone(), config)
        .with_server_type(ServerType::new(args.server_type.clone()))
        .with_ssh2(args.ssh2_enabled)
        .with_tags(args.tags.clone());
    if let Some(user) = &args.ssh_user {
        target = target.with_ssh_user(user.clone());
    }
    if let Some(port) = args.custom_ssh_port {
        target = target.with_custom_ssh_port(port);
    }
    if let Some(key) = &args.private_key_file {
        target = target.with_private_key_file(Some(utf8_path(key)?));
    }
    target.skip_tags.clone_from(&args.skip_tags);
    for raw in &args.vars {
        let (key, value) = parse_key_value(raw)?;
        target = target.with_var(key, value);
    }
    Ok(target)
}

fn parse_key_value(raw: &str) -> Result<(String, String), OpsError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(OpsError::invalid(format!("expected KEY=VALUE, got {raw}"))),
    }
}

fn utf8_path(path: &Path) -> Result<Utf8PathBuf, OpsError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).map_err(|rejected| {
        OpsError::invalid(format!("path is not valid UTF-8: {}", rejected.display()))
    })
}

fn parse_json(flag: &str, raw: Option<&String>) -> Result<Option<Value>, OpsError> {
    raw.map(|text| {
        serde_json::from_str(text)
            .map_err(|err| OpsError::invalid(format!("--{flag} is not valid JSON: {err}")))
    })
    .transpose()
}

fn configure_request(args: &ConfigureCommand) -> Result<ConfigureRequest, OpsError> {
    let package_source = match (&args.itest_s3_package_path, args.download_source) {
        (Some(path), _) => PackageSource::ITest(path.clone()),
        (None, DownloadSource::Local) => PackageSource::LocalCopy,
        (None, DownloadSource::S3) => PackageSource::S3,
        (None, DownloadSource::Gcs) => PackageSource::Gcs,
        (None, DownloadSource::Http) => PackageSource::Http,
    };
    Ok(ConfigureRequest {
        master_addresses: args.master_addresses.clone(),
        master_addresses_for_master: args.master_addresses_for_master.clone(),
        server_broadcast_addresses: args.server_broadcast_addresses.clone(),
        process_type: args.process_type.as_deref().map(str::parse).transpose()?,
        package: args.package.clone(),
        package_source,
        gflags: parse_json("gflags", args.gflags.as_ref())?,
        extra_gflags: parse_json("extra-gflags", args.extra_gflags.as_ref())?,
        gflags_to_remove: parse_json("gflags-to-remove", args.gflags_to_remove.as_ref())?,
        aws_access_key: args.aws_access_key.clone(),
        aws_secret_key: args.aws_secret_key.clone(),
        gcs_credentials_json: args.gcs_credentials_json.clone(),
        http_package_checksum: args.http_package_checksum.clone(),
        install_third_party: args.install_third_party_packages,
        local_package_path: args.local_package_path.clone(),
        certificates: certificate_request(&args.certs)?,
    })
}

fn certificate_request(args: &CertArgs) -> Result<CertificateRequest, OpsError> {
    let mut dirs = CertDirs::default();
    if let Some(dir) = &args.certs_node_dir {
        dirs.node.clone_from(dir);
    }
    if let Some(dir) = &args.certs_client_server_dir {
        dirs.client_to_server.clone_from(dir);
    }
    if let Some(dir) = &args.certs_client_dir {
        dirs.client.clone_from(dir);
    }
    if let Some(dir) = &args.encryption_key_dir {
        dirs.encryption_keys.clone_from(dir);
    }

    let client = match (&args.client_cert_path, &args.client_key_path) {
        (Some(cert), Some(key)) => Some(ClientCertMaterial {
            cert: utf8_path(cert)?,
            key: utf8_path(key)?,
        }),
        _ => None,
    };

    let rotate_action: Option<CertRotateAction> =
        args.cert_rotate_action.as_deref().map(str::parse).transpose()?;
    let root_only = args.server_cert_path.is_none() && args.server_key_path.is_none();
    let (new_root_cert, node_to_node) = match (rotate_action, args.root_cert_path.as_deref()) {
        (Some(CertRotateAction::AppendNewRootCert), Some(root)) if root_only => {
            (Some(utf8_path(root)?), None)
        }
        _ => (
            None,
            server_material(
                "node-to-node",
                args.root_cert_path.as_deref(),
                args.server_cert_path.as_deref(),
                args.server_key_path.as_deref(),
            )?,
        ),
    };

    Ok(CertificateRequest {
        rotate_action,
        new_root_cert,
        node_to_node,
        client_to_server: server_material(
            "client-to-server",
            args.root_cert_path_client_server.as_deref(),
            args.server_cert_path_client_server.as_deref(),
            args.server_key_path_client_server.as_deref(),
        )?,
        client,
        encryption_key: args.encryption_key_source_file.as_deref().map(utf8_path).transpose()?,
        location: cert_location(args.certs_location),
        location_client_to_server: cert_location(args.certs_location_client_to_server),
        skip_validation: args.skip_cert_validation.as_deref().map(str::parse).transpose()?,
        dirs,
    })
}

const fn cert_location(location: CertsLocation) -> CertLocation {
    match location {
        CertsLocation::Local => CertLocation::Local,
        CertsLocation::Remote => CertLocation::Remote,
    }
}

fn server_material(
    domain: &str,
    root: Option<&Path>,
    cert: Option<&Path>,
    key: Option<&Path>,
) -> Result<Option<ServerCertMaterial>, OpsError> {
    match (root, cert, key) {
        (None, _, _) => Ok(None),
        (Some(root_cert), Some(server_cert), Some(server_key)) => Ok(Some(ServerCertMaterial {
            root_cert: utf8_path(root_cert)?,
            server_cert: utf8_path(server_cert)?,
            server_key: utf8_path(server_key)?,
        })),
        _ => Err(OpsError::invalid(format!(
            "{domain} certificates need a root certificate, server certificate, and server key"
        ))),
    }
}

fn hook_request(args: &RunHooksCommand) -> Result<HookRequest, OpsError> {
    let runtime_args = args
        .runtime_args
        .iter()
        .map(|raw| parse_key_value(raw))
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    let request = HookRequest {
        lang: args.execution_lang.parse()?,
        trigger: args.trigger.clone(),
        hook_path: utf8_path(&args.hook_path)?,
        parent_task: args.parent_task.clone(),
        use_sudo: args.use_sudo,
        runtime_args,
    };
    request.validate()?;
    Ok(request)
}

fn write_report(mut target: impl Write, report: &Report) -> Result<(), CliError> {
    let rendered = match report {
        Report::Nothing => return Ok(()),
        Report::Json(value) => render_json(value)?,
        Report::Listing {
            listing,
            as_json: true,
        } => {
            let value = listing
                .to_json()
                .map_err(|err| CliError::Output(err.to_string()))?;
            render_json(&value)?
        }
        Report::Listing { listing, .. } if listing.is_empty() => return Ok(()),
        Report::Listing { listing, .. } => listing.to_key_values(),
    };
    writeln!(target, "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn render_json(value: &Value) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use nodekeeper::test_support::{sample_host, test_config};
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args.iter().copied())
            .unwrap_or_else(|err| panic!("arguments should parse: {err}"))
    }

    #[rstest]
    #[case(
        OpsError::HostTimeout {
            target: String::from("db-n1"),
            endpoint: String::from("centos@10.0.0.5:22"),
        },
        EXIT_RECOVERABLE
    )]
    #[case(
        OpsError::HostNotFound {
            target: String::from("db-n1"),
        },
        1
    )]
    fn exit_code_reflects_error_kind(#[case] err: OpsError, #[case] expected: i32) {
        assert_eq!(CliError::Ops(err).exit_code(), expected);
    }

    #[test]
    fn config_errors_are_fatal() {
        assert_eq!(CliError::Config(String::from("bad")).exit_code(), 1);
    }

    #[test]
    fn node_target_applies_overrides() {
        let cli = parse(&[
            "nodekeeper",
            "provision",
            "db-n1",
            "--ssh-user",
            "ec2-user",
            "--custom-ssh-port",
            "2222",
            "--private-key-file",
            "/keys/db.pem",
            "--var",
            "region=us-west-2",
            "--skip-tags",
            "slow",
        ]);
        let Command::Provision(args) = cli.command else {
            panic!("expected provision");
        };
        let target = node_target(&args.node, &test_config())
            .unwrap_or_else(|err| panic!("target: {err}"));
        assert_eq!(target.name, "db-n1");
        assert_eq!(target.ssh_user, "ec2-user");
        assert_eq!(target.custom_ssh_port, 2222);
        assert_eq!(
            target.private_key_file.as_deref().map(|key| key.as_str()),
            Some("/keys/db.pem")
        );
        assert_eq!(target.skip_tags.as_deref(), Some("slow"));
        assert_eq!(target.extra_vars.get("region"), Some(&json!("us-west-2")));
    }

    #[test]
    fn node_target_defaults_come_from_config() {
        let cli = parse(&["nodekeeper", "wait-for-ssh", "db-n1"]);
        let Command::WaitForSsh(args) = cli.command else {
            panic!("expected wait-for-ssh");
        };
        let config = test_config();
        let target = node_target(&args, &config).unwrap_or_else(|err| panic!("target: {err}"));
        assert_eq!(target.ssh_user, config.default_ssh_user);
        assert_eq!(target.custom_ssh_port, config.default_ssh_port);
        assert!(target.server_type.is_cluster());
    }

    #[rstest]
    #[case("novalue")]
    #[case("=value")]
    fn rejects_malformed_key_values(#[case] raw: &str) {
        let Err(err) = parse_key_value(raw) else {
            panic!("{raw} should be rejected");
        };
        assert!(err.to_string().contains("KEY=VALUE"), "error: {err}");
    }

    #[test]
    fn configure_request_maps_certificate_flags() {
        let cli = parse(&[
            "nodekeeper",
            "configure",
            "db-n1",
            "--cert-rotate-action",
            "ROTATE_CERTS",
            "--root-cert-path",
            "/certs/ca.crt",
            "--server-cert-path",
            "/certs/node.crt",
            "--server-key-path",
            "/certs/node.key",
            "--certs-location",
            "remote",
            "--certs-node-dir",
            "/data/tls",
            "--gflags",
            r#"{"max_log_size": 256}"#,
        ]);
        let Command::Configure(args) = cli.command else {
            panic!("expected configure");
        };
        let request = configure_request(&args).unwrap_or_else(|err| panic!("request: {err}"));
        let certs = &request.certificates;
        assert_eq!(certs.rotate_action, Some(CertRotateAction::RotateCerts));
        assert_eq!(certs.location, CertLocation::Remote);
        assert_eq!(certs.dirs.node, "/data/tls");
        assert_eq!(
            certs.node_to_node.as_ref().map(|material| material.server_key.as_str()),
            Some("/certs/node.key")
        );
        assert!(certs.client_to_server.is_none());
        assert_eq!(request.gflags, Some(json!({"max_log_size": 256})));
        assert_eq!(request.package_source, PackageSource::LocalCopy);
    }

    #[test]
    fn configure_request_appends_a_standalone_root() {
        let cli = parse(&[
            "nodekeeper",
            "configure",
            "db-n1",
            "--cert-rotate-action",
            "APPEND_NEW_ROOT_CERT",
            "--root-cert-path",
            "/certs/new-ca.crt",
        ]);
        let Command::Configure(args) = cli.command else {
            panic!("expected configure");
        };
        let request = configure_request(&args).unwrap_or_else(|err| panic!("request: {err}"));
        let certs = &request.certificates;
        assert_eq!(certs.rotate_action, Some(CertRotateAction::AppendNewRootCert));
        assert_eq!(
            certs.new_root_cert.as_ref().map(|p| p.as_str()),
            Some("/certs/new-ca.crt")
        );
        assert!(certs.node_to_node.is_none());
        assert!(certs.validate().is_ok());
    }

    #[test]
    fn configure_request_rejects_a_root_alone_outside_append() {
        let cli = parse(&[
            "nodekeeper",
            "configure",
            "db-n1",
            "--cert-rotate-action",
            "ROTATE_CERTS",
            "--root-cert-path",
            "/certs/new-ca.crt",
        ]);
        let Command::Configure(args) = cli.command else {
            panic!("expected configure");
        };
        let Err(err) = configure_request(&args) else {
            panic!("a root without server material cannot be rotated in");
        };
        assert!(err.to_string().contains("node-to-node"), "error: {err}");
    }

    #[test]
    fn configure_request_maps_location_per_trust_domain() {
        let cli = parse(&[
            "nodekeeper",
            "configure",
            "db-n1",
            "--root-cert-path",
            "/certs/ca.crt",
            "--server-cert-path",
            "/certs/node.crt",
            "--server-key-path",
            "/certs/node.key",
            "--root-cert-path-client-server",
            "/certs/c2s/ca.crt",
            "--server-cert-path-client-server",
            "/certs/c2s/node.crt",
            "--server-key-path-client-server",
            "/certs/c2s/node.key",
            "--certs-location-client-to-server",
            "remote",
        ]);
        let Command::Configure(args) = cli.command else {
            panic!("expected configure");
        };
        let request = configure_request(&args).unwrap_or_else(|err| panic!("request: {err}"));
        let certs = &request.certificates;
        assert_eq!(certs.location, CertLocation::Local);
        assert_eq!(certs.location_client_to_server, CertLocation::Remote);
    }

    #[test]
    fn configure_request_prefers_itest_path() {
        let cli = parse(&[
            "nodekeeper",
            "configure",
            "db-n1",
            "--itest-s3-package-path",
            "s3://builds/db.tar.gz",
        ]);
        let Command::Configure(args) = cli.command else {
            panic!("expected configure");
        };
        let request = configure_request(&args).unwrap_or_else(|err| panic!("request: {err}"));
        assert_eq!(
            request.package_source,
            PackageSource::ITest(String::from("s3://builds/db.tar.gz"))
        );
    }

    #[test]
    fn configure_request_rejects_invalid_json() {
        let cli = parse(&["nodekeeper", "configure", "db-n1", "--extra-gflags", "{oops"]);
        let Command::Configure(args) = cli.command else {
            panic!("expected configure");
        };
        let Err(err) = configure_request(&args) else {
            panic!("invalid JSON should be rejected");
        };
        assert!(err.to_string().contains("--extra-gflags"), "error: {err}");
    }

    #[test]
    fn hook_request_collects_runtime_args() {
        let cli = parse(&[
            "nodekeeper",
            "run-hooks",
            "db-n1",
            "--execution-lang",
            "Python",
            "--trigger",
            "PostNodeProvision",
            "--hook-path",
            "/hooks/tune.py",
            "--parent-task",
            "CreateUniverse",
            "--runtime-arg",
            "mode=fast",
        ]);
        let Command::RunHooks(args) = cli.command else {
            panic!("expected run-hooks");
        };
        let request = hook_request(&args).unwrap_or_else(|err| panic!("request: {err}"));
        assert_eq!(request.runtime_args.get("mode").map(String::as_str), Some("fast"));
        assert_eq!(request.hook_path.as_str(), "/hooks/tune.py");
    }

    #[test]
    fn hook_request_rejects_unsafe_runtime_arg_key() {
        let cli = parse(&[
            "nodekeeper",
            "run-hooks",
            "db-n1",
            "--execution-lang",
            "Bash",
            "--trigger",
            "PostNodeProvision",
            "--hook-path",
            "/hooks/tune.sh",
            "--parent-task",
            "CreateUniverse",
            "--runtime-arg",
            "x;reboot=1",
        ]);
        let Command::RunHooks(args) = cli.command else {
            panic!("expected run-hooks");
        };
        let Err(err) = hook_request(&args) else {
            panic!("a key with shell metacharacters must be rejected");
        };
        assert!(matches!(err, OpsError::InvalidRequest { .. }), "got {err:?}");
    }

    #[test]
    fn key_value_listing_is_written_without_json() {
        let mut buf = Vec::new();
        let report = Report::Listing {
            listing: HostListing::Single(Some(sample_host("db-n1", true))),
            as_json: false,
        };
        write_report(&mut buf, &report).unwrap_or_else(|err| panic!("write: {err}"));
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(rendered.contains("name=db-n1"), "rendered: {rendered}");
    }

    #[test]
    fn empty_listing_writes_nothing() {
        let mut buf = Vec::new();
        let report = Report::Listing {
            listing: HostListing::Single(None),
            as_json: false,
        };
        write_report(&mut buf, &report).unwrap_or_else(|err| panic!("write: {err}"));
        assert!(buf.is_empty());
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::Config(String::from("missing executor_bin")));
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(
            rendered.contains("configuration error: missing executor_bin"),
            "rendered: {rendered}"
        );
    }
}
