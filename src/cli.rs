use crate::config::LogFormat;
use crate::tags::TagSelection;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Promote Kubernetes deployments to the newest tagged image in AWS ECR.
#[derive(Debug, Default, Parser)]
#[command(name = "eks-image-updater")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Comma separated list of namespace/name services to update; may be repeated.
    /// Replaces the services of the config file.
    #[arg(long, value_delimiter = ',', action = ArgAction::Append)]
    pub services: Vec<String>,

    /// Tag that marks the image to promote to your deployments [default: latest]
    #[arg(long)]
    pub tag: Option<String>,

    /// AWS region of the ECR registry [default: us-east-1]
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Set to false when running outside of a Kubernetes cluster [default: true]
    #[arg(long, action = ArgAction::Set)]
    pub in_cluster: Option<bool>,

    /// Path to the kubeconfig file, used when not running in-cluster.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Name of the kubeconfig context to use.
    #[arg(long)]
    pub kube_context: Option<String>,

    /// Log level or tracing filter directive.
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// YAML configuration file; command line flags take precedence over it.
    #[arg(long, env = "EKS_IMAGE_UPDATER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Tag that is never promoted into a deployment; may be repeated. Replaces the default set.
    #[arg(long = "exclude-tag", value_delimiter = ',', action = ArgAction::Append)]
    pub exclude_tags: Vec<String>,

    /// How to choose among several promotable tags of the target image.
    #[arg(long, value_enum)]
    pub tag_selection: Option<TagSelection>,

    /// Number of services processed at the same time [default: 1]
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Overall time limit for the run in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Retries for transient registry and cluster errors [default: 2]
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Stop starting services after the first failure; `--fail-fast=false` overrides the config file.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub fail_fast: Option<bool>,

    /// Decide and log updates without patching any deployment; `--dry-run=false` overrides the config file.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub dry_run: Option<bool>,
}
