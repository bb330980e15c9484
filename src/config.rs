use crate::cli::Cli;
use crate::error::ServiceError;
use crate::tags::{DEFAULT_EXCLUDED_TAGS, TagFilter, TagSelection};
use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use std::{env, fmt, fs, path::Path, path::PathBuf, str::FromStr};
use tracing::{info, warn};

static DEFAULT_MARKER_TAG: &str = "latest";
static DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_MAX_RETRIES: u32 = 2;

/// A deployment to keep up to date, identified as `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl FromStr for ServiceRef {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ServiceError::InvalidServiceSpec {
            spec: s.to_string(),
        };
        let (namespace, name) = s.trim().split_once('/').ok_or_else(invalid)?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        Ok(ServiceRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterConnection {
    InCluster,
    Kubeconfig {
        path: Option<PathBuf>,
        context: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Optional YAML configuration file. Every field may also be given on the command line,
/// in which case the command line value replaces the file value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub services: Vec<String>,
    pub tag: Option<String>,
    pub region: Option<String>,
    pub in_cluster: Option<bool>,
    pub kubeconfig: Option<PathBuf>,
    pub kube_context: Option<String>,
    pub excluded_tags: Option<Vec<String>>,
    pub tag_selection: Option<TagSelection>,
    pub concurrency: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub fail_fast: Option<bool>,
    pub dry_run: Option<bool>,
}

/// Immutable settings for one run, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub services: Vec<ServiceRef>,
    pub marker_tag: String,
    pub region: String,
    pub cluster: ClusterConnection,
    pub tag_filter: TagFilter,
    pub tag_selection: TagSelection,
    pub concurrency: usize,
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub fail_fast: bool,
    pub dry_run: bool,
}

impl Config {
    /// Builds the run configuration from command line flags, falling back to the
    /// optional config file and then to defaults.
    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Config> {
        let specs = match cli.services.is_empty() {
            true => &file.services,
            false => &cli.services,
        };
        let mut services = Vec::new();
        let mut seen = BTreeSet::new();
        for spec in specs {
            let service: ServiceRef = spec.parse()?;
            if seen.insert(service.clone()) {
                services.push(service);
            } else {
                warn!("Ignoring duplicate service {}", service);
            }
        }
        if services.is_empty() {
            bail!("services must not be empty");
        }

        let marker_tag = cli
            .tag
            .clone()
            .or(file.tag)
            .unwrap_or_else(|| DEFAULT_MARKER_TAG.to_string());
        if marker_tag.is_empty() {
            bail!("tag must not be empty");
        }

        let region = cli
            .region
            .clone()
            .or(file.region)
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        if region.is_empty() {
            bail!("region must not be empty");
        }

        let cluster = match cli.in_cluster.or(file.in_cluster).unwrap_or(true) {
            true => ClusterConnection::InCluster,
            false => ClusterConnection::Kubeconfig {
                path: cli.kubeconfig.clone().or(file.kubeconfig),
                context: cli.kube_context.clone().or(file.kube_context),
            },
        };

        let excluded = if !cli.exclude_tags.is_empty() {
            cli.exclude_tags.clone()
        } else if let Some(tags) = file.excluded_tags {
            tags
        } else {
            DEFAULT_EXCLUDED_TAGS.iter().map(|t| t.to_string()).collect()
        };
        // the marker itself moves between builds
        let tag_filter = TagFilter::new(excluded).with_excluded(marker_tag.clone());

        let concurrency = cli.concurrency.or(file.concurrency).unwrap_or(1);
        if concurrency == 0 {
            bail!("concurrency must be at least 1");
        }

        Ok(Config {
            services,
            marker_tag,
            region,
            cluster,
            tag_filter,
            tag_selection: cli.tag_selection.or(file.tag_selection).unwrap_or_default(),
            concurrency,
            timeout: cli
                .timeout
                .or(file.timeout_seconds)
                .map(Duration::from_secs),
            max_retries: cli
                .max_retries
                .or(file.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            fail_fast: cli.fail_fast.or(file.fail_fast).unwrap_or(false),
            dry_run: cli.dry_run.or(file.dry_run).unwrap_or(false),
        })
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FileConfig> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming the first missing variable.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    if let Some(missing) = re
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .find(|name| env::var(name).is_err())
    {
        bail!("Missing environment variable: {}", missing);
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn cli_with_services(services: &[&str]) -> Cli {
        Cli {
            services: services.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_service_ref() {
        let service: ServiceRef = "apps/api".parse().expect("Should parse");
        assert_eq!(service.namespace, "apps");
        assert_eq!(service.name, "api");
        assert_eq!(service.to_string(), "apps/api");
    }

    #[test]
    fn test_parse_service_ref_invalid() {
        for spec in ["api", "apps/", "/api", "apps/api/extra", ""] {
            let err = spec.parse::<ServiceRef>().unwrap_err();
            assert!(
                matches!(err, ServiceError::InvalidServiceSpec { spec: ref rejected } if rejected == spec),
                "{spec:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let cli = cli_with_services(&["apps/api"]);
        let config = Config::resolve(&cli, FileConfig::default()).expect("Should resolve");

        assert_eq!(config.marker_tag, "latest");
        assert_eq!(config.cluster, ClusterConnection::InCluster);
        assert_eq!(config.tag_selection, TagSelection::Lexicographic);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert!(config.timeout.is_none());
        assert!(config.tag_filter.is_excluded("staging"));
        assert!(!config.fail_fast);
    }

    #[test]
    fn test_resolve_marker_tag_is_excluded() {
        let mut cli = cli_with_services(&["apps/api"]);
        cli.tag = Some("release".to_string());
        cli.exclude_tags = vec!["edge".to_string()];
        let config = Config::resolve(&cli, FileConfig::default()).unwrap();

        assert!(config.tag_filter.is_excluded("release"));
        assert!(config.tag_filter.is_excluded("edge"));
        assert!(!config.tag_filter.is_excluded("latest"));
    }

    #[test]
    fn test_resolve_deduplicates_services() {
        let cli = cli_with_services(&["apps/api", "apps/worker", "apps/api"]);
        let config = Config::resolve(&cli, FileConfig::default()).unwrap();
        assert_eq!(config.services.len(), 2);
    }

    #[test]
    fn test_resolve_rejects_empty_services() {
        let err = Config::resolve(&Cli::default(), FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("services must not be empty"));
    }

    #[test]
    fn test_resolve_rejects_malformed_service() {
        let cli = cli_with_services(&["apps-api"]);
        assert!(Config::resolve(&cli, FileConfig::default()).is_err());
    }

    #[test]
    fn test_resolve_cli_overrides_file() {
        let mut cli = cli_with_services(&["apps/api"]);
        cli.in_cluster = Some(false);
        cli.kube_context = Some("prod-eks".to_string());
        let file = FileConfig {
            services: vec!["jobs/cron".to_string()],
            tag: Some("promote".to_string()),
            in_cluster: Some(true),
            kubeconfig: Some(PathBuf::from("/etc/kube/config")),
            kube_context: Some("staging-eks".to_string()),
            concurrency: Some(4),
            ..Default::default()
        };
        let config = Config::resolve(&cli, file).unwrap();

        assert_eq!(config.services, vec!["apps/api".parse::<ServiceRef>().unwrap()]);
        assert_eq!(config.marker_tag, "promote");
        assert_eq!(config.concurrency, 4);
        assert_eq!(
            config.cluster,
            ClusterConnection::Kubeconfig {
                path: Some(PathBuf::from("/etc/kube/config")),
                context: Some("prod-eks".to_string()),
            }
        );
    }

    #[test]
    fn test_resolve_cli_switches_override_file() {
        let file = || FileConfig {
            services: vec!["jobs/cron".to_string()],
            fail_fast: Some(true),
            dry_run: Some(true),
            ..Default::default()
        };

        let config = Config::resolve(&Cli::default(), file()).unwrap();
        assert_eq!(config.services, vec!["jobs/cron".parse::<ServiceRef>().unwrap()]);
        assert!(config.fail_fast);
        assert!(config.dry_run);

        let cli = Cli {
            fail_fast: Some(false),
            dry_run: Some(false),
            ..Default::default()
        };
        let config = Config::resolve(&cli, file()).unwrap();
        assert!(!config.fail_fast);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_expand_env_vars_success() {
        unsafe {
            env::set_var("EIU_TEST_VAR", "value123");
        }
        let input = "This is a test: ${EIU_TEST_VAR}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "This is a test: value123");
        unsafe {
            env::remove_var("EIU_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_missing_var() {
        let input = "This will fail: ${EIU_MISSING_VAR}";
        let err = expand_env_vars(input).unwrap_err();
        assert_eq!(err.to_string(), "Missing environment variable: EIU_MISSING_VAR");
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "No variables here";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, input);
    }

    #[test]
    fn test_load_config_file() {
        unsafe {
            env::set_var("EIU_TEST_REGION", "eu-west-1");
        }
        let yaml_content = r#"
        services:
          - apps/api
          - apps/worker
        tag: release
        region: ${EIU_TEST_REGION}
        inCluster: false
        kubeContext: dev
        excludedTags: [latest, canary]
        tagSelection: registry-order
        timeoutSeconds: 120
        failFast: true
        "#;

        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        let path = tmp_file.path();
        fs::write(path, yaml_content).expect("Failed to write to temp file");

        let file = load_config(path).expect("Should load config");
        unsafe {
            env::remove_var("EIU_TEST_REGION");
        }

        assert_eq!(file.services, vec!["apps/api", "apps/worker"]);
        assert_eq!(file.region.as_deref(), Some("eu-west-1"));
        assert_eq!(file.in_cluster, Some(false));
        assert_eq!(file.tag_selection, Some(TagSelection::RegistryOrder));
        assert_eq!(file.timeout_seconds, Some(120));
        assert_eq!(file.fail_fast, Some(true));
        assert_eq!(file.dry_run, None);

        let config = Config::resolve(&Cli::default(), file).expect("Should resolve");
        assert_eq!(config.timeout, Some(Duration::from_secs(120)));
        assert!(config.tag_filter.is_excluded("canary"));
        assert!(config.tag_filter.is_excluded("release"));
    }

    #[test]
    fn test_load_config_rejects_unknown_fields() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(tmp_file.path(), "servics: [apps/api]\n").unwrap();
        assert!(load_config(tmp_file.path()).is_err());
    }
}
