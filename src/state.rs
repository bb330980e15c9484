use crate::config::{Config, ServiceRef};
use crate::error::ServiceError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct RunContext<C, R> {
    pub(crate) config: Config,
    pub(crate) cluster: C,
    pub(crate) registry: R,
    pub(crate) cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutcome {
    Unchanged {
        image: String,
    },
    Updated {
        previous_image: String,
        new_image: String,
        dry_run: bool,
    },
}

#[derive(Debug)]
pub struct ServiceReport {
    pub(crate) service: ServiceRef,
    pub(crate) result: Result<ServiceOutcome, ServiceError>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub(crate) reports: Vec<ServiceReport>,
    /// Services never started because an earlier one failed in fail-fast mode.
    pub(crate) skipped: usize,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.skipped > 0 || self.reports.iter().any(|r| r.result.is_err())
    }

    #[cfg(test)]
    pub fn find(&self, service: &ServiceRef) -> Option<&ServiceReport> {
        self.reports.iter().find(|r| &r.service == service)
    }

    pub fn log_summary(&self) {
        let mut unchanged = 0;
        let mut updated = 0;
        let mut failed = 0;
        for report in &self.reports {
            let namespace = report.service.namespace.as_str();
            let name = report.service.name.as_str();
            match &report.result {
                Ok(ServiceOutcome::Unchanged { image }) => {
                    unchanged += 1;
                    info!(
                        service_namespace = namespace,
                        service_name = name,
                        "Service is up to date on image {}",
                        image
                    );
                }
                Ok(ServiceOutcome::Updated {
                    previous_image,
                    new_image,
                    dry_run,
                }) => {
                    updated += 1;
                    info!(
                        service_namespace = namespace,
                        service_name = name,
                        dry_run,
                        "Service moved from image {} to {}",
                        previous_image,
                        new_image
                    );
                }
                Err(err) => {
                    failed += 1;
                    error!(
                        service_namespace = namespace,
                        service_name = name,
                        "Service failed: {}",
                        error_chain(err)
                    );
                }
            }
        }
        info!(
            unchanged,
            updated,
            failed,
            skipped = self.skipped,
            "Finished reconciling {} services",
            self.reports.len() + self.skipped
        );
    }
}

/// Renders an error followed by each of its sources.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
