use crate::cluster::ClusterClient;
use crate::config::ServiceRef;
use crate::error::{ClientError, ServiceError};
use crate::image_reference::ImageReference;
use crate::reconcile::{DecisionError, ReconciliationOutcome, reconcile};
use crate::registry::{RegistryClient, find_marker_image};
use crate::retry::retry_transient;
use crate::state::{RunContext, RunReport, ServiceOutcome, ServiceReport};
use futures::StreamExt;
use futures::stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reconciles every configured service once and collects the per-service results.
pub async fn run<C: ClusterClient, R: RegistryClient>(ctx: &RunContext<C, R>) -> RunReport {
    let services = &ctx.config.services;
    info!(
        "Reconciling {} services against marker tag {}",
        services.len(),
        ctx.config.marker_tag
    );
    debug!(
        "Never promoting tags {:?}",
        ctx.config.tag_filter.excluded().collect::<Vec<_>>()
    );

    // Set on the first failure with fail-fast; services admitted afterwards are skipped
    // while services already started run to completion.
    let stopped = AtomicBool::new(false);
    let stopped = &stopped;
    let mut results = stream::iter(services.iter())
        .map(|service| {
            let admitted = !stopped.load(Ordering::SeqCst);
            async move {
                match admitted {
                    true => Some(ServiceReport {
                        service: service.clone(),
                        result: process_service_cancellable(ctx, service).await,
                    }),
                    false => None,
                }
            }
        })
        .buffer_unordered(ctx.config.concurrency);

    let mut report = RunReport::default();
    while let Some(service_report) = results.next().await {
        let Some(service_report) = service_report else {
            report.skipped += 1;
            continue;
        };
        let failed = service_report.result.is_err();
        report.reports.push(service_report);

        if failed && ctx.config.fail_fast && !stopped.swap(true, Ordering::SeqCst) {
            warn!("Stopping after first failed service, waiting for started services");
        }
    }

    report
}

async fn process_service_cancellable<C: ClusterClient, R: RegistryClient>(
    ctx: &RunContext<C, R>,
    service: &ServiceRef,
) -> Result<ServiceOutcome, ServiceError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(ServiceError::Cancelled {
            service: service.clone(),
        }),
        result = process_service(ctx, service) => result,
    }
}

async fn process_service<C: ClusterClient, R: RegistryClient>(
    ctx: &RunContext<C, R>,
    service: &ServiceRef,
) -> Result<ServiceOutcome, ServiceError> {
    let config = &ctx.config;
    let cluster = &ctx.cluster;
    let registry = &ctx.registry;
    let namespace = service.namespace.as_str();
    let name = service.name.as_str();

    info!(
        service_namespace = namespace,
        service_name = name,
        "Fetching images for service"
    );

    let mut deployment = retry_transient(
        &format!("get deployment {}", service),
        config.max_retries,
        move || cluster.get_deployment(namespace, name),
    )
    .await
    .map_err(|source| match source {
        ClientError::NotFound(_) => ServiceError::DeploymentNotFound {
            service: service.clone(),
        },
        source => ServiceError::DeploymentLookupFailed {
            service: service.clone(),
            source,
        },
    })?;

    let current_image = deployment
        .container(name)
        .map(|container| container.image.clone())
        .ok_or_else(|| ServiceError::ContainerNotFound {
            service: service.clone(),
            containers: deployment.container_names(),
        })?;

    let current = ImageReference::parse(&current_image).map_err(|source| {
        ServiceError::ImageReferenceUnparsable {
            service: service.clone(),
            image: current_image.clone(),
            source,
        }
    })?;

    info!(
        service_namespace = namespace,
        service_name = name,
        image_name = %current.repository_name,
        container_image = %current_image,
        "Parsed image name from image"
    );

    let repository = current.repository_name.as_str();
    let images = retry_transient(
        &format!("list images of repository {}", repository),
        config.max_retries,
        move || registry.list_image_details(repository),
    )
    .await
    .map_err(|source| ServiceError::RegistryLookupFailed {
        service: service.clone(),
        repository: repository.to_string(),
        source,
    })?;

    let target = find_marker_image(&images, &config.marker_tag).ok_or_else(|| {
        ServiceError::MarkerImageNotFound {
            service: service.clone(),
            repository: repository.to_string(),
            marker: config.marker_tag.clone(),
        }
    })?;

    info!(
        service_namespace = namespace,
        service_name = name,
        target_image_tags = ?target.tags,
        "Latest tags for service"
    );

    let new_reference = match reconcile(
        &current_image,
        name,
        target,
        &config.tag_filter,
        config.tag_selection,
    ) {
        ReconciliationOutcome::Unchanged => {
            info!(
                service_namespace = namespace,
                service_name = name,
                current_tag = %current.tag,
                "Service tag has not changed"
            );
            return Ok(ServiceOutcome::Unchanged {
                image: current_image,
            });
        }
        ReconciliationOutcome::Failed(DecisionError::NoValidTag(err)) => {
            return Err(ServiceError::NoValidTag {
                service: service.clone(),
                tags: err.tags,
            });
        }
        ReconciliationOutcome::Failed(DecisionError::ImageReferenceUnparsable {
            image,
            source,
            ..
        }) => {
            return Err(ServiceError::ImageReferenceUnparsable {
                service: service.clone(),
                image,
                source,
            });
        }
        ReconciliationOutcome::Updated { new_reference } => new_reference,
    };

    let new_image = new_reference.to_string();
    info!(
        service_namespace = namespace,
        service_name = name,
        current_tag = %current.tag,
        new_tag = %new_reference.tag,
        latest_tags = ?target.tags,
        "Service tag has changed"
    );

    if config.dry_run {
        info!(
            service_namespace = namespace,
            service_name = name,
            "Dry run, not updating deployment to image {}",
            new_image
        );
        return Ok(ServiceOutcome::Updated {
            previous_image: current_image,
            new_image,
            dry_run: true,
        });
    }

    if let Some(container) = deployment.container_mut(name) {
        container.image = new_image.clone();
    }
    let spec = &deployment;
    let previous_image = current_image.as_str();
    retry_transient(
        &format!("update deployment {}", service),
        config.max_retries,
        move || cluster.update_deployment(namespace, name, spec, previous_image),
    )
    .await
    .map_err(|source| ServiceError::DeploymentUpdateFailed {
        service: service.clone(),
        image: new_image.clone(),
        source,
    })?;

    info!(
        service_namespace = namespace,
        service_name = name,
        previous_tag = %current.tag,
        new_tag = %new_reference.tag,
        "Updated service tag"
    );

    Ok(ServiceOutcome::Updated {
        previous_image: current_image,
        new_image,
        dry_run: false,
    })
}

/// Cancels `cancel` on Ctrl-C or once `timeout` has elapsed, whichever comes first.
pub fn cancel_on_interrupt_or_timeout(cancel: CancellationToken, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interrupted(tokio::signal::ctrl_c()) => warn!("Received interrupt, cancelling run"),
            _ = deadline => warn!("Run exceeded timeout of {:?}, cancelling", timeout.unwrap_or_default()),
        }
        cancel.cancel();
    });
}

/// Resolves once `signal` reports an interrupt. Never resolves if listening failed.
async fn interrupted(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(err) = signal.await {
        warn!("Failed to listen for interrupt signal: {}", err);
        std::future::pending::<()>().await;
    }
}
