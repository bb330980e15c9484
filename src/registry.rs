use crate::error::ClientError;
use aws_config::BehaviorVersion;
use aws_sdk_ecr::Client;
use aws_sdk_ecr::config::Region;
use aws_sdk_ecr::error::SdkError;
use aws_sdk_ecr::operation::describe_images::DescribeImagesError;
use tracing::{debug, info};

/// All tags currently pointing at one image digest, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDetail {
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ImagePage {
    pub images: Vec<ImageDetail>,
    pub next_token: Option<String>,
}

pub trait RegistryClient {
    /// Fetches one page of image details for `repository`.
    async fn describe_images_page(
        &self,
        repository: &str,
        next_token: Option<String>,
    ) -> Result<ImagePage, ClientError>;

    /// Fetches every image detail of `repository`, following continuation tokens
    /// until the registry stops returning one.
    async fn list_image_details(&self, repository: &str) -> Result<Vec<ImageDetail>, ClientError> {
        let mut images = Vec::new();
        let mut next_token = None;
        let mut pages = 0usize;
        loop {
            let page = self.describe_images_page(repository, next_token).await?;
            pages += 1;
            images.extend(page.images);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        debug!(
            "Fetched {} image details in {} pages from repository {}",
            images.len(),
            pages,
            repository
        );
        Ok(images)
    }
}

/// Returns the first image carrying `marker_tag`.
pub fn find_marker_image<'a>(
    images: &'a [ImageDetail],
    marker_tag: &str,
) -> Option<&'a ImageDetail> {
    images
        .iter()
        .find(|image| image.tags.iter().any(|tag| tag == marker_tag))
}

pub struct EcrRegistryClient {
    client: Client,
}

pub async fn create_client(region: &str) -> EcrRegistryClient {
    info!("Initializing ECR client for region {}", region);
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;
    EcrRegistryClient {
        client: Client::new(&config),
    }
}

impl RegistryClient for EcrRegistryClient {
    async fn describe_images_page(
        &self,
        repository: &str,
        next_token: Option<String>,
    ) -> Result<ImagePage, ClientError> {
        debug!("Describing images of repository {}", repository);
        let output = self
            .client
            .describe_images()
            .repository_name(repository)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|err| classify_sdk_error(repository, err))?;

        let images = output
            .image_details()
            .iter()
            .map(|detail| ImageDetail {
                tags: detail.image_tags().to_vec(),
            })
            .collect();

        Ok(ImagePage {
            images,
            next_token: output.next_token().map(str::to_string),
        })
    }
}

fn classify_sdk_error(repository: &str, err: SdkError<DescribeImagesError>) -> ClientError {
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(service_err) => match service_err.err() {
            DescribeImagesError::RepositoryNotFoundException(_) => {
                return ClientError::NotFound(format!("repository {}", repository));
            }
            DescribeImagesError::ServerException(_) => true,
            _ => false,
        },
        _ => false,
    };

    match transient {
        true => ClientError::Transient(Box::new(err)),
        false => ClientError::Permanent(Box::new(err)),
    }
}
