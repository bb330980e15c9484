use crate::image_reference::{ImageReference, ParseError};
use crate::registry::ImageDetail;
use crate::tags::{NoValidTagError, TagFilter, TagSelection};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    Unchanged,
    Updated { new_reference: ImageReference },
    Failed(DecisionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    #[error("image {image} of container {container} is unparsable: {source}")]
    ImageReferenceUnparsable {
        container: String,
        image: String,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    NoValidTag(#[from] NoValidTagError),
}

/// Decides whether `current_image` must move to one of the tags of `image_detail`.
///
/// A current tag that is any member of the image's tag set counts as up to date.
pub fn reconcile(
    current_image: &str,
    container_name: &str,
    image_detail: &ImageDetail,
    filter: &TagFilter,
    selection: TagSelection,
) -> ReconciliationOutcome {
    let current = match ImageReference::parse(current_image) {
        Ok(reference) => reference,
        Err(source) => {
            return ReconciliationOutcome::Failed(DecisionError::ImageReferenceUnparsable {
                container: container_name.to_string(),
                image: current_image.to_string(),
                source,
            });
        }
    };

    if image_detail.tags.contains(&current.tag) {
        debug!(
            "Container {} already runs tag {} of the target image",
            container_name, current.tag
        );
        return ReconciliationOutcome::Unchanged;
    }

    match filter.select_tag(&image_detail.tags, selection) {
        Ok(tag) => ReconciliationOutcome::Updated {
            new_reference: current.with_tag(&tag),
        },
        Err(err) => ReconciliationOutcome::Failed(err.into()),
    }
}
