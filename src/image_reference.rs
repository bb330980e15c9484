use std::fmt;

/// A container image reference of the form `registry/path/name:tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Everything before the final `:`, e.g. `123.dkr.ecr.us-east-1.amazonaws.com/svc`.
    pub repository_path: String,
    /// The path segment after the final `/`, used as the ECR repository name.
    pub repository_name: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    MissingRepositoryName,
    MissingTag,
    DigestNotAllowed,
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::DigestNotAllowed => write!(f, "digest references are not allowed"),
            ParseError::MissingRepositoryName => write!(f, "repository name is missing"),
            ParseError::MissingTag => write!(f, "tag is missing"),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository_path, self.tag)
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        // digest references carry no tag position to substitute into
        if s.contains('@') {
            return Err(ParseError::DigestNotAllowed);
        }

        let last_slash = s.rfind('/').ok_or(ParseError::MissingRepositoryName)?;

        // Must contain a tag (colon after last slash)
        let colon = s[last_slash + 1..]
            .rfind(':')
            .map(|pos| last_slash + 1 + pos)
            .ok_or(ParseError::MissingTag)?;

        let repository_path = &s[..colon];
        let repository_name = &s[last_slash + 1..colon];
        let tag = &s[colon + 1..];

        if repository_name.is_empty() {
            return Err(ParseError::MissingRepositoryName);
        }
        if tag.is_empty() {
            return Err(ParseError::MissingTag);
        }

        Ok(Self {
            repository_path: repository_path.to_string(),
            repository_name: repository_name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Returns a copy of this reference pointing at `tag`. Only the tag position
    /// changes; the registry host and path are kept verbatim.
    pub fn with_tag(&self, tag: &str) -> ImageReference {
        ImageReference {
            repository_path: self.repository_path.clone(),
            repository_name: self.repository_name.clone(),
            tag: tag.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECR_IMAGE: &str = "123.dkr.ecr.us-east-1.amazonaws.com/svc:v41";

    #[test]
    fn test_parse_ecr_reference() {
        let reference = ImageReference::parse(ECR_IMAGE).expect("Should parse");
        assert_eq!(
            reference.repository_path,
            "123.dkr.ecr.us-east-1.amazonaws.com/svc"
        );
        assert_eq!(reference.repository_name, "svc");
        assert_eq!(reference.tag, "v41");
        assert_eq!(reference.to_string(), ECR_IMAGE);
    }

    #[test]
    fn test_parse_registry_with_port() {
        let reference = ImageReference::parse("localhost:5000/team/api:1.2.3").unwrap();
        assert_eq!(reference.repository_path, "localhost:5000/team/api");
        assert_eq!(reference.repository_name, "api");
        assert_eq!(reference.tag, "1.2.3");
    }

    #[test]
    fn test_parse_missing_tag() {
        assert_eq!(
            ImageReference::parse("localhost:5000/team/api"),
            Err(ParseError::MissingTag)
        );
        assert_eq!(
            ImageReference::parse("registry/api:"),
            Err(ParseError::MissingTag)
        );
    }

    #[test]
    fn test_parse_missing_repository_name() {
        assert_eq!(
            ImageReference::parse("noslash-or-colon"),
            Err(ParseError::MissingRepositoryName)
        );
        assert_eq!(
            ImageReference::parse("nginx:1.27"),
            Err(ParseError::MissingRepositoryName)
        );
        assert_eq!(
            ImageReference::parse("registry/:v1"),
            Err(ParseError::MissingRepositoryName)
        );
    }

    #[test]
    fn test_parse_digest_not_allowed() {
        assert_eq!(
            ImageReference::parse("registry/api@sha256:abcdef"),
            Err(ParseError::DigestNotAllowed)
        );
    }

    #[test]
    fn test_with_tag_replaces_only_tag_position() {
        // the old tag text also appears in the registry host and repository name
        let reference = ImageReference::parse("v1.registry.example/v1:v1").unwrap();
        let updated = reference.with_tag("v2");
        assert_eq!(updated.to_string(), "v1.registry.example/v1:v2");
        assert_eq!(updated.repository_name, "v1");
    }

    #[test]
    fn test_with_tag_reparses_to_new_tag() {
        for tag in ["v42", "2024.10.01-abc123", "sha-9f8e7d", "1"] {
            let reference = ImageReference::parse(ECR_IMAGE).unwrap();
            let rendered = reference.with_tag(tag).to_string();
            let reparsed = ImageReference::parse(&rendered).unwrap();
            assert_eq!(reparsed.tag, tag);
            assert_eq!(reparsed.repository_path, reference.repository_path);
        }
    }
}
