// Dynamic image directives: replace lookup queries in a payload with their results

use crate::clients::{ImageSource, PintImage};
use crate::errors::ResolutionError;
use crate::payload::{
    Payload, IMAGE_ID, IMAGE_LOCATION, IMAGE_NAME, IMAGE_PUBLISHED_ON, IMAGE_REGEX, PINT_FIELD,
    PINT_NAME, PINT_QUERY, PINT_REGION, TOOLS_IMAGE_BASE, TOOLS_IMAGE_QUERY,
};
use regex::Regex;
use tracing::debug;

/// PINT image states searched, in order
const PINT_STATES: [&str; 3] = ["active", "inactive", "deprecated"];

/// Resolve every directive present in `payload`, in a fixed order
pub async fn resolve_directives(
    source: &dyn ImageSource,
    payload: Payload,
) -> Result<Payload, ResolutionError> {
    let payload = resolve_tools_image(source, payload).await?;
    let payload = resolve_image_regex(source, payload).await?;
    resolve_pint_image(source, payload).await
}

async fn resolve_tools_image(
    source: &dyn ImageSource,
    payload: Payload,
) -> Result<Payload, ResolutionError> {
    let Some(query) = payload.get(TOOLS_IMAGE_QUERY).map(str::to_string) else {
        return Ok(payload);
    };

    let builds = source
        .tools_builds(&query)
        .await
        .map_err(|source| ResolutionError::Lookup {
            directive: TOOLS_IMAGE_QUERY.to_string(),
            source,
        })?;

    let build = builds
        .iter()
        .find(|build| build.failed == 0)
        .ok_or_else(|| ResolutionError::NoValue {
            directive: TOOLS_IMAGE_QUERY.to_string(),
            query: query.clone(),
        })?;

    let image = format!("publiccloud_tools_{}.qcow2", build.build);
    debug!(image = %image, "Resolved public cloud tools image");
    Ok(payload
        .without(TOOLS_IMAGE_QUERY)
        .with(TOOLS_IMAGE_BASE, image))
}

async fn resolve_image_regex(
    source: &dyn ImageSource,
    payload: Payload,
) -> Result<Payload, ResolutionError> {
    let Some(pattern) = payload.get(IMAGE_REGEX).map(str::to_string) else {
        return Ok(payload);
    };

    let regex = Regex::new(&pattern).map_err(|e| ResolutionError::InvalidArgument {
        directive: IMAGE_REGEX.to_string(),
        reason: e.to_string(),
    })?;

    let names = source
        .image_index()
        .await
        .map_err(|source| ResolutionError::Lookup {
            directive: IMAGE_REGEX.to_string(),
            source,
        })?;

    let newest = names
        .into_iter()
        .filter(|name| regex.is_match(name))
        .max()
        .ok_or_else(|| ResolutionError::NoValue {
            directive: IMAGE_REGEX.to_string(),
            query: pattern.clone(),
        })?;

    Ok(payload.without(IMAGE_REGEX).with(IMAGE_LOCATION, newest))
}

/// Newest image whose name matches from the start and whose region fits
pub fn newest_pint_image<'a>(
    images: &'a [PintImage],
    name: &Regex,
    region: Option<&str>,
) -> Option<&'a PintImage> {
    images
        .iter()
        .filter(|image| name.find(&image.name).is_some_and(|m| m.start() == 0))
        .filter(|image| match (region, image.region.as_deref()) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        })
        .fold(None, |newest: Option<&PintImage>, image| match newest {
            Some(current) if image.publishedon <= current.publishedon => Some(current),
            _ => Some(image),
        })
}

async fn resolve_pint_image(
    source: &dyn ImageSource,
    payload: Payload,
) -> Result<Payload, ResolutionError> {
    let Some(query) = payload.get(PINT_QUERY).map(str::to_string) else {
        return Ok(payload);
    };

    let required = |key: &str| {
        payload
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| ResolutionError::InvalidArgument {
                directive: PINT_QUERY.to_string(),
                reason: format!("{} is not set", key),
            })
    };
    let name = required(PINT_NAME)?;
    let field = required(PINT_FIELD)?;
    let region = payload.get(PINT_REGION).map(str::to_string);

    let name = Regex::new(&name).map_err(|e| ResolutionError::InvalidArgument {
        directive: PINT_QUERY.to_string(),
        reason: e.to_string(),
    })?;

    let no_value = || ResolutionError::NoValue {
        directive: PINT_QUERY.to_string(),
        query: query.clone(),
    };

    // states are listed by precedence; the first one with a match wins
    let mut found = None;
    for state in PINT_STATES {
        let listed = source
            .pint_images(&query, state)
            .await
            .map_err(|source| ResolutionError::Lookup {
                directive: PINT_QUERY.to_string(),
                source,
            })?;
        if let Some(image) = newest_pint_image(&listed, &name, region.as_deref()) {
            debug!(state = %state, image = %image.name, "PINT image found");
            found = Some(image.clone());
            break;
        }
    }
    let image = found.ok_or_else(no_value)?;
    let id = image.field(&field).ok_or_else(no_value)?;

    Ok(payload
        .without(PINT_QUERY)
        .without(PINT_NAME)
        .without(PINT_FIELD)
        .without(PINT_REGION)
        .with(IMAGE_ID, id)
        .with(IMAGE_NAME, image.name.clone())
        .with(IMAGE_PUBLISHED_ON, image.publishedon.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ToolsBuild;
    use crate::payload::PayloadKind;
    use crate::scheduler::fakes::FakeImages;

    fn pint(name: &str, published: &str, region: Option<&str>, id: &str) -> PintImage {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "publishedon": published,
            "region": region,
            "id": id,
        }))
        .unwrap()
    }

    fn payload() -> Payload {
        Payload::new(PayloadKind::Incident).with("ARCH", "x86_64")
    }

    #[tokio::test]
    async fn test_payload_without_directives_is_untouched() {
        let images = FakeImages::default();
        let resolved = resolve_directives(&images, payload()).await.unwrap();
        assert_eq!(resolved, payload());
    }

    #[tokio::test]
    async fn test_tools_image_uses_first_clean_build() {
        let images = FakeImages {
            tools: vec![
                ToolsBuild { build: "20240102-1".to_string(), failed: 2 },
                ToolsBuild { build: "20240101-1".to_string(), failed: 0 },
            ],
            ..Default::default()
        };
        let resolved = resolve_directives(&images, payload().with(TOOLS_IMAGE_QUERY, "http://q"))
            .await
            .unwrap();
        assert_eq!(
            resolved.get(TOOLS_IMAGE_BASE),
            Some("publiccloud_tools_20240101-1.qcow2")
        );
        assert!(!resolved.contains_key(TOOLS_IMAGE_QUERY));
    }

    #[tokio::test]
    async fn test_tools_image_without_clean_build_fails() {
        let images = FakeImages {
            tools: vec![ToolsBuild { build: "20240102-1".to_string(), failed: 1 }],
            ..Default::default()
        };
        let err = resolve_directives(&images, payload().with(TOOLS_IMAGE_QUERY, "http://q"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NoValue { .. }));
    }

    #[tokio::test]
    async fn test_image_regex_takes_newest_match() {
        let images = FakeImages {
            index: vec![
                "SLES15-SP4-Azure.x86_64-1.0.0-Build1.1.vhdfixed.xz".to_string(),
                "SLES15-SP4-Azure.x86_64-1.0.0-Build2.1.vhdfixed.xz".to_string(),
                "SLES15-SP5-Azure.x86_64-1.0.0-Build9.1.vhdfixed.xz".to_string(),
            ],
            ..Default::default()
        };
        let resolved = resolve_directives(
            &images,
            payload().with(IMAGE_REGEX, r"^SLES15-SP4-Azure\.x86_64-.*\.vhdfixed\.xz$"),
        )
        .await
        .unwrap();
        assert_eq!(
            resolved.get(IMAGE_LOCATION),
            Some("SLES15-SP4-Azure.x86_64-1.0.0-Build2.1.vhdfixed.xz")
        );
    }

    fn pint_payload() -> Payload {
        payload()
            .with(PINT_QUERY, "https://pint/v1/amazon/images/")
            .with(PINT_NAME, "suse-sles-15-sp4-v")
            .with(PINT_FIELD, "id")
            .with(PINT_REGION, "eu-central-1")
    }

    #[tokio::test]
    async fn test_pint_picks_newest_in_first_matching_state() {
        let mut images = FakeImages::default();
        images.pint.insert(
            "active".to_string(),
            vec![pint("suse-sles-15-sp5-v20240501", "20240501", Some("eu-central-1"), "ami-0")],
        );
        images.pint.insert(
            "inactive".to_string(),
            vec![
                pint("suse-sles-15-sp4-v20240101", "20240101", Some("eu-central-1"), "ami-1"),
                pint("suse-sles-15-sp4-v20240201", "20240201", Some("eu-central-1"), "ami-2"),
                pint("suse-sles-15-sp4-v20240301", "20240301", Some("us-east-1"), "ami-3"),
            ],
        );

        let resolved = resolve_directives(&images, pint_payload()).await.unwrap();

        assert_eq!(resolved.get(IMAGE_ID), Some("ami-2"));
        assert_eq!(resolved.get(IMAGE_PUBLISHED_ON), Some("20240201"));
        assert!(!resolved.contains_key(PINT_QUERY));
        assert!(!resolved.contains_key(PINT_REGION));
    }

    #[tokio::test]
    async fn test_pint_active_image_beats_newer_deprecated_one() {
        let mut images = FakeImages::default();
        images.pint.insert(
            "active".to_string(),
            vec![pint("suse-sles-15-sp4-va", "20240101", Some("eu-central-1"), "ami-active")],
        );
        images.pint.insert(
            "deprecated".to_string(),
            vec![pint("suse-sles-15-sp4-vd", "20240301", Some("eu-central-1"), "ami-deprecated")],
        );

        let resolved = resolve_directives(&images, pint_payload()).await.unwrap();

        assert_eq!(resolved.get(IMAGE_ID), Some("ami-active"));
        assert_eq!(resolved.get(IMAGE_NAME), Some("suse-sles-15-sp4-va"));
    }

    #[tokio::test]
    async fn test_pint_requires_name_and_field() {
        let images = FakeImages::default();
        let err = resolve_directives(&images, payload().with(PINT_QUERY, "https://pint/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidArgument { .. }));
    }

    #[test]
    fn test_newest_pint_image_anchors_name() {
        let images = vec![pint("prefix-suse-sles", "20240501", None, "ami-x")];
        let name = Regex::new("suse-sles").unwrap();
        assert!(newest_pint_image(&images, &name, None).is_none());
    }
}
