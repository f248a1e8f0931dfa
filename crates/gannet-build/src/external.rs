use url::Url;

use gannet_normalize::PackageName;

use crate::BuildError;

/// The materialization of a direct-URL requirement: built on demand, never
/// persisted, identified by its URL instead of a release row.
#[derive(Debug, Clone)]
pub struct ExternalBuild {
    pub package_name: PackageName,
    pub version: String,
    pub external_url: Url,
    pub metadata: serde_json::Value,
}

/// Extract `(name, version)` from a `#egg=name==version` URL fragment.
pub(crate) fn parse_egg_fragment(url: &Url) -> Result<(PackageName, String), BuildError> {
    let fragment = url
        .fragment()
        .ok_or_else(|| BuildError::BadExternalUrl(url.to_string()))?;
    let egg = fragment
        .split('&')
        .find_map(|pair| pair.strip_prefix("egg="))
        .ok_or_else(|| BuildError::BadExternalUrl(url.to_string()))?;
    let (name, version) = egg
        .split_once("==")
        .ok_or_else(|| BuildError::BadExternalUrl(url.to_string()))?;
    let name =
        PackageName::new(name).map_err(|_| BuildError::BadExternalUrl(url.to_string()))?;
    if version.is_empty() {
        return Err(BuildError::BadExternalUrl(url.to_string()));
    }
    Ok((name, version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn egg_fragment_roundtrip() {
        let url = Url::parse("https://example.com/pkg-1.0.tar.gz#egg=pkg==1.0").unwrap();
        let (name, version) = parse_egg_fragment(&url).unwrap();
        assert_eq!(name.as_str(), "pkg");
        assert_eq!(version, "1.0");
    }

    #[test]
    fn fragment_with_extra_pairs() {
        let url =
            Url::parse("https://example.com/pkg.tar.gz#sha=abc&egg=My.Pkg==2.1").unwrap();
        let (name, version) = parse_egg_fragment(&url).unwrap();
        assert_eq!(name.as_str(), "my-pkg");
        assert_eq!(version, "2.1");
    }

    #[test]
    fn missing_or_unpinned_egg_is_rejected() {
        for url in [
            "https://example.com/pkg-1.0.tar.gz",
            "https://example.com/pkg-1.0.tar.gz#egg=pkg",
            "https://example.com/pkg-1.0.tar.gz#egg=pkg>=1.0",
        ] {
            let url = Url::parse(url).unwrap();
            assert!(parse_egg_fragment(&url).is_err(), "{url}");
        }
    }
}
