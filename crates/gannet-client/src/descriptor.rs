use serde::{Deserialize, Serialize};

use gannet_normalize::PackageName;

/// One downloadable file of a release, as advertised by an upstream index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    pub kind: DistKind,
    pub url: String,
    pub md5_digest: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistKind {
    #[serde(rename = "sdist")]
    Sdist,
    #[serde(rename = "bdist_wheel")]
    BdistWheel,
    #[serde(untagged)]
    Other(String),
}

impl DistKind {
    pub(crate) fn parse(package_type: &str) -> Self {
        match package_type {
            "sdist" => Self::Sdist,
            "bdist_wheel" => Self::BdistWheel,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Select the release to materialize for one version: the first source
/// distribution, else a universal (`-py2.py3-none-any`) wheel, else none.
///
/// The resolver relies on this policy: whatever is chosen must be buildable
/// by the container executor.
pub fn best_release(descriptors: &[ReleaseDescriptor]) -> Option<&ReleaseDescriptor> {
    descriptors
        .iter()
        .find(|descriptor| descriptor.kind == DistKind::Sdist)
        .or_else(|| {
            descriptors.iter().find(|descriptor| {
                descriptor.kind == DistKind::BdistWheel
                    && descriptor.filename.ends_with("-py2.py3-none-any.whl")
            })
        })
}

impl ReleaseDescriptor {
    /// Recover `(version, descriptor)` from a simple-API filename, for
    /// indexes that only serve flat file listings.
    ///
    /// Source distributions are `{name}-{version}.{tar.gz,tgz,zip,tar.bz2}`;
    /// wheels are `{name}-{version}-{python}-{abi}-{platform}.whl`. Files
    /// that do not belong to `package` (or are neither) yield `None`.
    pub(crate) fn from_filename(
        package: &PackageName,
        filename: &str,
        url: String,
        md5_digest: String,
    ) -> Option<(String, Self)> {
        let (stem, kind) = split_extension(filename)?;
        let (name, version) = match kind {
            // Package names may themselves contain dashes; scan for the
            // name/version split point instead of splitting once.
            DistKind::Sdist => {
                let mut split = None;
                let mut offset = 0;
                while let Some(pos) = stem[offset..].find('-') {
                    let at = offset + pos;
                    if PackageName::new(&stem[..at]).ok().as_ref() == Some(package) {
                        split = Some(at);
                        break;
                    }
                    offset = at + 1;
                }
                let at = split?;
                (&stem[..at], &stem[at + 1..])
            }
            DistKind::BdistWheel => {
                let mut parts = stem.splitn(3, '-');
                let name = parts.next()?;
                let version = parts.next()?;
                (name, version)
            }
            DistKind::Other(_) => return None,
        };
        if version.is_empty() || PackageName::new(name).ok().as_ref() != Some(package) {
            return None;
        }
        Some((
            version.to_string(),
            Self {
                kind,
                url,
                md5_digest,
                filename: filename.to_string(),
            },
        ))
    }
}

fn split_extension(filename: &str) -> Option<(&str, DistKind)> {
    for extension in [".tar.gz", ".tgz", ".tar.bz2", ".zip"] {
        if let Some(stem) = filename.strip_suffix(extension) {
            return Some((stem, DistKind::Sdist));
        }
    }
    filename
        .strip_suffix(".whl")
        .map(|stem| (stem, DistKind::BdistWheel))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(kind: DistKind, filename: &str) -> ReleaseDescriptor {
        ReleaseDescriptor {
            kind,
            url: format!("https://files.example/{filename}"),
            md5_digest: "abc123".to_string(),
            filename: filename.to_string(),
        }
    }

    #[test]
    fn best_release_prefers_sdist() {
        let descriptors = [
            descriptor(DistKind::BdistWheel, "six-1.15.0-py2.py3-none-any.whl"),
            descriptor(DistKind::Sdist, "six-1.15.0.tar.gz"),
        ];
        assert_eq!(
            best_release(&descriptors).unwrap().filename,
            "six-1.15.0.tar.gz"
        );
    }

    #[test]
    fn best_release_falls_back_to_universal_wheel() {
        let descriptors = [
            descriptor(DistKind::BdistWheel, "six-1.15.0-cp38-cp38-linux_x86_64.whl"),
            descriptor(DistKind::BdistWheel, "six-1.15.0-py2.py3-none-any.whl"),
        ];
        assert_eq!(
            best_release(&descriptors).unwrap().filename,
            "six-1.15.0-py2.py3-none-any.whl"
        );
    }

    #[test]
    fn best_release_rejects_platform_wheels_only() {
        let descriptors = [descriptor(
            DistKind::BdistWheel,
            "numpy-1.26.0-cp311-cp311-manylinux_2_17_x86_64.whl",
        )];
        assert!(best_release(&descriptors).is_none());
    }

    #[test]
    fn filename_roundtrip_sdist() {
        let package = PackageName::new("flask-api").unwrap();
        let (version, descriptor) = ReleaseDescriptor::from_filename(
            &package,
            "Flask-API-3.0.1.tar.gz",
            String::new(),
            String::new(),
        )
        .unwrap();
        assert_eq!(version, "3.0.1");
        assert_eq!(descriptor.kind, DistKind::Sdist);
    }

    #[test]
    fn filename_roundtrip_wheel() {
        let package = PackageName::new("six").unwrap();
        let (version, descriptor) = ReleaseDescriptor::from_filename(
            &package,
            "six-1.15.0-py2.py3-none-any.whl",
            String::new(),
            String::new(),
        )
        .unwrap();
        assert_eq!(version, "1.15.0");
        assert_eq!(descriptor.kind, DistKind::BdistWheel);
    }

    #[test]
    fn foreign_filenames_are_skipped() {
        let package = PackageName::new("six").unwrap();
        assert!(ReleaseDescriptor::from_filename(
            &package,
            "seven-1.0.tar.gz",
            String::new(),
            String::new()
        )
        .is_none());
        assert!(ReleaseDescriptor::from_filename(
            &package,
            "six.rst",
            String::new(),
            String::new()
        )
        .is_none());
    }
}
