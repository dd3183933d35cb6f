use serde::{Deserialize, Serialize};

/// Storage backend an uploaded file lands in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    #[default]
    S3,
    Gcs,
    Azure,
    Dropbox,
    Rackspace,
}

impl StorageLocation {
    /// Wire name of the location.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::Azure => "azure",
            Self::Dropbox => "dropbox",
            Self::Rackspace => "rackspace",
        }
    }
}

impl std::str::FromStr for StorageLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "gcs" => Ok(Self::Gcs),
            "azure" => Ok(Self::Azure),
            "dropbox" => Ok(Self::Dropbox),
            "rackspace" => Ok(Self::Rackspace),
            other => Err(format!("unknown storage location: {other}")),
        }
    }
}

/// Access level of the stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageAccess {
    Public,
    Private,
}

impl std::str::FromStr for StorageAccess {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown storage access: {other}")),
        }
    }
}

/// Where and how the uploaded object is stored.
///
/// Serialized with the `store_` prefix the API expects, so it can be
/// flattened directly into start and complete requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageOptions {
    #[serde(rename = "store_location", default)]
    pub location: StorageLocation,
    #[serde(rename = "store_region", default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(rename = "store_container", default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(rename = "store_path", default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Overrides the filename derived from the local path.
    #[serde(rename = "store_filename", default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(rename = "store_access", default, skip_serializing_if = "Option::is_none")]
    pub access: Option<StorageAccess>,
}

impl StorageOptions {
    /// Options targeting `location` with server defaults for everything else.
    pub fn new(location: StorageLocation) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }
}

/// Signed policy attached to every API call when the account enforces security.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    #[serde(rename = "policy")]
    pub encoded_policy: String,
    pub signature: String,
}

impl Security {
    pub fn new(encoded_policy: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            encoded_policy: encoded_policy.into(),
            signature: signature.into(),
        }
    }

    /// Query parameters appended to API URLs.
    pub fn query_pairs(&self) -> [(&'static str, &str); 2] {
        [
            ("policy", self.encoded_policy.as_str()),
            ("signature", self.signature.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_options_use_store_prefix() {
        let opts = StorageOptions {
            location: StorageLocation::Gcs,
            region: Some("us-central1".into()),
            container: Some("media".into()),
            path: None,
            filename: Some("report.pdf".into()),
            access: Some(StorageAccess::Private),
        };
        let json = serde_json::to_value(&opts).unwrap();
        assert_eq!(json["store_location"], "gcs");
        assert_eq!(json["store_region"], "us-central1");
        assert_eq!(json["store_container"], "media");
        assert_eq!(json["store_filename"], "report.pdf");
        assert_eq!(json["store_access"], "private");
        assert!(json.get("store_path").is_none());
    }

    #[test]
    fn storage_options_default_to_s3() {
        let opts: StorageOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.location, StorageLocation::S3);
        assert!(opts.access.is_none());
    }

    #[test]
    fn location_parses_case_insensitively() {
        assert_eq!("AZURE".parse::<StorageLocation>(), Ok(StorageLocation::Azure));
        assert!("ftp".parse::<StorageLocation>().is_err());
        assert_eq!(StorageLocation::Rackspace.as_str(), "rackspace");
    }

    #[test]
    fn security_query_pairs() {
        let sec = Security::new("eyJleHBpcnkiOjF9", "abc123");
        let pairs = sec.query_pairs();
        assert_eq!(pairs[0], ("policy", "eyJleHBpcnkiOjF9"));
        assert_eq!(pairs[1], ("signature", "abc123"));
    }
}
