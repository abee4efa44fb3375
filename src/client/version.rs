//! Server version probe

use super::pg_connection::PgConnection;
use crate::logging::QueryLogger;

const VERSION_PROBE: &str =
    "SELECT version(), (SELECT COUNT(*) FROM pg_settings WHERE name LIKE 'rds%')";

/// Server variant behind the connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PgInstanceType {
    /// The probe failed
    #[default]
    Unknown,
    /// Community PostgreSQL or a compatible fork
    Postgres,
    /// Amazon Aurora / RDS (exposes `rds.*` settings)
    Aurora,
    /// Amazon Redshift
    Redshift,
}

impl std::fmt::Display for PgInstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Postgres => "postgres",
            Self::Aurora => "aurora",
            Self::Redshift => "redshift",
        })
    }
}

/// Server version and variant. Orders by version number first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PgVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Patch version (0 when the banner has two components)
    pub patch: u32,
    /// Server variant
    pub instance_type: PgInstanceType,
}

impl PgVersion {
    /// Plain Postgres version
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            instance_type: PgInstanceType::Postgres,
        }
    }

    /// Parse the output of `SELECT version()`.
    ///
    /// Reads up to three dot-separated numbers after `PostgreSQL `; each
    /// component stops at its first non-digit, so `16beta2` reads as 16.
    /// Returns `None` when the banner has no such prefix.
    pub fn parse(banner: &str) -> Option<Self> {
        let (_, rest) = banner.split_once("PostgreSQL ")?;
        let token = rest.split_whitespace().next()?;

        let mut parts = [0u32; 3];
        for (slot, component) in parts.iter_mut().zip(token.split('.')) {
            let digits: &str = &component[..component
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(component.len())];
            if digits.is_empty() {
                break;
            }
            *slot = digits.parse().ok()?;
        }

        if token.starts_with(|c: char| c.is_ascii_digit()) {
            Some(Self::new(parts[0], parts[1], parts[2]))
        } else {
            None
        }
    }

    /// Whether this version is at least `major.minor`
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl std::fmt::Display for PgVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

/// Classify a probe row: banner plus number of `rds%` settings
pub(crate) fn classify(banner: &str, rds_settings: i64) -> PgVersion {
    let mut version = PgVersion::parse(banner).unwrap_or(PgVersion {
        instance_type: PgInstanceType::Postgres,
        ..PgVersion::default()
    });
    if rds_settings > 0 {
        version.instance_type = PgInstanceType::Aurora;
    }
    // Redshift also exposes rds settings; the banner decides
    if banner.contains("Redshift") {
        version.instance_type = PgInstanceType::Redshift;
    }
    version
}

impl PgConnection {
    /// Probe the server version and variant. Never fails: any error yields
    /// the default descriptor with [`PgInstanceType::Unknown`].
    pub async fn get_postgres_version(&self, logger: Option<&dyn QueryLogger>) -> PgVersion {
        let result = match self.try_query(logger, VERSION_PROBE).await {
            Ok(result) => result,
            Err(message) => {
                tracing::debug!(error = %message, "version probe failed");
                return PgVersion::default();
            }
        };

        let banner = match result.get_string(0, 0) {
            Ok(banner) => banner,
            Err(e) => {
                tracing::debug!(error = %e, "version probe returned no banner");
                return PgVersion::default();
            }
        };
        let rds_settings = result.get_int64(0, 1).unwrap_or(0);

        let version = classify(&banner, rds_settings);
        tracing::debug!(version = %version, instance = %version.instance_type, "detected server");
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_debian_banner() {
        let version = PgVersion::parse(
            "PostgreSQL 14.9 (Debian 14.9-1.pgdg120+1) on x86_64-pc-linux-gnu, compiled by gcc",
        )
        .unwrap();
        assert_eq!(version, PgVersion::new(14, 9, 0));
        assert_eq!(version.to_string(), "14.9");
    }

    #[test]
    fn test_parse_three_components() {
        let version = PgVersion::parse("PostgreSQL 9.6.24 on x86_64-pc-linux-gnu").unwrap();
        assert_eq!((version.major, version.minor, version.patch), (9, 6, 24));
        assert_eq!(version.to_string(), "9.6.24");
    }

    #[test]
    fn test_parse_prerelease() {
        let version = PgVersion::parse("PostgreSQL 16beta2 on aarch64").unwrap();
        assert_eq!((version.major, version.minor), (16, 0));
    }

    #[test]
    fn test_parse_rejects_foreign_banner() {
        assert!(PgVersion::parse("CockroachDB CCL v23.1").is_none());
        assert!(PgVersion::parse("PostgreSQL devel").is_none());
    }

    #[test]
    fn test_classify_plain_postgres() {
        let version = classify("PostgreSQL 14.9 (Debian)", 0);
        assert_eq!(version.instance_type, PgInstanceType::Postgres);
        assert_eq!(version.to_string(), "14.9");
    }

    #[test]
    fn test_classify_aurora() {
        let version = classify("PostgreSQL 15.4 on aarch64-unknown-linux-gnu", 12);
        assert_eq!(version.instance_type, PgInstanceType::Aurora);
        assert_eq!(version.major, 15);
    }

    #[test]
    fn test_redshift_wins_over_aurora() {
        let version = classify(
            "PostgreSQL 8.0.2 on i686-pc-linux-gnu, compiled by GCC gcc (GCC) 3.4.2 20041017 (Red Hat 3.4.2-6.fc3), Redshift 1.0.77467",
            5,
        );
        assert_eq!(version.instance_type, PgInstanceType::Redshift);
        assert_eq!((version.major, version.minor, version.patch), (8, 0, 2));
    }

    #[test]
    fn test_unparseable_banner_is_still_postgres() {
        let version = classify("something else entirely", 0);
        assert_eq!(version.instance_type, PgInstanceType::Postgres);
        assert_eq!((version.major, version.minor, version.patch), (0, 0, 0));
    }

    #[test]
    fn test_default_is_unknown() {
        let version = PgVersion::default();
        assert_eq!(version.instance_type, PgInstanceType::Unknown);
        assert_eq!(version.to_string(), "0.0");
    }

    #[test]
    fn test_ordering_by_number() {
        assert!(PgVersion::new(9, 6, 24) < PgVersion::new(10, 0, 0));
        assert!(PgVersion::new(14, 9, 0) < PgVersion::new(14, 10, 0));
        assert!(PgVersion::new(14, 2, 0).at_least(14, 2));
        assert!(!PgVersion::new(13, 11, 0).at_least(14, 0));
    }

    #[tokio::test]
    async fn test_closed_connection_probe_is_unknown() {
        let version = PgConnection::default().get_postgres_version(None).await;
        assert_eq!(version, PgVersion::default());
    }
}
