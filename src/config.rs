use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// TTLs independientes por tier para una clase de registro.
#[derive(Debug, Clone, Copy)]
pub struct TtlPair {
    pub local: Duration,
    pub durable: Duration,
}

impl TtlPair {
    const fn secs(local: u64, durable: u64) -> Self {
        Self {
            local: Duration::from_secs(local),
            durable: Duration::from_secs(durable),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Concurrencia
    pub max_concurrency: usize,

    // Límites de petición
    pub max_batch_size: usize,
    pub max_search_limit: usize,
    pub related_limit: usize,

    // TTLs por clase de registro
    pub track_ttl: TtlPair,
    pub metadata_ttl: TtlPair,
    pub stream_ttl: TtlPair,
    pub related_ttl: TtlPair,
    pub search_ttl: TtlPair,

    // Sweeper
    pub inflight_grace: Duration,
    pub inflight_sweep_interval: Duration,
    pub cache_sweep_interval: Duration,

    // Paths (None => store durable en memoria, modo degradado)
    pub data_dir: Option<PathBuf>,
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().parse()?),
        _ => Ok(default),
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().parse()?),
        _ => Ok(default),
    }
}

fn env_ttl_pair(local_name: &str, durable_name: &str, default: TtlPair) -> Result<TtlPair> {
    Ok(TtlPair {
        local: Duration::from_secs(env_u64(local_name, default.local.as_secs())?),
        durable: Duration::from_secs(env_u64(durable_name, default.durable.as_secs())?),
    })
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            // Concurrencia: acotada por CPUs disponibles
            max_concurrency: match std::env::var("MAX_CONCURRENCY") {
                Ok(val) if !val.trim().is_empty() => val.trim().parse()?,
                _ => defaults.max_concurrency.min(num_cpus::get().max(1)),
            },

            // Límites
            max_batch_size: env_usize("MAX_BATCH_SIZE", defaults.max_batch_size)?,
            max_search_limit: env_usize("MAX_SEARCH_LIMIT", defaults.max_search_limit)?,
            related_limit: env_usize("RELATED_LIMIT", defaults.related_limit)?,

            // TTLs (segundos)
            track_ttl: env_ttl_pair("TRACK_LOCAL_TTL", "TRACK_DURABLE_TTL", defaults.track_ttl)?,
            metadata_ttl: env_ttl_pair(
                "METADATA_LOCAL_TTL",
                "METADATA_DURABLE_TTL",
                defaults.metadata_ttl,
            )?,
            stream_ttl: env_ttl_pair("STREAM_LOCAL_TTL", "STREAM_DURABLE_TTL", defaults.stream_ttl)?,
            related_ttl: env_ttl_pair(
                "RELATED_LOCAL_TTL",
                "RELATED_DURABLE_TTL",
                defaults.related_ttl,
            )?,
            search_ttl: env_ttl_pair("SEARCH_LOCAL_TTL", "SEARCH_DURABLE_TTL", defaults.search_ttl)?,

            // Sweeper
            inflight_grace: Duration::from_secs(env_u64(
                "INFLIGHT_GRACE_SECS",
                defaults.inflight_grace.as_secs(),
            )?),
            inflight_sweep_interval: Duration::from_secs(env_u64(
                "INFLIGHT_SWEEP_SECS",
                defaults.inflight_sweep_interval.as_secs(),
            )?),
            cache_sweep_interval: Duration::from_secs(env_u64(
                "CACHE_SWEEP_SECS",
                defaults.cache_sweep_interval.as_secs(),
            )?),

            // Paths
            data_dir: std::env::var("DATA_DIR").ok().map(PathBuf::from),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Performs sanity checks to catch common mistakes before any
    /// resolution work is scheduled.
    ///
    /// # Validation Rules
    ///
    /// - Worker pool capacity and request limits must be greater than zero
    /// - Sweep intervals must be greater than zero
    /// - The in-flight grace TTL must exceed the slowest expected upstream
    ///   latency with margin (minimum 30 seconds)
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            anyhow::bail!("Max concurrency must be greater than 0");
        }

        if self.max_batch_size == 0 {
            anyhow::bail!("Max batch size must be greater than 0");
        }

        if self.max_search_limit == 0 {
            anyhow::bail!("Max search limit must be greater than 0");
        }

        if self.related_limit == 0 {
            anyhow::bail!("Related limit must be greater than 0");
        }

        if self.inflight_grace < Duration::from_secs(30) {
            anyhow::bail!(
                "In-flight grace TTL must be at least 30s, got: {}s",
                self.inflight_grace.as_secs()
            );
        }

        if self.inflight_sweep_interval.is_zero() || self.cache_sweep_interval.is_zero() {
            anyhow::bail!("Sweep intervals must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Pool: {} slots\n  \
            Limits: batch {}, search {}, related {}\n  \
            TTLs (local/durable secs): track {}/{}, metadata {}/{}, stream {}/{}, related {}/{}, search {}/{}\n  \
            Sweeper: grace {}s, in-flight every {}s, cache every {}s\n  \
            Durable store: {}",
            self.max_concurrency,
            self.max_batch_size,
            self.max_search_limit,
            self.related_limit,
            self.track_ttl.local.as_secs(),
            self.track_ttl.durable.as_secs(),
            self.metadata_ttl.local.as_secs(),
            self.metadata_ttl.durable.as_secs(),
            self.stream_ttl.local.as_secs(),
            self.stream_ttl.durable.as_secs(),
            self.related_ttl.local.as_secs(),
            self.related_ttl.durable.as_secs(),
            self.search_ttl.local.as_secs(),
            self.search_ttl.durable.as_secs(),
            self.inflight_grace.as_secs(),
            self.inflight_sweep_interval.as_secs(),
            self.cache_sweep_interval.as_secs(),
            self.data_dir
                .as_ref()
                .map_or("memory (degraded)".to_string(), |d| d.display().to_string()),
        )
    }
}

/// Default configuration values.
///
/// The TTLs mirror the upstream cache windows the service fronts: track
/// records and stream locators are short-lived (the locator's real validity
/// is hours, the cache window stays well below it), metadata and related
/// lists live longer.
impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 8,

            max_batch_size: 15,
            max_search_limit: 25,
            related_limit: 10,

            track_ttl: TtlPair::secs(300, 300),
            metadata_ttl: TtlPair::secs(600, 1800),
            stream_ttl: TtlPair::secs(300, 300),
            related_ttl: TtlPair::secs(300, 900),
            search_ttl: TtlPair::secs(180, 600),

            inflight_grace: Duration::from_secs(300),   // 5 minutos
            inflight_sweep_interval: Duration::from_secs(300),
            cache_sweep_interval: Duration::from_secs(600),

            data_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_pool() {
        let config = Config {
            max_concurrency: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tiny_grace_ttl() {
        let config = Config {
            inflight_grace: Duration::from_secs(5),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
