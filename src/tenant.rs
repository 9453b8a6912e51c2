use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::compactor;
use crate::engine::{Engine, WorkingHours};
use crate::limits::*;
use crate::settings::SettingsStore;

/// One engine per school. The school is the database name of the Postgres
/// connection; each gets its own WAL, settings and compactor.
pub struct TenantManager {
    /// Keyed by sanitized name, one entry per WAL file.
    engines: DashMap<String, Arc<Engine>>,
    /// Held while a school is opened so two connections cannot replay the
    /// same WAL into two engines.
    opening: Mutex<()>,
    data_dir: PathBuf,
    hours: WorkingHours,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, hours: WorkingHours, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            opening: Mutex::new(()),
            data_dir,
            hours,
            compact_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Get the school's engine, opening and seeding it on first use. Names
    /// that sanitize to the same file name share one engine.
    pub async fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let safe_name = sanitize(tenant)?;
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }

        let _opening = self.opening.lock().await;
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(
            wal_path,
            Arc::new(SettingsStore::new()),
            self.hours,
        )?);
        engine
            .seed_defaults()
            .await
            .map_err(|e| io::Error::other(format!("seeding {safe_name}: {e}")))?;

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(safe_name.clone(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!("school {safe_name} opened");
        Ok(engine)
    }
}

/// Keep only characters that are safe in a file name.
fn sanitize(tenant: &str) -> io::Result<String> {
    let safe: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty tenant name",
        ));
    }
    Ok(safe)
}
