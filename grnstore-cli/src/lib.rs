//! Commands and output views for the `grnstore` binary.
//!
//! Every command returns a JSON document; `main` prints it on stdout and
//! keeps logs on stderr.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat};
use clap::{Args, Subcommand};
use grnstore_model::{Entity, EntityFilter, EntityWrite, HistoryRecord, FOLDER_KIND};
use grnstore_storage::{spawn_reconciler, EntityStore, ReferenceResolver, StoreConfig};
use grnstore_types::{Grn, SystemClock, TenantId};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Addresses one entity.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Tenant (organization) id
    #[arg(short, long, default_value_t = 1)]
    pub tenant: i64,

    /// Entity kind, e.g. `dashboard` or `folder`
    pub kind: String,

    pub uid: String,
}

impl Target {
    pub fn tenant_id(&self) -> TenantId {
        TenantId::new(self.tenant)
    }

    pub fn grn(&self) -> Result<Grn> {
        Ok(Grn::new(self.tenant_id(), &self.kind, &self.uid)?)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create or update an entity
    Put {
        #[command(flatten)]
        target: Target,

        /// JSON body file
        #[arg(short, long)]
        body: Option<PathBuf>,

        /// Uid of the parent folder (same tenant)
        #[arg(long)]
        folder: Option<String>,

        /// Required current version; 0 means "must not exist"
        #[arg(long)]
        expect: Option<i64>,

        #[arg(long, default_value = "cli")]
        actor: String,

        /// Commit message stored with the history record
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Show an entity, optionally at an older version
    Get {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        version: Option<i64>,
    },

    /// Tombstone an entity
    Delete {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        expect: Option<i64>,

        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// List active entities of a tenant
    List {
        #[arg(short, long, default_value_t = 1)]
        tenant: i64,

        /// Restrict to these kinds
        #[arg(short, long)]
        kind: Vec<String>,

        /// Folder uid to list
        #[arg(long, conflicts_with = "root")]
        folder: Option<String>,

        /// Include everything below `--folder`, not only direct children
        #[arg(long, requires = "folder")]
        subtree: bool,

        /// Only entities outside any folder
        #[arg(long)]
        root: bool,

        /// `label` or `label=value`; repeat to require several
        #[arg(short, long)]
        label: Vec<String>,
    },

    /// Show the version history of an entity
    History {
        #[command(flatten)]
        target: Target,

        /// Drop all but the newest N records first
        #[arg(long)]
        prune: Option<usize>,
    },

    /// Resolve the references of an entity against the store
    Resolve {
        #[command(flatten)]
        target: Target,
    },

    /// Re-resolve every stale reference of a tenant
    RefreshStale {
        #[arg(short, long, default_value_t = 1)]
        tenant: i64,
    },

    /// Show a tenant's folder tree
    Folders {
        #[arg(short, long, default_value_t = 1)]
        tenant: i64,
    },

    /// Verify a tenant's folder intervals
    CheckTree {
        #[arg(short, long, default_value_t = 1)]
        tenant: i64,
    },

    /// Recompute a tenant's folder tree from the folder entities
    RebuildTree {
        #[arg(short, long, default_value_t = 1)]
        tenant: i64,
    },

    /// Repair derived indexes and detached folders
    Reconcile {
        /// Keep running on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },
}

/// Reads a JSON config file. Without a path the defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<StoreConfig> {
    let Some(path) = path else {
        return Ok(StoreConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    StoreConfig::from_json(&text).with_context(|| format!("Invalid config {}", path.display()))
}

pub fn open_store(db: &Path, config: StoreConfig) -> Result<EntityStore> {
    EntityStore::open_with(db, config, Arc::new(SystemClock::new()))
        .with_context(|| format!("Failed to open store at {}", db.display()))
}

/// Entity as printed by the CLI: body decoded, timestamps in RFC 3339.
#[derive(Debug, Serialize)]
pub struct EntityView {
    pub grn: String,
    pub kind: String,
    pub uid: String,
    pub folder: Option<String>,
    pub version: i64,
    pub etag: String,
    pub state: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub errors: Vec<String>,
    pub created: String,
    pub created_by: String,
    pub updated: String,
    pub updated_by: String,
    pub body: Option<Value>,
}

impl From<&Entity> for EntityView {
    fn from(entity: &Entity) -> Self {
        Self {
            grn: entity.grn.to_string(),
            kind: entity.kind.clone(),
            uid: entity.uid.clone(),
            folder: entity.folder.as_ref().map(Grn::to_string),
            version: entity.version,
            etag: entity.etag.clone(),
            state: entity.state.to_string(),
            name: entity.name.clone(),
            slug: entity.slug.clone(),
            description: entity.description.clone(),
            labels: entity.labels.clone(),
            errors: entity.errors.clone(),
            created: timestamp(entity.created_at),
            created_by: entity.created_by.clone(),
            updated: timestamp(entity.updated_at),
            updated_by: entity.updated_by.clone(),
            body: entity.body_json(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VersionView {
    pub version: i64,
    pub etag: String,
    pub size: i64,
    pub updated: String,
    pub updated_by: String,
    pub message: String,
}

impl From<&HistoryRecord> for VersionView {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            version: record.version,
            etag: record.etag.clone(),
            size: record.size,
            updated: timestamp(record.updated_at),
            updated_by: record.updated_by.clone(),
            message: record.message.clone(),
        }
    }
}

/// Milliseconds since the epoch as RFC 3339 (UTC).
pub fn timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

fn folder_grn(tenant: TenantId, uid: &str) -> Result<Grn> {
    Ok(Grn::new(tenant, FOLDER_KIND, uid)?)
}

fn list_filter(
    tenant: TenantId,
    kinds: Vec<String>,
    folder: Option<String>,
    subtree: bool,
    root: bool,
    labels: Vec<String>,
) -> Result<EntityFilter> {
    let mut filter = EntityFilter::for_tenant(tenant);
    for kind in kinds {
        filter = filter.with_kind(kind);
    }
    filter = match (folder, root) {
        (Some(_), true) => bail!("--folder and --root are exclusive"),
        (Some(uid), false) if subtree => filter.in_subtree(folder_grn(tenant, &uid)?),
        (Some(uid), false) => filter.in_folder(folder_grn(tenant, &uid)?),
        (None, true) => filter.at_root(),
        (None, false) => filter,
    };
    for label in labels {
        filter = match label.split_once('=') {
            Some((name, value)) => filter.with_label_value(name, value),
            None => filter.with_label(label),
        };
    }
    Ok(filter)
}

/// Runs one command against an open store.
pub async fn run(store: &EntityStore, command: Command) -> Result<Value> {
    match command {
        Command::Put {
            target,
            body,
            folder,
            expect,
            actor,
            message,
        } => {
            let mut write = EntityWrite::new(target.tenant_id(), &target.kind, &target.uid)
                .with_actor(actor)
                .with_message(message);
            if let Some(path) = body {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read body {}", path.display()))?;
                write = write.with_body(bytes);
            }
            if let Some(uid) = folder {
                write = write.with_folder(folder_grn(target.tenant_id(), &uid)?);
            }
            let result = store.put(write, expect)?;
            info!(grn = %result.grn, version = result.version, "stored entity");
            Ok(json!({
                "grn": result.grn,
                "version": result.version,
                "etag": result.etag,
            }))
        }

        Command::Get { target, version } => {
            let entity = store.get(&target.grn()?, version)?;
            Ok(serde_json::to_value(EntityView::from(&entity))?)
        }

        Command::Delete {
            target,
            expect,
            actor,
        } => {
            let grn = target.grn()?;
            store.delete(&grn, expect, &actor)?;
            Ok(json!({ "grn": grn, "state": "tombstoned" }))
        }

        Command::List {
            tenant,
            kind,
            folder,
            subtree,
            root,
            label,
        } => {
            let filter = list_filter(TenantId::new(tenant), kind, folder, subtree, root, label)?;
            let mut views = Vec::new();
            for entity in store.list(filter) {
                views.push(EntityView::from(&entity?));
            }
            Ok(serde_json::to_value(views)?)
        }

        Command::History { target, prune } => {
            let grn = target.grn()?;
            if let Some(keep) = prune {
                let removed = store.prune_history(&grn, keep)?;
                info!(grn = %grn, removed, "pruned history");
            }
            let versions: Vec<VersionView> = store
                .list_versions(&grn)?
                .iter()
                .map(VersionView::from)
                .collect();
            Ok(serde_json::to_value(versions)?)
        }

        Command::Resolve { target } => {
            let edges = ReferenceResolver::local(store.clone())
                .resolve(&target.grn()?)
                .await?;
            Ok(serde_json::to_value(edges)?)
        }

        Command::RefreshStale { tenant } => {
            let report = ReferenceResolver::local(store.clone())
                .refresh_stale(TenantId::new(tenant))
                .await?;
            Ok(json!({
                "checked": report.checked,
                "resolved": report.resolved,
                "unresolved": report.unresolved,
                "timed_out": report.timed_out,
            }))
        }

        Command::Folders { tenant } => {
            Ok(serde_json::to_value(store.folders(TenantId::new(tenant))?)?)
        }

        Command::CheckTree { tenant } => {
            store.check_tree(TenantId::new(tenant))?;
            Ok(json!({ "tenant": tenant, "ok": true }))
        }

        Command::RebuildTree { tenant } => {
            let changed = store.rebuild_tree(TenantId::new(tenant))?;
            Ok(json!({ "tenant": tenant, "changed": changed }))
        }

        Command::Reconcile { watch: false } => {
            let report = store.reconcile()?;
            Ok(json!({
                "rederived": report.rederived,
                "still_failing": report.still_failing,
                "dropped": report.dropped,
                "reattached": report.reattached,
            }))
        }

        Command::Reconcile { watch: true } => {
            let handle = spawn_reconciler(store.clone());
            info!(
                interval_ms = store.config().reconcile_interval_ms,
                "reconciler running; press Ctrl-C to stop"
            );
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            handle.abort();
            Ok(json!({ "pending": store.pending_reconciliation()?.len() }))
        }
    }
}
