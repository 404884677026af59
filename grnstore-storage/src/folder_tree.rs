//! Folder tree index.
//!
//! Each active folder entity has a row in `entity_folder` with its path from
//! the root and an MPTT interval (`lft`/`rgt`). The rows are a cache of the
//! `folder` column of the folder entities: any create, move or delete of a
//! folder renumbers the whole tenant in one pass, under the tenant lock and
//! inside the writing transaction.
//!
//! A folder whose parent chain does not reach a root is detached. Detached
//! rows keep their last coordinates and are ignored by containment queries
//! until the chain is repaired.

use crate::entity_table::select_entity;
use crate::error::{StorageError, StorageResult};
use crate::rows::{grn_at, grn_text, json_at, opt_grn_at};
use crate::store::EntityStore;
use grnstore_model::{Entity, FolderNode, TreeEntry, FOLDER_KIND};
use grnstore_types::{Grn, TenantId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info};

const NODE_COLUMNS: &str =
    "n.grn, n.tenant_id, n.uid, n.parent_grn, n.slug_path, n.tree, \
     n.depth, n.lft, n.rgt, n.detached";

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<FolderNode> {
    Ok(FolderNode {
        grn: grn_at(row, 0)?,
        tenant_id: TenantId::new(row.get(1)?),
        uid: row.get(2)?,
        parent: opt_grn_at(row, 3)?,
        slug_path: row.get(4)?,
        tree: json_at(row, 5)?,
        depth: row.get(6)?,
        left: row.get(7)?,
        right: row.get(8)?,
        detached: row.get(9)?,
    })
}

fn select_node(conn: &Connection, grn: &Grn) -> StorageResult<Option<FolderNode>> {
    let sql = format!("SELECT {NODE_COLUMNS} FROM entity_folder n WHERE n.grn = ?1");
    Ok(conn
        .query_row(&sql, params![grn.as_str()], node_from_row)
        .optional()?)
}

fn load_nodes(conn: &Connection, tenant_id: TenantId) -> StorageResult<Vec<FolderNode>> {
    let sql = format!(
        "SELECT {NODE_COLUMNS} FROM entity_folder n
         WHERE n.tenant_id = ?1 ORDER BY n.detached, n.lft, n.uid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let nodes = stmt
        .query_map(params![tenant_id.get()], node_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

/// A folder entity as the tree sees it.
struct FolderSource {
    grn: Grn,
    uid: String,
    parent: Option<Grn>,
    title: String,
    slug: String,
}

fn load_sources(conn: &Connection, tenant_id: TenantId) -> StorageResult<Vec<FolderSource>> {
    let mut stmt = conn.prepare(
        "SELECT grn, uid, folder, name, slug FROM entity
         WHERE tenant_id = ?1 AND kind = ?2 AND state = 'active'
         ORDER BY uid",
    )?;
    let sources = stmt
        .query_map(params![tenant_id.get(), FOLDER_KIND], |row| {
            Ok(FolderSource {
                grn: grn_at(row, 0)?,
                uid: row.get(1)?,
                parent: opt_grn_at(row, 2)?,
                title: row.get(3)?,
                slug: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sources)
}

/// Fails if `placed` would be reachable from its own parent chain.
fn check_cycle(sources: &[FolderSource], placed: &Grn) -> StorageResult<()> {
    let parents: HashMap<&Grn, Option<&Grn>> = sources
        .iter()
        .map(|s| (&s.grn, s.parent.as_ref()))
        .collect();

    let mut seen = HashSet::new();
    let mut cursor = parents.get(placed).copied().flatten();
    while let Some(grn) = cursor {
        if grn == placed {
            return Err(StorageError::CycleDetected {
                folder: placed.to_string(),
            });
        }
        if !seen.insert(grn) {
            break;
        }
        cursor = parents.get(grn).copied().flatten();
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum SiblingOrder {
    /// Siblings keep their previous relative order; newcomers go last.
    Previous,
    /// Siblings are ordered by uid.
    Fresh,
}

/// Folders of one tenant linked by index.
struct Arena {
    sources: Vec<FolderSource>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
}

impl Arena {
    fn build(
        sources: Vec<FolderSource>,
        previous: &HashMap<Grn, FolderNode>,
        order: SiblingOrder,
    ) -> Self {
        let index: HashMap<&Grn, usize> = sources
            .iter()
            .enumerate()
            .map(|(i, s)| (&s.grn, i))
            .collect();

        let mut children = vec![Vec::new(); sources.len()];
        let mut roots = Vec::new();
        for (i, source) in sources.iter().enumerate() {
            match &source.parent {
                None => roots.push(i),
                Some(parent) => {
                    if let Some(&p) = index.get(parent) {
                        children[p].push(i);
                    }
                }
            }
        }

        let sort_key = |i: usize| {
            let source = &sources[i];
            let left = match order {
                SiblingOrder::Fresh => 0,
                SiblingOrder::Previous => previous
                    .get(&source.grn)
                    .filter(|node| !node.detached && node.parent == source.parent)
                    .map_or(i64::MAX, |node| node.left),
            };
            (left, source.uid.as_str())
        };
        roots.sort_by(|a, b| sort_key(*a).cmp(&sort_key(*b)));
        for siblings in &mut children {
            siblings.sort_by(|a, b| sort_key(*a).cmp(&sort_key(*b)));
        }
        drop(index);

        Self {
            sources,
            children,
            roots,
        }
    }

    /// Assigns intervals depth-first from 1. Unreachable folders are detached.
    fn number(&self, tenant_id: TenantId, previous: &HashMap<Grn, FolderNode>) -> Vec<FolderNode> {
        let mut out = Vec::with_capacity(self.sources.len());
        let mut visited = vec![false; self.sources.len()];
        let mut counter = 0;
        let mut path = Vec::new();

        for &root in &self.roots {
            self.visit(root, tenant_id, "/", &mut path, &mut counter, &mut visited, &mut out);
        }

        for (i, source) in self.sources.iter().enumerate() {
            if visited[i] {
                continue;
            }
            let node = match previous.get(&source.grn) {
                Some(prev) => FolderNode {
                    parent: source.parent.clone(),
                    detached: true,
                    ..prev.clone()
                },
                None => FolderNode {
                    grn: source.grn.clone(),
                    tenant_id,
                    uid: source.uid.clone(),
                    parent: source.parent.clone(),
                    slug_path: String::new(),
                    tree: Vec::new(),
                    depth: 0,
                    left: 0,
                    right: 0,
                    detached: true,
                },
            };
            debug!(grn = %source.grn, "folder detached from tree");
            out.push(node);
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        idx: usize,
        tenant_id: TenantId,
        parent_slug_path: &str,
        path: &mut Vec<TreeEntry>,
        counter: &mut i64,
        visited: &mut [bool],
        out: &mut Vec<FolderNode>,
    ) {
        visited[idx] = true;
        let source = &self.sources[idx];

        *counter += 1;
        let left = *counter;
        path.push(TreeEntry {
            uid: source.uid.clone(),
            title: source.title.clone(),
        });
        let slug_path = format!("{parent_slug_path}{}/", source.slug);
        let tree = path.clone();

        for &child in &self.children[idx] {
            if !visited[child] {
                self.visit(child, tenant_id, &slug_path, path, counter, visited, out);
            }
        }

        *counter += 1;
        out.push(FolderNode {
            grn: source.grn.clone(),
            tenant_id,
            uid: source.uid.clone(),
            parent: source.parent.clone(),
            slug_path,
            depth: tree.len() as i64,
            tree,
            left,
            right: *counter,
            detached: false,
        });
        path.pop();
    }
}

/// Persists `nodes`, touching only rows that changed. Returns the count.
fn write_nodes(
    conn: &Connection,
    previous: &HashMap<Grn, FolderNode>,
    nodes: &[FolderNode],
) -> StorageResult<usize> {
    let mut changed = 0;
    let mut upsert = conn.prepare_cached(
        "INSERT INTO entity_folder
             (grn, tenant_id, uid, parent_grn, slug_path, tree, depth, lft, rgt, detached)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(grn) DO UPDATE SET
             parent_grn = excluded.parent_grn,
             slug_path = excluded.slug_path,
             tree = excluded.tree,
             depth = excluded.depth,
             lft = excluded.lft,
             rgt = excluded.rgt,
             detached = excluded.detached",
    )?;
    for node in nodes {
        if previous.get(&node.grn) == Some(node) {
            continue;
        }
        upsert.execute(params![
            node.grn.as_str(),
            node.tenant_id.get(),
            node.uid,
            grn_text(node.parent.as_ref()),
            node.slug_path,
            serde_json::to_string(&node.tree)?,
            node.depth,
            node.left,
            node.right,
            node.detached,
        ])?;
        changed += 1;
    }

    let current: HashSet<&Grn> = nodes.iter().map(|n| &n.grn).collect();
    for grn in previous.keys().filter(|grn| !current.contains(grn)) {
        conn.execute(
            "DELETE FROM entity_folder WHERE grn = ?1",
            params![grn.as_str()],
        )?;
        changed += 1;
    }
    Ok(changed)
}

fn renumber_with(
    conn: &Connection,
    tenant_id: TenantId,
    sources: Vec<FolderSource>,
    order: SiblingOrder,
) -> StorageResult<usize> {
    let previous: HashMap<Grn, FolderNode> = load_nodes(conn, tenant_id)?
        .into_iter()
        .map(|node| (node.grn.clone(), node))
        .collect();
    let arena = Arena::build(sources, &previous, order);
    let nodes = arena.number(tenant_id, &previous);
    write_nodes(conn, &previous, &nodes)
}

/// Renumbers the tenant after `placed` was created or moved.
pub(crate) fn place(conn: &Connection, tenant_id: TenantId, placed: &Grn) -> StorageResult<()> {
    let sources = load_sources(conn, tenant_id)?;
    check_cycle(&sources, placed)?;
    renumber_with(conn, tenant_id, sources, SiblingOrder::Previous)?;
    Ok(())
}

/// Renumbers the tenant from the current folder entities.
pub(crate) fn renumber(conn: &Connection, tenant_id: TenantId) -> StorageResult<usize> {
    let sources = load_sources(conn, tenant_id)?;
    renumber_with(conn, tenant_id, sources, SiblingOrder::Previous)
}

pub(crate) fn tenants_with_detached(conn: &Connection) -> StorageResult<Vec<TenantId>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT tenant_id FROM entity_folder WHERE detached = 1 ORDER BY tenant_id",
    )?;
    let tenants = stmt
        .query_map([], |row| Ok(TenantId::new(row.get(0)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tenants)
}

pub(crate) fn count_detached(conn: &Connection, tenant_id: TenantId) -> StorageResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entity_folder WHERE tenant_id = ?1 AND detached = 1",
        params![tenant_id.get()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Checks the interval invariants of one tenant's nodes.
///
/// Attached nodes must have `left < right`, use every bound in `1..=2n`
/// exactly once, nest without overlap, and agree with their `parent`,
/// `depth` and `tree`. Detached nodes are not checked.
pub fn validate_intervals(nodes: &[FolderNode]) -> Result<(), String> {
    let mut attached: Vec<&FolderNode> = nodes.iter().filter(|n| !n.detached).collect();
    attached.sort_by_key(|n| n.left);

    let mut bounds: Vec<i64> = attached.iter().flat_map(|n| [n.left, n.right]).collect();
    bounds.sort_unstable();
    if bounds.iter().zip(1..).any(|(&bound, expected)| bound != expected) {
        return Err(format!(
            "bounds of {} attached folders do not cover 1..={}",
            attached.len(),
            attached.len() * 2
        ));
    }

    let mut stack: Vec<&FolderNode> = Vec::new();
    for node in attached {
        if node.left >= node.right {
            return Err(format!("{}: left {} >= right {}", node.uid, node.left, node.right));
        }
        while stack.last().is_some_and(|top| top.right < node.left) {
            stack.pop();
        }

        let parent = stack.last().copied();
        if let Some(parent) = parent {
            if node.right > parent.right {
                return Err(format!("{} overlaps {}", node.uid, parent.uid));
            }
        }
        if node.parent.as_ref() != parent.map(|p| &p.grn) {
            return Err(format!("{}: interval parent does not match folder column", node.uid));
        }
        let depth = stack.len() as i64 + 1;
        if node.depth != depth || node.tree.len() as i64 != depth {
            return Err(format!("{}: depth {} at nesting level {depth}", node.uid, node.depth));
        }
        if node.tree.last().map(|entry| entry.uid.as_str()) != Some(node.uid.as_str()) {
            return Err(format!("{}: tree does not end at the folder itself", node.uid));
        }
        stack.push(node);
    }
    Ok(())
}

impl EntityStore {
    /// Tree row of a folder.
    pub fn folder(&self, grn: &Grn) -> StorageResult<FolderNode> {
        let conn = self.conn()?;
        select_node(&conn, grn)?.ok_or_else(|| StorageError::NotFound(grn.to_string()))
    }

    /// All tree rows of a tenant: attached in interval order, then detached.
    pub fn folders(&self, tenant_id: TenantId) -> StorageResult<Vec<FolderNode>> {
        let conn = self.conn()?;
        load_nodes(&conn, tenant_id)
    }

    /// Attached folders strictly inside `folder`, in interval order.
    pub fn descendants(&self, folder: &Grn) -> StorageResult<Vec<FolderNode>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM entity_folder n
             JOIN entity_folder a ON a.tenant_id = n.tenant_id
             WHERE a.grn = ?1 AND a.detached = 0 AND n.detached = 0
               AND n.lft > a.lft AND n.rgt < a.rgt
             ORDER BY n.lft"
        );
        let mut stmt = conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params![folder.as_str()], node_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    /// Whether the entity at `grn` lies inside `folder`.
    ///
    /// A folder is inside its strict ancestors; any other entity is inside
    /// the folder holding it and that folder's ancestors. Detached folders
    /// contain nothing.
    pub fn is_inside(&self, grn: &Grn, folder: &Grn) -> StorageResult<bool> {
        let conn = self.conn()?;
        let entity = active_entity(&conn, grn)?;

        let Some(target) = select_node(&conn, folder)?.filter(|n| !n.detached) else {
            return Ok(false);
        };
        let container = if entity.is_folder() {
            entity.grn
        } else {
            match entity.folder {
                Some(f) if &f == folder => return Ok(true),
                Some(f) => f,
                None => return Ok(false),
            }
        };
        Ok(select_node(&conn, &container)?.is_some_and(|node| target.is_ancestor_of(&node)))
    }

    /// Path of folders from the root to the entity's position.
    ///
    /// For a folder the path ends at the folder itself; for other entities
    /// it ends at the folder holding them. Empty at the root or when the
    /// folder is detached.
    pub fn ancestry(&self, grn: &Grn) -> StorageResult<Vec<TreeEntry>> {
        let conn = self.conn()?;
        let entity = active_entity(&conn, grn)?;
        let container = if entity.is_folder() {
            Some(entity.grn)
        } else {
            entity.folder
        };
        let Some(container) = container else {
            return Ok(Vec::new());
        };
        Ok(select_node(&conn, &container)?
            .filter(|node| !node.detached)
            .map(|node| node.tree)
            .unwrap_or_default())
    }

    /// Verifies a tenant's intervals. Corruption is logged and fatal.
    pub fn check_tree(&self, tenant_id: TenantId) -> StorageResult<()> {
        let conn = self.conn()?;
        let nodes = load_nodes(&conn, tenant_id)?;
        let sources = load_sources(&conn, tenant_id)?;
        drop(conn);

        let rows: HashSet<&Grn> = nodes.iter().map(|n| &n.grn).collect();
        let missing = sources.iter().find(|s| !rows.contains(&s.grn));
        let result = match missing {
            Some(source) => Err(format!("folder {} has no tree row", source.uid)),
            None => validate_intervals(&nodes),
        };

        if let Err(detail) = result {
            error!(tenant_id = %tenant_id, %detail, "folder tree corrupt; rebuild required");
            return Err(StorageError::TreeCorruption {
                tenant_id: tenant_id.get(),
                detail,
            });
        }
        Ok(())
    }

    /// Recomputes a tenant's tree from the folder entities alone.
    ///
    /// Siblings are ordered by uid. Returns the number of rows rewritten.
    pub fn rebuild_tree(&self, tenant_id: TenantId) -> StorageResult<usize> {
        let tree_lock = self.tree_lock(tenant_id)?;
        let _guard = tree_lock.lock().map_err(|_| StorageError::LockPoisoned)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let sources = load_sources(&tx, tenant_id)?;
        let changed = renumber_with(&tx, tenant_id, sources, SiblingOrder::Fresh)?;
        tx.commit()?;

        info!(tenant_id = %tenant_id, changed, "rebuilt folder tree");
        Ok(changed)
    }

    /// Renumbers a tenant keeping sibling order. Returns rows rewritten.
    pub(crate) fn renumber_tenant(&self, tenant_id: TenantId) -> StorageResult<usize> {
        let tree_lock = self.tree_lock(tenant_id)?;
        let _guard = tree_lock.lock().map_err(|_| StorageError::LockPoisoned)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = renumber(&tx, tenant_id)?;
        tx.commit()?;
        Ok(changed)
    }
}

fn active_entity(conn: &Connection, grn: &Grn) -> StorageResult<Entity> {
    select_entity(conn, grn)?
        .filter(Entity::is_active)
        .ok_or_else(|| StorageError::NotFound(grn.to_string()))
}
