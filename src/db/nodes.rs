//! Content tree persistence
//!
//! SQLite implementation of [`NodeStore`]. Position-changing operations run
//! inside a single transaction so readers never observe a half-shifted
//! sibling set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::store::{NodeStore, StoreError};
use crate::tree::{NewNode, Node, NodeKind, Payload, PulledNode, PulledParent};

macro_rules! node_columns {
    () => {
        "local_id, kind, remote_id, parent_id, position, payload_json, created_at, updated_at"
    };
}

/// SQLite backed node store
#[derive(Clone)]
pub struct SqliteNodeStore {
    pool: SqlitePool,
}

impl SqliteNodeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl NodeStore for SqliteNodeStore {
    async fn get(&self, id: i64) -> Result<Option<Node>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_node(&mut conn, id).await
    }

    async fn find_by_remote_id(
        &self,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<Option<Node>, StoreError> {
        let row = sqlx::query_as::<_, NodeRow>(concat!(
            "SELECT ",
            node_columns!(),
            " FROM nodes WHERE kind = ? AND remote_id = ?"
        ))
        .bind(kind.as_str())
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NodeRow::into_node).transpose()
    }

    async fn find_siblings_ordered(
        &self,
        kind: NodeKind,
        parent_id: Option<i64>,
    ) -> Result<Vec<Node>, StoreError> {
        let rows = sqlx::query_as::<_, NodeRow>(concat!(
            "SELECT ",
            node_columns!(),
            " FROM nodes WHERE kind = ? AND parent_id IS ? ORDER BY position ASC, local_id ASC"
        ))
        .bind(kind.as_str())
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NodeRow::into_node).collect()
    }

    async fn max_position(
        &self,
        kind: NodeKind,
        parent_id: Option<i64>,
    ) -> Result<Option<i32>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        max_position_in(&mut conn, kind, parent_id).await
    }

    async fn shift_range(
        &self,
        kind: NodeKind,
        parent_id: Option<i64>,
        from: i32,
        to: i32,
        delta: i32,
    ) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        shift_in(&mut conn, kind, parent_id, from, to, delta).await
    }

    async fn insert(&self, node: NewNode) -> Result<Node, StoreError> {
        let kind = node.payload.kind();
        let payload_json = serde_json::to_string(&node.payload)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        validate_parent(&mut tx, kind, node.parent_id).await?;

        let count = max_position_in(&mut tx, kind, node.parent_id)
            .await?
            .unwrap_or(0);
        let position = match node.position {
            Some(requested) => requested.clamp(1, count + 1),
            None => count + 1,
        };
        shift_in(&mut tx, kind, node.parent_id, position, count, 1).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO nodes (kind, remote_id, parent_id, position, payload_json, created_at, updated_at)
            VALUES (?, NULL, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(kind.as_str())
        .bind(node.parent_id)
        .bind(position)
        .bind(&payload_json)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();
        let created = fetch_node(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        tx.commit().await?;

        tracing::debug!("Inserted {} {} at position {}", kind, id, position);
        Ok(created)
    }

    async fn move_node(&self, id: i64, position: i32) -> Result<Node, StoreError> {
        let mut tx = self.pool.begin().await?;
        let node = fetch_node(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        let kind = node.kind();

        let count = max_position_in(&mut tx, kind, node.parent_id)
            .await?
            .unwrap_or(node.position);
        let target = position.clamp(1, count.max(1));

        if target != node.position {
            if target < node.position {
                shift_in(&mut tx, kind, node.parent_id, target, node.position - 1, 1).await?;
            } else {
                shift_in(&mut tx, kind, node.parent_id, node.position + 1, target, -1).await?;
            }

            sqlx::query("UPDATE nodes SET position = ?, updated_at = ? WHERE local_id = ?")
                .bind(target)
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let moved = fetch_node(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        tx.commit().await?;

        Ok(moved)
    }

    async fn update_payload(&self, id: i64, payload: Payload) -> Result<Node, StoreError> {
        let mut tx = self.pool.begin().await?;
        let node = fetch_node(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        if node.kind() != payload.kind() {
            return Err(StoreError::KindMismatch {
                expected: node.kind(),
                found: payload.kind(),
            });
        }

        sqlx::query("UPDATE nodes SET payload_json = ?, updated_at = ? WHERE local_id = ?")
            .bind(serde_json::to_string(&payload)?)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let updated = fetch_node(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        tx.commit().await?;

        Ok(updated)
    }

    async fn set_remote_id(&self, id: i64, remote_id: Option<i64>) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE nodes SET remote_id = ?, updated_at = ? WHERE local_id = ?")
                .bind(remote_id)
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let node = fetch_node(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        let result = sqlx::query(
            r#"
            WITH RECURSIVE subtree(id) AS (
                SELECT ?
                UNION ALL
                SELECT n.local_id FROM nodes n JOIN subtree s ON n.parent_id = s.id
            )
            DELETE FROM nodes WHERE local_id IN (SELECT id FROM subtree)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        shift_in(
            &mut tx,
            node.kind(),
            node.parent_id,
            node.position + 1,
            i32::MAX,
            -1,
        )
        .await?;
        tx.commit().await?;

        tracing::debug!(
            "Removed {} {} ({} rows including descendants)",
            node.kind(),
            id,
            result.rows_affected()
        );
        Ok(())
    }

    async fn save_tree(&self, nodes: Vec<PulledNode>) -> Result<Vec<Node>, StoreError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let mut saved_ids: Vec<i64> = Vec::with_capacity(nodes.len());
        let mut touched: Vec<(NodeKind, Option<i64>)> = Vec::new();

        for (index, pulled) in nodes.iter().enumerate() {
            let kind = pulled.payload.kind();
            let parent_id = match pulled.parent {
                PulledParent::Local(parent) => parent,
                PulledParent::Pulled(parent) if parent < index => Some(saved_ids[parent]),
                PulledParent::Pulled(parent) => {
                    return Err(StoreError::InvalidParent {
                        kind,
                        reason: format!("pulled entry {} must precede its child {}", parent, index),
                    })
                }
            };
            let payload_json = serde_json::to_string(&pulled.payload)?;

            let existing = match pulled.existing {
                Some(id) => fetch_node(&mut tx, id).await?,
                None => None,
            };

            let id = match existing {
                Some(current) => {
                    if current.kind() != kind {
                        return Err(StoreError::KindMismatch {
                            expected: current.kind(),
                            found: kind,
                        });
                    }
                    touch(&mut touched, kind, current.parent_id);

                    sqlx::query(
                        r#"
                        UPDATE nodes
                        SET remote_id = ?, parent_id = ?, position = ?, payload_json = ?, updated_at = ?
                        WHERE local_id = ?
                        "#,
                    )
                    .bind(pulled.remote_id)
                    .bind(parent_id)
                    .bind(pulled.position)
                    .bind(&payload_json)
                    .bind(&now)
                    .bind(current.local_id)
                    .execute(&mut *tx)
                    .await?;

                    current.local_id
                }
                None => {
                    let result = sqlx::query(
                        r#"
                        INSERT INTO nodes (kind, remote_id, parent_id, position, payload_json, created_at, updated_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(kind.as_str())
                    .bind(pulled.remote_id)
                    .bind(parent_id)
                    .bind(pulled.position)
                    .bind(&payload_json)
                    .bind(&now)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await?;

                    result.last_insert_rowid()
                }
            };

            touch(&mut touched, kind, parent_id);
            saved_ids.push(id);
        }

        // Pulled positions may collide with unsynced local siblings
        for (kind, parent_id) in &touched {
            renumber_in(&mut tx, *kind, *parent_id).await?;
        }

        let mut saved = Vec::with_capacity(saved_ids.len());
        for id in &saved_ids {
            saved.push(
                fetch_node(&mut tx, *id)
                    .await?
                    .ok_or(StoreError::NotFound(*id))?,
            );
        }
        tx.commit().await?;

        Ok(saved)
    }
}

fn touch(touched: &mut Vec<(NodeKind, Option<i64>)>, kind: NodeKind, parent_id: Option<i64>) {
    if !touched.contains(&(kind, parent_id)) {
        touched.push((kind, parent_id));
    }
}

async fn fetch_node(conn: &mut SqliteConnection, id: i64) -> Result<Option<Node>, StoreError> {
    let row = sqlx::query_as::<_, NodeRow>(concat!(
        "SELECT ",
        node_columns!(),
        " FROM nodes WHERE local_id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(NodeRow::into_node).transpose()
}

async fn max_position_in(
    conn: &mut SqliteConnection,
    kind: NodeKind,
    parent_id: Option<i64>,
) -> Result<Option<i32>, StoreError> {
    let last: Option<(i64, i64)> = sqlx::query_as(
        "SELECT local_id, position FROM nodes WHERE kind = ? AND parent_id IS ? \
         ORDER BY position DESC LIMIT 1",
    )
    .bind(kind.as_str())
    .bind(parent_id)
    .fetch_optional(&mut *conn)
    .await?;

    last.map(|(id, position)| {
        i32::try_from(position).map_err(|_| StoreError::Corrupt {
            id,
            reason: format!("position {} out of range", position),
        })
    })
    .transpose()
}

async fn shift_in(
    conn: &mut SqliteConnection,
    kind: NodeKind,
    parent_id: Option<i64>,
    from: i32,
    to: i32,
    delta: i32,
) -> Result<u64, StoreError> {
    if from > to || delta == 0 {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        UPDATE nodes SET position = position + ?, updated_at = ?
        WHERE kind = ? AND parent_id IS ? AND position BETWEEN ? AND ?
        "#,
    )
    .bind(delta)
    .bind(Utc::now().to_rfc3339())
    .bind(kind.as_str())
    .bind(parent_id)
    .bind(from)
    .bind(to)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Rewrite sibling positions to `1..=N`, keeping their relative order
async fn renumber_in(
    conn: &mut SqliteConnection,
    kind: NodeKind,
    parent_id: Option<i64>,
) -> Result<(), StoreError> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT local_id, position FROM nodes
        WHERE kind = ? AND parent_id IS ?
        ORDER BY position ASC, local_id ASC
        "#,
    )
    .bind(kind.as_str())
    .bind(parent_id)
    .fetch_all(&mut *conn)
    .await?;

    for (index, (id, position)) in rows.into_iter().enumerate() {
        let expected = index as i64 + 1;
        if position != expected {
            sqlx::query("UPDATE nodes SET position = ? WHERE local_id = ?")
                .bind(expected)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
    }

    Ok(())
}

async fn validate_parent(
    conn: &mut SqliteConnection,
    kind: NodeKind,
    parent_id: Option<i64>,
) -> Result<(), StoreError> {
    match (kind.parent(), parent_id) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(StoreError::InvalidParent {
            kind,
            reason: "courses are root nodes".to_string(),
        }),
        (Some(expected), None) => Err(StoreError::InvalidParent {
            kind,
            reason: format!("a {} parent is required", expected),
        }),
        (Some(expected), Some(parent_id)) => {
            let parent = fetch_node(conn, parent_id).await?.ok_or_else(|| {
                StoreError::InvalidParent {
                    kind,
                    reason: format!("parent {} does not exist", parent_id),
                }
            })?;

            if parent.kind() != expected {
                return Err(StoreError::InvalidParent {
                    kind,
                    reason: format!("parent {} is a {}, expected a {}", parent_id, parent.kind(), expected),
                });
            }

            Ok(())
        }
    }
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    local_id: i64,
    kind: String,
    remote_id: Option<i64>,
    parent_id: Option<i64>,
    position: i64,
    payload_json: String,
    created_at: String,
    updated_at: String,
}

impl NodeRow {
    fn into_node(self) -> Result<Node, StoreError> {
        let id = self.local_id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };

        let kind: NodeKind = self.kind.parse().map_err(|e| corrupt(format!("{}", e)))?;
        let payload: Payload = serde_json::from_str(&self.payload_json)?;
        if payload.kind() != kind {
            return Err(corrupt(format!(
                "payload kind {} stored on a {} row",
                payload.kind(),
                kind
            )));
        }

        let position = i32::try_from(self.position)
            .map_err(|_| corrupt(format!("position {} out of range", self.position)))?;

        Ok(Node {
            local_id: id,
            remote_id: self.remote_id,
            parent_id: self.parent_id,
            position,
            payload,
            created_at: parse_timestamp(&self.created_at).map_err(corrupt)?,
            updated_at: parse_timestamp(&self.updated_at).map_err(corrupt)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {:?}: {}", value, e))
}
