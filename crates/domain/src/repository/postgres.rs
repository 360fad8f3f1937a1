use std::collections::HashMap;

use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::OrderRepository;
use crate::error::{RepositoryError, Result};
use crate::order::{Money, NewOrder, Order, OrderItem};

const ORDER_COLUMNS: &str = "id, user_id, total_amount_cents, status, status_note, \
     user_deleted, inventory_settled, version, created_at, updated_at";

/// PostgreSQL-backed order repository.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a new PostgreSQL order repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let status: String = row.try_get("status")?;

        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
            status: status.parse()?,
            status_note: row.try_get("status_note")?,
            user_deleted: row.try_get("user_deleted")?,
            inventory_settled: row.try_get("inventory_settled")?,
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<(i64, OrderItem)> {
        let quantity: i64 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity)
            .map_err(|_| RepositoryError::Corrupt(format!("quantity out of range: {quantity}")))?;

        let item = OrderItem {
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity,
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
        };
        Ok((row.try_get("order_id")?, item))
    }

    async fn load_items(&self, order_ids: &[i64]) -> Result<HashMap<i64, Vec<OrderItem>>> {
        let mut items: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        if order_ids.is_empty() {
            return Ok(items);
        }

        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, name, price_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let (order_id, item) = Self::row_to_item(row)?;
            items.entry(order_id).or_default().push(item);
        }
        Ok(items)
    }

    /// Attaches items to order rows with one extra query.
    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.load_items(&ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(&id).unwrap_or_default()))
            .collect()
    }

    /// Tells a missing order apart from a stale version after a conditional
    /// write matched nothing.
    async fn write_miss(&self, id: OrderId, expected: i64) -> RepositoryError {
        let actual: std::result::Result<Option<i64>, sqlx::Error> =
            sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                .bind(id.as_i64())
                .fetch_optional(&self.pool)
                .await;

        match actual {
            Ok(Some(actual)) => RepositoryError::VersionConflict {
                order_id: id,
                expected,
                actual,
            },
            Ok(None) => RepositoryError::NotFound(id),
            Err(e) => RepositoryError::Database(e),
        }
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[tracing::instrument(skip(self, order), fields(user_id = %order.user_id))]
    async fn insert(&self, order: NewOrder) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (user_id, total_amount_cents, status, inventory_settled)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at, updated_at, version
            "#,
        )
        .bind(order.user_id.as_i64())
        .bind(order.total_amount.cents())
        .bind(order.status.as_str())
        .bind(order.inventory_settled)
        .fetch_one(&mut *tx)
        .await?;

        let id: i64 = row.try_get("id")?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, quantity, name, price_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id)
            .bind(item.product_id.as_i64())
            .bind(i64::from(item.quantity))
            .bind(&item.name)
            .bind(item.price.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut stored = Order::from_new(OrderId::new(id), order, row.try_get("created_at")?);
        stored.updated_at = row.try_get("updated_at")?;
        stored.version = row.try_get("version")?;
        Ok(stored)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id.as_i64())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY id"
        ))
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn open_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE user_id = $1 AND status NOT IN ('completed', 'cancelled')
            ORDER BY id
            "#
        ))
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn open_orders_with_product(&self, product_id: ProductId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status NOT IN ('completed', 'cancelled')
              AND EXISTS (
                  SELECT 1 FROM order_items i
                  WHERE i.order_id = orders.id AND i.product_id = $1
              )
            ORDER BY id
            "#
        ))
        .bind(product_id.as_i64())
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.id, version = order.version))]
    async fn update(&self, order: &Order) -> Result<Order> {
        let row: Option<PgRow> = sqlx::query(&format!(
            r#"
            UPDATE orders
            SET status = $3,
                status_note = $4,
                user_deleted = $5,
                inventory_settled = $6,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.id.as_i64())
        .bind(order.version)
        .bind(order.status.as_str())
        .bind(&order.status_note)
        .bind(order.user_deleted)
        .bind(order.inventory_settled)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self
                .hydrate(vec![row])
                .await?
                .pop()
                .ok_or(RepositoryError::NotFound(order.id)),
            None => Err(self.write_miss(order.id, order.version).await),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: OrderId, expected_version: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1 AND version = $2")
            .bind(id.as_i64())
            .bind(expected_version)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.write_miss(id, expected_version).await);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("TRUNCATE TABLE order_items, orders RESTART IDENTITY")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
