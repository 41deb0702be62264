//! `PostgreSQL` implementation of [`CustomerStore`].
//!
//! Queries are checked at runtime (`sqlx::query_as`) so the crate builds
//! without a live database. Schema lives in `crates/sync/migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::instrument;

use omnicrm_core::{
    Channel, ContactSnapshot, Customer, CustomerId, Email, LineItem, Money, Order, OrderId,
    OrderStatus, Phone, RiskTier, SnapshotFields,
};

use super::{ConflictKey, CustomerStore, CustomerUpsert, OrderUpsert, StoreError};

/// Prefix a customer query tail with the full column list.
macro_rules! select_customers {
    ($tail:literal) => {
        concat!(
            "SELECT id, external_id, email, phone, display_name, tags, lifetime_value, ",
            "order_count, last_order_at, created_at, updated_at FROM customers ",
            $tail
        )
    };
}

/// Prefix an order query tail with the full column list.
macro_rules! select_orders {
    ($tail:literal) => {
        concat!(
            "SELECT id, customer_id, external_order_id, order_number, status, ",
            "financial_status, fulfillment_status, total_amount, currency, line_items, ",
            "remote_created_at, remote_updated_at FROM orders ",
            $tail
        )
    };
}

const UPSERT_CUSTOMER_BY_EXTERNAL_ID: &str = r"
    INSERT INTO customers
        (external_id, email, phone, display_name, tags, lifetime_value, order_count, last_order_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (external_id) DO UPDATE SET
        email = COALESCE(EXCLUDED.email, customers.email),
        phone = COALESCE(EXCLUDED.phone, customers.phone),
        display_name = EXCLUDED.display_name,
        tags = EXCLUDED.tags,
        lifetime_value = EXCLUDED.lifetime_value,
        order_count = EXCLUDED.order_count,
        last_order_at = EXCLUDED.last_order_at,
        updated_at = NOW()
    RETURNING id
";

const UPSERT_CUSTOMER_BY_EMAIL: &str = r"
    INSERT INTO customers
        (external_id, email, phone, display_name, tags, lifetime_value, order_count, last_order_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (email) DO UPDATE SET
        external_id = COALESCE(EXCLUDED.external_id, customers.external_id),
        phone = COALESCE(EXCLUDED.phone, customers.phone),
        display_name = EXCLUDED.display_name,
        tags = EXCLUDED.tags,
        lifetime_value = EXCLUDED.lifetime_value,
        order_count = EXCLUDED.order_count,
        last_order_at = EXCLUDED.last_order_at,
        updated_at = NOW()
    RETURNING id
";

const UPSERT_ORDER: &str = r"
    INSERT INTO orders
        (customer_id, external_order_id, order_number, status, financial_status,
         fulfillment_status, total_amount, currency, line_items, remote_created_at,
         remote_updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    ON CONFLICT (external_order_id) DO UPDATE SET
        customer_id = COALESCE(EXCLUDED.customer_id, orders.customer_id),
        order_number = EXCLUDED.order_number,
        status = EXCLUDED.status,
        financial_status = EXCLUDED.financial_status,
        fulfillment_status = EXCLUDED.fulfillment_status,
        total_amount = EXCLUDED.total_amount,
        currency = EXCLUDED.currency,
        line_items = EXCLUDED.line_items,
        remote_created_at = EXCLUDED.remote_created_at,
        remote_updated_at = EXCLUDED.remote_updated_at,
        updated_at = NOW()
    RETURNING id
";

const UPSERT_SNAPSHOT: &str = r"
    INSERT INTO contact_snapshots
        (handle, channel, display_name, lifetime_value, order_count, risk_tier, tags,
         average_ticket, last_fulfillment_status, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
    ON CONFLICT (handle, channel) DO UPDATE SET
        display_name = EXCLUDED.display_name,
        lifetime_value = EXCLUDED.lifetime_value,
        order_count = EXCLUDED.order_count,
        risk_tier = EXCLUDED.risk_tier,
        tags = EXCLUDED.tags,
        average_ticket = EXCLUDED.average_ticket,
        last_fulfillment_status = EXCLUDED.last_fulfillment_status,
        updated_at = NOW()
";

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: CustomerId,
    external_id: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    display_name: String,
    tags: Vec<String>,
    lifetime_value: Decimal,
    order_count: i64,
    last_order_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CustomerRow> for Customer {
    type Error = StoreError;

    fn try_from(row: CustomerRow) -> Result<Self, Self::Error> {
        let email = row
            .email
            .map(|e| Email::parse(&e))
            .transpose()
            .map_err(|e| StoreError::DataCorruption(format!("invalid email in database: {e}")))?;
        let phone = row
            .phone
            .map(|p| Phone::parse(&p))
            .transpose()
            .map_err(|e| StoreError::DataCorruption(format!("invalid phone in database: {e}")))?;

        Ok(Self {
            id: row.id,
            external_id: row.external_id,
            email,
            phone,
            display_name: row.display_name,
            tags: row.tags,
            lifetime_value: row.lifetime_value,
            order_count: row.order_count,
            last_order_at: row.last_order_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    customer_id: Option<CustomerId>,
    external_order_id: String,
    order_number: String,
    status: String,
    financial_status: Option<String>,
    fulfillment_status: Option<String>,
    total_amount: Decimal,
    currency: String,
    line_items: Json<Vec<LineItem>>,
    remote_created_at: Option<DateTime<Utc>>,
    remote_updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(StoreError::DataCorruption)?;

        Ok(Self {
            id: row.id,
            customer_id: row.customer_id,
            external_order_id: row.external_order_id,
            order_number: row.order_number,
            status,
            financial_status: row.financial_status,
            fulfillment_status: row.fulfillment_status,
            total: Money::new(row.total_amount, &row.currency),
            line_items: row.line_items.0,
            remote_created_at: row.remote_created_at,
            remote_updated_at: row.remote_updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    handle: String,
    channel: String,
    display_name: String,
    lifetime_value: Decimal,
    order_count: i64,
    risk_tier: String,
    tags: Vec<String>,
    average_ticket: Decimal,
    last_fulfillment_status: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRow> for ContactSnapshot {
    type Error = StoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        let risk_tier = row
            .risk_tier
            .parse::<RiskTier>()
            .map_err(StoreError::DataCorruption)?;

        Ok(Self {
            handle: row.handle,
            channel: Channel::new(&row.channel),
            fields: SnapshotFields {
                display_name: row.display_name,
                lifetime_value: row.lifetime_value,
                order_count: row.order_count,
                risk_tier,
                tags: row.tags,
                average_ticket: row.average_ticket,
                last_fulfillment_status: row.last_fulfillment_status,
            },
            updated_at: row.updated_at,
        })
    }
}

fn into_customers(rows: Vec<CustomerRow>) -> Result<Vec<Customer>, StoreError> {
    rows.into_iter().map(Customer::try_from).collect()
}

fn into_orders(rows: Vec<OrderRow>) -> Result<Vec<Order>, StoreError> {
    rows.into_iter().map(Order::try_from).collect()
}

// =============================================================================
// Repository
// =============================================================================

/// Customer store backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgCustomerStore {
    pool: PgPool,
}

impl PgCustomerStore {
    /// Create a new store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CustomerStore for PgCustomerStore {
    #[instrument(skip(self, record), fields(external_id = ?record.external_id))]
    async fn upsert_customer(
        &self,
        record: CustomerUpsert,
        key: ConflictKey,
    ) -> Result<CustomerId, StoreError> {
        record.validate(key)?;
        let sql = match key {
            ConflictKey::ExternalId => UPSERT_CUSTOMER_BY_EXTERNAL_ID,
            ConflictKey::Email => UPSERT_CUSTOMER_BY_EMAIL,
        };

        let id: CustomerId = sqlx::query_scalar(sql)
            .bind(record.external_id.as_deref())
            .bind(record.email.as_ref().map(Email::as_str))
            .bind(record.phone.as_ref().map(Phone::as_str))
            .bind(&record.display_name)
            .bind(&record.tags)
            .bind(record.lifetime_value)
            .bind(record.order_count)
            .bind(record.last_order_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(id)
    }

    #[instrument(skip(self, record), fields(external_order_id = %record.external_order_id))]
    async fn upsert_order(&self, record: OrderUpsert) -> Result<OrderId, StoreError> {
        record.validate()?;

        let id: OrderId = sqlx::query_scalar(UPSERT_ORDER)
            .bind(record.customer_id)
            .bind(&record.external_order_id)
            .bind(&record.order_number)
            .bind(record.status.as_str())
            .bind(record.financial_status.as_deref())
            .bind(record.fulfillment_status.as_deref())
            .bind(record.total.amount)
            .bind(&record.total.currency)
            .bind(Json(&record.line_items))
            .bind(record.remote_created_at)
            .bind(record.remote_updated_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(id)
    }

    #[instrument(skip(self, fields))]
    async fn update_snapshot(
        &self,
        handle: &str,
        channel: &Channel,
        fields: SnapshotFields,
    ) -> Result<(), StoreError> {
        sqlx::query(UPSERT_SNAPSHOT)
            .bind(handle)
            .bind(channel.as_str())
            .bind(&fields.display_name)
            .bind(fields.lifetime_value)
            .bind(fields.order_count)
            .bind(fields.risk_tier.as_str())
            .bind(&fields.tags)
            .bind(fields.average_ticket)
            .bind(fields.last_fulfillment_status.as_deref())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn attach_external_id(
        &self,
        id: CustomerId,
        external_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE customers
            SET external_id = $2, updated_at = NOW()
            WHERE id = $1
              AND external_id IS NULL
              AND NOT EXISTS (SELECT 1 FROM customers WHERE external_id = $2)
            ",
        )
        .bind(id)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM customers WHERE id = $1 AND external_id = $2)",
        )
        .bind(id)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(already)
    }

    #[instrument(skip(self))]
    async fn relink_external_id(
        &self,
        id: CustomerId,
        external_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE customers
            SET external_id = $2, updated_at = NOW()
            WHERE id = $1
              AND NOT EXISTS (SELECT 1 FROM customers WHERE external_id = $2 AND id <> $1)
            ",
        )
        .bind(id)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        sqlx::query_as::<_, CustomerRow>(select_customers!("WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Customer::try_from)
            .transpose()
    }

    async fn find_customer_by_email(&self, email: &Email) -> Result<Option<Customer>, StoreError> {
        sqlx::query_as::<_, CustomerRow>(select_customers!("WHERE email = $1"))
            .bind(email.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Customer::try_from)
            .transpose()
    }

    async fn find_customer_by_phone(&self, phone: &Phone) -> Result<Vec<Customer>, StoreError> {
        let rows = sqlx::query_as::<_, CustomerRow>(select_customers!(
            "WHERE phone = $1 ORDER BY id"
        ))
        .bind(phone.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_customers(rows)
    }

    async fn find_customer_by_phone_suffix(
        &self,
        suffix: &str,
    ) -> Result<Vec<Customer>, StoreError> {
        if suffix.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, CustomerRow>(select_customers!(
            "WHERE phone IS NOT NULL AND right(phone, length($1)) = $1 ORDER BY id"
        ))
        .bind(suffix)
        .fetch_all(&self.pool)
        .await?;

        into_customers(rows)
    }

    async fn find_customer_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Customer>, StoreError> {
        sqlx::query_as::<_, CustomerRow>(select_customers!("WHERE external_id = $1"))
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Customer::try_from)
            .transpose()
    }

    async fn get_snapshot(
        &self,
        handle: &str,
        channel: &Channel,
    ) -> Result<Option<ContactSnapshot>, StoreError> {
        sqlx::query_as::<_, SnapshotRow>(
            r"
            SELECT handle, channel, display_name, lifetime_value, order_count, risk_tier,
                   tags, average_ticket, last_fulfillment_status, updated_at
            FROM contact_snapshots
            WHERE handle = $1 AND channel = $2
            ",
        )
        .bind(handle)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(ContactSnapshot::try_from)
        .transpose()
    }

    async fn orders_for_customer(&self, id: CustomerId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(select_orders!(
            "WHERE customer_id = $1 ORDER BY remote_created_at DESC NULLS LAST, id DESC"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        into_orders(rows)
    }

    #[instrument(skip(self))]
    async fn orders_missing_status(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(select_orders!(
            "WHERE financial_status IS NULL OR fulfillment_status IS NULL \
             ORDER BY remote_created_at DESC NULLS LAST, id DESC LIMIT $1"
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        into_orders(rows)
    }

    #[instrument(skip(self))]
    async fn customers_with_orders(&self) -> Result<Vec<Customer>, StoreError> {
        let rows = sqlx::query_as::<_, CustomerRow>(select_customers!(
            "WHERE last_order_at IS NOT NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        into_customers(rows)
    }
}
