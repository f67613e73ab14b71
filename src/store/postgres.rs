use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgArguments, PgPoolOptions, PgRow},
    query::Query,
    types::Json,
    PgPool, Postgres, Row,
};
use tracing::info;

use super::{phone_digits, MessagingStore, SendOutcome};
use crate::error::{Error, Result};
use crate::types::{
    Channel, Conversation, Customer, Direction, Message, MessageStatus, MessageType,
    MessagingConfig, Order, Ownership, Product, Storefront,
};

const CONFIG_COLUMNS: &str = "id, tenant_id, store_id, ai_enabled, ai_persona, \
     ai_auto_reply_delay_ms, ai_handle_orders, ai_handle_products, ai_handle_support, \
     ai_escalation_keywords, whatsapp_phone_number_id, whatsapp_access_token, \
     whatsapp_verify_token, whatsapp_app_secret, web_chat_enabled, web_chat_welcome_message, \
     web_chat_primary_color, is_active, created_at, updated_at";

const CONVERSATION_COLUMNS: &str = "id, config_id, channel, contact_id, customer_id, \
     customer_name, customer_email, customer_phone, status, unread_count, last_message_at, \
     last_message_preview, ownership, ai_context, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, direction, message_type, body, media_url, \
     media_mime_type, media_caption, latitude, longitude, location_name, status, \
     external_message_id, ai_generated, ai_confidence, created_at, sent_at, delivered_at, \
     read_at, error_message";

const MESSAGE_PLACEHOLDERS: &str =
    "$1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20";

/// Postgres-backed store. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and runs pending migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations applied");
        Ok(Self::new(pool))
    }
}

fn unexpected(column: &str, value: &str) -> Error {
    Error::Store(sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value {value:?}").into(),
    })
}

fn parse_config_row(row: &PgRow) -> Result<MessagingConfig> {
    let keywords: Json<Vec<String>> = row.try_get("ai_escalation_keywords")?;
    Ok(MessagingConfig {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        store_id: row.try_get("store_id")?,
        ai_enabled: row.try_get("ai_enabled")?,
        ai_persona: row.try_get("ai_persona")?,
        ai_auto_reply_delay_ms: row.try_get("ai_auto_reply_delay_ms")?,
        ai_handle_orders: row.try_get("ai_handle_orders")?,
        ai_handle_products: row.try_get("ai_handle_products")?,
        ai_handle_support: row.try_get("ai_handle_support")?,
        ai_escalation_keywords: keywords.0,
        whatsapp_phone_number_id: row.try_get("whatsapp_phone_number_id")?,
        whatsapp_access_token: row.try_get("whatsapp_access_token")?,
        whatsapp_verify_token: row.try_get("whatsapp_verify_token")?,
        whatsapp_app_secret: row.try_get("whatsapp_app_secret")?,
        web_chat_enabled: row.try_get("web_chat_enabled")?,
        web_chat_welcome_message: row.try_get("web_chat_welcome_message")?,
        web_chat_primary_color: row.try_get("web_chat_primary_color")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_conversation_row(row: &PgRow) -> Result<Conversation> {
    let channel: String = row.try_get("channel")?;
    let ownership: String = row.try_get("ownership")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        config_id: row.try_get("config_id")?,
        channel: Channel::parse(&channel).ok_or_else(|| unexpected("channel", &channel))?,
        contact_id: row.try_get("contact_id")?,
        customer_id: row.try_get("customer_id")?,
        customer_name: row.try_get("customer_name")?,
        customer_email: row.try_get("customer_email")?,
        customer_phone: row.try_get("customer_phone")?,
        status: row.try_get("status")?,
        unread_count: row.try_get("unread_count")?,
        last_message_at: row.try_get("last_message_at")?,
        last_message_preview: row.try_get("last_message_preview")?,
        ownership: Ownership::parse(&ownership)
            .ok_or_else(|| unexpected("ownership", &ownership))?,
        ai_context: row.try_get("ai_context")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_message_row(row: &PgRow) -> Result<Message> {
    let direction: String = row.try_get("direction")?;
    let status: String = row.try_get("status")?;
    let message_type: String = row.try_get("message_type")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        direction: Direction::parse(&direction)
            .ok_or_else(|| unexpected("direction", &direction))?,
        message_type: MessageType::from(message_type),
        body: row.try_get("body")?,
        media_url: row.try_get("media_url")?,
        media_mime_type: row.try_get("media_mime_type")?,
        media_caption: row.try_get("media_caption")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        location_name: row.try_get("location_name")?,
        status: MessageStatus::parse(&status).ok_or_else(|| unexpected("status", &status))?,
        external_message_id: row.try_get("external_message_id")?,
        ai_generated: row.try_get("ai_generated")?,
        ai_confidence: row.try_get("ai_confidence")?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
        delivered_at: row.try_get("delivered_at")?,
        read_at: row.try_get("read_at")?,
        error_message: row.try_get("error_message")?,
    })
}

fn parse_customer_row(row: &PgRow) -> Result<Customer> {
    Ok(Customer {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
    })
}

fn bind_message<'q>(
    query: Query<'q, Postgres, PgArguments>,
    m: &'q Message,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(&m.id)
        .bind(&m.conversation_id)
        .bind(m.direction.as_str())
        .bind(m.message_type.as_str())
        .bind(&m.body)
        .bind(&m.media_url)
        .bind(&m.media_mime_type)
        .bind(&m.media_caption)
        .bind(m.latitude)
        .bind(m.longitude)
        .bind(&m.location_name)
        .bind(m.status.as_str())
        .bind(&m.external_message_id)
        .bind(m.ai_generated)
        .bind(m.ai_confidence)
        .bind(m.created_at)
        .bind(m.sent_at)
        .bind(m.delivered_at)
        .bind(m.read_at)
        .bind(&m.error_message)
}

impl PgStore {
    async fn config_where(&self, clause: &str, value: &str) -> Result<Option<MessagingConfig>> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM messaging_configs WHERE {clause} = $1 \
             ORDER BY created_at ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_config_row).transpose()
    }
}

#[async_trait]
impl MessagingStore for PgStore {
    async fn find_storefront(&self, store_id: &str) -> Result<Option<Storefront>> {
        let row = sqlx::query("SELECT id, tenant_id, name FROM storefronts WHERE id = $1")
            .bind(store_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<Storefront> {
            Ok(Storefront {
                id: row.try_get("id")?,
                tenant_id: row.try_get("tenant_id")?,
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }

    async fn find_config_by_store(&self, store_id: &str) -> Result<Option<MessagingConfig>> {
        self.config_where("store_id", store_id).await
    }

    async fn find_config_by_phone_number_id(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<MessagingConfig>> {
        if phone_number_id.is_empty() {
            return Ok(None);
        }
        self.config_where("whatsapp_phone_number_id", phone_number_id)
            .await
    }

    async fn find_config_by_verify_token(&self, token: &str) -> Result<Option<MessagingConfig>> {
        if token.is_empty() {
            return Ok(None);
        }
        self.config_where("whatsapp_verify_token", token).await
    }

    async fn insert_config(&self, c: &MessagingConfig) -> Result<()> {
        let sql = format!(
            "INSERT INTO messaging_configs ({CONFIG_COLUMNS}) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)"
        );
        sqlx::query(&sql)
            .bind(&c.id)
            .bind(&c.tenant_id)
            .bind(&c.store_id)
            .bind(c.ai_enabled)
            .bind(&c.ai_persona)
            .bind(c.ai_auto_reply_delay_ms)
            .bind(c.ai_handle_orders)
            .bind(c.ai_handle_products)
            .bind(c.ai_handle_support)
            .bind(Json(&c.ai_escalation_keywords))
            .bind(&c.whatsapp_phone_number_id)
            .bind(&c.whatsapp_access_token)
            .bind(&c.whatsapp_verify_token)
            .bind(&c.whatsapp_app_secret)
            .bind(c.web_chat_enabled)
            .bind(&c.web_chat_welcome_message)
            .bind(&c.web_chat_primary_color)
            .bind(c.is_active)
            .bind(c.created_at)
            .bind(c.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_conversation(
        &self,
        config_id: &str,
        channel: Channel,
        contact_id: &str,
    ) -> Result<Option<Conversation>> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE config_id = $1 AND channel = $2 AND contact_id = $3"
        );
        let row = sqlx::query(&sql)
            .bind(config_id)
            .bind(channel.as_str())
            .bind(contact_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_conversation_row).transpose()
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_conversation_row).transpose()
    }

    async fn insert_conversation(&self, c: &Conversation) -> Result<()> {
        let sql = format!(
            "INSERT INTO conversations ({CONVERSATION_COLUMNS}) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)"
        );
        sqlx::query(&sql)
            .bind(&c.id)
            .bind(&c.config_id)
            .bind(c.channel.as_str())
            .bind(&c.contact_id)
            .bind(&c.customer_id)
            .bind(&c.customer_name)
            .bind(&c.customer_email)
            .bind(&c.customer_phone)
            .bind(&c.status)
            .bind(c.unread_count)
            .bind(c.last_message_at)
            .bind(&c.last_message_preview)
            .bind(c.ownership.as_str())
            .bind(&c.ai_context)
            .bind(c.created_at)
            .bind(c.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_activity(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
        preview: &str,
        unread_delta: i32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations \
             SET last_message_at = GREATEST(last_message_at, $1), \
                 last_message_preview = CASE \
                     WHEN last_message_at IS NULL OR $1 >= last_message_at THEN $2 \
                     ELSE last_message_preview END, \
                 unread_count = unread_count + $3, updated_at = now() \
             WHERE id = $4",
        )
        .bind(at)
        .bind(preview)
        .bind(unread_delta)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn escalate(&self, conversation_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET ownership = 'escalated', updated_at = now() \
             WHERE id = $1 AND ownership <> 'escalated'",
        )
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_message(&self, message: &Message) -> Result<bool> {
        let sql = format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES ({MESSAGE_PLACEHOLDERS}) \
             ON CONFLICT (conversation_id, external_message_id) \
             WHERE external_message_id <> '' DO NOTHING"
        );
        let result = bind_message(sqlx::query(&sql), message)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_ai_reply(&self, message: &Message) -> Result<bool> {
        let sql = format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) SELECT {MESSAGE_PLACEHOLDERS} \
             WHERE EXISTS (SELECT 1 FROM conversations WHERE id = $2 AND ownership = 'ai')"
        );
        let result = bind_message(sqlx::query(&sql), message)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_send_outcome(&self, message_id: &str, outcome: &SendOutcome) -> Result<()> {
        match outcome {
            SendOutcome::Sent { external_id, at } => {
                sqlx::query(
                    "UPDATE messages SET status = 'sent', sent_at = $1, \
                     external_message_id = COALESCE($2, external_message_id) \
                     WHERE id = $3",
                )
                .bind(at)
                .bind(external_id)
                .bind(message_id)
                .execute(&self.pool)
                .await?;
            }
            SendOutcome::Failed { error } => {
                sqlx::query(
                    "UPDATE messages SET status = 'failed', error_message = $1 WHERE id = $2",
                )
                .bind(error)
                .bind(message_id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM ( \
                SELECT {MESSAGE_COLUMNS}, seq FROM messages WHERE conversation_id = $1 \
                ORDER BY created_at DESC, seq DESC LIMIT $2 \
             ) recent ORDER BY created_at ASC, seq ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(conversation_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_message_row).collect()
    }

    async fn apply_delivery_status(
        &self,
        config_id: &str,
        external_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<bool> {
        if external_id.is_empty() {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE messages m SET status = $3, \
                 sent_at = CASE WHEN $3 = 'sent' THEN $4 ELSE m.sent_at END, \
                 delivered_at = CASE WHEN $3 = 'delivered' THEN $4 ELSE m.delivered_at END, \
                 read_at = CASE WHEN $3 = 'read' THEN $4 ELSE m.read_at END, \
                 error_message = CASE WHEN $3 = 'failed' THEN $5 ELSE m.error_message END \
             FROM conversations c \
             WHERE m.conversation_id = c.id AND c.config_id = $1 \
               AND m.external_message_id = $2 AND m.direction = 'outbound'",
        )
        .bind(config_id)
        .bind(external_id)
        .bind(status.as_str())
        .bind(at)
        .bind(error.unwrap_or("delivery failed"))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_customer(&self, store_id: &str, customer_id: &str) -> Result<Option<Customer>> {
        let row = sqlx::query(
            "SELECT id, store_id, name, email, phone FROM customers WHERE store_id = $1 AND id = $2",
        )
        .bind(store_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_customer_row).transpose()
    }

    async fn find_customer_by_phone(&self, store_id: &str, phone: &str) -> Result<Option<Customer>> {
        let digits = phone_digits(phone);
        if digits.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(
            "SELECT id, store_id, name, email, phone FROM customers \
             WHERE store_id = $1 AND regexp_replace(phone, '[^0-9]', '', 'g') = $2 \
             LIMIT 1",
        )
        .bind(store_id)
        .bind(digits)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_customer_row).transpose()
    }

    async fn find_customer_by_email(&self, store_id: &str, email: &str) -> Result<Option<Customer>> {
        let email = email.trim();
        if email.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(
            "SELECT id, store_id, name, email, phone FROM customers \
             WHERE store_id = $1 AND lower(trim(email)) = lower($2) \
             LIMIT 1",
        )
        .bind(store_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_customer_row).transpose()
    }

    async fn active_products(&self, store_id: &str, limit: usize) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT id, store_id, name, price, description, is_active FROM products \
             WHERE store_id = $1 AND is_active = TRUE \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(store_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<Product> {
                Ok(Product {
                    id: row.try_get("id")?,
                    store_id: row.try_get("store_id")?,
                    name: row.try_get("name")?,
                    price: row.try_get("price")?,
                    description: row.try_get("description")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect()
    }

    async fn recent_orders(&self, customer_id: &str, limit: usize) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT id, customer_id, order_number, total_amount, status, payment_status, created_at \
             FROM orders WHERE customer_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(customer_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<Order> {
                Ok(Order {
                    id: row.try_get("id")?,
                    customer_id: row.try_get("customer_id")?,
                    order_number: row.try_get("order_number")?,
                    total_amount: row.try_get("total_amount")?,
                    status: row.try_get("status")?,
                    payment_status: row.try_get("payment_status")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
